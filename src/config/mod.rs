/// Database configuration and connection management
pub mod database;

/// Engine settings loading from the TOML settings file
pub mod settings;
