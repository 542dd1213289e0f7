//! Database configuration module.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with
//! `Schema::create_table_from_entity`, so the schema always matches the Rust models.

use crate::config::settings::Settings;
use crate::entities::{Account, Booking, LedgerEntry, Listing, Slot};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info};

/// Database used when neither `DATABASE_URL` nor the settings file name one.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://skill_escrow.sqlite?mode=rwc";

/// Resolves the database URL: `DATABASE_URL` first, then the settings file,
/// then [`DEFAULT_DATABASE_URL`].
#[must_use]
pub fn get_database_url(settings: &Settings) -> String {
    std::env::var("DATABASE_URL")
        .ok()
        .or_else(|| settings.database_url.clone())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database at `database_url`.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    debug!("Connecting to database at {}", database_url);
    Database::connect(database_url).await.map_err(Into::into)
}

/// Creates all engine tables if they do not exist yet.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    create_table(db, Account).await?;
    create_table(db, Listing).await?;
    create_table(db, Booking).await?;
    create_table(db, LedgerEntry).await?;
    create_table(db, Slot).await?;
    info!("Database tables ready");
    Ok(())
}

async fn create_table<E>(db: &DatabaseConnection, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}
