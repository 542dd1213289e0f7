//! Engine settings loaded from a TOML file.
//!
//! Every field has a default, so a missing file or a partial file is fine;
//! a file that exists but does not parse is a configuration error.
//!
//! ```toml
//! database_url = "sqlite://skill_escrow.sqlite?mode=rwc"
//!
//! [escrow]
//! account_handle = "escrow@system.internal"
//! initial_grant = "100.00"
//!
//! [reconciler]
//! enabled = true
//! interval_minutes = 60
//! grace_hours = 48
//! ```

use crate::core::amount::to_minor;
use crate::errors::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Environment variable that overrides the settings file location.
pub const SETTINGS_PATH_ENV: &str = "SKILL_ESCROW_CONFIG";

/// Settings file used when [`SETTINGS_PATH_ENV`] is unset.
pub const DEFAULT_SETTINGS_PATH: &str = "skill_escrow.toml";

/// Longest accepted tick interval: one year.
const MAX_INTERVAL_MINUTES: u64 = 366 * 24 * 60;

/// Top-level settings file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Overridden by `DATABASE_URL`
    pub database_url: Option<String>,
    pub escrow: EscrowSettings,
    pub reconciler: ReconcilerSettings,
}

/// Escrow account and token issuance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EscrowSettings {
    /// Handle of the system escrow account
    pub account_handle: String,
    pub display_name: String,
    /// Tokens granted to every newly opened account
    pub initial_grant: Decimal,
}

impl Default for EscrowSettings {
    fn default() -> Self {
        Self {
            account_handle: "escrow@system.internal".to_string(),
            display_name: "Platform Escrow".to_string(),
            initial_grant: Decimal::new(10_000, 2),
        }
    }
}

/// Auto-release schedule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconcilerSettings {
    pub enabled: bool,
    /// Minutes between ticks
    pub interval_minutes: u64,
    /// Hours a confirmed booking may stay unresolved after its session time
    pub grace_hours: i64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 60,
            grace_hours: 48,
        }
    }
}

impl ReconcilerSettings {
    #[must_use]
    pub const fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    #[must_use]
    pub fn grace(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.grace_hours).unwrap_or(chrono::Duration::MAX)
    }
}

impl Settings {
    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.escrow.account_handle.trim().is_empty() {
            return Err(Error::Config {
                message: "escrow.account_handle cannot be empty".to_string(),
            });
        }
        if self.escrow.initial_grant < Decimal::ZERO {
            return Err(Error::InvalidAmount {
                amount: self.escrow.initial_grant,
            });
        }
        to_minor(self.escrow.initial_grant)?;
        if self.reconciler.interval_minutes == 0 || self.reconciler.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(Error::Config {
                message: format!(
                    "reconciler.interval_minutes must be between 1 and {MAX_INTERVAL_MINUTES}"
                ),
            });
        }
        if self.reconciler.grace_hours < 0 || chrono::Duration::try_hours(self.reconciler.grace_hours).is_none() {
            return Err(Error::Config {
                message: "reconciler.grace_hours must be a non-negative number of hours".to_string(),
            });
        }
        Ok(())
    }
}

/// Parses and validates settings from TOML text.
pub fn parse_settings(contents: &str) -> Result<Settings> {
    let settings: Settings = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse settings: {e}"),
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from `path`, which must exist.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    debug!("Loading settings from {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read settings file {}: {e}", path_ref.display()),
    })?;
    parse_settings(&contents)
}

/// Loads settings from [`SETTINGS_PATH_ENV`] or [`DEFAULT_SETTINGS_PATH`],
/// falling back to defaults when the file does not exist.
pub fn load_default_settings() -> Result<Settings> {
    let path = std::env::var(SETTINGS_PATH_ENV).unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
    if Path::new(&path).exists() {
        load_settings(&path)
    } else {
        info!("No settings file at {}; using defaults", path);
        Ok(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_full_settings() {
        let settings = parse_settings(
            r#"
            database_url = "sqlite::memory:"

            [escrow]
            account_handle = "vault@system.internal"
            initial_grant = "25.50"

            [reconciler]
            enabled = false
            interval_minutes = 15
            grace_hours = 72
            "#,
        )
        .unwrap();

        assert_eq!(settings.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(settings.escrow.account_handle, "vault@system.internal");
        assert_eq!(settings.escrow.display_name, "Platform Escrow");
        assert_eq!(settings.escrow.initial_grant, dec!(25.50));
        assert!(!settings.reconciler.enabled);
        assert_eq!(settings.reconciler.interval(), std::time::Duration::from_secs(900));
        assert_eq!(settings.reconciler.grace(), chrono::Duration::hours(72));
    }

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings = parse_settings("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.escrow.initial_grant, dec!(100.00));
        assert_eq!(settings.reconciler.grace_hours, 48);
        assert_eq!(settings.reconciler.interval_minutes, 60);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        assert!(matches!(
            parse_settings("[reconciler]\ninterval_minutes = 0"),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            parse_settings("[escrow]\ninitial_grant = \"-1\""),
            Err(Error::InvalidAmount { .. })
        ));
        assert!(matches!(
            parse_settings("[escrow]\ninitial_grant = \"0.001\""),
            Err(Error::InvalidAmount { .. })
        ));
        assert!(matches!(
            parse_settings("reconciler = 3"),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_out_of_range_schedule_is_rejected() {
        let huge_interval = format!("[reconciler]\ninterval_minutes = {}", u64::MAX / 60 + 1);
        assert!(matches!(parse_settings(&huge_interval), Err(Error::Config { .. })));
        assert!(matches!(
            parse_settings("[reconciler]\ninterval_minutes = 527041"),
            Err(Error::Config { .. })
        ));

        let yearly = parse_settings("[reconciler]\ninterval_minutes = 527040").unwrap();
        assert_eq!(
            yearly.reconciler.interval(),
            std::time::Duration::from_secs(527_040 * 60)
        );

        let huge_grace = format!("[reconciler]\ngrace_hours = {}", i64::MAX);
        assert!(matches!(parse_settings(&huge_grace), Err(Error::Config { .. })));
        assert!(matches!(
            parse_settings("[reconciler]\ngrace_hours = -1"),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_load_settings_missing_file_is_config_error() {
        let result = load_settings("definitely/not/here.toml");
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
