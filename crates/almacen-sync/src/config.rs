//! # Sync Configuration
//!
//! Reconciler tuning, loadable from a TOML file.
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [sync]
//! poll_interval_secs = 5
//! batch_size = 100
//! max_retry_attempts = 10
//! initial_backoff_ms = 500
//! max_backoff_secs = 60
//! ```
//!
//! Missing fields take their defaults, so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{SyncError, SyncResult};

/// Reconciler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds between drain attempts while healthy.
    pub poll_interval_secs: u64,

    /// Maximum queue entries replayed per drain.
    pub batch_size: u32,

    /// Entries past this many failed attempts are skipped with a warning.
    pub max_retry_attempts: i64,

    /// First backoff delay after a failed drain.
    pub initial_backoff_ms: u64,

    /// Backoff ceiling.
    pub max_backoff_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            poll_interval_secs: 5,
            batch_size: 100,
            max_retry_attempts: 10,
            initial_backoff_ms: 500,
            max_backoff_secs: 60,
        }
    }
}

/// On-disk shape: settings live under a `[sync]` table.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SyncFile {
    #[serde(default)]
    sync: SyncSettings,
}

impl SyncSettings {
    /// Loads settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: SyncFile = toml::from_str(&raw)?;
        file.sync.validate()?;
        Ok(file.sync)
    }

    /// Rejects configurations the reconciler cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.max_retry_attempts <= 0 {
            return Err(SyncError::InvalidConfig(
                "max_retry_attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.poll_interval_secs, 5);
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.max_retry_attempts, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\nbatch_size = 25").unwrap();

        let settings = SyncSettings::load(file.path()).unwrap();
        assert_eq!(settings.batch_size, 25);
        assert_eq!(settings.poll_interval_secs, 5); // default
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = SyncSettings {
            batch_size: 0,
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\nmax_retry_attempts = 0").unwrap();
        assert!(SyncSettings::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(matches!(
            SyncSettings::load("/definitely/not/here.toml"),
            Err(SyncError::ConfigLoadFailed(_))
        ));
    }
}
