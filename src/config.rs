//! Resource manager configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::unquote;
use crate::transaction::LockRetryMode;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("retry interval must be positive in retry mode")]
    InvalidRetryInterval,

    /// A local retry bound shorter than one coordinator round trip makes
    /// every attempt time out locally.
    #[error(
        "max retry duration {max_retry_duration_ms}ms is shorter than the coordinator timeout {coordinator_timeout_ms}ms"
    )]
    RetryBoundTooShort {
        max_retry_duration_ms: u64,
        coordinator_timeout_ms: u64,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Resource manager options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RmConfig {
    /// What a lock conflict at commit does.
    pub lock_retry_mode: LockRetryMode,
    /// Sleep between lock attempts in retry mode.
    pub retry_interval_ms: u64,
    /// Upper bound on time spent retrying a lock.
    pub max_retry_duration_ms: u64,
    /// Timeout of one coordinator round trip.
    pub coordinator_timeout_ms: u64,
    /// Tables whose statements never take global locks or record undo.
    pub skip_lock_check_tables: BTreeSet<String>,
    /// Compare current rows against the after image before compensating.
    pub data_validation: bool,
    /// Report phase-one success to the coordinator.
    pub report_success_enable: bool,
    /// UPDATE images capture the key and updated columns only.
    pub only_care_update_columns: bool,
}

impl Default for RmConfig {
    fn default() -> Self {
        Self {
            lock_retry_mode: LockRetryMode::default(),
            retry_interval_ms: 10,
            max_retry_duration_ms: 300,
            coordinator_timeout_ms: 100,
            skip_lock_check_tables: BTreeSet::new(),
            data_validation: true,
            report_success_enable: false,
            only_care_update_columns: true,
        }
    }
}

impl RmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration. Missing keys take defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_retry_mode != LockRetryMode::Retry {
            return Ok(());
        }
        if self.retry_interval_ms == 0 {
            return Err(ConfigError::InvalidRetryInterval);
        }
        if self.max_retry_duration_ms < self.coordinator_timeout_ms {
            return Err(ConfigError::RetryBoundTooShort {
                max_retry_duration_ms: self.max_retry_duration_ms,
                coordinator_timeout_ms: self.coordinator_timeout_ms,
            });
        }
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn max_retry_duration(&self) -> Duration {
        Duration::from_millis(self.max_retry_duration_ms)
    }

    /// Check if statements on `table` bypass lock and undo bookkeeping.
    pub fn skips_lock_check(&self, table: &str) -> bool {
        let table = unquote(table);
        self.skip_lock_check_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table))
    }

    /// Set the lock retry mode.
    pub fn lock_retry_mode(mut self, mode: LockRetryMode) -> Self {
        self.lock_retry_mode = mode;
        self
    }

    /// Set retry interval and bound, in milliseconds.
    pub fn retry(mut self, interval_ms: u64, max_duration_ms: u64) -> Self {
        self.retry_interval_ms = interval_ms;
        self.max_retry_duration_ms = max_duration_ms;
        self
    }

    pub fn coordinator_timeout_ms(mut self, value: u64) -> Self {
        self.coordinator_timeout_ms = value;
        self
    }

    /// Add a table to the skip-lock-check set.
    pub fn skip_lock_check(mut self, table: impl Into<String>) -> Self {
        self.skip_lock_check_tables.insert(table.into());
        self
    }

    pub fn data_validation(mut self, value: bool) -> Self {
        self.data_validation = value;
        self
    }

    pub fn report_success_enable(mut self, value: bool) -> Self {
        self.report_success_enable = value;
        self
    }

    pub fn only_care_update_columns(mut self, value: bool) -> Self {
        self.only_care_update_columns = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RmConfig::default();
        assert_eq!(config.lock_retry_mode, LockRetryMode::RollbackOnConflict);
        assert!(config.validate().is_ok());
        assert!(RmConfig::new().lock_retry_mode(LockRetryMode::Retry).validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = RmConfig::from_json(
            r#"{"lock_retry_mode": "retry", "retry_interval_ms": 5, "skip_lock_check_tables": ["audit"]}"#,
        )
        .unwrap();
        assert_eq!(config.lock_retry_mode, LockRetryMode::Retry);
        assert_eq!(config.retry_interval(), Duration::from_millis(5));
        assert_eq!(config.max_retry_duration_ms, 300);
        assert!(config.skips_lock_check("AUDIT"));
        assert!(config.skips_lock_check("`audit`"));
        assert!(!config.skips_lock_check("orders"));
    }

    #[test]
    fn test_retry_bound_shorter_than_round_trip() {
        let config = RmConfig::new()
            .lock_retry_mode(LockRetryMode::Retry)
            .retry(10, 50)
            .coordinator_timeout_ms(200);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RetryBoundTooShort { .. })
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = RmConfig::new().lock_retry_mode(LockRetryMode::Retry).retry(0, 500);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRetryInterval)));
        assert!(matches!(
            RmConfig::from_json("{\"retry_interval_ms\": \"x\"}"),
            Err(ConfigError::Parse(_))
        ));
    }
}
