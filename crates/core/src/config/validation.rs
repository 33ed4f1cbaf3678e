//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Longest accepted session TTL: one week.
const MAX_TTL_HOURS: u64 = 168;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `session_ttl_hours` is 0 or exceeds one week
    /// - `sweep_interval_secs` is 0 or longer than the TTL
    /// - `max_cached_results` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_ttl_hours == 0 {
            return Err(ConfigError::Invalid {
                field: "session_ttl_hours".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.session_ttl_hours > MAX_TTL_HOURS {
            return Err(ConfigError::Invalid {
                field: "session_ttl_hours".into(),
                reason: format!("must not exceed {MAX_TTL_HOURS} hours"),
            });
        }

        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep_interval_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.sweep_interval_secs > self.session_ttl_hours * 3600 {
            return Err(ConfigError::Invalid {
                field: "sweep_interval_secs".into(),
                reason: "must not exceed the session TTL".into(),
            });
        }

        if self.max_cached_results == 0 {
            return Err(ConfigError::Invalid {
                field: "max_cached_results".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.sweep_interval_secs * 10 > self.session_ttl_hours * 3600 {
            tracing::warn!(
                sweep_interval_secs = self.sweep_interval_secs,
                session_ttl_hours = self.session_ttl_hours,
                "sweep interval is a large fraction of the session TTL; \
                 idle sessions may linger well past expiry"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_ttl_zero() {
        let config = AppConfig { session_ttl_hours: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "session_ttl_hours"));
    }

    #[test]
    fn test_validate_ttl_exceeds_limit() {
        let config = AppConfig { session_ttl_hours: 169, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "session_ttl_hours"));
    }

    #[test]
    fn test_validate_sweep_interval_zero() {
        let config = AppConfig { sweep_interval_secs: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "sweep_interval_secs"));
    }

    #[test]
    fn test_validate_sweep_interval_longer_than_ttl() {
        let config = AppConfig { session_ttl_hours: 1, sweep_interval_secs: 3601, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "sweep_interval_secs"));
    }

    #[test]
    fn test_validate_max_cached_results_zero() {
        let config = AppConfig { max_cached_results: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_cached_results"));
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig { session_ttl_hours: 1, sweep_interval_secs: 3600, max_cached_results: 1 };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_max_values() {
        let config = AppConfig { session_ttl_hours: 168, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
