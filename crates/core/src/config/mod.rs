//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (GEOLEDGER_*)
//! 2. TOML config file (if GEOLEDGER_CONFIG_FILE set)
//! 3. Built-in defaults

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::session::SessionConfig;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (GEOLEDGER_*)
/// 2. TOML config file (if GEOLEDGER_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Idle hours before a session ledger is evicted.
    ///
    /// Set via GEOLEDGER_SESSION_TTL_HOURS environment variable.
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,

    /// Minimum seconds between amortized expiry sweeps.
    ///
    /// Set via GEOLEDGER_SWEEP_INTERVAL_SECS environment variable.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Per-session cap on cached request results.
    ///
    /// Set via GEOLEDGER_MAX_CACHED_RESULTS environment variable.
    #[serde(default = "default_max_cached_results")]
    pub max_cached_results: usize,
}

fn default_session_ttl_hours() -> u64 {
    4
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_max_cached_results() -> usize {
    64
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_cached_results: default_max_cached_results(),
        }
    }
}

impl AppConfig {
    /// Session TTL as Duration.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_hours * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Lifecycle settings for the session store.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ttl: self.session_ttl(),
            sweep_interval: self.sweep_interval(),
            max_cached_results: self.max_cached_results,
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `GEOLEDGER_`
    /// 2. TOML file from `GEOLEDGER_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("GEOLEDGER_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("GEOLEDGER_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
