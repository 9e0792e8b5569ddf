//! Configuration for the coordination core.
//!
//! Plain structs with sensible defaults, overridable from an optional TOML
//! file and `LATTICE_`-prefixed environment variables (e.g.
//! `LATTICE_TRANSACTION__PREPARE_TIMEOUT_MS=250`).

use crate::error::{CoreError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration for the coordination core.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database_url: String,
    pub transaction: TransactionConfig,
    pub driver: DriverConfig,
    pub event_channel_capacity: usize,
}

/// Timeouts bounding each coordinator phase, per participant.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    prepare_timeout_ms: u64,
    commit_timeout_ms: u64,
}

impl TransactionConfig {
    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

/// Workflow driver behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Reload-and-recompute attempts after an optimistic concurrency
    /// conflict before the conflict is surfaced to the caller.
    pub max_conflict_retries: u32,
    /// Upper bound on actions executed in one workflow run.
    pub max_steps_per_run: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/lattice_development".to_string(),
            transaction: TransactionConfig::default(),
            driver: DriverConfig::default(),
            event_channel_capacity: 1000,
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: 5_000,
            commit_timeout_ms: 10_000,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            max_steps_per_run: 100,
        }
    }
}

impl CoreConfig {
    /// Load configuration: defaults, then an optional TOML file, then
    /// environment overrides.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("LATTICE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CoreError::Configuration(e.to_string()))?;

        let mut cfg = CoreConfig::default();
        // Merge only the keys the source actually provided.
        if let Ok(loaded) = settings.try_deserialize::<CoreConfig>() {
            cfg = loaded;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            cfg.database_url = url;
        }
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Configuration with short timeouts for tests.
    pub fn for_testing() -> Self {
        Self {
            database_url: "postgresql://localhost/lattice_test".to_string(),
            transaction: TransactionConfig {
                prepare_timeout_ms: 100,
                commit_timeout_ms: 100,
            },
            driver: DriverConfig {
                max_conflict_retries: 2,
                max_steps_per_run: 10,
            },
            event_channel_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.transaction.prepare_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.transaction.commit_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.driver.max_conflict_retries, 3);
    }

    #[test]
    fn test_testing_profile_uses_short_timeouts() {
        let cfg = CoreConfig::for_testing();
        assert!(cfg.transaction.prepare_timeout() < Duration::from_secs(1));
        assert!(cfg.database_url.contains("test"));
    }
}
