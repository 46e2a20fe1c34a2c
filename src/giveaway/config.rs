//! Manager configuration from environment variables
//!
//! The config value is handed to the manager at construction and never
//! mutated afterwards.

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Json,
    Sqlite,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Json => "json",
            StoreBackend::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the giveaway manager and scheduler
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Reconciliation tick interval in milliseconds
    pub tick_interval_ms: u64,

    /// How long ended giveaways are kept before purging (`None` keeps them forever)
    pub retention_ms: Option<i64>,

    /// Drops still open after this long are purged
    pub drop_max_age_ms: i64,

    /// Upper bound on prize length (characters)
    pub max_prize_len: usize,

    /// Threshold used when `start` is not given last-chance settings
    pub default_last_chance_threshold_ms: i64,

    /// Broadcast buffer for lifecycle notifications
    pub event_buffer: usize,

    pub store_backend: StoreBackend,

    /// JSON snapshot file or SQLite database path
    pub store_path: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 15_000,
            retention_ms: None,
            drop_max_age_ms: 7 * 24 * 60 * 60 * 1_000,
            max_prize_len: 256,
            default_last_chance_threshold_ms: 5_000,
            event_buffer: 1_024,
            store_backend: StoreBackend::Json,
            store_path: "giveaways.json".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `GIVEAWAY_TICK_INTERVAL_MS` (default: 15000)
    /// - `GIVEAWAY_RETENTION_MS` (default: unset, ended giveaways are kept)
    /// - `GIVEAWAY_DROP_MAX_AGE_MS` (default: one week)
    /// - `GIVEAWAY_MAX_PRIZE_LEN` (default: 256)
    /// - `GIVEAWAY_LAST_CHANCE_MS` (default: 5000)
    /// - `GIVEAWAY_EVENT_BUFFER` (default: 1024)
    /// - `GIVEAWAY_STORE_BACKEND` (`json` | `sqlite`, default: json)
    /// - `GIVEAWAY_STORE_PATH` (default: giveaways.json)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let tick_interval_ms = env::var("GIVEAWAY_TICK_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.tick_interval_ms);

        if tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "GIVEAWAY_TICK_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let retention_ms = env::var("GIVEAWAY_RETENTION_MS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|ms| *ms >= 0);

        let store_backend = match env::var("GIVEAWAY_STORE_BACKEND")
            .unwrap_or_else(|_| "json".to_string())
            .to_lowercase()
            .as_str()
        {
            "json" => StoreBackend::Json,
            "sqlite" => StoreBackend::Sqlite,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "GIVEAWAY_STORE_BACKEND must be json or sqlite, got {}",
                    other
                )))
            }
        };

        let store_path = env::var("GIVEAWAY_STORE_PATH").unwrap_or_else(|_| match store_backend {
            StoreBackend::Json => defaults.store_path.clone(),
            StoreBackend::Sqlite => "giveaways.db".to_string(),
        });

        Ok(Self {
            tick_interval_ms,
            retention_ms,
            drop_max_age_ms: env::var("GIVEAWAY_DROP_MAX_AGE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.drop_max_age_ms),
            max_prize_len: env::var("GIVEAWAY_MAX_PRIZE_LEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_prize_len),
            default_last_chance_threshold_ms: env::var("GIVEAWAY_LAST_CHANCE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_last_chance_threshold_ms),
            event_buffer: env::var("GIVEAWAY_EVENT_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.event_buffer),
            store_backend,
            store_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 8] = [
        "GIVEAWAY_TICK_INTERVAL_MS",
        "GIVEAWAY_RETENTION_MS",
        "GIVEAWAY_DROP_MAX_AGE_MS",
        "GIVEAWAY_MAX_PRIZE_LEN",
        "GIVEAWAY_LAST_CHANCE_MS",
        "GIVEAWAY_EVENT_BUFFER",
        "GIVEAWAY_STORE_BACKEND",
        "GIVEAWAY_STORE_PATH",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    // Single test so parallel test threads never race on the process env
    #[test]
    fn test_config_from_env() {
        clear_env();
        let config = ManagerConfig::from_env().unwrap();
        assert_eq!(config.tick_interval_ms, 15_000);
        assert_eq!(config.retention_ms, None);
        assert_eq!(config.drop_max_age_ms, 604_800_000);
        assert_eq!(config.max_prize_len, 256);
        assert_eq!(config.store_backend, StoreBackend::Json);
        assert_eq!(config.store_path, "giveaways.json");

        env::set_var("GIVEAWAY_TICK_INTERVAL_MS", "2000");
        env::set_var("GIVEAWAY_RETENTION_MS", "86400000");
        env::set_var("GIVEAWAY_STORE_BACKEND", "SQLite");
        let config = ManagerConfig::from_env().unwrap();
        assert_eq!(config.tick_interval_ms, 2_000);
        assert_eq!(config.retention_ms, Some(86_400_000));
        assert_eq!(config.store_backend, StoreBackend::Sqlite);
        assert_eq!(config.store_path, "giveaways.db");

        env::set_var("GIVEAWAY_STORE_BACKEND", "mongo");
        assert!(ManagerConfig::from_env().is_err());

        env::set_var("GIVEAWAY_STORE_BACKEND", "json");
        env::set_var("GIVEAWAY_TICK_INTERVAL_MS", "0");
        assert!(ManagerConfig::from_env().is_err());

        clear_env();
    }
}
