//! # Engine Configuration
//!
//! Tunables for the order/transaction engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MERIDIAN_DB_PATH=/var/lib/meridian/pos.db                          │
//! │     MERIDIAN_MAX_RETRIES=5                                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/meridian-pos/engine.toml (Linux)                         │
//! │     ~/Library/Application Support/com.meridian.pos/engine.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [retry]
//! max_retries = 3
//! base_delay_ms = 100
//!
//! [orders]
//! retention_hours = 24
//! sweep_interval_secs = 3600
//!
//! [sales]
//! duplicate_window_secs = 120
//! duplicate_tolerance_cents = 1
//!
//! [database]
//! path = "/var/lib/meridian/pos.db"
//! busy_timeout_ms = 5000
//! max_connections = 5
//! ```

use std::path::PathBuf;
use std::time::Duration;

use meridian_core::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::orders::{OrderLifecycleManager, DEFAULT_RETENTION_HOURS};
use crate::pool::{Database, DbConfig};
use crate::retry::RetryPolicy;
use crate::sales::{
    SaleTransactionCoordinator, DEFAULT_DUPLICATE_TOLERANCE_CENTS, DEFAULT_DUPLICATE_WINDOW_SECS,
};

const DEFAULT_DB_FILE: &str = "meridian.db";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to write config file: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

/// `[retry]`: write transaction retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per write.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff unit; attempt `n` waits `n × base_delay_ms`.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    100
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
        }
    }
}

/// `[orders]`: retention of terminal orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSettings {
    /// Age after which COMPLETED/CANCELLED orders are purged.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,

    /// How often the background sweeper runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_retention_hours() -> i64 {
    DEFAULT_RETENTION_HOURS
}

fn default_sweep_interval() -> u64 {
    3600
}

impl Default for OrderSettings {
    fn default() -> Self {
        OrderSettings {
            retention_hours: default_retention_hours(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// `[sales]`: double-submission detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleSettings {
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window_secs: i64,

    #[serde(default = "default_duplicate_tolerance")]
    pub duplicate_tolerance_cents: i64,
}

fn default_duplicate_window() -> i64 {
    DEFAULT_DUPLICATE_WINDOW_SECS
}

fn default_duplicate_tolerance() -> i64 {
    DEFAULT_DUPLICATE_TOLERANCE_CENTS
}

impl Default for SaleSettings {
    fn default() -> Self {
        SaleSettings {
            duplicate_window_secs: default_duplicate_window(),
            duplicate_tolerance_cents: default_duplicate_tolerance(),
        }
    }
}

/// `[database]`: where the store lives and how long writers wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            busy_timeout_ms: default_busy_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub orders: OrderSettings,

    #[serde(default)]
    pub sales: SaleSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ConfigError::Invalid("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_retries must be at least 1".into(),
            ));
        }
        if self.orders.retention_hours <= 0 {
            return Err(ConfigError::Invalid(
                "orders.retention_hours must be greater than 0".into(),
            ));
        }
        if self.orders.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "orders.sweep_interval_secs must be greater than 0".into(),
            ));
        }
        if self.sales.duplicate_window_secs < 0 || self.sales.duplicate_tolerance_cents < 0 {
            return Err(ConfigError::Invalid(
                "sales duplicate window and tolerance cannot be negative".into(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Applies `MERIDIAN_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("MERIDIAN_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        override_parsed(&lookup, "MERIDIAN_BUSY_TIMEOUT_MS", &mut self.database.busy_timeout_ms);
        override_parsed(&lookup, "MERIDIAN_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_parsed(&lookup, "MERIDIAN_MAX_RETRIES", &mut self.retry.max_retries);
        override_parsed(&lookup, "MERIDIAN_RETRY_BASE_DELAY_MS", &mut self.retry.base_delay_ms);
        override_parsed(&lookup, "MERIDIAN_RETENTION_HOURS", &mut self.orders.retention_hours);
        override_parsed(
            &lookup,
            "MERIDIAN_SWEEP_INTERVAL_SECS",
            &mut self.orders.sweep_interval_secs,
        );
        override_parsed(
            &lookup,
            "MERIDIAN_DUPLICATE_WINDOW_SECS",
            &mut self.sales.duplicate_window_secs,
        );
        override_parsed(
            &lookup,
            "MERIDIAN_DUPLICATE_TOLERANCE_CENTS",
            &mut self.sales.duplicate_tolerance_cents,
        );
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "meridian", "pos")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Database file: configured path, else the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "meridian", "pos")
                .map(|dirs| dirs.data_dir().join(DEFAULT_DB_FILE))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
        })
    }

    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database_path())
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.base_delay_ms),
        )
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.orders.retention_hours)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.orders.sweep_interval_secs)
    }

    /// Order manager with the configured retention window.
    pub fn order_manager(&self, db: &Database) -> OrderLifecycleManager {
        db.orders().with_retention(self.retention())
    }

    /// Sale coordinator with the configured duplicate detection.
    pub fn sale_coordinator(&self, db: &Database) -> SaleTransactionCoordinator {
        db.sales().with_idempotency(
            chrono::Duration::seconds(self.sales.duplicate_window_secs),
            Money::from_cents(self.sales.duplicate_tolerance_cents),
        )
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => {
                debug!(key, "Overriding config value from environment");
                *target = value;
            }
            Err(_) => warn!(key, value = %raw, "Ignoring unparsable environment override"),
        }
    }
}
