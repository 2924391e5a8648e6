use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{FlowSubsError, Result};

pub const DEFAULT_TICK_SECS: u64 = 60 * 60;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Floor on subscription intervals; shorter ones would turn every tick into a storm.
pub const DEFAULT_MIN_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CONCURRENCY: usize = 1;

/// Top-level config (flowsubs.toml + FLOWSUBS_* env overrides).
///
/// Loaded once at startup and handed to the subsystems that need it; nothing
/// reads configuration from globals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSubsConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Payment scheduling knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between two scheduler passes (default: 1 hour).
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Consecutive failed settlements after which a subscription is cancelled.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Smallest interval a new subscription may use.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    /// Upper bound on any single call to the ledger.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// How many due subscriptions may settle at once within one tick.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            min_interval_secs: DEFAULT_MIN_INTERVAL_SECS,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl SchedulerConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tick_secs == 0 {
            return Err(FlowSubsError::Config("scheduler.tick_secs must be > 0".into()));
        }
        if self.max_retries == 0 {
            return Err(FlowSubsError::Config(
                "scheduler.max_retries must be > 0".into(),
            ));
        }
        if self.min_interval_secs == 0 {
            return Err(FlowSubsError::Config(
                "scheduler.min_interval_secs must be > 0".into(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(FlowSubsError::Config(
                "scheduler.call_timeout_secs must be > 0".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(FlowSubsError::Config(
                "scheduler.max_concurrency must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_secs)
    }

    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_min_interval_secs() -> u64 {
    DEFAULT_MIN_INTERVAL_SECS
}
fn default_call_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECS
}
fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.flowsubs/flowsubs.db", home)
}

impl FlowSubsConfig {
    /// Load config from a TOML file with FLOWSUBS_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.flowsubs/flowsubs.toml
    ///
    /// A missing file is not an error: every field has a default. Env keys
    /// use `__` between sections, e.g. `FLOWSUBS_SCHEDULER__TICK_SECS=300`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("FLOWSUBS_").split("__")),
        )
    }

    /// Parse config from an in-memory TOML document (no env overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: FlowSubsConfig = figment
            .extract()
            .map_err(|e| FlowSubsError::Config(e.to_string()))?;
        config.scheduler.validate()?;
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.flowsubs/flowsubs.toml", home)
}
