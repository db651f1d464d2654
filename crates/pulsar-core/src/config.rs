use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Days ahead the dispatch loop pre-fetches stored timers. Timers further
/// out are ignored until a later pass brings them inside the window.
pub const DEFAULT_LOOKAHEAD_DAYS: i64 = 40;

/// Top-level config (pulsar.toml + PULSAR_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PulsarConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file holding the timer table.
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// How many days ahead the dispatch loop looks when picking its next
    /// wakeup target.
    /// Override with env var: PULSAR_DISPATCHER_LOOKAHEAD_DAYS=7
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
        }
    }
}

fn default_lookahead_days() -> i64 {
    DEFAULT_LOOKAHEAD_DAYS
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pulsar/pulsar.db", home)
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pulsar/pulsar.toml", home)
}

impl PulsarConfig {
    /// Load config from a TOML file with PULSAR_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.pulsar/pulsar.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: PulsarConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PULSAR_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}
