//! Configuration management for tunclip
//!
//! Everything has a default; the optional TOML file only tunes timeouts,
//! the reconnect backoff and whether PRIMARY is synchronized.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "TUNCLIP_CONFIG";

/// Largest accepted `incr_chunk_size` (1MB)
const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Synchronization settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Client reconnect backoff
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Log level used when --verbose is not given
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Synchronization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Also sync the PRIMARY selection
    #[serde(default = "default_sync_primary")]
    pub sync_primary: bool,

    /// Wait for a selection owner to answer a conversion request
    #[serde(default = "default_convert_timeout_ms")]
    pub convert_timeout_ms: u64,

    /// Wait for each chunk of an incoming INCR transfer
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,

    /// Age at which an outgoing INCR transfer is abandoned
    #[serde(default = "default_incr_send_timeout_secs")]
    pub incr_send_timeout_secs: u64,

    /// Chunk size of outgoing INCR transfers
    #[serde(default = "default_incr_chunk_size")]
    pub incr_chunk_size: usize,

    /// How often stale INCR transfers are swept
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How long to try delivering the goodbye on shutdown
    #[serde(default = "default_goodbye_timeout_ms")]
    pub goodbye_timeout_ms: u64,
}

/// Client reconnect backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Fraction of the delay randomly added or removed (0.0 - 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_sync_primary() -> bool {
    true
}

fn default_convert_timeout_ms() -> u64 {
    2000
}

fn default_chunk_timeout_ms() -> u64 {
    5000
}

fn default_incr_send_timeout_secs() -> u64 {
    30
}

fn default_incr_chunk_size() -> usize {
    crate::clipboard::incr::DEFAULT_CHUNK_SIZE
}

fn default_sweep_interval_secs() -> u64 {
    5
}

fn default_goodbye_timeout_ms() -> u64 {
    1000
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            reconnect: ReconnectConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_primary: default_sync_primary(),
            convert_timeout_ms: default_convert_timeout_ms(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            incr_send_timeout_secs: default_incr_send_timeout_secs(),
            incr_chunk_size: default_incr_chunk_size(),
            sweep_interval_secs: default_sweep_interval_secs(),
            goodbye_timeout_ms: default_goodbye_timeout_ms(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl SyncConfig {
    pub fn convert_timeout(&self) -> Duration {
        Duration::from_millis(self.convert_timeout_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn incr_send_timeout(&self) -> Duration {
        Duration::from_secs(self.incr_send_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn goodbye_timeout(&self) -> Duration {
        Duration::from_millis(self.goodbye_timeout_ms)
    }
}

impl Config {
    /// Load configuration
    ///
    /// Checks in order:
    /// 1. `explicit` (from --config), which must exist
    /// 2. Path from TUNCLIP_CONFIG environment variable
    /// 3. ~/.config/tunclip/config.toml
    ///
    /// Falls back to defaults when no file is found.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_path(&expand_path(path));
        }
        match Self::find_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate_config()?;
        Ok(config)
    }

    /// Find configuration file path
    fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = expand_path(Path::new(&path));
            if path.exists() {
                return Some(path);
            }
        }

        dirs::config_dir()
            .map(|p| p.join("tunclip").join("config.toml"))
            .filter(|p| p.exists())
    }

    /// Validate configuration values
    fn validate_config(&self) -> Result<(), ConfigError> {
        let sync = &self.sync;
        for (name, value) in [
            ("convert_timeout_ms", sync.convert_timeout_ms),
            ("chunk_timeout_ms", sync.chunk_timeout_ms),
            ("incr_send_timeout_secs", sync.incr_send_timeout_secs),
            ("sweep_interval_secs", sync.sweep_interval_secs),
            ("goodbye_timeout_ms", sync.goodbye_timeout_ms),
            ("initial_delay_ms", self.reconnect.initial_delay_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if sync.incr_chunk_size == 0 || sync.incr_chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::Validation(format!(
                "incr_chunk_size must be between 1 and {} bytes",
                MAX_CHUNK_SIZE
            )));
        }

        let reconnect = &self.reconnect;
        if reconnect.backoff_multiplier.is_nan() || reconnect.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&reconnect.jitter_factor) {
            return Err(ConfigError::Validation(
                "jitter_factor must be between 0.0 and 1.0".to_string(),
            ));
        }
        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            return Err(ConfigError::Validation(
                "max_delay_ms must not be less than initial_delay_ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate example configuration file
    pub fn generate_example() -> String {
        let config = Config::default();
        format!(
            r#"# tunclip configuration file
# Location: ~/.config/tunclip/config.toml (or $TUNCLIP_CONFIG)

# Logging level when --verbose is not given (trace, debug, info, warn, error)
log_level = "{}"

[sync]
# Also synchronize the PRIMARY (middle-click) selection
sync_primary = {}
# Wait for another application to answer a clipboard read
convert_timeout_ms = {}
# Wait for each chunk of a large incoming clipboard
chunk_timeout_ms = {}
# Give up serving a large clipboard to a stalled application after
incr_send_timeout_secs = {}
# Chunk size when serving large clipboards
incr_chunk_size = {}
# How often stalled transfers are cleaned up
sweep_interval_secs = {}
# How long to try telling the peer goodbye on shutdown
goodbye_timeout_ms = {}

# Client reconnect backoff
[reconnect]
initial_delay_ms = {}
max_delay_ms = {}
backoff_multiplier = {:.1}
jitter_factor = {}
"#,
            config.log_level,
            config.sync.sync_primary,
            config.sync.convert_timeout_ms,
            config.sync.chunk_timeout_ms,
            config.sync.incr_send_timeout_secs,
            config.sync.incr_chunk_size,
            config.sync.sweep_interval_secs,
            config.sync.goodbye_timeout_ms,
            config.reconnect.initial_delay_ms,
            config.reconnect.max_delay_ms,
            config.reconnect.backoff_multiplier,
            config.reconnect.jitter_factor,
        )
    }
}

/// Expand tilde and environment variables in path
pub fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    match shellexpand::full(path_str.as_ref()) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => PathBuf::from(shellexpand::tilde(path_str.as_ref()).into_owned()),
    }
}
