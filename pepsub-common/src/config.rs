//! Configuration loading and resolution
//!
//! Configuration file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. `PEPSUB_CONFIG` environment variable
//! 3. `<config_dir>/pepsub/config.toml` if it exists
//! 4. Built-in defaults (fallback)
//!
//! After the file is loaded, `PEPSUB_*` environment variables override
//! individual engine and logging values.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "PEPSUB_CONFIG";
/// Environment override for `engine.batch_size`
pub const BATCH_SIZE_ENV_VAR: &str = "PEPSUB_BATCH_SIZE";
/// Environment override for `engine.pace_interval_ms`
pub const PACE_INTERVAL_ENV_VAR: &str = "PEPSUB_PACE_INTERVAL_MS";
/// Environment override for `logging.level`
pub const LOG_LEVEL_ENV_VAR: &str = "PEPSUB_LOG_LEVEL";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Engine-wide submission settings
    #[serde(default)]
    pub engine: EngineSettings,

    /// Per-backend overrides keyed by backend id
    #[serde(default)]
    pub backends: HashMap<String, BackendOverrides>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Engine-wide submission settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Records per batch submitted to a backend
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Minimum interval between consecutive calls to the same backend
    #[serde(default = "default_pace_interval_ms")]
    pub pace_interval_ms: u64,

    /// Upper bound on a single backend call; unbounded when absent
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,

    /// Concurrent backend calls allowed for concurrency-safe backends
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Interval between job status checks for polling backends
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum time to wait for a polled job before declaring it failed
    #[serde(default = "default_poll_max_wait_ms")]
    pub poll_max_wait_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            pace_interval_ms: default_pace_interval_ms(),
            call_timeout_ms: None,
            max_concurrent_calls: default_max_concurrent_calls(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_wait_ms: default_poll_max_wait_ms(),
        }
    }
}

impl EngineSettings {
    pub fn pace_interval(&self) -> Duration {
        Duration::from_millis(self.pace_interval_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_max_wait(&self) -> Duration {
        Duration::from_millis(self.poll_max_wait_ms)
    }
}

/// Per-backend overrides of engine settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendOverrides {
    #[serde(default)]
    pub pace_interval_ms: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_pace_interval_ms() -> u64 {
    5000
}

fn default_max_concurrent_calls() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_poll_max_wait_ms() -> u64 {
    300_000
}

impl TomlConfig {
    /// Effective batch size for a backend (override, else engine default)
    pub fn batch_size_for(&self, backend_id: &str) -> usize {
        self.backends
            .get(backend_id)
            .and_then(|o| o.batch_size)
            .unwrap_or(self.engine.batch_size)
    }

    /// Effective pacing interval for a backend (override, else engine default)
    pub fn pace_interval_for(&self, backend_id: &str) -> Duration {
        self.backends
            .get(backend_id)
            .and_then(|o| o.pace_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.engine.pace_interval())
    }

    /// Apply `PEPSUB_*` environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(BATCH_SIZE_ENV_VAR) {
            self.engine.batch_size = value.trim().parse().map_err(|e| {
                Error::Config(format!("{} must be an integer: {}", BATCH_SIZE_ENV_VAR, e))
            })?;
            debug!(batch_size = self.engine.batch_size, "Batch size from environment");
        }

        if let Ok(value) = std::env::var(PACE_INTERVAL_ENV_VAR) {
            self.engine.pace_interval_ms = value.trim().parse().map_err(|e| {
                Error::Config(format!("{} must be an integer: {}", PACE_INTERVAL_ENV_VAR, e))
            })?;
            debug!(
                pace_interval_ms = self.engine.pace_interval_ms,
                "Pace interval from environment"
            );
        }

        if let Ok(value) = std::env::var(LOG_LEVEL_ENV_VAR) {
            if !value.trim().is_empty() {
                self.logging.level = value.trim().to_string();
            }
        }

        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.batch_size == 0 {
            return Err(Error::Config("engine.batch_size must be at least 1".to_string()));
        }
        if self.engine.max_concurrent_calls == 0 {
            return Err(Error::Config(
                "engine.max_concurrent_calls must be at least 1".to_string(),
            ));
        }
        if self.engine.poll_interval_ms == 0 {
            return Err(Error::Config("engine.poll_interval_ms must be positive".to_string()));
        }
        if self.engine.call_timeout_ms == Some(0) {
            return Err(Error::Config("engine.call_timeout_ms must be positive".to_string()));
        }
        for (backend_id, overrides) in &self.backends {
            if overrides.batch_size == Some(0) {
                return Err(Error::Config(format!(
                    "backends.{}.batch_size must be at least 1",
                    backend_id
                )));
            }
        }
        Ok(())
    }
}

/// Resolve the configuration file path by priority
///
/// Returns `None` when no source names an existing file; callers then fall back
/// to built-in defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("pepsub").join("config.toml"))
        .filter(|p| p.exists())
}

/// Read and parse a TOML configuration file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Serialize a configuration to a TOML file
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(path, content)?;
    Ok(())
}

/// Load the effective configuration
///
/// Resolves the file, applies environment overrides and validates the result.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let mut config = match resolve_config_path(cli_arg) {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            load_toml_config(&path)?
        }
        None => {
            debug!("No configuration file found, using built-in defaults");
            TomlConfig::default()
        }
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}
