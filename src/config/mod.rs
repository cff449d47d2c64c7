//! Configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::{ByePolicy, PairingPolicy};

/// Prefix for environment overrides, e.g. `SWISS__SCHEDULER__DEFAULT_ROUNDS=5`.
pub const ENV_PREFIX: &str = "SWISS";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to load layered config: {0}")]
    LayerError(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum participants required to start
    #[serde(default = "default_min_participants")]
    pub min_participants: usize,

    /// Rounds used when `start` is not given a count
    #[serde(default = "default_rounds")]
    pub default_rounds: u32,

    /// Capacity of each tournament's command channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[serde(default)]
    pub pairing: PairingPolicy,

    /// Retries for match events that hit a transient storage error
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Retry policy for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 200,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((self.initial_delay_ms as f64 * factor) as u64)
    }
}

fn default_min_participants() -> usize {
    2
}

fn default_rounds() -> u32 {
    3
}

fn default_event_buffer() -> usize {
    64
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_participants: default_min_participants(),
            default_rounds: default_rounds(),
            event_buffer: default_event_buffer(),
            pairing: PairingPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load an optional TOML file, then apply `SWISS__*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let layered = ::config::Config::builder()
            .add_source(::config::File::from(path.to_path_buf()).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: AppConfig = layered.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheduler = &self.scheduler;

        if scheduler.min_participants < 2 {
            return Err(ConfigError::ValidationError(
                "min_participants must be at least 2".to_string(),
            ));
        }

        if scheduler.default_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "default_rounds must be greater than 0".to_string(),
            ));
        }

        if scheduler.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "event_buffer must be greater than 0".to_string(),
            ));
        }

        if scheduler.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry backoff_multiplier must be at least 1".to_string(),
            ));
        }

        if let ByePolicy::Award { score, .. } = scheduler.pairing.bye {
            if !(0.0..=1.0).contains(&score) {
                return Err(ConfigError::ValidationError(format!(
                    "bye score must be between 0 and 1, got {}",
                    score
                )));
            }
        }

        Ok(())
    }
}
