//! Configuration management for galaxy-throttle.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, ThrottleError};

/// Prefix for environment overrides, e.g. `GALAXY_THROTTLE__LIMITS__CHAT__CAPACITY=20`.
pub const ENV_PREFIX: &str = "GALAXY_THROTTLE";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Where limiter logs and registration records are kept
    #[serde(default)]
    pub store: StoreConfig,

    /// Per-action limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backing store selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,

    /// Path of the JSON file when `kind` is `file`
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    File,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("galaxy-throttle.json")
}

/// Limits for the two throttled actions.
///
/// Each field of a limit may be given on its own; anything left out keeps
/// the value from [`LimitConfig::email`] or [`LimitConfig::chat`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "LimitsOverrides")]
pub struct LimitsConfig {
    pub email: LimitConfig,
    pub chat: LimitConfig,
}

/// Limits as written in a file or the environment, before defaults apply.
#[derive(Debug, Default, Deserialize)]
struct LimitsOverrides {
    #[serde(default)]
    email: LimitOverride,
    #[serde(default)]
    chat: LimitOverride,
}

#[derive(Debug, Default, Deserialize)]
struct LimitOverride {
    capacity: Option<u32>,
    window_ms: Option<u64>,
    key: Option<String>,
}

impl LimitOverride {
    fn apply(self, base: LimitConfig) -> LimitConfig {
        LimitConfig {
            capacity: self.capacity.unwrap_or(base.capacity),
            window_ms: self.window_ms.unwrap_or(base.window_ms),
            key: self.key.unwrap_or(base.key),
        }
    }
}

impl From<LimitsOverrides> for LimitsConfig {
    fn from(overrides: LimitsOverrides) -> Self {
        Self {
            email: overrides.email.apply(LimitConfig::email()),
            chat: overrides.chat.apply(LimitConfig::chat()),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            email: LimitConfig::email(),
            chat: LimitConfig::chat(),
        }
    }
}

/// Configuration for one sliding-window limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Maximum permitted actions inside one window
    pub capacity: u32,
    /// Width of the sliding window in milliseconds
    pub window_ms: u64,
    /// Store key for this limiter's log
    pub key: String,
}

impl LimitConfig {
    pub fn new(capacity: u32, window_ms: u64, key: impl Into<String>) -> Self {
        Self {
            capacity,
            window_ms,
            key: key.into(),
        }
    }

    /// Registration emails: 3 per 5 minutes.
    pub fn email() -> Self {
        Self::new(3, 300_000, "cg_email_rate_limit")
    }

    /// AI chat messages: 10 per minute.
    pub fn chat() -> Self {
        Self::new(10, 60_000, "cg_ai_rate_limit")
    }

    /// Check that the limit can back a limiter.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ThrottleError::Config(format!(
                "limit '{}': capacity must be greater than zero",
                self.key
            )));
        }
        if self.window_ms == 0 {
            return Err(ThrottleError::Config(format!(
                "limit '{}': window_ms must be greater than zero",
                self.key
            )));
        }
        if self.key.trim().is_empty() {
            return Err(ThrottleError::Config("limit key must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ThrottleConfig {
    /// Parse configuration from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ThrottleConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load defaults, then the optional file, then `GALAXY_THROTTLE__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: ThrottleConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ThrottleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that cannot work, and limiters that would share a log.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for limit in [&self.limits.email, &self.limits.chat] {
            limit.validate()?;
            if !seen.insert(limit.key.as_str()) {
                return Err(ThrottleError::Config(format!(
                    "limit key '{}' is used by more than one limiter",
                    limit.key
                )));
            }
        }
        Ok(())
    }
}
