//! Configuration loading.
//!
//! Every section is optional; omitted keys take the runtime defaults. Values
//! can be overridden from the environment as `RESILIX__<SECTION>__<KEY>`,
//! e.g. `RESILIX__RETRY__MAX_ATTEMPTS=5`.

use std::path::Path;
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::{LogLevel, LoggingConfig};
use crate::network::ProbeConfig;
use crate::notification::{NotificationConfig, NotificationPosition};
use crate::retry::RetryOptions;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "RESILIX";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ::config::ConfigError),

    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetrySection,
    pub notification: NotificationSection,
    pub probe: ProbeSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: bool,
    pub honor_retry_after: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        let defaults = RetryOptions::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: millis(defaults.base_delay),
            max_delay_ms: millis(defaults.max_delay),
            backoff_factor: defaults.backoff_factor,
            jitter: defaults.jitter,
            honor_retry_after: defaults.honor_retry_after,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSection {
    pub max_visible: usize,
    pub position: NotificationPosition,
    pub default_duration_ms: u64,
    pub error_duration_ms: u64,
    pub exit_delay_ms: u64,
    pub max_queued: usize,
    /// Also raise notifications for validation errors.
    pub notify_validation: bool,
}

impl Default for NotificationSection {
    fn default() -> Self {
        let defaults = NotificationConfig::default();
        Self {
            max_visible: defaults.max_visible,
            position: defaults.position,
            default_duration_ms: millis(defaults.default_duration),
            error_duration_ms: millis(defaults.error_duration),
            exit_delay_ms: millis(defaults.exit_delay),
            max_queued: defaults.max_queued,
            notify_validation: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    /// Health endpoint for the active probe. Without one, the monitor only
    /// follows platform events.
    pub endpoint: Option<String>,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ProbeSection {
    fn default() -> Self {
        let defaults = ProbeConfig::default();
        Self {
            endpoint: None,
            interval_ms: millis(defaults.interval),
            timeout_ms: millis(defaults.timeout),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: LogLevel,
    pub timestamps: Option<bool>,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ResilienceConfig {
    /// Loads configuration from a TOML file with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be parsed, or
    /// holds out-of-range values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| ConfigError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::with_name(path_str))
            .add_source(env_source())
            .build()?;
        Self::finish(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder().add_source(env_source()).build()?;
        Self::finish(config)
    }

    /// Parses TOML text. Environment overrides are not applied.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        Self::finish(config)
    }

    fn finish(config: Config) -> Result<Self, ConfigError> {
        let parsed: ResilienceConfig = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let factor = self.retry.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "retry.backoff_factor",
                reason: format!("must be a finite number >= 1, got {}", factor),
            });
        }
        if self.probe.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "probe.timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.probe.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "probe.interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn retry_options(&self) -> RetryOptions {
        let retry = &self.retry;
        RetryOptions::new()
            .with_max_attempts(retry.max_attempts)
            .with_base_delay(Duration::from_millis(retry.base_delay_ms))
            .with_max_delay(Duration::from_millis(retry.max_delay_ms))
            .with_backoff_factor(retry.backoff_factor)
            .with_jitter(retry.jitter)
            .with_honor_retry_after(retry.honor_retry_after)
    }

    pub fn notification_config(&self) -> NotificationConfig {
        let section = &self.notification;
        NotificationConfig::new()
            .with_max_visible(section.max_visible)
            .with_position(section.position)
            .with_default_duration(Duration::from_millis(section.default_duration_ms))
            .with_error_duration(Duration::from_millis(section.error_duration_ms))
            .with_exit_delay(Duration::from_millis(section.exit_delay_ms))
            .with_max_queued(section.max_queued)
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig::new()
            .with_interval(Duration::from_millis(self.probe.interval_ms))
            .with_timeout(Duration::from_millis(self.probe.timeout_ms))
    }

    pub fn logging_config(&self) -> LoggingConfig {
        let config = LoggingConfig::new().with_level(self.logging.level);
        match self.logging.timestamps {
            Some(enabled) => config.with_timestamps(enabled),
            None => config,
        }
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
