use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid TOML: {message}")]
    InvalidToml { message: String },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Tunables for the synchronization core, loadable from a TOML file.
/// Every section has sane defaults so an empty file is a valid config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FloeConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub typing: TypingConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FloeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw).map_err(|e| ConfigError::InvalidToml {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts".into(),
                message: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.pagination.preload_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "pagination.preload_threshold".into(),
                message: "must be within 0.0..=1.0".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.pagination.preload_fraction) {
            return Err(ConfigError::InvalidValue {
                field: "pagination.preload_fraction".into(),
                message: "must be within 0.0..=1.0".into(),
            });
        }
        if self.retention.max_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retention.max_count".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.probe.endpoints.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "probe.endpoints".into(),
                message: "at least one probe endpoint is required".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    /// Scroll ratio toward the oldest loaded message that triggers a
    /// speculative preload.
    #[serde(default = "default_preload_threshold")]
    pub preload_threshold: f32,
    /// Fraction of the adaptive batch size fetched by a preload.
    #[serde(default = "default_preload_fraction")]
    pub preload_fraction: f32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            preload_threshold: 0.8,
            preload_fraction: 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    #[serde(default = "default_max_count")]
    pub max_count: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: 7,
            max_count: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypingConfig {
    /// How long a typing indicator lives without a refreshing event.
    #[serde(default = "default_typing_expiry_ms")]
    pub expiry_ms: u64,
    /// Minimum spacing between outgoing typing signals.
    #[serde(default = "default_typing_debounce_ms")]
    pub send_debounce_ms: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            expiry_ms: 3_000,
            send_debounce_ms: 1_500,
        }
    }
}

impl TypingConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }

    pub fn send_debounce(&self) -> Duration {
        Duration::from_millis(self.send_debounce_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Phase transitions arriving within this window of the previous one
    /// are ignored outright.
    #[serde(default = "default_transition_debounce_ms")]
    pub transition_debounce_ms: u64,
    /// Accepted transitions wait this long before applying, absorbing
    /// OS-level flapping.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_recheck_interval_ms")]
    pub recheck_interval_ms: u64,
    #[serde(default = "default_network_check_attempts")]
    pub network_check_attempts: u32,
    #[serde(default = "default_network_check_delay_ms")]
    pub network_check_delay_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            transition_debounce_ms: 300,
            settle_delay_ms: 500,
            recheck_interval_ms: 5_000,
            network_check_attempts: 3,
            network_check_delay_ms: 1_000,
        }
    }
}

impl LifecycleConfig {
    pub fn transition_debounce(&self) -> Duration {
        Duration::from_millis(self.transition_debounce_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_millis(self.recheck_interval_ms)
    }

    pub fn network_check_delay(&self) -> Duration {
        Duration::from_millis(self.network_check_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            endpoints: default_probe_endpoints(),
            timeout_ms: 3_000,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_preload_threshold() -> f32 {
    0.8
}

fn default_preload_fraction() -> f32 {
    0.7
}

fn default_max_age_days() -> u32 {
    7
}

fn default_max_count() -> usize {
    200
}

fn default_typing_expiry_ms() -> u64 {
    3_000
}

fn default_typing_debounce_ms() -> u64 {
    1_500
}

fn default_transition_debounce_ms() -> u64 {
    300
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_recheck_interval_ms() -> u64 {
    5_000
}

fn default_network_check_attempts() -> u32 {
    3
}

fn default_network_check_delay_ms() -> u64 {
    1_000
}

fn default_probe_endpoints() -> Vec<String> {
    vec![
        "https://www.gstatic.com/generate_204".to_string(),
        "https://connectivitycheck.cloudflareclient.com/generate_204".to_string(),
    ]
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}
