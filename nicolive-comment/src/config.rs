use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::events::EventKind;

/// Comment provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Broadcast id, e.g. `lv123456789`
    pub live_id: String,
    /// Raw `Cookie` header sent with every HTTP request
    pub cookies: Option<String>,
    pub retry: RetryConfig,
    pub stream: StreamConfig,
    pub backlog: BacklogConfig,
    pub control: ControlConfig,
    pub watch_page: WatchPageConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Fixed delay before each reconnection attempt
    pub retry_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub connect_timeout_ms: u64,
    pub inactivity_timeout_ms: u64,
    pub max_frame_size: usize,
    pub max_buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            inactivity_timeout_ms: 60_000,
            max_frame_size: 16 * 1024 * 1024,
            max_buffer_size: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacklogConfig {
    pub enabled: bool,
    /// Event kinds surfaced from history; others are dropped
    pub events: HashSet<EventKind>,
    pub max_depth: usize,
    /// Constant pause between hop fetches
    pub hop_delay_ms: u64,
    pub hop_timeout_ms: u64,
    pub max_response_size: usize,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            events: HashSet::from([EventKind::Comment]),
            max_depth: 50,
            hop_delay_ms: 100,
            hop_timeout_ms: 30_000,
            max_response_size: crate::error::MAX_RESPONSE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub default_keep_interval_secs: u64,
    pub min_keep_interval_secs: u64,
    pub max_keep_interval_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            default_keep_interval_secs: 30,
            min_keep_interval_secs: 10,
            max_keep_interval_secs: 300,
        }
    }
}

impl ControlConfig {
    /// Clamp a server-provided keep-seat interval into the configured bounds.
    #[must_use]
    pub fn keep_interval(&self, requested: Option<f64>) -> Duration {
        let secs = match requested {
            Some(v) if v.is_finite() && v != 0.0 => v,
            _ => self.default_keep_interval_secs as f64,
        };
        let clamped = secs.clamp(
            self.min_keep_interval_secs as f64,
            self.max_keep_interval_secs as f64,
        );
        Duration::from_secs_f64(clamped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchPageConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for WatchPageConfig {
    fn default() -> Self {
        Self {
            base_url: "https://live.nicovideo.jp/watch/".to_string(),
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Capacity of the consumer broadcast channel.
    ///
    /// Backlog replay surfaces a whole chain (up to `backlog.max_depth` hops)
    /// in one burst. A subscriber that falls more than this many events
    /// behind receives `RecvError::Lagged` and loses the oldest of them, so
    /// size it above the expected history volume when history matters.
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl ProviderConfig {
    /// Configuration for one broadcast with every other setting at its default.
    #[must_use]
    pub fn for_live(live_id: impl Into<String>) -> Self {
        Self {
            live_id: live_id.into(),
            ..Self::default()
        }
    }

    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // NICOLIVE__LIVE_ID, NICOLIVE__RETRY__MAX_RETRIES, ...
        builder = builder.add_source(
            Environment::with_prefix("NICOLIVE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry.retry_interval_ms)
    }
}

impl StreamConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }
}
