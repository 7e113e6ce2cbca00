use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Durations are written as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Transport-level settings for one streaming request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Time allowed to establish the connection.
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Upper bound on the whole response, body included.
    #[serde(rename = "total_timeout_ms", with = "duration_ms")]
    pub total_timeout: Duration,

    /// Capacity of the channel between the transport and the consumer.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(120),
            total_timeout: Duration::from_secs(600),
            channel_capacity: 32,
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = timeout;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// Settings for the chat layer sitting on top of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Backend root, without a trailing slash.
    pub base_url: String,

    /// Presentation throttle applied after each content delta.
    #[serde(rename = "pacing_delay_ms", with = "duration_ms")]
    pub pacing_delay: Duration,

    /// Pause between the user message and the assistant placeholder.
    #[serde(rename = "thinking_delay_ms", with = "duration_ms")]
    pub thinking_delay: Duration,

    /// Shown instead of the raw `Error: ...` text when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_apology: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            pacing_delay: Duration::from_millis(4),
            thinking_delay: Duration::from_millis(500),
            error_apology: None,
        }
    }
}

impl ChatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_pacing_delay(mut self, delay: Duration) -> Self {
        self.pacing_delay = delay;
        self
    }

    pub fn with_thinking_delay(mut self, delay: Duration) -> Self {
        self.thinking_delay = delay;
        self
    }

    pub fn with_error_apology(mut self, text: impl Into<String>) -> Self {
        self.error_apology = Some(text.into());
        self
    }

    /// No artificial delays at all.
    pub fn immediate(self) -> Self {
        self.with_pacing_delay(Duration::ZERO)
            .with_thinking_delay(Duration::ZERO)
    }
}

/// Full client configuration as read from a YAML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub stream: StreamConfig,
    pub chat: ChatConfig,
}

impl ClientConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config: ClientConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.chat.base_url = config.chat.base_url.trim_end_matches('/').to_string();
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.channel_capacity == 0 {
            return Err(ConfigError::Invalid("stream.channel_capacity must be > 0".into()).into());
        }
        if self.stream.connect_timeout.is_zero() || self.stream.total_timeout.is_zero() {
            return Err(ConfigError::Invalid("stream timeouts must be > 0".into()).into());
        }
        if self.chat.base_url.is_empty() {
            return Err(ConfigError::Invalid("chat.base_url must not be empty".into()).into());
        }
        Ok(())
    }
}
