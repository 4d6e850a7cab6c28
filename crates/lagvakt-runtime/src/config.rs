//! Runtime configuration.
//!
//! Loaded once at startup (YAML or JSON) and handed to the orchestrator.
//! Durations are written in humantime form (`"15s"`, `"2m"`) or as whole
//! seconds.
//!
//! ```yaml
//! retry:
//!   max_attempts: 2
//! relay:
//!   idle_timeout: 15s
//!   channel_capacity: 64
//! citation_policy: strict
//! messages:
//!   refusal: "No grounded answer after {attempts} attempts."
//! completion:
//!   model: claude-sonnet-4-5
//!   timeout: 60s
//! ```

use lagvakt_core::CitationPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::providers::CompletionConfig;

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Generation retry budget
    pub retry: RetryConfig,

    /// Streaming relay settings
    pub relay: RelayConfig,

    /// Client-facing message templates
    pub messages: MessageTemplates,

    /// Whether EVIDENCE citations are checked against retrieved chunks
    pub citation_policy: CitationPolicy,

    /// Settings for provider-backed generation
    pub completion: CompletionConfig,
}

impl RuntimeConfig {
    /// Parse from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` is read as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.relay.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "relay.idle_timeout must be greater than zero".to_string(),
            ));
        }
        if self.relay.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "relay.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.completion.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "completion.timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry budget for policy-driven regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum generation calls per request
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Streaming relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Silence after which a liveness marker is sent
    #[serde(with = "duration_str")]
    pub idle_timeout: Duration,

    /// Capacity of the producer → relay channel
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(15),
            channel_capacity: 64,
        }
    }
}

/// Client-facing messages. None of these ever carries model output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
    /// Sent when the retry budget is exhausted. `{attempts}` is substituted.
    pub refusal: String,

    /// Sent when the generation backend is unavailable.
    pub unavailable: String,

    /// Sent when evidence retrieval fails.
    pub retrieval_failure: String,

    /// Sent when the event producer faults mid-stream.
    pub stream_failure: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            refusal: "I could not produce an answer that meets the sourcing requirements \
                      ({attempts} attempts). Please rephrase the question or narrow its scope."
                .to_string(),
            unavailable: "The answering service is temporarily unavailable. Please try again shortly."
                .to_string(),
            retrieval_failure: "The source archive could not be searched right now. Please try again shortly."
                .to_string(),
            stream_failure: "Something went wrong while delivering the answer.".to_string(),
        }
    }
}

impl MessageTemplates {
    /// Render the refusal template.
    pub fn render_refusal(&self, attempts: u32) -> String {
        self.refusal.replace("{attempts}", &attempts.to_string())
    }
}

/// Serde adapter for durations: humantime strings or whole seconds.
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom),
        }
    }
}
