//! LLM provider abstraction.
//!
//! A provider performs one chat completion. [`ProviderGenerator`] turns any
//! provider into a [`Generator`](crate::generation::Generator) by supplying
//! the answer contract as system prompt and mapping transport failures to
//! [`GenerationError`](crate::generation::GenerationError).
//!
//! Concrete HTTP clients live with the hosting service; this crate only
//! fixes the seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod generator;

pub use generator::ProviderGenerator;

/// Failures a provider can report.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Throttled by provider (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider rejected the credentials")]
    Unauthorized,

    #[error("Provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Provider setup incomplete: {0}")]
    Misconfigured(String),
}

/// Model settings for answer generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub model: String,

    /// Upper bound on answer length, in tokens
    pub max_tokens: u32,

    /// Sampling temperature; keep at 0.0 for reproducible answers
    pub temperature: f32,

    /// Hard limit on one completion call
    #[serde(with = "crate::config::duration_str")]
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 2048,
            temperature: 0.0,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// A finished completion.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Raw model text, unvalidated
    pub text: String,
    pub usage: TokenUsage,
    /// Model that actually served the call
    pub model: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        settings: &CompletionConfig,
    ) -> Result<Completion, ProviderError>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}
