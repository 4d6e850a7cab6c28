//! Adapter from [`LlmProvider`] to [`Generator`].

use async_trait::async_trait;
use std::sync::Arc;

use super::{ChatMessage, CompletionConfig, LlmProvider, ProviderError};
use crate::generation::{AttemptContext, GenerationError, Generator};
use crate::prompts;

/// Generates answers through an LLM provider.
///
/// System prompt is the answer contract; the user message is the request
/// prompt plus any retry feedback. The configured timeout is enforced here
/// regardless of what the provider does internally.
pub struct ProviderGenerator {
    provider: Arc<dyn LlmProvider>,
    config: CompletionConfig,
    system_prompt: String,
}

impl ProviderGenerator {
    /// Create a generator with the default answer contract prompt.
    pub fn new(provider: Arc<dyn LlmProvider>, config: CompletionConfig) -> Self {
        Self {
            provider,
            config,
            system_prompt: prompts::ANSWER_CONTRACT_PROMPT.trim().to_string(),
        }
    }

    /// Replace the system prompt.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    fn messages(&self, prompt: &str, context: &AttemptContext) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(prompts::with_feedback(prompt, context)),
        ]
    }
}

#[async_trait]
impl Generator for ProviderGenerator {
    async fn generate(&self, prompt: &str, context: &AttemptContext) -> Result<String, GenerationError> {
        let messages = self.messages(prompt, context);
        let timeout = self.config.timeout;

        let response = tokio::time::timeout(timeout, self.provider.complete(&messages, &self.config))
            .await
            .map_err(|_| GenerationError::Timeout(timeout))?
            .map_err(|e| classify(e, timeout))?;

        tracing::debug!(
            provider = self.provider.name(),
            model = %response.model,
            attempt = context.attempt,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion received"
        );

        Ok(response.text)
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}

/// Every provider failure is an infrastructure failure from the retry
/// controller's point of view.
fn classify(error: ProviderError, timeout: std::time::Duration) -> GenerationError {
    match error {
        ProviderError::Timeout(elapsed) => GenerationError::Timeout(elapsed),
        ProviderError::Throttled { .. } => GenerationError::Connection(error.to_string()),
        ProviderError::Transport(_)
        | ProviderError::Status { .. }
        | ProviderError::Unauthorized
        | ProviderError::Misconfigured(_) => {
            tracing::warn!(error = %error, timeout = ?timeout, "Provider call failed");
            GenerationError::Connection(error.to_string())
        }
    }
}
