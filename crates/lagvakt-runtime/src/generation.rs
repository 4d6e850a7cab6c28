//! The generation collaborator seam.
//!
//! Whatever produces raw answer text (an LLM provider, a cache, a test
//! script) implements [`Generator`]. The retry controller only ever sees
//! this trait.

use async_trait::async_trait;
use lagvakt_core::Mode;
use std::time::Duration;
use thiserror::Error;

/// Infrastructure failures of the generation backend.
///
/// These are never retried under the policy budget.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation backend unreachable: {0}")]
    Connection(String),
}

/// What the generator knows about the attempt it is serving.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptContext {
    /// 1-based attempt number
    pub attempt: u32,

    /// Budget for this request
    pub max_attempts: u32,

    /// Mode the answer will be validated under
    pub mode: Mode,

    /// Validation errors from the previous attempt (empty on the first)
    pub feedback: Vec<String>,
}

impl AttemptContext {
    /// Context for the first attempt.
    pub fn first(mode: Mode, max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            max_attempts,
            mode,
            feedback: Vec::new(),
        }
    }

    /// Context for the attempt after this one, carrying `feedback`.
    pub fn next(&self, feedback: Vec<String>) -> Self {
        Self {
            attempt: self.attempt + 1,
            max_attempts: self.max_attempts,
            mode: self.mode,
            feedback,
        }
    }

    /// Whether this is a retry.
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }

    /// Whether this is the last attempt the budget allows.
    pub fn is_final(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Produces raw answer text for a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate raw text for one attempt.
    async fn generate(&self, prompt: &str, context: &AttemptContext) -> Result<String, GenerationError>;

    /// Name for logs.
    fn name(&self) -> &str {
        "generator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_context_progression() {
        let first = AttemptContext::first(Mode::Evidence, 2);
        assert_eq!(first.attempt, 1);
        assert!(!first.is_retry());
        assert!(!first.is_final());

        let second = first.next(vec!["facts without sources".to_string()]);
        assert_eq!(second.attempt, 2);
        assert!(second.is_retry());
        assert!(second.is_final());
        assert_eq!(second.feedback.len(), 1);
        assert_eq!(second.mode, Mode::Evidence);
    }

    #[test]
    fn test_single_attempt_budget_is_final_immediately() {
        assert!(AttemptContext::first(Mode::Assist, 1).is_final());
    }
}
