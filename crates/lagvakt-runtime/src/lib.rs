//! # lagvakt-runtime
//!
//! Async delivery of evidence-gated answers.
//!
//! This crate drives generation through the deterministic checks in
//! `lagvakt-core` and streams the result to a client:
//! - [`RetryController`]: bounded regeneration on malformed or policy-invalid output
//! - [`StreamRelay`]: keep-alive markers during silence, one safe error on faults
//! - [`AnswerOrchestrator`]: retrieval, ranking, prompting and delivery in one place
//!
//! ## Important
//!
//! Generation and retrieval are collaborators supplied by the host through
//! the [`Generator`] and [`Retriever`] traits. This crate never talks to a
//! model or an index on its own.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lagvakt_runtime::{AnswerOrchestrator, AnswerRequest, RuntimeConfig};
//! use lagvakt_core::Mode;
//!
//! let orchestrator = AnswerOrchestrator::builder()
//!     .generator(generator)
//!     .retriever(retriever)
//!     .config(RuntimeConfig::from_file("lagvakt.yaml")?)
//!     .build()?;
//!
//! let mut frames = orchestrator.stream(AnswerRequest::new(query, Mode::Evidence));
//! while let Some(frame) = frames.next().await {
//!     socket.write_all(frame.to_sse().as_bytes()).await?;
//! }
//! ```

pub mod config;
pub mod generation;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod retrieval;
pub mod retry;
pub mod stream;

pub use config::{ConfigError, MessageTemplates, RelayConfig, RetryConfig, RuntimeConfig};
pub use generation::{AttemptContext, GenerationError, Generator};
pub use orchestrator::{
    AnswerOrchestrator, AnswerOrchestratorBuilder, AnswerRequest, Delivery, OrchestratorError, Resolution,
};
pub use providers::{
    ChatMessage, Completion, CompletionConfig, LlmProvider, ProviderError, ProviderGenerator, Role, TokenUsage,
};
pub use retrieval::{RetrievalError, Retriever, StaticRetriever};
pub use retry::{AttemptRecord, AttemptState, ControllerState, RetryController, RetryOutcome};
pub use stream::{EventStream, RelayFrame, StreamEvent, StreamFault, StreamRelay};
