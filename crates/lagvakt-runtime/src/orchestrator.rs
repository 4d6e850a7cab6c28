//! Request orchestration: retrieve, rank, generate, validate, deliver.
//!
//! # Execution Flow
//! 1. Retrieve candidate evidence (external)
//! 2. Rank it by source tier (deterministic)
//! 3. Build the prompt and run the retry controller
//! 4. Map the terminal outcome to client events
//!
//! Only the classified outcome crosses into the streaming layer. Raw model
//! output, validation details and fault causes stay on this side.

use futures::stream::Stream;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use lagvakt_core::{evidence, AnswerValidator, Citation, EvidenceRecord, Mode, SanitizedAnswer, TierRegistry};

use crate::config::{ConfigError, RuntimeConfig};
use crate::generation::Generator;
use crate::prompts;
use crate::retrieval::Retriever;
use crate::retry::{AttemptRecord, RetryController, RetryOutcome};
use crate::stream::{RelayFrame, StreamEvent, StreamFault, StreamRelay};

/// Errors from assembling an orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Missing component: {0}")]
    MissingComponent(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A client question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub query: String,
    pub mode: Mode,
}

impl AnswerRequest {
    pub fn new(query: impl Into<String>, mode: Mode) -> Self {
        Self {
            query: query.into(),
            mode,
        }
    }
}

/// What the client will be shown.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A validated answer with citations in tier order.
    Answered { answer: SanitizedAnswer, attempts: u32 },

    /// The retry budget ran out; `message` is the rendered refusal template.
    Refused { message: String, attempts: u32 },

    /// Retrieval or generation infrastructure failed.
    Failed { message: String },
}

/// Result of [`AnswerOrchestrator::resolve`].
#[derive(Debug, Clone)]
pub struct Resolution {
    pub delivery: Delivery,

    /// Completed attempts, for audit logging
    pub trail: Vec<AttemptRecord>,
}

impl Resolution {
    /// The client event sequence for this resolution.
    ///
    /// Answers and refusals end with `Done`; failures are a single `Error`.
    pub fn into_events(self) -> Vec<StreamEvent> {
        match self.delivery {
            Delivery::Answered { answer, .. } => {
                let mut events: Vec<StreamEvent> = split_tokens(&answer.answer_text)
                    .into_iter()
                    .map(|text| StreamEvent::Token { text })
                    .collect();
                events.push(StreamEvent::Sources {
                    sources: answer.sources,
                });
                events.push(StreamEvent::Done);
                events
            }
            Delivery::Refused { message, .. } => vec![
                StreamEvent::Token { text: message },
                StreamEvent::Sources { sources: Vec::new() },
                StreamEvent::Done,
            ],
            Delivery::Failed { message } => vec![StreamEvent::Error { message }],
        }
    }
}

/// Answers questions with evidence-gated, sanitized output.
///
/// Cheap to clone; every collaborator is shared. Each request owns its own
/// attempt state and relay.
#[derive(Clone)]
pub struct AnswerOrchestrator {
    generator: Arc<dyn Generator>,
    retriever: Arc<dyn Retriever>,
    registry: Arc<TierRegistry>,
    controller: RetryController,
    relay: StreamRelay,
    config: RuntimeConfig,
}

impl AnswerOrchestrator {
    pub fn builder() -> AnswerOrchestratorBuilder {
        AnswerOrchestratorBuilder::default()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &TierRegistry {
        &self.registry
    }

    /// Resolve a request without streaming.
    pub async fn resolve(&self, request: &AnswerRequest) -> Resolution {
        let messages = &self.config.messages;

        let evidence = match self.retriever.retrieve(&request.query).await {
            Ok(records) => self.registry.rank(records),
            Err(e) => {
                tracing::warn!(retriever = self.retriever.name(), error = %e, "Retrieval failed");
                return Resolution {
                    delivery: Delivery::Failed {
                        message: messages.retrieval_failure.clone(),
                    },
                    trail: Vec::new(),
                };
            }
        };

        tracing::debug!(
            mode = %request.mode,
            evidence = evidence.len(),
            "Evidence ranked, starting generation"
        );

        let prompt = prompts::build_prompt(&request.query, request.mode, &evidence, &self.registry);
        let (outcome, state) = self
            .controller
            .run_traced(self.generator.as_ref(), &prompt, request.mode, &evidence)
            .await;
        let trail = state.history().to_vec();

        let delivery = match outcome {
            RetryOutcome::Accepted { mut answer, attempts } => {
                answer.sources = self.rank_citations(answer.sources, &evidence);
                Delivery::Answered { answer, attempts }
            }
            RetryOutcome::ExhaustedFailure { attempts, .. } => Delivery::Refused {
                message: messages.render_refusal(attempts),
                attempts,
            },
            RetryOutcome::FatalError { cause, attempts } => {
                tracing::error!(error = %cause, attempts, "Generation backend failed");
                Delivery::Failed {
                    message: messages.unavailable.clone(),
                }
            }
        };

        Resolution { delivery, trail }
    }

    /// Stream a request as relay frames.
    ///
    /// Spawns the producer on the current tokio runtime. Dropping the
    /// returned stream abandons any generation still in flight.
    pub fn stream(&self, request: AnswerRequest) -> impl Stream<Item = RelayFrame> + Send + 'static {
        let (tx, rx) = mpsc::channel(self.config.relay.channel_capacity.max(1));
        let this = self.clone();

        tokio::spawn(async move {
            let work = AssertUnwindSafe(this.resolve(&request)).catch_unwind();

            let result = tokio::select! {
                _ = tx.closed() => {
                    tracing::debug!("Client disconnected, abandoning request");
                    return;
                }
                result = work => result,
            };

            match result {
                Ok(resolution) => {
                    for event in resolution.into_events() {
                        if tx.send(Ok(event)).await.is_err() {
                            tracing::debug!("Client disconnected mid-stream");
                            return;
                        }
                    }
                }
                Err(panic) => {
                    let _ = tx.send(Err(StreamFault::Panicked(panic_message(panic.as_ref())))).await;
                }
            }
        });

        self.relay.relay(ReceiverStream::new(rx))
    }

    // Citations take the tier of the evidence they resolve to; unresolved
    // ones rank with unknown sources.
    fn rank_citations(&self, citations: Vec<Citation>, evidence: &[EvidenceRecord]) -> Vec<Citation> {
        let keyed: Vec<(String, Citation)> = citations
            .into_iter()
            .map(|citation| {
                let source = evidence::resolve(&citation, evidence)
                    .map(|record| record.source_id.clone())
                    .unwrap_or_default();
                (source, citation)
            })
            .collect();

        self.registry
            .rank_by(keyed, |item| item.0.as_str())
            .into_iter()
            .map(|(_, citation)| citation)
            .collect()
    }
}

impl std::fmt::Debug for AnswerOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerOrchestrator")
            .field("generator", &self.generator.name())
            .field("retriever", &self.retriever.name())
            .field("registry_rules", &self.registry.len())
            .field("max_attempts", &self.controller.max_attempts())
            .finish()
    }
}

/// Builder for [`AnswerOrchestrator`].
#[derive(Default)]
pub struct AnswerOrchestratorBuilder {
    generator: Option<Arc<dyn Generator>>,
    retriever: Option<Arc<dyn Retriever>>,
    registry: Option<Arc<TierRegistry>>,
    validator: Option<Arc<AnswerValidator>>,
    config: RuntimeConfig,
}

impl AnswerOrchestratorBuilder {
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Defaults to [`TierRegistry::legal_default`].
    pub fn registry(mut self, registry: Arc<TierRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Defaults to a validator using the configured citation policy.
    pub fn validator(mut self, validator: Arc<AnswerValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<AnswerOrchestrator, OrchestratorError> {
        self.config.validate()?;

        let generator = self.generator.ok_or(OrchestratorError::MissingComponent("generator"))?;
        let retriever = self.retriever.ok_or(OrchestratorError::MissingComponent("retriever"))?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(TierRegistry::legal_default()));
        let validator = self.validator.unwrap_or_else(|| {
            Arc::new(AnswerValidator::new().with_citation_policy(self.config.citation_policy))
        });

        let controller = RetryController::from_config(validator, &self.config.retry);
        let relay = StreamRelay::from_config(&self.config.relay, &self.config.messages);

        Ok(AnswerOrchestrator {
            generator,
            retriever,
            registry,
            controller,
            relay,
            config: self.config,
        })
    }
}

/// Split answer text into tokens at whitespace boundaries.
///
/// Each token is a word followed by the whitespace after it, so the tokens
/// concatenate back to the original text.
pub fn split_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut after_space = false;

    for ch in text.chars() {
        if after_space && !ch.is_whitespace() {
            tokens.push(std::mem::take(&mut current));
        }
        after_space = ch.is_whitespace();
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{AttemptContext, GenerationError};
    use crate::retrieval::{RetrievalError, StaticRetriever};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const CITES_SOU_THEN_SFS: &str = r#"{
        "mode": "EVIDENCE", "missing_grounds": false,
        "answer_text": "All offentlig makt utgår från folket.",
        "sources": [
            {"doc_id": "SOU 2008:125", "chunk_id": "c4", "quote": "reformerad", "location": ""},
            {"doc_id": "SFS 1974:152", "chunk_id": "c1", "quote": "folket", "location": "1 kap. 1 §"}
        ],
        "unsourced_facts": [], "internal_note": "SCRATCH-7731"
    }"#;

    const UNSOURCED: &str = r#"{
        "mode": "EVIDENCE", "missing_grounds": false,
        "answer_text": "Ja.", "sources": [],
        "unsourced_facts": ["Något."], "internal_note": "SCRATCH-7731"
    }"#;

    struct FixedGenerator {
        reply: Result<String, GenerationError>,
        prompts: Mutex<Vec<String>>,
    }

    impl FixedGenerator {
        fn new(reply: Result<&str, GenerationError>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for FixedGenerator {
        async fn generate(&self, prompt: &str, _context: &AttemptContext) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    struct PanickingGenerator;

    #[async_trait]
    impl Generator for PanickingGenerator {
        async fn generate(&self, _prompt: &str, _context: &AttemptContext) -> Result<String, GenerationError> {
            panic!("generator exploded at internal/path.rs:12");
        }
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    struct HangingGenerator {
        abandoned: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Generator for HangingGenerator {
        async fn generate(&self, _prompt: &str, _context: &AttemptContext) -> Result<String, GenerationError> {
            let _guard = SetOnDrop(self.abandoned.clone());
            std::future::pending().await
        }
    }

    struct FailingRetriever {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Retriever for FailingRetriever {
        async fn retrieve(&self, _query: &str) -> Result<Vec<EvidenceRecord>, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RetrievalError::Unavailable("index offline".to_string()))
        }
    }

    fn evidence() -> Vec<EvidenceRecord> {
        vec![
            EvidenceRecord::new("sou", "SOU 2008:125", "c4", "En reformerad grundlag."),
            EvidenceRecord::new("sfs", "SFS 1974:152", "c1", "All offentlig makt i Sverige utgår från folket."),
        ]
    }

    fn orchestrator(generator: Arc<dyn Generator>) -> AnswerOrchestrator {
        AnswerOrchestrator::builder()
            .generator(generator)
            .retriever(Arc::new(StaticRetriever::new(evidence())))
            .build()
            .unwrap()
    }

    async fn events(orchestrator: &AnswerOrchestrator, mode: Mode) -> Vec<StreamEvent> {
        orchestrator
            .stream(AnswerRequest::new("Vem utövar offentlig makt?", mode))
            .filter_map(|frame| async move { frame.event().cloned() })
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_resolve_ranks_citations_by_evidence_tier() {
        let resolution = orchestrator(FixedGenerator::new(Ok(CITES_SOU_THEN_SFS)))
            .resolve(&AnswerRequest::new("q", Mode::Evidence))
            .await;

        match resolution.delivery {
            Delivery::Answered { answer, attempts } => {
                assert_eq!(attempts, 1);
                assert_eq!(answer.sources[0].doc_id, "SFS 1974:152");
                assert_eq!(answer.sources[1].doc_id, "SOU 2008:125");
            }
            other => panic!("Expected Answered, got {:?}", other),
        }
        assert_eq!(resolution.trail.len(), 1);
    }

    #[tokio::test]
    async fn test_prompt_lists_evidence_in_tier_order() {
        let generator = FixedGenerator::new(Ok(CITES_SOU_THEN_SFS));
        orchestrator(generator.clone())
            .resolve(&AnswerRequest::new("q", Mode::Evidence))
            .await;

        let prompts = generator.prompts.lock().unwrap();
        let sfs_at = prompts[0].find("SFS 1974:152").unwrap();
        let sou_at = prompts[0].find("SOU 2008:125").unwrap();
        assert!(sfs_at < sou_at);
    }

    #[tokio::test]
    async fn test_stream_accepted_answer() {
        let o = orchestrator(FixedGenerator::new(Ok(CITES_SOU_THEN_SFS)));
        let events = events(&o, Mode::Evidence).await;

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "All offentlig makt utgår från folket.");

        let n = events.len();
        assert!(matches!(&events[n - 2], StreamEvent::Sources { sources } if sources[0].doc_id == "SFS 1974:152"));
        assert_eq!(events[n - 1], StreamEvent::Done);

        let wire: String = events.into_iter().map(|e| RelayFrame::Event(e).to_sse()).collect();
        assert!(!wire.contains("SCRATCH-7731"));
        assert!(!wire.contains("internal_note"));
    }

    #[tokio::test]
    async fn test_stream_exhausted_is_templated_refusal() {
        let generator = FixedGenerator::new(Ok(UNSOURCED));
        let o = orchestrator(generator.clone());
        let events = events(&o, Mode::Evidence).await;

        assert_eq!(generator.prompts.lock().unwrap().len(), 2);
        assert_eq!(
            events,
            vec![
                StreamEvent::Token {
                    text: o.config().messages.render_refusal(2)
                },
                StreamEvent::Sources { sources: vec![] },
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_fatal_is_single_error() {
        let o = orchestrator(FixedGenerator::new(Err(GenerationError::Connection("reset".to_string()))));
        let events = events(&o, Mode::Assist).await;

        assert_eq!(events, vec![StreamEvent::error(o.config().messages.unavailable.clone())]);
    }

    #[tokio::test]
    async fn test_retrieval_failure_skips_generation() {
        let generator = FixedGenerator::new(Ok(CITES_SOU_THEN_SFS));
        let retriever = Arc::new(FailingRetriever { calls: AtomicU32::new(0) });
        let o = AnswerOrchestrator::builder()
            .generator(generator.clone())
            .retriever(retriever.clone())
            .build()
            .unwrap();

        let events = events(&o, Mode::Evidence).await;

        assert_eq!(events, vec![StreamEvent::error(o.config().messages.retrieval_failure.clone())]);
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_producer_panic_becomes_safe_error() {
        let o = orchestrator(Arc::new(PanickingGenerator));
        let events = events(&o, Mode::Evidence).await;

        assert_eq!(events, vec![StreamEvent::error(o.config().messages.stream_failure.clone())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_abandons_generation() {
        let abandoned = Arc::new(AtomicBool::new(false));
        let o = orchestrator(Arc::new(HangingGenerator {
            abandoned: abandoned.clone(),
        }));

        let mut frames = Box::pin(o.stream(AnswerRequest::new("q", Mode::Assist)));
        assert_eq!(frames.next().await, Some(RelayFrame::KeepAlive));
        drop(frames);

        for _ in 0..20 {
            if abandoned.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(abandoned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = AnswerOrchestrator::builder()
            .retriever(Arc::new(StaticRetriever::default()))
            .build()
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::MissingComponent("generator")));

        let err = AnswerOrchestrator::builder()
            .generator(FixedGenerator::new(Ok("{}")))
            .build()
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::MissingComponent("retriever")));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut config = RuntimeConfig::default();
        config.retry.max_attempts = 0;
        let err = AnswerOrchestrator::builder()
            .generator(FixedGenerator::new(Ok("{}")))
            .retriever(Arc::new(StaticRetriever::default()))
            .config(config)
            .build()
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn test_split_tokens() {
        assert_eq!(split_tokens("Ja, det gör den."), vec!["Ja, ", "det ", "gör ", "den."]);
        assert_eq!(split_tokens("  indrag"), vec!["  ", "indrag"]);
        assert!(split_tokens("").is_empty());
    }

    proptest::proptest! {
        #[test]
        fn prop_tokens_concatenate_to_text(text in "\\PC{0,80}") {
            proptest::prop_assert_eq!(split_tokens(&text).concat(), text);
        }
    }
}
