//! Bounded-retry generation controller.
//!
//! # State machine
//!
//! ```text
//!              generate ok, valid
//! Attempting ───────────────────────────▶ Accepted
//!   │   ▲
//!   │   │ invalid or malformed, attempts < max
//!   │   └───────────────┐
//!   ├───────────────────┘
//!   │ invalid or malformed, attempts == max
//!   ├───────────────────────────────────▶ ExhaustedFailure
//!   │ timeout / connection error
//!   └───────────────────────────────────▶ FatalError
//! ```
//!
//! Malformed output and policy violations share one budget. Infrastructure
//! failures do not consume it: they end the request immediately, so a flaky
//! backend cannot hide a persistent policy problem or the other way round.

use chrono::{DateTime, Utc};
use lagvakt_core::{AnswerValidator, EvidenceRecord, Mode, SanitizedAnswer, ValidationOutcome};
use serde::Serialize;
use std::sync::Arc;

use crate::config::RetryConfig;
use crate::generation::{AttemptContext, GenerationError, Generator};

/// Controller states. `Attempting` is the only non-terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    #[default]
    Attempting,
    Accepted,
    ExhaustedFailure,
    FatalError,
}

/// One completed generation attempt, for audit logs.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,

    /// When validation finished
    pub at: DateTime<Utc>,

    /// Validation errors (empty when accepted)
    pub errors: Vec<String>,
}

/// Per-request state, owned by a single [`RetryController::run_traced`] call.
#[derive(Debug, Default)]
pub struct AttemptState {
    state: ControllerState,
    attempts: u32,
    last_raw: Option<String>,
    last_outcome: Option<ValidationOutcome>,
    history: Vec<AttemptRecord>,
}

impl AttemptState {
    /// Where the controller is: `Attempting` until a terminal outcome is reached.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Attempts that produced output (infrastructure failures excluded).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Raw text of the last attempt. Diagnostics only: never send this to a client.
    pub fn last_raw(&self) -> Option<&str> {
        self.last_raw.as_deref()
    }

    /// Verdict on the last attempt.
    pub fn last_outcome(&self) -> Option<&ValidationOutcome> {
        self.last_outcome.as_ref()
    }

    /// Every completed attempt, in order.
    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    fn record(&mut self, attempt: u32, raw: String, outcome: ValidationOutcome) {
        self.attempts += 1;
        self.history.push(AttemptRecord {
            attempt,
            at: Utc::now(),
            errors: outcome.errors.clone(),
        });
        self.last_raw = Some(raw);
        self.last_outcome = Some(outcome);
    }

    fn finish(mut self, outcome: RetryOutcome) -> (RetryOutcome, Self) {
        self.state = outcome.state();
        (outcome, self)
    }
}

/// Terminal outcome of a request.
///
/// Callers must never turn `ExhaustedFailure` or `FatalError` into anything
/// built from model output; they map to templated messages.
#[derive(Debug, Clone)]
pub enum RetryOutcome {
    /// A valid answer, already sanitized.
    Accepted { answer: SanitizedAnswer, attempts: u32 },

    /// The budget ran out. `errors` are from the last attempt.
    ExhaustedFailure { errors: Vec<String>, attempts: u32 },

    /// The generation backend failed.
    FatalError { cause: GenerationError, attempts: u32 },
}

impl RetryOutcome {
    /// The terminal state this outcome represents.
    pub fn state(&self) -> ControllerState {
        match self {
            RetryOutcome::Accepted { .. } => ControllerState::Accepted,
            RetryOutcome::ExhaustedFailure { .. } => ControllerState::ExhaustedFailure,
            RetryOutcome::FatalError { .. } => ControllerState::FatalError,
        }
    }

    /// Attempts consumed from the policy budget.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Accepted { attempts, .. }
            | RetryOutcome::ExhaustedFailure { attempts, .. }
            | RetryOutcome::FatalError { attempts, .. } => *attempts,
        }
    }

    /// Whether an answer was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, RetryOutcome::Accepted { .. })
    }
}

/// Drives generation attempts until acceptance or a terminal failure.
///
/// Shared across requests; all per-request state lives in [`AttemptState`].
#[derive(Debug, Clone)]
pub struct RetryController {
    validator: Arc<AnswerValidator>,
    max_attempts: u32,
}

impl RetryController {
    /// Create a controller. A budget of zero is raised to one.
    pub fn new(validator: Arc<AnswerValidator>, max_attempts: u32) -> Self {
        if max_attempts == 0 {
            tracing::warn!("max_attempts of 0 requested, using 1");
        }
        Self {
            validator,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Create a controller from configuration.
    pub fn from_config(validator: Arc<AnswerValidator>, config: &RetryConfig) -> Self {
        Self::new(validator, config.max_attempts)
    }

    /// The attempt budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The validator in use.
    pub fn validator(&self) -> &AnswerValidator {
        &self.validator
    }

    /// Run one request to a terminal outcome.
    pub async fn run(
        &self,
        generator: &dyn Generator,
        prompt: &str,
        mode: Mode,
        evidence: &[EvidenceRecord],
    ) -> RetryOutcome {
        self.run_traced(generator, prompt, mode, evidence).await.0
    }

    /// Like [`run`](Self::run), also returning the attempt state.
    pub async fn run_traced(
        &self,
        generator: &dyn Generator,
        prompt: &str,
        mode: Mode,
        evidence: &[EvidenceRecord],
    ) -> (RetryOutcome, AttemptState) {
        let mut state = AttemptState::default();
        let mut context = AttemptContext::first(mode, self.max_attempts);

        loop {
            let raw = match generator.generate(prompt, &context).await {
                Ok(raw) => raw,
                Err(cause) => {
                    tracing::warn!(
                        generator = generator.name(),
                        attempt = context.attempt,
                        error = %cause,
                        "Generation failed, ending request"
                    );
                    let attempts = state.attempts;
                    return state.finish(RetryOutcome::FatalError { cause, attempts });
                }
            };

            tracing::trace!(attempt = context.attempt, raw = %raw, "Raw generation output");

            let outcome = match self.validator.parse(&raw) {
                Ok(payload) => self.validator.validate_against(&payload, mode, evidence),
                Err(e) => {
                    tracing::debug!(attempt = context.attempt, error = %e, "Malformed generation output");
                    ValidationOutcome::malformed(&e)
                }
            };

            state.record(context.attempt, raw, outcome.clone());

            if let Some(answer) = outcome.sanitized_payload {
                tracing::info!(attempts = state.attempts, mode = %mode, "Answer accepted");
                let attempts = state.attempts;
                return state.finish(RetryOutcome::Accepted { answer, attempts });
            }

            tracing::warn!(
                attempt = context.attempt,
                max_attempts = self.max_attempts,
                errors = ?outcome.errors,
                "Answer rejected"
            );

            if state.attempts >= self.max_attempts {
                let attempts = state.attempts;
                return state.finish(RetryOutcome::ExhaustedFailure {
                    errors: outcome.errors,
                    attempts,
                });
            }

            context = context.next(outcome.errors);
        }
    }
}
