//! # lagvakt-core
//!
//! Deterministic building blocks of evidence-gated answer delivery.
//!
//! This crate answers two questions about a model-produced answer:
//! - Which evidence outranks which? ([`TierRegistry`])
//! - May this answer be delivered, and in what form? ([`AnswerValidator`])
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same input, same verdict; no I/O, no LLM calls
//! 2. **Total ranking**: unknown sources rank lowest, lookups never fail
//! 3. **No repair**: malformed output is rejected, never patched
//! 4. **No leakage**: the internal note never survives sanitization
//!
//! ## Example
//!
//! ```rust,ignore
//! use lagvakt_core::{AnswerValidator, Mode};
//!
//! let validator = AnswerValidator::new();
//! let payload = validator.parse(&raw_model_output)?;
//! let outcome = validator.validate(&payload, Mode::Evidence);
//!
//! if let Some(answer) = outcome.sanitized_payload {
//!     deliver(answer);
//! } else {
//!     retry_with_feedback(&outcome.errors);
//! }
//! ```

pub mod answer;
pub mod evidence;
pub mod hierarchy;
pub mod types;
pub mod validator;

pub use answer::{strip_internal_note, AnswerPayload, MalformedOutputError, SanitizedAnswer};
pub use hierarchy::{RegistryError, SourceTier, Sourced, TierRegistry, TierRegistryBuilder};
pub use types::{Citation, EvidenceRecord, Mode};
pub use validator::{AnswerValidator, CitationPolicy, PolicyViolation, ValidationOutcome};
