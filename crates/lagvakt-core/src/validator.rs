//! The answer validator.
//!
//! The single authority deciding whether a structured answer may be
//! delivered. Parsing, policy checks and sanitization all happen here so
//! that "never leak the internal note" is enforced at one choke point.
//!
//! # Policy (by mode)
//!
//! | mode     | missing_grounds | rule                                        |
//! |----------|-----------------|---------------------------------------------|
//! | EVIDENCE | false           | no unsourced facts, at least one source     |
//! | EVIDENCE | true            | always valid (a refusal)                    |
//! | ASSIST   | any             | always valid (mixed content is the point)   |

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::answer::{self, AnswerPayload, MalformedOutputError, SanitizedAnswer};
use crate::evidence::check_citations;
use crate::types::{EvidenceRecord, Mode};

/// Why a parsed answer was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyViolation {
    /// EVIDENCE answer asserts facts it does not cite.
    FactsWithoutSources { count: usize },

    /// EVIDENCE answer claims grounding but cites nothing.
    NoSources,

    /// A citation points at a chunk that was not retrieved.
    CitationNotRetrieved { doc_id: String, chunk_id: String },

    /// A citation's quote does not occur in the cited passage.
    QuoteMismatch { doc_id: String, chunk_id: String },
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::FactsWithoutSources { count } => write!(
                f,
                "facts without sources: {} unsourced fact(s) are not allowed in EVIDENCE mode",
                count
            ),
            PolicyViolation::NoSources => write!(
                f,
                "no sources: an EVIDENCE answer with missing_grounds=false must cite at least one source"
            ),
            PolicyViolation::CitationNotRetrieved { doc_id, chunk_id } => write!(
                f,
                "citation not retrieved: {}#{} is not among the retrieved evidence",
                doc_id, chunk_id
            ),
            PolicyViolation::QuoteMismatch { doc_id, chunk_id } => write!(
                f,
                "quote mismatch: quote cited for {}#{} does not occur in that passage",
                doc_id, chunk_id
            ),
        }
    }
}

/// Whether citations are checked against the retrieved evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationPolicy {
    /// Citations are accepted as given.
    #[default]
    Off,

    /// EVIDENCE answers must cite retrieved chunks with verbatim quotes.
    Strict,
}

/// Verdict of [`AnswerValidator::validate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    /// Whether the answer may be delivered
    pub is_valid: bool,

    /// Human-readable reasons, in check order
    pub errors: Vec<String>,

    /// Typed reasons, parallel to `errors`
    #[serde(skip)]
    pub violations: Vec<PolicyViolation>,

    /// The deliverable answer, present only when valid
    pub sanitized_payload: Option<SanitizedAnswer>,
}

impl ValidationOutcome {
    fn accept(payload: &AnswerPayload) -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            violations: Vec::new(),
            sanitized_payload: Some(answer::strip_internal_note(payload)),
        }
    }

    fn reject(violations: Vec<PolicyViolation>) -> Self {
        Self {
            is_valid: false,
            errors: violations.iter().map(ToString::to_string).collect(),
            violations,
            sanitized_payload: None,
        }
    }

    /// Outcome for output that never parsed.
    pub fn malformed(error: &MalformedOutputError) -> Self {
        Self {
            is_valid: false,
            errors: error.reasons(),
            violations: Vec::new(),
            sanitized_payload: None,
        }
    }

    /// Whether any violation matches a predicate.
    pub fn has_violation(&self, predicate: impl Fn(&PolicyViolation) -> bool) -> bool {
        self.violations.iter().any(predicate)
    }
}

/// Parses and validates model answers.
///
/// Stateless apart from its policy; construct once and share.
#[derive(Debug, Clone, Default)]
pub struct AnswerValidator {
    citation_policy: CitationPolicy,
}

impl AnswerValidator {
    /// Create a validator with citation checks off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the citation policy.
    pub fn with_citation_policy(mut self, policy: CitationPolicy) -> Self {
        self.citation_policy = policy;
        self
    }

    /// Current citation policy.
    pub fn citation_policy(&self) -> CitationPolicy {
        self.citation_policy
    }

    /// Parse raw model output. See [`answer::parse`].
    pub fn parse(&self, raw_text: &str) -> Result<AnswerPayload, MalformedOutputError> {
        answer::parse(raw_text)
    }

    /// Check a payload against the sourcing rules of `mode`.
    pub fn validate(&self, payload: &AnswerPayload, mode: Mode) -> ValidationOutcome {
        self.validate_against(payload, mode, &[])
    }

    /// Check a payload, also verifying citations against `evidence` when
    /// the citation policy is [`CitationPolicy::Strict`].
    pub fn validate_against(
        &self,
        payload: &AnswerPayload,
        mode: Mode,
        evidence: &[EvidenceRecord],
    ) -> ValidationOutcome {
        if payload.mode != mode {
            tracing::debug!(
                requested = %mode,
                declared = %payload.mode,
                "Answer declares a different mode; validating against the requested one"
            );
        }

        let violations = match mode {
            Mode::Assist => Vec::new(),
            Mode::Evidence if payload.missing_grounds => Vec::new(),
            Mode::Evidence => self.evidence_violations(payload, evidence),
        };

        if violations.is_empty() {
            ValidationOutcome::accept(payload)
        } else {
            ValidationOutcome::reject(violations)
        }
    }

    /// Drop the internal note. See [`answer::strip_internal_note`].
    pub fn strip_internal_note(&self, payload: &AnswerPayload) -> SanitizedAnswer {
        answer::strip_internal_note(payload)
    }

    fn evidence_violations(
        &self,
        payload: &AnswerPayload,
        evidence: &[EvidenceRecord],
    ) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();

        if !payload.unsourced_facts.is_empty() {
            violations.push(PolicyViolation::FactsWithoutSources {
                count: payload.unsourced_facts.len(),
            });
        }

        if payload.sources.is_empty() {
            violations.push(PolicyViolation::NoSources);
        } else if self.citation_policy == CitationPolicy::Strict {
            violations.extend(check_citations(&payload.sources, evidence));
        }

        violations
    }
}
