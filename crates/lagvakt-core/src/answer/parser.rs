//! Parsing raw model output into an [`AnswerPayload`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::schema::validate_answer_schema;
use crate::types::{Citation, Mode};

/// Raw model output could not be turned into an [`AnswerPayload`].
///
/// Always a hard failure. No partially populated payload is ever returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedOutputError {
    #[error("Output is not valid JSON (line {line}, column {column}): {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Output does not match the answer contract: {}", .errors.join("; "))]
    Schema { errors: Vec<String> },

    #[error("Output could not be decoded: {0}")]
    Decode(String),
}

impl MalformedOutputError {
    /// Human-readable reasons, one per problem.
    pub fn reasons(&self) -> Vec<String> {
        match self {
            MalformedOutputError::Schema { errors } => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

/// The structured answer the language model must produce.
///
/// `internal_note` is scratch reasoning. It must never reach a client;
/// use [`strip_internal_note`](super::strip_internal_note) before exposing
/// anything derived from this type. `Debug` does not print the note.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
    /// Sourcing mode the model claims to be answering in
    pub mode: Mode,

    /// True when the model states it cannot answer from the evidence
    pub missing_grounds: bool,

    /// User-facing answer
    pub answer_text: String,

    /// Claims backed by retrieved evidence, in the model's order
    pub sources: Vec<Citation>,

    /// Assertions made without a backing citation
    pub unsourced_facts: Vec<String>,

    /// Private scratch content
    pub internal_note: String,
}

impl AnswerPayload {
    /// A payload with no sources, facts or note.
    pub fn new(mode: Mode, answer_text: impl Into<String>) -> Self {
        Self {
            mode,
            missing_grounds: false,
            answer_text: answer_text.into(),
            sources: Vec::new(),
            unsourced_facts: Vec::new(),
            internal_note: String::new(),
        }
    }

    /// Whether the model declined to answer for lack of evidence.
    pub fn is_refusal(&self) -> bool {
        self.missing_grounds
    }
}

impl fmt::Debug for AnswerPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnswerPayload")
            .field("mode", &self.mode)
            .field("missing_grounds", &self.missing_grounds)
            .field("answer_text", &self.answer_text)
            .field("sources", &self.sources)
            .field("unsourced_facts", &self.unsourced_facts)
            .field(
                "internal_note",
                &format_args!("[{} chars withheld]", self.internal_note.chars().count()),
            )
            .finish()
    }
}

/// Parse raw model output.
///
/// # Steps
/// 1. Syntax: the text must be a single JSON document
/// 2. Contract: the document must satisfy the answer schema
/// 3. Decode into [`AnswerPayload`]
///
/// Code fences, trailing prose and similar noise are not stripped.
pub fn parse(raw_text: &str) -> Result<AnswerPayload, MalformedOutputError> {
    let value: serde_json::Value =
        serde_json::from_str(raw_text).map_err(|e| MalformedOutputError::Syntax {
            line: e.line(),
            column: e.column(),
            message: e.to_string(),
        })?;

    validate_answer_schema(&value).map_err(|errors| MalformedOutputError::Schema { errors })?;

    serde_json::from_value(value).map_err(|e| {
        // serde's data errors quote the offending value
        tracing::trace!(error = %e, "Answer decode failed");
        MalformedOutputError::Decode(format!("{:?} error", e.classify()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "mode": "EVIDENCE",
        "missing_grounds": false,
        "answer_text": "Riksdagen stiftar lag.",
        "sources": [
            {"doc_id": "SFS 1974:152", "chunk_id": "c8", "quote": "Riksdagen stiftar lag", "location": "8 kap. 1 §"}
        ],
        "unsourced_facts": [],
        "internal_note": "checked chapter 8 first"
    }"#;

    #[test]
    fn test_parse_valid_payload() {
        let payload = parse(VALID).unwrap();
        assert_eq!(payload.mode, Mode::Evidence);
        assert!(!payload.missing_grounds);
        assert_eq!(payload.sources.len(), 1);
        assert_eq!(payload.sources[0].location, "8 kap. 1 §");
        assert_eq!(payload.internal_note, "checked chapter 8 first");
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let result = parse("{\"mode\": \"EVIDENCE\", ");
        assert!(matches!(result, Err(MalformedOutputError::Syntax { .. })));
    }

    #[test]
    fn test_parse_rejects_fenced_json() {
        let fenced = format!("```json\n{}\n```", VALID);
        assert!(matches!(parse(&fenced), Err(MalformedOutputError::Syntax { .. })));
    }

    #[test]
    fn test_parse_rejects_trailing_prose() {
        let trailing = format!("{} Hope this helps!", VALID);
        assert!(parse(&trailing).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let result = parse(r#"{"mode": "ASSIST", "answer_text": "hej"}"#);
        match result {
            Err(MalformedOutputError::Schema { errors }) => {
                assert!(errors.iter().any(|e| e.contains("missing_grounds")));
            }
            other => panic!("Expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            parse("[1, 2, 3]"),
            Err(MalformedOutputError::Schema { .. })
        ));
        assert!(matches!(parse(""), Err(MalformedOutputError::Syntax { .. })));
    }

    #[test]
    fn test_malformed_reasons_never_carry_note_content() {
        let wrong_type = r#"{
            "mode": "ASSIST", "missing_grounds": false, "answer_text": "Ja.",
            "sources": [], "unsourced_facts": [],
            "internal_note": {"scratch": "TOPPHEMLIG-NOT"}
        }"#;
        let bare_string = r#""whole answer with internal_note TOPPHEMLIG-NOT""#;

        for raw in [wrong_type, bare_string] {
            let err = parse(raw).unwrap_err();
            assert!(matches!(err, MalformedOutputError::Schema { .. }));
            assert!(err.reasons().iter().all(|r| !r.contains("TOPPHEMLIG-NOT")));
            assert!(!err.to_string().contains("TOPPHEMLIG-NOT"));
        }
    }

    #[test]
    fn test_debug_withholds_note() {
        let payload = parse(VALID).unwrap();
        let debug = format!("{:?}", payload);
        assert!(!debug.contains("checked chapter 8 first"));
        assert!(debug.contains("withheld"));
    }

    #[test]
    fn test_reasons_lists_each_schema_error() {
        let err = MalformedOutputError::Schema {
            errors: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.reasons(), vec!["a", "b"]);
        assert_eq!(err.to_string(), "Output does not match the answer contract: a; b");
    }
}
