//! Shared value types for the answer contract and retrieved evidence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Validation policy selector.
///
/// The mode is always supplied by the caller. It is never inferred from
/// the payload, since the same payload can be strict or permissive
/// depending on the conversation the orchestrator is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Strict sourcing: every claim must be backed by a citation.
    Evidence,

    /// Mixed sourced and unsourced content is permitted.
    Assist,
}

impl Mode {
    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Evidence => "EVIDENCE",
            Mode::Assist => "ASSIST",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EVIDENCE" => Ok(Mode::Evidence),
            "ASSIST" => Ok(Mode::Assist),
            other => Err(format!("unknown mode '{}', expected EVIDENCE or ASSIST", other)),
        }
    }
}

/// A structured pointer from a claim in the answer back to a retrieved passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Document the passage belongs to
    pub doc_id: String,

    /// Chunk within the document
    pub chunk_id: String,

    /// Verbatim quote from the passage
    pub quote: String,

    /// Human-readable location (e.g. "2 kap. 3 §")
    pub location: String,
}

/// One retrieved chunk, as supplied by the retrieval collaborator.
///
/// Read-only to this crate: it is ranked and forwarded, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Collection the chunk was retrieved from (e.g. "sfs")
    pub source_id: String,

    /// Document identifier
    pub doc_id: String,

    /// Chunk identifier within the document
    #[serde(default)]
    pub chunk_id: String,

    /// Passage text
    pub passage: String,

    /// Location descriptor
    #[serde(default)]
    pub location: String,
}

impl EvidenceRecord {
    /// Create a record with an empty location.
    pub fn new(
        source_id: impl Into<String>,
        doc_id: impl Into<String>,
        chunk_id: impl Into<String>,
        passage: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            doc_id: doc_id.into(),
            chunk_id: chunk_id.into(),
            passage: passage.into(),
            location: String::new(),
        }
    }

    /// Set the location descriptor.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Whether a citation points at this record.
    pub fn is_cited_by(&self, citation: &Citation) -> bool {
        self.doc_id == citation.doc_id && self.chunk_id == citation.chunk_id
    }
}
