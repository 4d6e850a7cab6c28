//! The evidence retrieval seam.

use async_trait::async_trait;
use lagvakt_core::EvidenceRecord;
use thiserror::Error;

/// Errors from evidence retrieval.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("Retrieval backend unavailable: {0}")]
    Unavailable(String),

    #[error("Retrieval failed: {0}")]
    Failed(String),
}

/// Finds candidate evidence for a query.
///
/// Results may come back in any order; the orchestrator ranks them.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<EvidenceRecord>, RetrievalError>;

    /// Name for logs.
    fn name(&self) -> &str {
        "retriever"
    }
}

/// Returns the same records for every query.
///
/// For hosts that retrieve before calling in, and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRetriever {
    records: Vec<EvidenceRecord>,
}

impl StaticRetriever {
    pub fn new(records: Vec<EvidenceRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<EvidenceRecord>, RetrievalError> {
        Ok(self.records.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}
