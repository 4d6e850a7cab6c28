//! Citation grounding against retrieved evidence.
//!
//! A citation is grounded when it names a chunk that was actually
//! retrieved for this request and its quote occurs in that chunk's
//! passage. Whitespace is normalized before comparison; nothing else is.

use crate::types::{Citation, EvidenceRecord};
use crate::validator::PolicyViolation;

/// Check every citation, returning one violation per ungrounded citation.
pub fn check_citations(citations: &[Citation], evidence: &[EvidenceRecord]) -> Vec<PolicyViolation> {
    citations
        .iter()
        .filter_map(|citation| check_citation(citation, evidence).err())
        .collect()
}

/// Check a single citation.
pub fn check_citation(citation: &Citation, evidence: &[EvidenceRecord]) -> Result<(), PolicyViolation> {
    let record = evidence
        .iter()
        .find(|record| record.is_cited_by(citation))
        .ok_or_else(|| PolicyViolation::CitationNotRetrieved {
            doc_id: citation.doc_id.clone(),
            chunk_id: citation.chunk_id.clone(),
        })?;

    let quote = normalize_whitespace(&citation.quote);
    if quote.is_empty() || !normalize_whitespace(&record.passage).contains(&quote) {
        return Err(PolicyViolation::QuoteMismatch {
            doc_id: citation.doc_id.clone(),
            chunk_id: citation.chunk_id.clone(),
        });
    }

    Ok(())
}

/// Find the evidence record a citation refers to.
pub fn resolve<'a>(citation: &Citation, evidence: &'a [EvidenceRecord]) -> Option<&'a EvidenceRecord> {
    evidence.iter().find(|record| record.is_cited_by(citation))
}

/// Normalize whitespace for quote comparison.
fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence() -> Vec<EvidenceRecord> {
        vec![
            EvidenceRecord::new("sfs", "SFS 1974:152", "c1", "All offentlig makt i Sverige utgår från folket."),
            EvidenceRecord::new("proposition", "prop. 1973:90", "c7", "Regeringen föreslår en ny regeringsform."),
        ]
    }

    fn citation(doc: &str, chunk: &str, quote: &str) -> Citation {
        Citation {
            doc_id: doc.to_string(),
            chunk_id: chunk.to_string(),
            quote: quote.to_string(),
            location: String::new(),
        }
    }

    #[test]
    fn test_grounded_citation() {
        let c = citation("SFS 1974:152", "c1", "offentlig makt i Sverige");
        assert!(check_citation(&c, &evidence()).is_ok());
    }

    #[test]
    fn test_whitespace_normalization() {
        let c = citation("SFS 1974:152", "c1", "offentlig   makt\ni Sverige");
        assert!(check_citation(&c, &evidence()).is_ok());
    }

    #[test]
    fn test_unretrieved_chunk() {
        let c = citation("SFS 1974:152", "c2", "offentlig makt");
        assert!(matches!(
            check_citation(&c, &evidence()),
            Err(PolicyViolation::CitationNotRetrieved { .. })
        ));
    }

    #[test]
    fn test_quote_mismatch() {
        let c = citation("prop. 1973:90", "c7", "Riksdagen beslutar");
        assert!(matches!(
            check_citation(&c, &evidence()),
            Err(PolicyViolation::QuoteMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_quote_is_mismatch() {
        let c = citation("prop. 1973:90", "c7", "   ");
        assert!(check_citation(&c, &evidence()).is_err());
    }

    #[test]
    fn test_check_citations_collects_all() {
        let citations = vec![
            citation("SFS 1974:152", "c1", "utgår från folket"),
            citation("x", "y", "z"),
            citation("prop. 1973:90", "c7", "nope"),
        ];
        let violations = check_citations(&citations, &evidence());
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn test_resolve() {
        let ev = evidence();
        let c = citation("prop. 1973:90", "c7", "");
        assert_eq!(resolve(&c, &ev).map(|r| r.source_id.as_str()), Some("proposition"));
    }
}
