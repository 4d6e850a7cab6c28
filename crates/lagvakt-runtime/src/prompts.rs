//! Prompts that carry the structured answer contract.
//!
//! Prompting strategy belongs to the hosting service. What lives here is
//! the part this crate must own: the JSON contract the validator enforces,
//! the per-mode sourcing rules, the evidence block in tier order, and the
//! feedback appended to a retry.

use lagvakt_core::{EvidenceRecord, Mode, TierRegistry};
use std::fmt::Write;

use crate::generation::AttemptContext;

/// System prompt stating the answer contract.
pub const ANSWER_CONTRACT_PROMPT: &str = r#"
You answer questions about Swedish law using ONLY the numbered evidence you are given.

## Output Format (JSON, nothing else)
{
  "mode": "EVIDENCE" | "ASSIST",
  "missing_grounds": true | false,
  "answer_text": "the answer shown to the user",
  "sources": [
    {
      "doc_id": "document id exactly as given in the evidence",
      "chunk_id": "chunk id exactly as given in the evidence",
      "quote": "verbatim text copied from that chunk",
      "location": "chapter/section or page"
    }
  ],
  "unsourced_facts": ["statements you make without a citation"],
  "internal_note": "your private working notes; never shown to the user"
}

## Rules
1. Respond with a single JSON object. No code fences, no prose around it.
2. Every field is required. Use [] and "" for empty values.
3. Quotes must be copied verbatim from the cited chunk.
4. Evidence is listed in priority order: tier A (statute and case law) outranks
   tier B (preparatory and parliamentary material), which outranks tier C
   (inquiries, research, commentary). Prefer higher tiers when they conflict.
"#;

/// Sourcing rules for EVIDENCE mode.
pub const EVIDENCE_MODE_PROMPT: &str = r#"
## Mode: EVIDENCE
Every claim must be backed by at least one entry in "sources".
"unsourced_facts" MUST be empty.
If the evidence does not answer the question, set "missing_grounds": true
and explain briefly in "answer_text" that the sources do not cover it.
"#;

/// Sourcing rules for ASSIST mode.
pub const ASSIST_MODE_PROMPT: &str = r#"
## Mode: ASSIST
Cite evidence where it supports a claim.
General knowledge not found in the evidence is allowed, but each such
statement MUST also be listed in "unsourced_facts".
"#;

/// Sourcing rules for a mode.
pub fn mode_instructions(mode: Mode) -> &'static str {
    match mode {
        Mode::Evidence => EVIDENCE_MODE_PROMPT,
        Mode::Assist => ASSIST_MODE_PROMPT,
    }
}

/// Render ranked evidence as a numbered block.
///
/// Records must already be in tier order; this function does not sort.
pub fn render_evidence(ranked: &[EvidenceRecord], registry: &TierRegistry) -> String {
    if ranked.is_empty() {
        return "(no evidence was retrieved)\n".to_string();
    }

    let mut out = String::new();
    for (i, record) in ranked.iter().enumerate() {
        let _ = writeln!(
            out,
            "[{}] tier {} | {} | doc_id={} chunk_id={}{}",
            i + 1,
            registry.tier_of(&record.source_id),
            record.source_id,
            record.doc_id,
            record.chunk_id,
            if record.location.is_empty() {
                String::new()
            } else {
                format!(" | {}", record.location)
            },
        );
        let _ = writeln!(out, "{}\n", record.passage.trim());
    }
    out
}

/// Build the user prompt for a request.
pub fn build_prompt(
    query: &str,
    mode: Mode,
    ranked: &[EvidenceRecord],
    registry: &TierRegistry,
) -> String {
    format!(
        "{}\n## Evidence\n{}\n## Question\n{}\n",
        mode_instructions(mode).trim(),
        render_evidence(ranked, registry),
        query.trim()
    )
}

/// Append retry feedback to a prompt.
///
/// The first attempt, or any attempt without feedback, gets the prompt unchanged.
pub fn with_feedback(prompt: &str, context: &AttemptContext) -> String {
    if context.feedback.is_empty() {
        return prompt.to_string();
    }

    let mut out = String::from(prompt);
    let _ = writeln!(
        out,
        "\n## Your previous answer was rejected (attempt {} of {})",
        context.attempt, context.max_attempts
    );
    for error in &context.feedback {
        let _ = writeln!(out, "- {}", error);
    }
    out.push_str("Return a corrected JSON object that satisfies every rule above.\n");
    out
}
