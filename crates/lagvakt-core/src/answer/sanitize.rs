//! Removal of internal scratch content before external exposure.
//!
//! [`SanitizedAnswer`] has no note field at all, so generic serialization
//! of it cannot leak the note. On top of that, any literal copy of the
//! note text the model echoed into other fields is scrubbed, including a
//! copy that only appears once the fields are joined into JSON.

use serde::{Deserialize, Serialize};

use super::parser::AnswerPayload;
use crate::types::{Citation, Mode};

/// An answer that is safe to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SanitizedAnswer {
    pub mode: Mode,
    pub missing_grounds: bool,
    pub answer_text: String,
    pub sources: Vec<Citation>,
    pub unsourced_facts: Vec<String>,
}

impl SanitizedAnswer {
    /// Serialize to a JSON value for transport.
    pub fn to_json(&self) -> serde_json::Value {
        // Plain structs of strings/bools/vecs always serialize.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Client-visible strings, in serialization order.
    fn text_fields_mut(&mut self) -> impl Iterator<Item = &mut String> {
        std::iter::once(&mut self.answer_text)
            .chain(
                self.sources
                    .iter_mut()
                    .flat_map(|c| [&mut c.doc_id, &mut c.chunk_id, &mut c.quote, &mut c.location]),
            )
            .chain(self.unsourced_facts.iter_mut())
    }

    fn occurrences(&self, needles: &[String]) -> usize {
        match serde_json::to_string(self) {
            Ok(json) => needles.iter().map(|n| json.matches(n.as_str()).count()).sum(),
            Err(_) => 0,
        }
    }

    /// Break up note copies that span a field boundary in the serialized form.
    ///
    /// Matches inside the bare skeleton (keys and punctuation) are not
    /// counted. Tails overlapping the start of the note are cut first, field
    /// by field, then heads overlapping its end. Stops as soon as the output
    /// is clean.
    fn scrub_boundaries(&mut self, note: &str) {
        if note.is_empty() {
            return;
        }
        let mut needles = vec![note.to_string(), json_escaped(note)];
        needles.dedup();

        let mut skeleton = self.clone();
        skeleton.text_fields_mut().for_each(String::clear);
        let baseline = skeleton.occurrences(&needles);
        let leaking = |answer: &Self| answer.occurrences(&needles) > baseline;

        for end in [FieldEnd::Tail, FieldEnd::Head] {
            let mut index = 0;
            while leaking(&*self) {
                match self.text_fields_mut().nth(index) {
                    Some(text) => trim_note_overlap(text, &needles, end),
                    None => break,
                }
                index += 1;
            }
        }

        if leaking(&*self) {
            tracing::warn!("Note text persists across answer fields");
        }
    }
}

impl From<AnswerPayload> for SanitizedAnswer {
    fn from(payload: AnswerPayload) -> Self {
        let note = payload.internal_note.trim().to_string();
        let clean = |text: String| scrub(text, &note);

        let mut answer = Self {
            mode: payload.mode,
            missing_grounds: payload.missing_grounds,
            answer_text: clean(payload.answer_text),
            sources: payload
                .sources
                .into_iter()
                .map(|c| Citation {
                    doc_id: clean(c.doc_id),
                    chunk_id: clean(c.chunk_id),
                    quote: clean(c.quote),
                    location: clean(c.location),
                })
                .collect(),
            unsourced_facts: payload.unsourced_facts.into_iter().map(clean).collect(),
        };
        answer.scrub_boundaries(&note);
        answer
    }
}

/// Produce the sanitized form of a payload.
///
/// The note field is dropped and every occurrence of the note text is
/// removed from the remaining strings.
pub fn strip_internal_note(payload: &AnswerPayload) -> SanitizedAnswer {
    SanitizedAnswer::from(payload.clone())
}

/// Remove every occurrence of `note` from `text`.
///
/// Repeats until stable: deleting one occurrence can join two halves into
/// a new one ("aabb" minus "ab" is "ab").
fn scrub(mut text: String, note: &str) -> String {
    if note.is_empty() {
        return text;
    }
    while text.contains(note) {
        text = text.replace(note, "");
    }
    text
}

#[derive(Debug, Clone, Copy)]
enum FieldEnd {
    Tail,
    Head,
}

/// JSON string escaping without the surrounding quotes.
fn json_escaped(text: &str) -> String {
    let quoted = serde_json::to_string(text).unwrap_or_default();
    quoted.get(1..quoted.len().saturating_sub(1)).unwrap_or_default().to_string()
}

/// Cut the longest tail (or head) of `text` that, once escaped, could be the
/// first (or last) part of a needle.
fn trim_note_overlap(text: &mut String, needles: &[String], end: FieldEnd) {
    let overlaps = |fragment: &str| {
        let fragment = json_escaped(fragment);
        needles.iter().any(|n| match end {
            FieldEnd::Tail => n.starts_with(fragment.as_str()),
            FieldEnd::Head => n.ends_with(fragment.as_str()),
        })
    };

    match end {
        FieldEnd::Tail => {
            let cut = text.char_indices().map(|(i, _)| i).find(|&i| overlaps(&text[i..]));
            if let Some(cut) = cut {
                text.truncate(cut);
            }
        }
        FieldEnd::Head => {
            let cut = text
                .char_indices()
                .map(|(i, c)| i + c.len_utf8())
                .rev()
                .find(|&j| overlaps(&text[..j]));
            if let Some(cut) = cut {
                text.replace_range(..cut, "");
            }
        }
    }
}
