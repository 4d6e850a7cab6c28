//! The structured answer contract.
//!
//! The language model must produce a JSON object matching
//! `schema/answer.schema.json`. This module parses that object and
//! produces the sanitized form that is allowed to leave the system.
//!
//! # Core Principle
//! Malformed output is rejected, never repaired. There is no
//! "best-effort parse": the retry loop asks the model again instead.

mod parser;
mod sanitize;
mod schema;

pub use parser::{parse, AnswerPayload, MalformedOutputError};
pub use sanitize::{strip_internal_note, SanitizedAnswer};
pub use schema::{is_valid_answer, validate_answer_schema};
