//! JSON Schema validation for the answer contract.
//!
//! The schema lives at `schema/answer.schema.json` and is embedded at
//! compile time so the contract shipped to prompt authors and the one
//! enforced here cannot drift apart.

use jsonschema::error::{TypeKind, ValidationErrorKind};
use std::sync::OnceLock;
use thiserror::Error;

/// Embedded answer schema.
pub(crate) const ANSWER_SCHEMA_JSON: &str = include_str!("../../../../schema/answer.schema.json");

/// Compiled validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load answer schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(ANSWER_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| SchemaError::LoadError(e.clone()))
}

/// Validate a JSON value against the answer schema.
///
/// Returns every violation, each formatted as `"<message> at <path>"`.
/// Messages are built from the failing keyword only; the offending value
/// is model output and never appears in them.
pub fn validate_answer_schema(value: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| {
            let path = e.instance_path.to_string();
            format!(
                "{} at {}",
                describe(&e.kind),
                if path.is_empty() { "/" } else { path.as_str() }
            )
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn describe(kind: &ValidationErrorKind) -> String {
    match kind {
        ValidationErrorKind::Required { property } => match property.as_str() {
            Some(name) => format!("missing property \"{}\"", name),
            None => "missing property".to_string(),
        },
        ValidationErrorKind::Type {
            kind: TypeKind::Single(expected),
        } => format!("wrong type, expected {}", expected),
        ValidationErrorKind::Type { .. } => "wrong type".to_string(),
        ValidationErrorKind::Enum { .. } | ValidationErrorKind::Constant { .. } => {
            "not an allowed value".to_string()
        }
        ValidationErrorKind::MinLength { limit } => format!("shorter than {} character(s)", limit),
        ValidationErrorKind::AdditionalProperties { unexpected } => {
            format!("{} unexpected property(ies)", unexpected.len())
        }
        _ => "does not satisfy the answer contract".to_string(),
    }
}

/// Whether a JSON value satisfies the answer schema.
pub fn is_valid_answer(value: &serde_json::Value) -> bool {
    get_validator()
        .map(|v| v.is_valid(value))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete() -> serde_json::Value {
        json!({
            "mode": "EVIDENCE",
            "missing_grounds": false,
            "answer_text": "Ja.",
            "sources": [
                {"doc_id": "SFS 1974:152", "chunk_id": "c1", "quote": "q", "location": "1 kap. 1 §"}
            ],
            "unsourced_facts": [],
            "internal_note": ""
        })
    }

    #[test]
    fn test_complete_answer_passes() {
        assert!(validate_answer_schema(&complete()).is_ok());
        assert!(is_valid_answer(&complete()));
    }

    #[test]
    fn test_missing_field_fails() {
        let mut value = complete();
        value.as_object_mut().unwrap().remove("unsourced_facts");
        let errors = validate_answer_schema(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("unsourced_facts")));
    }

    #[test]
    fn test_unknown_mode_fails() {
        let mut value = complete();
        value["mode"] = json!("CREATIVE");
        assert!(!is_valid_answer(&value));
    }

    #[test]
    fn test_wrong_types_fail() {
        let mut value = complete();
        value["missing_grounds"] = json!("no");
        value["sources"] = json!([{"doc_id": "x"}]);
        let errors = validate_answer_schema(&value).unwrap_err();
        assert!(errors.len() >= 2);
    }

    #[test]
    fn test_errors_never_echo_instance_values() {
        let mut value = complete();
        value["internal_note"] = json!({"scratch": "HEMLIG-ANTECKNING"});
        value["mode"] = json!("HEMLIG-LÄGE");
        let errors = validate_answer_schema(&value).unwrap_err();

        assert!(errors.contains(&"wrong type, expected string at /internal_note".to_string()));
        assert!(errors.contains(&"not an allowed value at /mode".to_string()));
        assert!(errors.iter().all(|e| !e.contains("HEMLIG")));
    }

    #[test]
    fn test_bare_string_reports_root_type() {
        let errors = validate_answer_schema(&json!("whole answer with HEMLIG-ANTECKNING")).unwrap_err();
        assert_eq!(errors, vec!["wrong type, expected object at /".to_string()]);
    }

    #[test]
    fn test_embedded_schema_is_valid_json() {
        let parsed: serde_json::Value = serde_json::from_str(ANSWER_SCHEMA_JSON).unwrap();
        assert_eq!(parsed["title"], "AnswerPayload");
    }
}
