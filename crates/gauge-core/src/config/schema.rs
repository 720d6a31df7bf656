//! JSON Schema validation for evaluator configuration documents.
//!
//! Documents are checked against `schema/evaluator-config.schema.json`
//! before they are parsed into typed structs.

use std::sync::OnceLock;

const CONFIG_SCHEMA_JSON: &str = include_str!("../../../../schema/evaluator-config.schema.json");

static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, String> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(CONFIG_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result.as_ref().map_err(Clone::clone)
}

/// Validate a configuration document.
///
/// Returns every violation found, formatted with its instance path.
pub fn validate_config_schema(document: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e])?;

    let errors: Vec<String> = validator
        .iter_errors(document)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_document_passes() {
        let value = json!({ "subject_id": "prompt-1" });
        assert!(validate_config_schema(&value).is_ok());
    }

    #[test]
    fn test_full_document_passes() {
        let value = json!({
            "subject_id": "support-reply",
            "aggregation": "weighted_average",
            "evaluators": [
                { "key": "length", "priority": 0, "weight": 0.4, "params": { "min": 20 } },
                {
                    "key": "keyword",
                    "run_mode": "async",
                    "priority": 1,
                    "depends_on": "length",
                    "min_dependency_score": 60,
                    "params": { "required_keywords": ["refund"] }
                }
            ]
        });
        assert!(validate_config_schema(&value).is_ok());
    }

    #[test]
    fn test_missing_subject_fails() {
        let errors = validate_config_schema(&json!({ "evaluators": [] })).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_unknown_strategy_fails() {
        let value = json!({ "subject_id": "p", "aggregation": "median" });
        assert!(validate_config_schema(&value).is_err());
    }

    #[test]
    fn test_evaluator_without_key_fails() {
        let value = json!({ "subject_id": "p", "evaluators": [{ "weight": 1.0 }] });
        assert!(validate_config_schema(&value).is_err());
    }

    #[test]
    fn test_unknown_evaluator_field_fails() {
        let value = json!({
            "subject_id": "p",
            "evaluators": [{ "key": "length", "timeout": 5 }]
        });
        assert!(validate_config_schema(&value).is_err());
    }

    #[test]
    fn test_threshold_above_100_fails() {
        let value = json!({
            "subject_id": "p",
            "evaluators": [{ "key": "length", "min_dependency_score": 150 }]
        });
        assert!(validate_config_schema(&value).is_err());
    }
}
