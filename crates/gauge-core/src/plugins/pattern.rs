//! Regex plugin: pass when the content matches (or avoids) a pattern.

use regex::RegexBuilder;

use crate::registry::{ParamKind, ParamSchema, ParamSpec, Params, PluginMetadata, Scorer, ScorerFactory};
use crate::types::{EvaluatorCategory, Response};
use crate::{ConfigurationError, EvaluationExecutionError};

use super::{invalid_params, BuiltinPlugin};

/// Factory for [`RegexScorer`].
#[derive(Debug, Default)]
pub struct RegexPlugin;

impl BuiltinPlugin for RegexPlugin {
    const KEY: &'static str = "regex";

    fn metadata() -> PluginMetadata {
        PluginMetadata::new("Pattern Match", EvaluatorCategory::Automated)
            .description("Checks the response against a regular expression")
            .params(
                ParamSchema::new()
                    .field(ParamSpec::new("pattern", ParamKind::String).required())
                    .field(ParamSpec::new("should_match", ParamKind::Boolean).with_default(true))
                    .field(
                        ParamSpec::new("case_insensitive", ParamKind::Boolean).with_default(false),
                    ),
            )
    }
}

impl ScorerFactory for RegexPlugin {
    fn build(
        &self,
        response: &Response,
        params: &Params,
    ) -> Result<Box<dyn Scorer>, ConfigurationError> {
        let source = params
            .string("pattern")
            .ok_or_else(|| invalid_params(Self::KEY, "'pattern' is required"))?;

        let pattern = RegexBuilder::new(source)
            .case_insensitive(params.boolean("case_insensitive").unwrap_or(false))
            .build()
            .map_err(|e| invalid_params(Self::KEY, e.to_string()))?;

        Ok(Box::new(RegexScorer {
            pattern: source.to_string(),
            matched: pattern.is_match(&response.content),
            should_match: params.boolean("should_match").unwrap_or(true),
        }))
    }
}

#[derive(Debug)]
pub struct RegexScorer {
    pattern: String,
    matched: bool,
    should_match: bool,
}

impl Scorer for RegexScorer {
    fn evaluate_score(&self) -> Result<f64, EvaluationExecutionError> {
        Ok(if self.matched == self.should_match { 100.0 } else { 0.0 })
    }

    fn generate_feedback(&self) -> Option<String> {
        let verb = if self.matched { "matches" } else { "does not match" };
        Some(format!("Response {verb} /{}/", self.pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PluginRegistry;
    use serde_json::json;

    fn build(content: &str, params: serde_json::Value) -> Result<Box<dyn Scorer>, ConfigurationError> {
        let registry = PluginRegistry::with_builtins()?;
        registry.build("regex", &Response::new("prompt", content), params.as_object().unwrap())
    }

    #[test]
    fn test_match_passes() {
        let card = build("Order #1234 confirmed", json!({ "pattern": r"#\d+" }))
            .unwrap()
            .evaluate()
            .unwrap();
        assert_eq!(card.score, 100.0);
        assert!(card.passed);
    }

    #[test]
    fn test_should_not_match() {
        let card = build(
            "As an AI language model, I cannot",
            json!({ "pattern": "as an ai", "should_match": false, "case_insensitive": true }),
        )
        .unwrap()
        .evaluate()
        .unwrap();
        assert_eq!(card.score, 0.0);
        assert!(!card.passed);
    }

    #[test]
    fn test_missing_pattern_rejected() {
        let result = build("text", json!({}));
        assert!(matches!(result, Err(ConfigurationError::InvalidParams { .. })));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = build("text", json!({ "pattern": "(unclosed" }));
        assert!(matches!(result, Err(ConfigurationError::InvalidParams { .. })));
    }
}
