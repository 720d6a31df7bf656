//! Keyword plugin
//!
//! Required keywords carry 70% of the score, proportional to how many are
//! present. Forbidden keywords carry the remaining 30%, lost entirely if
//! any one of them appears.

use std::collections::BTreeMap;

use crate::registry::{ParamKind, ParamSchema, ParamSpec, Params, PluginMetadata, Scorer, ScorerFactory};
use crate::types::{EvaluatorCategory, Response};
use crate::{ConfigurationError, EvaluationExecutionError};

use super::BuiltinPlugin;

const REQUIRED_WEIGHT: f64 = 70.0;
const FORBIDDEN_WEIGHT: f64 = 30.0;

/// Factory for [`KeywordScorer`].
#[derive(Debug, Default)]
pub struct KeywordPlugin;

impl BuiltinPlugin for KeywordPlugin {
    const KEY: &'static str = "keyword";

    fn metadata() -> PluginMetadata {
        PluginMetadata::new("Keyword Coverage", EvaluatorCategory::Automated)
            .description("Checks required and forbidden keywords")
            .params(
                ParamSchema::new()
                    .field(ParamSpec::new("required_keywords", ParamKind::StringList))
                    .field(ParamSpec::new("forbidden_keywords", ParamKind::StringList))
                    .field(ParamSpec::new("case_sensitive", ParamKind::Boolean).with_default(false)),
            )
    }
}

impl ScorerFactory for KeywordPlugin {
    fn build(
        &self,
        response: &Response,
        params: &Params,
    ) -> Result<Box<dyn Scorer>, ConfigurationError> {
        let case_sensitive = params.boolean("case_sensitive").unwrap_or(false);
        let fold = |s: &str| {
            if case_sensitive {
                s.to_string()
            } else {
                s.to_lowercase()
            }
        };

        let content = fold(response.content.as_str());
        let required = params.string_list("required_keywords");
        let forbidden = params.string_list("forbidden_keywords");

        let (found, missing): (Vec<String>, Vec<String>) = required
            .into_iter()
            .partition(|kw| content.contains(&fold(kw.as_str())));
        let present_forbidden = forbidden
            .into_iter()
            .filter(|kw| content.contains(&fold(kw.as_str())))
            .collect();

        Ok(Box::new(KeywordScorer {
            found,
            missing,
            present_forbidden,
        }))
    }
}

/// Keyword analysis of one response.
#[derive(Debug)]
pub struct KeywordScorer {
    found: Vec<String>,
    missing: Vec<String>,
    present_forbidden: Vec<String>,
}

impl KeywordScorer {
    fn required_ratio(&self) -> f64 {
        let total = self.found.len() + self.missing.len();
        if total == 0 {
            1.0
        } else {
            self.found.len() as f64 / total as f64
        }
    }

    fn forbidden_clear(&self) -> bool {
        self.present_forbidden.is_empty()
    }
}

impl Scorer for KeywordScorer {
    fn evaluate_score(&self) -> Result<f64, EvaluationExecutionError> {
        let forbidden = if self.forbidden_clear() { FORBIDDEN_WEIGHT } else { 0.0 };
        Ok(REQUIRED_WEIGHT * self.required_ratio() + forbidden)
    }

    fn generate_feedback(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("Missing required keywords: {}", self.missing.join(", ")));
        }
        if !self.present_forbidden.is_empty() {
            parts.push(format!(
                "Contains forbidden keywords: {}",
                self.present_forbidden.join(", ")
            ));
        }
        if parts.is_empty() {
            parts.push("All keyword requirements met".to_string());
        }
        Some(parts.join(". "))
    }

    fn criteria_scores(&self) -> Option<BTreeMap<String, f64>> {
        let mut criteria = BTreeMap::new();
        criteria.insert("required".to_string(), self.required_ratio() * 100.0);
        criteria.insert(
            "forbidden".to_string(),
            if self.forbidden_clear() { 100.0 } else { 0.0 },
        );
        Some(criteria)
    }

    fn passed(&self, _score: f64) -> bool {
        self.missing.is_empty() && self.forbidden_clear()
    }
}
