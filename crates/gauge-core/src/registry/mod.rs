//! Plugin registry for evaluator plugins.
//!
//! The registry maps a stable key to a scorer factory plus descriptive
//! metadata. It is built once at startup and shared by reference
//! (typically `Arc<PluginRegistry>`); there is no global instance, so tests
//! use isolated registries.
//!
//! ## Usage
//!
//! ```ignore
//! let mut registry = PluginRegistry::new();
//! registry.register("length", LengthFactory, LengthFactory::metadata())?;
//!
//! let scorer = registry.build("length", &response, &params)?;
//! let card = scorer.evaluate()?;
//! ```

mod params;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::{EvaluatorCategory, Response, ScoreCard, ScoreRange};
use crate::{ConfigurationError, EvaluationExecutionError};

pub use params::{ParamKind, ParamMap, ParamSchema, ParamSpec, Params};

/// Normalized score at or above which a scorer passes, unless it decides otherwise.
pub const DEFAULT_PASS_SCORE: f64 = 70.0;

/// A scorer bound to one response and one parameter set.
///
/// Implementors supply the raw score and its range; [`Scorer::evaluate`]
/// combines them into the [`ScoreCard`] the engine records.
pub trait Scorer: Send {
    /// Raw score in the plugin's own declared range.
    fn evaluate_score(&self) -> Result<f64, EvaluationExecutionError>;

    /// Bounds of [`Scorer::evaluate_score`].
    fn score_range(&self) -> ScoreRange {
        ScoreRange::PERCENT
    }

    fn generate_feedback(&self) -> Option<String> {
        None
    }

    /// Optional per-criterion breakdown.
    fn criteria_scores(&self) -> Option<BTreeMap<String, f64>> {
        None
    }

    /// Whether a raw score counts as passing.
    fn passed(&self, score: f64) -> bool {
        self.score_range()
            .normalize(score)
            .is_some_and(|normalized| normalized >= DEFAULT_PASS_SCORE)
    }

    /// Score the response and assemble the result.
    fn evaluate(&self) -> Result<ScoreCard, EvaluationExecutionError> {
        let score = self.evaluate_score()?;
        let range = self.score_range();

        Ok(ScoreCard {
            score,
            score_min: range.min,
            score_max: range.max,
            passed: self.passed(score),
            feedback: self.generate_feedback(),
            criteria_scores: self.criteria_scores(),
        })
    }
}

/// Constructs scorers for one plugin.
///
/// Parameters reach the factory already coerced and validated against the
/// plugin's declared [`ParamSchema`]. A factory may still reject values it
/// cannot use (an uncompilable regex, say) with a [`ConfigurationError`].
pub trait ScorerFactory: Send + Sync {
    fn build(
        &self,
        response: &Response,
        params: &Params,
    ) -> Result<Box<dyn Scorer>, ConfigurationError>;
}

impl<F> ScorerFactory for F
where
    F: Fn(&Response, &Params) -> Result<Box<dyn Scorer>, ConfigurationError> + Send + Sync,
{
    fn build(
        &self,
        response: &Response,
        params: &Params,
    ) -> Result<Box<dyn Scorer>, ConfigurationError> {
        self(response, params)
    }
}

/// Descriptive metadata for a registered plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Human-readable name
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub category: EvaluatorCategory,

    #[serde(default)]
    pub params: ParamSchema,
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>, category: EvaluatorCategory) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category,
            params: ParamSchema::default(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn params(mut self, params: ParamSchema) -> Self {
        self.params = params;
        self
    }
}

struct RegistryEntry {
    factory: Arc<dyn ScorerFactory>,
    metadata: PluginMetadata,
    validator: jsonschema::Validator,
}

/// Registry of evaluator plugins keyed by a stable string.
#[derive(Default)]
pub struct PluginRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl PluginRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in plugins registered.
    pub fn with_builtins() -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        crate::plugins::register_builtins(&mut registry)?;
        Ok(registry)
    }

    /// Register a plugin.
    ///
    /// If a plugin with the same key already exists, it is replaced. Fails
    /// if the declared parameter schema cannot be compiled.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        factory: impl ScorerFactory + 'static,
        metadata: PluginMetadata,
    ) -> Result<(), ConfigurationError> {
        let key = key.into();
        let validator = jsonschema::options()
            .build(&metadata.params.to_json_schema())
            .map_err(|e| ConfigurationError::Registration {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        let replaced = self
            .entries
            .insert(
                key.clone(),
                RegistryEntry {
                    factory: Arc::new(factory),
                    metadata,
                    validator,
                },
            )
            .is_some();

        tracing::debug!(plugin = %key, replaced, "Registered evaluator plugin");
        Ok(())
    }

    /// Remove a plugin, returning its metadata if it was registered.
    pub fn unregister(&mut self, key: &str) -> Option<PluginMetadata> {
        let removed = self.entries.remove(key).map(|entry| entry.metadata);
        if removed.is_some() {
            tracing::debug!(plugin = %key, "Unregistered evaluator plugin");
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<&PluginMetadata> {
        self.entries.get(key).map(|entry| &entry.metadata)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// All registered plugins, ordered by key.
    pub fn all(&self) -> BTreeMap<&str, &PluginMetadata> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.as_str(), &entry.metadata))
            .collect()
    }

    pub fn by_category(&self, category: EvaluatorCategory) -> BTreeMap<&str, &PluginMetadata> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.metadata.category == category)
            .map(|(key, entry)| (key.as_str(), &entry.metadata))
            .collect()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Coerce raw parameters and validate them against the plugin's schema.
    pub fn validate_params(&self, key: &str, raw: &ParamMap) -> Result<Params, ConfigurationError> {
        let entry = self.entry(key)?;
        let coerced = entry.metadata.params.coerce(raw);
        let instance = JsonValue::Object(coerced);

        let errors: Vec<String> = entry
            .validator
            .iter_errors(&instance)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();

        if !errors.is_empty() {
            return Err(ConfigurationError::InvalidParams {
                key: key.to_string(),
                errors,
            });
        }

        match instance {
            JsonValue::Object(map) => Ok(Params::new(map)),
            _ => Ok(Params::default()),
        }
    }

    /// Construct a scorer for `response` with the given raw parameters.
    pub fn build(
        &self,
        key: &str,
        response: &Response,
        raw: &ParamMap,
    ) -> Result<Box<dyn Scorer>, ConfigurationError> {
        let params = self.validate_params(key, raw)?;
        self.entry(key)?.factory.build(response, &params)
    }

    fn entry(&self, key: &str) -> Result<&RegistryEntry, ConfigurationError> {
        self.entries
            .get(key)
            .ok_or_else(|| ConfigurationError::UnknownEvaluator(key.to_string()))
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoScorer {
        score: f64,
    }

    impl Scorer for EchoScorer {
        fn evaluate_score(&self) -> Result<f64, EvaluationExecutionError> {
            Ok(self.score)
        }

        fn score_range(&self) -> ScoreRange {
            ScoreRange::new(0.0, 10.0)
        }

        fn generate_feedback(&self) -> Option<String> {
            Some(format!("scored {}", self.score))
        }
    }

    struct EchoFactory;

    impl ScorerFactory for EchoFactory {
        fn build(
            &self,
            _response: &Response,
            params: &Params,
        ) -> Result<Box<dyn Scorer>, ConfigurationError> {
            Ok(Box::new(EchoScorer {
                score: params.number("score").unwrap_or(0.0),
            }))
        }
    }

    fn echo_metadata(category: EvaluatorCategory) -> PluginMetadata {
        PluginMetadata::new("Echo", category)
            .description("Returns the configured score")
            .params(
                ParamSchema::new()
                    .field(ParamSpec::new("score", ParamKind::Number).with_default(5.0)),
            )
    }

    fn registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry
            .register("echo", EchoFactory, echo_metadata(EvaluatorCategory::Automated))
            .unwrap();
        registry
    }

    fn params(value: JsonValue) -> ParamMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_registry_register_and_build() {
        let registry = registry();
        assert!(registry.exists("echo"));
        assert!(!registry.exists("unknown"));
        assert_eq!(registry.get("echo").unwrap().name, "Echo");

        let response = Response::new("prompt-1", "hello");
        let scorer = registry
            .build("echo", &response, &params(json!({ "score": "8" })))
            .unwrap();
        let card = scorer.evaluate().unwrap();

        assert_eq!(card.score, 8.0);
        assert_eq!(card.score_max, 10.0);
        assert!(card.passed);
        assert_eq!(card.feedback.as_deref(), Some("scored 8"));
    }

    #[test]
    fn test_default_pass_threshold() {
        let registry = registry();
        let response = Response::new("prompt-1", "hello");
        let card = registry
            .build("echo", &response, &ParamMap::new())
            .unwrap()
            .evaluate()
            .unwrap();

        assert_eq!(card.score, 5.0);
        assert!(!card.passed);
    }

    #[test]
    fn test_build_unknown_key_is_configuration_error() {
        let registry = registry();
        let response = Response::new("prompt-1", "hello");

        let result = registry.build("missing", &response, &ParamMap::new());
        match result {
            Err(ConfigurationError::UnknownEvaluator(key)) => assert_eq!(key, "missing"),
            _ => panic!("Expected UnknownEvaluator error"),
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        let registry = registry();

        let err = registry
            .validate_params("echo", &params(json!({ "score": "high" })))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidParams { .. }));

        let err = registry
            .validate_params("echo", &params(json!({ "bogus": 1 })))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidParams { .. }));
    }

    #[test]
    fn test_unregister() {
        let mut registry = registry();
        let removed = registry.unregister("echo");
        assert_eq!(removed.map(|m| m.name), Some("Echo".to_string()));
        assert!(registry.is_empty());
        assert!(registry.unregister("echo").is_none());
    }

    #[test]
    fn test_register_replaces_existing() {
        let mut registry = registry();
        registry
            .register("echo", EchoFactory, echo_metadata(EvaluatorCategory::LlmJudge))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("echo").unwrap().category,
            EvaluatorCategory::LlmJudge
        );
    }

    #[test]
    fn test_closure_factory() {
        let mut registry = PluginRegistry::new();
        registry
            .register(
                "fixed",
                |_: &Response, _: &Params| -> Result<Box<dyn Scorer>, ConfigurationError> {
                    Ok(Box::new(EchoScorer { score: 9.0 }))
                },
                PluginMetadata::new("Fixed", EvaluatorCategory::Automated),
            )
            .unwrap();

        let card = registry
            .build("fixed", &Response::new("prompt-1", "hi"), &ParamMap::new())
            .unwrap()
            .evaluate()
            .unwrap();
        assert_eq!(card.score, 9.0);
    }

    #[test]
    fn test_all_and_by_category() {
        let mut registry = registry();
        registry
            .register("judge", EchoFactory, echo_metadata(EvaluatorCategory::LlmJudge))
            .unwrap();

        assert_eq!(registry.all().keys().copied().collect::<Vec<_>>(), vec!["echo", "judge"]);

        let judges = registry.by_category(EvaluatorCategory::LlmJudge);
        assert_eq!(judges.len(), 1);
        assert!(judges.contains_key("judge"));
    }
}
