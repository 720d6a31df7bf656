//! Per-subject evaluator configuration.
//!
//! A subject (usually a prompt) owns an [`EvaluatorConfigSet`]: which
//! plugins score its responses, with what priority, weight, run mode and
//! dependency. Every save is validated against the plugin registry and the
//! set's own dependency graph; a rejected save leaves the set unchanged.

mod document;
mod graph;
mod schema;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::aggregate::AggregationStrategy;
use crate::registry::{ParamMap, PluginRegistry};
use crate::types::{Evaluation, RunMode};
use crate::ConfigurationError;

pub use schema::validate_config_schema;

/// One evaluator configured for a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Assigned by the set; ascending ids are creation order
    pub id: u64,

    pub subject_id: String,

    /// Registry key of the plugin
    pub evaluator_key: String,

    pub enabled: bool,
    pub run_mode: RunMode,

    /// Lower runs earlier
    pub priority: i32,

    /// Only meaningful under weighted aggregation
    pub weight: f64,

    /// Key of another configuration on the same subject
    pub depends_on: Option<String>,

    /// Normalized (0-100) score the dependency must reach
    pub min_dependency_score: Option<f64>,

    pub params: ParamMap,
}

impl EvaluatorConfig {
    /// Threshold used when `min_dependency_score` is unset.
    pub const DEFAULT_DEPENDENCY_SCORE: f64 = 80.0;

    pub fn dependency_threshold(&self) -> f64 {
        self.min_dependency_score
            .unwrap_or(Self::DEFAULT_DEPENDENCY_SCORE)
    }

    pub fn has_dependency(&self) -> bool {
        self.depends_on.is_some()
    }
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

/// Input for creating a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewEvaluatorConfig {
    #[serde(rename = "key")]
    pub evaluator_key: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub run_mode: RunMode,

    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default)]
    pub depends_on: Option<String>,

    #[serde(default)]
    pub min_dependency_score: Option<f64>,

    #[serde(default)]
    pub params: ParamMap,
}

impl NewEvaluatorConfig {
    pub fn new(evaluator_key: impl Into<String>) -> Self {
        Self {
            evaluator_key: evaluator_key.into(),
            enabled: true,
            run_mode: RunMode::Sync,
            priority: 0,
            weight: default_weight(),
            depends_on: None,
            min_dependency_score: None,
            params: ParamMap::new(),
        }
    }

    pub fn run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.depends_on = Some(key.into());
        self
    }

    pub fn min_dependency_score(mut self, threshold: f64) -> Self {
        self.min_dependency_score = Some(threshold);
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// All evaluator configurations of one subject, plus its aggregation strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfigSet {
    subject_id: String,

    #[serde(default)]
    strategy: AggregationStrategy,

    configs: Vec<EvaluatorConfig>,
    next_id: u64,
}

impl EvaluatorConfigSet {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            strategy: AggregationStrategy::default(),
            configs: Vec::new(),
            next_id: 1,
        }
    }

    pub fn with_strategy(mut self, strategy: AggregationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn strategy(&self) -> AggregationStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: AggregationStrategy) {
        self.strategy = strategy;
    }

    /// Validate and add a configuration.
    pub fn create(
        &mut self,
        new: NewEvaluatorConfig,
        registry: &PluginRegistry,
    ) -> Result<&EvaluatorConfig, ConfigurationError> {
        let candidate = EvaluatorConfig {
            id: self.next_id,
            subject_id: self.subject_id.clone(),
            evaluator_key: new.evaluator_key,
            enabled: new.enabled,
            run_mode: new.run_mode,
            priority: new.priority,
            weight: new.weight,
            depends_on: new.depends_on,
            min_dependency_score: new.min_dependency_score,
            params: new.params,
        };

        self.validate_entry(&candidate, registry)?;

        tracing::debug!(
            subject = %self.subject_id,
            evaluator = %candidate.evaluator_key,
            id = candidate.id,
            "Created evaluator configuration"
        );

        self.next_id += 1;
        self.configs.push(candidate);
        Ok(&self.configs[self.configs.len() - 1])
    }

    /// Edit an existing configuration. The edit is validated before it is kept.
    ///
    /// `id` and `subject_id` cannot be changed. Renaming a key that another
    /// configuration depends on is rejected.
    pub fn update(
        &mut self,
        id: u64,
        registry: &PluginRegistry,
        edit: impl FnOnce(&mut EvaluatorConfig),
    ) -> Result<&EvaluatorConfig, ConfigurationError> {
        let index = self.index_of(id)?;
        let original = &self.configs[index];

        let mut candidate = original.clone();
        edit(&mut candidate);
        candidate.id = original.id;
        candidate.subject_id = original.subject_id.clone();

        if candidate.evaluator_key != original.evaluator_key {
            if let Some(dependent) = self.dependent_on(&original.evaluator_key) {
                return Err(ConfigurationError::DependencyInUse {
                    key: original.evaluator_key.clone(),
                    required_by: dependent.evaluator_key.clone(),
                });
            }
        }

        self.validate_entry(&candidate, registry)?;

        tracing::debug!(
            subject = %self.subject_id,
            evaluator = %candidate.evaluator_key,
            id,
            "Updated evaluator configuration"
        );

        self.configs[index] = candidate;
        Ok(&self.configs[index])
    }

    /// Enable or disable a configuration.
    ///
    /// Disabling keeps history intact; dependents simply stop passing their
    /// dependency gate until it is re-enabled.
    pub fn set_enabled(
        &mut self,
        id: u64,
        enabled: bool,
        registry: &PluginRegistry,
    ) -> Result<&EvaluatorConfig, ConfigurationError> {
        self.update(id, registry, |config| config.enabled = enabled)
    }

    /// Remove a configuration no enabled configuration depends on.
    pub fn remove(&mut self, id: u64) -> Result<EvaluatorConfig, ConfigurationError> {
        let index = self.index_of(id)?;
        let key = &self.configs[index].evaluator_key;

        if let Some(dependent) = self.dependent_on(key) {
            return Err(ConfigurationError::DependencyInUse {
                key: key.clone(),
                required_by: dependent.evaluator_key.clone(),
            });
        }

        Ok(self.configs.remove(index))
    }

    pub fn get(&self, id: u64) -> Option<&EvaluatorConfig> {
        self.configs.iter().find(|c| c.id == id)
    }

    pub fn get_by_key(&self, key: &str) -> Option<&EvaluatorConfig> {
        self.configs.iter().find(|c| c.evaluator_key == key)
    }

    /// All configurations in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &EvaluatorConfig> {
        self.configs.iter()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &EvaluatorConfig> {
        self.configs.iter().filter(|c| c.enabled)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Check a candidate entry against the registry and the rest of the set.
    pub fn validate_entry(
        &self,
        candidate: &EvaluatorConfig,
        registry: &PluginRegistry,
    ) -> Result<(), ConfigurationError> {
        let key = &candidate.evaluator_key;

        if !registry.exists(key) {
            return Err(ConfigurationError::UnknownEvaluator(key.clone()));
        }
        registry.validate_params(key, &candidate.params)?;

        if !candidate.weight.is_finite() || candidate.weight < 0.0 {
            return Err(ConfigurationError::InvalidWeight {
                key: key.clone(),
                weight: candidate.weight,
            });
        }

        if candidate.priority < 0 {
            return Err(ConfigurationError::InvalidPriority {
                key: key.clone(),
                priority: candidate.priority,
            });
        }

        if let Some(threshold) = candidate.min_dependency_score {
            if !(0.0..=100.0).contains(&threshold) {
                return Err(ConfigurationError::InvalidThreshold {
                    key: key.clone(),
                    threshold,
                });
            }
        }

        if self
            .configs
            .iter()
            .any(|c| c.id != candidate.id && &c.evaluator_key == key)
        {
            return Err(ConfigurationError::DuplicateEvaluator(key.clone()));
        }

        graph::check_dependency(&self.configs, candidate)
    }

    /// Whether `config`'s dependency gate is open for a response.
    ///
    /// `evaluations` are the response's evaluations. True when no dependency
    /// is configured. Otherwise the most recent evaluation by the dependency
    /// must normalize to at least the configured threshold; a missing or
    /// disabled dependency, or no evaluation yet, keeps the gate closed.
    pub fn dependency_met(&self, config: &EvaluatorConfig, evaluations: &[Evaluation]) -> bool {
        let Some(dependency_key) = config.depends_on.as_deref() else {
            return true;
        };

        let Some(dependency) = self.get_by_key(dependency_key).filter(|c| c.enabled) else {
            return false;
        };

        graph::latest_evaluation(evaluations, &dependency.evaluator_key)
            .and_then(Evaluation::normalized_score)
            .is_some_and(|score| score >= config.dependency_threshold())
    }

    /// Share of the enabled weight held by `config`.
    ///
    /// Disabled configurations hold no share. If every enabled weight is
    /// zero the enabled configurations share equally.
    pub fn normalized_weight(&self, config: &EvaluatorConfig) -> f64 {
        if !config.enabled {
            return 0.0;
        }

        let (count, total) = self
            .enabled()
            .fold((0usize, 0.0f64), |(n, sum), c| (n + 1, sum + c.weight));

        if total > 0.0 {
            config.weight / total
        } else {
            1.0 / count.max(1) as f64
        }
    }

    fn index_of(&self, id: u64) -> Result<usize, ConfigurationError> {
        self.configs
            .iter()
            .position(|c| c.id == id)
            .ok_or(ConfigurationError::UnknownConfig(id))
    }

    fn dependent_on(&self, key: &str) -> Option<&EvaluatorConfig> {
        self.configs
            .iter()
            .find(|c| c.enabled && c.depends_on.as_deref() == Some(key))
    }
}
