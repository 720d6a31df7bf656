//! Configuration documents in YAML or JSON.
//!
//! ```yaml
//! subject_id: support-reply
//! aggregation: weighted_average
//! evaluators:
//!   - key: length
//!     weight: 0.4
//!     params: { min: 20, ideal_max: 800 }
//!   - key: keyword
//!     run_mode: async
//!     depends_on: length
//!     min_dependency_score: 60
//!     params:
//!       required_keywords: [refund, order]
//! ```
//!
//! Entries are saved in document order through the same validation as
//! [`EvaluatorConfigSet::create`], so a dependency must be listed before
//! the evaluators that depend on it.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::aggregate::AggregationStrategy;
use crate::registry::PluginRegistry;
use crate::ConfigurationError;

use super::schema::validate_config_schema;
use super::{EvaluatorConfigSet, NewEvaluatorConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigDocument {
    subject_id: String,

    #[serde(default)]
    aggregation: AggregationStrategy,

    #[serde(default)]
    evaluators: Vec<NewEvaluatorConfig>,
}

impl EvaluatorConfigSet {
    /// Load a configuration set from a YAML string.
    pub fn from_yaml(yaml: &str, registry: &PluginRegistry) -> Result<Self, ConfigurationError> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Self::from_value(value, registry)
    }

    /// Load a configuration set from a JSON string.
    pub fn from_json(json: &str, registry: &PluginRegistry) -> Result<Self, ConfigurationError> {
        let value: JsonValue = serde_json::from_str(json)?;
        Self::from_value(value, registry)
    }

    /// Load a configuration set from a YAML file.
    pub fn from_yaml_file(
        path: impl AsRef<Path>,
        registry: &PluginRegistry,
    ) -> Result<Self, ConfigurationError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents, registry)
    }

    /// Load a configuration set from a JSON file.
    pub fn from_json_file(
        path: impl AsRef<Path>,
        registry: &PluginRegistry,
    ) -> Result<Self, ConfigurationError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents, registry)
    }

    fn from_value(value: JsonValue, registry: &PluginRegistry) -> Result<Self, ConfigurationError> {
        validate_config_schema(&value).map_err(ConfigurationError::Schema)?;

        let document: ConfigDocument = serde_json::from_value(value)?;
        let mut set = Self::new(document.subject_id).with_strategy(document.aggregation);

        for entry in document.evaluators {
            set.create(entry, registry)?;
        }

        tracing::debug!(
            subject = %set.subject_id(),
            evaluators = set.len(),
            strategy = ?set.strategy(),
            "Loaded evaluator configuration"
        );

        Ok(set)
    }
}
