//! # gauge-core
//!
//! Deterministic core of the Gauge evaluation engine.
//!
//! This crate answers three questions about a generated response:
//! - Which evaluator plugins should score it, and in what order?
//! - Is a dependent evaluator allowed to run yet?
//! - What is the response's overall score?
//!
//! ## Key Guarantees
//!
//! 1. **No I/O in scoring**: plugins score text they are handed
//! 2. **Fail fast on configuration**: invalid setups are rejected at save time
//! 3. **History preserving**: an [`Evaluation`] is never rewritten, only its
//!    metadata may be patched once
//! 4. **Aggregation never fails**: degenerate inputs are absorbed, not raised
//!
//! ## Example
//!
//! ```rust,ignore
//! use gauge_core::{EvaluatorConfigSet, ExecutionPlan, PluginRegistry, ScoreAggregator};
//!
//! let registry = PluginRegistry::with_builtins()?;
//! let configs = EvaluatorConfigSet::from_yaml_file("evaluators.yaml", &registry)?;
//! let plan = ExecutionPlan::build(&configs);
//!
//! // ... run the plan, collect evaluations ...
//!
//! let aggregator = ScoreAggregator::new(&configs);
//! if let Some(score) = aggregator.overall_score(&evaluations) {
//!     println!("overall: {score:.1}");
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod plan;
pub mod plugins;
pub mod registry;
pub mod types;

pub use aggregate::{
    AggregationStrategy, BreakdownEntry, CustomAggregation, ScoreAggregator, ScoredResponse,
};
pub use config::{EvaluatorConfig, EvaluatorConfigSet, NewEvaluatorConfig};
pub use plan::{ExecutionPlan, Phase};
pub use registry::{
    ParamKind, ParamMap, ParamSchema, ParamSpec, Params, PluginMetadata, PluginRegistry, Scorer,
    ScorerFactory,
};
pub use types::{
    Evaluation, EvaluationContext, EvaluatorCategory, RecordError, Response, RunMode, ScoreCard,
    ScoreRange,
};

use thiserror::Error;

/// Errors raised while saving or resolving evaluator configuration.
///
/// These are fail-fast: a save that produces one leaves the configuration
/// set untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Unknown evaluator: '{0}'")]
    UnknownEvaluator(String),

    #[error("Invalid weight {weight} for evaluator '{key}': must be finite and >= 0")]
    InvalidWeight { key: String, weight: f64 },

    #[error("Invalid priority {priority} for evaluator '{key}': must be >= 0")]
    InvalidPriority { key: String, priority: i32 },

    #[error("Invalid minimum dependency score {threshold} for evaluator '{key}': must be within 0-100")]
    InvalidThreshold { key: String, threshold: f64 },

    #[error("Evaluator '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("Evaluator '{key}' depends on '{depends_on}', which is not configured for this subject")]
    MissingDependency { key: String, depends_on: String },

    #[error("Evaluator '{key}' depends on '{depends_on}', which is disabled")]
    DisabledDependency { key: String, depends_on: String },

    #[error("Cyclic dependency: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Evaluator '{key}' is still required by '{required_by}'")]
    DependencyInUse { key: String, required_by: String },

    #[error("Evaluator '{0}' is already configured for this subject")]
    DuplicateEvaluator(String),

    #[error("Invalid parameters for evaluator '{key}': {}", .errors.join("; "))]
    InvalidParams { key: String, errors: Vec<String> },

    #[error("Unknown evaluator configuration id {0}")]
    UnknownConfig(u64),

    #[error("Plugin registration failed for '{key}': {reason}")]
    Registration { key: String, reason: String },

    #[error("Failed to read configuration: {0}")]
    Io(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Configuration does not match schema: {}", .0.join("; "))]
    Schema(Vec<String>),
}

impl From<std::io::Error> for ConfigurationError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigurationError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for ConfigurationError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Errors raised by a plugin while scoring a response.
///
/// The orchestrator isolates these per evaluator; they never abort a pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationExecutionError {
    #[error("Scoring failed: {0}")]
    Scoring(String),

    #[error("Score is not a finite number")]
    NonFiniteScore,

    #[error("Score {score} outside declared range [{min}, {max}]")]
    ScoreOutOfRange { score: f64, min: f64, max: f64 },

    #[error("Plugin panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_lists_path() {
        let err = ConfigurationError::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Cyclic dependency: a -> b -> a");
    }

    #[test]
    fn test_yaml_error_maps_to_parse() {
        let err: ConfigurationError = serde_yaml::from_str::<u32>("not: [a number")
            .unwrap_err()
            .into();
        assert!(matches!(err, ConfigurationError::Parse(_)));
    }
}
