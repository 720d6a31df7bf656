//! # gauge-runtime
//!
//! Async runtime around [`gauge_core`]: runs evaluation passes against
//! pluggable stores, defers async evaluators to a job queue, and isolates
//! plugin failures.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gauge_core::{EvaluationContext, PluginRegistry};
//! use gauge_runtime::{InMemoryStore, JobQueue, JobWorker, Orchestrator, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_yaml_file("runtime.yaml")?;
//! let store = Arc::new(InMemoryStore::new());
//! let (queue, receiver) = JobQueue::bounded(config.jobs.queue_capacity);
//!
//! let orchestrator = Arc::new(
//!     Orchestrator::builder()
//!         .registry(Arc::new(PluginRegistry::with_builtins()?))
//!         .store(store.clone())
//!         .dispatcher(Arc::new(queue))
//!         .config(config.clone())
//!         .build()?,
//! );
//! let worker = JobWorker::spawn(receiver, orchestrator.clone(), config.jobs);
//!
//! let report = orchestrator.evaluate(&response, EvaluationContext::TrackedCall).await?;
//! ```

pub mod config;
pub mod dedupe;
pub mod jobs;
pub mod orchestrator;
pub mod resilience;
pub mod store;
pub mod telemetry;

pub use config::{JobsConfig, RuntimeConfig};
pub use dedupe::{DispatchGuard, DispatchKey};
pub use jobs::{
    DispatchError, EvaluationTask, JobDispatcher, JobError, JobQueue, JobReceiver, JobWorker,
    TaskOutcome,
};
pub use orchestrator::{
    OrchestrationReport, Orchestrator, OrchestratorBuilder, ScoreSummary, StepOutcome, StepResult,
};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
pub use store::{ConfigStore, InMemoryStore, ResponseStore, StoreError};
pub use telemetry::init_tracing;

use thiserror::Error;

/// Runtime errors.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid runtime configuration: {0}")]
    Config(String),

    #[error("Orchestrator is missing a {0}")]
    NotConfigured(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_convert() {
        let err: RuntimeError = StoreError::Backend("disk full".into()).into();
        assert!(matches!(err, RuntimeError::Store(StoreError::Backend(_))));
        assert_eq!(err.to_string(), "Store error: Store backend failure: disk full");
    }

    #[test]
    fn test_missing_component_message() {
        let err = RuntimeError::NotConfigured("response store");
        assert_eq!(err.to_string(), "Orchestrator is missing a response store");
    }
}
