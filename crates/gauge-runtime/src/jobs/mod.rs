//! Deferred evaluation jobs.
//!
//! Async evaluators are not run during a pass. The orchestrator hands an
//! [`EvaluationTask`] to a [`JobDispatcher`] and moves on; a [`JobWorker`]
//! later calls back into [`Orchestrator::run_task`](crate::Orchestrator::run_task),
//! retrying transient failures with bounded exponential backoff.

mod queue;
mod worker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use gauge_core::{ConfigurationError, EvaluationContext, EvaluationExecutionError};

use crate::store::StoreError;

pub use queue::{JobQueue, JobReceiver};
pub use worker::JobWorker;

/// One deferred plugin invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationTask {
    pub task_id: Uuid,
    pub response_id: Uuid,
    pub config_id: u64,
    pub context: EvaluationContext,

    /// Re-check the dependency gate before running
    pub recheck_dependency: bool,

    pub enqueued_at: DateTime<Utc>,
}

impl EvaluationTask {
    pub fn new(
        response_id: Uuid,
        config_id: u64,
        context: EvaluationContext,
        recheck_dependency: bool,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            response_id,
            config_id,
            context,
            recheck_dependency,
            enqueued_at: Utc::now(),
        }
    }
}

/// Why a task could not be enqueued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Job queue is full")]
    QueueFull,

    #[error("Job queue is closed")]
    QueueClosed,
}

/// Hands tasks to whatever runs them. Must not block.
pub trait JobDispatcher: Send + Sync {
    fn enqueue(&self, task: EvaluationTask) -> Result<(), DispatchError>;
}

/// Why a deferred task did not record an evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("Response {0} no longer exists")]
    ResponseNotFound(Uuid),

    #[error("No evaluator configuration for subject '{0}'")]
    ConfigSetNotFound(String),

    #[error("Evaluator configuration {0} no longer exists")]
    ConfigNotFound(u64),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Execution(#[from] EvaluationExecutionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobError {
    /// Whether another attempt could succeed.
    ///
    /// Plugin scoring failures and store backend failures are treated as
    /// transient. Missing records, bad configuration, panics and invalid
    /// scores are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Execution(EvaluationExecutionError::Scoring(_))
                | Self::Store(StoreError::Backend(_))
        )
    }
}

/// What a deferred task did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Recorded { evaluation_id: Uuid },
    SkippedDisabled,
    SkippedDependencyUnmet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(JobError::Execution(EvaluationExecutionError::Scoring("timeout".into())).is_retryable());
        assert!(JobError::Store(StoreError::Backend("connection reset".into())).is_retryable());

        assert!(!JobError::ResponseNotFound(Uuid::new_v4()).is_retryable());
        assert!(!JobError::ConfigNotFound(7).is_retryable());
        assert!(!JobError::Execution(EvaluationExecutionError::NonFiniteScore).is_retryable());
        assert!(!JobError::Execution(EvaluationExecutionError::Panicked("boom".into())).is_retryable());
    }

    #[test]
    fn test_task_serializes() {
        let task = EvaluationTask::new(Uuid::new_v4(), 3, EvaluationContext::TrackedCall, true);
        let json = serde_json::to_value(&task).unwrap();

        assert_eq!(json["config_id"], 3);
        assert_eq!(json["context"], "tracked_call");
        assert_eq!(json["recheck_dependency"], true);
    }
}
