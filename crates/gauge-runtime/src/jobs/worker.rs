//! Worker that drains a [`JobReceiver`] into the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::JobsConfig;
use crate::orchestrator::Orchestrator;

use super::{EvaluationTask, JobError, JobReceiver, TaskOutcome};

/// Runs deferred evaluations on the tokio runtime.
///
/// Up to `concurrency` tasks run at once. Each task is retried while its
/// error is retryable, up to the configured attempts; after that it is
/// logged and dropped without recording anything.
#[derive(Debug)]
pub struct JobWorker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl JobWorker {
    pub fn spawn(receiver: JobReceiver, orchestrator: Arc<Orchestrator>, config: JobsConfig) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(receiver, orchestrator, config, shutdown_rx));
        Self { shutdown, handle }
    }

    /// Stop accepting tasks, finish the buffered and in-flight ones, then return.
    pub async fn shutdown(self) {
        let Self { shutdown, handle } = self;
        let _ = shutdown.send(());

        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Job worker terminated abnormally");
        }
    }
}

async fn run(
    mut receiver: JobReceiver,
    orchestrator: Arc<Orchestrator>,
    config: JobsConfig,
    mut shutdown: oneshot::Receiver<()>,
) {
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut in_flight = JoinSet::new();
    let mut closing = false;

    loop {
        let next = if closing {
            receiver.recv().await
        } else {
            tokio::select! {
                _ = &mut shutdown => {
                    receiver.close();
                    closing = true;
                    continue;
                }
                task = receiver.recv() => task,
            }
        };

        let Some(task) = next else { break };

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };

        let orchestrator = orchestrator.clone();
        let backoff = config.retry.backoff();
        in_flight.spawn(async move {
            let _permit = permit;
            process(&orchestrator, task, backoff).await;
        });

        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    tracing::debug!("Job worker stopped");
}

async fn process(orchestrator: &Orchestrator, task: EvaluationTask, backoff: ExponentialBuilder) {
    let task = &task;

    let result = (|| async move { orchestrator.run_task(task).await })
        .retry(backoff)
        .when(JobError::is_retryable)
        .notify(|error: &JobError, delay: Duration| {
            tracing::warn!(
                task_id = %task.task_id,
                config_id = task.config_id,
                error = %error,
                retry_in = ?delay,
                "Evaluation job failed, retrying"
            );
        })
        .await;

    match result {
        Ok(TaskOutcome::Recorded { evaluation_id }) => {
            tracing::debug!(
                task_id = %task.task_id,
                evaluation_id = %evaluation_id,
                "Evaluation job recorded"
            );
        }
        Ok(outcome) => {
            tracing::info!(task_id = %task.task_id, outcome = ?outcome, "Evaluation job skipped");
        }
        Err(error) => {
            tracing::error!(
                task_id = %task.task_id,
                response_id = %task.response_id,
                config_id = task.config_id,
                error = %error,
                "Evaluation job abandoned"
            );
        }
    }
}
