//! Orchestrator for evaluation passes.
//!
//! `evaluate(response, context)` runs the subject's evaluators in two
//! phases:
//! 1. Independent evaluators, by priority
//! 2. Dependent evaluators, by priority, each only if its dependency gate is
//!    open at that moment
//!
//! Sync evaluators run inline, one after another. Async evaluators are
//! enqueued and run later through [`Orchestrator::run_task`]. A failing
//! plugin is logged and recorded in the report; it never stops the pass.
//!
//! Passes are not serialized per response. Every successful invocation
//! appends a new evaluation, so overlapping passes can record duplicates.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use gauge_core::{
    AggregationStrategy, BreakdownEntry, ConfigurationError, CustomAggregation, Evaluation,
    EvaluationContext, EvaluationExecutionError, EvaluatorConfig, EvaluatorConfigSet,
    ExecutionPlan, Phase, PluginRegistry, Response, RunMode, ScoreAggregator, ScoreCard,
    ScoredResponse,
};

use crate::config::RuntimeConfig;
use crate::dedupe::{DispatchGuard, DispatchKey};
use crate::jobs::{EvaluationTask, JobDispatcher, JobError, TaskOutcome};
use crate::resilience::CircuitBreaker;
use crate::store::{ConfigStore, ResponseStore};
use crate::RuntimeError;

const DEDUPE_CAPACITY: u64 = 100_000;

/// What happened to one planned evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepResult {
    /// Sync evaluator ran and its evaluation was appended
    Recorded { evaluation_id: Uuid },

    /// Async evaluator was handed to the job dispatcher
    Enqueued { task_id: Uuid },

    SkippedDependencyUnmet,
    SkippedCircuitOpen,

    /// Same async evaluation already enqueued within the dedupe window
    SkippedDuplicate,

    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub config_id: u64,
    pub evaluator_key: String,
    pub phase: Phase,
    pub run_mode: RunMode,
    pub result: StepResult,
}

/// Outcome of one [`Orchestrator::evaluate`] call, in run order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationReport {
    pub response_id: Uuid,
    pub context: EvaluationContext,
    pub steps: Vec<StepOutcome>,
}

impl OrchestrationReport {
    fn new(response_id: Uuid, context: EvaluationContext) -> Self {
        Self {
            response_id,
            context,
            steps: Vec::new(),
        }
    }

    fn push(&mut self, config: &EvaluatorConfig, phase: Phase, result: StepResult) {
        self.steps.push(StepOutcome {
            config_id: config.id,
            evaluator_key: config.evaluator_key.clone(),
            phase,
            run_mode: config.run_mode,
            result,
        });
    }

    /// Ids of evaluations recorded during the pass.
    pub fn evaluation_ids(&self) -> Vec<Uuid> {
        self.steps
            .iter()
            .filter_map(|s| match s.result {
                StepResult::Recorded { evaluation_id } => Some(evaluation_id),
                _ => None,
            })
            .collect()
    }

    pub fn recorded(&self) -> usize {
        self.count(|r| matches!(r, StepResult::Recorded { .. }))
    }

    pub fn enqueued(&self) -> usize {
        self.count(|r| matches!(r, StepResult::Enqueued { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| {
            matches!(
                r,
                StepResult::SkippedDependencyUnmet
                    | StepResult::SkippedCircuitOpen
                    | StepResult::SkippedDuplicate
            )
        })
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, StepResult::Failed { .. }))
    }

    pub fn step(&self, evaluator_key: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.evaluator_key == evaluator_key)
    }

    fn count(&self, predicate: impl Fn(&StepResult) -> bool) -> usize {
        self.steps.iter().filter(|s| predicate(&s.result)).count()
    }
}

/// Aggregated view of a response's current evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub response_id: Uuid,
    pub strategy: AggregationStrategy,
    pub overall_score: Option<f64>,
    pub weakest_evaluation: Option<Uuid>,
    pub strongest_evaluation: Option<Uuid>,
    pub breakdown: Vec<BreakdownEntry>,
}

impl ScoreSummary {
    pub fn passes_threshold(&self, threshold: f64) -> bool {
        self.overall_score.is_some_and(|score| score >= threshold)
    }
}

/// Runs evaluation passes and deferred evaluation jobs.
pub struct Orchestrator {
    registry: Arc<PluginRegistry>,
    responses: Arc<dyn ResponseStore>,
    configs: Arc<dyn ConfigStore>,
    dispatcher: Option<Arc<dyn JobDispatcher>>,
    custom_aggregation: Option<Arc<dyn CustomAggregation>>,
    circuit_breaker: Option<CircuitBreaker>,
    dedupe: Option<DispatchGuard>,
    config: RuntimeConfig,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Present only when `circuit_breaker` is set in the runtime config.
    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.circuit_breaker.as_ref()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run one evaluation pass over `response`.
    ///
    /// A subject without a configuration set yields an empty report. Only
    /// store failures abort the pass; plugin failures are per step.
    pub async fn evaluate(
        &self,
        response: &Response,
        context: EvaluationContext,
    ) -> Result<OrchestrationReport, RuntimeError> {
        let mut report = OrchestrationReport::new(response.id, context);

        let Some(configs) = self.configs.config_set(&response.subject_id).await? else {
            tracing::debug!(
                response_id = %response.id,
                subject = %response.subject_id,
                "No evaluator configuration for subject"
            );
            return Ok(report);
        };

        let plan = ExecutionPlan::build(&configs);

        for config in &plan.independent {
            let result = self
                .dispatch(response, config, Phase::Independent, context)
                .await;
            report.push(config, Phase::Independent, result);
        }

        for config in &plan.dependent {
            // Re-read so earlier steps of this pass are visible to the gate
            let evaluations = self.responses.evaluations_for(response.id).await?;

            let result = if configs.dependency_met(config, &evaluations) {
                self.dispatch(response, config, Phase::Dependent, context)
                    .await
            } else {
                tracing::info!(
                    response_id = %response.id,
                    evaluator = %config.evaluator_key,
                    depends_on = config.depends_on.as_deref().unwrap_or_default(),
                    threshold = config.dependency_threshold(),
                    "Dependency not met, skipping evaluator"
                );
                StepResult::SkippedDependencyUnmet
            };
            report.push(config, Phase::Dependent, result);
        }

        tracing::info!(
            response_id = %response.id,
            subject = %response.subject_id,
            context = %context,
            recorded = report.recorded(),
            enqueued = report.enqueued(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Evaluation pass complete"
        );

        Ok(report)
    }

    /// Execute a deferred task. Called by the job worker.
    ///
    /// The response and configuration are resolved again, since either may
    /// have changed since the task was enqueued.
    pub async fn run_task(&self, task: &EvaluationTask) -> Result<TaskOutcome, JobError> {
        let response = self
            .responses
            .response(task.response_id)
            .await?
            .ok_or(JobError::ResponseNotFound(task.response_id))?;

        let configs = self
            .configs
            .config_set(&response.subject_id)
            .await?
            .ok_or_else(|| JobError::ConfigSetNotFound(response.subject_id.clone()))?;

        let config = configs
            .get(task.config_id)
            .ok_or(JobError::ConfigNotFound(task.config_id))?;

        if !config.enabled {
            tracing::info!(
                task_id = %task.task_id,
                evaluator = %config.evaluator_key,
                "Evaluator disabled since enqueue, skipping"
            );
            return Ok(TaskOutcome::SkippedDisabled);
        }

        if task.recheck_dependency {
            let evaluations = self.responses.evaluations_for(response.id).await?;
            if !configs.dependency_met(config, &evaluations) {
                tracing::info!(
                    task_id = %task.task_id,
                    evaluator = %config.evaluator_key,
                    "Dependency not met at run time, skipping"
                );
                return Ok(TaskOutcome::SkippedDependencyUnmet);
            }
        }

        let phase = if config.has_dependency() {
            Phase::Dependent
        } else {
            Phase::Independent
        };

        let evaluation = match self.execute(&response, config, phase, task.context) {
            Ok(evaluation) => {
                self.record_circuit(&config.evaluator_key, true);
                evaluation
            }
            Err(error) => {
                self.record_circuit(&config.evaluator_key, false);
                return Err(error);
            }
        };

        let evaluation_id = evaluation.id;
        self.responses.append(evaluation).await?;

        // The evaluation exists now; a failed patch must not trigger a retry
        let patch = BTreeMap::from([
            ("job_id".to_string(), JsonValue::from(task.task_id.to_string())),
            ("completed_at".to_string(), JsonValue::from(Utc::now().to_rfc3339())),
        ]);
        if let Err(error) = self.responses.patch_metadata(evaluation_id, patch).await {
            tracing::warn!(
                evaluation_id = %evaluation_id,
                error = %error,
                "Failed to attach job metadata to evaluation"
            );
        }

        Ok(TaskOutcome::Recorded { evaluation_id })
    }

    /// Aggregate the evaluations currently recorded for `response`.
    ///
    /// Uses the subject's strategy, or a simple average when the subject has
    /// no configuration.
    pub async fn summary(&self, response: &Response) -> Result<ScoreSummary, RuntimeError> {
        let configs = self
            .configs
            .config_set(&response.subject_id)
            .await?
            .unwrap_or_else(|| EvaluatorConfigSet::new(response.subject_id.clone()));
        let evaluations = self.responses.evaluations_for(response.id).await?;

        let mut aggregator = ScoreAggregator::new(&configs);
        if let Some(hook) = &self.custom_aggregation {
            aggregator = aggregator.with_custom(&**hook);
        }
        let scored = ScoredResponse::new(response, evaluations, aggregator);

        Ok(ScoreSummary {
            response_id: response.id,
            strategy: configs.strategy(),
            overall_score: scored.overall_score(),
            weakest_evaluation: scored.weakest_evaluation().map(|e| e.id),
            strongest_evaluation: scored.strongest_evaluation().map(|e| e.id),
            breakdown: scored.evaluation_breakdown(),
        })
    }

    async fn dispatch(
        &self,
        response: &Response,
        config: &EvaluatorConfig,
        phase: Phase,
        context: EvaluationContext,
    ) -> StepResult {
        match config.run_mode {
            RunMode::Sync => self.run_sync(response, config, phase, context).await,
            RunMode::Async => self.enqueue(response, config, phase, context).await,
        }
    }

    async fn run_sync(
        &self,
        response: &Response,
        config: &EvaluatorConfig,
        phase: Phase,
        context: EvaluationContext,
    ) -> StepResult {
        let key = config.evaluator_key.as_str();

        if self.circuit_open(key) {
            tracing::warn!(
                response_id = %response.id,
                evaluator = %key,
                "Circuit open, skipping evaluator"
            );
            return StepResult::SkippedCircuitOpen;
        }

        let evaluation = match self.execute(response, config, phase, context) {
            Ok(evaluation) => evaluation,
            Err(error) => {
                self.record_circuit(key, false);
                tracing::warn!(
                    response_id = %response.id,
                    evaluator = %key,
                    error = %error,
                    "Evaluator failed"
                );
                return StepResult::Failed {
                    error: error.to_string(),
                };
            }
        };
        self.record_circuit(key, true);

        let evaluation_id = evaluation.id;
        match self.responses.append(evaluation).await {
            Ok(()) => StepResult::Recorded { evaluation_id },
            Err(error) => {
                tracing::warn!(
                    response_id = %response.id,
                    evaluator = %key,
                    error = %error,
                    "Failed to store evaluation"
                );
                StepResult::Failed {
                    error: error.to_string(),
                }
            }
        }
    }

    async fn enqueue(
        &self,
        response: &Response,
        config: &EvaluatorConfig,
        phase: Phase,
        context: EvaluationContext,
    ) -> StepResult {
        let Some(dispatcher) = &self.dispatcher else {
            tracing::warn!(
                evaluator = %config.evaluator_key,
                "Async evaluator configured but no job dispatcher installed"
            );
            return StepResult::Failed {
                error: "no job dispatcher configured".to_string(),
            };
        };

        let key = DispatchKey {
            response_id: response.id,
            config_id: config.id,
            context,
        };

        if let Some(guard) = &self.dedupe {
            if !guard.claim(key.clone()).await {
                tracing::debug!(
                    response_id = %response.id,
                    evaluator = %config.evaluator_key,
                    "Evaluation already enqueued, skipping duplicate"
                );
                return StepResult::SkippedDuplicate;
            }
        }

        let task = EvaluationTask::new(response.id, config.id, context, phase == Phase::Dependent);
        let task_id = task.task_id;

        match dispatcher.enqueue(task) {
            Ok(()) => {
                tracing::debug!(
                    response_id = %response.id,
                    evaluator = %config.evaluator_key,
                    task_id = %task_id,
                    "Enqueued evaluation job"
                );
                StepResult::Enqueued { task_id }
            }
            Err(error) => {
                if let Some(guard) = &self.dedupe {
                    guard.release(&key).await;
                }
                tracing::warn!(
                    response_id = %response.id,
                    evaluator = %config.evaluator_key,
                    error = %error,
                    "Failed to enqueue evaluation job"
                );
                StepResult::Failed {
                    error: error.to_string(),
                }
            }
        }
    }

    fn circuit_open(&self, evaluator: &str) -> bool {
        self.circuit_breaker
            .as_ref()
            .is_some_and(|breaker| breaker.is_open(evaluator))
    }

    fn record_circuit(&self, evaluator: &str, succeeded: bool) {
        match &self.circuit_breaker {
            Some(breaker) if succeeded => breaker.record_success(evaluator),
            Some(breaker) => breaker.record_failure(evaluator),
            None => {}
        }
    }

    /// Build, score and record one evaluator against a response.
    ///
    /// Panics in plugin code are caught and reported as execution errors.
    fn execute(
        &self,
        response: &Response,
        config: &EvaluatorConfig,
        phase: Phase,
        context: EvaluationContext,
    ) -> Result<Evaluation, JobError> {
        let key = config.evaluator_key.as_str();
        let category = self
            .registry
            .get(key)
            .map(|metadata| metadata.category)
            .ok_or_else(|| ConfigurationError::UnknownEvaluator(key.to_string()))?;

        let card = panic::catch_unwind(AssertUnwindSafe(|| -> Result<ScoreCard, JobError> {
            let scorer = self.registry.build(key, response, &config.params)?;
            Ok(scorer.evaluate()?)
        }))
        .map_err(|payload| EvaluationExecutionError::Panicked(panic_message(payload.as_ref())))??;

        let metadata = BTreeMap::from([
            ("config_id".to_string(), JsonValue::from(config.id)),
            ("run_mode".to_string(), JsonValue::from(config.run_mode.as_str())),
            ("phase".to_string(), JsonValue::from(phase.as_str())),
        ]);

        Ok(Evaluation::record(
            card,
            response.id,
            key,
            category,
            context,
            metadata,
        )?)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("async_dispatch", &self.dispatcher.is_some())
            .field("dedupe", &self.dedupe.is_some())
            .field("config", &self.config)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builder for [`Orchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    registry: Option<Arc<PluginRegistry>>,
    responses: Option<Arc<dyn ResponseStore>>,
    configs: Option<Arc<dyn ConfigStore>>,
    dispatcher: Option<Arc<dyn JobDispatcher>>,
    custom_aggregation: Option<Arc<dyn CustomAggregation>>,
    config: RuntimeConfig,
}

impl OrchestratorBuilder {
    pub fn registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn response_store(mut self, store: Arc<dyn ResponseStore>) -> Self {
        self.responses = Some(store);
        self
    }

    pub fn config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.configs = Some(store);
        self
    }

    /// Use one value as both response and configuration store.
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: ResponseStore + ConfigStore + 'static,
    {
        self.response_store(store.clone()).config_store(store)
    }

    /// Required only when some evaluator runs async.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn custom_aggregation(mut self, hook: Arc<dyn CustomAggregation>) -> Self {
        self.custom_aggregation = Some(hook);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Orchestrator, RuntimeError> {
        let registry = self.registry.ok_or(RuntimeError::NotConfigured("plugin registry"))?;
        let responses = self.responses.ok_or(RuntimeError::NotConfigured("response store"))?;
        let configs = self.configs.ok_or(RuntimeError::NotConfigured("config store"))?;

        let dedupe = self
            .config
            .dispatch_dedupe_ttl
            .map(|ttl| DispatchGuard::new(DEDUPE_CAPACITY, ttl));

        Ok(Orchestrator {
            registry,
            responses,
            configs,
            dispatcher: self.dispatcher,
            custom_aggregation: self.custom_aggregation,
            circuit_breaker: self.config.circuit_breaker.clone().map(CircuitBreaker::new),
            dedupe,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use gauge_core::NewEvaluatorConfig;

    fn orchestrator(store: Arc<InMemoryStore>) -> Orchestrator {
        Orchestrator::builder()
            .registry(Arc::new(PluginRegistry::with_builtins().unwrap()))
            .store(store)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_registry() {
        let err = Orchestrator::builder()
            .store(Arc::new(InMemoryStore::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::NotConfigured("plugin registry")));
    }

    #[test]
    fn test_circuit_breaker_is_opt_in() {
        let store = Arc::new(InMemoryStore::new());
        assert!(orchestrator(store.clone()).circuit_breaker().is_none());

        let config = RuntimeConfig {
            circuit_breaker: Some(Default::default()),
            ..RuntimeConfig::default()
        };
        let orchestrator = Orchestrator::builder()
            .registry(Arc::new(PluginRegistry::with_builtins().unwrap()))
            .store(store)
            .config(config)
            .build()
            .unwrap();
        assert!(orchestrator.circuit_breaker().is_some());
    }

    #[tokio::test]
    async fn test_unconfigured_subject_yields_empty_report() {
        let store = Arc::new(InMemoryStore::new());
        let response = Response::new("unknown-prompt", "hello");

        let report = orchestrator(store)
            .evaluate(&response, EvaluationContext::Manual)
            .await
            .unwrap();
        assert!(report.steps.is_empty());
    }

    #[tokio::test]
    async fn test_sync_evaluation_records_metadata() {
        let store = Arc::new(InMemoryStore::new());
        let registry = PluginRegistry::with_builtins().unwrap();
        store
            .update_config_set("prompt-1", |set| {
                set.create(NewEvaluatorConfig::new("length"), &registry).map(|_| ())
            })
            .unwrap();

        let response = Response::new("prompt-1", "x".repeat(100));
        store.insert_response(response.clone());

        let orchestrator = orchestrator(store.clone());
        let report = orchestrator
            .evaluate(&response, EvaluationContext::TrackedCall)
            .await
            .unwrap();
        assert_eq!(report.recorded(), 1);

        let evaluations = store.evaluations_for(response.id).await.unwrap();
        let evaluation = &evaluations[0];
        assert_eq!(evaluation.evaluator_id, "length");
        assert_eq!(evaluation.score(), 100.0);
        assert_eq!(evaluation.context, EvaluationContext::TrackedCall);
        assert_eq!(evaluation.metadata()["run_mode"], "sync");
        assert_eq!(evaluation.metadata()["phase"], "independent");
        assert!(!evaluation.is_metadata_patched());

        let summary = orchestrator.summary(&response).await.unwrap();
        assert_eq!(summary.overall_score, Some(100.0));
        assert!(summary.passes_threshold(90.0));
    }

    #[tokio::test]
    async fn test_async_without_dispatcher_fails_step() {
        let store = Arc::new(InMemoryStore::new());
        let registry = PluginRegistry::with_builtins().unwrap();
        store
            .update_config_set("prompt-1", |set| {
                set.create(
                    NewEvaluatorConfig::new("pii").run_mode(RunMode::Async),
                    &registry,
                )
                .map(|_| ())
            })
            .unwrap();

        let response = Response::new("prompt-1", "hello");
        let report = orchestrator(store)
            .evaluate(&response, EvaluationContext::TestRun)
            .await
            .unwrap();

        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
