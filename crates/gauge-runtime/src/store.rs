//! Storage collaborators.
//!
//! The engine does not own persistence. It reads responses and
//! configuration sets, appends evaluations, and patches an evaluation's
//! metadata at most once. [`InMemoryStore`] implements both traits for
//! tests and single-process deployments.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use gauge_core::{ConfigurationError, Evaluation, EvaluatorConfigSet, RecordError, Response};

/// Errors from a store backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Evaluation {0} not found")]
    EvaluationNotFound(Uuid),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("Store backend failure: {0}")]
    Backend(String),
}

/// Responses and their append-only evaluations.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn response(&self, id: Uuid) -> Result<Option<Response>, StoreError>;

    async fn append(&self, evaluation: Evaluation) -> Result<(), StoreError>;

    /// Evaluations of a response in insertion order.
    async fn evaluations_for(&self, response_id: Uuid) -> Result<Vec<Evaluation>, StoreError>;

    /// Apply the single metadata patch an evaluation allows.
    async fn patch_metadata(
        &self,
        evaluation_id: Uuid,
        entries: BTreeMap<String, JsonValue>,
    ) -> Result<(), StoreError>;
}

/// Per-subject evaluator configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn config_set(&self, subject_id: &str) -> Result<Option<EvaluatorConfigSet>, StoreError>;
}

/// Both stores held in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    responses: RwLock<HashMap<Uuid, Response>>,
    evaluations: RwLock<HashMap<Uuid, Vec<Evaluation>>>,
    config_sets: RwLock<HashMap<String, EvaluatorConfigSet>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_response(&self, response: Response) {
        self.responses.write().insert(response.id, response);
    }

    /// Store or replace a subject's configuration set.
    pub fn put_config_set(&self, set: EvaluatorConfigSet) {
        self.config_sets
            .write()
            .insert(set.subject_id().to_string(), set);
    }

    /// Edit a subject's configuration set in place, starting from an empty
    /// one for a new subject. A new subject is stored only if the edit
    /// succeeds.
    pub fn update_config_set<R>(
        &self,
        subject_id: &str,
        edit: impl FnOnce(&mut EvaluatorConfigSet) -> Result<R, ConfigurationError>,
    ) -> Result<R, ConfigurationError> {
        let mut sets = self.config_sets.write();
        if let Some(set) = sets.get_mut(subject_id) {
            return edit(set);
        }

        let mut set = EvaluatorConfigSet::new(subject_id);
        let result = edit(&mut set)?;
        sets.insert(subject_id.to_string(), set);
        Ok(result)
    }

    /// Every evaluation across all responses.
    pub fn evaluation_count(&self) -> usize {
        self.evaluations.read().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ResponseStore for InMemoryStore {
    async fn response(&self, id: Uuid) -> Result<Option<Response>, StoreError> {
        Ok(self.responses.read().get(&id).cloned())
    }

    async fn append(&self, evaluation: Evaluation) -> Result<(), StoreError> {
        self.evaluations
            .write()
            .entry(evaluation.response_id)
            .or_default()
            .push(evaluation);
        Ok(())
    }

    async fn evaluations_for(&self, response_id: Uuid) -> Result<Vec<Evaluation>, StoreError> {
        Ok(self
            .evaluations
            .read()
            .get(&response_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn patch_metadata(
        &self,
        evaluation_id: Uuid,
        entries: BTreeMap<String, JsonValue>,
    ) -> Result<(), StoreError> {
        let mut evaluations = self.evaluations.write();
        let evaluation = evaluations
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|e| e.id == evaluation_id)
            .ok_or(StoreError::EvaluationNotFound(evaluation_id))?;

        evaluation.patch_metadata(entries)?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for InMemoryStore {
    async fn config_set(&self, subject_id: &str) -> Result<Option<EvaluatorConfigSet>, StoreError> {
        Ok(self.config_sets.read().get(subject_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauge_core::{NewEvaluatorConfig, PluginRegistry};

    fn entries(key: &str, value: &str) -> BTreeMap<String, JsonValue> {
        BTreeMap::from([(key.to_string(), JsonValue::from(value))])
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = InMemoryStore::new();
        let response = Response::new("prompt-1", "hello");
        store.insert_response(response.clone());

        let first = Evaluation::manual(response.id, "reviewer", 40.0, None);
        let second = Evaluation::manual(response.id, "reviewer", 90.0, None);
        store.append(first.clone()).await.unwrap();
        store.append(second.clone()).await.unwrap();

        let stored = store.evaluations_for(response.id).await.unwrap();
        assert_eq!(stored, vec![first, second]);
        assert_eq!(store.response(response.id).await.unwrap(), Some(response));
    }

    #[tokio::test]
    async fn test_unknown_response_is_none() {
        let store = InMemoryStore::new();
        assert!(store.response(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.evaluations_for(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_patch_metadata_once() {
        let store = InMemoryStore::new();
        let evaluation = Evaluation::manual(Uuid::new_v4(), "reviewer", 80.0, None);
        let id = evaluation.id;
        let response_id = evaluation.response_id;
        store.append(evaluation).await.unwrap();

        store.patch_metadata(id, entries("job_id", "j-1")).await.unwrap();
        let err = store
            .patch_metadata(id, entries("job_id", "j-2"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Record(RecordError::MetadataAlreadyPatched(id)));

        let stored = store.evaluations_for(response_id).await.unwrap();
        assert_eq!(stored[0].metadata()["job_id"], "j-1");
    }

    #[tokio::test]
    async fn test_patch_unknown_evaluation() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let err = store.patch_metadata(id, BTreeMap::new()).await.unwrap_err();
        assert_eq!(err, StoreError::EvaluationNotFound(id));
    }

    #[tokio::test]
    async fn test_update_config_set() {
        let store = InMemoryStore::new();
        let registry = PluginRegistry::with_builtins().unwrap();

        let id = store
            .update_config_set("prompt-1", |set| {
                set.create(NewEvaluatorConfig::new("length"), &registry)
                    .map(|c| c.id)
            })
            .unwrap();

        let failed = store.update_config_set("prompt-1", |set| {
            set.create(NewEvaluatorConfig::new("length"), &registry)
                .map(|c| c.id)
        });
        assert!(failed.is_err());

        let set = store.config_set("prompt-1").await.unwrap().unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get(id).is_some());
    }

    #[tokio::test]
    async fn test_failed_edit_does_not_create_subject() {
        let store = InMemoryStore::new();
        let registry = PluginRegistry::with_builtins().unwrap();

        let failed = store.update_config_set("prompt-2", |set| {
            set.create(NewEvaluatorConfig::new("missing-plugin"), &registry)
                .map(|c| c.id)
        });
        assert!(matches!(failed, Err(ConfigurationError::UnknownEvaluator(_))));
        assert!(store.config_set("prompt-2").await.unwrap().is_none());
    }
}
