//! Shared data contract: responses, evaluations and the enums they carry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use crate::EvaluationExecutionError;

/// A generated text output that evaluators score.
///
/// Responses are created by the surrounding application; the engine only
/// reads them and appends evaluations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: Uuid,

    /// The prompt (or other owner) whose evaluator configuration applies
    pub subject_id: String,

    pub content: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, JsonValue>,

    pub created_at: DateTime<Utc>,
}

impl Response {
    pub fn new(subject_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            content: content.into(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Number of characters (not bytes) in the content.
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// Who or what produced an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvaluatorCategory {
    Human,
    Automated,
    LlmJudge,
}

/// Where the response under evaluation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationContext {
    TrackedCall,
    TestRun,
    Manual,
}

impl std::fmt::Display for EvaluationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TrackedCall => "tracked_call",
            Self::TestRun => "test_run",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Whether an evaluator runs inline or is handed to the job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Sync,
    Async,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

/// Declared score bounds of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl ScoreRange {
    /// The 0-100 range every normalized score lives in.
    pub const PERCENT: ScoreRange = ScoreRange { min: 0.0, max: 100.0 };

    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, score: f64) -> bool {
        score >= self.min && score <= self.max
    }

    /// Rescale a score to 0-100.
    ///
    /// A degenerate range (`min == max`) maps an exact match to 100 and
    /// anything else to `None`. Non-finite input is also `None`.
    pub fn normalize(&self, score: f64) -> Option<f64> {
        if !score.is_finite() || !self.min.is_finite() || !self.max.is_finite() {
            return None;
        }

        let span = self.max - self.min;
        if span == 0.0 {
            return (score == self.min).then_some(100.0);
        }

        Some(((score - self.min) / span * 100.0).clamp(0.0, 100.0))
    }
}

/// What a plugin hands back after scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub score: f64,
    pub score_min: f64,
    pub score_max: f64,
    pub passed: bool,
    pub feedback: Option<String>,
    pub criteria_scores: Option<BTreeMap<String, f64>>,
}

/// Errors on an already-recorded evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Evaluation {0} metadata has already been patched")]
    MetadataAlreadyPatched(Uuid),
}

/// The persisted outcome of one plugin invocation.
///
/// Score, range and feedback are fixed at creation. Metadata may be
/// extended exactly once afterwards, for execution bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub response_id: Uuid,
    pub category: EvaluatorCategory,

    /// Identity of the evaluator; the registry key of the plugin
    pub evaluator_id: String,

    score: f64,
    score_min: Option<f64>,
    score_max: Option<f64>,
    passed: bool,
    feedback: Option<String>,
    criteria_scores: Option<BTreeMap<String, f64>>,

    #[serde(default)]
    metadata: BTreeMap<String, JsonValue>,

    pub context: EvaluationContext,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    metadata_patched: bool,
}

impl Evaluation {
    /// Record a plugin's score card against a response.
    ///
    /// Rejects non-finite scores and scores outside the card's range.
    pub fn record(
        card: ScoreCard,
        response_id: Uuid,
        evaluator_id: impl Into<String>,
        category: EvaluatorCategory,
        context: EvaluationContext,
        metadata: BTreeMap<String, JsonValue>,
    ) -> Result<Self, EvaluationExecutionError> {
        if !card.score.is_finite() {
            return Err(EvaluationExecutionError::NonFiniteScore);
        }

        let range = ScoreRange::new(card.score_min, card.score_max);
        if !range.contains(card.score) {
            return Err(EvaluationExecutionError::ScoreOutOfRange {
                score: card.score,
                min: card.score_min,
                max: card.score_max,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            response_id,
            category,
            evaluator_id: evaluator_id.into(),
            score: card.score,
            score_min: Some(card.score_min),
            score_max: Some(card.score_max),
            passed: card.passed,
            feedback: card.feedback,
            criteria_scores: card.criteria_scores,
            metadata,
            context,
            created_at: Utc::now(),
            metadata_patched: false,
        })
    }

    /// A manually entered score with no declared bounds, taken as 0-100.
    pub fn manual(
        response_id: Uuid,
        evaluator_id: impl Into<String>,
        score: f64,
        feedback: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            response_id,
            category: EvaluatorCategory::Human,
            evaluator_id: evaluator_id.into(),
            score,
            score_min: None,
            score_max: None,
            passed: score >= 70.0,
            feedback,
            criteria_scores: None,
            metadata: BTreeMap::new(),
            context: EvaluationContext::Manual,
            created_at: Utc::now(),
            metadata_patched: false,
        }
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn score_min(&self) -> Option<f64> {
        self.score_min
    }

    pub fn score_max(&self) -> Option<f64> {
        self.score_max
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn feedback(&self) -> Option<&str> {
        self.feedback.as_deref()
    }

    pub fn criteria_scores(&self) -> Option<&BTreeMap<String, f64>> {
        self.criteria_scores.as_ref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, JsonValue> {
        &self.metadata
    }

    pub fn is_metadata_patched(&self) -> bool {
        self.metadata_patched
    }

    /// Score rescaled to 0-100 using this evaluation's own bounds.
    ///
    /// Without both bounds the score is taken to already be on 0-100.
    /// `None` means the evaluation does not contribute to aggregation.
    pub fn normalized_score(&self) -> Option<f64> {
        match (self.score_min, self.score_max) {
            (Some(min), Some(max)) => ScoreRange::new(min, max).normalize(self.score),
            _ => ScoreRange::PERCENT.normalize(self.score),
        }
    }

    /// Add execution bookkeeping (job id, timestamps) after creation.
    ///
    /// Allowed once; existing keys are overwritten, nothing else changes.
    pub fn patch_metadata(
        &mut self,
        entries: BTreeMap<String, JsonValue>,
    ) -> Result<(), RecordError> {
        if self.metadata_patched {
            return Err(RecordError::MetadataAlreadyPatched(self.id));
        }
        self.metadata.extend(entries);
        self.metadata_patched = true;
        Ok(())
    }
}
