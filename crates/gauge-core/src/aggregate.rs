//! Score aggregation.
//!
//! Combines the evaluations of one response into a single 0-100 score.
//!
//! ## Rules
//!
//! - Every evaluation is normalized with its own recorded bounds
//! - Evaluations that do not normalize (degenerate range mismatch, non-finite
//!   score) are left out of every strategy and of weakest/strongest
//! - No contributing evaluation means no score, never a division by zero
//! - Evaluations with no matching enabled configuration (a manual review,
//!   say) still count, with one equal share of weight

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EvaluatorConfigSet;
use crate::types::{Evaluation, EvaluatorCategory, Response};

/// How a subject's evaluations combine into one score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    #[default]
    SimpleAverage,
    WeightedAverage,
    Minimum,
    Custom,
}

/// Hook for [`AggregationStrategy::Custom`].
///
/// Receives only contributing evaluations paired with their normalized
/// score; never called with an empty slice.
pub trait CustomAggregation: Send + Sync {
    fn aggregate(&self, scores: &[(&Evaluation, f64)], configs: &EvaluatorConfigSet) -> Option<f64>;
}

/// Per-evaluation line of a breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub evaluation_id: Uuid,
    pub evaluator_id: String,
    pub category: EvaluatorCategory,
    pub score: f64,

    /// `None` when the evaluation does not contribute
    pub normalized_score: Option<f64>,

    /// Effective share of the overall score; weighted strategy only
    pub weight_share: Option<f64>,

    pub passed: bool,
    pub feedback: Option<String>,
}

/// Aggregates evaluations under a subject's configuration.
#[derive(Clone, Copy)]
pub struct ScoreAggregator<'a> {
    configs: &'a EvaluatorConfigSet,
    strategy: AggregationStrategy,
    custom: Option<&'a dyn CustomAggregation>,
}

impl<'a> ScoreAggregator<'a> {
    /// Aggregator using the set's own strategy.
    pub fn new(configs: &'a EvaluatorConfigSet) -> Self {
        Self {
            configs,
            strategy: configs.strategy(),
            custom: None,
        }
    }

    pub fn with_strategy(mut self, strategy: AggregationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Install the hook used under [`AggregationStrategy::Custom`].
    pub fn with_custom(mut self, hook: &'a dyn CustomAggregation) -> Self {
        self.custom = Some(hook);
        self
    }

    pub fn strategy(&self) -> AggregationStrategy {
        self.strategy
    }

    /// Overall 0-100 score, or `None` when nothing contributes.
    pub fn overall_score(&self, evaluations: &[Evaluation]) -> Option<f64> {
        let scores = contributing(evaluations);
        if scores.is_empty() {
            return None;
        }

        let overall = match self.strategy {
            AggregationStrategy::SimpleAverage => Some(mean(&scores)),
            AggregationStrategy::Minimum => {
                Some(scores.iter().fold(f64::INFINITY, |min, (_, s)| min.min(*s)))
            }
            AggregationStrategy::WeightedAverage => Some(self.weighted_average(&scores)),
            AggregationStrategy::Custom => match self.custom {
                Some(hook) => hook.aggregate(&scores, self.configs),
                None => {
                    tracing::warn!(
                        subject = %self.configs.subject_id(),
                        "Custom aggregation selected without a hook, no overall score"
                    );
                    None
                }
            },
        };

        overall.filter(|s| s.is_finite())
    }

    /// Lowest-scoring contributing evaluation; the earliest wins ties.
    pub fn weakest_evaluation<'e>(&self, evaluations: &'e [Evaluation]) -> Option<&'e Evaluation> {
        contributing(evaluations)
            .into_iter()
            .fold(None::<(&Evaluation, f64)>, |best, (e, s)| match best {
                Some((_, b)) if b <= s => best,
                _ => Some((e, s)),
            })
            .map(|(e, _)| e)
    }

    /// Highest-scoring contributing evaluation; the earliest wins ties.
    pub fn strongest_evaluation<'e>(&self, evaluations: &'e [Evaluation]) -> Option<&'e Evaluation> {
        contributing(evaluations)
            .into_iter()
            .fold(None::<(&Evaluation, f64)>, |best, (e, s)| match best {
                Some((_, b)) if b >= s => best,
                _ => Some((e, s)),
            })
            .map(|(e, _)| e)
    }

    /// Whether the overall score exists and reaches `threshold`.
    pub fn passes_threshold(&self, evaluations: &[Evaluation], threshold: f64) -> bool {
        self.overall_score(evaluations)
            .is_some_and(|score| score >= threshold)
    }

    pub fn evaluation_breakdown(&self, evaluations: &[Evaluation]) -> Vec<BreakdownEntry> {
        let total_weight: f64 = match self.strategy {
            AggregationStrategy::WeightedAverage => contributing(evaluations)
                .iter()
                .map(|(e, _)| self.weight_for(e))
                .sum(),
            _ => 0.0,
        };

        evaluations
            .iter()
            .map(|e| {
                let normalized_score = e.normalized_score();
                let weight_share = (self.strategy == AggregationStrategy::WeightedAverage
                    && normalized_score.is_some())
                .then(|| {
                    if total_weight > 0.0 {
                        self.weight_for(e) / total_weight
                    } else {
                        0.0
                    }
                });

                BreakdownEntry {
                    evaluation_id: e.id,
                    evaluator_id: e.evaluator_id.clone(),
                    category: e.category,
                    score: e.score(),
                    normalized_score,
                    weight_share,
                    passed: e.passed(),
                    feedback: e.feedback().map(String::from),
                }
            })
            .collect()
    }

    /// Raw weight of one evaluation.
    ///
    /// Matched to an enabled configuration by evaluator key; anything
    /// unmatched gets one equal share of the enabled configurations.
    fn weight_for(&self, evaluation: &Evaluation) -> f64 {
        match self
            .configs
            .get_by_key(&evaluation.evaluator_id)
            .filter(|c| c.enabled)
        {
            Some(config) => self.configs.normalized_weight(config),
            None => 1.0 / self.configs.enabled().count().max(1) as f64,
        }
    }

    fn weighted_average(&self, scores: &[(&Evaluation, f64)]) -> f64 {
        let (weighted_sum, total_weight) =
            scores.iter().fold((0.0, 0.0), |(sum, total), (e, s)| {
                let w = self.weight_for(e);
                (sum + w * s, total + w)
            });

        if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            mean(scores)
        }
    }
}

impl std::fmt::Debug for ScoreAggregator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreAggregator")
            .field("subject", &self.configs.subject_id())
            .field("strategy", &self.strategy)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

fn contributing(evaluations: &[Evaluation]) -> Vec<(&Evaluation, f64)> {
    evaluations
        .iter()
        .filter_map(|e| e.normalized_score().map(|s| (e, s)))
        .collect()
}

fn mean(scores: &[(&Evaluation, f64)]) -> f64 {
    scores.iter().map(|(_, s)| s).sum::<f64>() / scores.len() as f64
}

/// A response together with its evaluations, scored by an aggregator.
#[derive(Debug)]
pub struct ScoredResponse<'a> {
    pub response: &'a Response,
    evaluations: Vec<Evaluation>,
    aggregator: ScoreAggregator<'a>,
}

impl<'a> ScoredResponse<'a> {
    /// Evaluations that belong to other responses are dropped.
    pub fn new(
        response: &'a Response,
        evaluations: impl IntoIterator<Item = Evaluation>,
        aggregator: ScoreAggregator<'a>,
    ) -> Self {
        let evaluations = evaluations
            .into_iter()
            .filter(|e| e.response_id == response.id)
            .collect();

        Self {
            response,
            evaluations,
            aggregator,
        }
    }

    pub fn evaluations(&self) -> &[Evaluation] {
        &self.evaluations
    }

    pub fn overall_score(&self) -> Option<f64> {
        self.aggregator.overall_score(&self.evaluations)
    }

    pub fn evaluation_breakdown(&self) -> Vec<BreakdownEntry> {
        self.aggregator.evaluation_breakdown(&self.evaluations)
    }

    pub fn passes_threshold(&self, threshold: f64) -> bool {
        self.aggregator.passes_threshold(&self.evaluations, threshold)
    }

    pub fn weakest_evaluation(&self) -> Option<&Evaluation> {
        self.aggregator.weakest_evaluation(&self.evaluations)
    }

    pub fn strongest_evaluation(&self) -> Option<&Evaluation> {
        self.aggregator.strongest_evaluation(&self.evaluations)
    }
}
