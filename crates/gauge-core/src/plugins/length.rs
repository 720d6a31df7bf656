//! Length plugin
//!
//! Scores the character count of a response against hard bounds
//! (`min`/`max`) and an ideal window (`ideal_min`/`ideal_max`).
//!
//! | Length | Score |
//! |--------|-------|
//! | inside the ideal window | 100 |
//! | between `min` and `ideal_min` | 50 rising to 100 |
//! | between `ideal_max` and `max` | 100 falling to 50 |
//! | below `min` | 20 |
//! | above `max` | 30 |

use crate::registry::{ParamKind, ParamSchema, ParamSpec, Params, PluginMetadata, Scorer, ScorerFactory};
use crate::types::{EvaluatorCategory, Response};
use crate::{ConfigurationError, EvaluationExecutionError};

use super::{invalid_params, BuiltinPlugin};

const TOO_SHORT_SCORE: f64 = 20.0;
const TOO_LONG_SCORE: f64 = 30.0;
const EDGE_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct LengthBounds {
    min: usize,
    max: usize,
    ideal_min: usize,
    ideal_max: usize,
}

/// Factory for [`LengthScorer`].
#[derive(Debug, Default)]
pub struct LengthPlugin;

impl BuiltinPlugin for LengthPlugin {
    const KEY: &'static str = "length";

    fn metadata() -> PluginMetadata {
        PluginMetadata::new("Response Length", EvaluatorCategory::Automated)
            .description("Scores character count against hard and ideal bounds")
            .params(
                ParamSchema::new()
                    .field(
                        ParamSpec::new("min", ParamKind::Integer)
                            .with_default(10)
                            .describe("Shortest acceptable length"),
                    )
                    .field(
                        ParamSpec::new("max", ParamKind::Integer)
                            .with_default(2000)
                            .describe("Longest acceptable length"),
                    )
                    .field(ParamSpec::new("ideal_min", ParamKind::Integer).with_default(50))
                    .field(ParamSpec::new("ideal_max", ParamKind::Integer).with_default(500)),
            )
    }
}

impl ScorerFactory for LengthPlugin {
    fn build(
        &self,
        response: &Response,
        params: &Params,
    ) -> Result<Box<dyn Scorer>, ConfigurationError> {
        let read = |name: &str| -> Result<usize, ConfigurationError> {
            let value = params
                .integer(name)
                .ok_or_else(|| invalid_params(Self::KEY, format!("'{name}' is required")))?;
            usize::try_from(value)
                .map_err(|_| invalid_params(Self::KEY, format!("'{name}' must not be negative")))
        };

        let bounds = LengthBounds {
            min: read("min")?,
            max: read("max")?,
            ideal_min: read("ideal_min")?,
            ideal_max: read("ideal_max")?,
        };

        if !(bounds.min <= bounds.ideal_min
            && bounds.ideal_min <= bounds.ideal_max
            && bounds.ideal_max <= bounds.max)
        {
            return Err(invalid_params(
                Self::KEY,
                "bounds must satisfy min <= ideal_min <= ideal_max <= max",
            ));
        }

        Ok(Box::new(LengthScorer {
            length: response.char_count(),
            bounds,
        }))
    }
}

/// Scores one response's length.
#[derive(Debug)]
pub struct LengthScorer {
    length: usize,
    bounds: LengthBounds,
}

impl LengthScorer {
    fn score(&self) -> f64 {
        let b = &self.bounds;
        let len = self.length;

        if len < b.min {
            TOO_SHORT_SCORE
        } else if len > b.max {
            TOO_LONG_SCORE
        } else if len < b.ideal_min {
            let progress = (len - b.min) as f64 / (b.ideal_min - b.min) as f64;
            EDGE_SCORE + (100.0 - EDGE_SCORE) * progress
        } else if len > b.ideal_max {
            let overshoot = (len - b.ideal_max) as f64 / (b.max - b.ideal_max) as f64;
            100.0 - (100.0 - EDGE_SCORE) * overshoot
        } else {
            100.0
        }
    }
}

impl Scorer for LengthScorer {
    fn evaluate_score(&self) -> Result<f64, EvaluationExecutionError> {
        Ok(self.score())
    }

    fn generate_feedback(&self) -> Option<String> {
        let b = &self.bounds;
        let feedback = if self.length < b.min {
            format!("Too short: {} characters (minimum {})", self.length, b.min)
        } else if self.length > b.max {
            format!("Too long: {} characters (maximum {})", self.length, b.max)
        } else if self.length < b.ideal_min || self.length > b.ideal_max {
            format!(
                "Acceptable length: {} characters (ideal {}-{})",
                self.length, b.ideal_min, b.ideal_max
            )
        } else {
            format!("Ideal length: {} characters", self.length)
        };
        Some(feedback)
    }

    fn passed(&self, _score: f64) -> bool {
        self.length >= self.bounds.min && self.length <= self.bounds.max
    }
}
