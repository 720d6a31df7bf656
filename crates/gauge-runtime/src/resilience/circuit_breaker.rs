//! Circuit breaker for evaluator plugins.
//!
//! When a plugin fails repeatedly, its circuit opens and sync passes skip it
//! until the recovery timeout has elapsed. Each evaluator key has its own
//! circuit, so one broken plugin does not hold back the others.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::humantime_duration;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// Time before a trial call is let through
    #[serde(with = "humantime_duration")]
    pub recovery_timeout: Duration,

    /// Successes needed to close the circuit again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// Calls are skipped
    Open { opened_at: Instant },

    /// Trial calls decide whether to close again
    HalfOpen { successes: u32 },
}

/// Per-evaluator circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    states: RwLock<HashMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether calls to `evaluator` should be skipped.
    pub fn is_open(&self, evaluator: &str) -> bool {
        let states = self.states.read();
        match states.get(evaluator) {
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    drop(states);
                    self.transition_to_half_open(evaluator);
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    pub fn record_success(&self, evaluator: &str) {
        let mut states = self.states.write();
        match states.get(evaluator).cloned() {
            Some(CircuitState::HalfOpen { successes }) => {
                if successes + 1 >= self.config.success_threshold {
                    states.insert(evaluator.to_string(), CircuitState::Closed { failures: 0 });
                    tracing::info!(evaluator = %evaluator, "Circuit closed after successful recovery");
                } else {
                    states.insert(
                        evaluator.to_string(),
                        CircuitState::HalfOpen {
                            successes: successes + 1,
                        },
                    );
                }
            }
            Some(CircuitState::Closed { failures }) if failures > 0 => {
                states.insert(evaluator.to_string(), CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    pub fn record_failure(&self, evaluator: &str) {
        let mut states = self.states.write();
        let failures = match states.get(evaluator).cloned() {
            Some(CircuitState::Closed { failures }) => failures + 1,
            None => 1,
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(
                    evaluator.to_string(),
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                tracing::warn!(evaluator = %evaluator, "Circuit reopened after failed recovery attempt");
                return;
            }
            Some(CircuitState::Open { .. }) => return,
        };

        if failures >= self.config.failure_threshold {
            states.insert(
                evaluator.to_string(),
                CircuitState::Open {
                    opened_at: Instant::now(),
                },
            );
            tracing::warn!(
                evaluator = %evaluator,
                failures,
                "Circuit opened after repeated failures"
            );
        } else {
            states.insert(evaluator.to_string(), CircuitState::Closed { failures });
        }
    }

    fn transition_to_half_open(&self, evaluator: &str) {
        let mut states = self.states.write();
        if matches!(states.get(evaluator), Some(CircuitState::Open { .. })) {
            states.insert(evaluator.to_string(), CircuitState::HalfOpen { successes: 0 });
            tracing::info!(evaluator = %evaluator, "Circuit half-open, letting a trial call through");
        }
    }

    pub fn state(&self, evaluator: &str) -> CircuitState {
        self.states
            .read()
            .get(evaluator)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    /// Close every circuit.
    pub fn reset(&self) {
        self.states.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
