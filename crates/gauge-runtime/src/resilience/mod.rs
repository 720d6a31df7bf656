//! Resilience patterns for gauge-runtime.
//!
//! - Circuit breaker that skips a failing sync evaluator for a while
//! - Bounded exponential backoff for deferred jobs

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::RetryPolicy;
