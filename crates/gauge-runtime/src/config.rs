//! Runtime configuration.
//!
//! Durations are written in human-readable form (`"250ms"`, `"30s"`,
//! `"5m"`). Every field has a default, so an empty document is valid.
//!
//! ```yaml
//! jobs:
//!   queue_capacity: 512
//!   concurrency: 4
//!   retry:
//!     max_attempts: 5
//!     min_delay: 200ms
//!     max_delay: 30s
//! circuit_breaker:
//!   failure_threshold: 3
//!   recovery_timeout: 1m
//! dispatch_dedupe_ttl: 10m
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::RuntimeError;

/// Top-level runtime settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub jobs: JobsConfig,

    /// Skip a sync evaluator for a while after repeated failures. The
    /// circuit is shared by every subject using the evaluator. Off when unset.
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Suppress repeated async dispatches of the same evaluator for the same
    /// response and context within this window. Off when unset.
    #[serde(with = "humantime_duration::option")]
    pub dispatch_dedupe_ttl: Option<Duration>,
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, RuntimeError> {
        serde_yaml::from_str(yaml).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, RuntimeError> {
        serde_json::from_str(json).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let contents = fs::read_to_string(path).map_err(|e| RuntimeError::Config(e.to_string()))?;
        Self::from_yaml(&contents)
    }
}

/// Job queue and worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsConfig {
    /// Tasks buffered before enqueue reports the queue as full
    pub queue_capacity: usize,

    /// Tasks a worker runs at the same time
    pub concurrency: usize,

    pub retry: RetryPolicy,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            concurrency: 8,
            retry: RetryPolicy::default(),
        }
    }
}

/// Serde adapters for `humantime` durations.
pub(crate) mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RuntimeConfig::from_yaml("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.jobs.queue_capacity, 1024);
        assert!(config.circuit_breaker.is_none());
        assert!(config.dispatch_dedupe_ttl.is_none());
    }

    #[test]
    fn test_human_readable_durations() {
        let yaml = r#"
jobs:
  concurrency: 2
  retry:
    max_attempts: 5
    min_delay: 250ms
    max_delay: 1m
circuit_breaker:
  recovery_timeout: 45s
dispatch_dedupe_ttl: 10m
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.jobs.concurrency, 2);
        assert_eq!(config.jobs.queue_capacity, 1024);
        assert_eq!(config.jobs.retry.max_attempts, 5);
        assert_eq!(config.jobs.retry.min_delay, Duration::from_millis(250));
        assert_eq!(config.jobs.retry.max_delay, Duration::from_secs(60));
        let breaker = config.circuit_breaker.unwrap();
        assert_eq!(breaker.recovery_timeout, Duration::from_secs(45));
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(config.dispatch_dedupe_ttl, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = RuntimeConfig::default();
        config.dispatch_dedupe_ttl = Some(Duration::from_secs(90));

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"1m 30s\""));
        assert_eq!(RuntimeConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_bad_duration_rejected() {
        let result = RuntimeConfig::from_yaml("dispatch_dedupe_ttl: soon");
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = RuntimeConfig::from_yaml("budgets: {}");
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }
}
