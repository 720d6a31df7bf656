//! Duplicate-dispatch guard.
//!
//! Two orchestration passes for the same response may overlap; nothing locks
//! a response. When enabled, this guard remembers which deferred evaluations
//! were enqueued recently and reports repeats, so the same evaluator is not
//! queued twice for one response and context within the TTL. It never
//! touches recorded evaluations.

use std::time::Duration;

use moka::future::Cache;
use uuid::Uuid;

use gauge_core::EvaluationContext;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DispatchKey {
    pub response_id: Uuid,
    pub config_id: u64,
    pub context: EvaluationContext,
}

pub struct DispatchGuard {
    seen: Cache<DispatchKey, ()>,
}

impl DispatchGuard {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let seen = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { seen }
    }

    /// Record `key`; `false` if it was already recorded within the TTL.
    pub async fn claim(&self, key: DispatchKey) -> bool {
        self.seen.entry(key).or_insert(()).await.is_fresh()
    }

    /// Forget `key`, e.g. after the enqueue it guarded failed.
    pub async fn release(&self, key: &DispatchKey) {
        self.seen.invalidate(key).await;
    }
}

impl std::fmt::Debug for DispatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchGuard")
            .field("entries", &self.seen.entry_count())
            .finish()
    }
}
