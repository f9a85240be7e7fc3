use crate::error_handling::types::EphemeralError;
use async_trait::async_trait;
use std::time::Duration;

/// Result of an atomic sliding-window update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdate {
    /// False when the member was already present (an idempotent replay).
    pub newly_added: bool,
    /// Member count within the requested score range, after insert + prune.
    pub count: u64,
}

/// Contract for the ephemeral KV + sorted-set store.
///
/// Implementations must make each method atomic per key; callers rely on
/// that for dedup and rate limiting without any outer lock.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Set a marker if absent. Returns true when this call created it.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, EphemeralError>;

    /// Remove a key, counter, or window outright. Absent keys are fine.
    async fn remove(&self, key: &str) -> Result<(), EphemeralError>;

    /// Increment a counter, creating it with the given TTL on first
    /// increment. Returns the post-increment value.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, EphemeralError>;

    /// Insert `member` with `score_ms` into the sorted set at `key`, drop
    /// members with scores at or below `prune_before_ms`, refresh the set's
    /// TTL, and count members with scores in `[count_from_ms, count_to_ms]`,
    /// all in one atomic step.
    #[allow(clippy::too_many_arguments)]
    async fn window_add_and_count(
        &self,
        key: &str,
        member: &str,
        score_ms: i64,
        prune_before_ms: i64,
        count_from_ms: i64,
        count_to_ms: i64,
        ttl: Duration,
    ) -> Result<WindowUpdate, EphemeralError>;

    /// Count members with scores in `[from_ms, to_ms]` without mutating.
    async fn window_count(
        &self,
        key: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<u64, EphemeralError>;
}
