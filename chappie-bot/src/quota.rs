//! Per-actor usage counting inside a rolling window.
//!
//! The dispatcher only consults the store for non-exempt commands invoked by
//! non-owners; exempt usage must never create, bump or reset an entry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Time source, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Usage of one actor in its current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorQuota {
    pub actor_id: String,
    pub count_in_window: u32,
    pub window_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed { used: u32, remaining: u32 },
    Exceeded { limit: u32 },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed { .. })
    }
}

/// Quota backend. The in-memory store is the default; a persistent or shared
/// store only has to honour the same window semantics.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Count one use for `actor_id` unless it already reached `limit` within
    /// `window`. A refused call leaves the count untouched.
    async fn try_consume(&self, actor_id: &str, window: Duration, limit: u32) -> QuotaDecision;

    /// Current entry for `actor_id`, if one was ever created.
    async fn usage(&self, actor_id: &str) -> Option<ActorQuota>;
}

/// Thread-safe in-memory store. Each actor's entry is updated under its
/// DashMap shard lock, so concurrent consumers cannot lose increments.
pub struct InMemoryQuotaStore {
    entries: DashMap<String, ActorQuota>,
    clock: Arc<dyn Clock>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryQuotaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn try_consume(&self, actor_id: &str, window: Duration, limit: u32) -> QuotaDecision {
        let now = self.clock.now();

        let mut entry = self
            .entries
            .entry(actor_id.to_string())
            .or_insert_with(|| ActorQuota {
                actor_id: actor_id.to_string(),
                count_in_window: 0,
                window_start: now,
            });

        // A clock that went backwards counts as no time elapsed.
        let elapsed = (now - entry.window_start).to_std().unwrap_or_default();
        if elapsed > window {
            log::debug!("[QUOTA] Window reset for {}", actor_id);
            entry.count_in_window = 0;
            entry.window_start = now;
        }

        if entry.count_in_window >= limit {
            return QuotaDecision::Exceeded { limit };
        }

        entry.count_in_window += 1;
        QuotaDecision::Allowed {
            used: entry.count_in_window,
            remaining: limit - entry.count_in_window,
        }
    }

    async fn usage(&self, actor_id: &str) -> Option<ActorQuota> {
        self.entries.get(actor_id).map(|e| e.clone())
    }
}
