use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of reconciling one list snapshot against the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub stale: usize,
}

/// Watch events applied to the cache, by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub added: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
}

impl EventStats {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.added + self.updated + self.unchanged + self.deleted
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// List+watch cycles begun
    pub cycles: u64,
    /// Cycles that ended in an error and were restarted
    pub restarts: u64,
    pub events: EventStats,
    pub last_reconcile: Option<ReconcileStats>,
    pub last_synced: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
