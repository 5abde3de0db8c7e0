//! Notifications published by the sync machinery.
//!
//! Hosts subscribe through [`crate::OfflineSync::subscribe`] to render
//! banners, flush volatile state when connectivity drops, or record
//! permanently failed operations.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::Operation;

/// Capacity of the event broadcast channel. Slow subscribers see `Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome counts of one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Operations accepted by the remote endpoint and removed.
    pub dispatched: usize,
    /// Operations that failed and remain queued for a later attempt.
    pub failed: usize,
    /// Operations that failed for the last time and were dead-lettered.
    pub dropped: usize,
    /// Operations not yet due because of backoff.
    pub skipped: usize,
}

impl SyncReport {
    pub fn attempted(&self) -> usize {
        self.dispatched + self.failed + self.dropped
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Dispatched {
        id: Uuid,
    },
    Failed {
        id: Uuid,
        retry_count: u32,
        error: String,
        next_attempt_at: DateTime<Utc>,
    },
    /// Retries exhausted. Carries the operation as it was last persisted.
    Dropped {
        operation: Operation,
    },
    CycleCompleted {
        report: SyncReport,
        at: DateTime<Utc>,
    },
    Online,
    Offline,
    /// The host should persist any volatile state that has not been queued yet.
    FlushRequested,
}
