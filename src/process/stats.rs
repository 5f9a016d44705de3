/*!
 * Coordinator Statistics
 * Atomic counters updated by workers and callers without locking
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the coordinator counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub groups_submitted: u64,
    pub groups_retrieved: u64,
}

impl StatsSnapshot {
    /// Tasks submitted but not yet run
    pub fn tasks_pending(&self) -> u64 {
        self.tasks_submitted
            .saturating_sub(self.tasks_completed + self.tasks_failed)
    }
}

/// Atomic coordinator statistics
///
/// # Performance
/// - Cache-line aligned to prevent false sharing
/// - Relaxed ordering; snapshots are not a consistent cut
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    groups_submitted: AtomicU64,
    groups_retrieved: AtomicU64,
}

impl CoordinatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_submission(&self, tasks: usize) {
        self.groups_submitted.fetch_add(1, Ordering::Relaxed);
        self.tasks_submitted.fetch_add(tasks as u64, Ordering::Relaxed);
    }

    /// Hot path - called once per task run
    #[inline(always)]
    pub fn record_task(&self, succeeded: bool) {
        if succeeded {
            self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_retrieval(&self) {
        self.groups_retrieved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            groups_submitted: self.groups_submitted.load(Ordering::Relaxed),
            groups_retrieved: self.groups_retrieved.load(Ordering::Relaxed),
        }
    }
}
