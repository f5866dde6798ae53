//! Engine counters

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the coordinator and every handler
#[derive(Debug, Default)]
pub struct SyncStats {
    node_events: AtomicU64,
    template_events: AtomicU64,
    fs_events: AtomicU64,
    resyncs: AtomicU64,
    handler_failures: AtomicU64,
    files_written: AtomicU64,
    files_unchanged: AtomicU64,
    removals: AtomicU64,
    pruned: AtomicU64,
    last_resync: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of `SyncStats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatsSnapshot {
    /// Key/value change events handled
    pub node_events: u64,
    /// Template re-render requests handled
    pub template_events: u64,
    /// Filesystem notifications observed under the mount
    pub fs_events: u64,
    /// Completed forced resynchronizations
    pub resyncs: u64,
    /// Handler invocations that ended in an error
    pub handler_failures: u64,
    pub files_written: u64,
    pub files_unchanged: u64,
    pub removals: u64,
    pub pruned: u64,
    pub last_resync: Option<DateTime<Utc>>,
}

impl SyncStats {
    pub fn record_node_event(&self) {
        self.node_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_template_event(&self) {
        self.template_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fs_event(&self) {
        self.fs_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.files_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unchanged(&self) {
        self.files_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pruned(&self, count: usize) {
        self.pruned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
        *self.last_resync.lock() = Some(Utc::now());
    }

    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            node_events: self.node_events.load(Ordering::Relaxed),
            template_events: self.template_events.load(Ordering::Relaxed),
            fs_events: self.fs_events.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            files_written: self.files_written.load(Ordering::Relaxed),
            files_unchanged: self.files_unchanged.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            last_resync: *self.last_resync.lock(),
        }
    }
}
