//! Lightweight global metrics for the coordinator core.
//!
//! Thread-safe atomic counters for:
//! - Try dispatch (submit / reject / outcome)
//! - Worker pool (spawn / retire)
//! - Activity log (writes / bytes / failures / rotations)

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Try dispatch -----
static TRY_SUBMITTED: AtomicU64 = AtomicU64::new(0);
static TRY_REJECTED: AtomicU64 = AtomicU64::new(0);
static TRY_COMPLETED: AtomicU64 = AtomicU64::new(0);
static TRY_FAILED: AtomicU64 = AtomicU64::new(0);
static TRY_CANCELLED: AtomicU64 = AtomicU64::new(0);

// ----- Worker pool -----
static WORKERS_SPAWNED: AtomicU64 = AtomicU64::new(0);
static WORKERS_RETIRED: AtomicU64 = AtomicU64::new(0);

// ----- Activity log -----
static SNAPSHOT_WRITES: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_BYTES: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_FAILURES: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_ROTATIONS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    // Try dispatch
    pub try_submitted: u64,
    pub try_rejected: u64,
    pub try_completed: u64,
    pub try_failed: u64,
    pub try_cancelled: u64,

    // Worker pool
    pub workers_spawned: u64,
    pub workers_retired: u64,

    // Activity log
    pub snapshot_writes: u64,
    pub snapshot_bytes: u64,
    pub snapshot_failures: u64,
    pub snapshot_rotations: u64,
}

impl MetricsSnapshot {
    pub fn avg_snapshot_bytes(&self) -> f64 {
        if self.snapshot_writes == 0 {
            0.0
        } else {
            self.snapshot_bytes as f64 / self.snapshot_writes as f64
        }
    }

    pub fn reject_ratio(&self) -> f64 {
        let total = self.try_submitted + self.try_rejected;
        if total == 0 {
            0.0
        } else {
            self.try_rejected as f64 / total as f64
        }
    }
}

// ----- Recorders (Try dispatch) -----
pub fn record_try_submitted() {
    TRY_SUBMITTED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_try_rejected() {
    TRY_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_try_completed() {
    TRY_COMPLETED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_try_failed() {
    TRY_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_try_cancelled() {
    TRY_CANCELLED.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Worker pool) -----
pub fn record_worker_spawned() {
    WORKERS_SPAWNED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_worker_retired() {
    WORKERS_RETIRED.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Activity log) -----
pub fn record_snapshot_write(bytes: usize) {
    SNAPSHOT_WRITES.fetch_add(1, Ordering::Relaxed);
    SNAPSHOT_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
}
pub fn record_snapshot_failure() {
    SNAPSHOT_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn record_snapshot_rotation() {
    SNAPSHOT_ROTATIONS.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        try_submitted: TRY_SUBMITTED.load(Ordering::Relaxed),
        try_rejected: TRY_REJECTED.load(Ordering::Relaxed),
        try_completed: TRY_COMPLETED.load(Ordering::Relaxed),
        try_failed: TRY_FAILED.load(Ordering::Relaxed),
        try_cancelled: TRY_CANCELLED.load(Ordering::Relaxed),

        workers_spawned: WORKERS_SPAWNED.load(Ordering::Relaxed),
        workers_retired: WORKERS_RETIRED.load(Ordering::Relaxed),

        snapshot_writes: SNAPSHOT_WRITES.load(Ordering::Relaxed),
        snapshot_bytes: SNAPSHOT_BYTES.load(Ordering::Relaxed),
        snapshot_failures: SNAPSHOT_FAILURES.load(Ordering::Relaxed),
        snapshot_rotations: SNAPSHOT_ROTATIONS.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    TRY_SUBMITTED.store(0, Ordering::Relaxed);
    TRY_REJECTED.store(0, Ordering::Relaxed);
    TRY_COMPLETED.store(0, Ordering::Relaxed);
    TRY_FAILED.store(0, Ordering::Relaxed);
    TRY_CANCELLED.store(0, Ordering::Relaxed);

    WORKERS_SPAWNED.store(0, Ordering::Relaxed);
    WORKERS_RETIRED.store(0, Ordering::Relaxed);

    SNAPSHOT_WRITES.store(0, Ordering::Relaxed);
    SNAPSHOT_BYTES.store(0, Ordering::Relaxed);
    SNAPSHOT_FAILURES.store(0, Ordering::Relaxed);
    SNAPSHOT_ROTATIONS.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ratios() {
        let empty = MetricsSnapshot::default();
        assert_eq!(empty.avg_snapshot_bytes(), 0.0);
        assert_eq!(empty.reject_ratio(), 0.0);

        let m = MetricsSnapshot {
            try_submitted: 3,
            try_rejected: 1,
            snapshot_writes: 4,
            snapshot_bytes: 100,
            ..MetricsSnapshot::default()
        };
        assert_eq!(m.avg_snapshot_bytes(), 25.0);
        assert_eq!(m.reject_ratio(), 0.25);
    }

    #[test]
    fn counters_only_grow_between_resets() {
        let before = snapshot();
        record_snapshot_write(10);
        record_try_rejected();
        let after = snapshot();
        assert!(after.snapshot_writes > before.snapshot_writes);
        assert!(after.snapshot_bytes >= before.snapshot_bytes + 10);
        assert!(after.try_rejected > before.try_rejected);
    }
}
