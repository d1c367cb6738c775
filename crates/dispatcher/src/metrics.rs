//! Processor and sink counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single sink
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Records queued but not yet taken by the worker
    backlog: AtomicUsize,
    peak_backlog: AtomicUsize,
    write_count: AtomicU64,
    failure_count: AtomicU64,
    /// Records handed over after the worker stopped
    lost_count: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the backlog including the new record
    pub(crate) fn record_queued(&self) -> usize {
        let backlog = self.backlog.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_backlog.fetch_max(backlog, Ordering::Relaxed);
        backlog
    }

    pub(crate) fn record_unqueued(&self) {
        self.backlog.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }

    pub fn peak_backlog(&self) -> usize {
        self.peak_backlog.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_write_count(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lost_count(&self) -> u64 {
        self.lost_count.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_lost_count(&self) {
        self.lost_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            backlog: self.backlog(),
            peak_backlog: self.peak_backlog(),
            write_count: self.write_count(),
            failure_count: self.failure_count(),
            lost_count: self.lost_count(),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub backlog: usize,
    pub peak_backlog: usize,
    pub write_count: u64,
    pub failure_count: u64,
    pub lost_count: u64,
}

/// Admission counters, written by the processor task only
#[derive(Debug, Default)]
pub struct ProcessorStats {
    enqueued: AtomicU64,
    admitted: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    records_emitted: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    pending: AtomicUsize,
}

impl ProcessorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_completed(&self, timed_out: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn add_records(&self, n: u64) {
        self.records_emitted.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn set_depth(&self, in_flight: usize, pending: usize) {
        self.in_flight.store(in_flight, Ordering::Relaxed);
        self.peak_in_flight.fetch_max(in_flight, Ordering::Relaxed);
        self.pending.store(pending, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProcessorSnapshot {
        ProcessorSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of `ProcessorStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorSnapshot {
    pub enqueued: u64,
    pub admitted: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub records_emitted: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub pending: usize,
}
