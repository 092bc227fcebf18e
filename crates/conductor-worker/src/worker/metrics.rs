//! In-process counters for the poll/execute/report cycle

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters shared by every poller of a host
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    polls: AtomicU64,
    empty_polls: AtomicU64,
    poll_errors: AtomicU64,
    tasks_executed: AtomicU64,
    handler_failures: AtomicU64,
    reports_succeeded: AtomicU64,
    report_retries: AtomicU64,
    reports_dropped: AtomicU64,
    reports_rejected: AtomicU64,
    ticks_without_capacity: AtomicU64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn empty_poll(&self) {
        self.empty_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn task_executed(&self, failed: bool) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.handler_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a successful report that took `attempts` tries
    pub(crate) fn report_succeeded(&self, attempts: u32) {
        self.reports_succeeded.fetch_add(1, Ordering::Relaxed);
        self.report_retries
            .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);
    }

    pub(crate) fn report_dropped(&self, attempts: u32) {
        self.reports_dropped.fetch_add(1, Ordering::Relaxed);
        self.report_retries
            .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);
    }

    pub(crate) fn report_rejected(&self) {
        self.reports_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn no_capacity(&self) {
        self.ticks_without_capacity.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            reports_succeeded: self.reports_succeeded.load(Ordering::Relaxed),
            report_retries: self.report_retries.load(Ordering::Relaxed),
            reports_dropped: self.reports_dropped.load(Ordering::Relaxed),
            reports_rejected: self.reports_rejected.load(Ordering::Relaxed),
            ticks_without_capacity: self.ticks_without_capacity.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`WorkerMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub polls: u64,
    pub empty_polls: u64,
    pub poll_errors: u64,
    pub tasks_executed: u64,
    pub handler_failures: u64,
    pub reports_succeeded: u64,
    /// Report attempts beyond the first, across all results
    pub report_retries: u64,
    pub reports_dropped: u64,
    pub reports_rejected: u64,
    pub ticks_without_capacity: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = WorkerMetrics::new();
        metrics.poll();
        metrics.poll();
        metrics.empty_poll();
        metrics.task_executed(false);
        metrics.task_executed(true);
        metrics.report_succeeded(3);
        metrics.report_dropped(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.polls, 2);
        assert_eq!(snapshot.empty_polls, 1);
        assert_eq!(snapshot.tasks_executed, 2);
        assert_eq!(snapshot.handler_failures, 1);
        assert_eq!(snapshot.reports_succeeded, 1);
        assert_eq!(snapshot.reports_dropped, 1);
        assert_eq!(snapshot.report_retries, 5);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(WorkerMetrics::new().snapshot()).unwrap();
        assert_eq!(json["polls"], 0);
        assert_eq!(json["ticks_without_capacity"], 0);
    }
}
