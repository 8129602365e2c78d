//! Metrics collection for transfer processing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Transfer processing metrics.
pub struct TransferMetrics {
    /// Total transfers submitted.
    pub transfers_total: AtomicU64,
    /// Committed transfers.
    pub transfers_success: AtomicU64,
    /// Transfers that failed in the engine.
    pub transfers_failed: AtomicU64,
    /// Transfers rejected before reaching the engine.
    pub transfers_rejected: AtomicU64,
    /// Transfers in progress.
    pub transfers_active: AtomicU64,
    /// Conflicts observed, including ones later retried.
    pub conflicts_total: AtomicU64,
    /// Retries performed.
    pub retries_total: AtomicU64,
}

impl TransferMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            transfers_total: AtomicU64::new(0),
            transfers_success: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
            transfers_rejected: AtomicU64::new(0),
            transfers_active: AtomicU64::new(0),
            conflicts_total: AtomicU64::new(0),
            retries_total: AtomicU64::new(0),
        }
    }

    /// Record a submitted transfer.
    ///
    /// The transfer counts as active until the returned guard drops, which
    /// also covers callers that cancel mid-transfer.
    pub fn transfer_initiated(&self) -> ActiveTransfer<'_> {
        self.transfers_total.fetch_add(1, Ordering::Relaxed);
        self.transfers_active.fetch_add(1, Ordering::Relaxed);
        ActiveTransfer { metrics: self }
    }

    /// Record transfer success.
    pub fn transfer_success(&self) {
        self.transfers_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Record transfer failure.
    pub fn transfer_failed(&self) {
        self.transfers_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record transfer rejection.
    pub fn transfer_rejected(&self) {
        self.transfers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transaction conflict.
    pub fn conflict(&self) {
        self.conflicts_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry.
    pub fn retry(&self) {
        self.retries_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_total: self.transfers_total.load(Ordering::Relaxed),
            transfers_success: self.transfers_success.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            transfers_rejected: self.transfers_rejected.load(Ordering::Relaxed),
            transfers_active: self.transfers_active.load(Ordering::Relaxed),
            conflicts_total: self.conflicts_total.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP simplebank_transfers_total Total number of transfers submitted
# TYPE simplebank_transfers_total counter
simplebank_transfers_total {}

# HELP simplebank_transfers_success Total committed transfers
# TYPE simplebank_transfers_success counter
simplebank_transfers_success {}

# HELP simplebank_transfers_failed Total failed transfers
# TYPE simplebank_transfers_failed counter
simplebank_transfers_failed {}

# HELP simplebank_transfers_rejected Total rejected transfers
# TYPE simplebank_transfers_rejected counter
simplebank_transfers_rejected {}

# HELP simplebank_transfers_active Current active transfers
# TYPE simplebank_transfers_active gauge
simplebank_transfers_active {}

# HELP simplebank_conflicts_total Total transaction conflicts
# TYPE simplebank_conflicts_total counter
simplebank_conflicts_total {}

# HELP simplebank_retries_total Total transfer retries
# TYPE simplebank_retries_total counter
simplebank_retries_total {}
"#,
            snapshot.transfers_total,
            snapshot.transfers_success,
            snapshot.transfers_failed,
            snapshot.transfers_rejected,
            snapshot.transfers_active,
            snapshot.conflicts_total,
            snapshot.retries_total,
        )
    }
}

impl Default for TransferMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds one slot of the `transfers_active` gauge.
#[must_use = "the transfer stops counting as active when this is dropped"]
pub struct ActiveTransfer<'a> {
    metrics: &'a TransferMetrics,
}

impl Drop for ActiveTransfer<'_> {
    fn drop(&mut self) {
        self.metrics.transfers_active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transfers_total: u64,
    pub transfers_success: u64,
    pub transfers_failed: u64,
    pub transfers_rejected: u64,
    pub transfers_active: u64,
    pub conflicts_total: u64,
    pub retries_total: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<TransferMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = TransferMetrics::new();

        let first = metrics.transfer_initiated();
        let _second = metrics.transfer_initiated();
        metrics.transfer_success();
        drop(first);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transfers_total, 2);
        assert_eq!(snapshot.transfers_success, 1);
        assert_eq!(snapshot.transfers_active, 1);
    }

    #[test]
    fn test_active_gauge_released_without_outcome() {
        let metrics = TransferMetrics::new();

        {
            let _active = metrics.transfer_initiated();
            assert_eq!(metrics.snapshot().transfers_active, 1);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transfers_active, 0);
        assert_eq!(snapshot.transfers_total, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = TransferMetrics::new();
        let _active = metrics.transfer_initiated();
        metrics.conflict();

        let output = metrics.to_prometheus();
        assert!(output.contains("simplebank_transfers_total 1"));
        assert!(output.contains("simplebank_conflicts_total 1"));
    }
}
