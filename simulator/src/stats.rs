//! Per-run transfer statistics.
//!
//! Outcomes are keyed by error code so the report shows exactly why
//! transfers failed. Retry counts come from the processor's own metrics.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use simplebank_common::Result;
use simplebank_ledger::TransferTxResult;
use simplebank_service::MetricsSnapshot;

/// Outcome key for transfers that committed.
const COMMITTED: &str = "COMMITTED";

const CONFLICT: &str = "TRANSACTION_CONFLICT";

/// Outcomes and latencies of the transfers issued during one run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Latency of every committed transfer, retries included.
    committed_latencies: Vec<Duration>,
    outcomes: BTreeMap<&'static str, u64>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how one transfer ended.
    pub fn record(&mut self, outcome: &Result<TransferTxResult>, latency: Duration) {
        let key = match outcome {
            Ok(_) => {
                self.committed_latencies.push(latency);
                COMMITTED
            }
            Err(e) => e.error_code(),
        };
        *self.outcomes.entry(key).or_insert(0) += 1;
    }

    pub fn attempted(&self) -> u64 {
        self.outcomes.values().sum()
    }

    pub fn committed(&self) -> u64 {
        self.count(COMMITTED)
    }

    /// Transfers that ended with `code`.
    pub fn count(&self, code: &str) -> u64 {
        self.outcomes.get(code).copied().unwrap_or(0)
    }

    /// Combine with the processor's counters into a report.
    pub fn summarize(&self, service: &MetricsSnapshot, elapsed: Duration) -> RunSummary {
        let attempted = self.attempted();
        let secs = elapsed.as_secs_f64();
        RunSummary {
            attempted,
            committed: self.committed(),
            outcomes: self
                .outcomes
                .iter()
                .map(|(code, n)| (code.to_string(), *n))
                .collect(),
            conflicts_after_retries: self.count(CONFLICT),
            conflicts_seen: service.conflicts_total,
            retries: service.retries_total,
            retries_per_transfer: ratio(service.retries_total, attempted),
            throughput_per_sec: if secs > 0.0 { attempted as f64 / secs } else { 0.0 },
            latency: LatencySummary::from_samples(&self.committed_latencies),
        }
    }
}

fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

/// Report printed at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub attempted: u64,
    pub committed: u64,
    /// Transfer count per outcome code.
    pub outcomes: BTreeMap<String, u64>,
    /// Transfers that still conflicted once the retry budget ran out.
    pub conflicts_after_retries: u64,
    /// Every conflict the processor saw, retried or not.
    pub conflicts_seen: u64,
    pub retries: u64,
    pub retries_per_transfer: f64,
    pub throughput_per_sec: f64,
    pub latency: LatencySummary,
}

/// Committed-transfer latency in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub p50_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    /// Nearest-rank percentiles over `samples`.
    fn from_samples(samples: &[Duration]) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let (Some(first), Some(last)) = (sorted.first(), sorted.last()) else {
            return Self::default();
        };
        let rank = |p: usize| {
            let idx = (sorted.len() * p).div_ceil(100).saturating_sub(1);
            millis(sorted[idx])
        };
        Self {
            min_ms: millis(*first),
            p50_ms: rank(50),
            p99_ms: rank(99),
            max_ms: millis(*last),
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}
