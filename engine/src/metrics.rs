//! Engine counters.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

use duelsettle_common::{Amount, RoundOutcome};

/// Round lifecycle and money-flow counters.
pub struct EngineMetrics {
    /// Rounds created.
    pub rounds_created: AtomicU64,
    /// Rounds matched by an opponent.
    pub rounds_matched: AtomicU64,
    /// Rounds resolved.
    pub rounds_resolved: AtomicU64,
    /// Rounds cancelled.
    pub rounds_cancelled: AtomicU64,
    /// Rounds currently waiting for an opponent.
    ///
    /// Updated after the round lock is released, so a match can be counted
    /// before its creation. Signed so the pair still nets out; snapshots
    /// clamp at zero.
    pub rounds_open: AtomicI64,
    /// Operations that failed.
    pub operations_rejected: AtomicU64,
    /// Stake moved into escrow.
    pub stake_escrowed: AtomicU64,
    /// Amount paid to winners.
    pub payouts_total: AtomicU64,
    /// Amount paid to the fee sink.
    pub fees_collected: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            rounds_created: AtomicU64::new(0),
            rounds_matched: AtomicU64::new(0),
            rounds_resolved: AtomicU64::new(0),
            rounds_cancelled: AtomicU64::new(0),
            rounds_open: AtomicI64::new(0),
            operations_rejected: AtomicU64::new(0),
            stake_escrowed: AtomicU64::new(0),
            payouts_total: AtomicU64::new(0),
            fees_collected: AtomicU64::new(0),
        }
    }

    pub fn round_created(&self, stake: Amount) {
        self.rounds_created.fetch_add(1, Ordering::Relaxed);
        self.rounds_open.fetch_add(1, Ordering::Relaxed);
        self.stake_escrowed.fetch_add(stake, Ordering::Relaxed);
    }

    pub fn round_matched(&self, stake: Amount) {
        self.rounds_matched.fetch_add(1, Ordering::Relaxed);
        self.rounds_open.fetch_sub(1, Ordering::Relaxed);
        self.stake_escrowed.fetch_add(stake, Ordering::Relaxed);
    }

    pub fn round_cancelled(&self) {
        self.rounds_cancelled.fetch_add(1, Ordering::Relaxed);
        self.rounds_open.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn round_resolved(&self, outcome: &RoundOutcome) {
        self.rounds_resolved.fetch_add(1, Ordering::Relaxed);
        self.payouts_total.fetch_add(outcome.payout, Ordering::Relaxed);
        self.fees_collected.fetch_add(outcome.fee, Ordering::Relaxed);
    }

    pub fn operation_rejected(&self) {
        self.operations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rounds_created: self.rounds_created.load(Ordering::Relaxed),
            rounds_matched: self.rounds_matched.load(Ordering::Relaxed),
            rounds_resolved: self.rounds_resolved.load(Ordering::Relaxed),
            rounds_cancelled: self.rounds_cancelled.load(Ordering::Relaxed),
            rounds_open: self.rounds_open.load(Ordering::Relaxed).max(0) as u64,
            operations_rejected: self.operations_rejected.load(Ordering::Relaxed),
            stake_escrowed: self.stake_escrowed.load(Ordering::Relaxed),
            payouts_total: self.payouts_total.load(Ordering::Relaxed),
            fees_collected: self.fees_collected.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let series: [(&str, &str, &str, u64); 9] = [
            ("rounds_created", "counter", "Total rounds created", s.rounds_created),
            ("rounds_matched", "counter", "Total rounds matched", s.rounds_matched),
            ("rounds_resolved", "counter", "Total rounds resolved", s.rounds_resolved),
            ("rounds_cancelled", "counter", "Total rounds cancelled", s.rounds_cancelled),
            ("rounds_open", "gauge", "Rounds waiting for an opponent", s.rounds_open),
            ("operations_rejected", "counter", "Total rejected operations", s.operations_rejected),
            ("stake_escrowed", "counter", "Total stake moved into escrow", s.stake_escrowed),
            ("payouts_total", "counter", "Total paid to winners", s.payouts_total),
            ("fees_collected", "counter", "Total paid to the fee sink", s.fees_collected),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            let _ = writeln!(out, "# HELP duelsettle_{} {}", name, help);
            let _ = writeln!(out, "# TYPE duelsettle_{} {}", name, kind);
            let _ = writeln!(out, "duelsettle_{} {}\n", name, value);
        }
        out
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rounds_created: u64,
    pub rounds_matched: u64,
    pub rounds_resolved: u64,
    pub rounds_cancelled: u64,
    pub rounds_open: u64,
    pub operations_rejected: u64,
    pub stake_escrowed: u64,
    pub payouts_total: u64,
    pub fees_collected: u64,
}
