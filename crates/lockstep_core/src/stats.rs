//! Transaction manager counters.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = manager.stats().snapshot();
//! println!("timed out: {} of {}", stats.timed_out, stats.committed);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Manager statistics.
///
/// All counters are monotonically increasing.
#[derive(Debug, Default)]
pub struct ManagerStats {
    /// Transactions handed to `submit`.
    submitted: AtomicU64,
    /// Transactions absorbed by a queued transaction.
    merged: AtomicU64,
    /// Transactions sent to their objects.
    committed: AtomicU64,
    /// Transactions applied after every object answered.
    converged: AtomicU64,
    /// Transactions applied because the deadline passed.
    timed_out: AtomicU64,
    /// Ready answers counted toward convergence.
    ready_signals: AtomicU64,
    /// Cancel answers counted toward convergence.
    cancel_signals: AtomicU64,
    /// Answers for retired transactions or already-answered instructions.
    stale_signals: AtomicU64,
}

impl ManagerStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submit(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_merge(&self) {
        self.merged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_converged(&self) {
        self.converged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ready(&self) {
        self.ready_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancel(&self) {
        self.cancel_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self) {
        self.stale_signals.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of submitted transactions.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Returns the number of merged-away transactions.
    pub fn merged(&self) -> u64 {
        self.merged.load(Ordering::Relaxed)
    }

    /// Returns the number of committed transactions.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions that converged.
    pub fn converged(&self) -> u64 {
        self.converged.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions that timed out.
    ///
    /// A high ratio against [`committed`](Self::committed) usually means a
    /// client is not answering configures.
    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    /// Returns the number of counted ready answers.
    pub fn ready_signals(&self) -> u64 {
        self.ready_signals.load(Ordering::Relaxed)
    }

    /// Returns the number of counted cancel answers.
    pub fn cancel_signals(&self) -> u64 {
        self.cancel_signals.load(Ordering::Relaxed)
    }

    /// Returns the number of ignored answers.
    pub fn stale_signals(&self) -> u64 {
        self.stale_signals.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted(),
            merged: self.merged(),
            committed: self.committed(),
            converged: self.converged(),
            timed_out: self.timed_out(),
            ready_signals: self.ready_signals(),
            cancel_signals: self.cancel_signals(),
            stale_signals: self.stale_signals(),
        }
    }
}

/// A point-in-time copy of [`ManagerStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Transactions handed to `submit`.
    pub submitted: u64,
    /// Transactions absorbed by a queued transaction.
    pub merged: u64,
    /// Transactions sent to their objects.
    pub committed: u64,
    /// Transactions applied after every object answered.
    pub converged: u64,
    /// Transactions applied because the deadline passed.
    pub timed_out: u64,
    /// Ready answers counted toward convergence.
    pub ready_signals: u64,
    /// Cancel answers counted toward convergence.
    pub cancel_signals: u64,
    /// Ignored answers.
    pub stale_signals: u64,
}

impl StatsSnapshot {
    /// Transactions that reached DONE either way.
    #[must_use]
    pub fn finished(&self) -> u64 {
        self.converged + self.timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = ManagerStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn snapshot_reflects_records() {
        let stats = ManagerStats::new();
        stats.record_submit();
        stats.record_submit();
        stats.record_merge();
        stats.record_commit();
        stats.record_ready();
        stats.record_cancel();
        stats.record_converged();
        stats.record_stale();

        let snap = stats.snapshot();
        assert_eq!(snap.submitted, 2);
        assert_eq!(snap.merged, 1);
        assert_eq!(snap.committed, 1);
        assert_eq!(snap.ready_signals, 1);
        assert_eq!(snap.cancel_signals, 1);
        assert_eq!(snap.stale_signals, 1);
        assert_eq!(snap.finished(), 1);
    }
}
