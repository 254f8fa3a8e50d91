//! Stress tests for Lockstep.
//!
//! Runs workloads against a harness and checks the scheduling invariants
//! after every step.

use crate::fixtures::TestHarness;
use crate::generators::{workload_strategy, WorkloadOp};
use lockstep_core::{Transaction, TransactionEvent, TransactionManager, TransactionState};
use proptest::strategy::{Strategy, ValueTree};
use proptest::test_runner::TestRunner;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Steps executed.
    pub total_ops: usize,
    /// Transactions submitted.
    pub submitted: u64,
    /// Transactions merged into queued ones.
    pub merged: u64,
    /// Transactions that converged.
    pub converged: u64,
    /// Transactions that timed out.
    pub timed_out: u64,
    /// Broken invariants, in the order they were found.
    pub violations: Vec<String>,
    /// Simulated time, including the final drain.
    pub simulated: Duration,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// True when no invariant was broken.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Steps: {}", self.total_ops);
        println!("Submitted: {} (merged {})", self.submitted, self.merged);
        println!("Converged: {}", self.converged);
        println!("Timed out: {}", self.timed_out);
        println!("Simulated: {:?}", self.simulated);
        println!("Duration: {:?}", self.duration);
        for violation in &self.violations {
            println!("VIOLATION: {}", violation);
        }
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of workload steps.
    pub operations: usize,
    /// Size of the object pool.
    pub objects: usize,
    /// Commit timeout.
    pub timeout_ms: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 2_000,
            objects: 8,
            timeout_ms: 100,
        }
    }
}

/// Checks the structural invariants of a quiescent manager.
///
/// - Queued transactions are pairwise disjoint
/// - In-flight transactions are pairwise disjoint
/// - Every queued transaction is blocked by an in-flight one
pub fn check_invariants(manager: &TransactionManager) -> Vec<String> {
    let mut violations = Vec::new();
    let queued: Vec<&Transaction> = manager.pending().collect();
    let in_flight: Vec<&Transaction> = manager.committed().collect();

    check_disjoint("queued", &queued, &mut violations);
    check_disjoint("in-flight", &in_flight, &mut violations);

    for txn in &queued {
        if txn.state() != TransactionState::Pending {
            violations.push(format!("queued {} is {}", txn.id(), txn.state()));
        }
        if !in_flight.iter().any(|other| other.intersects(txn)) {
            violations.push(format!("queued {} is not blocked by anything", txn.id()));
        }
    }
    for txn in &in_flight {
        if txn.state() != TransactionState::Committed {
            violations.push(format!("in-flight {} is {}", txn.id(), txn.state()));
        }
    }
    violations
}

fn check_disjoint(what: &str, txns: &[&Transaction], violations: &mut Vec<String>) {
    for (i, a) in txns.iter().enumerate() {
        for b in &txns[i + 1..] {
            if a.intersects(b) {
                violations.push(format!("{what} {} and {} share objects", a.id(), b.id()));
            }
        }
    }
}

/// Checks that every submitted transaction was retired exactly once,
/// either by a merge or by finishing.
pub fn check_lifecycle(events: &[TransactionEvent]) -> Vec<String> {
    let mut violations = Vec::new();
    let mut retired = HashMap::new();
    let mut scheduled = Vec::new();

    for event in events {
        match event {
            TransactionEvent::Scheduled { id } => scheduled.push(*id),
            TransactionEvent::Merged { from, .. } => *retired.entry(*from).or_insert(0) += 1,
            TransactionEvent::Done { id, .. } => *retired.entry(*id).or_insert(0) += 1,
            TransactionEvent::Committed { .. } => {}
        }
    }

    for id in scheduled {
        match retired.get(&id).copied().unwrap_or(0) {
            1 => {}
            0 => violations.push(format!("{id} never finished")),
            n => violations.push(format!("{id} retired {n} times")),
        }
    }
    violations
}

/// Runs `ops` against a fresh harness, then lets every transaction time
/// out.
pub fn run_workload(ops: &[WorkloadOp], timeout_ms: u64) -> StressTestResult {
    let start = Instant::now();
    let mut harness = TestHarness::new(timeout_ms);
    let mut violations = Vec::new();

    for (step, op) in ops.iter().enumerate() {
        apply_op(&mut harness, op);
        for violation in check_invariants(&harness.manager) {
            violations.push(format!("step {step} ({op:?}): {violation}"));
        }
    }

    // Every transaction finishes at the latest one timeout after it was
    // committed, and each drain round commits at least one queued one.
    let mut rounds = 0;
    while !harness.manager.is_idle() {
        if rounds > ops.len() + 1 {
            violations.push("manager did not drain".to_owned());
            break;
        }
        harness.advance(timeout_ms);
        rounds += 1;
    }

    violations.extend(check_lifecycle(harness.events()));

    let stats = harness.manager.stats().snapshot();
    StressTestResult {
        total_ops: ops.len(),
        submitted: stats.submitted,
        merged: stats.merged,
        converged: stats.converged,
        timed_out: stats.timed_out,
        violations,
        simulated: harness.elapsed(),
        duration: start.elapsed(),
    }
}

fn apply_op(harness: &mut TestHarness, op: &WorkloadOp) {
    match op {
        WorkloadOp::Submit { objects } => {
            let keys: Vec<&str> = objects.iter().map(String::as_str).collect();
            harness.submit(&keys);
        }
        WorkloadOp::Ready { object } => {
            harness.ready(object);
        }
        WorkloadOp::Cancel { object } => {
            harness.cancel(object);
        }
        WorkloadOp::SetMode { object, mode } => {
            harness.object(object, *mode);
        }
        WorkloadOp::Destroy { object } => {
            harness.destroy(object);
        }
        WorkloadOp::Advance { ms } => {
            harness.advance(*ms);
        }
    }
}

/// Runs a deterministic pseudo-random workload.
pub fn stress_random_workload(config: &StressConfig) -> StressTestResult {
    let mut runner = TestRunner::deterministic();
    let ops = workload_strategy(config.objects, config.operations, config.operations + 1)
        .new_tree(&mut runner)
        .map(|tree| tree.current())
        .unwrap_or_default();
    run_workload(&ops, config.timeout_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(keys: &[&str]) -> WorkloadOp {
        WorkloadOp::Submit {
            objects: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn ready(key: &str) -> WorkloadOp {
        WorkloadOp::Ready {
            object: key.to_owned(),
        }
    }

    #[test]
    fn test_scripted_workload() {
        let ops = vec![
            submit(&["A", "B"]),
            submit(&["B"]),
            submit(&["B", "C"]),
            ready("A"),
            ready("B"),
            WorkloadOp::Advance { ms: 10 },
            ready("B"),
            ready("C"),
        ];

        let result = run_workload(&ops, 100);
        assert!(result.is_clean(), "{:?}", result.violations);
        assert_eq!(result.submitted, 3);
        assert_eq!(result.merged, 1);
        assert_eq!(result.converged, 2);
        assert_eq!(result.timed_out, 0);
    }

    #[test]
    fn test_random_workload() {
        let config = StressConfig {
            operations: 500,
            ..StressConfig::default()
        };
        let result = stress_random_workload(&config);
        assert!(result.is_clean(), "{:?}", result.violations);
        assert_eq!(result.total_ops, 500);
        assert!(result.submitted > 0);
    }

    #[test]
    fn test_lifecycle_check_flags_double_finish() {
        use lockstep_core::{Outcome, TransactionId};

        let id = TransactionId::new(1);
        let done = TransactionEvent::Done {
            id,
            outcome: Outcome::Converged,
        };
        let events = vec![TransactionEvent::Scheduled { id }, done.clone(), done];
        assert_eq!(check_lifecycle(&events), vec!["txn:1 retired 2 times"]);
    }
}
