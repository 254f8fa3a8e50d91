//! End-to-end scheduling scenarios.

use lockstep_testkit::prelude::*;
use proptest::prelude::*;
use std::time::Duration;

#[test]
fn two_objects_converge_before_timeout() {
    let mut harness = TestHarness::new(300);
    let id = harness.submit(&["A", "B"]);

    harness.advance(3);
    assert!(harness.ready("A"));
    harness.advance(6);
    assert!(harness.ready("B"));

    assert_eq!(harness.outcome(id), Some(Outcome::Converged));
    assert!(harness.elapsed() <= Duration::from_millis(10));
    assert_eq!(harness.apply_count("A"), 1);
    assert_eq!(harness.apply_count("B"), 1);
}

#[test]
fn unresponsive_object_times_out_at_configured_timeout() {
    let mut harness = TestHarness::new(100);
    harness.object("C", ResponseMode::Never);
    let id = harness.submit(&["C"]);

    harness.advance(99);
    assert_eq!(harness.outcome(id), None);
    assert_eq!(harness.apply_count("C"), 0);

    harness.advance(1);
    assert_eq!(harness.outcome(id), Some(Outcome::TimedOut));
    assert_eq!(harness.elapsed(), Duration::from_millis(100));
    assert_eq!(harness.apply_count("C"), 1);

    // Nothing else happens afterwards.
    harness.advance(1_000);
    assert_eq!(harness.apply_count("C"), 1);
}

#[test]
fn conflicting_transaction_waits_for_the_first() {
    let mut harness = TestHarness::new(100);
    let t1 = harness.submit(&["X"]);
    let t2 = harness.submit(&["X"]);

    assert_eq!(harness.manager.state_of(t1), Some(TransactionState::Committed));
    assert_eq!(harness.manager.state_of(t2), Some(TransactionState::Pending));
    assert_eq!(harness.commit_count("X"), 1);

    harness.ready("X");
    assert_eq!(harness.outcome(t1), Some(Outcome::Converged));
    assert_eq!(harness.manager.state_of(t2), Some(TransactionState::Committed));
    assert_eq!(harness.commit_count("X"), 2);

    harness.ready("X");
    assert_eq!(harness.outcome(t2), Some(Outcome::Converged));

    // T2 was committed only after T1 was applied.
    let done_t1 = harness
        .events()
        .iter()
        .position(|e| *e == TransactionEvent::Done { id: t1, outcome: Outcome::Converged });
    let commit_t2 = harness
        .events()
        .iter()
        .position(|e| matches!(e, TransactionEvent::Committed { id, .. } if *id == t2));
    assert!(done_t1 < commit_t2);
}

#[test]
fn disjoint_transactions_do_not_wait_on_each_other() {
    let mut harness = TestHarness::new(100);
    let t1 = harness.submit(&["A", "B"]);
    let t2 = harness.submit(&["C"]);

    assert_eq!(harness.manager.state_of(t1), Some(TransactionState::Committed));
    assert_eq!(harness.manager.state_of(t2), Some(TransactionState::Committed));

    harness.ready("C");
    assert_eq!(harness.outcome(t2), Some(Outcome::Converged));
    assert_eq!(harness.outcome(t1), None);
}

#[test]
fn merged_transaction_covers_the_union() {
    let mut harness = TestHarness::new(100);
    harness.submit(&["X"]);
    let queued = harness.submit(&["X", "Y"]);
    let donor = harness.transaction(&["Y", "Z"]);
    let donor_id = donor.id();

    let carrier = harness.submit_txn(donor);

    assert_eq!(carrier, queued);
    assert_eq!(harness.manager.state_of(donor_id), None);
    let merged = harness.manager.pending().next().unwrap();
    let keys: Vec<String> = merged.objects().iter().map(|k| k.to_string()).collect();
    assert_eq!(keys, vec!["X", "Y", "Z"]);
}

fn objects_for(log: &CallLog, hook: Hook) -> Vec<String> {
    log.calls()
        .into_iter()
        .filter(|call| call.hook == hook)
        .map(|call| call.object)
        .collect()
}

#[test]
fn hooks_run_in_insertion_order_across_objects() {
    let mut harness = TestHarness::new(100);
    // Hold "B" in flight so the next transaction stays queued.
    harness.submit(&["B"]);
    harness.log.clear();

    let queued = harness.submit(&["B", "A", "C"]);
    let donor = harness.transaction(&["A", "E", "D"]);
    assert_eq!(harness.submit_txn(donor), queued);

    let order = ["B", "A", "C", "E", "D"];
    assert_eq!(objects_for(&harness.log, Hook::SetPending), order);

    // Releasing the blocker commits the merged transaction.
    harness.ready("B");
    assert_eq!(objects_for(&harness.log, Hook::Precommit), order);
    assert_eq!(objects_for(&harness.log, Hook::Commit), order);

    harness.log.clear();
    for key in order.iter().rev() {
        assert!(harness.ready(key));
    }
    assert_eq!(harness.outcome(queued), Some(Outcome::Converged));
    assert_eq!(objects_for(&harness.log, Hook::Apply), order);
}

#[test]
fn finishing_twice_never_applies_twice() {
    let mut harness = TestHarness::new(50);
    let id = harness.submit(&["A"]);

    // Timeout first, then a late answer for the same commit.
    harness.advance(50);
    harness.ready("A");
    harness.advance(50);

    assert_eq!(harness.outcome(id), Some(Outcome::TimedOut));
    assert_eq!(harness.apply_count("A"), 1);
    assert_eq!(harness.manager.stats().stale_signals(), 1);
}

#[test]
fn destroyed_object_counts_as_cancelled() {
    let mut harness = TestHarness::new(100);
    let id = harness.submit(&["A", "B"]);

    harness.destroy("B");
    harness.ready("A");

    assert_eq!(harness.outcome(id), Some(Outcome::Converged));
    assert_eq!(harness.apply_count("A"), 1);
}

#[test]
fn stress_run_keeps_invariants() {
    let result = stress_random_workload(&StressConfig::default());
    result.print_summary("random workload");
    assert!(result.is_clean(), "{:?}", result.violations);
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn random_workloads_keep_invariants(ops in workload_strategy(5, 1, 80)) {
        let result = run_workload(&ops, 40);
        prop_assert!(result.is_clean(), "{:?}", result.violations);
    }

    #[test]
    fn n_answers_converge_in_any_order(order in Just((0..5).collect::<Vec<usize>>()).prop_shuffle()) {
        let keys = ["A", "B", "C", "D", "E"];
        let mut harness = TestHarness::new(1_000);
        let id = harness.submit(&keys);

        for (answered, index) in order.iter().enumerate() {
            prop_assert_eq!(harness.outcome(id), None);
            if answered % 2 == 0 {
                harness.ready(keys[*index]);
            } else {
                harness.cancel(keys[*index]);
            }
        }

        prop_assert_eq!(harness.outcome(id), Some(Outcome::Converged));
        prop_assert_eq!(harness.elapsed(), Duration::ZERO);
        for key in keys {
            prop_assert_eq!(harness.apply_count(key), 1);
        }
    }
}
