//! Property-based test generators using proptest.
//!
//! Provides strategies for random workloads: producers submitting
//! transactions over a small pool of objects, clients answering or not, and
//! time passing.

use crate::fixtures::ResponseMode;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

/// One step of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkloadOp {
    /// Submit a transaction touching these objects.
    Submit {
        /// Object keys, without duplicates.
        objects: Vec<String>,
    },
    /// The client of an object answers ready.
    Ready {
        /// Object key.
        object: String,
    },
    /// The client of an object answers cancel.
    Cancel {
        /// Object key.
        object: String,
    },
    /// Change how an object answers future commits.
    SetMode {
        /// Object key.
        object: String,
        /// New response mode.
        mode: ResponseMode,
    },
    /// The object is destroyed.
    Destroy {
        /// Object key.
        object: String,
    },
    /// Time passes.
    Advance {
        /// Milliseconds.
        ms: u64,
    },
}

/// Strategy for object keys drawn from a pool of `pool` objects.
pub fn object_key_strategy(pool: usize) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|n| format!("obj-{n}"))
}

/// Strategy for a non-empty set of distinct object keys.
pub fn object_set_strategy(pool: usize, max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(object_key_strategy(pool), 1..=max.max(1))
        .prop_map(|keys| keys.into_iter().collect())
}

/// Strategy for response modes, mostly well-behaved.
pub fn response_mode_strategy() -> impl Strategy<Value = ResponseMode> {
    prop_oneof![
        4 => Just(ResponseMode::Manual),
        2 => Just(ResponseMode::Immediate),
        1 => Just(ResponseMode::Never),
        1 => Just(ResponseMode::Cancel),
    ]
}

/// Strategy for a single workload step.
pub fn workload_op_strategy(pool: usize) -> impl Strategy<Value = WorkloadOp> {
    prop_oneof![
        4 => object_set_strategy(pool, 3).prop_map(|objects| WorkloadOp::Submit { objects }),
        4 => object_key_strategy(pool).prop_map(|object| WorkloadOp::Ready { object }),
        1 => object_key_strategy(pool).prop_map(|object| WorkloadOp::Cancel { object }),
        1 => (object_key_strategy(pool), response_mode_strategy())
            .prop_map(|(object, mode)| WorkloadOp::SetMode { object, mode }),
        1 => object_key_strategy(pool).prop_map(|object| WorkloadOp::Destroy { object }),
        2 => (1u64..60).prop_map(|ms| WorkloadOp::Advance { ms }),
    ]
}

/// Strategy for a workload of `min_ops..max_ops` steps.
pub fn workload_strategy(
    pool: usize,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<WorkloadOp>> {
    prop::collection::vec(workload_op_strategy(pool), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}


