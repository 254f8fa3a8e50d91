//! # Lockstep Testkit
//!
//! Test utilities for Lockstep.
//!
//! This crate provides:
//! - Scriptable mock objects and a harness driven by a manual clock
//! - Property-based workload generators using proptest
//! - A stress driver that checks the scheduling invariants after every step
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lockstep_testkit::prelude::*;
//!
//! #[test]
//! fn conflicting_transactions_serialize() {
//!     let mut harness = TestHarness::new(100);
//!     harness.object("X", ResponseMode::Manual);
//!     let t1 = harness.submit(&["X"]);
//!     let t2 = harness.submit(&["X"]);
//!     harness.ready("X");
//!     assert_eq!(harness.outcome(t1), Some(Outcome::Converged));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use lockstep_core::{Outcome, TransactionEvent, TransactionId, TransactionState};
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
