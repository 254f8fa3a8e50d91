//! # Lockstep Core
//!
//! State-commit core for a Wayland compositor.
//!
//! Windows and outputs change geometry at unpredictable times: a client has
//! to receive a configure, redraw and acknowledge before its new buffer
//! exists. This crate lets several such objects change together in one
//! visual frame:
//!
//! - [`TransactionObject`] is the contract a participant implements
//! - [`Instruction`] wraps one participant in a transaction
//! - [`Transaction`] batches instructions and owns the state machine
//! - [`TransactionManager`] serializes conflicting transactions, merges
//!   queued ones and drives commits to completion or timeout
//!
//! # Usage
//!
//! ```rust,ignore
//! use lockstep_core::{SharedConfig, TransactionManager};
//!
//! let mut manager = TransactionManager::new(SharedConfig::default());
//! let mut txn = manager.begin();
//! txn.add_object(&window)?;
//! manager.submit(txn)?;
//!
//! // From the event loop, whenever a client acks or a timer fires:
//! manager.dispatch();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod error;
mod events;
mod object;
pub mod objects;
mod stats;
mod timer;
mod transaction;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, SharedConfig, MAX_TRANSACTION_TIMEOUT_MS};
pub use error::{TxnError, TxnResult};
pub use events::{TransactionEvent, TransactionFeed};
pub use object::{
    object_ref, ObjectRef, ReadySignal, Resolution, SignalEvent, TransactionObject, WeakObjectRef,
};
pub use stats::{ManagerStats, StatsSnapshot};
pub use timer::{TimerQueue, TimerToken};
pub use transaction::{
    Instruction, InstructionStatus, Outcome, Transaction, TransactionManager, TransactionState,
};
pub use types::{ObjectKey, TransactionId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
