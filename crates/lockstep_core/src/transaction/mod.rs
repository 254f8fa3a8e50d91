//! Transactions and their scheduling.
//!
//! A [`Transaction`] moves through four states:
//!
//! ```text
//! NEW --submit--> PENDING --objects free--> COMMITTED --ready or timeout--> DONE
//! ```
//!
//! The [`TransactionManager`] owns every transaction past NEW.

mod instruction;
mod manager;
mod state;

pub use instruction::{Instruction, InstructionStatus};
pub use manager::TransactionManager;
pub use state::{Outcome, Transaction, TransactionState};
