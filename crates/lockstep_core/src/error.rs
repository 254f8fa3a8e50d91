//! Error types for Lockstep core.
//!
//! Only contract violations are errors. Timeouts, scheduling conflicts and
//! objects that disappear mid-transaction are all part of normal
//! convergence and never reach the producer as a `TxnError`.

use crate::transaction::TransactionState;
use crate::types::TransactionId;
use thiserror::Error;

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;

/// Errors that can occur while building or driving transactions.
#[derive(Debug, Error)]
pub enum TxnError {
    /// A state-machine step that is not the single forward step from the
    /// current state.
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// The transaction that was asked to move.
        id: TransactionId,
        /// Its current state.
        from: TransactionState,
        /// The requested state.
        to: TransactionState,
    },

    /// Merge rules were violated.
    #[error("cannot merge a {donor_state} transaction into {target} ({target_state})")]
    InvalidMerge {
        /// The transaction that would absorb the instructions.
        target: TransactionId,
        /// State of the absorbing transaction.
        target_state: TransactionState,
        /// State of the transaction being absorbed.
        donor_state: TransactionState,
    },

    /// The transaction no longer accepts instructions.
    #[error("{id} is {state} and no longer accepts instructions")]
    Sealed {
        /// The sealed transaction.
        id: TransactionId,
        /// Its current state.
        state: TransactionState,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the invalid value.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl TxnError {
    /// Creates an invalid transition error.
    pub fn invalid_transition(
        id: TransactionId,
        from: TransactionState,
        to: TransactionState,
    ) -> Self {
        Self::InvalidTransition { id, from, to }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_message_names_both_states() {
        let err = TxnError::invalid_transition(
            TransactionId::new(3),
            TransactionState::Committed,
            TransactionState::Pending,
        );
        assert_eq!(
            err.to_string(),
            "invalid transition for txn:3: committed -> pending"
        );
    }

    #[test]
    fn sealed_message() {
        let err = TxnError::Sealed {
            id: TransactionId::new(9),
            state: TransactionState::Done,
        };
        assert_eq!(
            err.to_string(),
            "txn:9 is done and no longer accepts instructions"
        );
    }
}
