//! Transaction state.

use crate::error::{TxnError, TxnResult};
use crate::object::{ObjectRef, ReadySignal, Resolution, SignalEvent};
use crate::transaction::instruction::{Instruction, InstructionStatus};
use crate::types::{ObjectKey, TransactionId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::mpsc::Sender;
use std::time::Instant;

/// State of a transaction.
///
/// States only move forward, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Being built; instructions can be added freely.
    New,
    /// Queued in the manager; every object has been marked pending.
    Pending,
    /// Sent out; waiting for objects to become ready or for the timeout.
    Committed,
    /// Applied and retired.
    Done,
}

impl TransactionState {
    const fn next(self) -> Option<Self> {
        match self {
            Self::New => Some(Self::Pending),
            Self::Pending => Some(Self::Committed),
            Self::Committed => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::Done => "done",
        })
    }
}

/// Why a transaction reached [`TransactionState::Done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every instruction reported ready or cancelled before the deadline.
    Converged,
    /// The deadline passed first; objects were applied with whatever state
    /// they had.
    TimedOut,
}

/// A batch of instructions that become visible together.
///
/// Producers build a transaction with [`add_object`](Self::add_object) or
/// [`add_instruction`](Self::add_instruction) and hand it to the manager,
/// which is the only caller of the state transitions.
///
/// A transaction holds at most one instruction per object key. The object
/// carries its own pending state, so a second instruction for the same key
/// would only ask it to commit the same thing twice.
#[derive(Debug)]
pub struct Transaction {
    /// Transaction ID.
    id: TransactionId,
    /// Current state.
    state: TransactionState,
    /// Instructions in insertion order.
    instructions: Vec<Instruction>,
    /// Set whenever instructions are added after creation.
    dirty: bool,
    /// Committed instructions that have not answered yet.
    outstanding: usize,
    /// Commit deadline, set on commit.
    deadline: Option<Instant>,
    /// Set when the transaction is done.
    outcome: Option<Outcome>,
}

impl Transaction {
    /// Creates a new transaction.
    pub(crate) fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::New,
            instructions: Vec::new(),
            dirty: false,
            outstanding: 0,
            deadline: None,
            outcome: None,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns how the transaction finished, once it is done.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Returns the commit deadline, once committed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Number of committed instructions still waiting for their object.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Returns the number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true if the transaction has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Iterates over the instructions in insertion order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    /// Adds an instruction.
    ///
    /// Returns `Ok(false)` if an instruction for the same object is already
    /// present. Instructions added to a queued transaction are marked
    /// pending right away. Committed and done transactions reject new
    /// instructions.
    pub fn add_instruction(&mut self, mut instruction: Instruction) -> TxnResult<bool> {
        self.ensure_open()?;
        if self.contains(instruction.key().as_str()) {
            return Ok(false);
        }
        if self.state == TransactionState::Pending {
            instruction.mark_pending();
        }
        self.instructions.push(instruction);
        self.dirty = true;
        Ok(true)
    }

    /// Adds an instruction for `object`.
    pub fn add_object(&mut self, object: &ObjectRef) -> TxnResult<bool> {
        self.add_instruction(Instruction::new(object))
    }

    /// Drops the instruction for `key` from a transaction still being built.
    ///
    /// Returns the removed instruction, or `None` if the key is not part of
    /// the transaction. Once submitted, objects have been marked pending and
    /// the instruction can no longer be taken back.
    pub fn remove_instruction(&mut self, key: &str) -> TxnResult<Option<Instruction>> {
        if self.state != TransactionState::New {
            return Err(TxnError::invalid_operation(format!(
                "cannot remove instructions from {} while it is {}",
                self.id, self.state
            )));
        }
        let removed = self
            .instructions
            .iter()
            .position(|i| i.key().as_str() == key)
            .map(|index| self.instructions.remove(index));
        Ok(removed)
    }

    /// Returns the set of object keys touched by this transaction.
    #[must_use]
    pub fn objects(&self) -> BTreeSet<ObjectKey> {
        self.instructions.iter().map(|i| i.key().clone()).collect()
    }

    /// Checks whether the transaction touches `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.instructions.iter().any(|i| i.key().as_str() == key)
    }

    /// Checks whether both transactions touch at least one common object.
    #[must_use]
    pub fn intersects(&self, other: &Transaction) -> bool {
        other
            .instructions
            .iter()
            .any(|i| self.contains(i.key().as_str()))
    }

    /// True when instructions were added since the last
    /// [`clear_dirty`](Self::clear_dirty).
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Moves the instructions of `other` into this transaction.
    ///
    /// NEW transactions merge into NEW or PENDING ones; PENDING ones only
    /// merge into PENDING ones. The donor is consumed and its id retired.
    pub(crate) fn merge(&mut self, other: Transaction) -> TxnResult<()> {
        use TransactionState::{New, Pending};

        let allowed = matches!(
            (self.state, other.state),
            (New | Pending, New) | (Pending, Pending)
        );
        if !allowed {
            return Err(TxnError::InvalidMerge {
                target: self.id,
                target_state: self.state,
                donor_state: other.state,
            });
        }

        for instruction in other.instructions {
            // `add_instruction` cannot fail here: self is NEW or PENDING.
            self.add_instruction(instruction)?;
        }
        self.dirty = true;
        Ok(())
    }

    /// NEW -> PENDING: marks every object pending.
    pub(crate) fn set_pending(&mut self) -> TxnResult<()> {
        self.advance(TransactionState::Pending)?;
        for instruction in &mut self.instructions {
            instruction.mark_pending();
        }
        Ok(())
    }

    /// PENDING -> COMMITTED: runs `precommit` and `commit` on every object
    /// in insertion order.
    ///
    /// Objects that already disappeared count as resolved immediately.
    pub(crate) fn commit(
        &mut self,
        deadline: Instant,
        signals: &Sender<SignalEvent>,
    ) -> TxnResult<()> {
        self.advance(TransactionState::Committed)?;
        self.deadline = Some(deadline);
        self.outstanding = self.instructions.len();

        let id = self.id;
        for (index, instruction) in self.instructions.iter_mut().enumerate() {
            let key = instruction.key().clone();
            let sender = signals.clone();
            let committed =
                instruction.commit(move || ReadySignal::new(id, index, key, sender));
            if !committed {
                self.outstanding -= 1;
            }
        }
        Ok(())
    }

    /// Records an object's answer for the instruction at `index`.
    ///
    /// Returns true if the answer counted toward convergence.
    pub(crate) fn resolve(&mut self, index: usize, resolution: Resolution) -> bool {
        if self.state != TransactionState::Committed {
            return false;
        }
        let Some(instruction) = self.instructions.get_mut(index) else {
            return false;
        };
        if !instruction.resolve(resolution) {
            return false;
        }
        self.outstanding -= 1;
        true
    }

    /// True when committed and every instruction has answered.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.state == TransactionState::Committed && self.outstanding == 0
    }

    /// COMMITTED -> DONE: applies every object in insertion order.
    pub(crate) fn apply(&mut self, outcome: Outcome) -> TxnResult<()> {
        self.advance(TransactionState::Done)?;
        for instruction in &mut self.instructions {
            if outcome == Outcome::TimedOut && instruction.status() == InstructionStatus::Committed {
                tracing::debug!(
                    txn = %self.id,
                    object = %instruction.key(),
                    "applying without ready"
                );
            }
            instruction.apply();
        }
        self.outcome = Some(outcome);
        Ok(())
    }

    fn advance(&mut self, to: TransactionState) -> TxnResult<()> {
        if self.state.next() != Some(to) {
            return Err(TxnError::invalid_transition(self.id, self.state, to));
        }
        self.state = to;
        Ok(())
    }

    fn ensure_open(&self) -> TxnResult<()> {
        match self.state {
            TransactionState::New | TransactionState::Pending => Ok(()),
            state => Err(TxnError::Sealed { id: self.id, state }),
        }
    }
}


