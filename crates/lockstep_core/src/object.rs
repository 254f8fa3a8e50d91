//! The contract every transactable object implements.

use crate::types::{ObjectKey, TransactionId};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Weak};

/// A stateful entity whose changes are committed through transactions.
///
/// Windows and outputs implement this. The object keeps its own pending
/// state; the transaction system only decides *when* that state is sent out
/// and *when* it becomes current.
pub trait TransactionObject {
    /// Stable identity used for conflict detection.
    fn object_key(&self) -> ObjectKey;

    /// Called once when the owning transaction is queued.
    ///
    /// Objects that track current and pending state separately can start
    /// treating the pending state as reserved here.
    fn set_pending(&mut self) {}

    /// Called right before [`commit`](Self::commit). Last chance to adjust
    /// the pending state.
    fn precommit(&mut self) {}

    /// Sends the pending state to whoever has to acknowledge it.
    ///
    /// Must not block. The object resolves `signal` once its new state is
    /// realized; if there is nothing to wait for it resolves it before
    /// returning. Dropping the signal without resolving it counts as a
    /// cancel.
    fn commit(&mut self, signal: ReadySignal);

    /// Makes the committed state current.
    ///
    /// Only flips state; must not start new transactions.
    fn apply(&mut self);
}

/// Shared handle to a transactable object.
pub type ObjectRef = Arc<Mutex<dyn TransactionObject>>;

/// Non-owning handle held by instructions.
pub type WeakObjectRef = Weak<Mutex<dyn TransactionObject>>;

/// Wraps an object into an [`ObjectRef`].
pub fn object_ref<T>(object: T) -> ObjectRef
where
    T: TransactionObject + 'static,
{
    Arc::new(Mutex::new(object))
}

/// How an instruction finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The object reached its pending state.
    Ready,
    /// The object can no longer reach its pending state.
    Cancelled,
}

/// A resolution delivered to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEvent {
    /// Transaction the instruction belongs to.
    pub transaction: TransactionId,
    /// Position of the instruction inside that transaction.
    pub index: usize,
    /// How it finished.
    pub resolution: Resolution,
}

/// One-shot readiness handle given to [`TransactionObject::commit`].
///
/// Resolving consumes the handle, so an instruction can only be resolved
/// once. An unresolved handle that is dropped (for example because its
/// object was destroyed) resolves as [`Resolution::Cancelled`].
pub struct ReadySignal {
    transaction: TransactionId,
    index: usize,
    key: ObjectKey,
    sender: Sender<SignalEvent>,
    resolved: bool,
}

impl ReadySignal {
    pub(crate) fn new(
        transaction: TransactionId,
        index: usize,
        key: ObjectKey,
        sender: Sender<SignalEvent>,
    ) -> Self {
        Self {
            transaction,
            index,
            key,
            sender,
            resolved: false,
        }
    }

    /// The transaction waiting on this signal.
    #[must_use]
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    /// The object this signal was issued for.
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Reports that the pending state has been realized.
    pub fn ready(mut self) {
        self.resolve(Resolution::Ready);
    }

    /// Reports that the pending state can no longer be realized.
    pub fn cancel(mut self) {
        self.resolve(Resolution::Cancelled);
    }

    fn resolve(&mut self, resolution: Resolution) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        let event = SignalEvent {
            transaction: self.transaction,
            index: self.index,
            resolution,
        };
        // The manager may already be gone; nothing is waiting then.
        let _ = self.sender.send(event);
    }
}

impl Drop for ReadySignal {
    fn drop(&mut self) {
        self.resolve(Resolution::Cancelled);
    }
}

impl fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadySignal")
            .field("transaction", &self.transaction)
            .field("index", &self.index)
            .field("key", &self.key)
            .field("resolved", &self.resolved)
            .finish()
    }
}


