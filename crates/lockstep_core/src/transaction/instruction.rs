//! A single object's change inside a transaction.

use crate::object::{ObjectRef, ReadySignal, Resolution, WeakObjectRef};
use crate::types::ObjectKey;
use std::fmt;
use std::sync::Arc;

/// Progress of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstructionStatus {
    /// Added to a transaction that has not been queued yet.
    Created,
    /// Its transaction is queued; the object has been marked pending.
    Pending,
    /// The object has been asked to commit and has not answered yet.
    Committed,
    /// The object reported its new state as realized.
    Ready,
    /// The object can no longer reach the new state (or is gone).
    Cancelled,
    /// The new state was made current.
    Applied,
}

/// One object's pending change plus its readiness tracking.
///
/// The instruction never owns its object. If the object is dropped while
/// the instruction is alive, every hook is skipped and the instruction
/// counts as cancelled.
pub struct Instruction {
    key: ObjectKey,
    target: WeakObjectRef,
    status: InstructionStatus,
}

impl Instruction {
    /// Creates an instruction for `object`.
    pub fn new(object: &ObjectRef) -> Self {
        let key = object.lock().object_key();
        Self {
            key,
            target: Arc::downgrade(object),
            status: InstructionStatus::Created,
        }
    }

    /// The object this instruction operates on.
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Current progress.
    #[must_use]
    pub fn status(&self) -> InstructionStatus {
        self.status
    }

    /// Returns the target if it is still alive.
    #[must_use]
    pub fn target(&self) -> Option<ObjectRef> {
        self.target.upgrade()
    }

    /// True once the object answered (or disappeared).
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.status,
            InstructionStatus::Ready | InstructionStatus::Cancelled | InstructionStatus::Applied
        )
    }

    pub(crate) fn mark_pending(&mut self) {
        if self.status != InstructionStatus::Created {
            return;
        }
        if let Some(object) = self.target() {
            object.lock().set_pending();
        }
        self.status = InstructionStatus::Pending;
    }

    /// Runs `precommit` then `commit` on the target.
    ///
    /// Returns false when the target is gone, in which case the instruction
    /// is cancelled on the spot and no signal is issued.
    pub(crate) fn commit<F>(&mut self, signal: F) -> bool
    where
        F: FnOnce() -> ReadySignal,
    {
        let Some(object) = self.target() else {
            tracing::debug!(object = %self.key, "object gone before commit");
            self.status = InstructionStatus::Cancelled;
            return false;
        };

        self.status = InstructionStatus::Committed;
        let mut guard = object.lock();
        guard.precommit();
        guard.commit(signal());
        true
    }

    /// Records the object's answer. Only the first answer counts.
    pub(crate) fn resolve(&mut self, resolution: Resolution) -> bool {
        if self.status != InstructionStatus::Committed {
            return false;
        }
        self.status = match resolution {
            Resolution::Ready => InstructionStatus::Ready,
            Resolution::Cancelled => InstructionStatus::Cancelled,
        };
        true
    }

    pub(crate) fn apply(&mut self) {
        if self.status == InstructionStatus::Applied {
            return;
        }
        if let Some(object) = self.target() {
            object.lock().apply();
        }
        self.status = InstructionStatus::Applied;
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruction")
            .field("key", &self.key)
            .field("status", &self.status)
            .field("alive", &(self.target.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{object_ref, SignalEvent, TransactionObject};
    use crate::types::TransactionId;
    use std::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        held: Option<ReadySignal>,
    }

    impl TransactionObject for Recorder {
        fn object_key(&self) -> ObjectKey {
            ObjectKey::new("recorder")
        }

        fn set_pending(&mut self) {
            self.calls.push("set_pending");
        }

        fn precommit(&mut self) {
            self.calls.push("precommit");
        }

        fn commit(&mut self, signal: ReadySignal) {
            self.calls.push("commit");
            self.held = Some(signal);
        }

        fn apply(&mut self) {
            self.calls.push("apply");
        }
    }

    fn signal_for(
        key: &ObjectKey,
    ) -> (impl FnOnce() -> ReadySignal, mpsc::Receiver<SignalEvent>) {
        let (tx, rx) = mpsc::channel();
        let key = key.clone();
        (move || ReadySignal::new(TransactionId::new(1), 0, key, tx), rx)
    }

    #[test]
    fn hooks_run_in_lifecycle_order() {
        let recorder = Arc::new(parking_lot::Mutex::new(Recorder::default()));
        let object: ObjectRef = recorder.clone();
        let mut instruction = Instruction::new(&object);
        assert_eq!(instruction.key().as_str(), "recorder");

        instruction.mark_pending();
        let (signal, _rx) = signal_for(instruction.key());
        assert!(instruction.commit(signal));
        assert_eq!(instruction.status(), InstructionStatus::Committed);

        assert!(instruction.resolve(Resolution::Ready));
        instruction.apply();

        assert_eq!(
            recorder.lock().calls,
            vec!["set_pending", "precommit", "commit", "apply"]
        );
        assert_eq!(instruction.status(), InstructionStatus::Applied);
    }

    #[test]
    fn only_first_resolution_counts() {
        let object = object_ref(Recorder::default());
        let mut instruction = Instruction::new(&object);
        instruction.mark_pending();
        let (signal, _rx) = signal_for(instruction.key());
        instruction.commit(signal);

        assert!(instruction.resolve(Resolution::Cancelled));
        assert!(!instruction.resolve(Resolution::Ready));
        assert_eq!(instruction.status(), InstructionStatus::Cancelled);
    }

    #[test]
    fn dropped_object_is_cancelled_at_commit() {
        let object = object_ref(Recorder::default());
        let mut instruction = Instruction::new(&object);
        instruction.mark_pending();
        drop(object);

        let (signal, rx) = signal_for(instruction.key());
        assert!(!instruction.commit(signal));
        assert_eq!(instruction.status(), InstructionStatus::Cancelled);
        assert!(instruction.is_resolved());
        assert!(rx.try_recv().is_err());

        // Applying a gone object only flips the status.
        instruction.apply();
        assert_eq!(instruction.status(), InstructionStatus::Applied);
    }

    #[test]
    fn mark_pending_runs_once() {
        let recorder = Arc::new(parking_lot::Mutex::new(Recorder::default()));
        let object: ObjectRef = recorder.clone();
        let mut instruction = Instruction::new(&object);

        instruction.mark_pending();
        instruction.mark_pending();
        assert_eq!(recorder.lock().calls, vec!["set_pending"]);
    }
}
