//! Test fixtures and manager helpers.
//!
//! Provides scriptable objects and a harness that drives a
//! [`TransactionManager`] with a manual clock, so timeouts are exact and
//! tests never sleep.

use lockstep_core::{
    Clock, Config, ManualClock, ObjectKey, ObjectRef, Outcome, ReadySignal, SharedConfig, Transaction,
    TransactionEvent, TransactionId, TransactionManager, TransactionObject,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a [`MockObject`] answers a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Ready before `commit` returns.
    Immediate,
    /// Holds the signal until the test answers.
    Manual,
    /// Holds the signal and never answers.
    Never,
    /// Cancels before `commit` returns.
    Cancel,
}

/// A lifecycle hook invoked on an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// `set_pending`
    SetPending,
    /// `precommit`
    Precommit,
    /// `commit`
    Commit,
    /// `apply`
    Apply,
}

/// One recorded hook call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Call {
    /// Object the hook ran on.
    pub object: String,
    /// The hook.
    pub hook: Hook,
}

/// Shared, ordered record of hook calls across objects.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call.
    pub fn record(&self, object: &str, hook: Hook) {
        self.calls.lock().push(Call {
            object: object.to_owned(),
            hook,
        });
    }

    /// Returns every call so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Hooks that ran on `object`, in order.
    pub fn for_object(&self, object: &str) -> Vec<Hook> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.object == object)
            .map(|call| call.hook)
            .collect()
    }

    /// Number of times `hook` ran on `object`.
    pub fn count(&self, object: &str, hook: Hook) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.object == object && call.hook == hook)
            .count()
    }

    /// Forgets every call.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// A scriptable transactable object.
pub struct MockObject {
    key: String,
    mode: ResponseMode,
    log: CallLog,
    held: Option<ReadySignal>,
}

/// Shared handle to a [`MockObject`].
pub type MockRef = Arc<Mutex<MockObject>>;

impl MockObject {
    /// Creates an object that records into `log`.
    pub fn new(key: impl Into<String>, mode: ResponseMode, log: CallLog) -> Self {
        Self {
            key: key.into(),
            mode,
            log,
            held: None,
        }
    }

    /// Wraps the object into a shared handle.
    pub fn shared(self) -> MockRef {
        Arc::new(Mutex::new(self))
    }

    /// Current response mode.
    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// Changes how future commits are answered.
    pub fn set_mode(&mut self, mode: ResponseMode) {
        self.mode = mode;
    }

    /// True while a commit waits for an answer.
    pub fn is_waiting(&self) -> bool {
        self.held.is_some()
    }

    /// Takes the outstanding signal, unless the object never answers.
    pub fn take_signal(&mut self) -> Option<ReadySignal> {
        if self.mode == ResponseMode::Never {
            return None;
        }
        self.held.take()
    }
}

impl TransactionObject for MockObject {
    fn object_key(&self) -> ObjectKey {
        ObjectKey::new(&self.key)
    }

    fn set_pending(&mut self) {
        self.log.record(&self.key, Hook::SetPending);
    }

    fn precommit(&mut self) {
        self.log.record(&self.key, Hook::Precommit);
    }

    fn commit(&mut self, signal: ReadySignal) {
        self.log.record(&self.key, Hook::Commit);
        match self.mode {
            ResponseMode::Immediate => signal.ready(),
            ResponseMode::Cancel => signal.cancel(),
            ResponseMode::Manual | ResponseMode::Never => self.held = Some(signal),
        }
    }

    fn apply(&mut self) {
        self.log.record(&self.key, Hook::Apply);
    }
}

impl std::fmt::Debug for MockObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockObject")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("waiting", &self.is_waiting())
            .finish()
    }
}

/// A manager on a manual clock plus a registry of mock objects.
///
/// Objects are created on first use in [`ResponseMode::Manual`]. Every
/// method that can make progress dispatches the manager and records the
/// resulting events.
pub struct TestHarness {
    /// The manager under test.
    pub manager: TransactionManager,
    /// The manager's clock.
    pub clock: ManualClock,
    /// Hook calls of every object.
    pub log: CallLog,
    objects: BTreeMap<String, MockRef>,
    events: Receiver<TransactionEvent>,
    seen: Vec<TransactionEvent>,
    start: Instant,
}

impl TestHarness {
    /// Creates a harness whose manager times out after `timeout_ms`.
    pub fn new(timeout_ms: u64) -> Self {
        let config = Config::new().transaction_timeout(Duration::from_millis(timeout_ms));
        let config = SharedConfig::new(config).expect("Invalid harness configuration");
        let clock = ManualClock::new();
        let start = clock.now();
        let manager = TransactionManager::with_clock(config, clock.clone());
        let events = manager.subscribe();
        Self {
            manager,
            clock,
            log: CallLog::new(),
            objects: BTreeMap::new(),
            events,
            seen: Vec::new(),
            start,
        }
    }

    /// Returns the object registered under `key`, creating it if needed,
    /// and sets its response mode.
    pub fn object(&mut self, key: &str, mode: ResponseMode) -> MockRef {
        let object = self.get_or_create(key);
        object.lock().set_mode(mode);
        object
    }

    fn get_or_create(&mut self, key: &str) -> MockRef {
        let log = self.log.clone();
        self.objects
            .entry(key.to_owned())
            .or_insert_with(|| MockObject::new(key, ResponseMode::Manual, log).shared())
            .clone()
    }

    /// Drops the harness's handle to `key`, destroying the object unless a
    /// test still holds it.
    pub fn destroy(&mut self, key: &str) -> bool {
        let destroyed = self.objects.remove(key).is_some();
        self.manager.dispatch();
        self.collect();
        destroyed
    }

    /// Builds a transaction touching `keys` without submitting it.
    pub fn transaction(&mut self, keys: &[&str]) -> Transaction {
        let mut txn = self.manager.begin();
        for key in keys {
            let object: ObjectRef = self.get_or_create(key);
            txn.add_object(&object)
                .expect("New transactions accept instructions");
        }
        txn
    }

    /// Submits a transaction touching `keys`; returns its carrier id.
    pub fn submit(&mut self, keys: &[&str]) -> TransactionId {
        let txn = self.transaction(keys);
        self.submit_txn(txn)
    }

    /// Submits a prepared transaction; returns its carrier id.
    pub fn submit_txn(&mut self, txn: Transaction) -> TransactionId {
        let id = self
            .manager
            .submit(txn)
            .expect("Harness transactions are always new");
        self.collect();
        id
    }

    /// Answers the outstanding commit of `key` with ready.
    ///
    /// Returns false if nothing was waiting or the object never answers.
    pub fn ready(&mut self, key: &str) -> bool {
        self.answer(key, ReadySignal::ready)
    }

    /// Answers the outstanding commit of `key` with cancel.
    pub fn cancel(&mut self, key: &str) -> bool {
        self.answer(key, ReadySignal::cancel)
    }

    fn answer(&mut self, key: &str, resolve: fn(ReadySignal)) -> bool {
        let signal = match self.objects.get(key) {
            Some(object) => object.lock().take_signal(),
            None => None,
        };
        let Some(signal) = signal else {
            return false;
        };
        resolve(signal);
        self.manager.dispatch();
        self.collect();
        true
    }

    /// Moves the clock forward and dispatches. Returns the number of
    /// transactions that finished.
    pub fn advance(&mut self, ms: u64) -> usize {
        self.clock.advance(Duration::from_millis(ms));
        let finished = self.manager.dispatch();
        self.collect();
        finished
    }

    /// Time since the harness was created.
    pub fn elapsed(&self) -> Duration {
        self.clock.now() - self.start
    }

    /// Every event seen so far.
    pub fn events(&mut self) -> &[TransactionEvent] {
        self.collect();
        &self.seen
    }

    /// How `id` finished, if it did.
    pub fn outcome(&mut self, id: TransactionId) -> Option<Outcome> {
        self.collect();
        self.seen.iter().find_map(|event| match event {
            TransactionEvent::Done { id: done, outcome } if *done == id => Some(*outcome),
            _ => None,
        })
    }

    /// Number of `apply` calls on `key`.
    pub fn apply_count(&self, key: &str) -> usize {
        self.log.count(key, Hook::Apply)
    }

    /// Number of `commit` calls on `key`.
    pub fn commit_count(&self, key: &str) -> usize {
        self.log.count(key, Hook::Commit)
    }

    fn collect(&mut self) {
        self.seen.extend(self.events.try_iter());
    }
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("manager", &self.manager)
            .field("objects", &self.objects.len())
            .field("events", &self.seen.len())
            .finish()
    }
}


