//! Transaction manager.

use crate::clock::{Clock, SystemClock};
use crate::config::SharedConfig;
use crate::error::{TxnError, TxnResult};
use crate::events::{TransactionEvent, TransactionFeed};
use crate::object::{Resolution, SignalEvent};
use crate::stats::ManagerStats;
use crate::timer::{TimerQueue, TimerToken};
use crate::transaction::state::{Outcome, Transaction, TransactionState};
use crate::types::TransactionId;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Instant;

type NewTransactionHook = Box<dyn FnMut(&mut Transaction)>;

/// Schedules transactions so that conflicting ones never overlap.
///
/// The manager provides:
/// - Per-object serialization: two in-flight transactions never share an
///   object
/// - Merging: a transaction that conflicts with a queued one joins it, so
///   both land in the same frame once the object is free
/// - Bounded staleness: every committed transaction is applied at the
///   latest when its timeout expires
///
/// ## Queued and in-flight
///
/// A submitted transaction is either *queued* ([`TransactionState::Pending`],
/// waiting for an in-flight transaction on one of its objects) or
/// *in flight* ([`TransactionState::Committed`], waiting for its objects).
/// Queued transactions are pairwise disjoint, in-flight transactions are
/// pairwise disjoint, and a queued transaction is committed, in submission
/// order, as soon as no in-flight transaction touches its objects.
///
/// ## Driving
///
/// Nothing happens in the background. The host calls
/// [`dispatch`](Self::dispatch) whenever an object may have answered and
/// when [`next_deadline`](Self::next_deadline) passes.
pub struct TransactionManager {
    /// Process-wide configuration, read at every commit.
    config: SharedConfig,
    /// Time source for deadlines.
    clock: Box<dyn Clock>,
    /// Next transaction ID.
    next_id: TransactionId,
    /// Queued transactions, in submission order.
    pending: Vec<Transaction>,
    /// In-flight transactions, in commit order.
    committed: Vec<Transaction>,
    /// Commit deadlines.
    timers: TimerQueue<TransactionId>,
    /// Timer of every in-flight transaction.
    timer_tokens: HashMap<TransactionId, TimerToken>,
    /// Handed to objects through their ready signals.
    signal_tx: Sender<SignalEvent>,
    /// Answers from objects, drained on dispatch.
    signal_rx: Receiver<SignalEvent>,
    /// Lifecycle notifications.
    feed: TransactionFeed,
    /// Counters.
    stats: ManagerStats,
    /// Run on every submitted transaction before it is scheduled.
    hooks: Vec<NewTransactionHook>,
}

impl TransactionManager {
    /// Creates a manager driven by the system clock.
    pub fn new(config: SharedConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    /// Creates a manager with a custom time source.
    pub fn with_clock(config: SharedConfig, clock: impl Clock + 'static) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel();
        let feed = TransactionFeed::with_max_history(config.get().event_history);
        Self {
            config,
            clock: Box::new(clock),
            next_id: TransactionId::new(1),
            pending: Vec::new(),
            committed: Vec::new(),
            timers: TimerQueue::new(),
            timer_tokens: HashMap::new(),
            signal_tx,
            signal_rx,
            feed,
            stats: ManagerStats::new(),
            hooks: Vec::new(),
        }
    }

    /// Begins a new, empty transaction.
    pub fn begin(&mut self) -> Transaction {
        let id = self.next_id;
        self.next_id = id.next();
        Transaction::new(id)
    }

    /// Registers a hook that sees every submitted transaction before it is
    /// scheduled. Hooks may add instructions.
    pub fn add_new_transaction_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&mut Transaction) + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    /// Hands a transaction to the manager.
    ///
    /// The transaction is merged into every queued transaction it
    /// conflicts with, or queued on its own, and then committed as soon as
    /// its objects are free. Returns the id of the transaction that now
    /// carries its instructions.
    pub fn submit(&mut self, mut txn: Transaction) -> TxnResult<TransactionId> {
        if txn.state() != TransactionState::New {
            return Err(TxnError::invalid_operation(format!(
                "{} is {}; only new transactions can be submitted",
                txn.id(),
                txn.state()
            )));
        }

        for hook in &mut self.hooks {
            hook(&mut txn);
        }

        let id = txn.id();
        self.stats.record_submit();
        self.feed.emit(TransactionEvent::Scheduled { id });
        tracing::debug!(txn = %id, objects = txn.len(), "scheduling transaction");

        let carrier = self.enqueue(txn)?;
        self.schedule();
        self.dispatch();
        Ok(carrier)
    }

    /// Processes object answers and expired deadlines.
    ///
    /// Finished transactions are applied and retired, and queued
    /// transactions they were blocking are committed. Repeats until nothing
    /// changes. Returns the number of transactions that finished.
    pub fn dispatch(&mut self) -> usize {
        let mut finished = 0;
        loop {
            self.drain_signals();

            let converged: Vec<_> = self
                .committed
                .iter()
                .filter(|txn| txn.is_converged())
                .map(Transaction::id)
                .collect();
            let mut progressed = 0;
            for id in converged {
                if self.finish(id, Outcome::Converged) {
                    progressed += 1;
                }
            }

            let now = self.clock.now();
            for id in self.timers.pop_expired(now) {
                self.timer_tokens.remove(&id);
                if self.finish(id, Outcome::TimedOut) {
                    progressed += 1;
                }
            }

            if progressed == 0 {
                return finished;
            }
            finished += progressed;
            self.schedule();
        }
    }

    /// Returns the earliest commit deadline, if anything is in flight.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Returns the state of a live transaction.
    ///
    /// Done and merged-away transactions are retired and return `None`.
    #[must_use]
    pub fn state_of(&self, id: TransactionId) -> Option<TransactionState> {
        self.pending
            .iter()
            .chain(&self.committed)
            .find(|txn| txn.id() == id)
            .map(Transaction::state)
    }

    /// Checks whether a queued transaction touches `key`.
    #[must_use]
    pub fn is_object_pending(&self, key: &str) -> bool {
        self.pending.iter().any(|txn| txn.contains(key))
    }

    /// Checks whether an in-flight transaction touches `key`.
    #[must_use]
    pub fn is_object_committed(&self, key: &str) -> bool {
        self.committed.iter().any(|txn| txn.contains(key))
    }

    /// Queued transactions, in submission order.
    pub fn pending(&self) -> impl Iterator<Item = &Transaction> {
        self.pending.iter()
    }

    /// In-flight transactions, in commit order.
    pub fn committed(&self) -> impl Iterator<Item = &Transaction> {
        self.committed.iter()
    }

    /// Returns true when nothing is queued or in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.committed.is_empty()
    }

    /// Returns the configuration handle.
    #[must_use]
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> Receiver<TransactionEvent> {
        self.feed.subscribe()
    }

    /// Returns the event feed.
    #[must_use]
    pub fn feed(&self) -> &TransactionFeed {
        &self.feed
    }

    /// Returns the counters.
    #[must_use]
    pub fn stats(&self) -> &ManagerStats {
        &self.stats
    }

    /// Drops every queued and in-flight transaction without applying it.
    ///
    /// Hooks, subscribers and counters stay. Ids keep increasing, so
    /// answers to dropped transactions are recognized as stale.
    pub fn reset(&mut self) {
        let dropped = self.pending.len() + self.committed.len();
        self.pending.clear();
        self.committed.clear();
        self.timers.clear();
        self.timer_tokens.clear();
        while self.signal_rx.try_recv().is_ok() {}
        self.feed.clear_history();
        tracing::debug!(dropped, "transaction manager reset");
    }

    /// Queues a transaction, merging it into conflicting queued ones.
    fn enqueue(&mut self, mut txn: Transaction) -> TxnResult<TransactionId> {
        let Some(first) = self.pending.iter().position(|queued| queued.intersects(&txn)) else {
            txn.set_pending()?;
            let id = txn.id();
            self.pending.push(txn);
            return Ok(id);
        };

        let donor = txn.id();
        self.pending[first].merge(txn)?;
        self.record_merge(first, donor);

        // The grown transaction may now overlap later queued ones.
        loop {
            let target = &self.pending[first];
            let Some(offset) = self.pending[first + 1..]
                .iter()
                .position(|queued| queued.intersects(target))
            else {
                break;
            };
            let absorbed = self.pending.remove(first + 1 + offset);
            let donor = absorbed.id();
            self.pending[first].merge(absorbed)?;
            self.record_merge(first, donor);
        }

        Ok(self.pending[first].id())
    }

    fn record_merge(&self, target: usize, donor: TransactionId) {
        let into = self.pending[target].id();
        self.stats.record_merge();
        self.feed.emit(TransactionEvent::Merged { into, from: donor });
        tracing::debug!(into = %into, from = %donor, "merged transaction");
    }

    /// Commits every queued transaction whose objects are free.
    fn schedule(&mut self) {
        let mut index = 0;
        while index < self.pending.len() {
            let blocked = self
                .committed
                .iter()
                .any(|in_flight| in_flight.intersects(&self.pending[index]));
            if blocked {
                let queued = &mut self.pending[index];
                if queued.is_dirty() {
                    tracing::trace!(txn = %queued.id(), objects = queued.len(), "queued transaction still blocked");
                    queued.clear_dirty();
                }
                index += 1;
                continue;
            }
            let txn = self.pending.remove(index);
            if let Err(txn) = self.commit(txn) {
                // Keep it queued so its objects stay accounted for.
                self.pending.insert(index, txn);
                index += 1;
            }
        }
    }

    /// Commits a queued transaction, handing it back if it was not PENDING.
    fn commit(&mut self, mut txn: Transaction) -> Result<(), Transaction> {
        let id = txn.id();
        // Read on every commit so configuration changes apply immediately.
        let timeout = self.config.timeout();
        let deadline = self.clock.now() + timeout;

        if let Err(err) = txn.commit(deadline, &self.signal_tx) {
            tracing::error!(txn = %id, error = %err, "failed to commit transaction");
            return Err(txn);
        }
        txn.clear_dirty();

        let token = self.timers.schedule(deadline, id);
        self.timer_tokens.insert(id, token);
        self.stats.record_commit();
        self.feed.emit(TransactionEvent::Committed {
            id,
            objects: txn.objects().into_iter().collect(),
        });
        tracing::debug!(
            txn = %id,
            objects = txn.len(),
            timeout_ms = timeout.as_millis() as u64,
            "committed transaction"
        );
        self.committed.push(txn);
        Ok(())
    }

    fn drain_signals(&mut self) {
        while let Ok(event) = self.signal_rx.try_recv() {
            let counted = self
                .committed
                .iter_mut()
                .find(|txn| txn.id() == event.transaction)
                .is_some_and(|txn| txn.resolve(event.index, event.resolution));

            if !counted {
                self.stats.record_stale();
                tracing::trace!(txn = %event.transaction, index = event.index, "ignoring stale signal");
                continue;
            }
            match event.resolution {
                Resolution::Ready => self.stats.record_ready(),
                Resolution::Cancelled => self.stats.record_cancel(),
            }
            tracing::trace!(
                txn = %event.transaction,
                index = event.index,
                resolution = ?event.resolution,
                "instruction answered"
            );
        }
    }

    /// Applies and retires an in-flight transaction.
    ///
    /// Returns false if the transaction is not in flight (already retired,
    /// merged away or unknown); calling it twice never applies twice.
    pub(crate) fn finish(&mut self, id: TransactionId, outcome: Outcome) -> bool {
        let Some(index) = self.committed.iter().position(|txn| txn.id() == id) else {
            tracing::trace!(txn = %id, "transaction already retired");
            return false;
        };
        let mut txn = self.committed.remove(index);
        if let Some(token) = self.timer_tokens.remove(&id) {
            self.timers.cancel(token);
        }

        let unanswered = txn.outstanding();
        if let Err(err) = txn.apply(outcome) {
            tracing::error!(txn = %id, error = %err, "failed to apply transaction");
            return false;
        }

        match outcome {
            Outcome::Converged => {
                self.stats.record_converged();
                tracing::debug!(txn = %id, "transaction converged");
            }
            Outcome::TimedOut => {
                self.stats.record_timeout();
                tracing::warn!(txn = %id, unanswered, "transaction timed out");
            }
        }
        self.feed.emit(TransactionEvent::Done { id, outcome });
        true
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.len())
            .field("committed", &self.committed.len())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}


