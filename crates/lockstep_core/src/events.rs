//! Transaction lifecycle notifications.
//!
//! The feed lets observers (a view that wants to know whether its resize
//! landed before the deadline, a debug overlay, a test) follow transactions
//! without hooking into the manager.
//!
//! # Usage
//!
//! ```rust,ignore
//! let events = manager.subscribe();
//! manager.submit(txn)?;
//! manager.dispatch();
//!
//! for event in events.try_iter() {
//!     if let TransactionEvent::Done { id, outcome } = event {
//!         println!("{id} finished: {outcome:?}");
//!     }
//! }
//! ```

use crate::transaction::Outcome;
use crate::types::{ObjectKey, TransactionId};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};

/// A lifecycle event emitted by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransactionEvent {
    /// A transaction was handed to the manager.
    Scheduled {
        /// The submitted transaction.
        id: TransactionId,
    },
    /// A transaction was absorbed by a queued one.
    Merged {
        /// The surviving transaction.
        into: TransactionId,
        /// The absorbed transaction; its id is retired.
        from: TransactionId,
    },
    /// A transaction was sent to its objects.
    Committed {
        /// The committed transaction.
        id: TransactionId,
        /// Objects it touches.
        objects: Vec<ObjectKey>,
    },
    /// A transaction was applied.
    Done {
        /// The finished transaction.
        id: TransactionId,
        /// Whether it converged or timed out.
        outcome: Outcome,
    },
}

impl TransactionEvent {
    /// Returns the transaction the event is about.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        match self {
            Self::Scheduled { id } | Self::Committed { id, .. } | Self::Done { id, .. } => *id,
            Self::Merged { from, .. } => *from,
        }
    }
}

/// Distributes transaction events to subscribers.
///
/// The feed:
/// - Preserves emission order
/// - Supports multiple subscribers
/// - Keeps a bounded history for polling
pub struct TransactionFeed {
    /// Subscribers (senders).
    subscribers: RwLock<Vec<Sender<TransactionEvent>>>,
    /// Recent events, oldest first, tagged with a running sequence.
    history: RwLock<VecDeque<(u64, TransactionEvent)>>,
    /// Sequence of the next event.
    next_seq: RwLock<u64>,
    /// Maximum history size.
    max_history: usize,
}

impl TransactionFeed {
    /// Creates a feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            next_seq: RwLock::new(1),
            max_history: max_history.max(1),
        }
    }

    /// Subscribes to the feed.
    ///
    /// Returns a receiver for all future events. Receivers that are dropped
    /// are pruned on the next emission.
    pub fn subscribe(&self) -> Receiver<TransactionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to all subscribers.
    pub fn emit(&self, event: TransactionEvent) {
        let seq = {
            let mut next = self.next_seq.write();
            let seq = *next;
            *next += 1;
            seq
        };

        {
            let mut history = self.history.write();
            history.push_back((seq, event.clone()));
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns events with a sequence greater than `cursor`, up to `limit`,
    /// paired with their sequence.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<(u64, TransactionEvent)> {
        self.history
            .read()
            .iter()
            .filter(|(seq, _)| *seq > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of events in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    /// Drops the history; subscribers stay connected.
    pub fn clear_history(&self) {
        self.history.write().clear();
    }
}

impl std::fmt::Debug for TransactionFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionFeed")
            .field("subscribers", &self.subscriber_count())
            .field("history_len", &self.history_len())
            .field("max_history", &self.max_history)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(id: u64) -> TransactionEvent {
        TransactionEvent::Done {
            id: TransactionId::new(id),
            outcome: Outcome::Converged,
        }
    }

    #[test]
    fn emit_and_receive() {
        let feed = TransactionFeed::with_max_history(16);
        let rx = feed.subscribe();

        feed.emit(done(1));
        assert_eq!(rx.try_recv().unwrap(), done(1));
    }

    #[test]
    fn multiple_subscribers() {
        let feed = TransactionFeed::with_max_history(16);
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();

        feed.emit(done(1));

        assert_eq!(rx1.recv().unwrap(), done(1));
        assert_eq!(rx2.recv().unwrap(), done(1));
    }

    #[test]
    fn subscriber_cleanup() {
        let feed = TransactionFeed::with_max_history(16);
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);
        feed.emit(done(1));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn poll_from_cursor() {
        let feed = TransactionFeed::with_max_history(16);
        for i in 1..=5 {
            feed.emit(done(i));
        }

        let events = feed.poll(2, 10);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], (3, done(3)));
        assert_eq!(events[2], (5, done(5)));
    }

    #[test]
    fn history_is_bounded() {
        let feed = TransactionFeed::with_max_history(3);
        for i in 1..=10 {
            feed.emit(done(i));
        }

        assert_eq!(feed.history_len(), 3);
        let events = feed.poll(0, 100);
        assert_eq!(events[0].0, 8);
    }

    #[test]
    fn merged_event_is_about_the_donor() {
        let event = TransactionEvent::Merged {
            into: TransactionId::new(1),
            from: TransactionId::new(2),
        };
        assert_eq!(event.id(), TransactionId::new(2));
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_string(&done(4)).unwrap();
        assert_eq!(json, r#"{"event":"done","id":4,"outcome":"converged"}"#);
    }
}
