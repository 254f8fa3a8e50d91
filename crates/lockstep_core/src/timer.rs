//! Cancellable deadlines for a single-threaded event loop.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Handle for cancelling a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// Deadline-ordered set of pending timers.
///
/// Nothing here fires on its own: the owner asks for
/// [`next_deadline`](Self::next_deadline) to arm its real timer and calls
/// [`pop_expired`](Self::pop_expired) when it wakes up. Timers with equal
/// deadlines expire in the order they were scheduled.
#[derive(Debug)]
pub struct TimerQueue<T> {
    entries: BTreeMap<(Instant, u64), T>,
    deadlines: HashMap<u64, Instant>,
    next_seq: u64,
}

impl<T> TimerQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedules `value` to expire at `deadline`.
    pub fn schedule(&mut self, deadline: Instant, value: T) -> TimerToken {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((deadline, seq), value);
        self.deadlines.insert(seq, deadline);
        TimerToken(seq)
    }

    /// Cancels a timer, returning its value if it had not expired yet.
    pub fn cancel(&mut self, token: TimerToken) -> Option<T> {
        let deadline = self.deadlines.remove(&token.0)?;
        self.entries.remove(&(deadline, token.0))
    }

    /// Returns the earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns every timer whose deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<T> {
        let mut expired = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            let (deadline, seq) = *entry.key();
            if deadline > now {
                break;
            }
            self.deadlines.remove(&seq);
            expired.push(entry.remove());
        }
        expired
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no timer is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every pending timer.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.deadlines.clear();
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}


