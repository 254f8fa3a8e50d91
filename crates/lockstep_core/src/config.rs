//! Transaction manager configuration.

use crate::error::{TxnError, TxnResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Largest accepted commit timeout: one day.
pub const MAX_TRANSACTION_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

/// Configuration for a transaction manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long a committed transaction waits for its objects before it is
    /// applied anyway, in milliseconds.
    pub transaction_timeout_ms: u64,

    /// Number of events kept in the feed history for polling.
    pub event_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transaction_timeout_ms: 100,
            event_history: 1024,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the commit timeout.
    #[must_use]
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the event history size.
    #[must_use]
    pub const fn event_history(mut self, size: usize) -> Self {
        self.event_history = size;
        self
    }

    /// Returns the commit timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> TxnResult<()> {
        if self.transaction_timeout_ms == 0 {
            return Err(TxnError::invalid_config(
                "transaction_timeout_ms must be greater than zero",
            ));
        }
        if self.transaction_timeout_ms > MAX_TRANSACTION_TIMEOUT_MS {
            return Err(TxnError::invalid_config(format!(
                "transaction_timeout_ms must be at most {MAX_TRANSACTION_TIMEOUT_MS}"
            )));
        }
        if self.event_history == 0 {
            return Err(TxnError::invalid_config(
                "event_history must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Process-wide configuration handle.
///
/// Clones share the same underlying values. The manager reads the timeout
/// through this handle every time it commits, so updates apply to the next
/// commit without touching transactions already in flight.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    /// Wraps a configuration after validating it.
    pub fn new(config: Config) -> TxnResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(config)),
        })
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn get(&self) -> Config {
        self.inner.read().clone()
    }

    /// Returns the current commit timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.read().timeout()
    }

    /// Replaces the configuration. Invalid values leave the old one in place.
    pub fn set(&self, config: Config) -> TxnResult<()> {
        config.validate()?;
        *self.inner.write() = config;
        Ok(())
    }

    /// Edits the configuration in place. Invalid results are discarded.
    pub fn update<F>(&self, f: F) -> TxnResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut next = self.get();
        f(&mut next);
        self.set(next)
    }
}


