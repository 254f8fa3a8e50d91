//! Core type definitions for Lockstep.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused by the
/// manager that allocated them, not even after a merge or a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next transaction ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Stable identity of a transactable object.
///
/// Two instructions conflict exactly when their keys are equal, so a key
/// must stay the same for the whole lifetime of the object (one key per
/// window, one per output).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Creates a key from any string-like value.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(key.as_ref().to_owned())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ObjectKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl Borrow<str> for ObjectKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        let t2 = t1.next();
        assert!(t1 < t2);
        assert_eq!(t2.as_u64(), 2);
    }

    #[test]
    fn transaction_id_display() {
        assert_eq!(format!("{}", TransactionId::new(42)), "txn:42");
    }

    #[test]
    fn object_key_lookup_by_str() {
        let mut keys = BTreeSet::new();
        keys.insert(ObjectKey::from("view-1"));
        keys.insert(ObjectKey::from(String::from("output-DP-1")));

        assert!(keys.contains("view-1"));
        assert!(!keys.contains("view-2"));
        assert_eq!(ObjectKey::new("view-1").to_string(), "view-1");
    }

    #[test]
    fn object_key_serializes_as_string() {
        let key = ObjectKey::new("view-7");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"view-7\"");
    }
}
