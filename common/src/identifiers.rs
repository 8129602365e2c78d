//! Identifier types for SimpleBank ledger entities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an account.
///
/// Account identifiers are storage-assigned and totally ordered; the
/// ordering is what transfers use to decide which row to lock first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    /// Create an account ID from its raw value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Unique identifier for a transfer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(i64);

impl TransferId {
    /// Create a transfer ID from its raw value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TransferId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Unique identifier for a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(i64);

impl EntryId {
    /// Create an entry ID from its raw value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntryId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// The principal that owns an account.
///
/// Owners are usernames issued by the authentication layer: lowercase
/// letters, digits and underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Owner(String);

impl Owner {
    /// Create a new owner.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the owner as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate the owner format.
    pub fn is_valid(&self) -> bool {
        (3..=100).contains(&self.0.len())
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Owner {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Owner {
    fn from(s: String) -> Self {
        Self(s)
    }
}
