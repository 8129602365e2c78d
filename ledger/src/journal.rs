//! Ledger entries for double-entry bookkeeping.

use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, EntryId, Timestamp};

/// Direction of an entry relative to its account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Money leaves the account (negative amount).
    Debit,
    /// Money enters the account (positive amount).
    Credit,
}

/// An immutable ledger line attributing a balance change to one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique entry ID.
    pub id: EntryId,
    /// Account affected.
    pub account_id: AccountId,
    /// Signed amount: positive = credit, negative = debit.
    pub amount: i64,
    /// When this entry was created.
    pub created_at: Timestamp,
}

impl Entry {
    /// Get the entry direction.
    pub fn entry_type(&self) -> EntryType {
        if self.amount < 0 {
            EntryType::Debit
        } else {
            EntryType::Credit
        }
    }
}

/// Parameters for appending an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub amount: i64,
}

impl NewEntry {
    /// Debit `amount` from `account_id`.
    pub fn debit(account_id: AccountId, amount: i64) -> Self {
        Self {
            account_id,
            amount: -amount,
        }
    }

    /// Credit `amount` to `account_id`.
    pub fn credit(account_id: AccountId, amount: i64) -> Self {
        Self { account_id, amount }
    }
}

/// Check a set of entries nets to zero.
pub fn is_balanced<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> bool {
    entries
        .into_iter()
        .try_fold(0i64, |sum, entry| sum.checked_add(entry.amount))
        == Some(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, account: i64, amount: i64) -> Entry {
        Entry {
            id: EntryId::new(id),
            account_id: AccountId::new(account),
            amount,
            created_at: simplebank_common::now(),
        }
    }

    #[test]
    fn test_new_entry_signs() {
        assert_eq!(NewEntry::debit(AccountId::new(1), 10).amount, -10);
        assert_eq!(NewEntry::credit(AccountId::new(2), 10).amount, 10);
    }

    #[test]
    fn test_entry_type() {
        assert_eq!(entry(1, 1, -10).entry_type(), EntryType::Debit);
        assert_eq!(entry(2, 2, 10).entry_type(), EntryType::Credit);
    }

    #[test]
    fn test_balanced_entries() {
        let entries = vec![entry(1, 1, -1000), entry(2, 2, 1000)];
        assert!(is_balanced(&entries));
    }

    #[test]
    fn test_unbalanced_entries() {
        let entries = vec![entry(1, 1, -1000)];
        assert!(!is_balanced(&entries));
    }
}
