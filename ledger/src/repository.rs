//! Ledger repository contracts.
//!
//! [`LedgerRepository`] is the transactional accessor handed to a unit of
//! work: every call made through one value shares a single storage
//! transaction. [`LedgerQueries`] is the plain read/open surface used
//! outside any scope.

use async_trait::async_trait;
use simplebank_common::{AccountId, BankError, EntryId, Owner, Result, TransferId};

use crate::account::{Account, NewAccount};
use crate::journal::{Entry, NewEntry};
use crate::transfer::{NewTransfer, Transfer};

/// Maximum page size accepted by list queries.
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Row accessors bound to one open transaction.
#[async_trait]
pub trait LedgerRepository: Send {
    /// Read an account and take an exclusive row lock on it.
    ///
    /// Blocks until the lock is granted. Fails with `TransactionConflict`
    /// when the backend's lock timeout or deadlock detector fires, and
    /// `NotFound` when the row does not exist.
    async fn lock_account_for_update(&mut self, id: AccountId) -> Result<Account>;

    /// Apply a signed delta to an account balance and return the updated row.
    async fn add_balance(&mut self, id: AccountId, delta: i64) -> Result<Account>;

    /// Append a transfer record.
    async fn insert_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer>;

    /// Append a ledger entry.
    async fn insert_entry(&mut self, entry: NewEntry) -> Result<Entry>;

    /// Read an account without locking it.
    async fn get_account(&mut self, id: AccountId) -> Result<Account>;
}

/// Pagination window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    /// Create a validated page.
    pub fn new(limit: i64, offset: i64) -> Result<Self> {
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(BankError::invalid_field(
                "limit",
                format!("limit must be between 1 and {}", MAX_PAGE_LIMIT),
            ));
        }
        if offset < 0 {
            return Err(BankError::invalid_field("offset", "offset must not be negative"));
        }
        Ok(Self { limit, offset })
    }

    /// The first `MAX_PAGE_LIMIT` rows.
    pub fn first() -> Self {
        Self {
            limit: MAX_PAGE_LIMIT,
            offset: 0,
        }
    }

    /// The page that follows this one. The offset saturates at `i64::MAX`.
    pub fn next(&self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset.saturating_add(self.limit),
        }
    }
}

/// Non-transactional reads and account opening.
#[async_trait]
pub trait LedgerQueries: Send + Sync {
    /// Open a new account.
    async fn create_account(&self, account: NewAccount) -> Result<Account>;

    /// Get an account by ID.
    async fn get_account(&self, id: AccountId) -> Result<Account>;

    /// List accounts ordered by ID, optionally restricted to one owner.
    async fn list_accounts(&self, owner: Option<&Owner>, page: Page) -> Result<Vec<Account>>;

    /// Get a transfer by ID.
    async fn get_transfer(&self, id: TransferId) -> Result<Transfer>;

    /// List transfers touching either account, ordered by ID.
    ///
    /// Matches transfers whose source is `from` or whose destination is
    /// `to`.
    async fn list_transfers(
        &self,
        from: AccountId,
        to: AccountId,
        page: Page,
    ) -> Result<Vec<Transfer>>;

    /// Get an entry by ID.
    async fn get_entry(&self, id: EntryId) -> Result<Entry>;

    /// List an account's entries ordered by ID.
    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_validation() {
        assert!(Page::new(5, 0).is_ok());
        assert!(Page::new(0, 0).is_err());
        assert!(Page::new(MAX_PAGE_LIMIT + 1, 0).is_err());
        assert!(Page::new(5, -1).is_err());
    }

    #[test]
    fn test_page_next() {
        let page = Page::new(10, 0).unwrap().next();
        assert_eq!(page, Page { limit: 10, offset: 10 });
    }

    #[test]
    fn test_page_next_near_max_offset_saturates() {
        let page = Page::new(100, i64::MAX - 10).unwrap().next();
        assert_eq!(page.offset, i64::MAX);
        assert_eq!(page.next().offset, i64::MAX);
    }
}
