//! In-memory ledger backend.
//!
//! Behaves like a row-locking database running at read committed:
//!
//! - every account row has its own async lock, taken by
//!   `lock_account_for_update` (or implicitly by `add_balance`) and held
//!   until the transaction commits, rolls back or is dropped;
//! - lock waits give up after the configured lock timeout with a
//!   `TransactionConflict`, which also serves as deadlock detection;
//! - writes are staged on the transaction handle and published to the
//!   committed state in one step at commit. Dropping the handle discards
//!   them.
//!
//! Faults can be injected at each repository call, commit and rollback to
//! exercise failure paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{debug, warn};

use simplebank_common::{AccountId, BankError, EntryId, Owner, Result, TransferId};

use crate::account::{Account, NewAccount};
use crate::journal::{Entry, NewEntry};
use crate::repository::{LedgerQueries, LedgerRepository, Page};
use crate::scope::{LedgerBackend, Transactional};
use crate::transfer::{NewTransfer, Transfer};

/// Default time a transaction waits for a row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Where an injected fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    LockAccount,
    AddBalance,
    InsertTransfer,
    InsertEntry,
    Commit,
    Rollback,
}

impl FaultPoint {
    fn context(&self) -> &'static str {
        match self {
            FaultPoint::LockAccount => "locking account",
            FaultPoint::AddBalance => "updating account balance",
            FaultPoint::InsertTransfer => "inserting transfer",
            FaultPoint::InsertEntry => "inserting entry",
            FaultPoint::Commit => "committing transaction",
            FaultPoint::Rollback => "rolling back transaction",
        }
    }
}

/// What an injected fault looks like to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Fails with `InternalStorage`.
    Storage,
    /// Fails with `TransactionConflict`.
    Conflict,
}

#[derive(Default)]
struct CommittedState {
    accounts: BTreeMap<AccountId, Account>,
    transfers: BTreeMap<TransferId, Transfer>,
    entries: BTreeMap<EntryId, Entry>,
}

struct Shared {
    state: Mutex<CommittedState>,
    row_locks: DashMap<AccountId, Arc<RowLock<()>>>,
    next_account_id: AtomicI64,
    next_transfer_id: AtomicI64,
    next_entry_id: AtomicI64,
    faults: Mutex<Vec<(FaultPoint, FaultKind)>>,
    lock_timeout: Duration,
}

impl Shared {
    /// Fire the first queued fault for `point`, if any.
    fn check_fault(&self, point: FaultPoint) -> Result<()> {
        let mut faults = self.faults.lock();
        let Some(pos) = faults.iter().position(|(p, _)| *p == point) else {
            return Ok(());
        };
        let (_, kind) = faults.remove(pos);
        warn!(point = ?point, kind = ?kind, "Injected fault fired");
        Err(match kind {
            FaultKind::Storage => BankError::storage(point.context(), "injected fault"),
            FaultKind::Conflict => {
                BankError::conflict(format!("injected fault while {}", point.context()))
            }
        })
    }

    fn committed_account(&self, id: AccountId) -> Result<Account> {
        self.state
            .lock()
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| BankError::account_not_found(id))
    }
}

/// Shared in-memory ledger. Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct MemoryLedger {
    shared: Arc<Shared>,
}

impl MemoryLedger {
    /// Create an empty ledger whose transactions wait at most
    /// `lock_timeout` for a row lock.
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CommittedState::default()),
                row_locks: DashMap::new(),
                next_account_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                next_entry_id: AtomicI64::new(1),
                faults: Mutex::new(Vec::new()),
                lock_timeout,
            }),
        }
    }

    /// Queue a one-shot fault that fires the next time `point` is reached.
    pub fn inject_fault(&self, point: FaultPoint, kind: FaultKind) {
        self.shared.faults.lock().push((point, kind));
    }

    /// Number of committed transfers.
    pub fn transfer_count(&self) -> usize {
        self.shared.state.lock().transfers.len()
    }

    /// Number of committed entries.
    pub fn entry_count(&self) -> usize {
        self.shared.state.lock().entries.len()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

#[async_trait]
impl LedgerBackend for MemoryLedger {
    type Repository = MemoryRepository;

    async fn begin(&self) -> Result<MemoryRepository> {
        Ok(MemoryRepository {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            staged_balances: HashMap::new(),
            staged_transfers: Vec::new(),
            staged_entries: Vec::new(),
        })
    }
}

/// One open in-memory transaction.
///
/// Row locks live in `held` and are released when the handle goes away.
pub struct MemoryRepository {
    shared: Arc<Shared>,
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
    staged_balances: HashMap<AccountId, i64>,
    staged_transfers: Vec<Transfer>,
    staged_entries: Vec<Entry>,
}

impl MemoryRepository {
    async fn acquire_row_lock(&mut self, id: AccountId) -> Result<()> {
        if self.held.contains_key(&id) {
            return Ok(());
        }

        let lock = Arc::clone(
            self.shared
                .row_locks
                .entry(id)
                .or_insert_with(|| Arc::new(RowLock::new(())))
                .value(),
        );

        match tokio::time::timeout(self.shared.lock_timeout, lock.lock_owned()).await {
            Ok(guard) => {
                self.held.insert(id, guard);
                Ok(())
            }
            Err(_) => {
                debug!(account = %id, "Row lock wait timed out");
                Err(BankError::conflict(format!(
                    "lock wait timeout on account {}",
                    id
                )))
            }
        }
    }

    /// Committed row overlaid with this transaction's own staged balance.
    fn current_account(&self, id: AccountId) -> Result<Account> {
        let mut account = self.shared.committed_account(id)?;
        if let Some(balance) = self.staged_balances.get(&id) {
            account.balance = *balance;
        }
        Ok(account)
    }

    fn ensure_exists(&self, id: AccountId, context: &str) -> Result<()> {
        if self.shared.state.lock().accounts.contains_key(&id) {
            Ok(())
        } else {
            Err(BankError::storage(
                context,
                format!("account {} violates foreign key constraint", id),
            ))
        }
    }
}

#[async_trait]
impl LedgerRepository for MemoryRepository {
    async fn lock_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        self.shared.check_fault(FaultPoint::LockAccount)?;
        self.shared.committed_account(id)?;
        self.acquire_row_lock(id).await?;
        self.current_account(id)
    }

    async fn add_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        self.shared.check_fault(FaultPoint::AddBalance)?;
        self.shared.committed_account(id)?;
        self.acquire_row_lock(id).await?;

        let mut account = self.current_account(id)?;
        account.balance = account.balance.checked_add(delta).ok_or_else(|| {
            BankError::storage(FaultPoint::AddBalance.context(), "bigint out of range")
        })?;
        self.staged_balances.insert(id, account.balance);
        Ok(account)
    }

    async fn insert_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer> {
        self.shared.check_fault(FaultPoint::InsertTransfer)?;
        let context = FaultPoint::InsertTransfer.context();
        self.ensure_exists(transfer.from_account_id, context)?;
        self.ensure_exists(transfer.to_account_id, context)?;
        if transfer.amount <= 0 {
            return Err(BankError::storage(
                context,
                "amount violates check constraint transfers_amount_check",
            ));
        }

        let record = Transfer {
            id: TransferId::new(self.shared.next_transfer_id.fetch_add(1, Ordering::Relaxed)),
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: transfer.amount,
            created_at: simplebank_common::now(),
        };
        self.staged_transfers.push(record.clone());
        Ok(record)
    }

    async fn insert_entry(&mut self, entry: NewEntry) -> Result<Entry> {
        self.shared.check_fault(FaultPoint::InsertEntry)?;
        self.ensure_exists(entry.account_id, FaultPoint::InsertEntry.context())?;

        let record = Entry {
            id: EntryId::new(self.shared.next_entry_id.fetch_add(1, Ordering::Relaxed)),
            account_id: entry.account_id,
            amount: entry.amount,
            created_at: simplebank_common::now(),
        };
        self.staged_entries.push(record.clone());
        Ok(record)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        self.current_account(id)
    }
}

#[async_trait]
impl Transactional for MemoryRepository {
    async fn commit(mut self) -> Result<()> {
        self.shared.check_fault(FaultPoint::Commit)?;

        let mut state = self.shared.state.lock();
        for (id, balance) in self.staged_balances.drain() {
            if let Some(account) = state.accounts.get_mut(&id) {
                account.balance = balance;
            }
        }
        for transfer in self.staged_transfers.drain(..) {
            state.transfers.insert(transfer.id, transfer);
        }
        for entry in self.staged_entries.drain(..) {
            state.entries.insert(entry.id, entry);
        }
        drop(state);

        // Row locks are released as `self.held` drops here.
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.shared.check_fault(FaultPoint::Rollback)
    }
}

fn paginate<T: Clone>(items: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    let offset = usize::try_from(page.offset).unwrap_or(usize::MAX);
    let limit = usize::try_from(page.limit).unwrap_or(0);
    items.skip(offset).take(limit).collect()
}

#[async_trait]
impl LedgerQueries for MemoryLedger {
    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        account.validate()?;
        let record = Account {
            id: AccountId::new(self.shared.next_account_id.fetch_add(1, Ordering::Relaxed)),
            owner: account.owner,
            balance: account.balance,
            currency: account.currency,
            created_at: simplebank_common::now(),
        };
        self.shared
            .state
            .lock()
            .accounts
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        self.shared.committed_account(id)
    }

    async fn list_accounts(&self, owner: Option<&Owner>, page: Page) -> Result<Vec<Account>> {
        let state = self.shared.state.lock();
        let accounts = state
            .accounts
            .values()
            .filter(|a| owner.map_or(true, |o| &a.owner == o))
            .cloned();
        Ok(paginate(accounts, page))
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.shared
            .state
            .lock()
            .transfers
            .get(&id)
            .cloned()
            .ok_or(BankError::NotFound {
                resource: "transfer",
                id: id.get(),
            })
    }

    async fn list_transfers(
        &self,
        from: AccountId,
        to: AccountId,
        page: Page,
    ) -> Result<Vec<Transfer>> {
        let state = self.shared.state.lock();
        let transfers = state
            .transfers
            .values()
            .filter(|t| t.from_account_id == from || t.to_account_id == to)
            .cloned();
        Ok(paginate(transfers, page))
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        self.shared
            .state
            .lock()
            .entries
            .get(&id)
            .cloned()
            .ok_or(BankError::NotFound {
                resource: "entry",
                id: id.get(),
            })
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        let state = self.shared.state.lock();
        let entries = state
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned();
        Ok(paginate(entries, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplebank_common::Currency;

    async fn open(ledger: &MemoryLedger, owner: &str, balance: i64) -> Account {
        ledger
            .create_account(NewAccount::new(owner, Currency::usd(), balance))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_commit_publishes_staged_writes() {
        let ledger = MemoryLedger::default();
        let a = open(&ledger, "alice", 100).await;

        let mut repo = ledger.begin().await.unwrap();
        repo.lock_account_for_update(a.id).await.unwrap();
        let updated = repo.add_balance(a.id, -30).await.unwrap();
        assert_eq!(updated.balance, 70);

        // Not visible outside the transaction yet.
        assert_eq!(LedgerQueries::get_account(&ledger, a.id).await.unwrap().balance, 100);

        repo.commit().await.unwrap();
        assert_eq!(LedgerQueries::get_account(&ledger, a.id).await.unwrap().balance, 70);
    }

    #[tokio::test]
    async fn test_drop_discards_writes_and_releases_locks() {
        let ledger = MemoryLedger::new(Duration::from_millis(50));
        let a = open(&ledger, "alice", 100).await;
        let b = open(&ledger, "bob_1", 0).await;

        {
            let mut repo = ledger.begin().await.unwrap();
            repo.lock_account_for_update(a.id).await.unwrap();
            repo.add_balance(a.id, 500).await.unwrap();
            repo.insert_transfer(NewTransfer {
                from_account_id: a.id,
                to_account_id: b.id,
                amount: 5,
            })
            .await
            .unwrap();
        }

        assert_eq!(LedgerQueries::get_account(&ledger, a.id).await.unwrap().balance, 100);
        assert_eq!(ledger.transfer_count(), 0);

        let mut repo = ledger.begin().await.unwrap();
        assert!(repo.lock_account_for_update(a.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_lock_wait_times_out_with_conflict() {
        let ledger = MemoryLedger::new(Duration::from_millis(50));
        let a = open(&ledger, "alice", 100).await;

        let mut holder = ledger.begin().await.unwrap();
        holder.lock_account_for_update(a.id).await.unwrap();

        let mut waiter = ledger.begin().await.unwrap();
        let err = waiter.lock_account_for_update(a.id).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_lock_reads_latest_committed_balance() {
        let ledger = MemoryLedger::new(Duration::from_secs(2));
        let a = open(&ledger, "alice", 100).await;

        let mut first = ledger.begin().await.unwrap();
        first.lock_account_for_update(a.id).await.unwrap();
        first.add_balance(a.id, 25).await.unwrap();

        let second_ledger = ledger.clone();
        let waiter = tokio::spawn(async move {
            let mut second = second_ledger.begin().await.unwrap();
            second.lock_account_for_update(a.id).await.unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.commit().await.unwrap();

        let seen = waiter.await.unwrap();
        assert_eq!(seen.balance, 125);
    }

    #[tokio::test]
    async fn test_missing_account_is_not_found() {
        let ledger = MemoryLedger::default();
        let mut repo = ledger.begin().await.unwrap();

        let err = repo
            .lock_account_for_update(AccountId::new(404))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_fault_fires_once() {
        let ledger = MemoryLedger::default();
        let a = open(&ledger, "alice", 100).await;
        ledger.inject_fault(FaultPoint::AddBalance, FaultKind::Conflict);

        let mut repo = ledger.begin().await.unwrap();
        assert!(repo.add_balance(a.id, 1).await.unwrap_err().is_retryable());
        assert_eq!(repo.add_balance(a.id, 1).await.unwrap().balance, 101);
    }

    #[tokio::test]
    async fn test_insert_rejects_unknown_account() {
        let ledger = MemoryLedger::default();
        let mut repo = ledger.begin().await.unwrap();

        let err = repo
            .insert_entry(NewEntry::credit(AccountId::new(9), 10))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INTERNAL_STORAGE_ERROR");
    }

    #[tokio::test]
    async fn test_list_accounts_by_owner_paginates() {
        let ledger = MemoryLedger::default();
        for _ in 0..3 {
            open(&ledger, "alice", 0).await;
        }
        open(&ledger, "bob_1", 0).await;

        let alice = Owner::new("alice");
        let first = ledger
            .list_accounts(Some(&alice), Page::new(2, 0).unwrap())
            .await
            .unwrap();
        let second = ledger
            .list_accounts(Some(&alice), Page::new(2, 2).unwrap())
            .await
            .unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(first.iter().chain(&second).all(|a| a.owner == alice));
    }

    #[tokio::test]
    async fn test_create_account_rejects_malformed_owner() {
        let ledger = MemoryLedger::default();

        let err = ledger
            .create_account(NewAccount::new("bob smith", Currency::usd(), 10))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), simplebank_common::ErrorKind::InvalidRequest);
        let all = ledger.list_accounts(None, Page::first()).await.unwrap();
        assert!(all.is_empty());
    }
}
