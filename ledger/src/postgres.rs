//! PostgreSQL ledger backend.
//!
//! Each scope runs in one sqlx transaction. Row locks come from
//! `SELECT ... FOR UPDATE`; lock waits are bounded per transaction with
//! `lock_timeout`, and PostgreSQL's own deadlock detector backs that up.
//! An uncommitted [`PgRepository`] rolls back when dropped.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{Executor, FromRow, Postgres, Transaction};
use tracing::{debug, instrument};

use simplebank_common::{
    AccountId, BankError, Currency, EntryId, Owner, Result, TransferId,
};

use crate::account::{Account, NewAccount};
use crate::journal::{Entry, NewEntry};
use crate::repository::{LedgerQueries, LedgerRepository, Page};
use crate::scope::{LedgerBackend, Transactional};
use crate::transfer::{NewTransfer, Transfer};

/// Tables and indexes used by the ledger.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          BIGSERIAL PRIMARY KEY,
    owner       VARCHAR NOT NULL,
    balance     BIGINT NOT NULL,
    currency    VARCHAR NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS entries (
    id          BIGSERIAL PRIMARY KEY,
    account_id  BIGINT NOT NULL REFERENCES accounts (id),
    amount      BIGINT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS transfers (
    id               BIGSERIAL PRIMARY KEY,
    from_account_id  BIGINT NOT NULL REFERENCES accounts (id),
    to_account_id    BIGINT NOT NULL REFERENCES accounts (id),
    amount           BIGINT NOT NULL CHECK (amount > 0),
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS accounts_owner_idx ON accounts (owner);
CREATE INDEX IF NOT EXISTS entries_account_id_idx ON entries (account_id);
CREATE INDEX IF NOT EXISTS transfers_from_account_id_idx ON transfers (from_account_id);
CREATE INDEX IF NOT EXISTS transfers_to_account_id_idx ON transfers (to_account_id);
CREATE INDEX IF NOT EXISTS transfers_pair_idx ON transfers (from_account_id, to_account_id);
"#;

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

/// SQLSTATE codes that mean "try the whole transaction again".
const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Classify a sqlx error.
fn storage_error(context: &str, err: sqlx::Error) -> BankError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(code) = db.code() {
            match code.as_ref() {
                DEADLOCK_DETECTED | SERIALIZATION_FAILURE | LOCK_NOT_AVAILABLE => {
                    debug!(sqlstate = %code, context, "Transaction conflict");
                    return BankError::conflict(format!("{} while {}", db.message(), context));
                }
                _ => {}
            }
        }
    }
    BankError::storage(context, err.to_string())
}

#[derive(FromRow)]
struct AccountRow {
    id: i64,
    owner: String,
    balance: i64,
    currency: String,
    created_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: AccountId::new(row.id),
            owner: Owner::new(row.owner),
            balance: row.balance,
            currency: Currency::new(row.currency),
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct EntryRow {
    id: i64,
    account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Entry {
            id: EntryId::new(row.id),
            account_id: AccountId::new(row.account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct TransferRow {
    id: i64,
    from_account_id: i64,
    to_account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Transfer {
            id: TransferId::new(row.id),
            from_account_id: AccountId::new(row.from_account_id),
            to_account_id: AccountId::new(row.to_account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

/// Ledger stored in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedger {
    /// Create a ledger over an existing pool.
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger tables if they do not exist.
    pub async fn create_schema(&self) -> Result<()> {
        self.pool
            .execute(SCHEMA)
            .await
            .map_err(|e| storage_error("creating schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerBackend for PgLedger {
    type Repository = PgRepository;

    async fn begin(&self) -> Result<PgRepository> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("beginning transaction", e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(lock_timeout_setting(self.lock_timeout))
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_error("setting lock timeout", e))?;

        Ok(PgRepository { tx })
    }
}

/// Value for the `lock_timeout` GUC. PostgreSQL reads `0` as "wait
/// forever", so partial milliseconds round up and the result is never 0.
fn lock_timeout_setting(timeout: Duration) -> String {
    let millis = timeout.as_micros().div_ceil(1_000).max(1);
    format!("{}ms", millis)
}

/// One open PostgreSQL transaction.
pub struct PgRepository {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerRepository for PgRepository {
    async fn lock_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE id = $1 LIMIT 1 FOR UPDATE",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| storage_error("locking account", e))?
            .map(Account::from)
            .ok_or_else(|| BankError::account_not_found(id))
    }

    async fn add_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        let sql = format!(
            "UPDATE accounts SET balance = balance + $2 WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id.get())
            .bind(delta)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| storage_error("updating account balance", e))?
            .map(Account::from)
            .ok_or_else(|| BankError::account_not_found(id))
    }

    async fn insert_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer> {
        let sql = format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) \
             VALUES ($1, $2, $3) RETURNING {}",
            TRANSFER_COLUMNS
        );
        let row = sqlx::query_as::<_, TransferRow>(&sql)
            .bind(transfer.from_account_id.get())
            .bind(transfer.to_account_id.get())
            .bind(transfer.amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| storage_error("inserting transfer", e))?;
        Ok(row.into())
    }

    async fn insert_entry(&mut self, entry: NewEntry) -> Result<Entry> {
        let sql = format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {}",
            ENTRY_COLUMNS
        );
        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(entry.account_id.get())
            .bind(entry.amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| storage_error("inserting entry", e))?;
        Ok(row.into())
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| storage_error("reading account", e))?
            .map(Account::from)
            .ok_or_else(|| BankError::account_not_found(id))
    }
}

#[async_trait]
impl Transactional for PgRepository {
    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| storage_error("committing transaction", e))
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| storage_error("rolling back transaction", e))
    }
}

#[async_trait]
impl LedgerQueries for PgLedger {
    #[instrument(skip(self, account), fields(owner = %account.owner))]
    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        account.validate()?;
        let sql = format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) RETURNING {}",
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(account.owner.as_str())
            .bind(account.balance)
            .bind(account.currency.code())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("creating account", e))?;
        Ok(row.into())
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("reading account", e))?
            .map(Account::from)
            .ok_or_else(|| BankError::account_not_found(id))
    }

    async fn list_accounts(&self, owner: Option<&Owner>, page: Page) -> Result<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE ($1::varchar IS NULL OR owner = $1) \
             ORDER BY id LIMIT $2 OFFSET $3",
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(owner.map(Owner::as_str))
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("listing accounts", e))?;
        Ok(rows.into_iter().map(Account::from).collect())
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        let sql = format!("SELECT {} FROM transfers WHERE id = $1", TRANSFER_COLUMNS);
        sqlx::query_as::<_, TransferRow>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("reading transfer", e))?
            .map(Transfer::from)
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
        let sql = format!(
            "SELECT {} FROM transfers WHERE from_account_id = $1 OR to_account_id = $2 \
             ORDER BY id LIMIT $3 OFFSET $4",
            TRANSFER_COLUMNS
        );
        let rows = sqlx::query_as::<_, TransferRow>(&sql)
            .bind(from.get())
            .bind(to.get())
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("listing transfers", e))?;
        Ok(rows.into_iter().map(Transfer::from).collect())
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        let sql = format!("SELECT {} FROM entries WHERE id = $1", ENTRY_COLUMNS);
        sqlx::query_as::<_, EntryRow>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("reading entry", e))?
            .map(Entry::from)
            .ok_or(BankError::NotFound {
                resource: "entry",
                id: id.get(),
            })
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {} FROM entries WHERE account_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(account_id.get())
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("listing entries", e))?;
        Ok(rows.into_iter().map(Entry::from).collect())
    }
}
