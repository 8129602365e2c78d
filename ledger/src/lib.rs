//! SimpleBank Ledger
//!
//! Double-entry ledger storage and the transfer engine that moves funds
//! between accounts atomically and without deadlock.

pub mod account;
pub mod engine;
pub mod journal;
pub mod lock_order;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod scope;
pub mod transfer;

pub use account::{Account, NewAccount};
pub use engine::TransferEngine;
pub use journal::{is_balanced, Entry, EntryType, NewEntry};
pub use lock_order::order_for_access;
pub use memory::{FaultKind, FaultPoint, MemoryLedger, MemoryRepository, DEFAULT_LOCK_TIMEOUT};
pub use postgres::{PgLedger, PgRepository};
pub use repository::{LedgerQueries, LedgerRepository, Page, MAX_PAGE_LIMIT};
pub use scope::{
    unit_of_work, AtomicScope, FnWork, LedgerBackend, ScopeRunner, Transactional, UnitOfWork,
};
pub use transfer::{NewTransfer, Transfer, TransferTxParams, TransferTxResult};
