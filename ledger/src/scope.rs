//! Atomic scopes: all-or-nothing execution of multi-step ledger work.
//!
//! A [`UnitOfWork`] receives the scope's [`LedgerRepository`] handle and
//! performs its reads and writes through it. [`ScopeRunner`] is the one
//! place that begins, commits and rolls back; backends only supply a
//! transactional handle through [`LedgerBackend`].
//!
//! Dropping the future returned by [`AtomicScope::execute`] before it
//! completes abandons the transaction. Backends roll back on drop, so a
//! cancelled caller never leaves partial writes behind.

use std::marker::PhantomData;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};
use uuid::Uuid;

use simplebank_common::{BankError, Result};

use crate::repository::LedgerRepository;

/// A unit of work executed inside one atomic scope.
#[async_trait]
pub trait UnitOfWork<R: LedgerRepository>: Send {
    /// Value produced when the work succeeds.
    type Output: Send;

    /// Perform the work through `repo`.
    async fn run(self, repo: &mut R) -> Result<Self::Output>;
}

/// Runs units of work atomically.
#[async_trait]
pub trait AtomicScope: Send + Sync {
    /// Transactional handle passed to units of work.
    type Repository: LedgerRepository;

    /// Run `work` in a fresh transaction.
    ///
    /// Commits and returns the output on success. On failure the
    /// transaction is rolled back and the work's error is returned; if the
    /// rollback fails as well the result is [`BankError::RollbackFailed`]
    /// wrapping the original error.
    async fn execute<W>(&self, work: W) -> Result<W::Output>
    where
        W: UnitOfWork<Self::Repository>;
}

/// Commit or roll back an open transaction handle.
#[async_trait]
pub trait Transactional: Send {
    /// Make every write made through this handle durable and visible.
    async fn commit(self) -> Result<()>;

    /// Discard every write made through this handle.
    async fn rollback(self) -> Result<()>;
}

/// Storage that can open transactions.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Handle for one open transaction.
    type Repository: LedgerRepository + Transactional;

    /// Begin a transaction.
    async fn begin(&self) -> Result<Self::Repository>;
}

/// The [`AtomicScope`] implementation over any [`LedgerBackend`].
#[derive(Debug, Clone)]
pub struct ScopeRunner<B> {
    backend: B,
}

impl<B: LedgerBackend> ScopeRunner<B> {
    /// Create a runner over an injected backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Get the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: LedgerBackend> AtomicScope for ScopeRunner<B> {
    type Repository = B::Repository;

    async fn execute<W>(&self, work: W) -> Result<W::Output>
    where
        W: UnitOfWork<Self::Repository>,
    {
        let scope_id = Uuid::now_v7();
        let mut repo = self.backend.begin().await?;
        debug!(scope_id = %scope_id, "Scope opened");

        match work.run(&mut repo).await {
            Ok(output) => {
                if let Err(e) = repo.commit().await {
                    warn!(scope_id = %scope_id, error = %e, "Commit failed");
                    return Err(e);
                }
                debug!(scope_id = %scope_id, "Scope committed");
                Ok(output)
            }
            Err(cause) => {
                debug!(scope_id = %scope_id, error = %cause, "Rolling back scope");
                match repo.rollback().await {
                    Ok(()) => Err(cause),
                    Err(rollback) => {
                        warn!(
                            scope_id = %scope_id,
                            error = %cause,
                            rollback_error = %rollback,
                            "Rollback failed"
                        );
                        Err(BankError::rollback_failed(cause, rollback))
                    }
                }
            }
        }
    }
}

/// A unit of work built from a function value.
pub struct FnWork<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

/// Wrap a function as a unit of work.
///
/// ```ignore
/// let work = unit_of_work(|repo: &mut MemoryRepository| {
///     Box::pin(async move { repo.get_account(AccountId::new(1)).await })
/// });
/// let account = scope.execute(work).await?;
/// ```
pub fn unit_of_work<R, T, F>(f: F) -> FnWork<F, T>
where
    R: LedgerRepository,
    T: Send,
    F: for<'a> FnOnce(&'a mut R) -> BoxFuture<'a, Result<T>> + Send,
{
    FnWork {
        f,
        _output: PhantomData,
    }
}

#[async_trait]
impl<R, T, F> UnitOfWork<R> for FnWork<F, T>
where
    R: LedgerRepository,
    T: Send,
    F: for<'a> FnOnce(&'a mut R) -> BoxFuture<'a, Result<T>> + Send,
{
    type Output = T;

    async fn run(self, repo: &mut R) -> Result<T> {
        (self.f)(repo).await
    }
}
