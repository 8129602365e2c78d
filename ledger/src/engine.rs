//! The transfer engine: moves funds between two accounts atomically.

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use simplebank_common::{AccountId, BankError, Result};

use crate::account::Account;
use crate::journal::NewEntry;
use crate::lock_order::order_for_access;
use crate::repository::LedgerRepository;
use crate::scope::{AtomicScope, UnitOfWork};
use crate::transfer::{TransferTxParams, TransferTxResult};

/// Performs transfers inside atomic scopes.
///
/// The engine assumes its caller already checked amount positivity,
/// currency agreement and authorization. It enforces only that source and
/// destination differ. No sufficient-funds check is made: balances may go
/// negative.
pub struct TransferEngine<S> {
    scope: S,
}

impl<S: AtomicScope> TransferEngine<S> {
    /// Create an engine over an injected scope runner.
    pub fn new(scope: S) -> Self {
        Self { scope }
    }

    /// Get the scope runner.
    pub fn scope(&self) -> &S {
        &self.scope
    }

    /// Move `params.amount` from the source account to the destination.
    ///
    /// Locks both rows in ascending ID order, records the transfer and its
    /// two entries, applies the balance deltas and commits, or changes
    /// nothing. Never retries; a `TransactionConflict` may be retried by
    /// the caller.
    #[instrument(
        skip(self, params),
        fields(
            from = %params.from_account_id,
            to = %params.to_account_id,
            amount = params.amount
        )
    )]
    pub async fn transfer_tx(&self, params: TransferTxParams) -> Result<TransferTxResult> {
        if params.from_account_id == params.to_account_id {
            return Err(BankError::SameAccount(params.from_account_id));
        }

        let result = self.scope.execute(TransferTx { params }).await?;

        info!(
            transfer_id = %result.transfer.id,
            from_balance = result.from_account.balance,
            to_balance = result.to_account.balance,
            "Transfer committed"
        );

        Ok(result)
    }
}

/// The transfer sequence run inside one scope.
struct TransferTx {
    params: TransferTxParams,
}

#[async_trait]
impl<R: LedgerRepository> UnitOfWork<R> for TransferTx {
    type Output = TransferTxResult;

    async fn run(self, repo: &mut R) -> Result<TransferTxResult> {
        let TransferTxParams {
            from_account_id,
            to_account_id,
            amount,
        } = self.params;

        let (first, second) = order_for_access(from_account_id, to_account_id);
        repo.lock_account_for_update(first).await?;
        repo.lock_account_for_update(second).await?;
        debug!(first = %first, second = %second, "Account rows locked");

        let transfer = repo.insert_transfer(self.params.into()).await?;
        let from_entry = repo
            .insert_entry(NewEntry::debit(from_account_id, amount))
            .await?;
        let to_entry = repo
            .insert_entry(NewEntry::credit(to_account_id, amount))
            .await?;

        let (from_account, to_account) =
            apply_deltas(repo, from_account_id, to_account_id, amount).await?;

        Ok(TransferTxResult {
            transfer,
            from_entry,
            to_entry,
            from_account,
            to_account,
        })
    }
}

/// Debit the source and credit the destination, updating rows in lock order.
async fn apply_deltas<R: LedgerRepository>(
    repo: &mut R,
    from: AccountId,
    to: AccountId,
    amount: i64,
) -> Result<(Account, Account)> {
    if from < to {
        let from_account = repo.add_balance(from, -amount).await?;
        let to_account = repo.add_balance(to, amount).await?;
        Ok((from_account, to_account))
    } else {
        let to_account = repo.add_balance(to, amount).await?;
        let from_account = repo.add_balance(from, -amount).await?;
        Ok((from_account, to_account))
    }
}
