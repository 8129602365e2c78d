//! Transfer processing: validation, execution with retries, accounting.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, instrument, warn};

use simplebank_common::{ErrorKind, Owner, Result};
use simplebank_ledger::{AtomicScope, LedgerQueries, TransferEngine, TransferTxResult};

use crate::guard::{TransferGuard, TransferRequest};
use crate::metrics::{SharedMetrics, TransferMetrics};
use crate::retry::RetryPolicy;

/// Runs caller requests through the guard, the engine and the retry
/// policy, recording every outcome.
pub struct TransferProcessor<Q, S> {
    guard: TransferGuard<Q>,
    engine: TransferEngine<S>,
    retry: RetryPolicy,
    metrics: SharedMetrics,
}

impl<Q: LedgerQueries, S: AtomicScope> TransferProcessor<Q, S> {
    /// Create a processor.
    pub fn new(queries: Q, engine: TransferEngine<S>, retry: RetryPolicy) -> Self {
        Self {
            guard: TransferGuard::new(queries),
            engine,
            retry,
            metrics: Arc::new(TransferMetrics::new()),
        }
    }

    /// Share an existing metrics instance.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn engine(&self) -> &TransferEngine<S> {
        &self.engine
    }

    /// Process one transfer request on behalf of `principal`.
    #[instrument(
        skip(self, principal, request),
        fields(
            principal = %principal,
            from = %request.from_account_id,
            to = %request.to_account_id,
            amount = %request.money()
        )
    )]
    pub async fn process(
        &self,
        principal: &Owner,
        request: &TransferRequest,
    ) -> Result<TransferTxResult> {
        let started = Instant::now();
        let _active = self.metrics.transfer_initiated();

        let params = match self.guard.check(principal, request).await {
            Ok(params) => params,
            Err(e) => {
                self.metrics.transfer_rejected();
                info!(code = e.error_code(), error = %e, "Transfer rejected");
                return Err(e);
            }
        };

        let metrics = &self.metrics;
        let outcome = self
            .retry
            .run_observed(
                || self.engine.transfer_tx(params),
                |_, _| {
                    metrics.conflict();
                    metrics.retry();
                },
            )
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                self.metrics.transfer_success();
                info!(transfer_id = %result.transfer.id, elapsed_ms, "Transfer processed");
                Ok(result)
            }
            Err(e) => {
                self.metrics.transfer_failed();
                match e.kind() {
                    ErrorKind::Conflict => {
                        self.metrics.conflict();
                        warn!(elapsed_ms, error = %e, "Transfer abandoned after conflicts");
                    }
                    ErrorKind::Internal => {
                        error!(code = e.error_code(), elapsed_ms, error = %e, "Transfer failed");
                    }
                    _ => {
                        info!(code = e.error_code(), elapsed_ms, error = %e, "Transfer failed");
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use simplebank_common::{AccountId, BankError, Currency};
    use simplebank_ledger::{
        FaultKind, FaultPoint, LedgerBackend, LedgerRepository, MemoryLedger, NewAccount,
        ScopeRunner,
    };

    type MemoryProcessor = TransferProcessor<MemoryLedger, ScopeRunner<MemoryLedger>>;

    async fn setup() -> (MemoryProcessor, MemoryLedger, AccountId, AccountId) {
        let ledger = MemoryLedger::default();
        let a = ledger
            .create_account(NewAccount::new("alice", Currency::usd(), 100))
            .await
            .unwrap()
            .id;
        let b = ledger
            .create_account(NewAccount::new("bob_1", Currency::usd(), 50))
            .await
            .unwrap()
            .id;
        let retry = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let processor = TransferProcessor::new(
            ledger.clone(),
            TransferEngine::new(ScopeRunner::new(ledger.clone())),
            retry,
        );
        (processor, ledger, a, b)
    }

    #[tokio::test]
    async fn test_process_commits_and_counts() {
        let (processor, _, a, b) = setup().await;
        let request = TransferRequest::new(a, b, 10, Currency::usd());

        let result = processor.process(&Owner::new("alice"), &request).await.unwrap();

        assert_eq!(result.from_account.balance, 90);
        assert_eq!(result.to_account.balance, 60);
        let snapshot = processor.metrics().snapshot();
        assert_eq!(snapshot.transfers_success, 1);
        assert_eq!(snapshot.transfers_active, 0);
    }

    #[tokio::test]
    async fn test_rejected_request_never_reaches_engine() {
        let (processor, ledger, a, b) = setup().await;
        let request = TransferRequest::new(a, b, 10, Currency::usd());

        let err = processor.process(&Owner::new("bob_1"), &request).await.unwrap_err();

        assert!(matches!(err, BankError::Unauthorized { .. }));
        assert_eq!(ledger.transfer_count(), 0);
        assert_eq!(processor.metrics().snapshot().transfers_rejected, 1);
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let (processor, ledger, a, b) = setup().await;
        ledger.inject_fault(FaultPoint::LockAccount, FaultKind::Conflict);
        let request = TransferRequest::new(a, b, 10, Currency::usd());

        let result = processor.process(&Owner::new("alice"), &request).await.unwrap();

        assert_eq!(result.from_account.balance, 90);
        assert_eq!(ledger.transfer_count(), 1);
        let snapshot = processor.metrics().snapshot();
        assert_eq!(snapshot.retries_total, 1);
        assert_eq!(snapshot.transfers_success, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_not_retried() {
        let (processor, ledger, a, b) = setup().await;
        ledger.inject_fault(FaultPoint::InsertTransfer, FaultKind::Storage);
        let request = TransferRequest::new(a, b, 10, Currency::usd());

        let err = processor.process(&Owner::new("alice"), &request).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(ledger.transfer_count(), 0);
        let snapshot = processor.metrics().snapshot();
        assert_eq!(snapshot.retries_total, 0);
        assert_eq!(snapshot.transfers_failed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_transfer_leaves_no_active_count() {
        let (processor, ledger, a, b) = setup().await;
        let processor = Arc::new(processor);
        let mut holder = ledger.begin().await.unwrap();
        holder.lock_account_for_update(b).await.unwrap();

        let task = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                let request = TransferRequest::new(a, b, 10, Currency::usd());
                processor.process(&Owner::new("alice"), &request).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(processor.metrics().snapshot().transfers_active, 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        drop(holder);

        let snapshot = processor.metrics().snapshot();
        assert_eq!(snapshot.transfers_total, 1);
        assert_eq!(snapshot.transfers_active, 0);
        assert_eq!(snapshot.transfers_success, 0);
        assert_eq!(snapshot.transfers_failed, 0);
        assert_eq!(ledger.transfer_count(), 0);
    }
}
