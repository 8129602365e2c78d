//! Preconditions checked before a transfer reaches the engine.

use serde::{Deserialize, Serialize};
use tracing::debug;

use simplebank_common::{AccountId, BankError, Currency, Money, Owner, Result};
use simplebank_ledger::{Account, LedgerQueries, TransferTxParams};

/// A transfer as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Amount in minor units.
    pub amount: i64,
    pub currency: Currency,
}

impl TransferRequest {
    pub fn new(
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
        currency: Currency,
    ) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            currency,
        }
    }

    /// The requested amount in its currency.
    pub fn money(&self) -> Money {
        Money::new(self.amount, self.currency.clone())
    }
}

/// Validates and authorizes transfer requests.
///
/// Checks run cheapest first: request shape, then the source account
/// (existence, currency, ownership), then the destination account.
pub struct TransferGuard<Q> {
    queries: Q,
}

impl<Q: LedgerQueries> TransferGuard<Q> {
    pub fn new(queries: Q) -> Self {
        Self { queries }
    }

    /// Turn a request from `principal` into engine parameters, or explain
    /// why it may not proceed.
    pub async fn check(&self, principal: &Owner, request: &TransferRequest) -> Result<TransferTxParams> {
        if !request.money().is_positive() {
            return Err(BankError::invalid_field("amount", "amount must be positive"));
        }
        if !request.currency.is_supported() {
            return Err(BankError::invalid_field(
                "currency",
                format!("unsupported currency: {}", request.currency),
            ));
        }
        if request.from_account_id == request.to_account_id {
            return Err(BankError::SameAccount(request.from_account_id));
        }

        let from = self
            .account_in(request.from_account_id, &request.currency)
            .await?;
        if !from.is_owned_by(principal) {
            debug!(account = %from.id, principal = %principal, "Source account not owned by caller");
            return Err(BankError::Unauthorized {
                account_id: from.id,
                principal: principal.clone(),
            });
        }
        self.account_in(request.to_account_id, &request.currency)
            .await?;

        Ok(TransferTxParams::new(
            request.from_account_id,
            request.to_account_id,
            request.amount,
        ))
    }

    async fn account_in(&self, id: AccountId, currency: &Currency) -> Result<Account> {
        let account = self.queries.get_account(id).await?;
        if &account.currency != currency {
            return Err(BankError::CurrencyMismatch {
                account_id: id,
                expected: currency.clone(),
                actual: account.currency,
            });
        }
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplebank_common::ErrorKind;
    use simplebank_ledger::{MemoryLedger, NewAccount};

    struct Fixture {
        guard: TransferGuard<MemoryLedger>,
        alice_usd: AccountId,
        bob_usd: AccountId,
        bob_eur: AccountId,
    }

    async fn fixture() -> Fixture {
        let ledger = MemoryLedger::default();
        let open = |owner: &'static str, currency: Currency| {
            let ledger = ledger.clone();
            async move {
                ledger
                    .create_account(NewAccount::new(owner, currency, 100))
                    .await
                    .unwrap()
                    .id
            }
        };
        let alice_usd = open("alice", Currency::usd()).await;
        let bob_usd = open("bob_1", Currency::usd()).await;
        let bob_eur = open("bob_1", Currency::eur()).await;
        Fixture {
            guard: TransferGuard::new(ledger),
            alice_usd,
            bob_usd,
            bob_eur,
        }
    }

    fn alice() -> Owner {
        Owner::new("alice")
    }

    #[tokio::test]
    async fn test_valid_request_passes() {
        let f = fixture().await;
        let request = TransferRequest::new(f.alice_usd, f.bob_usd, 10, Currency::usd());

        let params = f.guard.check(&alice(), &request).await.unwrap();

        assert_eq!(params, TransferTxParams::new(f.alice_usd, f.bob_usd, 10));
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let f = fixture().await;
        for amount in [0, -5] {
            let request = TransferRequest::new(f.alice_usd, f.bob_usd, amount, Currency::usd());
            let err = f.guard.check(&alice(), &request).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        }
    }

    #[test]
    fn test_request_money_in_major_units() {
        let request = TransferRequest::new(AccountId::new(1), AccountId::new(2), 1_050, Currency::eur());
        assert_eq!(request.money().to_string(), "10.50 EUR");
        assert!(request.money().is_positive());
    }

    #[tokio::test]
    async fn test_unsupported_currency_rejected() {
        let f = fixture().await;
        let request = TransferRequest::new(f.alice_usd, f.bob_usd, 10, Currency::new("JPY"));

        let err = f.guard.check(&alice(), &request).await.unwrap_err();

        assert!(matches!(err, BankError::InvalidRequest { field: Some(ref field), .. } if field == "currency"));
    }

    #[tokio::test]
    async fn test_same_account_rejected() {
        let f = fixture().await;
        let request = TransferRequest::new(f.alice_usd, f.alice_usd, 10, Currency::usd());

        let err = f.guard.check(&alice(), &request).await.unwrap_err();

        assert!(matches!(err, BankError::SameAccount(_)));
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let f = fixture().await;
        let request = TransferRequest::new(AccountId::new(999), f.bob_usd, 10, Currency::usd());

        let err = f.guard.check(&alice(), &request).await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_destination_currency_mismatch() {
        let f = fixture().await;
        let request = TransferRequest::new(f.alice_usd, f.bob_eur, 10, Currency::usd());

        let err = f.guard.check(&alice(), &request).await.unwrap_err();

        assert!(matches!(err, BankError::CurrencyMismatch { account_id, .. } if account_id == f.bob_eur));
    }

    #[tokio::test]
    async fn test_foreign_source_account_unauthorized() {
        let f = fixture().await;
        let request = TransferRequest::new(f.bob_usd, f.alice_usd, 10, Currency::usd());

        let err = f.guard.check(&alice(), &request).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
}
