//! Account definitions for the ledger.

use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, BankError, Currency, Money, Owner, Result, Timestamp};

/// A ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Owning principal.
    pub owner: Owner,
    /// Balance in minor units. May go negative; no floor is enforced.
    pub balance: i64,
    /// Account currency.
    pub currency: Currency,
    /// When the account was opened.
    pub created_at: Timestamp,
}

impl Account {
    /// Balance as money in the account's currency.
    pub fn balance(&self) -> Money {
        Money::new(self.balance, self.currency.clone())
    }

    /// Check whether `owner` may debit this account.
    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        &self.owner == owner
    }
}

/// Parameters for opening an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    /// Owning principal.
    pub owner: Owner,
    /// Account currency.
    pub currency: Currency,
    /// Opening balance in minor units.
    pub balance: i64,
}

impl NewAccount {
    /// Create opening parameters.
    pub fn new(owner: impl Into<Owner>, currency: Currency, balance: i64) -> Self {
        Self {
            owner: owner.into(),
            currency,
            balance,
        }
    }

    /// Reject owners that are not usernames and unsupported currencies.
    pub fn validate(&self) -> Result<()> {
        if !self.owner.is_valid() {
            return Err(BankError::invalid_field(
                "owner",
                format!("invalid owner: {:?}", self.owner.as_str()),
            ));
        }
        if !self.currency.is_supported() {
            return Err(BankError::invalid_field(
                "currency",
                format!("unsupported currency: {}", self.currency),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_balance_money() {
        let account = Account {
            id: AccountId::new(1),
            owner: Owner::new("alice"),
            balance: 12_345,
            currency: Currency::usd(),
            created_at: simplebank_common::now(),
        };

        assert_eq!(account.balance().to_string(), "123.45 USD");
        assert!(account.is_owned_by(&Owner::new("alice")));
        assert!(!account.is_owned_by(&Owner::new("bob")));
    }

    #[test]
    fn test_new_account_validation() {
        assert!(NewAccount::new("alice", Currency::cad(), 0).validate().is_ok());

        let err = NewAccount::new("Alice", Currency::usd(), 0).validate().unwrap_err();
        assert!(matches!(err, BankError::InvalidRequest { field: Some(ref f), .. } if f == "owner"));

        let err = NewAccount::new("alice", Currency::new("GBP"), 0).validate().unwrap_err();
        assert!(matches!(err, BankError::InvalidRequest { field: Some(ref f), .. } if f == "currency"));
    }
}
