//! Transfer records and the transfer operation's input and output.

use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, Timestamp, TransferId};

use crate::account::Account;
use crate::journal::Entry;

/// An immutable record of one completed movement of funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique transfer ID.
    pub id: TransferId,
    /// Debited account.
    pub from_account_id: AccountId,
    /// Credited account.
    pub to_account_id: AccountId,
    /// Amount moved, in minor units. Always positive.
    pub amount: i64,
    /// When the transfer was recorded.
    pub created_at: Timestamp,
}

/// Parameters for appending a transfer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewTransfer {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

/// Input of a transfer: validated and authorized by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

impl TransferTxParams {
    /// Create transfer parameters.
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }
}

impl From<TransferTxParams> for NewTransfer {
    fn from(params: TransferTxParams) -> Self {
        Self {
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
        }
    }
}

/// Everything a completed transfer produced, as committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}
