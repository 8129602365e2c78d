//! Error types for SimpleBank operations.

use crate::{AccountId, Currency, Owner};
use thiserror::Error;

/// Coarse classification callers use to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced row does not exist.
    NotFound,
    /// Lock timeout, deadlock or serialization failure. Safe to retry.
    Conflict,
    /// The request failed a precondition.
    InvalidRequest,
    /// The principal may not act on the resource.
    Unauthorized,
    /// Anything else.
    Internal,
}

/// Main error type for SimpleBank operations.
#[derive(Error, Debug)]
pub enum BankError {
    /// A referenced row has no corresponding record.
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: i64 },

    /// Storage-level lock timeout or detected deadlock.
    #[error("Transaction conflict: {reason}")]
    TransactionConflict { reason: String },

    /// Any other persistence failure.
    #[error("Storage error while {context}: {message}")]
    InternalStorage { context: String, message: String },

    /// The unit of work failed and the rollback that followed failed too.
    ///
    /// `cause` is the primary error; the rollback failure is carried
    /// alongside it.
    #[error("{cause} (rollback also failed: {rollback})")]
    RollbackFailed {
        cause: Box<BankError>,
        rollback: String,
    },

    /// Source and destination are the same account.
    #[error("Cannot transfer from account {0} to itself")]
    SameAccount(AccountId),

    /// Invalid request field.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        field: Option<String>,
    },

    /// Account currency differs from the requested currency.
    #[error("Account {account_id} currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        account_id: AccountId,
        expected: Currency,
        actual: Currency,
    },

    /// The principal does not own the account being debited.
    #[error("Account {account_id} does not belong to {principal}")]
    Unauthorized {
        account_id: AccountId,
        principal: Owner,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl BankError {
    /// Account lookup miss.
    pub fn account_not_found(id: AccountId) -> Self {
        BankError::NotFound {
            resource: "account",
            id: id.get(),
        }
    }

    /// Storage failure with context.
    pub fn storage(context: impl Into<String>, message: impl Into<String>) -> Self {
        BankError::InternalStorage {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Retriable contention failure.
    pub fn conflict(reason: impl Into<String>) -> Self {
        BankError::TransactionConflict {
            reason: reason.into(),
        }
    }

    /// Invalid field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        BankError::InvalidRequest {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Wrap a rollback failure around the error that caused the rollback.
    pub fn rollback_failed(cause: BankError, rollback: impl ToString) -> Self {
        BankError::RollbackFailed {
            cause: Box::new(cause),
            rollback: rollback.to_string(),
        }
    }

    /// The error that determines how callers react.
    pub fn primary(&self) -> &BankError {
        match self {
            BankError::RollbackFailed { cause, .. } => cause.primary(),
            other => other,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self.primary() {
            BankError::NotFound { .. } => ErrorKind::NotFound,
            BankError::TransactionConflict { .. } => ErrorKind::Conflict,
            BankError::SameAccount(_)
            | BankError::InvalidRequest { .. }
            | BankError::CurrencyMismatch { .. } => ErrorKind::InvalidRequest,
            BankError::Unauthorized { .. } => ErrorKind::Unauthorized,
            _ => ErrorKind::Internal,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Check if this error reports a missing row.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Get error code for responses and logs.
    ///
    /// A failed rollback reports the code of the error that caused it.
    pub fn error_code(&self) -> &'static str {
        match self {
            BankError::RollbackFailed { cause, .. } => cause.error_code(),
            BankError::NotFound { .. } => "NOT_FOUND",
            BankError::TransactionConflict { .. } => "TRANSACTION_CONFLICT",
            BankError::InternalStorage { .. } => "INTERNAL_STORAGE_ERROR",
            BankError::SameAccount(_) => "SAME_ACCOUNT",
            BankError::InvalidRequest { .. } => "INVALID_REQUEST",
            BankError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            BankError::Unauthorized { .. } => "UNAUTHORIZED",
            BankError::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for SimpleBank operations.
pub type Result<T> = std::result::Result<T, BankError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        let err = BankError::conflict("deadlock detected");
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.error_code(), "TRANSACTION_CONFLICT");
    }

    #[test]
    fn test_not_found_is_not_retryable() {
        let err = BankError::account_not_found(AccountId::new(7));
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "account not found: 7");
    }

    #[test]
    fn test_rollback_failure_keeps_cause_primary() {
        let err = BankError::rollback_failed(
            BankError::conflict("lock timeout"),
            "connection reset",
        );

        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.error_code(), "TRANSACTION_CONFLICT");
        assert!(err.to_string().contains("lock timeout"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_nested_rollback_failure_reports_innermost_code() {
        let err = BankError::rollback_failed(
            BankError::rollback_failed(
                BankError::account_not_found(AccountId::new(3)),
                "first rollback",
            ),
            "second rollback",
        );

        assert_eq!(err.error_code(), "NOT_FOUND");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_storage_error_is_internal() {
        let err = BankError::storage("inserting entry", "connection refused");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Storage error while inserting entry: connection refused"
        );
    }
}
