//! Ledger Error Types
//!
//! One enum covers store, coordinator and service failures so callers can
//! match on the failure class without string inspection.

use thiserror::Error;

use super::types::AccountId;
use super::validation::ValidationError;

/// SQLSTATE codes the PostgreSQL backend treats specially
pub(crate) mod sqlstate {
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
}

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The store gave up on the unit of work; nothing was committed
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// The unit of work failed and its rollback failed too
    #[error("Rollback failed: tx err: {cause}, rb err: {rollback}")]
    RollbackFailed {
        cause: Box<LedgerError>,
        rollback: Box<LedgerError>,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Balance overflow on account {0}")]
    BalanceOverflow(AccountId),

    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        LedgerError::NotFound { entity, id }
    }

    /// Only aborts are safe to retry: a failed unit of work left no trace.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::TransactionAborted(_))
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::Validation(ValidationError::CurrencyMismatch { .. }) => {
                "CURRENCY_MISMATCH"
            }
            LedgerError::Validation(_) => "VALIDATION_ERROR",
            LedgerError::Unauthorized(_) => "UNAUTHORIZED",
            LedgerError::TransactionAborted(_) => "TRANSACTION_ABORTED",
            LedgerError::RollbackFailed { .. } => "ROLLBACK_FAILED",
            LedgerError::Cancelled(_) => "CANCELLED",
            LedgerError::BalanceOverflow(_) => "BALANCE_OVERFLOW",
            LedgerError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::NotFound { .. } => 404,
            LedgerError::Validation(_) => 400,
            LedgerError::Unauthorized(_) => 401,
            LedgerError::TransactionAborted(_) => 409,
            LedgerError::BalanceOverflow(_) => 422,
            LedgerError::Cancelled(_) => 504,
            LedgerError::RollbackFailed { .. } | LedgerError::Database(_) => 500,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        let code = e
            .as_database_error()
            .and_then(|db| db.code())
            .map(|c| c.into_owned());
        match code.as_deref() {
            Some(
                sqlstate::SERIALIZATION_FAILURE
                | sqlstate::DEADLOCK_DETECTED
                | sqlstate::LOCK_NOT_AVAILABLE,
            ) => LedgerError::TransactionAborted(e.to_string()),
            _ => match e {
                sqlx::Error::PoolTimedOut => LedgerError::TransactionAborted(e.to_string()),
                other => LedgerError::Database(other.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::not_found("account", 1).code(), "NOT_FOUND");
        assert_eq!(
            LedgerError::TransactionAborted("x".into()).code(),
            "TRANSACTION_ABORTED"
        );
        let mismatch = LedgerError::from(ValidationError::CurrencyMismatch {
            account_id: 1,
            expected: "USD".into(),
            actual: "EUR".into(),
        });
        assert_eq!(mismatch.code(), "CURRENCY_MISMATCH");
        assert_eq!(
            LedgerError::from(ValidationError::NonPositiveAmount(0)).code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LedgerError::not_found("payment", 3).http_status(), 404);
        assert_eq!(
            LedgerError::from(ValidationError::SameAccount(1)).http_status(),
            400
        );
        assert_eq!(LedgerError::Unauthorized("x".into()).http_status(), 401);
        assert_eq!(LedgerError::Database("x".into()).http_status(), 500);
    }

    #[test]
    fn test_only_aborts_are_retryable() {
        assert!(LedgerError::TransactionAborted("conflict".into()).is_retryable());
        assert!(!LedgerError::not_found("account", 1).is_retryable());
        assert!(!LedgerError::Cancelled("deadline".into()).is_retryable());
        let double = LedgerError::RollbackFailed {
            cause: Box::new(LedgerError::TransactionAborted("a".into())),
            rollback: Box::new(LedgerError::Database("b".into())),
        };
        assert!(!double.is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            LedgerError::not_found("account", 42).to_string(),
            "account not found: 42"
        );
        let double = LedgerError::RollbackFailed {
            cause: Box::new(LedgerError::Database("boom".into())),
            rollback: Box::new(LedgerError::Database("gone".into())),
        };
        assert_eq!(
            double.to_string(),
            "Rollback failed: tx err: Database error: boom, rb err: Database error: gone"
        );
    }

    #[test]
    fn test_sqlx_row_not_found_is_database_error() {
        let err = LedgerError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, LedgerError::Database(_)));
        let err = LedgerError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
    }
}
