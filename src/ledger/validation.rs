//! Input validation for ledger requests
//!
//! Validated types keep their fields private so the only way to obtain one
//! is through the checking constructor.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::AccountId;

// ============================================================================
// Validation Errors
// ============================================================================

/// Malformed or inconsistent request data
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Amount must be greater than zero: got {0}")]
    NonPositiveAmount(i64),

    #[error("Invalid account id: {0}")]
    InvalidAccountId(AccountId),

    #[error("Invalid currency code '{got}' (expected three uppercase letters)")]
    InvalidCurrency { got: String },

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Account [{account_id}] currency mismatch: {actual} vs {expected}")]
    CurrencyMismatch {
        account_id: AccountId,
        expected: String,
        actual: String,
    },

    #[error("Source and destination account cannot be the same: {0}")]
    SameAccount(AccountId),

    #[error("Invalid {field}: expected {min}-{max}, got {actual}")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        actual: i64,
    },
}

// ============================================================================
// Currency - ISO-4217 style code (Private Field)
// ============================================================================

/// Three-letter uppercase currency code, fixed for the life of an account
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Create a validated currency code
    ///
    /// Surrounding whitespace is ignored; case is not normalised, so `usd`
    /// is rejected rather than silently accepted.
    ///
    /// ```
    /// use neobank_ledger::ledger::Currency;
    ///
    /// assert_eq!(Currency::new("USD").unwrap().as_str(), "USD");
    /// assert!(Currency::new("usd").is_err());
    /// ```
    pub fn new(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ValidationError::InvalidCurrency {
                got: code.to_string(),
            });
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Currency {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

// ============================================================================
// Scalar checks
// ============================================================================

/// Reject zero and negative transfer amounts
pub fn positive_amount(amount: i64) -> Result<i64, ValidationError> {
    if amount <= 0 {
        return Err(ValidationError::NonPositiveAmount(amount));
    }
    Ok(amount)
}

/// Account ids are assigned from 1 upwards
pub fn account_id(id: AccountId) -> Result<AccountId, ValidationError> {
    if id < 1 {
        return Err(ValidationError::InvalidAccountId(id));
    }
    Ok(id)
}
