//! Ledger row types and operation parameters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::validation::Currency;

pub type AccountId = i64;
pub type EntryId = i64;
pub type PaymentId = i64;

/// Balance-holding account, balance in minor currency units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub balance: i64,
    #[sqlx(try_from = "String")]
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

/// Immutable signed ledger line (positive = credit, negative = debit)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Immutable record of one transfer between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: PaymentId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateAccountParams {
    pub owner: String,
    pub currency: Currency,
    /// Opening balance; zero for accounts opened through the service layer
    pub balance: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateEntryParams {
    pub account_id: AccountId,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct CreatePaymentParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

/// Limit/offset window over an id-ordered listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    /// Negative bounds are clamped to zero
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }.normalized()
    }

    /// Same window with negative bounds clamped to zero, as every backend reads it
    pub fn normalized(self) -> Self {
        Self {
            limit: self.limit.max(0),
            offset: self.offset.max(0),
        }
    }

    /// Apply the window to an already ordered iterator
    pub(crate) fn slice<T>(&self, rows: impl Iterator<Item = T>) -> Vec<T> {
        let page = self.normalized();
        rows.skip(page.offset as usize)
            .take(page.limit as usize)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ListAccountsParams {
    /// Only accounts of this owner when set
    pub owner: Option<String>,
    pub page: Page,
}

#[derive(Debug, Clone, Copy)]
pub struct ListEntriesParams {
    pub account_id: AccountId,
    pub page: Page,
}

#[derive(Debug, Clone, Copy)]
pub struct ListPaymentsParams {
    /// Payments where this account is either source or destination
    pub account_id: Option<AccountId>,
    pub page: Page,
}

/// Input of a single transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

impl TransferParams {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }
}

/// Everything one committed transfer produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub payment: Payment,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}
