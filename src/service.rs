//! Ledger Service
//!
//! The layer callers talk to. It resolves who is asking, checks request
//! preconditions and ownership, then hands the work to the [`Store`].
//!
//! # Payment flow
//!
//! ```text
//! PaymentRequest
//!   → ids ≥ 1, amount > 0, supported currency, from ≠ to
//!   → both accounts exist and are in the request currency
//!   → source account owned by the principal
//!   → transfer_with_retry (bounded by the configured deadline)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::ledger::validation::{account_id, positive_amount};
use crate::ledger::{
    Account, AccountId, CreateAccountParams, Currency, Entry, EntryId, LedgerBackend,
    LedgerError, ListAccountsParams, ListEntriesParams, ListPaymentsParams, Page, Payment,
    PaymentId, RetryPolicy, Store, TransferParams, TransferResult, ValidationError,
    transfer_with_retry,
};

pub const MIN_PAGE_SIZE: i64 = 5;
pub const MAX_PAGE_SIZE: i64 = 10;

// ============================================================================
// Principal resolution
// ============================================================================

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub owner: String,
}

impl Principal {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
        }
    }
}

/// Turns a bearer token into a principal.
///
/// Token issuance and verification live elsewhere; the ledger only needs
/// the owner name.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Get authenticator name for logging
    fn name(&self) -> &'static str;

    async fn resolve(&self, token: &str) -> Result<Principal, LedgerError>;
}

/// Fixed token table, for the demo binary and tests
#[derive(Debug, Default, Clone)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, owner: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), owner.into());
        self
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn resolve(&self, token: &str) -> Result<Principal, LedgerError> {
        self.tokens
            .get(token)
            .map(Principal::new)
            .ok_or_else(|| LedgerError::Unauthorized("unknown token".to_string()))
    }
}

// ============================================================================
// Requests
// ============================================================================

/// 1-based page selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page_id: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub fn new(page_id: i64, page_size: i64) -> Self {
        Self { page_id, page_size }
    }

    pub fn to_page(self) -> Result<Page, ValidationError> {
        if self.page_id < 1 {
            return Err(ValidationError::OutOfRange {
                field: "page_id",
                min: 1,
                max: i64::MAX,
                actual: self.page_id,
            });
        }
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ValidationError::OutOfRange {
                field: "page_size",
                min: MIN_PAGE_SIZE,
                max: MAX_PAGE_SIZE,
                actual: self.page_size,
            });
        }
        let offset = (self.page_id - 1)
            .checked_mul(self.page_size)
            .ok_or(ValidationError::OutOfRange {
                field: "page_id",
                min: 1,
                max: i64::MAX / self.page_size,
                actual: self.page_id,
            })?;
        Ok(Page::new(self.page_size, offset))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
    pub currency: String,
}

// ============================================================================
// Service
// ============================================================================

pub struct LedgerService<B: LedgerBackend> {
    store: Arc<Store<B>>,
    currencies: Vec<Currency>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
}

impl<B: LedgerBackend> LedgerService<B> {
    pub fn new(store: Arc<Store<B>>, currencies: Vec<Currency>) -> Self {
        Self {
            store,
            currencies,
            retry: RetryPolicy::default(),
            timeout: None,
        }
    }

    /// Build from the `currencies` and `transfer` config sections
    pub fn from_config(store: Arc<Store<B>>, config: &AppConfig) -> Result<Self, LedgerError> {
        let currencies = config
            .currencies
            .iter()
            .map(|code| Currency::new(code))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(store, currencies)
            .with_retry(config.transfer.retry.clone())
            .with_timeout(config.transfer.timeout()))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<Store<B>> {
        &self.store
    }

    fn supported_currency(&self, code: &str) -> Result<Currency, LedgerError> {
        let currency = Currency::new(code)?;
        if !self.currencies.contains(&currency) {
            return Err(ValidationError::UnsupportedCurrency(currency.to_string()).into());
        }
        Ok(currency)
    }

    /// Load an account the principal owns
    async fn owned_account(
        &self,
        principal: &Principal,
        id: AccountId,
    ) -> Result<Account, LedgerError> {
        let account = self.store.get_account(account_id(id)?).await?;
        if account.owner != principal.owner {
            return Err(LedgerError::Unauthorized(format!(
                "account {} doesn't belong to the authenticated user",
                id
            )));
        }
        Ok(account)
    }

    /// Load an account and check it is held in `currency`
    async fn valid_account(
        &self,
        id: AccountId,
        currency: &Currency,
    ) -> Result<Account, LedgerError> {
        let account = self.store.get_account(id).await?;
        if account.currency != *currency {
            return Err(ValidationError::CurrencyMismatch {
                account_id: id,
                expected: currency.to_string(),
                actual: account.currency.to_string(),
            }
            .into());
        }
        Ok(account)
    }

    /// Open a zero-balance account for the principal
    pub async fn create_account(
        &self,
        principal: &Principal,
        currency: &str,
    ) -> Result<Account, LedgerError> {
        let currency = self.supported_currency(currency)?;
        let account = self
            .store
            .create_account(CreateAccountParams {
                owner: principal.owner.clone(),
                currency,
                balance: 0,
            })
            .await?;
        info!(
            account_id = account.id,
            owner = %account.owner,
            currency = %account.currency,
            "account created"
        );
        Ok(account)
    }

    pub async fn get_account(
        &self,
        principal: &Principal,
        id: AccountId,
    ) -> Result<Account, LedgerError> {
        self.owned_account(principal, id).await
    }

    pub async fn list_accounts(
        &self,
        principal: &Principal,
        page: PageRequest,
    ) -> Result<Vec<Account>, LedgerError> {
        self.store
            .list_accounts(ListAccountsParams {
                owner: Some(principal.owner.clone()),
                page: page.to_page()?,
            })
            .await
    }

    /// Validate and execute a payment on behalf of the principal
    pub async fn create_payment(
        &self,
        principal: &Principal,
        request: PaymentRequest,
    ) -> Result<TransferResult, LedgerError> {
        let from_id = account_id(request.from_account_id)?;
        let to_id = account_id(request.to_account_id)?;
        let amount = positive_amount(request.amount)?;
        let currency = self.supported_currency(&request.currency)?;
        if from_id == to_id {
            return Err(ValidationError::SameAccount(from_id).into());
        }

        let from = self.valid_account(from_id, &currency).await?;
        if from.owner != principal.owner {
            warn!(
                from = from_id,
                principal = %principal.owner,
                "payment rejected: source account not owned by principal"
            );
            return Err(LedgerError::Unauthorized(
                "from account doesn't belong to the authenticated user".to_string(),
            ));
        }
        self.valid_account(to_id, &currency).await?;

        let params = TransferParams::new(from_id, to_id, amount);
        match transfer_with_retry(&*self.store, params, &self.retry, self.timeout).await {
            Ok(result) => {
                info!(
                    payment_id = result.payment.id,
                    from = from_id,
                    to = to_id,
                    amount,
                    currency = %currency,
                    "payment committed"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(
                    from = from_id,
                    to = to_id,
                    amount,
                    code = e.code(),
                    error = %e,
                    "payment failed"
                );
                Err(e)
            }
        }
    }

    /// A payment is visible to the owner of either side
    pub async fn get_payment(
        &self,
        principal: &Principal,
        id: PaymentId,
    ) -> Result<Payment, LedgerError> {
        let payment = self.store.get_payment(id).await?;
        if self
            .owned_account(principal, payment.from_account_id)
            .await
            .is_ok()
        {
            return Ok(payment);
        }
        self.owned_account(principal, payment.to_account_id).await?;
        Ok(payment)
    }

    pub async fn get_entry(&self, principal: &Principal, id: EntryId) -> Result<Entry, LedgerError> {
        let entry = self.store.get_entry(id).await?;
        self.owned_account(principal, entry.account_id).await?;
        Ok(entry)
    }

    pub async fn list_entries(
        &self,
        principal: &Principal,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Vec<Entry>, LedgerError> {
        let page = page.to_page()?;
        self.owned_account(principal, account_id).await?;
        self.store
            .list_entries(ListEntriesParams { account_id, page })
            .await
    }

    pub async fn list_payments(
        &self,
        principal: &Principal,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Vec<Payment>, LedgerError> {
        let page = page.to_page()?;
        self.owned_account(principal, account_id).await?;
        self.store
            .list_payments(ListPaymentsParams {
                account_id: Some(account_id),
                page,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryBackend;

    fn service() -> LedgerService<MemoryBackend> {
        let currencies = ["USD", "EUR", "CAD"]
            .iter()
            .map(|c| Currency::new(c).unwrap())
            .collect();
        LedgerService::new(Arc::new(Store::new(MemoryBackend::default())), currencies)
    }

    /// Account with an opening balance, seeded below the service layer
    async fn funded(
        service: &LedgerService<MemoryBackend>,
        owner: &str,
        currency: &str,
        balance: i64,
    ) -> Account {
        service
            .store()
            .create_account(CreateAccountParams {
                owner: owner.to_string(),
                currency: Currency::new(currency).unwrap(),
                balance,
            })
            .await
            .unwrap()
    }

    fn payment(from: AccountId, to: AccountId, amount: i64, currency: &str) -> PaymentRequest {
        PaymentRequest {
            from_account_id: from,
            to_account_id: to,
            amount,
            currency: currency.to_string(),
        }
    }

    #[test]
    fn test_page_request_bounds() {
        assert_eq!(PageRequest::new(1, 5).to_page().unwrap(), Page::new(5, 0));
        assert_eq!(PageRequest::new(3, 10).to_page().unwrap(), Page::new(10, 20));
        assert!(PageRequest::new(0, 5).to_page().is_err());
        assert!(PageRequest::new(1, 4).to_page().is_err());
        assert!(PageRequest::new(1, 11).to_page().is_err());
        assert!(PageRequest::new(i64::MAX, 10).to_page().is_err());
    }

    #[tokio::test]
    async fn test_static_authenticator() {
        let auth = StaticTokenAuthenticator::new().with_token("t-alice", "alice");
        assert_eq!(auth.name(), "static");
        assert_eq!(auth.resolve("t-alice").await.unwrap(), Principal::new("alice"));
        assert!(matches!(
            auth.resolve("nope").await,
            Err(LedgerError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_create_account_starts_at_zero() {
        let service = service();
        let alice = Principal::new("alice");

        let account = service.create_account(&alice, "EUR").await.unwrap();
        assert_eq!(account.balance, 0);
        assert_eq!(account.owner, "alice");
        assert_eq!(account.currency.as_str(), "EUR");

        assert!(matches!(
            service.create_account(&alice, "JPY").await,
            Err(LedgerError::Validation(ValidationError::UnsupportedCurrency(_)))
        ));
        assert!(matches!(
            service.create_account(&alice, "dollars").await,
            Err(LedgerError::Validation(ValidationError::InvalidCurrency { .. }))
        ));
    }

    #[tokio::test]
    async fn test_get_account_checks_owner() {
        let service = service();
        let account = service
            .create_account(&Principal::new("alice"), "USD")
            .await
            .unwrap();

        assert_eq!(
            service
                .get_account(&Principal::new("alice"), account.id)
                .await
                .unwrap(),
            account
        );
        assert!(matches!(
            service.get_account(&Principal::new("mallory"), account.id).await,
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(matches!(
            service.get_account(&Principal::new("alice"), 0).await,
            Err(LedgerError::Validation(ValidationError::InvalidAccountId(0)))
        ));
    }

    #[tokio::test]
    async fn test_list_accounts_by_owner_and_page() {
        let service = service();
        let alice = Principal::new("alice");
        for _ in 0..7 {
            service.create_account(&alice, "USD").await.unwrap();
        }
        service
            .create_account(&Principal::new("bob"), "USD")
            .await
            .unwrap();

        let first = service
            .list_accounts(&alice, PageRequest::new(1, 5))
            .await
            .unwrap();
        let second = service
            .list_accounts(&alice, PageRequest::new(2, 5))
            .await
            .unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(second.len(), 2);
        assert!(first.iter().chain(&second).all(|a| a.owner == "alice"));
    }

    #[tokio::test]
    async fn test_create_payment_happy_path() {
        let service = service();
        let alice = Principal::new("alice");
        let a = funded(&service, "alice", "USD", 100).await;
        let b = funded(&service, "bob", "USD", 50).await;

        let result = service
            .create_payment(&alice, payment(a.id, b.id, 30, "USD"))
            .await
            .unwrap();
        assert_eq!(result.from_account.balance, 70);
        assert_eq!(result.to_account.balance, 80);

        // Bob sees the payment as its recipient.
        let bob = Principal::new("bob");
        assert_eq!(
            service.get_payment(&bob, result.payment.id).await.unwrap(),
            result.payment
        );
        assert_eq!(
            service.get_entry(&bob, result.to_entry.id).await.unwrap(),
            result.to_entry
        );
        assert!(matches!(
            service.get_entry(&bob, result.from_entry.id).await,
            Err(LedgerError::Unauthorized(_))
        ));

        let history = service
            .list_payments(&bob, b.id, PageRequest::new(1, 5))
            .await
            .unwrap();
        assert_eq!(history, vec![result.payment]);
    }

    #[tokio::test]
    async fn test_create_payment_preconditions() {
        let service = service();
        let alice = Principal::new("alice");
        let a = funded(&service, "alice", "USD", 100).await;
        let b = funded(&service, "bob", "USD", 50).await;
        let e = funded(&service, "erin", "EUR", 50).await;

        let cases = [
            (payment(0, b.id, 10, "USD"), "VALIDATION_ERROR"),
            (payment(a.id, b.id, 0, "USD"), "VALIDATION_ERROR"),
            (payment(a.id, b.id, 10, "JPY"), "VALIDATION_ERROR"),
            (payment(a.id, a.id, 10, "USD"), "VALIDATION_ERROR"),
            (payment(a.id, e.id, 10, "USD"), "CURRENCY_MISMATCH"),
            (payment(a.id, 999, 10, "USD"), "NOT_FOUND"),
            (payment(b.id, a.id, 10, "USD"), "UNAUTHORIZED"),
        ];
        for (request, code) in cases {
            let err = service.create_payment(&alice, request).await.unwrap_err();
            assert_eq!(err.code(), code, "{err}");
        }

        assert_eq!(service.store().get_account(a.id).await.unwrap().balance, 100);
        assert_eq!(service.store().get_account(b.id).await.unwrap().balance, 50);
    }

    #[tokio::test]
    async fn test_list_entries_requires_ownership() {
        let service = service();
        let alice = Principal::new("alice");
        let a = funded(&service, "alice", "CAD", 100).await;
        let b = funded(&service, "bob", "CAD", 0).await;
        service
            .create_payment(&alice, payment(a.id, b.id, 5, "CAD"))
            .await
            .unwrap();

        let entries = service
            .list_entries(&alice, a.id, PageRequest::new(1, 5))
            .await
            .unwrap();
        assert_eq!(entries.iter().map(|e| e.amount).collect::<Vec<_>>(), vec![-5]);
        assert!(matches!(
            service.list_entries(&alice, b.id, PageRequest::new(1, 5)).await,
            Err(LedgerError::Unauthorized(_))
        ));
    }
}
