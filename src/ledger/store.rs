//! Ledger Store
//!
//! A [`LedgerBackend`] hands out units of work. Every read and write goes
//! through a [`UnitOfWork`] handle, and [`Store::exec_tx`] is the only place
//! that decides between commit and rollback.
//!
//! # Unit-of-work contract
//!
//! ```text
//! begin ──▶ f(&mut tx) ──Ok──▶ commit ──Err──▶ TransactionAborted
//!                 │
//!                 └──Err──▶ rollback ──Err──▶ RollbackFailed { cause, rollback }
//! ```
//!
//! Dropping a handle without finishing it (e.g. the caller's future was
//! cancelled) discards its staged writes and releases its row locks. A
//! deadline given to [`Store::exec_tx_within`] stops at the commit call: a
//! commit in flight is never abandoned.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::error::LedgerError;
use super::types::{
    Account, AccountId, CreateAccountParams, CreateEntryParams, CreatePaymentParams, Entry,
    EntryId, ListAccountsParams, ListEntriesParams, ListPaymentsParams, Payment, PaymentId,
};

/// Row-level operations available inside a unit of work
#[async_trait]
pub trait Queries: Send {
    async fn create_account(&mut self, params: CreateAccountParams)
    -> Result<Account, LedgerError>;

    async fn get_account(&mut self, id: AccountId) -> Result<Account, LedgerError>;

    async fn list_accounts(
        &mut self,
        params: ListAccountsParams,
    ) -> Result<Vec<Account>, LedgerError>;

    /// Add `delta` to the balance and return the updated row.
    ///
    /// The row stays locked until the unit of work ends.
    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, LedgerError>;

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, LedgerError>;

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry, LedgerError>;

    async fn list_entries(&mut self, params: ListEntriesParams)
    -> Result<Vec<Entry>, LedgerError>;

    async fn create_payment(
        &mut self,
        params: CreatePaymentParams,
    ) -> Result<Payment, LedgerError>;

    async fn get_payment(&mut self, id: PaymentId) -> Result<Payment, LedgerError>;

    async fn list_payments(
        &mut self,
        params: ListPaymentsParams,
    ) -> Result<Vec<Payment>, LedgerError>;
}

/// An open atomic unit of work. Finishing consumes the handle, so the
/// commit/rollback decision can only be made once.
#[async_trait]
pub trait UnitOfWork: Queries + Sized {
    async fn commit(self) -> Result<(), LedgerError>;

    async fn rollback(self) -> Result<(), LedgerError>;
}

/// Transactional storage beneath the ledger
#[async_trait]
pub trait LedgerBackend: Send + Sync + 'static {
    type Tx: UnitOfWork + 'static;

    /// Get backend name for logging
    fn name(&self) -> &'static str;

    async fn begin(&self) -> Result<Self::Tx, LedgerError>;
}

/// Ledger facade over a backend
pub struct Store<B: LedgerBackend> {
    backend: B,
}

impl<B: LedgerBackend> Store<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run `f` inside one unit of work.
    ///
    /// `f` gets exclusive use of the handle and must not keep it; the
    /// returned future is awaited to completion before commit or rollback.
    pub async fn exec_tx<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'q> FnOnce(&'q mut B::Tx) -> BoxFuture<'q, Result<T, LedgerError>> + Send,
    {
        self.exec_tx_within(None, f).await
    }

    /// [`Store::exec_tx`] with an optional deadline.
    ///
    /// The deadline covers `begin` and `f` only. When it passes there the
    /// handle is dropped unfinished and [`LedgerError::Cancelled`] is
    /// returned. Once commit has started it runs to completion and its own
    /// outcome is returned.
    pub async fn exec_tx_within<T, F>(
        &self,
        deadline: Option<Duration>,
        f: F,
    ) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'q> FnOnce(&'q mut B::Tx) -> BoxFuture<'q, Result<T, LedgerError>> + Send,
    {
        let body = async {
            let mut tx = self.backend.begin().await?;
            let outcome = f(&mut tx).await;
            Ok::<_, LedgerError>((tx, outcome))
        };
        let (tx, outcome) = match deadline {
            Some(limit) => tokio::time::timeout(limit, body).await.map_err(|_| {
                LedgerError::Cancelled(format!(
                    "unit of work exceeded {}ms before commit",
                    limit.as_millis()
                ))
            })??,
            None => body.await?,
        };

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(cause) => match tx.rollback().await {
                Ok(()) => Err(cause),
                Err(rollback) => Err(LedgerError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                }),
            },
        }
    }

    pub async fn create_account(
        &self,
        params: CreateAccountParams,
    ) -> Result<Account, LedgerError> {
        self.exec_tx(move |q| Box::pin(async move { q.create_account(params).await }))
            .await
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.exec_tx(move |q| Box::pin(async move { q.get_account(id).await }))
            .await
    }

    pub async fn list_accounts(
        &self,
        params: ListAccountsParams,
    ) -> Result<Vec<Account>, LedgerError> {
        self.exec_tx(move |q| Box::pin(async move { q.list_accounts(params).await }))
            .await
    }

    pub async fn get_entry(&self, id: EntryId) -> Result<Entry, LedgerError> {
        self.exec_tx(move |q| Box::pin(async move { q.get_entry(id).await }))
            .await
    }

    pub async fn list_entries(
        &self,
        params: ListEntriesParams,
    ) -> Result<Vec<Entry>, LedgerError> {
        self.exec_tx(move |q| Box::pin(async move { q.list_entries(params).await }))
            .await
    }

    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment, LedgerError> {
        self.exec_tx(move |q| Box::pin(async move { q.get_payment(id).await }))
            .await
    }

    pub async fn list_payments(
        &self,
        params: ListPaymentsParams,
    ) -> Result<Vec<Payment>, LedgerError> {
        self.exec_tx(move |q| Box::pin(async move { q.list_payments(params).await }))
            .await
    }
}

/// Await a row lock for at most `limit`, aborting the unit of work otherwise
pub(crate) async fn lock_with_timeout<T>(
    limit: Duration,
    what: impl std::fmt::Display,
    acquire: impl std::future::Future<Output = T>,
) -> Result<T, LedgerError> {
    tokio::time::timeout(limit, acquire).await.map_err(|_| {
        LedgerError::TransactionAborted(format!(
            "lock wait timeout after {}ms on {}",
            limit.as_millis(),
            what
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryBackend;
    use crate::ledger::types::Page;
    use crate::ledger::validation::Currency;

    fn usd_account(owner: &str, balance: i64) -> CreateAccountParams {
        CreateAccountParams {
            owner: owner.to_string(),
            currency: Currency::new("USD").unwrap(),
            balance,
        }
    }

    #[tokio::test]
    async fn test_exec_tx_commits_on_ok() {
        let store = Store::new(MemoryBackend::default());

        let id = store
            .exec_tx(|q| {
                Box::pin(async move {
                    let account = q.create_account(usd_account("alice", 10)).await?;
                    q.add_account_balance(account.id, 5).await?;
                    Ok::<_, LedgerError>(account.id)
                })
            })
            .await
            .unwrap();

        assert_eq!(store.get_account(id).await.unwrap().balance, 15);
    }

    #[tokio::test]
    async fn test_exec_tx_discards_writes_on_err() {
        let store = Store::new(MemoryBackend::default());
        let account = store.create_account(usd_account("alice", 10)).await.unwrap();
        let account_id = account.id;

        let err = store
            .exec_tx(move |q| {
                Box::pin(async move {
                    q.create_account(usd_account("bob", 1)).await?;
                    q.add_account_balance(account_id, 90).await?;
                    q.get_account(9_999).await?;
                    Ok::<_, LedgerError>(())
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::NotFound { id: 9_999, .. }));
        assert_eq!(store.get_account(account.id).await.unwrap(), account);
        let all = store
            .list_accounts(ListAccountsParams {
                owner: None,
                page: Page::new(10, 0),
            })
            .await
            .unwrap();
        assert_eq!(all, vec![account]);
    }

    #[tokio::test]
    async fn test_exec_tx_within_cancels_slow_body() {
        let store = Store::new(MemoryBackend::default());

        let err = store
            .exec_tx_within(Some(Duration::from_millis(20)), |q| {
                Box::pin(async move {
                    q.create_account(usd_account("slow", 1)).await?;
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, LedgerError>(())
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Cancelled(_)));
        let all = store
            .list_accounts(ListAccountsParams {
                owner: None,
                page: Page::new(10, 0),
            })
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_lock_with_timeout_aborts() {
        let pending = std::future::pending::<()>();
        let err = lock_with_timeout(Duration::from_millis(10), "account 1", pending)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("account 1"));
    }
}
