//! In-process ledger backend
//!
//! Committed rows live in three id-ordered tables behind one async
//! `RwLock`. A unit of work stages its writes privately and publishes them
//! on commit. Account rows touched by `add_account_balance` are locked with a
//! per-row async mutex that is held until the unit of work ends, which gives
//! the same "second writer waits for the first commit" behaviour as
//! `UPDATE ... RETURNING` on PostgreSQL.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use super::error::LedgerError;
use super::store::{LedgerBackend, Queries, UnitOfWork, lock_with_timeout};
use super::types::{
    Account, AccountId, CreateAccountParams, CreateEntryParams, CreatePaymentParams, Entry,
    EntryId, ListAccountsParams, ListEntriesParams, ListPaymentsParams, Payment, PaymentId,
};

/// Default bound on how long a unit of work waits for a row lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    payments: BTreeMap<PaymentId, Payment>,
}

struct Shared {
    tables: RwLock<Tables>,
    row_locks: DashMap<AccountId, Arc<Mutex<()>>>,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    payment_seq: AtomicI64,
    lock_timeout: Duration,
}

impl Shared {
    fn row_lock(&self, id: AccountId) -> Arc<Mutex<()>> {
        self.row_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// In-process backend with row-level locking
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: DashMap::new(),
                account_seq: AtomicI64::new(0),
                entry_seq: AtomicI64::new(0),
                payment_seq: AtomicI64::new(0),
                lock_timeout,
            }),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.shared.lock_timeout
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

#[async_trait]
impl LedgerBackend for MemoryBackend {
    type Tx = MemoryTx;

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<MemoryTx, LedgerError> {
        Ok(MemoryTx {
            shared: self.shared.clone(),
            locks: HashMap::new(),
            accounts: BTreeMap::new(),
            entries: BTreeMap::new(),
            payments: BTreeMap::new(),
        })
    }
}

/// Open unit of work on a [`MemoryBackend`].
///
/// Dropping it unfinished releases its locks and forgets its staged rows.
pub struct MemoryTx {
    shared: Arc<Shared>,
    locks: HashMap<AccountId, OwnedMutexGuard<()>>,
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    payments: BTreeMap<PaymentId, Payment>,
}

impl MemoryTx {
    async fn lock_account(&mut self, id: AccountId) -> Result<(), LedgerError> {
        if self.locks.contains_key(&id) {
            return Ok(());
        }
        let lock = self.shared.row_lock(id);
        let guard = lock_with_timeout(
            self.shared.lock_timeout,
            format!("account {id}"),
            lock.lock_owned(),
        )
        .await?;
        self.locks.insert(id, guard);
        Ok(())
    }

    /// Read an account as this unit of work sees it
    async fn visible_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        if let Some(staged) = self.accounts.get(&id) {
            return Ok(staged.clone());
        }
        self.shared
            .tables
            .read()
            .await
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("account", id))
    }

    async fn ensure_account(&self, id: AccountId) -> Result<(), LedgerError> {
        self.visible_account(id).await.map(|_| ())
    }
}

/// Committed rows overlaid with staged ones, in id order
fn overlay<K: Ord + Copy, V: Clone>(
    committed: &BTreeMap<K, V>,
    staged: &BTreeMap<K, V>,
    keep: impl Fn(&V) -> bool,
) -> Vec<V> {
    let mut merged: BTreeMap<K, &V> = committed.iter().map(|(k, v)| (*k, v)).collect();
    merged.extend(staged.iter().map(|(k, v)| (*k, v)));
    merged.into_values().filter(|v| keep(v)).cloned().collect()
}

#[async_trait]
impl Queries for MemoryTx {
    async fn create_account(
        &mut self,
        params: CreateAccountParams,
    ) -> Result<Account, LedgerError> {
        let id = self.shared.account_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let account = Account {
            id,
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account, LedgerError> {
        self.visible_account(id).await
    }

    async fn list_accounts(
        &mut self,
        params: ListAccountsParams,
    ) -> Result<Vec<Account>, LedgerError> {
        let tables = self.shared.tables.read().await;
        let rows = overlay(&tables.accounts, &self.accounts, |a| {
            params.owner.as_deref().is_none_or(|owner| a.owner == owner)
        });
        Ok(params.page.slice(rows.into_iter()))
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, LedgerError> {
        self.lock_account(id).await?;

        let mut account = self.visible_account(id).await?;
        account.balance = account
            .balance
            .checked_add(delta)
            .ok_or(LedgerError::BalanceOverflow(id))?;
        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, LedgerError> {
        self.ensure_account(params.account_id).await?;

        let id = self.shared.entry_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = Entry {
            id,
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.entries.insert(id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry, LedgerError> {
        if let Some(staged) = self.entries.get(&id) {
            return Ok(staged.clone());
        }
        self.shared
            .tables
            .read()
            .await
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("entry", id))
    }

    async fn list_entries(
        &mut self,
        params: ListEntriesParams,
    ) -> Result<Vec<Entry>, LedgerError> {
        let tables = self.shared.tables.read().await;
        let rows = overlay(&tables.entries, &self.entries, |e| {
            e.account_id == params.account_id
        });
        Ok(params.page.slice(rows.into_iter()))
    }

    async fn create_payment(
        &mut self,
        params: CreatePaymentParams,
    ) -> Result<Payment, LedgerError> {
        self.ensure_account(params.from_account_id).await?;
        self.ensure_account(params.to_account_id).await?;

        let id = self.shared.payment_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let payment = Payment {
            id,
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.payments.insert(id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&mut self, id: PaymentId) -> Result<Payment, LedgerError> {
        if let Some(staged) = self.payments.get(&id) {
            return Ok(staged.clone());
        }
        self.shared
            .tables
            .read()
            .await
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("payment", id))
    }

    async fn list_payments(
        &mut self,
        params: ListPaymentsParams,
    ) -> Result<Vec<Payment>, LedgerError> {
        let tables = self.shared.tables.read().await;
        let rows = overlay(&tables.payments, &self.payments, |p| match params.account_id {
            Some(id) => p.from_account_id == id || p.to_account_id == id,
            None => true,
        });
        Ok(params.page.slice(rows.into_iter()))
    }
}

#[async_trait]
impl UnitOfWork for MemoryTx {
    async fn commit(self) -> Result<(), LedgerError> {
        let MemoryTx {
            shared,
            locks,
            accounts,
            entries,
            payments,
        } = self;

        // Publish before unlocking so the next lock holder reads our balance.
        let mut tables = shared.tables.write().await;
        debug!(
            accounts = accounts.len(),
            entries = entries.len(),
            payments = payments.len(),
            "memory: commit"
        );
        tables.accounts.extend(accounts);
        tables.entries.extend(entries);
        tables.payments.extend(payments);
        drop(tables);
        drop(locks);
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        debug!(
            staged_accounts = self.accounts.len(),
            locked = self.locks.len(),
            "memory: rollback"
        );
        Ok(())
    }
}
