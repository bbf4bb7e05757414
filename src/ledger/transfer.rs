//! Transfer Coordinator
//!
//! Runs one payment end-to-end inside a single unit of work:
//!
//! ```text
//! Payment{from, to, amount}
//!   → Entry{from, -amount}
//!   → Entry{to, +amount}
//!   → add_balance(lower id) → add_balance(higher id)
//!   → commit
//! ```
//!
//! Balances are always mutated in ascending account-id order, whatever the
//! direction of the transfer. Two transfers A→B and B→A therefore lock the
//! two rows in the same order and cannot wait on each other in a cycle.
//!
//! The coordinator does not retry and does not re-check business rules
//! beyond rejecting non-positive amounts; see [`super::retry`] and
//! [`crate::service`].

use std::time::Duration;

use tracing::debug;

use super::balance::add_money;
use super::error::LedgerError;
use super::store::{LedgerBackend, Queries, Store};
use super::types::{AccountId, CreateEntryParams, CreatePaymentParams, TransferParams, TransferResult};
use super::validation::positive_amount;

/// Lock-acquisition order for a pair of accounts: smaller id first.
#[inline]
pub fn order_pair(id1: AccountId, id2: AccountId) -> (AccountId, AccountId) {
    if id1 <= id2 { (id1, id2) } else { (id2, id1) }
}

/// Body of the payment unit of work
pub(crate) async fn payment_tx<Q: Queries>(
    q: &mut Q,
    params: TransferParams,
) -> Result<TransferResult, LedgerError> {
    let TransferParams {
        from_account_id,
        to_account_id,
        amount,
    } = params;

    let payment = q
        .create_payment(CreatePaymentParams {
            from_account_id,
            to_account_id,
            amount,
        })
        .await?;

    let from_entry = q
        .create_entry(CreateEntryParams {
            account_id: from_account_id,
            amount: -amount,
        })
        .await?;

    let to_entry = q
        .create_entry(CreateEntryParams {
            account_id: to_account_id,
            amount,
        })
        .await?;

    let (first, _) = order_pair(from_account_id, to_account_id);
    let (from_account, to_account) = if first == from_account_id {
        add_money(q, (from_account_id, -amount), (to_account_id, amount)).await?
    } else {
        let (to, from) = add_money(q, (to_account_id, amount), (from_account_id, -amount)).await?;
        (from, to)
    };

    debug!(
        payment_id = payment.id,
        from = from_account_id,
        to = to_account_id,
        amount,
        "payment staged"
    );

    Ok(TransferResult {
        payment,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

impl<B: LedgerBackend> Store<B> {
    /// Move `amount` from one account to another atomically.
    ///
    /// On error nothing from this call is visible in the ledger, so the
    /// caller may retry [`LedgerError::TransactionAborted`] safely.
    pub async fn transfer(&self, params: TransferParams) -> Result<TransferResult, LedgerError> {
        positive_amount(params.amount)?;
        self.exec_tx(move |q| Box::pin(payment_tx(q, params))).await
    }

    /// [`Store::transfer`] bounded by a deadline.
    ///
    /// If the deadline passes before commit starts, the in-flight unit of
    /// work is dropped, which discards it, and [`LedgerError::Cancelled`]
    /// is returned. A transfer whose commit has started is not cancelled.
    pub async fn transfer_within(
        &self,
        params: TransferParams,
        deadline: Duration,
    ) -> Result<TransferResult, LedgerError> {
        positive_amount(params.amount)?;
        self.exec_tx_within(Some(deadline), move |q| Box::pin(payment_tx(q, params)))
            .await
            .map_err(|e| match e {
                LedgerError::Cancelled(_) => LedgerError::Cancelled(format!(
                    "transfer {} -> {} exceeded {}ms",
                    params.from_account_id,
                    params.to_account_id,
                    deadline.as_millis()
                )),
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryBackend;
    use crate::ledger::types::{Account, CreateAccountParams, ListEntriesParams, Page};
    use crate::ledger::validation::{Currency, ValidationError};

    async fn open(store: &Store<MemoryBackend>, owner: &str, balance: i64) -> Account {
        store
            .create_account(CreateAccountParams {
                owner: owner.to_string(),
                currency: Currency::new("USD").unwrap(),
                balance,
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_order_pair_is_direction_independent() {
        assert_eq!(order_pair(1, 2), (1, 2));
        assert_eq!(order_pair(2, 1), (1, 2));
        assert_eq!(order_pair(7, 7), (7, 7));
        assert_eq!(order_pair(-3, 5), order_pair(5, -3));
    }

    #[tokio::test]
    async fn test_transfer_scenario() {
        let store = Store::new(MemoryBackend::default());
        let a = open(&store, "alice", 100).await;
        let b = open(&store, "bob", 50).await;

        let first = store.transfer(TransferParams::new(a.id, b.id, 30)).await.unwrap();
        assert_eq!(first.payment.amount, 30);
        assert_eq!(first.payment.from_account_id, a.id);
        assert_eq!(first.payment.to_account_id, b.id);
        assert_eq!((first.from_entry.account_id, first.from_entry.amount), (a.id, -30));
        assert_eq!((first.to_entry.account_id, first.to_entry.amount), (b.id, 30));
        assert_eq!(first.from_account.balance, 70);
        assert_eq!(first.to_account.balance, 80);

        let second = store.transfer(TransferParams::new(a.id, b.id, 30)).await.unwrap();
        assert_ne!(second.payment.id, first.payment.id);
        assert_eq!(second.from_account.balance, 40);
        assert_eq!(second.to_account.balance, 110);

        assert_eq!(store.get_payment(first.payment.id).await.unwrap(), first.payment);
        assert_eq!(store.get_entry(second.to_entry.id).await.unwrap(), second.to_entry);
    }

    #[tokio::test]
    async fn test_reverse_direction_maps_accounts_back() {
        let store = Store::new(MemoryBackend::default());
        let low = open(&store, "alice", 0).await;
        let high = open(&store, "bob", 100).await;

        let result = store
            .transfer(TransferParams::new(high.id, low.id, 25))
            .await
            .unwrap();

        assert_eq!(result.from_account.id, high.id);
        assert_eq!(result.from_account.balance, 75);
        assert_eq!(result.to_account.id, low.id);
        assert_eq!(result.to_account.balance, 25);
        assert_eq!(result.from_entry.amount + result.to_entry.amount, 0);
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected_without_effect() {
        let store = Store::new(MemoryBackend::default());
        let a = open(&store, "alice", 100).await;
        let b = open(&store, "bob", 50).await;

        for amount in [0, -10] {
            let err = store
                .transfer(TransferParams::new(a.id, b.id, amount))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                LedgerError::Validation(ValidationError::NonPositiveAmount(_))
            ));
        }

        assert_eq!(store.get_account(a.id).await.unwrap(), a);
        assert_eq!(store.get_account(b.id).await.unwrap(), b);
    }

    #[tokio::test]
    async fn test_missing_destination_leaves_no_trace() {
        let store = Store::new(MemoryBackend::default());
        let a = open(&store, "alice", 100).await;

        let err = store
            .transfer(TransferParams::new(a.id, 999, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { id: 999, .. }));

        assert_eq!(store.get_account(a.id).await.unwrap(), a);
        let entries = store
            .list_entries(ListEntriesParams {
                account_id: a.id,
                page: Page::new(10, 0),
            })
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_transfer_within_deadline_cancels_blocked_transfer() {
        let store = Store::new(MemoryBackend::default());
        let a = open(&store, "alice", 100).await;
        let b = open(&store, "bob", 50).await;

        // Hold the lower row so the transfer blocks on it.
        let mut blocker = store.backend().begin().await.unwrap();
        blocker.add_account_balance(a.id, 0).await.unwrap();

        let err = store
            .transfer_within(TransferParams::new(b.id, a.id, 10), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled(_)));
        drop(blocker);

        assert_eq!(store.get_account(a.id).await.unwrap(), a);
        assert_eq!(store.get_account(b.id).await.unwrap(), b);
        assert!(matches!(
            store.get_payment(1).await,
            Err(LedgerError::NotFound { entity: "payment", .. })
        ));

        let done = store
            .transfer_within(TransferParams::new(b.id, a.id, 10), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(done.to_account.balance, 110);
    }
}
