//! Balance Mutator
//!
//! The only writer of `Account::balance`. It takes a unit-of-work handle, so
//! a standalone read-modify-write outside a unit of work cannot be written.

use super::error::LedgerError;
use super::store::Queries;
use super::types::{Account, AccountId};

/// Apply a signed delta to one account and return the updated row.
///
/// No floor is enforced: negative balances are representable.
pub async fn add_balance<Q: Queries>(
    q: &mut Q,
    account_id: AccountId,
    delta: i64,
) -> Result<Account, LedgerError> {
    q.add_account_balance(account_id, delta).await
}

/// Apply two deltas in the given order, returning the rows in the same order
pub(crate) async fn add_money<Q: Queries>(
    q: &mut Q,
    first: (AccountId, i64),
    second: (AccountId, i64),
) -> Result<(Account, Account), LedgerError> {
    let first = add_balance(q, first.0, first.1).await?;
    let second = add_balance(q, second.0, second.1).await?;
    Ok((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryBackend;
    use crate::ledger::store::{LedgerBackend, UnitOfWork};
    use crate::ledger::types::CreateAccountParams;
    use crate::ledger::validation::Currency;

    #[tokio::test]
    async fn test_negative_balance_is_representable() {
        let backend = MemoryBackend::default();
        let mut tx = backend.begin().await.unwrap();
        let account = tx
            .create_account(CreateAccountParams {
                owner: "alice".into(),
                currency: Currency::new("USD").unwrap(),
                balance: 10,
            })
            .await
            .unwrap();

        let updated = add_balance(&mut tx, account.id, -25).await.unwrap();
        assert_eq!(updated.balance, -15);
        assert_eq!(updated.currency, account.currency);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_money_same_account_twice() {
        let backend = MemoryBackend::default();
        let mut tx = backend.begin().await.unwrap();
        let account = tx
            .create_account(CreateAccountParams {
                owner: "alice".into(),
                currency: Currency::new("EUR").unwrap(),
                balance: 50,
            })
            .await
            .unwrap();

        let (after_first, after_second) = add_money(&mut tx, (account.id, -20), (account.id, 20))
            .await
            .unwrap();
        assert_eq!(after_first.balance, 30);
        assert_eq!(after_second.balance, 50);
    }

    #[tokio::test]
    async fn test_missing_account() {
        let backend = MemoryBackend::default();
        let mut tx = backend.begin().await.unwrap();
        assert!(matches!(
            add_balance(&mut tx, 404, 1).await,
            Err(LedgerError::NotFound { entity: "account", id: 404 })
        ));
    }
}
