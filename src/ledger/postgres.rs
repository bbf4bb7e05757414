//! PostgreSQL ledger backend
//!
//! One `sqlx` transaction per unit of work. The balance mutator is a single
//! `UPDATE ... RETURNING`, which takes the row lock and holds it until the
//! transaction ends.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::error::{LedgerError, sqlstate};
use super::store::{LedgerBackend, Queries, UnitOfWork};
use super::types::{
    Account, AccountId, CreateAccountParams, CreateEntryParams, CreatePaymentParams, Entry,
    EntryId, ListAccountsParams, ListEntriesParams, ListPaymentsParams, Payment, PaymentId,
};

pub const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          BIGSERIAL PRIMARY KEY,
    owner       VARCHAR NOT NULL,
    balance     BIGINT NOT NULL,
    currency    VARCHAR(3) NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

pub const CREATE_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id          BIGSERIAL PRIMARY KEY,
    account_id  BIGINT NOT NULL REFERENCES accounts (id),
    amount      BIGINT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

pub const CREATE_PAYMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payments (
    id               BIGSERIAL PRIMARY KEY,
    from_account_id  BIGINT NOT NULL REFERENCES accounts (id),
    to_account_id    BIGINT NOT NULL REFERENCES accounts (id),
    amount           BIGINT NOT NULL CHECK (amount > 0),
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_INDEXES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS accounts_owner_idx ON accounts (owner)",
    "CREATE INDEX IF NOT EXISTS entries_account_id_idx ON entries (account_id)",
    "CREATE INDEX IF NOT EXISTS payments_from_account_id_idx ON payments (from_account_id)",
    "CREATE INDEX IF NOT EXISTS payments_to_account_id_idx ON payments (to_account_id)",
];

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";

/// PostgreSQL-backed ledger
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the ledger tables if they do not exist yet
    pub async fn init_schema(&self) -> Result<(), LedgerError> {
        tracing::info!("Initializing ledger schema...");
        for ddl in [CREATE_ACCOUNTS_TABLE, CREATE_ENTRIES_TABLE, CREATE_PAYMENTS_TABLE]
            .into_iter()
            .chain(CREATE_INDEXES)
        {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        tracing::info!("Ledger schema initialized successfully");
        Ok(())
    }
}

#[async_trait]
impl LedgerBackend for PgBackend {
    type Tx = PgTx;

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<PgTx, LedgerError> {
        let tx = self.pool.begin().await?;
        Ok(PgTx { tx })
    }
}

/// Open unit of work on a [`PgBackend`].
///
/// Dropped unfinished, `sqlx` rolls the transaction back when the
/// connection returns to the pool.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

/// FK violations mean the referenced account does not exist
fn missing_account(e: sqlx::Error, account_id: AccountId) -> LedgerError {
    let is_fk = e
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == sqlstate::FOREIGN_KEY_VIOLATION);
    if is_fk {
        LedgerError::not_found("account", account_id)
    } else {
        e.into()
    }
}

#[async_trait]
impl Queries for PgTx {
    async fn create_account(
        &mut self,
        params: CreateAccountParams,
    ) -> Result<Account, LedgerError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(&params.owner)
        .bind(params.balance)
        .bind(params.currency.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| LedgerError::not_found("account", id))
    }

    async fn list_accounts(
        &mut self,
        params: ListAccountsParams,
    ) -> Result<Vec<Account>, LedgerError> {
        let page = params.page.normalized();
        let rows = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE ($1::VARCHAR IS NULL OR owner = $1) \
             ORDER BY id LIMIT $2 OFFSET $3"
        ))
        .bind(params.owner.as_deref())
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(&format!(
            "UPDATE accounts SET balance = balance + $1 WHERE id = $2 \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(delta)
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| LedgerError::not_found("account", id))
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, LedgerError> {
        sqlx::query_as::<_, Entry>(
            r#"
            INSERT INTO entries (account_id, amount) VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(params.account_id)
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| missing_account(e, params.account_id))
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry, LedgerError> {
        sqlx::query_as::<_, Entry>(
            "SELECT id, account_id, amount, created_at FROM entries WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| LedgerError::not_found("entry", id))
    }

    async fn list_entries(
        &mut self,
        params: ListEntriesParams,
    ) -> Result<Vec<Entry>, LedgerError> {
        let page = params.page.normalized();
        let rows = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, account_id, amount, created_at FROM entries
            WHERE account_id = $1
            ORDER BY id LIMIT $2 OFFSET $3
            "#,
        )
        .bind(params.account_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn create_payment(
        &mut self,
        params: CreatePaymentParams,
    ) -> Result<Payment, LedgerError> {
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (from_account_id, to_account_id, amount) VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            // The violated constraint names the missing side.
            let from_side = e
                .as_database_error()
                .and_then(|db| db.constraint())
                .is_some_and(|c| c.contains("from_account_id"));
            let missing = if from_side {
                params.from_account_id
            } else {
                params.to_account_id
            };
            missing_account(e, missing)
        })
    }

    async fn get_payment(&mut self, id: PaymentId) -> Result<Payment, LedgerError> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM payments WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| LedgerError::not_found("payment", id))
    }

    async fn list_payments(
        &mut self,
        params: ListPaymentsParams,
    ) -> Result<Vec<Payment>, LedgerError> {
        let page = params.page.normalized();
        let rows = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at FROM payments
            WHERE $1::BIGINT IS NULL OR from_account_id = $1 OR to_account_id = $1
            ORDER BY id LIMIT $2 OFFSET $3
            "#,
        )
        .bind(params.account_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl UnitOfWork for PgTx {
    async fn commit(self) -> Result<(), LedgerError> {
        self.tx
            .commit()
            .await
            .map_err(|e| LedgerError::TransactionAborted(format!("commit failed: {e}")))
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx.rollback().await.map_err(LedgerError::from)
    }
}
