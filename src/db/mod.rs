//! PostgreSQL pool for the ledger backend

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// How long a unit of work waits for a free connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

fn pool_options(max_connections: u32) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
}

/// Connection pool handed to [`crate::ledger::PgBackend`]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = pool_options(max_connections).connect(database_url).await?;
        tracing::info!(max_connections, "ledger pool connected");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn into_pool(self) -> PgPool {
        self.pool
    }

    /// Round-trip one statement through the pool
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
