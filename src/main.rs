//! Neobank Ledger - demo runner
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │  Config  │───▶│  Store   │───▶│ Harness  │───▶│  Audit   │
//! │  (YAML)  │    │(mem/pg)  │    │ (A⇄B)    │    │ (JSON)   │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Seeds a ring of accounts, pushes transfers in both directions across
//! every neighbouring pair at once, then checks that no money was created
//! or destroyed.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::json;

use neobank_ledger::config::{AppConfig, BackendKind};
use neobank_ledger::db::Database;
use neobank_ledger::harness::{
    HarnessOptions, audit_account, bidirectional_workload, run_concurrent, total_balance,
};
use neobank_ledger::ledger::{
    CreateAccountParams, Currency, LedgerBackend, MemoryBackend, PgBackend, Store,
};
use neobank_ledger::logging::init_logging;
use neobank_ledger::service::{
    Authenticator, LedgerService, PaymentRequest, StaticTokenAuthenticator,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _guard = init_logging(&config);

    tracing::info!(env = %env, backend = ?config.store.backend, "Starting neobank ledger");

    match config.store.backend {
        BackendKind::Memory => {
            let backend = MemoryBackend::new(config.store.lock_timeout());
            run(Arc::new(Store::new(backend)), &config).await
        }
        BackendKind::Postgres => {
            let db = Database::connect(config.store.postgres_url()?, config.store.max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.health_check().await.context("PostgreSQL health check failed")?;
            let backend = PgBackend::new(db.into_pool());
            backend.init_schema().await?;
            run(Arc::new(Store::new(backend)), &config).await
        }
    }
}

async fn run<B: LedgerBackend>(store: Arc<Store<B>>, config: &AppConfig) -> Result<()> {
    let harness = &config.harness;
    let currency = config
        .currencies
        .first()
        .context("no currency configured")?;
    let currency = Currency::new(currency)?;

    // Seed a ring of funded accounts, one owner each.
    let mut auth = StaticTokenAuthenticator::new();
    let mut accounts = Vec::with_capacity(harness.accounts);
    for i in 0..harness.accounts {
        let owner = format!("user{i}");
        let account = store
            .create_account(CreateAccountParams {
                owner: owner.clone(),
                currency: currency.clone(),
                balance: harness.opening_balance,
            })
            .await?;
        auth = auth.with_token(format!("token-{i}"), owner);
        accounts.push(account.id);
    }
    let expected_total = i64::try_from(accounts.len())?
        .checked_mul(harness.opening_balance)
        .context("opening balances overflow")?;

    // One payment through the service layer, the way an API caller would.
    let service = LedgerService::from_config(store.clone(), config)?;
    let principal = auth.resolve("token-0").await?;
    tracing::info!(
        authenticator = auth.name(),
        owner = %principal.owner,
        "principal resolved"
    );
    let first = service
        .create_payment(
            &principal,
            PaymentRequest {
                from_account_id: accounts[0],
                to_account_id: accounts[1],
                amount: harness.amount,
                currency: currency.to_string(),
            },
        )
        .await?;
    tracing::info!(payment_id = first.payment.id, "service payment committed");

    let mut workload = Vec::new();
    for (i, &a) in accounts.iter().enumerate() {
        let b = accounts[(i + 1) % accounts.len()];
        if a != b {
            workload.extend(bidirectional_workload(
                a,
                b,
                harness.transfers_per_direction,
                harness.amount,
            ));
        }
    }
    let options = HarnessOptions {
        retry: config.transfer.retry.clone(),
        deadline: config.transfer.timeout(),
        ..HarnessOptions::default()
    };
    let report = run_concurrent(store.clone(), workload, &options).await;

    let mut audits = Vec::with_capacity(accounts.len());
    for &id in &accounts {
        audits.push(audit_account(&store, id).await?);
    }
    let total = total_balance(&store, &accounts).await?;

    let summary = json!({
        "backend": store.backend().name(),
        "report": report,
        "accounts": audits,
        "total_balance": total,
        "expected_total": expected_total,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if total != expected_total {
        bail!("conservation violated: total {} != expected {}", total, expected_total);
    }
    if let Some(bad) = audits
        .iter()
        .find(|a| a.opening_balance() != harness.opening_balance)
    {
        bail!(
            "account {} balance {} disagrees with its entries (sum {})",
            bad.account_id,
            bad.balance,
            bad.entries_sum
        );
    }
    tracing::info!(
        committed = report.committed,
        failed = report.failed,
        "Ledger conserved across run"
    );
    Ok(())
}
