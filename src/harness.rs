//! Concurrency Harness
//!
//! Fires a batch of transfers at a store at once and reports what
//! happened. Used by the binary to exercise opposite-direction traffic on
//! the same account pair, and by tests to check conservation afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::ledger::{
    AccountId, LedgerBackend, LedgerError, ListEntriesParams, Page, RetryPolicy, Store,
    TransferParams, transfer_with_retry,
};

/// Page size used when walking an account's entries
const AUDIT_PAGE: i64 = 1_000;

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Upper bound on transfers in flight at once
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
    pub deadline: Option<Duration>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            retry: RetryPolicy::none(),
            deadline: None,
        }
    }
}

/// Outcome of one harness run
#[derive(Debug, Clone, Default, Serialize)]
pub struct HarnessReport {
    pub submitted: usize,
    pub committed: usize,
    pub failed: usize,
    /// Failure count per error code
    pub errors: BTreeMap<&'static str, usize>,
    pub elapsed_ms: u64,
    pub p50_us: Option<u64>,
    pub p99_us: Option<u64>,
    pub max_us: Option<u64>,
}

/// Balance of one account next to the sum of its entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountAudit {
    pub account_id: AccountId,
    pub balance: i64,
    pub entries_sum: i64,
    pub entries: usize,
}

impl AccountAudit {
    /// Balance the account was opened with, if the ledger is consistent
    pub fn opening_balance(&self) -> i64 {
        self.balance - self.entries_sum
    }
}

fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    Some(sorted[idx.min(sorted.len() - 1)])
}

/// `n` transfers each way between `a` and `b`, interleaved
pub fn bidirectional_workload(
    a: AccountId,
    b: AccountId,
    n: usize,
    amount: i64,
) -> Vec<TransferParams> {
    (0..n)
        .flat_map(|_| [TransferParams::new(a, b, amount), TransferParams::new(b, a, amount)])
        .collect()
}

/// Submit every transfer concurrently and wait for all of them.
pub async fn run_concurrent<B: LedgerBackend>(
    store: Arc<Store<B>>,
    workload: Vec<TransferParams>,
    options: &HarnessOptions,
) -> HarnessReport {
    let start = Instant::now();
    let permits = Arc::new(Semaphore::new(options.max_in_flight.max(1)));
    let mut join_set = JoinSet::new();
    let submitted = workload.len();

    info!(
        backend = store.backend().name(),
        transfers = submitted,
        max_in_flight = options.max_in_flight,
        "harness: starting run"
    );

    for params in workload {
        let store = store.clone();
        let permits = permits.clone();
        let retry = options.retry.clone();
        let deadline = options.deadline;
        join_set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let begun = Instant::now();
            let result = transfer_with_retry(&*store, params, &retry, deadline).await;
            (result.map(|_| ()), begun.elapsed())
        });
    }

    let mut report = HarnessReport {
        submitted,
        ..HarnessReport::default()
    };
    let mut latencies = Vec::with_capacity(submitted);
    while let Some(joined) = join_set.join_next().await {
        let code = match joined {
            Ok((Ok(()), latency)) => {
                report.committed += 1;
                latencies.push(latency.as_micros() as u64);
                continue;
            }
            Ok((Err(e), _)) => {
                debug!(error = %e, "harness: transfer failed");
                e.code()
            }
            Err(_) => "TASK_FAILED",
        };
        report.failed += 1;
        *report.errors.entry(code).or_default() += 1;
    }

    latencies.sort_unstable();
    report.elapsed_ms = start.elapsed().as_millis() as u64;
    report.p50_us = percentile(&latencies, 50.0);
    report.p99_us = percentile(&latencies, 99.0);
    report.max_us = latencies.last().copied();

    info!(
        committed = report.committed,
        failed = report.failed,
        elapsed_ms = report.elapsed_ms,
        "harness: run finished"
    );
    report
}

/// Read an account and sum all of its entries
pub async fn audit_account<B: LedgerBackend>(
    store: &Store<B>,
    account_id: AccountId,
) -> Result<AccountAudit, LedgerError> {
    let account = store.get_account(account_id).await?;
    let mut entries_sum = 0i64;
    let mut entries = 0usize;
    let mut offset = 0;
    loop {
        let page = store
            .list_entries(ListEntriesParams {
                account_id,
                page: Page::new(AUDIT_PAGE, offset),
            })
            .await?;
        for entry in &page {
            entries_sum = entries_sum
                .checked_add(entry.amount)
                .ok_or(LedgerError::BalanceOverflow(account_id))?;
        }
        entries += page.len();
        if (page.len() as i64) < AUDIT_PAGE {
            break;
        }
        offset += AUDIT_PAGE;
    }
    Ok(AccountAudit {
        account_id,
        balance: account.balance,
        entries_sum,
        entries,
    })
}

/// Sum of the balances of `accounts`
pub async fn total_balance<B: LedgerBackend>(
    store: &Store<B>,
    accounts: &[AccountId],
) -> Result<i64, LedgerError> {
    let mut total = 0i64;
    for &id in accounts {
        let balance = store.get_account(id).await?.balance;
        total = total
            .checked_add(balance)
            .ok_or(LedgerError::BalanceOverflow(id))?;
    }
    Ok(total)
}
