//! Bounded retry for aborted transfers
//!
//! Lives outside the coordinator: a transfer that failed left nothing
//! behind, so re-submitting it is safe. Only
//! [`LedgerError::TransactionAborted`] is retried.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::LedgerError;
use super::store::{LedgerBackend, Store};
use super::types::{TransferParams, TransferResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Exponential backoff before attempt `attempt + 1` (attempt starts at 1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Run `transfer`, re-submitting it while the store aborts it.
pub async fn transfer_with_retry<B: LedgerBackend>(
    store: &Store<B>,
    params: TransferParams,
    policy: &RetryPolicy,
    deadline: Option<Duration>,
) -> Result<TransferResult, LedgerError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match deadline {
            Some(deadline) => store.transfer_within(params, deadline).await,
            None => store.transfer(params).await,
        };
        match result {
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    from = params.from_account_id,
                    to = params.to_account_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transfer aborted, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
