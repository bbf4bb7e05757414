//! Application configuration
//!
//! Loaded from `config/<env>.yaml`. `DATABASE_URL` in the environment
//! overrides `store.postgres_url`.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::ledger::RetryPolicy;
use crate::ledger::memory::DEFAULT_LOCK_TIMEOUT;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Currencies accounts may be opened in
    #[serde(default = "default_currencies")]
    pub currencies: Vec<String>,
    #[serde(default)]
    pub harness: HarnessConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: BackendKind,
    /// PostgreSQL connection URL, required for the postgres backend
    #[serde(default)]
    pub postgres_url: Option<String>,
    pub max_connections: u32,
    /// Row-lock wait bound of the in-process backend
    pub lock_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            postgres_url: None,
            max_connections: 20,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// URL for the postgres backend; `DATABASE_URL` is folded in by [`AppConfig::load`]
    pub fn postgres_url(&self) -> Result<&str> {
        self.postgres_url
            .as_deref()
            .context("store.postgres_url (or DATABASE_URL) is required for the postgres backend")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransferConfig {
    /// Deadline per transfer attempt; 0 disables it
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl TransferConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Workload of the demo binary
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HarnessConfig {
    pub accounts: usize,
    pub opening_balance: i64,
    pub transfers_per_direction: usize,
    pub amount: i64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            accounts: 2,
            opening_balance: 1_000,
            transfers_per_direction: 100,
            amount: 10,
        }
    }
}

fn default_currencies() -> Vec<String> {
    ["USD", "EUR", "CAD"].map(String::from).to_vec()
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config = Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config yaml: {}", config_path))?;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.store.postgres_url = Some(url);
        }
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.store.max_connections == 0 {
            bail!("store.max_connections must be at least 1");
        }
        if self.currencies.is_empty() {
            bail!("currencies must not be empty");
        }
        if self.harness.accounts < 2 {
            bail!("harness.accounts must be at least 2");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: ledger.log
use_json: false
rotation: daily
"#;

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.store.backend, BackendKind::Memory);
        assert_eq!(config.store.lock_timeout(), DEFAULT_LOCK_TIMEOUT);
        assert_eq!(config.currencies, vec!["USD", "EUR", "CAD"]);
        assert_eq!(config.transfer.retry, RetryPolicy::default());
        assert_eq!(config.transfer.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_full_config() {
        let yaml = format!(
            "{MINIMAL}{}",
            r#"
store:
  backend: postgres
  postgres_url: postgres://localhost/neobank
  max_connections: 8
  lock_timeout_ms: 250
transfer:
  timeout_ms: 0
  retry:
    max_attempts: 5
    base_delay_ms: 2
    max_delay_ms: 50
currencies: [USD]
harness:
  accounts: 4
  opening_balance: 500
  transfers_per_direction: 10
  amount: 3
"#
        );
        let config = AppConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.store.backend, BackendKind::Postgres);
        assert_eq!(config.store.max_connections, 8);
        assert_eq!(config.store.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.transfer.timeout(), None);
        assert_eq!(config.transfer.retry.max_attempts, 5);
        assert_eq!(config.harness.accounts, 4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let yaml = format!("{MINIMAL}currencies: []\n");
        assert!(AppConfig::from_yaml_str(&yaml).is_err());

        let yaml = format!(
            "{MINIMAL}store:\n  backend: sqlite\n  max_connections: 1\n  lock_timeout_ms: 1\n"
        );
        assert!(AppConfig::from_yaml_str(&yaml).is_err());

        let config = AppConfig::from_yaml_str(MINIMAL).unwrap();
        assert!(config.store.postgres_url().is_err());
    }
}
