//! Neobank Ledger - account ledger and transfer engine
//!
//! Keeps balances, entries and payments consistent while many transfers
//! run at once, including transfers between the same two accounts in
//! opposite directions.
//!
//! # Modules
//!
//! - [`ledger`] - Store, balance mutator and transfer coordinator
//! - [`service`] - Request validation, ownership and pagination
//! - [`harness`] - Concurrent transfer runner and conservation audit
//! - [`config`] - YAML configuration
//! - [`logging`] - `tracing` subscriber setup
//! - [`db`] - PostgreSQL connection pool

pub mod config;
pub mod db;
pub mod harness;
pub mod ledger;
pub mod logging;
pub mod service;

// Convenient re-exports at crate root
pub use ledger::{
    Account, Currency, Entry, LedgerBackend, LedgerError, MemoryBackend, Payment, PgBackend,
    RetryPolicy, Store, TransferParams, TransferResult, order_pair,
};
pub use service::{Authenticator, LedgerService, PageRequest, PaymentRequest, Principal};
