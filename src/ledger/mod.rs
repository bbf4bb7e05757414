//! Ledger Core
//!
//! Accounts, entries and payments, plus the transfer engine that moves
//! money between two accounts atomically.
//!
//! # Layers
//!
//! ```text
//! Store::transfer ──▶ exec_tx ──▶ payment_tx
//!                                   ├─ create_payment
//!                                   ├─ create_entry × 2
//!                                   └─ add_balance × 2 (ascending account id)
//! ```
//!
//! # Guarantees
//!
//! 1. **Atomicity**: a transfer either commits all five rows or none
//! 2. **Conservation**: every payment writes `-amount` and `+amount`
//! 3. **Deadlock freedom**: rows are always locked in ascending id order
//! 4. **No lost updates**: a balance row stays locked until commit

pub mod balance;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod store;
pub mod transfer;
pub mod types;
pub mod validation;


// Re-exports for convenience
pub use balance::add_balance;
pub use error::LedgerError;
pub use memory::{MemoryBackend, MemoryTx};
pub use postgres::{PgBackend, PgTx};
pub use retry::{RetryPolicy, transfer_with_retry};
pub use store::{LedgerBackend, Queries, Store, UnitOfWork};
pub use transfer::order_pair;
pub use types::{
    Account, AccountId, CreateAccountParams, Entry, EntryId, ListAccountsParams,
    ListEntriesParams, ListPaymentsParams, Page, Payment, PaymentId, TransferParams,
    TransferResult,
};
pub use validation::{Currency, ValidationError};
