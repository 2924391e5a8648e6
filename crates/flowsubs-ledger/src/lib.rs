//! `flowsubs-ledger`: SQLite-backed local ledger.
//!
//! Holds accounts, providers, subscriptions and the payment log in one
//! database and implements [`flowsubs_scheduler::Ledger`], so the scheduler
//! can run end to end without a chain node. Settlement, schedule advance and
//! the payment record are written in a single transaction.

pub mod db;
pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{ProviderStats, SqliteLedger};
