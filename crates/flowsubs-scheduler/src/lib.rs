//! `flowsubs-scheduler`: recurring-payment scheduling on top of an external ledger.
//!
//! # Overview
//!
//! Every tick the [`engine::SchedulerEngine`] snapshots the ledger's active
//! subscriptions, selects the ones whose `next_payment_time` has arrived
//! ([`schedule::select_due`]) and hands each to the
//! [`executor::PaymentExecutor`], which settles exactly one billing cycle and
//! moves the schedule forward by exactly one interval.
//!
//! # Outcomes
//!
//! | Outcome   | Schedule                 | Retry count      |
//! |-----------|--------------------------|------------------|
//! | `Settled` | advances one interval    | reset to 0       |
//! | `Skipped` | advances one interval    | reset to 0       |
//! | `Failed`  | unchanged (retried next) | incremented; at `max_retries` the subscription is cancelled |
//!
//! The ledger, the clock and the payment-history sink are traits
//! ([`ledger::Ledger`], [`clock::Clock`], [`ledger::EventSink`]) so the same
//! engine runs against a chain client, the SQLite local ledger or a test double.

pub mod clock;
pub mod engine;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod schedule;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::SchedulerEngine;
pub use error::{LedgerError, Result, SchedulerError, SettlementError};
pub use executor::PaymentExecutor;
pub use ledger::{EventSink, Ledger};
pub use schedule::select_due;
pub use types::{
    FailureReason, PaymentOutcome, ScheduleUpdate, SettlementReceipt, SettlementRequest,
    SkipReason, TickReport,
};
