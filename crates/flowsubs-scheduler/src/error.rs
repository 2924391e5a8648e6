use flowsubs_core::{FlowSubsError, PaymentEvent, SubscriptionId};
use thiserror::Error;

/// Failures reported by a [`Ledger`](crate::ledger::Ledger) implementation.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger could not be reached at all.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Subscription not found: {id}")]
    NotFound { id: SubscriptionId },

    /// A compare-and-set update found a different `next_payment_time` than expected.
    #[error("Stale update for subscription {id}: expected cycle {expected}")]
    Conflict { id: SubscriptionId, expected: i64 },

    #[error("Ledger backend error: {0}")]
    Backend(String),
}

/// Why a settlement attempt did not move funds.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Transfer rejected: {0}")]
    Rejected(String),

    #[error("Settlement timed out")]
    Timeout,

    /// The cycle was settled before; carries the recorded payment.
    #[error("Cycle already settled by transaction {}", .0.transaction_id)]
    AlreadySettled(Box<PaymentEvent>),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Errors that abort processing of one subscription (or, for a failed
/// snapshot, one whole tick).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Ledger call timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Subscription {id} is not active")]
    NotActive { id: SubscriptionId },

    /// `next_payment_time` is not on the `created_at + k * interval` grid.
    #[error("Subscription {id} is off its payment schedule")]
    ScheduleDrift { id: SubscriptionId },

    #[error("Subscription {id}: next payment time overflows")]
    Overflow { id: SubscriptionId },

    #[error("Invalid scheduler configuration: {0}")]
    Config(#[from] FlowSubsError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
