use async_trait::async_trait;
use flowsubs_core::{CycleKey, PaymentEvent, Provider, Subscription};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{LedgerError, SettlementError};
use crate::types::{ScheduleUpdate, SettlementReceipt, SettlementRequest};

/// The settlement layer the scheduler computes against.
///
/// The ledger owns every subscription record; the scheduler only reads
/// snapshots and asks for mutations. Implementations must be `Send + Sync`
/// so one instance can serve concurrent executions within a tick.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Snapshot of every active subscription.
    async fn active_subscriptions(&self) -> Result<Vec<Subscription>, LedgerError>;

    /// Look up a provider by address. `Ok(None)` when it was never registered.
    async fn provider(&self, address: &str) -> Result<Option<Provider>, LedgerError>;

    /// Move funds for one cycle and advance the schedule, atomically and at
    /// most once per [`SettlementRequest::key`]. A repeated key must answer
    /// [`SettlementError::AlreadySettled`] with the original payment.
    async fn settle(&self, request: &SettlementRequest)
        -> Result<SettlementReceipt, SettlementError>;

    /// Apply a non-settling transition. Must fail with
    /// [`LedgerError::Conflict`] when the stored `next_payment_time` differs
    /// from `update.expected_next_payment_time`.
    async fn commit(&self, update: &ScheduleUpdate) -> Result<(), LedgerError>;

    /// The payment recorded for `key`, if any.
    async fn find_settlement(&self, key: &CycleKey) -> Result<Option<PaymentEvent>, LedgerError>;
}

/// Append-only consumer of settled payments (payment-history feeds,
/// notifications). Called from inside the tick, so it must not block.
pub trait EventSink: Send + Sync {
    fn record_payment(&self, event: &PaymentEvent);
}

impl EventSink for mpsc::Sender<PaymentEvent> {
    fn record_payment(&self, event: &PaymentEvent) {
        // try_send never stalls the tick; a full feed drops the copy, the ledger keeps the record.
        if self.try_send(event.clone()).is_err() {
            warn!(
                subscription_id = %event.subscription_id,
                cycle = event.cycle,
                "payment feed full or closed, event not forwarded"
            );
        }
    }
}
