use flowsubs_core::{Amount, CycleKey, PaymentEvent, Subscription, SubscriptionId};
use serde::{Deserialize, Serialize};

/// Why an attempted settlement did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    InsufficientFunds,
    TransferRejected,
    /// The ledger did not answer in time; the outcome of the transfer is unknown.
    Timeout,
    /// `max_retries` consecutive failures; the subscription has been cancelled.
    RetriesExhausted,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::InsufficientFunds => "insufficient-funds",
            FailureReason::TransferRejected => "transfer-rejected",
            FailureReason::Timeout => "timeout",
            FailureReason::RetriesExhausted => "retries-exhausted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "insufficient-funds" => Ok(FailureReason::InsufficientFunds),
            "transfer-rejected" => Ok(FailureReason::TransferRejected),
            "timeout" => Ok(FailureReason::Timeout),
            "retries-exhausted" => Ok(FailureReason::RetriesExhausted),
            other => Err(format!("unknown failure reason: {other}")),
        }
    }
}

/// Why a due cycle was passed over without a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The provider is deactivated or unknown; the cycle is forfeited.
    ProviderInactive,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ProviderInactive => write!(f, "provider-inactive"),
        }
    }
}

/// Result of executing one due subscription. `subscription` is always the
/// state the ledger should hold afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Settled {
        event: PaymentEvent,
        subscription: Subscription,
        /// The payment was found already recorded rather than made now.
        reconciled: bool,
    },
    Failed {
        reason: FailureReason,
        subscription: Subscription,
    },
    Skipped {
        reason: SkipReason,
        subscription: Subscription,
    },
}

impl PaymentOutcome {
    pub fn subscription(&self) -> &Subscription {
        match self {
            PaymentOutcome::Settled { subscription, .. }
            | PaymentOutcome::Failed { subscription, .. }
            | PaymentOutcome::Skipped { subscription, .. } => subscription,
        }
    }

    pub fn event(&self) -> Option<&PaymentEvent> {
        match self {
            PaymentOutcome::Settled { event, .. } => Some(event),
            _ => None,
        }
    }

    /// `true` when this outcome cancelled the subscription.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentOutcome::Failed {
                reason: FailureReason::RetriesExhausted,
                ..
            }
        )
    }
}

/// One transfer for one billing cycle.
///
/// The ledger must move `amount` from `subscriber` to `provider`, set the
/// subscription's `next_payment_time` to `next_payment_time`, reset its retry
/// count and append the payment record, all atomically, and at most once per
/// `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub key: CycleKey,
    pub subscriber: String,
    pub provider: String,
    pub amount: Amount,
    pub next_payment_time: i64,
    /// Time of the tick issuing the request.
    pub timestamp: i64,
}

impl SettlementRequest {
    /// Build the payment record for a successful settlement.
    pub fn to_event(&self, receipt: &SettlementReceipt) -> PaymentEvent {
        PaymentEvent {
            subscription_id: self.key.subscription_id,
            subscriber: self.subscriber.clone(),
            provider: self.provider.clone(),
            amount: self.amount,
            timestamp: receipt.timestamp,
            transaction_id: receipt.transaction_id.clone(),
            cycle: self.key.cycle,
        }
    }
}

/// What the ledger reports back for a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub transaction_id: String,
    pub timestamp: i64,
}

/// Schedule mutation for transitions that move no funds (skip, failure,
/// cancellation). Applied only if the ledger still holds
/// `expected_next_payment_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub subscription_id: SubscriptionId,
    pub expected_next_payment_time: i64,
    pub next_payment_time: i64,
    pub retry_count: u32,
    pub is_active: bool,
}

impl ScheduleUpdate {
    pub fn between(before: &Subscription, after: &Subscription) -> Self {
        Self {
            subscription_id: before.id,
            expected_next_payment_time: before.next_payment_time,
            next_payment_time: after.next_payment_time,
            retry_count: after.retry_count,
            is_active: after.is_active,
        }
    }
}

/// Per-tick tally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Clock reading the tick ran at.
    pub now: i64,
    pub due: usize,
    pub settled: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Subscriptions cancelled because their retries ran out (also counted in `failed`).
    pub cancelled: usize,
    /// Subscriptions whose processing aborted with an error.
    pub errors: usize,
}

impl TickReport {
    pub fn new(now: i64, due: usize) -> Self {
        Self {
            now,
            due,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &PaymentOutcome) {
        match outcome {
            PaymentOutcome::Settled { .. } => self.settled += 1,
            PaymentOutcome::Failed { .. } => {
                self.failed += 1;
                if outcome.is_terminal() {
                    self.cancelled += 1;
                }
            }
            PaymentOutcome::Skipped { .. } => self.skipped += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_round_trips_through_str() {
        for reason in [
            FailureReason::InsufficientFunds,
            FailureReason::TransferRejected,
            FailureReason::Timeout,
            FailureReason::RetriesExhausted,
        ] {
            assert_eq!(reason.to_string().parse::<FailureReason>(), Ok(reason));
        }
        assert!("nope".parse::<FailureReason>().is_err());
    }

    #[test]
    fn skip_reason_label() {
        assert_eq!(SkipReason::ProviderInactive.to_string(), "provider-inactive");
    }
}
