use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use flowsubs_core::{SchedulerConfig, Subscription};
use tracing::{debug, warn};

use crate::{
    error::{LedgerError, Result, SchedulerError, SettlementError},
    ledger::Ledger,
    schedule::{advance, record_failure},
    types::{FailureReason, PaymentOutcome, SettlementRequest, SkipReason},
};

/// Settles one billing cycle of one due subscription.
///
/// The executor trusts the caller on due-ness and never reads the clock:
/// `now` is only stamped on the settlement request. Each invocation closes
/// at most one cycle, so a subscription that fell several cycles behind is
/// caught up one charge per pass rather than billed a lump sum.
pub struct PaymentExecutor {
    ledger: Arc<dyn Ledger>,
    max_retries: u32,
    call_timeout: Duration,
}

impl PaymentExecutor {
    pub fn new(ledger: Arc<dyn Ledger>, config: &SchedulerConfig) -> Self {
        Self {
            ledger,
            max_retries: config.max_retries,
            call_timeout: config.call_timeout(),
        }
    }

    pub async fn execute(&self, subscription: &Subscription, now: i64) -> Result<PaymentOutcome> {
        if !subscription.is_active {
            return Err(SchedulerError::NotActive {
                id: subscription.id,
            });
        }
        if !subscription.is_on_schedule() {
            return Err(SchedulerError::ScheduleDrift {
                id: subscription.id,
            });
        }
        let closed = advance(subscription)?;
        let key = subscription.cycle_key();

        // A previous attempt may have timed out after the ledger applied it.
        if subscription.retry_count > 0 {
            let found = match with_timeout(self.call_timeout, self.ledger.find_settlement(&key))
                .await
            {
                Ok(found) => found,
                Err(SchedulerError::Timeout { .. }) => {
                    return Ok(self.failed(subscription, FailureReason::Timeout))
                }
                Err(e) => return Err(e),
            };
            if let Some(event) = found {
                debug!(subscription_id = %subscription.id, cycle = key.cycle, "cycle already settled");
                return Ok(PaymentOutcome::Settled {
                    event,
                    subscription: closed,
                    reconciled: true,
                });
            }
        }

        let provider =
            match with_timeout(self.call_timeout, self.ledger.provider(&subscription.provider))
                .await
            {
                Ok(provider) => provider,
                Err(SchedulerError::Timeout { .. }) => {
                    return Ok(self.failed(subscription, FailureReason::Timeout))
                }
                Err(e) => return Err(e),
            };
        if !provider.is_some_and(|p| p.is_active) {
            return Ok(PaymentOutcome::Skipped {
                reason: SkipReason::ProviderInactive,
                subscription: closed,
            });
        }

        let request = SettlementRequest {
            key,
            subscriber: subscription.subscriber.clone(),
            provider: subscription.provider.clone(),
            amount: subscription.amount,
            next_payment_time: closed.next_payment_time,
            timestamp: now,
        };
        let settled = tokio::time::timeout(self.call_timeout, self.ledger.settle(&request)).await;

        let reason = match settled {
            Ok(Ok(receipt)) => {
                return Ok(PaymentOutcome::Settled {
                    event: request.to_event(&receipt),
                    subscription: closed,
                    reconciled: false,
                });
            }
            Ok(Err(SettlementError::AlreadySettled(event))) => {
                return Ok(PaymentOutcome::Settled {
                    event: *event,
                    subscription: closed,
                    reconciled: true,
                });
            }
            Ok(Err(SettlementError::Ledger(e))) => return Err(e.into()),
            Ok(Err(SettlementError::InsufficientFunds)) => FailureReason::InsufficientFunds,
            Ok(Err(SettlementError::Rejected(why))) => {
                warn!(subscription_id = %subscription.id, reason = %why, "transfer rejected");
                FailureReason::TransferRejected
            }
            Ok(Err(SettlementError::Timeout)) | Err(_) => FailureReason::Timeout,
        };

        Ok(self.failed(subscription, reason))
    }

    /// A failed attempt on the current cycle; the last allowed one cancels.
    fn failed(&self, subscription: &Subscription, reason: FailureReason) -> PaymentOutcome {
        let (subscription, exhausted) = record_failure(subscription, self.max_retries);
        PaymentOutcome::Failed {
            reason: if exhausted {
                FailureReason::RetriesExhausted
            } else {
                reason
            },
            subscription,
        }
    }
}

/// Bound a ledger call by `limit`; an elapsed timer becomes [`SchedulerError::Timeout`].
pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, LedgerError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(SchedulerError::from),
        Err(_) => Err(timed_out(limit)),
    }
}

fn timed_out(limit: Duration) -> SchedulerError {
    SchedulerError::Timeout {
        ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
    }
}
