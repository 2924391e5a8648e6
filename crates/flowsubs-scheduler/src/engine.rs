use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use flowsubs_core::{PaymentEvent, SchedulerConfig, Subscription, SubscriptionId};
use futures_util::{stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    error::{LedgerError, Result, SchedulerError},
    executor::{with_timeout, PaymentExecutor},
    ledger::{EventSink, Ledger},
    schedule::{advance, select_due},
    types::{PaymentOutcome, ScheduleUpdate, TickReport},
};

/// Drives recurring payments: snapshot, select, execute, commit, once per tick.
pub struct SchedulerEngine {
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    executor: PaymentExecutor,
    config: SchedulerConfig,
    /// Highest clock reading seen so far; ticks never run at an earlier time.
    last_now: AtomicI64,
    /// If set, every settled payment is forwarded here.
    sink: Option<Arc<dyn EventSink>>,
    /// If set, every outcome is sent here for notification routing.
    outcome_tx: Option<mpsc::Sender<PaymentOutcome>>,
}

impl SchedulerEngine {
    /// Create an engine over `ledger`. Fails on an unusable `config`.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            executor: PaymentExecutor::new(Arc::clone(&ledger), &config),
            ledger,
            clock,
            config,
            last_now: AtomicI64::new(i64::MIN),
            sink: None,
            outcome_tx: None,
        })
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Receive a copy of every outcome via mpsc. The sender is non-blocking
    /// (`try_send`) so the tick loop is never stalled.
    pub fn with_outcome_channel(mut self, tx: mpsc::Sender<PaymentOutcome>) -> Self {
        self.outcome_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Main loop. Ticks every `tick_secs` until `shutdown` broadcasts `true`.
    ///
    /// The first tick fires immediately; ticks that fall behind are delayed
    /// rather than replayed in a burst.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_secs = self.config.tick_secs, "scheduler engine started");

        let mut interval = tokio::time::interval(self.config.tick());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report.due > 0 => info!(
                            due = report.due,
                            settled = report.settled,
                            failed = report.failed,
                            skipped = report.skipped,
                            cancelled = report.cancelled,
                            errors = report.errors,
                            "scheduler tick complete"
                        ),
                        Ok(_) => debug!("scheduler tick: nothing due"),
                        Err(e) => error!("scheduler tick aborted: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over the ledger.
    ///
    /// Only a failed snapshot aborts the tick; every other error is confined
    /// to the subscription it happened on and counted in
    /// [`TickReport::errors`].
    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.observe_now();
        let snapshot =
            with_timeout(self.config.call_timeout(), self.ledger.active_subscriptions()).await?;
        let due = select_due(&snapshot, now);
        let mut report = TickReport::new(now, due.len());
        if due.is_empty() {
            return Ok(report);
        }
        debug!(now, due = due.len(), "processing due subscriptions");

        // buffered() keeps results in selection order; ids are unique after select_due.
        let results: Vec<(SubscriptionId, Result<PaymentOutcome>)> = stream::iter(due)
            .map(|subscription| async move {
                let id = subscription.id;
                (id, self.process(subscription, now).await)
            })
            .buffered(self.config.max_concurrency)
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(outcome) => {
                    report.record(&outcome);
                    if let Some(ref tx) = self.outcome_tx {
                        if tx.try_send(outcome).is_err() {
                            warn!(subscription_id = %id, "outcome channel full or closed, outcome dropped");
                        }
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    error!(subscription_id = %id, "subscription processing failed: {e}");
                }
            }
        }
        Ok(report)
    }

    fn observe_now(&self) -> i64 {
        let reading = self.clock.now();
        let previous = self.last_now.fetch_max(reading, Ordering::SeqCst);
        reading.max(previous)
    }

    /// Execute one subscription and make the resulting state durable.
    async fn process(&self, subscription: Subscription, now: i64) -> Result<PaymentOutcome> {
        let outcome = self.executor.execute(&subscription, now).await?;

        match &outcome {
            PaymentOutcome::Settled {
                event,
                subscription: after,
                reconciled,
            } => {
                // A fresh settlement already advanced the ledger atomically.
                if *reconciled {
                    match self.commit(&subscription, after).await {
                        Ok(()) | Err(SchedulerError::Ledger(LedgerError::Conflict { .. })) => {}
                        Err(e) => return Err(e),
                    }
                }
                self.announce_settled(&subscription, event, after, *reconciled);
            }
            PaymentOutcome::Failed {
                reason,
                subscription: after,
            } => {
                match self.commit(&subscription, after).await {
                    Ok(()) => {}
                    // The ledger closed this cycle behind our back: a settle
                    // that timed out here may still have been applied.
                    Err(SchedulerError::Ledger(LedgerError::Conflict { .. })) => {
                        return self.recover_settlement(&subscription).await;
                    }
                    Err(e) => return Err(e),
                }
                if outcome.is_terminal() {
                    warn!(
                        subscription_id = %subscription.id,
                        retries = after.retry_count,
                        "retries exhausted, subscription cancelled"
                    );
                } else {
                    warn!(
                        subscription_id = %subscription.id,
                        cycle = subscription.next_payment_time,
                        %reason,
                        retry = after.retry_count,
                        max_retries = self.config.max_retries,
                        "payment failed"
                    );
                }
            }
            PaymentOutcome::Skipped {
                reason,
                subscription: after,
            } => {
                self.commit(&subscription, after).await?;
                warn!(
                    subscription_id = %subscription.id,
                    provider = %subscription.provider,
                    %reason,
                    next_payment_time = after.next_payment_time,
                    "payment skipped"
                );
            }
        }
        Ok(outcome)
    }

    /// Turn a conflicting failure commit into the settlement the ledger
    /// recorded for this cycle. Without one, the conflict stands.
    async fn recover_settlement(&self, subscription: &Subscription) -> Result<PaymentOutcome> {
        let key = subscription.cycle_key();
        let found =
            with_timeout(self.config.call_timeout(), self.ledger.find_settlement(&key)).await?;
        let Some(event) = found else {
            return Err(LedgerError::Conflict {
                id: subscription.id,
                expected: subscription.next_payment_time,
            }
            .into());
        };
        let after = advance(subscription)?;
        self.announce_settled(subscription, &event, &after, true);
        Ok(PaymentOutcome::Settled {
            event,
            subscription: after,
            reconciled: true,
        })
    }

    fn announce_settled(
        &self,
        before: &Subscription,
        event: &PaymentEvent,
        after: &Subscription,
        reconciled: bool,
    ) {
        info!(
            subscription_id = %before.id,
            cycle = event.cycle,
            amount = %event.amount,
            tx = %event.transaction_id,
            next_payment_time = after.next_payment_time,
            reconciled,
            "payment settled"
        );
        if let Some(ref sink) = self.sink {
            sink.record_payment(event);
        }
    }

    async fn commit(&self, before: &Subscription, after: &Subscription) -> Result<()> {
        let update = ScheduleUpdate::between(before, after);
        with_timeout(self.config.call_timeout(), self.ledger.commit(&update)).await
    }
}
