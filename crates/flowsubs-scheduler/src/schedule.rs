use std::collections::HashSet;

use flowsubs_core::Subscription;

use crate::error::{Result, SchedulerError};

/// Active subscriptions whose `next_payment_time` is at or before `now`.
///
/// Sorted by `next_payment_time`, then `id`, so a given snapshot is always
/// processed in the same order. A subscription id appears at most once even
/// if the snapshot repeats it.
pub fn select_due(snapshot: &[Subscription], now: i64) -> Vec<Subscription> {
    let mut due: Vec<Subscription> = snapshot.iter().filter(|s| s.is_due(now)).cloned().collect();
    due.sort_by_key(|s| (s.next_payment_time, s.id));
    let mut seen = HashSet::with_capacity(due.len());
    due.retain(|s| seen.insert(s.id));
    due
}

/// State after the current cycle is closed (settled or skipped): exactly one
/// interval later, retry count cleared.
pub fn advance(subscription: &Subscription) -> Result<Subscription> {
    let next = subscription
        .following_payment_time()
        .ok_or(SchedulerError::Overflow {
            id: subscription.id,
        })?;
    Ok(Subscription {
        next_payment_time: next,
        retry_count: 0,
        ..subscription.clone()
    })
}

/// State after a failed attempt. Returns the new state and whether the
/// failure budget is now spent, in which case the subscription is cancelled.
pub fn record_failure(subscription: &Subscription, max_retries: u32) -> (Subscription, bool) {
    let retry_count = subscription.retry_count.saturating_add(1);
    let exhausted = retry_count >= max_retries;
    let updated = Subscription {
        retry_count,
        is_active: subscription.is_active && !exhausted,
        ..subscription.clone()
    };
    (updated, exhausted)
}
