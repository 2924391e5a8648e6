//! Plain-text rendering for the management subcommands.

use flowsubs_core::{PaymentEvent, Subscription};
use flowsubs_ledger::ProviderStats;

/// Payment times shown per subscription by `list`.
pub const UPCOMING_SHOWN: usize = 3;

pub fn format_time(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

pub fn subscription_line(sub: &Subscription) -> String {
    let state = if sub.is_active { "active" } else { "cancelled" };
    let retries = if sub.retry_count > 0 {
        format!(", {} failed attempts", sub.retry_count)
    } else {
        String::new()
    };
    format!(
        "#{} {} -> {} {} every {}s, {} cycles paid [{state}{retries}]",
        sub.id,
        sub.subscriber,
        sub.provider,
        sub.amount,
        sub.interval_secs,
        sub.cycles_completed(),
    )
}

/// Overdue backlog and the next payment times at `now`. Empty once cancelled.
pub fn schedule_lines(sub: &Subscription, now: i64) -> Vec<String> {
    if !sub.is_active {
        return Vec::new();
    }
    let mut lines = Vec::new();
    let overdue = sub.cycles_due(now);
    if overdue > 0 {
        lines.push(format!(
            "  overdue: {overdue} cycle(s), oldest due {}",
            format_time(sub.next_payment_time)
        ));
    }
    let upcoming: Vec<String> = sub
        .upcoming_payments(UPCOMING_SHOWN)
        .into_iter()
        .map(format_time)
        .collect();
    lines.push(format!("  next: {}", upcoming.join(", ")));
    lines
}

pub fn event_line(event: &PaymentEvent) -> String {
    format!(
        "#{} cycle {} {} -> {} {} tx {}",
        event.subscription_id,
        format_time(event.cycle),
        event.subscriber,
        event.provider,
        event.amount,
        event.transaction_id
    )
}

pub fn stats_lines(provider: &str, stats: &ProviderStats) -> Vec<String> {
    vec![
        format!("provider {provider}"),
        format!(
            "  subscriptions: {} active / {} total",
            stats.active_subscriptions, stats.total_subscriptions
        ),
        format!("  active subscribers: {}", stats.active_subscribers),
        format!("  monthly revenue: {}", stats.monthly_revenue),
        format!(
            "  received: {} over {} payments",
            stats.total_received, stats.payments
        ),
    ]
}
