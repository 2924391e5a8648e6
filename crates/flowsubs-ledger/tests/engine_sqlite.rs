use std::sync::Arc;

use flowsubs_core::request::{
    CancelSubscriptionRequest, CreateSubscriptionRequest, RegisterProviderRequest,
};
use flowsubs_core::{SchedulerConfig, Subscription};
use flowsubs_ledger::SqliteLedger;
use flowsubs_scheduler::{ManualClock, SchedulerEngine};
use rust_decimal::Decimal;

const STREAMING: &str = "0x01cf0e2f2f715450";
const STORAGE: &str = "0x179b6b1cb6755e31";
const ALICE: &str = "0x01cf0e2f2f715451";
const BOB: &str = "0x179b6b1cb6755e32";

const T0: i64 = 1_700_000_000;
const MONTH: u64 = 2_592_000;

struct Harness {
    ledger: Arc<SqliteLedger>,
    clock: Arc<ManualClock>,
    engine: SchedulerEngine,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(T0));
    let ledger = Arc::new(SqliteLedger::open_in_memory(clock.clone(), 60).unwrap());
    for (address, name) in [(STREAMING, "Streaming"), (STORAGE, "Storage")] {
        ledger
            .register_provider(RegisterProviderRequest {
                address: address.into(),
                name: name.into(),
                description: String::new(),
            })
            .unwrap();
    }
    let engine = SchedulerEngine::new(
        ledger.clone(),
        clock.clone(),
        SchedulerConfig {
            call_timeout_secs: 5,
            ..SchedulerConfig::default()
        },
    )
    .unwrap();
    Harness {
        ledger,
        clock,
        engine,
    }
}

fn subscribe(ledger: &SqliteLedger, subscriber: &str, provider: &str, amount: &str) -> Subscription {
    ledger
        .create_subscription(CreateSubscriptionRequest {
            subscriber: subscriber.into(),
            provider: provider.into(),
            amount: amount.parse().unwrap(),
            interval_secs: MONTH,
        })
        .unwrap()
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

#[tokio::test]
async fn monthly_charge_settles_through_sqlite() {
    let h = harness();
    let sub = subscribe(&h.ledger, ALICE, STREAMING, "9.99");
    h.ledger.deposit(ALICE, "100".parse().unwrap()).unwrap();

    let early = h.engine.tick().await.unwrap();
    assert_eq!(early.due, 0);

    h.clock.set(sub.next_payment_time);
    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(report.errors, 0);

    assert_eq!(h.ledger.balance(ALICE).unwrap(), dec("90.01"));
    assert_eq!(h.ledger.balance(STREAMING).unwrap(), dec("9.99"));
    let stored = h.ledger.get_subscription(sub.id).unwrap().unwrap();
    assert_eq!(stored.next_payment_time, T0 + 2 * MONTH as i64);

    // Same instant again: nothing left to charge.
    let again = h.engine.tick().await.unwrap();
    assert_eq!(again.due, 0);
    assert_eq!(h.ledger.payment_history(sub.id).unwrap().len(), 1);
}

#[tokio::test]
async fn underfunded_subscriber_is_cancelled_after_three_ticks() {
    let h = harness();
    let sub = subscribe(&h.ledger, BOB, STORAGE, "4.5");
    h.ledger.deposit(BOB, "1".parse().unwrap()).unwrap();
    h.clock.set(sub.next_payment_time);

    for attempt in 1..=3u32 {
        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.failed, 1, "attempt {attempt}");
        let stored = h.ledger.get_subscription(sub.id).unwrap().unwrap();
        assert_eq!(stored.next_payment_time, sub.next_payment_time);
        assert_eq!(stored.retry_count, attempt);
    }
    let stored = h.ledger.get_subscription(sub.id).unwrap().unwrap();
    assert!(!stored.is_active);
    assert_eq!(h.ledger.balance(BOB).unwrap(), dec("1"));
    assert_eq!(h.engine.tick().await.unwrap().due, 0);
}

#[tokio::test]
async fn deactivated_provider_cycle_is_skipped_without_charge() {
    let h = harness();
    let sub = subscribe(&h.ledger, ALICE, STORAGE, "2");
    h.ledger.deposit(ALICE, "10".parse().unwrap()).unwrap();
    h.ledger.deactivate_provider(STORAGE).unwrap();

    h.clock.set(sub.next_payment_time);
    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(h.ledger.balance(ALICE).unwrap(), dec("10"));
    let stored = h.ledger.get_subscription(sub.id).unwrap().unwrap();
    assert_eq!(
        stored.next_payment_time,
        sub.next_payment_time + MONTH as i64
    );
    assert!(stored.is_active);

    h.ledger.reactivate_provider(STORAGE).unwrap();
    h.clock.set(stored.next_payment_time);
    assert_eq!(h.engine.tick().await.unwrap().settled, 1);
    assert_eq!(h.ledger.balance(ALICE).unwrap(), dec("8"));
}

#[tokio::test]
async fn two_subscribers_catch_up_one_cycle_per_tick() {
    let h = harness();
    let alice = subscribe(&h.ledger, ALICE, STREAMING, "10");
    let bob = subscribe(&h.ledger, BOB, STORAGE, "1");
    h.ledger.deposit(ALICE, "100".parse().unwrap()).unwrap();
    h.ledger.deposit(BOB, "100".parse().unwrap()).unwrap();
    h.ledger
        .cancel_subscription(CancelSubscriptionRequest {
            subscription_id: bob.id,
            subscriber: BOB.into(),
        })
        .unwrap();

    // Three cycles overdue.
    h.clock.set(alice.next_payment_time + 2 * MONTH as i64);
    for _ in 0..3 {
        assert_eq!(h.engine.tick().await.unwrap().settled, 1);
    }
    assert_eq!(h.engine.tick().await.unwrap().due, 0);

    let history = h.ledger.payment_history(alice.id).unwrap();
    let cycles: Vec<i64> = history.iter().map(|e| e.cycle).collect();
    assert_eq!(
        cycles,
        vec![
            alice.next_payment_time,
            alice.next_payment_time + MONTH as i64,
            alice.next_payment_time + 2 * MONTH as i64,
        ]
    );
    assert_eq!(h.ledger.balance(ALICE).unwrap(), dec("70"));
    assert_eq!(h.ledger.balance(BOB).unwrap(), dec("100"));
    assert!(h.ledger.payments_for_account(BOB, 10).unwrap().is_empty());
}
