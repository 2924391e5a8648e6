//! In-memory ledger used to drive the engine in tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flowsubs_core::{Amount, CycleKey, PaymentEvent, Provider, Subscription, SubscriptionId};
use flowsubs_scheduler::{
    LedgerError, ScheduleUpdate, SettlementError, SettlementReceipt, SettlementRequest,
};
use rust_decimal::Decimal;

pub const STREAMING: &str = "0x01cf0e2f2f715450";
pub const STORAGE: &str = "0x179b6b1cb6755e31";
pub const ALICE: &str = "0x01cf0e2f2f715451";
pub const BOB: &str = "0x179b6b1cb6755e32";
pub const CAROL: &str = "0x7e60df042a9c0869";

pub const MONTH: u64 = 2_592_000;

#[derive(Default)]
struct State {
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    providers: HashMap<String, Provider>,
    balances: HashMap<String, Decimal>,
    events: Vec<PaymentEvent>,
    settle_calls: usize,
    unreachable: bool,
    rejecting: HashSet<SubscriptionId>,
    moved_elsewhere: HashSet<SubscriptionId>,
}

/// Behaves like the settlement layer: settle moves funds, advances the
/// schedule and appends the payment in one step, once per cycle key.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
    /// Applied settlements still take this long to be acknowledged.
    settle_delay: Mutex<Option<Duration>>,
    /// Provider lookups hang this long before answering.
    provider_delay: Mutex<Option<Duration>>,
}

impl MemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_provider(&self, address: &str, active: bool) {
        self.state.lock().unwrap().providers.insert(
            address.to_string(),
            Provider {
                address: address.to_string(),
                name: format!("provider {address}"),
                description: String::new(),
                is_active: active,
            },
        );
    }

    pub fn set_provider_active(&self, address: &str, active: bool) {
        if let Some(p) = self.state.lock().unwrap().providers.get_mut(address) {
            p.is_active = active;
        }
    }

    pub fn deposit(&self, address: &str, amount: &str) {
        let amount: Decimal = amount.parse().unwrap();
        *self
            .state
            .lock()
            .unwrap()
            .balances
            .entry(address.to_string())
            .or_default() += amount;
    }

    pub fn balance(&self, address: &str) -> Decimal {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    /// Insert a subscription created at `created_at`, first due one interval later.
    pub fn subscribe(
        &self,
        id: u64,
        subscriber: &str,
        provider: &str,
        amount: &str,
        interval_secs: u64,
        created_at: i64,
    ) -> Subscription {
        let subscription = Subscription {
            id: SubscriptionId(id),
            subscriber: subscriber.to_string(),
            provider: provider.to_string(),
            amount: amount.parse::<Amount>().unwrap(),
            interval_secs,
            next_payment_time: Subscription::first_payment_time(created_at, interval_secs)
                .unwrap(),
            is_active: true,
            created_at,
            retry_count: 0,
        };
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(subscription.id, subscription.clone());
        subscription
    }

    pub fn put(&self, subscription: Subscription) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(subscription.id, subscription);
    }

    pub fn cancel(&self, id: u64) {
        if let Some(s) = self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .get_mut(&SubscriptionId(id))
        {
            s.is_active = false;
        }
    }

    pub fn get(&self, id: u64) -> Subscription {
        self.state.lock().unwrap().subscriptions[&SubscriptionId(id)].clone()
    }

    pub fn events(&self) -> Vec<PaymentEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn events_for(&self, id: u64) -> Vec<PaymentEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.subscription_id == SubscriptionId(id))
            .collect()
    }

    pub fn settle_calls(&self) -> usize {
        self.state.lock().unwrap().settle_calls
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn reject_transfers_for(&self, id: u64) {
        self.state.lock().unwrap().rejecting.insert(SubscriptionId(id));
    }

    pub fn set_settle_delay(&self, delay: Option<Duration>) {
        *self.settle_delay.lock().unwrap() = delay;
    }

    pub fn set_provider_delay(&self, delay: Option<Duration>) {
        *self.provider_delay.lock().unwrap() = delay;
    }

    /// On the next settle of `id`, advance its schedule one interval without
    /// a payment (as a concurrent writer would) and refuse the transfer.
    pub fn advance_on_next_settle(&self, id: u64) {
        self.state
            .lock()
            .unwrap()
            .moved_elsewhere
            .insert(SubscriptionId(id));
    }

    /// Record a payment for `key` without touching the schedule, as a ledger
    /// whose settlement landed but whose schedule update did not.
    pub fn record_orphan_payment(&self, key: CycleKey, subscription: &Subscription) {
        self.state.lock().unwrap().events.push(PaymentEvent {
            subscription_id: key.subscription_id,
            subscriber: subscription.subscriber.clone(),
            provider: subscription.provider.clone(),
            amount: subscription.amount,
            timestamp: key.cycle,
            transaction_id: format!("0xorphan{}", key.cycle),
            cycle: key.cycle,
        });
    }

    fn apply_settlement(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        let mut state = self.state.lock().unwrap();
        state.settle_calls += 1;
        if state.unreachable {
            return Err(LedgerError::Unavailable("node offline".into()).into());
        }
        if state.moved_elsewhere.remove(&request.key.subscription_id) {
            if let Some(sub) = state.subscriptions.get_mut(&request.key.subscription_id) {
                sub.next_payment_time += sub.interval_secs as i64;
            }
            return Err(SettlementError::InsufficientFunds);
        }
        if let Some(existing) = state
            .events
            .iter()
            .find(|e| e.cycle_key() == request.key)
            .cloned()
        {
            return Err(SettlementError::AlreadySettled(Box::new(existing)));
        }
        if state.rejecting.contains(&request.key.subscription_id) {
            return Err(SettlementError::Rejected("vault locked".into()));
        }
        let id = request.key.subscription_id;
        let current = state
            .subscriptions
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound { id })?;
        if !current.is_active || current.next_payment_time != request.key.cycle {
            return Err(SettlementError::Rejected("stale cycle".into()));
        }
        let amount = request.amount.as_decimal();
        let funds = state
            .balances
            .get(&request.subscriber)
            .copied()
            .unwrap_or_default();
        if funds < amount {
            return Err(SettlementError::InsufficientFunds);
        }
        *state.balances.get_mut(&request.subscriber).unwrap() -= amount;
        *state
            .balances
            .entry(request.provider.clone())
            .or_default() += amount;

        let sub = state.subscriptions.get_mut(&id).unwrap();
        sub.next_payment_time = request.next_payment_time;
        sub.retry_count = 0;

        let receipt = SettlementReceipt {
            transaction_id: format!("0x{:x}{:x}", id.get(), request.key.cycle),
            timestamp: request.timestamp,
        };
        state.events.push(request.to_event(&receipt));
        Ok(receipt)
    }
}

#[async_trait]
impl flowsubs_scheduler::Ledger for MemoryLedger {
    async fn active_subscriptions(&self) -> Result<Vec<Subscription>, LedgerError> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(LedgerError::Unavailable("node offline".into()));
        }
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }

    async fn provider(&self, address: &str) -> Result<Option<Provider>, LedgerError> {
        let delay = *self.provider_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state.lock().unwrap().providers.get(address).cloned())
    }

    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        let receipt = self.apply_settlement(request)?;
        let delay = *self.settle_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(receipt)
    }

    async fn commit(&self, update: &ScheduleUpdate) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        let id = update.subscription_id;
        let sub = state
            .subscriptions
            .get_mut(&id)
            .ok_or(LedgerError::NotFound { id })?;
        if sub.next_payment_time != update.expected_next_payment_time {
            return Err(LedgerError::Conflict {
                id,
                expected: update.expected_next_payment_time,
            });
        }
        sub.next_payment_time = update.next_payment_time;
        sub.retry_count = update.retry_count;
        sub.is_active = sub.is_active && update.is_active;
        Ok(())
    }

    async fn find_settlement(&self, key: &CycleKey) -> Result<Option<PaymentEvent>, LedgerError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .iter()
            .find(|e| e.cycle_key() == *key)
            .cloned())
    }
}
