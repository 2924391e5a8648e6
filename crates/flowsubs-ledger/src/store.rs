use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use flowsubs_core::{
    address::normalize_address,
    types::AMOUNT_SCALE,
    request::{CancelSubscriptionRequest, CreateSubscriptionRequest, RegisterProviderRequest},
    Amount, CycleKey, FlowSubsError, PaymentEvent, Provider, Subscription, SubscriptionId,
};
use flowsubs_scheduler::{
    Clock, Ledger, LedgerError, ScheduleUpdate, SettlementError, SettlementReceipt,
    SettlementRequest,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::db::init_db;
use crate::error::{Result, StoreError};

const SUBSCRIPTION_COLUMNS: &str = "id, subscriber, provider, amount, interval_secs,
     next_payment_time, is_active, created_at, retry_count";

const EVENT_COLUMNS: &str =
    "subscription_id, subscriber, provider, amount, timestamp, transaction_id, cycle";

/// Seconds in the 30-day month used for revenue projections.
pub const MONTH_SECS: u64 = 30 * 24 * 60 * 60;

/// Revenue overview for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStats {
    /// Subscriptions ever opened to this provider, cancelled ones included.
    pub total_subscriptions: usize,
    pub active_subscriptions: usize,
    /// Distinct accounts with at least one active subscription.
    pub active_subscribers: usize,
    /// Active subscriptions normalized to a 30-day month.
    pub monthly_revenue: Decimal,
    /// Sum of every settled payment.
    pub total_received: Decimal,
    pub payments: usize,
}

/// Local ledger over a single SQLite connection.
///
/// Every balance change happens inside `settle`, in the same transaction
/// that advances the schedule and appends the payment event. The unique
/// `(subscription_id, cycle)` index makes a second settlement of the same
/// cycle impossible even if two callers race.
pub struct SqliteLedger {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    min_interval_secs: u64,
}

impl SqliteLedger {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection, clock: Arc<dyn Clock>, min_interval_secs: u64) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            clock,
            min_interval_secs,
        })
    }

    /// Fresh in-memory ledger, mostly for tests and dry runs.
    pub fn open_in_memory(clock: Arc<dyn Clock>, min_interval_secs: u64) -> Result<Self> {
        Self::new(Connection::open_in_memory()?, clock, min_interval_secs)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    // ---- providers -------------------------------------------------------

    #[instrument(skip(self, request), fields(address = %request.address))]
    pub fn register_provider(&self, request: RegisterProviderRequest) -> Result<Provider> {
        let request = request.validate()?;
        let now = self.clock.now();
        let db = self.conn()?;
        let inserted = db.execute(
            "INSERT OR IGNORE INTO providers (address, name, description, is_active, registered_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![request.address, request.name, request.description, now],
        )?;
        if inserted == 0 {
            return Err(StoreError::ProviderExists {
                address: request.address,
            });
        }
        info!("provider registered");
        Ok(Provider {
            address: request.address,
            name: request.name,
            description: request.description,
            is_active: true,
        })
    }

    /// Mark a provider inactive. Its subscriptions stay active but their
    /// cycles are skipped until the provider is reactivated.
    #[instrument(skip(self))]
    pub fn deactivate_provider(&self, address: &str) -> Result<()> {
        self.set_provider_active(address, false)
    }

    #[instrument(skip(self))]
    pub fn reactivate_provider(&self, address: &str) -> Result<()> {
        self.set_provider_active(address, true)
    }

    fn set_provider_active(&self, address: &str, active: bool) -> Result<()> {
        let address = normalize_address(address)?;
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE providers SET is_active = ?1 WHERE address = ?2",
            params![active, address],
        )?;
        if changed == 0 {
            return Err(StoreError::ProviderNotFound { address });
        }
        Ok(())
    }

    pub fn get_provider(&self, address: &str) -> Result<Option<Provider>> {
        let address = normalize_address(address)?;
        let db = self.conn()?;
        Ok(db
            .query_row(
                "SELECT address, name, description, is_active FROM providers WHERE address = ?1",
                params![address],
                row_to_provider,
            )
            .optional()?)
    }

    pub fn list_providers(&self) -> Result<Vec<Provider>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT address, name, description, is_active FROM providers ORDER BY address",
        )?;
        let rows = stmt.query_map([], row_to_provider)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // ---- accounts --------------------------------------------------------

    /// Credit `amount` to `address`, opening the account if needed.
    /// Returns the new balance.
    #[instrument(skip(self), fields(amount = %amount))]
    pub fn deposit(&self, address: &str, amount: Amount) -> Result<Decimal> {
        let address = normalize_address(address)?;
        let now = self.clock.now();
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let balance = read_balance(&tx, &address)? + amount.as_decimal();
        write_balance(&tx, &address, balance, now)?;
        tx.commit()?;
        debug!(%balance, "deposit applied");
        Ok(balance)
    }

    /// Current balance; unknown accounts hold zero.
    pub fn balance(&self, address: &str) -> Result<Decimal> {
        let address = normalize_address(address)?;
        let db = self.conn()?;
        read_balance(&db, &address)
    }

    // ---- subscriptions ---------------------------------------------------

    /// Open a subscription. The first payment falls due one interval after
    /// creation; nothing is charged up front.
    #[instrument(skip(self, request), fields(subscriber = %request.subscriber, provider = %request.provider))]
    pub fn create_subscription(&self, request: CreateSubscriptionRequest) -> Result<Subscription> {
        let request = request.validate(self.min_interval_secs)?;
        let created_at = self.clock.now();
        let next_payment_time = Subscription::first_payment_time(created_at, request.interval_secs)
            .ok_or_else(|| FlowSubsError::Validation {
                field: "interval_secs",
                reason: "first payment time overflows".to_string(),
            })?;

        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let provider = tx
            .query_row(
                "SELECT address, name, description, is_active FROM providers WHERE address = ?1",
                params![request.provider],
                row_to_provider,
            )
            .optional()?;
        match provider {
            None => {
                return Err(StoreError::ProviderNotFound {
                    address: request.provider,
                })
            }
            Some(p) if !p.is_active => {
                return Err(StoreError::ProviderInactive {
                    address: request.provider,
                })
            }
            Some(_) => {}
        }

        tx.execute(
            "INSERT INTO subscriptions
             (subscriber, provider, amount, interval_secs, next_payment_time, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                request.subscriber,
                request.provider,
                request.amount.to_string(),
                request.interval_secs as i64,
                next_payment_time,
                created_at,
            ],
        )?;
        let id = SubscriptionId(tx.last_insert_rowid() as u64);
        tx.commit()?;

        info!(subscription_id = %id, next_payment_time, "subscription created");
        Ok(Subscription {
            id,
            subscriber: request.subscriber,
            provider: request.provider,
            amount: request.amount,
            interval_secs: request.interval_secs,
            next_payment_time,
            is_active: true,
            created_at,
            retry_count: 0,
        })
    }

    /// Cancel on behalf of the subscriber. Cancellation is terminal.
    #[instrument(skip(self, request), fields(subscription_id = %request.subscription_id))]
    pub fn cancel_subscription(&self, request: CancelSubscriptionRequest) -> Result<Subscription> {
        let request = request.validate()?;
        let id = request.subscription_id;
        let now = self.clock.now();
        let db = self.conn()?;
        let mut subscription =
            load_subscription(&db, id)?.ok_or(StoreError::SubscriptionNotFound { id })?;
        if subscription.subscriber != request.subscriber {
            return Err(StoreError::NotSubscriber {
                id,
                subscriber: request.subscriber,
            });
        }
        if !subscription.is_active {
            return Err(StoreError::AlreadyCancelled { id });
        }
        db.execute(
            "UPDATE subscriptions SET is_active = 0, cancelled_at = ?1 WHERE id = ?2",
            params![now, id.get() as i64],
        )?;
        subscription.is_active = false;
        info!("subscription cancelled");
        Ok(subscription)
    }

    pub fn get_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let db = self.conn()?;
        load_subscription(&db, id)
    }

    /// All subscriptions paid by `subscriber`, oldest first.
    pub fn list_subscriptions_for(&self, subscriber: &str) -> Result<Vec<Subscription>> {
        self.list_subscriptions_where("subscriber", subscriber)
    }

    /// All subscriptions paying `provider`, oldest first.
    pub fn list_subscriptions_for_provider(&self, provider: &str) -> Result<Vec<Subscription>> {
        self.list_subscriptions_where("provider", provider)
    }

    fn list_subscriptions_where(&self, column: &str, address: &str) -> Result<Vec<Subscription>> {
        let address = normalize_address(address)?;
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE {column} = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![address], row_to_subscription)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // ---- payments --------------------------------------------------------

    /// Payments of one subscription, in cycle order.
    pub fn payment_history(&self, id: SubscriptionId) -> Result<Vec<PaymentEvent>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM payment_events WHERE subscription_id = ?1 ORDER BY cycle"
        ))?;
        let rows = stmt.query_map(params![id.get() as i64], row_to_event)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Payments sent or received by `address`, most recent first.
    pub fn payments_for_account(&self, address: &str, limit: usize) -> Result<Vec<PaymentEvent>> {
        let address = normalize_address(address)?;
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM payment_events
             WHERE subscriber = ?1 OR provider = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![address, limit as i64], row_to_event)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Subscriber count and revenue for `provider`, from its subscriptions
    /// and the payment log.
    pub fn provider_stats(&self, provider: &str) -> Result<ProviderStats> {
        let subscriptions = self.list_subscriptions_for_provider(provider)?;
        let active: Vec<&Subscription> = subscriptions.iter().filter(|s| s.is_active).collect();
        let subscribers: HashSet<&str> = active.iter().map(|s| s.subscriber.as_str()).collect();
        let monthly_revenue = active
            .iter()
            .map(|s| monthly_equivalent(s.amount, s.interval_secs))
            .sum::<Decimal>()
            .round_dp(AMOUNT_SCALE);

        let address = normalize_address(provider)?;
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT amount FROM payment_events WHERE provider = ?1")?;
        let amounts = stmt
            .query_map(params![address], |row| parse_amount(row, 0))?
            .collect::<rusqlite::Result<Vec<Amount>>>()?;

        Ok(ProviderStats {
            total_subscriptions: subscriptions.len(),
            active_subscriptions: active.len(),
            active_subscribers: subscribers.len(),
            monthly_revenue,
            total_received: amounts.iter().map(Amount::as_decimal).sum(),
            payments: amounts.len(),
        })
    }

    // ---- settlement ------------------------------------------------------

    /// Outer error: the database failed. Inner error: the settlement was
    /// refused and nothing was written.
    fn settle_cycle(
        &self,
        request: &SettlementRequest,
    ) -> Result<std::result::Result<SettlementReceipt, SettlementError>> {
        let key = request.key;
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        if let Some(existing) = find_event(&tx, &key)? {
            return Ok(Err(SettlementError::AlreadySettled(Box::new(existing))));
        }
        let Some(subscription) = load_subscription(&tx, key.subscription_id)? else {
            return Err(StoreError::SubscriptionNotFound {
                id: key.subscription_id,
            });
        };
        if !subscription.is_active {
            return Ok(Err(SettlementError::Rejected(
                "subscription is cancelled".into(),
            )));
        }
        if subscription.next_payment_time != key.cycle {
            return Ok(Err(SettlementError::Rejected(format!(
                "cycle {} is not current (next payment at {})",
                key.cycle, subscription.next_payment_time
            ))));
        }
        let provider_active: Option<bool> = tx
            .query_row(
                "SELECT is_active FROM providers WHERE address = ?1",
                params![request.provider],
                |row| row.get(0),
            )
            .optional()?;
        if provider_active != Some(true) {
            return Ok(Err(SettlementError::Rejected("provider is inactive".into())));
        }

        let amount = request.amount.as_decimal();
        let funds = read_balance(&tx, &request.subscriber)?;
        if funds < amount {
            return Ok(Err(SettlementError::InsufficientFunds));
        }
        let credited = read_balance(&tx, &request.provider)? + amount;
        write_balance(&tx, &request.subscriber, funds - amount, request.timestamp)?;
        write_balance(&tx, &request.provider, credited, request.timestamp)?;

        let advanced = tx.execute(
            "UPDATE subscriptions SET next_payment_time = ?1, retry_count = 0
             WHERE id = ?2 AND next_payment_time = ?3",
            params![
                request.next_payment_time,
                key.subscription_id.get() as i64,
                key.cycle
            ],
        )?;
        if advanced != 1 {
            return Ok(Err(SettlementError::Rejected(format!(
                "cycle {} moved during settlement",
                key.cycle
            ))));
        }

        let receipt = SettlementReceipt {
            transaction_id: transaction_id(&key),
            timestamp: request.timestamp,
        };
        let event = request.to_event(&receipt);
        tx.execute(
            "INSERT INTO payment_events
             (subscription_id, cycle, subscriber, provider, amount, timestamp, transaction_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.subscription_id.get() as i64,
                event.cycle,
                event.subscriber,
                event.provider,
                event.amount.to_string(),
                event.timestamp,
                event.transaction_id,
            ],
        )?;
        tx.commit()?;
        Ok(Ok(receipt))
    }

    fn commit_update(&self, update: &ScheduleUpdate) -> Result<bool> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE subscriptions
             SET next_payment_time = ?1,
                 retry_count       = ?2,
                 is_active         = is_active AND ?3,
                 cancelled_at      = CASE WHEN is_active AND NOT ?3 THEN ?4 ELSE cancelled_at END
             WHERE id = ?5 AND next_payment_time = ?6",
            params![
                update.next_payment_time,
                update.retry_count,
                update.is_active,
                self.clock.now(),
                update.subscription_id.get() as i64,
                update.expected_next_payment_time,
            ],
        )?;
        if changed == 1 {
            return Ok(true);
        }
        if load_subscription(&db, update.subscription_id)?.is_none() {
            return Err(StoreError::SubscriptionNotFound {
                id: update.subscription_id,
            });
        }
        Ok(false)
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn active_subscriptions(&self) -> std::result::Result<Vec<Subscription>, LedgerError> {
        let db = self.conn()?;
        let mut stmt = db
            .prepare(&format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
                 WHERE is_active = 1 ORDER BY next_payment_time, id"
            ))
            .map_err(StoreError::from)?;
        let rows = stmt
            .query_map([], row_to_subscription)
            .map_err(StoreError::from)?;
        Ok(rows
            .collect::<rusqlite::Result<_>>()
            .map_err(StoreError::from)?)
    }

    async fn provider(&self, address: &str) -> std::result::Result<Option<Provider>, LedgerError> {
        Ok(self.get_provider(address)?)
    }

    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> std::result::Result<SettlementReceipt, SettlementError> {
        match self.settle_cycle(request) {
            Ok(result) => result,
            Err(e) => Err(SettlementError::Ledger(e.into())),
        }
    }

    async fn commit(&self, update: &ScheduleUpdate) -> std::result::Result<(), LedgerError> {
        if self.commit_update(update)? {
            Ok(())
        } else {
            Err(LedgerError::Conflict {
                id: update.subscription_id,
                expected: update.expected_next_payment_time,
            })
        }
    }

    async fn find_settlement(
        &self,
        key: &CycleKey,
    ) -> std::result::Result<Option<PaymentEvent>, LedgerError> {
        let db = self.conn()?;
        Ok(find_event(&db, key)?)
    }
}

/// What `amount` every `interval_secs` comes to over one 30-day month.
pub fn monthly_equivalent(amount: Amount, interval_secs: u64) -> Decimal {
    if interval_secs == 0 {
        return Decimal::ZERO;
    }
    amount.as_decimal() * Decimal::from(MONTH_SECS) / Decimal::from(interval_secs)
}

/// Deterministic id for the payment of one cycle.
pub fn transaction_id(key: &CycleKey) -> String {
    let digest = Sha256::digest(format!("flowsubs:{key}").as_bytes());
    format!("0x{}", hex::encode(digest))
}

fn read_balance(conn: &Connection, address: &str) -> Result<Decimal> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT balance FROM accounts WHERE address = ?1",
            params![address],
            |row| row.get(0),
        )
        .optional()?;
    match stored {
        Some(text) => Decimal::from_str(&text)
            .map_err(|e| StoreError::CorruptRow(format!("balance of {address}: {e}"))),
        None => Ok(Decimal::ZERO),
    }
}

fn write_balance(tx: &Transaction<'_>, address: &str, balance: Decimal, now: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO accounts (address, balance, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (address) DO UPDATE SET balance = excluded.balance,
                                             updated_at = excluded.updated_at",
        params![address, balance.normalize().to_string(), now],
    )?;
    Ok(())
}

fn load_subscription(conn: &Connection, id: SubscriptionId) -> Result<Option<Subscription>> {
    Ok(conn
        .query_row(
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1"),
            params![id.get() as i64],
            row_to_subscription,
        )
        .optional()?)
}

fn find_event(conn: &Connection, key: &CycleKey) -> Result<Option<PaymentEvent>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM payment_events WHERE subscription_id = ?1 AND cycle = ?2"
            ),
            params![key.subscription_id.get() as i64, key.cycle],
            row_to_event,
        )
        .optional()?)
}

fn parse_amount(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Amount> {
    let text: String = row.get(idx)?;
    text.parse::<Amount>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_provider(row: &rusqlite::Row<'_>) -> rusqlite::Result<Provider> {
    Ok(Provider {
        address: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_active: row.get(3)?,
    })
}

fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: SubscriptionId(row.get::<_, i64>(0)? as u64),
        subscriber: row.get(1)?,
        provider: row.get(2)?,
        amount: parse_amount(row, 3)?,
        interval_secs: row.get::<_, i64>(4)? as u64,
        next_payment_time: row.get(5)?,
        is_active: row.get(6)?,
        created_at: row.get(7)?,
        retry_count: row.get(8)?,
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentEvent> {
    Ok(PaymentEvent {
        subscription_id: SubscriptionId(row.get::<_, i64>(0)? as u64),
        subscriber: row.get(1)?,
        provider: row.get(2)?,
        amount: parse_amount(row, 3)?,
        timestamp: row.get(4)?,
        transaction_id: row.get(5)?,
        cycle: row.get(6)?,
    })
}
