use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{FlowSubsError, Result};

/// Fractional digits carried by the settlement layer's fixed-point type.
pub const AMOUNT_SCALE: u32 = 8;

/// Monotonically assigned subscription identifier (never 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SubscriptionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A positive payment amount with at most 8 fractional digits.
///
/// Backed by a decimal, never `f64`. The ceiling matches an unsigned 64-bit fixed-point value with 8
/// decimals (`184467440737.09551615`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        let value = value.normalize();
        if value <= Decimal::ZERO {
            return Err(FlowSubsError::InvalidAmount(format!(
                "{value} is not positive"
            )));
        }
        if value.scale() > AMOUNT_SCALE {
            return Err(FlowSubsError::InvalidAmount(format!(
                "{value} has more than {AMOUNT_SCALE} decimal places"
            )));
        }
        if value > Self::max_value() {
            return Err(FlowSubsError::InvalidAmount(format!(
                "{value} exceeds the maximum of {}",
                Self::max_value()
            )));
        }
        Ok(Self(value))
    }

    pub fn max_value() -> Decimal {
        Decimal::from_i128_with_scale(u64::MAX as i128, AMOUNT_SCALE)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Amount {
    type Err = FlowSubsError;

    fn from_str(s: &str) -> Result<Self> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| FlowSubsError::InvalidAmount(format!("'{s}': {e}")))?;
        Self::new(value)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = FlowSubsError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Idempotency key of one billing cycle: a subscription can settle at most
/// once per `cycle` (the `next_payment_time` being charged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleKey {
    pub subscription_id: SubscriptionId,
    pub cycle: i64,
}

impl fmt::Display for CycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subscription_id, self.cycle)
    }
}

/// A recurring-payment agreement between a subscriber and a provider.
///
/// All timestamps are seconds since the Unix epoch, as reported by the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    /// Paying account.
    pub subscriber: String,
    /// Receiving account; also the provider's identity.
    pub provider: String,
    pub amount: Amount,
    pub interval_secs: u64,
    /// Next instant at which a charge becomes eligible.
    pub next_payment_time: i64,
    /// Cleared on cancellation; never set again once cleared.
    pub is_active: bool,
    pub created_at: i64,
    /// Consecutive failed settlement attempts for the current cycle.
    #[serde(default)]
    pub retry_count: u32,
}

impl Subscription {
    /// First eligible charge for a subscription created at `created_at`:
    /// one full interval later.
    pub fn first_payment_time(created_at: i64, interval_secs: u64) -> Option<i64> {
        let interval = i64::try_from(interval_secs).ok()?;
        created_at.checked_add(interval)
    }

    pub fn cycle_key(&self) -> CycleKey {
        CycleKey {
            subscription_id: self.id,
            cycle: self.next_payment_time,
        }
    }

    /// Whether a charge is eligible at `now`.
    pub fn is_due(&self, now: i64) -> bool {
        self.is_active && self.next_payment_time <= now
    }

    /// The payment time one interval after the current one, or `None` on overflow.
    pub fn following_payment_time(&self) -> Option<i64> {
        let interval = i64::try_from(self.interval_secs).ok()?;
        self.next_payment_time.checked_add(interval)
    }

    /// `true` while `next_payment_time` sits exactly on `created_at + k * interval`.
    pub fn is_on_schedule(&self) -> bool {
        let Ok(interval) = i64::try_from(self.interval_secs) else {
            return false;
        };
        interval > 0
            && self.next_payment_time >= self.created_at
            && (self.next_payment_time - self.created_at) % interval == 0
    }

    /// Number of whole cycles already settled or skipped since creation.
    pub fn cycles_completed(&self) -> u64 {
        if self.interval_secs == 0 || self.next_payment_time <= self.created_at {
            return 0;
        }
        ((self.next_payment_time - self.created_at) as u64 / self.interval_secs).saturating_sub(1)
    }

    /// How many cycles are eligible at `now` (the catch-up backlog).
    pub fn cycles_due(&self, now: i64) -> u64 {
        if !self.is_due(now) || self.interval_secs == 0 {
            return 0;
        }
        (now - self.next_payment_time) as u64 / self.interval_secs + 1
    }

    /// The next `count` payment times from the current one onward.
    pub fn upcoming_payments(&self, count: usize) -> Vec<i64> {
        if !self.is_active {
            return Vec::new();
        }
        let Ok(interval) = i64::try_from(self.interval_secs) else {
            return Vec::new();
        };
        std::iter::successors(Some(self.next_payment_time), |t| t.checked_add(interval))
            .take(count)
            .collect()
    }
}

/// A registered service provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Identity and payment destination.
    pub address: String,
    pub name: String,
    pub description: String,
    pub is_active: bool,
}

/// Record of one settled billing cycle. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub subscription_id: SubscriptionId,
    pub subscriber: String,
    pub provider: String,
    pub amount: Amount,
    /// When the settlement happened.
    pub timestamp: i64,
    pub transaction_id: String,
    /// The `next_payment_time` this payment settled.
    pub cycle: i64,
}

impl PaymentEvent {
    pub fn cycle_key(&self) -> CycleKey {
        CycleKey {
            subscription_id: self.subscription_id,
            cycle: self.cycle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONTH: u64 = 2_592_000;

    fn sub(created_at: i64, next: i64) -> Subscription {
        Subscription {
            id: SubscriptionId(1),
            subscriber: "0x01cf0e2f2f715450".into(),
            provider: "0x179b6b1cb6755e31".into(),
            amount: "10.0".parse().unwrap(),
            interval_secs: MONTH,
            next_payment_time: next,
            is_active: true,
            created_at,
            retry_count: 0,
        }
    }

    #[test]
    fn amount_normalizes_trailing_zeros() {
        let a: Amount = "10.000000000".parse().unwrap();
        assert_eq!(a.to_string(), "10");
        assert_eq!(a, "10".parse().unwrap());
    }

    #[test]
    fn amount_rejects_non_positive_and_excess_precision() {
        assert!("0".parse::<Amount>().is_err());
        assert!("-1.5".parse::<Amount>().is_err());
        assert!("0.000000001".parse::<Amount>().is_err());
        assert!("0.00000001".parse::<Amount>().is_ok());
        assert!("abc".parse::<Amount>().is_err());
    }

    #[test]
    fn amount_ceiling_is_ufix64_max() {
        assert!("184467440737.09551615".parse::<Amount>().is_ok());
        assert!("184467440737.09551616".parse::<Amount>().is_err());
    }

    #[test]
    fn amount_serde_rejects_invalid_values() {
        let ok: Amount = serde_json::from_str("\"7.5\"").unwrap();
        assert_eq!(ok.to_string(), "7.5");
        assert!(serde_json::from_str::<Amount>("\"-3\"").is_err());
    }

    #[test]
    fn first_payment_is_one_interval_after_creation() {
        assert_eq!(Subscription::first_payment_time(0, MONTH), Some(MONTH as i64));
        assert_eq!(Subscription::first_payment_time(i64::MAX, 1), None);
    }

    #[test]
    fn due_and_schedule_helpers() {
        let s = sub(0, MONTH as i64);
        assert!(!s.is_due(MONTH as i64 - 1));
        assert!(s.is_due(MONTH as i64));
        assert!(s.is_on_schedule());
        assert_eq!(s.following_payment_time(), Some(2 * MONTH as i64));
        assert_eq!(s.cycles_completed(), 0);
        assert_eq!(s.cycles_due(MONTH as i64 * 3 + 5), 3);
        assert_eq!(s.cycles_due(0), 0);
    }

    #[test]
    fn off_grid_time_is_not_on_schedule() {
        let s = sub(0, MONTH as i64 + 1);
        assert!(!s.is_on_schedule());
        let s = sub(100, 50);
        assert!(!s.is_on_schedule());
    }

    #[test]
    fn upcoming_payments_projects_from_current_cycle() {
        let s = sub(0, 2 * MONTH as i64);
        assert_eq!(
            s.upcoming_payments(3),
            vec![2 * MONTH as i64, 3 * MONTH as i64, 4 * MONTH as i64]
        );
        assert_eq!(s.cycles_completed(), 1);

        let mut cancelled = s;
        cancelled.is_active = false;
        assert!(cancelled.upcoming_payments(3).is_empty());
        assert!(!cancelled.is_due(i64::MAX));
    }

    #[test]
    fn cycle_key_display() {
        let s = sub(0, MONTH as i64);
        assert_eq!(s.cycle_key().to_string(), "1:2592000");
    }
}
