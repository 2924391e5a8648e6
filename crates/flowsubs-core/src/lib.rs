//! `flowsubs-core`: shared configuration, errors and domain types for the
//! FlowSubs recurring-payment scheduler.

pub mod address;
pub mod config;
pub mod error;
pub mod request;
pub mod types;

pub use config::{FlowSubsConfig, SchedulerConfig};
pub use error::{FlowSubsError, Result};
pub use types::{Amount, CycleKey, PaymentEvent, Provider, Subscription, SubscriptionId};
