//! Typed parameters for ledger mutations.
//!
//! Each request is validated before it reaches the settlement layer, so a
//! malformed address or an interval below the configured floor is rejected
//! locally instead of surfacing as an opaque ledger failure.

use serde::{Deserialize, Serialize};

use crate::address::normalize_address;
use crate::error::{FlowSubsError, Result};
use crate::types::{Amount, SubscriptionId};

pub const MAX_PROVIDER_NAME_CHARS: usize = 50;
pub const MAX_PROVIDER_DESCRIPTION_CHARS: usize = 200;

/// Open a new subscription from `subscriber` to `provider`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub subscriber: String,
    pub provider: String,
    pub amount: Amount,
    pub interval_secs: u64,
}

impl CreateSubscriptionRequest {
    /// Check the request and return it with canonical addresses.
    pub fn validate(self, min_interval_secs: u64) -> Result<Self> {
        let subscriber = normalize_address(&self.subscriber)?;
        let provider = normalize_address(&self.provider)?;
        if subscriber == provider {
            return Err(FlowSubsError::validation(
                "provider",
                "subscriber and provider must differ",
            ));
        }
        if self.interval_secs < min_interval_secs {
            return Err(FlowSubsError::validation(
                "interval_secs",
                format!(
                    "{}s is below the minimum of {}s",
                    self.interval_secs, min_interval_secs
                ),
            ));
        }
        if i64::try_from(self.interval_secs).is_err() {
            return Err(FlowSubsError::validation(
                "interval_secs",
                "interval does not fit a timestamp",
            ));
        }
        Ok(Self {
            subscriber,
            provider,
            ..self
        })
    }
}

/// Cancel a subscription on behalf of its subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSubscriptionRequest {
    pub subscription_id: SubscriptionId,
    pub subscriber: String,
}

impl CancelSubscriptionRequest {
    pub fn validate(self) -> Result<Self> {
        if self.subscription_id.get() == 0 {
            return Err(FlowSubsError::validation(
                "subscription_id",
                "ids start at 1",
            ));
        }
        Ok(Self {
            subscriber: normalize_address(&self.subscriber)?,
            ..self
        })
    }
}

/// Self-register `address` as a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProviderRequest {
    pub address: String,
    pub name: String,
    pub description: String,
}

impl RegisterProviderRequest {
    /// Trims name and description and enforces their length limits.
    pub fn validate(self) -> Result<Self> {
        let address = normalize_address(&self.address)?;
        let name = self.name.trim().to_string();
        let description = self.description.trim().to_string();
        if name.is_empty() {
            return Err(FlowSubsError::validation("name", "must not be empty"));
        }
        if name.chars().count() > MAX_PROVIDER_NAME_CHARS {
            return Err(FlowSubsError::validation(
                "name",
                format!("longer than {MAX_PROVIDER_NAME_CHARS} characters"),
            ));
        }
        if description.chars().count() > MAX_PROVIDER_DESCRIPTION_CHARS {
            return Err(FlowSubsError::validation(
                "description",
                format!("longer than {MAX_PROVIDER_DESCRIPTION_CHARS} characters"),
            ));
        }
        Ok(Self {
            address,
            name,
            description,
        })
    }
}
