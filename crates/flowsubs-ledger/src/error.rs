use flowsubs_core::{FlowSubsError, SubscriptionId};
use flowsubs_scheduler::LedgerError;
use thiserror::Error;

/// Errors that can occur within the local ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The request failed validation before touching the database.
    #[error(transparent)]
    Validation(#[from] FlowSubsError),

    #[error("subscription not found: {id}")]
    SubscriptionNotFound { id: SubscriptionId },

    #[error("provider not found: {address}")]
    ProviderNotFound { address: String },

    #[error("provider is inactive: {address}")]
    ProviderInactive { address: String },

    #[error("provider already registered: {address}")]
    ProviderExists { address: String },

    /// Only the paying account may cancel its subscription.
    #[error("subscription {id} does not belong to {subscriber}")]
    NotSubscriber {
        id: SubscriptionId,
        subscriber: String,
    },

    #[error("subscription {id} is already cancelled")]
    AlreadyCancelled { id: SubscriptionId },

    /// A stored value could not be decoded (e.g. a malformed amount).
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("ledger connection poisoned")]
    Poisoned,
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SubscriptionNotFound { id } => LedgerError::NotFound { id },
            StoreError::Poisoned => LedgerError::Unavailable(e.to_string()),
            other => LedgerError::Backend(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
