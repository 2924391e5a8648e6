use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowSubsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowSubsError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            FlowSubsError::Config(_) => "CONFIG_ERROR",
            FlowSubsError::InvalidAddress { .. } => "INVALID_ADDRESS",
            FlowSubsError::InvalidAmount(_) => "INVALID_AMOUNT",
            FlowSubsError::Validation { .. } => "VALIDATION_ERROR",
            FlowSubsError::Serialization(_) => "SERIALIZATION_ERROR",
            FlowSubsError::Io(_) => "IO_ERROR",
        }
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        FlowSubsError::Validation {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowSubsError>;
