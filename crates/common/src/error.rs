//! Error types for atcloud.

use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Caller Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Recipient {recipient} was never targeted by message {message}")]
    RecipientNotTargeted { message: String, recipient: String },

    #[error("Validation error: {0}")]
    Validation(String),

    // === Channel Errors ===
    #[error("Channel '{channel}' timed out after {timeout_ms}ms")]
    ChannelTimeout { channel: String, timeout_ms: u64 },

    #[error("Channel '{channel}' unavailable: {reason}")]
    ChannelUnavailable { channel: String, reason: String },

    #[error("Channel '{channel}' circuit is open")]
    ChannelCircuitOpen { channel: String },

    // === Server Errors ===
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the error code for structured logs and API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::MessageNotFound(_) => "MESSAGE_NOT_FOUND",
            Self::RecipientNotTargeted { .. } => "RECIPIENT_NOT_TARGETED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ChannelTimeout { .. } => "CHANNEL_TIMEOUT",
            Self::ChannelUnavailable { .. } => "CHANNEL_UNAVAILABLE",
            Self::ChannelCircuitOpen { .. } => "CHANNEL_CIRCUIT_OPEN",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error is a transient channel failure eligible for retry.
    #[must_use]
    pub const fn is_transient_channel(&self) -> bool {
        matches!(
            self,
            Self::ChannelTimeout { .. } | Self::ChannelUnavailable { .. }
        )
    }

    /// Whether this error came from the persistence layer.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
