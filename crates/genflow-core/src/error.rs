//! Error types module
//!
//! Every failure the orchestration layer can surface is a variant of [`GenflowError`].
//! The variants follow the propagation rules of the job pipeline:
//!
//! - `Input`, `Validation` and `Staging` are deterministic and abort immediately.
//! - `Transport` is retried locally with a cap, then escalated.
//! - `Provider` is authoritative; its message is kept verbatim.
//! - `Malformed` bodies during polling count as an uneventful cycle.
//! - `Timeout` leaves the job in its last non-terminal state.

use crate::models::CanonicalStatus;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected errors such as rejected parameters
    Debug,
    /// Recoverable or externally caused failures
    Warn,
    /// Unexpected failures
    Error,
}

/// Self-description of an error for callers that report or retry it
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "TRANSPORT_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same operation can succeed
    fn is_recoverable(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenflowError {
    /// Malformed inline asset (bad data URI, undecodable base64, empty payload)
    #[error("Invalid input: {0}")]
    Input(String),

    /// Staging storage rejected the write
    #[error("Staging failed: {0}")]
    Staging(String),

    /// Parameter combination not accepted by the provider
    #[error("Invalid parameters for {provider}: {message}")]
    Validation { provider: String, message: String },

    /// Network or HTTP level failure
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    /// Structured failure reported by the provider itself
    #[error("{provider}: {message}")]
    Provider { provider: String, message: String },

    /// The provider answered, but not in any shape we can read
    #[error("{provider} returned an unreadable response: {message}")]
    Malformed { provider: String, message: String },

    /// Polling budget exhausted before the job reached a terminal state
    #[error("Timed out after {elapsed_secs}s waiting for job (last status: {last_status})")]
    Timeout {
        elapsed_secs: u64,
        last_status: CanonicalStatus,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type used across the genflow crates
pub type GenflowResult<T> = Result<T, GenflowError>;

impl GenflowError {
    pub fn validation(provider: impl Into<String>, message: impl Into<String>) -> Self {
        GenflowError::Validation {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        GenflowError::Transport {
            message: message.into(),
            status: None,
        }
    }

    pub fn transport_status(status: u16, message: impl Into<String>) -> Self {
        GenflowError::Transport {
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        GenflowError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        GenflowError::Malformed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, GenflowError::Transport { .. })
    }

    /// The provider's literal message, if this is a provider error
    pub fn provider_message(&self) -> Option<&str> {
        match self {
            GenflowError::Provider { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl ErrorMetadata for GenflowError {
    fn error_code(&self) -> &'static str {
        match self {
            GenflowError::Input(_) => "INPUT_ERROR",
            GenflowError::Staging(_) => "STAGING_ERROR",
            GenflowError::Validation { .. } => "VALIDATION_ERROR",
            GenflowError::Transport { .. } => "TRANSPORT_ERROR",
            GenflowError::Provider { .. } => "PROVIDER_ERROR",
            GenflowError::Malformed { .. } => "MALFORMED_RESPONSE",
            GenflowError::Timeout { .. } => "TIMEOUT",
            GenflowError::Cancelled(_) => "CANCELLED",
            GenflowError::NotFound(_) => "NOT_FOUND",
            GenflowError::ResourceBusy(_) => "RESOURCE_BUSY",
            GenflowError::Config(_) => "CONFIG_ERROR",
            GenflowError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GenflowError::Transport { .. }
                | GenflowError::Malformed { .. }
                | GenflowError::Timeout { .. }
                | GenflowError::ResourceBusy(_)
        )
    }

    fn log_level(&self) -> LogLevel {
        match self {
            GenflowError::Input(_)
            | GenflowError::Validation { .. }
            | GenflowError::NotFound(_)
            | GenflowError::Cancelled(_) => LogLevel::Debug,
            GenflowError::Transport { .. }
            | GenflowError::Provider { .. }
            | GenflowError::Malformed { .. }
            | GenflowError::Timeout { .. }
            | GenflowError::ResourceBusy(_) => LogLevel::Warn,
            GenflowError::Staging(_) | GenflowError::Config(_) | GenflowError::Internal(_) => {
                LogLevel::Error
            }
        }
    }
}

impl From<serde_json::Error> for GenflowError {
    fn from(err: serde_json::Error) -> Self {
        GenflowError::Internal(format!("JSON error: {}", err))
    }
}
