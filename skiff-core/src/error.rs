// ABOUTME: Error taxonomy shared by every adapter component
// ABOUTME: Distinguishes retryable platform failures from ones surfaced to the framework

use thiserror::Error;

/// Errors produced while servicing framework requests or platform traffic.
///
/// `Transient` failures are retried by the owning platform client's
/// reconnection logic; everything else is surfaced to the framework as a
/// `request_failed` event, except `Fatal` which terminates the process.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Malformed request from the framework.
    #[error("validation error: {0}")]
    Validation(String),

    /// Request referenced a conversation the adapter has never observed.
    #[error("conversation {0} not found")]
    ConversationNotFound(String),

    /// Platform API temporarily unavailable; safe to retry.
    #[error("transient platform error: {0}")]
    Transient(String),

    /// Platform rejected the operation outright.
    #[error("platform error: {0}")]
    Permanent(String),

    /// Attachment was too large, unreadable, or missing on fetch.
    #[error("attachment error: {0}")]
    Attachment(String),

    /// The platform session is not established.
    #[error("adapter is not connected to perform action")]
    NotConnected,

    /// Unrecoverable condition; the process should exit.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Whether the owning client may retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }

    /// Message suitable for a `request_failed` payload.
    pub fn wire_message(&self) -> String {
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
