//! Error types for the uptime monitor core.

use thiserror::Error;

/// Errors that can occur in the monitor pipeline and its storage backends.
#[derive(Debug, Error)]
pub enum UptimeError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid message id '{raw}': {reason}")]
    InvalidMessageId { raw: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl UptimeError {
    /// Returns `true` for errors that abort startup rather than being
    /// logged and skipped at runtime.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
