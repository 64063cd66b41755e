//! Error types for the relay daemon
//!
//! Classification mirrors the failure taxonomy of the pipeline: only
//! [`RelayError::Startup`] may terminate the process; broker and
//! delivery failures are absorbed inside the fan-out loop.

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for the relay daemon
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event source unreachable after bounded retries at construction
    #[error("Startup error: {0}")]
    Startup(String),

    /// Broker poll/fetch failure (recovered via reconnect-then-backoff)
    #[error("Broker error: {0}")]
    Broker(String),

    /// Failure sending to one recipient (non-fatal, per pairing)
    #[error("Delivery to chat {chat_id} failed: {message}")]
    Delivery { chat_id: i64, message: String },

    /// Chat API rejected a request outside of delivery (e.g. getUpdates)
    #[error("Telegram API error: {0}")]
    Telegram(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RelayError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a startup error
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }

    /// Create a broker error
    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    /// Create a per-recipient delivery error
    pub fn delivery(chat_id: i64, msg: impl Into<String>) -> Self {
        Self::Delivery {
            chat_id,
            message: msg.into(),
        }
    }

    /// Create a Telegram API error
    pub fn telegram(msg: impl Into<String>) -> Self {
        Self::Telegram(msg.into())
    }

    /// Check if this error is recoverable by reconnect/backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Broker(_) | Self::Telegram(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
