//! Error taxonomy for the relay connector.
//!
//! Every fallible connector operation returns [`ConnectorError`]. The variants
//! split into three groups:
//!
//! - **Transport**: `Connection` (retryable by the reconnection supervisor),
//!   `NotConnected`, and the terminal `ConnectionLost`
//! - **Admission control**: `RateLimited`, `PayloadTooLarge`,
//!   `ContentRejected` (surfaced to the caller, never retried)
//! - **Data**: `Translation` for malformed envelopes
//!
//! `InvalidConfig` and `Shutdown` cover construction and lifecycle misuse.

use thiserror::Error;

/// Errors produced by the connector and its components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// The transport endpoint could not be reached, timed out, or the
    /// connection ceiling would be exceeded.
    #[error("connection to {url} failed: {reason}")]
    Connection {
        /// Endpoint URL.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// A send or publish was attempted without a ready connection.
    #[error("not connected: {operation} requires a ready connection")]
    NotConnected {
        /// The operation that was refused.
        operation: String,
    },

    /// The sliding-window rate limit is exhausted.
    #[error("rate limit exceeded: {limit} sends per {window_ms}ms")]
    RateLimited {
        /// Maximum sends per window.
        limit: usize,
        /// Window length in milliseconds.
        window_ms: u64,
    },

    /// The serialized payload exceeds the size ceiling.
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Serialized size in bytes.
        size: usize,
        /// Configured ceiling in bytes.
        max: usize,
    },

    /// Content screening classified the payload as malicious.
    #[error("payload rejected by content screening: {}", rules.join(", "))]
    ContentRejected {
        /// IDs of the screening rules that matched.
        rules: Vec<String>,
    },

    /// An envelope could not be translated or failed validation.
    #[error("translation failed: {0}")]
    Translation(String),

    /// The reconnection supervisor exhausted its attempts.
    #[error("connection to {url} lost after {attempts} reconnect attempts")]
    ConnectionLost {
        /// Endpoint URL.
        url: String,
        /// Reconnect attempts made before giving up.
        attempts: u32,
    },

    /// Construction-time configuration was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The connector's coordinator task is no longer running.
    #[error("connector has shut down")]
    Shutdown,
}

impl ConnectorError {
    /// Shorthand for a [`ConnectorError::NotConnected`].
    #[must_use]
    pub fn not_connected(operation: impl Into<String>) -> Self {
        Self::NotConnected {
            operation: operation.into(),
        }
    }

    /// Shorthand for a [`ConnectorError::Connection`].
    #[must_use]
    pub fn connection(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::NotConnected { .. } => "NOT_CONNECTED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::ContentRejected { .. } => "CONTENT_REJECTED",
            Self::Translation(_) => "TRANSLATION_ERROR",
            Self::ConnectionLost { .. } => "CONNECTION_LOST",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Shutdown => "SHUTDOWN",
        }
    }

    /// Whether the reconnection supervisor may retry after this error.
    ///
    /// Admission-control rejections are the caller's responsibility and are
    /// never retried by the connector.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Whether this error came from admission control.
    #[must_use]
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::PayloadTooLarge { .. } | Self::ContentRejected { .. }
        )
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Translation(err.to_string())
    }
}

/// Result alias for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;
