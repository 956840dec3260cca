//! Settings type definitions.
//!
//! Every struct uses `#[serde(rename_all = "camelCase")]` and
//! `#[serde(default)]` so a partial `settings.json` deserializes with
//! compiled defaults for the missing keys.

use relay_core::ConnectorId;
use relay_core::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Connection and reconnection behaviour.
    pub connector: ConnectorSettings,
    /// Resource guard limits.
    pub guard: GuardSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Check cross-field rules that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        let _ = ConnectorId::parse(self.connector.id.as_str())
            .map_err(|e| SettingsError::InvalidValue(format!("connector.id: {e}")))?;

        if let Some(url) = &self.connector.url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(SettingsError::InvalidValue(format!(
                    "connector.url must use ws:// or wss://, got {url}"
                )));
            }
        }

        let limits = [
            ("connector.reconnectBaseDelayMs", self.connector.reconnect_base_delay_ms),
            ("connector.reconnectMaxDelayMs", self.connector.reconnect_max_delay_ms),
            ("connector.connectTimeoutMs", self.connector.connect_timeout_ms),
            ("guard.maxConnections", self.guard.max_connections as u64),
            ("guard.maxMessageBytes", self.guard.max_message_bytes as u64),
            ("guard.rateLimitMax", self.guard.rate_limit_max as u64),
            ("guard.rateLimitWindowMs", self.guard.rate_limit_window_ms),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        if self.connector.source.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "connector.source must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for a single connector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectorSettings {
    /// Connector identifier (1..=100 chars after trimming).
    pub id: String,
    /// Transport endpoint to dial at startup, if any.
    pub url: Option<String>,
    /// Reconnect automatically after an unexpected closure.
    pub auto_reconnect: bool,
    /// Attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub reconnect_base_delay_ms: u64,
    /// Cap on any single reconnect delay.
    pub reconnect_max_delay_ms: u64,
    /// A link that lived at least this long resets the attempt counter.
    pub reconnect_stability_ms: u64,
    /// Time allowed for the transport to report ready.
    pub connect_timeout_ms: u64,
    /// Prefix used for inbound canonical event types.
    pub source: String,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            id: "relay".to_string(),
            url: None,
            auto_reconnect: true,
            max_reconnect_attempts: relay_core::retry::DEFAULT_MAX_ATTEMPTS,
            reconnect_base_delay_ms: relay_core::retry::DEFAULT_BASE_DELAY_MS,
            reconnect_max_delay_ms: relay_core::retry::DEFAULT_MAX_DELAY_MS,
            reconnect_stability_ms: 5_000,
            connect_timeout_ms: 10_000,
            source: "websocket".to_string(),
        }
    }
}

impl ConnectorSettings {
    /// Backoff policy derived from the reconnect fields.
    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay_ms: self.reconnect_base_delay_ms,
            max_delay_ms: self.reconnect_max_delay_ms,
        }
    }
}

/// Resource guard limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardSettings {
    /// Concurrent physical connections allowed per budget.
    pub max_connections: usize,
    /// Largest serialized frame accepted in either direction.
    pub max_message_bytes: usize,
    /// Sends admitted per rate window.
    pub rate_limit_max: usize,
    /// Length of the trailing rate window.
    pub rate_limit_window_ms: u64,
    /// Reject outbound and drop inbound payloads screened as malicious.
    /// Off by default: screening tags and logs instead.
    pub block_malicious: bool,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            max_connections: 50,
            max_message_bytes: 1024 * 1024,
            rate_limit_max: 100,
            rate_limit_window_ms: 60_000,
            block_malicious: false,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit newline-delimited JSON instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
