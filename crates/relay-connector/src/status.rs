//! Status report returned by `Connector::status`.

use serde::Serialize;

use crate::metrics::{Health, MetricsSnapshot};
use crate::supervisor::ConnectionState;

/// Full connector status. Serializes as camelCase JSON.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorStatus {
    /// Connector ID.
    pub connector_id: String,
    /// Current or last endpoint.
    pub url: Option<String>,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Whether the bus handshake completed.
    pub bridge_registered: bool,
    /// Channel counts.
    pub channels: ChannelTotals,
    /// Live subscriptions.
    pub subscription_count: usize,
    /// Counter snapshot.
    pub metrics: MetricsSnapshot,
    /// Health from the error rate.
    pub health: Health,
    /// Reconnect bookkeeping.
    pub reconnect: ReconnectInfo,
    /// Sliding-window usage.
    pub rate_window: RateWindowInfo,
    /// Connection-budget usage.
    pub connection_budget: BudgetInfo,
    /// Most recent error message.
    pub last_error: Option<String>,
}

/// Channel counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelTotals {
    /// Channels ever created.
    pub total: usize,
    /// Channels still open.
    pub open: usize,
}

/// Reconnect bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectInfo {
    /// Whether unexpected closures are retried.
    pub auto_reconnect: bool,
    /// Attempts since the last reset.
    pub attempts: u32,
    /// Attempt limit.
    pub max_attempts: u32,
    /// Delays scheduled since the last reset.
    pub scheduled_delays_ms: Vec<u64>,
}

/// Sliding-window usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateWindowInfo {
    /// Sends counted in the current window.
    pub used: usize,
    /// Ceiling.
    pub limit: usize,
    /// Window length.
    pub window_ms: u64,
}

/// Connection-budget usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetInfo {
    /// Slots held across every connector sharing the budget.
    pub in_use: usize,
    /// Ceiling.
    pub capacity: usize,
}
