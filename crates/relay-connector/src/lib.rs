//! # relay-connector
//!
//! Real-time WebSocket connector.
//!
//! - **Connector**: Cloneable handle to a per-connector coordinator task that owns all state
//! - **Transport**: One physical link at a time, split into reader and writer tasks
//! - **Translator**: `TransportMessage` ⇄ `CanonicalEvent`, plus typed chat/presence views
//! - **Channels**: Logical category filters multiplexed over the link
//! - **Guard**: Size ceiling, sliding rate window, content screening, connection budget
//! - **Supervisor**: Exponential reconnect backoff and give-up policy
//! - **Bridge**: Filtered subscriptions and forwarding to an external event bus
//! - **Metrics**: Per-connector counters mirrored to the `metrics` facade
//!
//! ## Crate Position
//!
//! Depends on: relay-core, relay-settings.
//! Depended on by: relay (CLI).

#![deny(unsafe_code)]

pub mod bridge;
pub mod channel;
pub mod connector;
pub mod guard;
pub mod metrics;
pub mod status;
pub mod supervisor;
pub mod translator;
pub mod transport;

// Re-export main public API
pub use bridge::{CallbackError, EventBridge, EventCallback, SubscriptionFilter};
pub use channel::{Channel, ChannelRegistry};
pub use connector::{Connector, ConnectorBuilder, ConnectorConfig};
pub use guard::{
    ConnectionBudget, ConnectionPermit, GuardLimits, ResourceGuard, Screening, Verdict,
    screen_content,
};
pub use metrics::{ConnectionMetrics, Health, MetricsSnapshot};
pub use status::ConnectorStatus;
pub use supervisor::{ConnectionState, Decision, ReconnectSupervisor};
pub use translator::{
    ChatMessage, ChatMessageKind, PresenceEvent, PresenceKind, ProtocolTranslator,
    validate_canonical_event,
};
pub use transport::CloseReason;
