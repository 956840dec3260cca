//! # relay-core
//!
//! Foundation types shared by every relay crate:
//!
//! - **Branded IDs**: `ConnectorId`, `EventId`, `ChannelId`, `SubscriptionId`
//! - **Envelopes**: [`TransportMessage`] (wire frame) and [`CanonicalEvent`] (bus event)
//! - **Errors**: the [`ConnectorError`] taxonomy via `thiserror`
//! - **Backoff**: reconnect delay math in [`retry`]
//! - **Logging**: `tracing` subscriber setup in [`logging`]

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod retry;

pub use envelope::{CanonicalEvent, CanonicalEventBuilder, TransportMessage, now_timestamp};
pub use errors::{ConnectorError, Result};
pub use ids::{ChannelId, ConnectorId, EventId, SubscriptionId};
