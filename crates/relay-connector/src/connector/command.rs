//! Messages understood by the coordinator task.

use relay_core::{CanonicalEvent, ChannelId, Result, SubscriptionId, TransportMessage};
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;

use crate::bridge::{EventCallback, SubscriptionFilter};
use crate::channel::Channel;
use crate::status::ConnectorStatus;
use crate::transport::Link;

/// Requests sent by [`Connector`](super::Connector) handles.
pub(crate) enum Command {
    Connect {
        url: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        message: TransportMessage,
        submitted_at: Instant,
        reply: oneshot::Sender<Result<()>>,
    },
    Publish {
        event: CanonicalEvent,
        submitted_at: Instant,
        reply: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        filter: SubscriptionFilter,
        callback: EventCallback,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    CreateChannel {
        category_filter: String,
        reply: oneshot::Sender<ChannelId>,
    },
    Channels {
        reply: oneshot::Sender<Vec<Channel>>,
    },
    RegisterBridge {
        bus: broadcast::Sender<CanonicalEvent>,
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<ConnectorStatus>,
    },
}

/// Reports from tasks the coordinator spawned itself. `attempt` is the
/// sequence number current when the task started; stale reports are dropped.
pub(crate) enum Internal {
    ConnectFinished { attempt: u64, result: Result<Link> },
    ReconnectDue { attempt: u64 },
}
