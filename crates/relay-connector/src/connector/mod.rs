//! Public connector handle.
//!
//! [`Connector`] is a cheap, cloneable handle to a coordinator task that owns
//! all connector state. Build one with [`Connector::builder`] or
//! [`Connector::from_settings`]; the coordinator stops when the last handle
//! is dropped.
//!
//! ```no_run
//! # async fn demo() -> relay_core::Result<()> {
//! use relay_connector::{Connector, SubscriptionFilter};
//! use relay_core::TransportMessage;
//!
//! let connector = Connector::builder("chat-1").build()?;
//! connector.connect("ws://localhost:9000/ws").await?;
//! let (_id, mut events) = connector
//!     .subscribe_channel(SubscriptionFilter::all().tag("chat"))
//!     .await?;
//! connector
//!     .send(TransportMessage::from_json("chat_message", serde_json::json!({"content": "hi"})))
//!     .await?;
//! let _first = events.recv().await;
//! # Ok(())
//! # }
//! ```

mod command;
mod coordinator;

use std::time::Duration;

use relay_core::retry::BackoffPolicy;
use relay_core::{
    CanonicalEvent, ChannelId, ConnectorError, ConnectorId, Result, SubscriptionId,
    TransportMessage,
};
use relay_settings::RelaySettings;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use self::command::Command;
use self::coordinator::Coordinator;
use crate::bridge::{CallbackError, SubscriptionFilter};
use crate::channel::Channel;
use crate::guard::{ConnectionBudget, GuardLimits};
use crate::status::ConnectorStatus;
use crate::supervisor::ConnectionState;
use crate::translator::DEFAULT_SOURCE;

/// Commands buffered per connector before handles wait.
const COMMAND_BUFFER: usize = 256;

/// State published to handles.
#[derive(Clone, Debug, Default)]
pub(crate) struct Shared {
    pub state: ConnectionState,
    pub lost: Option<ConnectorError>,
}

/// Construction-time configuration.
#[derive(Clone, Debug)]
pub struct ConnectorConfig {
    /// Connector ID.
    pub id: ConnectorId,
    /// Endpoint used by [`Connector::connect_configured`].
    pub url: Option<String>,
    /// Prefix for inbound event types.
    pub source: String,
    /// Retry after unexpected closures.
    pub auto_reconnect: bool,
    /// Reconnect attempts and delays.
    pub backoff: BackoffPolicy,
    /// Uptime after which a dropped link resets the attempt counter.
    pub reconnect_stability: Duration,
    /// Time allowed for a connect attempt.
    pub connect_timeout: Duration,
    /// Admission limits.
    pub guard: GuardLimits,
    /// Ceiling for the connector's own budget when none is shared.
    pub max_connections: usize,
}

impl ConnectorConfig {
    /// Defaults for the given ID.
    pub fn new(id: ConnectorId) -> Self {
        Self::with_settings(id, &RelaySettings::default())
    }

    /// Build from loaded settings, validating the connector ID.
    pub fn from_settings(settings: &RelaySettings) -> Result<Self> {
        let id = ConnectorId::parse(settings.connector.id.as_str())?;
        Ok(Self::with_settings(id, settings))
    }

    fn with_settings(id: ConnectorId, settings: &RelaySettings) -> Self {
        let connector = &settings.connector;
        Self {
            id,
            url: connector.url.clone(),
            source: if connector.source.trim().is_empty() {
                DEFAULT_SOURCE.to_string()
            } else {
                connector.source.clone()
            },
            auto_reconnect: connector.auto_reconnect,
            backoff: connector.backoff(),
            reconnect_stability: Duration::from_millis(connector.reconnect_stability_ms),
            connect_timeout: Duration::from_millis(connector.connect_timeout_ms),
            guard: GuardLimits::from(&settings.guard),
            max_connections: settings.guard.max_connections,
        }
    }
}

/// Builder for [`Connector`]. Starts from [`RelaySettings::default`].
#[derive(Debug)]
pub struct ConnectorBuilder {
    settings: RelaySettings,
    budget: Option<ConnectionBudget>,
}

impl ConnectorBuilder {
    fn new(id: impl Into<String>) -> Self {
        let mut settings = RelaySettings::default();
        settings.connector.id = id.into();
        Self {
            settings,
            budget: None,
        }
    }

    /// Default endpoint for [`Connector::connect_configured`].
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.settings.connector.url = Some(url.into());
        self
    }

    /// Prefix for inbound event types (default `websocket`).
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.settings.connector.source = source.into();
        self
    }

    /// Enable or disable automatic reconnection.
    #[must_use]
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.settings.connector.auto_reconnect = enabled;
        self
    }

    /// Attempts before giving up (default 5).
    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.settings.connector.max_reconnect_attempts = attempts;
        self
    }

    /// Delay before the first reconnect attempt (default 1s).
    #[must_use]
    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.settings.connector.reconnect_base_delay_ms = duration_ms(delay);
        self
    }

    /// Cap on any single reconnect delay (default 60s).
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.settings.connector.reconnect_max_delay_ms = duration_ms(delay);
        self
    }

    /// Uptime after which a dropped link resets the attempt counter (default 5s).
    #[must_use]
    pub fn reconnect_stability(mut self, window: Duration) -> Self {
        self.settings.connector.reconnect_stability_ms = duration_ms(window);
        self
    }

    /// Time allowed for a connect attempt (default 10s).
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connector.connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// Largest frame admitted in either direction (default 1 MiB).
    #[must_use]
    pub fn max_message_bytes(mut self, max: usize) -> Self {
        self.settings.guard.max_message_bytes = max;
        self
    }

    /// Outbound sends admitted per window (default 100 per 60s).
    #[must_use]
    pub fn rate_limit(mut self, max: usize, window: Duration) -> Self {
        self.settings.guard.rate_limit_max = max;
        self.settings.guard.rate_limit_window_ms = duration_ms(window);
        self
    }

    /// Reject malicious content instead of tagging it (default false).
    #[must_use]
    pub fn block_malicious(mut self, block: bool) -> Self {
        self.settings.guard.block_malicious = block;
        self
    }

    /// Ceiling for this connector's own connection budget (default 50).
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.settings.guard.max_connections = max;
        self
    }

    /// Share a connection budget with other connectors.
    #[must_use]
    pub fn connection_budget(mut self, budget: ConnectionBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Validate and spawn the coordinator. Must be called within a Tokio runtime.
    pub fn build(self) -> Result<Connector> {
        let config = ConnectorConfig::from_settings(&self.settings)?;
        Connector::spawn(config, self.budget)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Handle to a running connector.
#[derive(Clone, Debug)]
pub struct Connector {
    id: ConnectorId,
    default_url: Option<String>,
    commands: mpsc::Sender<Command>,
    shared: watch::Receiver<Shared>,
}

impl Connector {
    /// Start building a connector with the given ID.
    pub fn builder(id: impl Into<String>) -> ConnectorBuilder {
        ConnectorBuilder::new(id)
    }

    /// Build a connector from loaded settings.
    pub fn from_settings(settings: &RelaySettings) -> Result<Self> {
        Self::spawn(ConnectorConfig::from_settings(settings)?, None)
    }

    /// Spawn a coordinator for `config`. Uses a private budget unless one is given.
    pub fn spawn(config: ConnectorConfig, budget: Option<ConnectionBudget>) -> Result<Self> {
        if config.backoff.base_delay_ms == 0 {
            return Err(ConnectorError::InvalidConfig(
                "reconnect base delay must be > 0".into(),
            ));
        }
        if config.guard.rate_limit_max == 0 || config.guard.max_message_bytes == 0 {
            return Err(ConnectorError::InvalidConfig(
                "guard limits must be > 0".into(),
            ));
        }
        let budget = budget.unwrap_or_else(|| ConnectionBudget::new(config.max_connections));
        let (commands, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (shared_tx, shared) = watch::channel(Shared::default());
        let handle = Self {
            id: config.id.clone(),
            default_url: config.url.clone(),
            commands,
            shared,
        };
        let (coordinator, inboxes) = Coordinator::new(config, budget, shared_tx, commands_rx);
        drop(tokio::spawn(coordinator.run(inboxes)));
        Ok(handle)
    }

    /// Connector ID.
    pub fn id(&self) -> &ConnectorId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.borrow().state
    }

    /// Whether the link is ready.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| ConnectorError::Shutdown)?;
        rx.await.map_err(|_| ConnectorError::Shutdown)
    }

    /// Open the link and wait until it is ready or the attempt fails.
    ///
    /// Already connected to `url` is a no-op; connected elsewhere is an error.
    pub async fn connect(&self, url: &str) -> Result<()> {
        let url = url.to_owned();
        self.request(|reply| Command::Connect { url, reply }).await?
    }

    /// Connect to the configured URL.
    pub async fn connect_configured(&self) -> Result<()> {
        let Some(url) = self.default_url.as_deref() else {
            return Err(ConnectorError::InvalidConfig(
                "no transport url configured".into(),
            ));
        };
        self.connect(url).await
    }

    /// Close the link with 1000 Normal, cancel pending reconnects, close all channels.
    /// Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Admit and send one transport message.
    pub async fn send(&self, message: TransportMessage) -> Result<()> {
        let submitted_at = Instant::now();
        self.request(|reply| Command::Send {
            message,
            submitted_at,
            reply,
        })
        .await?
    }

    /// Translate a canonical event to the transport envelope and send it.
    ///
    /// Fails with `NotConnected` until [`register_bridge`](Self::register_bridge)
    /// has completed.
    pub async fn publish(&self, event: CanonicalEvent) -> Result<()> {
        let submitted_at = Instant::now();
        self.request(|reply| Command::Publish {
            event,
            submitted_at,
            reply,
        })
        .await?
    }

    /// Register a callback for matching inbound and lifecycle events.
    pub async fn subscribe<F>(&self, filter: SubscriptionFilter, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(CanonicalEvent) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    {
        let callback = std::sync::Arc::new(callback);
        self.request(|reply| Command::Subscribe {
            filter,
            callback,
            reply,
        })
        .await
    }

    /// Subscribe with a channel instead of a callback.
    pub async fn subscribe_channel(
        &self,
        filter: SubscriptionFilter,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<CanonicalEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self
            .subscribe(filter, move |event| {
                tx.send(event).map_err(|_| "subscription receiver dropped".into())
            })
            .await?;
        Ok((id, rx))
    }

    /// Remove a subscription. `false` for unknown IDs.
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<bool> {
        let id = id.clone();
        self.request(|reply| Command::Unsubscribe { id, reply }).await
    }

    /// Open a logical channel for a comma-separated category filter.
    pub async fn create_channel(&self, category_filter: &str) -> Result<ChannelId> {
        let category_filter = category_filter.to_owned();
        self.request(|reply| Command::CreateChannel {
            category_filter,
            reply,
        })
        .await
    }

    /// Every channel created on this connector, open or closed.
    pub async fn channels(&self) -> Result<Vec<Channel>> {
        self.request(|reply| Command::Channels { reply }).await
    }

    /// Complete the handshake with an external event bus.
    pub async fn register_bridge(&self, bus: broadcast::Sender<CanonicalEvent>) -> Result<()> {
        self.request(|reply| Command::RegisterBridge { bus, reply })
            .await
    }

    /// Status snapshot.
    pub async fn status(&self) -> Result<ConnectorStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Wait until the connector reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<()> {
        let mut shared = self.shared.clone();
        let _ = shared
            .wait_for(|s| s.state == state)
            .await
            .map_err(|_| ConnectorError::Shutdown)?;
        Ok(())
    }

    /// Resolve with `ConnectionLost` once reconnection gives up.
    pub async fn connection_lost(&self) -> ConnectorError {
        let mut shared = self.shared.clone();
        match shared.wait_for(|s| s.lost.is_some()).await {
            Ok(s) => s.lost.clone().unwrap_or(ConnectorError::Shutdown),
            Err(_) => ConnectorError::Shutdown,
        }
    }
}
