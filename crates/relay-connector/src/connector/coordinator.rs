//! The per-connector actor.
//!
//! One task owns every piece of mutable connector state: the link, guard,
//! channels, subscriptions, metrics, and supervisor. Handles talk to it over
//! a command channel; connect attempts and reconnect timers run on spawned
//! tasks and report back, so the loop never awaits network I/O.

use relay_core::{CanonicalEvent, ConnectorError, Result, TransportMessage};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::command::{Command, Internal};
use super::{ConnectorConfig, Shared};
use crate::bridge::EventBridge;
use crate::channel::ChannelRegistry;
use crate::guard::{ConnectionBudget, ResourceGuard};
use crate::metrics::ConnectionMetrics;
use crate::status::{BudgetInfo, ChannelTotals, ConnectorStatus, RateWindowInfo, ReconnectInfo};
use crate::supervisor::{ConnectionState, Decision, ReconnectSupervisor};
use crate::transport::{self, CloseReason, Link, LinkEvent};
use crate::translator::{
    BRIDGE_REGISTERED, CONNECTION_ESTABLISHED, CONNECTION_LOST, CONNECTION_TERMINATED,
    ProtocolTranslator,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Manual,
    Reconnect,
}

struct PendingConnect {
    attempt: u64,
    url: String,
    origin: Origin,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

pub(crate) struct Coordinator {
    config: ConnectorConfig,
    translator: ProtocolTranslator,
    guard: ResourceGuard,
    budget: ConnectionBudget,
    channels: ChannelRegistry,
    bridge: EventBridge,
    metrics: ConnectionMetrics,
    supervisor: ReconnectSupervisor,
    state: ConnectionState,
    url: Option<String>,
    link: Option<Link>,
    attempt_seq: u64,
    pending: Option<PendingConnect>,
    reconnect_timer: Option<JoinHandle<()>>,
    reopen_filters: Vec<String>,
    last_error: Option<String>,
    shared: watch::Sender<Shared>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
}

pub(crate) struct Inboxes {
    pub commands: mpsc::Receiver<Command>,
    pub internal: mpsc::UnboundedReceiver<Internal>,
    pub links: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Coordinator {
    pub(crate) fn new(
        config: ConnectorConfig,
        budget: ConnectionBudget,
        shared: watch::Sender<Shared>,
        commands: mpsc::Receiver<Command>,
    ) -> (Self, Inboxes) {
        let (internal_tx, internal) = mpsc::unbounded_channel();
        let (link_tx, links) = mpsc::unbounded_channel();
        let coordinator = Self {
            translator: ProtocolTranslator::new(config.id.clone(), config.source.clone()),
            guard: ResourceGuard::new(config.guard.clone()),
            budget,
            channels: ChannelRegistry::new(),
            bridge: EventBridge::new(),
            metrics: ConnectionMetrics::new(config.id.as_str()),
            supervisor: ReconnectSupervisor::new(
                config.backoff,
                config.auto_reconnect,
                config.reconnect_stability,
            ),
            state: ConnectionState::Disconnected,
            url: config.url.clone(),
            link: None,
            attempt_seq: 0,
            pending: None,
            reconnect_timer: None,
            reopen_filters: Vec::new(),
            last_error: None,
            shared,
            internal_tx,
            link_tx,
            config,
        };
        let inboxes = Inboxes {
            commands,
            internal,
            links,
        };
        (coordinator, inboxes)
    }

    /// Process messages until every handle is dropped.
    #[instrument(skip_all, fields(connector = %self.config.id))]
    pub(crate) async fn run(mut self, mut inboxes: Inboxes) {
        debug!("coordinator started");
        loop {
            tokio::select! {
                command = inboxes.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command);
                }
                Some(internal) = inboxes.internal.recv() => self.handle_internal(internal),
                Some(event) = inboxes.links.recv() => self.handle_link_event(event),
            }
        }
        self.shutdown();
        debug!("coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { url, reply } => self.connect(url, reply),
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Send {
                message,
                submitted_at,
                reply,
            } => {
                let result = self.send_message(&message, submitted_at);
                let _ = reply.send(result);
            }
            Command::Publish {
                event,
                submitted_at,
                reply,
            } => {
                let result = self.publish(&event, submitted_at);
                let _ = reply.send(result);
            }
            Command::Subscribe {
                filter,
                callback,
                reply,
            } => {
                let _ = reply.send(self.bridge.subscribe(filter, callback));
            }
            Command::Unsubscribe { id, reply } => {
                let _ = reply.send(self.bridge.unsubscribe(&id));
            }
            Command::CreateChannel {
                category_filter,
                reply,
            } => {
                let id = self.channels.create_channel(category_filter);
                debug!(channel_id = %id, "channel created");
                let _ = reply.send(id);
            }
            Command::Channels { reply } => {
                let _ = reply.send(self.channels.channels().to_vec());
            }
            Command::RegisterBridge { bus, reply } => {
                self.register_bridge(bus);
                let _ = reply.send(());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::ConnectFinished { attempt, result } => self.connect_finished(attempt, result),
            Internal::ReconnectDue { attempt } => self.reconnect_due(attempt),
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        let current = self.link.as_ref().map(Link::id);
        match event {
            LinkEvent::Frame { link, text } if current == Some(link) => self.handle_inbound(&text),
            LinkEvent::Closed { link, reason } if current == Some(link) => self.link_closed(reason),
            LinkEvent::Frame { link, .. } | LinkEvent::Closed { link, .. } => {
                debug!(link, "ignoring event from replaced link");
            }
        }
    }

    // ── Connection lifecycle ────────────────────────────────────────────

    fn connect(&mut self, url: String, reply: oneshot::Sender<Result<()>>) {
        if let Some(link) = &self.link {
            let result = if link.url() == url {
                Ok(())
            } else {
                Err(ConnectorError::connection(
                    &url,
                    format!("already connected to {}; disconnect first", link.url()),
                ))
            };
            if let Err(e) = &result {
                self.record_failure(e);
            }
            let _ = reply.send(result);
            return;
        }

        if let Some(pending) = &mut self.pending {
            if pending.url == url {
                debug!(%url, "joining in-flight connect");
                pending.waiters.push(reply);
                return;
            }
            let err = ConnectorError::connection(
                &url,
                format!("connect to {} already in progress", pending.url),
            );
            self.record_failure(&err);
            let _ = reply.send(Err(err));
            return;
        }

        self.cancel_reconnect_timer();
        self.supervisor.reset();
        self.reopen_filters.clear();
        self.start_attempt(url, Origin::Manual, Some(reply));
    }

    fn start_attempt(
        &mut self,
        url: String,
        origin: Origin,
        waiter: Option<oneshot::Sender<Result<()>>>,
    ) {
        self.attempt_seq += 1;
        let attempt = self.attempt_seq;
        self.url = Some(url.clone());
        self.pending = Some(PendingConnect {
            attempt,
            url: url.clone(),
            origin,
            waiters: waiter.into_iter().collect(),
        });
        self.set_state(ConnectionState::Connecting);
        info!(%url, ?origin, "connecting");

        match self.budget.try_acquire(&url) {
            Ok(permit) => {
                let timeout = self.config.connect_timeout;
                let links = self.link_tx.clone();
                let internal = self.internal_tx.clone();
                drop(tokio::spawn(async move {
                    let result = transport::open(&url, timeout, attempt, links, permit).await;
                    let _ = internal.send(Internal::ConnectFinished { attempt, result });
                }));
            }
            Err(e) => {
                let _ = self
                    .internal_tx
                    .send(Internal::ConnectFinished { attempt, result: Err(e) });
            }
        }
    }

    fn connect_finished(&mut self, attempt: u64, result: Result<Link>) {
        let Some(pending) = self.pending.take_if(|p| p.attempt == attempt) else {
            if let Ok(link) = result {
                debug!(attempt, "closing link from a superseded attempt");
                link.close();
            }
            return;
        };

        match result {
            Ok(link) => {
                let url = link.url().to_owned();
                self.supervisor.on_connected(link.opened_at());
                self.link = Some(link);
                self.metrics.set_connected(true);
                self.set_state(ConnectionState::Connected);
                if pending.origin == Origin::Reconnect {
                    for filter in std::mem::take(&mut self.reopen_filters) {
                        let id = self.channels.create_channel(filter);
                        debug!(channel_id = %id, "channel reopened");
                    }
                }
                info!(%url, reconnect_attempts = self.supervisor.attempts(), "connection established");
                self.emit_lifecycle(
                    CONNECTION_ESTABLISHED,
                    json!({
                        "url": url,
                        "reconnectAttempts": self.supervisor.attempts(),
                    }),
                );
                for waiter in pending.waiters {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(err) => {
                warn!(url = %pending.url, error = %err, "connect attempt failed");
                self.record_failure(&err);
                for waiter in pending.waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
                match pending.origin {
                    Origin::Manual => self.set_state(ConnectionState::Disconnected),
                    Origin::Reconnect => {
                        let decision = self.supervisor.on_attempt_failed();
                        self.apply(decision);
                    }
                }
            }
        }
    }

    fn link_closed(&mut self, reason: CloseReason) {
        let Some(link) = self.link.take() else {
            return;
        };
        let url = link.url().to_owned();
        drop(link);
        self.metrics.set_connected(false);
        self.reopen_filters = self.channels.close_all();
        warn!(%url, code = reason.code(), detail = reason.detail(), "connection closed unexpectedly");
        self.last_error = Some(format!(
            "connection to {url} closed ({}): {}",
            reason.code(),
            reason.detail()
        ));
        self.emit_lifecycle(
            CONNECTION_TERMINATED,
            json!({
                "url": url,
                "expected": false,
                "code": reason.code(),
                "reason": reason.detail(),
            }),
        );
        let decision = self.supervisor.on_unexpected_close(Instant::now());
        self.apply(decision);
    }

    fn apply(&mut self, decision: Decision) {
        match decision {
            Decision::Retry { attempt, delay } => {
                self.metrics.record_reconnect_attempt();
                self.set_state(ConnectionState::Reconnecting);
                info!(attempt, delay_ms = delay.as_millis(), "scheduling reconnect");
                self.attempt_seq += 1;
                let seq = self.attempt_seq;
                let internal = self.internal_tx.clone();
                self.cancel_reconnect_timer();
                self.reconnect_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = internal.send(Internal::ReconnectDue { attempt: seq });
                }));
            }
            Decision::GiveUp { attempts } => {
                let url = self.url.clone().unwrap_or_default();
                let err = ConnectorError::ConnectionLost {
                    url: url.clone(),
                    attempts,
                };
                warn!(%url, attempts, "giving up on reconnection");
                self.last_error = Some(err.to_string());
                self.reconnect_timer = None;
                self.reopen_filters.clear();
                self.emit_lifecycle(CONNECTION_LOST, json!({ "url": url, "attempts": attempts }));
                self.state = ConnectionState::GivingUp;
                self.shared.send_modify(|shared| {
                    shared.state = ConnectionState::GivingUp;
                    shared.lost = Some(err);
                });
            }
        }
    }

    fn reconnect_due(&mut self, attempt: u64) {
        if attempt != self.attempt_seq || self.state != ConnectionState::Reconnecting {
            debug!(attempt, "ignoring stale reconnect timer");
            return;
        }
        self.reconnect_timer = None;
        let Some(url) = self.url.clone() else {
            return;
        };
        self.start_attempt(url, Origin::Reconnect, None);
    }

    fn disconnect(&mut self) {
        // Invalidate in-flight attempts and timers
        self.attempt_seq += 1;
        self.cancel_reconnect_timer();
        if let Some(pending) = self.pending.take() {
            let err = ConnectorError::connection(&pending.url, "cancelled by disconnect");
            for waiter in pending.waiters {
                let _ = waiter.send(Err(err.clone()));
            }
        }
        self.supervisor.reset();
        self.reopen_filters.clear();

        if let Some(link) = self.link.take() {
            let url = link.url().to_owned();
            link.close();
            self.metrics.set_connected(false);
            let _ = self.channels.close_all();
            info!(%url, "connection terminated");
            self.emit_lifecycle(
                CONNECTION_TERMINATED,
                json!({ "url": url, "expected": true, "code": 1000 }),
            );
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn shutdown(&mut self) {
        self.cancel_reconnect_timer();
        if let Some(pending) = self.pending.take() {
            for waiter in pending.waiters {
                let _ = waiter.send(Err(ConnectorError::Shutdown));
            }
        }
        if let Some(link) = self.link.take() {
            link.close();
            self.metrics.set_connected(false);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.shared.send_modify(|shared| {
            shared.state = state;
            if state != ConnectionState::GivingUp {
                shared.lost = None;
            }
        });
    }

    // ── Outbound ────────────────────────────────────────────────────────

    fn send_message(&mut self, message: &TransportMessage, submitted_at: Instant) -> Result<()> {
        let result = self.admit_and_send(message, submitted_at);
        if let Err(e) = &result {
            if e.is_admission() {
                warn!(code = e.code(), error = %e, kind = %message.kind, "send rejected");
            }
            self.record_failure(e);
        }
        result
    }

    /// Readiness, then size, screening, and rate.
    fn admit_and_send(&mut self, message: &TransportMessage, submitted_at: Instant) -> Result<()> {
        let Some(link) = self.link.as_ref().filter(|l| l.is_ready()) else {
            return Err(ConnectorError::not_connected("send"));
        };
        let frame = message.to_frame()?;
        let _ = self.guard.admit_outbound(&frame)?;
        let bytes = frame.len();
        link.send(frame)?;
        self.metrics.record_transmission(submitted_at.elapsed());
        debug!(kind = %message.kind, bytes, "frame sent");
        Ok(())
    }

    fn publish(&mut self, event: &CanonicalEvent, submitted_at: Instant) -> Result<()> {
        if !self.bridge.is_registered() {
            let err = ConnectorError::not_connected("publish");
            self.record_failure(&err);
            return Err(err);
        }
        let message = self.translator.to_transport(event);
        self.send_message(&message, submitted_at)
    }

    fn record_failure(&mut self, err: &ConnectorError) {
        self.metrics.record_error(err.code());
        self.last_error = Some(err.to_string());
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    fn handle_inbound(&mut self, text: &str) {
        self.metrics.record_received();
        let screening = match self.guard.admit_inbound(text) {
            Ok(screening) => screening,
            Err(e) => {
                warn!(code = e.code(), error = %e, bytes = text.len(), "dropping inbound frame");
                // Screened-out frames still count against their channels
                if matches!(e, ConnectorError::ContentRejected { .. }) {
                    if let Ok(message) = TransportMessage::parse(text) {
                        let _ = self.channels.record_matching(&message.kind, false);
                    }
                }
                return;
            }
        };
        let message = match TransportMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping untranslatable frame");
                return;
            }
        };

        let translated = self.translator.to_canonical(&message);
        let _ = self.channels.record_matching(&message.kind, translated.is_ok());
        match translated {
            Ok(mut event) => {
                if !screening.is_clean() {
                    event = event.with_tag(format!("screening:{}", screening.verdict.as_str()));
                }
                debug!(event_type = %event.event_type(), "frame received");
                self.deliver(&event);
            }
            Err(e) => warn!(kind = %message.kind, error = %e, "dropping untranslatable frame"),
        }
    }

    fn deliver(&self, event: &CanonicalEvent) {
        let _ = self.bridge.dispatch(event);
        let _ = self.bridge.forward(event);
    }

    fn emit_lifecycle(&self, name: &str, data: Value) {
        let data = match data {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        match self.translator.lifecycle_event(name, data) {
            Ok(event) => self.deliver(&event),
            Err(e) => warn!(name, error = %e, "failed to build lifecycle event"),
        }
    }

    fn register_bridge(&mut self, bus: broadcast::Sender<CanonicalEvent>) {
        self.bridge.register(bus);
        info!("event bridge registered");
        self.emit_lifecycle(
            BRIDGE_REGISTERED,
            json!({ "connectorId": self.config.id.as_str() }),
        );
    }

    // ── Status ──────────────────────────────────────────────────────────

    fn status(&mut self) -> ConnectorStatus {
        let limits = self.guard.limits().clone();
        ConnectorStatus {
            connector_id: self.config.id.to_string(),
            url: self.url.clone(),
            state: self.state,
            bridge_registered: self.bridge.is_registered(),
            channels: ChannelTotals {
                total: self.channels.total(),
                open: self.channels.open_count(),
            },
            subscription_count: self.bridge.subscription_count(),
            metrics: self.metrics.snapshot(),
            health: self.metrics.health(),
            reconnect: ReconnectInfo {
                auto_reconnect: self.supervisor.auto_reconnect(),
                attempts: self.supervisor.attempts(),
                max_attempts: self.supervisor.max_attempts(),
                scheduled_delays_ms: self.supervisor.delays_ms().to_vec(),
            },
            rate_window: RateWindowInfo {
                used: self.guard.rate_occupancy(),
                limit: limits.rate_limit_max,
                window_ms: u64::try_from(limits.rate_limit_window.as_millis()).unwrap_or(u64::MAX),
            },
            connection_budget: BudgetInfo {
                in_use: self.budget.in_use(),
                capacity: self.budget.capacity(),
            },
            last_error: self.last_error.clone(),
        }
    }
}
