//! Protocol translator: [`TransportMessage`] ⇄ [`CanonicalEvent`].
//!
//! Inbound frames become `<source>_<type>_received` events whose payload is
//! the frame's `data`. Outbound events lose exactly one `_received` suffix and
//! at most one known prefix, so `to_transport(to_canonical(m))` restores the
//! original type and data.

pub mod chat;

use relay_core::{CanonicalEvent, ConnectorId, Result, TransportMessage};
use serde_json::{Map, Value};

pub use chat::{ChatMessage, ChatMessageKind, PresenceEvent, PresenceKind};

/// Default source prefix for inbound event types.
pub const DEFAULT_SOURCE: &str = "websocket";
/// Suffix appended to every inbound event type.
pub const RECEIVED_SUFFIX: &str = "_received";
/// Tag carried by every lifecycle event.
pub const LIFECYCLE_TAG: &str = "lifecycle";

/// Lifecycle event emitted when a link becomes ready.
pub const CONNECTION_ESTABLISHED: &str = "connection_established";
/// Lifecycle event emitted when a link closes, expectedly or not.
pub const CONNECTION_TERMINATED: &str = "connection_terminated";
/// Lifecycle event emitted when reconnection gives up.
pub const CONNECTION_LOST: &str = "connection_lost";
/// Lifecycle event emitted when the bus handshake completes.
pub const BRIDGE_REGISTERED: &str = "bridge_registered";

/// Prefixes stripped on the outbound path after the configured source.
const KNOWN_PREFIXES: &[&str] = &["websocket_", "chat_", "aggregator_"];

/// Bidirectional envelope mapping for one connector.
#[derive(Clone, Debug)]
pub struct ProtocolTranslator {
    connector_id: ConnectorId,
    source: String,
}

impl ProtocolTranslator {
    /// Create a translator for the given connector and source prefix.
    pub fn new(connector_id: ConnectorId, source: impl Into<String>) -> Self {
        Self {
            connector_id,
            source: source.into(),
        }
    }

    /// Connector this translator stamps events with.
    pub fn connector_id(&self) -> &ConnectorId {
        &self.connector_id
    }

    /// Source prefix for inbound event types.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Map an inbound transport message to a canonical event.
    pub fn to_canonical(&self, msg: &TransportMessage) -> Result<CanonicalEvent> {
        let event_type = format!("{}_{}{RECEIVED_SUFFIX}", self.source, msg.kind);
        let mapping = chat::map_domain(msg);
        let aggregate_id = mapping
            .as_ref()
            .and_then(|m| m.aggregate_id.clone())
            .unwrap_or_else(|| self.connector_id.to_string());

        let mut builder = CanonicalEvent::builder(event_type, aggregate_id)
            .payload(msg.data.clone())
            .source_component(self.connector_id.as_str());
        if let Some(id) = msg.id.as_ref().filter(|id| !id.trim().is_empty()) {
            builder = builder.event_id(id.as_str());
        }
        if let Some(ts) = msg.timestamp.as_ref().filter(|ts| !ts.trim().is_empty()) {
            builder = builder.timestamp(ts.as_str());
        }
        if let Some(mapping) = mapping {
            builder = builder
                .correlation_id(msg.data_str("correlationId", "correlation_id").map(str::to_owned));
            for tag in mapping.tags {
                builder = builder.tag(tag);
            }
        }
        builder.build()
    }

    /// Parse a raw text frame and map it to a canonical event.
    pub fn frame_to_canonical(&self, frame: &str) -> Result<CanonicalEvent> {
        let msg = TransportMessage::parse(frame)?;
        self.to_canonical(&msg)
    }

    /// Map a canonical event to an outbound transport message.
    pub fn to_transport(&self, event: &CanonicalEvent) -> TransportMessage {
        TransportMessage {
            kind: self.transport_type(event.event_type()).to_owned(),
            data: event.payload().clone(),
            timestamp: Some(event.timestamp().to_owned()),
            id: Some(event.event_id().to_string()),
        }
    }

    /// Strip one `_received` suffix and at most one known prefix.
    pub fn transport_type<'a>(&self, event_type: &'a str) -> &'a str {
        let base = event_type.strip_suffix(RECEIVED_SUFFIX).unwrap_or(event_type);
        let source_prefix = format!("{}_", self.source);
        std::iter::once(source_prefix.as_str())
            .chain(KNOWN_PREFIXES.iter().copied())
            .find_map(|prefix| base.strip_prefix(prefix).filter(|rest| !rest.is_empty()))
            .unwrap_or(base)
    }

    /// Build a lifecycle event (`connection_established`, ...) for this connector.
    pub fn lifecycle_event(&self, name: &str, data: Map<String, Value>) -> Result<CanonicalEvent> {
        CanonicalEvent::builder(name, self.connector_id.as_str())
            .payload(data)
            .source_component(self.connector_id.as_str())
            .tag(self.connector_id.as_str())
            .tag(LIFECYCLE_TAG)
            .build()
    }
}

/// Whether a JSON value is a well-formed canonical event. Never errors.
pub fn validate_canonical_event(value: &Value) -> bool {
    serde_json::from_value::<CanonicalEvent>(value.clone()).is_ok_and(|event| event.is_valid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use relay_core::ConnectorError;
    use serde_json::json;

    fn translator() -> ProtocolTranslator {
        ProtocolTranslator::new(ConnectorId::parse("conn-1").unwrap(), DEFAULT_SOURCE)
    }

    #[test]
    fn inbound_event_type_and_defaults() {
        let msg = TransportMessage::from_json("status", json!({"ok": true}));
        let event = translator().to_canonical(&msg).unwrap();
        assert_eq!(event.event_type(), "websocket_status_received");
        assert_eq!(event.aggregate_id(), "conn-1");
        assert_eq!(event.source_component(), Some("conn-1"));
        assert_eq!(event.payload()["ok"], true);
        assert_eq!(event.version(), 1);
        assert!(!event.event_id().as_str().is_empty());
        assert!(event.timestamp().ends_with('Z'));
        assert!(event.tags().is_empty());
    }

    #[test]
    fn inbound_keeps_id_and_timestamp() {
        let mut msg = TransportMessage::from_json("status", json!({}));
        msg.id = Some("m-42".into());
        msg.timestamp = Some("2026-01-01T00:00:00.000Z".into());
        let event = translator().to_canonical(&msg).unwrap();
        assert_eq!(event.event_id().as_str(), "m-42");
        assert_eq!(event.timestamp(), "2026-01-01T00:00:00.000Z");
    }

    #[test]
    fn chat_scenario() {
        let msg = TransportMessage::from_json(
            "chat_message",
            json!({"userId": "u1", "content": "hi", "correlationId": "c-7"}),
        );
        let event = translator().to_canonical(&msg).unwrap();
        assert_eq!(event.event_type(), "websocket_chat_message_received");
        assert_eq!(event.aggregate_id(), "chat:u1");
        assert_eq!(event.correlation_id(), Some("c-7"));
        assert_eq!(event.tags(), ["chat", "user_message"]);
        let chat = ChatMessage::from_event(&event).unwrap();
        assert_eq!(chat.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn presence_scenario() {
        let msg = TransportMessage::from_json("user_joined", json!({"userId": "u1", "roomId": "lobby"}));
        let event = translator().to_canonical(&msg).unwrap();
        assert_eq!(event.aggregate_id(), "room:lobby");
        let presence = PresenceEvent::from_event(&event).unwrap();
        assert_eq!(presence.kind, PresenceKind::UserJoined);
        assert_eq!(presence.room_id.as_deref(), Some("lobby"));
    }

    #[test]
    fn generic_path_ignores_correlation() {
        let msg = TransportMessage::from_json("status", json!({"correlationId": "c-1"}));
        let event = translator().to_canonical(&msg).unwrap();
        assert_eq!(event.correlation_id(), None);
    }

    #[test]
    fn outbound_strips_suffix_and_prefix() {
        let t = translator();
        assert_eq!(t.transport_type("websocket_chat_message_received"), "chat_message");
        assert_eq!(t.transport_type("chat_typing_received"), "typing");
        assert_eq!(t.transport_type("aggregator_score_received"), "score");
        assert_eq!(t.transport_type("connection_established"), "connection_established");
        assert_eq!(t.transport_type("websocket_websocket_ping_received"), "websocket_ping");
    }

    #[test]
    fn outbound_keeps_bare_prefix() {
        assert_eq!(translator().transport_type("websocket_"), "websocket_");
    }

    #[test]
    fn custom_source_is_stripped_first() {
        let t = ProtocolTranslator::new(ConnectorId::parse("c").unwrap(), "feed");
        let msg = TransportMessage::from_json("chat_message", json!({"userId": "u"}));
        let event = t.to_canonical(&msg).unwrap();
        assert_eq!(event.event_type(), "feed_chat_message_received");
        assert_eq!(t.to_transport(&event).kind, "chat_message");
    }

    #[test]
    fn round_trip_preserves_type_and_data() {
        let t = translator();
        for kind in ["chat_message", "websocket_ping", "item_received", "user_left", "x"] {
            let msg = TransportMessage::from_json(kind, json!({"n": 1, "nested": {"a": [1, 2]}}));
            let back = t.to_transport(&t.to_canonical(&msg).unwrap());
            assert_eq!(back.kind, kind);
            assert_eq!(back.data, msg.data);
        }
    }

    #[test]
    fn to_transport_carries_id_and_timestamp() {
        let t = translator();
        let event = CanonicalEvent::builder("websocket_status_received", "conn-1")
            .event_id("e-1")
            .timestamp("2026-01-01T00:00:00.000Z")
            .build()
            .unwrap();
        let msg = t.to_transport(&event);
        assert_eq!(msg.id.as_deref(), Some("e-1"));
        assert_eq!(msg.timestamp.as_deref(), Some("2026-01-01T00:00:00.000Z"));
    }

    #[test]
    fn malformed_frames_are_translation_errors() {
        let t = translator();
        assert_matches!(t.frame_to_canonical("{oops"), Err(ConnectorError::Translation(_)));
        assert_matches!(
            t.frame_to_canonical(r#"{"data":{}}"#),
            Err(ConnectorError::Translation(_))
        );
        assert_matches!(
            t.frame_to_canonical(r#"{"type":"  "}"#),
            Err(ConnectorError::Translation(_))
        );
    }

    #[test]
    fn lifecycle_event_shape() {
        let event = translator()
            .lifecycle_event("connection_established", Map::new())
            .unwrap();
        assert_eq!(event.event_type(), "connection_established");
        assert_eq!(event.aggregate_id(), "conn-1");
        assert_eq!(event.tags(), ["conn-1", "lifecycle"]);
    }

    #[test]
    fn validate_accepts_well_formed() {
        let event = translator()
            .to_canonical(&TransportMessage::from_json("status", json!({})))
            .unwrap();
        let value = serde_json::to_value(&event).unwrap();
        assert!(validate_canonical_event(&value));
    }

    #[test]
    fn validate_rejects_missing_or_empty_fields() {
        assert!(!validate_canonical_event(&json!({})));
        assert!(!validate_canonical_event(&json!("text")));
        assert!(!validate_canonical_event(&json!({
            "event_id": "e", "event_type": "", "version": 1,
            "timestamp": "t", "aggregate_id": "a", "payload": {}
        })));
        assert!(!validate_canonical_event(&json!({
            "event_id": "e", "event_type": "x_created", "version": 0,
            "timestamp": "t", "aggregate_id": "a", "payload": {}
        })));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn data() -> impl Strategy<Value = Map<String, Value>> {
            proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..6)
                .prop_map(|m| m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
        }

        proptest! {
            #[test]
            fn transport_round_trip(
                kind in "[a-z][a-z_]{0,20}".prop_filter("ambiguous suffix", |k| !k.contains(RECEIVED_SUFFIX)),
                data in data(),
                id in "[a-z0-9-]{1,12}",
            ) {
                let t = translator();
                let msg = TransportMessage {
                    kind: kind.clone(),
                    data,
                    timestamp: Some("2026-03-01T12:00:00.000Z".into()),
                    id: Some(id),
                };
                let back = t.to_transport(&t.to_canonical(&msg).unwrap());
                prop_assert_eq!(back, msg);
            }

            #[test]
            fn validate_never_panics(s in ".{0,64}") {
                let _ = validate_canonical_event(&Value::String(s));
            }
        }
    }
}
