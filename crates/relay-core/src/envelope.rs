//! Wire and bus envelopes.
//!
//! Two envelope families:
//!
//! - **[`TransportMessage`]**: the raw JSON object carried by one WebSocket
//!   text frame (`{type, data, timestamp?, id?}`).
//! - **[`CanonicalEvent`]**: the structured event the connector exchanges
//!   with the event bus and local subscribers.
//!
//! A `CanonicalEvent` can only be obtained through [`CanonicalEventBuilder::build`]
//! or deserialization, both of which validate the required fields. There is
//! no way to observe a partially built event.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::{ConnectorError, Result};
use crate::ids::EventId;

/// Current canonical event schema version.
pub const CANONICAL_EVENT_VERSION: u32 = 1;

/// Irregular past-tense suffixes accepted without a warning.
const IRREGULAR_PAST_TENSE: &[&str] = &["sent", "lost", "left", "read", "done", "set", "made"];

/// Current time as an RFC 3339 UTC string with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ─────────────────────────────────────────────────────────────────────────────
// TransportMessage
// ─────────────────────────────────────────────────────────────────────────────

/// One wire frame exchanged with the remote endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Message category (`"chat_message"`, `"user_joined"`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary JSON object payload.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Sender-supplied timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Sender-supplied message ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl TransportMessage {
    /// Create a message with a type and payload, no timestamp or ID.
    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: None,
            id: None,
        }
    }

    /// Build a message from a `serde_json::json!` object literal.
    ///
    /// Non-object values produce an empty payload.
    pub fn from_json(kind: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(kind, data)
    }

    /// Parse a raw text frame.
    pub fn parse(frame: &str) -> Result<Self> {
        let msg: Self = serde_json::from_str(frame)?;
        if msg.kind.trim().is_empty() {
            return Err(ConnectorError::Translation(
                "transport message has an empty type".into(),
            ));
        }
        Ok(msg)
    }

    /// Serialize to a text frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Read a string field from `data`, accepting camelCase or snake_case keys.
    pub fn data_str(&self, camel: &str, snake: &str) -> Option<&str> {
        self.data
            .get(camel)
            .or_else(|| self.data.get(snake))
            .and_then(Value::as_str)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CanonicalEvent
// ─────────────────────────────────────────────────────────────────────────────

/// Bus-facing structured event. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CanonicalEventWire")]
pub struct CanonicalEvent {
    event_id: EventId,
    event_type: String,
    version: u32,
    timestamp: String,
    aggregate_id: String,
    payload: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
}

impl CanonicalEvent {
    /// Start building an event.
    pub fn builder(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
    ) -> CanonicalEventBuilder {
        CanonicalEventBuilder::new(event_type, aggregate_id)
    }

    /// Event ID.
    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Event type, conventionally past tense.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Schema version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// RFC 3339 timestamp.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Aggregate the event belongs to.
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// Event payload.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Component that produced the event.
    pub fn source_component(&self) -> Option<&str> {
        self.source_component.as_deref()
    }

    /// Correlation ID linking related events.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Tags attached to the event.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether the event carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Return a copy of this event with one more tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.has_tag(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Check all required fields are present and non-empty.
    pub fn is_valid(&self) -> bool {
        missing_field(
            self.event_id.as_str(),
            &self.event_type,
            &self.timestamp,
            &self.aggregate_id,
            self.version,
        )
        .is_none()
    }
}

/// Deserialization shape; converted through validation into [`CanonicalEvent`].
#[derive(Deserialize)]
struct CanonicalEventWire {
    event_id: EventId,
    event_type: String,
    version: u32,
    timestamp: String,
    aggregate_id: String,
    #[serde(default)]
    payload: Map<String, Value>,
    #[serde(default)]
    source_component: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

impl TryFrom<CanonicalEventWire> for CanonicalEvent {
    type Error = ConnectorError;

    fn try_from(wire: CanonicalEventWire) -> Result<Self> {
        CanonicalEventBuilder {
            event_id: Some(wire.event_id),
            event_type: wire.event_type,
            version: wire.version,
            timestamp: Some(wire.timestamp),
            aggregate_id: wire.aggregate_id,
            payload: wire.payload,
            source_component: wire.source_component,
            correlation_id: wire.correlation_id,
            tags: wire.tags,
        }
        .build()
    }
}

fn missing_field(
    event_id: &str,
    event_type: &str,
    timestamp: &str,
    aggregate_id: &str,
    version: u32,
) -> Option<&'static str> {
    if event_id.trim().is_empty() {
        Some("event_id")
    } else if event_type.trim().is_empty() {
        Some("event_type")
    } else if timestamp.trim().is_empty() {
        Some("timestamp")
    } else if aggregate_id.trim().is_empty() {
        Some("aggregate_id")
    } else if version == 0 {
        Some("version")
    } else {
        None
    }
}

/// Whether an event type reads as past tense (`message_received`, `user_left`).
pub fn is_past_tense(event_type: &str) -> bool {
    let last = event_type.rsplit(['_', '.']).next().unwrap_or(event_type);
    last.ends_with("ed") || IRREGULAR_PAST_TENSE.contains(&last)
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`CanonicalEvent`]. Validation happens in [`build`](Self::build).
#[derive(Clone, Debug)]
pub struct CanonicalEventBuilder {
    event_id: Option<EventId>,
    event_type: String,
    version: u32,
    timestamp: Option<String>,
    aggregate_id: String,
    payload: Map<String, Value>,
    source_component: Option<String>,
    correlation_id: Option<String>,
    tags: Vec<String>,
}

impl CanonicalEventBuilder {
    fn new(event_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            event_id: None,
            event_type: event_type.into(),
            version: CANONICAL_EVENT_VERSION,
            timestamp: None,
            aggregate_id: aggregate_id.into(),
            payload: Map::new(),
            source_component: None,
            correlation_id: None,
            tags: Vec::new(),
        }
    }

    /// Use an explicit event ID instead of a generated one.
    #[must_use]
    pub fn event_id(mut self, id: impl Into<EventId>) -> Self {
        self.event_id = Some(id.into());
        self
    }

    /// Use an explicit timestamp instead of now.
    #[must_use]
    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Set the producing component.
    #[must_use]
    pub fn source_component(mut self, source: impl Into<String>) -> Self {
        self.source_component = Some(source.into());
        self
    }

    /// Set the correlation ID.
    #[must_use]
    pub fn correlation_id(mut self, id: Option<String>) -> Self {
        self.correlation_id = id;
        self
    }

    /// Append a tag (duplicates are ignored).
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Validate and produce the event.
    pub fn build(self) -> Result<CanonicalEvent> {
        let event_id = self.event_id.unwrap_or_default();
        let timestamp = self.timestamp.unwrap_or_else(now_timestamp);
        if let Some(field) = missing_field(
            event_id.as_str(),
            &self.event_type,
            &timestamp,
            &self.aggregate_id,
            self.version,
        ) {
            return Err(ConnectorError::Translation(format!(
                "canonical event is missing required field `{field}`"
            )));
        }
        if !is_past_tense(&self.event_type) {
            warn!(event_type = %self.event_type, "canonical event type is not past tense");
        }
        Ok(CanonicalEvent {
            event_id,
            event_type: self.event_type,
            version: self.version,
            timestamp,
            aggregate_id: self.aggregate_id,
            payload: self.payload,
            source_component: self.source_component,
            correlation_id: self.correlation_id,
            tags: self.tags,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
