//! Chat-domain sub-mapping.
//!
//! Recognizes chat messages and presence events among inbound transport
//! frames, supplies their aggregate ID and tags, and offers typed views over
//! the resulting canonical events. Anything unrecognized stays on the
//! generic path.

use relay_core::{CanonicalEvent, TransportMessage};
use serde::Serialize;

/// Generic chat envelope type carrying its category in `data.messageType`.
pub const CHAT_ENVELOPE: &str = "chat_message";
/// Generic presence envelope type carrying its category in `data.event`.
pub const PRESENCE_ENVELOPE: &str = "presence";

/// Tag marking chat-message events.
pub const CHAT_TAG: &str = "chat";
/// Tag marking presence events.
pub const PRESENCE_TAG: &str = "presence";

/// Recognized chat message categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMessageKind {
    /// Message typed by a user.
    UserMessage,
    /// Message generated by the system.
    SystemMessage,
    /// Reply produced by an assistant.
    AiResponse,
    /// Status line (e.g. "processing").
    StatusUpdate,
}

impl ChatMessageKind {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::SystemMessage => "system_message",
            Self::AiResponse => "ai_response",
            Self::StatusUpdate => "status_update",
        }
    }

    /// Parse a wire name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user_message" => Some(Self::UserMessage),
            "system_message" => Some(Self::SystemMessage),
            "ai_response" => Some(Self::AiResponse),
            "status_update" => Some(Self::StatusUpdate),
            _ => None,
        }
    }
}

/// Recognized presence categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    /// A user entered a room.
    UserJoined,
    /// A user left a room.
    UserLeft,
    /// A user started typing.
    TypingStarted,
    /// A user stopped typing.
    TypingStopped,
}

impl PresenceKind {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserJoined => "user_joined",
            Self::UserLeft => "user_left",
            Self::TypingStarted => "typing_started",
            Self::TypingStopped => "typing_stopped",
        }
    }

    /// Parse a wire name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user_joined" => Some(Self::UserJoined),
            "user_left" => Some(Self::UserLeft),
            "typing_started" => Some(Self::TypingStarted),
            "typing_stopped" => Some(Self::TypingStopped),
            _ => None,
        }
    }
}

/// Domain classification of an inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DomainCategory {
    Chat(ChatMessageKind),
    Presence(PresenceKind),
}

/// Aggregate and tags contributed by the sub-mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DomainMapping {
    pub aggregate_id: Option<String>,
    pub tags: [&'static str; 2],
}

pub(crate) fn classify(msg: &TransportMessage) -> Option<DomainCategory> {
    if msg.kind == CHAT_ENVELOPE {
        let kind = msg
            .data_str("messageType", "message_type")
            .unwrap_or(ChatMessageKind::UserMessage.as_str());
        return ChatMessageKind::parse(kind).map(DomainCategory::Chat);
    }
    if msg.kind == PRESENCE_ENVELOPE {
        return msg
            .data_str("event", "event")
            .and_then(PresenceKind::parse)
            .map(DomainCategory::Presence);
    }
    ChatMessageKind::parse(&msg.kind)
        .map(DomainCategory::Chat)
        .or_else(|| PresenceKind::parse(&msg.kind).map(DomainCategory::Presence))
}

pub(crate) fn map_domain(msg: &TransportMessage) -> Option<DomainMapping> {
    match classify(msg)? {
        DomainCategory::Chat(kind) => Some(DomainMapping {
            aggregate_id: msg
                .data_str("userId", "user_id")
                .filter(|id| !id.is_empty())
                .map(|id| format!("chat:{id}")),
            tags: [CHAT_TAG, kind.as_str()],
        }),
        DomainCategory::Presence(kind) => Some(DomainMapping {
            aggregate_id: msg
                .data_str("roomId", "room_id")
                .filter(|id| !id.is_empty())
                .map(|id| format!("room:{id}")),
            tags: [PRESENCE_TAG, kind.as_str()],
        }),
    }
}

fn payload_str(event: &CanonicalEvent, camel: &str, snake: &str) -> Option<String> {
    event
        .payload()
        .get(camel)
        .or_else(|| event.payload().get(snake))
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
}

/// Typed view of a chat-message event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message category.
    pub kind: ChatMessageKind,
    /// Sender.
    pub user_id: Option<String>,
    /// Room the message was posted in.
    pub room_id: Option<String>,
    /// Message text.
    pub content: Option<String>,
    /// Originating event.
    pub event_id: String,
}

impl ChatMessage {
    /// Extract a chat message from an event tagged by the sub-mapping.
    pub fn from_event(event: &CanonicalEvent) -> Option<Self> {
        let tags = event.tags();
        let position = tags.iter().position(|t| t == CHAT_TAG)?;
        let kind = tags
            .iter()
            .skip(position + 1)
            .find_map(|t| ChatMessageKind::parse(t))?;
        Some(Self {
            kind,
            user_id: payload_str(event, "userId", "user_id"),
            room_id: payload_str(event, "roomId", "room_id"),
            content: payload_str(event, "content", "content")
                .or_else(|| payload_str(event, "message", "text")),
            event_id: event.event_id().to_string(),
        })
    }
}

/// Typed view of a presence event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    /// Presence category.
    pub kind: PresenceKind,
    /// User whose presence changed.
    pub user_id: Option<String>,
    /// Room affected.
    pub room_id: Option<String>,
    /// Originating event.
    pub event_id: String,
}

impl PresenceEvent {
    /// Extract a presence event from an event tagged by the sub-mapping.
    pub fn from_event(event: &CanonicalEvent) -> Option<Self> {
        let tags = event.tags();
        let position = tags.iter().position(|t| t == PRESENCE_TAG)?;
        let kind = tags
            .iter()
            .skip(position + 1)
            .find_map(|t| PresenceKind::parse(t))?;
        Some(Self {
            kind,
            user_id: payload_str(event, "userId", "user_id"),
            room_id: payload_str(event, "roomId", "room_id"),
            event_id: event.event_id().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_envelope_defaults_to_user_message() {
        let msg = TransportMessage::from_json("chat_message", json!({"userId": "u1"}));
        assert_eq!(
            classify(&msg),
            Some(DomainCategory::Chat(ChatMessageKind::UserMessage))
        );
    }

    #[test]
    fn chat_envelope_reads_message_type() {
        let msg = TransportMessage::from_json("chat_message", json!({"messageType": "ai_response"}));
        assert_eq!(
            classify(&msg),
            Some(DomainCategory::Chat(ChatMessageKind::AiResponse))
        );
        let snake = TransportMessage::from_json("chat_message", json!({"message_type": "status_update"}));
        assert_eq!(
            classify(&snake),
            Some(DomainCategory::Chat(ChatMessageKind::StatusUpdate))
        );
    }

    #[test]
    fn chat_envelope_unknown_type_is_generic() {
        let msg = TransportMessage::from_json("chat_message", json!({"messageType": "sticker"}));
        assert_eq!(classify(&msg), None);
        assert_eq!(map_domain(&msg), None);
    }

    #[test]
    fn direct_kinds_are_recognized() {
        for kind in ["user_message", "system_message", "ai_response", "status_update"] {
            let msg = TransportMessage::from_json(kind, json!({}));
            assert!(matches!(classify(&msg), Some(DomainCategory::Chat(_))), "{kind}");
        }
        for kind in ["user_joined", "user_left", "typing_started", "typing_stopped"] {
            let msg = TransportMessage::from_json(kind, json!({}));
            assert!(matches!(classify(&msg), Some(DomainCategory::Presence(_))), "{kind}");
        }
    }

    #[test]
    fn presence_envelope_reads_event() {
        let msg = TransportMessage::from_json("presence", json!({"event": "typing_started"}));
        assert_eq!(
            classify(&msg),
            Some(DomainCategory::Presence(PresenceKind::TypingStarted))
        );
        let missing = TransportMessage::from_json("presence", json!({}));
        assert_eq!(classify(&missing), None);
    }

    #[test]
    fn unrelated_kind_is_generic() {
        let msg = TransportMessage::from_json("challenge_update", json!({"userId": "u1"}));
        assert_eq!(map_domain(&msg), None);
    }

    #[test]
    fn chat_aggregate_uses_user_id() {
        let msg = TransportMessage::from_json("chat_message", json!({"userId": "u1"}));
        let mapping = map_domain(&msg).unwrap();
        assert_eq!(mapping.aggregate_id.as_deref(), Some("chat:u1"));
        assert_eq!(mapping.tags, ["chat", "user_message"]);
    }

    #[test]
    fn chat_without_user_has_no_aggregate() {
        let msg = TransportMessage::from_json("system_message", json!({"content": "hi"}));
        assert_eq!(map_domain(&msg).unwrap().aggregate_id, None);
    }

    #[test]
    fn presence_aggregate_uses_room_id() {
        let msg = TransportMessage::from_json("user_joined", json!({"userId": "u1", "roomId": "r9"}));
        let mapping = map_domain(&msg).unwrap();
        assert_eq!(mapping.aggregate_id.as_deref(), Some("room:r9"));
        assert_eq!(mapping.tags, ["presence", "user_joined"]);

        let roomless = TransportMessage::from_json("user_left", json!({"userId": "u1"}));
        assert_eq!(map_domain(&roomless).unwrap().aggregate_id, None);
    }

    #[test]
    fn typed_views_from_tags() {
        let event = CanonicalEvent::builder("websocket_chat_message_received", "chat:u1")
            .payload(json!({"userId": "u1", "content": "hello"}).as_object().unwrap().clone())
            .tag("chat")
            .tag("user_message")
            .build()
            .unwrap();
        let chat = ChatMessage::from_event(&event).unwrap();
        assert_eq!(chat.kind, ChatMessageKind::UserMessage);
        assert_eq!(chat.user_id.as_deref(), Some("u1"));
        assert_eq!(chat.content.as_deref(), Some("hello"));
        assert!(PresenceEvent::from_event(&event).is_none());
    }

    #[test]
    fn typed_view_requires_known_kind() {
        let event = CanonicalEvent::builder("websocket_thing_received", "c1")
            .tag("chat")
            .tag("sticker")
            .build()
            .unwrap();
        assert!(ChatMessage::from_event(&event).is_none());
    }

    #[test]
    fn kind_names_roundtrip() {
        for kind in [
            ChatMessageKind::UserMessage,
            ChatMessageKind::SystemMessage,
            ChatMessageKind::AiResponse,
            ChatMessageKind::StatusUpdate,
        ] {
            assert_eq!(ChatMessageKind::parse(kind.as_str()), Some(kind));
        }
        for kind in [
            PresenceKind::UserJoined,
            PresenceKind::UserLeft,
            PresenceKind::TypingStarted,
            PresenceKind::TypingStopped,
        ] {
            assert_eq!(PresenceKind::parse(kind.as_str()), Some(kind));
        }
    }
}
