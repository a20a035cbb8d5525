//! Real-time event contracts.
//!
//! All server-originated events share one flat JSON structure:
//!
//! ```json
//! {
//!     "type": "message.new",
//!     "timestamp": "2026-08-29T10:30:00Z",
//!     "user_id": "uuid",
//!     ...event fields...
//! }
//! ```
//!
//! Event names follow the "object.action" convention, and serialization is
//! centralized in `to_broadcast_payload` so handlers never hand-build JSON.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{ConversationStatus, ConversationType, Priority, UserRole};
use crate::websocket::registry::{Room, SessionRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub user_id: Uuid,
    pub role: UserRole,
}

/// Client → server events. The connection's authenticated identity is
/// attached server-side; none of these payloads can assert a user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// The outer "type" tag names the event, so the conversation's own kind
    /// travels as `conversation_type` here.
    #[serde(rename = "conversation.create")]
    ConversationCreate {
        conversation_type: ConversationType,
        title: Option<String>,
        #[serde(default)]
        participants: Vec<ParticipantRef>,
        patient_id: Option<Uuid>,
        priority: Option<Priority>,
        #[serde(default)]
        tags: Vec<String>,
    },

    #[serde(rename = "conversation.update")]
    ConversationUpdate {
        conversation_id: Uuid,
        title: Option<String>,
        status: Option<ConversationStatus>,
        priority: Option<Priority>,
        tags: Option<Vec<String>>,
    },

    #[serde(rename = "conversation.join")]
    ConversationJoin { conversation_id: Uuid },

    #[serde(rename = "conversation.leave")]
    ConversationLeave { conversation_id: Uuid },

    #[serde(rename = "conversation.read")]
    ConversationRead { conversation_id: Uuid },

    #[serde(rename = "message.send")]
    MessageSend {
        conversation_id: Uuid,
        text: Option<String>,
        #[serde(default)]
        mentions: Vec<Uuid>,
        priority: Option<Priority>,
        thread_id: Option<Uuid>,
        parent_message_id: Option<Uuid>,
    },

    #[serde(rename = "message.read")]
    MessageRead { message_id: Uuid },

    #[serde(rename = "reaction.add")]
    ReactionAdd { message_id: Uuid, emoji: String },

    #[serde(rename = "reaction.remove")]
    ReactionRemove { message_id: Uuid, emoji: String },

    #[serde(rename = "typing.start")]
    TypingStart { conversation_id: Uuid },

    #[serde(rename = "typing.stop")]
    TypingStop { conversation_id: Uuid },

    #[serde(rename = "presence.update")]
    PresenceUpdate { status: String },

    #[serde(rename = "file.progress")]
    FileProgress {
        conversation_id: Uuid,
        file_id: Uuid,
        progress: u8,
    },

    #[serde(rename = "file.complete")]
    FileComplete {
        conversation_id: Uuid,
        file_id: Uuid,
    },
}

/// Server → client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "conversation.created")]
    ConversationCreated { conversation_id: Uuid },

    #[serde(rename = "conversation.updated")]
    ConversationUpdated {
        conversation_id: Uuid,
        updated_fields: Vec<String>,
    },

    #[serde(rename = "conversation.participant_added")]
    ParticipantAdded {
        conversation_id: Uuid,
        participant_id: Uuid,
        role: UserRole,
    },

    #[serde(rename = "conversation.participant_removed")]
    ParticipantRemoved {
        conversation_id: Uuid,
        participant_id: Uuid,
    },

    #[serde(rename = "conversation.snapshot")]
    Snapshot { conversations: Vec<Value> },

    #[serde(rename = "message.new")]
    MessageNew {
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        thread_id: Option<Uuid>,
        priority: Priority,
    },

    #[serde(rename = "message.edited")]
    MessageEdited {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    #[serde(rename = "message.deleted")]
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    #[serde(rename = "message.read")]
    MessageReadBy {
        conversation_id: Uuid,
        message_id: Uuid,
        reader_id: Uuid,
    },

    #[serde(rename = "thread.created")]
    ThreadCreated {
        conversation_id: Uuid,
        thread_id: Uuid,
    },

    #[serde(rename = "reaction.added")]
    ReactionAdded { message_id: Uuid, emoji: String },

    #[serde(rename = "reaction.removed")]
    ReactionRemoved { message_id: Uuid, emoji: String },

    #[serde(rename = "typing.started")]
    TypingStarted { conversation_id: Uuid },

    #[serde(rename = "typing.stopped")]
    TypingStopped { conversation_id: Uuid },

    #[serde(rename = "presence.changed")]
    PresenceChanged { subject_id: Uuid, status: String },

    #[serde(rename = "file.progress")]
    FileProgress {
        conversation_id: Uuid,
        file_id: Uuid,
        progress: u8,
    },

    #[serde(rename = "file.complete")]
    FileComplete {
        conversation_id: Uuid,
        file_id: Uuid,
    },

    #[serde(rename = "error")]
    Error {
        code: &'static str,
        message: String,
    },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConversationCreated { .. } => "conversation.created",
            Self::ConversationUpdated { .. } => "conversation.updated",
            Self::ParticipantAdded { .. } => "conversation.participant_added",
            Self::ParticipantRemoved { .. } => "conversation.participant_removed",
            Self::Snapshot { .. } => "conversation.snapshot",
            Self::MessageNew { .. } => "message.new",
            Self::MessageEdited { .. } => "message.edited",
            Self::MessageDeleted { .. } => "message.deleted",
            Self::MessageReadBy { .. } => "message.read",
            Self::ThreadCreated { .. } => "thread.created",
            Self::ReactionAdded { .. } => "reaction.added",
            Self::ReactionRemoved { .. } => "reaction.removed",
            Self::TypingStarted { .. } => "typing.started",
            Self::TypingStopped { .. } => "typing.stopped",
            Self::PresenceChanged { .. } => "presence.changed",
            Self::FileProgress { .. } => "file.progress",
            Self::FileComplete { .. } => "file.complete",
            Self::Error { .. } => "error",
        }
    }

    /// The ONLY place event serialization happens. Produces the flat
    /// structure documented at the top of this module.
    pub fn to_broadcast_payload(&self, user_id: Uuid) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(ref mut map) = value {
            map.insert(
                "timestamp".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
            map.insert("user_id".to_string(), serde_json::json!(user_id));
        }
        serde_json::to_string(&value)
    }
}

/// Canonical fan-out path: serialize once, deliver to the room. Called only
/// after the corresponding persistence has committed.
pub async fn broadcast_event(
    registry: &SessionRegistry,
    room: Room,
    actor_id: Uuid,
    event: ServerEvent,
) {
    match event.to_broadcast_payload(actor_id) {
        Ok(payload) => {
            registry
                .broadcast(room, axum::extract::ws::Message::Text(payload))
                .await;
        }
        Err(e) => {
            tracing::error!(error = %e, event = event.event_type(), "failed to serialize event");
        }
    }
}

/// Fan-out that skips the acting user's own connections.
pub async fn broadcast_event_except(
    registry: &SessionRegistry,
    room: Room,
    actor_id: Uuid,
    event: ServerEvent,
) {
    match event.to_broadcast_payload(actor_id) {
        Ok(payload) => {
            registry
                .broadcast_except(room, actor_id, axum::extract::ws::Message::Text(payload))
                .await;
        }
        Err(e) => {
            tracing::error!(error = %e, event = event.event_type(), "failed to serialize event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_flat_with_type_timestamp_and_actor() {
        let conversation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let event = ServerEvent::TypingStarted { conversation_id };

        let payload = event.to_broadcast_payload(user_id).unwrap();
        let parsed: Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(parsed["type"], "typing.started");
        assert_eq!(parsed["conversation_id"], conversation_id.to_string());
        assert_eq!(parsed["user_id"], user_id.to_string());
        assert!(parsed["timestamp"].is_string());
    }

    #[test]
    fn thread_created_names_the_root_as_thread_id() {
        let conversation_id = Uuid::new_v4();
        let root_id = Uuid::new_v4();
        let event = ServerEvent::ThreadCreated {
            conversation_id,
            thread_id: root_id,
        };

        let payload = event.to_broadcast_payload(Uuid::new_v4()).unwrap();
        let parsed: Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(parsed["type"], "thread.created");
        assert_eq!(parsed["thread_id"], root_id.to_string());
        assert_eq!(parsed["conversation_id"], conversation_id.to_string());
    }

    #[test]
    fn client_events_parse_by_type_tag() {
        let conversation_id = Uuid::new_v4();
        let raw = serde_json::json!({
            "type": "typing.start",
            "conversation_id": conversation_id,
        })
        .to_string();

        match serde_json::from_str::<ClientEvent>(&raw).unwrap() {
            ClientEvent::TypingStart {
                conversation_id: cid,
            } => assert_eq!(cid, conversation_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn client_asserted_identity_fields_are_not_part_of_the_contract() {
        // a payload that tries to smuggle a user_id still parses, with the
        // field simply ignored
        let raw = serde_json::json!({
            "type": "typing.start",
            "conversation_id": Uuid::new_v4(),
            "user_id": Uuid::new_v4(),
        })
        .to_string();
        assert!(serde_json::from_str::<ClientEvent>(&raw).is_ok());
    }
}
