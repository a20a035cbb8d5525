use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conversation::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    File,
    Image,
    ClinicalNote,
    System,
    VoiceNote,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::Image => "image",
            Self::ClinicalNote => "clinical_note",
            Self::System => "system",
            Self::VoiceNote => "voice_note",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "file" => Some(Self::File),
            "image" => Some(Self::Image),
            "clinical_note" => Some(Self::ClinicalNote),
            "system" => Some(Self::System),
            "voice_note" => Some(Self::VoiceNote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub file_id: Uuid,
    pub file_name: String,
    pub mime_type: String,
    pub size: i64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditRecord {
    /// Content as it was before this edit.
    pub content: Option<String>,
    pub edited_at: DateTime<Utc>,
    pub edited_by: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContent {
    pub text: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub tenant_id: Uuid,
    pub sender_id: Uuid,
    pub content: MessageContent,
    pub thread_id: Option<Uuid>,
    pub parent_message_id: Option<Uuid>,
    pub mentions: Vec<Uuid>,
    pub reactions: Vec<Reaction>,
    pub status: MessageStatus,
    pub priority: Priority,
    pub read_by: Vec<ReadReceipt>,
    pub edit_history: Vec<EditRecord>,
    pub is_encrypted: bool,
    pub encryption_key_id: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Toggle-on semantics: one entry per (user, emoji), re-adding is a no-op.
    /// Returns whether a new reaction was recorded.
    pub fn add_reaction(&mut self, user_id: Uuid, emoji: &str) -> bool {
        if self
            .reactions
            .iter()
            .any(|r| r.user_id == user_id && r.emoji == emoji)
        {
            return false;
        }
        self.reactions.push(Reaction {
            user_id,
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        });
        true
    }

    /// Returns whether a reaction was actually removed.
    pub fn remove_reaction(&mut self, user_id: Uuid, emoji: &str) -> bool {
        let before = self.reactions.len();
        self.reactions
            .retain(|r| !(r.user_id == user_id && r.emoji == emoji));
        self.reactions.len() != before
    }

    /// Idempotent read receipt, deduplicated by user.
    pub fn mark_read(&mut self, user_id: Uuid) -> bool {
        if self.read_by.iter().any(|r| r.user_id == user_id) {
            return false;
        }
        self.read_by.push(ReadReceipt {
            user_id,
            read_at: Utc::now(),
        });
        true
    }

    /// Appends exactly one history entry (holding the superseded content, in
    /// call order) and replaces the visible text.
    pub fn record_edit(&mut self, new_text: String, edited_by: Uuid, reason: Option<String>) {
        let now = Utc::now();
        self.edit_history.push(EditRecord {
            content: self.content.text.take(),
            edited_at: now,
            edited_by,
            reason,
        });
        self.content.text = Some(new_text);
        self.edited_at = Some(now);
        self.updated_at = now;
    }

    /// Soft delete: content redacted, history and metadata retained.
    pub fn redact(&mut self, deleted_by: Uuid) {
        let now = Utc::now();
        self.content.text = None;
        self.content.attachments.clear();
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.deleted_by = Some(deleted_by);
        self.updated_at = now;
    }

    pub fn mentioned_users(&self) -> &[Uuid] {
        &self.mentions
    }

    pub fn has_attachments(&self) -> bool {
        !self.content.attachments.is_empty()
    }

    pub fn attachment_count(&self) -> usize {
        self.content.attachments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: MessageContent {
                text: Some("original".into()),
                message_type: MessageType::Text,
                attachments: vec![],
                metadata: serde_json::Value::Null,
            },
            thread_id: None,
            parent_message_id: None,
            mentions: vec![],
            reactions: vec![],
            status: MessageStatus::Sent,
            priority: Priority::Normal,
            read_by: vec![],
            edit_history: vec![],
            is_encrypted: false,
            encryption_key_id: None,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            edited_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_reaction_is_a_no_op() {
        let mut msg = message();
        let user = Uuid::new_v4();
        assert!(msg.add_reaction(user, "👍"));
        assert!(!msg.add_reaction(user, "👍"));
        assert_eq!(msg.reactions.len(), 1);
        // a different emoji from the same user is a distinct entry
        assert!(msg.add_reaction(user, "❤️"));
        assert_eq!(msg.reactions.len(), 2);
    }

    #[test]
    fn remove_reaction_only_removes_matching_entry() {
        let mut msg = message();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        msg.add_reaction(a, "👍");
        msg.add_reaction(b, "👍");
        assert!(msg.remove_reaction(a, "👍"));
        assert!(!msg.remove_reaction(a, "👍"));
        assert_eq!(msg.reactions.len(), 1);
        assert_eq!(msg.reactions[0].user_id, b);
    }

    #[test]
    fn read_receipts_deduplicate_by_user() {
        let mut msg = message();
        let user = Uuid::new_v4();
        assert!(msg.mark_read(user));
        assert!(!msg.mark_read(user));
        assert_eq!(msg.read_by.len(), 1);
    }

    #[test]
    fn each_edit_appends_exactly_one_history_entry_in_order() {
        let mut msg = message();
        let editor = msg.sender_id;
        msg.record_edit("second".into(), editor, None);
        msg.record_edit("third".into(), editor, Some("typo".into()));

        assert_eq!(msg.edit_history.len(), 2);
        assert_eq!(msg.edit_history[0].content.as_deref(), Some("original"));
        assert_eq!(msg.edit_history[1].content.as_deref(), Some("second"));
        assert_eq!(msg.content.text.as_deref(), Some("third"));
        assert!(msg.edited_at.is_some());
    }

    #[test]
    fn redact_clears_content_but_keeps_history() {
        let mut msg = message();
        let editor = msg.sender_id;
        msg.record_edit("second".into(), editor, None);
        msg.redact(editor);

        assert!(msg.is_deleted);
        assert!(msg.content.text.is_none());
        assert_eq!(msg.edit_history.len(), 1);
        assert!(msg.deleted_at.is_some());
    }
}
