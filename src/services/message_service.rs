use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::capabilities::require;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::middleware::guards::ConversationAccess;
use crate::models::{
    Attachment, ConversationStatus, EditRecord, Message, MessageContent, MessageStatus,
    MessageType, Priority, Reaction, ReadReceipt,
};
use crate::services::collaborators::ContentCipher;
use crate::state::AppState;
use crate::websocket::events::{broadcast_event, ServerEvent};
use crate::websocket::registry::Room;

/// The fixed reaction set. Anything else is a validation error, so the
/// reaction table never accumulates arbitrary strings.
pub const REACTION_EMOJI: &[&str] = &["👍", "❤️", "😂", "😮", "😢", "🙏", "✅", "❗"];

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageInput {
    pub text: Option<String>,
    #[serde(rename = "type", default = "default_message_type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub mentions: Vec<Uuid>,
    pub priority: Option<Priority>,
    pub thread_id: Option<Uuid>,
    pub parent_message_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

/// Collapse mention and urgent-recipient candidates into the final
/// notification list: each user at most once, the sender never.
fn notification_targets(sender_id: Uuid, mut candidates: Vec<Uuid>) -> Vec<Uuid> {
    candidates.sort();
    candidates.dedup();
    candidates.retain(|u| *u != sender_id);
    candidates
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageQuery {
    pub limit: Option<i64>,
    /// Exclusive upper bound on `created_at`, for backward pagination.
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageStatusView {
    pub message_id: Uuid,
    pub status: MessageStatus,
    pub read_by: Vec<ReadReceipt>,
    pub reactions: Vec<Reaction>,
}

pub struct MessageService;

impl MessageService {
    /// Persist first, fan out second. The transaction covers the message
    /// insert, the conversation's last-message pointer, and the unread
    /// counter bumps; recipients never see an event for an uncommitted row.
    pub async fn send_message(
        state: &AppState,
        auth: &AuthContext,
        conversation_id: Uuid,
        input: SendMessageInput,
    ) -> Result<Message, AppError> {
        let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        require(access.caps.can_send, "can_send")?;

        if access.status == ConversationStatus::Closed {
            return Err(AppError::validation(
                "conversation_id",
                "conversation is closed",
            ));
        }

        let text = input.text.filter(|t| !t.trim().is_empty());
        if text.is_none() && input.attachments.is_empty() {
            return Err(AppError::validation(
                "content",
                "message needs text or at least one attachment",
            ));
        }
        if let Some(ref t) = text {
            if t.len() > state.config.max_message_length {
                return Err(AppError::validation(
                    "text",
                    format!(
                        "message exceeds {} bytes",
                        state.config.max_message_length
                    ),
                ));
            }
        }

        if let Some(thread_id) = input.thread_id {
            // only a designated root (thread_id = its own id) accepts replies
            let root_exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM messages WHERE id = $1 AND thread_id = $1 \
                 AND conversation_id = $2 AND NOT is_deleted)",
            )
            .bind(thread_id)
            .bind(conversation_id)
            .fetch_one(&state.db)
            .await?;
            if !root_exists {
                return Err(AppError::validation("thread_id", "unknown thread"));
            }
        }

        // encryption happens at the persistence boundary; everything above
        // and below deals in plaintext
        let (stored_text, key_id) = match (&text, access.is_encrypted) {
            (Some(t), true) => {
                let sealed = state.cipher.encrypt(t, conversation_id).await?;
                (Some(sealed.ciphertext), Some(sealed.key_id))
            }
            _ => (text.clone(), None),
        };

        let id = Uuid::new_v4();
        let priority = input.priority.unwrap_or(Priority::Normal);
        let attachments =
            serde_json::to_value(&input.attachments).unwrap_or(serde_json::Value::Array(vec![]));

        let mut tx = state.db.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO messages
                (id, conversation_id, tenant_id, sender_id, content_text, message_type,
                 attachments, metadata, thread_id, parent_message_id, mentions, priority,
                 is_encrypted, encryption_key_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(id)
        .bind(conversation_id)
        .bind(auth.tenant_id)
        .bind(auth.user_id)
        .bind(&stored_text)
        .bind(input.message_type.as_str())
        .bind(attachments)
        .bind(&input.metadata)
        .bind(input.thread_id)
        .bind(input.parent_message_id)
        .bind(&input.mentions)
        .bind(priority.as_str())
        .bind(access.is_encrypted)
        .bind(&key_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversations SET last_message_at = NOW(), last_message_id = $2, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        // atomic increment; concurrent senders never lose each other's bump
        sqlx::query(
            "UPDATE conversation_participants SET unread_count = unread_count + 1 \
             WHERE conversation_id = $1 AND user_id <> $2 AND left_at IS NULL",
        )
        .bind(conversation_id)
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        broadcast_event(
            &state.registry,
            Room::Conversation(conversation_id),
            auth.user_id,
            ServerEvent::MessageNew {
                conversation_id,
                message_id: id,
                sender_id: auth.user_id,
                thread_id: input.thread_id,
                priority,
            },
        )
        .await;

        Self::dispatch_notifications(state, auth, conversation_id, id, priority, &input.mentions);

        Self::get_message(state, auth, id).await
    }

    /// Notification side channel. Everything here is best effort: failures
    /// are logged, never surfaced to the sender.
    fn dispatch_notifications(
        state: &AppState,
        auth: &AuthContext,
        conversation_id: Uuid,
        message_id: Uuid,
        priority: Priority,
        mentions: &[Uuid],
    ) {
        let db = state.db.clone();
        let notifier = Arc::clone(&state.notifier);
        let sender_id = auth.user_id;
        let urgent = priority == Priority::Urgent;
        let mentioned: Vec<Uuid> = mentions.to_vec();
        tokio::spawn(async move {
            let mut targets: Vec<Uuid> = mentioned.clone();
            if urgent {
                let recipients: Result<Vec<Uuid>, _> = sqlx::query_scalar(
                    "SELECT user_id FROM conversation_participants \
                     WHERE conversation_id = $1 AND user_id <> $2 AND left_at IS NULL",
                )
                .bind(conversation_id)
                .bind(sender_id)
                .fetch_all(&db)
                .await;
                match recipients {
                    Ok(recipients) => targets.extend(recipients),
                    Err(e) => {
                        tracing::warn!(error = %e, %message_id, "urgent recipient lookup failed");
                    }
                }
            }
            let targets = notification_targets(sender_id, targets);

            for user_id in targets {
                let payload = serde_json::json!({
                    "conversation_id": conversation_id,
                    "message_id": message_id,
                    "sender_id": sender_id,
                    "mentioned": mentioned.contains(&user_id),
                });
                if urgent {
                    notifier.notify_urgent(user_id, payload).await;
                } else {
                    notifier.notify(user_id, payload).await;
                }
            }
        });
    }

    pub async fn get_message(
        state: &AppState,
        auth: &AuthContext,
        message_id: Uuid,
    ) -> Result<Message, AppError> {
        let row = Self::fetch_row(&state.db, auth.tenant_id, message_id).await?;
        let conversation_id: Uuid = row.get("conversation_id");
        ConversationAccess::verify(&state.db, auth, conversation_id).await?;

        let mut messages = Self::assemble(&state.db, state.cipher.as_ref(), vec![row]).await?;
        messages.pop().ok_or(AppError::NotFound)
    }

    /// Paged history, oldest-first within the page. Soft-deleted messages
    /// come back redacted rather than omitted so clients can render
    /// tombstones in place.
    pub async fn get_messages(
        state: &AppState,
        auth: &AuthContext,
        conversation_id: Uuid,
        query: &MessageQuery,
    ) -> Result<Vec<Message>, AppError> {
        ConversationAccess::verify(&state.db, auth, conversation_id).await?;

        let limit = query.limit.unwrap_or(50).clamp(1, 200);

        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1
              AND ($2::timestamptz IS NULL OR created_at < $2)
              AND ($3::timestamptz IS NULL OR created_at > $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(conversation_id)
        .bind(query.before)
        .bind(query.after)
        .bind(limit)
        .fetch_all(&state.db)
        .await?;

        let mut messages = Self::assemble(&state.db, state.cipher.as_ref(), rows).await?;
        messages.reverse();
        Ok(messages)
    }

    /// Only the original sender may edit, and only with the capability.
    /// Each successful edit appends exactly one history row holding the
    /// superseded content.
    pub async fn edit_message(
        state: &AppState,
        auth: &AuthContext,
        message_id: Uuid,
        new_text: String,
        reason: Option<String>,
    ) -> Result<Message, AppError> {
        if new_text.trim().is_empty() {
            return Err(AppError::validation("text", "edited text cannot be empty"));
        }
        if new_text.len() > state.config.max_message_length {
            return Err(AppError::validation(
                "text",
                format!("message exceeds {} bytes", state.config.max_message_length),
            ));
        }

        let row = Self::fetch_row(&state.db, auth.tenant_id, message_id).await?;
        let conversation_id: Uuid = row.get("conversation_id");
        let sender_id: Uuid = row.get("sender_id");
        let is_deleted: bool = row.get("is_deleted");
        let previous_text: Option<String> = row.get("content_text");

        let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        let is_sender = sender_id == auth.user_id;
        let caps = access.caps_as_sender(auth, is_sender);
        require(caps.can_edit_own, "can_edit_own")?;
        if is_deleted {
            return Err(AppError::validation("message_id", "message was deleted"));
        }

        let stored_text = if access.is_encrypted {
            state
                .cipher
                .encrypt(&new_text, conversation_id)
                .await?
                .ciphertext
        } else {
            new_text
        };

        let mut tx = state.db.begin().await?;
        sqlx::query(
            "INSERT INTO message_edits (message_id, content, edited_by, reason) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(message_id)
        .bind(&previous_text)
        .bind(auth.user_id)
        .bind(&reason)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE messages SET content_text = $2, edited_at = NOW(), updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(message_id)
        .bind(&stored_text)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        broadcast_event(
            &state.registry,
            Room::Conversation(conversation_id),
            auth.user_id,
            ServerEvent::MessageEdited {
                conversation_id,
                message_id,
            },
        )
        .await;

        Self::get_message(state, auth, message_id).await
    }

    /// Redaction, not removal: the row stays, content and attachments go.
    pub async fn delete_message(
        state: &AppState,
        auth: &AuthContext,
        message_id: Uuid,
    ) -> Result<(), AppError> {
        let row = Self::fetch_row(&state.db, auth.tenant_id, message_id).await?;
        let conversation_id: Uuid = row.get("conversation_id");
        let sender_id: Uuid = row.get("sender_id");

        let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        let is_sender = sender_id == auth.user_id;
        let caps = access.caps_as_sender(auth, is_sender);
        let allowed = (is_sender && caps.can_delete_own) || caps.can_delete;
        if !allowed {
            return Err(AppError::PermissionDenied(if is_sender {
                "can_delete_own"
            } else {
                "can_delete"
            }));
        }

        sqlx::query(
            "UPDATE messages SET content_text = NULL, attachments = '[]', is_deleted = TRUE, \
             deleted_at = NOW(), deleted_by = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(message_id)
        .bind(auth.user_id)
        .execute(&state.db)
        .await?;

        broadcast_event(
            &state.registry,
            Room::Conversation(conversation_id),
            auth.user_id,
            ServerEvent::MessageDeleted {
                conversation_id,
                message_id,
            },
        )
        .await;
        Ok(())
    }

    /// Idempotent read receipt. A non-participant's receipt is silently
    /// dropped; repeated reads by the same user insert nothing and emit
    /// nothing.
    pub async fn mark_message_read(
        state: &AppState,
        auth: &AuthContext,
        message_id: Uuid,
    ) -> Result<(), AppError> {
        let row = Self::fetch_row(&state.db, auth.tenant_id, message_id).await?;
        let conversation_id: Uuid = row.get("conversation_id");

        let is_participant: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM conversation_participants \
             WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL)",
        )
        .bind(conversation_id)
        .bind(auth.user_id)
        .fetch_one(&state.db)
        .await?;
        if !is_participant {
            return Ok(());
        }

        let result = sqlx::query(
            "INSERT INTO message_reads (message_id, user_id) VALUES ($1, $2) \
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(message_id)
        .bind(auth.user_id)
        .execute(&state.db)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(());
        }

        sqlx::query(
            "UPDATE conversation_participants SET unread_count = 0, last_read_at = NOW() \
             WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(conversation_id)
        .bind(auth.user_id)
        .execute(&state.db)
        .await?;

        broadcast_event(
            &state.registry,
            Room::Conversation(conversation_id),
            auth.user_id,
            ServerEvent::MessageReadBy {
                conversation_id,
                message_id,
                reader_id: auth.user_id,
            },
        )
        .await;
        Ok(())
    }

    /// One reaction per (user, emoji); re-adding is a no-op with no event.
    pub async fn add_reaction(
        state: &AppState,
        auth: &AuthContext,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<(), AppError> {
        if !REACTION_EMOJI.contains(&emoji) {
            return Err(AppError::validation("emoji", "unsupported reaction"));
        }

        let row = Self::fetch_row(&state.db, auth.tenant_id, message_id).await?;
        let conversation_id: Uuid = row.get("conversation_id");
        let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        if !access.is_participant {
            return Err(AppError::NotFound);
        }

        let result = sqlx::query(
            "INSERT INTO message_reactions (message_id, user_id, emoji) VALUES ($1, $2, $3) \
             ON CONFLICT (message_id, user_id, emoji) DO NOTHING",
        )
        .bind(message_id)
        .bind(auth.user_id)
        .bind(emoji)
        .execute(&state.db)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(());
        }

        broadcast_event(
            &state.registry,
            Room::Conversation(conversation_id),
            auth.user_id,
            ServerEvent::ReactionAdded {
                message_id,
                emoji: emoji.to_string(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn remove_reaction(
        state: &AppState,
        auth: &AuthContext,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<(), AppError> {
        let row = Self::fetch_row(&state.db, auth.tenant_id, message_id).await?;
        let conversation_id: Uuid = row.get("conversation_id");
        let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        if !access.is_participant {
            return Err(AppError::NotFound);
        }

        let result = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
        )
        .bind(message_id)
        .bind(auth.user_id)
        .bind(emoji)
        .execute(&state.db)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(());
        }

        broadcast_event(
            &state.registry,
            Room::Conversation(conversation_id),
            auth.user_id,
            ServerEvent::ReactionRemoved {
                message_id,
                emoji: emoji.to_string(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn list_reactions(
        state: &AppState,
        auth: &AuthContext,
        message_id: Uuid,
    ) -> Result<Vec<Reaction>, AppError> {
        let row = Self::fetch_row(&state.db, auth.tenant_id, message_id).await?;
        let conversation_id: Uuid = row.get("conversation_id");
        ConversationAccess::verify(&state.db, auth, conversation_id).await?;

        let rows = sqlx::query(
            "SELECT user_id, emoji, created_at FROM message_reactions \
             WHERE message_id = $1 ORDER BY created_at ASC",
        )
        .bind(message_id)
        .fetch_all(&state.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Reaction {
                user_id: r.get("user_id"),
                emoji: r.get("emoji"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// Batched delivery/read status for a set of messages in one
    /// conversation.
    pub async fn get_message_statuses(
        db: &PgPool,
        auth: &AuthContext,
        conversation_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<Vec<MessageStatusView>, AppError> {
        ConversationAccess::verify(db, auth, conversation_id).await?;
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, status FROM messages WHERE conversation_id = $1 AND id = ANY($2)",
        )
        .bind(conversation_id)
        .bind(message_ids)
        .fetch_all(db)
        .await?;

        let read_rows = sqlx::query(
            "SELECT message_id, user_id, read_at FROM message_reads WHERE message_id = ANY($1) \
             ORDER BY read_at ASC",
        )
        .bind(message_ids)
        .fetch_all(db)
        .await?;
        let mut reads: HashMap<Uuid, Vec<ReadReceipt>> = HashMap::new();
        for r in read_rows {
            let message_id: Uuid = r.get("message_id");
            reads.entry(message_id).or_default().push(ReadReceipt {
                user_id: r.get("user_id"),
                read_at: r.get("read_at"),
            });
        }

        let reaction_rows = sqlx::query(
            "SELECT message_id, user_id, emoji, created_at FROM message_reactions \
             WHERE message_id = ANY($1) ORDER BY created_at ASC",
        )
        .bind(message_ids)
        .fetch_all(db)
        .await?;
        let mut reactions: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
        for r in reaction_rows {
            let message_id: Uuid = r.get("message_id");
            reactions.entry(message_id).or_default().push(Reaction {
                user_id: r.get("user_id"),
                emoji: r.get("emoji"),
                created_at: r.get("created_at"),
            });
        }

        rows.into_iter()
            .map(|row| {
                let id: Uuid = row.get("id");
                let status: String = row.get("status");
                Ok(MessageStatusView {
                    message_id: id,
                    status: MessageStatus::parse(&status).ok_or(AppError::Internal)?,
                    read_by: reads.remove(&id).unwrap_or_default(),
                    reactions: reactions.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn fetch_row(db: &PgPool, tenant_id: Uuid, message_id: Uuid) -> Result<PgRow, AppError> {
        sqlx::query("SELECT * FROM messages WHERE id = $1 AND tenant_id = $2")
            .bind(message_id)
            .bind(tenant_id)
            .fetch_optional(db)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Hydrate message rows: reactions, read receipts, and edit history come
    /// from their side tables in three grouped queries, and encrypted text
    /// is opened at this boundary.
    pub(crate) async fn assemble(
        db: &PgPool,
        cipher: &dyn ContentCipher,
        rows: Vec<PgRow>,
    ) -> Result<Vec<Message>, AppError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();

        let reaction_rows = sqlx::query(
            "SELECT message_id, user_id, emoji, created_at FROM message_reactions \
             WHERE message_id = ANY($1) ORDER BY created_at ASC",
        )
        .bind(&ids)
        .fetch_all(db)
        .await?;
        let mut reactions: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
        for r in reaction_rows {
            let message_id: Uuid = r.get("message_id");
            reactions.entry(message_id).or_default().push(Reaction {
                user_id: r.get("user_id"),
                emoji: r.get("emoji"),
                created_at: r.get("created_at"),
            });
        }

        let read_rows = sqlx::query(
            "SELECT message_id, user_id, read_at FROM message_reads \
             WHERE message_id = ANY($1) ORDER BY read_at ASC",
        )
        .bind(&ids)
        .fetch_all(db)
        .await?;
        let mut reads: HashMap<Uuid, Vec<ReadReceipt>> = HashMap::new();
        for r in read_rows {
            let message_id: Uuid = r.get("message_id");
            reads.entry(message_id).or_default().push(ReadReceipt {
                user_id: r.get("user_id"),
                read_at: r.get("read_at"),
            });
        }

        let edit_rows = sqlx::query(
            "SELECT message_id, content, edited_by, edited_at, reason FROM message_edits \
             WHERE message_id = ANY($1) ORDER BY edited_at ASC, id ASC",
        )
        .bind(&ids)
        .fetch_all(db)
        .await?;
        let mut edits: HashMap<Uuid, Vec<EditRecord>> = HashMap::new();
        for r in edit_rows {
            let message_id: Uuid = r.get("message_id");
            edits.entry(message_id).or_default().push(EditRecord {
                content: r.get("content"),
                edited_by: r.get("edited_by"),
                edited_at: r.get("edited_at"),
                reason: r.get("reason"),
            });
        }

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.get("id");
            let mut message = Self::message_from_row(row)?;
            message.reactions = reactions.remove(&id).unwrap_or_default();
            message.read_by = reads.remove(&id).unwrap_or_default();
            message.edit_history = edits.remove(&id).unwrap_or_default();

            if message.is_encrypted && !message.is_deleted {
                if let (Some(cipher_text), Some(key_id)) =
                    (message.content.text.clone(), message.encryption_key_id.clone())
                {
                    message.content.text = Some(cipher.decrypt(&cipher_text, &key_id).await?);
                }
            }
            messages.push(message);
        }
        Ok(messages)
    }

    pub(crate) fn message_from_row(row: &PgRow) -> Result<Message, AppError> {
        let message_type: String = row.get("message_type");
        let status: String = row.get("status");
        let priority: String = row.get("priority");
        let attachments: serde_json::Value = row.get("attachments");
        Ok(Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            tenant_id: row.get("tenant_id"),
            sender_id: row.get("sender_id"),
            content: MessageContent {
                text: row.get("content_text"),
                message_type: MessageType::parse(&message_type).ok_or(AppError::Internal)?,
                attachments: serde_json::from_value(attachments).unwrap_or_default(),
                metadata: row.get("metadata"),
            },
            thread_id: row.get("thread_id"),
            parent_message_id: row.get("parent_message_id"),
            mentions: row.get("mentions"),
            reactions: Vec::new(),
            status: MessageStatus::parse(&status).ok_or(AppError::Internal)?,
            priority: Priority::parse(&priority).ok_or(AppError::Internal)?,
            read_by: Vec::new(),
            edit_history: Vec::new(),
            is_encrypted: row.get("is_encrypted"),
            encryption_key_id: row.get("encryption_key_id"),
            is_deleted: row.get("is_deleted"),
            deleted_at: row.get("deleted_at"),
            deleted_by: row.get("deleted_by"),
            edited_at: row.get("edited_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_allow_list_is_fixed() {
        assert!(REACTION_EMOJI.contains(&"👍"));
        assert!(!REACTION_EMOJI.contains(&"🦀"));
        assert!(!REACTION_EMOJI.contains(&""));
    }

    #[test]
    fn notification_targets_fire_once_per_recipient() {
        let sender = Uuid::new_v4();
        let mentioned = Uuid::new_v4();
        let recipient = Uuid::new_v4();

        // mentioned user also in the urgent recipient list and the sender
        // self-mentioned: one notification each for the two others
        let candidates = vec![mentioned, sender, mentioned, recipient];
        let targets = notification_targets(sender, candidates);

        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&mentioned));
        assert!(targets.contains(&recipient));
        assert!(!targets.contains(&sender));
    }

    #[test]
    fn notification_targets_empty_without_candidates() {
        let sender = Uuid::new_v4();
        assert!(notification_targets(sender, vec![]).is_empty());
        assert!(notification_targets(sender, vec![sender, sender]).is_empty());
    }

    #[test]
    fn status_view_reports_reads_and_reactions_together() {
        let view = MessageStatusView {
            message_id: Uuid::new_v4(),
            status: MessageStatus::Read,
            read_by: vec![ReadReceipt {
                user_id: Uuid::new_v4(),
                read_at: Utc::now(),
            }],
            reactions: vec![Reaction {
                user_id: Uuid::new_v4(),
                emoji: "👍".to_string(),
                created_at: Utc::now(),
            }],
        };

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "read");
        assert_eq!(json["read_by"].as_array().unwrap().len(), 1);
        assert_eq!(json["reactions"][0]["emoji"], "👍");
    }

    #[test]
    fn send_input_defaults_to_text_type() {
        let input: SendMessageInput = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert_eq!(input.message_type, MessageType::Text);
        assert!(input.attachments.is_empty());
        assert!(input.mentions.is_empty());
        assert!(input.priority.is_none());
        assert!(input.thread_id.is_none());
    }
}
