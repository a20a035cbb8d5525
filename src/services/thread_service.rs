use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::capabilities::require;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::middleware::guards::ConversationAccess;
use crate::models::Message;
use crate::services::message_service::{MessageService, SendMessageInput};
use crate::state::AppState;
use crate::websocket::events::{broadcast_event, ServerEvent};
use crate::websocket::registry::Room;

/// Threads are not entities of their own: a thread is identified by its root
/// message's id, and every reply carries that id in `thread_id`. The root
/// carries its own id there too, so one indexed equality scan finds the
/// whole thread.

#[derive(Debug, Clone, Serialize)]
pub struct ThreadMessages {
    pub root: Message,
    pub replies: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    pub thread_id: Uuid,
    pub conversation_id: Uuid,
    pub reply_count: i64,
    /// Replies newer than the caller's conversation-level `last_read_at`.
    pub unread_replies: i64,
    pub participant_ids: Vec<Uuid>,
    pub last_reply_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadQuery {
    pub limit: Option<i64>,
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
}

/// Whether a message can become a thread root, judged by its stored
/// `thread_id`. A root already carries its own id there; a reply carries the
/// root's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Promotion {
    Promotable,
    AlreadyRoot,
    Reply,
}

fn classify_promotion(message_id: Uuid, thread_id: Option<Uuid>) -> Promotion {
    match thread_id {
        None => Promotion::Promotable,
        Some(t) if t == message_id => Promotion::AlreadyRoot,
        Some(_) => Promotion::Reply,
    }
}

pub struct ThreadService;

impl ThreadService {
    /// Start a thread by promoting an existing message to root: its own id
    /// becomes the thread id. One conditional UPDATE does the designation,
    /// so there is no window where the root exists without its thread id.
    /// Promoting a message that is already a root is an idempotent no-op;
    /// promoting a reply is a validation error.
    pub async fn create_thread(
        state: &AppState,
        auth: &AuthContext,
        message_id: Uuid,
    ) -> Result<Message, AppError> {
        let row = sqlx::query(
            "SELECT conversation_id, thread_id FROM messages \
             WHERE id = $1 AND tenant_id = $2 AND NOT is_deleted",
        )
        .bind(message_id)
        .bind(auth.tenant_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound)?;
        let conversation_id: Uuid = row.get("conversation_id");
        let thread_id: Option<Uuid> = row.get("thread_id");

        let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        require(access.caps.can_create_threads, "can_create_threads")?;

        match classify_promotion(message_id, thread_id) {
            Promotion::AlreadyRoot => {
                return MessageService::get_message(state, auth, message_id).await
            }
            Promotion::Reply => {
                return Err(AppError::validation(
                    "message_id",
                    "message is already part of another thread",
                ))
            }
            Promotion::Promotable => {}
        }

        let result =
            sqlx::query("UPDATE messages SET thread_id = id WHERE id = $1 AND thread_id IS NULL")
                .bind(message_id)
                .execute(&state.db)
                .await?;

        // a concurrent promotion or reply won the race; re-read settles it
        if result.rows_affected() == 1 {
            broadcast_event(
                &state.registry,
                Room::Conversation(conversation_id),
                auth.user_id,
                ServerEvent::ThreadCreated {
                    conversation_id,
                    thread_id: message_id,
                },
            )
            .await;
        }

        MessageService::get_message(state, auth, message_id).await
    }

    /// Reply into an existing thread. The reply's conversation is always the
    /// root's conversation; callers cannot graft a thread across
    /// conversations.
    pub async fn reply_to_thread(
        state: &AppState,
        auth: &AuthContext,
        thread_id: Uuid,
        mut input: SendMessageInput,
    ) -> Result<Message, AppError> {
        let root = sqlx::query(
            "SELECT conversation_id FROM messages \
             WHERE id = $1 AND thread_id = $1 AND tenant_id = $2 AND NOT is_deleted",
        )
        .bind(thread_id)
        .bind(auth.tenant_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound)?;
        let conversation_id: Uuid = root.get("conversation_id");

        input.thread_id = Some(thread_id);
        if input.parent_message_id.is_none() {
            input.parent_message_id = Some(thread_id);
        }
        MessageService::send_message(state, auth, conversation_id, input).await
    }

    /// Root plus replies, ascending by creation time, with cursor paging
    /// over the replies.
    pub async fn get_thread_messages(
        state: &AppState,
        auth: &AuthContext,
        thread_id: Uuid,
        query: &ThreadQuery,
    ) -> Result<ThreadMessages, AppError> {
        let root = MessageService::get_message(state, auth, thread_id).await?;
        if root.thread_id != Some(thread_id) {
            return Err(AppError::NotFound);
        }

        let limit = query.limit.unwrap_or(50).clamp(1, 200);
        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE thread_id = $1 AND id <> $1
              AND ($2::timestamptz IS NULL OR created_at < $2)
              AND ($3::timestamptz IS NULL OR created_at > $3)
            ORDER BY created_at ASC
            LIMIT $4
            "#,
        )
        .bind(thread_id)
        .bind(query.before)
        .bind(query.after)
        .bind(limit)
        .fetch_all(&state.db)
        .await?;

        let replies = MessageService::assemble(&state.db, state.cipher.as_ref(), rows).await?;
        Ok(ThreadMessages { root, replies })
    }

    pub async fn get_thread_summary(
        state: &AppState,
        auth: &AuthContext,
        thread_id: Uuid,
    ) -> Result<ThreadSummary, AppError> {
        let root = MessageService::get_message(state, auth, thread_id).await?;
        if root.thread_id != Some(thread_id) {
            return Err(AppError::NotFound);
        }

        let last_read_at = Self::last_read_at(state, auth, root.conversation_id).await?;

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) FILTER (WHERE id <> $1) AS reply_count,
                   COUNT(*) FILTER (WHERE id <> $1 AND sender_id <> $2
                       AND ($3::timestamptz IS NULL OR created_at > $3)) AS unread_replies,
                   ARRAY_AGG(DISTINCT sender_id) AS participant_ids,
                   MAX(created_at) FILTER (WHERE id <> $1) AS last_reply_at
            FROM messages WHERE thread_id = $1
            "#,
        )
        .bind(thread_id)
        .bind(auth.user_id)
        .bind(last_read_at)
        .fetch_one(&state.db)
        .await?;

        Ok(ThreadSummary {
            thread_id,
            conversation_id: root.conversation_id,
            reply_count: row.get("reply_count"),
            unread_replies: row.get("unread_replies"),
            participant_ids: row
                .try_get::<Option<Vec<Uuid>>, _>("participant_ids")?
                .unwrap_or_default(),
            last_reply_at: row.get("last_reply_at"),
        })
    }

    async fn last_read_at(
        state: &AppState,
        auth: &AuthContext,
        conversation_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let last_read_at: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            "SELECT last_read_at FROM conversation_participants \
             WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(conversation_id)
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await?;
        Ok(last_read_at.flatten())
    }

    /// All threads in a conversation, most recently active first.
    pub async fn get_conversation_threads(
        state: &AppState,
        auth: &AuthContext,
        conversation_id: Uuid,
    ) -> Result<Vec<ThreadSummary>, AppError> {
        ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        let last_read_at = Self::last_read_at(state, auth, conversation_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT thread_id,
                   COUNT(*) FILTER (WHERE id <> thread_id) AS reply_count,
                   COUNT(*) FILTER (WHERE id <> thread_id AND sender_id <> $2
                       AND ($3::timestamptz IS NULL OR created_at > $3)) AS unread_replies,
                   ARRAY_AGG(DISTINCT sender_id) AS participant_ids,
                   MAX(created_at) FILTER (WHERE id <> thread_id) AS last_reply_at
            FROM messages
            WHERE conversation_id = $1 AND thread_id IS NOT NULL
            GROUP BY thread_id
            ORDER BY MAX(created_at) DESC
            "#,
        )
        .bind(conversation_id)
        .bind(auth.user_id)
        .bind(last_read_at)
        .fetch_all(&state.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ThreadSummary {
                thread_id: row.get("thread_id"),
                conversation_id,
                reply_count: row.get("reply_count"),
                unread_replies: row.get("unread_replies"),
                participant_ids: row
                    .try_get::<Option<Vec<Uuid>>, _>("participant_ids")
                    .ok()
                    .flatten()
                    .unwrap_or_default(),
                last_reply_at: row.get("last_reply_at"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_is_promotable() {
        let id = Uuid::new_v4();
        assert_eq!(classify_promotion(id, None), Promotion::Promotable);
    }

    #[test]
    fn promoting_a_root_again_is_recognized() {
        let id = Uuid::new_v4();
        assert_eq!(classify_promotion(id, Some(id)), Promotion::AlreadyRoot);
    }

    #[test]
    fn a_reply_cannot_become_a_root() {
        let id = Uuid::new_v4();
        assert_eq!(
            classify_promotion(id, Some(Uuid::new_v4())),
            Promotion::Reply
        );
    }
}
