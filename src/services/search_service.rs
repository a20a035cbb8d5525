use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::capabilities::{capabilities, require};
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::{ConversationType, MessageType};
use crate::state::AppState;

/// Full-text search over messages and conversations, scoped to the caller's
/// tenant and the conversations they participate in. The tsvector column is
/// generated in the database, so indexing never drifts from the stored text.
///
/// Encrypted conversations are excluded: their stored text is ciphertext and
/// would only pollute the index.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageSearchQuery {
    pub q: String,
    pub conversation_id: Option<Uuid>,
    pub sender_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub message_type: Option<MessageType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub tag: Option<String>,
    pub has_attachments: Option<bool>,
    pub has_mentions: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageSearchHit {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub conversation_title: Option<String>,
    pub sender_id: Uuid,
    pub snippet: String,
    pub rank: f32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationSearchQuery {
    pub q: String,
    #[serde(rename = "type")]
    pub kind: Option<ConversationType>,
    pub participant_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSearchHit {
    pub conversation_id: Uuid,
    pub title: Option<String>,
    pub kind: String,
    pub status: String,
    pub last_message_at: Option<DateTime<Utc>>,
}

pub struct SearchService;

impl SearchService {
    pub async fn search_messages(
        state: &AppState,
        auth: &AuthContext,
        query: &MessageSearchQuery,
    ) -> Result<Vec<MessageSearchHit>, AppError> {
        let caps = capabilities(auth.role, auth.tenant_role, true, false);
        require(caps.can_search, "can_search")?;

        let needle = query.q.trim();
        if needle.is_empty() {
            return Err(AppError::validation("q", "search query cannot be empty"));
        }
        let limit = query.limit.unwrap_or(25).clamp(1, 100);
        let offset = query.offset.unwrap_or(0).max(0);

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT m.id, m.conversation_id, c.title AS conversation_title, \
             m.sender_id, m.created_at, \
             ts_rank(m.content_tsv, query) AS rank, \
             ts_headline('english', COALESCE(m.content_text, ''), query, \
                         'StartSel=<mark>, StopSel=</mark>, MaxFragments=2') AS snippet \
             FROM messages m \
             JOIN conversations c ON c.id = m.conversation_id AND NOT c.is_deleted \
               AND NOT c.is_encrypted \
             JOIN conversation_participants p ON p.conversation_id = c.id \
               AND p.left_at IS NULL AND p.user_id = ",
        );
        qb.push_bind(auth.user_id);
        qb.push(", plainto_tsquery('english', ");
        qb.push_bind(needle.to_string());
        qb.push(") query WHERE m.tenant_id = ").push_bind(auth.tenant_id);
        qb.push(" AND NOT m.is_deleted AND m.content_tsv @@ query");
        if let Some(conversation_id) = query.conversation_id {
            qb.push(" AND m.conversation_id = ").push_bind(conversation_id);
        }
        if let Some(sender_id) = query.sender_id {
            qb.push(" AND m.sender_id = ").push_bind(sender_id);
        }
        if let Some(message_type) = query.message_type {
            qb.push(" AND m.message_type = ").push_bind(message_type.as_str());
        }
        if let Some(from) = query.from {
            qb.push(" AND m.created_at >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            qb.push(" AND m.created_at <= ").push_bind(to);
        }
        if let Some(ref tag) = query.tag {
            qb.push(" AND ").push_bind(tag.clone()).push(" = ANY(c.tags)");
        }
        if let Some(has_attachments) = query.has_attachments {
            if has_attachments {
                qb.push(" AND jsonb_array_length(m.attachments) > 0");
            } else {
                qb.push(" AND jsonb_array_length(m.attachments) = 0");
            }
        }
        if let Some(has_mentions) = query.has_mentions {
            if has_mentions {
                qb.push(" AND cardinality(m.mentions) > 0");
            } else {
                qb.push(" AND cardinality(m.mentions) = 0");
            }
        }
        qb.push(" ORDER BY rank DESC, m.created_at DESC");
        qb.push(" LIMIT ").push_bind(limit);
        qb.push(" OFFSET ").push_bind(offset);

        let rows = qb.build().fetch_all(&state.db).await?;

        Self::log_search(state, auth, needle);

        Ok(rows
            .into_iter()
            .map(|row| MessageSearchHit {
                message_id: row.get("id"),
                conversation_id: row.get("conversation_id"),
                conversation_title: row.get("conversation_title"),
                sender_id: row.get("sender_id"),
                snippet: row.get("snippet"),
                rank: row.get("rank"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Title search over the caller's conversations, with an optional
    /// participant facet.
    pub async fn search_conversations(
        state: &AppState,
        auth: &AuthContext,
        query: &ConversationSearchQuery,
    ) -> Result<Vec<ConversationSearchHit>, AppError> {
        let caps = capabilities(auth.role, auth.tenant_role, true, false);
        require(caps.can_search, "can_search")?;

        let needle = query.q.trim();
        if needle.is_empty() {
            return Err(AppError::validation("q", "search query cannot be empty"));
        }
        let limit = query.limit.unwrap_or(25).clamp(1, 100);
        let offset = query.offset.unwrap_or(0).max(0);

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT c.id, c.title, c.kind, c.status, c.last_message_at \
             FROM conversations c \
             JOIN conversation_participants me ON me.conversation_id = c.id \
               AND me.left_at IS NULL AND me.user_id = ",
        );
        qb.push_bind(auth.user_id);
        qb.push(" WHERE c.tenant_id = ").push_bind(auth.tenant_id);
        qb.push(" AND NOT c.is_deleted AND c.title ILIKE ");
        qb.push_bind(format!("%{}%", needle));
        if let Some(kind) = query.kind {
            qb.push(" AND c.kind = ").push_bind(kind.as_str());
        }
        if let Some(participant_id) = query.participant_id {
            qb.push(
                " AND EXISTS(SELECT 1 FROM conversation_participants f \
                 WHERE f.conversation_id = c.id AND f.left_at IS NULL AND f.user_id = ",
            );
            qb.push_bind(participant_id);
            qb.push(")");
        }
        qb.push(" ORDER BY c.last_message_at DESC NULLS LAST");
        qb.push(" LIMIT ").push_bind(limit);
        qb.push(" OFFSET ").push_bind(offset);

        let rows = qb.build().fetch_all(&state.db).await?;

        Self::log_search(state, auth, needle);

        Ok(rows
            .into_iter()
            .map(|row| ConversationSearchHit {
                conversation_id: row.get("id"),
                title: row.get("title"),
                kind: row.get("kind"),
                status: row.get("status"),
                last_message_at: row.get("last_message_at"),
            })
            .collect())
    }

    pub async fn recent_searches(
        state: &AppState,
        auth: &AuthContext,
        limit: i64,
    ) -> Result<Vec<String>, AppError> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT query FROM (
                SELECT DISTINCT ON (query) query, searched_at FROM search_history
                WHERE tenant_id = $1 AND user_id = $2
                ORDER BY query, searched_at DESC
            ) recent
            ORDER BY searched_at DESC
            LIMIT $3
            "#,
        )
        .bind(auth.tenant_id)
        .bind(auth.user_id)
        .bind(limit.clamp(1, 50))
        .fetch_all(&state.db)
        .await?;
        Ok(rows)
    }

    /// History logging is fire-and-forget; a failed insert never fails the
    /// search.
    fn log_search(state: &AppState, auth: &AuthContext, query: &str) {
        let db = state.db.clone();
        let tenant_id = auth.tenant_id;
        let user_id = auth.user_id;
        let query = query.to_string();
        tokio::spawn(async move {
            let result = sqlx::query(
                "INSERT INTO search_history (tenant_id, user_id, query) VALUES ($1, $2, $3)",
            )
            .bind(tenant_id)
            .bind(user_id)
            .bind(&query)
            .execute(&db)
            .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to record search history");
            }
        });
    }
}
