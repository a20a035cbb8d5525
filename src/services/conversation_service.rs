use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use uuid::Uuid;

use crate::capabilities::{capabilities, require};
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::middleware::guards::ConversationAccess;
use crate::models::conversation::validate_composition;
use crate::models::{
    Conversation, ConversationMetadata, ConversationStatus, ConversationType, Participant,
    Priority, TenantRole, UserRole, MAX_PARTICIPANTS,
};
use crate::state::AppState;
use crate::websocket::events::{broadcast_event, ServerEvent};
use crate::websocket::registry::Room;

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantInput {
    pub user_id: Uuid,
    pub role: UserRole,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversationInput {
    #[serde(rename = "type")]
    pub kind: ConversationType,
    pub title: Option<String>,
    pub participants: Vec<ParticipantInput>,
    pub patient_id: Option<Uuid>,
    pub case_id: Option<Uuid>,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub clinical_context: Option<String>,
    /// Escape hatch for trusted internal callers only. Never accepted over
    /// the wire: requests always deserialize this as false.
    #[serde(skip)]
    pub skip_validation: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationFilters {
    pub status: Option<ConversationStatus>,
    #[serde(rename = "type")]
    pub kind: Option<ConversationType>,
    pub priority: Option<Priority>,
    pub patient_id: Option<Uuid>,
    /// Title substring match; full-text search lives in the search layer.
    pub search: Option<String>,
    pub tag: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateConversationInput {
    pub title: Option<String>,
    pub status: Option<ConversationStatus>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
}

pub struct ConversationService;

impl ConversationService {
    /// Create a conversation. Composition rules are re-validated here no
    /// matter what the caller claims; the creator is always upserted into
    /// the participant list first.
    pub async fn create_conversation(
        state: &AppState,
        auth: &AuthContext,
        input: CreateConversationInput,
    ) -> Result<Conversation, AppError> {
        let caps = capabilities(auth.role, auth.tenant_role, true, false);
        require(caps.can_create_conversation, "can_create_conversation")?;

        if let Some(ref title) = input.title {
            if title.len() > 255 {
                return Err(AppError::validation("title", "title too long (max 255)"));
            }
        }

        // creator first; an explicit creator entry in the list wins its role
        let mut roster: Vec<(Uuid, UserRole)> = Vec::new();
        for p in &input.participants {
            if !roster.iter().any(|(id, _)| *id == p.user_id) {
                roster.push((p.user_id, p.role));
            }
        }
        if !roster.iter().any(|(id, _)| *id == auth.user_id) {
            roster.insert(0, (auth.user_id, auth.role));
        }

        if input.skip_validation {
            // even trusted callers cannot exceed the hard cap
            if roster.len() > MAX_PARTICIPANTS {
                return Err(AppError::validation(
                    "participants",
                    format!("conversation is limited to {MAX_PARTICIPANTS} participants"),
                ));
            }
        } else {
            validate_composition(input.kind, &roster)?;
        }

        let id = Uuid::new_v4();
        let priority = input.priority.unwrap_or(Priority::Normal);

        let mut tx = state.db.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO conversations
                (id, tenant_id, kind, title, priority, tags, patient_id, case_id,
                 clinical_context, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id)
        .bind(auth.tenant_id)
        .bind(input.kind.as_str())
        .bind(&input.title)
        .bind(priority.as_str())
        .bind(&input.tags)
        .bind(input.patient_id)
        .bind(input.case_id)
        .bind(&input.clinical_context)
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await?;

        for (user_id, role) in &roster {
            // snapshot is denormalized display data, never authority
            let snapshot =
                serde_json::to_value(capabilities(*role, TenantRole::Member, true, false))
                    .unwrap_or(serde_json::Value::Null);
            sqlx::query(
                r#"
                INSERT INTO conversation_participants
                    (conversation_id, user_id, role, permissions)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(id)
            .bind(user_id)
            .bind(role.as_str())
            .bind(snapshot)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let conversation = Self::load(&state.db, auth.tenant_id, id)
            .await?
            .ok_or(AppError::Internal)?;

        // fan out to every participant except the creator, via user rooms
        for (user_id, _) in roster.iter().filter(|(u, _)| *u != auth.user_id) {
            broadcast_event(
                &state.registry,
                Room::User(*user_id),
                auth.user_id,
                ServerEvent::ConversationCreated {
                    conversation_id: id,
                },
            )
            .await;
        }

        Ok(conversation)
    }

    pub async fn get_conversation(
        db: &PgPool,
        auth: &AuthContext,
        conversation_id: Uuid,
    ) -> Result<Conversation, AppError> {
        ConversationAccess::verify(db, auth, conversation_id).await?;
        Self::load(db, auth.tenant_id, conversation_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Tenant- and participant-scoped listing with filters and pagination.
    pub async fn list_conversations(
        db: &PgPool,
        auth: &AuthContext,
        filters: &ConversationFilters,
    ) -> Result<(Vec<Conversation>, i64), AppError> {
        let limit = filters.limit.unwrap_or(50).clamp(1, 200);
        let offset = filters.offset.unwrap_or(0).max(0);

        let mut qb = Self::filtered_query(
            "SELECT c.id, c.tenant_id, c.kind, c.title, c.status, c.priority, c.tags, \
             c.patient_id, c.case_id, c.last_message_at, c.last_message_id, c.created_by, \
             c.is_encrypted, c.encryption_key_id, c.clinical_context, c.is_deleted, \
             c.deleted_at, c.deleted_by, c.created_at, c.updated_at ",
            auth,
            filters,
        );
        qb.push(" ORDER BY c.last_message_at DESC NULLS LAST, c.created_at DESC ");
        qb.push(" LIMIT ").push_bind(limit);
        qb.push(" OFFSET ").push_bind(offset);

        let rows = qb.build().fetch_all(db).await?;

        let mut count_qb = Self::filtered_query("SELECT COUNT(*) AS total ", auth, filters);
        let total: i64 = count_qb.build().fetch_one(db).await?.get("total");

        let mut conversations: Vec<Conversation> = rows
            .iter()
            .map(Self::conversation_from_row)
            .collect::<Result<_, _>>()?;
        Self::attach_participants(db, &mut conversations).await?;

        Ok((conversations, total))
    }

    fn filtered_query<'a>(
        select: &str,
        auth: &'a AuthContext,
        filters: &'a ConversationFilters,
    ) -> QueryBuilder<'a, Postgres> {
        let mut qb = QueryBuilder::new(select);
        qb.push(
            "FROM conversations c \
             JOIN conversation_participants me \
               ON me.conversation_id = c.id AND me.left_at IS NULL AND me.user_id = ",
        );
        qb.push_bind(auth.user_id);
        qb.push(" WHERE c.tenant_id = ").push_bind(auth.tenant_id);
        qb.push(" AND NOT c.is_deleted");
        if let Some(status) = filters.status {
            qb.push(" AND c.status = ").push_bind(status.as_str());
        }
        if let Some(kind) = filters.kind {
            qb.push(" AND c.kind = ").push_bind(kind.as_str());
        }
        if let Some(priority) = filters.priority {
            qb.push(" AND c.priority = ").push_bind(priority.as_str());
        }
        if let Some(patient_id) = filters.patient_id {
            qb.push(" AND c.patient_id = ").push_bind(patient_id);
        }
        if let Some(ref search) = filters.search {
            qb.push(" AND c.title ILIKE ")
                .push_bind(format!("%{}%", search));
        }
        if let Some(ref tag) = filters.tag {
            qb.push(" AND ").push_bind(tag.clone()).push(" = ANY(c.tags)");
        }
        qb
    }

    pub async fn update_conversation(
        state: &AppState,
        auth: &AuthContext,
        conversation_id: Uuid,
        input: UpdateConversationInput,
    ) -> Result<Conversation, AppError> {
        let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        require(access.caps.can_update, "can_update")?;

        if let Some(ref title) = input.title {
            if title.len() > 255 {
                return Err(AppError::validation("title", "title too long (max 255)"));
            }
        }

        let mut updated_fields = Vec::new();
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE conversations SET updated_at = NOW()");
        if let Some(ref title) = input.title {
            qb.push(", title = ").push_bind(title.clone());
            updated_fields.push("title".to_string());
        }
        if let Some(status) = input.status {
            qb.push(", status = ").push_bind(status.as_str());
            updated_fields.push("status".to_string());
        }
        if let Some(priority) = input.priority {
            qb.push(", priority = ").push_bind(priority.as_str());
            updated_fields.push("priority".to_string());
        }
        if let Some(ref tags) = input.tags {
            qb.push(", tags = ").push_bind(tags.clone());
            updated_fields.push("tags".to_string());
        }
        if updated_fields.is_empty() {
            return Err(AppError::validation("body", "no fields to update"));
        }
        qb.push(" WHERE id = ").push_bind(conversation_id);
        qb.push(" AND tenant_id = ").push_bind(auth.tenant_id);
        qb.build().execute(&state.db).await?;

        broadcast_event(
            &state.registry,
            Room::Conversation(conversation_id),
            auth.user_id,
            ServerEvent::ConversationUpdated {
                conversation_id,
                updated_fields,
            },
        )
        .await;

        Self::load(&state.db, auth.tenant_id, conversation_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Soft delete only; the row and its history survive.
    pub async fn delete_conversation(
        state: &AppState,
        auth: &AuthContext,
        conversation_id: Uuid,
    ) -> Result<(), AppError> {
        let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        require(access.caps.can_delete, "can_delete")?;

        sqlx::query(
            "UPDATE conversations SET is_deleted = TRUE, deleted_at = NOW(), deleted_by = $3, \
             updated_at = NOW() WHERE id = $1 AND tenant_id = $2",
        )
        .bind(conversation_id)
        .bind(auth.tenant_id)
        .bind(auth.user_id)
        .execute(&state.db)
        .await?;

        broadcast_event(
            &state.registry,
            Room::Conversation(conversation_id),
            auth.user_id,
            ServerEvent::ConversationUpdated {
                conversation_id,
                updated_fields: vec!["is_deleted".to_string()],
            },
        )
        .await;
        Ok(())
    }

    pub async fn add_participant(
        state: &AppState,
        auth: &AuthContext,
        conversation_id: Uuid,
        user_id: Uuid,
        role: UserRole,
    ) -> Result<(), AppError> {
        let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        require(access.caps.can_add_participant, "can_add_participant")?;

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversation_participants \
             WHERE conversation_id = $1 AND left_at IS NULL",
        )
        .bind(conversation_id)
        .fetch_one(&state.db)
        .await?;
        if active as usize >= MAX_PARTICIPANTS {
            return Err(AppError::validation(
                "participants",
                format!("conversation is limited to {MAX_PARTICIPANTS} participants"),
            ));
        }

        let snapshot = serde_json::to_value(capabilities(role, TenantRole::Member, true, false))
            .unwrap_or(serde_json::Value::Null);

        // append, or reactivate a historical record; an active record is a
        // validation error
        let result = sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id, role, permissions)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (conversation_id, user_id) DO UPDATE
                SET left_at = NULL, joined_at = NOW(), role = EXCLUDED.role,
                    permissions = EXCLUDED.permissions, unread_count = 0
                WHERE conversation_participants.left_at IS NOT NULL
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(snapshot)
        .execute(&state.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::validation(
                "user_id",
                "user is already an active participant",
            ));
        }

        broadcast_event(
            &state.registry,
            Room::Conversation(conversation_id),
            auth.user_id,
            ServerEvent::ParticipantAdded {
                conversation_id,
                participant_id: user_id,
                role,
            },
        )
        .await;
        broadcast_event(
            &state.registry,
            Room::User(user_id),
            auth.user_id,
            ServerEvent::ParticipantAdded {
                conversation_id,
                participant_id: user_id,
                role,
            },
        )
        .await;
        Ok(())
    }

    /// Soft removal: `left_at` is set, the record stays.
    pub async fn remove_participant(
        state: &AppState,
        auth: &AuthContext,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        // leaving on your own only needs participation
        if user_id != auth.user_id {
            require(access.caps.can_remove_participant, "can_remove_participant")?;
        } else if !access.is_participant {
            return Err(AppError::NotFound);
        }

        let result = sqlx::query(
            "UPDATE conversation_participants SET left_at = NOW() \
             WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&state.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        broadcast_event(
            &state.registry,
            Room::Conversation(conversation_id),
            auth.user_id,
            ServerEvent::ParticipantRemoved {
                conversation_id,
                participant_id: user_id,
            },
        )
        .await;
        Ok(())
    }

    /// Zero the caller's unread counter and stamp `last_read_at`.
    /// Idempotent, and silently a no-op for non-participants.
    pub async fn mark_conversation_read(
        db: &PgPool,
        auth: &AuthContext,
        conversation_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE conversation_participants p SET unread_count = 0, last_read_at = NOW() \
             FROM conversations c \
             WHERE p.conversation_id = c.id AND c.tenant_id = $3 \
               AND p.conversation_id = $1 AND p.user_id = $2 AND p.left_at IS NULL",
        )
        .bind(conversation_id)
        .bind(auth.user_id)
        .bind(auth.tenant_id)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Connect-time snapshot: the caller's active (non-closed) conversations
    /// with per-user unread counts.
    pub async fn snapshot(
        db: &PgPool,
        auth: &AuthContext,
        limit: i64,
    ) -> Result<Vec<serde_json::Value>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.kind, c.title, c.status, c.priority,
                   c.last_message_at, c.last_message_id, p.unread_count
            FROM conversations c
            JOIN conversation_participants p
              ON p.conversation_id = c.id AND p.left_at IS NULL AND p.user_id = $2
            WHERE c.tenant_id = $1 AND NOT c.is_deleted AND c.status <> 'closed'
            ORDER BY c.last_message_at DESC NULLS LAST, c.created_at DESC
            LIMIT $3
            "#,
        )
        .bind(auth.tenant_id)
        .bind(auth.user_id)
        .bind(limit)
        .fetch_all(db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let id: Uuid = r.get("id");
                let kind: String = r.get("kind");
                let title: Option<String> = r.get("title");
                let status: String = r.get("status");
                let priority: String = r.get("priority");
                let last_message_at: Option<DateTime<Utc>> = r.get("last_message_at");
                let last_message_id: Option<Uuid> = r.get("last_message_id");
                let unread_count: i32 = r.get("unread_count");
                serde_json::json!({
                    "id": id,
                    "type": kind,
                    "title": title,
                    "status": status,
                    "priority": priority,
                    "last_message_at": last_message_at,
                    "last_message_id": last_message_id,
                    "unread_count": unread_count,
                })
            })
            .collect())
    }

    pub(crate) async fn load(
        db: &PgPool,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, kind, title, status, priority, tags, patient_id, case_id, \
             last_message_at, last_message_id, created_by, is_encrypted, encryption_key_id, \
             clinical_context, is_deleted, deleted_at, deleted_by, created_at, updated_at \
             FROM conversations WHERE id = $1 AND tenant_id = $2 AND NOT is_deleted",
        )
        .bind(conversation_id)
        .bind(tenant_id)
        .fetch_optional(db)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let mut conversations = vec![Self::conversation_from_row(&row)?];
        Self::attach_participants(db, &mut conversations).await?;
        Ok(conversations.pop())
    }

    fn conversation_from_row(row: &PgRow) -> Result<Conversation, AppError> {
        let kind: String = row.get("kind");
        let status: String = row.get("status");
        let priority: String = row.get("priority");
        Ok(Conversation {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            kind: ConversationType::parse(&kind).ok_or(AppError::Internal)?,
            title: row.get("title"),
            participants: Vec::new(),
            patient_id: row.get("patient_id"),
            case_id: row.get("case_id"),
            status: ConversationStatus::parse(&status).ok_or(AppError::Internal)?,
            priority: Priority::parse(&priority).ok_or(AppError::Internal)?,
            tags: row.get("tags"),
            last_message_at: row.get("last_message_at"),
            last_message_id: row.get("last_message_id"),
            created_by: row.get("created_by"),
            metadata: ConversationMetadata {
                is_encrypted: row.get("is_encrypted"),
                encryption_key_id: row.get("encryption_key_id"),
                clinical_context: row.get("clinical_context"),
            },
            is_deleted: row.get("is_deleted"),
            deleted_at: row.get("deleted_at"),
            deleted_by: row.get("deleted_by"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn attach_participants(
        db: &PgPool,
        conversations: &mut [Conversation],
    ) -> Result<(), AppError> {
        if conversations.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = conversations.iter().map(|c| c.id).collect();
        let rows = sqlx::query(
            "SELECT conversation_id, user_id, role, joined_at, left_at, last_read_at, \
             unread_count, permissions \
             FROM conversation_participants WHERE conversation_id = ANY($1) \
             ORDER BY joined_at ASC",
        )
        .bind(&ids)
        .fetch_all(db)
        .await?;

        let mut by_conversation: HashMap<Uuid, Vec<Participant>> = HashMap::new();
        for row in rows {
            let conversation_id: Uuid = row.get("conversation_id");
            let role: String = row.get("role");
            by_conversation
                .entry(conversation_id)
                .or_default()
                .push(Participant {
                    user_id: row.get("user_id"),
                    role: UserRole::parse(&role).ok_or(AppError::Internal)?,
                    joined_at: row.get("joined_at"),
                    left_at: row.get("left_at"),
                    last_read_at: row.get("last_read_at"),
                    unread_count: row.get("unread_count"),
                    permissions: row.get("permissions"),
                });
        }
        for conversation in conversations.iter_mut() {
            conversation.participants = by_conversation
                .remove(&conversation.id)
                .unwrap_or_default();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(role: UserRole) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            role,
            tenant_role: TenantRole::Member,
        }
    }

    fn input(kind: ConversationType, participants: Vec<ParticipantInput>) -> CreateConversationInput {
        CreateConversationInput {
            kind,
            title: None,
            participants,
            patient_id: None,
            case_id: None,
            priority: None,
            tags: vec![],
            clinical_context: None,
            skip_validation: false,
        }
    }

    // roster assembly is pure; exercise the creator-inclusion rules without a DB
    fn roster_for(auth: &AuthContext, input: &CreateConversationInput) -> Vec<(Uuid, UserRole)> {
        let mut roster: Vec<(Uuid, UserRole)> = Vec::new();
        for p in &input.participants {
            if !roster.iter().any(|(id, _)| *id == p.user_id) {
                roster.push((p.user_id, p.role));
            }
        }
        if !roster.iter().any(|(id, _)| *id == auth.user_id) {
            roster.insert(0, (auth.user_id, auth.role));
        }
        roster
    }

    #[test]
    fn creator_absent_from_list_is_prepended() {
        let auth = auth(UserRole::Doctor);
        let other = ParticipantInput {
            user_id: Uuid::new_v4(),
            role: UserRole::Patient,
        };
        let roster = roster_for(&auth, &input(ConversationType::Direct, vec![other.clone()]));
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].0, auth.user_id);
        assert!(validate_composition(ConversationType::Direct, &roster).is_ok());
    }

    #[test]
    fn creator_present_in_list_is_not_duplicated() {
        let auth = auth(UserRole::Doctor);
        let me = ParticipantInput {
            user_id: auth.user_id,
            role: UserRole::Doctor,
        };
        let other = ParticipantInput {
            user_id: Uuid::new_v4(),
            role: UserRole::Patient,
        };
        let roster = roster_for(&auth, &input(ConversationType::Direct, vec![me, other]));
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn direct_with_two_others_fails_after_creator_inclusion() {
        // creator + two explicit others = 3 participants, invalid for direct
        let auth = auth(UserRole::Doctor);
        let others = vec![
            ParticipantInput {
                user_id: Uuid::new_v4(),
                role: UserRole::Patient,
            },
            ParticipantInput {
                user_id: Uuid::new_v4(),
                role: UserRole::Nurse,
            },
        ];
        let roster = roster_for(&auth, &input(ConversationType::Direct, others));
        assert!(validate_composition(ConversationType::Direct, &roster).is_err());
    }
}
