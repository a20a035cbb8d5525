//! Authorization guards that resolve the target entity, compute the boolean
//! facts, and evaluate the capability matrix — so handlers cannot
//! accidentally skip a check.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::capabilities::{capabilities, Capabilities};
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::{ConversationStatus, ConversationType, UserRole};

/// Extractor for the authenticated caller (set by the auth middleware).
#[derive(Debug, Clone, Copy)]
pub struct Auth(pub AuthContext);

#[async_trait]
impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .copied()
            .map(Auth)
            .ok_or(AppError::Unauthorized)
    }
}

/// A conversation resolved for a specific caller, with the capability matrix
/// already evaluated against their participation facts.
#[derive(Debug, Clone)]
pub struct ConversationAccess {
    pub conversation_id: Uuid,
    pub kind: ConversationType,
    pub status: ConversationStatus,
    pub is_encrypted: bool,
    pub encryption_key_id: Option<String>,
    pub is_participant: bool,
    pub participant_role: Option<UserRole>,
    pub caps: Capabilities,
}

impl ConversationAccess {
    /// One query resolves both visibility and participation, using the
    /// (conversation_id, user_id) index.
    ///
    /// An absent row and a row the caller cannot view collapse into the same
    /// NotFound so cross-tenant existence never leaks.
    pub async fn verify(
        db: &PgPool,
        auth: &AuthContext,
        conversation_id: Uuid,
    ) -> Result<Self, AppError> {
        let row = sqlx::query(
            r#"
            SELECT c.kind, c.status, c.is_encrypted, c.encryption_key_id,
                   p.role AS participant_role
            FROM conversations c
            LEFT JOIN conversation_participants p
                ON p.conversation_id = c.id
               AND p.user_id = $3
               AND p.left_at IS NULL
            WHERE c.id = $1 AND c.tenant_id = $2 AND NOT c.is_deleted
            "#,
        )
        .bind(conversation_id)
        .bind(auth.tenant_id)
        .bind(auth.user_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)?;

        let kind: String = row.get("kind");
        let status: String = row.get("status");
        let is_encrypted: bool = row.get("is_encrypted");
        let encryption_key_id: Option<String> = row.try_get("encryption_key_id").ok().flatten();
        let participant_role: Option<String> = row.try_get("participant_role").ok().flatten();

        Self::resolve(
            auth,
            conversation_id,
            ConversationType::parse(&kind).ok_or(AppError::Internal)?,
            ConversationStatus::parse(&status).ok_or(AppError::Internal)?,
            is_encrypted,
            encryption_key_id,
            participant_role.and_then(|r| UserRole::parse(&r)),
        )
    }

    /// Pure half of `verify`: evaluate the matrix against the resolved row.
    /// A caller who cannot view gets the same NotFound as an absent row.
    fn resolve(
        auth: &AuthContext,
        conversation_id: Uuid,
        kind: ConversationType,
        status: ConversationStatus,
        is_encrypted: bool,
        encryption_key_id: Option<String>,
        participant_role: Option<UserRole>,
    ) -> Result<Self, AppError> {
        let is_participant = participant_role.is_some();
        let caps = capabilities(auth.role, auth.tenant_role, is_participant, false);

        if !caps.can_view {
            return Err(AppError::NotFound);
        }

        Ok(Self {
            conversation_id,
            kind,
            status,
            is_encrypted,
            encryption_key_id,
            is_participant,
            participant_role,
            caps,
        })
    }

    /// Re-evaluate the matrix with sender identity known (edit/delete paths).
    pub fn caps_as_sender(&self, auth: &AuthContext, is_sender: bool) -> Capabilities {
        capabilities(
            auth.role,
            auth.tenant_role,
            self.is_participant,
            is_sender,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::require;
    use crate::models::TenantRole;

    fn auth(role: UserRole, tenant_role: TenantRole) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            role,
            tenant_role,
        }
    }

    fn resolve(auth: &AuthContext, participant_role: Option<UserRole>) -> Result<ConversationAccess, AppError> {
        ConversationAccess::resolve(
            auth,
            Uuid::new_v4(),
            ConversationType::Group,
            ConversationStatus::Active,
            false,
            None,
            participant_role,
        )
    }

    #[test]
    fn non_participant_sees_not_found_never_permission_denied() {
        // Conversation exists in the caller's tenant; they are just not on it.
        let caller = auth(UserRole::Doctor, TenantRole::Member);
        let err = resolve(&caller, None).unwrap_err();
        assert!(matches!(err, AppError::NotFound), "got {err:?}");
    }

    #[test]
    fn participant_lacking_a_capability_gets_permission_denied() {
        let caller = auth(UserRole::Patient, TenantRole::Member);
        let access = resolve(&caller, Some(UserRole::Patient)).unwrap();
        let err = require(access.caps.can_add_participant, "can_add_participant").unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied("can_add_participant")));
    }

    #[test]
    fn super_admin_resolves_without_participation() {
        let caller = auth(UserRole::SuperAdmin, TenantRole::Owner);
        let access = resolve(&caller, None).unwrap();
        assert!(!access.is_participant);
        assert!(access.caps.can_view);
    }
}
