use crate::error::AppError;
use crate::models::{TenantRole, UserRole};
use crate::state::AppState;
use axum::extract::State;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,
    pub tenant_id: String,
    pub role: String,
    #[serde(default = "default_tenant_role")]
    pub tenant_role: String,
    pub exp: i64,
    pub iat: i64,
}

fn default_tenant_role() -> String {
    "member".to_string()
}

/// Authenticated identity attached to every request and every live
/// connection. Client-asserted ids never supersede it.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: UserRole,
    pub tenant_role: TenantRole,
}

impl AuthContext {
    pub fn from_claims(claims: &Claims) -> Result<Self, AppError> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;
        let tenant_id = Uuid::parse_str(&claims.tenant_id).map_err(|_| AppError::Unauthorized)?;
        let role = UserRole::parse(&claims.role).ok_or(AppError::Unauthorized)?;
        let tenant_role = TenantRole::parse(&claims.tenant_role).ok_or(AppError::Unauthorized)?;
        Ok(Self {
            user_id,
            tenant_id,
            role,
            tenant_role,
        })
    }
}

/// Validate a bearer token and extract claims (HS256).
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized)
}

pub fn authenticate(token: &str, secret: &str) -> Result<AuthContext, AppError> {
    let claims = verify_jwt(token, secret)?;
    AuthContext::from_claims(&claims)
}

/// Middleware: extract the bearer token and stash an `AuthContext` in
/// request extensions. `/health` stays open.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, AppError> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized)?;

    let ctx = authenticate(token, &state.config.jwt_secret)?;
    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}
