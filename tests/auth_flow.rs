use chrono::Utc;
use clinic_comms_service::middleware::auth::{authenticate, Claims};
use clinic_comms_service::models::{TenantRole, UserRole};
use jsonwebtoken::{encode, EncodingKey, Header};
use uuid::Uuid;

const SECRET: &str = "integration-secret-integration-secret-00";

fn issue(claims: &Claims) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn claims(role: &str, tenant_role: &str) -> Claims {
    Claims {
        sub: Uuid::new_v4().to_string(),
        tenant_id: Uuid::new_v4().to_string(),
        role: role.to_string(),
        tenant_role: tenant_role.to_string(),
        exp: Utc::now().timestamp() + 3600,
        iat: Utc::now().timestamp(),
    }
}

#[test]
fn valid_token_yields_the_encoded_identity() {
    let claims = claims("doctor", "admin");
    let ctx = authenticate(&issue(&claims), SECRET).unwrap();
    assert_eq!(ctx.user_id.to_string(), claims.sub);
    assert_eq!(ctx.tenant_id.to_string(), claims.tenant_id);
    assert_eq!(ctx.role, UserRole::Doctor);
    assert_eq!(ctx.tenant_role, TenantRole::Admin);
}

#[test]
fn expired_token_is_rejected() {
    let mut claims = claims("nurse", "member");
    claims.exp = Utc::now().timestamp() - 60;
    claims.iat = Utc::now().timestamp() - 3600;
    assert!(authenticate(&issue(&claims), SECRET).is_err());
}

#[test]
fn wrong_secret_is_rejected() {
    let claims = claims("doctor", "member");
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"some-other-secret-some-other-secret-00"),
    )
    .unwrap();
    assert!(authenticate(&token, SECRET).is_err());
}

#[test]
fn unknown_role_is_rejected() {
    let claims = claims("janitor", "member");
    assert!(authenticate(&issue(&claims), SECRET).is_err());
}
