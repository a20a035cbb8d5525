use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Inactivity window after which a typing indicator auto-expires.
    pub typing_ttl_ms: u64,
    /// Upper bound on conversations included in the connect-time snapshot.
    pub snapshot_limit: i64,
    pub max_message_length: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| crate::error::AppError::Config("JWT_SECRET missing".into()))?;
        if jwt_secret.len() < 32 {
            return Err(crate::error::AppError::Config(
                "JWT_SECRET must be at least 32 bytes".into(),
            ));
        }
        let typing_ttl_ms = env::var("TYPING_TTL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5_000);
        let snapshot_limit = env::var("SNAPSHOT_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);
        let max_message_length = env::var("MAX_MESSAGE_LENGTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10_000);

        Ok(Self {
            database_url,
            port,
            jwt_secret,
            typing_ttl_ms,
            snapshot_limit,
            max_message_length,
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/test".into(),
            port: 3000,
            jwt_secret: "test-secret-test-secret-test-secret-00".into(),
            typing_ttl_ms: 5_000,
            snapshot_limit: 100,
            max_message_length: 10_000,
        }
    }
}
