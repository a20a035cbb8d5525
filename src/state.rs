use crate::{
    config::Config,
    services::collaborators::{ContentCipher, FileStore, Notifier},
    websocket::{PresenceTracker, SessionRegistry, TypingTracker},
};
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub registry: SessionRegistry,
    pub presence: PresenceTracker,
    pub typing: TypingTracker,
    pub config: Arc<Config>,
    pub cipher: Arc<dyn ContentCipher>,
    pub files: Arc<dyn FileStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(
        db: Pool<Postgres>,
        config: Arc<Config>,
        cipher: Arc<dyn ContentCipher>,
        files: Arc<dyn FileStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let typing = TypingTracker::new(Duration::from_millis(config.typing_ttl_ms));
        Self {
            db,
            registry: SessionRegistry::new(),
            presence: PresenceTracker::new(),
            typing,
            config,
            cipher,
            files,
            notifier,
        }
    }
}
