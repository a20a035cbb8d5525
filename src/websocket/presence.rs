//! Presence is the aggregate of live connections per user: online iff the
//! connection set is non-empty. Only edge transitions (first connection in,
//! last connection out) are reported, so callers broadcast exactly one
//! change per flip.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default, Clone)]
pub struct PresenceTracker {
    inner: Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this connection brought the user online.
    pub async fn connection_opened(&self, user_id: Uuid, connection_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        let set = guard.entry(user_id).or_default();
        let was_offline = set.is_empty();
        set.insert(connection_id);
        was_offline
    }

    /// Returns true when this was the user's last connection.
    pub async fn connection_closed(&self, user_id: Uuid, connection_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get_mut(&user_id) {
            Some(set) => {
                set.remove(&connection_id);
                if set.is_empty() {
                    guard.remove(&user_id);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner
            .read()
            .await
            .get(&user_id)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn two_connections_one_user() {
        let presence = PresenceTracker::new();
        let user = Uuid::new_v4();
        let conn1 = Uuid::new_v4();
        let conn2 = Uuid::new_v4();

        assert!(presence.connection_opened(user, conn1).await);
        // second connection does not re-announce online
        assert!(!presence.connection_opened(user, conn2).await);
        assert!(presence.is_online(user).await);

        // dropping one connection keeps the user online
        assert!(!presence.connection_closed(user, conn1).await);
        assert!(presence.is_online(user).await);

        // dropping the last flips to offline
        assert!(presence.connection_closed(user, conn2).await);
        assert!(!presence.is_online(user).await);
    }

    #[tokio::test]
    async fn closing_unknown_connection_is_harmless() {
        let presence = PresenceTracker::new();
        assert!(!presence.connection_closed(Uuid::new_v4(), Uuid::new_v4()).await);
    }
}
