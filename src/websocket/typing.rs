//! Ephemeral typing indicators, never persisted. A `start` (re)arms a
//! fixed-duration inactivity timer keyed by (connection, conversation);
//! expiry or an explicit `stop` clears the keyed state, and the caller
//! broadcasts "stopped". Disconnection clears every entry the connection
//! owned.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

static GENERATION: AtomicU64 = AtomicU64::new(0);

struct TypingEntry {
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Clone)]
pub struct TypingTracker {
    ttl: Duration,
    inner: Arc<Mutex<HashMap<(Uuid, Uuid), TypingEntry>>>,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Arm (or re-arm) the inactivity timer. Returns true when this start
    /// began a typing episode, false when it merely extended one.
    /// `on_expire` fires only if the timer runs out before a stop.
    pub async fn start<F, Fut>(
        &self,
        connection_id: Uuid,
        conversation_id: Uuid,
        on_expire: F,
    ) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let key = (connection_id, conversation_id);
        let generation = GENERATION.fetch_add(1, Ordering::Relaxed) + 1;
        let ttl = self.ttl;
        let map = Arc::clone(&self.inner);

        let timer = tokio::spawn({
            let map = Arc::clone(&map);
            async move {
                tokio::time::sleep(ttl).await;
                let mut guard = map.lock().await;
                // only the task matching the live generation may expire the entry
                match guard.get(&key) {
                    Some(entry) if entry.generation == generation => {
                        guard.remove(&key);
                    }
                    _ => return,
                }
                drop(guard);
                on_expire().await;
            }
        });

        let mut guard = self.inner.lock().await;
        let fresh = match guard.insert(key, TypingEntry { generation, timer }) {
            Some(previous) => {
                previous.timer.abort();
                false
            }
            None => true,
        };
        fresh
    }

    /// Explicit stop. Returns true if the connection was typing in that
    /// conversation (the caller then broadcasts "stopped").
    pub async fn stop(&self, connection_id: Uuid, conversation_id: Uuid) -> bool {
        let mut guard = self.inner.lock().await;
        match guard.remove(&(connection_id, conversation_id)) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Clear all typing state owned by a connection; returns the
    /// conversations that still need a "stopped" broadcast.
    pub async fn disconnect(&self, connection_id: Uuid) -> Vec<Uuid> {
        let mut guard = self.inner.lock().await;
        let keys: Vec<(Uuid, Uuid)> = guard
            .keys()
            .filter(|(conn, _)| *conn == connection_id)
            .copied()
            .collect();
        let mut conversations = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = guard.remove(&key) {
                entry.timer.abort();
                conversations.push(key.1);
            }
        }
        conversations
    }

    pub async fn is_typing(&self, connection_id: Uuid, conversation_id: Uuid) -> bool {
        self.inner
            .lock()
            .await
            .contains_key(&(connection_id, conversation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn timer_expiry_fires_callback_once() {
        let tracker = TypingTracker::new(Duration::from_millis(100));
        let conn = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        assert!(
            tracker
                .start(conn, conversation, move || async move {
                    f.fetch_add(1, Ordering::SeqCst);
                })
                .await
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!tracker.is_typing(conn, conversation).await);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_rearms_instead_of_expiring() {
        let tracker = TypingTracker::new(Duration::from_millis(100));
        let conn = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        let fired = Arc::new(AtomicUsize::new(0));

        let f1 = Arc::clone(&fired);
        tracker
            .start(conn, conversation, move || async move {
                f1.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        // re-arm before expiry; the first timer must never fire
        let f2 = Arc::clone(&fired);
        let fresh = tracker
            .start(conn, conversation, move || async move {
                f2.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(!fresh);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(tracker.is_typing(conn, conversation).await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_suppresses_expiry() {
        let tracker = TypingTracker::new(Duration::from_millis(100));
        let conn = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        tracker
            .start(conn, conversation, move || async move {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(tracker.stop(conn, conversation).await);
        assert!(!tracker.stop(conn, conversation).await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_clears_every_conversation() {
        let tracker = TypingTracker::new(Duration::from_secs(5));
        let conn = Uuid::new_v4();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();

        tracker.start(conn, c1, || async {}).await;
        tracker.start(conn, c2, || async {}).await;

        let mut cleared = tracker.disconnect(conn).await;
        cleared.sort();
        let mut expected = vec![c1, c2];
        expected.sort();
        assert_eq!(cleared, expected);
        assert!(!tracker.is_typing(conn, c1).await);
    }
}
