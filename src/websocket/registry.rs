//! Process-local session registry. Rooms and membership are keyed by
//! connection id, so one user's simultaneous connections are independent.
//! A multi-instance deployment unifies this state through an external
//! pub/sub backplane; this registry is the single seam it would replace.

use axum::extract::ws::Message;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A real-time fan-out scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Conversation(Uuid),
    User(Uuid),
    Tenant(Uuid),
}

struct ConnectionHandle {
    user_id: Uuid,
    sender: UnboundedSender<Message>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<Uuid, ConnectionHandle>,
    rooms: HashMap<Room, HashSet<Uuid>>,
    joined: HashMap<Uuid, HashSet<Room>>,
}

#[derive(Default, Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; events for it flow through the returned
    /// receiver.
    pub async fn register(&self, connection_id: Uuid, user_id: Uuid) -> UnboundedReceiver<Message> {
        let (tx, rx) = unbounded_channel();
        let mut guard = self.inner.write().await;
        guard
            .connections
            .insert(connection_id, ConnectionHandle { user_id, sender: tx });
        guard.joined.entry(connection_id).or_default();
        rx
    }

    /// Remove the connection from every room. Returns the conversation ids
    /// it had joined, for typing-state cleanup.
    pub async fn unregister(&self, connection_id: Uuid) -> Vec<Uuid> {
        let mut guard = self.inner.write().await;
        guard.connections.remove(&connection_id);
        let rooms = guard.joined.remove(&connection_id).unwrap_or_default();
        let mut conversations = Vec::new();
        for room in rooms {
            if let Some(members) = guard.rooms.get_mut(&room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    guard.rooms.remove(&room);
                }
            }
            if let Room::Conversation(id) = room {
                conversations.push(id);
            }
        }
        conversations
    }

    pub async fn join(&self, connection_id: Uuid, room: Room) {
        let mut guard = self.inner.write().await;
        if !guard.connections.contains_key(&connection_id) {
            return;
        }
        guard.rooms.entry(room).or_default().insert(connection_id);
        guard.joined.entry(connection_id).or_default().insert(room);
    }

    pub async fn leave(&self, connection_id: Uuid, room: Room) {
        let mut guard = self.inner.write().await;
        if let Some(members) = guard.rooms.get_mut(&room) {
            members.remove(&connection_id);
            if members.is_empty() {
                guard.rooms.remove(&room);
            }
        }
        if let Some(rooms) = guard.joined.get_mut(&connection_id) {
            rooms.remove(&room);
        }
    }

    pub async fn is_joined(&self, connection_id: Uuid, room: Room) -> bool {
        self.inner
            .read()
            .await
            .rooms
            .get(&room)
            .map(|members| members.contains(&connection_id))
            .unwrap_or(false)
    }

    /// Deliver to every live connection in the room; dead senders are
    /// dropped lazily.
    pub async fn broadcast(&self, room: Room, msg: Message) {
        let mut guard = self.inner.write().await;
        let Some(members) = guard.rooms.get(&room) else {
            return;
        };
        let stale: Vec<Uuid> = members
            .iter()
            .filter(|conn| {
                guard
                    .connections
                    .get(conn)
                    .map(|h| h.sender.send(msg.clone()).is_err())
                    .unwrap_or(true)
            })
            .copied()
            .collect();
        for conn in stale {
            guard.connections.remove(&conn);
            if let Some(members) = guard.rooms.get_mut(&room) {
                members.remove(&conn);
            }
        }
    }

    /// Same as `broadcast` but skips every connection owned by `except_user`
    /// (used so a sender does not echo its own mutation).
    pub async fn broadcast_except(&self, room: Room, except_user: Uuid, msg: Message) {
        let guard = self.inner.read().await;
        let Some(members) = guard.rooms.get(&room) else {
            return;
        };
        for conn in members {
            if let Some(handle) = guard.connections.get(conn) {
                if handle.user_id != except_user {
                    let _ = handle.sender.send(msg.clone());
                }
            }
        }
    }

    pub async fn send_to(&self, connection_id: Uuid, msg: Message) {
        let guard = self.inner.read().await;
        if let Some(handle) = guard.connections.get(&connection_id) {
            let _ = handle.sender.send(msg);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Message {
        Message::Text(s.to_string())
    }

    #[tokio::test]
    async fn broadcast_reaches_room_members_only() {
        let registry = SessionRegistry::new();
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();
        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        let mut rx_a = registry.register(conn_a, user_a).await;
        let mut rx_b = registry.register(conn_b, user_b).await;
        registry.join(conn_a, Room::Conversation(conversation)).await;

        registry
            .broadcast(Room::Conversation(conversation), text("hello"))
            .await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_except_skips_all_of_a_users_connections() {
        let registry = SessionRegistry::new();
        let sender = Uuid::new_v4();
        let other = Uuid::new_v4();
        let conn_s1 = Uuid::new_v4();
        let conn_s2 = Uuid::new_v4();
        let conn_o = Uuid::new_v4();
        let room = Room::Conversation(Uuid::new_v4());

        let mut rx_s1 = registry.register(conn_s1, sender).await;
        let mut rx_s2 = registry.register(conn_s2, sender).await;
        let mut rx_o = registry.register(conn_o, other).await;
        for conn in [conn_s1, conn_s2, conn_o] {
            registry.join(conn, room).await;
        }

        registry.broadcast_except(room, sender, text("evt")).await;

        assert!(rx_s1.try_recv().is_err());
        assert!(rx_s2.try_recv().is_err());
        assert!(rx_o.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unregister_reports_joined_conversations() {
        let registry = SessionRegistry::new();
        let conn = Uuid::new_v4();
        let user = Uuid::new_v4();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();

        let _rx = registry.register(conn, user).await;
        registry.join(conn, Room::Conversation(c1)).await;
        registry.join(conn, Room::Conversation(c2)).await;
        registry.join(conn, Room::User(user)).await;

        let mut conversations = registry.unregister(conn).await;
        conversations.sort();
        let mut expected = vec![c1, c2];
        expected.sort();
        assert_eq!(conversations, expected);
        assert_eq!(registry.connection_count().await, 0);
    }
}
