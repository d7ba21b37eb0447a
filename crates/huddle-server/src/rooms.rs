//! Live connection-to-room routing.
//!
//! The router owns the volatile mapping between socket connections, the users
//! they represent, and the delivery rooms they subscribe to.  Room sets are
//! per-connection: a user with several tabs has fully independent entries,
//! each recomputed from the store on connect.  Nothing here is an
//! authorization source; membership is re-checked on every join and on every
//! mutating operation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use huddle_shared::constants::OUTBOUND_QUEUE_DEPTH;
use huddle_shared::protocol::ServerEvent;
use huddle_shared::types::{ChatId, ConnectionId, OrganizationId, UserId};

/// A named delivery group.  One per user, one per chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    User(UserId),
    Chat(ChatId),
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomId::User(id) => write!(f, "user_{id}"),
            RoomId::Chat(id) => write!(f, "chat_{id}"),
        }
    }
}

struct ConnectionEntry {
    user_id: UserId,
    organization_id: OrganizationId,
    tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<RoomId>,
}

#[derive(Default)]
struct RouterState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

#[derive(Clone)]
pub struct RoomRouter {
    state: Arc<RwLock<RouterState>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RouterState::default())),
        }
    }

    /// Register a connection and join its per-user room.  Returns the
    /// receiving half of the connection's outbound event queue.
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let user_room = RoomId::User(user_id);

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        state.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id,
                organization_id,
                tx,
                rooms: HashSet::from([user_room]),
            },
        );
        state
            .rooms
            .entry(user_room)
            .or_default()
            .insert(connection_id);

        info!(
            connection = %connection_id,
            user = %user_id,
            org = %organization_id,
            "connection registered"
        );

        rx
    }

    /// Tear down a connection and release every room it joined.  Returns the
    /// identity the connection represented, if it was known.
    pub async fn unregister(
        &self,
        connection_id: ConnectionId,
    ) -> Option<(UserId, OrganizationId)> {
        let mut state = self.state.write().await;
        let entry = state.connections.remove(&connection_id)?;

        for room in &entry.rooms {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }

        info!(connection = %connection_id, user = %entry.user_id, "connection unregistered");

        Some((entry.user_id, entry.organization_id))
    }

    /// Subscribe a connection to a room.  Returns `false` for unknown
    /// connections.
    pub async fn join(&self, connection_id: ConnectionId, room: RoomId) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(entry) = state.connections.get_mut(&connection_id) else {
            return false;
        };
        entry.rooms.insert(room);
        state.rooms.entry(room).or_default().insert(connection_id);

        debug!(connection = %connection_id, room = %room, "joined room");
        true
    }

    /// Unsubscribe a connection from a room.
    pub async fn leave(&self, connection_id: ConnectionId, room: RoomId) {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if let Some(entry) = state.connections.get_mut(&connection_id) {
            entry.rooms.remove(&room);
        }
        if let Some(members) = state.rooms.get_mut(&room) {
            members.remove(&connection_id);
            if members.is_empty() {
                state.rooms.remove(&room);
            }
        }

        debug!(connection = %connection_id, room = %room, "left room");
    }

    /// The identity behind a live connection.
    pub async fn connection_user(
        &self,
        connection_id: ConnectionId,
    ) -> Option<(UserId, OrganizationId)> {
        let state = self.state.read().await;
        state
            .connections
            .get(&connection_id)
            .map(|e| (e.user_id, e.organization_id))
    }

    /// The room set of a live connection.
    pub async fn connection_rooms(&self, connection_id: ConnectionId) -> Option<HashSet<RoomId>> {
        let state = self.state.read().await;
        state.connections.get(&connection_id).map(|e| e.rooms.clone())
    }

    /// Number of live connections for a user.
    pub async fn user_connection_count(&self, user_id: UserId) -> usize {
        let state = self.state.read().await;
        state
            .rooms
            .get(&RoomId::User(user_id))
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Deliver an event to every connection in a room.
    pub async fn broadcast(&self, room: RoomId, event: &ServerEvent) {
        self.deliver(room, event, None).await;
    }

    /// Deliver an event to a room, skipping every connection of one user.
    pub async fn broadcast_except(&self, room: RoomId, event: &ServerEvent, excluded: UserId) {
        self.deliver(room, event, Some(excluded)).await;
    }

    /// Deliver an event to every connection of one user.
    pub async fn send_to_user(&self, user_id: UserId, event: &ServerEvent) {
        self.broadcast(RoomId::User(user_id), event).await;
    }

    /// Deliver an event to one specific connection (acks, scoped errors).
    pub async fn send_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) {
        let state = self.state.read().await;
        if let Some(entry) = state.connections.get(&connection_id) {
            if entry.tx.try_send(event).is_err() {
                debug!(connection = %connection_id, "dropping event for slow connection");
            }
        }
    }

    /// Deliver an event to every live connection.
    pub async fn broadcast_all(&self, event: &ServerEvent) {
        let state = self.state.read().await;
        for (connection_id, entry) in &state.connections {
            if entry.tx.try_send(event.clone()).is_err() {
                debug!(connection = %connection_id, "dropping event for slow connection");
            }
        }
    }

    async fn deliver(&self, room: RoomId, event: &ServerEvent, excluded: Option<UserId>) {
        let state = self.state.read().await;
        let Some(members) = state.rooms.get(&room) else {
            return;
        };

        for connection_id in members {
            let Some(entry) = state.connections.get(connection_id) else {
                continue;
            };
            if excluded == Some(entry.user_id) {
                continue;
            }
            if entry.tx.try_send(event.clone()).is_err() {
                debug!(
                    room = %room,
                    connection = %connection_id,
                    "dropping event for slow connection"
                );
            }
        }
    }
}

impl Default for RoomRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> ServerEvent {
        ServerEvent::Error {
            message: "ping".into(),
        }
    }

    #[tokio::test]
    async fn register_joins_user_room() {
        let router = RoomRouter::new();
        let user = UserId::new();
        let conn = ConnectionId::new();

        let _rx = router.register(conn, user, OrganizationId::new()).await;
        assert_eq!(router.user_connection_count(user).await, 1);

        let rooms = router.connection_rooms(conn).await.unwrap();
        assert!(rooms.contains(&RoomId::User(user)));
    }

    #[tokio::test]
    async fn broadcast_reaches_only_room_members() {
        let router = RoomRouter::new();
        let org = OrganizationId::new();
        let chat = ChatId::new();
        let room = RoomId::Chat(chat);

        let in_room = ConnectionId::new();
        let outside = ConnectionId::new();
        let mut rx_in = router.register(in_room, UserId::new(), org).await;
        let mut rx_out = router.register(outside, UserId::new(), org).await;
        router.join(in_room, room).await;

        router.broadcast(room, &ping()).await;

        assert!(rx_in.try_recv().is_ok());
        assert!(rx_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_except_skips_every_connection_of_user() {
        let router = RoomRouter::new();
        let org = OrganizationId::new();
        let room = RoomId::Chat(ChatId::new());
        let excluded = UserId::new();

        let tab_a = ConnectionId::new();
        let tab_b = ConnectionId::new();
        let other = ConnectionId::new();
        let mut rx_a = router.register(tab_a, excluded, org).await;
        let mut rx_b = router.register(tab_b, excluded, org).await;
        let mut rx_other = router.register(other, UserId::new(), org).await;
        for conn in [tab_a, tab_b, other] {
            router.join(conn, room).await;
        }

        router.broadcast_except(room, &ping(), excluded).await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
        assert!(rx_other.try_recv().is_ok());
    }

    #[tokio::test]
    async fn room_sets_are_per_connection() {
        let router = RoomRouter::new();
        let org = OrganizationId::new();
        let user = UserId::new();
        let room = RoomId::Chat(ChatId::new());

        let tab_a = ConnectionId::new();
        let tab_b = ConnectionId::new();
        let mut rx_a = router.register(tab_a, user, org).await;
        let mut rx_b = router.register(tab_b, user, org).await;
        router.join(tab_a, room).await;

        router.broadcast(room, &ping()).await;

        // Only the tab that joined the chat room receives the event.
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_releases_all_rooms() {
        let router = RoomRouter::new();
        let org = OrganizationId::new();
        let user = UserId::new();
        let room = RoomId::Chat(ChatId::new());
        let conn = ConnectionId::new();

        let _rx = router.register(conn, user, org).await;
        router.join(conn, room).await;

        let identity = router.unregister(conn).await;
        assert_eq!(identity, Some((user, org)));
        assert_eq!(router.user_connection_count(user).await, 0);
        assert!(router.connection_rooms(conn).await.is_none());

        // A second unregister is a no-op.
        assert!(router.unregister(conn).await.is_none());
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_tab() {
        let router = RoomRouter::new();
        let org = OrganizationId::new();
        let user = UserId::new();

        let tab_a = ConnectionId::new();
        let tab_b = ConnectionId::new();
        let mut rx_a = router.register(tab_a, user, org).await;
        let mut rx_b = router.register(tab_b, user, org).await;

        router.send_to_user(user, &ping()).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }
}
