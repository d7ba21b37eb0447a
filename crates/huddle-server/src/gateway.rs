//! Socket connection lifecycle and event dispatch.
//!
//! The gateway owns no transport: it speaks in [`ClientEvent`]s and
//! [`ServerEvent`]s and drives the [`RoomRouter`], which keeps it fully
//! testable without a socket layer (the axum adapter lives in `ws.rs`).
//!
//! On connect the room set is derived from the store -- never from any cache
//! left behind by a previous connection of the same user.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use huddle_shared::protocol::{ClientEvent, Handshake, ServerEvent};
use huddle_shared::types::{ChatType, ConnectionId, UserId};

use crate::error::ServerError;
use crate::fanout::{DomainEvent, EventFanout};
use crate::presence::PresenceTracker;
use crate::rooms::{RoomId, RoomRouter};
use crate::service::ChatService;
use crate::SharedDatabase;

pub struct ChatGateway {
    store: SharedDatabase,
    service: Arc<ChatService>,
    router: RoomRouter,
    presence: PresenceTracker,
    fanout: EventFanout,
}

impl ChatGateway {
    pub fn new(
        store: SharedDatabase,
        service: Arc<ChatService>,
        router: RoomRouter,
        fanout: EventFanout,
    ) -> Self {
        let presence = PresenceTracker::new(store.clone());
        Self {
            store,
            service,
            router,
            presence,
            fanout,
        }
    }

    pub fn router(&self) -> &RoomRouter {
        &self.router
    }

    /// Accept a connection: register it, join the per-user room plus every
    /// org-scoped chat room derived from current membership, and go online.
    ///
    /// A handshake without an organization fails the connection.
    pub async fn handle_connect(
        &self,
        connection_id: ConnectionId,
        handshake: Handshake,
    ) -> Result<mpsc::Receiver<ServerEvent>, ServerError> {
        let Some(organization_id) = handshake.organization_id else {
            return Err(ServerError::BadRequest(
                "organizationId is required in the connection handshake".to_string(),
            ));
        };
        let user_id = handshake.user_id;

        let rx = self
            .router
            .register(connection_id, user_id, organization_id)
            .await;

        let chat_ids = {
            let db = self.store.lock().await;
            db.chat_ids_for_member(user_id, organization_id)
        };
        let chat_ids = match chat_ids {
            Ok(ids) => ids,
            Err(e) => {
                // Fail the whole connection rather than leaving it half-joined.
                self.router.unregister(connection_id).await;
                return Err(e.into());
            }
        };

        for chat_id in &chat_ids {
            self.router
                .join(connection_id, RoomId::Chat(*chat_id))
                .await;
        }

        let update = match self.presence.set_online(user_id).await {
            Ok(update) => update,
            Err(e) => {
                self.router.unregister(connection_id).await;
                return Err(e);
            }
        };
        self.fanout.publish(DomainEvent::PresenceChanged {
            user_id: update.user_id,
            status: update.status,
            last_seen_at: update.last_seen_at,
        });

        info!(
            connection = %connection_id,
            user = %user_id,
            org = %organization_id,
            chat_rooms = chat_ids.len(),
            "socket connected"
        );

        Ok(rx)
    }

    /// Tear down a connection.  The user goes offline only when this was
    /// their last live connection.
    pub async fn handle_disconnect(&self, connection_id: ConnectionId) {
        let Some((user_id, _organization_id)) = self.router.unregister(connection_id).await
        else {
            return;
        };

        if self.router.user_connection_count(user_id).await == 0 {
            match self.presence.set_offline(user_id).await {
                Ok(update) => self.fanout.publish(DomainEvent::PresenceChanged {
                    user_id: update.user_id,
                    status: update.status,
                    last_seen_at: update.last_seen_at,
                }),
                Err(e) => warn!(user = %user_id, error = %e, "failed to record offline presence"),
            }
        }

        info!(connection = %connection_id, user = %user_id, "socket disconnected");
    }

    /// Dispatch one inbound event.  An `Err` is delivered to the originating
    /// connection only; it never reaches a room and never leaves partial
    /// state behind.
    pub async fn handle_event(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), ServerError> {
        let Some((user_id, _organization_id)) = self.router.connection_user(connection_id).await
        else {
            return Err(ServerError::Forbidden("unknown connection".to_string()));
        };

        match event {
            ClientEvent::Join { chat_id } => {
                // Authorize before joining; a connection must never sit in a
                // room it is not entitled to, even transiently.
                self.service
                    .authorizer()
                    .resolve_membership(chat_id, user_id)
                    .await?;
                self.router
                    .join(connection_id, RoomId::Chat(chat_id))
                    .await;
                self.router
                    .send_to_connection(connection_id, ServerEvent::Joined { chat_id })
                    .await;
            }

            ClientEvent::Leave { chat_id } => {
                self.router
                    .leave(connection_id, RoomId::Chat(chat_id))
                    .await;
                self.router
                    .send_to_connection(connection_id, ServerEvent::Left { chat_id })
                    .await;
            }

            ClientEvent::Typing { chat_id, is_typing } => {
                let record = self
                    .service
                    .authorizer()
                    .resolve_membership(chat_id, user_id)
                    .await?;

                // The dispatcher must not re-query; resolve the direct peer
                // here.
                let direct_peer = if record.chat.chat_type == ChatType::Direct {
                    self.other_direct_member(record.chat.id, user_id).await?
                } else {
                    None
                };

                self.fanout.publish(DomainEvent::TypingChanged {
                    chat_id,
                    chat_type: record.chat.chat_type,
                    typist: user_id,
                    is_typing,
                    direct_peer,
                });
            }

            ClientEvent::Read {
                chat_id,
                message_ids,
            } => {
                self.service
                    .mark_messages_read(chat_id, &message_ids, user_id)
                    .await?;
            }

            ClientEvent::NewMessage { chat_id, message } => {
                // Persist-then-broadcast; the fan-out happens inside the
                // service once the write is durable.
                self.service.send_message(chat_id, message, user_id).await?;
            }
        }

        Ok(())
    }

    async fn other_direct_member(
        &self,
        chat_id: huddle_shared::types::ChatId,
        user_id: UserId,
    ) -> Result<Option<UserId>, ServerError> {
        let members = self.store.lock().await.member_user_ids(chat_id)?;
        Ok(members.into_iter().find(|id| *id != user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::Mutex;
    use tokio::time::timeout;

    use huddle_shared::protocol::MessageInput;
    use huddle_shared::types::{ChatId, OrganizationId, PresenceStatus};
    use huddle_shared::views::MessageQuery;
    use huddle_store::Database;

    use crate::fanout::spawn_dispatcher;
    use crate::service::CreateChatInput;

    struct Harness {
        _dir: tempfile::TempDir,
        store: SharedDatabase,
        gateway: ChatGateway,
        service: Arc<ChatService>,
        org: OrganizationId,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let store: SharedDatabase = Arc::new(Mutex::new(db));

        let router = RoomRouter::new();
        let (fanout, events) = EventFanout::channel();
        spawn_dispatcher(events, router.clone());

        let service = Arc::new(ChatService::new(store.clone(), fanout.clone()));
        let gateway = ChatGateway::new(store.clone(), service.clone(), router, fanout);

        Harness {
            _dir: dir,
            store,
            gateway,
            service,
            org: OrganizationId::new(),
        }
    }

    fn handshake(user: UserId, org: Option<OrganizationId>) -> Handshake {
        Handshake {
            user_id: user,
            organization_id: org,
        }
    }

    async fn seed_group(h: &Harness, creator: UserId, members: Vec<UserId>) -> ChatId {
        h.service
            .create_chat(
                CreateChatInput {
                    name: Some("team room".into()),
                    description: None,
                    chat_type: huddle_shared::types::ChatType::Group,
                    visibility: None,
                    organization_id: h.org,
                    project_id: None,
                    members,
                    settings: None,
                    avatar_url: None,
                },
                creator,
            )
            .await
            .unwrap()
            .id
    }

    async fn recv_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Connecting publishes presence broadcasts that land on the connection's
    /// own queue; skip them when a test is after something else.
    async fn recv_skipping_presence(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
        loop {
            let event = recv_event(rx).await;
            if !matches!(event, ServerEvent::UserStatusChanged { .. }) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn connect_without_organization_is_refused() {
        let h = harness().await;
        let conn = ConnectionId::new();

        let err = h
            .gateway
            .handle_connect(conn, handshake(UserId::new(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
        assert!(h.gateway.router().connection_user(conn).await.is_none());
    }

    #[tokio::test]
    async fn connect_derives_rooms_from_membership() {
        let h = harness().await;
        let user = UserId::new();
        let chat_id = seed_group(&h, user, vec![]).await;

        let conn = ConnectionId::new();
        let _rx = h
            .gateway
            .handle_connect(conn, handshake(user, Some(h.org)))
            .await
            .unwrap();

        let rooms = h.gateway.router().connection_rooms(conn).await.unwrap();
        assert!(rooms.contains(&RoomId::User(user)));
        assert!(rooms.contains(&RoomId::Chat(chat_id)));
    }

    #[tokio::test]
    async fn reconnect_recomputes_the_room_set() {
        let h = harness().await;
        let user = UserId::new();
        let admin = UserId::new();

        let conn = ConnectionId::new();
        let _rx = h
            .gateway
            .handle_connect(conn, handshake(user, Some(h.org)))
            .await
            .unwrap();
        let rooms = h.gateway.router().connection_rooms(conn).await.unwrap();
        assert_eq!(rooms.len(), 1); // just the user room

        // Membership changes while the connection is up...
        let chat_id = seed_group(&h, admin, vec![user]).await;
        let rooms = h.gateway.router().connection_rooms(conn).await.unwrap();
        assert!(!rooms.contains(&RoomId::Chat(chat_id)));

        // ...and the next connection sees exactly the store-derived set.
        h.gateway.handle_disconnect(conn).await;
        let conn2 = ConnectionId::new();
        let _rx2 = h
            .gateway
            .handle_connect(conn2, handshake(user, Some(h.org)))
            .await
            .unwrap();
        let rooms = h.gateway.router().connection_rooms(conn2).await.unwrap();
        assert!(rooms.contains(&RoomId::Chat(chat_id)));
    }

    #[tokio::test]
    async fn join_requires_membership_and_leaves_no_partial_state() {
        let h = harness().await;
        let owner = UserId::new();
        let stranger = UserId::new();
        let chat_id = seed_group(&h, owner, vec![]).await;

        let conn = ConnectionId::new();
        let _rx = h
            .gateway
            .handle_connect(conn, handshake(stranger, Some(h.org)))
            .await
            .unwrap();

        let err = h
            .gateway
            .handle_event(conn, ClientEvent::Join { chat_id })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));

        let rooms = h.gateway.router().connection_rooms(conn).await.unwrap();
        assert!(!rooms.contains(&RoomId::Chat(chat_id)));
    }

    #[tokio::test]
    async fn explicit_join_acks_to_the_connection() {
        let h = harness().await;
        let member = UserId::new();
        let admin = UserId::new();
        let chat_id = seed_group(&h, admin, vec![]).await;

        let conn = ConnectionId::new();
        let mut rx = h
            .gateway
            .handle_connect(conn, handshake(member, Some(h.org)))
            .await
            .unwrap();

        // Becomes a member after connecting, then explicitly joins.
        h.service
            .add_members(
                chat_id,
                crate::service::AddMembersInput {
                    user_ids: vec![member],
                    role: None,
                },
                admin,
            )
            .await
            .unwrap();

        // The invite notice arrives on the member's user room.
        let ServerEvent::ChatInvite { .. } = recv_skipping_presence(&mut rx).await else {
            panic!("expected chatInvite");
        };

        h.gateway
            .handle_event(conn, ClientEvent::Join { chat_id })
            .await
            .unwrap();
        let ServerEvent::Joined { chat_id: acked } = recv_skipping_presence(&mut rx).await else {
            panic!("expected joined ack");
        };
        assert_eq!(acked, chat_id);
    }

    #[tokio::test]
    async fn new_message_persists_then_broadcasts() {
        let h = harness().await;
        let user = UserId::new();
        let chat_id = seed_group(&h, user, vec![]).await;

        let conn = ConnectionId::new();
        let mut rx = h
            .gateway
            .handle_connect(conn, handshake(user, Some(h.org)))
            .await
            .unwrap();

        h.gateway
            .handle_event(
                conn,
                ClientEvent::NewMessage {
                    chat_id,
                    message: MessageInput {
                        content: "over the wire".into(),
                        message_type: Default::default(),
                        attachments: vec![],
                        mentions: vec![],
                        reply_to: None,
                    },
                },
            )
            .await
            .unwrap();

        // Persisted first...
        let (messages, _) = h
            .store
            .lock()
            .await
            .list_messages(chat_id, &MessageQuery::default())
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "over the wire");

        // ...then broadcast to the chat room the connection already joined.
        let ServerEvent::NewMessage(view) = recv_skipping_presence(&mut rx).await else {
            panic!("expected newMessage");
        };
        assert_eq!(view.content, "over the wire");
    }

    #[tokio::test]
    async fn typing_in_direct_chat_reaches_the_peer() {
        let h = harness().await;
        let a = UserId::new();
        let b = UserId::new();

        let chat = h
            .service
            .create_chat(
                CreateChatInput {
                    name: None,
                    description: None,
                    chat_type: huddle_shared::types::ChatType::Direct,
                    visibility: None,
                    organization_id: h.org,
                    project_id: None,
                    members: vec![b],
                    settings: None,
                    avatar_url: None,
                },
                a,
            )
            .await
            .unwrap();

        let conn_a = ConnectionId::new();
        let _rx_a = h
            .gateway
            .handle_connect(conn_a, handshake(a, Some(h.org)))
            .await
            .unwrap();
        let conn_b = ConnectionId::new();
        let mut rx_b = h
            .gateway
            .handle_connect(conn_b, handshake(b, Some(h.org)))
            .await
            .unwrap();

        h.gateway
            .handle_event(
                conn_a,
                ClientEvent::Typing {
                    chat_id: chat.id,
                    is_typing: true,
                },
            )
            .await
            .unwrap();

        let ServerEvent::Typing {
            user_id,
            is_me_typing,
            is_typing,
            ..
        } = recv_skipping_presence(&mut rx_b).await
        else {
            panic!("expected typing event");
        };
        assert_eq!(user_id, a);
        assert!(is_typing);
        assert!(is_me_typing);
    }

    #[tokio::test]
    async fn presence_goes_offline_only_after_last_disconnect() {
        let h = harness().await;
        let user = UserId::new();

        let tab_a = ConnectionId::new();
        let tab_b = ConnectionId::new();
        let _rx_a = h
            .gateway
            .handle_connect(tab_a, handshake(user, Some(h.org)))
            .await
            .unwrap();
        let _rx_b = h
            .gateway
            .handle_connect(tab_b, handshake(user, Some(h.org)))
            .await
            .unwrap();

        h.gateway.handle_disconnect(tab_a).await;
        let status = h
            .store
            .lock()
            .await
            .user_summary(user)
            .unwrap()
            .unwrap()
            .status;
        assert_eq!(status, PresenceStatus::Online);

        h.gateway.handle_disconnect(tab_b).await;
        let status = h
            .store
            .lock()
            .await
            .user_summary(user)
            .unwrap()
            .unwrap()
            .status;
        assert_eq!(status, PresenceStatus::Offline);
    }
}
