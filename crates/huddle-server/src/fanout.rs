//! Typed domain event bus.
//!
//! Producers (the chat service, the gateway) publish a variant of the closed
//! [`DomainEvent`] set; a dispatcher task delivers each event to the right
//! rooms via the [`RoomRouter`].  Publishing is fire-and-forget: a failed or
//! listener-less delivery never fails the originating write.  Events carry
//! everything needed for addressing, so the dispatcher never queries the
//! store.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use huddle_shared::protocol::ServerEvent;
use huddle_shared::types::{ChatId, ChatType, MessageId, PresenceStatus, UserId};
use huddle_shared::views::MessageView;

use crate::rooms::{RoomId, RoomRouter};

/// Everything the real-time layer reacts to.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A message was durably committed.
    MessageCreated {
        chat_id: ChatId,
        message: MessageView,
    },
    /// Net-new members were added to a chat.
    MembersAdded {
        chat_id: ChatId,
        user_ids: Vec<UserId>,
        added_by: UserId,
    },
    /// A member acknowledged reading messages.
    MessageRead {
        chat_id: ChatId,
        reader: UserId,
        message_ids: Vec<MessageId>,
    },
    /// A member started or stopped typing.  `direct_peer` is the other member
    /// of a direct chat, resolved by the producer.
    TypingChanged {
        chat_id: ChatId,
        chat_type: ChatType,
        typist: UserId,
        is_typing: bool,
        direct_peer: Option<UserId>,
    },
    /// A user went online or offline.
    PresenceChanged {
        user_id: UserId,
        status: PresenceStatus,
        last_seen_at: DateTime<Utc>,
    },
}

/// Cloneable producer handle.
#[derive(Clone)]
pub struct EventFanout {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl EventFanout {
    /// Create the bus.  Hand the receiver to [`spawn_dispatcher`].
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publish an event.  Never fails the caller.
    pub fn publish(&self, event: DomainEvent) {
        if self.tx.send(event).is_err() {
            debug!("domain event dropped: dispatcher not running");
        }
    }
}

/// Run the delivery loop until the producer side is dropped.
pub fn spawn_dispatcher(
    mut events: mpsc::UnboundedReceiver<DomainEvent>,
    router: RoomRouter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            deliver(&router, event).await;
        }
    })
}

/// Delivery rules per event type.
async fn deliver(router: &RoomRouter, event: DomainEvent) {
    match event {
        DomainEvent::MessageCreated { chat_id, message } => {
            router
                .broadcast(RoomId::Chat(chat_id), &ServerEvent::NewMessage(message))
                .await;
        }

        DomainEvent::MembersAdded {
            chat_id,
            user_ids,
            added_by,
        } => {
            // Membership notice for everyone already in the room, plus
            // exactly one invite notice per net-new member.
            router
                .broadcast(
                    RoomId::Chat(chat_id),
                    &ServerEvent::MembersAdded {
                        chat_id,
                        user_ids: user_ids.clone(),
                        added_by,
                    },
                )
                .await;

            for user_id in user_ids {
                router
                    .send_to_user(
                        user_id,
                        &ServerEvent::ChatInvite {
                            chat_id,
                            invited_by: added_by,
                        },
                    )
                    .await;
            }
        }

        DomainEvent::MessageRead {
            chat_id,
            reader,
            message_ids,
        } => {
            // The reader already knows.
            router
                .broadcast_except(
                    RoomId::Chat(chat_id),
                    &ServerEvent::Read {
                        chat_id,
                        user_id: reader,
                        message_ids,
                    },
                    reader,
                )
                .await;
        }

        DomainEvent::TypingChanged {
            chat_id,
            chat_type,
            typist,
            is_typing,
            direct_peer,
        } => match chat_type {
            ChatType::Direct => {
                let Some(peer) = direct_peer else {
                    debug!(chat = %chat_id, "typing event for direct chat without a peer");
                    return;
                };
                router
                    .send_to_user(
                        peer,
                        &ServerEvent::Typing {
                            chat_id,
                            user_id: typist,
                            is_typing,
                            is_me_typing: true,
                        },
                    )
                    .await;
            }
            ChatType::Group => {
                router
                    .broadcast_except(
                        RoomId::Chat(chat_id),
                        &ServerEvent::Typing {
                            chat_id,
                            user_id: typist,
                            is_typing,
                            is_me_typing: false,
                        },
                        typist,
                    )
                    .await;
            }
        },

        DomainEvent::PresenceChanged {
            user_id,
            status,
            last_seen_at,
        } => {
            // Presence is organization-agnostic by design.
            router
                .broadcast_all(&ServerEvent::UserStatusChanged {
                    user_id,
                    status,
                    last_seen_at,
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::types::{ConnectionId, OrganizationId};

    async fn connect(
        router: &RoomRouter,
        user: UserId,
    ) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let conn = ConnectionId::new();
        let rx = router.register(conn, user, OrganizationId::new()).await;
        (conn, rx)
    }

    fn sample_view(chat_id: ChatId, sender: UserId, content: &str) -> MessageView {
        use huddle_shared::views::UserSummary;
        MessageView {
            id: MessageId::new(),
            chat_id,
            sender: UserSummary {
                id: sender,
                display_name: None,
                email: None,
                avatar_url: None,
                status: PresenceStatus::Online,
                last_seen_at: None,
            },
            content: content.to_string(),
            message_type: huddle_shared::types::MessageType::Text,
            attachments: vec![],
            mentions: vec![],
            reactions: vec![],
            reply_to: None,
            read_by: vec![],
            is_edited: false,
            edited_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn message_created_reaches_chat_room_only() {
        let router = RoomRouter::new();
        let chat_id = ChatId::new();

        let (joined, mut rx_joined) = connect(&router, UserId::new()).await;
        let (_outside, mut rx_outside) = connect(&router, UserId::new()).await;
        router.join(joined, RoomId::Chat(chat_id)).await;

        let message = sample_view(chat_id, UserId::new(), "hello");
        deliver(&router, DomainEvent::MessageCreated { chat_id, message }).await;

        let Ok(ServerEvent::NewMessage(view)) = rx_joined.try_recv() else {
            panic!("expected a newMessage event");
        };
        assert_eq!(view.content, "hello");
        assert!(rx_outside.try_recv().is_err());
    }

    #[tokio::test]
    async fn members_added_sends_one_invite_per_member() {
        let router = RoomRouter::new();
        let chat_id = ChatId::new();
        let admin = UserId::new();
        let invited = UserId::new();

        let (in_room, mut rx_room) = connect(&router, admin).await;
        router.join(in_room, RoomId::Chat(chat_id)).await;
        let (_invited_conn, mut rx_invited) = connect(&router, invited).await;

        deliver(
            &router,
            DomainEvent::MembersAdded {
                chat_id,
                user_ids: vec![invited],
                added_by: admin,
            },
        )
        .await;

        assert!(matches!(
            rx_room.try_recv(),
            Ok(ServerEvent::MembersAdded { .. })
        ));
        assert!(matches!(
            rx_invited.try_recv(),
            Ok(ServerEvent::ChatInvite { .. })
        ));
        // Exactly one invite notice.
        assert!(rx_invited.try_recv().is_err());
    }

    #[tokio::test]
    async fn read_excludes_the_reader() {
        let router = RoomRouter::new();
        let chat_id = ChatId::new();
        let reader = UserId::new();

        let (reader_conn, mut rx_reader) = connect(&router, reader).await;
        let (other_conn, mut rx_other) = connect(&router, UserId::new()).await;
        router.join(reader_conn, RoomId::Chat(chat_id)).await;
        router.join(other_conn, RoomId::Chat(chat_id)).await;

        deliver(
            &router,
            DomainEvent::MessageRead {
                chat_id,
                reader,
                message_ids: vec![MessageId::new()],
            },
        )
        .await;

        assert!(rx_reader.try_recv().is_err());
        assert!(matches!(rx_other.try_recv(), Ok(ServerEvent::Read { .. })));
    }

    #[tokio::test]
    async fn typing_routes_direct_to_peer_user_room() {
        let router = RoomRouter::new();
        let chat_id = ChatId::new();
        let typist = UserId::new();
        let peer = UserId::new();

        let (typist_conn, mut rx_typist) = connect(&router, typist).await;
        router.join(typist_conn, RoomId::Chat(chat_id)).await;
        let (_peer_conn, mut rx_peer) = connect(&router, peer).await;

        deliver(
            &router,
            DomainEvent::TypingChanged {
                chat_id,
                chat_type: ChatType::Direct,
                typist,
                is_typing: true,
                direct_peer: Some(peer),
            },
        )
        .await;

        let Ok(ServerEvent::Typing { is_me_typing, .. }) = rx_peer.try_recv() else {
            panic!("expected a typing event");
        };
        assert!(is_me_typing);
        // Direct typing never goes through the chat room.
        assert!(rx_typist.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_in_group_excludes_typist() {
        let router = RoomRouter::new();
        let chat_id = ChatId::new();
        let typist = UserId::new();

        let (typist_conn, mut rx_typist) = connect(&router, typist).await;
        let (other_conn, mut rx_other) = connect(&router, UserId::new()).await;
        router.join(typist_conn, RoomId::Chat(chat_id)).await;
        router.join(other_conn, RoomId::Chat(chat_id)).await;

        deliver(
            &router,
            DomainEvent::TypingChanged {
                chat_id,
                chat_type: ChatType::Group,
                typist,
                is_typing: true,
                direct_peer: None,
            },
        )
        .await;

        assert!(rx_typist.try_recv().is_err());
        let Ok(ServerEvent::Typing { is_me_typing, .. }) = rx_other.try_recv() else {
            panic!("expected a typing event");
        };
        assert!(!is_me_typing);
    }

    #[tokio::test]
    async fn presence_reaches_every_connection() {
        let router = RoomRouter::new();
        let (_a, mut rx_a) = connect(&router, UserId::new()).await;
        let (_b, mut rx_b) = connect(&router, UserId::new()).await;

        deliver(
            &router,
            DomainEvent::PresenceChanged {
                user_id: UserId::new(),
                status: PresenceStatus::Online,
                last_seen_at: Utc::now(),
            },
        )
        .await;

        assert!(matches!(
            rx_a.try_recv(),
            Ok(ServerEvent::UserStatusChanged { .. })
        ));
        assert!(matches!(
            rx_b.try_recv(),
            Ok(ServerEvent::UserStatusChanged { .. })
        ));
    }
}
