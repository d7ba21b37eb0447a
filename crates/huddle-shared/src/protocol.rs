//! Socket wire protocol.
//!
//! Every event crossing the WebSocket boundary is a variant of a closed enum,
//! serialized as `{"event": "...", "data": {...}}`.  Mismatched payload shapes
//! fail at the serde boundary instead of surfacing as `undefined` fields deep
//! inside a handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    ChatId, MessageId, MessageType, OrganizationId, PresenceStatus, UserId,
};
use crate::views::MessageView;

/// Connection handshake, carried as query parameters on the upgrade request.
///
/// The identity layer has already authenticated the user; the gateway still
/// refuses connections that do not name an organization, because every room
/// derivation is tenant-scoped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub user_id: UserId,
    pub organization_id: Option<OrganizationId>,
}

/// Body of a `newMessage` client event and of `POST .../messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageInput {
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
    #[serde(default)]
    pub mentions: Vec<UserId>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInput {
    pub url: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// Events a client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Join { chat_id: ChatId },
    #[serde(rename_all = "camelCase")]
    Leave { chat_id: ChatId },
    #[serde(rename_all = "camelCase")]
    Typing { chat_id: ChatId, is_typing: bool },
    #[serde(rename_all = "camelCase")]
    Read {
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
    },
    #[serde(rename_all = "camelCase")]
    NewMessage {
        chat_id: ChatId,
        message: MessageInput,
    },
}

/// Events the server delivers to connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A message was persisted; fans out to the chat room.
    NewMessage(MessageView),
    /// Membership-change notice for everyone already in the chat room.
    #[serde(rename_all = "camelCase")]
    MembersAdded {
        chat_id: ChatId,
        user_ids: Vec<UserId>,
        added_by: UserId,
    },
    /// Invite notice delivered once to each newly added member.
    #[serde(rename_all = "camelCase")]
    ChatInvite { chat_id: ChatId, invited_by: UserId },
    #[serde(rename_all = "camelCase")]
    Read {
        chat_id: ChatId,
        user_id: UserId,
        message_ids: Vec<MessageId>,
    },
    /// `is_me_typing` is set for the direct-chat peer being typed at;
    /// bystanders (group rooms, the typist's own other devices) see `false`.
    #[serde(rename_all = "camelCase")]
    Typing {
        chat_id: ChatId,
        user_id: UserId,
        is_typing: bool,
        is_me_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    UserStatusChanged {
        user_id: UserId,
        status: PresenceStatus,
        last_seen_at: DateTime<Utc>,
    },
    /// Ack for an explicit `join`.
    #[serde(rename_all = "camelCase")]
    Joined { chat_id: ChatId },
    /// Ack for an explicit `leave`.
    #[serde(rename_all = "camelCase")]
    Left { chat_id: ChatId },
    /// Scoped failure notice, delivered only to the offending connection.
    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_round_trip() {
        let event = ClientEvent::Read {
            chat_id: ChatId::new(),
            message_ids: vec![MessageId::new(), MessageId::new()],
        };

        let json = serde_json::to_string(&event).unwrap();
        let restored: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn join_wire_shape() {
        let chat_id = ChatId::new();
        let json = serde_json::to_value(ClientEvent::Join { chat_id }).unwrap();
        assert_eq!(json["event"], "join");
        assert_eq!(json["data"]["chatId"], chat_id.to_string());
    }

    #[test]
    fn new_message_defaults() {
        let json = format!(
            r#"{{"event":"newMessage","data":{{"chatId":"{}","message":{{"content":"hello"}}}}}}"#,
            ChatId::new()
        );
        let event: ClientEvent = serde_json::from_str(&json).unwrap();
        let ClientEvent::NewMessage { message, .. } = event else {
            panic!("wrong variant");
        };
        assert_eq!(message.content, "hello");
        assert_eq!(message.message_type, MessageType::Text);
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn server_error_is_scoped_shape() {
        let json = serde_json::to_value(ServerEvent::Error {
            message: "not a member of this chat".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["message"], "not a member of this chat");
    }
}
