//! Read-model DTOs.
//!
//! These are the denormalized, joined shapes handed to clients by list and
//! detail endpoints and carried inside socket events.  They are distinct from
//! the normalized rows the store persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    ChatId, ChatMemberRole, ChatType, ChatVisibility, MessageId, MessageType, OrganizationId,
    PresenceStatus, ProjectId, UserId,
};

/// A user as displayed next to messages and member lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub status: PresenceStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub user: UserSummary,
    pub role: ChatMemberRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentView {
    pub url: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionView {
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// A fully populated message: sender detail, attachments, reactions and the
/// set of users who have acknowledged reading it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender: UserSummary,
    pub content: String,
    pub message_type: MessageType,
    pub attachments: Vec<AttachmentView>,
    pub mentions: Vec<UserId>,
    pub reactions: Vec<ReactionView>,
    pub reply_to: Option<MessageId>,
    pub read_by: Vec<UserId>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A chat as shown in list views: members, creator and last message joined in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: ChatId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub chat_type: ChatType,
    pub visibility: ChatVisibility,
    pub organization_id: OrganizationId,
    pub project_id: Option<ProjectId>,
    pub avatar_url: Option<String>,
    pub creator: Option<UserSummary>,
    pub members: Vec<MemberView>,
    pub last_message: Option<MessageView>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub total_pages: u32,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: u64, page: u32, limit: u32) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            ((total + u64::from(limit) - 1) / u64::from(limit)) as u32
        };
        Self {
            data,
            total,
            page,
            total_pages,
        }
    }
}

/// Filters for the chat list read model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[serde(rename = "type")]
    pub chat_type: Option<ChatType>,
    pub search: Option<String>,
}

/// Filters for message history.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub message_type: Option<MessageType>,
    pub search: Option<String>,
}
