//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the service layer; the denormalized read-model shapes live in
//! `huddle_shared::views`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use huddle_shared::types::{
    ChatId, ChatMemberRole, ChatType, ChatVisibility, MessageId, MessageType, OrganizationId,
    PresenceStatus, ProjectId, UserId,
};

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Per-chat behavior flags, stored inline on the chat row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSettings {
    pub can_members_invite: bool,
    pub can_members_message: bool,
    pub approval_required: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            can_members_invite: true,
            can_members_message: true,
            approval_required: false,
        }
    }
}

/// A conversation (direct thread or named group) scoped to an organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    /// Unique chat identifier.
    pub id: ChatId,
    /// Tenant the chat belongs to.
    pub organization_id: OrganizationId,
    /// Optional project the chat is attached to.
    pub project_id: Option<ProjectId>,
    /// Display name.  Direct chats are usually unnamed.
    pub name: Option<String>,
    pub description: Option<String>,
    pub chat_type: ChatType,
    pub visibility: ChatVisibility,
    /// User who created the chat; always seeded as an admin member.
    pub creator_id: UserId,
    pub avatar_url: Option<String>,
    pub settings: ChatSettings,
    /// Denormalized pointer for list views.  Best-effort, may lag.
    pub last_message_id: Option<MessageId>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The membership record binding a user to a chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMember {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub role: ChatMemberRole,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to_id: Option<MessageId>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attachment metadata.  The referenced blob lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub message_id: MessageId,
    pub url: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// An emoji reaction.  One row per (message, user, emoji).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// User profile / presence
// ---------------------------------------------------------------------------

/// Profile mirror of the external identity provider plus the presence columns
/// mutated by the connection lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub status: PresenceStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

/// Field-wise chat update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ChatUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<ChatVisibility>,
    pub avatar_url: Option<String>,
    pub can_members_invite: Option<bool>,
    pub can_members_message: Option<bool>,
    pub approval_required: Option<bool>,
    pub is_archived: Option<bool>,
}

// ---------------------------------------------------------------------------
// Row-mapping helpers shared by the CRUD modules
// ---------------------------------------------------------------------------

/// A TEXT column that failed to parse into its domain type.
#[derive(Debug)]
pub(crate) struct BadColumn(pub &'static str, pub String);

impl std::fmt::Display for BadColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {} value: {}", self.0, self.1)
    }
}

impl std::error::Error for BadColumn {}

pub(crate) fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn col_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn col_uuid_opt(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

pub(crate) fn col_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

pub(crate) fn col_ts_opt(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

/// Normalize a page/limit pair into `(page, limit, offset)`.
pub(crate) fn page_window(
    page: Option<u32>,
    limit: Option<u32>,
    default_limit: u32,
) -> (u32, u32, u64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit
        .unwrap_or(default_limit)
        .clamp(1, huddle_shared::constants::MAX_PAGE_SIZE);
    let offset = u64::from(page - 1) * u64::from(limit);
    (page, limit, offset)
}
