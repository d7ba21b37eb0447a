//! Membership rows: the `{chat, user, role, joinedAt}` records gating every
//! chat operation.
//!
//! All writes are single-row and idempotent (`INSERT OR IGNORE` / `DELETE`),
//! so concurrent membership changes interleave without clobbering each other.

use rusqlite::{params, OptionalExtension};

use huddle_shared::types::{ChatId, ChatMemberRole, OrganizationId, PresenceStatus, UserId};
use huddle_shared::views::{MemberView, UserSummary};

use crate::database::Database;
use crate::error::Result;
use crate::models::{col_ts, col_ts_opt, col_uuid, conversion_err, BadColumn, ChatMember};

impl Database {
    /// Add a member.  Returns `false` when the user was already present.
    pub fn add_member(&self, member: &ChatMember) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO chat_members (chat_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                member.chat_id.to_string(),
                member.user_id.to_string(),
                member.role.as_str(),
                member.joined_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Remove a member.  Returns `true` if a row was deleted.
    pub fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Resolve one membership record, if present.
    pub fn get_member(&self, chat_id: ChatId, user_id: UserId) -> Result<Option<ChatMember>> {
        let member = self
            .conn()
            .query_row(
                "SELECT chat_id, user_id, role, joined_at FROM chat_members
                 WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id.to_string(), user_id.to_string()],
                row_to_member,
            )
            .optional()?;
        Ok(member)
    }

    /// All membership records of a chat, oldest join first.
    pub fn list_members(&self, chat_id: ChatId) -> Result<Vec<ChatMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT chat_id, user_id, role, joined_at FROM chat_members
             WHERE chat_id = ?1 ORDER BY joined_at ASC",
        )?;
        let rows = stmt.query_map(params![chat_id.to_string()], row_to_member)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Just the member user ids of a chat.
    pub fn member_user_ids(&self, chat_id: ChatId) -> Result<Vec<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM chat_members WHERE chat_id = ?1")?;
        let rows = stmt.query_map(params![chat_id.to_string()], |row| {
            col_uuid(row, 0).map(UserId)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Every chat a user belongs to within an organization.  This is the
    /// room-derivation query the gateway runs on connect.
    pub fn chat_ids_for_member(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Vec<ChatId>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id FROM chats c
             JOIN chat_members cm ON cm.chat_id = c.id
             WHERE cm.user_id = ?1 AND c.organization_id = ?2
             ORDER BY c.updated_at DESC",
        )?;
        let rows = stmt.query_map(
            params![user_id.to_string(), organization_id.to_string()],
            |row| col_uuid(row, 0).map(ChatId),
        )?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Member list with profile and presence detail joined in.  Members whose
    /// profile has not been mirrored yet degrade to a bare summary.
    pub fn member_views(&self, chat_id: ChatId) -> Result<Vec<MemberView>> {
        let mut stmt = self.conn().prepare(
            "SELECT cm.user_id, cm.role, cm.joined_at,
                    u.display_name, u.email, u.avatar_url, u.status, u.last_seen_at
             FROM chat_members cm
             LEFT JOIN users u ON u.id = cm.user_id
             WHERE cm.chat_id = ?1
             ORDER BY cm.joined_at ASC",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string()], |row| {
            let user_id = UserId(col_uuid(row, 0)?);

            let role_str: String = row.get(1)?;
            let role = ChatMemberRole::parse(&role_str)
                .ok_or_else(|| conversion_err(1, BadColumn("role", role_str)))?;

            let status: Option<String> = row.get(6)?;
            let status = status
                .as_deref()
                .and_then(PresenceStatus::parse)
                .unwrap_or(PresenceStatus::Offline);

            Ok(MemberView {
                user: UserSummary {
                    id: user_id,
                    display_name: row.get(3)?,
                    email: row.get(4)?,
                    avatar_url: row.get(5)?,
                    status,
                    last_seen_at: col_ts_opt(row, 7)?,
                },
                role,
                joined_at: col_ts(row, 2)?,
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }
}

/// Map a `rusqlite::Row` to a [`ChatMember`].
fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMember> {
    let role_str: String = row.get(2)?;
    let role = ChatMemberRole::parse(&role_str)
        .ok_or_else(|| conversion_err(2, BadColumn("role", role_str)))?;

    Ok(ChatMember {
        chat_id: ChatId(col_uuid(row, 0)?),
        user_id: UserId(col_uuid(row, 1)?),
        role,
        joined_at: col_ts(row, 3)?,
    })
}
