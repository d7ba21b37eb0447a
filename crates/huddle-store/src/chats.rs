//! CRUD operations and read models for [`Chat`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, ToSql};

use huddle_shared::constants::DEFAULT_CHAT_PAGE_SIZE;
use huddle_shared::types::{ChatId, ChatType, ChatVisibility, MessageId, OrganizationId, UserId};
use huddle_shared::views::{ChatQuery, ChatSummary, Paginated};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    col_ts, col_uuid, col_uuid_opt, conversion_err, page_window, BadColumn, Chat, ChatMember,
    ChatSettings, ChatUpdate,
};

pub(crate) const CHAT_COLUMNS: &str = "id, organization_id, project_id, name, description, \
     chat_type, visibility, creator_id, avatar_url, can_members_invite, can_members_message, \
     approval_required, last_message_id, is_archived, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new chat together with its initial member set, atomically.
    pub fn create_chat(&mut self, chat: &Chat, members: &[ChatMember]) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO chats (id, organization_id, project_id, name, description, chat_type, \
             visibility, creator_id, avatar_url, can_members_invite, can_members_message, \
             approval_required, last_message_id, is_archived, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                chat.id.to_string(),
                chat.organization_id.to_string(),
                chat.project_id.map(|p| p.to_string()),
                chat.name,
                chat.description,
                chat.chat_type.as_str(),
                chat.visibility.as_str(),
                chat.creator_id.to_string(),
                chat.avatar_url,
                chat.settings.can_members_invite,
                chat.settings.can_members_message,
                chat.settings.approval_required,
                chat.last_message_id.map(|m| m.to_string()),
                chat.is_archived,
                chat.created_at.to_rfc3339(),
                chat.updated_at.to_rfc3339(),
            ],
        )?;

        for member in members {
            tx.execute(
                "INSERT INTO chat_members (chat_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    member.chat_id.to_string(),
                    member.user_id.to_string(),
                    member.role.as_str(),
                    member.joined_at.to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single chat by id.
    pub fn get_chat(&self, id: ChatId) -> Result<Chat> {
        self.conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                params![id.to_string()],
                row_to_chat,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Find the existing direct chat between two users within an organization.
    ///
    /// Direct chats always hold exactly two members, so matching both users is
    /// sufficient.
    pub fn find_direct_chat(
        &self,
        organization_id: OrganizationId,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Chat>> {
        let chat = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {CHAT_COLUMNS} FROM chats c
                     JOIN chat_members m1 ON m1.chat_id = c.id AND m1.user_id = ?2
                     JOIN chat_members m2 ON m2.chat_id = c.id AND m2.user_id = ?3
                     WHERE c.organization_id = ?1 AND c.chat_type = 'direct'
                     LIMIT 1"
                ),
                params![organization_id.to_string(), a.to_string(), b.to_string()],
                row_to_chat,
            )
            .optional()?;
        Ok(chat)
    }

    /// List the chats a user belongs to within an organization, filtered and
    /// paginated.  Returns the raw rows plus the unpaginated total.
    pub fn list_user_chats(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        query: &ChatQuery,
    ) -> Result<(Vec<Chat>, u64)> {
        let (_, limit, offset) = page_window(query.page, query.limit, DEFAULT_CHAT_PAGE_SIZE);

        let mut filter = String::from(
            "FROM chats c JOIN chat_members cm ON cm.chat_id = c.id
             WHERE cm.user_id = ?1 AND c.organization_id = ?2",
        );
        let mut params: Vec<Box<dyn ToSql>> = vec![
            Box::new(user_id.to_string()),
            Box::new(organization_id.to_string()),
        ];

        if let Some(chat_type) = query.chat_type {
            filter.push_str(&format!(" AND c.chat_type = ?{}", params.len() + 1));
            params.push(Box::new(chat_type.as_str()));
        }

        if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
            let idx = params.len() + 1;
            filter.push_str(&format!(
                " AND (LOWER(IFNULL(c.name, '')) LIKE ?{idx}
                   OR LOWER(IFNULL(c.description, '')) LIKE ?{idx})"
            ));
            params.push(Box::new(format!("%{}%", search.to_lowercase())));
        }

        let total: u64 = self.conn().query_row(
            &format!("SELECT COUNT(*) {filter}"),
            params_from_iter(params.iter().map(|p| p.as_ref())),
            |row| row.get::<_, i64>(0).map(|n| n as u64),
        )?;

        let sql = format!(
            "SELECT {cols} {filter} ORDER BY c.updated_at DESC LIMIT ?{l} OFFSET ?{o}",
            cols = chat_columns_qualified("c"),
            l = params.len() + 1,
            o = params.len() + 2,
        );
        params.push(Box::new(i64::from(limit)));
        params.push(Box::new(offset as i64));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(params.iter().map(|p| p.as_ref())),
            row_to_chat,
        )?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok((chats, total))
    }

    /// Assemble the denormalized list-view shape for one chat: members with
    /// profile and presence detail, creator, and the populated last message.
    pub fn chat_summary(&self, chat: &Chat) -> Result<ChatSummary> {
        let members = self.member_views(chat.id)?;
        let creator = self.user_summary(chat.creator_id)?;

        // The pointer is best-effort; a dangling value degrades to None.
        let last_message = match chat.last_message_id {
            Some(message_id) => match self.get_message(chat.id, message_id) {
                Ok(message) => Some(self.message_view(&message)?),
                Err(StoreError::NotFound) => None,
                Err(other) => return Err(other),
            },
            None => None,
        };

        Ok(ChatSummary {
            id: chat.id,
            name: chat.name.clone(),
            description: chat.description.clone(),
            chat_type: chat.chat_type,
            visibility: chat.visibility,
            organization_id: chat.organization_id,
            project_id: chat.project_id,
            avatar_url: chat.avatar_url.clone(),
            creator,
            members,
            last_message,
            is_archived: chat.is_archived,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        })
    }

    /// Paginated chat-list read model.
    pub fn list_user_chat_summaries(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        query: &ChatQuery,
    ) -> Result<Paginated<ChatSummary>> {
        let (page, limit, _) = page_window(query.page, query.limit, DEFAULT_CHAT_PAGE_SIZE);
        let (chats, total) = self.list_user_chats(user_id, organization_id, query)?;

        let mut summaries = Vec::with_capacity(chats.len());
        for chat in &chats {
            summaries.push(self.chat_summary(chat)?);
        }

        Ok(Paginated::new(summaries, total, page, limit))
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Apply a field-wise update; `None` fields keep their stored value.
    pub fn update_chat(&self, id: ChatId, update: &ChatUpdate, at: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE chats SET
                name                = COALESCE(?2, name),
                description         = COALESCE(?3, description),
                visibility          = COALESCE(?4, visibility),
                avatar_url          = COALESCE(?5, avatar_url),
                can_members_invite  = COALESCE(?6, can_members_invite),
                can_members_message = COALESCE(?7, can_members_message),
                approval_required   = COALESCE(?8, approval_required),
                is_archived         = COALESCE(?9, is_archived),
                updated_at          = ?10
             WHERE id = ?1",
            params![
                id.to_string(),
                update.name,
                update.description,
                update.visibility.map(|v| v.as_str()),
                update.avatar_url,
                update.can_members_invite,
                update.can_members_message,
                update.approval_required,
                update.is_archived,
                at.to_rfc3339(),
            ],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Atomically move the denormalized last-message pointer.
    pub fn set_last_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE chats SET last_message_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![chat_id.to_string(), message_id.to_string(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a chat.  Members, messages, reactions and read-marks cascade.
    /// Returns `true` if a row was deleted.
    pub fn delete_chat(&self, id: ChatId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM chats WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn chat_columns_qualified(alias: &str) -> String {
    CHAT_COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Map a `rusqlite::Row` to a [`Chat`].
pub(crate) fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let chat_type_str: String = row.get(5)?;
    let chat_type = ChatType::parse(&chat_type_str)
        .ok_or_else(|| conversion_err(5, BadColumn("chat_type", chat_type_str)))?;

    let visibility_str: String = row.get(6)?;
    let visibility = ChatVisibility::parse(&visibility_str)
        .ok_or_else(|| conversion_err(6, BadColumn("visibility", visibility_str)))?;

    Ok(Chat {
        id: ChatId(col_uuid(row, 0)?),
        organization_id: OrganizationId(col_uuid(row, 1)?),
        project_id: col_uuid_opt(row, 2)?.map(huddle_shared::types::ProjectId),
        name: row.get(3)?,
        description: row.get(4)?,
        chat_type,
        visibility,
        creator_id: UserId(col_uuid(row, 7)?),
        avatar_url: row.get(8)?,
        settings: ChatSettings {
            can_members_invite: row.get(9)?,
            can_members_message: row.get(10)?,
            approval_required: row.get(11)?,
        },
        last_message_id: col_uuid_opt(row, 12)?.map(MessageId),
        is_archived: row.get(13)?,
        created_at: col_ts(row, 14)?,
        updated_at: col_ts(row, 15)?,
    })
}
