//! CRUD operations and read models for [`Message`] records.
//!
//! Every query here is chat-scoped: a message id is only meaningful together
//! with the chat it belongs to, which keeps cross-chat id probing inert.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, ToSql};

use huddle_shared::constants::DEFAULT_MESSAGE_PAGE_SIZE;
use huddle_shared::types::{ChatId, MessageId, MessageType, UserId};
use huddle_shared::views::{AttachmentView, MessageQuery, MessageView, Paginated, ReactionView};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    col_ts, col_ts_opt, col_uuid, col_uuid_opt, conversion_err, page_window, Attachment,
    BadColumn, Message,
};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, message_type, reply_to_id, \
     is_edited, edited_at, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a message together with its attachment and mention rows,
    /// atomically.
    pub fn insert_message(
        &mut self,
        message: &Message,
        attachments: &[Attachment],
        mentions: &[UserId],
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, message_type, reply_to_id, \
             is_edited, edited_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.sender_id.to_string(),
                message.content,
                message.message_type.as_str(),
                message.reply_to_id.map(|m| m.to_string()),
                message.is_edited,
                message.edited_at.map(|t| t.to_rfc3339()),
                message.created_at.to_rfc3339(),
                message.updated_at.to_rfc3339(),
            ],
        )?;

        for attachment in attachments {
            tx.execute(
                "INSERT INTO attachments (message_id, url, name, mime_type, size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    attachment.message_id.to_string(),
                    attachment.url,
                    attachment.name,
                    attachment.mime_type,
                    attachment.size_bytes,
                ],
            )?;
        }

        for user_id in mentions {
            tx.execute(
                "INSERT OR IGNORE INTO mentions (message_id, user_id) VALUES (?1, ?2)",
                params![message.id.to_string(), user_id.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a message scoped to its chat.
    pub fn get_message(&self, chat_id: ChatId, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND chat_id = ?2"),
                params![id.to_string(), chat_id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Message history for a chat, newest first, filtered and paginated.
    pub fn list_messages(
        &self,
        chat_id: ChatId,
        query: &MessageQuery,
    ) -> Result<(Vec<Message>, u64)> {
        let (_, limit, offset) = page_window(query.page, query.limit, DEFAULT_MESSAGE_PAGE_SIZE);

        let mut filter = String::from("FROM messages WHERE chat_id = ?1");
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(chat_id.to_string())];

        if let Some(start) = query.start_date {
            filter.push_str(&format!(" AND created_at >= ?{}", params.len() + 1));
            params.push(Box::new(start.to_rfc3339()));
        }
        if let Some(end) = query.end_date {
            filter.push_str(&format!(" AND created_at <= ?{}", params.len() + 1));
            params.push(Box::new(end.to_rfc3339()));
        }
        if let Some(message_type) = query.message_type {
            filter.push_str(&format!(" AND message_type = ?{}", params.len() + 1));
            params.push(Box::new(message_type.as_str()));
        }
        if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
            filter.push_str(&format!(
                " AND LOWER(content) LIKE ?{}",
                params.len() + 1
            ));
            params.push(Box::new(format!("%{}%", search.to_lowercase())));
        }

        let total: u64 = self.conn().query_row(
            &format!("SELECT COUNT(*) {filter}"),
            params_from_iter(params.iter().map(|p| p.as_ref())),
            |row| row.get::<_, i64>(0).map(|n| n as u64),
        )?;

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} {filter} ORDER BY created_at DESC LIMIT ?{l} OFFSET ?{o}",
            l = params.len() + 1,
            o = params.len() + 2,
        );
        params.push(Box::new(i64::from(limit)));
        params.push(Box::new(offset as i64));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(params.iter().map(|p| p.as_ref())),
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok((messages, total))
    }

    /// Assemble the populated message shape: sender detail, attachments,
    /// reactions, mentions and the read-by set.
    pub fn message_view(&self, message: &Message) -> Result<MessageView> {
        let sender = self
            .user_summary(message.sender_id)?
            .unwrap_or_else(|| bare_user_summary(message.sender_id));

        let attachments = self
            .attachments_for_message(message.id)?
            .into_iter()
            .map(|a| AttachmentView {
                url: a.url,
                name: a.name,
                mime_type: a.mime_type,
                size_bytes: a.size_bytes,
            })
            .collect();

        let reactions = self
            .reactions_for_message(message.id)?
            .into_iter()
            .map(|r| ReactionView {
                user_id: r.user_id,
                emoji: r.emoji,
                created_at: r.created_at,
            })
            .collect();

        Ok(MessageView {
            id: message.id,
            chat_id: message.chat_id,
            sender,
            content: message.content.clone(),
            message_type: message.message_type,
            attachments,
            mentions: self.mentions_for_message(message.id)?,
            reactions,
            reply_to: message.reply_to_id,
            read_by: self.read_by(message.id)?,
            is_edited: message.is_edited,
            edited_at: message.edited_at,
            created_at: message.created_at,
            updated_at: message.updated_at,
        })
    }

    /// Paginated message-history read model.
    pub fn list_message_views(
        &self,
        chat_id: ChatId,
        query: &MessageQuery,
    ) -> Result<Paginated<MessageView>> {
        let (page, limit, _) = page_window(query.page, query.limit, DEFAULT_MESSAGE_PAGE_SIZE);
        let (messages, total) = self.list_messages(chat_id, query)?;

        let mut views = Vec::with_capacity(messages.len());
        for message in &messages {
            views.push(self.message_view(message)?);
        }

        Ok(Paginated::new(views, total, page, limit))
    }

    pub fn attachments_for_message(&self, message_id: MessageId) -> Result<Vec<Attachment>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, url, name, mime_type, size_bytes
             FROM attachments WHERE message_id = ?1",
        )?;
        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            Ok(Attachment {
                message_id: MessageId(col_uuid(row, 0)?),
                url: row.get(1)?,
                name: row.get(2)?,
                mime_type: row.get(3)?,
                size_bytes: row.get(4)?,
            })
        })?;

        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row?);
        }
        Ok(attachments)
    }

    pub fn mentions_for_message(&self, message_id: MessageId) -> Result<Vec<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM mentions WHERE message_id = ?1")?;
        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            col_uuid(row, 0).map(UserId)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Users who have acknowledged reading a message.
    pub fn read_by(&self, message_id: MessageId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM message_reads WHERE message_id = ?1 ORDER BY read_at ASC",
        )?;
        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            col_uuid(row, 0).map(UserId)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Replace the content of a message and mark it edited.
    pub fn update_message_content(
        &self,
        chat_id: ChatId,
        id: MessageId,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = ?3, is_edited = 1, edited_at = ?4, updated_at = ?4
             WHERE id = ?1 AND chat_id = ?2",
            params![
                id.to_string(),
                chat_id.to_string(),
                content,
                at.to_rfc3339()
            ],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Mark messages read by a user.  Ids outside the chat are ignored so the
    /// call stays idempotent under racing client state.  Returns the ids that
    /// were newly marked.
    pub fn mark_read(
        &self,
        chat_id: ChatId,
        reader: UserId,
        message_ids: &[MessageId],
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>> {
        let mut newly_marked = Vec::new();

        for id in message_ids {
            let affected = self.conn().execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
                 SELECT m.id, ?2, ?3 FROM messages m WHERE m.id = ?1 AND m.chat_id = ?4",
                params![
                    id.to_string(),
                    reader.to_string(),
                    at.to_rfc3339(),
                    chat_id.to_string(),
                ],
            )?;
            if affected > 0 {
                newly_marked.push(*id);
            }
        }

        Ok(newly_marked)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a message scoped to its chat.  Returns `true` if a row was
    /// deleted; attachments, reactions and read-marks cascade.
    pub fn delete_message(&self, chat_id: ChatId, id: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE id = ?1 AND chat_id = ?2",
            params![id.to_string(), chat_id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn bare_user_summary(id: UserId) -> huddle_shared::views::UserSummary {
    huddle_shared::views::UserSummary {
        id,
        display_name: None,
        email: None,
        avatar_url: None,
        status: huddle_shared::types::PresenceStatus::Offline,
        last_seen_at: None,
    }
}

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let type_str: String = row.get(4)?;
    let message_type = MessageType::parse(&type_str)
        .ok_or_else(|| conversion_err(4, BadColumn("message_type", type_str)))?;

    Ok(Message {
        id: MessageId(col_uuid(row, 0)?),
        chat_id: ChatId(col_uuid(row, 1)?),
        sender_id: UserId(col_uuid(row, 2)?),
        content: row.get(3)?,
        message_type,
        reply_to_id: col_uuid_opt(row, 5)?.map(MessageId),
        is_edited: row.get(6)?,
        edited_at: col_ts_opt(row, 7)?,
        created_at: col_ts(row, 8)?,
        updated_at: col_ts(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chat, ChatMember, ChatSettings};
    use huddle_shared::types::{
        ChatMemberRole, ChatType, ChatVisibility, OrganizationId,
    };

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn seed_chat(db: &mut Database, admin: UserId) -> ChatId {
        let now = Utc::now();
        let chat = Chat {
            id: ChatId::new(),
            organization_id: OrganizationId::new(),
            project_id: None,
            name: Some("general".into()),
            description: None,
            chat_type: ChatType::Group,
            visibility: ChatVisibility::Public,
            creator_id: admin,
            avatar_url: None,
            settings: ChatSettings::default(),
            last_message_id: None,
            is_archived: false,
            created_at: now,
            updated_at: now,
        };
        db.create_chat(
            &chat,
            &[ChatMember {
                chat_id: chat.id,
                user_id: admin,
                role: ChatMemberRole::Admin,
                joined_at: now,
            }],
        )
        .unwrap();
        chat.id
    }

    fn text_message(chat_id: ChatId, sender: UserId, content: &str) -> Message {
        let now = Utc::now();
        Message {
            id: MessageId::new(),
            chat_id,
            sender_id: sender,
            content: content.to_string(),
            message_type: MessageType::Text,
            reply_to_id: None,
            is_edited: false,
            edited_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let (_dir, mut db) = open_db();
        let sender = UserId::new();
        let chat_id = seed_chat(&mut db, sender);

        let message = text_message(chat_id, sender, "hello team");
        db.insert_message(&message, &[], &[]).unwrap();

        let fetched = db.get_message(chat_id, message.id).unwrap();
        assert_eq!(fetched, message);

        // The same id under a different chat resolves to nothing.
        assert!(matches!(
            db.get_message(ChatId::new(), message.id),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn attachments_and_mentions_round_trip() {
        let (_dir, mut db) = open_db();
        let sender = UserId::new();
        let mentioned = UserId::new();
        let chat_id = seed_chat(&mut db, sender);

        let message = text_message(chat_id, sender, "see attached");
        let attachment = Attachment {
            message_id: message.id,
            url: "https://files.example/report.pdf".into(),
            name: "report.pdf".into(),
            mime_type: "application/pdf".into(),
            size_bytes: 1024,
        };
        db.insert_message(&message, &[attachment.clone()], &[mentioned])
            .unwrap();

        let view = db.message_view(&message).unwrap();
        assert_eq!(view.attachments.len(), 1);
        assert_eq!(view.attachments[0].name, "report.pdf");
        assert_eq!(view.mentions, vec![mentioned]);
    }

    #[test]
    fn mark_read_is_idempotent_and_chat_scoped() {
        let (_dir, mut db) = open_db();
        let sender = UserId::new();
        let reader = UserId::new();
        let chat_id = seed_chat(&mut db, sender);
        let other_chat = seed_chat(&mut db, sender);

        let message = text_message(chat_id, sender, "read me");
        db.insert_message(&message, &[], &[]).unwrap();
        let foreign = text_message(other_chat, sender, "not yours");
        db.insert_message(&foreign, &[], &[]).unwrap();

        let newly = db
            .mark_read(chat_id, reader, &[message.id, foreign.id], Utc::now())
            .unwrap();
        assert_eq!(newly, vec![message.id]);

        // Re-invoking is a no-op; the read-by set does not grow.
        let again = db
            .mark_read(chat_id, reader, &[message.id], Utc::now())
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(db.read_by(message.id).unwrap(), vec![reader]);
    }

    #[test]
    fn update_marks_edited() {
        let (_dir, mut db) = open_db();
        let sender = UserId::new();
        let chat_id = seed_chat(&mut db, sender);

        let message = text_message(chat_id, sender, "typo");
        db.insert_message(&message, &[], &[]).unwrap();

        db.update_message_content(chat_id, message.id, "fixed", Utc::now())
            .unwrap();
        let updated = db.get_message(chat_id, message.id).unwrap();
        assert_eq!(updated.content, "fixed");
        assert!(updated.is_edited);
        assert!(updated.edited_at.is_some());
    }

    #[test]
    fn list_filters_by_type_and_content() {
        let (_dir, mut db) = open_db();
        let sender = UserId::new();
        let chat_id = seed_chat(&mut db, sender);

        let mut system = text_message(chat_id, sender, "user joined");
        system.message_type = MessageType::System;
        db.insert_message(&system, &[], &[]).unwrap();
        db.insert_message(&text_message(chat_id, sender, "deploy done"), &[], &[])
            .unwrap();

        let query = MessageQuery {
            message_type: Some(MessageType::System),
            ..MessageQuery::default()
        };
        let (found, total) = db.list_messages(chat_id, &query).unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].message_type, MessageType::System);

        let query = MessageQuery {
            search: Some("DEPLOY".into()),
            ..MessageQuery::default()
        };
        let (found, _) = db.list_messages(chat_id, &query).unwrap();
        assert_eq!(found[0].content, "deploy done");
    }
}
