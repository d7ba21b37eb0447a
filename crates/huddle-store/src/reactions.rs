//! Emoji reactions.  Set semantics per (message, user, emoji).

use chrono::{DateTime, Utc};
use rusqlite::params;

use huddle_shared::types::{MessageId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{col_ts, col_uuid, Reaction};

impl Database {
    /// Add a reaction.  Returns `false` when the identical reaction already
    /// exists.
    pub fn add_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                message_id.to_string(),
                user_id.to_string(),
                emoji,
                at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Remove a reaction.  Returns `true` if a row was deleted.
    pub fn remove_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id.to_string(), user_id.to_string(), emoji],
        )?;
        Ok(affected > 0)
    }

    pub fn reactions_for_message(&self, message_id: MessageId) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, user_id, emoji, created_at
             FROM reactions WHERE message_id = ?1 ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            Ok(Reaction {
                message_id: MessageId(col_uuid(row, 0)?),
                user_id: UserId(col_uuid(row, 1)?),
                emoji: row.get(2)?,
                created_at: col_ts(row, 3)?,
            })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chat, ChatMember, ChatSettings, Message};
    use huddle_shared::types::{
        ChatId, ChatMemberRole, ChatType, ChatVisibility, MessageType, OrganizationId,
    };

    fn seed_message(db: &mut Database) -> MessageId {
        let now = Utc::now();
        let sender = UserId::new();
        let chat = Chat {
            id: ChatId::new(),
            organization_id: OrganizationId::new(),
            project_id: None,
            name: Some("general".into()),
            description: None,
            chat_type: ChatType::Group,
            visibility: ChatVisibility::Public,
            creator_id: sender,
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
                user_id: sender,
                role: ChatMemberRole::Admin,
                joined_at: now,
            }],
        )
        .unwrap();

        let message = Message {
            id: MessageId::new(),
            chat_id: chat.id,
            sender_id: sender,
            content: "nice".into(),
            message_type: MessageType::Text,
            reply_to_id: None,
            is_edited: false,
            edited_at: None,
            created_at: now,
            updated_at: now,
        };
        db.insert_message(&message, &[], &[]).unwrap();
        message.id
    }

    #[test]
    fn add_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let message_id = seed_message(&mut db);
        let user = UserId::new();

        assert!(db.add_reaction(message_id, user, "👍", Utc::now()).unwrap());
        // Same (user, emoji) pair is a set, not a counter.
        assert!(!db.add_reaction(message_id, user, "👍", Utc::now()).unwrap());
        assert_eq!(db.reactions_for_message(message_id).unwrap().len(), 1);

        assert!(db.remove_reaction(message_id, user, "👍").unwrap());
        assert!(!db.remove_reaction(message_id, user, "👍").unwrap());
        assert!(db.reactions_for_message(message_id).unwrap().is_empty());
    }
}
