//! User profile mirror and presence columns.
//!
//! Profiles exist so read models can join display detail without calling the
//! identity provider; the presence columns are owned by the connection
//! lifecycle and never mutated elsewhere.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use huddle_shared::types::{PresenceStatus, UserId};
use huddle_shared::views::UserSummary;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{col_ts_opt, col_uuid, conversion_err, BadColumn, UserProfile};

impl Database {
    /// Create or refresh a profile row from the trusted identity layer.
    /// Presence columns are left untouched.
    pub fn upsert_user(
        &self,
        id: UserId,
        display_name: Option<&str>,
        email: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, email, avatar_url, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'offline', ?5)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                email        = excluded.email,
                avatar_url   = excluded.avatar_url",
            params![
                id.to_string(),
                display_name,
                email,
                avatar_url,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a full profile.
    pub fn get_user(&self, id: UserId) -> Result<UserProfile> {
        self.conn()
            .query_row(
                "SELECT id, display_name, email, avatar_url, status, last_seen_at, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_profile,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Fetch the summary shape used by read models, or `None` when the
    /// profile has not been mirrored yet.
    pub fn user_summary(&self, id: UserId) -> Result<Option<UserSummary>> {
        let summary = self
            .conn()
            .query_row(
                "SELECT id, display_name, email, avatar_url, status, last_seen_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let status_str: String = row.get(4)?;
                    let status = PresenceStatus::parse(&status_str)
                        .ok_or_else(|| conversion_err(4, BadColumn("status", status_str)))?;
                    Ok(UserSummary {
                        id: UserId(col_uuid(row, 0)?),
                        display_name: row.get(1)?,
                        email: row.get(2)?,
                        avatar_url: row.get(3)?,
                        status,
                        last_seen_at: col_ts_opt(row, 5)?,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }

    /// Record a presence transition.  Upserts so a user whose profile has not
    /// been mirrored yet still gets a presence row on first connect.
    pub fn set_presence(
        &self,
        id: UserId,
        status: PresenceStatus,
        last_seen_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, status, last_seen_at, created_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET
                status       = excluded.status,
                last_seen_at = excluded.last_seen_at",
            params![
                id.to_string(),
                status.as_str(),
                last_seen_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

/// Map a `rusqlite::Row` to a [`UserProfile`].
fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    let status_str: String = row.get(4)?;
    let status = PresenceStatus::parse(&status_str)
        .ok_or_else(|| conversion_err(4, BadColumn("status", status_str)))?;

    Ok(UserProfile {
        id: UserId(col_uuid(row, 0)?),
        display_name: row.get(1)?,
        email: row.get(2)?,
        avatar_url: row.get(3)?,
        status,
        last_seen_at: col_ts_opt(row, 5)?,
        created_at: crate::models::col_ts(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn upsert_then_get() {
        let (_dir, db) = open_db();
        let id = UserId::new();

        db.upsert_user(id, Some("Sam Kim"), Some("sam@example.com"), None)
            .unwrap();
        let profile = db.get_user(id).unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Sam Kim"));
        assert_eq!(profile.status, PresenceStatus::Offline);

        // Refreshing the profile keeps presence untouched.
        db.set_presence(id, PresenceStatus::Online, Utc::now())
            .unwrap();
        db.upsert_user(id, Some("Sam K."), None, None).unwrap();
        let profile = db.get_user(id).unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Sam K."));
        assert_eq!(profile.status, PresenceStatus::Online);
    }

    #[test]
    fn presence_upsert_creates_missing_row() {
        let (_dir, db) = open_db();
        let id = UserId::new();

        db.set_presence(id, PresenceStatus::Online, Utc::now())
            .unwrap();
        let summary = db.user_summary(id).unwrap().unwrap();
        assert_eq!(summary.status, PresenceStatus::Online);
        assert!(summary.last_seen_at.is_some());
    }

    #[test]
    fn missing_summary_is_none() {
        let (_dir, db) = open_db();
        assert!(db.user_summary(UserId::new()).unwrap().is_none());
    }
}
