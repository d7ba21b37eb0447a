//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `chats`, `chat_members`, `messages`,
//! `attachments`, `mentions`, `reactions`, and `message_reads`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (profile mirror of the external identity provider, plus
-- the presence columns owned by the connection lifecycle)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    display_name TEXT,
    email        TEXT,
    avatar_url   TEXT,
    status       TEXT NOT NULL DEFAULT 'offline',  -- 'online' | 'offline'
    last_seen_at TEXT,                        -- ISO-8601 / RFC-3339
    created_at   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id                  TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    organization_id     TEXT NOT NULL,              -- tenant scope
    project_id          TEXT,
    name                TEXT,
    description         TEXT,
    chat_type           TEXT NOT NULL,              -- 'direct' | 'group'
    visibility          TEXT NOT NULL DEFAULT 'public',
    creator_id          TEXT NOT NULL,
    avatar_url          TEXT,
    can_members_invite  INTEGER NOT NULL DEFAULT 1, -- boolean 0/1
    can_members_message INTEGER NOT NULL DEFAULT 1,
    approval_required   INTEGER NOT NULL DEFAULT 0,
    last_message_id     TEXT,                       -- denormalized pointer
    is_archived         INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,

    FOREIGN KEY (last_message_id) REFERENCES messages(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_chats_org ON chats(organization_id);
CREATE INDEX IF NOT EXISTS idx_chats_creator ON chats(creator_id);

-- ----------------------------------------------------------------
-- Chat members.  The composite primary key is the uniqueness
-- invariant: one row per (chat, user), added and removed atomically.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_members (
    chat_id   TEXT NOT NULL,
    user_id   TEXT NOT NULL,
    role      TEXT NOT NULL DEFAULT 'member',  -- 'admin' | 'member'
    joined_at TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_members_user ON chat_members(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    chat_id      TEXT NOT NULL,
    sender_id    TEXT NOT NULL,
    content      TEXT NOT NULL,
    message_type TEXT NOT NULL DEFAULT 'text',
    reply_to_id  TEXT,
    is_edited    INTEGER NOT NULL DEFAULT 0,
    edited_at    TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_created
    ON messages(chat_id, created_at DESC);

-- ----------------------------------------------------------------
-- Attachment metadata (blob storage itself is out of scope)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS attachments (
    message_id TEXT NOT NULL,
    url        TEXT NOT NULL,
    name       TEXT NOT NULL,
    mime_type  TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,

    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);

-- ----------------------------------------------------------------
-- Mentions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS mentions (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Reactions.  Set semantics: one row per (message, user, emoji).
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id, emoji),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Read-marks.  `readBy` is a set, not a boolean: one row per
-- (message, reader), inserted with INSERT OR IGNORE so concurrent
-- readers never clobber each other.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
