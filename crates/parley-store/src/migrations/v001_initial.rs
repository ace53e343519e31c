//! v001 -- Initial schema creation.
//!
//! Creates `users`, `conversations` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (mirror of the external profile store)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID
    name       TEXT NOT NULL,
    email      TEXT NOT NULL,
    avatar     TEXT,
    created_at TEXT NOT NULL                -- RFC-3339, fixed width
);

-- ----------------------------------------------------------------
-- Conversations: one row per unordered pair
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id               TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    participant_low  TEXT NOT NULL,              -- smaller user id
    participant_high TEXT NOT NULL,              -- larger user id
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,

    CHECK (participant_low < participant_high)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_pair
    ON conversations(participant_low, participant_high);

CREATE INDEX IF NOT EXISTS idx_conversations_high
    ON conversations(participant_high);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    seq             INTEGER NOT NULL,           -- 1-based, per conversation
    author          TEXT NOT NULL,              -- user id
    text            TEXT,
    image_url       TEXT,
    video_url       TEXT,
    seen            INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    created_at      TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_conversation_seq
    ON messages(conversation_id, seq);

CREATE INDEX IF NOT EXISTS idx_messages_unseen
    ON messages(conversation_id, author, seen);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
