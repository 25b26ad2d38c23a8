//! Full current schema, applied in one transaction when a database file is
//! created from scratch. Databases at an older version reach the same shape
//! through the step migrations instead.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Tracked chat entities
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY NOT NULL,  -- snowflake
    name          TEXT NOT NULL,
    avatar_url    TEXT,
    discriminator TEXT
);

CREATE TABLE IF NOT EXISTS servers (
    id   INTEGER PRIMARY KEY NOT NULL,           -- snowflake
    name TEXT NOT NULL,
    type TEXT NOT NULL                           -- 'server' | 'group' | 'dm'
);

CREATE TABLE IF NOT EXISTS channels (
    id        INTEGER PRIMARY KEY NOT NULL,      -- snowflake
    server_id INTEGER NOT NULL,
    name      TEXT NOT NULL,
    parent_id INTEGER,
    position  INTEGER,
    topic     TEXT,
    nsfw      INTEGER                            -- boolean 0/1
);

CREATE TABLE IF NOT EXISTS messages (
    id         INTEGER PRIMARY KEY NOT NULL,     -- snowflake
    sender_id  INTEGER NOT NULL,
    channel_id INTEGER NOT NULL,
    text       TEXT NOT NULL,
    timestamp  INTEGER NOT NULL                  -- epoch millis
);

CREATE TABLE IF NOT EXISTS edit_timestamps (
    message_id     INTEGER PRIMARY KEY NOT NULL,
    edit_timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS replied_to (
    message_id    INTEGER PRIMARY KEY NOT NULL,
    replied_to_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS attachments (
    attachment_id  INTEGER PRIMARY KEY NOT NULL, -- snowflake
    message_id     INTEGER NOT NULL,
    name           TEXT NOT NULL,
    type           TEXT,
    normalized_url TEXT NOT NULL,
    download_url   TEXT NOT NULL,
    size           INTEGER NOT NULL,
    width          INTEGER,
    height         INTEGER
);

CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);

CREATE TABLE IF NOT EXISTS embeds (
    message_id INTEGER NOT NULL,
    json       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_embeds_message ON embeds(message_id);

CREATE TABLE IF NOT EXISTS reactions (
    message_id  INTEGER NOT NULL,
    emoji_id    INTEGER,
    emoji_name  TEXT,
    emoji_flags INTEGER NOT NULL,
    count       INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reactions_message ON reactions(message_id);

CREATE TABLE IF NOT EXISTS polls (
    message_id       INTEGER PRIMARY KEY NOT NULL,
    question         TEXT NOT NULL,
    multi_select     INTEGER NOT NULL,            -- boolean 0/1
    expiry_timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS poll_answers (
    message_id  INTEGER NOT NULL,
    answer_id   INTEGER NOT NULL,
    text        TEXT NOT NULL,
    emoji_id    INTEGER,
    emoji_name  TEXT,
    emoji_flags INTEGER,
    PRIMARY KEY (message_id, answer_id)
);

CREATE INDEX IF NOT EXISTS idx_poll_answers_message ON poll_answers(message_id);

-- ----------------------------------------------------------------
-- Download queue
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS download_metadata (
    normalized_url TEXT PRIMARY KEY NOT NULL,
    download_url   TEXT NOT NULL,
    status         INTEGER NOT NULL,
    type           TEXT,
    size           INTEGER
);

CREATE TABLE IF NOT EXISTS download_blobs (
    normalized_url TEXT PRIMARY KEY NOT NULL,
    blob           BLOB NOT NULL,

    FOREIGN KEY (normalized_url) REFERENCES download_metadata(normalized_url)
        ON UPDATE CASCADE ON DELETE CASCADE
);
"#;

pub fn apply(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
