use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS polls (
    message_id       INTEGER PRIMARY KEY NOT NULL,
    question         TEXT NOT NULL,
    multi_select     INTEGER NOT NULL,            -- boolean 0/1
    expiry_timestamp INTEGER NOT NULL             -- epoch millis
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
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
