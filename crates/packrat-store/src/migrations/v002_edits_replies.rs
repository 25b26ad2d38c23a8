use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS edit_timestamps (
    message_id     INTEGER PRIMARY KEY NOT NULL,
    edit_timestamp INTEGER NOT NULL               -- epoch millis
);

CREATE TABLE IF NOT EXISTS replied_to (
    message_id    INTEGER PRIMARY KEY NOT NULL,
    replied_to_id INTEGER NOT NULL                -- snowflake of the quoted message
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
