use rusqlite::Connection;

// The original single-table download queue; split into metadata + blobs by
// the v006 step.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS downloads (
    url    TEXT PRIMARY KEY NOT NULL,
    status INTEGER NOT NULL,
    size   INTEGER,
    blob   BLOB
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
