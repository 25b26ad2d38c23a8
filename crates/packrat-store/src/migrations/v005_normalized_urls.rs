//! v005 -- URL normalization rework.
//!
//! Attachments historically kept the verbatim capture URL. From this version
//! on they carry both the verbatim `download_url` and the canonical
//! `normalized_url`; existing rows are rewritten through the normalization
//! function. The legacy `downloads` table gains a `download_url` column and
//! has its keys normalized the same way.

use rusqlite::{params, Connection};

use crate::urls::normalize_download_url;

const REBUILD_SQL: &str = r#"
CREATE TABLE attachments_new (
    attachment_id  INTEGER PRIMARY KEY NOT NULL,
    message_id     INTEGER NOT NULL,
    name           TEXT NOT NULL,
    type           TEXT,
    normalized_url TEXT NOT NULL,
    download_url   TEXT NOT NULL,
    size           INTEGER NOT NULL,
    width          INTEGER,
    height         INTEGER
);

INSERT INTO attachments_new
    SELECT attachment_id, message_id, name, type, url, url, size, width, height
    FROM attachments;

DROP TABLE attachments;
ALTER TABLE attachments_new RENAME TO attachments;

ALTER TABLE downloads ADD COLUMN download_url TEXT;
UPDATE downloads SET download_url = url;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(REBUILD_SQL)?;

    let rows: Vec<(i64, String)> = conn
        .prepare("SELECT attachment_id, download_url FROM attachments")?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;
    for (attachment_id, download_url) in rows {
        conn.execute(
            "UPDATE attachments SET normalized_url = ?1 WHERE attachment_id = ?2",
            params![normalize_download_url(&download_url), attachment_id],
        )?;
    }

    // Normalized keys can collide; keep the first row and let the duplicate
    // keep its legacy key (it is dropped when the queue is rebuilt in v006).
    let urls: Vec<String> = conn
        .prepare("SELECT url FROM downloads")?
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    for url in urls {
        conn.execute(
            "UPDATE OR IGNORE downloads SET url = ?1 WHERE url = ?2",
            params![normalize_download_url(&url), url],
        )?;
    }

    Ok(())
}
