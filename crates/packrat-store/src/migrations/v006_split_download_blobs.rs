//! v006 -- Split the download queue into metadata and blob tables so status
//! scans never page blob bytes, with a cascading FK tying them together.

use rusqlite::Connection;

const UP_SQL: &str = r#"
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

INSERT OR IGNORE INTO download_metadata (normalized_url, download_url, status, type, size)
    SELECT url, COALESCE(download_url, url), status, NULL, size FROM downloads;

INSERT OR IGNORE INTO download_blobs (normalized_url, blob)
    SELECT url, blob FROM downloads WHERE blob IS NOT NULL;

DROP TABLE downloads;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
