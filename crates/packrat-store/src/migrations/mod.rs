//! Schema versioning and forward-only migrations.
//!
//! The schema version lives in the `metadata` key/value table. A fresh file
//! gets the full current schema in one transaction; an old file walks the
//! step migrations, each inside its own transaction that also bumps the
//! version row, so an interrupted upgrade resumes exactly where it stopped.

mod initial;
pub mod v002_edits_replies;
pub mod v003_downloads;
pub mod v004_attachment_dimensions;
pub mod v005_normalized_urls;
pub mod v006_split_download_blobs;
pub mod v007_polls;
pub mod v008_message_indexes;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};

pub const SCHEMA_VERSION: u32 = 8;

/// Caller hooks consulted while opening a database that needs upgrading.
pub trait UpgradeGate {
    /// Whether the caller permits migrating `from` up to `to`. Refusal
    /// leaves the database untouched and unopened.
    fn can_upgrade(&self, from: u32, to: u32) -> bool;

    /// Progress callback, invoked before each step with the version the
    /// database is about to reach.
    fn next_version(&self, _version: u32) {}
}

/// Gate that accepts every upgrade silently.
pub struct AlwaysUpgrade;

impl UpgradeGate for AlwaysUpgrade {
    fn can_upgrade(&self, _from: u32, _to: u32) -> bool {
        true
    }
}

pub(crate) enum SchemaOutcome {
    Ready,
    UpgradeRefused { from: u32 },
}

type Migration = fn(&Connection) -> std::result::Result<(), rusqlite::Error>;

/// Static ordered migration map: version `from` to `from + 1`.
fn migration_from(from: u32) -> Option<(&'static str, Migration)> {
    match from {
        1 => Some(("v002_edits_replies", v002_edits_replies::up)),
        2 => Some(("v003_downloads", v003_downloads::up)),
        3 => Some(("v004_attachment_dimensions", v004_attachment_dimensions::up)),
        4 => Some(("v005_normalized_urls", v005_normalized_urls::up)),
        5 => Some(("v006_split_download_blobs", v006_split_download_blobs::up)),
        6 => Some(("v007_polls", v007_polls::up)),
        7 => Some(("v008_message_indexes", v008_message_indexes::up)),
        _ => None,
    }
}

pub(crate) fn prepare(conn: &Connection, gate: &dyn UpgradeGate) -> Result<SchemaOutcome> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL)",
        [],
    )?;

    let Some(raw) = read_version(conn)? else {
        tracing::info!(version = SCHEMA_VERSION, "initializing fresh schema");
        let tx = conn.unchecked_transaction()?;
        initial::apply(&tx).map_err(|e| StoreError::Migration(format!("initial: {e}")))?;
        write_version(&tx, SCHEMA_VERSION)?;
        tx.commit()?;
        return Ok(SchemaOutcome::Ready);
    };

    let current: u32 = raw
        .parse()
        .map_err(|_| StoreError::InvalidDatabaseVersion(raw.clone()))?;
    if current < 1 {
        return Err(StoreError::InvalidDatabaseVersion(raw));
    }
    if current > SCHEMA_VERSION {
        return Err(StoreError::DatabaseTooNew {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    if current == SCHEMA_VERSION {
        return Ok(SchemaOutcome::Ready);
    }

    if !gate.can_upgrade(current, SCHEMA_VERSION) {
        tracing::warn!(
            from = current,
            to = SCHEMA_VERSION,
            "database upgrade refused by caller"
        );
        return Ok(SchemaOutcome::UpgradeRefused { from: current });
    }

    for from in current..SCHEMA_VERSION {
        let (name, migrate) = migration_from(from)
            .ok_or_else(|| StoreError::Migration(format!("no migration from version {from}")))?;
        gate.next_version(from + 1);
        tracing::info!(step = name, from, to = from + 1, "applying migration");

        let tx = conn.unchecked_transaction()?;
        migrate(&tx).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        write_version(&tx, from + 1)?;
        tx.commit()?;
    }

    Ok(SchemaOutcome::Ready)
}

fn read_version(conn: &Connection) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn write_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('version', ?1)",
        params![version.to_string()],
    )?;
    Ok(())
}

/// Current version of an open database. Exposed for diagnostics and tests.
pub fn schema_version(conn: &Connection) -> Result<Option<u32>> {
    match read_version(conn)? {
        Some(raw) => Ok(Some(raw.parse().map_err(|_| {
            StoreError::InvalidDatabaseVersion(raw.clone())
        })?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Schema as it existed at version 1, for upgrade-path tests.
    const V1_SQL: &str = r#"
    CREATE TABLE metadata (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL);
    INSERT INTO metadata (key, value) VALUES ('version', '1');

    CREATE TABLE users (
        id            INTEGER PRIMARY KEY NOT NULL,
        name          TEXT NOT NULL,
        avatar_url    TEXT,
        discriminator TEXT
    );
    CREATE TABLE servers (id INTEGER PRIMARY KEY NOT NULL, name TEXT NOT NULL, type TEXT NOT NULL);
    CREATE TABLE channels (
        id        INTEGER PRIMARY KEY NOT NULL,
        server_id INTEGER NOT NULL,
        name      TEXT NOT NULL,
        parent_id INTEGER,
        position  INTEGER,
        topic     TEXT,
        nsfw      INTEGER
    );
    CREATE TABLE messages (
        id         INTEGER PRIMARY KEY NOT NULL,
        sender_id  INTEGER NOT NULL,
        channel_id INTEGER NOT NULL,
        text       TEXT NOT NULL,
        timestamp  INTEGER NOT NULL
    );
    CREATE TABLE attachments (
        attachment_id INTEGER PRIMARY KEY NOT NULL,
        message_id    INTEGER NOT NULL,
        name          TEXT NOT NULL,
        type          TEXT,
        url           TEXT NOT NULL,
        size          INTEGER NOT NULL
    );
    CREATE TABLE embeds (message_id INTEGER NOT NULL, json TEXT NOT NULL);
    CREATE TABLE reactions (
        message_id  INTEGER NOT NULL,
        emoji_id    INTEGER,
        emoji_name  TEXT,
        emoji_flags INTEGER NOT NULL,
        count       INTEGER NOT NULL
    );
    "#;

    fn memory_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn fresh_database_initializes_to_current() {
        let conn = memory_conn();
        assert!(matches!(
            prepare(&conn, &AlwaysUpgrade).unwrap(),
            SchemaOutcome::Ready
        ));
        assert_eq!(schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));

        // Every table of the current schema exists.
        for table in [
            "users",
            "servers",
            "channels",
            "messages",
            "edit_timestamps",
            "replied_to",
            "attachments",
            "embeds",
            "reactions",
            "polls",
            "poll_answers",
            "download_metadata",
            "download_blobs",
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .unwrap();
            assert_eq!(count, 0, "{table} should exist and be empty");
        }
    }

    #[test]
    fn already_current_is_a_noop() {
        let conn = memory_conn();
        prepare(&conn, &AlwaysUpgrade).unwrap();
        assert!(matches!(
            prepare(&conn, &AlwaysUpgrade).unwrap(),
            SchemaOutcome::Ready
        ));
        assert_eq!(schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn newer_database_is_rejected() {
        let conn = memory_conn();
        conn.execute_batch(
            "CREATE TABLE metadata (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL);
             INSERT INTO metadata (key, value) VALUES ('version', '9');",
        )
        .unwrap();
        assert!(matches!(
            prepare(&conn, &AlwaysUpgrade),
            Err(StoreError::DatabaseTooNew {
                found: 9,
                supported: SCHEMA_VERSION
            })
        ));
    }

    #[test]
    fn garbage_version_is_rejected() {
        let conn = memory_conn();
        conn.execute_batch(
            "CREATE TABLE metadata (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL);
             INSERT INTO metadata (key, value) VALUES ('version', 'banana');",
        )
        .unwrap();
        assert!(matches!(
            prepare(&conn, &AlwaysUpgrade),
            Err(StoreError::InvalidDatabaseVersion(_))
        ));

        let conn = memory_conn();
        conn.execute_batch(
            "CREATE TABLE metadata (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL);
             INSERT INTO metadata (key, value) VALUES ('version', '0');",
        )
        .unwrap();
        assert!(matches!(
            prepare(&conn, &AlwaysUpgrade),
            Err(StoreError::InvalidDatabaseVersion(_))
        ));
    }

    struct RefuseAll;

    impl UpgradeGate for RefuseAll {
        fn can_upgrade(&self, _from: u32, _to: u32) -> bool {
            false
        }
    }

    #[test]
    fn refused_upgrade_leaves_database_untouched() {
        let conn = memory_conn();
        conn.execute_batch(V1_SQL).unwrap();
        assert!(matches!(
            prepare(&conn, &RefuseAll).unwrap(),
            SchemaOutcome::UpgradeRefused { from: 1 }
        ));
        assert_eq!(schema_version(&conn).unwrap(), Some(1));
    }

    struct CountingGate {
        steps: AtomicU32,
    }

    impl UpgradeGate for CountingGate {
        fn can_upgrade(&self, _from: u32, _to: u32) -> bool {
            true
        }

        fn next_version(&self, _version: u32) {
            self.steps.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn v1_database_upgrades_to_current_preserving_rows() {
        let conn = memory_conn();
        conn.execute_batch(V1_SQL).unwrap();
        conn.execute_batch(
            "INSERT INTO users (id, name) VALUES (42, 'keeper');
             INSERT INTO attachments (attachment_id, message_id, name, type, url, size)
                 VALUES (7, 1, 'cat.png', 'image/png',
                         'https://CDN.Example.com/cat.png?ex=a&is=b&hm=c&width=64', 123);",
        )
        .unwrap();

        let gate = CountingGate {
            steps: AtomicU32::new(0),
        };
        assert!(matches!(
            prepare(&conn, &gate).unwrap(),
            SchemaOutcome::Ready
        ));
        assert_eq!(gate.steps.load(Ordering::SeqCst), 7);
        assert_eq!(schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));

        let name: String = conn
            .query_row("SELECT name FROM users WHERE id = 42", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "keeper");

        // v005 rewrote the attachment through the normalization function.
        let (normalized, download): (String, String) = conn
            .query_row(
                "SELECT normalized_url, download_url FROM attachments WHERE attachment_id = 7",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(normalized, "https://cdn.example.com/cat.png?width=64");
        assert_eq!(
            download,
            "https://CDN.Example.com/cat.png?ex=a&is=b&hm=c&width=64"
        );

        // Tables added by later versions exist and are empty.
        for table in ["polls", "poll_answers", "download_metadata", "download_blobs"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .unwrap();
            assert_eq!(count, 0, "{table} should exist and be empty");
        }
    }
}
