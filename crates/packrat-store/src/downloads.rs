//! The download queue: one `download_metadata` row per normalized URL, with
//! blob bytes living in `download_blobs` behind a cascading FK.

use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension};
use tokio::sync::watch;

use crate::error::{Result, StoreError};
use crate::models::{DownloadItem, DownloadOutcome, DownloadStatistics, DownloadStatus};
use crate::observe::Counts;
use crate::pool::ConnectionPool;

/// Selects which attachments become download items.
#[derive(Debug, Clone, Default)]
pub struct AttachmentFilter {
    pub channel_ids: Option<Vec<u64>>,
    pub max_bytes: Option<u64>,
}

impl AttachmentFilter {
    pub fn all() -> Self {
        Self::default()
    }
}

/// Status families a download-item filter can match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadItemFilterKind {
    Enqueued,
    Downloading,
    Success,
    Failed,
    Skipped,
}

impl DownloadItemFilterKind {
    fn predicate(self) -> &'static str {
        match self {
            DownloadItemFilterKind::Enqueued => "status = 0",
            DownloadItemFilterKind::Downloading => "status = 1",
            DownloadItemFilterKind::Success => "status = 2",
            DownloadItemFilterKind::Failed => "(status = 3 OR status >= 1000)",
            DownloadItemFilterKind::Skipped => "status = 4",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadItemFilter {
    pub kinds: Vec<DownloadItemFilterKind>,
}

impl DownloadItemFilter {
    pub fn matching(kinds: impl IntoIterator<Item = DownloadItemFilterKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    /// `1=0` when the filter matches nothing.
    fn predicate(&self) -> String {
        if self.kinds.is_empty() {
            return "1=0".to_string();
        }
        let parts: Vec<&str> = self.kinds.iter().map(|kind| kind.predicate()).collect();
        format!("({})", parts.join(" OR "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRemovalMode {
    RemoveMatching,
    KeepMatching,
}

#[derive(Clone)]
pub struct DownloadsRepository {
    pool: ConnectionPool,
    counts: Arc<Counts>,
}

impl DownloadsRepository {
    pub(crate) fn new(pool: ConnectionPool, counts: Arc<Counts>) -> Self {
        Self { pool, counts }
    }

    /// Insert an Enqueued item for every attachment matching the filter
    /// whose normalized URL is not already queued. Returns how many items
    /// were inserted. Safe to call while the downloader is running.
    pub fn enqueue(&self, filter: &AttachmentFilter) -> Result<u64> {
        let conn = self.pool.acquire()?;

        let mut sql = String::from(
            "INSERT OR IGNORE INTO download_metadata (normalized_url, download_url, status, type, size)
             SELECT a.normalized_url, a.download_url, ?, a.type, a.size
             FROM attachments a",
        );
        let mut params: Vec<Value> = vec![Value::Integer(DownloadStatus::Enqueued.to_code())];

        if filter.channel_ids.is_some() {
            sql.push_str(" JOIN messages m ON m.id = a.message_id");
        }

        let mut clauses = vec![
            "a.normalized_url NOT IN (SELECT normalized_url FROM download_metadata)".to_string(),
        ];
        if let Some(channel_ids) = &filter.channel_ids {
            let marks = vec!["?"; channel_ids.len()].join(", ");
            clauses.push(format!("m.channel_id IN ({marks})"));
            params.extend(channel_ids.iter().map(|id| Value::Integer(*id as i64)));
        }
        if let Some(max_bytes) = filter.max_bytes {
            clauses.push("a.size <= ?".to_string());
            params.push(Value::Integer(max_bytes as i64));
        }
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));

        let inserted = conn.execute(&sql, rusqlite::params_from_iter(params))?;
        if inserted > 0 {
            self.counts.downloads.refresh(&conn)?;
        }
        Ok(inserted as u64)
    }

    /// Atomically transition up to `limit` Enqueued items to Downloading and
    /// return them, oldest first.
    pub fn pull_next_enqueued(&self, limit: usize) -> Result<Vec<DownloadItem>> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction()?;

        let items: Vec<DownloadItem> = {
            let mut stmt = tx.prepare_cached(
                "SELECT normalized_url, download_url, type, size
                 FROM download_metadata WHERE status = ?1 ORDER BY rowid LIMIT ?2",
            )?;
            let rows = stmt.query_map(
                params![DownloadStatus::Enqueued.to_code(), limit as i64],
                |row| {
                    let size: Option<i64> = row.get(3)?;
                    Ok(DownloadItem {
                        normalized_url: row.get(0)?,
                        download_url: row.get(1)?,
                        status: DownloadStatus::Downloading,
                        mime_type: row.get(2)?,
                        size: size.map(|s| s as u64),
                    })
                },
            )?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        {
            let mut update = tx.prepare_cached(
                "UPDATE download_metadata SET status = ?1 WHERE normalized_url = ?2",
            )?;
            for item in &items {
                update.execute(params![
                    DownloadStatus::Downloading.to_code(),
                    item.normalized_url
                ])?;
            }
        }

        tx.commit()?;
        Ok(items)
    }

    /// Record the terminal outcome for one item. On success the blob bytes
    /// are stored and the recorded size matches the blob length.
    pub fn write_outcome(&self, normalized_url: &str, outcome: &DownloadOutcome) -> Result<()> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction()?;

        let affected = match outcome {
            DownloadOutcome::Success { bytes, mime_type } => {
                let affected = tx.execute(
                    "UPDATE download_metadata
                     SET status = ?1, size = ?2, type = COALESCE(?3, type)
                     WHERE normalized_url = ?4",
                    params![
                        DownloadStatus::Success.to_code(),
                        bytes.len() as i64,
                        mime_type,
                        normalized_url
                    ],
                )?;
                if affected > 0 {
                    tx.execute(
                        "INSERT OR REPLACE INTO download_blobs (normalized_url, blob) VALUES (?1, ?2)",
                        params![normalized_url, bytes],
                    )?;
                }
                affected
            }
            DownloadOutcome::SkippedTooLarge { size } => {
                let affected = tx.execute(
                    "UPDATE download_metadata
                     SET status = ?1, size = COALESCE(?2, size)
                     WHERE normalized_url = ?3",
                    params![
                        DownloadStatus::SizeCapSkipped.to_code(),
                        size.map(|s| s as i64),
                        normalized_url
                    ],
                )?;
                tx.execute(
                    "DELETE FROM download_blobs WHERE normalized_url = ?1",
                    params![normalized_url],
                )?;
                affected
            }
            DownloadOutcome::HttpError(_) | DownloadOutcome::Failed => {
                let affected = tx.execute(
                    "UPDATE download_metadata SET status = ?1 WHERE normalized_url = ?2",
                    params![outcome.status().to_code(), normalized_url],
                )?;
                tx.execute(
                    "DELETE FROM download_blobs WHERE normalized_url = ?1",
                    params![normalized_url],
                )?;
                affected
            }
        };

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete queue items by status family. Blob rows follow via FK cascade.
    pub fn remove(&self, filter: &DownloadItemFilter, mode: FilterRemovalMode) -> Result<u64> {
        let conn = self.pool.acquire()?;
        let predicate = filter.predicate();
        let sql = match mode {
            FilterRemovalMode::RemoveMatching => {
                format!("DELETE FROM download_metadata WHERE {predicate}")
            }
            FilterRemovalMode::KeepMatching => {
                format!("DELETE FROM download_metadata WHERE NOT {predicate}")
            }
        };
        let removed = conn.execute(&sql, [])?;
        if removed > 0 {
            self.counts.downloads.refresh(&conn)?;
        }
        Ok(removed as u64)
    }

    /// Reset Downloading items back to Enqueued. Called when a download
    /// session ends so interrupted items are retried next time.
    pub fn requeue_downloading(&self) -> Result<u64> {
        let conn = self.pool.acquire()?;
        let changed = conn.execute(
            "UPDATE download_metadata SET status = ?1 WHERE status = ?2",
            params![
                DownloadStatus::Enqueued.to_code(),
                DownloadStatus::Downloading.to_code()
            ],
        )?;
        Ok(changed as u64)
    }

    pub fn statistics(&self) -> Result<DownloadStatistics> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare_cached(
            "SELECT status, COUNT(*), COALESCE(SUM(size), 0) FROM download_metadata GROUP BY status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut stats = DownloadStatistics::default();
        for row in rows {
            let (code, count, total_bytes) = row?;
            let bucket = match DownloadStatus::from_code(code) {
                Some(DownloadStatus::Enqueued) | Some(DownloadStatus::Downloading) => {
                    &mut stats.enqueued
                }
                Some(DownloadStatus::Success) => &mut stats.successful,
                Some(DownloadStatus::SizeCapSkipped) => &mut stats.skipped,
                Some(DownloadStatus::GenericError)
                | Some(DownloadStatus::HttpError(_))
                | None => &mut stats.failed,
            };
            bucket.count += count as u64;
            bucket.total_bytes += total_bytes as u64;
        }
        Ok(stats)
    }

    pub fn get(&self, normalized_url: &str) -> Result<Option<DownloadItem>> {
        let conn = self.pool.acquire()?;
        let item = conn
            .prepare_cached(
                "SELECT normalized_url, download_url, status, type, size
                 FROM download_metadata WHERE normalized_url = ?1",
            )?
            .query_row(params![normalized_url], |row| {
                let code: i64 = row.get(2)?;
                let size: Option<i64> = row.get(4)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    code,
                    row.get::<_, Option<String>>(3)?,
                    size,
                ))
            })
            .optional()?;

        match item {
            None => Ok(None),
            Some((normalized_url, download_url, code, mime_type, size)) => {
                let status = DownloadStatus::from_code(code).ok_or_else(|| {
                    StoreError::Migration(format!("unknown download status code {code}"))
                })?;
                Ok(Some(DownloadItem {
                    normalized_url,
                    download_url,
                    status,
                    mime_type,
                    size: size.map(|s| s as u64),
                }))
            }
        }
    }

    /// Fetch the archived blob and its content type for a successfully
    /// downloaded URL.
    pub fn get_blob(&self, normalized_url: &str) -> Result<Option<(Vec<u8>, Option<String>)>> {
        let conn = self.pool.acquire()?;
        let blob = conn
            .prepare_cached(
                "SELECT b.blob, m.type
                 FROM download_blobs b
                 JOIN download_metadata m ON m.normalized_url = b.normalized_url
                 WHERE b.normalized_url = ?1 AND m.status = ?2",
            )?
            .query_row(
                params![normalized_url, DownloadStatus::Success.to_code()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(blob)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.pool.acquire()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM download_metadata", [], |row| row.get(0))?)
    }

    pub fn total_count(&self) -> watch::Receiver<i64> {
        self.counts.downloads.subscribe()
    }
}
