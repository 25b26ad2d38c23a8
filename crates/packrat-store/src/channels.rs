use std::sync::Arc;

use rusqlite::params;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::Channel;
use crate::observe::Counts;
use crate::pool::ConnectionPool;
use crate::sql::upsert_sql;

#[derive(Clone)]
pub struct ChannelsRepository {
    pool: ConnectionPool,
    counts: Arc<Counts>,
}

impl ChannelsRepository {
    pub(crate) fn new(pool: ConnectionPool, counts: Arc<Counts>) -> Self {
        Self { pool, counts }
    }

    pub fn add(&self, channels: &[Channel]) -> Result<()> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction()?;
        {
            let sql = upsert_sql(
                "channels",
                &["id"],
                &["server_id", "name", "parent_id", "position", "topic", "nsfw"],
            );
            let mut stmt = tx.prepare_cached(&sql)?;
            for channel in channels {
                stmt.execute(params![
                    channel.id as i64,
                    channel.server_id as i64,
                    channel.name,
                    channel.parent_id.map(|id| id as i64),
                    channel.position,
                    channel.topic,
                    channel.nsfw,
                ])?;
            }
        }
        tx.commit()?;
        self.counts.channels.refresh(&conn)?;
        Ok(())
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.pool.acquire()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM channels", [], |row| row.get(0))?)
    }

    pub fn scan(&self, mut f: impl FnMut(Channel)) -> Result<()> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT id, server_id, name, parent_id, position, topic, nsfw
             FROM channels ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_channel)?;
        for row in rows {
            f(row?);
        }
        Ok(())
    }

    pub fn get_all(&self) -> Result<Vec<Channel>> {
        let mut channels = Vec::new();
        self.scan(|channel| channels.push(channel))?;
        Ok(channels)
    }

    pub fn total_count(&self) -> watch::Receiver<i64> {
        self.counts.channels.subscribe()
    }
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    let id: i64 = row.get(0)?;
    let server_id: i64 = row.get(1)?;
    let parent_id: Option<i64> = row.get(3)?;
    Ok(Channel {
        id: id as u64,
        server_id: server_id as u64,
        name: row.get(2)?,
        parent_id: parent_id.map(|id| id as u64),
        position: row.get(4)?,
        topic: row.get(5)?,
        nsfw: row.get(6)?,
    })
}
