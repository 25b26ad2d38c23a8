use std::sync::Arc;

use rusqlite::params;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::{Server, ServerKind};
use crate::observe::Counts;
use crate::pool::ConnectionPool;
use crate::sql::upsert_sql;

#[derive(Clone)]
pub struct ServersRepository {
    pool: ConnectionPool,
    counts: Arc<Counts>,
}

impl ServersRepository {
    pub(crate) fn new(pool: ConnectionPool, counts: Arc<Counts>) -> Self {
        Self { pool, counts }
    }

    pub fn add(&self, servers: &[Server]) -> Result<()> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction()?;
        {
            let sql = upsert_sql("servers", &["id"], &["name", "type"]);
            let mut stmt = tx.prepare_cached(&sql)?;
            for server in servers {
                stmt.execute(params![
                    server.id as i64,
                    server.name,
                    server.kind.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        self.counts.servers.refresh(&conn)?;
        Ok(())
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.pool.acquire()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM servers", [], |row| row.get(0))?)
    }

    pub fn scan(&self, mut f: impl FnMut(Server)) -> Result<()> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare("SELECT id, name, type FROM servers ORDER BY id")?;
        let rows = stmt.query_map([], row_to_server)?;
        for row in rows {
            f(row?);
        }
        Ok(())
    }

    pub fn get_all(&self) -> Result<Vec<Server>> {
        let mut servers = Vec::new();
        self.scan(|server| servers.push(server))?;
        Ok(servers)
    }

    pub fn total_count(&self) -> watch::Receiver<i64> {
        self.counts.servers.subscribe()
    }
}

fn row_to_server(row: &rusqlite::Row<'_>) -> rusqlite::Result<Server> {
    let id: i64 = row.get(0)?;
    let kind_raw: String = row.get(2)?;
    let kind = ServerKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown server type '{kind_raw}'").into(),
        )
    })?;
    Ok(Server {
        id: id as u64,
        name: row.get(1)?,
        kind,
    })
}
