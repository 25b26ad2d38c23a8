use std::sync::Arc;

use rusqlite::params;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::User;
use crate::observe::Counts;
use crate::pool::ConnectionPool;
use crate::sql::upsert_sql;

#[derive(Clone)]
pub struct UsersRepository {
    pool: ConnectionPool,
    counts: Arc<Counts>,
}

impl UsersRepository {
    pub(crate) fn new(pool: ConnectionPool, counts: Arc<Counts>) -> Self {
        Self { pool, counts }
    }

    /// Upsert a batch of users in one transaction.
    pub fn add(&self, users: &[User]) -> Result<()> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction()?;
        {
            let sql = upsert_sql("users", &["id"], &["name", "avatar_url", "discriminator"]);
            let mut stmt = tx.prepare_cached(&sql)?;
            for user in users {
                stmt.execute(params![
                    user.id as i64,
                    user.name,
                    user.avatar_url,
                    user.discriminator,
                ])?;
            }
        }
        tx.commit()?;
        self.counts.users.refresh(&conn)?;
        Ok(())
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.pool.acquire()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }

    /// Visit every user while holding one pooled connection.
    pub fn scan(&self, mut f: impl FnMut(User)) -> Result<()> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, avatar_url, discriminator FROM users ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_user)?;
        for row in rows {
            f(row?);
        }
        Ok(())
    }

    pub fn get_all(&self) -> Result<Vec<User>> {
        let mut users = Vec::new();
        self.scan(|user| users.push(user))?;
        Ok(users)
    }

    pub fn total_count(&self) -> watch::Receiver<i64> {
        self.counts.users.subscribe()
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: i64 = row.get(0)?;
    Ok(User {
        id: id as u64,
        name: row.get(1)?,
        avatar_url: row.get(2)?,
        discriminator: row.get(3)?,
    })
}
