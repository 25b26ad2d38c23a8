//! Bounded pool of SQLite connections.
//!
//! Every connection targets the same database file and carries the same
//! pragmas (WAL, foreign keys, busy timeout). Acquisition blocks until a
//! connection is free; the returned [`PooledConnection`] guard hands the
//! connection back on drop, so release cannot be forgotten. A closed pool
//! refuses new acquisitions but lets in-flight guards release cleanly.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::error::{Result, StoreError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Cheap-clone handle to the shared pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    returned: Condvar,
    capacity: usize,
    path: PathBuf,
}

struct PoolState {
    idle: Vec<Connection>,
    outstanding: usize,
    closed: bool,
}

impl ConnectionPool {
    /// Number of pooled connections: `max(4, hardware concurrency)`.
    pub fn default_capacity() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(4)
    }

    /// Open `capacity` connections to the database at `path`.
    pub fn open(path: &Path, capacity: usize) -> Result<Self> {
        let mut idle = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            idle.push(open_connection(path)?);
        }

        tracing::debug!(path = %path.display(), capacity, "connection pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    idle,
                    outstanding: 0,
                    closed: false,
                }),
                returned: Condvar::new(),
                capacity,
                path: path.to_path_buf(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Block until a connection is free.
    pub fn acquire(&self) -> Result<PooledConnection> {
        self.acquire_inner(None)
    }

    /// Block until a connection is free or the timeout elapses.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection> {
        self.acquire_inner(Some(timeout))
    }

    fn acquire_inner(&self, timeout: Option<Duration>) -> Result<PooledConnection> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock().expect("pool lock poisoned");

        loop {
            if state.closed {
                return Err(StoreError::PoolClosed);
            }
            if let Some(conn) = state.idle.pop() {
                state.outstanding += 1;
                return Ok(PooledConnection {
                    conn: Some(conn),
                    pool: Arc::clone(&self.inner),
                });
            }
            state = match deadline {
                None => self
                    .inner
                    .returned
                    .wait(state)
                    .expect("pool lock poisoned"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StoreError::PoolTimeout);
                    }
                    let (state, wait) = self
                        .inner
                        .returned
                        .wait_timeout(state, deadline - now)
                        .expect("pool lock poisoned");
                    if wait.timed_out() && state.idle.is_empty() && !state.closed {
                        return Err(StoreError::PoolTimeout);
                    }
                    state
                }
            };
        }
    }

    /// Refuse further acquisitions, wait for in-flight guards to come home,
    /// then drop every connection.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().expect("pool lock poisoned");
        state.closed = true;
        self.inner.returned.notify_all();
        while state.outstanding > 0 {
            state = self.inner.returned.wait(state).expect("pool lock poisoned");
        }
        state.idle.clear();
        tracing::debug!(path = %self.inner.path.display(), "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().expect("pool lock poisoned").closed
    }
}

impl PoolInner {
    fn release(&self, conn: Connection) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        state.outstanding -= 1;
        if state.closed {
            // Closed pool: drop the connection instead of re-idling it.
            drop(conn);
        } else {
            state.idle.push(conn);
        }
        drop(state);
        self.returned.notify_all();
    }
}

/// Open a single connection with the pool's pragmas applied. Also used for
/// the dedicated schema-migration connection.
pub(crate) fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Scoped connection handle. Derefs to [`rusqlite::Connection`]; the
/// connection returns to the pool when the guard drops.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection already released")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection already released")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_at(dir: &tempfile::TempDir, capacity: usize) -> ConnectionPool {
        ConnectionPool::open(&dir.path().join("pool.db"), capacity).unwrap()
    }

    #[test]
    fn acquire_release_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_at(&dir, 2);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(matches!(
            pool.acquire_timeout(Duration::from_millis(20)),
            Err(StoreError::PoolTimeout)
        ));

        drop(a);
        let c = pool.acquire_timeout(Duration::from_millis(200)).unwrap();
        drop(b);
        drop(c);
    }

    #[test]
    fn blocked_acquire_wakes_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_at(&dir, 1);

        let held = pool.acquire().unwrap();
        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.acquire().map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(50));
        drop(held);
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn closed_pool_refuses_but_releases() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_at(&dir, 2);

        let held = pool.acquire().unwrap();
        let closer = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.close())
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(matches!(pool.acquire(), Err(StoreError::PoolClosed)));
        drop(held);
        closer.join().unwrap();
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire(), Err(StoreError::PoolClosed)));
    }

    #[test]
    fn connections_share_one_database() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_at(&dir, 2);

        let a = pool.acquire().unwrap();
        a.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (7);")
            .unwrap();
        drop(a);

        let b = pool.acquire().unwrap();
        let x: i64 = b.query_row("SELECT x FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(x, 7);
    }
}
