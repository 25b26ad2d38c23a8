//! Database facade: owns the connection pool and the repositories.
//!
//! Opening is two-phase: a dedicated connection runs the schema manager
//! first, so migrations never compete with pool traffic, then the pool and
//! repositories come up. Closing drains the pool and flips the `closed`
//! observable after teardown.

use std::path::Path;
use std::sync::Arc;

use directories::ProjectDirs;
use tokio::sync::watch;

use crate::channels::ChannelsRepository;
use crate::downloads::DownloadsRepository;
use crate::error::{Result, StoreError};
use crate::messages::MessagesRepository;
use crate::migrations::{self, SchemaOutcome, UpgradeGate};
use crate::observe::Counts;
use crate::pool::{self, ConnectionPool};
use crate::servers::ServersRepository;
use crate::users::UsersRepository;

/// Result of [`Database::open`]: an upgrade refused by the caller's gate
/// leaves the file untouched and yields no database handle.
pub enum OpenOutcome {
    Opened(Database),
    UpgradeRefused { from: u32 },
}

impl OpenOutcome {
    /// Unwrap the opened database, treating a refused upgrade as an error.
    pub fn expect_opened(self) -> Result<Database> {
        match self {
            OpenOutcome::Opened(db) => Ok(db),
            OpenOutcome::UpgradeRefused { from } => Err(StoreError::Migration(format!(
                "upgrade from version {from} was refused"
            ))),
        }
    }
}

pub struct Database {
    pool: ConnectionPool,
    users: UsersRepository,
    servers: ServersRepository,
    channels: ChannelsRepository,
    messages: MessagesRepository,
    downloads: DownloadsRepository,
    closed_tx: watch::Sender<bool>,
}

impl Database {
    /// Open (or create) the default application database under the
    /// platform data directory.
    pub fn open_default(gate: &dyn UpgradeGate) -> Result<OpenOutcome> {
        let project_dirs =
            ProjectDirs::from("dev", "packrat", "packrat").ok_or(StoreError::NoDataDir)?;
        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Self::open(&data_dir.join("packrat.db"), gate)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open(path: &Path, gate: &dyn UpgradeGate) -> Result<OpenOutcome> {
        tracing::info!(path = %path.display(), "opening database");

        // Schema work happens on its own connection, before the pool exists.
        let schema_conn = pool::open_connection(path)?;
        match migrations::prepare(&schema_conn, gate)? {
            SchemaOutcome::Ready => {}
            SchemaOutcome::UpgradeRefused { from } => {
                return Ok(OpenOutcome::UpgradeRefused { from });
            }
        }

        let pool = ConnectionPool::open(path, ConnectionPool::default_capacity())?;
        let counts = Arc::new(Counts::new());
        counts.refresh_all(&schema_conn)?;
        drop(schema_conn);

        let (closed_tx, _) = watch::channel(false);

        Ok(OpenOutcome::Opened(Self {
            users: UsersRepository::new(pool.clone(), Arc::clone(&counts)),
            servers: ServersRepository::new(pool.clone(), Arc::clone(&counts)),
            channels: ChannelsRepository::new(pool.clone(), Arc::clone(&counts)),
            messages: MessagesRepository::new(pool.clone(), Arc::clone(&counts)),
            downloads: DownloadsRepository::new(pool.clone(), Arc::clone(&counts)),
            pool,
            closed_tx,
        }))
    }

    pub fn users(&self) -> &UsersRepository {
        &self.users
    }

    pub fn servers(&self) -> &ServersRepository {
        &self.servers
    }

    pub fn channels(&self) -> &ChannelsRepository {
        &self.channels
    }

    pub fn messages(&self) -> &MessagesRepository {
        &self.messages
    }

    pub fn downloads(&self) -> &DownloadsRepository {
        &self.downloads
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Observable that flips to `true` once the database has been torn down.
    pub fn on_closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Drain in-flight operations and close the underlying file.
    pub fn close(&self) {
        self.pool.close();
        self.closed_tx.send_replace(true);
        tracing::info!(path = %self.pool.path().display(), "database closed");
    }
}
