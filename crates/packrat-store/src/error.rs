use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Could not determine application data directory")]
    NoDataDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found")]
    NotFound,

    #[error("Invalid database version: {0}")]
    InvalidDatabaseVersion(String),

    #[error("Database version {found} is newer than the supported version {supported}")]
    DatabaseTooNew { found: u32, supported: u32 },

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Timed out waiting for a pooled connection")]
    PoolTimeout,
}

pub type Result<T> = std::result::Result<T, StoreError>;
