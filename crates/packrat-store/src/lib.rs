//! Embedded archive for the packrat tracker: a single SQLite file behind a
//! bounded connection pool, typed repositories with deduplicating upserts,
//! observable row counts, and forward-only schema migrations.

pub mod channels;
pub mod database;
pub mod downloads;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod observe;
pub mod pool;
pub mod servers;
pub mod urls;
pub mod users;

mod error;
mod sql;

pub use database::{Database, OpenOutcome};
pub use error::{Result, StoreError};
pub use migrations::{AlwaysUpgrade, UpgradeGate, SCHEMA_VERSION};
pub use models::*;
