use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use packrat_server::api::{self, AppState};
use packrat_server::config::ServerConfig;
use packrat_server::downloader::{Downloader, DownloaderOptions};
use packrat_store::{Database, UpgradeGate};

/// Accepts every schema upgrade, narrating progress to the log.
struct LoggingGate;

impl UpgradeGate for LoggingGate {
    fn can_upgrade(&self, from: u32, to: u32) -> bool {
        info!(from, to, "upgrading database schema");
        true
    }

    fn next_version(&self, version: u32) {
        info!(version, "migrating to schema version");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,packrat_server=debug")),
        )
        .init();

    info!("Starting packrat archiver v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();

    let db_path = config.db_path.clone();
    let outcome = tokio::task::spawn_blocking(move || match &db_path {
        Some(path) => Database::open(path, &LoggingGate),
        None => Database::open_default(&LoggingGate),
    })
    .await??;
    let db = Arc::new(outcome.expect_opened()?);

    let downloader = Arc::new(Downloader::new(
        Arc::clone(&db),
        DownloaderOptions::from(&config),
    ));
    let mut finished = downloader.start()?;
    tokio::spawn(async move {
        while let Some(item) = finished.recv().await {
            tracing::debug!(
                url = %item.normalized_url,
                status = ?item.status,
                size = item.size,
                "download finished"
            );
        }
    });

    let state = AppState {
        db: Arc::clone(&db),
        config: Arc::new(config.clone()),
    };
    let (addr, server) = api::listen(state, config.http_port).await?;
    info!(addr = %addr, "Ingest endpoints listening (loopback only)");
    // The capture script needs this token to pair with us.
    info!("Session token: {}", config.token);

    tokio::select! {
        result = server => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    downloader.stop().await;
    db.close();

    Ok(())
}
