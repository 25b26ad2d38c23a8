//! Attachment download engine.
//!
//! One dispatcher task drains Enqueued items from the store in batches and
//! feeds a bounded work queue; a fixed set of workers fetch the blobs and
//! record each terminal outcome in its own transaction. The engine never
//! aborts on a per-item failure; the finished-items stream is the single
//! source of progress truth for observers.
//!
//! Stop cancels in-flight fetches without recording an outcome for them;
//! their items stay Downloading until the post-drain requeue flips them back
//! to Enqueued for the next session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use packrat_store::{Database, DownloadItem, DownloadOutcome, DownloadStatus};

use crate::config::ServerConfig;

const IDLE_POLL: Duration = Duration::from_millis(250);
const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone)]
pub struct DownloaderOptions {
    pub workers: usize,
    pub batch_size: usize,
    pub size_cap: Option<u64>,
    pub request_timeout: Duration,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 16,
            size_cap: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&ServerConfig> for DownloaderOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            workers: config.download_workers,
            batch_size: config.download_batch,
            size_cap: config.download_size_cap,
            request_timeout: config.request_timeout,
        }
    }
}

/// One element per item that reached a terminal state.
#[derive(Debug, Clone)]
pub struct FinishedDownload {
    pub normalized_url: String,
    pub download_url: String,
    pub status: DownloadStatus,
    pub size: Option<u64>,
}

#[derive(Debug, Error)]
pub enum DownloaderError {
    #[error("downloader is already running")]
    AlreadyRunning,
}

struct EngineHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Downloader {
    db: Arc<Database>,
    client: reqwest::Client,
    options: DownloaderOptions,
    running: Mutex<Option<EngineHandle>>,
    active: AtomicBool,
}

impl Downloader {
    pub fn new(db: Arc<Database>, options: DownloaderOptions) -> Self {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("packrat/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            db,
            client,
            options,
            running: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    /// Spawn the dispatcher and workers; returns the finished-items stream.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<mpsc::Receiver<FinishedDownload>, DownloaderError> {
        let mut running = self.running.lock().expect("downloader lock poisoned");
        if running.is_some() {
            return Err(DownloaderError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (finished_tx, finished_rx) = mpsc::channel(64);
        let (work_tx, work_rx) = mpsc::channel::<DownloadItem>(self.options.workers * 2);
        let work_rx = Arc::new(AsyncMutex::new(work_rx));

        let mut tasks = Vec::with_capacity(self.options.workers + 1);
        for worker in 0..self.options.workers {
            tasks.push(tokio::spawn(worker_loop(
                worker,
                self.db.clone(),
                self.client.clone(),
                self.options.size_cap,
                Arc::clone(&work_rx),
                finished_tx.clone(),
                shutdown_rx.clone(),
            )));
        }
        tasks.push(tokio::spawn(dispatch_loop(
            self.db.clone(),
            self.options.batch_size,
            work_tx,
            shutdown_rx,
        )));

        info!(
            workers = self.options.workers,
            batch = self.options.batch_size,
            "download engine started"
        );
        self.active.store(true, Ordering::SeqCst);
        *running = Some(EngineHandle { shutdown_tx, tasks });
        Ok(finished_rx)
    }

    /// Cancel outstanding fetches, drain the workers, and requeue whatever
    /// was still marked Downloading. Resolves only after every task exited.
    pub async fn stop(&self) {
        let handle = self
            .running
            .lock()
            .expect("downloader lock poisoned")
            .take();
        let Some(handle) = handle else {
            return;
        };

        let _ = handle.shutdown_tx.send(true);
        for task in handle.tasks {
            let _ = task.await;
        }

        let db = self.db.clone();
        match task::spawn_blocking(move || db.downloads().requeue_downloading()).await {
            Ok(Ok(requeued)) if requeued > 0 => {
                info!(requeued, "requeued interrupted downloads")
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to requeue interrupted downloads"),
            Err(e) => warn!(error = %e, "requeue task failed"),
        }

        self.active.store(false, Ordering::SeqCst);
        info!("download engine stopped");
    }

    pub fn is_downloading(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

async fn dispatch_loop(
    db: Arc<Database>,
    batch_size: usize,
    work_tx: mpsc::Sender<DownloadItem>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        let puller = db.clone();
        let pulled = match task::spawn_blocking(move || {
            puller.downloads().pull_next_enqueued(batch_size)
        })
        .await
        {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                error!(error = %e, "failed to pull enqueued downloads");
                Vec::new()
            }
            Err(e) => {
                error!(error = %e, "download dispatcher task failed");
                return;
            }
        };

        if pulled.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(IDLE_POLL) => {}
                _ = shutdown.changed() => return,
            }
            continue;
        }

        for item in pulled {
            tokio::select! {
                sent = work_tx.send(item) => {
                    if sent.is_err() {
                        return;
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    db: Arc<Database>,
    client: reqwest::Client,
    size_cap: Option<u64>,
    work_rx: Arc<AsyncMutex<mpsc::Receiver<DownloadItem>>>,
    finished_tx: mpsc::Sender<FinishedDownload>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let item = {
            let mut rx = work_rx.lock().await;
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                item = rx.recv() => item,
                _ = shutdown.changed() => None,
            }
        };
        let Some(item) = item else { return };

        let outcome = tokio::select! {
            outcome = fetch_item(&client, &item, size_cap) => outcome,
            // Engine shutdown: drop the fetch without recording an outcome;
            // the item stays Downloading and is requeued by stop().
            _ = shutdown.changed() => return,
        };

        debug!(
            worker,
            url = %item.download_url,
            status = ?outcome.status(),
            "download attempt finished"
        );

        let status = outcome.status();
        let size = match &outcome {
            DownloadOutcome::Success { bytes, .. } => Some(bytes.len() as u64),
            DownloadOutcome::SkippedTooLarge { size } => *size,
            _ => item.size,
        };

        let writer = db.clone();
        let url = item.normalized_url.clone();
        match task::spawn_blocking(move || writer.downloads().write_outcome(&url, &outcome)).await {
            Ok(Ok(())) => {
                let _ = finished_tx
                    .send(FinishedDownload {
                        normalized_url: item.normalized_url,
                        download_url: item.download_url,
                        status,
                        size,
                    })
                    .await;
            }
            Ok(Err(e)) => {
                error!(url = %item.normalized_url, error = %e, "failed to record download outcome")
            }
            Err(e) => {
                error!(error = %e, "download writer task failed");
                return;
            }
        }
    }
}

async fn fetch_item(
    client: &reqwest::Client,
    item: &DownloadItem,
    size_cap: Option<u64>,
) -> DownloadOutcome {
    let mut response = match client.get(&item.download_url).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(url = %item.download_url, error = %e, "download transport failure");
            return DownloadOutcome::Failed;
        }
    };

    let status = response.status();
    if !status.is_success() {
        return DownloadOutcome::HttpError(status.as_u16());
    }

    if let (Some(cap), Some(length)) = (size_cap, response.content_length()) {
        if length > cap {
            return DownloadOutcome::SkippedTooLarge { size: Some(length) };
        }
    }

    let mime_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut bytes = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                bytes.extend_from_slice(&chunk);
                if let Some(cap) = size_cap {
                    if bytes.len() as u64 > cap {
                        return DownloadOutcome::SkippedTooLarge {
                            size: Some(bytes.len() as u64),
                        };
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(url = %item.download_url, error = %e, "download body failure");
                return DownloadOutcome::Failed;
            }
        }
    }

    DownloadOutcome::Success {
        bytes,
        mime_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packrat_store::AlwaysUpgrade;

    fn open_db(dir: &tempfile::TempDir) -> Arc<Database> {
        Arc::new(
            Database::open(&dir.path().join("dl.db"), &AlwaysUpgrade)
                .unwrap()
                .expect_opened()
                .unwrap(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_stop_with_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(open_db(&dir), DownloaderOptions::default());

        assert!(!downloader.is_downloading());
        let _finished = downloader.start().unwrap();
        assert!(downloader.is_downloading());
        assert!(matches!(
            downloader.start(),
            Err(DownloaderError::AlreadyRunning)
        ));

        downloader.stop().await;
        assert!(!downloader.is_downloading());

        // Restartable after a clean stop.
        let _finished = downloader.start().unwrap();
        downloader.stop().await;
    }
}
