//! Reactive plumbing: row-count observables and the latest-wins task slot.
//!
//! Counts are plain `tokio::sync::watch` channels. A subscriber sees the
//! current value immediately and every change committed afterwards; emissions
//! for one repository happen in commit order because the owning repository
//! refreshes the cell only after its transaction commits.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Observable row count for one table.
pub struct CountCell {
    table: &'static str,
    tx: watch::Sender<i64>,
}

impl CountCell {
    fn new(table: &'static str) -> Self {
        let (tx, _) = watch::channel(0);
        Self { table, tx }
    }

    /// Subscribe to count changes. The receiver's current value is the
    /// latest committed count.
    pub fn subscribe(&self) -> watch::Receiver<i64> {
        self.tx.subscribe()
    }

    pub fn get(&self) -> i64 {
        *self.tx.borrow()
    }

    /// Re-read the count from the database and publish it. Called by the
    /// owning repository after each committed mutation.
    pub(crate) fn refresh(&self, conn: &Connection) -> Result<()> {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        self.tx.send_replace(count);
        Ok(())
    }
}

/// One count cell per observable table, shared across the repositories.
pub struct Counts {
    pub users: CountCell,
    pub servers: CountCell,
    pub channels: CountCell,
    pub messages: CountCell,
    pub attachments: CountCell,
    pub downloads: CountCell,
}

impl Counts {
    pub(crate) fn new() -> Self {
        Self {
            users: CountCell::new("users"),
            servers: CountCell::new("servers"),
            channels: CountCell::new("channels"),
            messages: CountCell::new("messages"),
            attachments: CountCell::new("attachments"),
            downloads: CountCell::new("download_metadata"),
        }
    }

    pub(crate) fn refresh_all(&self, conn: &Connection) -> Result<()> {
        for cell in [
            &self.users,
            &self.servers,
            &self.channels,
            &self.messages,
            &self.attachments,
            &self.downloads,
        ] {
            cell.refresh(conn)?;
        }
        Ok(())
    }
}

/// Latest-wins single-slot executor.
///
/// `post` cancels whatever run is pending or in flight and schedules the new
/// producer; only the newest result reaches the completion callback.
/// Intermediate results are discarded with their runs. Scheduling the
/// callback onto a particular thread (a UI loop, say) is the caller's
/// concern; the callback fires on the runtime worker that finished the run.
pub struct ThrottledTask<T> {
    current: Mutex<Option<JoinHandle<()>>>,
    on_complete: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T: Send + 'static> ThrottledTask<T> {
    pub fn new(on_complete: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            current: Mutex::new(None),
            on_complete: Arc::new(on_complete),
        }
    }

    /// Replace the pending run with `producer`. Must be called from within a
    /// tokio runtime.
    pub fn post<F>(&self, producer: F)
    where
        F: std::future::Future<Output = T> + Send + 'static,
    {
        let mut current = self.current.lock().expect("throttle lock poisoned");
        if let Some(previous) = current.take() {
            previous.abort();
        }
        let on_complete = Arc::clone(&self.on_complete);
        *current = Some(tokio::spawn(async move {
            let value = producer.await;
            on_complete(value);
        }));
    }

    /// Cancel the pending run, if any.
    pub fn cancel(&self) {
        if let Some(previous) = self
            .current
            .lock()
            .expect("throttle lock poisoned")
            .take()
        {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn throttled_task_keeps_only_latest() {
        let seen = Arc::new(AtomicI64::new(0));
        let task = {
            let seen = Arc::clone(&seen);
            ThrottledTask::new(move |v: i64| {
                seen.store(v, Ordering::SeqCst);
            })
        };

        // The first post parks on a long sleep and is superseded.
        task.post(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            1
        });
        task.post(async { 2 });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_discards_pending_run() {
        let seen = Arc::new(AtomicI64::new(0));
        let task = {
            let seen = Arc::clone(&seen);
            ThrottledTask::new(move |v: i64| {
                seen.store(v, Ordering::SeqCst);
            })
        };

        task.post(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            1
        });
        task.cancel();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
