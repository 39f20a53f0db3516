//! Polling fallback for stalled streams.
//!
//! While a task sits in a poll-worthy status its snapshot is refetched on a
//! fixed interval, independent of stream health. The loop ends by itself the
//! first time a fetched snapshot is no longer poll-worthy.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::client::TaskSource;
use crate::error::{Error, Result};
use crate::types::Task;

/// Periodic snapshot fetcher for one task
pub struct SnapshotPoller;

impl SnapshotPoller {
    /// Start polling `task_id` every `interval`, handing each snapshot to
    /// `on_snapshot`.
    ///
    /// The first fetch happens one interval after spawning; the caller is
    /// expected to already hold a snapshot. Fetch errors are logged and the
    /// loop keeps going.
    pub fn spawn<F>(
        source: Arc<dyn TaskSource>,
        task_id: impl Into<String>,
        interval: Duration,
        on_snapshot: F,
    ) -> Result<PollHandle>
    where
        F: Fn(Task) + Send + Sync + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("poller needs a tokio runtime: {}", e)))?;
        let task_id = task_id.into();

        tracing::debug!(task_id = %task_id, interval_ms = interval.as_millis() as u64, "Polling started");

        let handle = runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match source.fetch_task(&task_id).await {
                    Ok(task) => {
                        let keep_polling = task.status.is_poll_worthy();
                        let status = task.status;
                        on_snapshot(task);
                        if !keep_polling {
                            tracing::debug!(task_id = %task_id, %status, "Polling stopped");
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(task_id = %task_id, error = %e, "Snapshot poll failed");
                    }
                }
            }
        });

        Ok(PollHandle { handle })
    }
}

/// Running poll loop. Dropping the handle cancels it.
pub struct PollHandle {
    handle: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(self) {
        self.handle.abort();
    }

    /// True once the loop has stopped on its own.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
