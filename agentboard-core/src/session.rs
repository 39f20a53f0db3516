//! Task session: one task's live stream, entry buffers and status history.
//!
//! A session wires the pieces for a single task id:
//!
//! - stream events are pushed into the shared [`EntryStore`] before the
//!   caller's own handler sees them
//! - `invalidate` requests refetch the snapshot through an optional
//!   [`TaskCache`]
//! - statuses observed from snapshots go through a [`StatusTracker`]; a
//!   terminal task coming back to life clears the buffers and reopens the
//!   stream

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::client::TaskCache;
use crate::entries::{EntryStore, MergeOutcome};
use crate::status::{StatusTracker, TaskStatus, Transition};
use crate::stream::{ConnectOptions, ConnectionManager, ConnectionStatus, StreamHandler};
use crate::types::{ChatMessage, LogEntry, PrComment, ToolActivity};

pub struct TaskSession {
    task_id: String,
    manager: ConnectionManager,
    store: EntryStore,
    cache: Option<TaskCache>,
    tracker: Mutex<StatusTracker>,
}

impl TaskSession {
    pub fn new(task_id: impl Into<String>, manager: ConnectionManager, store: EntryStore) -> Self {
        Self {
            task_id: task_id.into(),
            manager,
            store,
            cache: None,
            tracker: Mutex::new(StatusTracker::new()),
        }
    }

    /// Route `invalidate` requests to a snapshot cache.
    pub fn with_cache(mut self, cache: TaskCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.manager.snapshot()
    }

    /// Open the stream. Events land in the store, then reach `handler`.
    pub fn start(&self, handler: Arc<dyn StreamHandler>) {
        // Readers may subscribe before the first event
        self.store.ensure(&self.task_id);

        let aggregating = AggregatingHandler {
            task_id: self.task_id.clone(),
            store: self.store.clone(),
            cache: self.cache.clone(),
            downstream: handler,
        };
        self.manager
            .connect(ConnectOptions::new(self.task_id.clone(), Arc::new(aggregating)));
    }

    /// Record a status seen in a task snapshot.
    ///
    /// Returns the transition when the status changed. A terminal task that
    /// moves to an active status started a new run, so its buffers are
    /// cleared and the stream is reopened.
    pub fn observe_status(&self, status: TaskStatus) -> Option<Transition> {
        let transition = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(status)?;

        if transition.requires_restart() {
            tracing::info!(
                task_id = %self.task_id,
                from = ?transition.from,
                to = %transition.to,
                "Task restarted, clearing entries"
            );
            self.store.clear(&self.task_id);
            self.manager.reconnect();
        }

        Some(transition)
    }

    pub fn last_status(&self) -> Option<TaskStatus> {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
    }

    /// Show operator feedback immediately, before the server echoes it.
    pub fn send_feedback(&self, content: impl Into<String>) -> ChatMessage {
        self.store.append_user_message(&self.task_id, content)
    }

    pub fn stop(&self) {
        self.manager.disconnect();
    }
}

/// Pushes stream events into the entry store, then forwards them.
struct AggregatingHandler {
    task_id: String,
    store: EntryStore,
    cache: Option<TaskCache>,
    downstream: Arc<dyn StreamHandler>,
}

impl StreamHandler for AggregatingHandler {
    fn on_log(&self, entry: LogEntry) {
        self.store.append_log(&self.task_id, entry.clone());
        self.downstream.on_log(entry);
    }

    fn on_status_change(&self, status: TaskStatus) {
        self.downstream.on_status_change(status);
    }

    fn on_timeout_warning(&self, message: &str, expires_at: Option<DateTime<Utc>>) {
        self.downstream.on_timeout_warning(message, expires_at);
    }

    fn on_complete(&self, pr_url: Option<&str>) {
        self.downstream.on_complete(pr_url);
    }

    fn on_error(&self, message: &str) {
        self.downstream.on_error(message);
    }

    fn on_pr_comment(&self, comment: PrComment) {
        self.downstream.on_pr_comment(comment);
    }

    fn on_chat_message(&self, message: ChatMessage) {
        // Redeliveries after a reconnect are not news
        if self.store.merge_chat(&self.task_id, message.clone()) != MergeOutcome::Skipped {
            self.downstream.on_chat_message(message);
        }
    }

    fn on_tool_activity(&self, activity: ToolActivity) {
        self.store.merge_tool(&self.task_id, activity.clone());
        self.downstream.on_tool_activity(activity);
    }

    fn invalidate(&self, task_id: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(task_id);
        }
        self.downstream.invalidate(task_id);
    }
}
