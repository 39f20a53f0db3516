//! Shared per-task entry buffers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;

use crate::types::{ChatEntry, ChatMessage, ChatRole, LogEntry, ToolActivity};

use super::timeline::{merge_chat_message, merge_tool_activity, MergeOutcome};

/// Keyed cache of log and timeline buffers, one pair per task id.
///
/// Buffers only change through append, merge and clear, so every reader sees
/// a growing sequence until an explicit clear. Cloning the store shares the
/// same buffers.
#[derive(Clone, Default)]
pub struct EntryStore {
    buffers: Arc<Mutex<HashMap<String, TaskBuffers>>>,
}

struct TaskBuffers {
    logs: Vec<LogEntry>,
    timeline: Vec<ChatEntry>,
    /// Bumped on every change
    revision: watch::Sender<u64>,
}

impl TaskBuffers {
    fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            logs: Vec::new(),
            timeline: Vec::new(),
            revision,
        }
    }

    fn touch(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskBuffers>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_buffers<T>(&self, task_id: &str, f: impl FnOnce(&mut TaskBuffers) -> T) -> T {
        let mut buffers = self.lock();
        let task = buffers
            .entry(task_id.to_string())
            .or_insert_with(TaskBuffers::new);
        f(task)
    }

    /// Create empty buffers for a task if it has none. Does not bump the revision.
    pub fn ensure(&self, task_id: &str) {
        self.with_buffers(task_id, |_| ());
    }

    /// Follow changes to a task's buffers, creating them on first use.
    pub fn subscribe(&self, task_id: &str) -> watch::Receiver<u64> {
        self.with_buffers(task_id, |task| task.revision.subscribe())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.lock().contains_key(task_id)
    }

    pub fn append_log(&self, task_id: &str, entry: LogEntry) {
        self.with_buffers(task_id, |task| {
            task.logs.push(entry);
            task.touch();
        });
    }

    pub fn merge_tool(&self, task_id: &str, activity: ToolActivity) -> MergeOutcome {
        self.with_buffers(task_id, |task| {
            let outcome = merge_tool_activity(&mut task.timeline, activity);
            task.touch();
            outcome
        })
    }

    pub fn merge_chat(&self, task_id: &str, message: ChatMessage) -> MergeOutcome {
        self.with_buffers(task_id, |task| {
            let outcome = merge_chat_message(&mut task.timeline, message);
            if outcome != MergeOutcome::Skipped {
                task.touch();
            }
            outcome
        })
    }

    /// Append feedback typed by the operator before the server confirms it.
    pub fn append_user_message(&self, task_id: &str, content: impl Into<String>) -> ChatMessage {
        let message = ChatMessage {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            pending: true,
        };
        self.with_buffers(task_id, |task| {
            task.timeline.push(ChatEntry::Message(message.clone()));
            task.touch();
        });
        message
    }

    /// Empty both buffers for a task. Subscribers stay attached.
    pub fn clear(&self, task_id: &str) {
        let mut buffers = self.lock();
        if let Some(task) = buffers.get_mut(task_id) {
            task.logs.clear();
            task.timeline.clear();
            task.touch();
            tracing::debug!(task_id = %task_id, "Cleared task entries");
        }
    }

    pub fn logs(&self, task_id: &str) -> Vec<LogEntry> {
        self.lock()
            .get(task_id)
            .map(|task| task.logs.clone())
            .unwrap_or_default()
    }

    pub fn timeline(&self, task_id: &str) -> Vec<ChatEntry> {
        self.lock()
            .get(task_id)
            .map(|task| task.timeline.clone())
            .unwrap_or_default()
    }

    /// True when the task has no log lines and no timeline entries.
    pub fn is_empty(&self, task_id: &str) -> bool {
        self.lock()
            .get(task_id)
            .map_or(true, |task| task.logs.is_empty() && task.timeline.is_empty())
    }
}
