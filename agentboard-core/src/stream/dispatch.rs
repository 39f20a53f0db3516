//! Frame dispatch: parse one frame and invoke the matching callback.
//!
//! Malformed payloads are logged and dropped; they never stop delivery of
//! later frames. `complete` and `error` frames raise the terminal flag the
//! connection manager consults before reconnecting. Once a connection is
//! torn down its [`CancelFlag`] is raised and no further callbacks fire,
//! even for a frame the reader already had in hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::status::TaskStatus;
use crate::types::{ChatMessage, LogEntry, LogLevel, PrComment, ToolActivity};

use super::frame::Frame;
use super::sse::SseFrame;

/// Callbacks invoked for dispatched frames.
///
/// Every method has a no-op default so callers implement only what they need.
/// Callbacks run on the connection's reader task and must not block.
pub trait StreamHandler: Send + Sync {
    /// A log line (also synthesized from `awaiting_review` frames)
    fn on_log(&self, _entry: LogEntry) {}

    fn on_status_change(&self, _status: TaskStatus) {}

    fn on_timeout_warning(&self, _message: &str, _expires_at: Option<DateTime<Utc>>) {}

    fn on_complete(&self, _pr_url: Option<&str>) {}

    /// Terminal failure; never called for user-initiated cancellation
    fn on_error(&self, _message: &str) {}

    fn on_pr_comment(&self, _comment: PrComment) {}

    fn on_chat_message(&self, _message: ChatMessage) {}

    fn on_tool_activity(&self, _activity: ToolActivity) {}

    /// The cached snapshot of `task_id` is stale and should be re-fetched
    fn invalidate(&self, _task_id: &str) {}
}

/// Handler that ignores every frame
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl StreamHandler for NoopHandler {}

/// Shared "server finished streaming" marker for one connection
#[derive(Debug, Default, Clone)]
pub struct TerminalFlag(Arc<AtomicBool>);

impl TerminalFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raised when the connection a dispatcher belongs to was replaced or closed
#[derive(Debug, Default, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the connection should do after a frame was dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// The task finished; close the transport gracefully
    Close,
    /// The connection was cancelled; the frame was not delivered
    Cancelled,
}

/// Routes frames for one task to a [`StreamHandler`].
pub struct Dispatcher {
    task_id: String,
    handler: Arc<dyn StreamHandler>,
    terminal: TerminalFlag,
    cancel: CancelFlag,
}

impl Dispatcher {
    pub fn new(task_id: impl Into<String>, handler: Arc<dyn StreamHandler>, terminal: TerminalFlag) -> Self {
        Self {
            task_id: task_id.into(),
            handler,
            terminal,
            cancel: CancelFlag::new(),
        }
    }

    /// Stop delivering frames once `cancel` is raised.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_set()
    }

    /// Parse and dispatch a raw SSE frame.
    pub fn dispatch(&self, raw: &SseFrame) -> Dispatch {
        match Frame::parse(raw) {
            Ok(Some(frame)) => self.dispatch_frame(frame),
            Ok(None) => {
                tracing::debug!(task_id = %self.task_id, event = %raw.event, "Ignoring unknown stream event");
                Dispatch::Continue
            }
            Err(e) => {
                tracing::warn!(
                    task_id = %self.task_id,
                    event = %raw.event,
                    error = %e,
                    "Dropping malformed stream frame"
                );
                Dispatch::Continue
            }
        }
    }

    /// Dispatch an already parsed frame.
    pub fn dispatch_frame(&self, frame: Frame) -> Dispatch {
        if self.cancel.is_cancelled() {
            tracing::trace!(task_id = %self.task_id, kind = frame.kind().as_str(), "Dropping frame for cancelled connection");
            return Dispatch::Cancelled;
        }
        tracing::trace!(task_id = %self.task_id, kind = frame.kind().as_str(), "Dispatching frame");

        match frame {
            Frame::Log(log) => {
                self.handler
                    .on_log(LogEntry::new(log.timestamp, log.level, log.message, log.data));
            }
            Frame::Status(status) => {
                self.handler.on_status_change(status.status);
                self.handler.invalidate(&self.task_id);
            }
            Frame::TimeoutWarning(warning) => {
                self.handler
                    .on_timeout_warning(&warning.message, warning.expires_at);
            }
            Frame::AwaitingReview(review) => {
                self.handler
                    .on_log(LogEntry::new(Utc::now(), LogLevel::Agent, review.message, None));
                self.handler.invalidate(&self.task_id);
            }
            Frame::Complete(complete) => {
                self.terminal.set();
                self.handler.on_complete(complete.pr_url.as_deref());
                self.handler.invalidate(&self.task_id);
                return Dispatch::Close;
            }
            Frame::Error(error) => {
                self.terminal.set();
                if error.is_cancellation() {
                    tracing::info!(task_id = %self.task_id, "Task cancelled by user");
                } else {
                    self.handler.on_error(&error.message);
                }
            }
            Frame::PrComment(comment) => self.handler.on_pr_comment(comment),
            Frame::ChatMessage(message) => self.handler.on_chat_message(message),
            Frame::ToolActivity(activity) => self.handler.on_tool_activity(activity),
        }
        Dispatch::Continue
    }
}
