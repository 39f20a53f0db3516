//! Typed event frames carried by the task log stream.
//!
//! Each SSE event name selects a payload shape:
//!
//! ```text
//! log              {timestamp, level, message, data?}
//! status           {status}
//! timeout_warning  {message, expires_at}
//! awaiting_review  {message}
//! complete         {pr_url?}
//! error            {message, code}
//! pr_comment       {comment}
//! chat_message     {id, role, content, timestamp}
//! tool_activity    {id, name, summary, status, timestamp}
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::status::TaskStatus;
use crate::types::{ChatMessage, LogLevel, PrComment, ToolActivity};

use super::sse::SseFrame;

/// Error code the backend uses when the user cancelled the task
pub const CANCELLED_CODE: &str = "CANCELLED";

/// Discriminant of a frame, taken from the SSE event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Log,
    Status,
    TimeoutWarning,
    AwaitingReview,
    Complete,
    Error,
    PrComment,
    ChatMessage,
    ToolActivity,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Log => "log",
            FrameKind::Status => "status",
            FrameKind::TimeoutWarning => "timeout_warning",
            FrameKind::AwaitingReview => "awaiting_review",
            FrameKind::Complete => "complete",
            FrameKind::Error => "error",
            FrameKind::PrComment => "pr_comment",
            FrameKind::ChatMessage => "chat_message",
            FrameKind::ToolActivity => "tool_activity",
        }
    }

    /// Map an SSE event name to a kind; unknown names yield `None`.
    pub fn from_event(name: &str) -> Option<Self> {
        let kind = match name {
            "log" => FrameKind::Log,
            "status" => FrameKind::Status,
            "timeout_warning" => FrameKind::TimeoutWarning,
            "awaiting_review" => FrameKind::AwaitingReview,
            "complete" => FrameKind::Complete,
            "error" => FrameKind::Error,
            "pr_comment" => FrameKind::PrComment,
            "chat_message" => FrameKind::ChatMessage,
            "tool_activity" => FrameKind::ToolActivity,
            _ => return None,
        };
        Some(kind)
    }

    /// Frames after which the server has nothing more to send
    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameKind::Complete | FrameKind::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogPayload {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusPayload {
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimeoutWarningPayload {
    pub message: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AwaitingReviewPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletePayload {
    #[serde(default)]
    pub pr_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorPayload {
    /// The task was cancelled by the user; not a failure to surface.
    pub fn is_cancellation(&self) -> bool {
        self.code.as_deref() == Some(CANCELLED_CODE)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PrCommentPayload {
    pub comment: serde_json::Value,
}

/// A frame whose payload has been parsed
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Log(LogPayload),
    Status(StatusPayload),
    TimeoutWarning(TimeoutWarningPayload),
    AwaitingReview(AwaitingReviewPayload),
    Complete(CompletePayload),
    Error(ErrorPayload),
    PrComment(PrComment),
    ChatMessage(ChatMessage),
    ToolActivity(ToolActivity),
}

impl Frame {
    /// Parse the payload of an SSE frame.
    ///
    /// Returns `Ok(None)` for event names that are not frame kinds and an
    /// error when the payload does not match the kind's shape.
    pub fn parse(raw: &SseFrame) -> Result<Option<Frame>> {
        let Some(kind) = FrameKind::from_event(&raw.event) else {
            return Ok(None);
        };
        Self::parse_kind(kind, &raw.data).map(Some)
    }

    pub fn parse_kind(kind: FrameKind, data: &str) -> Result<Frame> {
        let frame = match kind {
            FrameKind::Log => Frame::Log(serde_json::from_str(data)?),
            FrameKind::Status => Frame::Status(serde_json::from_str(data)?),
            FrameKind::TimeoutWarning => Frame::TimeoutWarning(serde_json::from_str(data)?),
            FrameKind::AwaitingReview => Frame::AwaitingReview(serde_json::from_str(data)?),
            FrameKind::Complete => Frame::Complete(serde_json::from_str(data)?),
            FrameKind::Error => Frame::Error(serde_json::from_str(data)?),
            FrameKind::PrComment => {
                let payload: PrCommentPayload = serde_json::from_str(data)?;
                Frame::PrComment(PrComment(payload.comment))
            }
            FrameKind::ChatMessage => Frame::ChatMessage(serde_json::from_str(data)?),
            FrameKind::ToolActivity => Frame::ToolActivity(serde_json::from_str(data)?),
        };
        Ok(frame)
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Log(_) => FrameKind::Log,
            Frame::Status(_) => FrameKind::Status,
            Frame::TimeoutWarning(_) => FrameKind::TimeoutWarning,
            Frame::AwaitingReview(_) => FrameKind::AwaitingReview,
            Frame::Complete(_) => FrameKind::Complete,
            Frame::Error(_) => FrameKind::Error,
            Frame::PrComment(_) => FrameKind::PrComment,
            Frame::ChatMessage(_) => FrameKind::ChatMessage,
            Frame::ToolActivity(_) => FrameKind::ToolActivity,
        }
    }
}
