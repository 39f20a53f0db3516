//! Core domain types for agentboard
//!
//! These types mirror the task API's wire format. Tasks are owned by the
//! backend; the client only holds cached snapshots and the per-task entry
//! buffers built from the live event stream.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Task** | A unit of work an agent carries through spec, coding, review and merge |
//! | **Log entry** | One plain log line produced while the agent works |
//! | **Chat entry** | One card in the conversation timeline: a message or a tool invocation |
//! | **Tool activity** | A begin/end pair of frames describing one tool invocation, merged by id |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::TaskStatus;

// ============================================
// Task
// ============================================

/// Cached snapshot of a task as returned by `GET /tasks/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub agent_model: Option<String>,
}

impl Task {
    /// A bare snapshot with the given id and status, timestamped now.
    pub fn new(id: impl Into<String>, status: TaskStatus) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: String::new(),
            description: None,
            status,
            created_at: now,
            updated_at: now,
            pr_url: None,
            error: None,
            agent_type: None,
            agent_model: None,
        }
    }

    /// True if the task has an open or merged pull request.
    pub fn has_pr(&self) -> bool {
        self.pr_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

// ============================================
// Log entries
// ============================================

/// Severity or origin of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Debug,
    Warn,
    Error,
    /// Narration produced by the agent itself
    Agent,
    /// Feedback typed by the person operating the dashboard
    User,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Agent => "agent",
            LogLevel::User => "user",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line in a task's log buffer.
///
/// The id is generated client-side when the frame is dispatched; log frames
/// carry no identity of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create an entry with a fresh id.
    pub fn new(
        timestamp: DateTime<Utc>,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            level,
            message: message.into(),
            data,
        }
    }
}

// ============================================
// Chat timeline
// ============================================

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A conversation message, as carried by `chat_message` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Appended locally before the server confirmed delivery
    #[serde(skip)]
    pub pending: bool,
}

/// Lifecycle of a tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Running => "running",
            ToolStatus::Completed => "completed",
            ToolStatus::Error => "error",
        }
    }
}

/// A tool invocation, as carried by `tool_activity` frames.
///
/// Two activities with the same non-empty id describe the same invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolActivity {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub summary: String,
    pub status: ToolStatus,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// One card in the merged chat/tool timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatEntry {
    Message(ChatMessage),
    Tool(ToolActivity),
}

impl ChatEntry {
    pub fn id(&self) -> &str {
        match self {
            ChatEntry::Message(message) => &message.id,
            ChatEntry::Tool(tool) => &tool.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ChatEntry::Message(message) => message.timestamp,
            ChatEntry::Tool(tool) => tool.timestamp,
        }
    }
}

// ============================================
// Pull request comments
// ============================================

/// Review comment forwarded from the pull request, kept as the server sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrComment(pub serde_json::Value);

impl PrComment {
    /// Comment body, when the payload carries one
    pub fn body(&self) -> Option<&str> {
        self.0.get("body").and_then(|body| body.as_str())
    }

    /// Comment author login, when the payload carries one
    pub fn author(&self) -> Option<&str> {
        self.0
            .get("author")
            .or_else(|| self.0.get("user"))
            .and_then(|author| author.as_str().or_else(|| author.get("login")?.as_str()))
    }
}
