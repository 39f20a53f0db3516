//! # agentboard-core
//!
//! Core library for agentboard, a client for watching coding-agent tasks as
//! they move from spec through coding and review to merge.
//!
//! This library provides:
//! - Domain types for tasks, log lines and the chat/tool timeline
//! - The task status state machine (phases, legal actions, restart rule)
//! - A live event stream over server-sent events with bounded reconnect
//! - Per-task entry buffers shared between readers
//! - Task snapshots over HTTP with a polling fallback
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! ConnectionManager ─ frames ─▶ Dispatcher ─▶ TaskSession ─▶ EntryStore
//!                                    │                    └─▶ caller's StreamHandler
//!                                    └─ invalidate ─▶ TaskCache ─▶ observe_status
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentboard_core::{
//!     Config, ConnectionManager, EntryStore, HttpTransport, NoopHandler, ReconnectPolicy,
//!     TaskSession,
//! };
//!
//! # async fn run() -> agentboard_core::Result<()> {
//! let config = Config::load()?;
//! let transport = Arc::new(HttpTransport::new(&config.server)?);
//! let manager = ConnectionManager::new(transport, ReconnectPolicy::from_config(&config.stream))?;
//!
//! let session = TaskSession::new("task-42", manager, EntryStore::new());
//! session.start(Arc::new(NoopHandler));
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use client::{TaskCache, TaskClient, TaskSource};
pub use config::Config;
pub use entries::EntryStore;
pub use error::{Error, Result};
pub use poll::{PollHandle, SnapshotPoller};
pub use session::TaskSession;
pub use status::{
    actions_for, available_actions, requires_restart, Phase, StatusTracker, TaskAction,
    TaskStatus, Transition,
};
pub use stream::{
    ConnectOptions, ConnectionManager, ConnectionStatus, HttpTransport, NoopHandler,
    ReconnectPolicy, StreamHandler, Transport,
};
pub use types::*;

// Public modules
pub mod client;
pub mod config;
pub mod entries;
pub mod error;
pub mod format;
pub mod logging;
pub mod poll;
pub mod session;
pub mod status;
pub mod stream;
pub mod types;
