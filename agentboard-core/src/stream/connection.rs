//! Connection manager: zero or one live stream per manager instance.
//!
//! The manager is a plain stateful object. Observers read the current
//! [`ConnectionStatus`] through [`ConnectionManager::snapshot`] or follow it
//! with [`ConnectionManager::subscribe`]; neither touches the connection
//! lifecycle.
//!
//! ## Reconnection
//!
//! A transport-level failure (open error, stream error, or the server closing
//! the stream) schedules exactly one reconnect after a fixed delay, unless a
//! terminal frame (`complete` / `error`) was already dispatched on this
//! connection, in which case the close was intentional and the status becomes
//! `disconnected`. Consecutive failures without a successful open are capped
//! by [`ReconnectPolicy::max_attempts`]; at the cap the status stays `error`,
//! [`ConnectionManager::is_exhausted`] turns true, and nothing further happens
//! until the caller reconnects explicitly.
//!
//! Every connection carries a generation number. Disconnecting or connecting
//! again bumps it, so a reader or timer task from an older connection that
//! wakes up late finds a different generation and does nothing. The
//! connection's dispatcher also holds a cancel flag raised on teardown, so a
//! frame already in flight is not handed to the old handler.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::StreamConfig;
use crate::error::{Error, Result};

use super::dispatch::{CancelFlag, Dispatch, Dispatcher, StreamHandler, TerminalFlag};
use super::transport::{Transport, TransportEvent};

/// Health of the live connection, as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to connect to and who receives the frames
#[derive(Clone)]
pub struct ConnectOptions {
    pub task_id: String,
    /// When false, `connect` opens nothing and tears down any live connection
    pub enabled: bool,
    pub handler: Arc<dyn StreamHandler>,
}

impl ConnectOptions {
    pub fn new(task_id: impl Into<String>, handler: Arc<dyn StreamHandler>) -> Self {
        Self {
            task_id: task_id.into(),
            enabled: true,
            handler,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("task_id", &self.task_id)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Fixed-delay reconnect policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Consecutive failed attempts before giving up; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            delay: config.reconnect_delay(),
            max_attempts: config.attempt_cap(),
        }
    }
}

/// Owns at most one live stream connection and publishes its status.
///
/// Dropping the manager disconnects.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    runtime: Handle,
    status: watch::Sender<ConnectionStatus>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    generation: u64,
    options: Option<ConnectOptions>,
    terminal: TerminalFlag,
    cancel: CancelFlag,
    reader: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    failed_attempts: u32,
    /// Retries stopped at the attempt cap
    exhausted: bool,
    opens: u64,
}

impl State {
    fn is_active(&self) -> bool {
        self.reader.is_some() || self.reconnect_timer.is_some()
    }

    fn cancel_tasks(&mut self) {
        self.cancel.cancel();
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl ConnectionManager {
    /// Create a manager bound to the current tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            Error::Runtime(format!("connection manager needs a tokio runtime: {}", e))
        })?;
        Ok(Self::with_runtime(transport, policy, runtime))
    }

    pub fn with_runtime(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        runtime: Handle,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                policy,
                runtime,
                status,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Open a connection, replacing any existing one.
    ///
    /// When `options.enabled` is false or the task id is empty nothing is
    /// opened; a live connection or pending reconnect is torn down as by
    /// [`disconnect`](Self::disconnect).
    pub fn connect(&self, options: ConnectOptions) {
        let mut state = self.inner.lock();

        if !options.enabled || options.task_id.is_empty() {
            if state.is_active() {
                tracing::debug!(?options, "Connect disabled, closing live stream");
                self.inner.teardown(&mut state);
            } else {
                tracing::trace!(?options, "Connect skipped");
            }
            return;
        }

        state.failed_attempts = 0;
        self.inner.open(&mut state, options);
    }

    /// Cancel any pending reconnect, close the transport, and report
    /// `disconnected`. Idempotent.
    pub fn disconnect(&self) {
        let mut state = self.inner.lock();
        self.inner.teardown(&mut state);
    }

    /// Connect again with the most recently used options.
    pub fn reconnect(&self) {
        let options = self.inner.lock().options.clone();
        match options {
            Some(options) => {
                tracing::info!(task_id = %options.task_id, "Reconnecting stream");
                self.connect(options);
            }
            None => tracing::debug!("Reconnect requested before any connect"),
        }
    }

    /// Follow status changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Current status
    pub fn snapshot(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// True once a `complete` or `error` frame was dispatched on the current connection.
    pub fn is_terminal(&self) -> bool {
        self.inner.lock().terminal.is_set()
    }

    /// Task id of the most recent connection
    pub fn task_id(&self) -> Option<String> {
        self.inner
            .lock()
            .options
            .as_ref()
            .map(|options| options.task_id.clone())
    }

    /// True when consecutive failures reached the attempt cap and no reconnect
    /// is scheduled. Cleared by the next `connect`, `reconnect` or `disconnect`.
    pub fn is_exhausted(&self) -> bool {
        self.inner.lock().exhausted
    }

    /// Number of times a transport was opened, including automatic reconnects
    pub fn connection_attempts(&self) -> u64 {
        self.inner.lock().opens
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            tracing::debug!(from = %previous, to = %status, "Connection status changed");
        }
    }

    fn teardown(&self, state: &mut State) {
        state.generation += 1;
        state.cancel_tasks();
        state.exhausted = false;
        if let Some(options) = &state.options {
            tracing::debug!(task_id = %options.task_id, "Stream disconnected");
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn open(self: &Arc<Self>, state: &mut State, options: ConnectOptions) {
        state.cancel_tasks();
        state.generation += 1;
        state.terminal = TerminalFlag::new();
        state.cancel = CancelFlag::new();
        state.exhausted = false;
        state.opens += 1;
        state.options = Some(options.clone());

        let generation = state.generation;
        let dispatcher = Dispatcher::new(
            options.task_id.clone(),
            options.handler,
            state.terminal.clone(),
        )
        .with_cancel(state.cancel.clone());

        self.set_status(ConnectionStatus::Connecting);
        tracing::debug!(task_id = %options.task_id, generation, "Opening event stream");

        let inner = Arc::clone(self);
        state.reader = Some(self.runtime.spawn(inner.run(generation, dispatcher)));
    }

    async fn run(self: Arc<Self>, generation: u64, dispatcher: Dispatcher) {
        let task_id = dispatcher.task_id().to_string();

        let mut stream = match self.transport.open(&task_id).await {
            Ok(stream) => stream,
            Err(e) => {
                self.on_transport_error(generation, &task_id, e);
                return;
            }
        };

        while let Some(event) = stream.next().await {
            if !self.is_current(generation) {
                return;
            }

            match event {
                Ok(TransportEvent::Open) => self.on_open(generation, &task_id),
                Ok(TransportEvent::Frame(frame)) => match dispatcher.dispatch(&frame) {
                    Dispatch::Continue => {}
                    Dispatch::Close => {
                        drop(stream);
                        self.on_finished(generation, &task_id);
                        return;
                    }
                    Dispatch::Cancelled => return,
                },
                Err(e) => {
                    self.on_transport_error(generation, &task_id, e);
                    return;
                }
            }
        }

        self.on_transport_error(
            generation,
            &task_id,
            Error::Transport("stream closed by server".to_string()),
        );
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn on_open(&self, generation: u64, task_id: &str) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        state.failed_attempts = 0;
        self.set_status(ConnectionStatus::Connected);
        tracing::info!(task_id = %task_id, "Event stream connected");
    }

    /// Graceful shutdown after a `complete` frame.
    fn on_finished(&self, generation: u64, task_id: &str) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        // the reader is the caller; dropping its handle detaches it
        state.reader = None;
        self.set_status(ConnectionStatus::Disconnected);
        tracing::info!(task_id = %task_id, "Event stream finished");
    }

    fn on_transport_error(self: &Arc<Self>, generation: u64, task_id: &str, error: Error) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        state.reader = None;

        if state.terminal.is_set() {
            tracing::info!(task_id = %task_id, "Stream closed after terminal frame");
            self.set_status(ConnectionStatus::Disconnected);
            return;
        }

        state.failed_attempts += 1;
        let max = self.policy.max_attempts;
        // set before publishing so observers of `error` see it
        state.exhausted = max.is_some_and(|max| state.failed_attempts > max);
        self.set_status(ConnectionStatus::Error);

        if let Some(max) = max {
            if state.exhausted {
                tracing::warn!(
                    task_id = %task_id,
                    attempts = max,
                    error = %error,
                    "Giving up on event stream after repeated failures"
                );
                return;
            }
        }

        let delay = self.policy.delay;
        tracing::warn!(
            task_id = %task_id,
            attempt = state.failed_attempts,
            delay = ?delay,
            error = %error,
            "Event stream lost, scheduling reconnect"
        );

        let inner = Arc::clone(self);
        state.reconnect_timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.reconnect_after_delay(generation);
        }));
    }

    fn reconnect_after_delay(self: &Arc<Self>, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        // the timer is the caller
        state.reconnect_timer = None;
        let Some(options) = state.options.clone() else {
            return;
        };
        tracing::info!(
            task_id = %options.task_id,
            attempt = state.failed_attempts,
            "Reconnecting event stream"
        );
        self.open(&mut state, options);
    }
}
