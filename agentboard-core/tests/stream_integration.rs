//! End-to-end behaviour of the live stream: connection manager, dispatcher,
//! entry store and session, driven by a scripted in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentboard_core::entries::EntryStore;
use agentboard_core::error::{Error, Result};
use agentboard_core::stream::{
    ConnectOptions, ConnectionManager, ConnectionStatus, FrameStream, ReconnectPolicy, SseFrame,
    StreamHandler, Transport, TransportEvent,
};
use agentboard_core::{ChatEntry, LogEntry, TaskSession, TaskStatus, ToolActivity, ToolStatus};
use chrono::{DateTime, Utc};
use futures::channel::mpsc::{self, UnboundedSender};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};

// ============================================
// Scripted transport
// ============================================

/// Every `open` creates a channel the test feeds by hand.
#[derive(Default)]
struct ScriptedTransport {
    connections: Mutex<Vec<(String, UnboundedSender<Result<TransportEvent>>)>>,
    /// Number of upcoming opens that fail outright
    fail_opens: AtomicUsize,
}

impl ScriptedTransport {
    fn opens(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    fn fail_next(&self, count: usize) {
        self.fail_opens.store(count, Ordering::SeqCst);
    }

    fn sender(&self, index: usize) -> UnboundedSender<Result<TransportEvent>> {
        self.connections.lock().unwrap()[index].1.clone()
    }

    fn task_id(&self, index: usize) -> String {
        self.connections.lock().unwrap()[index].0.clone()
    }

    fn latest(&self) -> UnboundedSender<Result<TransportEvent>> {
        let connections = self.connections.lock().unwrap();
        connections.last().expect("no connection opened").1.clone()
    }

    fn accept(&self) {
        self.latest().unbounded_send(Ok(TransportEvent::Open)).unwrap();
    }

    fn send(&self, event: &str, data: &str) {
        self.latest()
            .unbounded_send(Ok(TransportEvent::Frame(SseFrame::new(event, data))))
            .unwrap();
    }

    /// Server closes the latest connection
    fn close(&self) {
        self.latest().close_channel();
    }

    fn drop_with_error(&self) {
        self.latest()
            .unbounded_send(Err(Error::Transport("connection reset".to_string())))
            .unwrap();
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, task_id: &str) -> BoxFuture<'static, Result<FrameStream>> {
        let mut connections = self.connections.lock().unwrap();
        let (tx, rx) = mpsc::unbounded();
        connections.push((task_id.to_string(), tx));

        let failing = self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return futures::future::ready(Err(Error::Transport("connection refused".to_string())))
                .boxed();
        }
        futures::future::ready(Ok(rx.boxed())).boxed()
    }
}

// ============================================
// Recording handler
// ============================================

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl StreamHandler for Recorder {
    fn on_log(&self, entry: LogEntry) {
        self.record(format!("log:{}", entry.message));
    }
    fn on_status_change(&self, status: TaskStatus) {
        self.record(format!("status:{}", status));
    }
    fn on_timeout_warning(&self, message: &str, _expires_at: Option<DateTime<Utc>>) {
        self.record(format!("timeout:{}", message));
    }
    fn on_complete(&self, pr_url: Option<&str>) {
        self.record(format!("complete:{}", pr_url.unwrap_or("")));
    }
    fn on_error(&self, message: &str) {
        self.record(format!("error:{}", message));
    }
    fn on_tool_activity(&self, activity: ToolActivity) {
        self.record(format!("tool:{}:{}", activity.id, activity.status.as_str()));
    }
    fn invalidate(&self, task_id: &str) {
        self.record(format!("invalidate:{}", task_id));
    }
}

// ============================================
// Helpers
// ============================================

fn policy(max_attempts: Option<u32>) -> ReconnectPolicy {
    ReconnectPolicy {
        delay: Duration::from_secs(3),
        max_attempts,
    }
}

fn manager(transport: &Arc<ScriptedTransport>, policy: ReconnectPolicy) -> ConnectionManager {
    agentboard_core::logging::init_test();
    ConnectionManager::new(transport.clone(), policy).unwrap()
}

/// Let spawned reader and timer tasks catch up without crossing the reconnect delay.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ============================================
// Scenarios
// ============================================

#[tokio::test(start_paused = true)]
async fn test_completed_run_merges_tools_and_disconnects() {
    let transport = Arc::new(ScriptedTransport::default());
    let session = TaskSession::new("t1", manager(&transport, policy(Some(10))), EntryStore::new());
    let recorder = Arc::new(Recorder::default());
    session.start(recorder.clone());
    settle().await;

    transport.accept();
    transport.send("log", r#"{"level":"info","message":"starting"}"#);
    transport.send("tool_activity", r#"{"id":"a","status":"running","name":"read"}"#);
    transport.send(
        "tool_activity",
        r#"{"id":"a","status":"completed","name":"","summary":"done"}"#,
    );
    transport.send("complete", r#"{"pr_url":"https://x/pr/1"}"#);
    settle().await;

    let store = session.store();
    assert_eq!(store.logs("t1").len(), 1);
    let timeline = store.timeline("t1");
    assert_eq!(timeline.len(), 1);
    match &timeline[0] {
        ChatEntry::Tool(tool) => {
            assert_eq!(tool.status, ToolStatus::Completed);
            assert_eq!(tool.name, "read");
            assert_eq!(tool.summary, "done");
        }
        other => panic!("expected tool entry, got {:?}", other),
    }

    assert_eq!(recorder.count("complete:https://x/pr/1"), 1);
    assert_eq!(session.connection_status(), ConnectionStatus::Disconnected);
    assert!(session.manager().is_terminal());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_agent_failure_surfaces_once_and_suppresses_reconnect() {
    let transport = Arc::new(ScriptedTransport::default());
    let manager = manager(&transport, policy(Some(10)));
    let recorder = Arc::new(Recorder::default());
    manager.connect(ConnectOptions::new("t2", recorder.clone()));
    settle().await;

    transport.accept();
    transport.send("error", r#"{"message":"boom","code":"AGENT_FAIL"}"#);
    settle().await;
    assert_eq!(recorder.calls(), vec!["error:boom".to_string()]);
    assert!(manager.is_terminal());

    transport.drop_with_error();
    settle().await;
    assert_eq!(manager.snapshot(), ConnectionStatus::Disconnected);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_is_terminal_but_silent() {
    let transport = Arc::new(ScriptedTransport::default());
    let manager = manager(&transport, policy(Some(10)));
    let recorder = Arc::new(Recorder::default());
    manager.connect(ConnectOptions::new("t3", recorder.clone()));
    settle().await;

    transport.accept();
    transport.send("error", r#"{"message":"x","code":"CANCELLED"}"#);
    transport.close();
    settle().await;

    assert_eq!(recorder.count("error:"), 0);
    assert!(manager.is_terminal());
    assert_eq!(manager.snapshot(), ConnectionStatus::Disconnected);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_real_error_frame_is_surfaced() {
    let transport = Arc::new(ScriptedTransport::default());
    let manager = manager(&transport, policy(Some(10)));
    let recorder = Arc::new(Recorder::default());
    manager.connect(ConnectOptions::new("t4", recorder.clone()));
    settle().await;

    transport.accept();
    transport.send("error", r#"{"message":"first","code":"AGENT_FAIL"}"#);
    transport.send("error", r#"{"message":"second"}"#);
    settle().await;

    assert_eq!(
        recorder.calls(),
        vec!["error:first".to_string(), "error:second".to_string()]
    );
}

// ============================================
// Reconnect policy
// ============================================

#[tokio::test(start_paused = true)]
async fn test_drop_before_terminal_reconnects_once_after_delay() {
    let transport = Arc::new(ScriptedTransport::default());
    let manager = manager(&transport, policy(Some(10)));
    let mut status = manager.subscribe();
    manager.connect(ConnectOptions::new("t1", Arc::new(Recorder::default())));
    settle().await;

    transport.accept();
    settle().await;
    assert_eq!(*status.borrow_and_update(), ConnectionStatus::Connected);

    transport.send("log", r#"{"level":"agent","message":"thinking"}"#);
    transport.close();
    settle().await;
    assert_eq!(manager.snapshot(), ConnectionStatus::Error);

    tokio::time::sleep(Duration::from_millis(2_900)).await;
    assert_eq!(transport.opens(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.opens(), 2);
    assert_eq!(transport.task_id(1), "t1");
    assert_eq!(manager.snapshot(), ConnectionStatus::Connecting);

    transport.accept();
    settle().await;
    assert_eq!(manager.snapshot(), ConnectionStatus::Connected);

    // A healthy connection schedules nothing
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_stop_at_attempt_cap() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.fail_next(usize::MAX);
    let manager = manager(&transport, policy(Some(2)));
    manager.connect(ConnectOptions::new("t1", Arc::new(Recorder::default())));

    settle().await;
    assert_eq!(manager.snapshot(), ConnectionStatus::Error);
    assert!(!manager.is_exhausted());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.opens(), 3);
    assert_eq!(manager.snapshot(), ConnectionStatus::Error);
    assert!(manager.is_exhausted());

    // A manual reconnect starts a fresh budget
    transport.fail_next(0);
    manager.reconnect();
    assert!(!manager.is_exhausted());
    settle().await;
    assert_eq!(transport.opens(), 4);
    transport.accept();
    settle().await;
    assert_eq!(manager.snapshot(), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_successful_open_resets_attempt_budget() {
    let transport = Arc::new(ScriptedTransport::default());
    let manager = manager(&transport, policy(Some(1)));
    manager.connect(ConnectOptions::new("t1", Arc::new(Recorder::default())));

    for expected_opens in 2..=4 {
        settle().await;
        transport.accept();
        transport.drop_with_error();
        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(transport.opens(), expected_opens);
    }
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let transport = Arc::new(ScriptedTransport::default());
    let manager = manager(&transport, policy(None));
    manager.connect(ConnectOptions::new("t1", Arc::new(Recorder::default())));
    settle().await;

    transport.drop_with_error();
    settle().await;
    assert_eq!(manager.snapshot(), ConnectionStatus::Error);

    manager.disconnect();
    assert_eq!(manager.snapshot(), ConnectionStatus::Disconnected);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_connect_cancels_pending_reconnect() {
    let transport = Arc::new(ScriptedTransport::default());
    let manager = manager(&transport, policy(None));
    let recorder = Arc::new(Recorder::default());
    manager.connect(ConnectOptions::new("t1", recorder.clone()));
    settle().await;

    transport.drop_with_error();
    settle().await;
    assert_eq!(manager.snapshot(), ConnectionStatus::Error);

    manager.connect(ConnectOptions::new("t1", recorder.clone()).enabled(false));
    assert_eq!(manager.snapshot(), ConnectionStatus::Disconnected);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.opens(), 1);
    assert_eq!(manager.snapshot(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_empty_task_id_closes_live_stream() {
    let transport = Arc::new(ScriptedTransport::default());
    let manager = manager(&transport, policy(Some(10)));
    let recorder = Arc::new(Recorder::default());
    manager.connect(ConnectOptions::new("t1", recorder.clone()));
    settle().await;
    transport.accept();
    settle().await;
    assert_eq!(manager.snapshot(), ConnectionStatus::Connected);

    manager.connect(ConnectOptions::new("", recorder.clone()));
    assert_eq!(manager.snapshot(), ConnectionStatus::Disconnected);

    // Frames the old server keeps sending reach nobody
    let _ = transport
        .sender(0)
        .unbounded_send(Ok(TransportEvent::Frame(SseFrame::new(
            "log",
            r#"{"level":"info","message":"late"}"#,
        ))));
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(recorder.calls().is_empty());
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_or_empty_connect_opens_nothing() {
    let transport = Arc::new(ScriptedTransport::default());
    let manager = manager(&transport, policy(Some(10)));

    manager.connect(ConnectOptions::new("t1", Arc::new(Recorder::default())).enabled(false));
    manager.connect(ConnectOptions::new("", Arc::new(Recorder::default())));
    settle().await;

    assert_eq!(transport.opens(), 0);
    assert_eq!(manager.connection_attempts(), 0);
    assert_eq!(manager.snapshot(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_switching_tasks_ignores_old_connection() {
    let transport = Arc::new(ScriptedTransport::default());
    let manager = manager(&transport, policy(Some(10)));
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());

    manager.connect(ConnectOptions::new("t1", first.clone()));
    settle().await;
    let old = transport.sender(0);

    manager.connect(ConnectOptions::new("t2", second.clone()));
    settle().await;
    assert_eq!(transport.task_id(1), "t2");

    let _ = old.unbounded_send(Ok(TransportEvent::Frame(SseFrame::new(
        "log",
        r#"{"level":"info","message":"stale"}"#,
    ))));
    old.close_channel();
    transport.send("log", r#"{"level":"info","message":"fresh"}"#);
    settle().await;

    assert!(first.calls().is_empty());
    assert_eq!(second.calls(), vec!["log:fresh".to_string()]);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_do_not_stop_delivery() {
    let transport = Arc::new(ScriptedTransport::default());
    let manager = manager(&transport, policy(Some(10)));
    let recorder = Arc::new(Recorder::default());
    manager.connect(ConnectOptions::new("t1", recorder.clone()));
    settle().await;

    transport.accept();
    transport.send("log", "{not json");
    transport.send("message", r#"{"hello":"world"}"#);
    transport.send("status", r#"{"status":"coding"}"#);
    transport.send("timeout_warning", r#"{"message":"5 minutes left"}"#);
    settle().await;

    assert_eq!(
        recorder.calls(),
        vec![
            "status:coding".to_string(),
            "invalidate:t1".to_string(),
            "timeout:5 minutes left".to_string(),
        ]
    );
    assert_eq!(manager.snapshot(), ConnectionStatus::Connected);
}

// ============================================
// Restart after a terminal status
// ============================================

#[tokio::test(start_paused = true)]
async fn test_retry_after_failure_clears_buffers_and_reopens() {
    let transport = Arc::new(ScriptedTransport::default());
    let session = TaskSession::new("t1", manager(&transport, policy(Some(10))), EntryStore::new());
    let recorder = Arc::new(Recorder::default());
    session.start(recorder.clone());
    settle().await;

    transport.accept();
    transport.send("log", r#"{"level":"error","message":"tests failed"}"#);
    transport.send("error", r#"{"message":"tests failed","code":"AGENT_FAIL"}"#);
    transport.close();
    settle().await;

    session.observe_status(TaskStatus::Failed);
    assert_eq!(session.store().logs("t1").len(), 1);
    assert_eq!(transport.opens(), 1);

    session.observe_status(TaskStatus::Coding);
    assert!(session.store().is_empty("t1"));
    settle().await;
    assert_eq!(transport.opens(), 2);
    assert!(!session.manager().is_terminal());

    transport.accept();
    transport.send("log", r#"{"level":"info","message":"second run"}"#);
    settle().await;

    let logs = session.store().logs("t1");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "second run");
    assert_eq!(session.connection_status(), ConnectionStatus::Connected);
}
