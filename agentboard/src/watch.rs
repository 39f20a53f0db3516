//! `agentboard watch`: follow one task's live stream in the terminal.
//!
//! Log lines and timeline cards are rendered from the shared entry store,
//! not from the stream callbacks, so a restart that clears the buffers is
//! visible as such. Snapshot statuses (from `invalidate` refetches and the
//! poller) are fed back into the session to detect restarts.

use std::sync::Arc;

use agentboard_core::entries::EntryStore;
use agentboard_core::format::{format_log_line, format_timeline_entry};
use agentboard_core::stream::{ConnectionStatus, StreamHandler};
use agentboard_core::{
    ChatEntry, Config, ConnectionManager, HttpTransport, PollHandle, PrComment, ReconnectPolicy,
    SnapshotPoller, TaskCache, TaskClient, TaskSession, TaskStatus,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

pub fn run(config: &Config, task_id: &str, poll: bool) -> Result<()> {
    let runtime = super::runtime()?;
    runtime.block_on(watch(config, task_id, poll))
}

async fn watch(config: &Config, task_id: &str, poll: bool) -> Result<()> {
    let client = Arc::new(TaskClient::new(&config.server).context("failed to create task client")?);
    let transport =
        Arc::new(HttpTransport::new(&config.server).context("failed to create stream transport")?);
    let manager = ConnectionManager::new(transport, ReconnectPolicy::from_config(&config.stream))
        .context("failed to create connection manager")?;
    let cache = TaskCache::new(client.clone()).context("failed to create task cache")?;

    let task = cache
        .refresh(task_id)
        .await
        .with_context(|| format!("failed to fetch task {}", task_id))?;
    println!("Watching {} ({})", task.id, task.status);
    println!("Press Ctrl+C to stop.");
    println!();

    let store = EntryStore::new();
    let session = TaskSession::new(task_id, manager, store.clone()).with_cache(cache.clone());
    session.observe_status(task.status);

    let shutdown = Arc::new(Notify::new());
    let notify = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        notify.notify_one();
    })
    .context("failed to set Ctrl+C handler")?;

    let mut revisions = store.subscribe(task_id);
    let mut snapshots = cache.subscribe(task_id);
    let mut connection = session.manager().subscribe();

    session.start(Arc::new(ConsolePrinter));

    let mut poller = None;
    if poll {
        ensure_polling(&mut poller, &client, &cache, task_id, task.status, config)?;
    }

    let mut renderer = Renderer::default();
    let mut outcome = Ok(());

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,

            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                revisions.borrow_and_update();
                renderer.print(&store, task_id);
            }

            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = snapshots.borrow_and_update().as_ref().map(|task| task.status);
                if let Some(status) = status {
                    if session.observe_status(status).is_some_and(|t| t.requires_restart()) {
                        println!("--- task restarted ---");
                        renderer.reset();
                    }
                    if poll {
                        ensure_polling(&mut poller, &client, &cache, task_id, status, config)?;
                    }
                }
            }

            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *connection.borrow_and_update();
                tracing::debug!(task_id = %task_id, %status, "Connection status");
                match status {
                    ConnectionStatus::Connected => println!("[connected]"),
                    ConnectionStatus::Error if session.manager().is_exhausted() => {
                        println!("[connection lost, giving up]");
                        outcome = Err(anyhow!(
                            "gave up on task {} after {} reconnect attempts",
                            task_id,
                            config.stream.max_reconnect_attempts
                        ));
                        break;
                    }
                    ConnectionStatus::Error => println!("[connection lost, retrying]"),
                    ConnectionStatus::Disconnected if session.manager().is_terminal() => {
                        renderer.print(&store, task_id);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    session.stop();
    drop(poller);
    outcome
}

/// Start a poller when the task is poll-worthy and none is running.
fn ensure_polling(
    poller: &mut Option<PollHandle>,
    client: &Arc<TaskClient>,
    cache: &TaskCache,
    task_id: &str,
    status: TaskStatus,
    config: &Config,
) -> Result<()> {
    let running = poller.as_ref().is_some_and(|handle| !handle.is_finished());
    if running || !status.is_poll_worthy() {
        return Ok(());
    }

    let cache = cache.clone();
    let handle = SnapshotPoller::spawn(
        client.clone(),
        task_id,
        config.stream.poll_interval(),
        move |task| cache.insert(task),
    )
    .context("failed to start polling")?;
    *poller = Some(handle);
    Ok(())
}

/// Prints what has not been printed yet.
#[derive(Default)]
struct Renderer {
    printed_logs: usize,
    timeline: Vec<ChatEntry>,
}

impl Renderer {
    /// Forget what was printed; the next render starts from scratch.
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn print(&mut self, store: &EntryStore, task_id: &str) {
        for line in self.render(store, task_id) {
            println!("{}", line);
        }
    }

    /// Lines that changed since the previous render.
    fn render(&mut self, store: &EntryStore, task_id: &str) -> Vec<String> {
        let logs = store.logs(task_id);
        let timeline = store.timeline(task_id);

        if logs.len() < self.printed_logs || timeline.len() < self.timeline.len() {
            self.reset();
        }

        let mut lines: Vec<String> = logs[self.printed_logs..]
            .iter()
            .map(format_log_line)
            .collect();
        self.printed_logs = logs.len();

        // Merged cards change in place; reprint those too
        for (index, entry) in timeline.iter().enumerate() {
            if self.timeline.get(index) != Some(entry) {
                lines.push(format!("  {}", format_timeline_entry(entry)));
            }
        }
        self.timeline = timeline;
        lines
    }
}

/// Prints the events that are not kept in the entry store.
struct ConsolePrinter;

impl StreamHandler for ConsolePrinter {
    fn on_status_change(&self, status: TaskStatus) {
        println!("[status] {} ({})", status, status.phase().as_str());
    }

    fn on_timeout_warning(&self, message: &str, expires_at: Option<DateTime<Utc>>) {
        match expires_at {
            Some(at) => println!("[timeout] {} (expires {})", message, at.format("%H:%M:%S")),
            None => println!("[timeout] {}", message),
        }
    }

    fn on_complete(&self, pr_url: Option<&str>) {
        match pr_url {
            Some(url) => println!("[complete] {}", url),
            None => println!("[complete]"),
        }
    }

    fn on_error(&self, message: &str) {
        eprintln!("[error] {}", message);
    }

    fn on_pr_comment(&self, comment: PrComment) {
        let author = comment.author().unwrap_or("reviewer");
        println!("[pr] {}: {}", author, comment.body().unwrap_or(""));
    }
}
