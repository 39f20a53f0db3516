//! Task snapshot client and cache
//!
//! The stream pushes incremental events; the authoritative task record
//! (status, PR url, error text) comes from `GET /tasks/{id}`. The dispatcher
//! asks for a refetch through [`StreamHandler::invalidate`], which
//! [`TaskCache`] answers by fetching in the background and publishing the new
//! snapshot to every subscriber.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::stream::StreamHandler;
use crate::types::Task;

/// Fetches task snapshots.
pub trait TaskSource: Send + Sync + 'static {
    fn fetch_task(&self, task_id: &str) -> BoxFuture<'static, Result<Task>>;
}

/// HTTP client for the task API
#[derive(Clone)]
pub struct TaskClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl TaskClient {
    /// Create a client from server configuration.
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = config.auth_token() {
            let auth_value = format!("Bearer {}", token);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid auth_token: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url().to_string(),
        })
    }

    pub fn task_url(&self, task_id: &str) -> String {
        format!("{}/tasks/{}", self.base_url, urlencoding::encode(task_id))
    }

    /// Fetch the current snapshot of one task.
    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        let url = self.task_url(task_id);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            let task: Task = response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("failed to parse task: {}", e)))?;
            Ok(task)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(Error::TaskNotFound(task_id.to_string()))
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

impl TaskSource for TaskClient {
    fn fetch_task(&self, task_id: &str) -> BoxFuture<'static, Result<Task>> {
        let client = self.clone();
        let task_id = task_id.to_string();
        async move { client.get_task(&task_id).await }.boxed()
    }
}

/// Keyed cache of task snapshots.
///
/// Each task id has its own watch channel holding the latest snapshot, or
/// `None` before the first successful fetch. Cloning shares the cache.
#[derive(Clone)]
pub struct TaskCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    source: Arc<dyn TaskSource>,
    runtime: Handle,
    entries: Mutex<HashMap<String, watch::Sender<Option<Task>>>>,
}

impl TaskCache {
    /// Create a cache bound to the current tokio runtime.
    pub fn new(source: Arc<dyn TaskSource>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("task cache needs a tokio runtime: {}", e)))?;
        Ok(Self {
            inner: Arc::new(CacheInner {
                source,
                runtime,
                entries: Mutex::new(HashMap::new()),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<Option<Task>>>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Follow snapshots of one task.
    pub fn subscribe(&self, task_id: &str) -> watch::Receiver<Option<Task>> {
        self.lock()
            .entry(task_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Latest cached snapshot, without fetching
    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.lock()
            .get(task_id)
            .and_then(|sender| sender.borrow().clone())
    }

    /// Store a snapshot obtained elsewhere (for example by the poller).
    pub fn insert(&self, task: Task) {
        let mut entries = self.lock();
        let sender = entries
            .entry(task.id.clone())
            .or_insert_with(|| watch::channel(None).0);
        sender.send_replace(Some(task));
    }

    /// Fetch a fresh snapshot and publish it.
    pub async fn refresh(&self, task_id: &str) -> Result<Task> {
        let task = self.inner.source.fetch_task(task_id).await?;
        self.insert(task.clone());
        Ok(task)
    }

    /// Mark a task stale and refetch it in the background.
    pub fn invalidate(&self, task_id: &str) {
        let cache = self.clone();
        let task_id = task_id.to_string();
        self.inner.runtime.spawn(async move {
            if let Err(e) = cache.refresh(&task_id).await {
                tracing::warn!(task_id = %task_id, error = %e, "Task refetch failed");
            }
        });
    }
}

impl StreamHandler for TaskCache {
    fn invalidate(&self, task_id: &str) {
        TaskCache::invalidate(self, task_id);
    }
}
