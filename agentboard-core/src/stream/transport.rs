//! Stream transports.
//!
//! A transport opens `GET /tasks/{id}/logs` and turns the response into a
//! stream of [`TransportEvent`]s. The connection manager only sees this
//! trait, so tests drive it with scripted in-memory streams.

use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL};

use crate::config::ServerConfig;
use crate::error::{Error, Result};

use super::sse::{SseDecoder, SseFrame};

/// Something observed on an open stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The server accepted the connection
    Open,
    Frame(SseFrame),
}

/// Ordered events of one connection. `Err` items are transport-level failures.
pub type FrameStream = BoxStream<'static, Result<TransportEvent>>;

/// Opens live event streams for tasks.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, task_id: &str) -> BoxFuture<'static, Result<FrameStream>>;
}

/// Server-sent events over HTTP
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpTransport {
    /// Create a transport from server configuration.
    ///
    /// No overall request timeout is set; the stream stays open until the
    /// server closes it. Only connecting is bounded.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url().to_string(),
            auth_token: config.auth_token(),
        })
    }

    /// URL of the log stream for a task
    pub fn stream_url(&self, task_id: &str) -> String {
        let mut url = format!(
            "{}/tasks/{}/logs",
            self.base_url,
            urlencoding::encode(task_id)
        );
        if let Some(token) = &self.auth_token {
            url.push_str("?token=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }
}

impl Transport for HttpTransport {
    fn open(&self, task_id: &str) -> BoxFuture<'static, Result<FrameStream>> {
        let request = self.http_client.get(self.stream_url(task_id));
        let task_id = task_id.to_string();

        async move {
            let response = request
                .send()
                .await
                .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(Error::Transport(format!(
                    "stream rejected ({}): {}",
                    status, error_text
                )));
            }

            tracing::debug!(task_id = %task_id, "Event stream opened");

            let frames = response
                .bytes_stream()
                .scan(SseDecoder::new(), |decoder, chunk| {
                    let events: Vec<Result<TransportEvent>> = match chunk {
                        Ok(bytes) => decoder
                            .push(&bytes)
                            .into_iter()
                            .map(|frame| Ok(TransportEvent::Frame(frame)))
                            .collect(),
                        Err(e) => vec![Err(Error::Transport(format!("stream error: {}", e)))],
                    };
                    future::ready(Some(stream::iter(events)))
                })
                .flatten();

            let events = stream::once(future::ready(Ok(TransportEvent::Open))).chain(frames);
            Ok(events.boxed())
        }
        .boxed()
    }
}
