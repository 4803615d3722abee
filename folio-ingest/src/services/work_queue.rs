//! Outbound work queue implementations
//!
//! - [`HttpWorkQueue`]: POSTs each message as JSON to the worker pool's
//!   intake endpoint. A 2xx answer means the message was accepted.
//! - [`ChannelWorkQueue`]: in-process `mpsc` channel, for embedding the
//!   orchestrator next to its workers and for tests.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::QueueError;
use crate::models::WorkMessage;
use crate::types::WorkQueue;

const USER_AGENT: &str = concat!("folio-ingest/", env!("CARGO_PKG_VERSION"));
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpWorkQueue {
    http_client: reqwest::Client,
    url: String,
}

impl HttpWorkQueue {
    pub fn new(url: impl Into<String>) -> Result<Self, QueueError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl WorkQueue for HttpWorkQueue {
    async fn send(&self, message: &WorkMessage) -> Result<(), QueueError> {
        let body = serde_json::to_vec(message)?;

        tracing::debug!(
            trace_id = message.trace_id(),
            project_id = %message.project_id(),
            url = %self.url,
            "Sending work message"
        );

        let response = self
            .http_client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// In-process queue backed by an unbounded `mpsc` channel
#[derive(Clone)]
pub struct ChannelWorkQueue {
    tx: mpsc::UnboundedSender<WorkMessage>,
}

impl ChannelWorkQueue {
    /// Queue plus the receiving end the workers consume
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl WorkQueue for ChannelWorkQueue {
    async fn send(&self, message: &WorkMessage) -> Result<(), QueueError> {
        self.tx
            .send(message.clone())
            .map_err(|_| QueueError::Unavailable("worker channel closed".to_string()))
    }
}
