//! Event sink abstraction.
//!
//! Sessions publish lifecycle and transcript events to an external sink.
//! Publishing is best effort everywhere: an unconfigured publisher is a
//! valid state and failures are logged by the caller, never surfaced on the
//! protocol path.

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};

/// Events emitted by a session over the lifetime of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionEvent {
    SessionStarted,
    PartialTranscript,
    TranscriptAvailable,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionEvent::SessionStarted => "session-started",
            SessionEvent::PartialTranscript => "partial-transcript",
            SessionEvent::TranscriptAvailable => "transcript-available",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn send_event(
        &self,
        event: SessionEvent,
        session_id: &str,
        message: Value,
        properties: HashMap<String, String>,
    ) -> Result<()>;

    /// Lightweight reachability check used by the health endpoint.
    async fn probe(&self) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Publishes events as JSON documents to an HTTP endpoint.
pub struct WebhookEventPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookEventPublisher {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl EventPublisher for WebhookEventPublisher {
    async fn send_event(
        &self,
        event: SessionEvent,
        session_id: &str,
        message: Value,
        properties: HashMap<String, String>,
    ) -> Result<()> {
        let envelope = json!({
            "event": event,
            "sessionId": session_id,
            "timestamp": Utc::now().to_rfc3339(),
            "message": message,
            "properties": properties,
        });
        self.client
            .post(&self.endpoint)
            .json(&envelope)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        // A HEAD is enough to prove the sink is reachable; the response
        // status is intentionally ignored.
        self.client.head(&self.endpoint).send().await?;
        Ok(())
    }
}
