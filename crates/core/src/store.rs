//! Conversation store abstraction.
//!
//! The durable store is an external collaborator; the protocol engine only
//! depends on this trait. The in-memory implementation backs tests and
//! deployments without a configured database.

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Conversation, SummaryItem, TranscriptItem};

/// Key-value store of conversations, safe for concurrent use.
///
/// Append operations against an unknown conversation id are errors; callers
/// on best-effort paths log them instead of failing the session.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Insert or replace a conversation record.
    async fn set(&self, conversation: Conversation) -> Result<()>;

    /// Flip the active flag; a no-op for unknown ids so that disconnect
    /// cleanup never fails on conversations that were never persisted.
    async fn set_active(&self, id: Uuid, active: bool) -> Result<()>;

    async fn append_rtt(&self, id: Uuid, rtt: String) -> Result<()>;

    async fn append_transcript(&self, id: Uuid, item: TranscriptItem) -> Result<()>;

    async fn append_summary(&self, id: Uuid, item: SummaryItem) -> Result<()>;

    /// List conversations, optionally filtered by the active flag.
    async fn list(&self, active: Option<bool>) -> Result<Vec<Conversation>>;

    /// Release underlying connections at process shutdown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Process-local store used when no database is configured.
#[derive(Default)]
pub struct InMemoryConversationStore {
    inner: RwLock<HashMap<Uuid, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Conversation),
    {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .get_mut(&id)
            .ok_or_else(|| anyhow!("unknown conversation {id}"))?;
        apply(conversation);
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn set(&self, conversation: Conversation) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(conversation.id, conversation);
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(conversation) = inner.get_mut(&id) {
            conversation.active = active;
        }
        Ok(())
    }

    async fn append_rtt(&self, id: Uuid, rtt: String) -> Result<()> {
        self.update(id, |c| c.rtt.push(rtt)).await
    }

    async fn append_transcript(&self, id: Uuid, item: TranscriptItem) -> Result<()> {
        self.update(id, |c| c.transcript.push(item)).await
    }

    async fn append_summary(&self, id: Uuid, item: SummaryItem) -> Result<()> {
        self.update(id, |c| c.summary.push(item)).await
    }

    async fn list(&self, active: Option<bool>) -> Result<Vec<Conversation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .values()
            .filter(|c| active.is_none_or(|a| c.active == a))
            .cloned()
            .collect())
    }
}
