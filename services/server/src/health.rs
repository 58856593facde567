//! Dependency health checks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use audiohook_core::events::EventPublisher;
use audiohook_core::store::ConversationStore;

use crate::models::ErrorDetail;

/// Reachability probe for the recording blob store.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

pub struct HttpBlobStorage {
    client: reqwest::Client,
    account_url: String,
}

impl HttpBlobStorage {
    pub fn new(account_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_url,
        }
    }
}

#[async_trait]
impl BlobStorage for HttpBlobStorage {
    async fn probe(&self) -> Result<()> {
        // Any response proves the account endpoint resolves and answers;
        // an unauthenticated properties request typically returns 403.
        let url = format!("{}?restype=service&comp=properties", self.account_url);
        self.client.get(url).send().await?;
        Ok(())
    }
}

/// Probes every configured dependency with a shared per-probe timeout.
pub struct HealthHandler {
    store: Arc<dyn ConversationStore>,
    blob: Option<Arc<dyn BlobStorage>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    timeout: Duration,
}

impl HealthHandler {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        blob: Option<Arc<dyn BlobStorage>>,
        publisher: Option<Arc<dyn EventPublisher>>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            blob,
            publisher,
            timeout,
        }
    }

    /// `Ok` when every configured dependency answered in time; otherwise
    /// the first failing dependency, identified by its code.
    pub async fn check(&self) -> Result<(), ErrorDetail> {
        self.probe("conversations_store", self.store.list(Some(true)))
            .await?;
        if let Some(blob) = &self.blob {
            self.probe("blob_storage", blob.probe()).await?;
        }
        if let Some(publisher) = &self.publisher {
            self.probe("event_hub", publisher.probe()).await?;
        }
        Ok(())
    }

    async fn probe<T>(
        &self,
        code: &str,
        future: impl Future<Output = Result<T>>,
    ) -> Result<(), ErrorDetail> {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                warn!(code, error = %e, "health probe failed");
                Err(ErrorDetail {
                    code: code.to_string(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                warn!(code, "health probe timed out");
                Err(ErrorDetail {
                    code: code.to_string(),
                    message: format!("probe timed out after {:?}", self.timeout),
                })
            }
        }
    }
}
