//! Speech recognition providers.

pub mod azure;
pub mod bridge;
pub mod engine;
pub mod openai;
pub mod provider;

pub use engine::{EngineEvent, RecognitionEngine};
pub use provider::EngineSpeechProvider;

use std::sync::Arc;

use anyhow::Result;
use async_openai::config::OpenAIConfig;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::{sync::mpsc, task::JoinHandle};

use audiohook_core::assist::OpenAiAssistClient;
use audiohook_core::models::MediaFormat;
use audiohook_core::store::ConversationStore;

use crate::config::{Config, SpeechEngineConfig};
use crate::ws::session::{SessionSender, SessionState};

/// Live recognition state for one session: the audio feed plus the two
/// tasks driving the engine and its result consumer. Dropping `audio_tx`
/// is the shutdown signal.
pub struct SpeechSession {
    pub audio_tx: mpsc::UnboundedSender<Bytes>,
    pub engine_task: JoinHandle<()>,
    pub bridge_task: JoinHandle<()>,
}

#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Start recognition for an opened session.
    async fn initialize_session(
        &self,
        session_id: &str,
        media: &MediaFormat,
        language: Option<&str>,
        session: &Arc<SessionState>,
    ) -> Result<()>;

    /// Feed one PCMU frame from the media channel.
    async fn handle_audio_frame(
        &self,
        session_id: &str,
        data: Bytes,
        session: &Arc<SessionState>,
    ) -> Result<()>;

    /// Stop recognition and wait for pending results to land.
    async fn shutdown_session(&self, session_id: &str, session: &Arc<SessionState>)
    -> Result<()>;

    /// Release provider-wide resources at process shutdown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the configured provider, or `None` when recognition is disabled.
pub fn from_config(
    config: &Config,
    sender: SessionSender,
    store: Arc<dyn ConversationStore>,
) -> Option<Arc<dyn SpeechProvider>> {
    let speech = config.speech.as_ref()?;

    let engine: Arc<dyn RecognitionEngine> = match &speech.engine {
        SpeechEngineConfig::AzureAiSpeech { region, key } => Arc::new(
            azure::AzureRecognitionEngine::new(region.clone(), key.clone()),
        ),
        SpeechEngineConfig::OpenAiRealtime { api_key } => Arc::new(
            openai::OpenAiTranscriberEngine::new(api_key.clone()),
        ),
    };

    let assist = config.assist.as_ref().map(|assist| {
        let llm = OpenAiAssistClient::new(
            OpenAIConfig::new().with_api_key(&assist.api_key),
            assist.model.clone(),
        );
        provider::AssistSettings {
            llm: Arc::new(llm),
            summary_interval: assist.summary_interval,
            history_target: assist.history_target,
        }
    });

    Some(Arc::new(EngineSpeechProvider::new(
        engine,
        sender,
        store,
        assist,
        speech.languages.clone(),
    )))
}
