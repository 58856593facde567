//! Engine-agnostic provider plumbing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use audiohook_core::assist::{AgentAssistant, LlmClient};
use audiohook_core::models::MediaFormat;
use audiohook_core::store::ConversationStore;

use crate::speech::bridge::RecognitionBridge;
use crate::speech::engine::RecognitionEngine;
use crate::speech::{SpeechProvider, SpeechSession};
use crate::ws::session::{SessionSender, SessionState};

const ENGINE_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const BRIDGE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AssistSettings {
    pub llm: Arc<dyn LlmClient>,
    pub summary_interval: usize,
    pub history_target: usize,
}

/// `SpeechProvider` driving any `RecognitionEngine`. Per session it spawns
/// the engine task and a bridge task; the bridge is the single consumer of
/// engine results, so transcript and summary appends stay ordered.
pub struct EngineSpeechProvider {
    engine: Arc<dyn RecognitionEngine>,
    sender: SessionSender,
    store: Arc<dyn ConversationStore>,
    assist: Option<AssistSettings>,
    default_language: String,
}

impl EngineSpeechProvider {
    pub fn new(
        engine: Arc<dyn RecognitionEngine>,
        sender: SessionSender,
        store: Arc<dyn ConversationStore>,
        assist: Option<AssistSettings>,
        default_language: String,
    ) -> Self {
        Self {
            engine,
            sender,
            store,
            assist,
            default_language,
        }
    }
}

#[async_trait::async_trait]
impl SpeechProvider for EngineSpeechProvider {
    async fn initialize_session(
        &self,
        session_id: &str,
        media: &MediaFormat,
        language: Option<&str>,
        session: &Arc<SessionState>,
    ) -> Result<()> {
        let mut slot = session.speech.lock().await;
        if slot.is_some() {
            warn!(%session_id, "speech session already initialized");
            return Ok(());
        }

        let language = language.unwrap_or(&self.default_language).to_string();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let engine = self.engine.clone();
        let engine_session = session_id.to_string();
        let engine_media = media.clone();
        let engine_language = language.clone();
        let engine_task = tokio::spawn(async move {
            if let Err(e) = engine
                .run(
                    engine_session.clone(),
                    engine_media,
                    engine_language,
                    audio_rx,
                    event_tx,
                )
                .await
            {
                error!(session_id = %engine_session, error = ?e, "recognition engine failed");
            }
        });

        let assistant = self.assist.as_ref().map(|settings| {
            AgentAssistant::new(
                settings.llm.clone(),
                settings.summary_interval,
                settings.history_target,
            )
        });
        let bridge = RecognitionBridge::new(
            session_id.to_string(),
            session.conversation_id(),
            media.channels.clone(),
            language,
            self.sender.clone(),
            self.store.clone(),
            assistant,
        );
        let bridge_task = tokio::spawn(bridge.run(event_rx));

        *slot = Some(SpeechSession {
            audio_tx,
            engine_task,
            bridge_task,
        });
        Ok(())
    }

    async fn handle_audio_frame(
        &self,
        session_id: &str,
        data: Bytes,
        session: &Arc<SessionState>,
    ) -> Result<()> {
        let slot = session.speech.lock().await;
        match &*slot {
            Some(speech) => {
                // A closed channel means the engine already stopped; late
                // frames are expected around shutdown and dropped quietly.
                if speech.audio_tx.send(data).is_err() {
                    debug!(%session_id, "dropping audio frame, engine stopped");
                }
            }
            None => debug!(%session_id, "dropping audio frame, no speech session"),
        }
        Ok(())
    }

    async fn shutdown_session(
        &self,
        session_id: &str,
        session: &Arc<SessionState>,
    ) -> Result<()> {
        let speech = {
            let mut slot = session.speech.lock().await;
            slot.take()
        };
        let Some(speech) = speech else {
            return Ok(());
        };
        debug!(%session_id, "shutting down speech session");

        drop(speech.audio_tx);
        let mut engine_task = speech.engine_task;
        if tokio::time::timeout(ENGINE_DRAIN_TIMEOUT, &mut engine_task)
            .await
            .is_err()
        {
            warn!(%session_id, "recognition engine did not stop in time");
            engine_task.abort();
        }
        let mut bridge_task = speech.bridge_task;
        if tokio::time::timeout(BRIDGE_DRAIN_TIMEOUT, &mut bridge_task)
            .await
            .is_err()
        {
            warn!(%session_id, "recognition bridge did not drain in time");
            bridge_task.abort();
        }
        Ok(())
    }
}
