//! Consumer of recognition engine events.
//!
//! One bridge per session. It is the only writer of the session's transcript
//! and summary lists, which keeps appends ordered without extra locking.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use audiohook_core::assist::AgentAssistant;
use audiohook_core::events::SessionEvent;
use audiohook_core::models::{SummaryItem, TranscriptItem};
use audiohook_core::store::ConversationStore;

use crate::speech::engine::EngineEvent;
use crate::ws::entity::{
    build_agent_assist_entity, build_agent_assist_utterance, build_transcript_entity,
};
use crate::ws::protocol::ServerMessageType;
use crate::ws::session::SessionSender;

const TRANSCRIPT_CONFIDENCE: f64 = 0.85;

pub struct RecognitionBridge {
    session_id: String,
    conversation_id: Option<Uuid>,
    channels: Vec<String>,
    language: String,
    sender: SessionSender,
    store: Arc<dyn ConversationStore>,
    assist: Option<AgentAssistant>,
}

impl RecognitionBridge {
    pub fn new(
        session_id: String,
        conversation_id: Option<Uuid>,
        channels: Vec<String>,
        language: String,
        sender: SessionSender,
        store: Arc<dyn ConversationStore>,
        assist: Option<AgentAssistant>,
    ) -> Self {
        Self {
            session_id,
            conversation_id,
            channels,
            language,
            sender,
            store,
            assist,
        }
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::Recognizing {
                    text,
                    channel,
                    offset_ticks,
                    duration_ticks,
                } => {
                    self.on_recognizing(&text, channel, offset_ticks, duration_ticks)
                        .await
                }
                EngineEvent::Recognized {
                    text,
                    channel,
                    offset_ticks,
                    duration_ticks,
                } => {
                    self.on_recognized(&text, channel, offset_ticks, duration_ticks)
                        .await
                }
                EngineEvent::Stopped => break,
            }
        }
        self.flush().await;
        debug!(session_id = %self.session_id, "recognition bridge drained");
    }

    async fn on_recognizing(
        &self,
        text: &str,
        channel: Option<u32>,
        offset_ticks: u64,
        duration_ticks: u64,
    ) {
        if text.trim().is_empty() {
            return;
        }
        let channel = channel.unwrap_or(1);
        let entity = build_transcript_entity(
            &self.channel_label(channel),
            text,
            TRANSCRIPT_CONFIDENCE,
            false,
            &ticks_to_iso_duration(offset_ticks),
            &ticks_to_iso_duration(duration_ticks),
            &self.language,
        );
        self.sender
            .send_message(
                &self.session_id,
                ServerMessageType::Event,
                None,
                json!({"entities": [entity]}),
            )
            .await;
    }

    async fn on_recognized(
        &mut self,
        text: &str,
        channel: Option<u32>,
        offset_ticks: u64,
        duration_ticks: u64,
    ) {
        let text = normalize_transcript_text(text);
        if text.is_empty() {
            return;
        }
        let channel = channel.unwrap_or(1);
        let start = ticks_to_iso_duration(offset_ticks);
        let end = ticks_to_iso_duration(offset_ticks + duration_ticks);
        let duration = ticks_to_iso_duration(duration_ticks);
        info!(session_id = %self.session_id, channel, %text, "recognized utterance");

        let item = TranscriptItem {
            channel: Some(channel),
            text: text.clone(),
            start: Some(start.clone()),
            end: Some(end.clone()),
        };
        if let Some(conversation_id) = self.conversation_id {
            if let Err(e) = self.store.append_transcript(conversation_id, item.clone()).await {
                error!(session_id = %self.session_id, error = %e, "failed to append transcript");
            }
        }

        let entity = build_transcript_entity(
            &self.channel_label(channel),
            &text,
            TRANSCRIPT_CONFIDENCE,
            true,
            &start,
            &duration,
            &self.language,
        );
        self.sender
            .send_message(
                &self.session_id,
                ServerMessageType::Event,
                None,
                json!({"entities": [entity]}),
            )
            .await;

        let mut properties = HashMap::new();
        if let Some(conversation_id) = self.conversation_id {
            properties.insert("conversationId".to_string(), conversation_id.to_string());
        }
        self.sender
            .send_event(
                SessionEvent::PartialTranscript,
                &self.session_id,
                json!(item),
                properties,
            )
            .await;

        if let Some(assist) = &mut self.assist {
            match assist.on_transcription(&text).await {
                Ok(Some(summary)) => {
                    self.publish_summary(summary, Some(end)).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(session_id = %self.session_id, error = %e, "agent assist failed")
                }
            }
        }
    }

    /// Summarize whatever the assistant still holds, at end of recognition.
    async fn flush(&mut self) {
        let Some(assist) = &mut self.assist else {
            return;
        };
        match assist.flush_summary().await {
            Ok(Some(summary)) => {
                self.publish_summary(summary, None).await;
            }
            Ok(None) => {}
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "agent assist flush failed")
            }
        }
    }

    async fn publish_summary(&self, summary: String, transcription_end: Option<String>) {
        if let Some(conversation_id) = self.conversation_id {
            let item = SummaryItem {
                text: summary.clone(),
                transcription_end,
            };
            if let Err(e) = self.store.append_summary(conversation_id, item).await {
                error!(session_id = %self.session_id, error = %e, "failed to append summary");
            }
        }
        let utterance = build_agent_assist_utterance(
            "PT0S",
            &summary,
            &self.language,
            TRANSCRIPT_CONFIDENCE,
            "CUSTOMER",
            true,
            "PT0S",
        );
        let entity = build_agent_assist_entity(vec![utterance]);
        self.sender
            .send_message(
                &self.session_id,
                ServerMessageType::Event,
                None,
                json!({"entities": [entity]}),
            )
            .await;
    }

    /// Map an engine channel number to the negotiated channel name. Channel
    /// numbers are zero-based for multichannel recognizers; a single-channel
    /// stream reports channel 1 and maps to the only negotiated channel.
    fn channel_label(&self, channel: u32) -> String {
        if self.channels.len() <= 1 {
            return self
                .channels
                .first()
                .map(|name| name.to_uppercase())
                .unwrap_or_else(|| "CUSTOMER".to_string());
        }
        self.channels
            .get(channel as usize)
            .map(|name| name.to_uppercase())
            .unwrap_or_else(|| "CUSTOMER".to_string())
    }
}

/// Render 100ns ticks as an ISO-8601 duration with centisecond precision.
pub fn ticks_to_iso_duration(ticks: u64) -> String {
    format!("PT{:.2}S", ticks as f64 / 10_000_000.0)
}

/// Tidy recognizer output: leading capital, terminal punctuation.
pub fn normalize_transcript_text(text: &str) -> String {
    let trimmed = text.trim();
    let mut out = String::with_capacity(trimmed.len() + 1);
    let mut chars = trimmed.chars();
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
        out.push_str(chars.as_str());
    }
    if !out.is_empty() && !out.ends_with(['.', '!', '?']) {
        out.push('.');
    }
    out
}
