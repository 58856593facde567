//! Azure AI Speech recognition engine.
//!
//! Streams linear PCM to the speech-to-text WebSocket endpoint and maps its
//! JSON result frames to `EngineEvent`s. Stereo calls use the multichannel
//! endpoint so each leg is recognized on its own channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, info, warn};

use audiohook_core::models::MediaFormat;

use crate::audio;
use crate::speech::engine::{EngineEvent, RecognitionEngine};

const RESULT_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

pub struct AzureRecognitionEngine {
    region: String,
    key: String,
}

impl AzureRecognitionEngine {
    pub fn new(region: String, key: String) -> Self {
        Self { region, key }
    }

    fn endpoint(&self, channels: usize, language: &str) -> String {
        let path = if channels >= 2 {
            "speech/recognition/multichannel2/cognitiveservices/v1"
        } else {
            "speech/recognition/conversation/cognitiveservices/v1"
        };
        format!(
            "wss://{}.stt.speech.microsoft.com/{}?language={}&format=simple",
            self.region, path, language
        )
    }
}

/// One result frame from the recognizer. Hypothesis frames carry `Text`,
/// finalized frames carry `RecognitionStatus` and `DisplayText`. Offsets
/// and durations are already in 100ns ticks.
#[derive(Debug, Deserialize)]
struct AzureSpeechResult {
    #[serde(rename = "RecognitionStatus")]
    status: Option<String>,
    #[serde(rename = "DisplayText")]
    display_text: Option<String>,
    #[serde(rename = "Text")]
    text: Option<String>,
    #[serde(rename = "Offset", default)]
    offset: u64,
    #[serde(rename = "Duration", default)]
    duration: u64,
    #[serde(rename = "Channel")]
    channel: Option<u32>,
}

fn handle_result_frame(
    session_id: &str,
    raw: &str,
    events: &mpsc::UnboundedSender<EngineEvent>,
) {
    let result: AzureSpeechResult = match serde_json::from_str(raw) {
        Ok(result) => result,
        Err(e) => {
            debug!(%session_id, error = %e, "ignoring unparseable recognizer frame");
            return;
        }
    };

    match result.status.as_deref() {
        Some("Success") => {
            if let Some(text) = result.display_text.filter(|t| !t.is_empty()) {
                let _ = events.send(EngineEvent::Recognized {
                    text,
                    channel: result.channel,
                    offset_ticks: result.offset,
                    duration_ticks: result.duration,
                });
            }
        }
        Some("InitialSilenceTimeout") => {
            warn!(%session_id, "recognizer reported initial silence timeout");
        }
        Some("EndOfDictation") => {}
        Some(status) => debug!(%session_id, status, "unhandled recognition status"),
        None => {
            if let Some(text) = result.text.filter(|t| !t.is_empty()) {
                let _ = events.send(EngineEvent::Recognizing {
                    text,
                    channel: result.channel,
                    offset_ticks: result.offset,
                    duration_ticks: result.duration,
                });
            }
        }
    }
}

#[async_trait]
impl RecognitionEngine for AzureRecognitionEngine {
    async fn run(
        &self,
        session_id: String,
        media: MediaFormat,
        language: String,
        mut audio_rx: mpsc::UnboundedReceiver<Bytes>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<()> {
        let channels = media.channels.len().max(1);
        let url = self.endpoint(channels, &language);
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("Ocp-Apim-Subscription-Key", self.key.parse()?);

        let (ws_stream, _) = connect_async(request)
            .await
            .context("failed to connect to the speech recognition endpoint")?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        info!(%session_id, channels, %language, "connected to speech recognizer");

        ws_tx
            .send(WsMessage::Binary(
                audio::wav_header(media.rate, channels as u16).into(),
            ))
            .await?;

        let mut audio_done = false;
        while !audio_done {
            tokio::select! {
                frame = audio_rx.recv() => {
                    match frame {
                        Some(data) => {
                            let pcm = audio::pcm16_to_le_bytes(&audio::decode_ulaw(&data));
                            ws_tx.send(WsMessage::Binary(pcm.into())).await?;
                        }
                        None => {
                            audio_done = true;
                            // empty frame marks end of the audio stream
                            ws_tx.send(WsMessage::Binary(Bytes::new())).await?;
                        }
                    }
                }
                message = ws_rx.next() => {
                    match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            handle_result_frame(&session_id, &text, &events);
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            warn!(%session_id, "recognizer closed mid-stream");
                            let _ = events.send(EngineEvent::Stopped);
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }

        // Drain remaining results; the recognizer finalizes pending
        // utterances after end of stream.
        loop {
            match tokio::time::timeout(RESULT_DRAIN_TIMEOUT, ws_rx.next()).await {
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    handle_result_frame(&session_id, &text, &events);
                }
                Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) => break,
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    warn!(%session_id, error = %e, "recognizer stream error during drain");
                    break;
                }
                Err(_) => {
                    warn!(%session_id, "timed out draining recognizer results");
                    break;
                }
            }
        }

        let _ = ws_tx.send(WsMessage::Close(None)).await;
        let _ = events.send(EngineEvent::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(raw: &str) -> Vec<EngineEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_result_frame("session-1", raw, &tx);
        drop(tx);
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn finalized_frames_become_recognized_events() {
        let events = collect(
            r#"{"RecognitionStatus":"Success","DisplayText":"Hello there.","Offset":10000000,"Duration":5000000,"Channel":1}"#,
        );
        assert_eq!(
            events,
            vec![EngineEvent::Recognized {
                text: "Hello there.".to_string(),
                channel: Some(1),
                offset_ticks: 10_000_000,
                duration_ticks: 5_000_000,
            }]
        );
    }

    #[test]
    fn hypothesis_frames_become_recognizing_events() {
        let events =
            collect(r#"{"Text":"hello th","Offset":10000000,"Duration":2000000}"#);
        assert_eq!(
            events,
            vec![EngineEvent::Recognizing {
                text: "hello th".to_string(),
                channel: None,
                offset_ticks: 10_000_000,
                duration_ticks: 2_000_000,
            }]
        );
    }

    #[test]
    fn silence_and_empty_frames_emit_nothing() {
        assert!(collect(r#"{"RecognitionStatus":"InitialSilenceTimeout","Offset":0,"Duration":0}"#).is_empty());
        assert!(collect(r#"{"RecognitionStatus":"Success","DisplayText":"","Offset":0,"Duration":0}"#).is_empty());
        assert!(collect("not json").is_empty());
    }

    #[test]
    fn stereo_calls_use_the_multichannel_endpoint() {
        let engine = AzureRecognitionEngine::new("eastus".to_string(), "key".to_string());
        assert!(engine.endpoint(2, "en-US").contains("multichannel2"));
        assert!(engine.endpoint(1, "en-US").contains("recognition/conversation"));
    }
}
