//! OpenAI realtime transcription engine.
//!
//! Decodes PCMU to linear PCM, streams it to the realtime API with input
//! transcription enabled, and maps transcription deltas/completions to
//! `EngineEvent`s. The endpoint is single-channel, so stereo calls are
//! collapsed to the external leg.

use anyhow::{Context, Result};
use async_openai::types::realtime::{
    self as oai_realtime, ClientEvent as OAIClientEvent, ServerEvent as OAIServerEvent,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, info, warn};

use audiohook_core::models::MediaFormat;

use crate::audio;
use crate::speech::engine::{EngineEvent, RecognitionEngine};

const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-10-01";
const RESULT_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// 100ns ticks per source sample at 8 kHz.
const TICKS_PER_SAMPLE: u64 = 10_000_000 / 8_000;

pub struct OpenAiTranscriberEngine {
    api_key: String,
}

impl OpenAiTranscriberEngine {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }
}

/// Utterance timing approximated from the count of samples streamed so far.
/// The realtime API does not report offsets, so speech start is pinned when
/// the server's VAD fires and the end when the transcription completes.
struct TickTracker {
    streamed_ticks: u64,
    speech_start_ticks: Option<u64>,
    last_end_ticks: u64,
}

impl TickTracker {
    fn new() -> Self {
        Self {
            streamed_ticks: 0,
            speech_start_ticks: None,
            last_end_ticks: 0,
        }
    }

    fn on_samples(&mut self, count: usize) {
        self.streamed_ticks += count as u64 * TICKS_PER_SAMPLE;
    }

    fn on_speech_started(&mut self) {
        self.speech_start_ticks = Some(self.streamed_ticks);
    }

    fn current_span(&self) -> (u64, u64) {
        let offset = self.speech_start_ticks.unwrap_or(self.last_end_ticks);
        let duration = self.streamed_ticks.saturating_sub(offset);
        (offset, duration)
    }

    fn on_utterance_complete(&mut self) -> (u64, u64) {
        let span = self.current_span();
        self.last_end_ticks = self.streamed_ticks;
        self.speech_start_ticks = None;
        span
    }
}

#[async_trait]
impl RecognitionEngine for OpenAiTranscriberEngine {
    async fn run(
        &self,
        session_id: String,
        media: MediaFormat,
        language: String,
        mut audio_rx: mpsc::UnboundedReceiver<Bytes>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<()> {
        let mut request = REALTIME_URL.into_client_request()?;
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", self.api_key).parse()?);
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse()?);

        let (ws_stream, _) = connect_async(request)
            .await
            .context("failed to connect to the realtime transcription endpoint")?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        info!(%session_id, %language, "connected to realtime transcriber");

        let session_config = oai_realtime::SessionResource {
            modalities: Some(vec!["text".to_string()]),
            input_audio_format: Some(oai_realtime::AudioFormat::PCM16),
            input_audio_transcription: Some(oai_realtime::AudioTranscription {
                model: Some("whisper-1".to_string()),
                ..Default::default()
            }),
            turn_detection: Some(oai_realtime::TurnDetection::ServerVAD {
                threshold: 0.5,
                prefix_padding_ms: 200,
                silence_duration_ms: 700,
                interrupt_response: Some(false),
                create_response: Some(false),
            }),
            ..Default::default()
        };
        let update = OAIClientEvent::SessionUpdate(oai_realtime::SessionUpdateEvent {
            session: session_config,
            event_id: None,
        });
        ws_tx
            .send(WsMessage::Text(serde_json::to_string(&update)?.into()))
            .await?;

        let channels = media.channels.len().max(1);
        let mut ticks = TickTracker::new();
        let mut audio_done = false;

        while !audio_done {
            tokio::select! {
                frame = audio_rx.recv() => {
                    match frame {
                        Some(data) => {
                            let samples = collapse_to_mono(&audio::decode_ulaw(&data), channels);
                            ticks.on_samples(samples.len());
                            let append = oai_realtime::InputAudioBufferAppendEvent {
                                audio: audio::encode_pcm16_base64(&upsample_to_24k(&samples)),
                                event_id: None,
                            };
                            let payload = serde_json::to_string(
                                &OAIClientEvent::InputAudioBufferAppend(append),
                            )?;
                            ws_tx.send(WsMessage::Text(payload.into())).await?;
                        }
                        None => audio_done = true,
                    }
                }
                message = ws_rx.next() => {
                    match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            handle_server_frame(&session_id, &text, &mut ticks, &events);
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            warn!(%session_id, "transcriber closed mid-stream");
                            let _ = events.send(EngineEvent::Stopped);
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }

        // Pending transcriptions arrive after the audio stops; give the
        // server a bounded window to finish them.
        loop {
            match tokio::time::timeout(RESULT_DRAIN_TIMEOUT, ws_rx.next()).await {
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    handle_server_frame(&session_id, &text, &mut ticks, &events);
                }
                Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) => break,
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    warn!(%session_id, error = %e, "transcriber stream error during drain");
                    break;
                }
                Err(_) => break,
            }
        }

        let _ = ws_tx.send(WsMessage::Close(None)).await;
        let _ = events.send(EngineEvent::Stopped);
        Ok(())
    }
}

fn handle_server_frame(
    session_id: &str,
    raw: &str,
    ticks: &mut TickTracker,
    events: &mpsc::UnboundedSender<EngineEvent>,
) {
    let event = match serde_json::from_str::<OAIServerEvent>(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!(%session_id, error = %e, "ignoring unparseable transcriber frame");
            return;
        }
    };
    match event {
        OAIServerEvent::InputAudioBufferSpeechStarted(_) => ticks.on_speech_started(),
        OAIServerEvent::ConversationItemInputAudioTranscriptionDelta(e) => {
            let (offset_ticks, duration_ticks) = ticks.current_span();
            let _ = events.send(EngineEvent::Recognizing {
                text: e.delta,
                channel: None,
                offset_ticks,
                duration_ticks,
            });
        }
        OAIServerEvent::ConversationItemInputAudioTranscriptionCompleted(e) => {
            let (offset_ticks, duration_ticks) = ticks.on_utterance_complete();
            let _ = events.send(EngineEvent::Recognized {
                text: e.transcript,
                channel: None,
                offset_ticks,
                duration_ticks,
            });
        }
        OAIServerEvent::Error(e) => {
            warn!(%session_id, error = %e.error.message, "transcriber reported an error");
        }
        _ => {}
    }
}

/// Keep the external (first) channel of an interleaved stream.
fn collapse_to_mono(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples.iter().step_by(channels).copied().collect()
}

/// The realtime endpoint expects 24 kHz PCM; nearest-neighbor upsample
/// from the 8 kHz telephony rate.
fn upsample_to_24k(samples: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len() * 3);
    for &sample in samples {
        out.extend_from_slice(&[sample, sample, sample]);
    }
    out
}
