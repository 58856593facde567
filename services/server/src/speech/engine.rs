//! Recognition engine abstraction.
//!
//! An engine owns one upstream recognizer connection per session. It consumes
//! raw PCMU frames from a channel and reports results as `EngineEvent`s; the
//! channels keep engine internals off the session's locks entirely.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use audiohook_core::models::MediaFormat;

/// Result stream emitted by a recognition engine. Offsets and durations are
/// in 100-nanosecond ticks from the start of the audio stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// An in-progress hypothesis, superseded by later events.
    Recognizing {
        text: String,
        channel: Option<u32>,
        offset_ticks: u64,
        duration_ticks: u64,
    },
    /// A finalized utterance.
    Recognized {
        text: String,
        channel: Option<u32>,
        offset_ticks: u64,
        duration_ticks: u64,
    },
    /// The engine has drained all pending results and will emit no more.
    Stopped,
}

#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Run recognition until `audio_rx` closes, then drain pending results
    /// and emit `EngineEvent::Stopped`.
    async fn run(
        &self,
        session_id: String,
        media: MediaFormat,
        language: String,
        audio_rx: mpsc::UnboundedReceiver<Bytes>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<()>;
}
