//! Binary audio frame handling.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use tracing::debug;

use crate::speech::SpeechProvider;
use crate::ws::session::SessionState;

pub struct MediaHandler {
    speech: Option<Arc<dyn SpeechProvider>>,
}

impl MediaHandler {
    pub fn new(speech: Option<Arc<dyn SpeechProvider>>) -> Self {
        Self { speech }
    }

    /// Forward one audio frame to the speech provider. Frames arriving with
    /// no provider configured, or before the open transaction started a
    /// recognition session, are dropped.
    pub async fn handle_bytes(
        &self,
        data: Bytes,
        session_id: &str,
        session: &Arc<SessionState>,
    ) -> Result<()> {
        let Some(provider) = &self.speech else {
            debug!(%session_id, len = data.len(), "dropping audio frame, no speech provider");
            return Ok(());
        };
        provider.handle_audio_frame(session_id, data, session).await
    }
}
