//! Control-channel message dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use serde_json::json;
use tracing::{error, info, warn};

use audiohook_core::events::SessionEvent;
use audiohook_core::models::{Conversation, select_media};
use audiohook_core::store::ConversationStore;

use crate::speech::SpeechProvider;
use crate::ws::protocol::{
    ClientMessage, ClientMessageType, CloseParameters, CloseReason, DisconnectReason,
    OpenParameters, PingParameters, ServerMessageType, UpdateParameters,
};
use crate::ws::session::{SessionRegistry, SessionSender, SessionState};

/// Outcome of processing one control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// The session has ended; the receive loop must stop.
    Terminated,
}

pub struct MessageHandler {
    speech: Option<Arc<dyn SpeechProvider>>,
    store: Arc<dyn ConversationStore>,
    sender: SessionSender,
    registry: SessionRegistry,
}

impl MessageHandler {
    pub fn new(
        speech: Option<Arc<dyn SpeechProvider>>,
        store: Arc<dyn ConversationStore>,
        sender: SessionSender,
        registry: SessionRegistry,
    ) -> Self {
        Self {
            speech,
            store,
            sender,
            registry,
        }
    }

    /// Validate sequencing, then dispatch by message type.
    pub async fn handle_incoming_message(
        &self,
        message: ClientMessage,
        session: &Arc<SessionState>,
    ) -> Result<Disposition> {
        let session_id = message.id.clone();
        let expected = session.client_seq.load(Ordering::SeqCst) + 1;
        if message.seq != expected {
            // Record what the client sent so the disconnect echoes it, then
            // terminate without dispatching the out-of-order message. The
            // session stays registered so the disconnect cleanup still shuts
            // down recognition and marks the conversation inactive.
            session.client_seq.store(message.seq, Ordering::SeqCst);
            self.sender
                .disconnect(
                    &session_id,
                    DisconnectReason::Error,
                    &format!(
                        "Sequence number mismatch: expected {expected}, got {}",
                        message.seq
                    ),
                    3000,
                )
                .await;
            return Ok(Disposition::Terminated);
        }
        session.client_seq.store(message.seq, Ordering::SeqCst);

        match message.kind {
            ClientMessageType::Open => self.handle_open(message, session).await,
            ClientMessageType::Ping => self.handle_ping(message, session).await,
            ClientMessageType::Update => self.handle_update(message).await,
            ClientMessageType::Close => self.handle_close(message, session).await,
            ClientMessageType::Unknown => {
                warn!(%session_id, "ignoring message of unknown type");
                Ok(Disposition::Continue)
            }
        }
    }

    /// The open transaction: select media, persist the conversation, start
    /// speech recognition, reply `opened`, and announce the session.
    ///
    /// A connection probe (all-zero conversation id) gets an `opened` reply
    /// with an empty media list and touches nothing else.
    async fn handle_open(
        &self,
        message: ClientMessage,
        session: &Arc<SessionState>,
    ) -> Result<Disposition> {
        let session_id = message.id.clone();
        let params: OpenParameters = match serde_json::from_value(message.parameters) {
            Ok(params) => params,
            Err(e) => {
                self.sender
                    .disconnect(
                        &session_id,
                        DisconnectReason::Error,
                        &format!("Invalid open parameters: {e}"),
                        3000,
                    )
                    .await;
                return Ok(Disposition::Terminated);
            }
        };

        session.set_conversation_id(params.conversation_id);

        if params.conversation_id.is_nil() {
            info!(%session_id, "responding to a connection probe");
            self.sender
                .send_message(
                    &session_id,
                    ServerMessageType::Opened,
                    Some(message.seq),
                    json!({"startPaused": false, "media": []}),
                )
                .await;
            return Ok(Disposition::Continue);
        }

        let Some(media) = select_media(&params.media).cloned() else {
            self.sender
                .disconnect(
                    &session_id,
                    DisconnectReason::Error,
                    "No supported media format offered",
                    3000,
                )
                .await;
            return Ok(Disposition::Terminated);
        };
        info!(
            %session_id,
            conversation_id = %params.conversation_id,
            channels = media.channels.len(),
            "opening session"
        );

        let conversation = Conversation {
            id: params.conversation_id,
            session_id: session_id.clone(),
            active: true,
            ani: params.participant.ani.clone(),
            ani_name: params.participant.ani_name.clone(),
            dnis: params.participant.dnis.clone(),
            media: media.clone(),
            position: message.position.clone().unwrap_or_default(),
            rtt: Vec::new(),
            transcript: Vec::new(),
            summary: Vec::new(),
        };
        let announcement = json!({
            "conversationId": conversation.id,
            "ani": conversation.ani,
            "aniName": conversation.ani_name,
            "dnis": conversation.dnis,
            "media": conversation.media,
            "position": conversation.position,
        });
        self.store.set(conversation).await?;

        if let Some(provider) = &self.speech {
            if let Err(e) = provider
                .initialize_session(&session_id, &media, params.language.as_deref(), session)
                .await
            {
                error!(%session_id, error = ?e, "failed to initialize speech session");
            }
        }

        self.sender
            .send_message(
                &session_id,
                ServerMessageType::Opened,
                Some(message.seq),
                json!({"startPaused": false, "media": [media]}),
            )
            .await;

        // Announce after the reply so the opened message is never delayed
        // behind the event sink.
        let sender = self.sender.clone();
        let announce_session = session_id.clone();
        let conversation_id = params.conversation_id;
        tokio::spawn(async move {
            let mut properties = HashMap::new();
            properties.insert("conversationId".to_string(), conversation_id.to_string());
            sender
                .send_event(
                    SessionEvent::SessionStarted,
                    &announce_session,
                    announcement,
                    properties,
                )
                .await;
        });

        Ok(Disposition::Continue)
    }

    async fn handle_ping(
        &self,
        message: ClientMessage,
        session: &Arc<SessionState>,
    ) -> Result<Disposition> {
        let session_id = message.id.clone();
        let params: PingParameters =
            serde_json::from_value(message.parameters).unwrap_or_default();

        self.sender
            .send_message(&session_id, ServerMessageType::Pong, Some(message.seq), json!({}))
            .await;

        if let Some(rtt) = params.rtt {
            if let Some(conversation_id) = session.conversation_id().filter(|id| !id.is_nil()) {
                if let Err(e) = self.store.append_rtt(conversation_id, rtt).await {
                    error!(%session_id, error = %e, "failed to record rtt");
                }
            }
        }
        Ok(Disposition::Continue)
    }

    async fn handle_update(&self, message: ClientMessage) -> Result<Disposition> {
        let params: UpdateParameters =
            serde_json::from_value(message.parameters).unwrap_or_default();
        info!(
            session_id = %message.id,
            language = params.language.as_deref().unwrap_or("<unchanged>"),
            "received update"
        );
        Ok(Disposition::Continue)
    }

    /// The close transaction. Ordering matters: recognition is drained
    /// before the conversation is re-read, so the final transcript event
    /// carries everything the engine produced.
    async fn handle_close(
        &self,
        message: ClientMessage,
        session: &Arc<SessionState>,
    ) -> Result<Disposition> {
        let session_id = message.id.clone();
        let params: CloseParameters = serde_json::from_value(message.parameters)
            .unwrap_or(CloseParameters { reason: CloseReason::Other });
        info!(%session_id, reason = ?params.reason, "closing session");

        let conversation_id = session.conversation_id().filter(|id| !id.is_nil());

        if conversation_id.is_some() {
            if let Some(provider) = &self.speech {
                if let Err(e) = provider.shutdown_session(&session_id, session).await {
                    error!(%session_id, error = ?e, "failed to shut down speech session");
                }
            }
        }

        if let Some(conversation_id) = conversation_id {
            if params.reason == CloseReason::End {
                match self.store.get(conversation_id).await {
                    Ok(Some(conversation)) => {
                        let mut properties = HashMap::new();
                        properties
                            .insert("conversationId".to_string(), conversation_id.to_string());
                        properties.insert("reason".to_string(), "end".to_string());
                        self.sender
                            .send_event(
                                SessionEvent::TranscriptAvailable,
                                &session_id,
                                json!({"transcript": conversation.transcript}),
                                properties,
                            )
                            .await;
                    }
                    Ok(None) => {
                        warn!(%session_id, %conversation_id, "no conversation found at close")
                    }
                    Err(e) => {
                        error!(%session_id, error = %e, "failed to load conversation at close")
                    }
                }
            }
        }

        self.sender
            .send_message(&session_id, ServerMessageType::Closed, Some(message.seq), json!({}))
            .await;
        self.sender.close_socket(&session_id, 1000, "session closed").await;

        if let Some(conversation_id) = conversation_id {
            if let Err(e) = self.store.set_active(conversation_id, false).await {
                error!(%session_id, error = %e, "failed to mark conversation inactive");
            }
        }
        self.registry.remove(&session_id);
        Ok(Disposition::Terminated)
    }
}
