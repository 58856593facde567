//! WebSocket session lifecycle.
//!
//! One task per connection owns the receive loop and is the only context that
//! mutates that connection's `SessionState`; recognition callbacks reach the
//! session exclusively through channels (see `crate::speech::bridge`). The
//! `SessionRegistry` is the process-wide map of live sessions and is never
//! exposed as a raw container.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use audiohook_core::events::SessionEvent;
use audiohook_core::store::ConversationStore;

use crate::config::Config;
use crate::speech::{SpeechProvider, SpeechSession};
use crate::state::AppState;
use crate::ws::media::MediaHandler;
use crate::ws::message::{Disposition, MessageHandler};
use crate::ws::protocol::{ClientMessage, DisconnectReason, ServerMessage, ServerMessageType};

/// Ephemeral per-connection state, owned by the registry for the lifetime of
/// one WebSocket connection.
pub struct SessionState {
    socket_tx: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    pub client_seq: AtomicU64,
    pub server_seq: AtomicU64,
    conversation_id: RwLock<Option<Uuid>>,
    /// Slot for the active speech provider session, if one was initialized.
    pub speech: Mutex<Option<SpeechSession>>,
}

impl SessionState {
    pub fn new(socket_tx: Arc<Mutex<SplitSink<WebSocket, Message>>>) -> Self {
        Self {
            socket_tx,
            client_seq: AtomicU64::new(0),
            server_seq: AtomicU64::new(0),
            conversation_id: RwLock::new(None),
            speech: Mutex::new(None),
        }
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        *self.conversation_id.read().expect("conversation id lock poisoned")
    }

    pub fn set_conversation_id(&self, id: Uuid) {
        *self.conversation_id.write().expect("conversation id lock poisoned") = Some(id);
    }

    async fn send_frame(&self, frame: Message) -> Result<(), axum::Error> {
        self.socket_tx.lock().await.send(frame).await
    }
}

/// Synchronized map of session id to live session state.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<SessionState>>>>,
}

impl SessionRegistry {
    pub fn insert(&self, session_id: &str, session: Arc<SessionState>) {
        self.inner
            .write()
            .expect("session registry lock poisoned")
            .insert(session_id.to_string(), session);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionState>> {
        self.inner
            .read()
            .expect("session registry lock poisoned")
            .get(session_id)
            .cloned()
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionState>> {
        let removed = self
            .inner
            .write()
            .expect("session registry lock poisoned")
            .remove(session_id);
        if removed.is_some() {
            info!(%session_id, "session removed from active sessions");
        }
        removed
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.inner
            .read()
            .expect("session registry lock poisoned")
            .contains_key(session_id)
    }
}

/// Shared outbound path: control-channel framing plus best-effort event
/// publishing. Cloneable so the recognition bridge can send without holding
/// a reference back into the session manager.
#[derive(Clone)]
pub struct SessionSender {
    registry: SessionRegistry,
    publisher: Option<Arc<dyn audiohook_core::events::EventPublisher>>,
}

impl SessionSender {
    pub fn new(
        registry: SessionRegistry,
        publisher: Option<Arc<dyn audiohook_core::events::EventPublisher>>,
    ) -> Self {
        Self { registry, publisher }
    }

    /// Frame and send one server message. `clientseq` echoes the triggering
    /// client message when given, otherwise the last recorded client seq.
    /// Send failures are logged; the protocol path never fails on them.
    pub async fn send_message(
        &self,
        session_id: &str,
        kind: ServerMessageType,
        clientseq: Option<u64>,
        parameters: Value,
    ) {
        let Some(session) = self.registry.get(session_id) else {
            warn!(%session_id, "dropping outbound message for unknown session");
            return;
        };
        let seq = session.server_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let clientseq =
            clientseq.unwrap_or_else(|| session.client_seq.load(Ordering::SeqCst));
        let message = ServerMessage::new(kind, seq, clientseq, session_id, parameters);
        debug!(%session_id, ?kind, seq, "sending server message");

        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!(%session_id, error = %e, "failed to serialize server message");
                return;
            }
        };
        if let Err(e) = session.send_frame(Message::Text(payload.into())).await {
            error!(%session_id, error = %e, "failed to send message");
        }
    }

    /// Terminate the session from the server side: send a `disconnect`
    /// message, then close the socket with the given close code.
    ///
    /// A disconnect sent before any client message was processed uses
    /// seq/clientseq = 1, per the protocol.
    pub async fn disconnect(
        &self,
        session_id: &str,
        reason: DisconnectReason,
        info: &str,
        code: u16,
    ) {
        warn!(%session_id, ?reason, info, "disconnecting session");
        let Some(session) = self.registry.get(session_id) else {
            return;
        };
        let seq = session.server_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut clientseq = session.client_seq.load(Ordering::SeqCst);
        if seq == 1 && clientseq == 0 {
            clientseq = 1;
        }
        let message = ServerMessage::new(
            ServerMessageType::Disconnect,
            seq,
            clientseq,
            session_id,
            json!({"reason": reason, "info": info}),
        );
        if let Ok(payload) = serde_json::to_string(&message) {
            if let Err(e) = session.send_frame(Message::Text(payload.into())).await {
                error!(%session_id, error = %e, "failed to send disconnect");
            }
        }
        self.close_socket(session_id, code, "").await;
    }

    pub async fn close_socket(&self, session_id: &str, code: u16, reason: &str) {
        let Some(session) = self.registry.get(session_id) else {
            return;
        };
        let frame = Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        }));
        if let Err(e) = session.send_frame(frame).await {
            debug!(%session_id, error = %e, "failed to send close frame");
        }
    }

    /// Publish an event to the external sink. Best effort: an unconfigured
    /// publisher and sink failures are both logged and swallowed.
    pub async fn send_event(
        &self,
        event: SessionEvent,
        session_id: &str,
        message: Value,
        properties: HashMap<String, String>,
    ) {
        let Some(publisher) = &self.publisher else {
            debug!(%session_id, "no event publisher configured");
            return;
        };
        match publisher.send_event(event, session_id, message, properties).await {
            Ok(()) => debug!(%session_id, %event, "event sent"),
            Err(e) => error!(%session_id, %event, error = %e, "failed to send event"),
        }
    }
}

/// Top-level orchestrator: owns the registry, wires the message/media
/// handlers, and runs the receive loop for each accepted connection.
pub struct SessionManager {
    registry: SessionRegistry,
    sender: SessionSender,
    store: Arc<dyn ConversationStore>,
    speech: Option<Arc<dyn SpeechProvider>>,
    publisher: Option<Arc<dyn audiohook_core::events::EventPublisher>>,
    message_handler: MessageHandler,
    media_handler: MediaHandler,
    config: Arc<Config>,
}

impl SessionManager {
    pub fn new(
        registry: SessionRegistry,
        sender: SessionSender,
        store: Arc<dyn ConversationStore>,
        speech: Option<Arc<dyn SpeechProvider>>,
        publisher: Option<Arc<dyn audiohook_core::events::EventPublisher>>,
        config: Arc<Config>,
    ) -> Self {
        let message_handler = MessageHandler::new(
            speech.clone(),
            store.clone(),
            sender.clone(),
            registry.clone(),
        );
        let media_handler = MediaHandler::new(speech.clone());
        Self {
            registry,
            sender,
            store,
            speech,
            publisher,
            message_handler,
            media_handler,
            config,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Handle one accepted WebSocket connection until it ends.
    pub async fn handle_socket(&self, socket: WebSocket, headers: HeaderMap) {
        let (socket_tx, mut socket_rx) = socket.split();
        let socket_tx = Arc::new(Mutex::new(socket_tx));

        let session_id = header_value(&headers, "audiohook-session-id");
        let Some(session_id) = session_id.filter(|id| !id.is_empty()) else {
            warn!("no session id provided, rejecting connection");
            let frame = Message::Close(Some(CloseFrame {
                code: 1008,
                reason: "no session id provided".to_string().into(),
            }));
            let _ = socket_tx.lock().await.send(frame).await;
            return;
        };

        let session = Arc::new(SessionState::new(socket_tx));
        self.registry.insert(&session_id, session.clone());

        let correlation_id =
            header_value(&headers, "audiohook-correlation-id").unwrap_or_default();
        info!(%session_id, %correlation_id, "accepted websocket connection");

        if !self.api_key_valid(&headers) {
            self.sender
                .disconnect(&session_id, DisconnectReason::Unauthorized, "Invalid API Key", 3000)
                .await;
            self.registry.remove(&session_id);
            return;
        }
        if !self.signature_present(&headers) {
            self.sender
                .disconnect(&session_id, DisconnectReason::Unauthorized, "Invalid signature", 3000)
                .await;
            self.registry.remove(&session_id);
            return;
        }

        while let Some(frame) = socket_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let message = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(%session_id, error = %e, "ignoring malformed control message");
                            continue;
                        }
                    };
                    match self.message_handler.handle_incoming_message(message, &session).await {
                        Ok(Disposition::Continue) => {}
                        Ok(Disposition::Terminated) => break,
                        Err(e) => {
                            error!(%session_id, error = ?e, "error handling control message");
                        }
                    }
                }
                Ok(Message::Binary(data)) => {
                    if let Err(e) =
                        self.media_handler.handle_bytes(data, &session_id, &session).await
                    {
                        error!(%session_id, error = ?e, "error handling audio frame");
                    }
                }
                Ok(Message::Close(_)) => {
                    info!(%session_id, "client closed the connection");
                    break;
                }
                // WebSocket-level ping/pong is unused by this protocol.
                Ok(_) => {}
                Err(e) => {
                    warn!(%session_id, error = %e, "websocket receive error");
                    break;
                }
            }
        }

        self.cleanup_after_disconnect(&session_id).await;
    }

    /// A connection that ended without a close transaction (peer reset,
    /// cancellation) gets the implicit-close treatment: tear down any live
    /// speech session, mark the conversation inactive, drop the session.
    /// No `closed` reply, no transcript event.
    async fn cleanup_after_disconnect(&self, session_id: &str) {
        let Some(session) = self.registry.remove(session_id) else {
            return; // close transaction already removed it
        };
        warn!(%session_id, "websocket connection cancelled/disconnected");

        if let Some(provider) = &self.speech {
            if let Err(e) = provider.shutdown_session(session_id, &session).await {
                error!(%session_id, error = ?e, "failed to shut down speech session");
            }
        }
        if let Some(conversation_id) = session.conversation_id().filter(|id| !id.is_nil()) {
            if let Err(e) = self.store.set_active(conversation_id, false).await {
                error!(%session_id, error = %e, "failed to mark conversation inactive");
            }
        }
    }

    fn api_key_valid(&self, headers: &HeaderMap) -> bool {
        match &self.config.api_key {
            Some(expected) => header_value(headers, "x-api-key").as_deref() == Some(expected),
            None => true,
        }
    }

    /// Signature verification is presence-checking only: when a client
    /// secret is configured the signature headers must be supplied.
    fn signature_present(&self, headers: &HeaderMap) -> bool {
        if self.config.client_secret.is_none() {
            return true;
        }
        header_value(headers, "signature-input").is_some_and(|v| !v.is_empty())
            && header_value(headers, "signature").is_some_and(|v| !v.is_empty())
    }

    /// Release external resources at process shutdown.
    pub async fn close(&self) {
        if let Some(provider) = &self.speech {
            if let Err(e) = provider.close().await {
                error!(error = ?e, "failed to close speech provider");
            }
        }
        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.close().await {
                error!(error = ?e, "failed to close event publisher");
            }
        }
        if let Err(e) = self.store.close().await {
            error!(error = ?e, "failed to close conversation store");
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Axum handler upgrading the HTTP connection to an AudioHook session.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        state.sessions.handle_socket(socket, headers).await;
    })
}
