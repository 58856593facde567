//! End-to-end tests of the protocol over a real WebSocket connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message},
};
use uuid::Uuid;

use audiohook_core::events::{EventPublisher, SessionEvent};
use audiohook_core::store::{ConversationStore, InMemoryConversationStore};
use audiohook_server::config::Config;
use audiohook_server::health::HealthHandler;
use audiohook_server::router::build_router;
use audiohook_server::state::AppState;
use audiohook_server::ws::session::{SessionManager, SessionRegistry, SessionSender};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const API_KEY: &str = "test-api-key";

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".to_string(),
        api_key: Some(API_KEY.to_string()),
        client_secret: None,
        database_url: None,
        blob_storage_url: None,
        event_webhook_url: None,
        speech: None,
        assist: None,
    }
}

/// Event sink that remembers everything published to it.
#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingPublisher {
    fn named(&self, name: &str) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn send_event(
        &self,
        event: SessionEvent,
        _session_id: &str,
        message: Value,
        _properties: HashMap<String, String>,
    ) -> anyhow::Result<()> {
        self.events.lock().unwrap().push((event.to_string(), message));
        Ok(())
    }

    async fn probe(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

async fn spawn_server(config: Config) -> (SocketAddr, Arc<AppState>) {
    spawn_server_with(config, None).await
}

async fn spawn_server_with(
    config: Config,
    publisher: Option<Arc<dyn EventPublisher>>,
) -> (SocketAddr, Arc<AppState>) {
    let config = Arc::new(config);
    let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
    let registry = SessionRegistry::default();
    let sender = SessionSender::new(registry.clone(), publisher.clone());
    let sessions = Arc::new(SessionManager::new(
        registry,
        sender,
        store.clone(),
        None,
        publisher,
        config.clone(),
    ));
    let health = Arc::new(HealthHandler::new(
        store.clone(),
        None,
        None,
        Duration::from_secs(1),
    ));
    let state = Arc::new(AppState {
        sessions,
        store,
        health,
        config,
    });

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, session_id: Option<&str>, api_key: &str) -> WsClient {
    let mut request = format!("ws://{addr}/audiohook/ws")
        .into_client_request()
        .unwrap();
    let headers = request.headers_mut();
    headers.insert("X-Api-Key", api_key.parse().unwrap());
    if let Some(session_id) = session_id {
        headers.insert("Audiohook-Session-Id", session_id.parse().unwrap());
    }
    headers.insert("Audiohook-Correlation-Id", Uuid::new_v4().to_string().parse().unwrap());
    let (client, _) = connect_async(request).await.unwrap();
    client
}

async fn next_json(client: &mut WsClient) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a server message")
            .expect("connection ended unexpectedly")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

async fn next_close_code(client: &mut WsClient) -> Option<u16> {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code.into()),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

fn open_message(session_id: &str, seq: u64, conversation_id: Uuid, media: Value) -> Message {
    let payload = json!({
        "version": "2",
        "type": "open",
        "seq": seq,
        "serverseq": 0,
        "id": session_id,
        "position": "PT0S",
        "parameters": {
            "conversationId": conversation_id,
            "participant": {
                "ani": "+1-555-555-1234",
                "aniName": "John Doe",
                "dnis": "+1-800-555-6789"
            },
            "media": media,
            "language": "en-US"
        }
    });
    Message::Text(payload.to_string().into())
}

fn stereo_and_mono_media() -> Value {
    json!([
        {"type": "audio", "format": "PCMU", "channels": ["external"], "rate": 8000},
        {"type": "audio", "format": "PCMU", "channels": ["external", "internal"], "rate": 8000}
    ])
}

#[tokio::test]
async fn connections_without_a_session_id_are_rejected() {
    let (addr, _state) = spawn_server(test_config()).await;
    let mut client = connect(addr, None, API_KEY).await;
    assert_eq!(next_close_code(&mut client).await, Some(1008));
}

#[tokio::test]
async fn an_invalid_api_key_draws_an_unauthorized_disconnect() {
    let (addr, state) = spawn_server(test_config()).await;
    let session_id = Uuid::new_v4().to_string();
    let mut client = connect(addr, Some(&session_id), "wrong-key").await;

    let disconnect = next_json(&mut client).await;
    assert_eq!(disconnect["type"], "disconnect");
    assert_eq!(disconnect["parameters"]["reason"], "unauthorized");
    // sent before any client message was processed
    assert_eq!(disconnect["seq"], 1);
    assert_eq!(disconnect["clientseq"], 1);
    assert_eq!(next_close_code(&mut client).await, Some(3000));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!state.sessions.registry().contains(&session_id));
}

#[tokio::test]
async fn a_connection_probe_gets_an_opened_reply_and_no_record() {
    let (addr, state) = spawn_server(test_config()).await;
    let session_id = Uuid::new_v4().to_string();
    let mut client = connect(addr, Some(&session_id), API_KEY).await;

    client
        .send(open_message(&session_id, 1, Uuid::nil(), stereo_and_mono_media()))
        .await
        .unwrap();

    let opened = next_json(&mut client).await;
    assert_eq!(opened["type"], "opened");
    assert_eq!(opened["seq"], 1);
    assert_eq!(opened["clientseq"], 1);
    assert_eq!(opened["id"], session_id);
    assert!(opened["parameters"]["media"].as_array().unwrap().is_empty());

    assert!(state.store.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn opening_selects_stereo_media_and_persists_the_conversation() {
    let (addr, state) = spawn_server(test_config()).await;
    let session_id = Uuid::new_v4().to_string();
    let conversation_id = Uuid::new_v4();
    let mut client = connect(addr, Some(&session_id), API_KEY).await;

    client
        .send(open_message(&session_id, 1, conversation_id, stereo_and_mono_media()))
        .await
        .unwrap();

    let opened = next_json(&mut client).await;
    assert_eq!(opened["type"], "opened");
    assert_eq!(opened["parameters"]["startPaused"], false);
    let media = opened["parameters"]["media"].as_array().unwrap();
    assert_eq!(media.len(), 1);
    assert_eq!(media[0]["channels"], json!(["external", "internal"]));

    let conversation = state.store.get(conversation_id).await.unwrap().unwrap();
    assert!(conversation.active);
    assert_eq!(conversation.session_id, session_id);
    assert_eq!(conversation.ani_name, "John Doe");
}

#[tokio::test]
async fn offering_no_media_terminates_the_session() {
    let (addr, _state) = spawn_server(test_config()).await;
    let session_id = Uuid::new_v4().to_string();
    let mut client = connect(addr, Some(&session_id), API_KEY).await;

    client
        .send(open_message(&session_id, 1, Uuid::new_v4(), json!([])))
        .await
        .unwrap();

    let disconnect = next_json(&mut client).await;
    assert_eq!(disconnect["type"], "disconnect");
    assert_eq!(disconnect["parameters"]["reason"], "error");
    assert_eq!(next_close_code(&mut client).await, Some(3000));
}

#[tokio::test]
async fn sequence_gaps_draw_an_error_disconnect() {
    let (addr, _state) = spawn_server(test_config()).await;
    let session_id = Uuid::new_v4().to_string();
    let conversation_id = Uuid::new_v4();
    let mut client = connect(addr, Some(&session_id), API_KEY).await;

    client
        .send(open_message(&session_id, 1, conversation_id, stereo_and_mono_media()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "opened");

    // seq 5 arrives where 2 was expected
    let ping = json!({
        "version": "2", "type": "ping", "seq": 5, "id": session_id,
        "parameters": {"rtt": "PT0.05S"}
    });
    client.send(Message::Text(ping.to_string().into())).await.unwrap();

    let disconnect = next_json(&mut client).await;
    assert_eq!(disconnect["type"], "disconnect");
    assert_eq!(disconnect["parameters"]["reason"], "error");
    assert!(
        disconnect["parameters"]["info"]
            .as_str()
            .unwrap()
            .contains("expected 2")
    );
    assert_eq!(next_close_code(&mut client).await, Some(3000));
}

#[tokio::test]
async fn a_sequence_violation_still_marks_the_conversation_inactive() {
    let (addr, state) = spawn_server(test_config()).await;
    let session_id = Uuid::new_v4().to_string();
    let conversation_id = Uuid::new_v4();
    let mut client = connect(addr, Some(&session_id), API_KEY).await;

    client
        .send(open_message(&session_id, 1, conversation_id, stereo_and_mono_media()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "opened");

    let ping = json!({
        "version": "2", "type": "ping", "seq": 9, "id": session_id,
        "parameters": {}
    });
    client.send(Message::Text(ping.to_string().into())).await.unwrap();
    assert_eq!(next_json(&mut client).await["type"], "disconnect");

    // the disconnect gets the same teardown as a dropped connection
    for _ in 0..50 {
        let conversation = state.store.get(conversation_id).await.unwrap().unwrap();
        if !conversation.active && !state.sessions.registry().contains(&session_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("seq-mismatch disconnect left the conversation active");
}

#[tokio::test]
async fn pings_are_answered_and_rtt_is_recorded() {
    let (addr, state) = spawn_server(test_config()).await;
    let session_id = Uuid::new_v4().to_string();
    let conversation_id = Uuid::new_v4();
    let mut client = connect(addr, Some(&session_id), API_KEY).await;

    client
        .send(open_message(&session_id, 1, conversation_id, stereo_and_mono_media()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "opened");

    let ping = json!({
        "version": "2", "type": "ping", "seq": 2, "id": session_id,
        "parameters": {"rtt": "PT0.05S"}
    });
    client.send(Message::Text(ping.to_string().into())).await.unwrap();

    let pong = next_json(&mut client).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["seq"], 2);
    assert_eq!(pong["clientseq"], 2);

    // the rtt append runs on the same task, so it has landed by now
    let conversation = state.store.get(conversation_id).await.unwrap().unwrap();
    assert_eq!(conversation.rtt, vec!["PT0.05S".to_string()]);
}

#[tokio::test]
async fn closing_with_reason_end_finishes_the_session() {
    let (addr, state) = spawn_server(test_config()).await;
    let session_id = Uuid::new_v4().to_string();
    let conversation_id = Uuid::new_v4();
    let mut client = connect(addr, Some(&session_id), API_KEY).await;

    client
        .send(open_message(&session_id, 1, conversation_id, stereo_and_mono_media()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "opened");

    let close = json!({
        "version": "2", "type": "close", "seq": 2, "id": session_id,
        "parameters": {"reason": "end"}
    });
    client.send(Message::Text(close.to_string().into())).await.unwrap();

    let closed = next_json(&mut client).await;
    assert_eq!(closed["type"], "closed");
    assert_eq!(closed["clientseq"], 2);
    assert_eq!(next_close_code(&mut client).await, Some(1000));

    // teardown completes shortly after the closed reply
    for _ in 0..50 {
        let conversation = state.store.get(conversation_id).await.unwrap().unwrap();
        if !conversation.active && !state.sessions.registry().contains(&session_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session was not torn down after close");
}

#[tokio::test]
async fn closing_with_reason_end_emits_one_transcript_available() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (addr, _state) = spawn_server_with(test_config(), Some(publisher.clone())).await;
    let session_id = Uuid::new_v4().to_string();
    let conversation_id = Uuid::new_v4();
    let mut client = connect(addr, Some(&session_id), API_KEY).await;

    client
        .send(open_message(&session_id, 1, conversation_id, stereo_and_mono_media()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "opened");

    // the announcement runs off the protocol path, so give it a moment
    let mut started = Vec::new();
    for _ in 0..50 {
        started = publisher.named("session-started");
        if !started.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(started.len(), 1);
    assert_eq!(started[0]["aniName"], "John Doe");
    assert_eq!(started[0]["media"]["channels"], json!(["external", "internal"]));

    let close = json!({
        "version": "2", "type": "close", "seq": 2, "id": session_id,
        "parameters": {"reason": "end"}
    });
    client.send(Message::Text(close.to_string().into())).await.unwrap();

    // the transcript event is published before the closed reply is framed,
    // so it must already be recorded once the reply arrives
    assert_eq!(next_json(&mut client).await["type"], "closed");
    let available = publisher.named("transcript-available");
    assert_eq!(available.len(), 1);
    assert!(available[0]["transcript"].is_array());

    assert_eq!(next_close_code(&mut client).await, Some(1000));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(publisher.named("transcript-available").len(), 1);
    assert_eq!(publisher.named("session-started").len(), 1);
}

#[tokio::test]
async fn dropping_the_connection_marks_the_conversation_inactive() {
    let (addr, state) = spawn_server(test_config()).await;
    let session_id = Uuid::new_v4().to_string();
    let conversation_id = Uuid::new_v4();
    let mut client = connect(addr, Some(&session_id), API_KEY).await;

    client
        .send(open_message(&session_id, 1, conversation_id, stereo_and_mono_media()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "opened");

    drop(client);

    for _ in 0..50 {
        let conversation = state.store.get(conversation_id).await.unwrap().unwrap();
        if !conversation.active && !state.sessions.registry().contains(&session_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("dropped connection was not cleaned up");
}

#[tokio::test]
async fn the_conversations_api_requires_the_key_and_lists_records() {
    let (addr, state) = spawn_server(test_config()).await;
    let session_id = Uuid::new_v4().to_string();
    let conversation_id = Uuid::new_v4();
    let mut client = connect(addr, Some(&session_id), API_KEY).await;
    client
        .send(open_message(&session_id, 1, conversation_id, stereo_and_mono_media()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "opened");
    assert!(state.store.get(conversation_id).await.unwrap().is_some());

    let http = reqwest::Client::new();

    let unauthorized = http
        .get(format!("http://{addr}/api/conversations"))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), 401);

    let listed: Value = http
        .get(format!("http://{addr}/api/conversations?active=true"))
        .header("X-Api-Key", API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 1);
    assert_eq!(
        listed["conversations"][0]["id"],
        json!(conversation_id.to_string())
    );

    let missing = http
        .get(format!("http://{addr}/api/conversation/{}", Uuid::new_v4()))
        .header("X-Api-Key", API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unknown_conversation");

    let health: Value = http
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
}
