//! AudioHook control-channel message types.
//!
//! Both directions share the same envelope:
//! `{version, type, seq, clientseq/serverseq, id, position?, parameters}`.
//! Sequence numbers are per-direction, strictly increasing counters; the
//! protocol-level ping/pong is distinct from WebSocket ping/pong frames
//! (which this protocol does not use).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use audiohook_core::models::MediaFormat;

pub const PROTOCOL_VERSION: &str = "2";

/// Message types the client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientMessageType {
    Open,
    Ping,
    Update,
    Close,
    /// Forward-compatibility: unknown types are logged and ignored.
    #[serde(other)]
    Unknown,
}

/// Message types the server sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMessageType {
    Opened,
    Pong,
    Closed,
    Disconnect,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectReason {
    Error,
    Unauthorized,
}

/// Inbound control message envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub version: String,
    #[serde(rename = "type")]
    pub kind: ClientMessageType,
    pub seq: u64,
    #[serde(default)]
    pub serverseq: u64,
    /// The session id, echoed on every message of the connection.
    pub id: String,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

/// Outbound control message envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    pub version: &'static str,
    #[serde(rename = "type")]
    pub kind: ServerMessageType,
    pub seq: u64,
    pub clientseq: u64,
    pub id: String,
    pub parameters: Value,
}

impl ServerMessage {
    pub fn new(kind: ServerMessageType, seq: u64, clientseq: u64, id: &str, parameters: Value) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            seq,
            clientseq,
            id: id.to_string(),
            parameters,
        }
    }
}

/// Parameters of the open transaction.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenParameters {
    pub conversation_id: Uuid,
    pub participant: Participant,
    #[serde(default)]
    pub media: Vec<MediaFormat>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub ani: String,
    pub ani_name: String,
    pub dnis: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PingParameters {
    #[serde(default)]
    pub rtt: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateParameters {
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    End,
    Error,
    Disconnect,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloseParameters {
    pub reason: CloseReason,
}
