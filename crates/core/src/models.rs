//! Domain models shared between the protocol engine and the stores.
//!
//! A `Conversation` is the durable record of one call: caller identity, the
//! negotiated media descriptor, and the append-only transcript/summary/rtt
//! sequences. Session state is deliberately *not* part of this module; it is
//! ephemeral and lives with the connection that owns it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One media descriptor offered by (or selected for) a session.
///
/// AudioHook offers a list of these in the open transaction; the server
/// commits to exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFormat {
    /// Always "audio" in practice.
    #[serde(rename = "type")]
    pub kind: String,
    /// Wire encoding, e.g. "PCMU".
    pub format: String,
    /// Channel names; two-channel call recordings use "external"/"internal".
    pub channels: Vec<String>,
    /// Sample rate in Hz.
    pub rate: u32,
}

impl MediaFormat {
    /// True for the stereo call-recording layout: exactly two channels
    /// named "internal" and "external" (in either order).
    pub fn is_stereo_call(&self) -> bool {
        self.channels.len() == 2
            && self.channels.iter().any(|c| c == "internal")
            && self.channels.iter().any(|c| c == "external")
    }
}

/// Select the media descriptor the server commits to: prefer the stereo
/// internal+external layout, otherwise fall back to the first offer.
pub fn select_media(offered: &[MediaFormat]) -> Option<&MediaFormat> {
    offered
        .iter()
        .find(|m| m.is_stereo_call())
        .or_else(|| offered.first())
}

/// One finalized recognition result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
    pub text: String,
    /// ISO 8601 duration from stream start, e.g. "PT1.23S".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// One agent-assist summary produced during the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryItem {
    pub text: String,
    /// Stream position of the transcript fragment that triggered the summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription_end: Option<String>,
}

fn default_active() -> bool {
    true
}

/// Durable record of one conversation, keyed by the platform's conversation id.
///
/// At most one live session appends to a given conversation at a time; the
/// store is the fan-in point and the protocol engine never shares one id
/// across connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub session_id: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub ani: String,
    pub ani_name: String,
    pub dnis: String,
    /// The media descriptor selected during the open transaction.
    pub media: MediaFormat,
    /// Stream position (ISO 8601 duration) at the last update.
    pub position: String,
    #[serde(default)]
    pub rtt: Vec<String>,
    #[serde(default)]
    pub transcript: Vec<TranscriptItem>,
    #[serde(default)]
    pub summary: Vec<SummaryItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(channels: &[&str]) -> MediaFormat {
        MediaFormat {
            kind: "audio".to_string(),
            format: "PCMU".to_string(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            rate: 8000,
        }
    }

    #[test]
    fn selects_stereo_internal_external_over_mono() {
        let offered = vec![
            media(&["external"]),
            media(&["external", "internal"]),
            media(&["internal"]),
        ];
        let selected = select_media(&offered).unwrap();
        assert_eq!(selected.channels, vec!["external", "internal"]);
    }

    #[test]
    fn channel_order_does_not_matter() {
        let offered = vec![media(&["internal", "external"])];
        assert!(select_media(&offered).unwrap().is_stereo_call());
    }

    #[test]
    fn falls_back_to_first_offer_without_stereo_pair() {
        let offered = vec![media(&["external"]), media(&["internal"])];
        let selected = select_media(&offered).unwrap();
        assert_eq!(selected.channels, vec!["external"]);
    }

    #[test]
    fn two_channels_of_the_same_name_are_not_a_stereo_call() {
        let offered = vec![media(&["external", "external"]), media(&["internal"])];
        let selected = select_media(&offered).unwrap();
        assert_eq!(selected.channels, vec!["external", "external"]);
    }

    #[test]
    fn no_offers_selects_nothing() {
        assert!(select_media(&[]).is_none());
    }

    #[test]
    fn conversation_round_trips_through_json() {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            session_id: "e160e428-53e2-487c-977d-96989bf5c99d".to_string(),
            active: true,
            ani: "+1-555-555-1234".to_string(),
            ani_name: "John Doe".to_string(),
            dnis: "+1-800-555-6789".to_string(),
            media: media(&["external", "internal"]),
            position: "PT0S".to_string(),
            rtt: vec!["PT0.02S".to_string()],
            transcript: vec![TranscriptItem {
                channel: Some(1),
                text: "Hello.".to_string(),
                start: Some("PT0.10S".to_string()),
                end: Some("PT0.90S".to_string()),
            }],
            summary: vec![],
        };

        let json = serde_json::to_string(&conversation).unwrap();
        let back: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, conversation.id);
        assert_eq!(back.transcript, conversation.transcript);
        assert!(back.active);
    }

    #[test]
    fn conversation_active_defaults_to_true() {
        let json = r#"{
            "id": "090eaa2f-72fa-480a-83e0-8667ff89c0ec",
            "session_id": "s",
            "ani": "a",
            "ani_name": "n",
            "dnis": "d",
            "media": {"type":"audio","format":"PCMU","channels":["external"],"rate":8000},
            "position": "PT0S"
        }"#;
        let conversation: Conversation = serde_json::from_str(json).unwrap();
        assert!(conversation.active);
        assert!(conversation.transcript.is_empty());
    }
}
