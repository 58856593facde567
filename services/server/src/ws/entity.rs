//! Structured entities carried in server `event` messages.
//!
//! These mirror the transcript and agent-assist payload shapes the telephony
//! platform consumes; ids are fresh UUIDs per entity.

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntity {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: Uuid,
    pub channel_id: String,
    pub is_final: bool,
    pub offset: String,
    pub duration: String,
    pub alternatives: Vec<TranscriptAlternative>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptAlternative {
    pub confidence: f64,
    pub languages: Vec<String>,
    pub interpretations: Vec<TranscriptInterpretation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptInterpretation {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub transcript: String,
    pub tokens: Vec<TranscriptToken>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptToken {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: String,
    pub confidence: f64,
    pub offset: String,
    pub duration: String,
    pub language: String,
}

pub fn build_transcript_entity(
    channel_id: &str,
    transcript_text: &str,
    confidence: f64,
    is_final: bool,
    offset: &str,
    duration: &str,
    language: &str,
) -> TranscriptEntity {
    let tokens = transcript_text
        .split_whitespace()
        .map(|word| TranscriptToken {
            kind: "word",
            value: word.to_string(),
            confidence,
            offset: offset.to_string(),
            duration: duration.to_string(),
            language: language.to_string(),
        })
        .collect();

    TranscriptEntity {
        kind: "transcript",
        id: Uuid::new_v4(),
        channel_id: channel_id.to_string(),
        is_final,
        offset: offset.to_string(),
        duration: duration.to_string(),
        alternatives: vec![TranscriptAlternative {
            confidence,
            languages: vec![language.to_string()],
            interpretations: vec![TranscriptInterpretation {
                kind: "display",
                transcript: transcript_text.to_string(),
                tokens,
            }],
        }],
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentAssistEntity {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: Uuid,
    pub utterances: Vec<AgentAssistUtterance>,
    pub suggestions: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAssistUtterance {
    pub id: Uuid,
    pub position: String,
    pub duration: String,
    pub text: String,
    pub language: String,
    pub confidence: f64,
    pub channel: String,
    pub is_final: bool,
}

pub fn build_agent_assist_utterance(
    position: &str,
    text: &str,
    language: &str,
    confidence: f64,
    channel: &str,
    is_final: bool,
    duration: &str,
) -> AgentAssistUtterance {
    AgentAssistUtterance {
        id: Uuid::new_v4(),
        position: position.to_string(),
        duration: duration.to_string(),
        text: text.to_string(),
        language: language.to_string(),
        confidence,
        channel: channel.to_string(),
        is_final,
    }
}

pub fn build_agent_assist_entity(utterances: Vec<AgentAssistUtterance>) -> AgentAssistEntity {
    AgentAssistEntity {
        kind: "agentassist",
        id: Uuid::new_v4(),
        utterances,
        // Suggestions (FAQ/article hits) are reserved for a knowledge-base
        // integration; the payload shape keeps the field so consumers need
        // no schema change.
        suggestions: vec![],
    }
}
