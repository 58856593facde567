//! HTTP API response shapes.

use serde::Serialize;

use audiohook_core::models::Conversation;

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub count: usize,
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}
