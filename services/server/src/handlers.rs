//! HTTP API handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use audiohook_core::models::Conversation;

use crate::models::{ConversationsResponse, HealthCheckResponse};
use crate::state::AppState;

pub enum ApiError {
    Unauthorized,
    NotFound { code: &'static str, message: String },
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid or missing API key.".to_string(),
            ),
            ApiError::NotFound { code, message } => (StatusCode::NOT_FOUND, code, message),
            ApiError::Internal(e) => {
                error!(error = ?e, "internal error serving API request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred.".to_string(),
                )
            }
        };
        let body = Json(json!({"error": {"code": code, "message": message}}));
        (status, body).into_response()
    }
}

/// API-key check for the read-only endpoints. The key is accepted either as
/// the `X-Api-Key` header or a `key` query parameter.
fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<(), ApiError> {
    let Some(expected) = &state.config.api_key else {
        return Ok(());
    };
    let header_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    let query_key = query.get("key").map(String::as_str);
    if header_key == Some(expected) || query_key == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<ConversationsResponse>, ApiError> {
    authorize(&state, &headers, &query)?;
    let active = match query.get("active").map(String::as_str) {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    };
    let conversations = state.store.list(active).await?;
    Ok(Json(ConversationsResponse {
        count: conversations.len(),
        conversations,
    }))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    authorize(&state, &headers, &query)?;
    let not_found = || ApiError::NotFound {
        code: "unknown_conversation",
        message: format!(
            "No conversation found for conversation ID '{id}'. Please verify the ID and try again."
        ),
    };
    let conversation_id = Uuid::parse_str(&id).map_err(|_| not_found())?;
    let conversation = state
        .store
        .get(conversation_id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(conversation))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    match state.health.check().await {
        Ok(()) => Json(HealthCheckResponse {
            status: "healthy",
            error: None,
        })
        .into_response(),
        Err(detail) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthCheckResponse {
                status: "unhealthy",
                error: Some(detail),
            }),
        )
            .into_response(),
    }
}
