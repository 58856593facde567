//! Route table.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::{Any, CorsLayer};

use crate::handlers;
use crate::state::AppState;
use crate::ws;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::health_check))
        .route("/api/conversations", get(handlers::list_conversations))
        .route("/api/conversation/{id}", get(handlers::get_conversation))
        .route("/audiohook/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}
