//! Shared application state.

use std::sync::Arc;

use audiohook_core::store::ConversationStore;

use crate::config::Config;
use crate::health::HealthHandler;
use crate::ws::session::SessionManager;

pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub store: Arc<dyn ConversationStore>,
    pub health: Arc<HealthHandler>,
    pub config: Arc<Config>,
}
