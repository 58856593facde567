use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use audiohook_core::events::{EventPublisher, WebhookEventPublisher};
use audiohook_core::store::{ConversationStore, InMemoryConversationStore};
use audiohook_server::config::Config;
use audiohook_server::db::PostgresConversationStore;
use audiohook_server::health::{BlobStorage, HealthHandler, HttpBlobStorage};
use audiohook_server::router::build_router;
use audiohook_server::speech;
use audiohook_server::state::AppState;
use audiohook_server::ws::session::{SessionManager, SessionRegistry, SessionSender};

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let config = Arc::new(Config::from_env()?);

    let store: Arc<dyn ConversationStore> = match &config.database_url {
        Some(url) => Arc::new(PostgresConversationStore::connect(url).await?),
        None => {
            warn!("DATABASE_URL not set, conversations are kept in memory only");
            Arc::new(InMemoryConversationStore::new())
        }
    };

    let publisher: Option<Arc<dyn EventPublisher>> = config
        .event_webhook_url
        .clone()
        .map(|url| Arc::new(WebhookEventPublisher::new(url)) as _);
    let blob: Option<Arc<dyn BlobStorage>> = config
        .blob_storage_url
        .clone()
        .map(|url| Arc::new(HttpBlobStorage::new(url)) as _);

    let registry = SessionRegistry::default();
    let sender = SessionSender::new(registry.clone(), publisher.clone());
    let speech = speech::from_config(&config, sender.clone(), store.clone());
    if speech.is_none() {
        warn!("SPEECH_PROVIDER not set, transcription is disabled");
    }

    let health = Arc::new(HealthHandler::new(
        store.clone(),
        blob,
        publisher.clone(),
        HEALTH_PROBE_TIMEOUT,
    ));
    let sessions = Arc::new(SessionManager::new(
        registry,
        sender,
        store.clone(),
        speech,
        publisher,
        config.clone(),
    ));

    let state = Arc::new(AppState {
        sessions: sessions.clone(),
        store,
        health,
        config: config.clone(),
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    sessions.close().await;
    Ok(())
}
