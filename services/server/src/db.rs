//! Postgres-backed conversation store.
//!
//! Conversations are stored as one JSONB document per row; the `active`
//! column is duplicated out of the document so listings can filter without
//! deserializing. Appends mutate the document in place with `jsonb_set`, so
//! concurrent appenders never lose entries.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::json;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::info;
use uuid::Uuid;

use audiohook_core::models::{Conversation, SummaryItem, TranscriptItem};
use audiohook_core::store::ConversationStore;

pub struct PostgresConversationStore {
    pool: PgPool,
}

impl PostgresConversationStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("connected to the conversation database");
        Ok(Self { pool })
    }

    async fn append_json(&self, id: Uuid, field: &str, element: serde_json::Value) -> Result<()> {
        let path = format!("{{{field}}}");
        let result = sqlx::query(
            "UPDATE conversations
             SET data = jsonb_set(data, $2::text[], COALESCE(data->$3, '[]'::jsonb) || $4::jsonb),
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(path)
        .bind(field)
        .bind(json!([element]))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("unknown conversation {id}");
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for PostgresConversationStore {
    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        let row: Option<(Json<Conversation>,)> =
            sqlx::query_as("SELECT data FROM conversations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(conversation),)| conversation))
    }

    async fn set(&self, conversation: Conversation) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversations (id, session_id, active, data, updated_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (id) DO UPDATE
             SET session_id = EXCLUDED.session_id,
                 active = EXCLUDED.active,
                 data = EXCLUDED.data,
                 updated_at = now()",
        )
        .bind(conversation.id)
        .bind(&conversation.session_id)
        .bind(conversation.active)
        .bind(Json(&conversation))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        sqlx::query(
            "UPDATE conversations
             SET active = $2,
                 data = jsonb_set(data, '{active}', to_jsonb($2::boolean)),
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_rtt(&self, id: Uuid, rtt: String) -> Result<()> {
        self.append_json(id, "rtt", json!(rtt)).await
    }

    async fn append_transcript(&self, id: Uuid, item: TranscriptItem) -> Result<()> {
        self.append_json(id, "transcript", serde_json::to_value(item)?)
            .await
    }

    async fn append_summary(&self, id: Uuid, item: SummaryItem) -> Result<()> {
        self.append_json(id, "summary", serde_json::to_value(item)?)
            .await
    }

    async fn list(&self, active: Option<bool>) -> Result<Vec<Conversation>> {
        let rows: Vec<(Json<Conversation>,)> = sqlx::query_as(
            "SELECT data FROM conversations
             WHERE $1::boolean IS NULL OR active = $1
             ORDER BY updated_at DESC",
        )
        .bind(active)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(Json(conversation),)| conversation)
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
