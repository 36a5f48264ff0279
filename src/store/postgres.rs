//! PostgreSQL-backed [`MessageStore`].
//!
//! The table lives in a configurable schema. The schema name is validated
//! as a plain identifier at config load, so it is safe to interpolate.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

use super::{MessageStore, SaveOutcome, TABLE_NAME};
use crate::error::StoreError;
use crate::models::{PersistedMessage, StoredSummary};

pub struct PgStore {
    pool: PgPool,
    schema: String,
}

impl PgStore {
    pub async fn connect(url: &str, schema: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;

        Ok(Self {
            pool,
            schema: schema.to_string(),
        })
    }

    fn table(&self) -> String {
        format!("\"{}\".{}", self.schema, TABLE_NAME)
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        // The role may lack CREATE on the database while the schema already exists.
        if let Err(e) = sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", self.schema))
            .execute(&self.pool)
            .await
        {
            tracing::warn!("Could not create schema '{}': {}", self.schema, e);
        }

        let table = self.table();
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id SERIAL PRIMARY KEY,
                content_hash VARCHAR(64) NOT NULL UNIQUE,
                message_date DATE NOT NULL,
                raw_message TEXT NOT NULL,
                parsed_data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_content_hash ON {table}(content_hash)"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_message_date ON {table}(message_date)"
        ))
        .execute(&self.pool)
        .await?;

        tracing::info!("Table '{}' and indexes initialized", table);
        Ok(())
    }

    async fn is_new(&self, content_hash: &str) -> Result<bool, StoreError> {
        let existing: Option<i32> = sqlx::query_scalar(&format!(
            "SELECT 1 FROM {} WHERE content_hash = $1",
            self.table()
        ))
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(existing.is_none())
    }

    async fn save(&self, message: &PersistedMessage) -> Result<SaveOutcome, StoreError> {
        let parsed = serde_json::to_string(&message.parsed_data)?;
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {} (content_hash, message_date, raw_message, parsed_data, created_at)
            VALUES ($1, $2, $3, $4::jsonb, $5)
            ON CONFLICT (content_hash) DO NOTHING
            "#,
            self.table()
        ))
        .bind(message.content_hash.as_str())
        .bind(message.message_date)
        .bind(&message.raw_body)
        .bind(parsed)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            SaveOutcome::AlreadyPresent
        } else {
            SaveOutcome::Inserted
        })
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table()))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<StoredSummary>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT content_hash, message_date, created_at FROM {} ORDER BY message_date DESC, id DESC LIMIT $1",
            self.table()
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(StoredSummary {
                    content_hash: row.try_get("content_hash")?,
                    message_date: row.try_get("message_date")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
