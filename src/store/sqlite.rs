//! SQLite-backed [`MessageStore`].

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::{MessageStore, SaveOutcome, TABLE_NAME};
use crate::error::StoreError;
use crate::models::{PersistedMessage, StoredSummary};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if missing) the database at a `sqlite:` URL.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let path = url
            .trim_start_matches("sqlite:")
            .trim_start_matches("//");
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {TABLE_NAME} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_hash TEXT NOT NULL UNIQUE,
                message_date TEXT NOT NULL,
                raw_message TEXT NOT NULL,
                parsed_data TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_content_hash ON {TABLE_NAME}(content_hash)"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_message_date ON {TABLE_NAME}(message_date)"
        ))
        .execute(&self.pool)
        .await?;

        tracing::info!("Table '{}' and indexes initialized", TABLE_NAME);
        Ok(())
    }

    async fn is_new(&self, content_hash: &str) -> Result<bool, StoreError> {
        let existing: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT 1 FROM {TABLE_NAME} WHERE content_hash = ?"
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
            INSERT INTO {TABLE_NAME} (content_hash, message_date, raw_message, parsed_data, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(content_hash) DO NOTHING
            "#
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
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {TABLE_NAME}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<StoredSummary>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT content_hash, message_date, created_at FROM {TABLE_NAME} ORDER BY message_date DESC, id DESC LIMIT ?"
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
