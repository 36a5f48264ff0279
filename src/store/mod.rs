//! Idempotent message storage.
//!
//! The [`MessageStore`] trait is the only way the pipeline touches the
//! database. Both backends keep a single `consumption_messages` table with
//! a unique `content_hash` column; that constraint is what keeps concurrent
//! runs from storing a message twice.
//!
//! | Backend | URL | Module |
//! |---------|-----|--------|
//! | SQLite | `sqlite:./data/hc.sqlite` | [`sqlite`] |
//! | PostgreSQL | `postgres://user@host/db` | [`postgres`] |

pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{PersistedMessage, StoredSummary};

pub const TABLE_NAME: &str = "consumption_messages";

/// Result of [`MessageStore::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    /// A row with the same content hash already existed; nothing was written.
    AlreadyPresent,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Create schema, table and indexes when absent. Never drops or alters.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// `true` when no row with this hash exists yet.
    async fn is_new(&self, content_hash: &str) -> Result<bool, StoreError>;

    /// Insert the message unless its hash is already stored.
    async fn save(&self, message: &PersistedMessage) -> Result<SaveOutcome, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;

    /// Most recently stored rows, newest first.
    async fn recent(&self, limit: i64) -> Result<Vec<StoredSummary>, StoreError>;

    async fn close(&self);
}
