use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::store::postgres::PgStore;
use crate::store::sqlite::SqliteStore;
use crate::store::MessageStore;

/// Open the store named by `store.url` and make sure its table exists.
pub async fn open_store(config: &StoreConfig) -> Result<Box<dyn MessageStore>, StoreError> {
    let url = config.url.trim();

    let store: Box<dyn MessageStore> = if url.starts_with("sqlite:") {
        Box::new(SqliteStore::connect(url).await?)
    } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Box::new(PgStore::connect(url, &config.schema).await?)
    } else {
        return Err(StoreError::UnsupportedUrl(url.to_string()));
    };

    store.ensure_schema().await?;
    Ok(store)
}
