//! Conversation store implementations for chatrelay.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use chatrelay_core::error::StoreError;
use chatrelay_core::store::ConversationStore;
use std::sync::Arc;

/// Open the store a database URL points at.
///
/// `sqlite:` URLs need the `sqlite` feature, `postgres:`/`postgresql:` URLs
/// the `postgres` feature.
pub async fn open(url: &str) -> Result<Arc<dyn ConversationStore>, StoreError> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        #[cfg(feature = "postgres")]
        {
            return Ok(Arc::new(PostgresStore::connect(url).await?));
        }
        #[cfg(not(feature = "postgres"))]
        {
            return Err(StoreError::Storage(
                "PostgreSQL support not compiled in (enable the `postgres` feature)".into(),
            ));
        }
    }

    if url.starts_with("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            return Ok(Arc::new(SqliteStore::new(url).await?));
        }
        #[cfg(not(feature = "sqlite"))]
        {
            return Err(StoreError::Storage(
                "SQLite support not compiled in (enable the `sqlite` feature)".into(),
            ));
        }
    }

    Err(StoreError::Storage(format!(
        "Unsupported database URL scheme: {}",
        url.split(':').next().unwrap_or_default()
    )))
}
