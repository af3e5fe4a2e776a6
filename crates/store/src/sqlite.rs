//! SQLite conversation store.
//!
//! A single database file holds six tables:
//! - `messages`: exchanged turns, ordered by `(created_at, id)`
//! - `assistants`, `threads`, `v_stores`, `files`: identifier bindings
//! - `profiles`: profile name → owner id
//!
//! `files` carries a unique index on `(store_id, file_name, file_type)` so
//! at most one active file exists per logical name.

use async_trait::async_trait;
use chatrelay_core::error::StoreError;
use chatrelay_core::message::{HistoryTurn, Role, Turn};
use chatrelay_core::store::{ConversationStore, FileKind, FileRecord, ThreadRef};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "messages table",
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     TEXT NOT NULL,
            user_id     INTEGER NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        )
        "#,
    ),
    (
        "messages index",
        "CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, created_at DESC, id DESC)",
    ),
    (
        "assistants table",
        r#"
        CREATE TABLE IF NOT EXISTS assistants (
            asst_id     TEXT PRIMARY KEY,
            asst_name   TEXT NOT NULL,
            user_id     INTEGER NOT NULL UNIQUE
        )
        "#,
    ),
    (
        "threads table",
        r#"
        CREATE TABLE IF NOT EXISTS threads (
            chat_id     TEXT PRIMARY KEY,
            thread_id   TEXT NOT NULL,
            asst_id     TEXT NOT NULL
        )
        "#,
    ),
    (
        "v_stores table",
        r#"
        CREATE TABLE IF NOT EXISTS v_stores (
            store_id    TEXT PRIMARY KEY,
            store_name  TEXT NOT NULL,
            asst_id     TEXT NOT NULL UNIQUE
        )
        "#,
    ),
    (
        "files table",
        r#"
        CREATE TABLE IF NOT EXISTS files (
            file_id     TEXT PRIMARY KEY,
            store_id    TEXT NOT NULL,
            file_name   TEXT NOT NULL,
            file_type   TEXT NOT NULL
        )
        "#,
    ),
    (
        "files index",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_files_key ON files(store_id, file_name, file_type)",
    ),
    (
        "profiles table",
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            profile_name TEXT PRIMARY KEY,
            user_id      INTEGER NOT NULL
        )
        "#,
    ),
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and run migrations.
    ///
    /// `sqlite::memory:` gives an ephemeral database on a single pinned
    /// connection, which is what the tests use.
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite store initialized at {url}");
        Ok(store)
    }

    /// Wrap an existing pool, running migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for (what, sql) in MIGRATIONS {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }
        debug!("SQLite migrations complete");
        Ok(())
    }

    async fn insert_turn(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        turn: &Turn,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (chat_id, user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&turn.conversation_id)
        .bind(turn.user_id)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(turn.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT {} turn failed: {e}", turn.role)))?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_binding(&self, conversation_id: &str) -> Result<Option<ThreadRef>, StoreError> {
        let row = sqlx::query("SELECT thread_id, asst_id FROM threads WHERE chat_id = ?1")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("thread lookup: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ThreadRef {
            thread_id: row
                .try_get("thread_id")
                .map_err(|e| StoreError::QueryFailed(format!("thread_id column: {e}")))?,
            assistant_id: row
                .try_get("asst_id")
                .map_err(|e| StoreError::QueryFailed(format!("asst_id column: {e}")))?,
        }))
    }

    async fn create_binding(
        &self,
        conversation_id: &str,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO threads (chat_id, thread_id, asst_id) VALUES (?1, ?2, ?3)")
            .bind(conversation_id)
            .bind(thread_id)
            .bind(assistant_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("INSERT thread binding failed: {e}")))?;
        Ok(())
    }

    async fn get_assistant(&self, owner_id: i64) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("SELECT asst_id FROM assistants WHERE user_id = ?1")
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("assistant lookup: {e}")))
    }

    async fn save_assistant(
        &self,
        assistant_id: &str,
        name: &str,
        owner_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO assistants (asst_id, asst_name, user_id) VALUES (?1, ?2, ?3)")
            .bind(assistant_id)
            .bind(name)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("INSERT assistant failed: {e}")))?;
        Ok(())
    }

    async fn get_recent_turns(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryTurn>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT role, content FROM messages
            WHERE chat_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(conversation_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("history query: {e}")))?;

        rows.iter()
            .map(|row| {
                let role: String = row
                    .try_get("role")
                    .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
                let content: String = row
                    .try_get("content")
                    .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
                Ok(HistoryTurn {
                    role: Role::from_str(&role).map_err(StoreError::QueryFailed)?,
                    content,
                })
            })
            .collect()
    }

    async fn save_turn_pair(&self, user: &Turn, assistant: &Turn) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;

        // Dropping `tx` on an early return rolls back.
        Self::insert_turn(&mut tx, user).await?;
        Self::insert_turn(&mut tx, assistant).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;
        debug!(conversation_id = %user.conversation_id, "Stored turn pair");
        Ok(())
    }

    async fn get_store(&self, assistant_id: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("SELECT store_id FROM v_stores WHERE asst_id = ?1")
            .bind(assistant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("store lookup: {e}")))
    }

    async fn save_store(
        &self,
        store_id: &str,
        name: &str,
        assistant_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO v_stores (store_id, store_name, asst_id) VALUES (?1, ?2, ?3)")
            .bind(store_id)
            .bind(name)
            .bind(assistant_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("INSERT store failed: {e}")))?;
        Ok(())
    }

    async fn get_active_file(
        &self,
        store_id: &str,
        file_name: &str,
        kind: FileKind,
    ) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar(
            "SELECT file_id FROM files WHERE store_id = ?1 AND file_name = ?2 AND file_type = ?3",
        )
        .bind(store_id)
        .bind(file_name)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("file lookup: {e}")))
    }

    async fn supersede_file(&self, record: &FileRecord) -> Result<Option<String>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;

        let previous: Option<String> = sqlx::query_scalar(
            r#"
            DELETE FROM files
            WHERE store_id = ?1 AND file_name = ?2 AND file_type = ?3
            RETURNING file_id
            "#,
        )
        .bind(&record.store_id)
        .bind(&record.file_name)
        .bind(record.kind.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("DELETE previous file failed: {e}")))?;

        sqlx::query(
            "INSERT INTO files (file_id, store_id, file_name, file_type) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&record.file_id)
        .bind(&record.store_id)
        .bind(&record.file_name)
        .bind(record.kind.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT file failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;
        Ok(previous)
    }

    async fn get_owner_by_profile(&self, profile_name: &str) -> Result<Option<i64>, StoreError> {
        sqlx::query_scalar("SELECT user_id FROM profiles WHERE profile_name = ?1")
            .bind(profile_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("profile lookup: {e}")))
    }

    async fn save_profile(&self, profile_name: &str, owner_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO profiles (profile_name, user_id) VALUES (?1, ?2)
            ON CONFLICT(profile_name) DO UPDATE SET user_id = excluded.user_id
            "#,
        )
        .bind(profile_name)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT profile failed: {e}")))?;
        Ok(())
    }
}
