//! PostgreSQL conversation store.
//!
//! Same schema and semantics as the SQLite store; `created_at` is kept as
//! epoch seconds (`BIGINT`) so ordering matches across backends.
//!
//! # Feature gate
//!
//! ```toml
//! chatrelay-store = { workspace = true, features = ["postgres"] }
//! ```

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use chatrelay_core::error::StoreError;
use chatrelay_core::message::{HistoryTurn, Role, Turn};
use chatrelay_core::store::{ConversationStore, FileKind, FileRecord, ThreadRef};

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "messages table",
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id          BIGSERIAL PRIMARY KEY,
            chat_id     TEXT NOT NULL,
            user_id     BIGINT NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  BIGINT NOT NULL
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
            user_id     BIGINT NOT NULL UNIQUE
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
            user_id      BIGINT NOT NULL
        )
        "#,
    ),
];

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Storage(format!("PostgreSQL connection failed: {e}")))?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Connected to PostgreSQL conversation store");
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for (what, sql) in MIGRATIONS {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }
        debug!("PostgreSQL migrations complete");
        Ok(())
    }

    async fn insert_turn(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        turn: &Turn,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (chat_id, user_id, role, content, created_at) VALUES ($1, $2, $3, $4, $5)",
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
impl ConversationStore for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn get_binding(&self, conversation_id: &str) -> Result<Option<ThreadRef>, StoreError> {
        let row = sqlx::query("SELECT thread_id, asst_id FROM threads WHERE chat_id = $1")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to get thread: {e}")))?;

        Ok(row.map(|r| ThreadRef {
            thread_id: r.get("thread_id"),
            assistant_id: r.get("asst_id"),
        }))
    }

    async fn create_binding(
        &self,
        conversation_id: &str,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO threads (chat_id, thread_id, asst_id) VALUES ($1, $2, $3)")
            .bind(conversation_id)
            .bind(thread_id)
            .bind(assistant_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to save thread: {e}")))?;
        Ok(())
    }

    async fn get_assistant(&self, owner_id: i64) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("SELECT asst_id FROM assistants WHERE user_id = $1")
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to get assistant: {e}")))
    }

    async fn save_assistant(
        &self,
        assistant_id: &str,
        name: &str,
        owner_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO assistants (asst_id, asst_name, user_id) VALUES ($1, $2, $3)")
            .bind(assistant_id)
            .bind(name)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to save assistant: {e}")))?;
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
            WHERE chat_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(conversation_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Failed to get messages: {e}")))?;

        rows.iter()
            .map(|row| {
                let role: String = row.get("role");
                Ok(HistoryTurn {
                    role: Role::from_str(&role).map_err(StoreError::QueryFailed)?,
                    content: row.get("content"),
                })
            })
            .collect()
    }

    async fn save_turn_pair(&self, user: &Turn, assistant: &Turn) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to begin transaction: {e}")))?;

        Self::insert_turn(&mut tx, user).await?;
        Self::insert_turn(&mut tx, assistant).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to commit transaction: {e}")))?;
        Ok(())
    }

    async fn get_store(&self, assistant_id: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("SELECT store_id FROM v_stores WHERE asst_id = $1")
            .bind(assistant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to get store: {e}")))
    }

    async fn save_store(
        &self,
        store_id: &str,
        name: &str,
        assistant_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO v_stores (store_id, store_name, asst_id) VALUES ($1, $2, $3)")
            .bind(store_id)
            .bind(name)
            .bind(assistant_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to save store: {e}")))?;
        Ok(())
    }

    async fn get_active_file(
        &self,
        store_id: &str,
        file_name: &str,
        kind: FileKind,
    ) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar(
            "SELECT file_id FROM files WHERE store_id = $1 AND file_name = $2 AND file_type = $3",
        )
        .bind(store_id)
        .bind(file_name)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Failed to get file: {e}")))
    }

    async fn supersede_file(&self, record: &FileRecord) -> Result<Option<String>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to begin transaction: {e}")))?;

        let previous: Option<String> = sqlx::query_scalar(
            r#"
            DELETE FROM files
            WHERE store_id = $1 AND file_name = $2 AND file_type = $3
            RETURNING file_id
            "#,
        )
        .bind(&record.store_id)
        .bind(&record.file_name)
        .bind(record.kind.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("Failed to remove previous file: {e}")))?;

        sqlx::query(
            "INSERT INTO files (file_id, store_id, file_name, file_type) VALUES ($1, $2, $3, $4)",
        )
        .bind(&record.file_id)
        .bind(&record.store_id)
        .bind(&record.file_name)
        .bind(record.kind.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("Failed to save file: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to commit transaction: {e}")))?;
        Ok(previous)
    }

    async fn get_owner_by_profile(&self, profile_name: &str) -> Result<Option<i64>, StoreError> {
        sqlx::query_scalar("SELECT user_id FROM profiles WHERE profile_name = $1")
            .bind(profile_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to get profile: {e}")))
    }

    async fn save_profile(&self, profile_name: &str, owner_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO profiles (profile_name, user_id) VALUES ($1, $2)
            ON CONFLICT (profile_name) DO UPDATE SET user_id = EXCLUDED.user_id
            "#,
        )
        .bind(profile_name)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Failed to save profile: {e}")))?;
        Ok(())
    }
}
