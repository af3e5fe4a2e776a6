//! ConversationStore trait: local persistence of turns and identifiers.
//!
//! The store maps platform identifiers onto assistant-service identifiers
//! (owner → assistant, conversation → thread, assistant → knowledge store,
//! logical file → uploaded file) and keeps the exchanged turns.
//!
//! Implementations: SQLite (default), PostgreSQL, in-memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::{HistoryTurn, Turn};

/// The thread a conversation is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRef {
    pub thread_id: String,
    pub assistant_id: String,
}

/// What an uploaded knowledge file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Free-text instructions
    Instructions,
    /// Structured (JSON) assertions
    Assertions,
}

impl FileKind {
    /// Pick the kind from a file name: `.json` files are assertions.
    pub fn from_file_name(name: &str) -> Self {
        let is_json = std::path::Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            FileKind::Assertions
        } else {
            FileKind::Instructions
        }
    }

    /// The short tag stored in the `files.file_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Instructions => "instr",
            FileKind::Assertions => "assrt",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "instr" => Some(FileKind::Instructions),
            "assrt" => Some(FileKind::Assertions),
            _ => None,
        }
    }
}

/// The active uploaded file for `(store_id, file_name, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub store_id: String,
    pub file_name: String,
    pub kind: FileKind,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Backend name for logs (e.g. "sqlite").
    fn name(&self) -> &str;

    async fn get_binding(&self, conversation_id: &str) -> Result<Option<ThreadRef>, StoreError>;

    /// Insert-only. Binding the same conversation twice is an error.
    async fn create_binding(
        &self,
        conversation_id: &str,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<(), StoreError>;

    async fn get_assistant(&self, owner_id: i64) -> Result<Option<String>, StoreError>;

    async fn save_assistant(
        &self,
        assistant_id: &str,
        name: &str,
        owner_id: i64,
    ) -> Result<(), StoreError>;

    /// At most `limit` turns, most recent first.
    ///
    /// Ties on `created_at` fall back to insertion order. An unknown
    /// conversation yields an empty list.
    async fn get_recent_turns(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryTurn>, StoreError>;

    /// Persist both turns atomically; on error neither is visible.
    async fn save_turn_pair(&self, user: &Turn, assistant: &Turn) -> Result<(), StoreError>;

    async fn get_store(&self, assistant_id: &str) -> Result<Option<String>, StoreError>;

    async fn save_store(
        &self,
        store_id: &str,
        name: &str,
        assistant_id: &str,
    ) -> Result<(), StoreError>;

    async fn get_active_file(
        &self,
        store_id: &str,
        file_name: &str,
        kind: FileKind,
    ) -> Result<Option<String>, StoreError>;

    /// Replace the active file for the record's key in one transaction.
    ///
    /// Returns the id of the file that was superseded, if any.
    async fn supersede_file(&self, record: &FileRecord) -> Result<Option<String>, StoreError>;

    async fn get_owner_by_profile(&self, profile_name: &str) -> Result<Option<i64>, StoreError>;

    /// Create or update the owner a profile name maps to.
    async fn save_profile(&self, profile_name: &str, owner_id: i64) -> Result<(), StoreError>;
}
