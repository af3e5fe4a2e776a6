//! In-memory store: for tests and ephemeral runs.
//!
//! Mirrors the SQL stores' semantics (insert-only bindings, atomic turn
//! pairs, newest-first history) and can be told to fail specific operations.

use async_trait::async_trait;
use chatrelay_core::error::StoreError;
use chatrelay_core::message::{HistoryTurn, Turn};
use chatrelay_core::store::{ConversationStore, FileKind, FileRecord, ThreadRef};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    turns: Vec<Turn>,
    bindings: HashMap<String, ThreadRef>,
    assistants: HashMap<i64, (String, String)>,
    stores: HashMap<String, (String, String)>,
    files: HashMap<(String, String, FileKind), String>,
    profiles: HashMap<String, i64>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    fail_turn_writes: AtomicBool,
    fail_history_reads: AtomicBool,
    fail_binding_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `save_turn_pair` fail without writing.
    pub fn fail_turn_writes(&self, fail: bool) {
        self.fail_turn_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every `get_recent_turns` fail.
    pub fn fail_history_reads(&self, fail: bool) {
        self.fail_history_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `create_binding` fail without writing.
    pub fn fail_binding_writes(&self, fail: bool) {
        self.fail_binding_writes.store(fail, Ordering::SeqCst);
    }

    /// All stored turns for a conversation, oldest first.
    pub async fn turns(&self, conversation_id: &str) -> Vec<Turn> {
        self.tables
            .read()
            .await
            .turns
            .iter()
            .filter(|t| t.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub async fn turn_count(&self) -> usize {
        self.tables.read().await.turns.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_binding(&self, conversation_id: &str) -> Result<Option<ThreadRef>, StoreError> {
        Ok(self.tables.read().await.bindings.get(conversation_id).cloned())
    }

    async fn create_binding(
        &self,
        conversation_id: &str,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<(), StoreError> {
        if self.fail_binding_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("binding writes disabled".into()));
        }
        let mut tables = self.tables.write().await;
        if tables.bindings.contains_key(conversation_id) {
            return Err(StoreError::Storage(format!(
                "conversation {conversation_id} is already bound"
            )));
        }
        tables.bindings.insert(
            conversation_id.to_string(),
            ThreadRef {
                thread_id: thread_id.to_string(),
                assistant_id: assistant_id.to_string(),
            },
        );
        Ok(())
    }

    async fn get_assistant(&self, owner_id: i64) -> Result<Option<String>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .assistants
            .get(&owner_id)
            .map(|(id, _)| id.clone()))
    }

    async fn save_assistant(
        &self,
        assistant_id: &str,
        name: &str,
        owner_id: i64,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.assistants.contains_key(&owner_id) {
            return Err(StoreError::Storage(format!(
                "owner {owner_id} already has an assistant"
            )));
        }
        tables
            .assistants
            .insert(owner_id, (assistant_id.to_string(), name.to_string()));
        Ok(())
    }

    async fn get_recent_turns(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryTurn>, StoreError> {
        if self.fail_history_reads.load(Ordering::SeqCst) {
            return Err(StoreError::QueryFailed("history reads disabled".into()));
        }

        let tables = self.tables.read().await;
        // Stable sort keeps insertion order for equal timestamps.
        let mut matching: Vec<(usize, &Turn)> = tables
            .turns
            .iter()
            .enumerate()
            .filter(|(_, t)| t.conversation_id == conversation_id)
            .collect();
        matching.sort_by(|(ia, a), (ib, b)| {
            b.created_at.cmp(&a.created_at).then(ib.cmp(ia))
        });

        Ok(matching
            .into_iter()
            .take(limit)
            .map(|(_, t)| HistoryTurn {
                role: t.role,
                content: t.content.clone(),
            })
            .collect())
    }

    async fn save_turn_pair(&self, user: &Turn, assistant: &Turn) -> Result<(), StoreError> {
        if self.fail_turn_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("turn writes disabled".into()));
        }
        let mut tables = self.tables.write().await;
        tables.turns.push(user.clone());
        tables.turns.push(assistant.clone());
        Ok(())
    }

    async fn get_store(&self, assistant_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .stores
            .get(assistant_id)
            .map(|(id, _)| id.clone()))
    }

    async fn save_store(
        &self,
        store_id: &str,
        name: &str,
        assistant_id: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.stores.contains_key(assistant_id) {
            return Err(StoreError::Storage(format!(
                "assistant {assistant_id} already has a store"
            )));
        }
        tables
            .stores
            .insert(assistant_id.to_string(), (store_id.to_string(), name.to_string()));
        Ok(())
    }

    async fn get_active_file(
        &self,
        store_id: &str,
        file_name: &str,
        kind: FileKind,
    ) -> Result<Option<String>, StoreError> {
        let key = (store_id.to_string(), file_name.to_string(), kind);
        Ok(self.tables.read().await.files.get(&key).cloned())
    }

    async fn supersede_file(&self, record: &FileRecord) -> Result<Option<String>, StoreError> {
        let key = (
            record.store_id.clone(),
            record.file_name.clone(),
            record.kind,
        );
        Ok(self
            .tables
            .write()
            .await
            .files
            .insert(key, record.file_id.clone()))
    }

    async fn get_owner_by_profile(&self, profile_name: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.tables.read().await.profiles.get(profile_name).copied())
    }

    async fn save_profile(&self, profile_name: &str, owner_id: i64) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .profiles
            .insert(profile_name.to_string(), owner_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::message::Role;

    #[tokio::test]
    async fn history_is_newest_first_and_bounded() {
        let store = InMemoryStore::new();
        for i in 0..3 {
            store
                .save_turn_pair(
                    &Turn::user("c1", 1, format!("q{i}"), i * 10),
                    &Turn::assistant("c1", 1, format!("a{i}"), i * 10),
                )
                .await
                .unwrap();
        }

        let turns = store.get_recent_turns("c1", 3).await.unwrap();
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["a2", "q2", "a1"]);
        assert_eq!(turns[0].role, Role::Assistant);
        assert!(store.get_recent_turns("c1", 0).await.unwrap().is_empty());
        assert!(store.get_recent_turns("c2", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_injection_leaves_no_partial_pair() {
        let store = InMemoryStore::new();
        store.fail_turn_writes(true);
        let result = store
            .save_turn_pair(&Turn::user("c1", 1, "q", 1), &Turn::assistant("c1", 1, "a", 2))
            .await;
        assert!(result.is_err());
        assert_eq!(store.turn_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_binding_rejected() {
        let store = InMemoryStore::new();
        store.create_binding("c1", "t1", "a1").await.unwrap();
        assert!(store.create_binding("c1", "t2", "a1").await.is_err());
        assert_eq!(store.get_binding("c1").await.unwrap().unwrap().thread_id, "t1");
    }

    #[tokio::test]
    async fn supersede_returns_previous() {
        let store = InMemoryStore::new();
        let record = FileRecord {
            file_id: "f1".into(),
            store_id: "vs".into(),
            file_name: "faq.txt".into(),
            kind: FileKind::Instructions,
        };
        assert_eq!(store.supersede_file(&record).await.unwrap(), None);
        let newer = FileRecord {
            file_id: "f2".into(),
            ..record
        };
        assert_eq!(store.supersede_file(&newer).await.unwrap().as_deref(), Some("f1"));
    }
}
