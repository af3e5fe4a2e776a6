//! Knowledge-file uploads.
//!
//! An upload lands in the owner's knowledge store, creating the owner's
//! assistant and store on first use. A file with the same name and kind
//! replaces the previous one; the old remote file is removed only after
//! the local record has switched over, so an active file always exists.

use std::sync::Arc;

use chatrelay_config::AppConfig;
use chatrelay_core::assistant::{AssistantApi, AssistantSpec};
use chatrelay_core::error::{RelayError, Result};
use chatrelay_core::store::{ConversationStore, FileKind, FileRecord};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::locks::ConversationLocks;

pub fn assistant_name(profile_name: &str) -> String {
    format!("{profile_name}-asst")
}

pub fn store_name(profile_name: &str) -> String {
    format!("vector-store_{profile_name}")
}

pub struct KnowledgeUploader {
    api: Arc<dyn AssistantApi>,
    store: Arc<dyn ConversationStore>,
    model: String,
    instructions: String,
    locks: ConversationLocks,
}

impl KnowledgeUploader {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        store: Arc<dyn ConversationStore>,
        model: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            api,
            store,
            model: model.into(),
            instructions: instructions.into(),
            locks: ConversationLocks::new(),
        }
    }

    pub fn from_config(
        api: Arc<dyn AssistantApi>,
        store: Arc<dyn ConversationStore>,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            api,
            store,
            config.assistant.model.clone(),
            config.assistant.system_prompt.clone(),
        )
    }

    /// Upload `bytes` as `file_name` for `profile_name`; returns the new file id.
    pub async fn upload(
        &self,
        profile_name: &str,
        file_name: &str,
        bytes: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let owner_id = self
            .store
            .get_owner_by_profile(profile_name)
            .await?
            .ok_or_else(|| RelayError::UnknownProfile(profile_name.to_string()))?;

        // Uploads for one owner share the assistant and store they create.
        let lock_key = owner_id.to_string();
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            guard = self.locks.acquire(&lock_key) => guard,
        };

        let assistant_id = self.resolve_assistant(profile_name, owner_id, cancel).await?;
        let store_id = self
            .resolve_store(profile_name, &assistant_id, cancel)
            .await?;

        let kind = FileKind::from_file_name(file_name);
        let size = bytes.len();
        let file_id = self.api.upload_file(file_name, bytes, cancel).await?;
        if let Err(e) = self.api.attach_file(&store_id, &file_id, cancel).await {
            warn!(file_id = %file_id, store_id = %store_id, error = %e, "Failed to attach file, removing it");
            if let Err(cleanup) = self.api.delete_file(&file_id, cancel).await {
                warn!(file_id = %file_id, error = %cleanup, "Failed to delete unattached file");
            }
            return Err(e);
        }
        debug!(file_id = %file_id, store_id = %store_id, size, "File attached");

        let record = FileRecord {
            file_id: file_id.clone(),
            store_id: store_id.clone(),
            file_name: file_name.to_string(),
            kind,
        };
        let previous = match self.store.supersede_file(&record).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(file_id = %file_id, error = %e, "Failed to record upload, removing new file");
                self.discard_remote(&store_id, &file_id, cancel).await;
                return Err(e.into());
            }
        };

        if let Some(old_id) = previous.filter(|old| *old != file_id) {
            self.discard_remote(&store_id, &old_id, cancel).await;
            info!(file_id = %file_id, replaced = %old_id, file_name, "Knowledge file replaced");
        } else {
            info!(file_id = %file_id, file_name, kind = kind.as_str(), "Knowledge file added");
        }

        Ok(file_id)
    }

    async fn resolve_assistant(
        &self,
        profile_name: &str,
        owner_id: i64,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if let Some(id) = self.store.get_assistant(owner_id).await? {
            return Ok(id);
        }

        let spec = AssistantSpec {
            name: assistant_name(profile_name),
            model: self.model.clone(),
            instructions: self.instructions.clone(),
        };
        let id = self.api.create_assistant(&spec, cancel).await?;
        self.store.save_assistant(&id, &spec.name, owner_id).await?;
        info!(assistant_id = %id, owner_id, "Created assistant");
        Ok(id)
    }

    async fn resolve_store(
        &self,
        profile_name: &str,
        assistant_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if let Some(id) = self.store.get_store(assistant_id).await? {
            return Ok(id);
        }

        let name = store_name(profile_name);
        let id = match self.api.find_vector_store(&name, cancel).await? {
            Some(id) => {
                debug!(store_id = %id, name = %name, "Found existing knowledge store");
                id
            }
            None => {
                let id = self.api.create_vector_store(&name, cancel).await?;
                info!(store_id = %id, name = %name, "Created knowledge store");
                id
            }
        };
        self.api.link_vector_store(assistant_id, &id, cancel).await?;
        self.store.save_store(&id, &name, assistant_id).await?;
        Ok(id)
    }

    /// Best-effort removal of a remote file; failures are only logged.
    async fn discard_remote(&self, store_id: &str, file_id: &str, cancel: &CancellationToken) {
        if let Err(e) = self.api.detach_file(store_id, file_id, cancel).await {
            warn!(file_id, store_id, error = %e, "Failed to detach file");
        }
        if let Err(e) = self.api.delete_file(file_id, cancel).await {
            warn!(file_id, error = %e, "Failed to delete file");
        }
    }
}
