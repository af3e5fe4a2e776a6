//! History assembly for completion requests.
//!
//! Loads a bounded window of recent turns (the store returns them newest
//! first) and folds them, oldest first, between the system persona and the
//! new user message:
//!
//! ```text
//! [system] + reverse(recent turns) + [user]
//! ```

use std::sync::Arc;

use chatrelay_core::error::{RelayError, Result};
use chatrelay_core::message::{ChatMessage, HistoryTurn};
use chatrelay_core::store::ConversationStore;

pub struct HistoryAssembler {
    store: Arc<dyn ConversationStore>,
    system_prompt: String,
    limit: usize,
}

impl HistoryAssembler {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        system_prompt: impl Into<String>,
        limit: usize,
    ) -> Self {
        Self {
            store,
            system_prompt: system_prompt.into(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The most recent turns, newest first, at most `limit` of them.
    pub async fn recent(&self, conversation_id: &str) -> Result<Vec<HistoryTurn>> {
        let mut turns = self
            .store
            .get_recent_turns(conversation_id, self.limit)
            .await
            .map_err(|e| RelayError::HistoryLoad(e.to_string()))?;
        turns.truncate(self.limit);
        Ok(turns)
    }

    /// Build the message list for `new_user_text` from newest-first `turns`.
    pub fn fold(&self, turns: Vec<HistoryTurn>, new_user_text: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(turns.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(turns.into_iter().rev().map(ChatMessage::from));
        messages.push(ChatMessage::user(new_user_text));
        messages
    }

    /// Load and fold in one step.
    pub async fn assemble(
        &self,
        conversation_id: &str,
        new_user_text: &str,
    ) -> Result<Vec<ChatMessage>> {
        let turns = self.recent(conversation_id).await?;
        Ok(self.fold(turns, new_user_text))
    }
}
