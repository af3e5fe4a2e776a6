//! Messenger trait: the messaging platform the bot answers on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Listing context attached to a chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContext {
    pub title: String,
    pub price: String,
}

impl ChatContext {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.price.is_empty()
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Post a text message into a chat on behalf of `account_id`.
    async fn send_message(
        &self,
        account_id: i64,
        chat_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn mark_read(
        &self,
        account_id: i64,
        chat_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Fetch the listing the chat is about.
    async fn chat_context(
        &self,
        account_id: i64,
        chat_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatContext>;
}
