//! Avito messenger client.
//!
//! Sends replies, marks chats read and reads the listing a chat is about.

use async_trait::async_trait;
use chatrelay_core::error::Result;
use chatrelay_core::messenger::{ChatContext, Messenger};
use chatrelay_transport::{OutboundRequest, RetryingTransport};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct AvitoMessenger {
    base_url: String,
    token: String,
    transport: RetryingTransport,
}

impl AvitoMessenger {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        transport: RetryingTransport,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            transport,
        }
    }

    fn chat_url(&self, version: &str, account_id: i64, chat_id: &str) -> String {
        format!(
            "{}/messenger/{version}/accounts/{account_id}/chats/{chat_id}",
            self.base_url
        )
    }
}

#[async_trait]
impl Messenger for AvitoMessenger {
    async fn send_message(
        &self,
        account_id: i64,
        chat_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let body = ApiSendMessage {
            message: ApiText { text },
            kind: "text",
        };
        let url = format!("{}/messages", self.chat_url("v1", account_id, chat_id));
        let request = OutboundRequest::post(url).bearer(&self.token).json(&body)?;

        let sent: ApiSentMessage = self.transport.execute_json(&request, cancel).await?;
        debug!(chat_id, message_id = %sent.id, "Reply delivered");
        Ok(())
    }

    async fn mark_read(
        &self,
        account_id: i64,
        chat_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let url = format!("{}/read", self.chat_url("v1", account_id, chat_id));
        let request = OutboundRequest::post(url).bearer(&self.token);
        let _: ApiOk = self.transport.execute_json(&request, cancel).await?;
        Ok(())
    }

    async fn chat_context(
        &self,
        account_id: i64,
        chat_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatContext> {
        let request = OutboundRequest::get(self.chat_url("v2", account_id, chat_id))
            .bearer(&self.token);
        let info: ApiChatInfo = self.transport.execute_json(&request, cancel).await?;

        let value = info.context.map(|c| c.value).unwrap_or_default();
        Ok(ChatContext {
            title: value.title,
            price: value.price_string,
        })
    }
}

// --- Messenger API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiSendMessage<'a> {
    message: ApiText<'a>,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Serialize)]
struct ApiText<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiSentMessage {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiOk {
    #[allow(dead_code)]
    #[serde(default)]
    ok: bool,
}

#[derive(Debug, Deserialize)]
struct ApiChatInfo {
    #[serde(default)]
    context: Option<ApiChatContext>,
}

#[derive(Debug, Deserialize)]
struct ApiChatContext {
    #[serde(default)]
    value: ApiListing,
}

#[derive(Debug, Default, Deserialize)]
struct ApiListing {
    #[serde(default)]
    title: String,
    #[serde(default)]
    price_string: String,
}
