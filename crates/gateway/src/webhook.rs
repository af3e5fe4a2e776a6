//! Inbound messages from the messaging platform.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chatrelay_core::message::InboundMessage;

use crate::{ApiError, SharedState};

#[derive(Debug, Default, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub text: String,
}

/// The webhook payload: one chat message.
///
/// `user_id` is the account that owns the chat (the bot's side), and
/// `author_id` whoever wrote the message.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WebhookEnvelope {
    pub author_id: i64,
    pub chat_id: String,
    pub chat_type: String,
    pub content: MessageContent,
    pub created: i64,
    pub id: String,
    pub item_id: Option<i64>,
    pub read: Option<i64>,
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: i64,
}

impl WebhookEnvelope {
    fn is_valid(&self) -> bool {
        self.author_id != 0 && !self.chat_id.is_empty()
    }

    fn into_inbound(self) -> InboundMessage {
        InboundMessage {
            chat_id: self.chat_id,
            owner_id: self.user_id,
            text: self.content.text,
            created_at: self.created,
        }
    }
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub response: String,
}

pub async fn webhook_handler(
    State(state): State<SharedState>,
    payload: Result<Json<WebhookEnvelope>, JsonRejection>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Json(envelope) = payload.map_err(|rejection| {
        warn!(error = %rejection, "Rejected webhook body");
        match rejection {
            JsonRejection::MissingJsonContentType(_) => ApiError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Content-Type must be application/json",
            ),
            JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => {
                ApiError::bad_request("Bad request")
            }
            other => ApiError::new(other.status(), other.body_text()),
        }
    })?;

    if !envelope.is_valid() {
        info!(
            chat_id = %envelope.chat_id,
            author_id = envelope.author_id,
            "Invalid message received, skipping"
        );
        return Err(ApiError::bad_request("Invalid message data"));
    }

    info!(
        chat_id = %envelope.chat_id,
        message_id = %envelope.id,
        chat_type = %envelope.chat_type,
        message_type = %envelope.kind,
        "Webhook message received"
    );

    let message = envelope.into_inbound();
    let cancel = state.shutdown.child_token();

    let context = match state
        .messenger
        .chat_context(message.owner_id, &message.chat_id, &cancel)
        .await
    {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            warn!(chat_id = %message.chat_id, error = %e, "Failed to fetch chat context");
            None
        }
    };

    let reply = state
        .orchestrator
        .reply(&message, context.as_ref(), &cancel)
        .await
        .map_err(|e| {
            error!(chat_id = %message.chat_id, error = %e, "Failed to handle message");
            ApiError::from(e)
        })?;

    if state.deliver_replies {
        deliver(&state, &message, &reply, &cancel).await;
    }

    Ok(Json(WebhookResponse { response: reply }))
}

/// Mark the chat read and post the reply; failures are logged only.
async fn deliver(
    state: &SharedState,
    message: &InboundMessage,
    reply: &str,
    cancel: &CancellationToken,
) {
    let chat_id = message.chat_id.as_str();
    if let Err(e) = state
        .messenger
        .mark_read(message.owner_id, chat_id, cancel)
        .await
    {
        warn!(chat_id, error = %e, "Failed to mark chat read");
    }
    match state
        .messenger
        .send_message(message.owner_id, chat_id, reply, cancel)
        .await
    {
        Ok(()) => debug!(chat_id, "Reply delivered"),
        Err(e) => error!(chat_id, error = %e, "Failed to deliver reply"),
    }
}
