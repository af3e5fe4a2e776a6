//! HTTP gateway for chatrelay.
//!
//! Exposes the messaging platform's webhook, the knowledge-file upload
//! endpoint and a health check. Messages are answered inline: the webhook
//! response carries the reply, and any failure along the way is a 500.
//!
//! Built on Axum.

pub mod upload;
pub mod webhook;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use chatrelay_agent::{AssistantOrchestrator, KnowledgeUploader};
use chatrelay_config::AppConfig;
use chatrelay_core::assistant::AssistantApi;
use chatrelay_core::error::RelayError;
use chatrelay_core::messenger::Messenger;
use chatrelay_core::store::ConversationStore;

/// Webhook bodies larger than this are rejected.
pub const WEBHOOK_BODY_LIMIT: usize = 1024 * 1024;

/// Knowledge files may be considerably larger than chat messages.
pub const UPLOAD_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<AssistantOrchestrator>,
    pub uploader: Arc<KnowledgeUploader>,
    pub messenger: Arc<dyn Messenger>,
    /// Send replies back through the messenger, not only in the response.
    pub deliver_replies: bool,
    /// Parent of every per-request cancellation token.
    pub shutdown: CancellationToken,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Wire the gateway from configuration and already-built collaborators.
    pub fn from_config(
        config: &AppConfig,
        api: Arc<dyn AssistantApi>,
        messenger: Arc<dyn Messenger>,
        store: Arc<dyn ConversationStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator: Arc::new(AssistantOrchestrator::from_config(
                api.clone(),
                store.clone(),
                config,
            )),
            uploader: Arc::new(KnowledgeUploader::from_config(api, store, config)),
            messenger,
            deliver_replies: config.messenger.deliver_replies,
            shutdown,
        }
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/webhook",
            post(webhook::webhook_handler).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
        )
        .route(
            "/upload",
            post(upload::upload_handler).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server and run until `shutdown` fires.
pub async fn start(
    config: AppConfig,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.webhook.bind_address();

    let store = chatrelay_store::open(&config.database.url).await?;
    let api: Arc<dyn AssistantApi> = Arc::new(chatrelay_providers::assistant_client(&config)?);
    let messenger: Arc<dyn Messenger> = Arc::new(chatrelay_providers::messenger_client(&config)?);
    info!(
        store = store.name(),
        mode = ?config.assistant.mode,
        deliver_replies = config.messenger.deliver_replies,
        "Gateway collaborators ready"
    );

    let state = Arc::new(GatewayState::from_config(
        &config,
        api,
        messenger,
        store,
        shutdown.clone(),
    ));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Gateway stopped");
    Ok(())
}

// --- Errors ---

/// An error response: a status code and a JSON `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::UnknownProfile(_) => Self::new(StatusCode::NOT_FOUND, e.to_string()),
            // Upstream details stay in the logs.
            _ => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
