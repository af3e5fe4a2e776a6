//! AssistantApi trait: the abstraction over the hosted assistant service.
//!
//! The assistant service owns threads, runs, assistants, knowledge stores and
//! uploaded files. The orchestrator drives it through this trait only, so a
//! scripted implementation can stand in for the live HTTP client in tests.
//!
//! Every call takes the caller's [`CancellationToken`]; cancellation aborts
//! the in-flight request and any pending retry wait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::message::ChatMessage;

/// Lifecycle status of a run, as reported by the assistant service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Expired,
    /// Any status this crate does not interpret; polling continues.
    Other(String),
}

impl RunStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "queued" => RunStatus::Queued,
            "in_progress" => RunStatus::InProgress,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            "expired" => RunStatus::Expired,
            other => RunStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
            RunStatus::Other(s) => s,
        }
    }

    /// A run in this state will never produce a reply.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A snapshot of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    /// Service-provided failure detail, if any
    pub last_error: Option<String>,
}

/// A message read back from a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMessage {
    pub id: String,
    pub role: String,
    /// Concatenated text parts; `None` when the message carries no text.
    pub text: Option<String>,
}

/// Parameters for creating an assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantSpec {
    pub name: String,
    pub model: String,
    pub instructions: String,
}

/// A plain chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// The hosted assistant service.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Create an empty thread, returning its id.
    async fn create_thread(&self, cancel: &CancellationToken) -> Result<String>;

    /// Append a user message to a thread.
    async fn create_message(
        &self,
        thread_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Start a run of `assistant_id` on `thread_id`, returning the run id.
    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;

    async fn get_run(
        &self,
        thread_id: &str,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Run>;

    /// The newest message on the thread (limit 1, newest first).
    async fn latest_message(
        &self,
        thread_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ThreadMessage>>;

    async fn create_assistant(
        &self,
        spec: &AssistantSpec,
        cancel: &CancellationToken,
    ) -> Result<String>;

    async fn create_vector_store(&self, name: &str, cancel: &CancellationToken)
    -> Result<String>;

    /// Point the assistant's file search at a knowledge store.
    async fn link_vector_store(
        &self,
        assistant_id: &str,
        store_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Look up a knowledge store by exact name.
    async fn find_vector_store(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>>;

    /// Upload a file with purpose `assistants`, returning its id.
    async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<String>;

    async fn attach_file(
        &self,
        store_id: &str,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn detach_file(
        &self,
        store_id: &str,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn delete_file(&self, file_id: &str, cancel: &CancellationToken) -> Result<()>;

    /// Single-shot chat completion, returning the reply text.
    async fn complete_chat(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String>;
}
