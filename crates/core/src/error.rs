//! Error types for the chatrelay domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`RelayError`] is the
//! top-level error the orchestration layer reports.

use thiserror::Error;

/// The top-level error type for relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    // --- Upstream calls ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Local state ---
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    // --- Missing resources ---
    #[error("No assistant configured for owner {owner_id}")]
    AssistantNotConfigured { owner_id: i64 },

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("Assistant produced no reply on thread {thread_id}")]
    EmptyReply { thread_id: String },

    // --- Run lifecycle ---
    #[error("Run {run_id} failed: {reason}")]
    RunFailed { run_id: String, reason: String },

    #[error("Run {run_id} did not finish within {waited_secs}s")]
    RunTimedOut { run_id: String, waited_secs: u64 },

    #[error("Request cancelled")]
    Cancelled,

    // --- Degradable ---
    #[error("Failed to load history: {0}")]
    HistoryLoad(String),

    // --- Payloads ---
    #[error("Unexpected upstream payload: {0}")]
    Decode(String),
}

impl RelayError {
    /// Whether the failure was caused by cancellation anywhere in the stack.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            RelayError::Cancelled | RelayError::Transport(TransportError::Cancelled)
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Decode(e.to_string())
    }
}

/// Result type alias using [`RelayError`].
pub type Result<T> = std::result::Result<T, RelayError>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unexpected status code {status_code}: {body}")]
    UpstreamStatus { status_code: u16, body: String },

    #[error("Failed to read response body: {0}")]
    BodyRead(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Max retries exceeded after {attempts} attempt(s): {last}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: Box<TransportError>,
    },
}

impl TransportError {
    /// Whether another attempt may succeed.
    ///
    /// Only failures of the call itself qualify; malformed requests,
    /// cancellation and exhaustion are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_)
                | TransportError::Timeout(_)
                | TransportError::UpstreamStatus { .. }
                | TransportError::BodyRead(_)
        )
    }

    /// The innermost failure, unwrapping [`TransportError::ExhaustedRetries`].
    pub fn last_failure(&self) -> &TransportError {
        match self {
            TransportError::ExhaustedRetries { last, .. } => last.last_failure(),
            other => other,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}
