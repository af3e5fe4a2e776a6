//! Turn and chat message domain types.
//!
//! These are the value objects that flow through the relay:
//! the platform delivers an inbound message → the orchestrator obtains a
//! reply → both sides are persisted as a pair of [`Turn`]s.

use serde::{Deserialize, Serialize};

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The platform user writing to the bot
    User,
    /// The LLM assistant
    Assistant,
    /// Persona / instructions (never persisted as a turn)
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// One exchanged message, as persisted locally.
///
/// Immutable once written. `created_at` is platform-supplied epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub conversation_id: String,
    pub user_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: i64,
}

impl Turn {
    /// A turn written by the platform user.
    pub fn user(
        conversation_id: impl Into<String>,
        user_id: i64,
        content: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id,
            role: Role::User,
            content: content.into(),
            created_at,
        }
    }

    /// A turn produced by the assistant.
    pub fn assistant(
        conversation_id: impl Into<String>,
        user_id: i64,
        content: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id,
            role: Role::Assistant,
            content: content.into(),
            created_at,
        }
    }
}

/// A stored turn projected to what a model request needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

/// A single message in an outbound chat-completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<HistoryTurn> for ChatMessage {
    fn from(turn: HistoryTurn) -> Self {
        Self {
            role: turn.role,
            content: turn.content,
        }
    }
}

/// The inbound message the orchestrator answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Platform chat identifier (the conversation id)
    pub chat_id: String,
    /// Account the bot serves; owns the assistant
    pub owner_id: i64,
    /// The text the platform user wrote
    pub text: String,
    /// Platform timestamp, epoch seconds
    pub created_at: i64,
}
