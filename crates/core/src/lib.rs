//! # chatrelay core
//!
//! Domain types, capability traits, and error definitions for the chatrelay
//! assistant relay. This crate has no HTTP or database dependencies; it
//! defines the model every other crate implements against.
//!
//! The relay talks to two remote services and one local store, each behind a
//! trait declared here:
//! - [`AssistantApi`]: threads, runs, assistants, knowledge stores, files
//! - [`Messenger`]: the messaging platform the bot answers on
//! - [`ConversationStore`]: turns and identifier bindings

pub mod assistant;
pub mod error;
pub mod message;
pub mod messenger;
pub mod store;

pub use assistant::{
    AssistantApi, AssistantSpec, CompletionRequest, Run, RunStatus, ThreadMessage,
};
pub use error::{RelayError, Result, StoreError, TransportError};
pub use message::{ChatMessage, HistoryTurn, InboundMessage, Role, Turn};
pub use messenger::{ChatContext, Messenger};
pub use store::{ConversationStore, FileKind, FileRecord, ThreadRef};
