//! Reply orchestration for chatrelay.
//!
//! The [`AssistantOrchestrator`] turns one inbound chat message into one
//! reply:
//!
//! 1. **Resolve** the owner's assistant and the conversation's thread
//! 2. **Post** the message (with listing context on a new thread)
//! 3. **Run** the assistant and poll until it settles
//! 4. **Fetch** the reply and record the exchanged turns
//!
//! In completion mode, steps 1-3 are replaced by a single chat completion
//! over locally stored history. [`KnowledgeUploader`] manages the files
//! the assistant answers from.

pub mod history;
pub mod locks;
pub mod orchestrator;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use history::HistoryAssembler;
pub use locks::ConversationLocks;
pub use orchestrator::{AssistantOrchestrator, with_listing_context};
pub use upload::KnowledgeUploader;
