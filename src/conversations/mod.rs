//! Conversation lifecycle: routing tuple resolution, stale recovery,
//! busy-aware sending and idle cleanup.

pub mod cleanup;
pub mod error;
pub mod manager;
pub mod retry;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use cleanup::CleanupSweeper;
pub use error::ConversationError;
pub use manager::{lookup_conversation_id, ConversationManager};
pub use retry::{RetryExecutor, RetryPolicy};
pub use service::ConversationService;
