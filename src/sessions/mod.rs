//! Conversation mapping storage: routing tuple to remote conversation handle.

pub mod in_memory;
pub mod sqlite;
pub mod traits;

pub use in_memory::InMemoryConversationStore;
pub use sqlite::SqliteConversationStore;
pub use traits::{
    ConversationStore, InterAgentConversation, InterAgentKey, RoomConversation, RoomKey,
    StoreError, StoreStats,
};

use crate::config::StoreConfig;
use std::time::Duration;

/// Factory: create the configured conversation store.
pub fn create_conversation_store(
    config: &StoreConfig,
) -> anyhow::Result<Box<dyn ConversationStore>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Box::new(SqliteConversationStore::new(
            &config.path,
            Duration::from_millis(config.busy_timeout_ms),
        )?)),
        "memory" => Ok(Box::new(InMemoryConversationStore::new())),
        other if other.trim().is_empty() => {
            anyhow::bail!("store.backend cannot be empty. Supported values: sqlite, memory")
        }
        other => anyhow::bail!("Unknown store backend '{other}'. Supported values: sqlite, memory"),
    }
}
