//! Conversation mapping storage traits and types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::routing::Strategy;

/// Routing tuple for a room conversation.
///
/// `isolation_key` is `None` under per-room routing; the unique index treats
/// `None` as a single value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub context_id: String,
    pub agent_id: String,
    pub isolation_key: Option<String>,
}

impl RoomKey {
    pub fn new(context_id: &str, agent_id: &str, isolation_key: Option<&str>) -> Self {
        Self {
            context_id: context_id.to_string(),
            agent_id: agent_id.to_string(),
            isolation_key: isolation_key.map(ToString::to_string),
        }
    }
}

/// Routing tuple for an agent-to-agent relay conversation. Direction matters:
/// `(a, b)` and `(b, a)` are different keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct InterAgentKey {
    pub source_agent_id: String,
    pub target_agent_id: String,
    pub context_id: String,
    pub isolation_key: Option<String>,
}

impl InterAgentKey {
    pub fn new(
        source_agent_id: &str,
        target_agent_id: &str,
        context_id: &str,
        isolation_key: Option<&str>,
    ) -> Self {
        Self {
            source_agent_id: source_agent_id.to_string(),
            target_agent_id: target_agent_id.to_string(),
            context_id: context_id.to_string(),
            isolation_key: isolation_key.map(ToString::to_string),
        }
    }
}

/// A persisted room → remote conversation mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConversation {
    pub key: RoomKey,
    pub conversation_id: String,
    pub strategy: Strategy,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// A persisted relay mapping. The remote conversation belongs to the target agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterAgentConversation {
    pub key: InterAgentKey,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Row counts per mapping table.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub room_conversations: usize,
    pub inter_agent_conversations: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer already holds a mapping for the same routing tuple.
    #[error("a conversation mapping already exists for this routing key")]
    Conflict,
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt conversation mapping row: {0}")]
    Corrupt(String),
    #[error("store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

/// Durable routing-tuple → conversation handle mappings.
///
/// Each method is a single transaction. The uniqueness of the routing tuple is
/// enforced by the backend itself; `create` reports a lost race as
/// [`StoreError::Conflict`] and callers re-read.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Look up the room mapping for a routing tuple.
    async fn get(&self, key: &RoomKey) -> Result<Option<RoomConversation>, StoreError>;

    /// Insert a room mapping. Fails with `Conflict` if the tuple is taken.
    async fn create(
        &self,
        key: &RoomKey,
        conversation_id: &str,
        strategy: Strategy,
    ) -> Result<RoomConversation, StoreError>;

    /// Bump `last_activity` for a room mapping. Missing rows are ignored.
    async fn touch(&self, key: &RoomKey) -> Result<(), StoreError>;

    /// Delete a room mapping. Returns whether a row was removed.
    async fn delete(&self, key: &RoomKey) -> Result<bool, StoreError>;

    /// Delete a room mapping only while it still points at `conversation_id`.
    /// A row replaced by another writer in the meantime is left alone.
    async fn delete_if_handle(
        &self,
        key: &RoomKey,
        conversation_id: &str,
    ) -> Result<bool, StoreError>;

    /// Delete room mappings idle since before `cutoff`.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn get_inter_agent(
        &self,
        key: &InterAgentKey,
    ) -> Result<Option<InterAgentConversation>, StoreError>;

    async fn create_inter_agent(
        &self,
        key: &InterAgentKey,
        conversation_id: &str,
    ) -> Result<InterAgentConversation, StoreError>;

    async fn touch_inter_agent(&self, key: &InterAgentKey) -> Result<(), StoreError>;

    async fn delete_inter_agent(&self, key: &InterAgentKey) -> Result<bool, StoreError>;

    async fn delete_inter_agent_if_handle(
        &self,
        key: &InterAgentKey,
        conversation_id: &str,
    ) -> Result<bool, StoreError>;

    async fn delete_inter_agent_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Bump `last_activity` on every mapping (either table) that points at
    /// `conversation_id`. Returns the number of rows touched.
    async fn touch_conversation(&self, conversation_id: &str) -> Result<usize, StoreError>;

    /// Row counts per table.
    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// The name of this store implementation.
    fn name(&self) -> &str;
}
