//! In-memory conversation store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::traits::{
    ConversationStore, InterAgentConversation, InterAgentKey, RoomConversation, RoomKey,
    StoreError, StoreStats,
};
use crate::routing::Strategy;

/// A conversation store backed by mutex-protected hash maps.
///
/// Uniqueness holds within one process only; multi-process deployments use
/// the SQLite store.
pub struct InMemoryConversationStore {
    rooms: Mutex<HashMap<RoomKey, RoomConversation>>,
    inter_agent: Mutex<HashMap<InterAgentKey, InterAgentConversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            inter_agent: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, key: &RoomKey, at: DateTime<Utc>) {
        if let Some(row) = self.rooms.lock().get_mut(key) {
            row.last_activity = at;
        }
    }

    #[cfg(test)]
    pub(crate) fn set_inter_agent_last_activity(&self, key: &InterAgentKey, at: DateTime<Utc>) {
        if let Some(row) = self.inter_agent.lock().get_mut(key) {
            row.last_activity = at;
        }
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, key: &RoomKey) -> Result<Option<RoomConversation>, StoreError> {
        Ok(self.rooms.lock().get(key).cloned())
    }

    async fn create(
        &self,
        key: &RoomKey,
        conversation_id: &str,
        strategy: Strategy,
    ) -> Result<RoomConversation, StoreError> {
        let mut rooms = self.rooms.lock();
        match rooms.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let row = RoomConversation {
                    key: key.clone(),
                    conversation_id: conversation_id.to_string(),
                    strategy,
                    created_at: now,
                    last_activity: now,
                };
                slot.insert(row.clone());
                Ok(row)
            }
        }
    }

    async fn touch(&self, key: &RoomKey) -> Result<(), StoreError> {
        if let Some(row) = self.rooms.lock().get_mut(key) {
            row.last_activity = Utc::now();
        }
        Ok(())
    }

    async fn delete(&self, key: &RoomKey) -> Result<bool, StoreError> {
        Ok(self.rooms.lock().remove(key).is_some())
    }

    async fn delete_if_handle(
        &self,
        key: &RoomKey,
        conversation_id: &str,
    ) -> Result<bool, StoreError> {
        let mut rooms = self.rooms.lock();
        match rooms.entry(key.clone()) {
            Entry::Occupied(row) if row.get().conversation_id == conversation_id => {
                row.remove();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut rooms = self.rooms.lock();
        let before = rooms.len();
        rooms.retain(|_, row| row.last_activity >= cutoff);
        Ok(before - rooms.len())
    }

    async fn get_inter_agent(
        &self,
        key: &InterAgentKey,
    ) -> Result<Option<InterAgentConversation>, StoreError> {
        Ok(self.inter_agent.lock().get(key).cloned())
    }

    async fn create_inter_agent(
        &self,
        key: &InterAgentKey,
        conversation_id: &str,
    ) -> Result<InterAgentConversation, StoreError> {
        let mut relays = self.inter_agent.lock();
        match relays.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let row = InterAgentConversation {
                    key: key.clone(),
                    conversation_id: conversation_id.to_string(),
                    created_at: now,
                    last_activity: now,
                };
                slot.insert(row.clone());
                Ok(row)
            }
        }
    }

    async fn touch_inter_agent(&self, key: &InterAgentKey) -> Result<(), StoreError> {
        if let Some(row) = self.inter_agent.lock().get_mut(key) {
            row.last_activity = Utc::now();
        }
        Ok(())
    }

    async fn delete_inter_agent(&self, key: &InterAgentKey) -> Result<bool, StoreError> {
        Ok(self.inter_agent.lock().remove(key).is_some())
    }

    async fn delete_inter_agent_if_handle(
        &self,
        key: &InterAgentKey,
        conversation_id: &str,
    ) -> Result<bool, StoreError> {
        let mut relays = self.inter_agent.lock();
        match relays.entry(key.clone()) {
            Entry::Occupied(row) if row.get().conversation_id == conversation_id => {
                row.remove();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_inter_agent_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut relays = self.inter_agent.lock();
        let before = relays.len();
        relays.retain(|_, row| row.last_activity >= cutoff);
        Ok(before - relays.len())
    }

    async fn touch_conversation(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut touched = 0;

        for row in self.rooms.lock().values_mut() {
            if row.conversation_id == conversation_id {
                row.last_activity = now;
                touched += 1;
            }
        }
        for row in self.inter_agent.lock().values_mut() {
            if row.conversation_id == conversation_id {
                row.last_activity = now;
                touched += 1;
            }
        }

        Ok(touched)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats {
            room_conversations: self.rooms.lock().len(),
            inter_agent_conversations: self.inter_agent.lock().len(),
        })
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
