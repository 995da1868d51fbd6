//! Get-or-create for conversation mappings.
//!
//! The store's unique index is the only coordination between callers. A
//! caller that loses the insert race adopts the winner's handle; the remote
//! conversation it created along the way is left behind and logged.

use std::sync::Arc;
use std::time::Duration;

use super::error::ConversationError;
use crate::routing::{self, Strategy};
use crate::runtime::{AgentRuntime, ConversationPresence, RemoteError};
use crate::sessions::{ConversationStore, InterAgentKey, RoomKey, StoreError};

/// The two mapping tables share one lifecycle; this picks the table.
#[derive(Debug, Clone, Copy)]
enum Mapping<'a> {
    Room { key: &'a RoomKey, strategy: Strategy },
    Relay { key: &'a InterAgentKey },
}

impl Mapping<'_> {
    fn describe(&self) -> String {
        match self {
            Self::Room { key, .. } => format!(
                "room {}/{}/{}",
                key.context_id,
                key.agent_id,
                key.isolation_key.as_deref().unwrap_or("-")
            ),
            Self::Relay { key } => format!(
                "relay {}->{}/{}/{}",
                key.source_agent_id,
                key.target_agent_id,
                key.context_id,
                key.isolation_key.as_deref().unwrap_or("-")
            ),
        }
    }

    async fn lookup(&self, store: &dyn ConversationStore) -> Result<Option<String>, StoreError> {
        Ok(match self {
            Self::Room { key, .. } => store.get(key).await?.map(|row| row.conversation_id),
            Self::Relay { key } => store
                .get_inter_agent(key)
                .await?
                .map(|row| row.conversation_id),
        })
    }

    async fn insert(&self, store: &dyn ConversationStore, handle: &str) -> Result<(), StoreError> {
        match self {
            Self::Room { key, strategy } => store.create(key, handle, *strategy).await.map(drop),
            Self::Relay { key } => store.create_inter_agent(key, handle).await.map(drop),
        }
    }

    async fn touch(&self, store: &dyn ConversationStore) -> Result<(), StoreError> {
        match self {
            Self::Room { key, .. } => store.touch(key).await,
            Self::Relay { key } => store.touch_inter_agent(key).await,
        }
    }

    /// Delete the row only if it still holds `stale`. Another caller may
    /// already have replaced it with a live handle.
    async fn remove_stale(
        &self,
        store: &dyn ConversationStore,
        stale: &str,
    ) -> Result<bool, StoreError> {
        match self {
            Self::Room { key, .. } => store.delete_if_handle(key, stale).await,
            Self::Relay { key } => store.delete_inter_agent_if_handle(key, stale).await,
        }
    }
}

/// Read the stored handle for a room as the caller names it. A blank
/// isolation key means none. Needs no runtime client.
pub async fn lookup_conversation_id(
    store: &dyn ConversationStore,
    context_id: &str,
    agent_id: &str,
    isolation_key: Option<&str>,
) -> Result<Option<String>, ConversationError> {
    let normalized = routing::normalize_isolation_key(isolation_key);
    let key = RoomKey::new(context_id, agent_id, normalized.as_deref());
    Ok(store.get(&key).await?.map(|row| row.conversation_id))
}

pub struct ConversationManager {
    store: Arc<dyn ConversationStore>,
    runtime: Arc<dyn AgentRuntime>,
    remote_timeout: Duration,
    isolation_labels: Vec<String>,
}

impl ConversationManager {
    pub fn new(store: Arc<dyn ConversationStore>, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            store,
            runtime,
            remote_timeout: Duration::from_secs(30),
            isolation_labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_remote_timeout(mut self, remote_timeout: Duration) -> Self {
        self.remote_timeout = remote_timeout;
        self
    }

    /// Memory block labels the runtime keeps private to each new conversation.
    #[must_use]
    pub fn with_isolation_labels(mut self, labels: Vec<String>) -> Self {
        self.isolation_labels = labels;
        self
    }

    /// Return the live conversation for a room, creating one if needed.
    ///
    /// The boolean is `true` only when this call inserted the mapping.
    pub async fn get_or_create(
        &self,
        context_id: &str,
        agent_id: &str,
        member_count: usize,
        isolation_key: Option<&str>,
        label: Option<&str>,
    ) -> Result<(String, bool), ConversationError> {
        let strategy = routing::resolve_strategy(context_id, member_count);
        let normalized = routing::normalize_isolation_key(isolation_key);
        let effective = routing::effective_isolation_key(strategy, normalized.as_deref());
        let key = RoomKey::new(context_id, agent_id, effective.as_deref());

        let summary = format!(
            "Conversation for {}",
            label.map(str::trim).filter(|l| !l.is_empty()).unwrap_or(context_id)
        );

        self.resolve(Mapping::Room { key: &key, strategy }, agent_id, &summary)
            .await
    }

    /// Return the live relay conversation `source -> target` in a context.
    /// The remote conversation is owned by `target`.
    pub async fn get_or_create_inter_agent(
        &self,
        source_agent_id: &str,
        target_agent_id: &str,
        context_id: &str,
        isolation_key: Option<&str>,
    ) -> Result<(String, bool), ConversationError> {
        let normalized = routing::normalize_isolation_key(isolation_key);
        let key = InterAgentKey::new(
            source_agent_id,
            target_agent_id,
            context_id,
            normalized.as_deref(),
        );

        self.resolve(
            Mapping::Relay { key: &key },
            target_agent_id,
            "Relayed conversation",
        )
        .await
    }

    /// Store-only lookup. No remote verification, no strategy resolution.
    pub async fn get_conversation_id(
        &self,
        context_id: &str,
        agent_id: &str,
        isolation_key: Option<&str>,
    ) -> Result<Option<String>, ConversationError> {
        lookup_conversation_id(self.store.as_ref(), context_id, agent_id, isolation_key).await
    }

    async fn resolve(
        &self,
        mapping: Mapping<'_>,
        owner_agent_id: &str,
        summary: &str,
    ) -> Result<(String, bool), ConversationError> {
        let store = self.store.as_ref();

        if let Some(existing) = mapping.lookup(store).await? {
            if self.verify(&existing).await? {
                mapping.touch(store).await?;
                tracing::debug!(
                    mapping = %mapping.describe(),
                    conversation = %existing,
                    "Reusing conversation"
                );
                return Ok((existing, false));
            }

            tracing::warn!(
                mapping = %mapping.describe(),
                conversation = %existing,
                "Conversation no longer exists remotely, recreating"
            );
            if !mapping.remove_stale(store, &existing).await? {
                tracing::debug!(
                    mapping = %mapping.describe(),
                    conversation = %existing,
                    "Stale mapping already replaced by another caller"
                );
            }
        }

        let handle = self.create_remote(owner_agent_id, summary).await?;

        match mapping.insert(store, &handle).await {
            Ok(()) => {
                tracing::info!(
                    mapping = %mapping.describe(),
                    agent_id = owner_agent_id,
                    conversation = %handle,
                    "Created conversation"
                );
                Ok((handle, true))
            }
            Err(err) if err.is_conflict() => {
                let Some(winner) = mapping.lookup(store).await? else {
                    return Err(ConversationError::Consistency {
                        key: mapping.describe(),
                    });
                };
                tracing::warn!(
                    mapping = %mapping.describe(),
                    orphaned = %handle,
                    conversation = %winner,
                    "Lost mapping race; remote conversation orphaned"
                );
                Ok((winner, false))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// `true` if the handle is still live. Only a not-found answer counts as
    /// stale; every other failure propagates.
    async fn verify(&self, handle: &str) -> Result<bool, RemoteError> {
        let retrieved = tokio::time::timeout(
            self.remote_timeout,
            self.runtime.retrieve_conversation(handle),
        )
        .await
        .map_err(|_| {
            RemoteError::timeout(format!(
                "retrieving conversation {handle} exceeded {}s",
                self.remote_timeout.as_secs()
            ))
        })?;

        match retrieved {
            Ok(ConversationPresence::Present) => Ok(true),
            Ok(ConversationPresence::NotFound) => Ok(false),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create_remote(&self, agent_id: &str, summary: &str) -> Result<String, RemoteError> {
        tokio::time::timeout(
            self.remote_timeout,
            self.runtime
                .create_conversation(agent_id, &self.isolation_labels, summary),
        )
        .await
        .map_err(|_| {
            RemoteError::timeout(format!(
                "creating conversation for agent {agent_id} exceeded {}s",
                self.remote_timeout.as_secs()
            ))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::testing::FakeRuntime;
    use crate::runtime::RemoteErrorKind;
    use crate::sessions::{
        InMemoryConversationStore, InterAgentConversation, RoomConversation,
        SqliteConversationStore, StoreStats,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    fn setup() -> (
        ConversationManager,
        Arc<InMemoryConversationStore>,
        Arc<FakeRuntime>,
    ) {
        let store = Arc::new(InMemoryConversationStore::new());
        let runtime = Arc::new(FakeRuntime::new());
        let manager = ConversationManager::new(store.clone(), runtime.clone());
        (manager, store, runtime)
    }

    #[tokio::test]
    async fn second_call_reuses_live_conversation() {
        let (manager, store, runtime) = setup();

        let first = manager
            .get_or_create("ctx-1", "agent-9", 2, Some("alice"), None)
            .await
            .unwrap();
        let second = manager
            .get_or_create("ctx-1", "agent-9", 2, Some("alice"), None)
            .await
            .unwrap();

        assert_eq!(first, ("conv-1".to_string(), true));
        assert_eq!(second, ("conv-1".to_string(), false));
        assert_eq!(runtime.created().len(), 1);
        assert_eq!(store.stats().await.unwrap().room_conversations, 1);
    }

    #[tokio::test]
    async fn direct_rooms_isolate_each_user() {
        let (manager, _, _) = setup();

        let alice = manager
            .get_or_create("ctx-1", "agent-9", 2, Some("alice"), None)
            .await
            .unwrap();
        let alice_again = manager
            .get_or_create("ctx-1", "agent-9", 2, Some("alice"), None)
            .await
            .unwrap();
        let bob = manager
            .get_or_create("ctx-1", "agent-9", 2, Some("bob"), None)
            .await
            .unwrap();

        assert_eq!(alice, ("conv-1".to_string(), true));
        assert_eq!(alice_again, ("conv-1".to_string(), false));
        assert_eq!(bob, ("conv-2".to_string(), true));
    }

    #[tokio::test]
    async fn group_rooms_share_one_conversation() {
        let (manager, store, _) = setup();

        let (a, _) = manager
            .get_or_create("ctx-2", "agent-9", 5, Some("@a"), None)
            .await
            .unwrap();
        let (b, created) = manager
            .get_or_create("ctx-2", "agent-9", 5, Some("@b"), None)
            .await
            .unwrap();

        assert_eq!(a, b);
        assert!(!created);
        let row = store
            .get(&RoomKey::new("ctx-2", "agent-9", None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.strategy, Strategy::PerRoom);
    }

    #[tokio::test]
    async fn blank_isolation_key_maps_to_absent() {
        let (manager, _, _) = setup();

        let (first, _) = manager
            .get_or_create("ctx-3", "agent-9", 2, Some("  "), None)
            .await
            .unwrap();
        let (second, created) = manager
            .get_or_create("ctx-3", "agent-9", 2, None, None)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert!(!created);
    }

    #[tokio::test]
    async fn stale_mapping_is_replaced() {
        let (manager, store, runtime) = setup();

        let (old, _) = manager
            .get_or_create("ctx-1", "agent-9", 5, None, None)
            .await
            .unwrap();
        runtime.drop_conversation(&old);

        let (new, created) = manager
            .get_or_create("ctx-1", "agent-9", 5, None, None)
            .await
            .unwrap();

        assert_ne!(old, new);
        assert!(created);
        let row = store
            .get(&RoomKey::new("ctx-1", "agent-9", None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.conversation_id, new);
    }

    #[tokio::test]
    async fn not_found_error_on_verify_counts_as_stale() {
        let (manager, _, runtime) = setup();
        manager
            .get_or_create("ctx-1", "agent-9", 5, None, None)
            .await
            .unwrap();
        runtime.fail_retrieve_with(RemoteErrorKind::NotFound);

        let (handle, created) = manager
            .get_or_create("ctx-1", "agent-9", 5, None, None)
            .await
            .unwrap();

        assert_eq!(handle, "conv-2");
        assert!(created);
    }

    #[tokio::test]
    async fn server_error_on_verify_keeps_mapping() {
        let (manager, store, runtime) = setup();
        manager
            .get_or_create("ctx-1", "agent-9", 5, None, None)
            .await
            .unwrap();
        runtime.fail_retrieve_with(RemoteErrorKind::ServerError);

        let err = manager
            .get_or_create("ctx-1", "agent-9", 5, None, None)
            .await
            .unwrap_err();

        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::ServerError));
        assert_eq!(runtime.created().len(), 1);
        let row = store
            .get(&RoomKey::new("ctx-1", "agent-9", None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.conversation_id, "conv-1");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_verify_times_out_without_recreating() {
        let (manager, store, runtime) = setup();
        let manager = manager.with_remote_timeout(Duration::from_secs(5));
        manager
            .get_or_create("ctx-1", "agent-9", 5, None, None)
            .await
            .unwrap();
        runtime.delay_retrieve(Duration::from_secs(60));

        let err = manager
            .get_or_create("ctx-1", "agent-9", 5, None, None)
            .await
            .unwrap_err();

        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::Timeout));
        assert_eq!(runtime.created().len(), 1);
        assert!(store
            .get(&RoomKey::new("ctx-1", "agent-9", None))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn create_failure_propagates_without_row() {
        let (manager, store, runtime) = setup();
        runtime.fail_create_with(RemoteErrorKind::ServerError);

        let err = manager
            .get_or_create("ctx-1", "agent-9", 5, None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ConversationError::Remote(_)));
        assert_eq!(store.stats().await.unwrap().room_conversations, 0);
    }

    #[tokio::test]
    async fn create_passes_labels_and_summary() {
        let (manager, _, runtime) = setup();
        let manager = manager.with_isolation_labels(vec!["human".into(), "persona".into()]);

        manager
            .get_or_create("ctx-1", "agent-9", 5, None, Some("Design Review"))
            .await
            .unwrap();
        manager
            .get_or_create("ctx-2", "agent-9", 5, None, None)
            .await
            .unwrap();

        let created = runtime.created();
        assert_eq!(created[0].agent_id, "agent-9");
        assert_eq!(created[0].isolation_labels, vec!["human", "persona"]);
        assert_eq!(created[0].summary, "Conversation for Design Review");
        assert_eq!(created[1].summary, "Conversation for ctx-2");
    }

    async fn race(manager: Arc<ConversationManager>, runtime: &FakeRuntime, callers: usize) {
        runtime.gate_creates(callers);

        let tasks = (0..callers).map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .get_or_create("ctx-race", "agent-9", 5, None, None)
                    .await
            })
        });

        let mut handles = Vec::new();
        let mut created = 0;
        for joined in futures::future::join_all(tasks).await {
            let (handle, was_created) = joined.unwrap().unwrap();
            handles.push(handle);
            created += usize::from(was_created);
        }

        assert_eq!(created, 1);
        assert!(handles.iter().all(|h| h == &handles[0]));
        assert_eq!(runtime.created().len(), callers);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_converge_on_one_handle() {
        let store = Arc::new(InMemoryConversationStore::new());
        let runtime = Arc::new(FakeRuntime::new());
        let manager = Arc::new(ConversationManager::new(store.clone(), runtime.clone()));

        race(manager, &runtime, 10).await;

        assert_eq!(store.stats().await.unwrap().room_conversations, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_converge_on_sqlite() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(
            SqliteConversationStore::new(
                &tmp.path().join("conversations.db"),
                Duration::from_secs(5),
            )
            .unwrap(),
        );
        let runtime = Arc::new(FakeRuntime::new());
        let manager = Arc::new(ConversationManager::new(store.clone(), runtime.clone()));

        race(manager, &runtime, 10).await;

        assert_eq!(store.stats().await.unwrap().room_conversations, 1);
    }

    #[tokio::test]
    async fn relay_direction_matters() {
        let (manager, store, runtime) = setup();

        let (ab, _) = manager
            .get_or_create_inter_agent("agent-a", "agent-b", "ctx-1", None)
            .await
            .unwrap();
        let (ba, _) = manager
            .get_or_create_inter_agent("agent-b", "agent-a", "ctx-1", None)
            .await
            .unwrap();
        let (ab_again, created) = manager
            .get_or_create_inter_agent("agent-a", "agent-b", "ctx-1", Some(""))
            .await
            .unwrap();

        assert_ne!(ab, ba);
        assert_eq!(ab, ab_again);
        assert!(!created);

        let created = runtime.created();
        assert_eq!(created[0].agent_id, "agent-b");
        assert_eq!(created[1].agent_id, "agent-a");
        assert_eq!(store.stats().await.unwrap().inter_agent_conversations, 2);
    }

    #[tokio::test]
    async fn relay_stale_mapping_is_replaced() {
        let (manager, _, runtime) = setup();

        let (old, _) = manager
            .get_or_create_inter_agent("agent-a", "agent-b", "ctx-1", Some("thread-7"))
            .await
            .unwrap();
        runtime.drop_conversation(&old);

        let (new, created) = manager
            .get_or_create_inter_agent("agent-a", "agent-b", "ctx-1", Some("thread-7"))
            .await
            .unwrap();

        assert_ne!(old, new);
        assert!(created);
    }

    #[tokio::test]
    async fn lookup_never_calls_runtime() {
        let (manager, _, runtime) = setup();

        assert!(manager
            .get_conversation_id("ctx-1", "agent-9", Some("alice"))
            .await
            .unwrap()
            .is_none());

        manager
            .get_or_create("ctx-1", "agent-9", 2, Some("alice"), None)
            .await
            .unwrap();
        let found = manager
            .get_conversation_id("ctx-1", "agent-9", Some("alice"))
            .await
            .unwrap();

        assert_eq!(found.as_deref(), Some("conv-1"));
        assert_eq!(runtime.retrieve_calls(), 0);
    }

    #[tokio::test]
    async fn lookup_uses_key_as_given() {
        let (manager, _, _) = setup();
        manager
            .get_or_create("ctx-1", "agent-9", 5, Some("alice"), None)
            .await
            .unwrap();

        // Group rooms store no isolation key, so a keyed lookup misses.
        assert!(manager
            .get_conversation_id("ctx-1", "agent-9", Some("alice"))
            .await
            .unwrap()
            .is_none());
        assert!(manager
            .get_conversation_id("ctx-1", "agent-9", None)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn store_only_lookup_matches_manager_lookup() {
        let (manager, store, _) = setup();
        manager
            .get_or_create("ctx-1", "agent-9", 2, Some("alice"), None)
            .await
            .unwrap();

        let direct = lookup_conversation_id(store.as_ref(), "ctx-1", "agent-9", Some(" alice "))
            .await
            .unwrap();
        let blank = lookup_conversation_id(store.as_ref(), "ctx-1", "agent-9", Some(""))
            .await
            .unwrap();

        assert_eq!(direct.as_deref(), Some("conv-1"));
        assert_eq!(blank, None);
        assert_eq!(
            lookup_conversation_id(store.as_ref(), "ctx-1", "agent-9", Some("alice"))
                .await
                .unwrap(),
            manager
                .get_conversation_id("ctx-1", "agent-9", Some("alice"))
                .await
                .unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_stale_recovery_keeps_first_replacement() {
        let (manager, store, runtime) = setup();
        let (stale, _) = manager
            .get_or_create("ctx-1", "agent-9", 5, None, None)
            .await
            .unwrap();
        runtime.drop_conversation(&stale);
        // The first verify is slow, so the second caller replaces the row first.
        runtime.delay_retrieves([Duration::from_millis(200)]);

        let (slow, fast) = tokio::join!(
            manager.get_or_create("ctx-1", "agent-9", 5, None, None),
            manager.get_or_create("ctx-1", "agent-9", 5, None, None),
        );

        assert_eq!(fast.unwrap(), ("conv-2".to_string(), true));
        assert_eq!(slow.unwrap(), ("conv-2".to_string(), false));
        let row = store
            .get(&RoomKey::new("ctx-1", "agent-9", None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.conversation_id, "conv-2");
        assert_eq!(runtime.created().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_relay_stale_recovery_keeps_first_replacement() {
        let (manager, store, runtime) = setup();
        let (stale, _) = manager
            .get_or_create_inter_agent("agent-a", "agent-b", "ctx-1", None)
            .await
            .unwrap();
        runtime.drop_conversation(&stale);
        runtime.delay_retrieves([Duration::from_millis(200)]);

        let (slow, fast) = tokio::join!(
            manager.get_or_create_inter_agent("agent-a", "agent-b", "ctx-1", None),
            manager.get_or_create_inter_agent("agent-a", "agent-b", "ctx-1", None),
        );

        let (slow, fast) = (slow.unwrap(), fast.unwrap());
        assert_eq!(slow.0, fast.0);
        assert!(fast.1 && !slow.1);
        let row = store
            .get_inter_agent(&InterAgentKey::new("agent-a", "agent-b", "ctx-1", None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.conversation_id, fast.0);
    }

    /// Reports every insert as a lost race but never shows the winning row.
    struct VanishingWinnerStore;

    #[async_trait]
    impl ConversationStore for VanishingWinnerStore {
        async fn get(&self, _key: &RoomKey) -> Result<Option<RoomConversation>, StoreError> {
            Ok(None)
        }

        async fn create(
            &self,
            _key: &RoomKey,
            _conversation_id: &str,
            _strategy: Strategy,
        ) -> Result<RoomConversation, StoreError> {
            Err(StoreError::Conflict)
        }

        async fn touch(&self, _key: &RoomKey) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete(&self, _key: &RoomKey) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn delete_if_handle(
            &self,
            _key: &RoomKey,
            _conversation_id: &str,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn delete_older_than(&self, _cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
            Ok(0)
        }

        async fn get_inter_agent(
            &self,
            _key: &InterAgentKey,
        ) -> Result<Option<InterAgentConversation>, StoreError> {
            Ok(None)
        }

        async fn create_inter_agent(
            &self,
            _key: &InterAgentKey,
            _conversation_id: &str,
        ) -> Result<InterAgentConversation, StoreError> {
            Err(StoreError::Conflict)
        }

        async fn touch_inter_agent(&self, _key: &InterAgentKey) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete_inter_agent(&self, _key: &InterAgentKey) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn delete_inter_agent_if_handle(
            &self,
            _key: &InterAgentKey,
            _conversation_id: &str,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn delete_inter_agent_older_than(
            &self,
            _cutoff: DateTime<Utc>,
        ) -> Result<usize, StoreError> {
            Ok(0)
        }

        async fn touch_conversation(&self, _conversation_id: &str) -> Result<usize, StoreError> {
            Ok(0)
        }

        async fn stats(&self) -> Result<StoreStats, StoreError> {
            Ok(StoreStats::default())
        }

        fn name(&self) -> &str {
            "vanishing_winner"
        }
    }

    #[tokio::test]
    async fn conflict_without_winner_is_consistency_error() {
        let runtime = Arc::new(FakeRuntime::new());
        let manager = ConversationManager::new(Arc::new(VanishingWinnerStore), runtime.clone());

        let err = manager
            .get_or_create("ctx-1", "agent-9", 5, None, None)
            .await
            .unwrap_err();

        match err {
            ConversationError::Consistency { key } => assert!(key.contains("ctx-1")),
            other => panic!("expected Consistency, got {other:?}"),
        }
        assert_eq!(runtime.created().len(), 1);
    }

    #[tokio::test]
    async fn relay_conflict_without_winner_is_consistency_error() {
        let runtime = Arc::new(FakeRuntime::new());
        let manager = ConversationManager::new(Arc::new(VanishingWinnerStore), runtime.clone());

        let err = manager
            .get_or_create_inter_agent("agent-a", "agent-b", "ctx-1", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ConversationError::Consistency { .. }));
        assert_eq!(runtime.created().len(), 1);
    }
}
