use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::cleanup::CleanupSweeper;
use super::error::ConversationError;
use super::manager::ConversationManager;
use super::retry::{RetryExecutor, RetryPolicy};
use crate::config::Config;
use crate::runtime::{self, AgentRuntime, SendOutcome};
use crate::sessions::{self, ConversationStore, StoreError, StoreStats};

/// Entry point for chat handlers: resolves routing tuples to remote
/// conversations and delivers messages into them.
///
/// Construct one per process and share it behind an `Arc`.
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    runtime: Arc<dyn AgentRuntime>,
    manager: ConversationManager,
    retry: RetryPolicy,
    streaming: bool,
    shutdown: CancellationToken,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ConversationStore>, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            manager: ConversationManager::new(store.clone(), runtime.clone()),
            store,
            runtime,
            retry: RetryPolicy::default(),
            streaming: false,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the store and runtime named in `config`.
    pub fn from_config(config: &Config) -> Result<Self, ConversationError> {
        let store = sessions::create_conversation_store(&config.store)
            .map_err(|e| ConversationError::Configuration(format!("{e:#}")))?;
        let runtime = runtime::create_runtime(&config.runtime)
            .map_err(|e| ConversationError::Configuration(format!("{e:#}")))?;

        Ok(Self::new(Arc::from(store), Arc::from(runtime))
            .with_retry_policy(RetryPolicy::from_config(&config.retry))
            .with_remote_timeout(Duration::from_secs(config.runtime.request_timeout_secs))
            .with_isolation_labels(config.runtime.isolation_labels.clone())
            .with_streaming(config.runtime.streaming))
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_remote_timeout(mut self, remote_timeout: Duration) -> Self {
        self.manager = self.manager.with_remote_timeout(remote_timeout);
        self
    }

    #[must_use]
    pub fn with_isolation_labels(mut self, labels: Vec<String>) -> Self {
        self.manager = self.manager.with_isolation_labels(labels);
        self
    }

    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    pub async fn get_or_create_room_conversation(
        &self,
        context_id: &str,
        agent_id: &str,
        member_count: usize,
        isolation_key: Option<&str>,
        label: Option<&str>,
    ) -> Result<(String, bool), ConversationError> {
        self.manager
            .get_or_create(context_id, agent_id, member_count, isolation_key, label)
            .await
    }

    pub async fn get_or_create_inter_agent_conversation(
        &self,
        source_agent_id: &str,
        target_agent_id: &str,
        context_id: &str,
        isolation_key: Option<&str>,
    ) -> Result<(String, bool), ConversationError> {
        self.manager
            .get_or_create_inter_agent(source_agent_id, target_agent_id, context_id, isolation_key)
            .await
    }

    pub async fn get_conversation_id(
        &self,
        context_id: &str,
        agent_id: &str,
        isolation_key: Option<&str>,
    ) -> Result<Option<String>, ConversationError> {
        self.manager
            .get_conversation_id(context_id, agent_id, isolation_key)
            .await
    }

    /// Send with busy retries. Backoff waits end early on [`Self::shutdown`].
    pub async fn send_with_retry(
        &self,
        handle: &str,
        text: &str,
        max_retries: u32,
    ) -> Result<SendOutcome, ConversationError> {
        let cancel = self.shutdown.child_token();
        self.send_with_retry_cancellable(handle, text, max_retries, &cancel)
            .await
    }

    pub async fn send_with_retry_cancellable(
        &self,
        handle: &str,
        text: &str,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome, ConversationError> {
        let executor = RetryExecutor::new(self.retry.with_max_retries(max_retries));
        let outcome = executor
            .send(self.runtime.as_ref(), handle, text, self.streaming, cancel)
            .await?;

        if let Err(e) = self.store.touch_conversation(handle).await {
            tracing::warn!(conversation = handle, "Failed to record activity: {e}");
        }
        Ok(outcome)
    }

    /// Default retry count from configuration.
    pub fn max_retries(&self) -> u32 {
        self.retry.max_retries
    }

    pub async fn cleanup_stale(&self, days: u32) -> Result<(usize, usize), ConversationError> {
        Ok(self.sweeper().delete_stale(days).await?)
    }

    pub fn sweeper(&self) -> CleanupSweeper {
        CleanupSweeper::new(self.store.clone())
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.store.stats().await
    }

    /// Abort pending backoff waits started through [`Self::send_with_retry`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Drop every mapping in both tables.
    #[cfg(test)]
    pub(crate) async fn reset(&self) -> Result<(), StoreError> {
        let horizon = chrono::Utc::now() + chrono::Duration::days(1);
        self.store.delete_older_than(horizon).await?;
        self.store.delete_inter_agent_older_than(horizon).await?;
        Ok(())
    }
}
