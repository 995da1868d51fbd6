//! Scriptable in-process agent runtime for lifecycle tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use tokio::time::Instant;

use crate::runtime::{
    AgentMessage, AgentRuntime, ConversationPresence, RemoteError, RemoteErrorKind, SendOutcome,
};

#[derive(Debug, Clone)]
pub(crate) struct CreatedConversation {
    pub id: String,
    pub agent_id: String,
    pub isolation_labels: Vec<String>,
    pub summary: String,
}

/// Hands out `conv-1`, `conv-2`, ... and remembers which still exist.
#[derive(Default)]
pub(crate) struct FakeRuntime {
    next_id: AtomicUsize,
    live: Mutex<HashSet<String>>,
    created: Mutex<Vec<CreatedConversation>>,
    retrieve_error: Mutex<Option<RemoteErrorKind>>,
    retrieve_delay: Mutex<Option<Duration>>,
    retrieve_delay_script: Mutex<VecDeque<Duration>>,
    create_error: Mutex<Option<RemoteErrorKind>>,
    create_barrier: Mutex<Option<Arc<Barrier>>>,
    send_script: Mutex<VecDeque<Result<(), RemoteErrorKind>>>,
    send_calls: Mutex<Vec<Instant>>,
    retrieve_calls: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget a conversation as if the runtime deleted it.
    pub fn drop_conversation(&self, id: &str) {
        self.live.lock().remove(id);
    }

    pub fn fail_retrieve_with(&self, kind: RemoteErrorKind) {
        *self.retrieve_error.lock() = Some(kind);
    }

    pub fn delay_retrieve(&self, delay: Duration) {
        *self.retrieve_delay.lock() = Some(delay);
    }

    /// Delay upcoming retrieves one by one, in call order.
    pub fn delay_retrieves(&self, delays: impl IntoIterator<Item = Duration>) {
        self.retrieve_delay_script.lock().extend(delays);
    }

    pub fn fail_create_with(&self, kind: RemoteErrorKind) {
        *self.create_error.lock() = Some(kind);
    }

    /// Hold every `create_conversation` call until `parties` callers arrive.
    pub fn gate_creates(&self, parties: usize) {
        *self.create_barrier.lock() = Some(Arc::new(Barrier::new(parties)));
    }

    /// Queue outcomes for upcoming sends; an empty queue means success.
    pub fn script_sends(&self, outcomes: impl IntoIterator<Item = Result<(), RemoteErrorKind>>) {
        self.send_script.lock().extend(outcomes);
    }

    pub fn created(&self) -> Vec<CreatedConversation> {
        self.created.lock().clone()
    }

    pub fn send_calls(&self) -> Vec<Instant> {
        self.send_calls.lock().clone()
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentRuntime for FakeRuntime {
    async fn create_conversation(
        &self,
        agent_id: &str,
        isolation_labels: &[String],
        summary: &str,
    ) -> Result<String, RemoteError> {
        let barrier = self.create_barrier.lock().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }

        if let Some(kind) = *self.create_error.lock() {
            return Err(RemoteError::new(kind, "scripted create failure"));
        }

        let id = format!("conv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.live.lock().insert(id.clone());
        self.created.lock().push(CreatedConversation {
            id: id.clone(),
            agent_id: agent_id.to_string(),
            isolation_labels: isolation_labels.to_vec(),
            summary: summary.to_string(),
        });
        Ok(id)
    }

    async fn retrieve_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationPresence, RemoteError> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self.retrieve_delay_script.lock().pop_front();
        let delay = scripted.or(*self.retrieve_delay.lock());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(kind) = *self.retrieve_error.lock() {
            return Err(RemoteError::new(kind, "scripted retrieve failure"));
        }

        if self.live.lock().contains(conversation_id) {
            Ok(ConversationPresence::Present)
        } else {
            Ok(ConversationPresence::NotFound)
        }
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        _streaming: bool,
    ) -> Result<SendOutcome, RemoteError> {
        self.send_calls.lock().push(Instant::now());

        let scripted = self.send_script.lock().pop_front();
        if let Some(Err(kind)) = scripted {
            return Err(RemoteError::new(kind, "scripted send failure"));
        }

        Ok(SendOutcome {
            conversation_id: conversation_id.to_string(),
            messages: vec![AgentMessage {
                message_type: "assistant_message".into(),
                content: Some(format!("echo: {text}")),
            }],
        })
    }

    fn name(&self) -> &str {
        "fake"
    }
}
