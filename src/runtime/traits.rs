//! Remote agent runtime contract and its closed error taxonomy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every remote failure is assigned exactly one kind at the client boundary.
/// Callers switch on the kind, never on message text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The conversation does not exist on the remote side.
    NotFound,
    /// The conversation is already processing another message.
    Busy,
    /// Any other remote, transport, or decoding failure.
    ServerError,
    /// The call did not finish within its deadline.
    Timeout,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not found",
            Self::Busy => "busy",
            Self::ServerError => "server error",
            Self::Timeout => "timeout",
        })
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("agent runtime {kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::ServerError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteErrorKind::NotFound
    }

    pub fn is_busy(&self) -> bool {
        self.kind == RemoteErrorKind::Busy
    }
}

/// Result of asking the remote runtime whether a conversation still exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPresence {
    Present,
    NotFound,
}

/// A single message returned by the agent in reply to a send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentMessage {
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// What the remote runtime returned for one delivered message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendOutcome {
    pub conversation_id: String,
    pub messages: Vec<AgentMessage>,
}

impl SendOutcome {
    /// Concatenated assistant text, in reply order.
    pub fn assistant_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.message_type == "assistant_message")
            .filter_map(|m| m.content.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The remote agent runtime that owns conversations.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Create a conversation owned by `agent_id`. Returns its opaque handle.
    async fn create_conversation(
        &self,
        agent_id: &str,
        isolation_labels: &[String],
        summary: &str,
    ) -> Result<String, RemoteError>;

    /// Check whether a conversation handle is still valid remotely.
    async fn retrieve_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationPresence, RemoteError>;

    /// Deliver one user message into a conversation.
    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        streaming: bool,
    ) -> Result<SendOutcome, RemoteError>;

    /// The name of this runtime implementation.
    fn name(&self) -> &str;
}
