//! HTTP client for the remote agent runtime.
//!
//! Status codes and transport failures are mapped to [`RemoteErrorKind`]
//! here and nowhere else.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::sanitize_error_body;
use super::traits::{
    AgentMessage, AgentRuntime, ConversationPresence, RemoteError, RemoteErrorKind, SendOutcome,
};

/// Talks to the runtime's `/v1/conversations` API.
pub struct HttpAgentRuntime {
    base_url: Url,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CreateConversationRequest<'a> {
    agent_id: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    isolated_block_labels: &'a [String],
    summary: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateConversationResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    messages: Vec<InputMessage<'a>>,
    streaming: bool,
}

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    #[serde(default)]
    messages: Vec<AgentMessage>,
}

impl HttpAgentRuntime {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url.trim())
            .with_context(|| format!("runtime.base_url '{base_url}' is not a valid URL"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("runtime.base_url '{base_url}' cannot carry a path");
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build the runtime HTTP client")?;

        Ok(Self {
            base_url,
            api_key: api_key
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(ToString::to_string),
            client,
        })
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn conversations_url(&self) -> Url {
        self.endpoint(&["v1", "conversations"])
    }

    fn conversation_url(&self, conversation_id: &str) -> Url {
        self.endpoint(&["v1", "conversations", conversation_id])
    }

    fn messages_url(&self, conversation_id: &str) -> Url {
        self.endpoint(&["v1", "conversations", conversation_id, "messages"])
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Turn a non-success response into a classified error.
    async fn response_error(&self, op: &str, response: reqwest::Response) -> RemoteError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read runtime error body>".to_string());
        let sanitized = sanitize_error_body(&body, self.api_key.as_deref());
        RemoteError::new(classify_status(status), format!("{op} failed ({status}): {sanitized}"))
            .with_status(status.as_u16())
    }
}

/// Map an HTTP status to the error kind it represents.
pub fn classify_status(status: StatusCode) -> RemoteErrorKind {
    match status {
        StatusCode::NOT_FOUND => RemoteErrorKind::NotFound,
        StatusCode::CONFLICT | StatusCode::LOCKED => RemoteErrorKind::Busy,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RemoteErrorKind::Timeout,
        _ => RemoteErrorKind::ServerError,
    }
}

fn transport_error(op: &str, err: &reqwest::Error) -> RemoteError {
    let kind = if err.is_timeout() {
        RemoteErrorKind::Timeout
    } else {
        RemoteErrorKind::ServerError
    };
    RemoteError::new(kind, format!("{op} request failed: {err}"))
}

/// Extract agent messages from a server-sent-event body.
fn parse_stream_messages(body: &str) -> Vec<AgentMessage> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty() && *data != "[DONE]")
        .filter_map(|data| match serde_json::from_str::<AgentMessage>(data) {
            Ok(message) => Some(message),
            Err(error) => {
                tracing::debug!(%error, "Skipping undecodable stream event");
                None
            }
        })
        .collect()
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn create_conversation(
        &self,
        agent_id: &str,
        isolation_labels: &[String],
        summary: &str,
    ) -> Result<String, RemoteError> {
        let request = CreateConversationRequest {
            agent_id,
            isolated_block_labels: isolation_labels,
            summary,
        };

        let response = self
            .authorize(self.client.post(self.conversations_url()).json(&request))
            .send()
            .await
            .map_err(|e| transport_error("create conversation", &e))?;

        if !response.status().is_success() {
            return Err(self.response_error("create conversation", response).await);
        }

        let created: CreateConversationResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::server(format!("invalid create conversation response: {e}")))?;

        if created.id.trim().is_empty() {
            return Err(RemoteError::server(
                "create conversation returned an empty conversation id",
            ));
        }

        Ok(created.id)
    }

    async fn retrieve_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationPresence, RemoteError> {
        let response = self
            .authorize(self.client.get(self.conversation_url(conversation_id)))
            .send()
            .await
            .map_err(|e| transport_error("retrieve conversation", &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(ConversationPresence::Present);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(ConversationPresence::NotFound);
        }

        Err(self.response_error("retrieve conversation", response).await)
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        streaming: bool,
    ) -> Result<SendOutcome, RemoteError> {
        let request = SendMessageRequest {
            messages: vec![InputMessage {
                role: "user",
                content: text,
            }],
            streaming,
        };

        let response = self
            .authorize(
                self.client
                    .post(self.messages_url(conversation_id))
                    .json(&request),
            )
            .send()
            .await
            .map_err(|e| transport_error("send message", &e))?;

        if !response.status().is_success() {
            return Err(self.response_error("send message", response).await);
        }

        let messages = if streaming {
            let body = response
                .text()
                .await
                .map_err(|e| transport_error("read message stream", &e))?;
            parse_stream_messages(&body)
        } else {
            let parsed: SendMessageResponse = response
                .json()
                .await
                .map_err(|e| RemoteError::server(format!("invalid send message response: {e}")))?;
            parsed.messages
        };

        Ok(SendOutcome {
            conversation_id: conversation_id.to_string(),
            messages,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}
