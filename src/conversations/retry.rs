//! Busy-aware delivery into an already-resolved conversation.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::error::ConversationError;
use crate::config::RetryConfig;
use crate::runtime::{AgentRuntime, SendOutcome};

/// Exponential backoff for sends rejected as busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Wait before retry number `attempt` (zero-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Sends one message, retrying only while the runtime reports the
/// conversation busy. Holds no state between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn send(
        &self,
        runtime: &dyn AgentRuntime,
        handle: &str,
        text: &str,
        streaming: bool,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome, ConversationError> {
        let mut attempt: u32 = 0;

        loop {
            let err = match runtime.send_message(handle, text, streaming).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_busy() => err,
                Err(err) => return Err(err.into()),
            };

            if attempt >= self.policy.max_retries {
                tracing::warn!(
                    conversation = handle,
                    attempts = attempt + 1,
                    "Conversation still busy, giving up"
                );
                return Err(ConversationError::BusyExhausted {
                    handle: handle.to_string(),
                    attempts: attempt + 1,
                    source: err,
                });
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                conversation = handle,
                attempt = attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Conversation busy, retrying"
            );

            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(ConversationError::Cancelled {
                        handle: handle.to_string(),
                        attempts: attempt + 1,
                    });
                }
                () = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}
