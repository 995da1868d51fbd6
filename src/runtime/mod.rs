//! Remote agent runtime client.
//!
//! The runtime owns conversations; this crate only keeps handles to them.
//! Implementations of [`AgentRuntime`] classify every failure into a
//! [`RemoteErrorKind`] before it leaves the client.

pub mod http;
pub mod traits;

pub use http::HttpAgentRuntime;
pub use traits::{
    AgentMessage, AgentRuntime, ConversationPresence, RemoteError, RemoteErrorKind, SendOutcome,
};

use crate::config::RuntimeConfig;
use std::time::Duration;

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Factory: create the configured runtime client.
pub fn create_runtime(config: &RuntimeConfig) -> anyhow::Result<Box<dyn AgentRuntime>> {
    match config.kind.as_str() {
        "http" => {
            let base_url = config.base_url.trim();
            if base_url.is_empty() {
                anyhow::bail!(
                    "runtime.base_url is not set. Set it in config.toml or ROOMBRIDGE_BASE_URL"
                );
            }
            if config.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
                anyhow::bail!(
                    "runtime.api_key is not set. Set it in config.toml or ROOMBRIDGE_API_KEY"
                );
            }
            Ok(Box::new(HttpAgentRuntime::new(
                base_url,
                config.api_key.as_deref(),
                Duration::from_secs(config.request_timeout_secs),
            )?))
        }
        other if other.trim().is_empty() => {
            anyhow::bail!("runtime.kind cannot be empty. Supported values: http")
        }
        other => anyhow::bail!("Unknown runtime kind '{other}'. Supported values: http"),
    }
}

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

/// Redact well-known token shapes and the configured key itself.
fn scrub_secrets(input: &str, api_key: Option<&str>) -> String {
    const PREFIXES: [&str; 4] = ["sk-", "sk_", "Bearer ", "token="];

    let mut scrubbed = match api_key.filter(|k| !k.is_empty()) {
        Some(key) => input.replace(key, "[REDACTED]"),
        None => input.to_string(),
    };

    for prefix in PREFIXES {
        let mut search_from = 0;
        while let Some(rel) = scrubbed[search_from..].find(prefix) {
            let content_start = search_from + rel + prefix.len();
            let content_len: usize = scrubbed[content_start..]
                .chars()
                .take_while(|c| is_secret_char(*c))
                .map(char::len_utf8)
                .sum();

            if content_len == 0 {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(content_start..content_start + content_len, "[REDACTED]");
            search_from = content_start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Scrub secrets from a remote error body and cap its length.
pub fn sanitize_error_body(body: &str, api_key: Option<&str>) -> String {
    let scrubbed = scrub_secrets(body.trim(), api_key);

    if scrubbed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return scrubbed;
    }

    let end = scrubbed
        .char_indices()
        .nth(MAX_ERROR_BODY_CHARS)
        .map_or(scrubbed.len(), |(i, _)| i);
    format!("{}...", &scrubbed[..end])
}
