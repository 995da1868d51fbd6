//! Conversation routing: how a chat context is split into agent conversations.

pub mod strategy;

pub use strategy::{effective_isolation_key, normalize_isolation_key, resolve_strategy, Strategy};
