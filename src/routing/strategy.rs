//! Isolation strategy resolution for room conversations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How conversations inside one chat context are split.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Everyone in the context shares one conversation per agent.
    PerRoom,
    /// Each isolation key (typically a user) gets its own conversation.
    PerUser,
}

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PerRoom => "per-room",
            Self::PerUser => "per-user",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "per-room" => Ok(Self::PerRoom),
            "per-user" => Ok(Self::PerUser),
            other => Err(format!(
                "unknown conversation strategy '{other}'. Supported values: per-room, per-user"
            )),
        }
    }
}

/// Pick the isolation strategy for a context from its member count.
///
/// Two-party contexts get one conversation per user; everything else
/// (including single-member and empty contexts) shares one per room.
pub fn resolve_strategy(_context_id: &str, member_count: usize) -> Strategy {
    if member_count == 2 {
        Strategy::PerUser
    } else {
        Strategy::PerRoom
    }
}

/// Collapse blank isolation keys to `None`.
pub fn normalize_isolation_key(isolation_key: Option<&str>) -> Option<String> {
    isolation_key
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(ToString::to_string)
}

/// The isolation key that actually participates in the routing tuple.
///
/// Per-room routing ignores whatever the caller supplied.
pub fn effective_isolation_key(strategy: Strategy, isolation_key: Option<&str>) -> Option<String> {
    match strategy {
        Strategy::PerRoom => None,
        Strategy::PerUser => normalize_isolation_key(isolation_key),
    }
}
