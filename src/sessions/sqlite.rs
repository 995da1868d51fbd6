//! SQLite-backed conversation store.
//!
//! The unique indexes on the routing tuples are the only concurrency control.
//! Several processes may open the same database file; WAL mode and a busy
//! timeout keep their writers from failing on transient lock contention.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::traits::{
    ConversationStore, InterAgentConversation, InterAgentKey, RoomConversation, RoomKey,
    StoreError, StoreStats,
};
use crate::routing::Strategy;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS room_conversations (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    context_id          TEXT NOT NULL,
    agent_id            TEXT NOT NULL,
    conversation_handle TEXT NOT NULL,
    strategy            TEXT NOT NULL,
    isolation_key       TEXT NOT NULL DEFAULT '',
    created_at          TEXT NOT NULL,
    last_activity_at    TEXT NOT NULL,
    UNIQUE (context_id, agent_id, isolation_key)
);
CREATE INDEX IF NOT EXISTS idx_room_conversations_activity
    ON room_conversations (last_activity_at);
CREATE INDEX IF NOT EXISTS idx_room_conversations_handle
    ON room_conversations (conversation_handle);

CREATE TABLE IF NOT EXISTS inter_agent_conversations (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    source_agent_id     TEXT NOT NULL,
    target_agent_id     TEXT NOT NULL,
    context_id          TEXT NOT NULL,
    conversation_handle TEXT NOT NULL,
    isolation_key       TEXT NOT NULL DEFAULT '',
    created_at          TEXT NOT NULL,
    last_activity_at    TEXT NOT NULL,
    UNIQUE (source_agent_id, target_agent_id, context_id, isolation_key)
);
CREATE INDEX IF NOT EXISTS idx_inter_agent_conversations_activity
    ON inter_agent_conversations (last_activity_at);
CREATE INDEX IF NOT EXISTS idx_inter_agent_conversations_handle
    ON inter_agent_conversations (conversation_handle);
";

/// Conversation mappings persisted in a SQLite database file.
pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteConversationStore {
    /// Open (or create) the database at `db_path` and apply the schema.
    pub fn new(db_path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Task(format!(
                        "failed to create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(busy_timeout)?;
        let _journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;

        tracing::debug!(path = %db_path.display(), "Conversation store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    // Fixed-width UTC so lexical order matches chronological order.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp '{raw}': {e}")))
}

fn stored_isolation_key(isolation_key: Option<&String>) -> String {
    isolation_key.cloned().unwrap_or_default()
}

fn loaded_isolation_key(raw: String) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

/// Map an insert failure, turning a unique-index violation into `Conflict`.
fn map_insert_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::Conflict
        }
        _ => StoreError::Sqlite(err),
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn get(&self, key: &RoomKey) -> Result<Option<RoomConversation>, StoreError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT conversation_handle, strategy, created_at, last_activity_at
                     FROM room_conversations
                     WHERE context_id = ?1 AND agent_id = ?2 AND isolation_key = ?3",
                    params![
                        key.context_id,
                        key.agent_id,
                        stored_isolation_key(key.isolation_key.as_ref())
                    ],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            let Some((conversation_id, strategy, created_at, last_activity)) = row else {
                return Ok(None);
            };

            Ok(Some(RoomConversation {
                key,
                conversation_id,
                strategy: strategy.parse().map_err(StoreError::Corrupt)?,
                created_at: parse_timestamp(&created_at)?,
                last_activity: parse_timestamp(&last_activity)?,
            }))
        })
        .await
    }

    async fn create(
        &self,
        key: &RoomKey,
        conversation_id: &str,
        strategy: Strategy,
    ) -> Result<RoomConversation, StoreError> {
        let key = key.clone();
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now();
            let stamp = format_timestamp(now);
            conn.execute(
                "INSERT INTO room_conversations
                    (context_id, agent_id, conversation_handle, strategy, isolation_key,
                     created_at, last_activity_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    key.context_id,
                    key.agent_id,
                    conversation_id,
                    strategy.as_str(),
                    stored_isolation_key(key.isolation_key.as_ref()),
                    stamp
                ],
            )
            .map_err(map_insert_error)?;

            Ok(RoomConversation {
                key,
                conversation_id,
                strategy,
                created_at: now,
                last_activity: now,
            })
        })
        .await
    }

    async fn touch(&self, key: &RoomKey) -> Result<(), StoreError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE room_conversations SET last_activity_at = ?4
                 WHERE context_id = ?1 AND agent_id = ?2 AND isolation_key = ?3",
                params![
                    key.context_id,
                    key.agent_id,
                    stored_isolation_key(key.isolation_key.as_ref()),
                    format_timestamp(Utc::now())
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &RoomKey) -> Result<bool, StoreError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM room_conversations
                 WHERE context_id = ?1 AND agent_id = ?2 AND isolation_key = ?3",
                params![
                    key.context_id,
                    key.agent_id,
                    stored_isolation_key(key.isolation_key.as_ref())
                ],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn delete_if_handle(
        &self,
        key: &RoomKey,
        conversation_id: &str,
    ) -> Result<bool, StoreError> {
        let key = key.clone();
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM room_conversations
                 WHERE context_id = ?1 AND agent_id = ?2 AND isolation_key = ?3
                   AND conversation_handle = ?4",
                params![
                    key.context_id,
                    key.agent_id,
                    stored_isolation_key(key.isolation_key.as_ref()),
                    conversation_id
                ],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM room_conversations WHERE last_activity_at < ?1",
                params![format_timestamp(cutoff)],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn get_inter_agent(
        &self,
        key: &InterAgentKey,
    ) -> Result<Option<InterAgentConversation>, StoreError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT conversation_handle, created_at, last_activity_at
                     FROM inter_agent_conversations
                     WHERE source_agent_id = ?1 AND target_agent_id = ?2
                       AND context_id = ?3 AND isolation_key = ?4",
                    params![
                        key.source_agent_id,
                        key.target_agent_id,
                        key.context_id,
                        stored_isolation_key(key.isolation_key.as_ref())
                    ],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            let Some((conversation_id, created_at, last_activity)) = row else {
                return Ok(None);
            };

            Ok(Some(InterAgentConversation {
                key,
                conversation_id,
                created_at: parse_timestamp(&created_at)?,
                last_activity: parse_timestamp(&last_activity)?,
            }))
        })
        .await
    }

    async fn create_inter_agent(
        &self,
        key: &InterAgentKey,
        conversation_id: &str,
    ) -> Result<InterAgentConversation, StoreError> {
        let key = key.clone();
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO inter_agent_conversations
                    (source_agent_id, target_agent_id, context_id, conversation_handle,
                     isolation_key, created_at, last_activity_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    key.source_agent_id,
                    key.target_agent_id,
                    key.context_id,
                    conversation_id,
                    stored_isolation_key(key.isolation_key.as_ref()),
                    format_timestamp(now)
                ],
            )
            .map_err(map_insert_error)?;

            Ok(InterAgentConversation {
                key,
                conversation_id,
                created_at: now,
                last_activity: now,
            })
        })
        .await
    }

    async fn touch_inter_agent(&self, key: &InterAgentKey) -> Result<(), StoreError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE inter_agent_conversations SET last_activity_at = ?5
                 WHERE source_agent_id = ?1 AND target_agent_id = ?2
                   AND context_id = ?3 AND isolation_key = ?4",
                params![
                    key.source_agent_id,
                    key.target_agent_id,
                    key.context_id,
                    stored_isolation_key(key.isolation_key.as_ref()),
                    format_timestamp(Utc::now())
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_inter_agent(&self, key: &InterAgentKey) -> Result<bool, StoreError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM inter_agent_conversations
                 WHERE source_agent_id = ?1 AND target_agent_id = ?2
                   AND context_id = ?3 AND isolation_key = ?4",
                params![
                    key.source_agent_id,
                    key.target_agent_id,
                    key.context_id,
                    stored_isolation_key(key.isolation_key.as_ref())
                ],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn delete_inter_agent_if_handle(
        &self,
        key: &InterAgentKey,
        conversation_id: &str,
    ) -> Result<bool, StoreError> {
        let key = key.clone();
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM inter_agent_conversations
                 WHERE source_agent_id = ?1 AND target_agent_id = ?2
                   AND context_id = ?3 AND isolation_key = ?4
                   AND conversation_handle = ?5",
                params![
                    key.source_agent_id,
                    key.target_agent_id,
                    key.context_id,
                    stored_isolation_key(key.isolation_key.as_ref()),
                    conversation_id
                ],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn delete_inter_agent_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM inter_agent_conversations WHERE last_activity_at < ?1",
                params![format_timestamp(cutoff)],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn touch_conversation(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let stamp = format_timestamp(Utc::now());
            let rooms = conn.execute(
                "UPDATE room_conversations SET last_activity_at = ?2
                 WHERE conversation_handle = ?1",
                params![conversation_id, stamp],
            )?;
            let relays = conn.execute(
                "UPDATE inter_agent_conversations SET last_activity_at = ?2
                 WHERE conversation_handle = ?1",
                params![conversation_id, stamp],
            )?;
            Ok(rooms + relays)
        })
        .await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.with_conn(|conn| {
            let rooms: i64 =
                conn.query_row("SELECT COUNT(*) FROM room_conversations", [], |row| {
                    row.get(0)
                })?;
            let relays: i64 =
                conn.query_row("SELECT COUNT(*) FROM inter_agent_conversations", [], |row| {
                    row.get(0)
                })?;
            Ok(StoreStats {
                room_conversations: usize::try_from(rooms).unwrap_or_default(),
                inter_agent_conversations: usize::try_from(relays).unwrap_or_default(),
            })
        })
        .await
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
