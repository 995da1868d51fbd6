use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::sessions::{ConversationStore, StoreError};

/// Deletes local mappings that have been idle too long. Remote
/// conversations are left alone.
#[derive(Clone)]
pub struct CleanupSweeper {
    store: Arc<dyn ConversationStore>,
}

impl CleanupSweeper {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// One pass over both tables. Returns `(room, inter_agent)` deletions.
    pub async fn delete_stale(&self, days: u32) -> Result<(usize, usize), StoreError> {
        let cutoff = Utc::now()
            .checked_sub_signed(ChronoDuration::days(i64::from(days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let rooms = self.store.delete_older_than(cutoff).await?;
        let relays = self.store.delete_inter_agent_older_than(cutoff).await?;

        tracing::info!(
            days,
            room_conversations = rooms,
            inter_agent_conversations = relays,
            "Removed stale conversation mappings"
        );
        Ok((rooms, relays))
    }

    /// Sweep every `interval` until `cancel` fires. A failed pass is logged
    /// and the loop keeps going.
    pub async fn run_periodic(&self, interval: Duration, days: u32, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Cleanup sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.delete_stale(days).await {
                        tracing::error!("Cleanup pass failed: {e}");
                    }
                }
            }
        }
    }
}
