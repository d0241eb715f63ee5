use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use huddle_db::BlobStore;

use crate::coordinator::Coordinator;

/// Deletes messages older than the TTL, along with their uploaded blobs.
pub struct Sweeper {
    coordinator: Coordinator,
    blobs: Arc<BlobStore>,
    ttl: Duration,
}

impl Sweeper {
    pub fn new(coordinator: Coordinator, blobs: Arc<BlobStore>, ttl: Duration) -> Self {
        Self {
            coordinator,
            blobs,
            ttl,
        }
    }

    /// Sweep once immediately, then every `interval`.
    pub async fn run(self, interval: Duration) {
        let mut interval = tokio::time::interval(interval);

        loop {
            interval.tick().await;

            match self.sweep_at(Utc::now()).await {
                Ok(ids) => {
                    if !ids.is_empty() {
                        info!("Retention: deleted {} expired messages", ids.len());
                    }
                }
                Err(e) => {
                    warn!("Retention sweep error: {}", e);
                }
            }
        }
    }

    /// Delete everything created strictly before `now - ttl`, plus anything
    /// the store evicted since the last sweep. Returns the deleted message
    /// ids.
    ///
    /// Records are removed and broadcast before their blobs are unlinked; a
    /// crash in between may orphan blobs.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<String>> {
        let ttl = chrono::Duration::from_std(self.ttl)?;
        let cutoff = now - ttl;

        let expired = self.coordinator.expire_before(cutoff).await;

        let mut ids = Vec::with_capacity(expired.len());
        for message in expired {
            if let Some(attachment) = &message.attachment {
                if let Err(e) = self.blobs.remove(&attachment.url).await {
                    warn!("Failed to delete blob {} for {}: {}", attachment.url, message.id, e);
                }
            }
            ids.push(message.id);
        }

        Ok(ids)
    }
}
