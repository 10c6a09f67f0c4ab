//! Cleaner — long-interval deletion of expired, already-checked
//! messages and their observations.
//!
//! A message is eligible only once the sweeper has finalized it:
//! deleting an unchecked message would hide it from the sweeper forever
//! and corrupt uptime accounting.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::error::UptimeError;
use crate::store::{UptimeStore, DELETE_CHUNK_SIZE};

pub struct Cleaner {
    store: Arc<dyn UptimeStore>,
    config: MonitorConfig,
}

impl Cleaner {
    pub fn new(store: Arc<dyn UptimeStore>, config: MonitorConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.cleanup_interval());
        info!("cleaner started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("cleaner stopped");
                    return;
                }
                _ = tick.tick() => {
                    if let Err(e) = self.clean().await {
                        warn!(error = %e, "cleanup pass failed");
                    }
                }
            }
        }
    }

    /// Delete every checked message older than the expiry window, in
    /// bounded chunks so a large backlog never turns into one giant
    /// storage call.
    pub async fn clean(&self) -> Result<usize, UptimeError> {
        let cutoff = Utc::now() - self.config.expiry();
        let ids = self.store.expired_checked_ids(cutoff).await?;
        if ids.is_empty() {
            return Ok(0);
        }
        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            self.store.delete_messages(chunk).await?;
        }
        info!(deleted = ids.len(), "cleanup pass complete");
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Message, MessageId, Observation, ObservationStatus};
    use chrono::Duration;

    async fn seed(store: &MemoryStore, id: &str, age_hours: i64, checked: bool) {
        let at = Utc::now() - Duration::hours(age_hours);
        let message = Message {
            id: MessageId::from(id),
            last_observed_at: at,
            metrics_checked: checked,
        };
        store.save_message(&message).await.unwrap();
        store
            .save_observation_if_absent(&Observation {
                message_id: MessageId::from(id),
                guardian_addr: "0xaaa".into(),
                signature: "00".into(),
                observed_at: at,
                status: ObservationStatus::OnTime,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deletes_expired_checked_messages() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "1/chain1/1", 48, true).await;
        let cleaner = Cleaner::new(store.clone(), MonitorConfig::default());

        let deleted = cleaner.clean().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store
            .get_message(&MessageId::from("1/chain1/1"))
            .await
            .unwrap()
            .is_none());
        let obs = store
            .observations_for_message(&MessageId::from("1/chain1/1"))
            .await
            .unwrap();
        assert!(obs.is_empty());
    }

    #[tokio::test]
    async fn never_deletes_unchecked_messages() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "1/chain1/1", 48, false).await;
        let cleaner = Cleaner::new(store.clone(), MonitorConfig::default());

        let deleted = cleaner.clean().await.unwrap();
        assert_eq!(deleted, 0);
        assert!(store
            .get_message(&MessageId::from("1/chain1/1"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn leaves_recent_checked_messages() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "1/chain1/1", 1, true).await;
        let cleaner = Cleaner::new(store.clone(), MonitorConfig::default());

        let deleted = cleaner.clean().await.unwrap();
        assert_eq!(deleted, 0);
    }
}
