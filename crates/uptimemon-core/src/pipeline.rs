//! Ingestion pipeline — consumes verified observation and heartbeat
//! events from the transport's bounded channels, classifies on-time vs
//! late, and feeds the observation cache.
//!
//! The pipeline never throttles: it must keep draining or the upstream
//! transport stalls. A separate occupancy monitor provides visibility
//! into channel pressure.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::cache::ObservationCache;
use crate::config::MonitorConfig;
use crate::guardian::GuardianDirectory;
use crate::metrics::UptimeMetrics;
use crate::store::UptimeStore;
use crate::types::{
    chain_name, GuardianChainHeights, HeartbeatEvent, Message, MessageId, Observation,
    ObservationEvent, ObservationStatus,
};

/// Chain heights shared between the pipeline (writer) and the sweeper
/// (reader), behind its own lock.
pub type SharedChainHeights = Arc<RwLock<GuardianChainHeights>>;

pub struct IngestionPipeline {
    store: Arc<dyn UptimeStore>,
    directory: Arc<GuardianDirectory>,
    metrics: UptimeMetrics,
    cache: ObservationCache,
    heights: SharedChainHeights,
    config: MonitorConfig,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn UptimeStore>,
        directory: Arc<GuardianDirectory>,
        metrics: UptimeMetrics,
        heights: SharedChainHeights,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            directory,
            metrics,
            cache: ObservationCache::new(),
            heights,
            config,
        }
    }

    /// Select loop over both input channels, the flush ticker, and the
    /// shutdown signal. Performs one final best-effort drain on exit.
    pub async fn run(
        self,
        mut obs_rx: mpsc::Receiver<ObservationEvent>,
        mut hb_rx: mpsc::Receiver<HeartbeatEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut flush_tick = tokio::time::interval(self.config.flush_interval());
        let mut obs_open = true;
        let mut hb_open = true;
        info!("ingestion pipeline started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    self.flush().await;
                    info!("ingestion pipeline stopped");
                    return;
                }
                maybe = obs_rx.recv(), if obs_open => match maybe {
                    Some(ev) => self.process_observation(ev).await,
                    None => obs_open = false,
                },
                maybe = hb_rx.recv(), if hb_open => match maybe {
                    Some(hb) => self.process_heartbeat(hb),
                    None => hb_open = false,
                },
                _ = flush_tick.tick() => self.flush().await,
            }

            if !obs_open && !hb_open {
                self.flush().await;
                info!("input channels closed, ingestion pipeline stopped");
                return;
            }
        }
    }

    /// Classify and buffer one observation.
    ///
    /// Late/on-time is judged against the message's current
    /// `last_observed_at` plus the expiry window; a late observation
    /// never moves `last_observed_at`.
    pub async fn process_observation(&self, ev: ObservationEvent) {
        let id = MessageId::new(ev.message_id);
        let guardian_addr = ev.guardian_addr.to_lowercase();

        // Read-through: cache first, then storage, else synthesize.
        let mut message = match self.cache.message(&id) {
            Some(m) => m,
            None => match self.store.get_message(&id).await {
                Ok(Some(m)) => m,
                Ok(None) => Message::new(id.clone(), ev.observed_at),
                Err(e) => {
                    warn!(message_id = %id, error = %e, "message read failed, dropping observation");
                    return;
                }
            },
        };

        let status = if ev.observed_at > message.last_observed_at + self.config.expiry() {
            ObservationStatus::Late
        } else {
            ObservationStatus::OnTime
        };

        if self.cache.has_observation(&id, &guardian_addr) {
            debug!(message_id = %id, guardian = %guardian_addr, "duplicate observation discarded");
            return;
        }

        if status == ObservationStatus::OnTime && ev.observed_at > message.last_observed_at {
            message.last_observed_at = ev.observed_at;
        }
        self.cache.set_message(message);
        self.cache.set_observation(Observation {
            message_id: id.clone(),
            guardian_addr: guardian_addr.clone(),
            signature: hex::encode(&ev.signature),
            observed_at: ev.observed_at,
            status,
        });

        match id.chain_id() {
            Ok(chain_id) => match self.directory.name(&guardian_addr) {
                Some(name) => self.metrics.record_observation(name, &chain_name(chain_id)),
                // Still persisted; only per-guardian accounting skips it.
                None => warn!(guardian = %guardian_addr, "observation from unknown guardian"),
            },
            Err(e) => warn!(message_id = %id, error = %e, "unparsable message id"),
        }

        if self.cache.observation_count() >= self.config.flush_batch_size {
            self.flush().await;
        }
    }

    /// Record per-chain heights and the heartbeat counter gauge.
    pub fn process_heartbeat(&self, hb: HeartbeatEvent) {
        let Some(name) = self.directory.name(&hb.guardian_addr) else {
            warn!(guardian = %hb.guardian_addr, "heartbeat from unknown guardian");
            return;
        };

        {
            let mut heights = self.heights.write();
            for network in &hb.networks {
                heights
                    .entry(network.chain_id)
                    .or_default()
                    .insert(name.to_string(), network.height.max(0) as u64);
            }
        }
        for network in &hb.networks {
            self.metrics
                .set_chain_height(name, &chain_name(network.chain_id), network.height);
        }
        self.metrics.set_heartbeats(name, hb.counter);
    }

    /// Bulk-write the buffered window to storage and clear it.
    ///
    /// At-most-once per window: errors are logged, the batch is dropped,
    /// and redundant guardian reporting re-surfaces anything lost.
    pub async fn flush(&self) {
        if self.cache.is_empty() {
            return;
        }
        let (messages, observations) = self.cache.drain();
        debug!(
            messages = messages.len(),
            observations = observations.len(),
            "flushing observation cache"
        );

        if let Err(e) = self.store.save_messages(&messages).await {
            error!(error = %e, "message flush failed, batch dropped");
            return;
        }

        // Index rows only for unchecked messages: an index entry exists
        // iff metrics_checked is false.
        let pending: Vec<MessageId> = messages
            .iter()
            .filter(|m| !m.metrics_checked)
            .map(|m| m.id.clone())
            .collect();
        if let Err(e) = self.store.save_index_entries(&pending).await {
            error!(error = %e, "index flush failed");
        }

        for obs in &observations {
            if let Err(e) = self.store.save_observation_if_absent(obs).await {
                warn!(message_id = %obs.message_id, guardian = %obs.guardian_addr,
                      error = %e, "observation write failed, skipped");
            }
        }
    }
}

/// Samples a channel's occupancy on an interval and warns above the
/// configured utilization threshold. Observability only — holds a weak
/// sender so it never keeps the channel alive.
pub async fn monitor_channel<T>(
    name: &'static str,
    tx: mpsc::WeakSender<T>,
    config: MonitorConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(config.channel_monitor_interval());
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                let Some(tx) = tx.upgrade() else { return };
                let max = tx.max_capacity();
                let used = max - tx.capacity();
                let utilization = used as f64 / max as f64;
                debug!(channel = name, capacity = max, length = used, utilization,
                       "channel occupancy");
                if utilization > config.channel_warn_utilization {
                    warn!(channel = name, utilization,
                          "channel near capacity, upstream may stall or drop");
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardian::GuardianEntry;
    use crate::store::MemoryStore;
    use crate::types::HeartbeatNetwork;
    use chrono::{Duration, Utc};
    use prometheus::Registry;

    const ADDR_A: &str = "0xbeFA429d57cD18b7F8A4d91A2da9AB4AF05d0FBe";
    const ADDR_B: &str = "0x88D7D8B32a9105d228100E72dFFe2Fae0705D31c";
    const ADDR_C: &str = "0x58076F561CC62A47087B567C86f986426dFCD000";

    fn directory() -> Arc<GuardianDirectory> {
        let entries = vec![
            GuardianEntry::new(0, "guardian-0", ADDR_A),
            GuardianEntry::new(1, "guardian-1", ADDR_B),
            GuardianEntry::new(2, "guardian-2", ADDR_C),
        ];
        Arc::new(GuardianDirectory::from_entries(&entries).unwrap())
    }

    fn pipeline(store: Arc<MemoryStore>) -> IngestionPipeline {
        let registry = Registry::new();
        IngestionPipeline::new(
            store,
            directory(),
            UptimeMetrics::new(&registry).unwrap(),
            Arc::new(RwLock::new(GuardianChainHeights::new())),
            MonitorConfig::default(),
        )
    }

    fn event(message_id: &str, addr: &str, at: chrono::DateTime<Utc>) -> ObservationEvent {
        ObservationEvent {
            message_id: message_id.to_string(),
            guardian_addr: addr.to_string(),
            signature: vec![0xde, 0xad],
            observed_at: at,
        }
    }

    #[tokio::test]
    async fn two_on_time_observations_advance_last_observed() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone());
        let t = Utc::now();

        p.process_observation(event("1/chain1/1", ADDR_A, t)).await;
        p.process_observation(event("1/chain1/1", ADDR_B, t + Duration::seconds(1))).await;
        p.flush().await;

        let id = MessageId::from("1/chain1/1");
        let obs = store.observations_for_message(&id).await.unwrap();
        assert_eq!(obs.len(), 2);
        assert!(obs.iter().all(|o| o.status == ObservationStatus::OnTime));

        let msg = store.get_message(&id).await.unwrap().unwrap();
        assert_eq!(msg.last_observed_at, t + Duration::seconds(1));
        assert!(!msg.metrics_checked);
        assert_eq!(store.index_len(), 1);
    }

    #[tokio::test]
    async fn observation_past_expiry_is_late_and_frozen() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone());
        let t = Utc::now();

        p.process_observation(event("1/chain1/1", ADDR_A, t)).await;
        p.process_observation(event("1/chain1/1", ADDR_B, t + Duration::seconds(1))).await;
        p.flush().await;

        // 31h after the last on-time observation: beyond the 30h window.
        p.process_observation(event("1/chain1/1", ADDR_C, t + Duration::hours(31))).await;
        p.flush().await;

        let id = MessageId::from("1/chain1/1");
        let obs = store.observations_for_message(&id).await.unwrap();
        let late = obs
            .iter()
            .find(|o| o.guardian_addr == ADDR_C.to_lowercase())
            .unwrap();
        assert_eq!(late.status, ObservationStatus::Late);

        let msg = store.get_message(&id).await.unwrap().unwrap();
        assert_eq!(msg.last_observed_at, t + Duration::seconds(1));
    }

    #[tokio::test]
    async fn redelivery_within_window_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone());
        let t = Utc::now();

        p.process_observation(event("1/chain1/1", ADDR_A, t)).await;
        p.process_observation(event("1/chain1/1", ADDR_B, t + Duration::seconds(1))).await;
        p.process_observation(event("1/chain1/1", ADDR_A, t + Duration::hours(2))).await;
        p.flush().await;

        let obs = store
            .observations_for_message(&MessageId::from("1/chain1/1"))
            .await
            .unwrap();
        assert_eq!(obs.len(), 2);
    }

    #[tokio::test]
    async fn redelivery_across_windows_resolved_by_storage() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone());
        let t = Utc::now();

        p.process_observation(event("1/chain1/1", ADDR_A, t)).await;
        p.flush().await;
        // New window: the cache is empty, storage arbitrates.
        p.process_observation(event("1/chain1/1", ADDR_A, t + Duration::hours(1))).await;
        p.flush().await;

        let obs = store
            .observations_for_message(&MessageId::from("1/chain1/1"))
            .await
            .unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].observed_at, t); // first write wins
    }

    #[tokio::test]
    async fn unknown_guardian_observation_still_persisted() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone());

        p.process_observation(event(
            "1/chain1/1",
            "0x0000000000000000000000000000000000000001",
            Utc::now(),
        ))
        .await;
        p.flush().await;

        let obs = store
            .observations_for_message(&MessageId::from("1/chain1/1"))
            .await
            .unwrap();
        assert_eq!(obs.len(), 1);
    }

    #[tokio::test]
    async fn batch_threshold_triggers_flush() {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::new();
        let config = MonitorConfig {
            flush_batch_size: 2,
            ..Default::default()
        };
        let p = IngestionPipeline::new(
            store.clone(),
            directory(),
            UptimeMetrics::new(&registry).unwrap(),
            Arc::new(RwLock::new(GuardianChainHeights::new())),
            config,
        );
        let t = Utc::now();

        p.process_observation(event("1/chain1/1", ADDR_A, t)).await;
        assert_eq!(store.message_count(), 0); // still buffered
        p.process_observation(event("1/chain1/1", ADDR_B, t)).await;
        assert_eq!(store.message_count(), 1); // threshold flushed
    }

    #[tokio::test]
    async fn heartbeat_updates_heights_and_gauges() {
        let store = Arc::new(MemoryStore::new());
        let heights: SharedChainHeights = Arc::new(RwLock::new(GuardianChainHeights::new()));
        let registry = Registry::new();
        let p = IngestionPipeline::new(
            store,
            directory(),
            UptimeMetrics::new(&registry).unwrap(),
            heights.clone(),
            MonitorConfig::default(),
        );

        p.process_heartbeat(HeartbeatEvent {
            guardian_addr: ADDR_A.to_string(),
            counter: 42,
            networks: vec![HeartbeatNetwork {
                chain_id: 2,
                height: 19_000_000,
                contract_address: "0x98f3c9e6E3fAce36bAAd05FE09d375Ef1464288B".into(),
                error_count: 0,
            }],
            version: "v2.3.0".into(),
        });

        assert_eq!(heights.read()[&2]["guardian-0"], 19_000_000);
    }

    #[tokio::test]
    async fn heartbeat_from_unknown_guardian_skipped() {
        let store = Arc::new(MemoryStore::new());
        let heights: SharedChainHeights = Arc::new(RwLock::new(GuardianChainHeights::new()));
        let registry = Registry::new();
        let p = IngestionPipeline::new(
            store,
            directory(),
            UptimeMetrics::new(&registry).unwrap(),
            heights.clone(),
            MonitorConfig::default(),
        );

        p.process_heartbeat(HeartbeatEvent {
            guardian_addr: "0x0000000000000000000000000000000000000002".into(),
            counter: 1,
            networks: vec![],
            version: "v2.3.0".into(),
        });

        assert!(heights.read().is_empty());
    }
}
