//! Uptime sweeper — the periodic accounting job.
//!
//! Every tick it pulls the messages whose expiry window has closed,
//! charges each non-observing guardian one missed observation per
//! message, marks the messages checked, and drops their index entries.
//! The same cadence also refreshes per-guardian chain-height deficits
//! from the latest heartbeat data.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::UptimeError;
use crate::guardian::GuardianDirectory;
use crate::metrics::UptimeMetrics;
use crate::pipeline::SharedChainHeights;
use crate::store::UptimeStore;
use crate::types::{chain_name, Message, MessageId};

/// Marks a (chain, guardian) pair already credited for the message at
/// hand, so duplicate observation rows can never decrement twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeenKey {
    chain_id: u16,
    guardian: String,
}

pub struct UptimeSweeper {
    store: Arc<dyn UptimeStore>,
    directory: Arc<GuardianDirectory>,
    metrics: UptimeMetrics,
    heights: SharedChainHeights,
    config: MonitorConfig,
}

impl UptimeSweeper {
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
            heights,
            config,
        }
    }

    /// Ticker loop until shutdown. Sweep failures are logged and the
    /// next tick retries from storage; nothing is lost because index
    /// entries survive until a sweep completes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.sweep_interval());
        info!("uptime sweeper started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("uptime sweeper stopped");
                    return;
                }
                _ = tick.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "sweep failed, retrying next tick");
                    }
                    self.update_height_deficits();
                }
            }
        }
    }

    /// One sweep pass over every due message.
    ///
    /// Per message, decrement-and-emit completes before its index entry
    /// is deleted: a crash mid-sweep re-counts on restart rather than
    /// silently dropping a message.
    pub async fn sweep(&self) -> Result<(), UptimeError> {
        let cutoff = Utc::now() - self.config.expiry();
        let due = self.store.due_messages(cutoff).await?;
        if due.is_empty() {
            return Ok(());
        }
        debug!(due = due.len(), "sweeping expired messages");

        let tally = tally_per_chain(&due);
        let mut missing = init_missing_counts(&self.directory, &tally);

        for message in &due {
            let Ok(chain_id) = message.id.chain_id() else {
                warn!(message_id = %message.id, "unparsable message id, excluded from tally");
                continue;
            };
            let observations = self.store.observations_for_message(&message.id).await?;
            let mut seen: HashSet<SeenKey> = HashSet::with_capacity(observations.len());
            for obs in &observations {
                let Some(name) = self.directory.name(&obs.guardian_addr) else {
                    warn!(guardian = %obs.guardian_addr, "observation from unknown guardian, not credited");
                    continue;
                };
                let key = SeenKey {
                    chain_id,
                    guardian: name.to_string(),
                };
                if !seen.insert(key) {
                    continue;
                }
                if let Some(per_chain) = missing.get_mut(name) {
                    *per_chain.entry(chain_id).or_insert(0) -= 1;
                }
            }
        }

        for (guardian, per_chain) in &missing {
            for (&chain_id, &count) in per_chain {
                if count < 0 {
                    warn!(guardian = %guardian, chain = %chain_name(chain_id), count,
                          "negative missing count, skipped");
                    continue;
                }
                if count > 0 {
                    self.metrics
                        .add_missing(guardian, &chain_name(chain_id), count as u64);
                }
            }
        }

        let checked: Vec<Message> = due
            .iter()
            .map(|m| Message {
                metrics_checked: true,
                ..m.clone()
            })
            .collect();
        self.store.save_messages(&checked).await?;

        let ids: Vec<MessageId> = due.iter().map(|m| m.id.clone()).collect();
        self.store.delete_index_entries(&ids).await?;
        debug!(checked = ids.len(), "sweep complete");
        Ok(())
    }

    /// Refresh `chain_height_deficit` from the latest heartbeat heights.
    /// Pairs without recent heartbeats keep their last known value.
    pub fn update_height_deficits(&self) {
        let heights = self.heights.read();
        for (&chain_id, per_guardian) in heights.iter() {
            let Some(&max) = per_guardian.values().max() else {
                continue;
            };
            let chain = chain_name(chain_id);
            for (guardian, &height) in per_guardian {
                self.metrics
                    .set_height_deficit(guardian, &chain, (max - height) as i64);
            }
        }
    }
}

/// Count of due messages per chain. Messages with an unparsable id are
/// excluded here and in the decrement step.
fn tally_per_chain(due: &[Message]) -> HashMap<u16, i64> {
    let mut tally = HashMap::new();
    for message in due {
        if let Ok(chain_id) = message.id.chain_id() {
            *tally.entry(chain_id).or_insert(0) += 1;
        }
    }
    tally
}

/// Start every guardian at the full per-chain tally: assume each missed
/// every message until an observation proves otherwise.
fn init_missing_counts(
    directory: &GuardianDirectory,
    tally: &HashMap<u16, i64>,
) -> HashMap<String, HashMap<u16, i64>> {
    let mut missing = HashMap::with_capacity(directory.len());
    for guardian in directory.names() {
        let per_chain: HashMap<u16, i64> = tally.iter().map(|(&c, &n)| (c, n)).collect();
        missing.insert(guardian.to_string(), per_chain);
    }
    missing
}

// ─── Tests ───────────────────────────────────────────────────────────────────
