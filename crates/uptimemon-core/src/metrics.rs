//! Uptime metric definitions.
//!
//! This core only increments counters and sets gauges; scraping and
//! remote-write belong to the embedding process.

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

use crate::error::UptimeError;
use crate::guardian::GuardianDirectory;
use crate::types::chain_name;

/// Central metrics handle, cheap to clone.
#[derive(Clone, Debug)]
pub struct UptimeMetrics {
    observations_total: IntCounterVec,
    observations_missing_total: IntCounterVec,
    chain_height: IntGaugeVec,
    chain_height_deficit: IntGaugeVec,
    heartbeats: IntGaugeVec,
}

impl UptimeMetrics {
    /// Create and register all series against `registry`.
    ///
    /// Registration failure (duplicate names) is a startup error.
    pub fn new(registry: &Registry) -> Result<Self, UptimeError> {
        let observations_total = IntCounterVec::new(
            Opts::new(
                "observations_total",
                "Total observations received from each guardian on each chain",
            ),
            &["guardian", "chain"],
        )
        .map_err(|e| UptimeError::Config(e.to_string()))?;

        let observations_missing_total = IntCounterVec::new(
            Opts::new(
                "observations_missing_total",
                "Total observations missed by each guardian on each chain",
            ),
            &["guardian", "chain"],
        )
        .map_err(|e| UptimeError::Config(e.to_string()))?;

        let chain_height = IntGaugeVec::new(
            Opts::new(
                "chain_height",
                "Latest block height reported by each guardian on each chain",
            ),
            &["guardian", "chain"],
        )
        .map_err(|e| UptimeError::Config(e.to_string()))?;

        let chain_height_deficit = IntGaugeVec::new(
            Opts::new(
                "chain_height_deficit",
                "Height difference of each guardian from the max height on each chain",
            ),
            &["guardian", "chain"],
        )
        .map_err(|e| UptimeError::Config(e.to_string()))?;

        let heartbeats = IntGaugeVec::new(
            Opts::new("heartbeats", "Heartbeat counter of each guardian"),
            &["guardian"],
        )
        .map_err(|e| UptimeError::Config(e.to_string()))?;

        for collector in [
            &observations_total,
            &observations_missing_total,
        ] {
            registry
                .register(Box::new(collector.clone()))
                .map_err(|e| UptimeError::Config(e.to_string()))?;
        }
        for collector in [&chain_height, &chain_height_deficit, &heartbeats] {
            registry
                .register(Box::new(collector.clone()))
                .map_err(|e| UptimeError::Config(e.to_string()))?;
        }

        Ok(Self {
            observations_total,
            observations_missing_total,
            chain_height,
            chain_height_deficit,
            heartbeats,
        })
    }

    pub fn record_observation(&self, guardian: &str, chain: &str) {
        self.observations_total
            .with_label_values(&[guardian, chain])
            .inc();
    }

    pub fn add_missing(&self, guardian: &str, chain: &str, count: u64) {
        self.observations_missing_total
            .with_label_values(&[guardian, chain])
            .inc_by(count);
    }

    pub fn set_chain_height(&self, guardian: &str, chain: &str, height: i64) {
        self.chain_height
            .with_label_values(&[guardian, chain])
            .set(height);
    }

    pub fn set_height_deficit(&self, guardian: &str, chain: &str, deficit: i64) {
        self.chain_height_deficit
            .with_label_values(&[guardian, chain])
            .set(deficit);
    }

    pub fn set_heartbeats(&self, guardian: &str, counter: i64) {
        self.heartbeats.with_label_values(&[guardian]).set(counter);
    }

    /// Pre-touch counter label pairs so chains without recent traffic
    /// still expose series to the scraper.
    pub fn zero_fill(&self, directory: &GuardianDirectory, chain_ids: &[u16]) {
        for &chain_id in chain_ids {
            let chain = chain_name(chain_id);
            for guardian in directory.names() {
                self.observations_total
                    .with_label_values(&[guardian, &chain])
                    .inc_by(0);
                self.observations_missing_total
                    .with_label_values(&[guardian, &chain])
                    .inc_by(0);
            }
        }
    }

    /// Read back a missing-observation counter (test support).
    pub fn missing_count(&self, guardian: &str, chain: &str) -> u64 {
        self.observations_missing_total
            .with_label_values(&[guardian, chain])
            .get()
    }

    /// Read back an observation counter (test support).
    pub fn observation_count(&self, guardian: &str, chain: &str) -> u64 {
        self.observations_total
            .with_label_values(&[guardian, chain])
            .get()
    }

    /// Read back a height-deficit gauge (test support).
    pub fn height_deficit(&self, guardian: &str, chain: &str) -> i64 {
        self.chain_height_deficit
            .with_label_values(&[guardian, chain])
            .get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_increment() {
        let registry = Registry::new();
        let metrics = UptimeMetrics::new(&registry).unwrap();

        metrics.record_observation("Staked", "ethereum");
        metrics.record_observation("Staked", "ethereum");
        metrics.add_missing("Staked", "ethereum", 3);

        assert_eq!(metrics.observation_count("Staked", "ethereum"), 2);
        assert_eq!(metrics.missing_count("Staked", "ethereum"), 3);
    }

    #[test]
    fn duplicate_registration_is_config_error() {
        let registry = Registry::new();
        UptimeMetrics::new(&registry).unwrap();
        let err = UptimeMetrics::new(&registry).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn zero_fill_exposes_series() {
        let registry = Registry::new();
        let metrics = UptimeMetrics::new(&registry).unwrap();
        let dir = GuardianDirectory::mainnet();

        metrics.zero_fill(&dir, &[2]);

        assert_eq!(metrics.missing_count("xLabs", "ethereum"), 0);
        let families = registry.gather();
        let missing = families
            .iter()
            .find(|f| f.get_name() == "observations_missing_total")
            .unwrap();
        assert_eq!(missing.get_metric().len(), 19);
    }
}
