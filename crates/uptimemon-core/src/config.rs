//! Monitor configuration and tracing initialisation.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::UptimeError;

/// Configuration for the monitor core.
///
/// Loaded externally (env/file) and consumed here as plain values.
/// Defaults match the production deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Window after a message's last on-time observation during which
    /// further observations still count as on-time (seconds).
    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,
    /// Cadence of the expired-message cleaner (seconds).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Observations accumulated before an early cache flush.
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,
    /// Cache flush ticker (seconds).
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Cadence of the uptime sweeper (seconds).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Bounded capacity of the observation input channel.
    #[serde(default = "default_observation_channel_capacity")]
    pub observation_channel_capacity: usize,
    /// Bounded capacity of the heartbeat input channel.
    #[serde(default = "default_heartbeat_channel_capacity")]
    pub heartbeat_channel_capacity: usize,
    /// Channel occupancy sampling interval (seconds).
    #[serde(default = "default_monitor_interval_secs")]
    pub channel_monitor_interval_secs: u64,
    /// Occupancy fraction above which the channel monitor warns.
    #[serde(default = "default_channel_warn_utilization")]
    pub channel_warn_utilization: f64,
}

fn default_expiry_secs() -> u64 {
    30 * 60 * 60
}
fn default_cleanup_interval_secs() -> u64 {
    48 * 60 * 60
}
fn default_flush_batch_size() -> usize {
    100
}
fn default_flush_interval_secs() -> u64 {
    5
}
fn default_sweep_interval_secs() -> u64 {
    15
}
fn default_observation_channel_capacity() -> usize {
    1024
}
fn default_heartbeat_channel_capacity() -> usize {
    50
}
fn default_monitor_interval_secs() -> u64 {
    5
}
fn default_channel_warn_utilization() -> f64 {
    0.8
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            expiry_secs: default_expiry_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            flush_batch_size: default_flush_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            observation_channel_capacity: default_observation_channel_capacity(),
            heartbeat_channel_capacity: default_heartbeat_channel_capacity(),
            channel_monitor_interval_secs: default_monitor_interval_secs(),
            channel_warn_utilization: default_channel_warn_utilization(),
        }
    }
}

impl MonitorConfig {
    /// Rejects configurations that would stall the pipeline. Called once
    /// at startup; a failure here is fatal by design.
    pub fn validate(&self) -> Result<(), UptimeError> {
        if self.expiry_secs == 0 {
            return Err(UptimeError::Config("expiry_secs must be non-zero".into()));
        }
        if self.flush_batch_size == 0 {
            return Err(UptimeError::Config("flush_batch_size must be non-zero".into()));
        }
        if self.flush_interval_secs == 0
            || self.sweep_interval_secs == 0
            || self.cleanup_interval_secs == 0
        {
            return Err(UptimeError::Config("intervals must be non-zero".into()));
        }
        if self.observation_channel_capacity == 0 || self.heartbeat_channel_capacity == 0 {
            return Err(UptimeError::Config("channel capacities must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.channel_warn_utilization) {
            return Err(UptimeError::Config(
                "channel_warn_utilization must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    pub fn expiry(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.expiry_secs as i64)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn channel_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.channel_monitor_interval_secs)
    }
}

/// Initialise tracing with an `EnvFilter` directive string
/// (e.g. `"info,uptimemon_core=debug"`). Call once at startup.
pub fn init_tracing(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
