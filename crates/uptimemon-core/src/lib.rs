//! uptimemon-core — guardian uptime accounting for cross-chain messages.
//!
//! # Architecture
//!
//! ```text
//! gossip transport (external, pre-verified)
//!        │ bounded channels
//!        ▼
//! IngestionPipeline ──► ObservationCache ──(batched flush)──► UptimeStore
//!        │                                                        ▲
//!        │ heartbeats → GuardianChainHeights                      │
//!        ▼                                                        │
//! UptimeSweeper  (due messages → missing counts → metrics) ───────┤
//! Cleaner        (expired, checked messages → delete) ────────────┘
//! ```

pub mod cache;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod guardian;
pub mod metrics;
pub mod pipeline;
pub mod store;
pub mod sweeper;
pub mod types;

pub use cache::ObservationCache;
pub use cleaner::Cleaner;
pub use config::MonitorConfig;
pub use error::UptimeError;
pub use guardian::{GuardianDirectory, GuardianEntry};
pub use metrics::UptimeMetrics;
pub use pipeline::{monitor_channel, IngestionPipeline, SharedChainHeights};
pub use store::{MemoryStore, UptimeStore};
pub use sweeper::UptimeSweeper;
pub use types::{
    GuardianChainHeights, HeartbeatEvent, HeartbeatNetwork, Message, MessageId, Observation,
    ObservationEvent, ObservationStatus,
};
