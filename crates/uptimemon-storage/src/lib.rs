//! uptimemon-storage — durable backends for the guardian uptime monitor.
//!
//! Backends, selected by feature flag:
//! - [`rocks`] — embedded RocksDB (single-process deployments, default)
//! - [`postgres`] — PostgreSQL via `sqlx` (shared/multi-instance deployments)
//!
//! Both implement [`uptimemon_core::UptimeStore`] and preserve the same
//! persisted layout: message rows keyed by MessageID, observation rows
//! keyed by `<MessageID>_<guardianAddr>`, and existence-only index rows
//! for not-yet-checked messages.

#[cfg(feature = "rocks")]
pub mod rocks;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "rocks")]
pub use rocks::RocksStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
