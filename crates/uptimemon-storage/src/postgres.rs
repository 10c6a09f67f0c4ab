//! PostgreSQL backend.
//!
//! Uses `sqlx` with connection pooling for shared or multi-instance
//! deployments. Requires the `postgres` feature.
//!
//! # Schema
//! Created automatically on first connect:
//! - `uptime_messages` — one row per message (id → last_observed_at, metrics_checked)
//! - `uptime_observations` — one row per (message, guardian), first write wins
//! - `uptime_message_index` — existence-only rows for not-yet-checked messages

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use uptimemon_core::error::UptimeError;
use uptimemon_core::store::{UptimeStore, DELETE_CHUNK_SIZE};
use uptimemon_core::types::{Message, MessageId, Observation, ObservationStatus};

// ─── Connection options ──────────────────────────────────────────────────────

/// Pool options for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// Connection timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

// ─── PostgresStore ───────────────────────────────────────────────────────────

/// PostgreSQL-backed store. Thread-safe and cheaply cloneable — wraps a
/// connection pool internally.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and initialize the schema.
    ///
    /// The URL format follows libpq convention:
    /// `postgresql://[user[:password]@][host][:port][/dbname]`
    pub async fn connect(database_url: &str) -> Result<Self, UptimeError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| UptimeError::Storage(format!("postgres connect: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("PostgresStore connected and schema initialized");
        Ok(store)
    }

    /// Connect with custom pool options.
    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, UptimeError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| UptimeError::Storage(format!("postgres connect: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes if they don't already exist.
    async fn init_schema(&self) -> Result<(), UptimeError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS uptime_messages (
                message_id       TEXT        PRIMARY KEY,
                last_observed_at TIMESTAMPTZ NOT NULL,
                metrics_checked  BOOLEAN     NOT NULL DEFAULT FALSE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| UptimeError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS uptime_observations (
                message_id    TEXT        NOT NULL,
                guardian_addr TEXT        NOT NULL,
                signature     TEXT        NOT NULL,
                observed_at   TIMESTAMPTZ NOT NULL,
                status        SMALLINT    NOT NULL,
                PRIMARY KEY (message_id, guardian_addr)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| UptimeError::Storage(e.to_string()))?;

        // Existence-only pending index; keeps the sweeper's query off
        // the full message table.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS uptime_message_index (
                message_id TEXT PRIMARY KEY
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| UptimeError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_uptime_messages_checked_age
             ON uptime_messages(metrics_checked, last_observed_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| UptimeError::Storage(e.to_string()))?;

        debug!("PostgresStore schema initialized");
        Ok(())
    }

    fn row_to_message(row: &sqlx::postgres::PgRow) -> Message {
        Message {
            id: MessageId::new(row.get::<String, _>("message_id")),
            last_observed_at: row.get::<DateTime<Utc>, _>("last_observed_at"),
            metrics_checked: row.get::<bool, _>("metrics_checked"),
        }
    }

    fn row_to_observation(row: &sqlx::postgres::PgRow) -> Result<Observation, UptimeError> {
        let status_raw = row.get::<i16, _>("status");
        let status = ObservationStatus::from_i16(status_raw)
            .ok_or_else(|| UptimeError::Storage(format!("invalid status {status_raw}")))?;
        Ok(Observation {
            message_id: MessageId::new(row.get::<String, _>("message_id")),
            guardian_addr: row.get::<String, _>("guardian_addr"),
            signature: row.get::<String, _>("signature"),
            observed_at: row.get::<DateTime<Utc>, _>("observed_at"),
            status,
        })
    }

    /// Get the underlying connection pool (for custom queries).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UptimeStore for PostgresStore {
    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, UptimeError> {
        let row = sqlx::query(
            "SELECT message_id, last_observed_at, metrics_checked
             FROM uptime_messages WHERE message_id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| UptimeError::Storage(e.to_string()))?;

        Ok(row.as_ref().map(Self::row_to_message))
    }

    async fn save_message(&self, message: &Message) -> Result<(), UptimeError> {
        sqlx::query(
            "INSERT INTO uptime_messages (message_id, last_observed_at, metrics_checked)
             VALUES ($1, $2, $3)
             ON CONFLICT (message_id)
             DO UPDATE SET
                last_observed_at = EXCLUDED.last_observed_at,
                metrics_checked  = EXCLUDED.metrics_checked",
        )
        .bind(message.id.as_str())
        .bind(message.last_observed_at)
        .bind(message.metrics_checked)
        .execute(&self.pool)
        .await
        .map_err(|e| UptimeError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn save_messages(&self, messages: &[Message]) -> Result<(), UptimeError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| UptimeError::Storage(e.to_string()))?;
        for message in messages {
            sqlx::query(
                "INSERT INTO uptime_messages (message_id, last_observed_at, metrics_checked)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (message_id)
                 DO UPDATE SET
                    last_observed_at = EXCLUDED.last_observed_at,
                    metrics_checked  = EXCLUDED.metrics_checked",
            )
            .bind(message.id.as_str())
            .bind(message.last_observed_at)
            .bind(message.metrics_checked)
            .execute(&mut *tx)
            .await
            .map_err(|e| UptimeError::Storage(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| UptimeError::Storage(format!("commit batch: {e}")))?;
        Ok(())
    }

    async fn save_index_entries(&self, ids: &[MessageId]) -> Result<(), UptimeError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| UptimeError::Storage(e.to_string()))?;
        for id in ids {
            sqlx::query(
                "INSERT INTO uptime_message_index (message_id) VALUES ($1)
                 ON CONFLICT (message_id) DO NOTHING",
            )
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| UptimeError::Storage(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| UptimeError::Storage(format!("commit batch: {e}")))?;
        Ok(())
    }

    async fn save_observation_if_absent(&self, obs: &Observation) -> Result<(), UptimeError> {
        // The composite primary key makes first-write-wins atomic.
        sqlx::query(
            "INSERT INTO uptime_observations
                (message_id, guardian_addr, signature, observed_at, status)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (message_id, guardian_addr) DO NOTHING",
        )
        .bind(obs.message_id.as_str())
        .bind(&obs.guardian_addr)
        .bind(&obs.signature)
        .bind(obs.observed_at)
        .bind(obs.status.as_i16())
        .execute(&self.pool)
        .await
        .map_err(|e| UptimeError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn observations_for_message(
        &self,
        id: &MessageId,
    ) -> Result<Vec<Observation>, UptimeError> {
        let rows = sqlx::query(
            "SELECT message_id, guardian_addr, signature, observed_at, status
             FROM uptime_observations
             WHERE message_id = $1
             ORDER BY guardian_addr",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| UptimeError::Storage(e.to_string()))?;

        rows.iter().map(Self::row_to_observation).collect()
    }

    async fn pending_message_ids(&self) -> Result<Vec<MessageId>, UptimeError> {
        let rows = sqlx::query("SELECT message_id FROM uptime_message_index")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| UptimeError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|r| MessageId::new(r.get::<String, _>("message_id")))
            .collect())
    }

    async fn due_messages(&self, cutoff: DateTime<Utc>) -> Result<Vec<Message>, UptimeError> {
        let rows = sqlx::query(
            "SELECT m.message_id, m.last_observed_at, m.metrics_checked
             FROM uptime_message_index i
             JOIN uptime_messages m ON m.message_id = i.message_id
             WHERE m.last_observed_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| UptimeError::Storage(e.to_string()))?;

        Ok(rows.iter().map(Self::row_to_message).collect())
    }

    async fn delete_index_entries(&self, ids: &[MessageId]) -> Result<(), UptimeError> {
        if ids.is_empty() {
            return Ok(());
        }
        let raw: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        sqlx::query("DELETE FROM uptime_message_index WHERE message_id = ANY($1)")
            .bind(&raw)
            .execute(&self.pool)
            .await
            .map_err(|e| UptimeError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn expired_checked_ids(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, UptimeError> {
        let rows = sqlx::query(
            "SELECT message_id FROM uptime_messages
             WHERE metrics_checked AND last_observed_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| UptimeError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|r| MessageId::new(r.get::<String, _>("message_id")))
            .collect())
    }

    async fn delete_messages(&self, ids: &[MessageId]) -> Result<(), UptimeError> {
        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            let raw: Vec<String> = chunk.iter().map(|id| id.as_str().to_string()).collect();
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| UptimeError::Storage(e.to_string()))?;
            sqlx::query("DELETE FROM uptime_observations WHERE message_id = ANY($1)")
                .bind(&raw)
                .execute(&mut *tx)
                .await
                .map_err(|e| UptimeError::Storage(e.to_string()))?;
            sqlx::query("DELETE FROM uptime_message_index WHERE message_id = ANY($1)")
                .bind(&raw)
                .execute(&mut *tx)
                .await
                .map_err(|e| UptimeError::Storage(e.to_string()))?;
            sqlx::query("DELETE FROM uptime_messages WHERE message_id = ANY($1)")
                .bind(&raw)
                .execute(&mut *tx)
                .await
                .map_err(|e| UptimeError::Storage(e.to_string()))?;
            tx.commit()
                .await
                .map_err(|e| UptimeError::Storage(format!("commit delete: {e}")))?;
        }
        Ok(())
    }
}
