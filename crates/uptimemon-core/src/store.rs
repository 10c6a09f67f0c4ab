//! Durable storage contract for messages, observations, and the
//! pending-message index, plus an in-memory reference implementation.
//!
//! Backends (Postgres, RocksDB) live in `uptimemon-storage`; callers
//! depend only on this trait and may not assume anything beyond
//! "durable after the call returns without error".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::error::UptimeError;
use crate::types::{Message, MessageId, Observation};

/// Chunk size for bulk deletes, sized to backend request limits.
pub const DELETE_CHUNK_SIZE: usize = 1000;

/// Durable message/observation/index store.
#[async_trait]
pub trait UptimeStore: Send + Sync {
    /// Fetch one message by id; `None` if it was never created.
    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, UptimeError>;

    /// Upsert one message. Single-version overwrite: repeated saves of
    /// the same id never accumulate history.
    async fn save_message(&self, message: &Message) -> Result<(), UptimeError>;

    /// Bulk upsert.
    async fn save_messages(&self, messages: &[Message]) -> Result<(), UptimeError>;

    /// Write (or rewrite) pending-index entries for the given ids.
    async fn save_index_entries(&self, ids: &[MessageId]) -> Result<(), UptimeError>;

    /// Write a message and, if absent, its pending-index entry.
    /// Not atomic across the two writes; re-running converges.
    async fn create_message_and_index(&self, message: &Message) -> Result<(), UptimeError> {
        self.save_message(message).await?;
        self.save_index_entries(std::slice::from_ref(&message.id)).await
    }

    /// Insert an observation unless one already exists for the same
    /// (message, guardian) pair. The storage-level check is the final
    /// arbiter for duplicates that straddle flush windows.
    async fn save_observation_if_absent(&self, obs: &Observation) -> Result<(), UptimeError>;

    /// All observations recorded for one message.
    async fn observations_for_message(
        &self,
        id: &MessageId,
    ) -> Result<Vec<Observation>, UptimeError>;

    /// Ids of all messages still carrying a pending-index entry.
    /// Bounded by the index, never by a full message scan.
    async fn pending_message_ids(&self) -> Result<Vec<MessageId>, UptimeError>;

    /// Pending messages whose `last_observed_at` predates `cutoff`.
    async fn due_messages(&self, cutoff: DateTime<Utc>) -> Result<Vec<Message>, UptimeError>;

    /// Remove pending-index entries after sweep accounting.
    async fn delete_index_entries(&self, ids: &[MessageId]) -> Result<(), UptimeError>;

    /// Ids of metrics-checked messages whose `last_observed_at`
    /// predates `cutoff` — the cleaner's deletion candidates.
    async fn expired_checked_ids(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, UptimeError>;

    /// Delete messages, their observations, and any leftover index
    /// rows. Implementations chunk to [`DELETE_CHUNK_SIZE`].
    async fn delete_messages(&self, ids: &[MessageId]) -> Result<(), UptimeError>;
}

// ─── In-memory store (tests and ephemeral deployments) ───────────────────────

#[derive(Default)]
struct MemoryInner {
    messages: BTreeMap<String, Message>,
    /// Keyed by `<MessageID>_<guardianAddr>` for prefix grouping.
    observations: BTreeMap<String, Observation>,
    index: BTreeSet<String>,
}

/// In-memory store. All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending-index entries (test support).
    pub fn index_len(&self) -> usize {
        self.inner.lock().unwrap().index.len()
    }

    /// Number of stored messages (test support).
    pub fn message_count(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }
}

#[async_trait]
impl UptimeStore for MemoryStore {
    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, UptimeError> {
        Ok(self.inner.lock().unwrap().messages.get(id.as_str()).cloned())
    }

    async fn save_message(&self, message: &Message) -> Result<(), UptimeError> {
        self.inner
            .lock()
            .unwrap()
            .messages
            .insert(message.id.as_str().to_string(), message.clone());
        Ok(())
    }

    async fn save_messages(&self, messages: &[Message]) -> Result<(), UptimeError> {
        let mut inner = self.inner.lock().unwrap();
        for message in messages {
            inner
                .messages
                .insert(message.id.as_str().to_string(), message.clone());
        }
        Ok(())
    }

    async fn save_index_entries(&self, ids: &[MessageId]) -> Result<(), UptimeError> {
        let mut inner = self.inner.lock().unwrap();
        for id in ids {
            inner.index.insert(id.as_str().to_string());
        }
        Ok(())
    }

    async fn save_observation_if_absent(&self, obs: &Observation) -> Result<(), UptimeError> {
        let mut inner = self.inner.lock().unwrap();
        let key = obs.row_key();
        inner.observations.entry(key).or_insert_with(|| obs.clone());
        Ok(())
    }

    async fn observations_for_message(
        &self,
        id: &MessageId,
    ) -> Result<Vec<Observation>, UptimeError> {
        let prefix = format!("{}_", id.as_str());
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .observations
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn pending_message_ids(&self) -> Result<Vec<MessageId>, UptimeError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.index.iter().map(|s| MessageId::new(s.clone())).collect())
    }

    async fn due_messages(&self, cutoff: DateTime<Utc>) -> Result<Vec<Message>, UptimeError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .index
            .iter()
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| m.last_observed_at < cutoff)
            .cloned()
            .collect())
    }

    async fn delete_index_entries(&self, ids: &[MessageId]) -> Result<(), UptimeError> {
        let mut inner = self.inner.lock().unwrap();
        for id in ids {
            inner.index.remove(id.as_str());
        }
        Ok(())
    }

    async fn expired_checked_ids(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, UptimeError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .values()
            .filter(|m| m.metrics_checked && m.last_observed_at < cutoff)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn delete_messages(&self, ids: &[MessageId]) -> Result<(), UptimeError> {
        let mut inner = self.inner.lock().unwrap();
        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            for id in chunk {
                inner.messages.remove(id.as_str());
                inner.index.remove(id.as_str());
                let prefix = format!("{}_", id.as_str());
                let keys: Vec<String> = inner
                    .observations
                    .range(prefix.clone()..)
                    .take_while(|(k, _)| k.starts_with(&prefix))
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in keys {
                    inner.observations.remove(&key);
                }
            }
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
