//! In-process write buffer and dedup layer in front of the store.
//!
//! One coarse read/write lock guards both maps. The buffering window is
//! short (batch threshold or a few seconds), so per-key locking buys
//! nothing, and the flush snapshot needs a consistent view anyway.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::{Message, MessageId, Observation};

#[derive(Default)]
struct CacheInner {
    messages: HashMap<MessageId, Message>,
    observations: HashMap<MessageId, HashMap<String, Observation>>,
}

/// Thread-safe buffer of messages and observations awaiting flush.
#[derive(Default)]
pub struct ObservationCache {
    inner: RwLock<CacheInner>,
}

impl ObservationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.inner.read().messages.get(id).cloned()
    }

    pub fn set_message(&self, message: Message) {
        self.inner.write().messages.insert(message.id.clone(), message);
    }

    /// Returns `true` if an observation for (message, guardian) is
    /// already buffered in the current window.
    pub fn has_observation(&self, id: &MessageId, guardian_addr: &str) -> bool {
        self.inner
            .read()
            .observations
            .get(id)
            .is_some_and(|per_guardian| per_guardian.contains_key(guardian_addr))
    }

    pub fn set_observation(&self, obs: Observation) {
        self.inner
            .write()
            .observations
            .entry(obs.message_id.clone())
            .or_default()
            .insert(obs.guardian_addr.clone(), obs);
    }

    /// Number of buffered observations, the flush-threshold measure.
    pub fn observation_count(&self) -> usize {
        self.inner.read().observations.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.messages.is_empty() && inner.observations.is_empty()
    }

    /// Take a consistent snapshot of both maps and clear them.
    ///
    /// The cache is cleared regardless of whether the caller's flush
    /// succeeds: one best-effort write per window, never retried.
    pub fn drain(&self) -> (Vec<Message>, Vec<Observation>) {
        let mut inner = self.inner.write();
        let messages = inner.messages.drain().map(|(_, m)| m).collect();
        let observations = inner
            .observations
            .drain()
            .flat_map(|(_, per_guardian)| per_guardian.into_values())
            .collect();
        (messages, observations)
    }
}
