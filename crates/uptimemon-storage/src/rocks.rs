//! Embedded RocksDB backend.
//!
//! Key layout (single default column family):
//! - `msg|<MessageID>` → JSON-serialized `Message`
//! - `obs|<MessageID>_<guardianAddr>` → JSON-serialized `Observation`
//! - `idx|<MessageID>` → placeholder byte, existence-only pending index
//!
//! MessageIDs contain no `|`, so the prefixes cannot collide. Scans use
//! a forward iterator from the prefix and stop at the first foreign key;
//! the "find due messages" query therefore touches only `idx|` rows plus
//! one point read per pending message, never the full message space.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{Direction, IteratorMode, WriteBatch, DB};
use tracing::{debug, info};

use uptimemon_core::error::UptimeError;
use uptimemon_core::store::{UptimeStore, DELETE_CHUNK_SIZE};
use uptimemon_core::types::{Message, MessageId, Observation};

const MSG_PREFIX: &str = "msg|";
const OBS_PREFIX: &str = "obs|";
const IDX_PREFIX: &str = "idx|";

/// Placeholder value for existence-only index rows.
const IDX_VALUE: &[u8] = b"1";

/// RocksDB-backed store. Cheap to clone, safe to share across tasks.
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    /// Open or create a database at `path` with default tuning.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, UptimeError> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(|e| UptimeError::Storage(e.to_string()))?;
        info!("RocksStore opened");
        Ok(Self { db: Arc::new(db) })
    }

    fn message_key(id: &MessageId) -> String {
        format!("{MSG_PREFIX}{}", id.as_str())
    }

    fn observation_key(obs: &Observation) -> String {
        format!("{OBS_PREFIX}{}", obs.row_key())
    }

    fn index_key(id: &MessageId) -> String {
        format!("{IDX_PREFIX}{}", id.as_str())
    }

    /// Collect every key starting with `prefix`.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<Vec<u8>>, UptimeError> {
        let mut keys = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(|e| UptimeError::Storage(e.to_string()))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, UptimeError> {
        match self.db.get(key.as_bytes()) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| UptimeError::Storage(format!("decode {key}: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(UptimeError::Storage(e.to_string())),
        }
    }
}

#[async_trait]
impl UptimeStore for RocksStore {
    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, UptimeError> {
        self.get_json(&Self::message_key(id))
    }

    async fn save_message(&self, message: &Message) -> Result<(), UptimeError> {
        let value = serde_json::to_vec(message)
            .map_err(|e| UptimeError::Storage(format!("encode message: {e}")))?;
        self.db
            .put(Self::message_key(&message.id).as_bytes(), value)
            .map_err(|e| UptimeError::Storage(e.to_string()))
    }

    async fn save_messages(&self, messages: &[Message]) -> Result<(), UptimeError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        for message in messages {
            let value = serde_json::to_vec(message)
                .map_err(|e| UptimeError::Storage(format!("encode message: {e}")))?;
            batch.put(Self::message_key(&message.id).as_bytes(), value);
        }
        self.db
            .write(batch)
            .map_err(|e| UptimeError::Storage(e.to_string()))
    }

    async fn save_index_entries(&self, ids: &[MessageId]) -> Result<(), UptimeError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        for id in ids {
            batch.put(Self::index_key(id).as_bytes(), IDX_VALUE);
        }
        self.db
            .write(batch)
            .map_err(|e| UptimeError::Storage(e.to_string()))
    }

    async fn save_observation_if_absent(&self, obs: &Observation) -> Result<(), UptimeError> {
        let key = Self::observation_key(obs);
        // Single-writer deployment: the read-check-write pair is safe
        // because only the flush path writes observation rows.
        let existing = self
            .db
            .get(key.as_bytes())
            .map_err(|e| UptimeError::Storage(e.to_string()))?;
        if existing.is_some() {
            debug!(key = %key, "observation already present, keeping first write");
            return Ok(());
        }
        let value = serde_json::to_vec(obs)
            .map_err(|e| UptimeError::Storage(format!("encode observation: {e}")))?;
        self.db
            .put(key.as_bytes(), value)
            .map_err(|e| UptimeError::Storage(e.to_string()))
    }

    async fn observations_for_message(
        &self,
        id: &MessageId,
    ) -> Result<Vec<Observation>, UptimeError> {
        let prefix = format!("{OBS_PREFIX}{}_", id.as_str());
        let mut observations = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(|e| UptimeError::Storage(e.to_string()))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let obs: Observation = serde_json::from_slice(&value)
                .map_err(|e| UptimeError::Storage(format!("decode observation: {e}")))?;
            observations.push(obs);
        }
        Ok(observations)
    }

    async fn pending_message_ids(&self) -> Result<Vec<MessageId>, UptimeError> {
        let keys = self.keys_with_prefix(IDX_PREFIX)?;
        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            let raw = String::from_utf8(key[IDX_PREFIX.len()..].to_vec())
                .map_err(|e| UptimeError::Storage(format!("non-utf8 index key: {e}")))?;
            ids.push(MessageId::new(raw));
        }
        Ok(ids)
    }

    async fn due_messages(&self, cutoff: DateTime<Utc>) -> Result<Vec<Message>, UptimeError> {
        let mut due = Vec::new();
        for id in self.pending_message_ids().await? {
            // An index row without a message means a crashed half-write;
            // the next flush of that message repairs it.
            if let Some(message) = self.get_json::<Message>(&Self::message_key(&id))? {
                if message.last_observed_at < cutoff {
                    due.push(message);
                }
            }
        }
        Ok(due)
    }

    async fn delete_index_entries(&self, ids: &[MessageId]) -> Result<(), UptimeError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        for id in ids {
            batch.delete(Self::index_key(id).as_bytes());
        }
        self.db
            .write(batch)
            .map_err(|e| UptimeError::Storage(e.to_string()))
    }

    async fn expired_checked_ids(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, UptimeError> {
        let mut expired = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(MSG_PREFIX.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(|e| UptimeError::Storage(e.to_string()))?;
            if !key.starts_with(MSG_PREFIX.as_bytes()) {
                break;
            }
            let message: Message = serde_json::from_slice(&value)
                .map_err(|e| UptimeError::Storage(format!("decode message: {e}")))?;
            if message.metrics_checked && message.last_observed_at < cutoff {
                expired.push(message.id);
            }
        }
        Ok(expired)
    }

    async fn delete_messages(&self, ids: &[MessageId]) -> Result<(), UptimeError> {
        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            let mut batch = WriteBatch::default();
            for id in chunk {
                batch.delete(Self::message_key(id).as_bytes());
                batch.delete(Self::index_key(id).as_bytes());
                let prefix = format!("{OBS_PREFIX}{}_", id.as_str());
                for key in self.keys_with_prefix(&prefix)? {
                    batch.delete(&key);
                }
            }
            self.db
                .write(batch)
                .map_err(|e| UptimeError::Storage(e.to_string()))?;
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uptimemon_core::types::ObservationStatus;

    fn open_temp() -> (tempfile::TempDir, RocksStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn obs(id: &str, guardian: &str, at: DateTime<Utc>) -> Observation {
        Observation {
            message_id: MessageId::from(id),
            guardian_addr: guardian.to_string(),
            signature: "aabb".into(),
            observed_at: at,
            status: ObservationStatus::OnTime,
        }
    }

    #[tokio::test]
    async fn message_roundtrip() {
        let (_dir, store) = open_temp();
        let msg = Message::new(MessageId::from("2/emitter/1"), Utc::now());
        store.save_message(&msg).await.unwrap();

        let got = store
            .get_message(&MessageId::from("2/emitter/1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, msg);
        assert!(store
            .get_message(&MessageId::from("2/emitter/2"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn observation_first_write_wins() {
        let (_dir, store) = open_temp();
        let now = Utc::now();
        store
            .save_observation_if_absent(&obs("2/e/1", "0xaaa", now))
            .await
            .unwrap();
        store
            .save_observation_if_absent(&obs("2/e/1", "0xaaa", now + Duration::hours(1)))
            .await
            .unwrap();

        let got = store
            .observations_for_message(&MessageId::from("2/e/1"))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].observed_at, now);
    }

    #[tokio::test]
    async fn observation_scan_stays_within_message() {
        let (_dir, store) = open_temp();
        let now = Utc::now();
        store
            .save_observation_if_absent(&obs("2/e/1", "0xaaa", now))
            .await
            .unwrap();
        // "2/e/10" shares the string prefix "2/e/1" but is another message.
        store
            .save_observation_if_absent(&obs("2/e/10", "0xbbb", now))
            .await
            .unwrap();

        let got = store
            .observations_for_message(&MessageId::from("2/e/1"))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].guardian_addr, "0xaaa");
    }

    #[tokio::test]
    async fn due_messages_follow_the_index() {
        let (_dir, store) = open_temp();
        let now = Utc::now();

        let old = Message::new(MessageId::from("2/e/1"), now - Duration::hours(31));
        let fresh = Message::new(MessageId::from("2/e/2"), now);
        store.create_message_and_index(&old).await.unwrap();
        store.create_message_and_index(&fresh).await.unwrap();

        let mut checked = Message::new(MessageId::from("2/e/3"), now - Duration::hours(40));
        checked.metrics_checked = true;
        store.save_message(&checked).await.unwrap();

        let due = store.due_messages(now - Duration::hours(30)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, MessageId::from("2/e/1"));

        store
            .delete_index_entries(&[MessageId::from("2/e/1")])
            .await
            .unwrap();
        let due = store.due_messages(now - Duration::hours(30)).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn bulk_save_and_pending_ids() {
        let (_dir, store) = open_temp();
        let now = Utc::now();
        let messages: Vec<Message> = (0..5)
            .map(|seq| Message::new(MessageId::new(format!("2/e/{seq}")), now))
            .collect();
        store.save_messages(&messages).await.unwrap();
        let ids: Vec<MessageId> = messages.iter().map(|m| m.id.clone()).collect();
        store.save_index_entries(&ids).await.unwrap();

        let mut pending = store.pending_message_ids().await.unwrap();
        pending.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(pending, expected);
    }

    #[tokio::test]
    async fn delete_removes_message_observations_and_index() {
        let (_dir, store) = open_temp();
        let now = Utc::now();
        let id = MessageId::from("2/e/1");
        store
            .create_message_and_index(&Message::new(id.clone(), now))
            .await
            .unwrap();
        store
            .save_observation_if_absent(&obs("2/e/1", "0xaaa", now))
            .await
            .unwrap();
        store
            .save_observation_if_absent(&obs("2/e/1", "0xbbb", now))
            .await
            .unwrap();

        store.delete_messages(&[id.clone()]).await.unwrap();

        assert!(store.get_message(&id).await.unwrap().is_none());
        assert!(store.observations_for_message(&id).await.unwrap().is_empty());
        assert!(store.pending_message_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_checked_ids_excludes_unchecked() {
        let (_dir, store) = open_temp();
        let now = Utc::now();

        let unchecked = Message::new(MessageId::from("2/e/1"), now - Duration::hours(50));
        store.create_message_and_index(&unchecked).await.unwrap();
        let mut checked = Message::new(MessageId::from("2/e/2"), now - Duration::hours(50));
        checked.metrics_checked = true;
        store.save_message(&checked).await.unwrap();

        let ids = store
            .expired_checked_ids(now - Duration::hours(30))
            .await
            .unwrap();
        assert_eq!(ids, vec![MessageId::from("2/e/2")]);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store
                .create_message_and_index(&Message::new(MessageId::from("2/e/1"), now))
                .await
                .unwrap();
        }
        let store = RocksStore::open(dir.path()).unwrap();
        assert!(store
            .get_message(&MessageId::from("2/e/1"))
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.pending_message_ids().await.unwrap().len(), 1);
    }
}
