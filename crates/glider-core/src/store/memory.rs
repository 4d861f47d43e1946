//! In-memory [`RecordStore`] and [`CursorStore`] for tests and embedding.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Nothing survives the process.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Result, SyncError};
use crate::models::{IngestedRecord, SyncCursor, SyncRun};
use crate::playback::PlaybackState;

use super::{CursorStore, RecordQuery, RecordStore};

type RecordKey = (String, String);

pub struct InMemoryStore {
    records: RwLock<HashMap<RecordKey, IngestedRecord>>,
    cursors: RwLock<HashMap<String, SyncCursor>>,
    playback: RwLock<HashMap<String, PlaybackState>>,
    runs: RwLock<HashMap<String, SyncRun>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
            playback: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> SyncError {
    SyncError::StoreUnavailable("in-memory store lock poisoned".to_string())
}

fn matches(record: &IngestedRecord, query: &RecordQuery) -> bool {
    if record.partition != query.partition {
        return false;
    }
    if let Some(item_id) = &query.item_id {
        if record.item_id.as_deref() != Some(item_id.as_str()) {
            return false;
        }
    }
    if query.occurred_from.is_some() || query.occurred_to.is_some() {
        let Some(at) = record.occurred_at else {
            return false;
        };
        if query.occurred_from.is_some_and(|from| at < from) {
            return false;
        }
        if query.occurred_to.is_some_and(|to| at > to) {
            return false;
        }
    }
    true
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn upsert(&self, record: &IngestedRecord) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(
            (record.partition.clone(), record.natural_key.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn get(&self, partition: &str, natural_key: &str) -> Result<Option<IngestedRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .get(&(partition.to_string(), natural_key.to_string()))
            .cloned())
    }

    async fn delete(&self, partition: &str, natural_key: &str) -> Result<bool> {
        let mut records = self.records.write().map_err(poisoned)?;
        Ok(records
            .remove(&(partition.to_string(), natural_key.to_string()))
            .is_some())
    }

    async fn select(&self, query: &RecordQuery) -> Result<Vec<IngestedRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        let mut found: Vec<IngestedRecord> = records
            .values()
            .filter(|r| matches(r, query))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.natural_key.cmp(&b.natural_key))
        });
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn count(&self, partition: &str) -> Result<u64> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.keys().filter(|(p, _)| p == partition).count() as u64)
    }
}

#[async_trait]
impl CursorStore for InMemoryStore {
    async fn load_cursor(&self, source_id: &str) -> Result<Option<SyncCursor>> {
        Ok(self.cursors.read().map_err(poisoned)?.get(source_id).cloned())
    }

    async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        self.cursors
            .write()
            .map_err(poisoned)?
            .insert(cursor.source_id.clone(), cursor.clone());
        Ok(())
    }

    async fn reset_cursor(&self, source_id: &str) -> Result<bool> {
        Ok(self
            .cursors
            .write()
            .map_err(poisoned)?
            .remove(source_id)
            .is_some())
    }

    async fn load_playback_state(&self, source_id: &str) -> Result<Option<PlaybackState>> {
        Ok(self.playback.read().map_err(poisoned)?.get(source_id).cloned())
    }

    async fn save_playback_state(&self, source_id: &str, state: &PlaybackState) -> Result<()> {
        self.playback
            .write()
            .map_err(poisoned)?
            .insert(source_id.to_string(), state.clone());
        Ok(())
    }

    async fn reset_playback_state(&self, source_id: &str) -> Result<bool> {
        Ok(self
            .playback
            .write()
            .map_err(poisoned)?
            .remove(source_id)
            .is_some())
    }

    async fn save_run(&self, run: &SyncRun) -> Result<()> {
        self.runs
            .write()
            .map_err(poisoned)?
            .insert(run.source_id.clone(), run.clone());
        Ok(())
    }

    async fn last_run(&self, source_id: &str) -> Result<Option<SyncRun>> {
        Ok(self.runs.read().map_err(poisoned)?.get(source_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{content_hash, CursorPosition};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn record(key: &str, item: &str, secs: i64) -> IngestedRecord {
        let payload = json!({"k": key});
        IngestedRecord {
            partition: "spotify_listening_history".into(),
            natural_key: key.into(),
            item_id: Some(item.into()),
            occurred_at: Some(
                Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs),
            ),
            content_hash: content_hash(&payload),
            payload,
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_by_key() {
        let store = InMemoryStore::new();
        store.upsert(&record("a", "t1", 0)).await.unwrap();
        let mut changed = record("a", "t1", 0);
        changed.payload = json!({"k": "changed"});
        store.upsert(&changed).await.unwrap();

        assert_eq!(store.count("spotify_listening_history").await.unwrap(), 1);
        let got = store.get("spotify_listening_history", "a").await.unwrap().unwrap();
        assert_eq!(got.payload["k"], "changed");
    }

    #[tokio::test]
    async fn select_by_item_and_range() {
        let store = InMemoryStore::new();
        store.upsert(&record("a", "t1", 0)).await.unwrap();
        store.upsert(&record("b", "t1", 100)).await.unwrap();
        store.upsert(&record("c", "t2", 10)).await.unwrap();

        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let found = store
            .select(&RecordQuery {
                item_id: Some("t1".into()),
                occurred_from: Some(base - Duration::seconds(30)),
                occurred_to: Some(base + Duration::seconds(30)),
                ..RecordQuery::partition("spotify_listening_history")
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].natural_key, "a");
    }

    #[tokio::test]
    async fn cursor_round_trip_and_reset() {
        let store = InMemoryStore::new();
        let cursor = SyncCursor::new(
            "google_calendar:primary",
            CursorPosition::Token { token: "s1".into() },
            Utc::now(),
        );
        store.save_cursor(&cursor).await.unwrap();
        assert_eq!(
            store.load_cursor("google_calendar:primary").await.unwrap(),
            Some(cursor)
        );
        assert!(store.reset_cursor("google_calendar:primary").await.unwrap());
        assert!(!store.reset_cursor("google_calendar:primary").await.unwrap());
    }
}
