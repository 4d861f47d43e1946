//! Duplicate suppression for sources that overlap with another writer.
//!
//! Recently-played history and the playback detector both write plays into
//! `spotify_listening_history`, with start times that differ by a few
//! seconds. A history item is dropped when the same item already exists
//! within `tolerance` of its timestamp.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::store::{RecordQuery, RecordStore};
use crate::window::{earlier, later};

pub struct DuplicateSuppressor {
    store: Arc<dyn RecordStore>,
    partition: String,
    tolerance: Duration,
}

impl DuplicateSuppressor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        partition: impl Into<String>,
        tolerance: Duration,
    ) -> Self {
        Self {
            store,
            partition: partition.into(),
            tolerance,
        }
    }

    /// True when a record with `item_id` exists in `[t - tolerance, t + tolerance]`.
    pub async fn is_duplicate(&self, item_id: &str, occurred_at: DateTime<Utc>) -> Result<bool> {
        let query = RecordQuery {
            item_id: Some(item_id.to_string()),
            occurred_from: Some(earlier(occurred_at, self.tolerance)),
            occurred_to: Some(later(occurred_at, self.tolerance)),
            limit: Some(1),
            ..RecordQuery::partition(self.partition.clone())
        };
        Ok(!self.store.select(&query).await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IngestedRecord, NormalizedItem};
    use crate::store::memory::InMemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    async fn seed(store: &InMemoryStore, item_id: &str, at: DateTime<Utc>) {
        let item = NormalizedItem {
            natural_key: format!("{}_{}", at.timestamp_millis(), item_id),
            item_id: Some(item_id.into()),
            occurred_at: Some(at),
            payload: json!({}),
            tombstone: false,
        };
        store
            .upsert(&IngestedRecord::from_item("spotify_listening_history", &item, at))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tolerance_window() {
        let store = Arc::new(InMemoryStore::new());
        let t = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        seed(&store, "trackA", t).await;

        let dedup = DuplicateSuppressor::new(
            store.clone(),
            "spotify_listening_history",
            Duration::seconds(30),
        );
        assert!(dedup.is_duplicate("trackA", t + Duration::seconds(20)).await.unwrap());
        assert!(dedup.is_duplicate("trackA", t - Duration::seconds(30)).await.unwrap());
        assert!(!dedup.is_duplicate("trackA", t + Duration::seconds(45)).await.unwrap());
        assert!(!dedup.is_duplicate("trackB", t).await.unwrap());
    }
}
