//! Idempotent writes into one record-store partition.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{IngestedRecord, NormalizedItem};
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    /// Existing record whose payload hash changed.
    Updated,
    /// Existing record rewritten with an identical payload.
    Unchanged,
    Deleted,
    /// Tombstone for a key that was never stored.
    AlreadyAbsent,
}

impl IngestOutcome {
    pub fn stored(&self) -> bool {
        matches!(
            self,
            IngestOutcome::Inserted | IngestOutcome::Updated | IngestOutcome::Unchanged
        )
    }
}

pub struct IdempotentSink {
    store: Arc<dyn RecordStore>,
    partition: String,
}

impl IdempotentSink {
    pub fn new(store: Arc<dyn RecordStore>, partition: impl Into<String>) -> Self {
        Self {
            store,
            partition: partition.into(),
        }
    }

    /// Upsert by natural key, or delete by key for tombstones.
    ///
    /// The record is always rewritten so `synced_at` moves forward; the
    /// outcome only reports whether the payload changed.
    pub async fn ingest(
        &self,
        item: &NormalizedItem,
        synced_at: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        if item.tombstone {
            let removed = self.store.delete(&self.partition, &item.natural_key).await?;
            return Ok(if removed {
                IngestOutcome::Deleted
            } else {
                IngestOutcome::AlreadyAbsent
            });
        }

        let record = IngestedRecord::from_item(&self.partition, item, synced_at);
        let existing = self.store.get(&self.partition, &item.natural_key).await?;
        self.store.upsert(&record).await?;

        Ok(match existing {
            None => IngestOutcome::Inserted,
            Some(prev) if prev.content_hash == record.content_hash => IngestOutcome::Unchanged,
            Some(_) => IngestOutcome::Updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn item(key: &str, summary: &str, tombstone: bool) -> NormalizedItem {
        NormalizedItem {
            natural_key: key.into(),
            item_id: Some(key.into()),
            occurred_at: None,
            payload: json!({"summary": summary}),
            tombstone,
        }
    }

    #[tokio::test]
    async fn repeated_ingest_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let sink = IdempotentSink::new(store.clone(), "google_calendar_events");
        let now = Utc::now();

        assert_eq!(
            sink.ingest(&item("e1", "Standup", false), now).await.unwrap(),
            IngestOutcome::Inserted
        );
        assert_eq!(
            sink.ingest(&item("e1", "Standup", false), now).await.unwrap(),
            IngestOutcome::Unchanged
        );
        assert_eq!(
            sink.ingest(&item("e1", "Standup (moved)", false), now)
                .await
                .unwrap(),
            IngestOutcome::Updated
        );
        assert_eq!(store.count("google_calendar_events").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn tombstone_deletes_by_key() {
        let store = Arc::new(InMemoryStore::new());
        let sink = IdempotentSink::new(store.clone(), "google_calendar_events");
        let now = Utc::now();

        sink.ingest(&item("e1", "Standup", false), now).await.unwrap();
        let outcome = sink.ingest(&item("e1", "", true), now).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Deleted);
        assert!(!outcome.stored());
        assert!(store.get("google_calendar_events", "e1").await.unwrap().is_none());

        let again = sink.ingest(&item("e1", "", true), now).await.unwrap();
        assert_eq!(again, IngestOutcome::AlreadyAbsent);
    }
}
