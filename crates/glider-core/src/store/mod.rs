//! Storage abstraction for the sync engine.
//!
//! Two traits split the persisted state:
//!
//! | Trait | Holds |
//! |-------|-------|
//! | [`RecordStore`] | ingested documents keyed by `(partition, natural_key)` |
//! | [`CursorStore`] | per-source cursor, playback state, and last run |
//!
//! Implementations must be `Send + Sync`; the engine shares them across
//! concurrently running source loops. Each call is one logical operation.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{IngestedRecord, SyncCursor, SyncRun};
use crate::playback::PlaybackState;

/// Filter for [`RecordStore::select`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    pub partition: String,
    pub item_id: Option<String>,
    /// Inclusive lower bound on `occurred_at`.
    pub occurred_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `occurred_at`.
    pub occurred_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn partition(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or overwrite by `(partition, natural_key)`.
    async fn upsert(&self, record: &IngestedRecord) -> Result<()>;

    async fn get(&self, partition: &str, natural_key: &str) -> Result<Option<IngestedRecord>>;

    /// Returns whether a record was removed.
    async fn delete(&self, partition: &str, natural_key: &str) -> Result<bool>;

    /// Records matching the query, ordered by `occurred_at`.
    async fn select(&self, query: &RecordQuery) -> Result<Vec<IngestedRecord>>;

    async fn count(&self, partition: &str) -> Result<u64>;
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self, source_id: &str) -> Result<Option<SyncCursor>>;

    async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()>;

    /// Returns whether a cursor existed.
    async fn reset_cursor(&self, source_id: &str) -> Result<bool>;

    async fn load_playback_state(&self, source_id: &str) -> Result<Option<PlaybackState>>;

    async fn save_playback_state(&self, source_id: &str, state: &PlaybackState) -> Result<()>;

    async fn reset_playback_state(&self, source_id: &str) -> Result<bool>;

    /// Replace the stored run for `run.source_id`.
    async fn save_run(&self, run: &SyncRun) -> Result<()>;

    async fn last_run(&self, source_id: &str) -> Result<Option<SyncRun>>;
}
