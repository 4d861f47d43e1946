//! Core data models shared by the engine, the stores, and callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::playback::PlaybackState;

/// Where a source resumes from. Token and watermark sources never share a
/// variant, so resolution cannot mix them up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorPosition {
    /// Opaque continuation token issued by the source.
    Token { token: String },
    /// Start time of the last successful cycle.
    Watermark { time: DateTime<Utc> },
}

/// The single live cursor row for a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub source_id: String,
    pub position: CursorPosition,
    pub last_synced_at: DateTime<Utc>,
}

impl SyncCursor {
    pub fn new(source_id: impl Into<String>, position: CursorPosition, now: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            position,
            last_synced_at: now,
        }
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        match &self.position {
            CursorPosition::Watermark { time } => Some(*time),
            CursorPosition::Token { .. } => None,
        }
    }
}

/// A source item after normalization, ready for the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    /// Deterministic key derived from immutable source fields.
    pub natural_key: String,
    /// Logical item identity (track id, ...) for duplicate suppression.
    pub item_id: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
    /// Deletion/cancellation signal: delete by key instead of upserting.
    pub tombstone: bool,
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedRecord {
    pub partition: String,
    pub natural_key: String,
    pub item_id: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
    pub content_hash: String,
    pub synced_at: DateTime<Utc>,
}

impl IngestedRecord {
    pub fn from_item(partition: &str, item: &NormalizedItem, synced_at: DateTime<Utc>) -> Self {
        Self {
            partition: partition.to_string(),
            natural_key: item.natural_key.clone(),
            item_id: item.item_id.clone(),
            occurred_at: item.occurred_at,
            content_hash: content_hash(&item.payload),
            payload: item.payload.clone(),
            synced_at,
        }
    }
}

/// SHA-256 of the payload's JSON serialization (object keys are sorted).
pub fn content_hash(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }
}

/// Bookkeeping for the most recent cycle of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub source_id: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub items_fetched: u64,
    pub items_stored: u64,
}

impl SyncRun {
    pub fn start(source_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.to_string(),
            run_id: Uuid::new_v4().to_string(),
            started_at: now,
            finished_at: None,
            status: RunStatus::Running,
            error: None,
            items_fetched: 0,
            items_stored: 0,
        }
    }

    pub fn succeed(mut self, result: &CycleResult, now: DateTime<Utc>) -> Self {
        self.status = RunStatus::Success;
        self.finished_at = Some(now);
        self.items_fetched = result.items_fetched;
        self.items_stored = result.items_stored;
        self
    }

    pub fn fail(mut self, error: &str, now: DateTime<Utc>) -> Self {
        self.status = RunStatus::Error;
        self.finished_at = Some(now);
        self.error = Some(error.to_string());
        self
    }
}

/// Counts reported for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleResult {
    pub source_id: String,
    pub items_fetched: u64,
    /// Inserted, updated, or rewritten unchanged.
    pub items_stored: u64,
    pub items_inserted: u64,
    pub items_deleted: u64,
    pub items_suppressed: u64,
    pub items_malformed: u64,
    pub events_recorded: u64,
    pub pages: u64,
    pub used_fallback: bool,
    pub new_watermark: Option<DateTime<Utc>>,
}

/// Observability view of one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub kind: String,
    pub cursor: Option<SyncCursor>,
    pub last_run: Option<SyncRun>,
    pub playback: Option<PlaybackState>,
}
