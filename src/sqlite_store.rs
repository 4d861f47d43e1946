//! SQLite-backed [`RecordStore`] and [`CursorStore`].
//!
//! Timestamps are stored as Unix milliseconds so the duplicate window
//! query compares integers. JSON columns hold payloads, cursor positions,
//! and playback state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use glider_core::error::{Result, SyncError};
use glider_core::models::{IngestedRecord, RunStatus, SyncCursor, SyncRun};
use glider_core::playback::PlaybackState;
use glider_core::store::{CursorStore, RecordQuery, RecordStore};

/// Wraps a [`SqlitePool`]. Each method acquires a connection for a single
/// statement and returns it to the pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn store_err(e: sqlx::Error) -> SyncError {
    SyncError::StoreUnavailable(e.to_string())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SyncError::StoreUnavailable(format!("timestamp out of range: {}", ms)))
}

fn record_from_row(row: &SqliteRow) -> Result<IngestedRecord> {
    let payload_json: String = row.try_get("payload_json").map_err(store_err)?;
    let occurred_at: Option<i64> = row.try_get("occurred_at").map_err(store_err)?;
    Ok(IngestedRecord {
        partition: row.try_get("partition").map_err(store_err)?,
        natural_key: row.try_get("natural_key").map_err(store_err)?,
        item_id: row.try_get("item_id").map_err(store_err)?,
        occurred_at: occurred_at.map(from_millis).transpose()?,
        payload: serde_json::from_str(&payload_json)?,
        content_hash: row.try_get("content_hash").map_err(store_err)?,
        synced_at: from_millis(row.try_get("synced_at").map_err(store_err)?)?,
    })
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert(&self, record: &IngestedRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO records (partition, natural_key, item_id, occurred_at,
                                 payload_json, content_hash, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(partition, natural_key) DO UPDATE SET
                item_id = excluded.item_id,
                occurred_at = excluded.occurred_at,
                payload_json = excluded.payload_json,
                content_hash = excluded.content_hash,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&record.partition)
        .bind(&record.natural_key)
        .bind(&record.item_id)
        .bind(record.occurred_at.map(|t| t.timestamp_millis()))
        .bind(serde_json::to_string(&record.payload)?)
        .bind(&record.content_hash)
        .bind(record.synced_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, partition: &str, natural_key: &str) -> Result<Option<IngestedRecord>> {
        let row = sqlx::query("SELECT * FROM records WHERE partition = ? AND natural_key = ?")
            .bind(partition)
            .bind(natural_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn delete(&self, partition: &str, natural_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE partition = ? AND natural_key = ?")
            .bind(partition)
            .bind(natural_key)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn select(&self, query: &RecordQuery) -> Result<Vec<IngestedRecord>> {
        let from = query.occurred_from.map(|t| t.timestamp_millis());
        let to = query.occurred_to.map(|t| t.timestamp_millis());
        // SQLite treats a negative LIMIT as unbounded.
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);

        let rows = sqlx::query(
            r#"
            SELECT * FROM records
            WHERE partition = ?
              AND (? IS NULL OR item_id = ?)
              AND (? IS NULL OR occurred_at >= ?)
              AND (? IS NULL OR occurred_at <= ?)
            ORDER BY occurred_at, natural_key
            LIMIT ?
            "#,
        )
        .bind(&query.partition)
        .bind(&query.item_id)
        .bind(&query.item_id)
        .bind(from)
        .bind(from)
        .bind(to)
        .bind(to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn count(&self, partition: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE partition = ?")
            .bind(partition)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(n as u64)
    }
}

#[async_trait]
impl CursorStore for SqliteStore {
    async fn load_cursor(&self, source_id: &str) -> Result<Option<SyncCursor>> {
        let row = sqlx::query(
            "SELECT position_json, last_synced_at FROM sync_cursors WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let position_json: String = row.try_get("position_json").map_err(store_err)?;
        Ok(Some(SyncCursor {
            source_id: source_id.to_string(),
            position: serde_json::from_str(&position_json)?,
            last_synced_at: from_millis(row.try_get("last_synced_at").map_err(store_err)?)?,
        }))
    }

    async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (source_id, position_json, last_synced_at)
            VALUES (?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                position_json = excluded.position_json,
                last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(&cursor.source_id)
        .bind(serde_json::to_string(&cursor.position)?)
        .bind(cursor.last_synced_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn reset_cursor(&self, source_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_cursors WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_playback_state(&self, source_id: &str) -> Result<Option<PlaybackState>> {
        let state_json: Option<String> =
            sqlx::query_scalar("SELECT state_json FROM playback_states WHERE source_id = ?")
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(match state_json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    async fn save_playback_state(&self, source_id: &str, state: &PlaybackState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO playback_states (source_id, state_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(source_id)
        .bind(serde_json::to_string(state)?)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn reset_playback_state(&self, source_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM playback_states WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_run(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (source_id, run_id, started_at, finished_at, status,
                                   error, items_fetched, items_stored)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                run_id = excluded.run_id,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                status = excluded.status,
                error = excluded.error,
                items_fetched = excluded.items_fetched,
                items_stored = excluded.items_stored
            "#,
        )
        .bind(&run.source_id)
        .bind(&run.run_id)
        .bind(run.started_at.timestamp_millis())
        .bind(run.finished_at.map(|t| t.timestamp_millis()))
        .bind(run.status.as_str())
        .bind(&run.error)
        .bind(run.items_fetched as i64)
        .bind(run.items_stored as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn last_run(&self, source_id: &str) -> Result<Option<SyncRun>> {
        let row = sqlx::query("SELECT * FROM sync_runs WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status").map_err(store_err)?;
        let finished_at: Option<i64> = row.try_get("finished_at").map_err(store_err)?;
        let items_fetched: i64 = row.try_get("items_fetched").map_err(store_err)?;
        let items_stored: i64 = row.try_get("items_stored").map_err(store_err)?;

        Ok(Some(SyncRun {
            source_id: source_id.to_string(),
            run_id: row.try_get("run_id").map_err(store_err)?,
            started_at: from_millis(row.try_get("started_at").map_err(store_err)?)?,
            finished_at: finished_at.map(from_millis).transpose()?,
            status: RunStatus::parse(&status).ok_or_else(|| {
                SyncError::StoreUnavailable(format!("unknown run status '{}'", status))
            })?,
            error: row.try_get("error").map_err(store_err)?,
            items_fetched: items_fetched.max(0) as u64,
            items_stored: items_stored.max(0) as u64,
        }))
    }
}
