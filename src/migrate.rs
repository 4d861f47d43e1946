use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create all tables. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One document per (partition, natural_key)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            partition TEXT NOT NULL,
            natural_key TEXT NOT NULL,
            item_id TEXT,
            occurred_at INTEGER,
            payload_json TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            synced_at INTEGER NOT NULL,
            PRIMARY KEY (partition, natural_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per source
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_cursors (
            source_id TEXT PRIMARY KEY,
            position_json TEXT NOT NULL,
            last_synced_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS playback_states (
            source_id TEXT PRIMARY KEY,
            state_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Last run per source
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            source_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            status TEXT NOT NULL,
            error TEXT,
            items_fetched INTEGER NOT NULL DEFAULT 0,
            items_stored INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_item ON records(partition, item_id, occurred_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
