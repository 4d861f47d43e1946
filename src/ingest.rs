//! One-shot sync: run a single cycle for each selected source.
//!
//! Source selector format: `all`, a provider (`oura`), a kind label
//! (`oura_daily`, `spotify_recent`), or a full source id
//! (`google_calendar:primary`).

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use glider_core::models::CycleResult;
use glider_core::source::SourceSpec;
use glider_core::traits::ClientRegistry;
use glider_core::{CycleOptions, SyncEngine};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

/// Open the database and build an engine over every enabled source.
pub async fn open_engine(
    config: &Config,
    clients: ClientRegistry,
) -> Result<(SqlitePool, SyncEngine)> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool)
        .await
        .context("Failed to apply schema migrations")?;

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let engine = SyncEngine::new(store.clone(), store, clients, config.source_specs()?)
        .with_run_status(config.scheduler.store_run_status);
    Ok((pool, engine))
}

/// Resolve a selector against the configured sources.
pub fn select_sources<'a>(specs: &'a [SourceSpec], selector: &str) -> Result<Vec<&'a SourceSpec>> {
    let selected: Vec<&SourceSpec> = specs
        .iter()
        .filter(|s| {
            selector == "all"
                || s.id == selector
                || s.kind.label() == selector
                || s.id.split(':').next() == Some(selector)
        })
        .collect();

    if selected.is_empty() {
        let known: Vec<&str> = specs.iter().map(|s| s.id.as_str()).collect();
        bail!(
            "No configured source matches '{}'. Available: {}",
            selector,
            if known.is_empty() {
                "(none enabled)".to_string()
            } else {
                known.join(", ")
            }
        );
    }
    Ok(selected)
}

/// Run one cycle per selected source and print a summary for each.
///
/// A failing source does not stop the others; the call fails afterwards
/// if any source failed.
pub async fn run_sync(
    config: &Config,
    selector: &str,
    full: bool,
    clients: ClientRegistry,
) -> Result<Vec<CycleResult>> {
    let (pool, engine) = open_engine(config, clients).await?;
    let ids: Vec<String> = select_sources(engine.sources(), selector)?
        .into_iter()
        .map(|s| s.id.clone())
        .collect();

    let options = CycleOptions { force_full: full };
    let mut results = Vec::new();
    let mut failed = Vec::new();

    for id in &ids {
        match engine.run_cycle_with(id, Utc::now(), options).await {
            Ok(r) => {
                print_summary(&r, full);
                results.push(r);
            }
            Err(e) => {
                eprintln!("sync {} failed: {}", id, e);
                failed.push(id.clone());
            }
        }
    }

    pool.close().await;

    if !failed.is_empty() {
        bail!("{} of {} sources failed: {}", failed.len(), ids.len(), failed.join(", "));
    }
    Ok(results)
}

fn print_summary(r: &CycleResult, full: bool) {
    println!("sync {}{}", r.source_id, if full { " (full)" } else { "" });
    println!("  fetched: {} items in {} pages", r.items_fetched, r.pages);
    println!("  stored: {} ({} new)", r.items_stored, r.items_inserted);
    if r.items_deleted > 0 {
        println!("  deleted: {}", r.items_deleted);
    }
    if r.items_suppressed > 0 {
        println!("  suppressed duplicates: {}", r.items_suppressed);
    }
    if r.items_malformed > 0 {
        println!("  skipped malformed: {}", r.items_malformed);
    }
    if r.events_recorded > 0 {
        println!("  playback events: {}", r.events_recorded);
    }
    if r.used_fallback {
        println!("  cursor rejected, fell back to full window");
    }
    match r.new_watermark {
        Some(w) => println!("  watermark: {}", w.to_rfc3339()),
        None => println!("  watermark: unchanged"),
    }
    println!("ok");
}
