//! `glider status` and `glider reset`.
//!
//! Status prints, per source, the stored cursor, the last run, and for
//! snapshot sources the playback detector state.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use glider_core::models::{CursorPosition, SourceStatus};
use glider_core::playback::PlaybackState;
use glider_core::traits::ClientRegistry;

use crate::config::Config;
use crate::ingest::{open_engine, select_sources};

pub async fn run_status(config: &Config, selector: Option<&str>) -> Result<()> {
    let (pool, engine) = open_engine(config, ClientRegistry::new()).await?;
    let ids: Vec<String> = select_sources(engine.sources(), selector.unwrap_or("all"))?
        .into_iter()
        .map(|s| s.id.clone())
        .collect();

    println!("Glider Sync Status");
    println!("==================");
    for id in &ids {
        let status = engine.get_status(id).await?;
        println!();
        print_status(&status);
    }
    println!();

    pool.close().await;
    Ok(())
}

fn print_status(status: &SourceStatus) {
    println!("  {} ({})", status.source_id, status.kind);

    match &status.cursor {
        Some(c) => match &c.position {
            CursorPosition::Token { .. } => println!(
                "    cursor:     sync token (saved {})",
                format_ts_relative(c.last_synced_at)
            ),
            CursorPosition::Watermark { time } => println!(
                "    cursor:     watermark {} ({})",
                format_ts_iso(*time),
                format_ts_relative(*time)
            ),
        },
        None => println!("    cursor:     none (next cycle is a full sync)"),
    }

    match &status.last_run {
        Some(run) => {
            println!(
                "    last run:   {} {}",
                run.status.as_str(),
                format_ts_relative(run.started_at)
            );
            println!(
                "    items:      {} fetched, {} stored",
                run.items_fetched, run.items_stored
            );
            if let Some(err) = &run.error {
                println!("    error:      {}", err);
            }
        }
        None => println!("    last run:   never"),
    }

    if let Some(state) = &status.playback {
        match state {
            PlaybackState::Idle { .. } => println!("    playback:   idle"),
            PlaybackState::Tracking(t) => println!(
                "    playback:   tracking {} ({} polls, {}s listened{})",
                t.item_id,
                t.consecutive_active_polls,
                (t.last_observed_progress_ms - t.first_observed_progress_ms) / 1000,
                if t.already_recorded { ", recorded" } else { "" }
            ),
        }
    }
}

pub async fn run_reset(config: &Config, source_id: &str) -> Result<()> {
    let (pool, engine) = open_engine(config, ClientRegistry::new()).await?;
    let removed = engine.reset(source_id).await?;
    if removed {
        println!("Reset {}: cursor and playback state cleared.", source_id);
    } else {
        println!("Reset {}: nothing stored.", source_id);
    }
    pool.close().await;
    Ok(())
}

/// Age of `ts` in the largest whole unit ("3 hours ago"). Future times and
/// anything older than 30 days print as an absolute timestamp.
pub fn format_ts_relative(ts: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(ts);
    if age < Duration::zero() || age >= Duration::days(30) {
        return format_ts_iso(ts);
    }
    if age < Duration::minutes(1) {
        return "just now".to_string();
    }

    let (n, unit) = match age.num_seconds() {
        s if s >= 86_400 => (s / 86_400, "day"),
        s if s >= 3_600 => (s / 3_600, "hour"),
        s => (s / 60, "min"),
    };
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_times() {
        let now = Utc::now();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - Duration::minutes(1)), "1 min ago");
        assert_eq!(format_ts_relative(now - Duration::hours(3)), "3 hours ago");
        assert_eq!(format_ts_relative(now - Duration::days(2)), "2 days ago");
        let old = now - Duration::days(90);
        assert_eq!(format_ts_relative(old), old.format("%Y-%m-%d %H:%M").to_string());
        let ahead = now + Duration::hours(2);
        assert_eq!(format_ts_relative(ahead), format_ts_iso(ahead));
    }
}
