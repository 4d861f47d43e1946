//! `glider sources`: list configured sources.

use anyhow::Result;
use glider_core::error::Result as CoreResult;
use glider_core::models::{CursorPosition, SyncCursor};
use glider_core::store::CursorStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;
use crate::status::format_ts_relative;

pub async fn list_sources(config: &Config) -> Result<()> {
    let sources = config.configured_sources()?;
    if sources.is_empty() {
        println!("No sources enabled. Add [sources.*] sections with enabled = true.");
        return Ok(());
    }

    // Cursor status only when the database already exists.
    let store = if config.db.path.exists() {
        Some(SqliteStore::new(db::connect(config).await?))
    } else {
        None
    };

    println!("{:<28} {:<18} {:>10}   CURSOR", "SOURCE", "KIND", "INTERVAL");
    for source in &sources {
        let cursor_display = match &store {
            Some(store) => cursor_column(store.load_cursor(&source.spec.id).await),
            None => cursor_column(Ok(None)),
        };
        println!(
            "{:<28} {:<18} {:>9}s   {}",
            source.spec.id,
            source.spec.kind.label(),
            source.interval.as_secs(),
            cursor_display
        );
    }

    if let Some(store) = store {
        store.pool().close().await;
    }
    Ok(())
}

/// A store failure shows up in the listing instead of reading as "none".
fn cursor_column(cursor: CoreResult<Option<SyncCursor>>) -> String {
    match cursor.map(|c| c.map(|c| c.position)) {
        Ok(Some(CursorPosition::Token { .. })) => "sync token".to_string(),
        Ok(Some(CursorPosition::Watermark { time })) => format_ts_relative(time),
        Ok(None) => "none".to_string(),
        Err(e) => format!("error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use glider_core::error::SyncError;

    #[test]
    fn cursor_column_reports_store_errors() {
        assert_eq!(cursor_column(Ok(None)), "none");
        let token = SyncCursor::new(
            "google_calendar:primary",
            CursorPosition::Token {
                token: "t".into(),
            },
            Utc::now(),
        );
        assert_eq!(cursor_column(Ok(Some(token))), "sync token");

        let err = SyncError::StoreUnavailable("no such table: sync_cursors".into());
        assert_eq!(
            cursor_column(Err(err)),
            "error: store unavailable: no such table: sync_cursors"
        );
    }
}
