//! Periodic execution of sync cycles.
//!
//! Each source gets its own tokio task ticking at the source's interval.
//! A source's cycles run one after another inside its task, so they never
//! overlap; different sources run concurrently. A failing cycle is logged
//! and recorded by the engine, and the loop keeps ticking.
//!
//! ```text
//!   Scheduler::run ──┬── loop google_calendar:primary (900 s)
//!                    ├── loop spotify:playback       (30 s)
//!                    └── loop oura:heartrate         (3600 s)
//!                          ▲
//!   watch::Sender<bool> ───┘ shutdown
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use glider_core::SyncEngine;

use crate::config::ConfiguredSource;

pub struct Scheduler {
    engine: Arc<SyncEngine>,
    schedule: Vec<(String, Duration)>,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>, sources: &[ConfiguredSource]) -> Self {
        Self {
            engine,
            schedule: sources
                .iter()
                .map(|s| (s.spec.id.clone(), s.interval))
                .collect(),
        }
    }

    pub fn schedule(&self) -> &[(String, Duration)] {
        &self.schedule
    }

    /// Run every source loop until `shutdown` flips to `true` (or its
    /// sender is dropped). An in-flight cycle finishes before its loop exits.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut handles = Vec::with_capacity(self.schedule.len());
        for (source_id, period) in self.schedule {
            info!(source_id = %source_id, interval_secs = period.as_secs(), "scheduling source");
            handles.push(tokio::spawn(source_loop(
                self.engine.clone(),
                source_id,
                period,
                shutdown.clone(),
            )));
        }

        for handle in handles {
            handle.await.context("source loop panicked")?;
        }
        info!("scheduler stopped");
        Ok(())
    }
}

async fn source_loop(
    engine: Arc<SyncEngine>,
    source_id: String,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                // Failures are logged and recorded by the engine.
                if let Err(e) = engine.run_cycle(&source_id).await {
                    debug!(source_id = %source_id, error = %e, "cycle returned error");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(source_id = %source_id, "source loop exited");
}
