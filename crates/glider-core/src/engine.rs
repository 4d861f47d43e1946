//! The sync engine: one cycle per call, per source.
//!
//! # Cycle
//!
//! ```text
//! Paginated sources                      Snapshot sources
//! ─────────────────                      ────────────────
//! load cursor                            load playback state
//! resolve window                         poll snapshot (refresh token once)
//! fetch pages (fallback / refresh once)  detector.observe()
//! normalize ─► [dedup] ─► sink           sink(event), if any
//! save cursor                            save state, save watermark
//! ```
//!
//! A cycle that returns `Err` has not touched the cursor. Records written
//! before the failure stay; re-ingesting them next cycle is a no-op
//! overwrite.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, info_span, warn, Instrument};

use crate::dedup::DuplicateSuppressor;
use crate::error::{ErrorClass, Result, SyncError};
use crate::fetcher::{IncrementalFetcher, RetryBudget};
use crate::models::{CursorPosition, CycleResult, SourceStatus, SyncCursor, SyncRun};
use crate::normalize::normalize;
use crate::playback::{PlaybackEventDetector, PlaybackSnapshot};
use crate::sink::{IdempotentSink, IngestOutcome};
use crate::source::{FetchMode, IngestMode, SourceSpec};
use crate::store::{CursorStore, RecordStore};
use crate::traits::{AuthProvider, ClientRegistry, SnapshotClient, SourceClient, SourceHandle};
use crate::window::{resolve, watermark_outside_lookback};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOptions {
    /// Ignore the stored cursor and fetch the full lookback window.
    pub force_full: bool,
}

pub struct SyncEngine {
    records: Arc<dyn RecordStore>,
    cursors: Arc<dyn CursorStore>,
    clients: ClientRegistry,
    sources: Vec<SourceSpec>,
    record_runs: bool,
}

impl SyncEngine {
    pub fn new(
        records: Arc<dyn RecordStore>,
        cursors: Arc<dyn CursorStore>,
        clients: ClientRegistry,
        sources: Vec<SourceSpec>,
    ) -> Self {
        Self {
            records,
            cursors,
            clients,
            sources,
            record_runs: true,
        }
    }

    /// Whether cycles write a `SyncRun` row. On by default.
    pub fn with_run_status(mut self, enabled: bool) -> Self {
        self.record_runs = enabled;
        self
    }

    pub fn sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    pub fn source(&self, source_id: &str) -> Result<&SourceSpec> {
        self.sources
            .iter()
            .find(|s| s.id == source_id)
            .ok_or_else(|| SyncError::UnknownSource(source_id.to_string()))
    }

    pub async fn run_cycle(&self, source_id: &str) -> Result<CycleResult> {
        self.run_cycle_with(source_id, Utc::now(), CycleOptions::default())
            .await
    }

    /// Run one cycle as of `now`.
    pub async fn run_cycle_with(
        &self,
        source_id: &str,
        now: DateTime<Utc>,
        options: CycleOptions,
    ) -> Result<CycleResult> {
        let spec = self.source(source_id)?;
        let span = info_span!("cycle", source_id = %spec.id, kind = spec.kind.label());
        self.run_recorded(spec, now, options).instrument(span).await
    }

    async fn run_recorded(
        &self,
        spec: &SourceSpec,
        now: DateTime<Utc>,
        options: CycleOptions,
    ) -> Result<CycleResult> {
        let run = SyncRun::start(&spec.id, now);
        self.record_run(&run).await;

        let result = match spec.kind.strategy().fetch {
            FetchMode::Paginated => self.incremental_cycle(spec, now, options).await,
            FetchMode::Snapshot => self.snapshot_cycle(spec, now).await,
        };

        match &result {
            Ok(r) => {
                info!(
                    fetched = r.items_fetched,
                    stored = r.items_stored,
                    deleted = r.items_deleted,
                    suppressed = r.items_suppressed,
                    malformed = r.items_malformed,
                    events = r.events_recorded,
                    "cycle complete"
                );
                self.record_run(&run.succeed(r, Utc::now())).await;
            }
            Err(e) => {
                error!(error = %e, class = ?e.class(), "cycle failed");
                self.record_run(&run.fail(&e.to_string(), Utc::now())).await;
            }
        }
        result
    }

    /// Run status is bookkeeping; failing to write it never fails the cycle.
    async fn record_run(&self, run: &SyncRun) {
        if !self.record_runs {
            return;
        }
        if let Err(e) = self.cursors.save_run(run).await {
            warn!(error = %e, "could not record run status");
        }
    }

    fn auth(&self, source_id: &str) -> Result<Arc<dyn AuthProvider>> {
        self.clients
            .auth()
            .ok_or_else(|| SyncError::MissingClient(format!("{} (auth provider)", source_id)))
    }

    fn paged_client(&self, source_id: &str) -> Result<Arc<dyn SourceClient>> {
        match self.clients.find(source_id) {
            Some(SourceHandle::Paged(client)) => Ok(client.clone()),
            _ => Err(SyncError::MissingClient(source_id.to_string())),
        }
    }

    fn snapshot_client(&self, source_id: &str) -> Result<Arc<dyn SnapshotClient>> {
        match self.clients.find(source_id) {
            Some(SourceHandle::Snapshot(client)) => Ok(client.clone()),
            _ => Err(SyncError::MissingClient(source_id.to_string())),
        }
    }

    async fn incremental_cycle(
        &self,
        spec: &SourceSpec,
        now: DateTime<Utc>,
        options: CycleOptions,
    ) -> Result<CycleResult> {
        let client = self.paged_client(&spec.id)?;
        let auth = self.auth(&spec.id)?;

        let stored_cursor = self.cursors.load_cursor(&spec.id).await?;
        let position = stored_cursor.as_ref().map(|c| &c.position);
        if !options.force_full && watermark_outside_lookback(position, now, &spec.window) {
            warn!(
                watermark = ?stored_cursor.as_ref().and_then(|c| c.watermark()),
                "stored watermark is older than the lookback window; items in between are skipped"
            );
        }
        let resolution = resolve(position, now, &spec.window, options.force_full);

        let fetched = IncrementalFetcher::new(auth.as_ref(), client.as_ref())
            .fetch(&spec.id, &spec.window, &resolution, now)
            .await?;

        let mut result = CycleResult {
            source_id: spec.id.clone(),
            items_fetched: fetched.items.len() as u64,
            pages: fetched.pages,
            used_fallback: fetched.used_fallback,
            ..Default::default()
        };

        let partition = spec.partition();
        let sink = IdempotentSink::new(self.records.clone(), partition.clone());
        let suppressor = match spec.kind.strategy().ingest {
            IngestMode::SuppressDuplicates => Some(DuplicateSuppressor::new(
                self.records.clone(),
                partition,
                spec.duplicate_tolerance,
            )),
            _ => None,
        };

        for raw in &fetched.items {
            let item = match normalize(&spec.kind, raw) {
                Ok(item) => item,
                Err(e) if e.class() == ErrorClass::MalformedItem => {
                    warn!(error = %e, "skipping malformed item");
                    result.items_malformed += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let (Some(suppressor), Some(item_id), Some(at)) =
                (&suppressor, item.item_id.as_deref(), item.occurred_at)
            {
                if suppressor.is_duplicate(item_id, at).await? {
                    result.items_suppressed += 1;
                    continue;
                }
            }

            match sink.ingest(&item, now).await? {
                IngestOutcome::Inserted => {
                    result.items_inserted += 1;
                    result.items_stored += 1;
                }
                IngestOutcome::Updated | IngestOutcome::Unchanged => result.items_stored += 1,
                IngestOutcome::Deleted => result.items_deleted += 1,
                IngestOutcome::AlreadyAbsent => {}
            }
        }

        match fetched.next_cursor {
            Some(position) => {
                if let CursorPosition::Watermark { time } = &position {
                    result.new_watermark = Some(*time);
                }
                self.cursors
                    .save_cursor(&SyncCursor::new(&spec.id, position, now))
                    .await?;
            }
            None if fetched.used_fallback => {
                // The rejected token must not be retried next cycle.
                self.cursors.reset_cursor(&spec.id).await?;
            }
            None => {}
        }

        Ok(result)
    }

    async fn snapshot_cycle(&self, spec: &SourceSpec, now: DateTime<Utc>) -> Result<CycleResult> {
        let client = self.snapshot_client(&spec.id)?;
        let auth = self.auth(&spec.id)?;

        let state = self
            .cursors
            .load_playback_state(&spec.id)
            .await?
            .unwrap_or_default();

        let mut token = auth.get_valid_access_token(&spec.id).await?;
        let mut auth_budget = RetryBudget::new(1);
        let snapshot = loop {
            match client.poll_snapshot(&spec.id, &token).await {
                Ok(snapshot) => break snapshot,
                Err(SyncError::SourceAuthExpired) if auth_budget.try_spend() => {
                    warn!("access token rejected, refreshing");
                    token = auth.refresh_access_token(&spec.id).await?;
                }
                Err(e) => return Err(e),
            }
        }
        .unwrap_or_else(PlaybackSnapshot::idle);

        let mut result = CycleResult {
            source_id: spec.id.clone(),
            items_fetched: u64::from(snapshot.item_id.is_some()),
            pages: 1,
            ..Default::default()
        };

        let transition = PlaybackEventDetector::new(spec.debounce).observe(&state, &snapshot, now);

        // Event first: if saving the state fails, the next poll re-emits the
        // same event under the same key.
        if let Some(event) = &transition.recorded {
            let sink = IdempotentSink::new(self.records.clone(), spec.partition());
            let outcome = sink.ingest(&event.to_item(), now).await?;
            if outcome.stored() {
                result.items_stored += 1;
            }
            if outcome == IngestOutcome::Inserted {
                result.items_inserted += 1;
            }
            result.events_recorded += 1;
            info!(
                item_id = %event.item_id,
                progress_ms = event.progress_reached_ms,
                "playback event recorded"
            );
        }

        self.cursors
            .save_playback_state(&spec.id, &transition.state)
            .await?;
        self.cursors
            .save_cursor(&SyncCursor::new(
                &spec.id,
                CursorPosition::Watermark { time: now },
                now,
            ))
            .await?;
        result.new_watermark = Some(now);

        Ok(result)
    }

    pub async fn get_status(&self, source_id: &str) -> Result<SourceStatus> {
        let spec = self.source(source_id)?;
        let playback = match spec.kind.strategy().fetch {
            FetchMode::Snapshot => self.cursors.load_playback_state(&spec.id).await?,
            FetchMode::Paginated => None,
        };
        Ok(SourceStatus {
            source_id: spec.id.clone(),
            kind: spec.kind.label().to_string(),
            cursor: self.cursors.load_cursor(&spec.id).await?,
            last_run: self.cursors.last_run(&spec.id).await?,
            playback,
        })
    }

    /// Forget the cursor and playback state so the next cycle starts over.
    /// Returns whether anything was removed.
    pub async fn reset(&self, source_id: &str) -> Result<bool> {
        let spec = self.source(source_id)?;
        let cursor = self.cursors.reset_cursor(&spec.id).await?;
        let playback = self.cursors.reset_playback_state(&spec.id).await?;
        Ok(cursor || playback)
    }
}
