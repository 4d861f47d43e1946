//! Source kinds and the per-kind strategy table.
//!
//! Every supported source is a variant of the closed [`SourceKind`] enum.
//! [`SourceKind::strategy`] matches exhaustively, so adding a source is a
//! compile error until its fetch, ingest, and window behaviour is declared.
//!
//! | Kind | Fetch | Ingest | Cursor |
//! |------|-------|--------|--------|
//! | `GoogleCalendar` | paginated | upsert, tombstones delete | token |
//! | `SpotifyRecent` | paginated | suppress duplicates, then upsert | watermark |
//! | `SpotifyPlayback` | snapshot | playback detector | watermark |
//! | `OuraHeartrate` | paginated | upsert | watermark |
//! | `OuraDaily` | paginated | upsert | watermark (day-granular) |

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::playback::DebounceConfig;
use crate::window::{CursorShape, Granularity, WindowPolicy};

pub const CALENDAR_LOOKBACK_DAYS: i64 = 30;

pub const SPOTIFY_RECENT_LOOKBACK_HOURS: i64 = 24;
pub const SPOTIFY_RECENT_OVERLAP_HOURS: i64 = 2;
pub const DUPLICATE_TOLERANCE_SECONDS: i64 = 30;

pub const HEARTRATE_LOOKBACK_HOURS: i64 = 24;
pub const HEARTRATE_OVERLAP_MINUTES: i64 = 5;

pub const DAILY_LOOKBACK_DAYS: i64 = 7;
pub const DAILY_OVERLAP_DAYS: i64 = 1;

/// Oura summary collections fetched by date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OuraDailyType {
    DailyStress,
    DailyActivity,
    DailyReadiness,
    DailySleep,
    DailySpo2,
    Sleep,
    Session,
    Workout,
}

impl OuraDailyType {
    pub const ALL: [OuraDailyType; 8] = [
        OuraDailyType::DailyStress,
        OuraDailyType::DailyActivity,
        OuraDailyType::DailyReadiness,
        OuraDailyType::DailySleep,
        OuraDailyType::DailySpo2,
        OuraDailyType::Sleep,
        OuraDailyType::Session,
        OuraDailyType::Workout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OuraDailyType::DailyStress => "daily_stress",
            OuraDailyType::DailyActivity => "daily_activity",
            OuraDailyType::DailyReadiness => "daily_readiness",
            OuraDailyType::DailySleep => "daily_sleep",
            OuraDailyType::DailySpo2 => "daily_spo2",
            OuraDailyType::Sleep => "sleep",
            OuraDailyType::Session => "session",
            OuraDailyType::Workout => "workout",
        }
    }
}

impl fmt::Display for OuraDailyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OuraDailyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OuraDailyType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| format!("unknown Oura data type: '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    GoogleCalendar { calendar_id: String },
    SpotifyRecent,
    SpotifyPlayback,
    OuraHeartrate,
    OuraDaily { data_type: OuraDailyType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Request pages until the source stops returning a page token.
    Paginated,
    /// Poll a single point-in-time snapshot.
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Upsert every item by natural key; tombstones delete.
    Upsert,
    /// Drop items already stored within the duplicate tolerance, upsert the rest.
    SuppressDuplicates,
    /// Feed snapshots to the playback detector and upsert emitted events.
    Playback,
}

/// How a source kind is fetched, ingested, and windowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub fetch: FetchMode,
    pub ingest: IngestMode,
    pub cursor: CursorShape,
    pub granularity: Granularity,
}

impl SourceKind {
    pub fn strategy(&self) -> Strategy {
        match self {
            SourceKind::GoogleCalendar { .. } => Strategy {
                fetch: FetchMode::Paginated,
                ingest: IngestMode::Upsert,
                cursor: CursorShape::Token,
                granularity: Granularity::Instant,
            },
            SourceKind::SpotifyRecent => Strategy {
                fetch: FetchMode::Paginated,
                ingest: IngestMode::SuppressDuplicates,
                cursor: CursorShape::Watermark,
                granularity: Granularity::Instant,
            },
            SourceKind::SpotifyPlayback => Strategy {
                fetch: FetchMode::Snapshot,
                ingest: IngestMode::Playback,
                cursor: CursorShape::Watermark,
                granularity: Granularity::Instant,
            },
            SourceKind::OuraHeartrate => Strategy {
                fetch: FetchMode::Paginated,
                ingest: IngestMode::Upsert,
                cursor: CursorShape::Watermark,
                granularity: Granularity::Instant,
            },
            SourceKind::OuraDaily { .. } => Strategy {
                fetch: FetchMode::Paginated,
                ingest: IngestMode::Upsert,
                cursor: CursorShape::Watermark,
                granularity: Granularity::Day,
            },
        }
    }

    /// Stable identifier used for cursor, playback-state, and run rows.
    pub fn default_source_id(&self) -> String {
        match self {
            SourceKind::GoogleCalendar { calendar_id } => {
                format!("google_calendar:{}", calendar_id)
            }
            SourceKind::SpotifyRecent => "spotify:recent".to_string(),
            SourceKind::SpotifyPlayback => "spotify:playback".to_string(),
            SourceKind::OuraHeartrate => "oura:heartrate".to_string(),
            SourceKind::OuraDaily { data_type } => format!("oura:{}", data_type),
        }
    }

    /// Record-store partition this kind writes into.
    ///
    /// Both Spotify kinds share `spotify_listening_history` so the duplicate
    /// suppressor sees plays recorded by the playback detector.
    pub fn partition(&self) -> String {
        match self {
            SourceKind::GoogleCalendar { .. } => "google_calendar_events".to_string(),
            SourceKind::SpotifyRecent | SourceKind::SpotifyPlayback => {
                "spotify_listening_history".to_string()
            }
            SourceKind::OuraHeartrate => "oura_heartrate".to_string(),
            SourceKind::OuraDaily { data_type } => format!("oura_{}", data_type),
        }
    }

    /// Short label for listings (`google_calendar`, `oura_daily`, ...).
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::GoogleCalendar { .. } => "google_calendar",
            SourceKind::SpotifyRecent => "spotify_recent",
            SourceKind::SpotifyPlayback => "spotify_playback",
            SourceKind::OuraHeartrate => "oura_heartrate",
            SourceKind::OuraDaily { .. } => "oura_daily",
        }
    }

    pub fn default_window(&self) -> WindowPolicy {
        let strategy = self.strategy();
        let (lookback, overlap) = match self {
            SourceKind::GoogleCalendar { .. } => {
                (Duration::days(CALENDAR_LOOKBACK_DAYS), Duration::zero())
            }
            SourceKind::SpotifyRecent => (
                Duration::hours(SPOTIFY_RECENT_LOOKBACK_HOURS),
                Duration::hours(SPOTIFY_RECENT_OVERLAP_HOURS),
            ),
            SourceKind::SpotifyPlayback => (Duration::zero(), Duration::zero()),
            SourceKind::OuraHeartrate => (
                Duration::hours(HEARTRATE_LOOKBACK_HOURS),
                Duration::minutes(HEARTRATE_OVERLAP_MINUTES),
            ),
            SourceKind::OuraDaily { .. } => (
                Duration::days(DAILY_LOOKBACK_DAYS),
                Duration::days(DAILY_OVERLAP_DAYS),
            ),
        };
        WindowPolicy {
            shape: strategy.cursor,
            granularity: strategy.granularity,
            lookback,
            overlap,
        }
    }
}

/// A configured source instance: kind plus tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub id: String,
    pub kind: SourceKind,
    pub window: WindowPolicy,
    pub duplicate_tolerance: Duration,
    pub debounce: DebounceConfig,
}

impl SourceSpec {
    /// Spec with the kind's default id and default constants.
    pub fn new(kind: SourceKind) -> Self {
        Self {
            id: kind.default_source_id(),
            window: kind.default_window(),
            duplicate_tolerance: Duration::seconds(DUPLICATE_TOLERANCE_SECONDS),
            debounce: DebounceConfig::default(),
            kind,
        }
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.window.lookback = lookback;
        self
    }

    pub fn with_overlap(mut self, overlap: Duration) -> Self {
        self.window.overlap = overlap;
        self
    }

    pub fn with_duplicate_tolerance(mut self, tolerance: Duration) -> Self {
        self.duplicate_tolerance = tolerance;
        self
    }

    pub fn with_debounce(mut self, debounce: DebounceConfig) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn partition(&self) -> String {
        self.kind.partition()
    }
}
