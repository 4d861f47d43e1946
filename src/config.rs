//! Configuration parsing and validation.
//!
//! Glider is configured with a single TOML file, passed via `--config`
//! (default `./config/glider.toml`). Every source section is optional and
//! disabled unless `enabled = true`.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/glider.sqlite"
//!
//! [scheduler]
//! store_run_status = true
//!
//! [sources.google_calendar]
//! enabled = true
//! interval_seconds = 900
//! calendar_ids = ["primary", "family"]
//!
//! [sources.spotify_recent]
//! enabled = true
//! interval_seconds = 1800
//!
//! [sources.spotify_playback]
//! enabled = true
//! interval_seconds = 30
//!
//! [sources.oura]
//! enabled = true
//! interval_seconds = 3600
//! data_types = ["daily_sleep", "daily_readiness"]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;

use glider_core::playback::DebounceConfig;
use glider_core::source::{OuraDailyType, SourceKind, SourceSpec};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Write a `sync_runs` row for every cycle.
    #[serde(default = "default_true")]
    pub store_run_status: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            store_run_status: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    pub google_calendar: Option<GoogleCalendarConfig>,
    pub spotify_recent: Option<SpotifyRecentConfig>,
    pub spotify_playback: Option<SpotifyPlaybackConfig>,
    pub oura: Option<OuraConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GoogleCalendarConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_calendar_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_calendar_ids")]
    pub calendar_ids: Vec<String>,
    pub lookback_days: Option<i64>,
}

fn default_calendar_interval() -> u64 {
    900
}

fn default_calendar_ids() -> Vec<String> {
    vec!["primary".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpotifyRecentConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_recent_interval")]
    pub interval_seconds: u64,
    pub lookback_hours: Option<i64>,
    pub overlap_hours: Option<i64>,
    pub duplicate_tolerance_seconds: Option<i64>,
}

fn default_recent_interval() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpotifyPlaybackConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_playback_interval")]
    pub interval_seconds: u64,
    pub consecutive_polls: Option<u32>,
    pub min_listen_seconds: Option<i64>,
    pub min_percentage: Option<f64>,
    pub restart_slack_seconds: Option<i64>,
}

fn default_playback_interval() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct OuraConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_oura_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_true")]
    pub heartrate: bool,
    /// Daily collections to sync. Defaults to all of them.
    pub data_types: Option<Vec<String>>,
    pub heartrate_lookback_hours: Option<i64>,
    pub heartrate_overlap_minutes: Option<i64>,
    pub daily_lookback_days: Option<i64>,
    pub daily_overlap_days: Option<i64>,
}

fn default_oura_interval() -> u64 {
    3600
}

const SECOND: i64 = 1;
const MINUTE: i64 = 60;
const HOUR: i64 = 3_600;
const DAY: i64 = 86_400;

fn span(key: &str, value: i64, unit: fn(i64) -> Option<Duration>) -> Result<Duration> {
    unit(value).with_context(|| format!("sources.{} is out of range", key))
}

/// An enabled source with its polling interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredSource {
    pub spec: SourceSpec,
    pub interval: StdDuration,
}

impl Config {
    /// Minimal config pointing at `db_path` with no sources.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            scheduler: SchedulerConfig::default(),
            sources: SourcesConfig::default(),
        }
    }

    /// Expand the enabled source sections into concrete source specs.
    pub fn configured_sources(&self) -> Result<Vec<ConfiguredSource>> {
        let mut out = Vec::new();

        if let Some(cal) = self.sources.google_calendar.as_ref().filter(|c| c.enabled) {
            let interval = StdDuration::from_secs(cal.interval_seconds);
            for calendar_id in &cal.calendar_ids {
                let mut spec = SourceSpec::new(SourceKind::GoogleCalendar {
                    calendar_id: calendar_id.clone(),
                });
                if let Some(days) = cal.lookback_days {
                    let lookback = span("google_calendar.lookback_days", days, Duration::try_days)?;
                    spec = spec.with_lookback(lookback);
                }
                out.push(ConfiguredSource { spec, interval });
            }
        }

        if let Some(recent) = self.sources.spotify_recent.as_ref().filter(|c| c.enabled) {
            let mut spec = SourceSpec::new(SourceKind::SpotifyRecent);
            if let Some(h) = recent.lookback_hours {
                let lookback = span("spotify_recent.lookback_hours", h, Duration::try_hours)?;
                spec = spec.with_lookback(lookback);
            }
            if let Some(h) = recent.overlap_hours {
                let overlap = span("spotify_recent.overlap_hours", h, Duration::try_hours)?;
                spec = spec.with_overlap(overlap);
            }
            if let Some(s) = recent.duplicate_tolerance_seconds {
                let tolerance =
                    span("spotify_recent.duplicate_tolerance_seconds", s, Duration::try_seconds)?;
                spec = spec.with_duplicate_tolerance(tolerance);
            }
            out.push(ConfiguredSource {
                spec,
                interval: StdDuration::from_secs(recent.interval_seconds),
            });
        }

        if let Some(pb) = self.sources.spotify_playback.as_ref().filter(|c| c.enabled) {
            let mut debounce = DebounceConfig::default();
            if let Some(n) = pb.consecutive_polls {
                debounce.consecutive_polls = n;
            }
            if let Some(s) = pb.min_listen_seconds {
                debounce.min_listen =
                    span("spotify_playback.min_listen_seconds", s, Duration::try_seconds)?;
            }
            if let Some(p) = pb.min_percentage {
                debounce.min_percentage = p;
            }
            if let Some(s) = pb.restart_slack_seconds {
                debounce.restart_slack =
                    span("spotify_playback.restart_slack_seconds", s, Duration::try_seconds)?;
            }
            out.push(ConfiguredSource {
                spec: SourceSpec::new(SourceKind::SpotifyPlayback).with_debounce(debounce),
                interval: StdDuration::from_secs(pb.interval_seconds),
            });
        }

        if let Some(oura) = self.sources.oura.as_ref().filter(|c| c.enabled) {
            let interval = StdDuration::from_secs(oura.interval_seconds);
            if oura.heartrate {
                let mut spec = SourceSpec::new(SourceKind::OuraHeartrate);
                if let Some(h) = oura.heartrate_lookback_hours {
                    let lookback = span("oura.heartrate_lookback_hours", h, Duration::try_hours)?;
                    spec = spec.with_lookback(lookback);
                }
                if let Some(m) = oura.heartrate_overlap_minutes {
                    let overlap = span("oura.heartrate_overlap_minutes", m, Duration::try_minutes)?;
                    spec = spec.with_overlap(overlap);
                }
                out.push(ConfiguredSource { spec, interval });
            }

            let data_types = match &oura.data_types {
                Some(names) => names
                    .iter()
                    .map(|n| n.parse::<OuraDailyType>().map_err(anyhow::Error::msg))
                    .collect::<Result<Vec<_>>>()
                    .context("sources.oura.data_types")?,
                None => OuraDailyType::ALL.to_vec(),
            };
            for data_type in data_types {
                let mut spec = SourceSpec::new(SourceKind::OuraDaily { data_type });
                if let Some(d) = oura.daily_lookback_days {
                    let lookback = span("oura.daily_lookback_days", d, Duration::try_days)?;
                    spec = spec.with_lookback(lookback);
                }
                if let Some(d) = oura.daily_overlap_days {
                    let overlap = span("oura.daily_overlap_days", d, Duration::try_days)?;
                    spec = spec.with_overlap(overlap);
                }
                out.push(ConfiguredSource { spec, interval });
            }
        }

        Ok(out)
    }

    pub fn source_specs(&self) -> Result<Vec<SourceSpec>> {
        Ok(self
            .configured_sources()?
            .into_iter()
            .map(|c| c.spec)
            .collect())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Upper bound on any configured lookback, overlap, or tolerance.
const MAX_SPAN_DAYS: i64 = 3650;

fn check_span(key: &str, value: Option<i64>, min: i64, unit_secs: i64) -> Result<()> {
    let Some(v) = value else {
        return Ok(());
    };
    let max = MAX_SPAN_DAYS * 86_400 / unit_secs;
    if v < min || v > max {
        bail!("sources.{} must be in [{}, {}]", key, min, max);
    }
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    let sources = &config.sources;

    if let Some(cal) = sources.google_calendar.as_ref().filter(|c| c.enabled) {
        if cal.interval_seconds == 0 {
            bail!("sources.google_calendar.interval_seconds must be > 0");
        }
        if cal.calendar_ids.is_empty() {
            bail!("sources.google_calendar.calendar_ids must not be empty");
        }
        check_span("google_calendar.lookback_days", cal.lookback_days, 1, DAY)?;
    }

    if let Some(recent) = sources.spotify_recent.as_ref().filter(|c| c.enabled) {
        if recent.interval_seconds == 0 {
            bail!("sources.spotify_recent.interval_seconds must be > 0");
        }
        check_span("spotify_recent.lookback_hours", recent.lookback_hours, 1, HOUR)?;
        check_span("spotify_recent.overlap_hours", recent.overlap_hours, 0, HOUR)?;
        check_span(
            "spotify_recent.duplicate_tolerance_seconds",
            recent.duplicate_tolerance_seconds,
            0,
            SECOND,
        )?;
    }

    if let Some(pb) = sources.spotify_playback.as_ref().filter(|c| c.enabled) {
        if pb.interval_seconds == 0 {
            bail!("sources.spotify_playback.interval_seconds must be > 0");
        }
        if pb.consecutive_polls == Some(0) {
            bail!("sources.spotify_playback.consecutive_polls must be >= 1");
        }
        if let Some(p) = pb.min_percentage {
            if !(p > 0.0 && p <= 100.0) {
                bail!("sources.spotify_playback.min_percentage must be in (0, 100]");
            }
        }
        check_span("spotify_playback.min_listen_seconds", pb.min_listen_seconds, 0, SECOND)?;
        check_span(
            "spotify_playback.restart_slack_seconds",
            pb.restart_slack_seconds,
            0,
            SECOND,
        )?;
    }

    if let Some(oura) = sources.oura.as_ref().filter(|c| c.enabled) {
        if oura.interval_seconds == 0 {
            bail!("sources.oura.interval_seconds must be > 0");
        }
        check_span("oura.heartrate_lookback_hours", oura.heartrate_lookback_hours, 1, HOUR)?;
        check_span(
            "oura.heartrate_overlap_minutes",
            oura.heartrate_overlap_minutes,
            0,
            MINUTE,
        )?;
        check_span("oura.daily_lookback_days", oura.daily_lookback_days, 1, DAY)?;
        check_span("oura.daily_overlap_days", oura.daily_overlap_days, 0, DAY)?;
        if let Some(names) = &oura.data_types {
            for name in names {
                if let Err(e) = name.parse::<OuraDailyType>() {
                    bail!("sources.oura.data_types: {}", e);
                }
            }
        }
    }

    let mut seen = HashSet::new();
    for source in config.configured_sources()? {
        if !seen.insert(source.spec.id.clone()) {
            bail!("duplicate source id '{}'", source.spec.id);
        }
    }

    Ok(())
}
