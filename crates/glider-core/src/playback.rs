//! Playback event detection from point-in-time snapshots.
//!
//! A snapshot source only tells us what is playing right now. The
//! [`PlaybackEventDetector`] turns a sequence of snapshots into discrete
//! "item was consumed" events using a debounce criterion:
//!
//! ```text
//!   consecutive_active_polls >= consecutive_polls
//!   AND (listened >= min_listen OR listened / duration >= min_percentage)
//!
//!   listened = last_observed_progress - first_observed_progress
//! ```
//!
//! [`PlaybackEventDetector::observe`] is a pure transition function. The
//! engine loads the persisted [`PlaybackState`], calls `observe`, stores any
//! emitted event, then persists the returned state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::NormalizedItem;

/// Debounce thresholds. Defaults: 2 polls, 30 s, 20 %, 5 s restart slack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebounceConfig {
    pub consecutive_polls: u32,
    pub min_listen: Duration,
    pub min_percentage: f64,
    /// Backwards progress tolerated before a same-item snapshot counts as a restart.
    pub restart_slack: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            consecutive_polls: 2,
            min_listen: Duration::seconds(30),
            min_percentage: 20.0,
            restart_slack: Duration::seconds(5),
        }
    }
}

/// What the source reported for one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    /// `None` when nothing is loaded in the player.
    pub item_id: Option<String>,
    pub is_playing: bool,
    pub progress_ms: i64,
    pub duration_ms: i64,
    pub metadata: serde_json::Value,
}

impl PlaybackSnapshot {
    pub fn idle() -> Self {
        Self {
            item_id: None,
            is_playing: false,
            progress_ms: 0,
            duration_ms: 0,
            metadata: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedItem {
    pub item_id: String,
    pub started_at: DateTime<Utc>,
    pub first_observed_progress_ms: i64,
    pub last_observed_progress_ms: i64,
    pub last_poll_at: DateTime<Utc>,
    pub consecutive_active_polls: u32,
    pub already_recorded: bool,
    pub duration_ms: i64,
    pub item_metadata: serde_json::Value,
}

impl TrackedItem {
    fn listened_ms(&self) -> i64 {
        self.last_observed_progress_ms - self.first_observed_progress_ms
    }

    fn percentage(&self) -> f64 {
        if self.duration_ms > 0 {
            self.listened_ms() as f64 / self.duration_ms as f64 * 100.0
        } else {
            0.0
        }
    }
}

/// Persisted detector state for one snapshot source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlaybackState {
    Idle {
        last_poll_at: Option<DateTime<Utc>>,
    },
    Tracking(TrackedItem),
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::Idle { last_poll_at: None }
    }
}

/// A play that met the debounce criterion.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub item_id: String,
    pub started_at: DateTime<Utc>,
    pub progress_reached_ms: i64,
    pub percentage_reached: f64,
    pub duration_ms: i64,
    pub metadata: serde_json::Value,
}

impl RecordedEvent {
    fn from_tracked(t: &TrackedItem) -> Self {
        Self {
            item_id: t.item_id.clone(),
            started_at: t.started_at,
            progress_reached_ms: t.listened_ms(),
            percentage_reached: t.percentage(),
            duration_ms: t.duration_ms,
            metadata: t.item_metadata.clone(),
        }
    }

    /// Listening-history item keyed like history plays: `{started_at_ms}_{id12}`.
    pub fn to_item(&self) -> NormalizedItem {
        let id12: String = self.item_id.chars().take(12).collect();
        let mut payload = match &self.metadata {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        payload.insert("spotify_track_id".into(), self.item_id.clone().into());
        payload.insert("listened_at".into(), self.started_at.to_rfc3339().into());
        payload.insert("progress_reached_ms".into(), self.progress_reached_ms.into());
        payload.insert("percentage_listened".into(), self.percentage_reached.into());
        payload.insert("duration_ms".into(), self.duration_ms.into());

        NormalizedItem {
            natural_key: format!("{}_{}", self.started_at.timestamp_millis(), id12),
            item_id: Some(self.item_id.clone()),
            occurred_at: Some(self.started_at),
            payload: serde_json::Value::Object(payload),
            tombstone: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: PlaybackState,
    pub recorded: Option<RecordedEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct PlaybackEventDetector {
    config: DebounceConfig,
}

impl PlaybackEventDetector {
    pub fn new(config: DebounceConfig) -> Self {
        Self { config }
    }

    pub fn meets_criterion(&self, t: &TrackedItem) -> bool {
        if t.consecutive_active_polls < self.config.consecutive_polls {
            return false;
        }
        t.listened_ms() >= self.config.min_listen.num_milliseconds()
            || t.percentage() >= self.config.min_percentage
    }

    pub fn observe(
        &self,
        state: &PlaybackState,
        snapshot: &PlaybackSnapshot,
        now: DateTime<Utc>,
    ) -> Transition {
        let item_id = match &snapshot.item_id {
            Some(id) => id,
            None => {
                let recorded = match state {
                    PlaybackState::Tracking(t) => self.final_evaluation(t),
                    PlaybackState::Idle { .. } => None,
                };
                return Transition {
                    state: PlaybackState::Idle {
                        last_poll_at: Some(now),
                    },
                    recorded,
                };
            }
        };

        match state {
            PlaybackState::Idle { .. } => Transition {
                state: PlaybackState::Tracking(start_tracking(item_id, snapshot, now)),
                recorded: None,
            },
            PlaybackState::Tracking(t) => {
                let slack = self.config.restart_slack.num_milliseconds();
                let restarted = t.item_id == *item_id
                    && snapshot.progress_ms < t.last_observed_progress_ms.saturating_sub(slack);

                if t.item_id != *item_id || restarted {
                    return Transition {
                        state: PlaybackState::Tracking(start_tracking(item_id, snapshot, now)),
                        recorded: self.final_evaluation(t),
                    };
                }

                let mut next = t.clone();
                next.last_observed_progress_ms =
                    next.last_observed_progress_ms.max(snapshot.progress_ms);
                next.last_poll_at = now;
                if snapshot.duration_ms > 0 {
                    next.duration_ms = snapshot.duration_ms;
                }
                if snapshot.is_playing {
                    next.consecutive_active_polls += 1;
                }

                let mut recorded = None;
                if !next.already_recorded && self.meets_criterion(&next) {
                    recorded = Some(RecordedEvent::from_tracked(&next));
                    next.already_recorded = true;
                }
                Transition {
                    state: PlaybackState::Tracking(next),
                    recorded,
                }
            }
        }
    }

    /// Last chance for an item that is going away.
    fn final_evaluation(&self, t: &TrackedItem) -> Option<RecordedEvent> {
        if !t.already_recorded && self.meets_criterion(t) {
            Some(RecordedEvent::from_tracked(t))
        } else {
            None
        }
    }
}

fn start_tracking(item_id: &str, snapshot: &PlaybackSnapshot, now: DateTime<Utc>) -> TrackedItem {
    TrackedItem {
        item_id: item_id.to_string(),
        started_at: now,
        first_observed_progress_ms: snapshot.progress_ms,
        last_observed_progress_ms: snapshot.progress_ms,
        last_poll_at: now,
        consecutive_active_polls: u32::from(snapshot.is_playing),
        already_recorded: false,
        duration_ms: snapshot.duration_ms,
        item_metadata: snapshot.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 20, 0, 0).unwrap()
    }

    fn playing(id: &str, progress_ms: i64) -> PlaybackSnapshot {
        PlaybackSnapshot {
            item_id: Some(id.to_string()),
            is_playing: true,
            progress_ms,
            duration_ms: 200_000,
            metadata: json!({"track_name": "Windowlicker"}),
        }
    }

    #[test]
    fn debounce_emits_once_at_third_poll() {
        let detector = PlaybackEventDetector::default();
        let mut state = PlaybackState::default();
        let mut events = Vec::new();

        for (i, progress) in [0, 10_000, 35_000, 60_000, 90_000].into_iter().enumerate() {
            let now = t0() + Duration::seconds(10 * i as i64);
            let tr = detector.observe(&state, &playing("4uLU6hMCjMI75M1A2tKUQC", progress), now);
            if let Some(ev) = tr.recorded {
                events.push((i, ev));
            }
            state = tr.state;
        }

        assert_eq!(events.len(), 1);
        let (poll, ev) = &events[0];
        assert_eq!(*poll, 2);
        assert_eq!(ev.progress_reached_ms, 35_000);
        assert_eq!(ev.started_at, t0());
    }

    #[test]
    fn single_poll_never_emits() {
        let detector = PlaybackEventDetector::default();
        let tr = detector.observe(&PlaybackState::default(), &playing("a", 150_000), t0());
        assert!(tr.recorded.is_none());
        let tr = detector.observe(&tr.state, &PlaybackSnapshot::idle(), t0());
        assert!(tr.recorded.is_none());
        assert!(matches!(tr.state, PlaybackState::Idle { .. }));
    }

    #[test]
    fn restart_evaluates_previous_play() {
        let detector = PlaybackEventDetector::default();
        let state = PlaybackState::Tracking(TrackedItem {
            item_id: "A".into(),
            started_at: t0(),
            first_observed_progress_ms: 0,
            last_observed_progress_ms: 180_000,
            last_poll_at: t0() + Duration::seconds(180),
            consecutive_active_polls: 2,
            already_recorded: false,
            duration_ms: 200_000,
            item_metadata: json!({}),
        });

        let now = t0() + Duration::seconds(200);
        let tr = detector.observe(&state, &playing("A", 5_000), now);

        let ev = tr.recorded.expect("previous play recorded");
        assert_eq!(ev.started_at, t0());
        assert!((ev.percentage_reached - 90.0).abs() < 1e-9);

        match tr.state {
            PlaybackState::Tracking(t) => {
                assert_eq!(t.first_observed_progress_ms, 5_000);
                assert_eq!(t.started_at, now);
                assert_eq!(t.consecutive_active_polls, 1);
                assert!(!t.already_recorded);
            }
            other => panic!("expected tracking, got {:?}", other),
        }
    }

    #[test]
    fn item_change_records_previous_item_once() {
        let detector = PlaybackEventDetector::default();
        let mut state = PlaybackState::default();
        let mut events = Vec::new();

        let polls = [
            (0, playing("A", 0)),
            (40, playing("A", 40_000)),
            (50, playing("B", 2_000)),
        ];
        for (secs, snapshot) in polls {
            let tr = detector.observe(&state, &snapshot, t0() + Duration::seconds(secs));
            events.extend(tr.recorded);
            state = tr.state;
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].item_id, "A");
        assert_eq!(events[0].started_at, t0());
        assert_eq!(events[0].progress_reached_ms, 40_000);

        match state {
            PlaybackState::Tracking(t) => {
                assert_eq!(t.item_id, "B");
                assert_eq!(t.started_at, t0() + Duration::seconds(50));
                assert_eq!(t.consecutive_active_polls, 1);
                assert!(!t.already_recorded);
            }
            other => panic!("expected tracking, got {:?}", other),
        }
    }

    #[test]
    fn item_change_flushes_unrecorded_play() {
        let detector = PlaybackEventDetector::default();
        let tracked = TrackedItem {
            item_id: "A".into(),
            started_at: t0(),
            first_observed_progress_ms: 0,
            last_observed_progress_ms: 40_000,
            last_poll_at: t0() + Duration::seconds(40),
            consecutive_active_polls: 2,
            already_recorded: false,
            duration_ms: 200_000,
            item_metadata: json!({}),
        };

        let now = t0() + Duration::seconds(50);
        let tr = detector.observe(&PlaybackState::Tracking(tracked.clone()), &playing("B", 0), now);
        let ev = tr.recorded.expect("previous item recorded");
        assert_eq!(ev.item_id, "A");
        assert_eq!(ev.started_at, t0());
        assert_eq!(ev.progress_reached_ms, 40_000);
        assert!(matches!(
            &tr.state,
            PlaybackState::Tracking(t) if t.item_id == "B" && t.consecutive_active_polls == 1
        ));

        // Below the criterion: switching items emits nothing.
        let short = TrackedItem {
            last_observed_progress_ms: 12_000,
            ..tracked
        };
        let tr = detector.observe(&PlaybackState::Tracking(short), &playing("B", 0), now);
        assert!(tr.recorded.is_none());
        assert!(matches!(&tr.state, PlaybackState::Tracking(t) if t.item_id == "B"));
    }

    #[test]
    fn small_seek_back_is_not_restart() {
        let detector = PlaybackEventDetector::default();
        let tr = detector.observe(&PlaybackState::default(), &playing("A", 20_000), t0());
        let tr = detector.observe(&tr.state, &playing("A", 17_000), t0() + Duration::seconds(5));
        match tr.state {
            PlaybackState::Tracking(t) => {
                assert_eq!(t.started_at, t0());
                assert_eq!(t.last_observed_progress_ms, 20_000);
                assert_eq!(t.consecutive_active_polls, 2);
            }
            other => panic!("expected tracking, got {:?}", other),
        }
    }

    #[test]
    fn stop_flushes_unrecorded_play() {
        let detector = PlaybackEventDetector::new(DebounceConfig {
            consecutive_polls: 2,
            min_listen: Duration::seconds(30),
            min_percentage: 20.0,
            restart_slack: Duration::seconds(5),
        });
        let state = PlaybackState::Tracking(TrackedItem {
            item_id: "B".into(),
            started_at: t0(),
            first_observed_progress_ms: 0,
            last_observed_progress_ms: 45_000,
            last_poll_at: t0(),
            consecutive_active_polls: 3,
            already_recorded: false,
            duration_ms: 300_000,
            item_metadata: json!({}),
        });
        let tr = detector.observe(&state, &PlaybackSnapshot::idle(), t0() + Duration::seconds(60));
        assert_eq!(tr.recorded.map(|e| e.progress_reached_ms), Some(45_000));
        assert_eq!(
            tr.state,
            PlaybackState::Idle {
                last_poll_at: Some(t0() + Duration::seconds(60))
            }
        );
    }

    #[test]
    fn paused_polls_do_not_count() {
        let detector = PlaybackEventDetector::default();
        let mut paused = playing("C", 0);
        paused.is_playing = false;
        let tr = detector.observe(&PlaybackState::default(), &paused, t0());
        paused.progress_ms = 0;
        let tr = detector.observe(&tr.state, &paused, t0() + Duration::seconds(10));
        match &tr.state {
            PlaybackState::Tracking(t) => assert_eq!(t.consecutive_active_polls, 0),
            other => panic!("expected tracking, got {:?}", other),
        }
    }

    #[test]
    fn event_item_uses_history_key_shape() {
        let ev = RecordedEvent {
            item_id: "4uLU6hMCjMI75M1A2tKUQC".into(),
            started_at: t0(),
            progress_reached_ms: 35_000,
            percentage_reached: 17.5,
            duration_ms: 200_000,
            metadata: json!({"track_name": "Windowlicker"}),
        };
        let item = ev.to_item();
        assert_eq!(
            item.natural_key,
            format!("{}_4uLU6hMCjMI7", t0().timestamp_millis())
        );
        assert_eq!(item.payload["track_name"], "Windowlicker");
        assert_eq!(item.payload["progress_reached_ms"], 35_000);
    }
}
