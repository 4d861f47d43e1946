//! Request window resolution.
//!
//! Decides what to ask a source for next, given the stored cursor. Token
//! sources resume from their continuation token. Time sources re-request a
//! margin before the stored watermark: the watermark is the *start* of the
//! previous cycle, and late-delivered items can land before it.
//!
//! ```text
//!   first run:      [now - lookback, now]
//!   with watermark: [max(now - lookback, watermark - overlap), now]
//!   force full:     [now - lookback, now]
//! ```
//!
//! Everything here is pure; callers pass `now`.

use chrono::{DateTime, Duration, Utc};

use crate::models::CursorPosition;

/// Which cursor variant a source persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorShape {
    Token,
    Watermark,
}

/// Resolution of window boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Instant,
    /// Boundaries are truncated to UTC midnight.
    Day,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub shape: CursorShape,
    pub granularity: Granularity,
    pub lookback: Duration,
    pub overlap: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestWindow {
    /// Resume from a source-issued continuation token.
    FromCursor { token: String },
    /// Request everything in `[start, end]`.
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl RequestWindow {
    pub fn is_cursor(&self) -> bool {
        matches!(self, RequestWindow::FromCursor { .. })
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        match self {
            RequestWindow::Range { start, .. } => Some(*start),
            RequestWindow::FromCursor { .. } => None,
        }
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        match self {
            RequestWindow::Range { end, .. } => Some(*end),
            RequestWindow::FromCursor { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub window: RequestWindow,
    pub is_cursor_based: bool,
}

/// Compute the next request window for a source.
///
/// A stored cursor of the wrong shape for the policy is ignored and the
/// source is treated as a first run.
pub fn resolve(
    cursor: Option<&CursorPosition>,
    now: DateTime<Utc>,
    policy: &WindowPolicy,
    force_full: bool,
) -> Resolution {
    if force_full {
        return Resolution {
            window: fallback_window(now, policy),
            is_cursor_based: false,
        };
    }

    match (policy.shape, cursor) {
        (CursorShape::Token, Some(CursorPosition::Token { token })) => Resolution {
            window: RequestWindow::FromCursor {
                token: token.clone(),
            },
            is_cursor_based: true,
        },
        (CursorShape::Watermark, Some(CursorPosition::Watermark { time })) => {
            let start = std::cmp::max(
                earlier(now, policy.lookback),
                earlier(*time, policy.overlap),
            );
            Resolution {
                window: range(start, now, policy.granularity),
                is_cursor_based: false,
            }
        }
        _ => Resolution {
            window: fallback_window(now, policy),
            is_cursor_based: false,
        },
    }
}

/// The lookback-from-now window used on first runs, forced rescans, and the
/// fetcher's invalid-cursor fallback.
pub fn fallback_window(now: DateTime<Utc>, policy: &WindowPolicy) -> RequestWindow {
    range(earlier(now, policy.lookback), now, policy.granularity)
}

/// True when a stored watermark is older than the lookback horizon, meaning
/// the window start is clamped and items between the two may be missed.
pub fn watermark_outside_lookback(
    cursor: Option<&CursorPosition>,
    now: DateTime<Utc>,
    policy: &WindowPolicy,
) -> bool {
    match cursor {
        Some(CursorPosition::Watermark { time }) => {
            earlier(*time, policy.overlap) < earlier(now, policy.lookback)
        }
        _ => false,
    }
}

/// `t - span`, clamped to the earliest representable instant.
pub(crate) fn earlier(t: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    t.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `t + span`, clamped to the latest representable instant.
pub(crate) fn later(t: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    t.checked_add_signed(span).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn range(start: DateTime<Utc>, end: DateTime<Utc>, granularity: Granularity) -> RequestWindow {
    match granularity {
        Granularity::Instant => RequestWindow::Range { start, end },
        Granularity::Day => RequestWindow::Range {
            start: truncate_to_day(start),
            end: truncate_to_day(end),
        },
    }
}

fn truncate_to_day(t: DateTime<Utc>) -> DateTime<Utc> {
    t.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn time_policy() -> WindowPolicy {
        WindowPolicy {
            shape: CursorShape::Watermark,
            granularity: Granularity::Instant,
            lookback: Duration::hours(24),
            overlap: Duration::minutes(5),
        }
    }

    #[test]
    fn first_run_uses_lookback() {
        let now = at(12, 0);
        let r = resolve(None, now, &time_policy(), false);
        assert!(!r.is_cursor_based);
        assert_eq!(
            r.window,
            RequestWindow::Range {
                start: now - Duration::hours(24),
                end: now
            }
        );
    }

    #[test]
    fn watermark_applies_overlap() {
        let now = at(12, 0);
        let wm = CursorPosition::Watermark { time: at(11, 30) };
        let r = resolve(Some(&wm), now, &time_policy(), false);
        assert_eq!(r.window.start(), Some(at(11, 25)));
        assert_eq!(r.window.end(), Some(now));
    }

    #[test]
    fn consecutive_windows_cover_overlap_margin() {
        let policy = time_policy();
        // Cycle 1 started at w1 and succeeded; cycle 2 runs some minutes later.
        let w1 = at(10, 0);
        for delay_min in [1, 5, 30, 120, 600] {
            let now2 = w1 + Duration::minutes(delay_min);
            let r = resolve(
                Some(&CursorPosition::Watermark { time: w1 }),
                now2,
                &policy,
                false,
            );
            assert!(r.window.start().unwrap() <= w1 - policy.overlap);
        }
    }

    #[test]
    fn force_full_ignores_watermark() {
        let now = at(12, 0);
        let wm = CursorPosition::Watermark { time: at(11, 59) };
        let r = resolve(Some(&wm), now, &time_policy(), true);
        assert_eq!(r.window.start(), Some(now - Duration::hours(24)));
    }

    #[test]
    fn token_cursor_ignores_lookback() {
        let policy = WindowPolicy {
            shape: CursorShape::Token,
            granularity: Granularity::Instant,
            lookback: Duration::days(30),
            overlap: Duration::zero(),
        };
        let cursor = CursorPosition::Token {
            token: "sync-abc".into(),
        };
        let r = resolve(Some(&cursor), at(12, 0), &policy, false);
        assert!(r.is_cursor_based);
        assert_eq!(
            r.window,
            RequestWindow::FromCursor {
                token: "sync-abc".into()
            }
        );

        // A watermark stored for a token source is not trusted.
        let wrong = CursorPosition::Watermark { time: at(11, 0) };
        let r = resolve(Some(&wrong), at(12, 0), &policy, false);
        assert!(!r.is_cursor_based);
        assert_eq!(r.window.start(), Some(at(12, 0) - Duration::days(30)));
    }

    #[test]
    fn day_granularity_truncates() {
        let policy = WindowPolicy {
            shape: CursorShape::Watermark,
            granularity: Granularity::Day,
            lookback: Duration::days(7),
            overlap: Duration::days(1),
        };
        let now = at(15, 45);
        let last_end = Utc.with_ymd_and_hms(2025, 3, 9, 0, 0, 0).unwrap();
        let r = resolve(
            Some(&CursorPosition::Watermark { time: last_end }),
            now,
            &policy,
            false,
        );
        assert_eq!(
            r.window.start(),
            Some(Utc.with_ymd_and_hms(2025, 3, 8, 0, 0, 0).unwrap())
        );
        assert_eq!(
            r.window.end(),
            Some(Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn oversized_lookback_clamps_instead_of_overflowing() {
        let policy = WindowPolicy {
            lookback: Duration::MAX,
            overlap: Duration::MAX,
            ..time_policy()
        };
        let now = at(12, 0);
        let r = resolve(None, now, &policy, false);
        assert_eq!(r.window.start(), Some(DateTime::<Utc>::MIN_UTC));
        assert_eq!(r.window.end(), Some(now));

        let wm = CursorPosition::Watermark { time: at(11, 0) };
        let r = resolve(Some(&wm), now, &policy, false);
        assert_eq!(r.window.start(), Some(DateTime::<Utc>::MIN_UTC));
        assert!(!watermark_outside_lookback(Some(&wm), now, &policy));
    }

    #[test]
    fn stale_watermark_detected() {
        let now = at(12, 0);
        let stale = CursorPosition::Watermark {
            time: now - Duration::days(3),
        };
        assert!(watermark_outside_lookback(Some(&stale), now, &time_policy()));
        let fresh = CursorPosition::Watermark { time: at(11, 0) };
        assert!(!watermark_outside_lookback(Some(&fresh), now, &time_policy()));
    }
}
