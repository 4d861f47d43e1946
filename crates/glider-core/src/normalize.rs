//! Raw source JSON → [`NormalizedItem`].
//!
//! Each kind derives its natural key from fields the source never changes
//! for the same logical item, so re-fetching an item always lands on the
//! same record. Anything missing those fields is a
//! [`SyncError::MalformedItem`]; the engine skips and counts it.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Map, Value};

use crate::error::{Result, SyncError};
use crate::models::NormalizedItem;
use crate::source::SourceKind;

pub fn normalize(kind: &SourceKind, raw: &Value) -> Result<NormalizedItem> {
    match kind {
        SourceKind::GoogleCalendar { calendar_id } => calendar_event(calendar_id, raw),
        SourceKind::SpotifyRecent => recent_play(raw),
        SourceKind::SpotifyPlayback => Err(SyncError::malformed(
            "playback snapshots go through the event detector",
        )),
        SourceKind::OuraHeartrate => heartrate_sample(raw),
        SourceKind::OuraDaily { .. } => daily_record(raw),
    }
}

fn str_field<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::malformed(format!("bad timestamp '{}': {}", s, e)))
}

fn parse_day(s: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn calendar_event(calendar_id: &str, raw: &Value) -> Result<NormalizedItem> {
    let google_id =
        str_field(raw, "id").ok_or_else(|| SyncError::malformed("calendar event without id"))?;

    let start = raw.get("start").cloned().unwrap_or_else(|| json!({}));
    let occurred_at = match start.get("dateTime").and_then(Value::as_str) {
        Some(s) => parse_ts(s).ok(),
        None => start.get("date").and_then(Value::as_str).and_then(parse_day),
    };

    let payload = json!({
        "google_id": google_id,
        "calendar_id": calendar_id,
        "recurring_event_id": raw.get("recurringEventId"),
        "color_id": raw.get("colorId"),
        "summary": raw.get("summary").and_then(Value::as_str).unwrap_or(""),
        "start": start,
        "end": raw.get("end").cloned().unwrap_or_else(|| json!({})),
        "status": raw.get("status").and_then(Value::as_str).unwrap_or(""),
        "html_link": raw.get("htmlLink"),
        "location": raw.get("location"),
        "description": raw.get("description"),
        "created": raw.get("created"),
        "updated": raw.get("updated"),
        "raw": raw,
    });

    Ok(NormalizedItem {
        natural_key: google_id.to_string(),
        item_id: Some(google_id.to_string()),
        occurred_at,
        payload,
        tombstone: str_field(raw, "status") == Some("cancelled"),
    })
}

fn recent_play(raw: &Value) -> Result<NormalizedItem> {
    let track = raw
        .get("track")
        .filter(|t| t.is_object())
        .ok_or_else(|| SyncError::malformed("play without track"))?;
    let track_id =
        str_field(track, "id").ok_or_else(|| SyncError::malformed("track without id"))?;
    let played_at_raw =
        str_field(raw, "played_at").ok_or_else(|| SyncError::malformed("play without played_at"))?;
    let played_at = parse_ts(played_at_raw)?;

    let artists: Vec<&Value> = track
        .get("artists")
        .and_then(Value::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_default();
    let album = track.get("album");

    let payload = json!({
        "spotify_track_id": track_id,
        "track_name": track.get("name"),
        "artist_names": artists.iter().map(|a| a.get("name")).collect::<Vec<_>>(),
        "artist_ids": artists.iter().map(|a| a.get("id")).collect::<Vec<_>>(),
        "album_name": album.and_then(|a| a.get("name")),
        "album_id": album.and_then(|a| a.get("id")),
        "duration_ms": track.get("duration_ms").and_then(Value::as_i64).unwrap_or(0),
        "explicit": track.get("explicit").and_then(Value::as_bool).unwrap_or(false),
        "popularity": track.get("popularity").and_then(Value::as_i64).unwrap_or(0),
        "played_at": played_at_raw,
        "raw": track,
    });

    let id12: String = track_id.chars().take(12).collect();
    Ok(NormalizedItem {
        natural_key: format!("{}_{}", played_at.timestamp_millis(), id12),
        item_id: Some(track_id.to_string()),
        occurred_at: Some(played_at),
        payload,
        tombstone: false,
    })
}

fn heartrate_sample(raw: &Value) -> Result<NormalizedItem> {
    let ts_raw = str_field(raw, "timestamp")
        .ok_or_else(|| SyncError::malformed("heart rate sample without timestamp"))?;
    let bpm = raw
        .get("bpm")
        .filter(|v| v.is_number())
        .ok_or_else(|| SyncError::malformed("heart rate sample without bpm"))?;
    let ts = parse_ts(ts_raw)?;

    Ok(NormalizedItem {
        natural_key: ts.timestamp_millis().to_string(),
        item_id: None,
        occurred_at: Some(ts),
        payload: json!({
            "timestamp": ts_raw,
            "bpm": bpm,
            "source": str_field(raw, "source").unwrap_or("unknown"),
        }),
        tombstone: false,
    })
}

fn daily_record(raw: &Value) -> Result<NormalizedItem> {
    let Value::Object(fields) = raw else {
        return Err(SyncError::malformed("daily record is not an object"));
    };
    let id = str_field(raw, "id")
        .or_else(|| str_field(raw, "day"))
        .ok_or_else(|| SyncError::malformed("daily record without id or day"))?;

    let payload: Map<String, Value> = fields
        .iter()
        .filter(|(k, _)| k.as_str() != "id")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(NormalizedItem {
        natural_key: id.replace('-', "_"),
        item_id: str_field(raw, "id").map(str::to_string),
        occurred_at: str_field(raw, "day").and_then(parse_day),
        payload: Value::Object(payload),
        tombstone: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::OuraDailyType;

    fn calendar() -> SourceKind {
        SourceKind::GoogleCalendar {
            calendar_id: "primary".into(),
        }
    }

    #[test]
    fn calendar_event_keyed_by_id() {
        let raw = json!({
            "id": "evt123",
            "status": "confirmed",
            "summary": "Standup",
            "start": {"dateTime": "2025-03-10T09:00:00-07:00"},
            "end": {"dateTime": "2025-03-10T09:15:00-07:00"}
        });
        let item = normalize(&calendar(), &raw).unwrap();
        assert_eq!(item.natural_key, "evt123");
        assert!(!item.tombstone);
        assert_eq!(item.payload["summary"], "Standup");
        assert_eq!(item.payload["calendar_id"], "primary");
        assert_eq!(
            item.occurred_at.unwrap().to_rfc3339(),
            "2025-03-10T16:00:00+00:00"
        );
    }

    #[test]
    fn cancelled_event_is_tombstone() {
        let raw = json!({"id": "evt123", "status": "cancelled"});
        let item = normalize(&calendar(), &raw).unwrap();
        assert!(item.tombstone);
        assert_eq!(item.natural_key, "evt123");
    }

    #[test]
    fn all_day_event_uses_date() {
        let raw = json!({"id": "holiday", "start": {"date": "2025-07-04"}});
        let item = normalize(&calendar(), &raw).unwrap();
        assert_eq!(
            item.occurred_at.unwrap().to_rfc3339(),
            "2025-07-04T00:00:00+00:00"
        );
    }

    #[test]
    fn recent_play_key_uses_ms_and_track_prefix() {
        let raw = json!({
            "played_at": "2025-03-10T12:00:00.000Z",
            "track": {
                "id": "4uLU6hMCjMI75M1A2tKUQC",
                "name": "Never Gonna Give You Up",
                "artists": [{"id": "0gxyHStUsqpMadRV0Di1Qt", "name": "Rick Astley"}],
                "album": {"id": "6XhjNHCyCDyyGJRM5mg40G", "name": "Whenever You Need Somebody"},
                "duration_ms": 213573
            }
        });
        let item = normalize(&SourceKind::SpotifyRecent, &raw).unwrap();
        assert_eq!(item.natural_key, "1741608000000_4uLU6hMCjMI7");
        assert_eq!(item.item_id.as_deref(), Some("4uLU6hMCjMI75M1A2tKUQC"));
        assert_eq!(item.payload["artist_names"], json!(["Rick Astley"]));
        assert_eq!(item.payload["duration_ms"], 213573);
    }

    #[test]
    fn play_without_timestamp_is_malformed() {
        let raw = json!({"track": {"id": "abc"}});
        let err = normalize(&SourceKind::SpotifyRecent, &raw).unwrap_err();
        assert!(matches!(err, SyncError::MalformedItem(_)));

        let raw = json!({"track": {"id": "abc"}, "played_at": "yesterday"});
        assert!(normalize(&SourceKind::SpotifyRecent, &raw).is_err());
    }

    #[test]
    fn heartrate_requires_bpm() {
        let ok = json!({"timestamp": "2025-03-10T10:30:00+00:00", "bpm": 72, "source": "awake"});
        let item = normalize(&SourceKind::OuraHeartrate, &ok).unwrap();
        assert_eq!(item.natural_key, "1741602600000");
        assert_eq!(item.payload["bpm"], 72);

        let missing = json!({"timestamp": "2025-03-10T10:30:00+00:00"});
        assert!(matches!(
            normalize(&SourceKind::OuraHeartrate, &missing),
            Err(SyncError::MalformedItem(_))
        ));
    }

    #[test]
    fn daily_record_cleans_id_and_drops_it_from_payload() {
        let kind = SourceKind::OuraDaily {
            data_type: OuraDailyType::DailySleep,
        };
        let raw = json!({"id": "abc123-def456", "day": "2025-03-09", "score": 82});
        let item = normalize(&kind, &raw).unwrap();
        assert_eq!(item.natural_key, "abc123_def456");
        assert!(item.payload.get("id").is_none());
        assert_eq!(item.payload["score"], 82);

        let by_day = json!({"day": "2025-03-09", "score": 80});
        assert_eq!(normalize(&kind, &by_day).unwrap().natural_key, "2025_03_09");

        assert!(normalize(&kind, &json!({"score": 1})).is_err());
    }
}
