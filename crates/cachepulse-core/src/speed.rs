//! Live-speed telemetry: wire decode and broadcast policy.
//!
//! The probe emits one JSON object per stdout line. Field names on the
//! wire are matched case-insensitively, so the decoder walks the object
//! instead of relying on a derive. The broadcast policy is a pure
//! function over the activity flag so it can be tested without a child
//! process.

use serde::Serialize;
use serde_json::Value;

/// Aggregate throughput over the probe's sampling window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedSnapshot {
    pub window_seconds: u64,
    pub bytes_per_second: f64,
    pub has_active_transfers: bool,
    /// Opaque per-service/per-client breakdown, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<Value>,
}

impl SpeedSnapshot {
    /// The snapshot reported before the probe has produced anything:
    /// zero throughput, no activity, the configured window.
    #[must_use]
    pub fn idle(window_seconds: u64) -> Self {
        Self {
            window_seconds,
            bytes_per_second: 0.0,
            has_active_transfers: false,
            breakdown: None,
        }
    }

    /// Whether this window carries activity: transfers in flight, or
    /// measured throughput from traffic that finished inside the window.
    #[must_use]
    pub fn has_activity(&self) -> bool {
        self.has_active_transfers || self.bytes_per_second > 0.0
    }

    /// Notification payload for a speed-update event.
    #[must_use]
    pub fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Decode one telemetry line. Returns `None` when the line is not a JSON
/// object or lacks the activity flag; callers log and skip such lines.
/// A missing window falls back to `fallback_window`.
#[must_use]
pub fn decode_line(line: &str, fallback_window: u64) -> Option<SpeedSnapshot> {
    let value: Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;

    let has_active_transfers = field(obj, "hasActiveDownloads")?.as_bool()?;
    let bytes_per_second = field(obj, "totalBytesPerSecond")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let window_seconds = field(obj, "windowSeconds")
        .and_then(Value::as_u64)
        .unwrap_or(fallback_window);

    let mut breakdown = serde_json::Map::new();
    for key in ["gameSpeeds", "clientSpeeds"] {
        if let Some(section) = field(obj, key) {
            breakdown.insert(key.to_string(), section.clone());
        }
    }

    Some(SpeedSnapshot {
        window_seconds,
        bytes_per_second,
        has_active_transfers,
        breakdown: (!breakdown.is_empty()).then_some(Value::Object(breakdown)),
    })
}

fn field<'a>(obj: &'a serde_json::Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

/// What to broadcast after one decoded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastDecision {
    pub speed_update: bool,
    pub refresh_transfers: bool,
}

/// Broadcast policy over [`SpeedSnapshot::has_activity`]: active windows
/// always publish a speed update; the transition from active to idle
/// publishes one final update plus a list-refresh event; idle-to-idle
/// publishes nothing.
#[must_use]
pub fn broadcast_decision(previous_had_activity: bool, has_activity: bool) -> BroadcastDecision {
    let falling_edge = previous_had_activity && !has_activity;
    BroadcastDecision {
        speed_update: has_activity || falling_edge,
        refresh_transfers: falling_edge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_canonical_line() {
        let line = r#"{"windowSeconds":2,"totalBytesPerSecond":1048576.5,"hasActiveDownloads":true,"gameSpeeds":{"steam":1048576.5}}"#;
        let snapshot = decode_line(line, 2).unwrap();
        assert_eq!(snapshot.window_seconds, 2);
        assert!((snapshot.bytes_per_second - 1_048_576.5).abs() < f64::EPSILON);
        assert!(snapshot.has_active_transfers);
        let breakdown = snapshot.breakdown.unwrap();
        assert_eq!(breakdown["gameSpeeds"]["steam"], 1_048_576.5);
    }

    #[test]
    fn field_names_match_case_insensitively() {
        let line = r#"{"WINDOWSECONDS":5,"totalbytespersecond":10.0,"HasActiveDownloads":false}"#;
        let snapshot = decode_line(line, 2).unwrap();
        assert_eq!(snapshot.window_seconds, 5);
        assert!((snapshot.bytes_per_second - 10.0).abs() < f64::EPSILON);
        assert!(!snapshot.has_active_transfers);
        assert!(snapshot.breakdown.is_none());
    }

    #[test]
    fn missing_window_uses_fallback() {
        let line = r#"{"totalBytesPerSecond":0.0,"hasActiveDownloads":false}"#;
        assert_eq!(decode_line(line, 7).unwrap().window_seconds, 7);
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(decode_line("", 2).is_none());
        assert!(decode_line("not json", 2).is_none());
        assert!(decode_line("[1,2,3]", 2).is_none());
        // Object without the activity flag is useless telemetry.
        assert!(decode_line(r#"{"totalBytesPerSecond":1.0}"#, 2).is_none());
    }

    #[test]
    fn idle_snapshot_defaults() {
        let snapshot = SpeedSnapshot::idle(2);
        assert_eq!(snapshot.window_seconds, 2);
        assert!(snapshot.bytes_per_second.abs() < f64::EPSILON);
        assert!(!snapshot.has_active_transfers);
        assert!(snapshot.breakdown.is_none());
    }

    #[test]
    fn payload_uses_snake_case_fields() {
        let payload = SpeedSnapshot::idle(2).payload();
        assert_eq!(payload["window_seconds"], 2);
        assert_eq!(payload["has_active_transfers"], false);
        assert!(payload.get("breakdown").is_none());
    }

    #[test]
    fn throughput_alone_counts_as_activity() {
        // Traffic that finished inside the window reports bytes with the
        // flag already cleared; it is still an active window.
        let mut snapshot = SpeedSnapshot::idle(2);
        snapshot.bytes_per_second = 512.0;
        assert!(snapshot.has_activity());

        snapshot.bytes_per_second = 0.0;
        snapshot.has_active_transfers = true;
        assert!(snapshot.has_activity());

        assert!(!SpeedSnapshot::idle(2).has_activity());
    }

    #[test]
    fn broadcast_policy_table() {
        // Active: speed update only.
        assert_eq!(
            broadcast_decision(false, true),
            BroadcastDecision {
                speed_update: true,
                refresh_transfers: false
            }
        );
        assert_eq!(
            broadcast_decision(true, true),
            BroadcastDecision {
                speed_update: true,
                refresh_transfers: false
            }
        );
        // Falling edge: one last update plus a refresh.
        assert_eq!(
            broadcast_decision(true, false),
            BroadcastDecision {
                speed_update: true,
                refresh_transfers: true
            }
        );
        // Idle steady state: silence.
        assert_eq!(
            broadcast_decision(false, false),
            BroadcastDecision {
                speed_update: false,
                refresh_transfers: false
            }
        );
    }
}
