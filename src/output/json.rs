//! JSON output formatting: one object per line

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::host::{HostStatus, Observation};

pub fn format_json(observation: &Observation) -> String {
    format_json_at(observation, Utc::now())
}

/// Render with an explicit timestamp
pub fn format_json_at(observation: &Observation, at: DateTime<Utc>) -> String {
    let mut data = serde_json::to_value(observation).unwrap_or(json!(null));
    if let Value::Object(ref mut fields) = data {
        fields.insert(
            "timestamp".to_string(),
            Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    serde_json::to_string(&data).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_status_json(status: &HostStatus) -> String {
    serde_json::to_string_pretty(status).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_observation_carries_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let line = format_json_at(&Observation::Result { value: "42".into() }, at);
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({"kind": "result", "value": "42", "timestamp": "2024-05-01T12:00:00.000Z"})
        );
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_status_fields() {
        let status = HostStatus {
            state: crate::host::RunState::Idle,
            connected: false,
            connection_error: Some("isolated context is closed".into()),
            failed_attempts: 2,
            reload_recommended: false,
            stop_available: false,
            live_timers: 0,
            pending_dialogs: 0,
            last_outcome: None,
        };
        let value: Value = serde_json::from_str(&format_status_json(&status)).unwrap();
        assert_eq!(value["state"], "idle");
        assert_eq!(value["failedAttempts"], 2);
        assert_eq!(value["connectionError"], "isolated context is closed");
    }
}
