//! Total validation of raw inbound messages

use std::fmt;

use serde_json::Value;

use super::message::{ConsoleMethod, ConsolePayload, Direction, Message, MAX_TIMER_DELAY_MS};

/// Why a raw message was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub issues: Vec<String>,
}

impl ValidationFailure {
    fn single(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.issues.join("; "))
    }
}

impl std::error::Error for ValidationFailure {}

impl From<ValidationFailure> for Message {
    fn from(failure: ValidationFailure) -> Self {
        Message::SchemaError {
            issues: failure.to_string(),
        }
    }
}

/// Validate raw text received by the given side of the boundary
pub fn validate(raw: &str, direction: Direction) -> Result<Message, ValidationFailure> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ValidationFailure::single(format!("message is not valid JSON: {}", e)))?;

    let object = value
        .as_object()
        .ok_or_else(|| ValidationFailure::single("message must be a JSON object"))?;

    let tag = match object.get("type") {
        Some(Value::String(tag)) => tag.clone(),
        Some(_) => return Err(ValidationFailure::single("field 'type' must be a string")),
        None => return Err(ValidationFailure::single("missing field 'type'")),
    };

    let known = Direction::ToHost.accepts(&tag) || Direction::ToIsolate.accepts(&tag);
    if !known {
        return Err(ValidationFailure::single(format!(
            "unknown message type '{}'",
            tag
        )));
    }
    if !direction.accepts(&tag) {
        return Err(ValidationFailure::single(format!(
            "message type '{}' is not accepted by the {}",
            tag, direction
        )));
    }

    let message: Message = serde_json::from_value(value)
        .map_err(|e| ValidationFailure::single(format!("invalid '{}' message: {}", tag, e)))?;

    let issues = semantic_issues(&message);
    if issues.is_empty() {
        Ok(message)
    } else {
        Err(ValidationFailure { issues })
    }
}

fn semantic_issues(message: &Message) -> Vec<String> {
    let mut issues = Vec::new();

    match message {
        Message::SetTimeout { id, delay, .. } | Message::SetInterval { id, delay, .. } => {
            check_id(id, &mut issues);
            if !delay.is_finite() || *delay < 0.0 {
                issues.push(format!("delay must be a finite non-negative number, got {}", delay));
            } else if *delay > MAX_TIMER_DELAY_MS {
                issues.push(format!(
                    "delay must be at most {} ms, got {}",
                    MAX_TIMER_DELAY_MS, delay
                ));
            }
        }
        Message::ClearTimeout { id }
        | Message::ClearInterval { id }
        | Message::TimerCallback { id, .. }
        | Message::DialogRequest { id, .. }
        | Message::DialogResponse { id, .. } => check_id(id, &mut issues),
        Message::Console {
            payload, method, ..
        } => {
            let expected = match method {
                ConsoleMethod::Table => matches!(payload, ConsolePayload::Table { .. }),
                ConsoleMethod::TimeEnd => matches!(payload, ConsolePayload::TimerSummary { .. }),
                ConsoleMethod::Count => matches!(payload, ConsolePayload::Counter { .. }),
                _ => matches!(payload, ConsolePayload::Text(_)),
            };
            if !expected {
                issues.push(format!(
                    "console method '{}' cannot carry a {} payload",
                    method,
                    payload.kind()
                ));
            }
            if let ConsolePayload::Table { headers, rows } = payload {
                if let Some(row) = rows.iter().find(|r| r.len() > headers.len() + 1) {
                    issues.push(format!(
                        "table row has {} cells but only {} headers",
                        row.len(),
                        headers.len()
                    ));
                }
            }
        }
        Message::Run { .. }
        | Message::Result { .. }
        | Message::Error { .. }
        | Message::SchemaError { .. } => {}
    }

    issues
}

fn check_id(id: &str, issues: &mut Vec<String>) {
    if id.trim().is_empty() {
        issues.push("id must not be empty".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{DialogType, DialogValue};

    fn to_host(raw: &str) -> Result<Message, ValidationFailure> {
        validate(raw, Direction::ToHost)
    }

    fn to_isolate(raw: &str) -> Result<Message, ValidationFailure> {
        validate(raw, Direction::ToIsolate)
    }

    #[test]
    fn test_valid_run_message() {
        let msg = to_isolate(r#"{"type":"run","code":"console.log(1)"}"#).unwrap();
        assert_eq!(
            msg,
            Message::Run {
                code: "console.log(1)".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let msg = to_isolate(r#"{"type":"run","code":"x","extra":true}"#).unwrap();
        assert!(matches!(msg, Message::Run { .. }));
    }

    #[test]
    fn test_rejects_non_json_and_non_objects() {
        for raw in ["", "not json", "[1,2]", "42", "null", "\"run\""] {
            let failure = to_isolate(raw).unwrap_err();
            assert!(!failure.issues.is_empty(), "no issues for {:?}", raw);
        }
    }

    #[test]
    fn test_rejects_missing_or_bad_tag() {
        assert!(to_host(r#"{"value":"1"}"#).is_err());
        assert!(to_host(r#"{"type":5}"#).is_err());
        let failure = to_host(r#"{"type":"explode"}"#).unwrap_err();
        assert!(failure.issues[0].contains("unknown message type"));
    }

    #[test]
    fn test_rejects_wrong_direction() {
        let failure = to_host(r#"{"type":"run","code":"x"}"#).unwrap_err();
        assert!(failure.issues[0].contains("not accepted"));
        assert!(to_isolate(r#"{"type":"result","value":"1"}"#).is_err());
    }

    #[test]
    fn test_rejects_bad_payloads() {
        assert!(to_isolate(r#"{"type":"run"}"#).is_err());
        assert!(to_isolate(r#"{"type":"run","code":7}"#).is_err());
        assert!(to_isolate(r#"{"type":"dialogResponse","id":"dialog-0","value":3}"#).is_err());
        assert!(to_host(r#"{"type":"setTimeout","id":"timeout-0","delay":-5,"args":[]}"#).is_err());
        assert!(to_host(r#"{"type":"clearTimeout","id":""}"#).is_err());
    }

    #[test]
    fn test_rejects_delay_past_the_maximum() {
        let failure =
            to_host(r#"{"type":"setTimeout","id":"timeout-0","delay":1e300,"args":[]}"#).unwrap_err();
        assert!(failure.issues[0].contains("at most"));
        assert!(to_host(r#"{"type":"setInterval","id":"interval-0","delay":2147483647,"args":[]}"#).is_ok());
    }

    #[test]
    fn test_console_payload_must_match_method() {
        let ok = to_host(
            r#"{"type":"console","payload":{"label":"t","duration":1.5},"method":"timeEnd","groupDepth":0}"#,
        )
        .unwrap();
        assert!(matches!(
            ok,
            Message::Console {
                payload: ConsolePayload::TimerSummary { .. },
                ..
            }
        ));

        let failure = to_host(
            r#"{"type":"console","payload":"hello","method":"table","groupDepth":0}"#,
        )
        .unwrap_err();
        assert!(failure.issues[0].contains("table"));
    }

    #[test]
    fn test_dialog_messages() {
        let req = to_host(
            r#"{"type":"dialogRequest","id":"dialog-1","dialogType":"prompt","message":"name?","defaultValue":"bob"}"#,
        )
        .unwrap();
        match req {
            Message::DialogRequest {
                dialog_type,
                default_value,
                ..
            } => {
                assert_eq!(dialog_type, DialogType::Prompt);
                assert_eq!(default_value.as_deref(), Some("bob"));
            }
            other => panic!("Expected dialog request, got {:?}", other),
        }

        let resp = to_isolate(r#"{"type":"dialogResponse","id":"dialog-1","value":null}"#).unwrap();
        assert!(matches!(
            resp,
            Message::DialogResponse {
                value: DialogValue::Null,
                ..
            }
        ));
    }

    #[test]
    fn test_failure_display_joins_issues() {
        let failure = ValidationFailure {
            issues: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(failure.to_string(), "a; b");
    }
}
