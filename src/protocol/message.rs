//! Message shapes exchanged across the isolation boundary

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message crossing the boundary, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Message {
    Run {
        code: String,
    },
    Console {
        payload: ConsolePayload,
        method: ConsoleMethod,
        group_depth: u32,
    },
    Result {
        value: String,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    SchemaError {
        issues: String,
    },
    SetTimeout {
        id: String,
        delay: f64,
        #[serde(default)]
        args: Vec<Value>,
    },
    SetInterval {
        id: String,
        delay: f64,
        #[serde(default)]
        args: Vec<Value>,
    },
    ClearTimeout {
        id: String,
    },
    ClearInterval {
        id: String,
    },
    TimerCallback {
        id: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    DialogRequest {
        id: String,
        dialog_type: DialogType,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<String>,
    },
    DialogResponse {
        id: String,
        value: DialogValue,
    },
}

/// Which side of the boundary a tag may travel to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToHost,
    ToIsolate,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToHost => write!(f, "host"),
            Direction::ToIsolate => write!(f, "isolated context"),
        }
    }
}

/// Longest timer delay in milliseconds; larger requests are clamped to it
pub const MAX_TIMER_DELAY_MS: f64 = 2_147_483_647.0;

pub const HOST_BOUND_TAGS: &[&str] = &[
    "console",
    "result",
    "error",
    "schemaError",
    "setTimeout",
    "setInterval",
    "clearTimeout",
    "clearInterval",
    "dialogRequest",
];

pub const ISOLATE_BOUND_TAGS: &[&str] = &["run", "timerCallback", "dialogResponse"];

impl Direction {
    pub fn accepts(self, tag: &str) -> bool {
        match self {
            Direction::ToHost => HOST_BOUND_TAGS.contains(&tag),
            Direction::ToIsolate => ISOLATE_BOUND_TAGS.contains(&tag),
        }
    }
}

impl Message {
    /// The wire tag of this message
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Run { .. } => "run",
            Message::Console { .. } => "console",
            Message::Result { .. } => "result",
            Message::Error { .. } => "error",
            Message::SchemaError { .. } => "schemaError",
            Message::SetTimeout { .. } => "setTimeout",
            Message::SetInterval { .. } => "setInterval",
            Message::ClearTimeout { .. } => "clearTimeout",
            Message::ClearInterval { .. } => "clearInterval",
            Message::TimerCallback { .. } => "timerCallback",
            Message::DialogRequest { .. } => "dialogRequest",
            Message::DialogResponse { .. } => "dialogResponse",
        }
    }

    /// Serialize for the wire
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({
                "type": "schemaError",
                "issues": format!("unserializable message: {}", e),
            })
            .to_string()
        })
    }

    pub fn error(message: impl Into<String>, stack: Option<String>) -> Self {
        Message::Error {
            message: message.into(),
            stack,
        }
    }
}

/// Body of a `console` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConsolePayload {
    Text(String),
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    TimerSummary {
        label: String,
        duration: f64,
    },
    Counter {
        label: String,
        count: u64,
    },
}

impl ConsolePayload {
    pub fn text(s: impl Into<String>) -> Self {
        ConsolePayload::Text(s.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConsolePayload::Text(_) => "text",
            ConsolePayload::Table { .. } => "table",
            ConsolePayload::TimerSummary { .. } => "timer summary",
            ConsolePayload::Counter { .. } => "counter",
        }
    }
}

impl fmt::Display for ConsolePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsolePayload::Text(s) => write!(f, "{}", s),
            ConsolePayload::Table { headers, rows } => {
                write!(f, "{}", headers.join(" | "))?;
                for row in rows {
                    write!(f, "\n{}", row.join(" | "))?;
                }
                Ok(())
            }
            ConsolePayload::TimerSummary { label, duration } => {
                write!(f, "{}: {:.3}ms", label, duration)
            }
            ConsolePayload::Counter { label, count } => write!(f, "{}: {}", label, count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsoleMethod {
    Log,
    Warn,
    Error,
    Table,
    Group,
    GroupEnd,
    Time,
    TimeEnd,
    Clear,
    Info,
    Debug,
    Trace,
    Assert,
    Count,
}

impl ConsoleMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        let method = match name {
            "log" => ConsoleMethod::Log,
            "warn" => ConsoleMethod::Warn,
            "error" => ConsoleMethod::Error,
            "table" => ConsoleMethod::Table,
            "group" => ConsoleMethod::Group,
            "groupEnd" => ConsoleMethod::GroupEnd,
            "time" => ConsoleMethod::Time,
            "timeEnd" => ConsoleMethod::TimeEnd,
            "clear" => ConsoleMethod::Clear,
            "info" => ConsoleMethod::Info,
            "debug" => ConsoleMethod::Debug,
            "trace" => ConsoleMethod::Trace,
            "assert" => ConsoleMethod::Assert,
            "count" => ConsoleMethod::Count,
            _ => return None,
        };
        Some(method)
    }

    pub fn name(self) -> &'static str {
        match self {
            ConsoleMethod::Log => "log",
            ConsoleMethod::Warn => "warn",
            ConsoleMethod::Error => "error",
            ConsoleMethod::Table => "table",
            ConsoleMethod::Group => "group",
            ConsoleMethod::GroupEnd => "groupEnd",
            ConsoleMethod::Time => "time",
            ConsoleMethod::TimeEnd => "timeEnd",
            ConsoleMethod::Clear => "clear",
            ConsoleMethod::Info => "info",
            ConsoleMethod::Debug => "debug",
            ConsoleMethod::Trace => "trace",
            ConsoleMethod::Assert => "assert",
            ConsoleMethod::Count => "count",
        }
    }

    /// Every console method name scripts may call
    pub const ALL: [ConsoleMethod; 14] = [
        ConsoleMethod::Log,
        ConsoleMethod::Warn,
        ConsoleMethod::Error,
        ConsoleMethod::Table,
        ConsoleMethod::Group,
        ConsoleMethod::GroupEnd,
        ConsoleMethod::Time,
        ConsoleMethod::TimeEnd,
        ConsoleMethod::Clear,
        ConsoleMethod::Info,
        ConsoleMethod::Debug,
        ConsoleMethod::Trace,
        ConsoleMethod::Assert,
        ConsoleMethod::Count,
    ];
}

impl fmt::Display for ConsoleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogType {
    Alert,
    Confirm,
    Prompt,
}

impl fmt::Display for DialogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogType::Alert => write!(f, "alert"),
            DialogType::Confirm => write!(f, "confirm"),
            DialogType::Prompt => write!(f, "prompt"),
        }
    }
}

/// Answer to a dialog: `confirm` gives a bool, `prompt` a string or null
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DialogValue {
    Bool(bool),
    Text(String),
    Null,
}

/// What a host-side dialog request looks like once shown to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogRequest {
    pub id: String,
    pub dialog_type: DialogType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}
