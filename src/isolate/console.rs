//! Console relay: turns console calls into `console` messages

use std::collections::HashMap;
use std::time::Instant;

use crate::engine::{format_stack, Value};
use crate::protocol::{ConsoleMethod, ConsolePayload, Message};

const UNSERIALIZABLE: &str = "[Unserializable Object]";

/// Per-context console state: group nesting, running timers and counters
#[derive(Debug, Default)]
pub struct ConsoleRelay {
    group_depth: u32,
    timers: HashMap<String, Instant>,
    counters: HashMap<String, u64>,
}

impl ConsoleRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_depth(&self) -> u32 {
        self.group_depth
    }

    /// Build the message for one console call, if the call emits anything
    pub fn relay(&mut self, method: ConsoleMethod, args: &[Value], stack: &[String]) -> Option<Message> {
        let payload = match method {
            ConsoleMethod::Group => {
                self.group_depth += 1;
                ConsolePayload::text(serialize_args(args))
            }
            ConsoleMethod::GroupEnd => {
                self.group_depth = self.group_depth.saturating_sub(1);
                ConsolePayload::text("")
            }
            ConsoleMethod::Clear => ConsolePayload::text(""),
            ConsoleMethod::Time => {
                let label = label(args);
                self.timers.insert(label.clone(), Instant::now());
                ConsolePayload::Text(label)
            }
            ConsoleMethod::TimeEnd => {
                let label = label(args);
                let started = self.timers.remove(&label)?;
                ConsolePayload::TimerSummary {
                    label,
                    duration: started.elapsed().as_secs_f64() * 1000.0,
                }
            }
            ConsoleMethod::Count => {
                let label = label(args);
                let count = self.counters.entry(label.clone()).or_insert(0);
                *count += 1;
                ConsolePayload::Counter {
                    label,
                    count: *count,
                }
            }
            ConsoleMethod::Assert => {
                let (assertion, rest) = match args.split_first() {
                    Some((first, rest)) => (first.truthy(), rest),
                    None => (false, args),
                };
                if assertion {
                    return None;
                }
                if rest.is_empty() {
                    ConsolePayload::text("Assertion failed")
                } else {
                    ConsolePayload::text(serialize_args(rest))
                }
            }
            ConsoleMethod::Trace => ConsolePayload::Text(format!(
                "{}\n{}",
                serialize_args(args),
                format_stack(stack)
            )),
            ConsoleMethod::Table => {
                let data = args.first().cloned().unwrap_or(Value::Undefined);
                serialize_table(&data, columns(args.get(1)))
            }
            ConsoleMethod::Log
            | ConsoleMethod::Warn
            | ConsoleMethod::Error
            | ConsoleMethod::Info
            | ConsoleMethod::Debug => ConsolePayload::text(serialize_args(args)),
        };

        Some(Message::Console {
            payload,
            method,
            group_depth: self.group_depth,
        })
    }
}

fn label(args: &[Value]) -> String {
    match args.first() {
        None | Some(Value::Undefined) => "default".to_string(),
        Some(value) => value.to_display_string(),
    }
}

fn columns(arg: Option<&Value>) -> Option<Vec<String>> {
    match arg {
        Some(Value::Array(items)) => Some(items.borrow().iter().map(Value::to_display_string).collect()),
        _ => None,
    }
}

/// Objects as JSON, everything else as its string form
fn serialize_value(value: &Value) -> String {
    match value {
        Value::Array(_) | Value::Object(_) if !value.is_error() => match value.to_json() {
            Ok(Some(json)) => json.to_string(),
            Ok(None) => "undefined".to_string(),
            Err(_) => UNSERIALIZABLE.to_string(),
        },
        other => other.to_display_string(),
    }
}

/// Render console arguments the way they are shown, joined by spaces
pub fn serialize_args(args: &[Value]) -> String {
    args.iter().map(serialize_value).collect::<Vec<_>>().join(" ")
}

fn is_record(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Null)
}

fn keys_of(value: &Value) -> Vec<String> {
    match value {
        Value::Object(obj) => obj.borrow().props.keys().cloned().collect(),
        Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn field(value: &Value, key: &str) -> Option<Value> {
    let found = match value {
        Value::Object(obj) => obj.borrow().props.get(key).cloned(),
        Value::Array(items) => key
            .parse::<usize>()
            .ok()
            .and_then(|i| items.borrow().get(i).cloned()),
        _ => None,
    };
    found.filter(|v| !matches!(v, Value::Undefined))
}

fn cell(value: Option<Value>) -> String {
    match value {
        None => "N/A".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(value) => serialize_value(&value),
    }
}

fn union_of_keys<'a>(records: impl Iterator<Item = &'a Value>) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();
    for record in records {
        for key in keys_of(record) {
            if !headers.contains(&key) {
                headers.push(key);
            }
        }
    }
    headers
}

/// Tabular payload for `console.table`
pub fn serialize_table(data: &Value, columns: Option<Vec<String>>) -> ConsolePayload {
    let empty = ConsolePayload::Table {
        headers: Vec::new(),
        rows: Vec::new(),
    };

    match data {
        Value::Array(items) => {
            let items = items.borrow();
            let Some(first) = items.first() else {
                return empty;
            };

            if is_record(first) {
                let headers = columns.unwrap_or_else(|| union_of_keys(items.iter()));
                let rows = items
                    .iter()
                    .enumerate()
                    .map(|(index, record)| {
                        std::iter::once(index.to_string())
                            .chain(headers.iter().map(|h| cell(field(record, h))))
                            .collect()
                    })
                    .collect();
                ConsolePayload::Table {
                    headers: prefixed(headers),
                    rows,
                }
            } else {
                let headers =
                    columns.unwrap_or_else(|| vec!["Index".to_string(), "Value".to_string()]);
                let rows = items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| vec![index.to_string(), serialize_value(item)])
                    .collect();
                ConsolePayload::Table { headers, rows }
            }
        }
        Value::Object(obj) => {
            let obj = obj.borrow();
            let Some(first) = obj.props.values().next() else {
                return empty;
            };

            if is_record(first) {
                let headers = columns.unwrap_or_else(|| union_of_keys(obj.props.values()));
                let rows = obj
                    .props
                    .iter()
                    .map(|(key, record)| {
                        std::iter::once(key.clone())
                            .chain(headers.iter().map(|h| cell(field(record, h))))
                            .collect()
                    })
                    .collect();
                ConsolePayload::Table {
                    headers: prefixed(headers),
                    rows,
                }
            } else {
                let headers =
                    columns.unwrap_or_else(|| vec!["Key".to_string(), "Value".to_string()]);
                let rows = obj
                    .props
                    .iter()
                    .map(|(key, value)| vec![key.clone(), serialize_value(value)])
                    .collect();
                ConsolePayload::Table { headers, rows }
            }
        }
        scalar => ConsolePayload::Table {
            headers: vec!["Value".to_string()],
            rows: vec![vec![scalar.to_display_string()]],
        },
    }
}

fn prefixed(headers: Vec<String>) -> Vec<String> {
    std::iter::once("(index)".to_string()).chain(headers).collect()
}
