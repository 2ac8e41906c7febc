//! Capabilities the interpreter reaches the outside world through

use super::{ScriptError, Value};
use crate::protocol::{ConsoleMethod, DialogType, DialogValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Timeout,
    Interval,
}

impl TimerKind {
    /// Prefix of the ids minted for this kind
    pub fn prefix(self) -> &'static str {
        match self {
            TimerKind::Timeout => "timeout",
            TimerKind::Interval => "interval",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        if id.starts_with("timeout-") {
            Some(TimerKind::Timeout)
        } else if id.starts_with("interval-") {
            Some(TimerKind::Interval)
        } else {
            None
        }
    }
}

/// Why a dialog produced no answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogFailure {
    /// Rejected after the dialog timeout; carries the error message
    TimedOut(String),
    TornDown,
}

/// Host services injected into a running script
pub trait Environment {
    /// Relay a console call; `stack` lists active functions, outermost first
    fn console(
        &mut self,
        method: ConsoleMethod,
        args: Vec<Value>,
        stack: &[String],
    ) -> Result<(), ScriptError>;

    /// Schedule a callback; `None` when the request was refused
    fn set_timer(
        &mut self,
        kind: TimerKind,
        callback: Value,
        delay: f64,
        args: Vec<serde_json::Value>,
    ) -> Result<Option<String>, ScriptError>;

    fn clear_timer(&mut self, kind: TimerKind, id: &str) -> Result<(), ScriptError>;

    /// Ask the user something and block until answered
    fn dialog(
        &mut self,
        dialog_type: DialogType,
        message: String,
        default_value: Option<String>,
    ) -> Result<DialogValue, DialogFailure>;

    /// Whether the host has abandoned this context
    fn is_torn_down(&self) -> bool;
}
