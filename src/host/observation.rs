//! What the host reports about a run

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::{ConsoleMethod, ConsolePayload, DialogRequest};

pub const STOPPED_MESSAGE: &str = "Execution stopped by user";
pub const LONG_RUNNING_MESSAGE: &str = "Script is still running; it can be stopped";
pub const RELOAD_MESSAGE: &str = "Repeated connection failures. Please reload.";

/// One line of console output as the host records it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    pub id: u64,
    pub message: ConsolePayload,
    pub method: ConsoleMethod,
    pub group_depth: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Observation {
    /// Prior output is obsolete; a new run is starting
    Reset,
    Console(ConsoleEntry),
    Result {
        value: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    SchemaError {
        issues: String,
    },
    SyntaxError {
        message: String,
    },
    ConnectionError {
        message: String,
    },
    /// A dialog reached the front of the queue and awaits an answer
    Dialog(DialogRequest),
    LongRunning,
    Stopped,
    ReloadRecommended,
}

impl Observation {
    /// Whether this observation ends the current run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Observation::Result { .. }
                | Observation::Error { .. }
                | Observation::SyntaxError { .. }
                | Observation::ConnectionError { .. }
                | Observation::Stopped
        )
    }

    pub fn is_error(&self) -> bool {
        match self {
            Observation::Console(entry) => matches!(
                entry.method,
                ConsoleMethod::Error | ConsoleMethod::Assert
            ),
            Observation::Error { .. }
            | Observation::SchemaError { .. }
            | Observation::SyntaxError { .. }
            | Observation::ConnectionError { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::Reset => Ok(()),
            Observation::Console(entry) => write!(f, "{}", entry.message),
            Observation::Result { value } => write!(f, "{}", value),
            Observation::Error { message, stack } => match stack {
                Some(stack) => write!(f, "{}\n{}", message, stack),
                None => write!(f, "{}", message),
            },
            Observation::SchemaError { issues } => write!(f, "Schema Error: {}", issues),
            Observation::SyntaxError { message } => write!(f, "Syntax Error: {}", message),
            Observation::ConnectionError { message } => write!(f, "Connection Error: {}", message),
            Observation::Dialog(request) => write!(f, "[{}] {}", request.dialog_type, request.message),
            Observation::LongRunning => write!(f, "{}", LONG_RUNNING_MESSAGE),
            Observation::Stopped => write!(f, "{}", STOPPED_MESSAGE),
            Observation::ReloadRecommended => write!(f, "{}", RELOAD_MESSAGE),
        }
    }
}

/// Append-only destination for observations
pub trait ObservationSink: Send + 'static {
    fn record(&mut self, observation: Observation);
}

impl ObservationSink for UnboundedSender<Observation> {
    fn record(&mut self, observation: Observation) {
        if self.send(observation).is_err() {
            tracing::trace!("observation receiver dropped");
        }
    }
}
