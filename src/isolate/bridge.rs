//! The environment scripts run against inside the isolated context

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;

use super::console::ConsoleRelay;
use super::dialogs::DialogProxy;
use super::timers::TimerProxy;
use crate::engine::{number_to_string, DialogFailure, Environment, ScriptError, TimerKind, Value};
use crate::protocol::{validate, ConsoleMethod, DialogType, DialogValue, Direction, Message};

/// Channel ends plus the proxy state of one isolated context
pub struct Bridge {
    outbox: UnboundedSender<String>,
    inbox: Receiver<String>,
    /// Inbound messages that arrived while a dialog was blocking
    deferred: VecDeque<String>,
    pub(crate) console: ConsoleRelay,
    pub(crate) timers: TimerProxy,
    pub(crate) dialogs: DialogProxy,
    dialog_timeout: Duration,
    torn_down: bool,
}

impl Bridge {
    pub fn new(
        outbox: UnboundedSender<String>,
        inbox: Receiver<String>,
        dialog_timeout: Duration,
        max_intervals: usize,
    ) -> Self {
        Self {
            outbox,
            inbox,
            deferred: VecDeque::new(),
            console: ConsoleRelay::new(),
            timers: TimerProxy::new(max_intervals),
            dialogs: DialogProxy::new(),
            dialog_timeout,
            torn_down: false,
        }
    }

    /// Send a message to the host
    pub fn post(&mut self, message: Message) -> Result<(), ScriptError> {
        tracing::trace!(tag = message.tag(), "posting to host");
        if self.outbox.send(message.to_json()).is_err() {
            self.torn_down = true;
            return Err(ScriptError::TornDown);
        }
        Ok(())
    }

    /// Next inbound message: deferred ones first, then the channel
    pub fn next_inbound(&mut self) -> Option<String> {
        if let Some(raw) = self.deferred.pop_front() {
            return Some(raw);
        }
        match self.inbox.recv() {
            Ok(raw) => Some(raw),
            Err(_) => {
                self.torn_down = true;
                None
            }
        }
    }

    fn interval_cap_reached(&mut self) -> Result<(), ScriptError> {
        let text = format!(
            "Maximum number of intervals ({}) reached",
            self.timers.max_intervals()
        );
        tracing::warn!("{}", text);
        match self.console.relay(ConsoleMethod::Error, &[Value::from(text)], &[]) {
            Some(message) => self.post(message),
            None => Ok(()),
        }
    }

    fn timed_out(&self, dialog_type: DialogType) -> DialogFailure {
        DialogFailure::TimedOut(format!(
            "Dialog {} timed out after {} seconds",
            dialog_type,
            number_to_string(self.dialog_timeout.as_secs_f64())
        ))
    }
}

impl Environment for Bridge {
    fn console(
        &mut self,
        method: ConsoleMethod,
        args: Vec<Value>,
        stack: &[String],
    ) -> Result<(), ScriptError> {
        match self.console.relay(method, &args, stack) {
            Some(message) => self.post(message),
            None => Ok(()),
        }
    }

    fn set_timer(
        &mut self,
        kind: TimerKind,
        callback: Value,
        delay: f64,
        args: Vec<serde_json::Value>,
    ) -> Result<Option<String>, ScriptError> {
        let Some(id) = self.timers.schedule(kind, callback) else {
            self.interval_cap_reached()?;
            return Ok(None);
        };

        let request = match kind {
            TimerKind::Timeout => Message::SetTimeout {
                id: id.clone(),
                delay,
                args,
            },
            TimerKind::Interval => Message::SetInterval {
                id: id.clone(),
                delay,
                args,
            },
        };
        self.post(request)?;
        Ok(Some(id))
    }

    fn clear_timer(&mut self, kind: TimerKind, id: &str) -> Result<(), ScriptError> {
        self.timers.clear(id);
        let id = id.to_string();
        self.post(match kind {
            TimerKind::Timeout => Message::ClearTimeout { id },
            TimerKind::Interval => Message::ClearInterval { id },
        })
    }

    fn dialog(
        &mut self,
        dialog_type: DialogType,
        message: String,
        default_value: Option<String>,
    ) -> Result<DialogValue, DialogFailure> {
        let id = self.dialogs.open();
        self.post(Message::DialogRequest {
            id: id.clone(),
            dialog_type,
            message,
            default_value,
        })
        .map_err(|_| DialogFailure::TornDown)?;

        let deadline = Instant::now() + self.dialog_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.dialogs.expire(&id);
                tracing::debug!(%id, "dialog timed out");
                return Err(self.timed_out(dialog_type));
            }

            let raw = match self.inbox.recv_timeout(remaining) {
                Ok(raw) => raw,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.torn_down = true;
                    return Err(DialogFailure::TornDown);
                }
            };

            match validate(&raw, Direction::ToIsolate) {
                Ok(Message::DialogResponse {
                    id: answered,
                    value,
                }) => {
                    if answered == id && self.dialogs.settle(&answered) {
                        return Ok(value);
                    }
                    tracing::debug!(id = %answered, "ignoring response for unknown dialog");
                }
                _ => self.deferred.push_back(raw),
            }
        }
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down || self.outbox.is_closed()
    }
}
