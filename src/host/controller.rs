//! The host controller actor
//!
//! One tokio task owns the isolated context, the timer table, the dialog
//! queue and the retry counters. Commands arrive over an mpsc channel with
//! oneshot replies; isolate traffic and timer expiries arrive on their own
//! channels. Handlers run one at a time, so nothing here needs a lock.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{self, unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::connector::{Connection, Connector, Link};
use super::dialogs::DialogQueue;
use super::observation::{ConsoleEntry, Observation, ObservationSink};
use super::retry::RetryPolicy;
use super::timers::HostTimers;
use crate::engine::TimerKind;
use crate::error::{CorralError, HostError, TransportError};
use crate::isolate::IsolateConfig;
use crate::parser::parse_program;
use crate::protocol::{validate, DialogRequest, DialogType, DialogValue, Direction, Message};

pub const LOST_MESSAGE: &str = "Isolated context terminated unexpectedly";

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub isolate: IsolateConfig,
    pub retry: RetryPolicy,
    /// How long a freshly posted run must leave the context alive
    pub ack_window: Duration,
    /// Running time after which stopping is offered
    pub watchdog: Duration,
    /// Pause between a reconnect and the re-run of the last code
    pub settle_delay: Duration,
    pub reload_threshold: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            isolate: IsolateConfig::default(),
            retry: RetryPolicy::default(),
            ack_window: Duration::from_millis(100),
            watchdog: Duration::from_secs(2),
            settle_delay: Duration::from_millis(500),
            reload_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Failed,
    Stopped,
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    pub state: RunState,
    pub connected: bool,
    pub connection_error: Option<String>,
    pub failed_attempts: u32,
    pub reload_recommended: bool,
    pub stop_available: bool,
    pub live_timers: usize,
    pub pending_dialogs: usize,
    pub last_outcome: Option<RunOutcome>,
}

pub(crate) enum Command {
    Run {
        code: String,
        reply: oneshot::Sender<Result<(), HostError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Reconnect {
        reply: oneshot::Sender<()>,
    },
    RespondDialog {
        value: DialogValue,
        reply: oneshot::Sender<Result<(), HostError>>,
    },
    Status {
        reply: oneshot::Sender<HostStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Deferred work the controller schedules for itself
#[derive(Debug)]
pub enum HostEvent {
    TimerFired {
        generation: u64,
        id: String,
        args: Vec<serde_json::Value>,
    },
    Watchdog {
        generation: u64,
        run: u64,
    },
    Rerun {
        generation: u64,
    },
    /// The isolated side has given up waiting on this dialog
    DialogExpired {
        generation: u64,
        id: String,
    },
}

pub(crate) struct Controller<C, S> {
    config: HostConfig,
    connector: C,
    sink: S,

    link: Option<Box<dyn Link>>,
    inbound: Option<UnboundedReceiver<String>>,
    timers: HostTimers,
    dialogs: DialogQueue,
    events_tx: UnboundedSender<HostEvent>,
    events_rx: UnboundedReceiver<HostEvent>,

    /// Bumped on every teardown; events from older contexts are dropped
    generation: u64,
    run_id: u64,
    next_entry_id: u64,
    watchdog: Option<JoinHandle<()>>,
    last_code: Option<String>,

    state: RunState,
    connected: bool,
    connection_error: Option<String>,
    failed_attempts: u32,
    reload_recommended: bool,
    stop_available: bool,
    last_outcome: Option<RunOutcome>,
}

impl<C: Connector, S: ObservationSink> Controller<C, S> {
    pub(crate) fn new(config: HostConfig, connector: C, sink: S) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Self {
            timers: HostTimers::new(config.isolate.max_intervals),
            config,
            connector,
            sink,
            link: None,
            inbound: None,
            dialogs: DialogQueue::new(),
            events_tx,
            events_rx,
            generation: 0,
            run_id: 0,
            next_entry_id: 0,
            watchdog: None,
            last_code: None,
            state: RunState::Idle,
            connected: true,
            connection_error: None,
            failed_attempts: 0,
            reload_recommended: false,
            stop_available: false,
            last_outcome: None,
        }
    }

    /// Process commands, isolate traffic and timer events until every
    /// handle is dropped or a shutdown is requested
    pub(crate) async fn serve(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                raw = recv_inbound(&mut self.inbound) => match raw {
                    Some(raw) => self.handle_inbound(&raw),
                    None => self.isolate_lost(),
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }
        self.teardown();
        tracing::debug!("host controller finished");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Run { code, reply } => {
                let outcome = self.run(code).await;
                let _ = reply.send(outcome);
            }
            Command::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            Command::Reconnect { reply } => {
                self.reconnect();
                let _ = reply.send(());
            }
            Command::RespondDialog { value, reply } => {
                let _ = reply.send(self.respond_dialog(value));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
            }
        }
    }

    // ========================================================================
    // Runs
    // ========================================================================

    async fn run(&mut self, code: String) -> Result<(), HostError> {
        if self.state == RunState::Running {
            return Err(HostError::AlreadyRunning);
        }

        if let Err(e) = parse_program(&code) {
            let message = match e {
                CorralError::Syntax(message) => message,
                other => other.to_string(),
            };
            tracing::debug!(%message, "rejecting script before delivery");
            self.record(Observation::SyntaxError {
                message: message.clone(),
            });
            return Err(HostError::Syntax(message));
        }

        self.record(Observation::Reset);
        self.dialogs.clear();
        self.state = RunState::Running;
        self.stop_available = false;
        self.run_id += 1;
        let raw = Message::Run { code: code.clone() }.to_json();
        self.last_code = Some(code);

        match self.deliver(&raw).await {
            Ok(()) => {
                self.failed_attempts = 0;
                self.connected = true;
                self.connection_error = None;
                self.arm_watchdog();
                tracing::info!(run = self.run_id, "run delivered");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.failed_attempts += 1;
                tracing::warn!(
                    error = %message,
                    failed_attempts = self.failed_attempts,
                    "run delivery exhausted its retries"
                );
                self.connected = false;
                self.connection_error = Some(message.clone());
                self.finish(RunOutcome::Failed);
                self.record(Observation::ConnectionError {
                    message: message.clone(),
                });
                if self.failed_attempts >= self.config.reload_threshold {
                    self.reload_recommended = true;
                    self.record(Observation::ReloadRecommended);
                }
                Err(HostError::Disconnected(message))
            }
        }
    }

    /// Post with exponential backoff between attempts
    async fn deliver(&mut self, raw: &str) -> Result<(), TransportError> {
        let mut attempt = 1;
        loop {
            let outcome = self.attempt(raw).await;
            let Err(e) = outcome else {
                return Ok(());
            };
            tracing::debug!(attempt, error = %e, "delivery attempt failed");
            match self.config.retry.delay_after(attempt) {
                Some(delay) => {
                    sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            }
        }
    }

    async fn attempt(&mut self, raw: &str) -> Result<(), TransportError> {
        let posted = self
            .ensure_connected()
            .and_then(|()| self.post_raw(raw.to_string()));
        if let Err(e) = posted {
            self.teardown();
            return Err(e);
        }

        sleep(self.config.ack_window).await;

        if self.link.as_ref().is_some_and(|link| link.is_alive()) {
            Ok(())
        } else {
            self.teardown();
            Err(TransportError::Unresponsive)
        }
    }

    /// Terminal bookkeeping for the active run; a no-op when idle
    fn finish(&mut self, outcome: RunOutcome) {
        if self.state != RunState::Running {
            return;
        }
        tracing::debug!(run = self.run_id, ?outcome, "run finished");
        self.state = RunState::Idle;
        self.stop_available = false;
        self.last_outcome = Some(outcome);
        self.disarm_watchdog();
    }

    fn arm_watchdog(&mut self) {
        self.disarm_watchdog();
        let events = self.events_tx.clone();
        let after = self.config.watchdog;
        let (generation, run) = (self.generation, self.run_id);
        self.watchdog = Some(tokio::spawn(async move {
            sleep(after).await;
            let _ = events.send(HostEvent::Watchdog { generation, run });
        }));
    }

    fn disarm_watchdog(&mut self) {
        if let Some(task) = self.watchdog.take() {
            task.abort();
        }
    }

    // ========================================================================
    // Context lifecycle
    // ========================================================================

    fn ensure_connected(&mut self) -> Result<(), TransportError> {
        if self.link.as_ref().is_some_and(|link| link.is_alive()) {
            return Ok(());
        }
        if self.link.is_some() {
            self.teardown();
        }
        let Connection { link, inbound } = self.connector.connect()?;
        self.link = Some(link);
        self.inbound = Some(inbound);
        tracing::debug!(generation = self.generation, "isolated context connected");
        Ok(())
    }

    /// Drop the isolated context together with its timers and dialogs
    fn teardown(&mut self) {
        self.link = None;
        self.inbound = None;
        self.timers.clear();
        self.dialogs.clear();
        self.disarm_watchdog();
        self.generation += 1;
        tracing::debug!(generation = self.generation, "isolated context torn down");
    }

    fn recreate(&mut self) {
        if let Err(e) = self.ensure_connected() {
            tracing::warn!(error = %e, "could not recreate isolated context");
        }
    }

    fn stop(&mut self) {
        tracing::info!(run = self.run_id, "stopping execution");
        self.teardown();
        self.recreate();
        if self.state == RunState::Running {
            self.finish(RunOutcome::Stopped);
        }
        self.record(Observation::Stopped);
    }

    fn reconnect(&mut self) {
        tracing::info!("reconnecting isolated context");
        self.teardown();
        self.finish(RunOutcome::Stopped);
        self.recreate();
        self.failed_attempts = 0;
        self.reload_recommended = false;
        self.connected = true;
        self.connection_error = None;

        if self.last_code.is_some() {
            let events = self.events_tx.clone();
            let generation = self.generation;
            let settle = self.config.settle_delay;
            tokio::spawn(async move {
                sleep(settle).await;
                let _ = events.send(HostEvent::Rerun { generation });
            });
        }
    }

    fn isolate_lost(&mut self) {
        tracing::warn!("isolated context terminated unexpectedly");
        self.teardown();
        self.connected = false;
        self.connection_error = Some(LOST_MESSAGE.to_string());
        self.finish(RunOutcome::Failed);
        self.record(Observation::ConnectionError {
            message: LOST_MESSAGE.to_string(),
        });
    }

    // ========================================================================
    // Traffic from the isolated context
    // ========================================================================

    fn handle_inbound(&mut self, raw: &str) {
        let message = match validate(raw, Direction::ToHost) {
            Ok(message) => message,
            Err(failure) => {
                tracing::warn!(issues = %failure, "rejected message from isolated context");
                self.record(Observation::SchemaError {
                    issues: failure.to_string(),
                });
                return;
            }
        };

        match message {
            Message::Console {
                payload,
                method,
                group_depth,
            } => {
                let id = self.next_entry_id;
                self.next_entry_id += 1;
                self.record(Observation::Console(ConsoleEntry {
                    id,
                    message: payload,
                    method,
                    group_depth,
                }));
            }
            Message::Result { value } => {
                self.dialogs.clear();
                self.record(Observation::Result { value });
                self.finish(RunOutcome::Completed);
            }
            Message::Error { message, stack } => {
                self.dialogs.clear();
                self.record(Observation::Error { message, stack });
                self.finish(RunOutcome::Failed);
            }
            Message::SchemaError { issues } => self.record(Observation::SchemaError { issues }),
            Message::SetTimeout { id, delay, args } => {
                self.start_timer(TimerKind::Timeout, id, delay, args)
            }
            Message::SetInterval { id, delay, args } => {
                self.start_timer(TimerKind::Interval, id, delay, args)
            }
            Message::ClearTimeout { id } | Message::ClearInterval { id } => {
                self.timers.cancel(&id);
            }
            Message::DialogRequest {
                id,
                dialog_type,
                message,
                default_value,
            } => {
                let request = DialogRequest {
                    id,
                    dialog_type,
                    message,
                    default_value,
                };
                self.expire_dialog_later(request.id.clone());
                if self.dialogs.push(request.clone()) {
                    self.record(Observation::Dialog(request));
                }
            }
            other => tracing::debug!(tag = other.tag(), "ignoring message"),
        }
    }

    fn expire_dialog_later(&self, id: String) {
        let events = self.events_tx.clone();
        let generation = self.generation;
        let after = self.config.isolate.dialog_timeout;
        tokio::spawn(async move {
            sleep(after).await;
            let _ = events.send(HostEvent::DialogExpired { generation, id });
        });
    }

    fn start_timer(&mut self, kind: TimerKind, id: String, delay: f64, args: Vec<serde_json::Value>) {
        let started = self.timers.start(
            kind,
            id,
            delay,
            args,
            self.generation,
            self.events_tx.clone(),
        );
        if let Err(refused) = started {
            tracing::warn!(%refused, "refusing interval");
            self.record(Observation::Error {
                message: refused.to_string(),
                stack: None,
            });
        }
    }

    // ========================================================================
    // Scheduled events
    // ========================================================================

    async fn handle_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::TimerFired {
                generation,
                id,
                args,
            } => {
                if generation != self.generation || self.timers.fired(&id).is_none() {
                    tracing::trace!(%id, "dropping expiry of a forgotten timer");
                    return;
                }
                self.post(Message::TimerCallback { id, args });
            }
            HostEvent::Watchdog { generation, run } => {
                let current = generation == self.generation && run == self.run_id;
                if current && self.state == RunState::Running {
                    self.stop_available = true;
                    self.record(Observation::LongRunning);
                }
            }
            HostEvent::DialogExpired { generation, id } => {
                if generation != self.generation {
                    return;
                }
                if self.dialogs.expire(&id) {
                    tracing::debug!(%id, "dialog expired while shown");
                    self.show_next_dialog();
                }
            }
            HostEvent::Rerun { generation } => {
                if generation != self.generation {
                    return;
                }
                if let Some(code) = self.last_code.clone() {
                    if let Err(e) = self.run(code).await {
                        tracing::warn!(error = %e, "re-run after reconnect failed");
                    }
                }
            }
        }
    }

    // ========================================================================
    // Dialogs and status
    // ========================================================================

    fn respond_dialog(&mut self, value: DialogValue) -> Result<(), HostError> {
        let request = self.dialogs.answer().ok_or(HostError::NoDialog)?;
        let value = match request.dialog_type {
            DialogType::Alert => DialogValue::Null,
            DialogType::Confirm | DialogType::Prompt => value,
        };
        self.post(Message::DialogResponse {
            id: request.id,
            value,
        });
        self.show_next_dialog();
        Ok(())
    }

    fn show_next_dialog(&mut self) {
        if let Some(next) = self.dialogs.front() {
            let next = next.clone();
            self.record(Observation::Dialog(next));
        }
    }

    fn status(&self) -> HostStatus {
        HostStatus {
            state: self.state,
            connected: self.connected,
            connection_error: self.connection_error.clone(),
            failed_attempts: self.failed_attempts,
            reload_recommended: self.reload_recommended,
            stop_available: self.stop_available,
            live_timers: self.timers.len(),
            pending_dialogs: self.dialogs.len(),
            last_outcome: self.last_outcome,
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn post_raw(&self, raw: String) -> Result<(), TransportError> {
        match &self.link {
            Some(link) => link.post(raw),
            None => Err(TransportError::Closed),
        }
    }

    fn post(&mut self, message: Message) {
        if let Err(e) = self.post_raw(message.to_json()) {
            tracing::warn!(error = %e, tag = message.tag(), "could not reach isolated context");
        }
    }

    fn record(&mut self, observation: Observation) {
        self.sink.record(observation);
    }
}

async fn recv_inbound(inbound: &mut Option<UnboundedReceiver<String>>) -> Option<String> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
