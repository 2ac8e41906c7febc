//! The isolated context: a dedicated thread that only speaks JSON messages
//!
//! Script values are `Rc`-based and never leave the thread. The host keeps
//! the sending end of the inbox and the receiving end of the outbox; dropping
//! both tears the context down at its next step check or channel read.

pub mod bridge;
pub mod console;
pub mod dialogs;
pub mod timers;

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::engine::{Environment, Interpreter, ScriptError, Value};
use crate::error::TransportError;
use crate::governor::{prepare, GovernorConfig};
use crate::protocol::{validate, Direction, Message};

pub use bridge::Bridge;
pub use console::{serialize_args, serialize_table, ConsoleRelay};
pub use dialogs::DialogProxy;
pub use timers::TimerProxy;

/// Interpreter recursion is deep; give the thread room for it
const ISOLATE_STACK_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct IsolateConfig {
    pub governor: GovernorConfig,
    pub dialog_timeout: Duration,
    pub max_intervals: usize,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            governor: GovernorConfig::default(),
            dialog_timeout: Duration::from_secs(30),
            max_intervals: 10,
        }
    }
}

/// Host-side ends of a running isolated context
pub struct IsolateHandle {
    pub inbox: mpsc::Sender<String>,
    pub outbox: UnboundedReceiver<String>,
    thread: JoinHandle<()>,
}

impl IsolateHandle {
    pub fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    pub fn into_parts(self) -> (mpsc::Sender<String>, UnboundedReceiver<String>, JoinHandle<()>) {
        (self.inbox, self.outbox, self.thread)
    }
}

/// Start a fresh isolated context on its own thread
pub fn spawn(config: IsolateConfig) -> Result<IsolateHandle, TransportError> {
    let (inbox_tx, inbox_rx) = mpsc::channel();
    let (outbox_tx, outbox_rx) = unbounded_channel();

    let thread = std::thread::Builder::new()
        .name("corral-isolate".to_string())
        .stack_size(ISOLATE_STACK_SIZE)
        .spawn(move || {
            let bridge = Bridge::new(outbox_tx, inbox_rx, config.dialog_timeout, config.max_intervals);
            Executor::new(config.governor, bridge).serve();
        })
        .map_err(|e| TransportError::Spawn(e.to_string()))?;

    tracing::debug!("isolated context started");
    Ok(IsolateHandle {
        inbox: inbox_tx,
        outbox: outbox_rx,
        thread,
    })
}

/// Message loop of one isolated context
pub struct Executor {
    governor: GovernorConfig,
    bridge: Bridge,
}

impl Executor {
    pub fn new(governor: GovernorConfig, bridge: Bridge) -> Self {
        Self { governor, bridge }
    }

    /// Handle inbound messages until the host lets go of the context
    pub fn serve(mut self) {
        while let Some(raw) = self.bridge.next_inbound() {
            self.dispatch(&raw);
            if self.bridge.is_torn_down() {
                break;
            }
        }
        tracing::debug!("isolated context finished");
    }

    fn dispatch(&mut self, raw: &str) {
        match validate(raw, Direction::ToIsolate) {
            Ok(Message::Run { code }) => self.run(&code),
            Ok(Message::TimerCallback { id, args }) => self.fire(&id, &args),
            Ok(Message::DialogResponse { id, .. }) => {
                // A waiting dialog consumes its own response; anything here is stale
                self.bridge.dialogs.settle(&id);
                tracing::debug!(%id, "ignoring response for settled dialog");
            }
            Ok(other) => tracing::debug!(tag = other.tag(), "ignoring message"),
            Err(failure) => {
                tracing::warn!(issues = %failure, "rejected inbound message");
                let _ = self.bridge.post(failure.into());
            }
        }
    }

    fn run(&mut self, code: &str) {
        let terminal = match prepare(code, &self.governor) {
            Err(e) => Message::error(e.to_string(), None),
            Ok(prepared) => {
                tracing::debug!(loops = prepared.loops, "running script");
                let mut interp = Interpreter::new(&mut self.bridge, self.governor.clone());
                let outcome = interp.run_program(&prepared.program);
                tracing::debug!(steps = interp.steps(), "script settled");
                match outcome {
                    Ok(value) => Message::Result {
                        value: completion_text(&value),
                    },
                    Err(ScriptError::TornDown) => return,
                    Err(err) => {
                        let (message, stack) = err.describe();
                        Message::error(message, stack)
                    }
                }
            }
        };
        let _ = self.bridge.post(terminal);
    }

    fn fire(&mut self, id: &str, args: &[serde_json::Value]) {
        let Some(callback) = self.bridge.timers.fire(id) else {
            tracing::debug!(%id, "ignoring callback for unknown timer");
            return;
        };

        let args = args.iter().map(Value::from_json).collect();
        let mut interp = Interpreter::new(&mut self.bridge, self.governor.clone());
        match interp.call_function(&callback, Value::Undefined, args) {
            Ok(_) | Err(ScriptError::TornDown) => {}
            Err(err) => {
                let (message, stack) = err.describe();
                let _ = self.bridge.post(Message::error(message, stack));
            }
        }
    }
}

/// A falsy completion value reads as an empty result
fn completion_text(value: &Value) -> String {
    if value.truthy() {
        value.to_display_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ConsoleMethod, ConsolePayload};

    struct Harness {
        handle: IsolateHandle,
    }

    impl Harness {
        fn start(config: IsolateConfig) -> Self {
            Self {
                handle: spawn(config).unwrap(),
            }
        }

        fn send(&self, message: Message) {
            self.handle.inbox.send(message.to_json()).unwrap();
        }

        fn send_raw(&self, raw: &str) {
            self.handle.inbox.send(raw.to_string()).unwrap();
        }

        /// Block until the isolate posts its next message
        fn next(&mut self) -> Message {
            let raw = self.handle.outbox.blocking_recv().unwrap();
            validate(&raw, Direction::ToHost).unwrap()
        }

        /// Collect messages up to and including a terminal one
        fn until_terminal(&mut self) -> Vec<Message> {
            let mut out = Vec::new();
            loop {
                let message = self.next();
                let done = matches!(message, Message::Result { .. } | Message::Error { .. });
                out.push(message);
                if done {
                    return out;
                }
            }
        }

        fn run(&mut self, code: &str) -> Vec<Message> {
            self.send(Message::Run {
                code: code.to_string(),
            });
            self.until_terminal()
        }
    }

    #[test]
    fn test_result_and_console() {
        let mut isolate = Harness::start(IsolateConfig::default());
        let messages = isolate.run("console.log('hi', [1, 2]); return 6 * 7;");
        assert_eq!(
            messages,
            vec![
                Message::Console {
                    payload: ConsolePayload::text("hi [1,2]"),
                    method: ConsoleMethod::Log,
                    group_depth: 0,
                },
                Message::Result {
                    value: "42".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_falsy_result_is_empty() {
        let mut isolate = Harness::start(IsolateConfig::default());
        assert_eq!(
            isolate.run("return 0;"),
            vec![Message::Result {
                value: String::new()
            }]
        );
        assert_eq!(
            isolate.run("let x = 1;"),
            vec![Message::Result {
                value: String::new()
            }]
        );
    }

    #[test]
    fn test_infinite_loop_reports_error() {
        let mut isolate = Harness::start(IsolateConfig::default());
        match isolate.run("for (;;) {}").pop() {
            Some(Message::Error { message, stack }) => {
                assert!(message.contains("exceeded 1000 steps"));
                assert!(stack.is_some());
            }
            other => panic!("Expected an error, got {:?}", other),
        }
    }

    #[test]
    fn test_timer_round_trip() {
        let mut isolate = Harness::start(IsolateConfig::default());
        let messages = isolate.run("setTimeout((a, b) => console.log(a + b), 10, 2, 3);");
        let id = match &messages[0] {
            Message::SetTimeout { id, delay, args } => {
                assert_eq!(*delay, 10.0);
                assert_eq!(args, &vec![serde_json::json!(2), serde_json::json!(3)]);
                id.clone()
            }
            other => panic!("Expected setTimeout, got {:?}", other),
        };

        isolate.send(Message::TimerCallback {
            id: id.clone(),
            args: vec![serde_json::json!(2), serde_json::json!(3)],
        });
        assert_eq!(
            isolate.next(),
            Message::Console {
                payload: ConsolePayload::text("5"),
                method: ConsoleMethod::Log,
                group_depth: 0,
            }
        );

        // Fired timeouts are forgotten; a second callback is a no-op
        isolate.send(Message::TimerCallback { id, args: vec![] });
        let alive = isolate.run("return 'still alive';");
        assert_eq!(
            alive,
            vec![Message::Result {
                value: "still alive".into()
            }]
        );
    }

    #[test]
    fn test_callback_error_is_reported() {
        let mut isolate = Harness::start(IsolateConfig::default());
        isolate.run("setInterval(() => { throw new Error('tick failed'); }, 5);");
        isolate.send(Message::TimerCallback {
            id: "interval-0".into(),
            args: vec![],
        });
        match isolate.next() {
            Message::Error { message, .. } => assert_eq!(message, "tick failed"),
            other => panic!("Expected an error, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_error_for_bad_message() {
        let mut isolate = Harness::start(IsolateConfig::default());
        isolate.send_raw(r#"{"type":"run"}"#);
        assert!(matches!(isolate.next(), Message::SchemaError { .. }));
        isolate.send_raw("garbage");
        assert!(matches!(isolate.next(), Message::SchemaError { .. }));
    }

    #[test]
    fn test_syntax_error_inside_isolate() {
        let mut isolate = Harness::start(IsolateConfig::default());
        match isolate.run("let = ;").pop() {
            Some(Message::Error { message, .. }) => assert!(message.starts_with("Syntax Error")),
            other => panic!("Expected an error, got {:?}", other),
        }
    }

    #[test]
    fn test_dialog_round_trip() {
        let mut isolate = Harness::start(IsolateConfig::default());
        isolate.send(Message::Run {
            code: "const name = prompt('Who?', 'anon'); return 'hi ' + name;".into(),
        });
        match isolate.next() {
            Message::DialogRequest {
                id,
                default_value,
                ..
            } => {
                assert_eq!(default_value.as_deref(), Some("anon"));
                isolate.send(Message::DialogResponse {
                    id,
                    value: crate::protocol::DialogValue::Text("Ada".into()),
                });
            }
            other => panic!("Expected a dialog request, got {:?}", other),
        }
        assert_eq!(
            isolate.until_terminal(),
            vec![Message::Result {
                value: "hi Ada".into()
            }]
        );
    }

    #[test]
    fn test_unanswered_confirm_times_out() {
        let mut isolate = Harness::start(IsolateConfig {
            dialog_timeout: Duration::from_millis(30),
            ..IsolateConfig::default()
        });
        let messages = isolate.run("await confirm('proceed?');");
        assert!(matches!(messages[0], Message::DialogRequest { .. }));
        match messages.last() {
            Some(Message::Error { message, .. }) => {
                assert!(message.starts_with("Dialog confirm timed out"))
            }
            other => panic!("Expected a timeout error, got {:?}", other),
        }
    }

    #[test]
    fn test_teardown_stops_runaway_thread() {
        let config = IsolateConfig {
            governor: GovernorConfig {
                step_budget: u64::MAX,
                ..GovernorConfig::default()
            },
            ..IsolateConfig::default()
        };
        let handle = spawn(config).unwrap();
        handle
            .inbox
            .send(Message::Run { code: "while (true) {}".into() }.to_json())
            .unwrap();
        let IsolateHandle { inbox, outbox, thread } = handle;
        drop(inbox);
        drop(outbox);
        thread.join().unwrap();
    }
}
