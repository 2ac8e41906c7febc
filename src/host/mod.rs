//! The trusted side: owns isolated contexts and reports what scripts do
//!
//! [`Host`] is a cheap, cloneable handle to a controller task. Every method
//! is a request/reply round trip; results of a run arrive through the
//! [`ObservationSink`] the host was created with.

pub mod connector;
pub mod controller;
pub mod dialogs;
pub mod observation;
pub mod retry;
pub mod timers;

use tokio::sync::{mpsc, oneshot};

use crate::error::HostError;
use crate::protocol::DialogValue;
use controller::{Command, Controller};

pub use connector::{Connection, Connector, Link, ThreadConnector};
pub use controller::{HostConfig, HostEvent, HostStatus, RunOutcome, RunState, LOST_MESSAGE};
pub use dialogs::DialogQueue;
pub use observation::{
    ConsoleEntry, Observation, ObservationSink, LONG_RUNNING_MESSAGE, RELOAD_MESSAGE,
    STOPPED_MESSAGE,
};
pub use retry::RetryPolicy;
pub use timers::{HostTimers, IntervalCapReached};

const COMMAND_BUFFER: usize = 32;

#[derive(Clone)]
pub struct Host {
    commands: mpsc::Sender<Command>,
}

impl Host {
    /// Start a controller task. Must be called from within a tokio runtime.
    pub fn spawn<C, S>(config: HostConfig, connector: C, sink: S) -> Self
    where
        C: Connector,
        S: ObservationSink,
    {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let controller = Controller::new(config, connector, sink);
        tokio::spawn(controller.serve(rx));
        Self { commands }
    }

    /// Host whose isolated contexts run on dedicated threads
    pub fn with_threads<S: ObservationSink>(config: HostConfig, sink: S) -> Self {
        let connector = ThreadConnector::new(config.isolate.clone());
        Self::spawn(config, connector, sink)
    }

    /// Submit code. Returns once the run is delivered; its outcome is observed.
    pub async fn run(&self, code: impl Into<String>) -> Result<(), HostError> {
        let code = code.into();
        self.request(|reply| Command::Run { code, reply }).await?
    }

    /// Discard the current context and start a fresh one
    pub async fn stop(&self) -> Result<(), HostError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Fresh context, cleared failure count, and a re-run of the last code
    pub async fn reconnect(&self) -> Result<(), HostError> {
        self.request(|reply| Command::Reconnect { reply }).await
    }

    /// Answer the dialog currently shown
    pub async fn respond_dialog(&self, value: DialogValue) -> Result<(), HostError> {
        self.request(|reply| Command::RespondDialog { value, reply })
            .await?
    }

    pub async fn status(&self) -> Result<HostStatus, HostError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Tear everything down and end the controller task
    pub async fn shutdown(&self) -> Result<(), HostError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HostError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| HostError::Closed)?;
        response.await.map_err(|_| HostError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::governor::GovernorConfig;
    use crate::isolate::IsolateConfig;
    use crate::protocol::{ConsoleMethod, ConsolePayload, DialogType, Message};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
    use tokio::time::{sleep, timeout, Instant};

    // ========================================================================
    // Test transports
    // ========================================================================

    /// Refuses every connection and remembers when it was asked
    #[derive(Clone, Default)]
    struct FailingConnector {
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl Connector for FailingConnector {
        fn connect(&mut self) -> Result<Connection, TransportError> {
            self.attempts.lock().unwrap().push(Instant::now());
            Err(TransportError::Spawn("refused".into()))
        }
    }

    /// Hands out one connection the test drives by hand
    struct ScriptedConnector {
        connection: Option<Connection>,
    }

    impl Connector for ScriptedConnector {
        fn connect(&mut self) -> Result<Connection, TransportError> {
            self.connection.take().ok_or(TransportError::Closed)
        }
    }

    struct ScriptedLink {
        posted: Arc<Mutex<Vec<String>>>,
    }

    impl Link for ScriptedLink {
        fn post(&self, raw: String) -> Result<(), TransportError> {
            self.posted.lock().unwrap().push(raw);
            Ok(())
        }

        fn is_alive(&self) -> bool {
            true
        }
    }

    struct Scripted {
        host: Host,
        observations: UnboundedReceiver<Observation>,
        to_host: UnboundedSender<String>,
        posted: Arc<Mutex<Vec<String>>>,
    }

    impl Scripted {
        fn start() -> Self {
            let posted = Arc::new(Mutex::new(Vec::new()));
            let (to_host, inbound) = unbounded_channel();
            let connector = ScriptedConnector {
                connection: Some(Connection {
                    link: Box::new(ScriptedLink {
                        posted: posted.clone(),
                    }),
                    inbound,
                }),
            };
            let (sink, observations) = unbounded_channel();
            Self {
                host: Host::spawn(HostConfig::default(), connector, sink),
                observations,
                to_host,
                posted,
            }
        }

        fn inject(&self, message: Message) {
            self.to_host.send(message.to_json()).unwrap();
        }

        fn posted(&self) -> Vec<Message> {
            self.posted
                .lock()
                .unwrap()
                .iter()
                .map(|raw| crate::protocol::validate(raw, crate::protocol::Direction::ToIsolate).unwrap())
                .collect()
        }

        fn drain(&mut self) -> Vec<Observation> {
            let mut out = Vec::new();
            while let Ok(observation) = self.observations.try_recv() {
                out.push(observation);
            }
            out
        }
    }

    /// Let the controller task process everything queued
    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    fn fast_config() -> HostConfig {
        HostConfig {
            retry: RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(10),
            },
            ack_window: Duration::from_millis(10),
            settle_delay: Duration::from_millis(20),
            ..HostConfig::default()
        }
    }

    /// Collect observations until one matches, failing after five seconds
    async fn until<F>(rx: &mut UnboundedReceiver<Observation>, mut done: F) -> Vec<Observation>
    where
        F: FnMut(&Observation) -> bool,
    {
        let mut seen = Vec::new();
        let waited = timeout(Duration::from_secs(5), async {
            while let Some(observation) = rx.recv().await {
                let stop = done(&observation);
                seen.push(observation);
                if stop {
                    return;
                }
            }
        })
        .await;
        if waited.is_err() {
            panic!("Timed out waiting for an observation, saw {:?}", seen);
        }
        seen
    }

    /// The paused clock rounds sleeps up to the next millisecond
    fn assert_gap(gap: Duration, expected: Duration) {
        assert!(
            gap >= expected && gap <= expected + Duration::from_millis(2),
            "gap {:?}, expected {:?}",
            gap,
            expected
        );
    }

    fn threaded(config: HostConfig) -> (Host, UnboundedReceiver<Observation>) {
        let (sink, rx) = unbounded_channel();
        (Host::with_threads(config, sink), rx)
    }

    // ========================================================================
    // Retry and reload
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_retry_backs_off_exponentially() {
        let connector = FailingConnector::default();
        let attempts = connector.attempts.clone();
        let (sink, mut rx) = unbounded_channel();
        let host = Host::spawn(HostConfig::default(), connector, sink);

        let err = host.run("return 1;").await.unwrap_err();
        assert_eq!(
            err,
            HostError::Disconnected("failed to start isolated context: refused".into())
        );

        let attempts = attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 3);
        assert_gap(attempts[1] - attempts[0], Duration::from_secs(1));
        assert_gap(attempts[2] - attempts[1], Duration::from_secs(2));

        let status = host.status().await.unwrap();
        assert!(!status.connected);
        assert_eq!(status.failed_attempts, 1);
        assert_eq!(status.state, RunState::Idle);
        assert_eq!(status.last_outcome, Some(RunOutcome::Failed));

        assert_eq!(rx.recv().await.unwrap(), Observation::Reset);
        match rx.recv().await.unwrap() {
            Observation::ConnectionError { message } => assert!(message.contains("refused")),
            other => panic!("Expected a connection error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_recommended_after_three_exhausted_runs() {
        let (sink, mut rx) = unbounded_channel();
        let host = Host::spawn(HostConfig::default(), FailingConnector::default(), sink);

        for _ in 0..3 {
            assert!(host.run("return 1;").await.is_err());
        }
        let status = host.status().await.unwrap();
        assert_eq!(status.failed_attempts, 3);
        assert!(status.reload_recommended);

        let mut seen = Vec::new();
        while let Ok(observation) = rx.try_recv() {
            seen.push(observation);
        }
        assert_eq!(seen.last(), Some(&Observation::ReloadRecommended));
        assert_eq!(
            seen.iter()
                .filter(|o| **o == Observation::ReloadRecommended)
                .count(),
            1
        );
    }

    // ========================================================================
    // Scripted isolate
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_run_is_delivered_and_resolved() {
        let mut scripted = Scripted::start();
        scripted.host.run("return 'x';").await.unwrap();
        assert_eq!(
            scripted.posted(),
            vec![Message::Run {
                code: "return 'x';".into()
            }]
        );

        assert_eq!(
            scripted.host.run("return 'y';").await,
            Err(HostError::AlreadyRunning)
        );

        scripted.inject(Message::Console {
            payload: ConsolePayload::text("hello"),
            method: ConsoleMethod::Log,
            group_depth: 0,
        });
        scripted.inject(Message::Result { value: "x".into() });
        settle().await;

        let seen = scripted.drain();
        assert_eq!(seen[0], Observation::Reset);
        match &seen[1] {
            Observation::Console(entry) => {
                assert_eq!(entry.id, 0);
                assert_eq!(entry.message, ConsolePayload::text("hello"));
            }
            other => panic!("Expected a console entry, got {:?}", other),
        }
        assert_eq!(seen[2], Observation::Result { value: "x".into() });

        let status = scripted.host.status().await.unwrap();
        assert_eq!(status.state, RunState::Idle);
        assert_eq!(status.last_outcome, Some(RunOutcome::Completed));
        assert_eq!(status.failed_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_syntax_error_never_crosses() {
        let mut scripted = Scripted::start();
        match scripted.host.run("let = ;").await {
            Err(HostError::Syntax(_)) => {}
            other => panic!("Expected a syntax error, got {:?}", other),
        }
        settle().await;
        assert!(scripted.posted().is_empty());
        match scripted.drain().as_slice() {
            [Observation::SyntaxError { .. }] => {}
            other => panic!("Expected only a syntax error, got {:?}", other),
        }
        assert_eq!(scripted.host.status().await.unwrap().state, RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_becomes_schema_error() {
        let mut scripted = Scripted::start();
        scripted.host.run("return 1;").await.unwrap();
        scripted.to_host.send(r#"{"type":"result"}"#.into()).unwrap();
        scripted.to_host.send(r#"{"type":"run","code":"x"}"#.into()).unwrap();
        settle().await;

        let schema_errors = scripted
            .drain()
            .into_iter()
            .filter(|o| matches!(o, Observation::SchemaError { .. }))
            .count();
        assert_eq!(schema_errors, 2);
        assert_eq!(scripted.host.status().await.unwrap().state, RunState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_callback() {
        let scripted = Scripted::start();
        scripted.host.run("return 1;").await.unwrap();
        scripted.inject(Message::SetTimeout {
            id: "timeout-0".into(),
            delay: 100.0,
            args: vec![serde_json::json!(7)],
        });
        settle().await;
        assert_eq!(scripted.host.status().await.unwrap().live_timers, 1);

        sleep(Duration::from_millis(150)).await;
        assert_eq!(
            scripted.posted().last(),
            Some(&Message::TimerCallback {
                id: "timeout-0".into(),
                args: vec![serde_json::json!(7)],
            })
        );
        assert_eq!(scripted.host.status().await.unwrap().live_timers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_before_fire_sends_no_callback() {
        let scripted = Scripted::start();
        scripted.host.run("return 1;").await.unwrap();
        scripted.inject(Message::SetTimeout {
            id: "timeout-0".into(),
            delay: 100.0,
            args: vec![],
        });
        scripted.inject(Message::ClearTimeout {
            id: "timeout-0".into(),
        });
        sleep(Duration::from_millis(500)).await;

        let callbacks = scripted
            .posted()
            .into_iter()
            .filter(|m| matches!(m, Message::TimerCallback { .. }))
            .count();
        assert_eq!(callbacks, 0);
        assert_eq!(scripted.host.status().await.unwrap().live_timers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_enforces_interval_cap() {
        let mut scripted = Scripted::start();
        scripted.host.run("return 1;").await.unwrap();
        for i in 0..11 {
            scripted.inject(Message::SetInterval {
                id: format!("interval-{}", i),
                delay: 1000.0,
                args: vec![],
            });
        }
        settle().await;

        let seen = scripted.drain();
        assert!(seen.contains(&Observation::Error {
            message: "Maximum number of intervals (10) reached".into(),
            stack: None,
        }));
        assert_eq!(scripted.host.status().await.unwrap().live_timers, 10);

        scripted.host.stop().await.unwrap();
        let status = scripted.host.status().await.unwrap();
        assert_eq!(status.live_timers, 0);
        assert_eq!(status.last_outcome, Some(RunOutcome::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dialogs_are_shown_one_at_a_time() {
        let mut scripted = Scripted::start();
        scripted.host.run("return 1;").await.unwrap();
        for (i, dialog_type) in [DialogType::Alert, DialogType::Confirm].into_iter().enumerate() {
            scripted.inject(Message::DialogRequest {
                id: format!("dialog-{}", i),
                dialog_type,
                message: "?".into(),
                default_value: None,
            });
        }
        settle().await;

        let shown: Vec<_> = scripted
            .drain()
            .into_iter()
            .filter_map(|o| match o {
                Observation::Dialog(request) => Some(request.id),
                _ => None,
            })
            .collect();
        assert_eq!(shown, vec!["dialog-0".to_string()]);
        assert_eq!(scripted.host.status().await.unwrap().pending_dialogs, 2);

        // The alert's answer is always null
        scripted
            .host
            .respond_dialog(DialogValue::Bool(true))
            .await
            .unwrap();
        match scripted.drain().as_slice() {
            [Observation::Dialog(next)] => assert_eq!(next.id, "dialog-1"),
            other => panic!("Expected the next dialog, got {:?}", other),
        }
        scripted
            .host
            .respond_dialog(DialogValue::Bool(false))
            .await
            .unwrap();
        assert_eq!(
            scripted.host.respond_dialog(DialogValue::Null).await,
            Err(HostError::NoDialog)
        );

        let responses: Vec<_> = scripted
            .posted()
            .into_iter()
            .filter(|m| matches!(m, Message::DialogResponse { .. }))
            .collect();
        assert_eq!(
            responses,
            vec![
                Message::DialogResponse {
                    id: "dialog-0".into(),
                    value: DialogValue::Null,
                },
                Message::DialogResponse {
                    id: "dialog-1".into(),
                    value: DialogValue::Bool(false),
                },
            ]
        );
    }

    fn shown_dialogs(observations: Vec<Observation>) -> Vec<String> {
        observations
            .into_iter()
            .filter_map(|o| match o {
                Observation::Dialog(request) => Some(request.id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_dialog_reveals_the_next() {
        let mut scripted = Scripted::start();
        scripted.host.run("return 1;").await.unwrap();
        let request = |id: &str| Message::DialogRequest {
            id: id.into(),
            dialog_type: DialogType::Confirm,
            message: "?".into(),
            default_value: None,
        };

        scripted.inject(request("dialog-0"));
        sleep(Duration::from_secs(20)).await;
        scripted.inject(request("dialog-1"));
        settle().await;
        assert_eq!(shown_dialogs(scripted.drain()), vec!["dialog-0".to_string()]);

        sleep(Duration::from_secs(11)).await;
        assert_eq!(shown_dialogs(scripted.drain()), vec!["dialog-1".to_string()]);
        assert_eq!(scripted.host.status().await.unwrap().pending_dialogs, 1);

        sleep(Duration::from_secs(20)).await;
        assert_eq!(scripted.host.status().await.unwrap().pending_dialogs, 0);
        assert_eq!(
            scripted.host.respond_dialog(DialogValue::Bool(true)).await,
            Err(HostError::NoDialog)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_message_clears_dialogs() {
        let mut scripted = Scripted::start();
        scripted.host.run("return 1;").await.unwrap();
        scripted.inject(Message::DialogRequest {
            id: "dialog-0".into(),
            dialog_type: DialogType::Prompt,
            message: "name?".into(),
            default_value: None,
        });
        scripted.inject(Message::Error {
            message: "Dialog prompt timed out after 30 seconds".into(),
            stack: None,
        });
        settle().await;
        scripted.drain();
        assert_eq!(scripted.host.status().await.unwrap().pending_dialogs, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_offers_stop() {
        let mut scripted = Scripted::start();
        scripted.host.run("while (true) {}").await.unwrap();
        assert!(!scripted.host.status().await.unwrap().stop_available);

        sleep(Duration::from_secs(3)).await;
        assert!(scripted.drain().contains(&Observation::LongRunning));
        assert!(scripted.host.status().await.unwrap().stop_available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_isolate_disconnects() {
        let Scripted {
            host,
            mut observations,
            to_host,
            ..
        } = Scripted::start();
        host.run("return 1;").await.unwrap();
        drop(to_host);

        let seen = until(&mut observations, |o| matches!(o, Observation::ConnectionError { .. })).await;
        assert_eq!(
            seen.last(),
            Some(&Observation::ConnectionError {
                message: LOST_MESSAGE.into()
            })
        );
        let status = host.status().await.unwrap();
        assert!(!status.connected);
        assert_eq!(status.last_outcome, Some(RunOutcome::Failed));
    }

    // ========================================================================
    // Real isolated contexts
    // ========================================================================

    #[tokio::test]
    async fn test_infinite_loop_is_cut_off() {
        let (host, mut rx) = threaded(fast_config());
        host.run("for (;;) {}").await.unwrap();
        let seen = until(&mut rx, Observation::is_terminal).await;
        match seen.last() {
            Some(Observation::Error { message, .. }) => assert!(message.contains("exceeded")),
            other => panic!("Expected an error, got {:?}", other),
        }
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_eleventh_interval_is_refused() {
        let (host, mut rx) = threaded(fast_config());
        host.run("for (let i = 0; i < 11; i++) { setInterval(() => console.log('x'), 10); }")
            .await
            .unwrap();
        let seen = until(&mut rx, Observation::is_terminal).await;
        let refused = seen.iter().any(|o| match o {
            Observation::Console(entry) => {
                entry.method == ConsoleMethod::Error
                    && entry.message == ConsolePayload::text("Maximum number of intervals (10) reached")
            }
            _ => false,
        });
        assert!(refused, "no refusal in {:?}", seen);
        assert_eq!(host.status().await.unwrap().live_timers, 10);

        host.stop().await.unwrap();
        assert_eq!(host.status().await.unwrap().live_timers, 0);
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_huge_timer_delay_keeps_host_alive() {
        let (host, mut rx) = threaded(fast_config());
        host.run("setTimeout(() => {}, 1e300); setInterval(() => {}, 1e300); return 'ok';")
            .await
            .unwrap();
        let seen = until(&mut rx, Observation::is_terminal).await;
        assert_eq!(seen.last(), Some(&Observation::Result { value: "ok".into() }));
        let status = host.status().await.unwrap();
        assert!(status.connected);
        assert_eq!(status.live_timers, 2);

        host.run("return 2;").await.unwrap();
        let seen = until(&mut rx, Observation::is_terminal).await;
        assert_eq!(seen.last(), Some(&Observation::Result { value: "2".into() }));
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_deeply_nested_script_never_crosses() {
        let (host, mut rx) = threaded(fast_config());
        let source = format!("return {}true;", "!".repeat(5000));
        match host.run(source).await {
            Err(HostError::Syntax(message)) => assert!(message.contains("nested too deeply")),
            other => panic!("Expected a syntax error, got {:?}", other),
        }
        let seen = until(&mut rx, |o| matches!(o, Observation::SyntaxError { .. })).await;
        assert_eq!(seen.len(), 1);

        host.run("let a = []; for (let i = 0; i < 500; i++) { a = [a]; } console.log(a); return 'done';")
            .await
            .unwrap();
        let seen = until(&mut rx, Observation::is_terminal).await;
        assert!(seen.iter().any(|o| matches!(o, Observation::Console(entry)
            if entry.message == ConsolePayload::text("[Unserializable Object]"))));
        assert_eq!(seen.last(), Some(&Observation::Result { value: "done".into() }));
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_callback_runs_in_context() {
        let (host, mut rx) = threaded(fast_config());
        host.run("setTimeout((n) => console.log('tick', n), 20, 3); return 'scheduled';")
            .await
            .unwrap();
        let seen = until(&mut rx, |o| matches!(o, Observation::Console(_))).await;
        assert!(seen.contains(&Observation::Result {
            value: "scheduled".into()
        }));
        match seen.last() {
            Some(Observation::Console(entry)) => {
                assert_eq!(entry.message, ConsolePayload::text("tick 3"))
            }
            other => panic!("Expected a console entry, got {:?}", other),
        }
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unanswered_confirm_times_out() {
        let config = HostConfig {
            isolate: IsolateConfig {
                dialog_timeout: Duration::from_millis(50),
                ..IsolateConfig::default()
            },
            ..fast_config()
        };
        let (host, mut rx) = threaded(config);
        host.run("confirm('proceed?');").await.unwrap();
        let seen = until(&mut rx, Observation::is_terminal).await;
        assert!(seen.iter().any(|o| matches!(o, Observation::Dialog(_))));
        match seen.last() {
            Some(Observation::Error { message, .. }) => {
                assert!(message.starts_with("Dialog confirm timed out"))
            }
            other => panic!("Expected a dialog timeout, got {:?}", other),
        }
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dialog_after_a_timed_out_run_is_shown() {
        let config = HostConfig {
            isolate: IsolateConfig {
                dialog_timeout: Duration::from_millis(250),
                ..IsolateConfig::default()
            },
            ..fast_config()
        };
        let (host, mut rx) = threaded(config);
        host.run("confirm('first?');").await.unwrap();
        until(&mut rx, Observation::is_terminal).await;
        assert_eq!(host.status().await.unwrap().pending_dialogs, 0);

        host.run("return confirm('second?') ? 'yes' : 'no';").await.unwrap();
        let seen = until(&mut rx, |o| matches!(o, Observation::Dialog(_) | Observation::Error { .. })).await;
        match seen.last() {
            Some(Observation::Dialog(request)) => assert_eq!(request.message, "second?"),
            other => panic!("Expected the second dialog, got {:?}", other),
        }
        let answered = host.respond_dialog(DialogValue::Bool(true)).await;
        assert!(matches!(answered, Ok(()) | Err(HostError::NoDialog)));
        let seen = until(&mut rx, Observation::is_terminal).await;
        match seen.last() {
            // The answer can lose the race against the short timeout
            Some(Observation::Result { value }) => assert_eq!(value, "yes"),
            Some(Observation::Error { message, .. }) => assert!(message.contains("timed out")),
            other => panic!("Expected a terminal outcome, got {:?}", other),
        }
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_answered_confirm() {
        let (host, mut rx) = threaded(fast_config());
        host.run("const ok = confirm('go?'); return ok ? 'yes' : 'no';")
            .await
            .unwrap();
        until(&mut rx, |o| matches!(o, Observation::Dialog(_))).await;
        host.respond_dialog(DialogValue::Bool(true)).await.unwrap();
        let seen = until(&mut rx, Observation::is_terminal).await;
        assert_eq!(seen.last(), Some(&Observation::Result { value: "yes".into() }));
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_then_run_again() {
        let config = HostConfig {
            isolate: IsolateConfig {
                governor: GovernorConfig {
                    step_budget: u64::MAX,
                    ..GovernorConfig::default()
                },
                ..IsolateConfig::default()
            },
            watchdog: Duration::from_millis(50),
            ..fast_config()
        };
        let (host, mut rx) = threaded(config);
        host.run("while (true) {}").await.unwrap();
        until(&mut rx, |o| *o == Observation::LongRunning).await;
        assert!(host.status().await.unwrap().stop_available);

        host.stop().await.unwrap();
        until(&mut rx, |o| *o == Observation::Stopped).await;
        let status = host.status().await.unwrap();
        assert_eq!(status.state, RunState::Idle);
        assert!(!status.stop_available);

        host.run("return 1;").await.unwrap();
        let seen = until(&mut rx, Observation::is_terminal).await;
        assert_eq!(seen.last(), Some(&Observation::Result { value: "1".into() }));
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_reruns_last_code() {
        let (host, mut rx) = threaded(fast_config());
        host.run("return 'again';").await.unwrap();
        until(&mut rx, Observation::is_terminal).await;

        host.reconnect().await.unwrap();
        let seen = until(&mut rx, Observation::is_terminal).await;
        assert_eq!(seen.first(), Some(&Observation::Reset));
        assert_eq!(
            seen.last(),
            Some(&Observation::Result {
                value: "again".into()
            })
        );
        let status = host.status().await.unwrap();
        assert!(status.connected);
        assert_eq!(status.failed_attempts, 0);
        host.shutdown().await.unwrap();
    }
}
