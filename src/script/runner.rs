//! Script runner: drives a host through one submitted script

use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, timeout_at, Instant};

use crate::error::{CorralError, HostError, Result};
use crate::host::{Host, HostConfig, Observation};
use crate::output::{format_output, OutputFormat};
use crate::protocol::{DialogRequest, DialogType, DialogValue};

/// How the runner presents a script's output
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub format: OutputFormat,
    /// Keep relaying timer output this long after the run settles
    pub linger: Duration,
    /// Answer dialogs with their defaults instead of reading stdin
    pub dismiss_dialogs: bool,
    /// Print observations as they arrive
    pub echo: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Human,
            linger: Duration::ZERO,
            dismiss_dialogs: false,
            echo: true,
        }
    }
}

/// Result of script execution
#[derive(Debug)]
pub struct ScriptResult {
    /// Everything the host reported, in order
    pub observations: Vec<Observation>,
    /// Whether the script completed successfully
    pub success: bool,
    /// Error message if the script failed
    pub error: Option<String>,
}

type LineRead = JoinHandle<std::io::Result<Option<String>>>;

/// Why a wait for the user's answer ended
enum Woke {
    Read(std::result::Result<std::io::Result<Option<String>>, JoinError>),
    Observation(Option<Observation>),
    Deadline,
}

pub struct ScriptRunner {
    host: Host,
    observations: UnboundedReceiver<Observation>,
    options: RunOptions,
    last_source: Option<String>,
    /// How long the isolated side waits on a dialog
    dialog_timeout: Duration,
    read_line: fn() -> LineRead,
    /// A read still waiting for a line after its dialog went away
    pending_read: Option<LineRead>,
}

impl ScriptRunner {
    /// Start a host with threaded isolated contexts. Needs a tokio runtime.
    pub fn new(config: HostConfig, options: RunOptions) -> Self {
        let (sink, observations) = unbounded_channel();
        Self {
            dialog_timeout: config.isolate.dialog_timeout,
            host: Host::with_threads(config, sink),
            observations,
            options,
            last_source: None,
            read_line: read_stdin_line,
            pending_read: None,
        }
    }

    /// Handle for stopping the script from elsewhere
    pub fn host(&self) -> Host {
        self.host.clone()
    }

    /// Load and run a script file
    pub async fn run_file(&mut self, path: &Path) -> Result<ScriptResult> {
        let source = fs::read_to_string(path)?;
        self.run_source(&source).await
    }

    /// Submit source and relay observations until the run settles
    pub async fn run_source(&mut self, source: &str) -> Result<ScriptResult> {
        self.flush();
        let mut observations = Vec::new();
        let previous = self.last_source.replace(source.to_string());

        if let Err(e) = self.host.run(source).await {
            if !matches!(e, HostError::Disconnected(_)) {
                self.last_source = previous;
            }
            // The host reported it too; flush those observations first
            while let Ok(observation) = self.observations.try_recv() {
                self.emit(&observation);
                observations.push(observation);
            }
            return match e {
                HostError::Syntax(_) | HostError::Disconnected(_) => Ok(ScriptResult {
                    observations,
                    success: false,
                    error: Some(e.to_string()),
                }),
                other => Err(CorralError::Host(other)),
            };
        }

        self.follow(observations).await
    }

    /// Print output that arrived while no run was being followed
    pub fn flush(&mut self) {
        while let Ok(observation) = self.observations.try_recv() {
            self.emit(&observation);
        }
    }

    /// Fresh isolated context; re-runs the last script if there was one
    pub async fn reconnect(&mut self) -> Result<Option<ScriptResult>> {
        self.flush();
        self.host.reconnect().await?;
        if self.last_source.is_none() {
            return Ok(None);
        }
        self.follow(Vec::new()).await.map(Some)
    }

    /// Relay observations until the current run settles, then linger
    async fn follow(&mut self, mut observations: Vec<Observation>) -> Result<ScriptResult> {
        let mut failure = None;
        let mut shown = None;
        while let Some(observation) = self.next_observation(&mut shown).await? {
            let terminal = observation.is_terminal();
            if (terminal && observation.is_error()) || observation == Observation::Stopped {
                failure = Some(observation.to_string());
            }
            observations.push(observation);
            if terminal {
                break;
            }
        }

        self.linger(&mut observations, shown).await?;

        Ok(ScriptResult {
            observations,
            success: failure.is_none(),
            error: failure,
        })
    }

    /// Relay late output such as timer callbacks until the linger window closes
    async fn linger(
        &mut self,
        observations: &mut Vec<Observation>,
        mut shown: Option<(DialogRequest, Instant)>,
    ) -> Result<()> {
        if self.options.linger.is_zero() {
            return Ok(());
        }
        let deadline = Instant::now() + self.options.linger;
        while let Ok(next) = timeout_at(deadline, self.next_observation(&mut shown)).await {
            match next? {
                Some(observation) => observations.push(observation),
                None => break,
            }
        }
        Ok(())
    }

    /// Wait for the next observation and print it. While a dialog is shown
    /// the user's answer is read at the same time; the dialog is given up
    /// when the run ends, another dialog replaces it, or the isolated side
    /// has stopped waiting for it.
    async fn next_observation(
        &mut self,
        shown: &mut Option<(DialogRequest, Instant)>,
    ) -> Result<Option<Observation>> {
        loop {
            let next = match shown.take() {
                None => self.observations.recv().await,
                Some((request, deadline)) => {
                    if self.options.dismiss_dialogs {
                        self.respond(&request, None).await?;
                        continue;
                    }
                    match self.wait_for_answer(deadline).await {
                        Woke::Read(joined) => {
                            let line = joined.map_err(|e| CorralError::Io(std::io::Error::other(e)))??;
                            self.respond(&request, line.as_deref()).await?;
                            continue;
                        }
                        Woke::Deadline => {
                            tracing::debug!(id = %request.id, "gave up on dialog");
                            continue;
                        }
                        Woke::Observation(next) => {
                            if let Some(ref observation) = next {
                                if !observation.is_terminal() {
                                    *shown = Some((request, deadline));
                                }
                            }
                            next
                        }
                    }
                }
            };

            let Some(observation) = next else {
                return Ok(None);
            };
            self.emit(&observation);
            if let Observation::Dialog(ref request) = observation {
                *shown = Some((request.clone(), Instant::now() + self.dialog_timeout));
            }
            return Ok(Some(observation));
        }
    }

    async fn wait_for_answer(&mut self, deadline: Instant) -> Woke {
        // A line typed for a dialog that went away is not reused
        let mut read = match self.pending_read.take() {
            Some(read) if !read.is_finished() => read,
            _ => (self.read_line)(),
        };
        let woke = tokio::select! {
            joined = &mut read => Woke::Read(joined),
            next = self.observations.recv() => Woke::Observation(next),
            _ = sleep_until(deadline) => Woke::Deadline,
        };
        if !matches!(woke, Woke::Read(_)) {
            self.pending_read = Some(read);
        }
        woke
    }

    async fn respond(&self, request: &DialogRequest, line: Option<&str>) -> Result<()> {
        let value = dialog_answer(request, line);
        tracing::debug!(id = %request.id, ?value, "answering dialog");
        match self.host.respond_dialog(value).await {
            // The run may have been stopped while the user typed
            Ok(()) | Err(HostError::NoDialog) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn emit(&self, observation: &Observation) {
        if !self.options.echo {
            return;
        }
        if let Some(text) = format_output(observation, &self.options.format) {
            println!("{}", text);
        }
    }
}

/// Make Ctrl+C stop the running script instead of killing the process
pub fn stop_on_interrupt(runtime: &Handle, host: Host) {
    let handle = runtime.clone();
    let installed = ctrlc::set_handler(move || {
        let host = host.clone();
        handle.spawn(async move {
            if let Err(e) = host.stop().await {
                tracing::warn!(error = %e, "could not stop script");
            }
        });
    });
    if let Err(e) = installed {
        tracing::warn!(error = %e, "Ctrl+C will not stop running scripts");
    }
}

/// Read one line from stdin without blocking the runtime. `None` on EOF.
fn read_stdin_line() -> LineRead {
    tokio::task::spawn_blocking(|| -> std::io::Result<Option<String>> {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        let read = std::io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    })
}

/// Turn a typed line into a dialog answer; `None` means no answer was given
pub fn dialog_answer(request: &DialogRequest, line: Option<&str>) -> DialogValue {
    match request.dialog_type {
        DialogType::Alert => DialogValue::Null,
        DialogType::Confirm => {
            let accepted = line
                .map(|l| matches!(l.trim().to_lowercase().as_str(), "y" | "yes" | "ok" | "true"))
                .unwrap_or(false);
            DialogValue::Bool(accepted)
        }
        DialogType::Prompt => match line {
            Some(text) if !text.is_empty() => DialogValue::Text(text.to_string()),
            _ => request
                .default_value
                .clone()
                .map(DialogValue::Text)
                .unwrap_or(DialogValue::Null),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dialog_type: DialogType, default_value: Option<&str>) -> DialogRequest {
        DialogRequest {
            id: "dialog-0".into(),
            dialog_type,
            message: "?".into(),
            default_value: default_value.map(String::from),
        }
    }

    #[test]
    fn test_dialog_answers() {
        let confirm = request(DialogType::Confirm, None);
        assert_eq!(dialog_answer(&confirm, Some("Y")), DialogValue::Bool(true));
        assert_eq!(dialog_answer(&confirm, Some("nope")), DialogValue::Bool(false));
        assert_eq!(dialog_answer(&confirm, None), DialogValue::Bool(false));

        let prompt = request(DialogType::Prompt, Some("anon"));
        assert_eq!(dialog_answer(&prompt, Some("Ada")), DialogValue::Text("Ada".into()));
        assert_eq!(dialog_answer(&prompt, Some("")), DialogValue::Text("anon".into()));
        assert_eq!(dialog_answer(&prompt, None), DialogValue::Text("anon".into()));
        assert_eq!(
            dialog_answer(&request(DialogType::Prompt, None), None),
            DialogValue::Null
        );

        assert_eq!(
            dialog_answer(&request(DialogType::Alert, None), Some("x")),
            DialogValue::Null
        );
    }

    fn quiet() -> RunOptions {
        RunOptions {
            echo: false,
            dismiss_dialogs: true,
            ..RunOptions::default()
        }
    }

    #[tokio::test]
    async fn test_run_source_success() {
        let mut runner = ScriptRunner::new(HostConfig::default(), quiet());
        let result = runner
            .run_source("console.log('hello'); return 2 + 2;")
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            result.observations.last(),
            Some(&Observation::Result { value: "4".into() })
        );
    }

    #[tokio::test]
    async fn test_run_source_failure() {
        let mut runner = ScriptRunner::new(HostConfig::default(), quiet());
        let result = runner.run_source("throw new Error('nope');").await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("nope"));

        let result = runner.run_source("let = ;").await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Syntax Error"));
    }

    #[tokio::test]
    async fn test_dismissed_prompt_uses_default() {
        let mut runner = ScriptRunner::new(HostConfig::default(), quiet());
        let result = runner
            .run_source("return prompt('Name?', 'anon');")
            .await
            .unwrap();
        assert_eq!(
            result.observations.last(),
            Some(&Observation::Result {
                value: "anon".into()
            })
        );
    }

    #[tokio::test]
    async fn test_linger_collects_timer_output() {
        let options = RunOptions {
            linger: Duration::from_millis(300),
            ..quiet()
        };
        let mut runner = ScriptRunner::new(HostConfig::default(), options);
        let result = runner
            .run_source("setTimeout(() => console.log('later'), 20);")
            .await
            .unwrap();
        assert!(result.success);
        assert!(result
            .observations
            .iter()
            .any(|o| matches!(o, Observation::Console(e) if e.message.to_string() == "later")));
    }

    fn never_answers() -> LineRead {
        tokio::spawn(std::future::pending())
    }

    fn answers_yes() -> LineRead {
        tokio::spawn(async { Ok(Some("yes".to_string())) })
    }

    fn interactive(config: HostConfig, read_line: fn() -> LineRead) -> ScriptRunner {
        let options = RunOptions {
            echo: false,
            ..RunOptions::default()
        };
        let mut runner = ScriptRunner::new(config, options);
        runner.read_line = read_line;
        runner
    }

    fn short_dialogs() -> HostConfig {
        let mut config = HostConfig::default();
        config.isolate.dialog_timeout = Duration::from_millis(100);
        config
    }

    #[tokio::test]
    async fn test_unanswered_dialog_does_not_hang() {
        let mut runner = interactive(short_dialogs(), never_answers);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            runner.run_source("confirm('x?'); return 1;"),
        )
        .await
        .expect("run should settle once the dialog times out")
        .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            runner.run_source("try { prompt('a?'); } catch (e) {} return confirm('b?') ? 'yes' : 'no';"),
        )
        .await
        .expect("run should settle after both dialogs time out")
        .unwrap();
        assert!(!result.success);
        let shown = result
            .observations
            .iter()
            .filter(|o| matches!(o, Observation::Dialog(_)))
            .count();
        assert_eq!(shown, 2);
    }

    #[tokio::test]
    async fn test_typed_answer_reaches_the_script() {
        let mut runner = interactive(HostConfig::default(), answers_yes);
        let result = runner
            .run_source("return confirm('go?') ? 'went' : 'stayed';")
            .await
            .unwrap();
        assert_eq!(
            result.observations.last(),
            Some(&Observation::Result {
                value: "went".into()
            })
        );
    }

    #[tokio::test]
    async fn test_reconnect_follows_rerun() {
        let config = HostConfig {
            settle_delay: Duration::from_millis(10),
            ..HostConfig::default()
        };
        let mut runner = ScriptRunner::new(config, quiet());
        assert!(runner.reconnect().await.unwrap().is_none());

        runner.run_source("return 'again';").await.unwrap();
        let rerun = runner.reconnect().await.unwrap().unwrap();
        assert!(rerun.success);
        assert_eq!(rerun.observations.first(), Some(&Observation::Reset));
        assert_eq!(
            rerun.observations.last(),
            Some(&Observation::Result {
                value: "again".into()
            })
        );
    }
}
