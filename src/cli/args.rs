//! CLI argument parsing

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::governor::{GovernorConfig, InstrumentMode};
use crate::host::HostConfig;
use crate::output::OutputFormat;
use crate::script::RunOptions;

#[derive(Parser)]
#[command(name = "corral")]
#[command(author, version, about = "Run untrusted scripts in an isolated context", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: SubCommand,

    /// Output format as JSON (one object per line)
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum SubCommand {
    /// Run a script file in a fresh isolated context
    Run {
        /// Path to the script
        file: PathBuf,

        #[command(flatten)]
        limits: Limits,

        /// Keep relaying timer output for this many milliseconds after the run settles
        #[arg(long, value_name = "MS", default_value_t = 0)]
        linger: u64,

        /// Answer dialogs with their defaults instead of reading stdin
        #[arg(long)]
        dismiss_dialogs: bool,
    },

    /// Check a script's syntax and report how it would be instrumented
    Check {
        /// Path to the script
        file: PathBuf,
    },

    /// Start interactive REPL mode
    Repl {
        #[command(flatten)]
        limits: Limits,
    },
}

/// Execution limits shared by `run` and `repl`
#[derive(ClapArgs, Debug, Clone)]
pub struct Limits {
    /// Loop iterations allowed before a run is stopped
    #[arg(long, env = "CORRAL_STEP_BUDGET", default_value_t = 1000)]
    pub step_budget: u64,

    /// Seconds a dialog waits for an answer
    #[arg(
        long,
        env = "CORRAL_DIALOG_TIMEOUT",
        value_name = "SECS",
        default_value_t = 30.0,
        value_parser = parse_seconds
    )]
    pub dialog_timeout: f64,

    /// Use the regex-based loop rewrite instead of the structural one
    #[arg(long)]
    pub textual: bool,
}

impl Limits {
    pub fn host_config(&self) -> HostConfig {
        let mut config = HostConfig::default();
        config.isolate.governor = GovernorConfig {
            step_budget: self.step_budget,
            mode: if self.textual {
                InstrumentMode::Textual
            } else {
                InstrumentMode::Structural
            },
            ..GovernorConfig::default()
        };
        if self.dialog_timeout > 0.0 {
            if let Ok(timeout) =
                Duration::try_from_secs_f64(self.dialog_timeout.min(MAX_DIALOG_TIMEOUT_SECS))
            {
                config.isolate.dialog_timeout = timeout;
            }
        }
        config
    }
}

/// Longest dialog timeout accepted on the command line (one day)
const MAX_DIALOG_TIMEOUT_SECS: f64 = 86_400.0;

fn parse_seconds(raw: &str) -> Result<f64, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", raw))?;
    if secs.is_finite() && secs > 0.0 && secs <= MAX_DIALOG_TIMEOUT_SECS {
        Ok(secs)
    } else {
        Err(format!(
            "must be more than 0 and at most {} seconds",
            MAX_DIALOG_TIMEOUT_SECS
        ))
    }
}

impl Args {
    pub fn output_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }

    pub fn run_options(&self, linger: u64, dismiss_dialogs: bool) -> RunOptions {
        RunOptions {
            format: self.output_format(),
            linger: Duration::from_millis(linger),
            dismiss_dialogs,
            echo: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags() {
        let args = Args::parse_from([
            "corral",
            "run",
            "hello.js",
            "--step-budget",
            "50",
            "--textual",
            "--linger",
            "250",
            "--json",
        ]);
        assert_eq!(args.output_format(), OutputFormat::Json);
        match args.command {
            SubCommand::Run {
                ref file,
                ref limits,
                linger,
                dismiss_dialogs,
            } => {
                assert_eq!(file, &PathBuf::from("hello.js"));
                assert_eq!(linger, 250);
                assert!(!dismiss_dialogs);
                let config = limits.host_config();
                assert_eq!(config.isolate.governor.step_budget, 50);
                assert_eq!(config.isolate.governor.mode, InstrumentMode::Textual);
                assert_eq!(config.isolate.dialog_timeout, Duration::from_secs(30));
            }
            _ => panic!("Expected the run subcommand"),
        }
    }

    #[test]
    fn test_dialog_timeout_is_bounded() {
        for raw in ["1e300", "inf", "NaN", "0", "-2", "soon"] {
            let parsed = Args::try_parse_from(["corral", "run", "a.js", "--dialog-timeout", raw]);
            assert!(parsed.is_err(), "accepted {:?}", raw);
        }
        let args = Args::parse_from(["corral", "run", "a.js", "--dialog-timeout", "0.5"]);
        match args.command {
            SubCommand::Run { ref limits, .. } => {
                assert_eq!(
                    limits.host_config().isolate.dialog_timeout,
                    Duration::from_millis(500)
                );
            }
            _ => panic!("Expected the run subcommand"),
        }

        let limits = Limits {
            step_budget: 1000,
            dialog_timeout: 1e300,
            textual: false,
        };
        assert_eq!(
            limits.host_config().isolate.dialog_timeout,
            Duration::from_secs(86_400)
        );
    }

    #[test]
    fn test_nonsense_dialog_timeout_keeps_default() {
        let limits = Limits {
            step_budget: 1000,
            dialog_timeout: -1.0,
            textual: false,
        };
        assert_eq!(
            limits.host_config().isolate.dialog_timeout,
            Duration::from_secs(30)
        );
    }
}
