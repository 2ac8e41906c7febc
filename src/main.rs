//! corral CLI - run untrusted scripts in an isolated context

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use corral::cli::{Args, SubCommand};
use corral::governor::{instrument, instrument_source};
use corral::script::{
    has_errors, outline, stop_on_interrupt, validate_script, ScriptRunner, ScriptValidationError,
    ValidationOptions, ValidationSeverity,
};
use corral::{parse_program, CorralError, OutputFormat};

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "corral=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("CORRAL_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")
}

fn run(args: Args) -> Result<ExitCode> {
    match &args.command {
        SubCommand::Run {
            file,
            limits,
            linger,
            dismiss_dialogs,
        } => {
            let source = read_script(file)?;
            let config = limits.host_config();

            // Lint first; warnings never block a run
            if let Ok(program) = parse_program(&source) {
                let options = ValidationOptions {
                    step_budget: config.isolate.governor.step_budget,
                    max_intervals: config.isolate.max_intervals,
                    interactive: !dismiss_dialogs,
                    ..ValidationOptions::default()
                };
                for issue in validate_script(&program, &options) {
                    eprintln!("{}", issue);
                }
            }

            let runtime = runtime()?;
            let mut runner = {
                let _guard = runtime.enter();
                ScriptRunner::new(config, args.run_options(*linger, *dismiss_dialogs))
            };
            stop_on_interrupt(runtime.handle(), runner.host());

            let result = runtime.block_on(async {
                let result = runner.run_source(&source).await;
                if let Err(e) = runner.host().shutdown().await {
                    tracing::debug!(error = %e, "host already gone");
                }
                result
            })?;

            if args.verbose {
                eprintln!(
                    "\n--- Script settled: {} observations ---",
                    result.observations.len()
                );
            }
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        SubCommand::Check { file } => check(file, args.output_format()),

        #[cfg(feature = "repl")]
        SubCommand::Repl { limits } => {
            let runtime = runtime()?;
            let options = args.run_options(0, false);
            corral::repl::run_repl(&runtime, limits.host_config(), options)?;
            Ok(ExitCode::SUCCESS)
        }
        #[cfg(not(feature = "repl"))]
        SubCommand::Repl { .. } => {
            eprintln!("REPL support not enabled. Rebuild with --features repl");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

/// Syntax check plus a report of what the governor would do
fn check(file: &Path, format: OutputFormat) -> Result<ExitCode> {
    let source = read_script(file)?;
    let program = match parse_program(&source) {
        Ok(program) => program,
        Err(CorralError::Syntax(message)) => {
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    json!({ "file": file.display().to_string(), "ok": false, "syntaxError": message })
                ),
                OutputFormat::Human => println!("Syntax Error: {}", message),
            }
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    let structural = instrument(program.clone()).loops;
    let textual = instrument_source(&source).loops;
    let issues = validate_script(&program, &ValidationOptions::default());
    let steps = outline(&program);

    match format {
        OutputFormat::Json => {
            let rendered: Vec<_> = issues.iter().map(issue_json).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "file": file.display().to_string(),
                    "ok": !has_errors(&issues),
                    "statements": program.body.len(),
                    "loops": { "structural": structural, "textual": textual },
                    "outline": steps,
                    "issues": rendered,
                }))?
            );
        }
        OutputFormat::Human => {
            println!("Script: {}", file.display());
            println!("Statements: {}", program.body.len());
            println!(
                "Loops instrumented: {} ({} with --textual)\n",
                structural, textual
            );
            for line in &steps {
                println!("{}", line);
            }
            if !issues.is_empty() {
                println!("\nValidation Notes:");
                for issue in &issues {
                    println!("  - {}", issue);
                }
            }
        }
    }

    Ok(if has_errors(&issues) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn issue_json(issue: &ScriptValidationError) -> serde_json::Value {
    json!({
        "statement": issue.statement,
        "severity": match issue.severity {
            ValidationSeverity::Error => "error",
            ValidationSeverity::Warning => "warning",
        },
        "message": issue.message,
    })
}
