//! Interactive REPL implementation

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::runtime::Runtime;

use crate::error::{CorralError, Result};
use crate::host::HostConfig;
use crate::output::format_status;
use crate::script::{stop_on_interrupt, RunOptions, ScriptRunner};

pub fn run_repl(runtime: &Runtime, config: HostConfig, options: RunOptions) -> Result<()> {
    let mut rl = DefaultEditor::new().map_err(|e| CorralError::InvalidScript(e.to_string()))?;

    println!("corral v{} - Interactive Mode", env!("CARGO_PKG_VERSION"));
    println!("Type :help for commands, :quit to exit\n");

    let format = options.format;
    let mut runner = {
        let _guard = runtime.enter();
        ScriptRunner::new(config, options)
    };
    stop_on_interrupt(runtime.handle(), runner.host());

    // Buffer for input spanning several lines
    let mut input_buffer = String::new();
    let mut depth = 0i32;

    loop {
        let prompt = if depth > 0 {
            format!("{}... ", "  ".repeat(depth as usize))
        } else {
            "corral> ".to_string()
        };

        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if depth == 0 {
                    if trimmed.is_empty() {
                        runner.flush();
                        continue;
                    }
                    if let Some(command) = trimmed.strip_prefix(':') {
                        let _ = rl.add_history_entry(trimmed);
                        match command {
                            "quit" | "q" | "exit" => break,
                            "help" | "?" => print_help(),
                            "clear" => print!("\x1B[2J\x1B[1;1H"),
                            "stop" => {
                                runtime.block_on(runner.host().stop())?;
                                runner.flush();
                            }
                            "reconnect" => {
                                if runtime.block_on(runner.reconnect())?.is_none() {
                                    println!("Reconnected; nothing to re-run\n");
                                }
                            }
                            "status" => {
                                let status = runtime.block_on(runner.host().status())?;
                                println!("{}", format_status(&status, &format));
                            }
                            other => eprintln!("Unknown command :{} (try :help)\n", other),
                        }
                        continue;
                    }
                }

                let _ = rl.add_history_entry(trimmed);
                depth += bracket_balance(&line);
                if !input_buffer.is_empty() {
                    input_buffer.push('\n');
                }
                input_buffer.push_str(&line);

                if depth <= 0 {
                    depth = 0;
                    let source = std::mem::take(&mut input_buffer);
                    let result = runtime.block_on(runner.run_source(&source))?;
                    if let Some(error) = result.error {
                        tracing::debug!(%error, "run failed");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                if depth > 0 {
                    println!("^C (input cancelled)");
                    input_buffer.clear();
                    depth = 0;
                } else {
                    println!("^C");
                }
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    runtime.block_on(runner.host().shutdown())?;
    println!("Goodbye!");
    Ok(())
}

/// Net count of opening brackets, ignoring those inside string literals
fn bracket_balance(line: &str) -> i32 {
    let mut balance = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in line.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '{' | '(' | '[' => balance += 1,
            '}' | ')' | ']' => balance -= 1,
            _ => {}
        }
    }
    balance
}

fn print_help() {
    println!(
        r#"
corral REPL
===========

Type a script and press Enter to run it in the isolated context. Input
continues over several lines while brackets are open.

  console.log('hi'); return 1 + 1;
  setInterval(() => console.log('tick'), 500);
  const name = prompt('Who?', 'anon');

Dialogs are answered on the next line: y/yes for confirm, any text for
prompt, Enter to accept the default.

REPL Commands:
  :stop                           - Stop the running script and its timers
  :reconnect                      - Fresh context, re-run the last script
  :status                         - Show the host status
  :clear                          - Clear screen
  :help, :?                       - Show this help
  :quit, :q                       - Exit REPL
"#
    );
}
