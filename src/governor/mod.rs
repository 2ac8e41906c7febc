//! Execution governor: loop instrumentation and the step budget

pub mod instrument;
pub mod session;
pub mod textual;

use std::time::Duration;

use crate::error::Result;
use crate::parser::{parse_program, Program};

pub use instrument::{instrument, Instrumented};
pub use session::{BudgetExceeded, RunSession, StepOutcome};
pub use textual::{instrument_source, TextualRewrite, CHECK_FN};

/// How loop bodies get their step checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InstrumentMode {
    /// Rewrite the parsed program
    #[default]
    Structural,
    /// Regex rewrite of the source text before parsing
    Textual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorConfig {
    pub step_budget: u64,
    pub check_interval: u64,
    pub warn_after: Duration,
    pub mode: InstrumentMode,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            step_budget: 1000,
            check_interval: 100,
            warn_after: Duration::from_secs(2),
            mode: InstrumentMode::Structural,
        }
    }
}

/// A freshly parsed program with step checks in place
#[derive(Debug, Clone)]
pub struct Prepared {
    pub program: Program,
    pub loops: usize,
}

/// Parse and instrument source according to the configured mode
pub fn prepare(source: &str, config: &GovernorConfig) -> Result<Prepared> {
    match config.mode {
        InstrumentMode::Structural => {
            let Instrumented { program, loops } = instrument(parse_program(source)?);
            Ok(Prepared { program, loops })
        }
        InstrumentMode::Textual => {
            let rewrite = instrument_source(source);
            let program = parse_program(&rewrite.source)?;
            Ok(Prepared {
                program,
                loops: rewrite.loops,
            })
        }
    }
}
