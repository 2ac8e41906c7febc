//! Per-run step accounting

use std::time::Instant;

use thiserror::Error;

use super::GovernorConfig;

/// The step budget ran out; the script is assumed to be looping forever
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Potential infinite loop detected: exceeded {limit} steps")]
pub struct BudgetExceeded {
    pub limit: u64,
}

/// Result of a step check that did not exhaust the budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// The soft wall-clock limit passed; report this once
    Warn(String),
}

/// Step counter, start instant and warned-once flag for one execution
#[derive(Debug, Clone)]
pub struct RunSession {
    steps: u64,
    started: Instant,
    warned: bool,
    config: GovernorConfig,
}

impl RunSession {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            steps: 0,
            started: Instant::now(),
            warned: false,
            config,
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Count one loop iteration
    pub fn check(&mut self) -> Result<StepOutcome, BudgetExceeded> {
        self.steps += 1;

        let mut outcome = StepOutcome::Continue;
        let interval = self.config.check_interval.max(1);
        if self.steps % interval == 0
            && !self.warned
            && self.started.elapsed() > self.config.warn_after
        {
            self.warned = true;
            outcome = StepOutcome::Warn(format!(
                "Execution has been running for over {} seconds",
                self.config.warn_after.as_secs()
            ));
        }

        if self.steps > self.config.step_budget {
            return Err(BudgetExceeded {
                limit: self.config.step_budget,
            });
        }

        Ok(outcome)
    }
}
