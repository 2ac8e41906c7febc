//! Script execution module
//!
//! Loads scripts, lints them, and drives a host through a run.

pub mod runner;
pub mod validator;

pub use runner::{dialog_answer, stop_on_interrupt, RunOptions, ScriptResult, ScriptRunner};
pub use validator::{
    has_errors, has_warnings, outline, validate_script, ScriptValidationError, ValidationOptions,
    ValidationSeverity,
};
