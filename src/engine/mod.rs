//! Script engine: values, scopes and the interpreter that runs governed programs

pub mod builtins;
pub mod environment;
pub mod executor;
pub mod scope;
pub mod value;

pub use environment::{DialogFailure, Environment, TimerKind};
pub use executor::{
    format_stack, Completion, Interpreter, ScriptError, MAX_CALL_DEPTH, MAX_EVAL_DEPTH,
};
pub use scope::{Scope, ScopeRef};
pub use value::{number_to_string, Value};
