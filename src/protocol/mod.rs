//! Message protocol between the host and an isolated context

pub mod message;
pub mod validate;

pub use message::{
    ConsoleMethod, ConsolePayload, DialogRequest, DialogType, DialogValue, Direction, Message,
    MAX_TIMER_DELAY_MS,
};
pub use validate::{validate, ValidationFailure};
