//! Error types for corral

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorralError {
    #[error("Syntax Error: {0}")]
    Syntax(String),

    #[error("Invalid script: {0}")]
    InvalidScript(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures moving messages between the host and an isolated context
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("isolated context is closed")]
    Closed,

    #[error("isolated context did not respond")]
    Unresponsive,

    #[error("failed to start isolated context: {0}")]
    Spawn(String),
}

/// Errors returned by the `Host` handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("Syntax Error: {0}")]
    Syntax(String),

    #[error("Connection Error: {0}")]
    Disconnected(String),

    #[error("no dialog is pending")]
    NoDialog,

    #[error("host controller has shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, CorralError>;
