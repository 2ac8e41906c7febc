//! corral - run untrusted scripts in an isolated context
//!
//! Scripts execute on a dedicated thread that shares nothing with the host;
//! the two sides exchange schema-validated JSON messages only. The host
//! observes console output, results, errors, timers and dialogs, and keeps
//! the context alive with retries and reconnects.
//!
//! # Example
//!
//! ```no_run
//! use corral::{Host, HostConfig};
//!
//! # async fn demo() -> Result<(), corral::HostError> {
//! let (sink, mut observations) = tokio::sync::mpsc::unbounded_channel();
//! let host = Host::with_threads(HostConfig::default(), sink);
//! host.run("console.log('hi'); return 6 * 7;").await?;
//! while let Some(observation) = observations.recv().await {
//!     println!("{}", observation);
//!     if observation.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod engine;
pub mod error;
pub mod governor;
pub mod host;
pub mod isolate;
pub mod output;
pub mod parser;
pub mod protocol;
pub mod script;

#[cfg(feature = "repl")]
pub mod repl;

pub use error::{CorralError, HostError, Result, TransportError};
pub use governor::{GovernorConfig, InstrumentMode};
pub use host::{Host, HostConfig, HostStatus, Observation, ObservationSink};
pub use isolate::IsolateConfig;
pub use output::{format_output, OutputFormat};
pub use parser::{parse_program, Program};
pub use protocol::{validate, Direction, Message};
pub use script::{validate_script, ScriptResult, ScriptRunner};
