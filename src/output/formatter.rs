//! Output formatting

use crate::host::{HostStatus, Observation};
use crate::output::human::{format_human, format_status_human};
use crate::output::json::{format_json, format_status_json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

/// Render one observation; `None` when the format has nothing to show for it
pub fn format_output(observation: &Observation, format: &OutputFormat) -> Option<String> {
    match format {
        OutputFormat::Human => format_human(observation),
        OutputFormat::Json => Some(format_json(observation)),
    }
}

pub fn format_status(status: &HostStatus, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Human => format_status_human(status),
        OutputFormat::Json => format_status_json(status),
    }
}
