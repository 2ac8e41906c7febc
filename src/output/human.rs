//! Human-readable output formatting

use crate::host::{ConsoleEntry, HostStatus, Observation};
use crate::protocol::{ConsoleMethod, ConsolePayload};

const INDENT: &str = "  ";

pub fn format_human(observation: &Observation) -> Option<String> {
    match observation {
        Observation::Reset => None,
        Observation::Console(entry)
            if matches!(entry.method, ConsoleMethod::GroupEnd | ConsoleMethod::Clear) =>
        {
            None
        }
        Observation::Console(entry) => Some(format_entry(entry)),
        Observation::Result { value } if value.is_empty() => None,
        Observation::Result { value } => Some(format!("=> {}", value)),
        Observation::Dialog(request) => {
            let mut output = format!("[{}] {}", request.dialog_type, request.message);
            if let Some(ref default) = request.default_value {
                output.push_str(&format!(" (default: {})", default));
            }
            Some(output)
        }
        other => Some(other.to_string()),
    }
}

fn format_entry(entry: &ConsoleEntry) -> String {
    let body = match &entry.message {
        ConsolePayload::Table { headers, rows } => format_table(headers, rows),
        payload => payload.to_string(),
    };
    let prefix = match entry.method {
        ConsoleMethod::Warn => "warning: ",
        ConsoleMethod::Error | ConsoleMethod::Assert => "error: ",
        _ => "",
    };

    // A group label sits at the depth of its parent
    let depth = match entry.method {
        ConsoleMethod::Group => entry.group_depth.saturating_sub(1),
        _ => entry.group_depth,
    };
    let indent = INDENT.repeat(depth as usize);
    let mut output = String::new();
    for (i, line) in body.lines().enumerate() {
        if i > 0 {
            output.push('\n');
        }
        output.push_str(&indent);
        if i == 0 {
            output.push_str(prefix);
        }
        output.push_str(line);
    }
    if output.is_empty() {
        output.push_str(&indent);
    }
    output
}

fn format_table(headers: &[String], rows: &[Vec<String>]) -> String {
    if headers.is_empty() {
        return "(empty table)".to_string();
    }

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(col, header)| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let render = |cells: &[String]| -> String {
        widths
            .iter()
            .enumerate()
            .map(|(col, width)| {
                let cell = cells.get(col).map(String::as_str).unwrap_or("");
                format!("{:<width$}", cell, width = width)
            })
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let total = widths.iter().sum::<usize>() + 3 * widths.len().saturating_sub(1);
    let mut output = render(headers);
    output.push('\n');
    output.push_str(&"-".repeat(total));
    for row in rows {
        output.push('\n');
        output.push_str(&render(row));
    }
    output
}

pub fn format_status_human(status: &HostStatus) -> String {
    let mut output = String::from("Host Status\n-----------\n");
    output.push_str(&format!(
        "State:             {}\n",
        match status.state {
            crate::host::RunState::Idle => "idle",
            crate::host::RunState::Running => "running",
        }
    ));
    output.push_str(&format!(
        "Connected:         {}\n",
        if status.connected { "yes" } else { "no" }
    ));
    if let Some(ref error) = status.connection_error {
        output.push_str(&format!("Connection error:  {}\n", error));
    }
    output.push_str(&format!("Failed attempts:   {}\n", status.failed_attempts));
    output.push_str(&format!("Live timers:       {}\n", status.live_timers));
    output.push_str(&format!("Pending dialogs:   {}\n", status.pending_dialogs));
    if let Some(outcome) = status.last_outcome {
        output.push_str(&format!("Last outcome:      {:?}\n", outcome).to_lowercase());
    }
    if status.stop_available {
        output.push_str("Still running; :stop is available\n");
    }
    if status.reload_recommended {
        output.push_str("Repeated connection failures; :reconnect is recommended\n");
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: ConsolePayload, method: ConsoleMethod, group_depth: u32) -> Observation {
        Observation::Console(ConsoleEntry {
            id: 0,
            message,
            method,
            group_depth,
        })
    }

    #[test]
    fn test_group_depth_indents_every_line() {
        let out = format_human(&entry(ConsolePayload::text("a\nb"), ConsoleMethod::Log, 2)).unwrap();
        assert_eq!(out, "    a\n    b");
    }

    #[test]
    fn test_group_label_sits_at_parent_depth() {
        let out = format_human(&entry(ConsolePayload::text("outer"), ConsoleMethod::Group, 1)).unwrap();
        assert_eq!(out, "outer");
        let out = format_human(&entry(ConsolePayload::text("inner"), ConsoleMethod::Log, 1)).unwrap();
        assert_eq!(out, "  inner");
    }

    #[test]
    fn test_method_prefix() {
        let out = format_human(&entry(ConsolePayload::text("careful"), ConsoleMethod::Warn, 0)).unwrap();
        assert_eq!(out, "warning: careful");
    }

    #[test]
    fn test_table_is_aligned() {
        let table = ConsolePayload::Table {
            headers: vec!["(index)".into(), "name".into()],
            rows: vec![
                vec!["0".into(), "Ada".into()],
                vec!["1".into(), "Grace".into()],
            ],
        };
        let out = format_human(&entry(table, ConsoleMethod::Table, 0)).unwrap();
        assert_eq!(
            out,
            "(index) | name\n---------------\n0       | Ada\n1       | Grace"
        );
    }

    #[test]
    fn test_empty_result_is_silent() {
        assert_eq!(format_human(&Observation::Result { value: String::new() }), None);
        assert_eq!(
            format_human(&Observation::Result { value: "7".into() }).as_deref(),
            Some("=> 7")
        );
        assert_eq!(format_human(&Observation::Reset), None);
    }
}
