//! Regex-based loop instrumentation, used only in the degraded textual mode.
//!
//! The rewrite inserts `checkSteps();` after the opening brace of loop bodies
//! in the raw source. It does not understand strings or comments, and loops
//! with unbraced bodies are left alone.

use std::sync::OnceLock;

use regex::Regex;

/// Name of the native global the rewritten source calls
pub const CHECK_FN: &str = "checkSteps";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextualRewrite {
    pub source: String,
    pub loops: usize,
}

fn loop_head() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:for|while)\s*\(|\bdo\s*\{").ok())
        .as_ref()
}

/// Rewrite the source text, returning it with step checks inserted
pub fn instrument_source(source: &str) -> TextualRewrite {
    let bytes = source.as_bytes();
    let mut inserts = Vec::new();

    let Some(re) = loop_head() else {
        return TextualRewrite {
            source: source.to_string(),
            loops: 0,
        };
    };

    for m in re.find_iter(source) {
        let last = m.end() - 1;
        let brace = if bytes[last] == b'{' {
            Some(last)
        } else {
            matching_paren(bytes, last).and_then(|close| next_brace(bytes, close + 1))
        };
        if let Some(pos) = brace {
            inserts.push(pos + 1);
        }
    }

    inserts.sort_unstable();
    inserts.dedup();

    let call = format!(" {}();", CHECK_FN);
    let mut out = String::with_capacity(source.len() + inserts.len() * call.len());
    let mut from = 0;
    for at in &inserts {
        out.push_str(&source[from..*at]);
        out.push_str(&call);
        from = *at;
    }
    out.push_str(&source[from..]);

    TextualRewrite {
        source: out,
        loops: inserts.len(),
    }
}

/// Index of the `)` balancing the `(` at `open`
fn matching_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Index of a `{` that directly follows `from`, skipping whitespace
fn next_brace(bytes: &[u8], from: usize) -> Option<usize> {
    bytes
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, b)| !b.is_ascii_whitespace())
        .filter(|(_, b)| **b == b'{')
        .map(|(i, _)| i)
}
