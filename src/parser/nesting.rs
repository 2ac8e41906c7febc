//! Nesting limits applied before a script is parsed and built
//!
//! Parsing, instrumentation and interpretation all recurse over the script's
//! structure, so a script nested deeply enough would exhaust the stack of
//! whichever thread handles it. Both checks here are iterative.

use pest::iterators::Pair;

use super::grammar::Rule;
use crate::error::{CorralError, Result};

/// Deepest source nesting accepted: brackets, template substitutions and
/// chained `=>`, `?`, assignment and control-flow keywords
pub const MAX_NESTING_DEPTH: usize = 64;

/// Deepest syntax tree accepted once operator and call chains are folded
pub const MAX_TREE_DEPTH: usize = 1024;

fn too_deep(what: &str, limit: usize) -> CorralError {
    CorralError::Syntax(format!("{} nested too deeply (limit {})", what, limit))
}

// ============================================================================
// Source scan
// ============================================================================

/// What the last significant token was
#[derive(Clone, Copy, PartialEq, Eq)]
enum Prev {
    /// An operand ends here; a following line may start a new statement
    Operand,
    /// An operator, opening bracket or keyword that expects more
    Continues,
}

#[derive(Default)]
struct Frame {
    template: bool,
    chain: usize,
    /// `(` opened by `if`, `while` or `for`
    header: bool,
}

struct Scanner {
    frames: Vec<Frame>,
    chain_total: usize,
    prev: Prev,
    newline: bool,
    last_word: String,
}

impl Scanner {
    fn depth(&self) -> usize {
        self.frames.len() - 1 + self.chain_total
    }

    fn check(&self) -> Result<()> {
        if self.depth() > MAX_NESTING_DEPTH {
            Err(too_deep("Expression", MAX_NESTING_DEPTH))
        } else {
            Ok(())
        }
    }

    fn top(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn chain(&mut self) -> Result<()> {
        self.top().chain += 1;
        self.chain_total += 1;
        self.check()
    }

    fn reset_chain(&mut self) {
        let chain = std::mem::take(&mut self.top().chain);
        self.chain_total -= chain;
    }

    fn push(&mut self, frame: Frame) -> Result<()> {
        self.frames.push(frame);
        self.check()
    }

    fn pop(&mut self) -> Option<Frame> {
        if self.frames.len() == 1 {
            return None;
        }
        let frame = self.frames.pop()?;
        self.chain_total -= frame.chain;
        Some(frame)
    }

    fn in_template(&self) -> bool {
        self.frames.last().map(|f| f.template).unwrap_or(false)
    }

    /// A new token starts; a line break after a complete operand ends the
    /// statement's chain
    fn token(&mut self, starts_operand: bool) {
        if self.newline && self.prev == Prev::Operand && starts_operand {
            self.reset_chain();
        }
        self.newline = false;
    }
}

/// Reject sources whose nesting would recurse past [`MAX_NESTING_DEPTH`]
pub fn check_source(source: &str) -> Result<()> {
    let chars: Vec<char> = source.chars().collect();
    let mut s = Scanner {
        frames: vec![Frame::default()],
        chain_total: 0,
        prev: Prev::Continues,
        newline: false,
        last_word: String::new(),
    };

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if s.in_template() {
            match c {
                '\\' => i += 1,
                '`' => {
                    s.pop();
                    s.prev = Prev::Operand;
                }
                '$' if next == Some('{') => {
                    s.push(Frame::default())?;
                    s.prev = Prev::Continues;
                    i += 1;
                }
                _ => {}
            }
            i += 1;
            continue;
        }

        match c {
            '\n' => s.newline = true,
            c if c.is_whitespace() => {}
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    if chars[i] == '\n' {
                        s.newline = true;
                    }
                    i += 1;
                }
                i += 1;
            }
            '"' | '\'' => {
                s.token(true);
                i += 1;
                while i < chars.len() && chars[i] != c && chars[i] != '\n' {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                s.prev = Prev::Operand;
            }
            '`' => {
                s.token(true);
                s.push(Frame {
                    template: true,
                    ..Frame::default()
                })?;
            }
            '(' | '[' | '{' => {
                s.token(c != '{');
                let header = c == '('
                    && matches!(s.last_word.as_str(), "if" | "while" | "for")
                    && s.prev == Prev::Continues;
                s.push(Frame {
                    header,
                    ..Frame::default()
                })?;
                s.prev = Prev::Continues;
            }
            ')' | ']' | '}' => {
                s.token(false);
                let header = s.pop().map(|f| f.header).unwrap_or(false);
                s.prev = if header { Prev::Continues } else { Prev::Operand };
                if s.in_template() {
                    s.prev = Prev::Continues;
                }
            }
            ',' | ';' => {
                s.token(false);
                s.reset_chain();
                s.prev = Prev::Continues;
            }
            '=' if next == Some('>') => {
                s.token(false);
                s.chain()?;
                s.prev = Prev::Continues;
                i += 1;
            }
            '=' => {
                s.token(false);
                let before = if i > 0 { chars.get(i - 1).copied() } else { None };
                let comparison = next == Some('=')
                    || matches!(before, Some('=') | Some('!') | Some('<') | Some('>'));
                if comparison {
                    while chars.get(i + 1) == Some(&'=') {
                        i += 1;
                    }
                } else {
                    s.chain()?;
                }
                s.prev = Prev::Continues;
            }
            '?' if next == Some('.') || next == Some('?') => {
                s.token(false);
                s.prev = Prev::Continues;
                i += 1;
            }
            '?' => {
                s.token(false);
                s.chain()?;
                s.prev = Prev::Continues;
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '$' => {
                let start = i;
                while i + 1 < chars.len()
                    && (chars[i + 1].is_ascii_alphanumeric() || chars[i + 1] == '_' || chars[i + 1] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..=i].iter().collect();
                // `else` continues the statement before it
                s.token(word != "else");
                match word.as_str() {
                    "if" | "while" | "for" | "else" | "do" => {
                        s.chain()?;
                        s.prev = Prev::Continues;
                    }
                    "return" | "throw" | "typeof" | "await" | "new" | "in" | "of" | "let"
                    | "const" | "var" | "function" | "async" => s.prev = Prev::Continues,
                    _ => s.prev = Prev::Operand,
                }
                s.last_word = word;
                i += 1;
                continue;
            }
            _ => {
                s.token(false);
                s.prev = Prev::Continues;
            }
        }
        if !c.is_whitespace() {
            s.last_word.clear();
        }
        i += 1;
    }
    Ok(())
}

// ============================================================================
// Parse tree
// ============================================================================

/// How many levels a node adds once its flat children are folded into a tree
fn weight(pair: &Pair<'_, Rule>) -> usize {
    match pair.as_rule() {
        Rule::unary | Rule::binary | Rule::call_expr => pair.clone().into_inner().count().max(1),
        _ => 1,
    }
}

/// Reject parse trees whose built AST would exceed [`MAX_TREE_DEPTH`]
pub fn check_tree(root: Pair<'_, Rule>) -> Result<()> {
    let mut pending = vec![(root, 0usize)];
    while let Some((pair, depth)) = pending.pop() {
        let depth = depth + weight(&pair);
        if depth > MAX_TREE_DEPTH {
            return Err(too_deep("Expression", MAX_TREE_DEPTH));
        }
        pending.extend(pair.into_inner().map(|child| (child, depth)));
    }
    Ok(())
}
