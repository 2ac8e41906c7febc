//! Static checks run before a script is submitted
//!
//! Nothing here is a security boundary; the governor and the proxies enforce
//! the limits at run time. The linter only points out scripts that are
//! certain to run into them.

use crate::parser::{Arg, Expr, FunctionBody, FunctionDef, PropKey, Program, Stmt, TemplatePart};

/// Issue found while validating a script
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptValidationError {
    /// 1-based index of the top-level statement the issue sits in
    pub statement: Option<usize>,
    pub message: String,
    pub severity: ValidationSeverity,
}

/// Severity level for validation issues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ScriptValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            ValidationSeverity::Error => "ERROR",
            ValidationSeverity::Warning => "WARNING",
        };
        if let Some(statement) = self.statement {
            write!(f, "{} (statement {}): {}", prefix, statement, self.message)
        } else {
            write!(f, "{}: {}", prefix, self.message)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Maximum nesting depth for blocks, loops and functions
    pub max_nesting_depth: usize,
    pub max_intervals: usize,
    pub step_budget: u64,
    /// Whether someone will be around to answer dialogs
    pub interactive: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            max_nesting_depth: 32,
            max_intervals: 10,
            step_budget: 1000,
            interactive: true,
        }
    }
}

/// Validate a parsed script
pub fn validate_script(program: &Program, options: &ValidationOptions) -> Vec<ScriptValidationError> {
    let mut linter = Linter {
        options,
        errors: Vec::new(),
        statement: 0,
        interval_calls: 0,
        loop_depth: 0,
    };

    for (i, stmt) in program.body.iter().enumerate() {
        linter.statement = i + 1;
        linter.stmt(stmt, 0);
    }

    if linter.interval_calls > options.max_intervals {
        linter.errors.push(ScriptValidationError {
            statement: None,
            message: format!(
                "{} setInterval calls, but at most {} intervals may be live",
                linter.interval_calls, options.max_intervals
            ),
            severity: ValidationSeverity::Warning,
        });
    }

    linter.errors
}

pub fn has_errors(errors: &[ScriptValidationError]) -> bool {
    errors.iter().any(|e| e.severity == ValidationSeverity::Error)
}

pub fn has_warnings(errors: &[ScriptValidationError]) -> bool {
    errors
        .iter()
        .any(|e| e.severity == ValidationSeverity::Warning)
}

struct Linter<'a> {
    options: &'a ValidationOptions,
    errors: Vec<ScriptValidationError>,
    statement: usize,
    interval_calls: usize,
    loop_depth: usize,
}

impl Linter<'_> {
    fn push(&mut self, severity: ValidationSeverity, message: String) {
        let issue = ScriptValidationError {
            statement: Some(self.statement),
            message,
            severity,
        };
        if !self.errors.contains(&issue) {
            self.errors.push(issue);
        }
    }

    fn too_deep(&mut self, depth: usize) -> bool {
        if depth > self.options.max_nesting_depth {
            self.push(
                ValidationSeverity::Error,
                format!(
                    "Maximum nesting depth ({}) exceeded",
                    self.options.max_nesting_depth
                ),
            );
            return true;
        }
        false
    }

    fn stmts(&mut self, body: &[Stmt], depth: usize) {
        for stmt in body {
            self.stmt(stmt, depth);
        }
    }

    fn stmt(&mut self, stmt: &Stmt, depth: usize) {
        if self.too_deep(depth) {
            return;
        }

        match stmt {
            Stmt::Expr(e) | Stmt::Throw(e) => self.expr(e, depth),
            Stmt::Return(e) => {
                if let Some(e) = e {
                    self.expr(e, depth);
                }
            }
            Stmt::Declare(d) => {
                for binding in &d.bindings {
                    if let Some(ref init) = binding.init {
                        self.expr(init, depth);
                    }
                }
            }
            Stmt::Function(def) => self.function(def, depth),
            Stmt::Block(body) => self.stmts(body, depth + 1),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test, depth);
                self.stmt(consequent, depth + 1);
                if let Some(alternate) = alternate {
                    self.stmt(alternate, depth + 1);
                }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                if let Some(crate::parser::ForInit::Expr(e)) = init {
                    self.expr(e, depth);
                }
                if let Some(test) = test {
                    self.expr(test, depth);
                }
                if let Some(update) = update {
                    self.expr(update, depth);
                }
                self.check_unbounded(test.is_none(), body);
                self.loop_body(body, depth);
            }
            Stmt::ForOf { iterable, body, .. } => {
                self.expr(iterable, depth);
                self.loop_body(body, depth);
            }
            Stmt::While { test, body } | Stmt::DoWhile { body, test } => {
                self.expr(test, depth);
                self.check_unbounded(always_true(test), body);
                self.loop_body(body, depth);
            }
            Stmt::Try {
                block,
                handler,
                finalizer,
            } => {
                self.stmts(block, depth + 1);
                if let Some(handler) = handler {
                    self.stmts(&handler.body, depth + 1);
                }
                if let Some(finalizer) = finalizer {
                    self.stmts(finalizer, depth + 1);
                }
            }
            Stmt::Break | Stmt::Continue | Stmt::Empty | Stmt::StepCheck => {}
        }
    }

    fn loop_body(&mut self, body: &Stmt, depth: usize) {
        self.loop_depth += 1;
        self.stmt(body, depth + 1);
        self.loop_depth -= 1;
    }

    fn check_unbounded(&mut self, unconditional: bool, body: &Stmt) {
        if unconditional && !exits(body) {
            self.push(
                ValidationSeverity::Warning,
                format!(
                    "Loop has no exit; it will be stopped after {} steps",
                    self.options.step_budget
                ),
            );
        }
    }

    fn function(&mut self, def: &FunctionDef, depth: usize) {
        // A loop around a function literal does not run the function's body
        let loop_depth = std::mem::take(&mut self.loop_depth);
        match &def.body {
            FunctionBody::Block(body) => self.stmts(body, depth + 1),
            FunctionBody::Expr(e) => self.expr(e, depth + 1),
        }
        self.loop_depth = loop_depth;
    }

    fn args(&mut self, args: &[Arg], depth: usize) {
        for arg in args {
            match arg {
                Arg::Expr(e) | Arg::Spread(e) => self.expr(e, depth),
            }
        }
    }

    fn expr(&mut self, expr: &Expr, depth: usize) {
        match expr {
            Expr::Number(_)
            | Expr::Str(_)
            | Expr::Bool(_)
            | Expr::Null
            | Expr::Undefined
            | Expr::Ident(_) => {}
            Expr::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Subst(e) = part {
                        self.expr(e, depth);
                    }
                }
            }
            Expr::Array(items) => self.args(items, depth),
            Expr::Object(fields) => {
                for (_, value) in fields {
                    self.expr(value, depth);
                }
            }
            Expr::Function(def) => self.function(def, depth),
            Expr::Member {
                object, property, ..
            } => {
                self.expr(object, depth);
                if let PropKey::Computed(key) = property {
                    self.expr(key, depth);
                }
            }
            Expr::Call { callee, args } => {
                if let Expr::Ident(name) = callee.as_ref() {
                    self.call(name);
                }
                self.expr(callee, depth);
                self.args(args, depth);
            }
            Expr::New { args, .. } => self.args(args, depth),
            Expr::Unary { operand, .. } => self.expr(operand, depth),
            Expr::Update { target, .. } => self.expr(target, depth),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.expr(left, depth);
                self.expr(right, depth);
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test, depth);
                self.expr(consequent, depth);
                self.expr(alternate, depth);
            }
            Expr::Assign { target, value, .. } => {
                self.expr(target, depth);
                self.expr(value, depth);
            }
        }
    }

    fn call(&mut self, name: &str) {
        match name {
            "setInterval" => {
                self.interval_calls += 1;
                if self.loop_depth > 0 {
                    self.push(
                        ValidationSeverity::Warning,
                        format!(
                            "setInterval inside a loop; at most {} intervals may be live",
                            self.options.max_intervals
                        ),
                    );
                }
            }
            "alert" | "confirm" | "prompt" if !self.options.interactive => {
                self.push(
                    ValidationSeverity::Warning,
                    format!("{} will be answered automatically", name),
                );
            }
            _ => {}
        }
    }
}

fn always_true(test: &Expr) -> bool {
    match test {
        Expr::Bool(b) => *b,
        Expr::Number(n) => *n != 0.0 && !n.is_nan(),
        Expr::Str(s) => !s.is_empty(),
        _ => false,
    }
}

/// Whether a loop body contains a way out of that loop
fn exits(body: &Stmt) -> bool {
    match body {
        Stmt::Break | Stmt::Return(_) | Stmt::Throw(_) => true,
        Stmt::Block(body) => body.iter().any(exits),
        Stmt::If {
            consequent,
            alternate,
            ..
        } => exits(consequent) || alternate.as_deref().is_some_and(exits),
        Stmt::Try {
            block,
            handler,
            finalizer,
        } => {
            block.iter().any(exits)
                || handler.as_ref().is_some_and(|h| h.body.iter().any(exits))
                || finalizer.as_ref().is_some_and(|f| f.iter().any(exits))
        }
        _ => false,
    }
}

/// One line per top-level statement
pub fn outline(program: &Program) -> Vec<String> {
    program
        .body
        .iter()
        .enumerate()
        .map(|(i, stmt)| format!("{}. {}", i + 1, describe(stmt)))
        .collect()
}

fn describe(stmt: &Stmt) -> String {
    match stmt {
        Stmt::Declare(d) => {
            let names: Vec<&str> = d.bindings.iter().map(|b| b.name.as_str()).collect();
            format!("{} {}", d.kind, names.join(", "))
        }
        Stmt::Function(def) => format!("function {}({})", def.display_name(), def.params.join(", ")),
        Stmt::Expr(Expr::Call { callee, args }) => match callee.as_ref() {
            Expr::Ident(name) => format!("call {} ({} arguments)", name, args.len()),
            Expr::Member {
                property: PropKey::Named(method),
                object,
                ..
            } => match object.as_ref() {
                Expr::Ident(target) => format!("call {}.{} ({} arguments)", target, method, args.len()),
                _ => format!("call .{} ({} arguments)", method, args.len()),
            },
            _ => "call".to_string(),
        },
        Stmt::Expr(Expr::Assign { .. }) => "assignment".to_string(),
        Stmt::Expr(_) => "expression".to_string(),
        Stmt::Block(body) => format!("block ({} statements)", body.len()),
        Stmt::If { alternate, .. } => {
            if alternate.is_some() {
                "if/else".to_string()
            } else {
                "if".to_string()
            }
        }
        Stmt::For { .. } => "for loop".to_string(),
        Stmt::ForOf { binding, .. } => format!("for...of loop over {}", binding),
        Stmt::While { .. } => "while loop".to_string(),
        Stmt::DoWhile { .. } => "do...while loop".to_string(),
        Stmt::Try { handler, finalizer, .. } => {
            let mut out = "try".to_string();
            if handler.is_some() {
                out.push_str("/catch");
            }
            if finalizer.is_some() {
                out.push_str("/finally");
            }
            out
        }
        Stmt::Return(_) => "return".to_string(),
        Stmt::Throw(_) => "throw".to_string(),
        Stmt::Break => "break".to_string(),
        Stmt::Continue => "continue".to_string(),
        Stmt::Empty => "empty statement".to_string(),
        Stmt::StepCheck => "step check".to_string(),
    }
}
