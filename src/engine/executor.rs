//! Tree-walking interpreter

use std::rc::Rc;

use indexmap::IndexMap;
use thiserror::Error;

use super::builtins;
use super::environment::Environment;
use super::scope::{self, AssignError, Scope, ScopeRef};
use super::value::{Function, Object, ObjectKind, Value};
use crate::governor::{BudgetExceeded, GovernorConfig, InstrumentMode, RunSession, StepOutcome};
use crate::parser::ast::*;
use crate::protocol::ConsoleMethod;

/// Deepest closure nesting before a `RangeError` is thrown
pub const MAX_CALL_DEPTH: usize = 200;

/// Deepest nesting of statements and expressions being evaluated at once
pub const MAX_EVAL_DEPTH: usize = 600;

/// Ways a script can stop abruptly
#[derive(Error, Debug, Clone)]
pub enum ScriptError {
    /// A value thrown by the script or a builtin; catchable
    #[error("{0}")]
    Thrown(Value),

    /// The step budget ran out; never catchable
    #[error("{error}")]
    StepBudget { error: BudgetExceeded, stack: String },

    /// The host discarded the context
    #[error("isolated context was torn down")]
    TornDown,
}

impl ScriptError {
    /// Message and stack as reported in an `error` message
    pub fn describe(&self) -> (String, Option<String>) {
        match self {
            ScriptError::Thrown(Value::Object(obj)) if obj.borrow().kind == ObjectKind::Error => {
                let obj = obj.borrow();
                let message = obj
                    .props
                    .get("message")
                    .map(|v| v.to_display_string())
                    .unwrap_or_default();
                let stack = match obj.props.get("stack") {
                    Some(Value::Str(s)) => Some(s.clone()),
                    _ => None,
                };
                (message, stack)
            }
            ScriptError::Thrown(value) => (value.to_display_string(), None),
            ScriptError::StepBudget { error, stack } => (error.to_string(), Some(stack.clone())),
            ScriptError::TornDown => (self.to_string(), None),
        }
    }
}

/// How a statement finished
#[derive(Debug, Clone)]
pub enum Completion {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Assignable location
enum Place {
    Var(String),
    Prop(Value, String),
}

pub struct Interpreter<'env> {
    env: &'env mut dyn Environment,
    session: RunSession,
    config: GovernorConfig,
    call_stack: Vec<String>,
    depth: usize,
}

impl<'env> Interpreter<'env> {
    /// Create an interpreter with a fresh step session
    pub fn new(env: &'env mut dyn Environment, config: GovernorConfig) -> Self {
        Self {
            env,
            session: RunSession::new(config.clone()),
            config,
            call_stack: Vec::new(),
            depth: 0,
        }
    }

    pub fn env(&mut self) -> &mut (dyn Environment + 'env) {
        &mut *self.env
    }

    /// Active closures, outermost first
    pub fn call_stack(&self) -> &[String] {
        &self.call_stack
    }

    pub fn steps(&self) -> u64 {
        self.session.steps()
    }

    /// Build the global scope every run starts from
    pub fn global_scope(&self) -> ScopeRef {
        let globals = Scope::root();
        builtins::install(
            &mut globals.borrow_mut(),
            self.config.mode == InstrumentMode::Textual,
        );
        globals
    }

    /// Execute a whole program; its value is that of a top-level `return`
    pub fn run_program(&mut self, program: &Program) -> Result<Value, ScriptError> {
        let globals = self.global_scope();
        let scope = Scope::child(&globals);
        self.hoist(&program.body, &scope);

        for stmt in &program.body {
            match self.exec(stmt, &scope)? {
                Completion::Normal => {}
                Completion::Return(value) => return Ok(value),
                Completion::Break | Completion::Continue => {
                    return Err(self.throw("SyntaxError", "Illegal break or continue statement"));
                }
            }
        }

        Ok(Value::Undefined)
    }

    // ========================================================================
    // Governor hooks
    // ========================================================================

    /// One governed loop iteration
    pub fn step(&mut self) -> Result<(), ScriptError> {
        if self.env.is_torn_down() {
            return Err(ScriptError::TornDown);
        }
        match self.session.check() {
            Ok(StepOutcome::Continue) => Ok(()),
            Ok(StepOutcome::Warn(message)) => {
                tracing::debug!(steps = self.session.steps(), "soft time limit passed");
                self.console(ConsoleMethod::Warn, vec![Value::from(message)])
            }
            Err(error) => Err(ScriptError::StepBudget {
                error,
                stack: format!("Error: {}\n{}", error, self.stack_trace()),
            }),
        }
    }

    pub fn console(&mut self, method: ConsoleMethod, args: Vec<Value>) -> Result<(), ScriptError> {
        self.env.console(method, args, &self.call_stack)
    }

    // ========================================================================
    // Errors
    // ========================================================================

    pub fn stack_trace(&self) -> String {
        format_stack(&self.call_stack)
    }

    /// Create an error object of the given constructor name
    pub fn make_error(&self, name: &str, message: impl Into<String>) -> Value {
        let message = message.into();
        let header = if message.is_empty() {
            name.to_string()
        } else {
            format!("{}: {}", name, message)
        };

        let mut props = IndexMap::new();
        props.insert("name".to_string(), Value::from(name));
        props.insert("message".to_string(), Value::from(message));
        props.insert(
            "stack".to_string(),
            Value::from(format!("{}\n{}", header, self.stack_trace())),
        );

        Value::Object(Rc::new(std::cell::RefCell::new(Object {
            props,
            kind: ObjectKind::Error,
        })))
    }

    pub fn throw(&self, name: &str, message: impl Into<String>) -> ScriptError {
        ScriptError::Thrown(self.make_error(name, message))
    }

    pub fn type_error(&self, message: impl Into<String>) -> ScriptError {
        self.throw("TypeError", message)
    }

    fn reference_error(&self, name: &str) -> ScriptError {
        self.throw("ReferenceError", format!("{} is not defined", name))
    }

    // ========================================================================
    // Functions
    // ========================================================================

    fn closure(def: &Rc<FunctionDef>, scope: &ScopeRef) -> Value {
        Value::Function(Rc::new(Function::Closure {
            def: Rc::clone(def),
            scope: Rc::clone(scope),
        }))
    }

    /// Declare function declarations before the statements run
    fn hoist(&self, body: &[Stmt], scope: &ScopeRef) {
        for stmt in body {
            if let Stmt::Function(def) = stmt {
                let value = Self::closure(def, scope);
                scope
                    .borrow_mut()
                    .declare(def.display_name(), value, true);
            }
        }
    }

    /// Invoke a function value
    pub fn call_function(
        &mut self,
        callee: &Value,
        this: Value,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        let Value::Function(func) = callee else {
            return Err(self.type_error(format!(
                "{} is not a function",
                callee.to_display_string()
            )));
        };
        if self.env.is_torn_down() {
            return Err(ScriptError::TornDown);
        }

        match func.as_ref() {
            Function::Native { name, func } => func(self, *name, this, args),
            Function::Closure { def, scope } => {
                if self.call_stack.len() >= MAX_CALL_DEPTH {
                    return Err(self.throw("RangeError", "Maximum call stack size exceeded"));
                }

                let fn_scope = Scope::child(scope);
                {
                    let mut s = fn_scope.borrow_mut();
                    if let Some(name) = &def.name {
                        s.declare(name.clone(), callee.clone(), true);
                    }
                    if !def.is_arrow {
                        s.declare("this", this, false);
                    }
                    let mut args = args.into_iter();
                    for param in &def.params {
                        s.declare(param.clone(), args.next().unwrap_or(Value::Undefined), true);
                    }
                    if let Some(rest) = &def.rest {
                        s.declare(rest.clone(), Value::array(args.collect()), true);
                    }
                }

                self.call_stack.push(def.display_name().to_string());
                let result = match &def.body {
                    FunctionBody::Expr(expr) => self.eval(expr, &fn_scope),
                    FunctionBody::Block(body) => {
                        self.hoist(body, &fn_scope);
                        self.exec_stmts(body, &fn_scope).map(|c| match c {
                            Completion::Return(value) => value,
                            _ => Value::Undefined,
                        })
                    }
                };
                self.call_stack.pop();
                result
            }
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn exec_stmts(&mut self, body: &[Stmt], scope: &ScopeRef) -> Result<Completion, ScriptError> {
        for stmt in body {
            let completion = self.exec(stmt, scope)?;
            if !matches!(completion, Completion::Normal) {
                return Ok(completion);
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_block(&mut self, body: &[Stmt], scope: &ScopeRef) -> Result<Completion, ScriptError> {
        let inner = Scope::child(scope);
        self.hoist(body, &inner);
        self.exec_stmts(body, &inner)
    }

    /// Count one level of evaluation nesting
    fn enter(&mut self) -> Result<(), ScriptError> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(self.throw("RangeError", "Maximum call stack size exceeded"));
        }
        self.depth += 1;
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt, scope: &ScopeRef) -> Result<Completion, ScriptError> {
        self.enter()?;
        let completion = self.exec_stmt(stmt, scope);
        self.depth -= 1;
        completion
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &ScopeRef) -> Result<Completion, ScriptError> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Completion::Normal)
            }
            Stmt::Declare(decl) => {
                self.declare(decl, scope)?;
                Ok(Completion::Normal)
            }
            Stmt::Function(_) => Ok(Completion::Normal),
            Stmt::Block(body) => self.exec_block(body, scope),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.exec(consequent, scope)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate, scope)
                } else {
                    Ok(Completion::Normal)
                }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => self.exec_for(init.as_ref(), test.as_ref(), update.as_ref(), body, scope),
            Stmt::ForOf {
                kind,
                binding,
                iteration,
                iterable,
                body,
            } => self.exec_for_of(*kind, binding, *iteration, iterable, body, scope),
            Stmt::While { test, body } => {
                while self.eval(test, scope)?.truthy() {
                    match self.exec(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::DoWhile { body, test } => {
                loop {
                    match self.exec(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if !self.eval(test, scope)?.truthy() {
                        break;
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::Try {
                block,
                handler,
                finalizer,
            } => self.exec_try(block, handler.as_ref(), finalizer.as_deref(), scope),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            Stmt::Throw(expr) => Err(ScriptError::Thrown(self.eval(expr, scope)?)),
            Stmt::Break => Ok(Completion::Break),
            Stmt::Continue => Ok(Completion::Continue),
            Stmt::Empty => Ok(Completion::Normal),
            Stmt::StepCheck => {
                self.step()?;
                Ok(Completion::Normal)
            }
        }
    }

    fn declare(&mut self, decl: &Declaration, scope: &ScopeRef) -> Result<(), ScriptError> {
        for binding in &decl.bindings {
            let value = match &binding.init {
                Some(expr) => self.eval(expr, scope)?,
                None => Value::Undefined,
            };
            if decl.kind != DeclKind::Var && scope.borrow().has_own(&binding.name) {
                return Err(self.throw(
                    "SyntaxError",
                    format!("Identifier '{}' has already been declared", binding.name),
                ));
            }
            scope
                .borrow_mut()
                .declare(binding.name.clone(), value, decl.kind.is_mutable());
        }
        Ok(())
    }

    fn exec_for(
        &mut self,
        init: Option<&ForInit>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        scope: &ScopeRef,
    ) -> Result<Completion, ScriptError> {
        let loop_scope = Scope::child(scope);

        // `let` bindings get a fresh copy per iteration so closures see
        // the value of their own iteration.
        let mut per_iteration = Vec::new();
        match init {
            Some(ForInit::Declare(decl)) => {
                self.declare(decl, &loop_scope)?;
                if decl.kind != DeclKind::Var {
                    per_iteration = decl
                        .bindings
                        .iter()
                        .map(|b| (b.name.clone(), decl.kind.is_mutable()))
                        .collect();
                }
            }
            Some(ForInit::Expr(expr)) => {
                self.eval(expr, &loop_scope)?;
            }
            None => {}
        }

        let mut current = loop_scope;
        loop {
            if let Some(test) = test {
                if !self.eval(test, &current)?.truthy() {
                    break;
                }
            }

            match self.exec(body, &current)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }

            if !per_iteration.is_empty() {
                let next = Scope::child(scope);
                for (name, mutable) in &per_iteration {
                    let value = scope::lookup(&current, name).unwrap_or(Value::Undefined);
                    next.borrow_mut().declare(name.clone(), value, *mutable);
                }
                current = next;
            }

            if let Some(update) = update {
                self.eval(update, &current)?;
            }
        }

        Ok(Completion::Normal)
    }

    fn exec_for_of(
        &mut self,
        kind: DeclKind,
        binding: &str,
        iteration: Iteration,
        iterable: &Expr,
        body: &Stmt,
        scope: &ScopeRef,
    ) -> Result<Completion, ScriptError> {
        let source = self.eval(iterable, scope)?;

        let items: Vec<Value> = match (iteration, &source) {
            (Iteration::Of, Value::Array(items)) => items.borrow().clone(),
            (Iteration::Of, Value::Str(s)) => s.chars().map(|c| Value::from(c.to_string())).collect(),
            (Iteration::Of, _) => {
                return Err(self.type_error(format!("{} is not iterable", describe(iterable))));
            }
            (Iteration::In, Value::Array(items)) => (0..items.borrow().len())
                .map(|i| Value::from(i.to_string()))
                .collect(),
            (Iteration::In, Value::Object(obj)) => obj
                .borrow()
                .props
                .keys()
                .map(|k| Value::from(k.as_str()))
                .collect(),
            (Iteration::In, Value::Str(s)) => (0..s.chars().count())
                .map(|i| Value::from(i.to_string()))
                .collect(),
            (Iteration::In, _) => Vec::new(),
        };

        for item in items {
            let iter_scope = Scope::child(scope);
            iter_scope
                .borrow_mut()
                .declare(binding, item, kind.is_mutable());
            match self.exec(body, &iter_scope)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
        }

        Ok(Completion::Normal)
    }

    fn exec_try(
        &mut self,
        block: &[Stmt],
        handler: Option<&CatchClause>,
        finalizer: Option<&[Stmt]>,
        scope: &ScopeRef,
    ) -> Result<Completion, ScriptError> {
        let outcome = match (self.exec_block(block, scope), handler) {
            (Err(ScriptError::Thrown(value)), Some(handler)) => {
                let catch_scope = Scope::child(scope);
                if let Some(param) = &handler.param {
                    catch_scope
                        .borrow_mut()
                        .declare(param.clone(), value, true);
                }
                self.exec_block(&handler.body, &catch_scope)
            }
            (outcome, _) => outcome,
        };

        // Budget exhaustion and teardown skip `finally` as well as `catch`.
        if matches!(
            outcome,
            Err(ScriptError::StepBudget { .. } | ScriptError::TornDown)
        ) {
            return outcome;
        }

        if let Some(finalizer) = finalizer {
            match self.exec_block(finalizer, scope)? {
                Completion::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }

        outcome
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub fn eval(&mut self, expr: &Expr, scope: &ScopeRef) -> Result<Value, ScriptError> {
        self.enter()?;
        let value = self.eval_expr(expr, scope);
        self.depth -= 1;
        value
    }

    fn eval_expr(&mut self, expr: &Expr, scope: &ScopeRef) -> Result<Value, ScriptError> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Subst(expr) => {
                            out.push_str(&self.eval(expr, scope)?.to_display_string())
                        }
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::Ident(name) => match scope::lookup(scope, name) {
                Some(value) => Ok(value),
                None if name == "this" => Ok(Value::Undefined),
                None => Err(self.reference_error(name)),
            },
            Expr::Array(items) => Ok(Value::array(self.eval_args(items, scope)?)),
            Expr::Object(props) => {
                let mut map = IndexMap::new();
                for (key, expr) in props {
                    let value = self.eval(expr, scope)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::object(map))
            }
            Expr::Function(def) => Ok(Self::closure(def, scope)),
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let target = self.eval(object, scope)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.property_key(property, scope)?;
                self.get_property(&target, &key)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, scope),
            Expr::New { callee, args } => self.eval_new(callee, args, scope),
            Expr::Unary { op, operand } => self.eval_unary(*op, operand, scope),
            Expr::Update { op, prefix, target } => {
                let place = self.place(target, scope)?;
                let old = self.read_place(&place, scope)?.to_number();
                let new = match op {
                    UpdateOp::Inc => old + 1.0,
                    UpdateOp::Dec => old - 1.0,
                };
                self.write_place(place, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            Expr::Assign { op, target, value } => {
                let place = self.place(target, scope)?;
                let new = match op.binary() {
                    None => self.eval(value, scope)?,
                    Some(bin) => {
                        let current = self.read_place(&place, scope)?;
                        let rhs = self.eval(value, scope)?;
                        binary(bin, &current, &rhs)
                    }
                };
                self.write_place(place, new.clone(), scope)?;
                Ok(new)
            }
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, scope: &ScopeRef) -> Result<Value, ScriptError> {
        if op == UnaryOp::TypeOf {
            if let Expr::Ident(name) = operand {
                if scope::lookup(scope, name).is_none() {
                    return Ok(Value::from("undefined"));
                }
            }
        }

        let value = self.eval(operand, scope)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.truthy()),
            UnaryOp::Neg => Value::Number(-value.to_number()),
            UnaryOp::Plus => Value::Number(value.to_number()),
            UnaryOp::TypeOf => Value::from(value.type_of()),
            // Dialogs already block until answered
            UnaryOp::Await => value,
        })
    }

    fn eval_args(&mut self, args: &[Arg], scope: &ScopeRef) -> Result<Vec<Value>, ScriptError> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Arg::Expr(expr) => out.push(self.eval(expr, scope)?),
                Arg::Spread(expr) => match self.eval(expr, scope)? {
                    Value::Array(items) => out.extend(items.borrow().iter().cloned()),
                    Value::Str(s) => out.extend(s.chars().map(|c| Value::from(c.to_string()))),
                    _ => {
                        return Err(self.type_error(format!("{} is not iterable", describe(expr))));
                    }
                },
            }
        }
        Ok(out)
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Arg], scope: &ScopeRef) -> Result<Value, ScriptError> {
        let (func, this) = match callee {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let target = self.eval(object, scope)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.property_key(property, scope)?;
                (self.get_property(&target, &key)?, target)
            }
            other => (self.eval(other, scope)?, Value::Undefined),
        };

        let args = self.eval_args(args, scope)?;
        if !func.is_function() {
            return Err(self.type_error(format!("{} is not a function", describe(callee))));
        }
        self.call_function(&func, this, args)
    }

    fn eval_new(&mut self, callee: &str, args: &[Arg], scope: &ScopeRef) -> Result<Value, ScriptError> {
        let ctor = scope::lookup(scope, callee).ok_or_else(|| self.reference_error(callee))?;
        let args = self.eval_args(args, scope)?;

        match &ctor {
            Value::Function(func) if matches!(func.as_ref(), Function::Closure { .. }) => {
                let instance = Value::object(IndexMap::new());
                let result = self.call_function(&ctor, instance.clone(), args)?;
                Ok(match result {
                    Value::Object(_) | Value::Array(_) => result,
                    _ => instance,
                })
            }
            Value::Function(_) => self.call_function(&ctor, Value::Undefined, args),
            _ => Err(self.type_error(format!("{} is not a constructor", callee))),
        }
    }

    fn property_key(&mut self, property: &PropKey, scope: &ScopeRef) -> Result<String, ScriptError> {
        match property {
            PropKey::Named(name) => Ok(name.clone()),
            PropKey::Computed(expr) => Ok(self.eval(expr, scope)?.to_property_key()),
        }
    }

    /// Read `target[key]`, including builtin methods of primitives and arrays
    pub fn get_property(&self, target: &Value, key: &str) -> Result<Value, ScriptError> {
        match target {
            Value::Undefined | Value::Null => Err(self.type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                target.to_display_string(),
                key
            ))),
            Value::Str(s) => {
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                if let Some(index) = array_index(key) {
                    return Ok(s
                        .chars()
                        .nth(index)
                        .map(|c| Value::from(c.to_string()))
                        .unwrap_or(Value::Undefined));
                }
                Ok(builtins::string_method(key).unwrap_or(Value::Undefined))
            }
            Value::Array(items) => {
                if key == "length" {
                    return Ok(Value::Number(items.borrow().len() as f64));
                }
                if let Some(index) = array_index(key) {
                    return Ok(items.borrow().get(index).cloned().unwrap_or(Value::Undefined));
                }
                Ok(builtins::array_method(key).unwrap_or(Value::Undefined))
            }
            Value::Object(obj) => Ok(obj
                .borrow()
                .props
                .get(key)
                .cloned()
                .unwrap_or(Value::Undefined)),
            Value::Number(_) => Ok(builtins::number_method(key).unwrap_or(Value::Undefined)),
            Value::Function(func) if key == "name" => Ok(Value::from(func.name())),
            Value::Bool(_) | Value::Function(_) => Ok(Value::Undefined),
        }
    }

    fn set_property(&self, target: &Value, key: String, value: Value) -> Result<(), ScriptError> {
        match target {
            Value::Undefined | Value::Null => Err(self.type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                target.to_display_string(),
                key
            ))),
            Value::Array(items) => {
                let mut items = items.borrow_mut();
                let index = if key == "length" {
                    let n = value.to_number();
                    if n < 0.0 || n.fract() != 0.0 || n > MAX_ARRAY_GROWTH as f64 {
                        return Err(self.throw("RangeError", "Invalid array length"));
                    }
                    items.resize(n as usize, Value::Undefined);
                    return Ok(());
                } else if let Some(index) = array_index(&key) {
                    index
                } else {
                    return Ok(());
                };
                if index >= items.len() {
                    if index > items.len() + MAX_ARRAY_GROWTH {
                        return Err(self.throw("RangeError", "Invalid array length"));
                    }
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
                Ok(())
            }
            Value::Object(obj) => {
                obj.borrow_mut().props.insert(key, value);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn place(&mut self, target: &Expr, scope: &ScopeRef) -> Result<Place, ScriptError> {
        match target {
            Expr::Ident(name) => Ok(Place::Var(name.clone())),
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, scope)?;
                let key = self.property_key(property, scope)?;
                Ok(Place::Prop(object, key))
            }
            _ => Err(self.throw("SyntaxError", "Invalid left-hand side in assignment")),
        }
    }

    fn read_place(&self, place: &Place, scope: &ScopeRef) -> Result<Value, ScriptError> {
        match place {
            Place::Var(name) => scope::lookup(scope, name).ok_or_else(|| self.reference_error(name)),
            Place::Prop(object, key) => self.get_property(object, key),
        }
    }

    fn write_place(&self, place: Place, value: Value, scope: &ScopeRef) -> Result<(), ScriptError> {
        match place {
            Place::Var(name) => scope::assign(scope, &name, value).map_err(|e| match e {
                AssignError::Constant => self.type_error("Assignment to constant variable."),
                AssignError::Undeclared => self.reference_error(&name),
            }),
            Place::Prop(object, key) => self.set_property(&object, key, value),
        }
    }
}

/// `    at f` lines, innermost first, for a stack listed outermost first
pub fn format_stack(stack: &[String]) -> String {
    stack
        .iter()
        .rev()
        .map(String::as_str)
        .chain(std::iter::once("<script>"))
        .map(|name| format!("    at {}", name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Largest jump past the end of an array a single write may make
const MAX_ARRAY_GROWTH: usize = 1 << 20;

fn array_index(key: &str) -> Option<usize> {
    let index: usize = key.parse().ok()?;
    (index.to_string() == key).then_some(index)
}

/// Source-like rendering of an expression for error messages
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member {
            object,
            property: PropKey::Named(name),
            ..
        } => format!("{}.{}", describe(object), name),
        Expr::Member { object, .. } => format!("{}[...]", describe(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        Expr::Str(s) => format!("\"{}\"", s),
        Expr::Number(n) => super::value::number_to_string(*n),
        _ => "expression".to_string(),
    }
}

fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) | Value::Function(_) => {
            Value::Str(value.to_display_string())
        }
        other => other.clone(),
    }
}

/// Apply a binary operator
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            let l = to_primitive(left);
            let r = to_primitive(right);
            if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
                Value::Str(format!("{}{}", l.to_display_string(), r.to_display_string()))
            } else {
                Value::Number(l.to_number() + r.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let l = to_primitive(left);
            let r = to_primitive(right);
            let ordering = match (&l, &r) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => l.to_number().partial_cmp(&r.to_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::LooseEq => Value::Bool(left.loose_equals(right)),
        BinaryOp::LooseNe => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_equals(right)),
    }
}
