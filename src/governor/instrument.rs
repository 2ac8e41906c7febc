//! Structural loop instrumentation

use std::rc::Rc;

use crate::parser::ast::*;

/// An instrumented program and how many loop bodies were rewritten
#[derive(Debug, Clone, PartialEq)]
pub struct Instrumented {
    pub program: Program,
    pub loops: usize,
}

/// Insert a step check at the top of every loop body in the program,
/// including loops inside nested functions, arrows and object literals.
pub fn instrument(program: Program) -> Instrumented {
    let mut rewriter = Rewriter { loops: 0 };
    let body = rewriter.stmts(program.body);
    Instrumented {
        program: Program { body },
        loops: rewriter.loops,
    }
}

struct Rewriter {
    loops: usize,
}

impl Rewriter {
    fn stmts(&mut self, body: Vec<Stmt>) -> Vec<Stmt> {
        body.into_iter().map(|s| self.stmt(s)).collect()
    }

    fn stmt(&mut self, stmt: Stmt) -> Stmt {
        match stmt {
            Stmt::Expr(e) => Stmt::Expr(self.expr(e)),
            Stmt::Declare(d) => Stmt::Declare(self.declaration(d)),
            Stmt::Function(def) => Stmt::Function(self.function(def)),
            Stmt::Block(body) => Stmt::Block(self.stmts(body)),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => Stmt::If {
                test: self.expr(test),
                consequent: Box::new(self.stmt(*consequent)),
                alternate: alternate.map(|a| Box::new(self.stmt(*a))),
            },
            Stmt::For {
                init,
                test,
                update,
                body,
            } => Stmt::For {
                init: init.map(|init| match init {
                    ForInit::Declare(d) => ForInit::Declare(self.declaration(d)),
                    ForInit::Expr(e) => ForInit::Expr(self.expr(e)),
                }),
                test: test.map(|e| self.expr(e)),
                update: update.map(|e| self.expr(e)),
                body: self.loop_body(*body),
            },
            Stmt::ForOf {
                kind,
                binding,
                iteration,
                iterable,
                body,
            } => Stmt::ForOf {
                kind,
                binding,
                iteration,
                iterable: self.expr(iterable),
                body: self.loop_body(*body),
            },
            Stmt::While { test, body } => Stmt::While {
                test: self.expr(test),
                body: self.loop_body(*body),
            },
            Stmt::DoWhile { body, test } => Stmt::DoWhile {
                body: self.loop_body(*body),
                test: self.expr(test),
            },
            Stmt::Try {
                block,
                handler,
                finalizer,
            } => Stmt::Try {
                block: self.stmts(block),
                handler: handler.map(|h| CatchClause {
                    param: h.param,
                    body: self.stmts(h.body),
                }),
                finalizer: finalizer.map(|f| self.stmts(f)),
            },
            Stmt::Return(value) => Stmt::Return(value.map(|e| self.expr(e))),
            Stmt::Throw(e) => Stmt::Throw(self.expr(e)),
            other @ (Stmt::Break | Stmt::Continue | Stmt::Empty | Stmt::StepCheck) => other,
        }
    }

    /// Normalize a loop body into a block that starts with a step check
    fn loop_body(&mut self, body: Stmt) -> Box<Stmt> {
        self.loops += 1;
        let mut stmts = match body {
            Stmt::Block(inner) => self.stmts(inner),
            single => vec![self.stmt(single)],
        };
        stmts.insert(0, Stmt::StepCheck);
        Box::new(Stmt::Block(stmts))
    }

    fn declaration(&mut self, decl: Declaration) -> Declaration {
        Declaration {
            kind: decl.kind,
            bindings: decl
                .bindings
                .into_iter()
                .map(|b| Binding {
                    name: b.name,
                    init: b.init.map(|e| self.expr(e)),
                })
                .collect(),
        }
    }

    fn function(&mut self, def: Rc<FunctionDef>) -> Rc<FunctionDef> {
        let FunctionDef {
            name,
            params,
            rest,
            body,
            is_arrow,
        } = Rc::unwrap_or_clone(def);

        let body = match body {
            FunctionBody::Block(stmts) => FunctionBody::Block(self.stmts(stmts)),
            FunctionBody::Expr(e) => FunctionBody::Expr(Box::new(self.expr(*e))),
        };

        Rc::new(FunctionDef {
            name,
            params,
            rest,
            body,
            is_arrow,
        })
    }

    fn args(&mut self, args: Vec<Arg>) -> Vec<Arg> {
        args.into_iter()
            .map(|arg| match arg {
                Arg::Expr(e) => Arg::Expr(self.expr(e)),
                Arg::Spread(e) => Arg::Spread(self.expr(e)),
            })
            .collect()
    }

    fn boxed(&mut self, e: Box<Expr>) -> Box<Expr> {
        Box::new(self.expr(*e))
    }

    fn expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Template(parts) => Expr::Template(
                parts
                    .into_iter()
                    .map(|p| match p {
                        TemplatePart::Subst(e) => TemplatePart::Subst(self.expr(e)),
                        text => text,
                    })
                    .collect(),
            ),
            Expr::Array(items) => Expr::Array(self.args(items)),
            Expr::Object(props) => Expr::Object(
                props
                    .into_iter()
                    .map(|(key, value)| (key, self.expr(value)))
                    .collect(),
            ),
            Expr::Function(def) => Expr::Function(self.function(def)),
            Expr::Member {
                object,
                property,
                optional,
            } => Expr::Member {
                object: self.boxed(object),
                property: match property {
                    PropKey::Computed(e) => PropKey::Computed(self.boxed(e)),
                    named => named,
                },
                optional,
            },
            Expr::Call { callee, args } => Expr::Call {
                callee: self.boxed(callee),
                args: self.args(args),
            },
            Expr::New { callee, args } => Expr::New {
                callee,
                args: self.args(args),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: self.boxed(operand),
            },
            Expr::Update { op, prefix, target } => Expr::Update {
                op,
                prefix,
                target: self.boxed(target),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: self.boxed(left),
                right: self.boxed(right),
            },
            Expr::Logical { op, left, right } => Expr::Logical {
                op,
                left: self.boxed(left),
                right: self.boxed(right),
            },
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => Expr::Conditional {
                test: self.boxed(test),
                consequent: self.boxed(consequent),
                alternate: self.boxed(alternate),
            },
            Expr::Assign { op, target, value } => Expr::Assign {
                op,
                target: self.boxed(target),
                value: self.boxed(value),
            },
            leaf => leaf,
        }
    }
}
