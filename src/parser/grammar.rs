//! Pest grammar parser for corral scripts

use std::rc::Rc;
use std::sync::OnceLock;

use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;

use super::nesting::{check_source, check_tree};
use crate::error::{CorralError, Result};
use crate::parser::ast::*;

#[derive(Parser)]
#[grammar = "../grammar/corral.pest"]
pub struct CorralParser;

/// Parse a script into an AST
pub fn parse_program(input: &str) -> Result<Program> {
    check_source(input)?;
    let mut pairs = CorralParser::parse(Rule::program, input)
        .map_err(|e| CorralError::Syntax(e.to_string()))?;

    let program = pairs.next().ok_or_else(|| syntax("empty input"))?;
    check_tree(program.clone())?;

    let mut body = Vec::new();
    for pair in program.into_inner() {
        if pair.as_rule() == Rule::EOI {
            continue;
        }
        body.push(build_stmt(pair)?);
    }

    Ok(Program { body })
}

fn syntax(message: impl Into<String>) -> CorralError {
    CorralError::Syntax(message.into())
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_async
            | Rule::kw_break
            | Rule::kw_catch
            | Rule::kw_continue
            | Rule::kw_do
            | Rule::kw_else
            | Rule::kw_finally
            | Rule::kw_for
            | Rule::kw_function
            | Rule::kw_if
            | Rule::kw_new
            | Rule::kw_return
            | Rule::kw_throw
            | Rule::kw_try
            | Rule::kw_while
    )
}

/// Inner pairs with keyword tokens dropped
fn children(pair: Pair<'_, Rule>) -> impl Iterator<Item = Pair<'_, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn next_child<'i>(
    iter: &mut impl Iterator<Item = Pair<'i, Rule>>,
    what: &str,
) -> Result<Pair<'i, Rule>> {
    iter.next().ok_or_else(|| syntax(format!("Expected {}", what)))
}

// ============================================================================
// Statements
// ============================================================================

fn build_stmt(pair: Pair<'_, Rule>) -> Result<Stmt> {
    match pair.as_rule() {
        Rule::block => Ok(Stmt::Block(build_block(pair)?)),
        Rule::function_decl => Ok(Stmt::Function(Rc::new(build_function(pair, false)?))),
        Rule::if_stmt => build_if(pair),
        Rule::for_stmt => build_for(pair),
        Rule::for_of_stmt => build_for_of(pair),
        Rule::while_stmt => {
            let mut inner = children(pair);
            let test = build_expr(next_child(&mut inner, "condition in while")?)?;
            let body = build_stmt(next_child(&mut inner, "body in while")?)?;
            Ok(Stmt::While {
                test,
                body: Box::new(body),
            })
        }
        Rule::do_while_stmt => {
            let mut inner = children(pair);
            let body = build_stmt(next_child(&mut inner, "body in do-while")?)?;
            let test = build_expr(next_child(&mut inner, "condition in do-while")?)?;
            Ok(Stmt::DoWhile {
                body: Box::new(body),
                test,
            })
        }
        Rule::try_stmt => build_try(pair),
        Rule::empty_stmt => Ok(Stmt::Empty),
        Rule::return_stmt => {
            let value = children(pair).next().map(build_expr).transpose()?;
            Ok(Stmt::Return(value))
        }
        Rule::break_stmt => Ok(Stmt::Break),
        Rule::continue_stmt => Ok(Stmt::Continue),
        Rule::throw_stmt => {
            let value = next_child(&mut children(pair), "expression after throw")?;
            Ok(Stmt::Throw(build_expr(value)?))
        }
        Rule::var_decl => Ok(Stmt::Declare(build_declaration(pair)?)),
        Rule::expr_stmt => {
            let expr = next_child(&mut pair.into_inner(), "expression")?;
            Ok(Stmt::Expr(build_expr(expr)?))
        }
        rule => Err(syntax(format!("Unexpected rule in statement: {:?}", rule))),
    }
}

fn build_block(pair: Pair<'_, Rule>) -> Result<Vec<Stmt>> {
    pair.into_inner().map(build_stmt).collect()
}

fn build_declaration(pair: Pair<'_, Rule>) -> Result<Declaration> {
    let mut inner = pair.into_inner();
    let kind = build_decl_kind(next_child(&mut inner, "let, const or var")?)?;

    let mut bindings = Vec::new();
    for declarator in inner {
        let mut parts = declarator.into_inner();
        let name = next_child(&mut parts, "binding name")?.as_str().to_string();
        let init = parts.next().map(build_expr).transpose()?;
        if kind == DeclKind::Const && init.is_none() {
            return Err(syntax(format!(
                "Missing initializer in const declaration '{}'",
                name
            )));
        }
        bindings.push(Binding { name, init });
    }

    Ok(Declaration { kind, bindings })
}

fn build_decl_kind(pair: Pair<'_, Rule>) -> Result<DeclKind> {
    match pair.as_str() {
        "let" => Ok(DeclKind::Let),
        "const" => Ok(DeclKind::Const),
        "var" => Ok(DeclKind::Var),
        other => Err(syntax(format!("Unknown declaration kind: {}", other))),
    }
}

fn build_if(pair: Pair<'_, Rule>) -> Result<Stmt> {
    let mut inner = children(pair);

    let test = build_expr(next_child(&mut inner, "condition in if")?)?;
    let consequent = build_stmt(next_child(&mut inner, "statement after if")?)?;
    let alternate = inner.next().map(build_stmt).transpose()?.map(Box::new);

    Ok(Stmt::If {
        test,
        consequent: Box::new(consequent),
        alternate,
    })
}

fn build_for(pair: Pair<'_, Rule>) -> Result<Stmt> {
    let mut init = None;
    let mut test = None;
    let mut update = None;
    let mut body = None;

    for part in children(pair) {
        match part.as_rule() {
            Rule::for_init => {
                let inner = next_child(&mut part.into_inner(), "for initializer")?;
                init = Some(match inner.as_rule() {
                    Rule::var_decl => ForInit::Declare(build_declaration(inner)?),
                    _ => ForInit::Expr(build_expr(inner)?),
                });
            }
            Rule::for_test => {
                test = Some(build_expr(next_child(&mut part.into_inner(), "for test")?)?);
            }
            Rule::for_update => {
                update = Some(build_expr(next_child(&mut part.into_inner(), "for update")?)?);
            }
            _ => body = Some(build_stmt(part)?),
        }
    }

    let body = body.ok_or_else(|| syntax("Expected body in for"))?;
    Ok(Stmt::For {
        init,
        test,
        update,
        body: Box::new(body),
    })
}

fn build_for_of(pair: Pair<'_, Rule>) -> Result<Stmt> {
    let mut inner = children(pair);

    let kind = build_decl_kind(next_child(&mut inner, "declaration in for-of")?)?;
    let binding = next_child(&mut inner, "binding in for-of")?
        .as_str()
        .to_string();
    let iteration = match next_child(&mut inner, "'of' or 'in'")?.as_str() {
        "in" => Iteration::In,
        _ => Iteration::Of,
    };
    let iterable = build_expr(next_child(&mut inner, "iterable in for-of")?)?;
    let body = build_stmt(next_child(&mut inner, "body in for-of")?)?;

    Ok(Stmt::ForOf {
        kind,
        binding,
        iteration,
        iterable,
        body: Box::new(body),
    })
}

fn build_try(pair: Pair<'_, Rule>) -> Result<Stmt> {
    let mut inner = children(pair);
    let block = build_block(next_child(&mut inner, "block after try")?)?;

    let mut handler = None;
    let mut finalizer = None;
    for clause in inner {
        match clause.as_rule() {
            Rule::catch_clause => {
                let mut param = None;
                let mut body = Vec::new();
                for part in children(clause) {
                    match part.as_rule() {
                        Rule::identifier => param = Some(part.as_str().to_string()),
                        _ => body = build_block(part)?,
                    }
                }
                handler = Some(CatchClause { param, body });
            }
            Rule::finally_clause => {
                finalizer = Some(build_block(next_child(
                    &mut children(clause),
                    "block after finally",
                )?)?);
            }
            rule => return Err(syntax(format!("Unexpected rule in try: {:?}", rule))),
        }
    }

    Ok(Stmt::Try {
        block,
        handler,
        finalizer,
    })
}

// ============================================================================
// Functions
// ============================================================================

/// Build a function declaration, function expression or method
fn build_function(pair: Pair<'_, Rule>, is_arrow: bool) -> Result<FunctionDef> {
    let mut name = None;
    let mut params = Vec::new();
    let mut rest = None;
    let mut body = FunctionBody::Block(Vec::new());

    for part in children(pair) {
        match part.as_rule() {
            Rule::identifier | Rule::property_name => name = Some(part.as_str().to_string()),
            Rule::params => (params, rest) = build_params(part)?,
            Rule::block => body = FunctionBody::Block(build_block(part)?),
            rule => return Err(syntax(format!("Unexpected rule in function: {:?}", rule))),
        }
    }

    Ok(FunctionDef {
        name,
        params,
        rest,
        body,
        is_arrow,
    })
}

fn build_params(pair: Pair<'_, Rule>) -> Result<(Vec<String>, Option<String>)> {
    let mut params = Vec::new();
    let mut rest = None;

    for param in pair.into_inner() {
        if rest.is_some() {
            return Err(syntax("Rest parameter must be last formal parameter"));
        }
        match param.as_rule() {
            Rule::rest_param => {
                let ident = next_child(&mut param.into_inner(), "rest parameter name")?;
                rest = Some(ident.as_str().to_string());
            }
            _ => params.push(param.as_str().to_string()),
        }
    }

    Ok((params, rest))
}

fn build_arrow(pair: Pair<'_, Rule>) -> Result<Expr> {
    let mut params = Vec::new();
    let mut rest = None;
    let mut body = None;

    for part in children(pair) {
        match part.as_rule() {
            Rule::identifier => params.push(part.as_str().to_string()),
            Rule::params => (params, rest) = build_params(part)?,
            Rule::block => body = Some(FunctionBody::Block(build_block(part)?)),
            _ => body = Some(FunctionBody::Expr(Box::new(build_expr(part)?))),
        }
    }

    let body = body.ok_or_else(|| syntax("Expected arrow function body"))?;
    Ok(Expr::Function(Rc::new(FunctionDef {
        name: None,
        params,
        rest,
        body,
        is_arrow: true,
    })))
}

// ============================================================================
// Expressions
// ============================================================================

fn pratt() -> &'static PrattParser<Rule> {
    static PRATT: OnceLock<PrattParser<Rule>> = OnceLock::new();
    PRATT.get_or_init(|| {
        PrattParser::new()
            .op(Op::infix(Rule::nullish, Assoc::Left))
            .op(Op::infix(Rule::or, Assoc::Left))
            .op(Op::infix(Rule::and, Assoc::Left))
            .op(Op::infix(Rule::strict_eq, Assoc::Left)
                | Op::infix(Rule::strict_ne, Assoc::Left)
                | Op::infix(Rule::loose_eq, Assoc::Left)
                | Op::infix(Rule::loose_ne, Assoc::Left))
            .op(Op::infix(Rule::lt, Assoc::Left)
                | Op::infix(Rule::le, Assoc::Left)
                | Op::infix(Rule::gt, Assoc::Left)
                | Op::infix(Rule::ge, Assoc::Left))
            .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
            .op(Op::infix(Rule::mul, Assoc::Left)
                | Op::infix(Rule::div, Assoc::Left)
                | Op::infix(Rule::rem, Assoc::Left))
    })
}

fn build_expr(pair: Pair<'_, Rule>) -> Result<Expr> {
    match pair.as_rule() {
        Rule::expression | Rule::paren_expr => {
            build_expr(next_child(&mut pair.into_inner(), "expression")?)
        }
        Rule::arrow_function => build_arrow(pair),
        Rule::assign_expr => build_assignment(pair),
        Rule::conditional => build_conditional(pair),
        Rule::binary => build_binary(pair),
        Rule::unary => build_unary(pair),
        Rule::postfix => build_postfix(pair),
        Rule::call_expr => build_call_chain(pair),
        Rule::new_expr => {
            let mut inner = children(pair);
            let callee = next_child(&mut inner, "constructor name")?
                .as_str()
                .to_string();
            let args = inner.next().map(build_args).transpose()?.unwrap_or_default();
            Ok(Expr::New { callee, args })
        }
        Rule::function_expr => Ok(Expr::Function(Rc::new(build_function(pair, false)?))),
        Rule::template => build_template(pair),
        Rule::string => {
            let chars = next_child(&mut pair.into_inner(), "string contents")?;
            Ok(Expr::Str(unescape(chars.as_str())))
        }
        Rule::number => Ok(Expr::Number(parse_number(pair.as_str())?)),
        Rule::literal => match pair.as_str() {
            "true" => Ok(Expr::Bool(true)),
            "false" => Ok(Expr::Bool(false)),
            "null" => Ok(Expr::Null),
            _ => Ok(Expr::Undefined),
        },
        Rule::identifier => Ok(Expr::Ident(pair.as_str().to_string())),
        Rule::array_lit => Ok(Expr::Array(
            pair.into_inner().map(build_arg).collect::<Result<_>>()?,
        )),
        Rule::object_lit => build_object(pair),
        rule => Err(syntax(format!("Unexpected rule in expression: {:?}", rule))),
    }
}

fn build_assignment(pair: Pair<'_, Rule>) -> Result<Expr> {
    let mut inner = pair.into_inner();
    let target = build_expr(next_child(&mut inner, "expression")?)?;

    let Some(op_pair) = inner.next() else {
        return Ok(target);
    };

    if !target.is_assignable() {
        return Err(syntax("Invalid left-hand side in assignment"));
    }

    let op = match op_pair.as_str() {
        "+=" => AssignOp::Add,
        "-=" => AssignOp::Sub,
        "*=" => AssignOp::Mul,
        "/=" => AssignOp::Div,
        "%=" => AssignOp::Rem,
        _ => AssignOp::Assign,
    };
    let value = build_expr(next_child(&mut inner, "value after assignment")?)?;

    Ok(Expr::Assign {
        op,
        target: Box::new(target),
        value: Box::new(value),
    })
}

fn build_conditional(pair: Pair<'_, Rule>) -> Result<Expr> {
    let mut inner = pair.into_inner();
    let test = build_expr(next_child(&mut inner, "expression")?)?;

    let Some(consequent) = inner.next() else {
        return Ok(test);
    };
    let consequent = build_expr(consequent)?;
    let alternate = build_expr(next_child(&mut inner, "':' branch of conditional")?)?;

    Ok(Expr::Conditional {
        test: Box::new(test),
        consequent: Box::new(consequent),
        alternate: Box::new(alternate),
    })
}

fn build_binary(pair: Pair<'_, Rule>) -> Result<Expr> {
    pratt()
        .map_primary(build_expr)
        .map_infix(|lhs, op, rhs| build_infix(op.as_rule(), lhs?, rhs?))
        .parse(pair.into_inner())
}

fn build_infix(rule: Rule, left: Expr, right: Expr) -> Result<Expr> {
    let left = Box::new(left);
    let right = Box::new(right);

    let logical = match rule {
        Rule::nullish => Some(LogicalOp::Nullish),
        Rule::or => Some(LogicalOp::Or),
        Rule::and => Some(LogicalOp::And),
        _ => None,
    };
    if let Some(op) = logical {
        return Ok(Expr::Logical { op, left, right });
    }

    let op = match rule {
        Rule::strict_eq => BinaryOp::StrictEq,
        Rule::strict_ne => BinaryOp::StrictNe,
        Rule::loose_eq => BinaryOp::LooseEq,
        Rule::loose_ne => BinaryOp::LooseNe,
        Rule::lt => BinaryOp::Lt,
        Rule::le => BinaryOp::Le,
        Rule::gt => BinaryOp::Gt,
        Rule::ge => BinaryOp::Ge,
        Rule::add => BinaryOp::Add,
        Rule::sub => BinaryOp::Sub,
        Rule::mul => BinaryOp::Mul,
        Rule::div => BinaryOp::Div,
        Rule::rem => BinaryOp::Rem,
        rule => return Err(syntax(format!("Unknown operator: {:?}", rule))),
    };
    Ok(Expr::Binary { op, left, right })
}

fn build_unary(pair: Pair<'_, Rule>) -> Result<Expr> {
    let mut prefixes = Vec::new();
    let mut operand = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::postfix => operand = Some(build_postfix(part)?),
            rule => prefixes.push(rule),
        }
    }

    let mut expr = operand.ok_or_else(|| syntax("Expected operand"))?;
    for rule in prefixes.into_iter().rev() {
        expr = match rule {
            Rule::pre_inc | Rule::pre_dec => {
                if !expr.is_assignable() {
                    return Err(syntax(
                        "Invalid left-hand side expression in prefix operation",
                    ));
                }
                Expr::Update {
                    op: if rule == Rule::pre_inc {
                        UpdateOp::Inc
                    } else {
                        UpdateOp::Dec
                    },
                    prefix: true,
                    target: Box::new(expr),
                }
            }
            Rule::not => unary(UnaryOp::Not, expr),
            Rule::neg => unary(UnaryOp::Neg, expr),
            Rule::plus => unary(UnaryOp::Plus, expr),
            Rule::typeof_op => unary(UnaryOp::TypeOf, expr),
            Rule::await_op => unary(UnaryOp::Await, expr),
            rule => return Err(syntax(format!("Unknown prefix operator: {:?}", rule))),
        };
    }

    Ok(expr)
}

fn unary(op: UnaryOp, operand: Expr) -> Expr {
    Expr::Unary {
        op,
        operand: Box::new(operand),
    }
}

fn build_postfix(pair: Pair<'_, Rule>) -> Result<Expr> {
    let mut inner = pair.into_inner();
    let expr = build_expr(next_child(&mut inner, "expression")?)?;

    let Some(op) = inner.next() else {
        return Ok(expr);
    };
    if !expr.is_assignable() {
        return Err(syntax(
            "Invalid left-hand side expression in postfix operation",
        ));
    }

    Ok(Expr::Update {
        op: if op.as_rule() == Rule::post_inc {
            UpdateOp::Inc
        } else {
            UpdateOp::Dec
        },
        prefix: false,
        target: Box::new(expr),
    })
}

fn build_call_chain(pair: Pair<'_, Rule>) -> Result<Expr> {
    let mut inner = pair.into_inner();
    let mut expr = build_expr(next_child(&mut inner, "expression")?)?;

    for suffix in inner {
        expr = match suffix.as_rule() {
            Rule::call_args => Expr::Call {
                callee: Box::new(expr),
                args: build_args(suffix)?,
            },
            Rule::member_dot | Rule::optional_dot => {
                let optional = suffix.as_rule() == Rule::optional_dot;
                let name = next_child(&mut suffix.into_inner(), "property name")?;
                Expr::Member {
                    object: Box::new(expr),
                    property: PropKey::Named(name.as_str().to_string()),
                    optional,
                }
            }
            Rule::member_index => {
                let index = next_child(&mut suffix.into_inner(), "index expression")?;
                Expr::Member {
                    object: Box::new(expr),
                    property: PropKey::Computed(Box::new(build_expr(index)?)),
                    optional: false,
                }
            }
            rule => return Err(syntax(format!("Unexpected suffix: {:?}", rule))),
        };
    }

    Ok(expr)
}

fn build_args(pair: Pair<'_, Rule>) -> Result<Vec<Arg>> {
    pair.into_inner().map(build_arg).collect()
}

fn build_arg(pair: Pair<'_, Rule>) -> Result<Arg> {
    match pair.as_rule() {
        Rule::spread => {
            let inner = next_child(&mut pair.into_inner(), "expression after ...")?;
            Ok(Arg::Spread(build_expr(inner)?))
        }
        _ => Ok(Arg::Expr(build_expr(pair)?)),
    }
}

fn build_object(pair: Pair<'_, Rule>) -> Result<Expr> {
    let mut props = Vec::new();

    for prop in pair.into_inner() {
        match prop.as_rule() {
            Rule::keyed_prop => {
                let mut inner = prop.into_inner();
                let key = next_child(&mut inner, "property key")?;
                let key = match key.as_rule() {
                    Rule::string => unescape(
                        next_child(&mut key.into_inner(), "string contents")?.as_str(),
                    ),
                    Rule::number => number_key(parse_number(key.as_str())?),
                    _ => key.as_str().to_string(),
                };
                let value = build_expr(next_child(&mut inner, "property value")?)?;
                props.push((key, value));
            }
            Rule::shorthand_prop => {
                let name = prop.as_str().trim().to_string();
                props.push((name.clone(), Expr::Ident(name)));
            }
            Rule::method_prop => {
                let def = build_function(prop, false)?;
                let name = def.display_name().to_string();
                props.push((name, Expr::Function(Rc::new(def))));
            }
            rule => return Err(syntax(format!("Unexpected rule in object: {:?}", rule))),
        }
    }

    Ok(Expr::Object(props))
}

fn build_template(pair: Pair<'_, Rule>) -> Result<Expr> {
    let mut parts = Vec::new();

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::template_chars => parts.push(TemplatePart::Text(unescape(part.as_str()))),
            Rule::template_subst => {
                let expr = next_child(&mut part.into_inner(), "expression in template")?;
                parts.push(TemplatePart::Subst(build_expr(expr)?));
            }
            rule => return Err(syntax(format!("Unexpected rule in template: {:?}", rule))),
        }
    }

    Ok(Expr::Template(parts))
}

fn parse_number(text: &str) -> Result<f64> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).map(|n| n as f64).ok()
    } else {
        text.parse::<f64>().ok()
    };
    parsed.ok_or_else(|| syntax(format!("Invalid number literal: {}", text)))
}

fn number_key(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Resolve backslash escapes in string and template literals
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\x");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    out
}
