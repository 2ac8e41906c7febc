//! Runtime values of the script interpreter

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use indexmap::IndexMap;

use super::scope::ScopeRef;
use super::{Interpreter, ScriptError};
use crate::parser::ast::FunctionDef;

/// Native function: receives the interpreter, the name it was registered
/// under, `this` and the call arguments
pub type NativeFn =
    fn(&mut Interpreter<'_>, &'static str, Value, Vec<Value>) -> Result<Value, ScriptError>;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Rc<Elements>),
    Object(Rc<RefCell<Object>>),
    Function(Rc<Function>),
}

/// Storage behind an array value
pub struct Elements(RefCell<Vec<Value>>);

impl Deref for Elements {
    type Target = RefCell<Vec<Value>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for Elements {
    fn drop(&mut self) {
        let mut pending = std::mem::take(self.0.get_mut());
        dismantle(&mut pending);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Plain,
    /// Created by `Error`, `TypeError` and friends
    Error,
}

#[derive(Debug, Clone)]
pub struct Object {
    pub props: IndexMap<String, Value>,
    pub kind: ObjectKind,
}

impl Drop for Object {
    fn drop(&mut self) {
        let mut pending: Vec<Value> = self.props.drain(..).map(|(_, value)| value).collect();
        dismantle(&mut pending);
    }
}

/// Release values one at a time, moving the children of containers this is
/// the last owner of onto the worklist so nesting never deepens the stack
pub(crate) fn dismantle(pending: &mut Vec<Value>) {
    while let Some(value) = pending.pop() {
        match &value {
            Value::Array(items) if Rc::strong_count(items) == 1 => {
                if let Ok(mut items) = items.try_borrow_mut() {
                    pending.append(&mut *items);
                }
            }
            Value::Object(obj) if Rc::strong_count(obj) == 1 => {
                if let Ok(mut obj) = obj.try_borrow_mut() {
                    pending.extend(obj.props.drain(..).map(|(_, value)| value));
                }
            }
            Value::Function(func) if Rc::strong_count(func) == 1 => {
                if let Function::Closure { scope, .. } = func.as_ref() {
                    if Rc::strong_count(scope) == 1 {
                        if let Ok(mut scope) = scope.try_borrow_mut() {
                            pending.extend(scope.take_values());
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

pub enum Function {
    Closure { def: Rc<FunctionDef>, scope: ScopeRef },
    Native { name: &'static str, func: NativeFn },
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Closure { def, .. } => def.name.as_deref().unwrap_or(""),
            Function::Native { name, .. } => name,
        }
    }
}

/// Deepest array/object nesting converted to JSON or to a string
pub const MAX_VALUE_DEPTH: usize = 100;

/// Why a value could not be converted to JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonError {
    Circular,
    TooDeep,
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(Elements(RefCell::new(items))))
    }

    pub fn object(props: IndexMap<String, Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(Object {
            props,
            kind: ObjectKind::Plain,
        })))
    }

    pub fn native(name: &'static str, func: NativeFn) -> Value {
        Value::Function(Rc::new(Function::Native { name, func }))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    pub fn is_error(&self) -> bool {
        match self {
            Value::Object(obj) => obj.borrow().kind == ObjectKind::Error,
            _ => false,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) | Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => parse_numeric(s),
            Value::Array(_) => parse_numeric(&self.to_display_string()),
            Value::Object(_) | Value::Function(_) => f64::NAN,
        }
    }

    /// String conversion as performed by `String(value)`
    pub fn to_display_string(&self) -> String {
        self.display_inner(&mut Vec::new())
    }

    /// Arrays already being printed, or nested too deeply, print as empty
    fn display_inner(&self, seen: &mut Vec<*const ()>) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if seen.contains(&ptr) || seen.len() >= MAX_VALUE_DEPTH {
                    return String::new();
                }
                seen.push(ptr);
                let text = items
                    .borrow()
                    .iter()
                    .map(|v| {
                        if v.is_nullish() {
                            String::new()
                        } else {
                            v.display_inner(seen)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                seen.pop();
                text
            }
            Value::Object(obj) => {
                let obj = obj.borrow();
                match obj.kind {
                    ObjectKind::Error => {
                        let name = obj
                            .props
                            .get("name")
                            .map(|v| v.to_display_string())
                            .unwrap_or_else(|| "Error".to_string());
                        let message = obj
                            .props
                            .get("message")
                            .map(|v| v.to_display_string())
                            .unwrap_or_default();
                        if message.is_empty() {
                            name
                        } else {
                            format!("{}: {}", name, message)
                        }
                    }
                    ObjectKind::Plain => "[object Object]".to_string(),
                }
            }
            Value::Function(func) => match func.as_ref() {
                Function::Native { name, .. } => {
                    format!("function {}() {{ [native code] }}", name)
                }
                Function::Closure { def, .. } if def.is_arrow => {
                    format!("({}) => {{ ... }}", def.params.join(", "))
                }
                Function::Closure { def, .. } => format!(
                    "function {}({}) {{ ... }}",
                    def.name.as_deref().unwrap_or(""),
                    def.params.join(", ")
                ),
            },
        }
    }

    /// Property key produced by a computed member expression
    pub fn to_property_key(&self) -> String {
        self.to_display_string()
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Str(_))
            | (Value::Str(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            (Value::Array(_) | Value::Object(_), Value::Number(_) | Value::Str(_))
            | (Value::Number(_) | Value::Str(_), Value::Array(_) | Value::Object(_)) => {
                let (prim, other) = if matches!(self, Value::Number(_) | Value::Str(_)) {
                    (self, other)
                } else {
                    (other, self)
                };
                let converted = Value::Str(other.to_display_string());
                converted.loose_equals(prim)
            }
            _ => self.strict_equals(other),
        }
    }

    /// Convert to JSON; functions and `undefined` become `None`
    pub fn to_json(&self) -> Result<Option<serde_json::Value>, JsonError> {
        let mut seen = Vec::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(
        &self,
        seen: &mut Vec<*const ()>,
    ) -> Result<Option<serde_json::Value>, JsonError> {
        use serde_json::Value as Json;

        let json = match self {
            Value::Undefined | Value::Function(_) => return Ok(None),
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::Str(s) => Json::String(s.clone()),
            Value::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                enter(seen, ptr)?;
                let mut out = Vec::new();
                for item in items.borrow().iter() {
                    out.push(item.to_json_inner(seen)?.unwrap_or(Json::Null));
                }
                seen.pop();
                Json::Array(out)
            }
            Value::Object(obj) => {
                let ptr = Rc::as_ptr(obj) as *const ();
                enter(seen, ptr)?;
                let mut map = serde_json::Map::new();
                let obj = obj.borrow();
                // Error name, message and stack are not enumerable.
                if obj.kind == ObjectKind::Plain {
                    for (key, value) in &obj.props {
                        if let Some(json) = value.to_json_inner(seen)? {
                            map.insert(key.clone(), json);
                        }
                    }
                }
                seen.pop();
                Json::Object(map)
            }
        };
        Ok(Some(json))
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

fn enter(seen: &mut Vec<*const ()>, ptr: *const ()) -> Result<(), JsonError> {
    if seen.contains(&ptr) {
        return Err(JsonError::Circular);
    }
    if seen.len() >= MAX_VALUE_DEPTH {
        return Err(JsonError::TooDeep);
    }
    seen.push(ptr);
    Ok(())
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Object(obj) => f.debug_map().entries(obj.borrow().props.iter()).finish(),
            Value::Function(func) => write!(f, "[Function: {}]", func.name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Format a number the way scripts see it printed
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{}", n as i128);
    }
    let abs = n.abs();
    if abs >= 1e21 || abs < 1e-6 {
        // 1e21 -> "1e+21", 1e-7 -> "1e-7"
        let formatted = format!("{:e}", n);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => formatted,
        };
    }
    format!("{}", n)
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Numeric conversion of a string as performed by `Number(text)`
pub fn parse_numeric(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    // Rust accepts "inf" and "nan" spellings that scripts must not.
    if trimmed
        .chars()
        .any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
    {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}
