//! Global objects and methods available to every script

use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;

use super::environment::{DialogFailure, TimerKind};
use super::scope::Scope;
use super::value::{number_to_string, JsonError, NativeFn, Value};
use super::{Interpreter, ScriptError};
use crate::governor::CHECK_FN;
use crate::protocol::{ConsoleMethod, DialogType, DialogValue, MAX_TIMER_DELAY_MS};

type NativeResult = Result<Value, ScriptError>;

/// Populate a global scope
pub fn install(scope: &mut Scope, textual: bool) {
    let console = ConsoleMethod::ALL
        .iter()
        .map(|m| (m.name().to_string(), Value::native(m.name(), console_call)))
        .collect();
    scope.declare("console", Value::object(console), true);

    for name in ["setTimeout", "setInterval"] {
        scope.declare(name, Value::native(name, timer_set), true);
    }
    for name in ["clearTimeout", "clearInterval"] {
        scope.declare(name, Value::native(name, timer_clear), true);
    }
    for name in ["alert", "confirm", "prompt"] {
        scope.declare(name, Value::native(name, dialog), true);
    }

    let mut math = namespace(
        &[
            "abs", "ceil", "floor", "max", "min", "pow", "random", "round", "sign", "sqrt",
            "trunc",
        ],
        math_call,
    );
    math.insert("PI".to_string(), Value::Number(std::f64::consts::PI));
    math.insert("E".to_string(), Value::Number(std::f64::consts::E));
    scope.declare("Math", Value::object(math), true);

    scope.declare(
        "JSON",
        Value::object(namespace(&["stringify", "parse"], json_call)),
        true,
    );
    scope.declare(
        "Object",
        Value::object(namespace(&["keys", "values", "entries"], object_call)),
        true,
    );
    scope.declare(
        "Array",
        Value::object(namespace(&["isArray"], array_static)),
        true,
    );
    scope.declare("Date", Value::object(namespace(&["now"], date_call)), true);

    for name in ["String", "Number", "Boolean", "parseInt", "parseFloat", "isNaN"] {
        scope.declare(name, Value::native(name, convert), true);
    }
    for name in ["Error", "TypeError", "RangeError", "ReferenceError", "SyntaxError"] {
        scope.declare(name, Value::native(name, error_ctor), true);
    }

    scope.declare("NaN", Value::Number(f64::NAN), false);
    scope.declare("Infinity", Value::Number(f64::INFINITY), false);

    if textual {
        scope.declare(CHECK_FN, Value::native(CHECK_FN, check_steps), false);
    }
}

fn namespace(names: &[&'static str], func: NativeFn) -> IndexMap<String, Value> {
    names
        .iter()
        .map(|name| (name.to_string(), Value::native(*name, func)))
        .collect()
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

fn callback_arg(interp: &Interpreter<'_>, args: &[Value], index: usize) -> NativeResult {
    let callback = arg(args, index);
    if callback.is_function() {
        Ok(callback)
    } else {
        Err(interp.type_error(format!("{} is not a function", callback.to_display_string())))
    }
}

/// Resolve a possibly negative index against a length, as `slice` does
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

// ============================================================================
// Console, timers, dialogs
// ============================================================================

fn console_call(interp: &mut Interpreter<'_>, name: &'static str, _this: Value, args: Vec<Value>) -> NativeResult {
    if let Some(method) = ConsoleMethod::from_name(name) {
        interp.console(method, args)?;
    }
    Ok(Value::Undefined)
}

fn timer_set(interp: &mut Interpreter<'_>, name: &'static str, _this: Value, args: Vec<Value>) -> NativeResult {
    let kind = if name == "setInterval" {
        TimerKind::Interval
    } else {
        TimerKind::Timeout
    };
    let callback = callback_arg(interp, &args, 0)?;
    let delay = arg(&args, 1).to_number();
    let delay = if delay.is_finite() && delay > 0.0 {
        delay.min(MAX_TIMER_DELAY_MS)
    } else {
        0.0
    };
    let extra = args
        .iter()
        .skip(2)
        .map(|v| v.to_json().ok().flatten().unwrap_or(serde_json::Value::Null))
        .collect();

    match interp.env().set_timer(kind, callback, delay, extra)? {
        Some(id) => Ok(Value::Str(id)),
        None => Ok(Value::Null),
    }
}

fn timer_clear(interp: &mut Interpreter<'_>, name: &'static str, _this: Value, args: Vec<Value>) -> NativeResult {
    let kind = if name == "clearInterval" {
        TimerKind::Interval
    } else {
        TimerKind::Timeout
    };
    if let Some(Value::Str(id)) = args.first() {
        interp.env().clear_timer(kind, id)?;
    }
    Ok(Value::Undefined)
}

fn dialog(interp: &mut Interpreter<'_>, name: &'static str, _this: Value, args: Vec<Value>) -> NativeResult {
    let dialog_type = match name {
        "alert" => DialogType::Alert,
        "confirm" => DialogType::Confirm,
        _ => DialogType::Prompt,
    };
    let message = arg(&args, 0).to_display_string();
    let default_value = match (dialog_type, args.get(1)) {
        (DialogType::Prompt, Some(value)) if !value.is_nullish() => {
            Some(value.to_display_string()).filter(|s| !s.is_empty())
        }
        _ => None,
    };

    match interp.env().dialog(dialog_type, message, default_value) {
        Ok(_) if dialog_type == DialogType::Alert => Ok(Value::Undefined),
        Ok(DialogValue::Bool(b)) => Ok(Value::Bool(b)),
        Ok(DialogValue::Text(s)) => Ok(Value::Str(s)),
        Ok(DialogValue::Null) => Ok(Value::Null),
        Err(DialogFailure::TimedOut(message)) => Err(interp.throw("Error", message)),
        Err(DialogFailure::TornDown) => Err(ScriptError::TornDown),
    }
}

fn check_steps(interp: &mut Interpreter<'_>, _name: &'static str, _this: Value, _args: Vec<Value>) -> NativeResult {
    interp.step()?;
    Ok(Value::Undefined)
}

// ============================================================================
// Global namespaces
// ============================================================================

fn math_call(_interp: &mut Interpreter<'_>, name: &'static str, _this: Value, args: Vec<Value>) -> NativeResult {
    let n = |i: usize| arg(&args, i).to_number();
    let fold = |init: f64, pick: fn(f64, f64) -> f64| {
        args.iter().map(Value::to_number).fold(init, |acc, x| {
            if acc.is_nan() || x.is_nan() {
                f64::NAN
            } else {
                pick(acc, x)
            }
        })
    };

    let result = match name {
        "abs" => n(0).abs(),
        "ceil" => n(0).ceil(),
        "floor" => n(0).floor(),
        "max" => fold(f64::NEG_INFINITY, f64::max),
        "min" => fold(f64::INFINITY, f64::min),
        "pow" => n(0).powf(n(1)),
        "random" => rand::random::<f64>(),
        "round" => (n(0) + 0.5).floor(),
        "sign" => {
            let x = n(0);
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        "sqrt" => n(0).sqrt(),
        "trunc" => n(0).trunc(),
        _ => f64::NAN,
    };
    Ok(Value::Number(result))
}

fn json_call(interp: &mut Interpreter<'_>, name: &'static str, _this: Value, args: Vec<Value>) -> NativeResult {
    if name == "parse" {
        let text = arg(&args, 0).to_display_string();
        return match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) => Ok(Value::from_json(&json)),
            Err(e) => Err(interp.throw("SyntaxError", format!("Unexpected token in JSON: {}", e))),
        };
    }

    let json = match arg(&args, 0).to_json() {
        Ok(Some(json)) => json,
        Ok(None) => return Ok(Value::Undefined),
        Err(JsonError::Circular) => {
            return Err(interp.type_error("Converting circular structure to JSON"))
        }
        Err(JsonError::TooDeep) => {
            return Err(interp.throw("RangeError", "Maximum call stack size exceeded"))
        }
    };

    let indent = match arg(&args, 2) {
        Value::Number(n) if n >= 1.0 => " ".repeat(n.min(10.0) as usize),
        Value::Str(s) => s.chars().take(10).collect(),
        _ => String::new(),
    };

    let text = if indent.is_empty() {
        serde_json::to_string(&json)
    } else {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        json.serialize(&mut ser)
            .map(|_| String::from_utf8_lossy(&buf).into_owned())
    };
    text.map(Value::Str)
        .map_err(|e| interp.type_error(e.to_string()))
}

fn object_call(_interp: &mut Interpreter<'_>, name: &'static str, _this: Value, args: Vec<Value>) -> NativeResult {
    let entries: Vec<(String, Value)> = match arg(&args, 0) {
        Value::Object(obj) => obj
            .borrow()
            .props
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        _ => Vec::new(),
    };

    let items = entries
        .into_iter()
        .map(|(key, value)| match name {
            "keys" => Value::Str(key),
            "values" => value,
            _ => Value::array(vec![Value::Str(key), value]),
        })
        .collect();
    Ok(Value::array(items))
}

fn array_static(_interp: &mut Interpreter<'_>, _name: &'static str, _this: Value, args: Vec<Value>) -> NativeResult {
    Ok(Value::Bool(matches!(args.first(), Some(Value::Array(_)))))
}

fn date_call(_interp: &mut Interpreter<'_>, _name: &'static str, _this: Value, _args: Vec<Value>) -> NativeResult {
    Ok(Value::Number(chrono::Utc::now().timestamp_millis() as f64))
}

fn convert(_interp: &mut Interpreter<'_>, name: &'static str, _this: Value, args: Vec<Value>) -> NativeResult {
    let value = arg(&args, 0);
    Ok(match name {
        "String" if args.is_empty() => Value::from(""),
        "String" => Value::Str(value.to_display_string()),
        "Number" if args.is_empty() => Value::Number(0.0),
        "Number" => Value::Number(value.to_number()),
        "Boolean" => Value::Bool(value.truthy()),
        "parseInt" => Value::Number(parse_int(&value.to_display_string(), arg(&args, 1).to_number())),
        "parseFloat" => Value::Number(parse_float(&value.to_display_string())),
        _ => Value::Bool(value.to_number().is_nan()),
    })
}

fn parse_int(text: &str, radix: f64) -> f64 {
    let text = text.trim_start();
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let mut radix = if radix.is_nan() || radix == 0.0 { 10 } else { radix as u32 };
    let mut digits = text;
    if radix == 10 || radix == 16 {
        if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            radix = 16;
            digits = hex;
        }
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }

    let mut result: Option<f64> = None;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => result = Some(result.unwrap_or(0.0) * radix as f64 + d as f64),
            None => break,
        }
    }
    match result {
        Some(n) if negative => -n,
        Some(n) => n,
        None => f64::NAN,
    }
}

fn parse_float(text: &str) -> f64 {
    let text = text.trim_start();
    if text.starts_with("Infinity") || text.starts_with("+Infinity") {
        return f64::INFINITY;
    }
    if text.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let end = text
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    (1..=end)
        .rev()
        .find_map(|len| text[..len].parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

fn error_ctor(interp: &mut Interpreter<'_>, name: &'static str, _this: Value, args: Vec<Value>) -> NativeResult {
    let message = match arg(&args, 0) {
        Value::Undefined => String::new(),
        other => other.to_display_string(),
    };
    Ok(interp.make_error(name, message))
}

// ============================================================================
// Methods of arrays, strings and numbers
// ============================================================================

const ARRAY_METHODS: &[&str] = &[
    "concat", "every", "filter", "find", "findIndex", "forEach", "includes", "indexOf", "join",
    "map", "pop", "push", "reduce", "reverse", "shift", "slice", "some", "sort", "unshift",
];

const STRING_METHODS: &[&str] = &[
    "charAt", "endsWith", "includes", "indexOf", "padEnd", "padStart", "repeat", "replace",
    "replaceAll", "slice", "split", "startsWith", "substring", "toLowerCase", "toString",
    "toUpperCase", "trim", "trimEnd", "trimStart",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toString"];

fn lookup_method(table: &[&'static str], key: &str, func: NativeFn) -> Option<Value> {
    table
        .iter()
        .find(|name| **name == key)
        .map(|name| Value::native(*name, func))
}

pub fn array_method(key: &str) -> Option<Value> {
    lookup_method(ARRAY_METHODS, key, array_call)
}

pub fn string_method(key: &str) -> Option<Value> {
    lookup_method(STRING_METHODS, key, string_call)
}

pub fn number_method(key: &str) -> Option<Value> {
    lookup_method(NUMBER_METHODS, key, number_call)
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

fn array_call(interp: &mut Interpreter<'_>, name: &'static str, this: Value, args: Vec<Value>) -> NativeResult {
    let Value::Array(items) = &this else {
        return Err(interp.type_error(format!("Array.prototype.{} called on a non-array", name)));
    };
    let items = Rc::clone(items);

    match name {
        "push" => {
            let mut items = items.borrow_mut();
            items.extend(args);
            Ok(Value::Number(items.len() as f64))
        }
        "pop" => Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
        "shift" => {
            let mut items = items.borrow_mut();
            Ok(if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            })
        }
        "unshift" => {
            let mut items = items.borrow_mut();
            items.splice(0..0, args);
            Ok(Value::Number(items.len() as f64))
        }
        "join" => {
            let sep = match arg(&args, 0) {
                Value::Undefined => ",".to_string(),
                other => other.to_display_string(),
            };
            let joined = items
                .borrow()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                .collect::<Vec<_>>()
                .join(&sep);
            Ok(Value::Str(joined))
        }
        "indexOf" => {
            let needle = arg(&args, 0);
            let position = items.borrow().iter().position(|v| v.strict_equals(&needle));
            Ok(Value::Number(position.map(|i| i as f64).unwrap_or(-1.0)))
        }
        "includes" => {
            let needle = arg(&args, 0);
            Ok(Value::Bool(items.borrow().iter().any(|v| same_value_zero(v, &needle))))
        }
        "slice" => {
            let items = items.borrow();
            let len = items.len();
            let start = relative_index(&arg(&args, 0), len, 0);
            let end = relative_index(&arg(&args, 1), len, len);
            let slice = if start < end { items[start..end].to_vec() } else { Vec::new() };
            Ok(Value::array(slice))
        }
        "concat" => {
            let mut out = items.borrow().clone();
            for value in args {
                match value {
                    Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                    other => out.push(other),
                }
            }
            Ok(Value::array(out))
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(this.clone())
        }
        "sort" => {
            let comparator = match arg(&args, 0) {
                Value::Undefined => None,
                _ => Some(callback_arg(interp, &args, 0)?),
            };
            let mut sorted = items.borrow().clone();
            let Some(cmp) = comparator else {
                sorted.sort_by(|a, b| {
                    if default_sort_before(a, b) {
                        Ordering::Less
                    } else if default_sort_before(b, a) {
                        Ordering::Greater
                    } else {
                        Ordering::Equal
                    }
                });
                *items.borrow_mut() = sorted;
                return Ok(this.clone());
            };
            // Insertion sort: the comparator may throw, so no std sort.
            for i in 1..sorted.len() {
                let mut j = i;
                while j > 0 {
                    interp.step()?;
                    let result = interp.call_function(
                        &cmp,
                        Value::Undefined,
                        vec![sorted[j].clone(), sorted[j - 1].clone()],
                    )?;
                    if result.to_number() >= 0.0 {
                        break;
                    }
                    sorted.swap(j, j - 1);
                    j -= 1;
                }
            }
            *items.borrow_mut() = sorted;
            Ok(this.clone())
        }
        "reduce" => {
            let callback = callback_arg(interp, &args, 0)?;
            let snapshot = items.borrow().clone();
            let mut iter = snapshot.into_iter().enumerate();
            let mut acc = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match iter.next() {
                    Some((_, first)) => first,
                    None => {
                        return Err(interp.type_error("Reduce of empty array with no initial value"));
                    }
                },
            };
            for (i, item) in iter {
                interp.step()?;
                acc = interp.call_function(
                    &callback,
                    Value::Undefined,
                    vec![acc, item, Value::Number(i as f64), this.clone()],
                )?;
            }
            Ok(acc)
        }
        _ => {
            let snapshot = items.borrow().clone();
            iterate(interp, name, &this, snapshot, &args)
        }
    }
}

/// Callback-driven array methods
fn iterate(
    interp: &mut Interpreter<'_>,
    name: &'static str,
    this: &Value,
    snapshot: Vec<Value>,
    args: &[Value],
) -> NativeResult {
    let callback = callback_arg(interp, args, 0)?;
    let mut mapped = Vec::new();

    for (i, item) in snapshot.into_iter().enumerate() {
        interp.step()?;
        let result = interp.call_function(
            &callback,
            Value::Undefined,
            vec![item.clone(), Value::Number(i as f64), this.clone()],
        )?;
        match name {
            "map" => mapped.push(result),
            "filter" if result.truthy() => mapped.push(item),
            "find" if result.truthy() => return Ok(item),
            "findIndex" if result.truthy() => return Ok(Value::Number(i as f64)),
            "some" if result.truthy() => return Ok(Value::Bool(true)),
            "every" if !result.truthy() => return Ok(Value::Bool(false)),
            _ => {}
        }
    }

    Ok(match name {
        "map" | "filter" => Value::array(mapped),
        "find" => Value::Undefined,
        "findIndex" => Value::Number(-1.0),
        "some" => Value::Bool(false),
        "every" => Value::Bool(true),
        _ => Value::Undefined,
    })
}

fn default_sort_before(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, _) => false,
        (_, Value::Undefined) => true,
        _ => a.to_display_string() < b.to_display_string(),
    }
}

fn string_call(interp: &mut Interpreter<'_>, name: &'static str, this: Value, args: Vec<Value>) -> NativeResult {
    let Value::Str(s) = &this else {
        return Err(interp.type_error(format!("String.prototype.{} called on a non-string", name)));
    };
    let text = |i: usize| arg(&args, i).to_display_string();

    let result = match name {
        "toUpperCase" => Value::Str(s.to_uppercase()),
        "toLowerCase" => Value::Str(s.to_lowercase()),
        "toString" => Value::Str(s.clone()),
        "trim" => Value::from(s.trim()),
        "trimStart" => Value::from(s.trim_start()),
        "trimEnd" => Value::from(s.trim_end()),
        "includes" => Value::Bool(s.contains(text(0).as_str())),
        "startsWith" => Value::Bool(s.starts_with(text(0).as_str())),
        "endsWith" => Value::Bool(s.ends_with(text(0).as_str())),
        "indexOf" => {
            let position = s.find(text(0).as_str()).map(|b| s[..b].chars().count() as f64);
            Value::Number(position.unwrap_or(-1.0))
        }
        "charAt" => {
            let index = arg(&args, 0).to_number();
            let index = if index.is_nan() { 0 } else { index as usize };
            Value::Str(s.chars().nth(index).map(String::from).unwrap_or_default())
        }
        "split" => match arg(&args, 0) {
            Value::Undefined => Value::array(vec![Value::Str(s.clone())]),
            sep => {
                let sep = sep.to_display_string();
                let parts: Vec<Value> = if sep.is_empty() {
                    s.chars().map(|c| Value::from(c.to_string())).collect()
                } else {
                    s.split(sep.as_str()).map(Value::from).collect()
                };
                Value::array(parts)
            }
        },
        "slice" | "substring" => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len();
            let (mut start, mut end) = if name == "slice" {
                (
                    relative_index(&arg(&args, 0), len, 0),
                    relative_index(&arg(&args, 1), len, len),
                )
            } else {
                let clamp = |v: Value, default: usize| match v {
                    Value::Undefined => default,
                    v => v.to_number().max(0.0).min(len as f64) as usize,
                };
                (clamp(arg(&args, 0), 0), clamp(arg(&args, 1), len))
            };
            if name == "substring" && start > end {
                std::mem::swap(&mut start, &mut end);
            }
            let out: String = if start < end { chars[start..end].iter().collect() } else { String::new() };
            Value::Str(out)
        }
        "repeat" => {
            let count = arg(&args, 0).to_number();
            let count = if count.is_nan() { 0.0 } else { count };
            if count < 0.0 || count.is_infinite() || s.len() as f64 * count > 1e8 {
                return Err(interp.throw(
                    "RangeError",
                    format!("Invalid count value: {}", number_to_string(count)),
                ));
            }
            Value::Str(s.repeat(count as usize))
        }
        "padStart" | "padEnd" => {
            let target = arg(&args, 0).to_number();
            let target = if target.is_nan() { 0 } else { target.max(0.0).min(1e6) as usize };
            let filler = match arg(&args, 1) {
                Value::Undefined => " ".to_string(),
                v => v.to_display_string(),
            };
            let current = s.chars().count();
            if target <= current || filler.is_empty() {
                Value::Str(s.clone())
            } else {
                let pad: String = filler.chars().cycle().take(target - current).collect();
                if name == "padStart" {
                    Value::Str(format!("{}{}", pad, s))
                } else {
                    Value::Str(format!("{}{}", s, pad))
                }
            }
        }
        "replace" => Value::Str(s.replacen(text(0).as_str(), &text(1), 1)),
        "replaceAll" => Value::Str(s.replace(text(0).as_str(), &text(1))),
        _ => Value::Undefined,
    };
    Ok(result)
}

fn number_call(interp: &mut Interpreter<'_>, name: &'static str, this: Value, args: Vec<Value>) -> NativeResult {
    let Value::Number(n) = this else {
        return Err(interp.type_error(format!("Number.prototype.{} called on a non-number", name)));
    };
    match name {
        "toFixed" => {
            let digits = arg(&args, 0).to_number();
            let digits = if digits.is_nan() { 0.0 } else { digits };
            if !(0.0..=100.0).contains(&digits) {
                return Err(interp.throw("RangeError", "toFixed() digits argument must be between 0 and 100"));
            }
            if !n.is_finite() {
                return Ok(Value::Str(number_to_string(n)));
            }
            Ok(Value::Str(format!("{:.*}", digits as usize, n)))
        }
        _ => match arg(&args, 0) {
            Value::Number(radix) if radix != 10.0 && n.fract() == 0.0 && (2.0..=36.0).contains(&radix) => {
                Ok(Value::Str(to_radix(n as i64, radix as u32)))
            }
            _ => Ok(Value::Str(number_to_string(n))),
        },
    }
}

fn to_radix(n: i64, radix: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    let mut rest = n.unsigned_abs();
    while rest > 0 {
        let d = (rest % radix as u64) as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('?'));
        rest /= radix as u64;
    }
    if n < 0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}
