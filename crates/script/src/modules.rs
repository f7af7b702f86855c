//! Importable modules. Each import builds a fresh module value.

use std::collections::HashMap;
use std::rc::Rc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::builtins::{arity, float_arg, int_arg, no_kwargs, pairs_of, str_arg, take_kwarg};
use crate::error::{ScriptError, ScriptResult};
use crate::interpreter::Interpreter;
use crate::methods::counter_add;
use crate::value::*;

pub fn load(name: &str) -> Option<Rc<ModuleValue>> {
    let (name, members): (&'static str, Vec<(&'static str, Value)>) = match name {
        "math" => ("math", math_members()),
        "string" => ("string", string_members()),
        "json" => ("json", functions(&[("dumps", json_dumps), ("loads", json_loads)])),
        "collections" => (
            "collections",
            functions(&[
                ("Counter", collections_counter),
                ("OrderedDict", collections_ordered_dict),
                ("defaultdict", collections_defaultdict),
            ]),
        ),
        "datetime" => (
            "datetime",
            functions(&[
                ("now", datetime_now),
                ("today", datetime_today),
                ("weekday", datetime_weekday),
                ("days_between", datetime_days_between),
                ("add_days", datetime_add_days),
                ("parse", datetime_parse),
            ]),
        ),
        _ => return None,
    };
    Some(Rc::new(ModuleValue {
        name,
        members: members.into_iter().collect::<HashMap<_, _>>(),
    }))
}

fn functions(entries: &[(&'static str, NativeFn)]) -> Vec<(&'static str, Value)> {
    entries
        .iter()
        .map(|&(name, func)| (name, Value::Builtin(Builtin { name, func })))
        .collect()
}

// ---- math -----------------------------------------------------------------

fn domain_error() -> ScriptError {
    ScriptError::value_error("math domain error")
}

macro_rules! float_fn {
    ($name:ident, $label:literal, $f:expr) => {
        float_fn!($name, $label, $f, |_: f64| true);
    };
    ($name:ident, $label:literal, $f:expr, $domain:expr) => {
        fn $name(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
            no_kwargs($label, &kwargs)?;
            arity($label, &args, 1, 1)?;
            let x = float_arg($label, &args[0])?;
            if !($domain)(x) {
                return Err(domain_error());
            }
            let result: f64 = ($f)(x);
            if result.is_nan() && !x.is_nan() {
                return Err(domain_error());
            }
            Ok(Value::Float(result))
        }
    };
}

float_fn!(math_sqrt, "sqrt", f64::sqrt, |x: f64| x >= 0.0);
float_fn!(math_exp, "exp", f64::exp);
float_fn!(math_log10, "log10", f64::log10, |x: f64| x > 0.0);
float_fn!(math_log2, "log2", f64::log2, |x: f64| x > 0.0);
float_fn!(math_sin, "sin", f64::sin);
float_fn!(math_cos, "cos", f64::cos);
float_fn!(math_tan, "tan", f64::tan);
float_fn!(math_asin, "asin", f64::asin, |x: f64| (-1.0..=1.0).contains(&x));
float_fn!(math_acos, "acos", f64::acos, |x: f64| (-1.0..=1.0).contains(&x));
float_fn!(math_atan, "atan", f64::atan);
float_fn!(math_fabs, "fabs", f64::abs);
float_fn!(math_degrees, "degrees", f64::to_degrees);
float_fn!(math_radians, "radians", f64::to_radians);

fn math_members() -> Vec<(&'static str, Value)> {
    let mut members = vec![
        ("pi", Value::Float(std::f64::consts::PI)),
        ("e", Value::Float(std::f64::consts::E)),
        ("tau", Value::Float(std::f64::consts::TAU)),
        ("inf", Value::Float(f64::INFINITY)),
        ("nan", Value::Float(f64::NAN)),
    ];
    members.extend(functions(&[
        ("sqrt", math_sqrt),
        ("exp", math_exp),
        ("log", math_log),
        ("log10", math_log10),
        ("log2", math_log2),
        ("sin", math_sin),
        ("cos", math_cos),
        ("tan", math_tan),
        ("asin", math_asin),
        ("acos", math_acos),
        ("atan", math_atan),
        ("atan2", math_atan2),
        ("hypot", math_hypot),
        ("fabs", math_fabs),
        ("degrees", math_degrees),
        ("radians", math_radians),
        ("floor", math_floor),
        ("ceil", math_ceil),
        ("trunc", math_trunc),
        ("factorial", math_factorial),
        ("gcd", math_gcd),
        ("isclose", math_isclose),
        ("isfinite", math_isfinite),
        ("isinf", math_isinf),
        ("isnan", math_isnan),
        ("fsum", math_fsum),
        ("prod", math_prod),
        ("pow", math_pow),
    ]));
    members
}

fn math_log(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("log", &kwargs)?;
    arity("log", &args, 1, 2)?;
    let x = float_arg("log", &args[0])?;
    if x <= 0.0 {
        return Err(domain_error());
    }
    match args.get(1) {
        None => Ok(Value::Float(x.ln())),
        Some(base) => {
            let base = float_arg("log", base)?;
            if base <= 0.0 {
                return Err(domain_error());
            }
            if base == 1.0 {
                return Err(ScriptError::raised("ZeroDivisionError", "float division by zero"));
            }
            Ok(Value::Float(x.ln() / base.ln()))
        }
    }
}

fn math_atan2(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("atan2", &kwargs)?;
    arity("atan2", &args, 2, 2)?;
    let y = float_arg("atan2", &args[0])?;
    let x = float_arg("atan2", &args[1])?;
    Ok(Value::Float(y.atan2(x)))
}

fn math_hypot(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("hypot", &kwargs)?;
    let mut sum = 0.0;
    for arg in &args {
        let v = float_arg("hypot", arg)?;
        sum += v * v;
    }
    Ok(Value::Float(sum.sqrt()))
}

fn rounding(name: &str, args: &[Value], kwargs: &Kwargs, f: fn(f64) -> f64) -> ScriptResult<Value> {
    no_kwargs(name, kwargs)?;
    arity(name, args, 1, 1)?;
    if let Some(i) = args[0].as_int() {
        return Ok(Value::Int(i));
    }
    let x = f(float_arg(name, &args[0])?);
    if x.is_nan() {
        return Err(ScriptError::value_error("cannot convert float NaN to integer"));
    }
    if !x.is_finite() || x >= i64::MAX as f64 || x < i64::MIN as f64 {
        return Err(ScriptError::raised(
            "OverflowError",
            "cannot convert float infinity to integer",
        ));
    }
    Ok(Value::Int(x as i64))
}

fn math_floor(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    rounding("floor", &args, &kwargs, f64::floor)
}

fn math_ceil(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    rounding("ceil", &args, &kwargs, f64::ceil)
}

fn math_trunc(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    rounding("trunc", &args, &kwargs, f64::trunc)
}

fn math_factorial(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("factorial", &kwargs)?;
    arity("factorial", &args, 1, 1)?;
    let n = int_arg("factorial", &args[0])?;
    if n < 0 {
        return Err(ScriptError::value_error(
            "factorial() not defined for negative values",
        ));
    }
    let mut acc: i64 = 1;
    for i in 2..=n {
        interp.tick()?;
        acc = acc
            .checked_mul(i)
            .ok_or_else(|| ScriptError::raised("OverflowError", "integer result too large"))?;
    }
    Ok(Value::Int(acc))
}

fn math_gcd(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("gcd", &kwargs)?;
    let mut acc: u64 = 0;
    for arg in &args {
        let mut b = int_arg("gcd", arg)?.unsigned_abs();
        let mut a = acc;
        while b != 0 {
            (a, b) = (b, a % b);
        }
        acc = a;
    }
    i64::try_from(acc)
        .map(Value::Int)
        .map_err(|_| ScriptError::raised("OverflowError", "integer result too large"))
}

fn math_isclose(_: &mut Interpreter, args: Vec<Value>, mut kwargs: Kwargs) -> ScriptResult<Value> {
    let rel_tol = take_kwarg(&mut kwargs, "rel_tol");
    let abs_tol = take_kwarg(&mut kwargs, "abs_tol");
    no_kwargs("isclose", &kwargs)?;
    arity("isclose", &args, 2, 2)?;
    let a = float_arg("isclose", &args[0])?;
    let b = float_arg("isclose", &args[1])?;
    let rel_tol = rel_tol.map_or(Ok(1e-9), |v| float_arg("isclose", &v))?;
    let abs_tol = abs_tol.map_or(Ok(0.0), |v| float_arg("isclose", &v))?;
    if a == b {
        return Ok(Value::Bool(true));
    }
    if a.is_infinite() || b.is_infinite() {
        return Ok(Value::Bool(false));
    }
    let diff = (a - b).abs();
    Ok(Value::Bool(
        diff <= (rel_tol * b.abs()).max(rel_tol * a.abs()) || diff <= abs_tol,
    ))
}

fn float_predicate(name: &str, args: &[Value], kwargs: &Kwargs, f: fn(f64) -> bool) -> ScriptResult<Value> {
    no_kwargs(name, kwargs)?;
    arity(name, args, 1, 1)?;
    Ok(Value::Bool(f(float_arg(name, &args[0])?)))
}

fn math_isfinite(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    float_predicate("isfinite", &args, &kwargs, f64::is_finite)
}

fn math_isinf(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    float_predicate("isinf", &args, &kwargs, f64::is_infinite)
}

fn math_isnan(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    float_predicate("isnan", &args, &kwargs, f64::is_nan)
}

fn math_fsum(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("fsum", &kwargs)?;
    arity("fsum", &args, 1, 1)?;
    // Neumaier compensated summation.
    let (mut sum, mut compensation) = (0.0f64, 0.0f64);
    interp.each(&args[0], |_, item| {
        let x = float_arg("fsum", &item)?;
        let t = sum + x;
        if sum.abs() >= x.abs() {
            compensation += (sum - t) + x;
        } else {
            compensation += (x - t) + sum;
        }
        sum = t;
        Ok(true)
    })?;
    Ok(Value::Float(sum + compensation))
}

fn math_prod(interp: &mut Interpreter, args: Vec<Value>, mut kwargs: Kwargs) -> ScriptResult<Value> {
    let start = take_kwarg(&mut kwargs, "start");
    no_kwargs("prod", &kwargs)?;
    arity("prod", &args, 1, 1)?;
    let mut acc = start.unwrap_or(Value::Int(1));
    interp.each(&args[0], |interp, item| {
        acc = interp.binary(crate::ast::BinOp::Mul, &acc, &item)?;
        Ok(true)
    })?;
    Ok(acc)
}

fn math_pow(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("pow", &kwargs)?;
    arity("pow", &args, 2, 2)?;
    let x = float_arg("pow", &args[0])?;
    let y = float_arg("pow", &args[1])?;
    let result = x.powf(y);
    if result.is_nan() && !x.is_nan() && !y.is_nan() {
        return Err(domain_error());
    }
    Ok(Value::Float(result))
}

// ---- string ---------------------------------------------------------------

const ASCII_LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const ASCII_UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";
const WHITESPACE: &str = " \t\n\r\x0b\x0c";

fn string_members() -> Vec<(&'static str, Value)> {
    let letters = format!("{ASCII_LOWERCASE}{ASCII_UPPERCASE}");
    let printable = format!("{DIGITS}{letters}{PUNCTUATION}{WHITESPACE}");
    let mut members = vec![
        ("ascii_lowercase", Value::str(ASCII_LOWERCASE)),
        ("ascii_uppercase", Value::str(ASCII_UPPERCASE)),
        ("ascii_letters", Value::str(letters)),
        ("digits", Value::str(DIGITS)),
        ("hexdigits", Value::str("0123456789abcdefABCDEF")),
        ("octdigits", Value::str("01234567")),
        ("punctuation", Value::str(PUNCTUATION)),
        ("whitespace", Value::str(WHITESPACE)),
        ("printable", Value::str(printable)),
    ];
    members.extend(functions(&[("capwords", string_capwords)]));
    members
}

fn string_capwords(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("capwords", &kwargs)?;
    arity("capwords", &args, 1, 2)?;
    let text = str_arg("capwords", &args[0])?;
    let capitalize = |word: &str| {
        let mut chars = word.chars();
        match chars.next() {
            Some(first) => first
                .to_uppercase()
                .chain(chars.as_str().to_lowercase().chars())
                .collect::<String>(),
            None => String::new(),
        }
    };
    let out = match args.get(1).filter(|v| !v.is_none()) {
        Some(sep) => {
            let sep = str_arg("capwords", sep)?;
            text.split(sep).map(capitalize).collect::<Vec<_>>().join(sep)
        }
        None => text
            .split_whitespace()
            .map(capitalize)
            .collect::<Vec<_>>()
            .join(" "),
    };
    Ok(Value::str(out))
}

// ---- json -----------------------------------------------------------------

struct JsonStyle {
    indent: Option<String>,
    item_separator: String,
    key_separator: String,
    sort_keys: bool,
    ensure_ascii: bool,
}

fn json_dumps(interp: &mut Interpreter, args: Vec<Value>, mut kwargs: Kwargs) -> ScriptResult<Value> {
    let indent = take_kwarg(&mut kwargs, "indent");
    let sort_keys = take_kwarg(&mut kwargs, "sort_keys").is_some_and(|v| v.truthy());
    let separators = take_kwarg(&mut kwargs, "separators");
    let ensure_ascii = take_kwarg(&mut kwargs, "ensure_ascii").map_or(true, |v| v.truthy());
    no_kwargs("dumps", &kwargs)?;
    arity("dumps", &args, 1, 1)?;

    let indent = match &indent {
        None | Some(Value::None) => None,
        Some(Value::Str(s)) => Some(s.to_string()),
        Some(v) => {
            let n = int_arg("dumps", v)?.max(0) as usize;
            check_len(n)?;
            Some(" ".repeat(n))
        }
    };
    let (item_separator, key_separator) = match separators {
        None | Some(Value::None) => {
            let item = if indent.is_some() { "," } else { ", " };
            (item.to_string(), ": ".to_string())
        }
        Some(v) => {
            let parts = interp.collect(&v)?;
            match parts.as_slice() {
                [item, key] => (
                    str_arg("dumps", item)?.to_string(),
                    str_arg("dumps", key)?.to_string(),
                ),
                _ => {
                    return Err(ScriptError::value_error(
                        "separators must be an (item_separator, key_separator) pair",
                    ))
                }
            }
        }
    };

    let style = JsonStyle {
        indent,
        item_separator,
        key_separator,
        sort_keys,
        ensure_ascii,
    };
    let mut out = String::new();
    write_json(&args[0], &style, 0, &mut out)?;
    Ok(Value::str(out))
}

fn write_json_str(s: &str, ensure_ascii: bool, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || (ensure_ascii && !c.is_ascii()) => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_newline(style: &JsonStyle, level: usize, out: &mut String) {
    if let Some(indent) = &style.indent {
        out.push('\n');
        for _ in 0..level {
            out.push_str(indent);
        }
    }
}

fn write_json(value: &Value, style: &JsonStyle, level: usize, out: &mut String) -> ScriptResult<()> {
    if level > 64 {
        return Err(ScriptError::value_error("Circular reference detected"));
    }
    check_len(out.len())?;
    match value {
        Value::None => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) if f.is_nan() => out.push_str("NaN"),
        Value::Float(f) if f.is_infinite() => {
            out.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" })
        }
        Value::Float(f) => out.push_str(&float_repr(*f)),
        Value::Str(s) => write_json_str(s, style.ensure_ascii, out),
        Value::List(_) | Value::Tuple(_) => {
            let items = match value {
                Value::List(items) => items.borrow().clone(),
                Value::Tuple(items) => items.as_ref().clone(),
                _ => Vec::new(),
            };
            if items.is_empty() {
                out.push_str("[]");
                return Ok(());
            }
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(&style.item_separator);
                }
                write_newline(style, level + 1, out);
                write_json(item, style, level + 1, out)?;
            }
            write_newline(style, level, out);
            out.push(']');
        }
        Value::Dict(d) => {
            let mut entries = Vec::with_capacity(d.borrow().len());
            for (k, v) in d.borrow().iter() {
                entries.push((json_key(k)?, v.clone()));
            }
            if style.sort_keys {
                entries.sort_by(|a, b| a.0.cmp(&b.0));
            }
            if entries.is_empty() {
                out.push_str("{}");
                return Ok(());
            }
            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(&style.item_separator);
                }
                write_newline(style, level + 1, out);
                write_json_str(key, style.ensure_ascii, out);
                out.push_str(&style.key_separator);
                write_json(item, style, level + 1, out)?;
            }
            write_newline(style, level, out);
            out.push('}');
        }
        other => {
            return Err(ScriptError::type_error(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            )))
        }
    }
    Ok(())
}

fn json_loads(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("loads", &kwargs)?;
    arity("loads", &args, 1, 1)?;
    let text = str_arg("loads", &args[0])?;
    serde_json::from_str::<serde_json::Value>(text)
        .map(|parsed| Value::from_json(&parsed))
        .map_err(|e| ScriptError::raised("JSONDecodeError", e))
}

// ---- collections ----------------------------------------------------------

fn collections_counter(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    arity("Counter", &args, 0, 1)?;
    let counter = Rc::new(std::cell::RefCell::new(Dict::with_kind(DictKind::Counter)));
    if let Some(source) = args.first() {
        counter_add(interp, &counter, source)?;
    }
    if !kwargs.is_empty() {
        let mut extra = Dict::new();
        for (key, value) in kwargs {
            extra.insert(Value::str(key), value)?;
        }
        counter_add(interp, &counter, &Value::dict(extra))?;
    }
    Ok(Value::Dict(counter))
}

fn collections_ordered_dict(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    arity("OrderedDict", &args, 0, 1)?;
    let mut dict = Dict::new();
    if let Some(source) = args.first() {
        for (key, value) in pairs_of(interp, source)? {
            dict.insert(key, value)?;
        }
    }
    for (key, value) in kwargs {
        dict.insert(Value::str(key), value)?;
    }
    Ok(Value::dict(dict))
}

fn collections_defaultdict(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("defaultdict", &kwargs)?;
    arity("defaultdict", &args, 0, 2)?;
    let kind = match args.first() {
        None | Some(Value::None) => DictKind::Plain,
        Some(factory @ (Value::Function(_) | Value::Builtin(_) | Value::Method(_))) => {
            DictKind::Default(factory.clone())
        }
        Some(other) => {
            return Err(ScriptError::type_error(format!(
                "first argument must be callable or None, not {}",
                other.type_name()
            )))
        }
    };
    let mut dict = Dict::with_kind(kind);
    if let Some(source) = args.get(1) {
        for (key, value) in pairs_of(interp, source)? {
            dict.insert(key, value)?;
        }
    }
    Ok(Value::dict(dict))
}

// ---- datetime -------------------------------------------------------------
//
// Dates and timestamps cross the tool boundary as ISO 8601 strings, so every
// function takes and returns text.

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn parse_moment(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, DATE_FORMAT) {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(moment) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(moment.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

fn date_arg(name: &str, value: &Value) -> ScriptResult<NaiveDateTime> {
    let text = str_arg(name, value)?;
    parse_moment(text).ok_or_else(|| {
        ScriptError::value_error(format!("Invalid isoformat string: {}", str_repr(text)))
    })
}

fn datetime_now(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("now", &kwargs)?;
    arity("now", &args, 0, 0)?;
    Ok(Value::str(Utc::now().format(DATETIME_FORMAT).to_string()))
}

fn datetime_today(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("today", &kwargs)?;
    arity("today", &args, 0, 0)?;
    Ok(Value::str(Utc::now().date_naive().format(DATE_FORMAT).to_string()))
}

fn datetime_weekday(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("weekday", &kwargs)?;
    arity("weekday", &args, 1, 1)?;
    let moment = date_arg("weekday", &args[0])?;
    Ok(Value::Int(moment.weekday().num_days_from_monday() as i64))
}

fn datetime_days_between(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("days_between", &kwargs)?;
    arity("days_between", &args, 2, 2)?;
    let start = date_arg("days_between", &args[0])?.date();
    let end = date_arg("days_between", &args[1])?.date();
    Ok(Value::Int((end - start).num_days()))
}

fn datetime_add_days(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("add_days", &kwargs)?;
    arity("add_days", &args, 2, 2)?;
    let text = str_arg("add_days", &args[0])?;
    let moment = date_arg("add_days", &args[0])?;
    let days = int_arg("add_days", &args[1])?;
    let shifted = Duration::try_days(days)
        .and_then(|delta| moment.checked_add_signed(delta))
        .ok_or_else(|| ScriptError::raised("OverflowError", "date value out of range"))?;
    let format = if NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).is_ok() {
        DATE_FORMAT
    } else {
        DATETIME_FORMAT
    };
    Ok(Value::str(shifted.format(format).to_string()))
}

fn datetime_parse(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("parse", &kwargs)?;
    arity("parse", &args, 1, 2)?;
    let text = str_arg("parse", &args[0])?;
    let Some(format) = args.get(1) else {
        let moment = date_arg("parse", &args[0])?;
        return Ok(Value::str(moment.format(DATETIME_FORMAT).to_string()));
    };
    let format = str_arg("parse", format)?;
    let invalid = || {
        ScriptError::value_error(format!(
            "time data {} does not match format {}",
            str_repr(text),
            str_repr(format)
        ))
    };
    match NaiveDateTime::parse_from_str(text, format) {
        Ok(moment) => Ok(Value::str(moment.format(DATETIME_FORMAT).to_string())),
        Err(_) => NaiveDate::parse_from_str(text, format)
            .map_err(|_| invalid())
            .and_then(|date| date.and_hms_opt(0, 0, 0).ok_or_else(invalid))
            .map(|moment| Value::str(moment.format(DATETIME_FORMAT).to_string())),
    }
}
