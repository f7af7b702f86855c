//! Built-in functions visible to every tool.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::ast::BinOp;
use crate::error::{ScriptError, ScriptResult};
use crate::interpreter::Interpreter;
use crate::methods;
use crate::value::*;

macro_rules! exceptions {
    ($($name:ident),* $(,)?) => {
        /// Exception types tool code may raise and test with `isinstance`.
        pub const EXCEPTION_KINDS: &[&str] = &[$(stringify!($name)),*];

        fn exception_constructors(table: &mut HashMap<&'static str, Value>) {
            $(
                table.insert(
                    stringify!($name),
                    Value::Builtin(Builtin {
                        name: stringify!($name),
                        func: {
                            fn construct(
                                _: &mut Interpreter,
                                args: Vec<Value>,
                                kwargs: Kwargs,
                            ) -> ScriptResult<Value> {
                                new_exception(stringify!($name), args, kwargs)
                            }
                            construct
                        },
                    }),
                );
            )*
        }
    };
}

exceptions!(
    Exception,
    ArithmeticError,
    AssertionError,
    AttributeError,
    IndexError,
    KeyError,
    LookupError,
    MemoryError,
    NameError,
    NotImplementedError,
    OverflowError,
    RecursionError,
    RuntimeError,
    TypeError,
    ValueError,
    ZeroDivisionError,
);

pub fn is_exception(name: &str) -> bool {
    EXCEPTION_KINDS.contains(&name)
}

fn new_exception(kind: &'static str, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs(kind, &kwargs)?;
    let message = match args.as_slice() {
        [] => String::new(),
        [single] => single.to_str(),
        many => Value::tuple(many.to_vec()).repr(),
    };
    Ok(Value::exception(kind, message))
}

pub fn table() -> HashMap<&'static str, Value> {
    let entries: &[(&'static str, NativeFn)] = &[
        ("abs", builtin_abs),
        ("all", builtin_all),
        ("any", builtin_any),
        ("bin", builtin_bin),
        ("bool", builtin_bool),
        ("callable", builtin_callable),
        ("chr", builtin_chr),
        ("dict", builtin_dict),
        ("divmod", builtin_divmod),
        ("enumerate", builtin_enumerate),
        ("filter", builtin_filter),
        ("float", builtin_float),
        ("format", builtin_format),
        ("hex", builtin_hex),
        ("int", builtin_int),
        ("isinstance", builtin_isinstance),
        ("len", builtin_len),
        ("list", builtin_list),
        ("map", builtin_map),
        ("max", builtin_max),
        ("min", builtin_min),
        ("oct", builtin_oct),
        ("ord", builtin_ord),
        ("pow", builtin_pow),
        ("print", builtin_print),
        ("range", builtin_range),
        ("repr", builtin_repr),
        ("reversed", builtin_reversed),
        ("round", builtin_round),
        ("sorted", builtin_sorted),
        ("str", builtin_str),
        ("sum", builtin_sum),
        ("tuple", builtin_tuple),
        ("zip", builtin_zip),
    ];

    let mut table: HashMap<&'static str, Value> = entries
        .iter()
        .map(|&(name, func)| (name, Value::Builtin(Builtin { name, func })))
        .collect();
    exception_constructors(&mut table);
    table
}

// ---- argument helpers -----------------------------------------------------

pub fn arity(name: &str, args: &[Value], min: usize, max: usize) -> ScriptResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else if max == usize::MAX {
            format!("at least {min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(ScriptError::type_error(format!(
            "{name}() takes {expected} argument(s) ({} given)",
            args.len()
        )));
    }
    Ok(())
}

pub fn no_kwargs(name: &str, kwargs: &Kwargs) -> ScriptResult<()> {
    match kwargs.first() {
        Some((key, _)) => Err(ScriptError::type_error(format!(
            "'{key}' is an invalid keyword argument for {name}()"
        ))),
        None => Ok(()),
    }
}

pub fn take_kwarg(kwargs: &mut Kwargs, key: &str) -> Option<Value> {
    let position = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(position).1)
}

pub fn int_arg(name: &str, value: &Value) -> ScriptResult<i64> {
    value.as_int().ok_or_else(|| {
        ScriptError::type_error(format!(
            "{name}() expected an integer, got '{}'",
            value.type_name()
        ))
    })
}

pub fn float_arg(name: &str, value: &Value) -> ScriptResult<f64> {
    value.as_f64().ok_or_else(|| {
        ScriptError::type_error(format!(
            "{name}() expected a number, got '{}'",
            value.type_name()
        ))
    })
}

pub fn str_arg<'a>(name: &str, value: &'a Value) -> ScriptResult<&'a str> {
    value.as_str().ok_or_else(|| {
        ScriptError::type_error(format!(
            "{name}() expected a string, got '{}'",
            value.type_name()
        ))
    })
}

/// Key/value pairs from a mapping or an iterable of two-item sequences.
pub fn pairs_of(interp: &mut Interpreter, source: &Value) -> ScriptResult<Vec<(Value, Value)>> {
    if let Value::Dict(d) = source {
        return Ok(d.borrow().iter().cloned().collect());
    }
    let mut pairs = Vec::new();
    for item in interp.collect(source)? {
        let parts = interp.collect(&item)?;
        let [key, value]: [Value; 2] = parts.try_into().map_err(|parts: Vec<Value>| {
            ScriptError::value_error(format!(
                "dictionary update sequence element has length {}; 2 is required",
                parts.len()
            ))
        })?;
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// Stable sort by an optional key function.
pub fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> ScriptResult<Vec<Value>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let k = match &key {
            Some(f) if !f.is_none() => interp.call(f, vec![item.clone()], Vec::new())?,
            _ => item.clone(),
        };
        keyed.push((k, item));
    }
    interp.tick()?;

    let mut failure = None;
    keyed.sort_by(|a, b| {
        let (x, y) = if reverse { (&b.0, &a.0) } else { (&a.0, &b.0) };
        x.py_cmp(y).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
    }
}

fn extreme(
    name: &str,
    interp: &mut Interpreter,
    args: Vec<Value>,
    mut kwargs: Kwargs,
    wanted: Ordering,
) -> ScriptResult<Value> {
    let key = take_kwarg(&mut kwargs, "key");
    let default = take_kwarg(&mut kwargs, "default");
    no_kwargs(name, &kwargs)?;
    arity(name, &args, 1, usize::MAX)?;

    let items = if args.len() == 1 {
        interp.collect(&args[0])?
    } else {
        args
    };

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) if !f.is_none() => interp.call(f, vec![item.clone()], Vec::new())?,
            _ => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => k.py_cmp(best_key)? == wanted,
        };
        if replace {
            best = Some((k, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ScriptError::value_error(format!(
            "{name}() arg is an empty sequence"
        ))),
    }
}

/// Round half to even at `ndigits` decimal places.
fn round_half_even(x: f64, ndigits: i32) -> f64 {
    // Every finite float is below 10**309.
    if ndigits < -308 && x.is_finite() {
        return 0.0f64.copysign(x);
    }
    let factor = 10f64.powi(ndigits);
    let scaled = x * factor;
    if !scaled.is_finite() {
        return x;
    }
    let floor = scaled.floor();
    let diff = scaled - floor;
    let rounded = if diff > 0.5 {
        floor + 1.0
    } else if diff < 0.5 {
        floor
    } else if floor % 2.0 == 0.0 {
        floor
    } else {
        floor + 1.0
    };
    rounded / factor
}

fn float_to_int(f: f64) -> ScriptResult<i64> {
    if f.is_nan() {
        return Err(ScriptError::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() || f >= i64::MAX as f64 || f < i64::MIN as f64 {
        return Err(ScriptError::raised(
            "OverflowError",
            "cannot convert float infinity to integer",
        ));
    }
    Ok(f.trunc() as i64)
}

fn parse_int(text: &str, base: u32) -> Option<i64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, cleaned.trim_start_matches('+').to_string()),
    };
    let lower = digits.to_ascii_lowercase();
    let digits = match base {
        16 => lower.strip_prefix("0x").unwrap_or(&lower),
        8 => lower.strip_prefix("0o").unwrap_or(&lower),
        2 => lower.strip_prefix("0b").unwrap_or(&lower),
        _ => &lower,
    };
    if digits.is_empty() {
        return None;
    }
    let magnitude = i128::from_str_radix(digits, base).ok()?;
    i64::try_from(if negative { -magnitude } else { magnitude }).ok()
}

fn radix_text(name: &str, args: &[Value], prefix: &str, radix: fn(u64) -> String) -> ScriptResult<Value> {
    arity(name, args, 1, 1)?;
    let n = int_arg(name, &args[0])?;
    let sign = if n < 0 { "-" } else { "" };
    Ok(Value::str(format!("{sign}{prefix}{}", radix(n.unsigned_abs()))))
}

fn type_matches(value: &Value, class: &Value) -> ScriptResult<bool> {
    let name = match class {
        Value::Builtin(b) => b.name,
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if type_matches(value, class)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        other => {
            return Err(ScriptError::type_error(format!(
                "isinstance() arg 2 must be a type or tuple of types, not {}",
                other.type_name()
            )))
        }
    };
    Ok(match (name, value) {
        ("int", Value::Int(_) | Value::Bool(_)) => true,
        ("bool", Value::Bool(_)) => true,
        ("float", Value::Float(_)) => true,
        ("str", Value::Str(_)) => true,
        ("list", Value::List(_)) => true,
        ("tuple", Value::Tuple(_)) => true,
        ("dict", Value::Dict(_)) => true,
        ("range", Value::Range(_)) => true,
        ("Counter" | "defaultdict", Value::Dict(_)) => value.type_name() == name,
        ("Exception", Value::Exception(_)) => true,
        (kind, Value::Exception(e)) => e.kind == kind,
        _ => false,
    })
}

// ---- built-in functions ---------------------------------------------------

fn builtin_abs(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("abs", &kwargs)?;
    arity("abs", &args, 1, 1)?;
    match &args[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        v => {
            let n = int_arg("abs", v)?;
            n.checked_abs()
                .map(Value::Int)
                .ok_or_else(|| ScriptError::raised("OverflowError", "integer result too large"))
        }
    }
}

fn builtin_all(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("all", &kwargs)?;
    arity("all", &args, 1, 1)?;
    let mut result = true;
    interp.each(&args[0], |_, item| {
        result = item.truthy();
        Ok(result)
    })?;
    Ok(Value::Bool(result))
}

fn builtin_any(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("any", &kwargs)?;
    arity("any", &args, 1, 1)?;
    let mut result = false;
    interp.each(&args[0], |_, item| {
        result = item.truthy();
        Ok(!result)
    })?;
    Ok(Value::Bool(result))
}

fn builtin_bin(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("bin", &kwargs)?;
    radix_text("bin", &args, "0b", |n| format!("{n:b}"))
}

fn builtin_hex(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("hex", &kwargs)?;
    radix_text("hex", &args, "0x", |n| format!("{n:x}"))
}

fn builtin_oct(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("oct", &kwargs)?;
    radix_text("oct", &args, "0o", |n| format!("{n:o}"))
}

fn builtin_bool(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("bool", &kwargs)?;
    arity("bool", &args, 0, 1)?;
    Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
}

fn builtin_callable(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("callable", &kwargs)?;
    arity("callable", &args, 1, 1)?;
    Ok(Value::Bool(matches!(
        args[0],
        Value::Function(_) | Value::Builtin(_) | Value::Method(_)
    )))
}

fn builtin_chr(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("chr", &kwargs)?;
    arity("chr", &args, 1, 1)?;
    let code = int_arg("chr", &args[0])?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::str(c.to_string()))
        .ok_or_else(|| ScriptError::value_error("chr() arg not in range(0x110000)"))
}

fn builtin_ord(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("ord", &kwargs)?;
    arity("ord", &args, 1, 1)?;
    let text = str_arg("ord", &args[0])?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => Err(ScriptError::type_error(format!(
            "ord() expected a character, but string of length {} found",
            text.chars().count()
        ))),
    }
}

fn builtin_dict(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    arity("dict", &args, 0, 1)?;
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

fn builtin_divmod(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("divmod", &kwargs)?;
    arity("divmod", &args, 2, 2)?;
    let quotient = interp.binary(BinOp::FloorDiv, &args[0], &args[1])?;
    let remainder = interp.binary(BinOp::Mod, &args[0], &args[1])?;
    Ok(Value::tuple(vec![quotient, remainder]))
}

fn builtin_enumerate(interp: &mut Interpreter, args: Vec<Value>, mut kwargs: Kwargs) -> ScriptResult<Value> {
    let start = take_kwarg(&mut kwargs, "start");
    no_kwargs("enumerate", &kwargs)?;
    arity("enumerate", &args, 1, 2)?;
    let start = match args.get(1).or(start.as_ref()) {
        Some(v) => int_arg("enumerate", v)?,
        None => 0,
    };
    let items = interp.collect(&args[0])?;
    Ok(Value::list(
        items
            .into_iter()
            .zip(start..)
            .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]))
            .collect(),
    ))
}

fn builtin_filter(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("filter", &kwargs)?;
    arity("filter", &args, 2, 2)?;
    let predicate = args[0].clone();
    let mut kept = Vec::new();
    interp.each(&args[1], |interp, item| {
        let keep = if predicate.is_none() {
            item.truthy()
        } else {
            interp.call(&predicate, vec![item.clone()], Vec::new())?.truthy()
        };
        if keep {
            kept.push(item);
        }
        Ok(true)
    })?;
    Ok(Value::list(kept))
}

fn builtin_float(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("float", &kwargs)?;
    arity("float", &args, 0, 1)?;
    match args.first() {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => {
            let trimmed = s.trim().replace('_', "");
            trimmed.parse::<f64>().map(Value::Float).map_err(|_| {
                ScriptError::value_error(format!("could not convert string to float: {}", str_repr(s)))
            })
        }
        Some(v) => v.as_f64().map(Value::Float).ok_or_else(|| {
            ScriptError::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

fn builtin_format(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("format", &kwargs)?;
    arity("format", &args, 1, 2)?;
    let spec = match args.get(1) {
        Some(v) => str_arg("format", v)?,
        None => "",
    };
    methods::format_value(&args[0], spec).map(Value::str)
}

fn builtin_int(_: &mut Interpreter, args: Vec<Value>, mut kwargs: Kwargs) -> ScriptResult<Value> {
    let base = take_kwarg(&mut kwargs, "base");
    no_kwargs("int", &kwargs)?;
    arity("int", &args, 0, 2)?;
    let base = match args.get(1).or(base.as_ref()) {
        Some(v) => Some(int_arg("int", v)?),
        None => None,
    };
    match (args.first(), base) {
        (None, _) => Ok(Value::Int(0)),
        (Some(Value::Str(s)), base) => {
            let radix = base.unwrap_or(10);
            if !(2..=36).contains(&radix) {
                return Err(ScriptError::value_error("int() base must be >= 2 and <= 36"));
            }
            parse_int(s, radix as u32).map(Value::Int).ok_or_else(|| {
                ScriptError::value_error(format!(
                    "invalid literal for int() with base {radix}: {}",
                    str_repr(s)
                ))
            })
        }
        (Some(_), Some(_)) => Err(ScriptError::type_error(
            "int() can't convert non-string with explicit base",
        )),
        (Some(Value::Float(f)), None) => float_to_int(*f).map(Value::Int),
        (Some(v), None) => v.as_int().map(Value::Int).ok_or_else(|| {
            ScriptError::type_error(format!(
                "int() argument must be a string or a number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

fn builtin_isinstance(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("isinstance", &kwargs)?;
    arity("isinstance", &args, 2, 2)?;
    type_matches(&args[0], &args[1]).map(Value::Bool)
}

fn builtin_len(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("len", &kwargs)?;
    arity("len", &args, 1, 1)?;
    let len = args[0].len()?;
    i64::try_from(len)
        .map(Value::Int)
        .map_err(|_| ScriptError::raised("OverflowError", "length does not fit in an integer"))
}

fn builtin_list(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("list", &kwargs)?;
    arity("list", &args, 0, 1)?;
    match args.first() {
        Some(source) => Ok(Value::list(interp.collect(source)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn builtin_map(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("map", &kwargs)?;
    arity("map", &args, 2, usize::MAX)?;
    let func = args[0].clone();
    let mut columns = Vec::with_capacity(args.len() - 1);
    for source in &args[1..] {
        columns.push(interp.collect(source)?);
    }
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
        let call_args = columns.iter().map(|c| c[row].clone()).collect();
        out.push(interp.call(&func, call_args, Vec::new())?);
    }
    Ok(Value::list(out))
}

fn builtin_max(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    extreme("max", interp, args, kwargs, Ordering::Greater)
}

fn builtin_min(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    extreme("min", interp, args, kwargs, Ordering::Less)
}

fn builtin_pow(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("pow", &kwargs)?;
    arity("pow", &args, 2, 3)?;
    let Some(modulus) = args.get(2).filter(|m| !m.is_none()) else {
        return interp.binary(BinOp::Pow, &args[0], &args[1]);
    };
    let base = int_arg("pow", &args[0])? as i128;
    let exp = int_arg("pow", &args[1])?;
    let modulus = int_arg("pow", modulus)? as i128;
    if modulus == 0 {
        return Err(ScriptError::value_error("pow() 3rd argument cannot be 0"));
    }
    if exp < 0 {
        return Err(ScriptError::value_error(
            "pow() 2nd argument cannot be negative when 3rd argument specified",
        ));
    }
    let mut result: i128 = 1;
    let mut base = base.rem_euclid(modulus.abs());
    let mut exp = exp as u64;
    while exp > 0 {
        if exp & 1 == 1 {
            result = (result * base).rem_euclid(modulus.abs());
        }
        base = (base * base).rem_euclid(modulus.abs());
        exp >>= 1;
    }
    if modulus < 0 && result != 0 {
        result += modulus;
    }
    Ok(Value::Int(result as i64))
}

fn builtin_print(interp: &mut Interpreter, args: Vec<Value>, mut kwargs: Kwargs) -> ScriptResult<Value> {
    let sep = take_kwarg(&mut kwargs, "sep");
    let end = take_kwarg(&mut kwargs, "end");
    no_kwargs("print", &kwargs)?;
    let text_or = |value: Option<Value>, default: &str| match &value {
        Some(Value::None) | None => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(ScriptError::type_error(format!(
            "print() separator must be None or a string, not {}",
            other.type_name()
        ))),
    };
    let sep = text_or(sep, " ")?;
    let end = text_or(end, "\n")?;
    let mut line = args.iter().map(Value::to_str).collect::<Vec<_>>().join(&sep);
    line.push_str(&end);
    interp.write_output(&line);
    Ok(Value::None)
}

fn builtin_range(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("range", &kwargs)?;
    arity("range", &args, 1, 3)?;
    let ints = args
        .iter()
        .map(|v| int_arg("range", v))
        .collect::<ScriptResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step, ..] => (*start, *stop, *step),
        [] => return Err(ScriptError::type_error("range expected at least 1 argument, got 0")),
    };
    if step == 0 {
        return Err(ScriptError::value_error("range() arg 3 must not be zero"));
    }
    Ok(Value::Range(RangeValue { start, stop, step }))
}

fn builtin_repr(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("repr", &kwargs)?;
    arity("repr", &args, 1, 1)?;
    Ok(Value::str(args[0].repr()))
}

fn builtin_reversed(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("reversed", &kwargs)?;
    arity("reversed", &args, 1, 1)?;
    let mut items = interp.collect(&args[0])?;
    items.reverse();
    Ok(Value::list(items))
}

fn builtin_round(_: &mut Interpreter, args: Vec<Value>, mut kwargs: Kwargs) -> ScriptResult<Value> {
    let ndigits = take_kwarg(&mut kwargs, "ndigits");
    no_kwargs("round", &kwargs)?;
    arity("round", &args, 1, 2)?;
    let ndigits = match args.get(1).or(ndigits.as_ref()) {
        Some(Value::None) | None => None,
        Some(v) => Some(int_arg("round", v)?),
    };
    match (&args[0], ndigits) {
        (Value::Float(f), None) => float_to_int(round_half_even(*f, 0)).map(Value::Int),
        (Value::Float(f), Some(n)) => Ok(Value::Float(round_half_even(*f, n.clamp(-309, 308) as i32))),
        (v, None) => Ok(Value::Int(int_arg("round", v)?)),
        (v, Some(n)) if n >= 0 => Ok(Value::Int(int_arg("round", v)?)),
        (v, Some(n)) => {
            let value = int_arg("round", v)?;
            if n < -18 {
                return Ok(Value::Int(0));
            }
            let factor = 10i64.pow((-n) as u32);
            let rounded = round_half_even(value as f64 / factor as f64, 0) as i64;
            rounded
                .checked_mul(factor)
                .map(Value::Int)
                .ok_or_else(|| ScriptError::raised("OverflowError", "integer result too large"))
        }
    }
}

fn builtin_sorted(interp: &mut Interpreter, args: Vec<Value>, mut kwargs: Kwargs) -> ScriptResult<Value> {
    let key = take_kwarg(&mut kwargs, "key");
    let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
    no_kwargs("sorted", &kwargs)?;
    arity("sorted", &args, 1, 1)?;
    let items = interp.collect(&args[0])?;
    sort_values(interp, items, key, reverse).map(Value::list)
}

fn builtin_str(_: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("str", &kwargs)?;
    arity("str", &args, 0, 1)?;
    Ok(Value::str(args.first().map(Value::to_str).unwrap_or_default()))
}

fn builtin_sum(interp: &mut Interpreter, args: Vec<Value>, mut kwargs: Kwargs) -> ScriptResult<Value> {
    let start = take_kwarg(&mut kwargs, "start");
    no_kwargs("sum", &kwargs)?;
    arity("sum", &args, 1, 2)?;
    let mut total = args.get(1).cloned().or(start).unwrap_or(Value::Int(0));
    if total.as_str().is_some() {
        return Err(ScriptError::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    interp.each(&args[0], |interp, item| {
        total = interp.binary(BinOp::Add, &total, &item)?;
        Ok(true)
    })?;
    Ok(total)
}

fn builtin_tuple(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("tuple", &kwargs)?;
    arity("tuple", &args, 0, 1)?;
    match args.first() {
        Some(source) => Ok(Value::tuple(interp.collect(source)?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

fn builtin_zip(interp: &mut Interpreter, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    no_kwargs("zip", &kwargs)?;
    let mut columns = Vec::with_capacity(args.len());
    for source in &args {
        columns.push(interp.collect(source)?);
    }
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    Ok(Value::list(
        (0..rows)
            .map(|row| Value::tuple(columns.iter().map(|c| c[row].clone()).collect()))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.5, 0), 2.0);
        assert_eq!(round_half_even(3.5, 0), 4.0);
        assert_eq!(round_half_even(-0.5, 0), -0.0);
        assert_eq!(round_half_even(1.234, 2), 1.23);
    }

    #[test]
    fn test_parse_int_bases() {
        assert_eq!(parse_int(" 42 ", 10), Some(42));
        assert_eq!(parse_int("-0x1f", 16), Some(-31));
        assert_eq!(parse_int("1_000", 10), Some(1000));
        assert_eq!(parse_int("12a", 10), None);
        assert_eq!(parse_int("", 10), None);
    }

    #[test]
    fn test_exception_kinds_have_constructors() {
        let table = table();
        for kind in EXCEPTION_KINDS {
            assert!(matches!(table.get(kind), Some(Value::Builtin(_))), "{kind}");
        }
        assert!(is_exception("ValueError"));
        assert!(!is_exception("len"));
    }
}
