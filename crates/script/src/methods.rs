//! Methods on built-in values and string formatting.

use std::cell::RefCell;
use std::rc::Rc;

use crate::builtins::{arity, int_arg, no_kwargs, pairs_of, sort_values, str_arg, take_kwarg};
use crate::error::{ScriptError, ScriptResult};
use crate::interpreter::{Index, Interpreter};
use crate::value::*;

const STR_METHODS: &[&str] = &[
    "capitalize", "center", "count", "endswith", "find", "format", "index", "isalnum", "isalpha",
    "isdigit", "islower", "isspace", "isupper", "join", "ljust", "lower", "lstrip", "partition",
    "replace", "rfind", "rindex", "rjust", "rpartition", "rsplit", "rstrip", "split",
    "splitlines", "startswith", "strip", "swapcase", "title", "upper", "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "popitem", "setdefault", "update", "values",
];

const COUNTER_METHODS: &[&str] = &["elements", "most_common", "total"];

pub fn has_method(receiver: &Value, name: &str) -> bool {
    match receiver {
        Value::Str(_) => STR_METHODS.contains(&name),
        Value::List(_) => LIST_METHODS.contains(&name),
        Value::Tuple(_) => TUPLE_METHODS.contains(&name),
        Value::Dict(d) => {
            DICT_METHODS.contains(&name)
                || (matches!(d.borrow().kind, DictKind::Counter) && COUNTER_METHODS.contains(&name))
        }
        Value::Float(_) => name == "is_integer",
        _ => false,
    }
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> ScriptResult<Value> {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args, kwargs),
        Value::List(items) => list_method(interp, items, name, args, kwargs),
        Value::Tuple(items) => {
            no_kwargs(name, &kwargs)?;
            sequence_method(items, name, &args, "tuple")
        }
        Value::Dict(d) => dict_method(interp, d, name, args, kwargs),
        Value::Float(f) if name == "is_integer" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
        }
        other => Err(ScriptError::raised(
            "AttributeError",
            format!("'{}' object has no attribute '{name}'", other.type_name()),
        )),
    }
}

// ---- str ------------------------------------------------------------------

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn affix_matches(value: &Value, test: impl Fn(&str) -> bool, name: &str) -> ScriptResult<bool> {
    match value {
        Value::Str(affix) => Ok(test(affix)),
        Value::Tuple(options) => {
            for option in options.iter() {
                if test(str_arg(name, option)?) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(ScriptError::type_error(format!(
            "{name} first arg must be str or a tuple of str, not {}",
            other.type_name()
        ))),
    }
}

fn strip_chars(args: &[Value], name: &str) -> ScriptResult<Option<Vec<char>>> {
    match args.first() {
        None | Some(Value::None) => Ok(None),
        Some(v) => Ok(Some(str_arg(name, v)?.chars().collect())),
    }
}

fn pad(s: &str, width: i64, fill: char, align: char) -> ScriptResult<String> {
    let len = s.chars().count();
    let width = width.max(0) as usize;
    if width <= len {
        return Ok(s.to_string());
    }
    check_len(width)?;
    let total = width - len;
    let (left, right) = match align {
        '<' => (0, total),
        '>' => (total, 0),
        _ => (total / 2, total - total / 2),
    };
    let mut out = String::with_capacity(width);
    out.extend(std::iter::repeat(fill).take(left));
    out.push_str(s);
    out.extend(std::iter::repeat(fill).take(right));
    Ok(out)
}

fn fill_arg(args: &[Value], name: &str) -> ScriptResult<char> {
    match args.get(1) {
        None => Ok(' '),
        Some(v) => {
            let text = str_arg(name, v)?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(ScriptError::type_error(
                    "The fill character must be exactly one character long",
                )),
            }
        }
    }
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 >= maxsplit {
            parts.push(Value::str(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

fn str_method(
    interp: &mut Interpreter,
    s: &Rc<str>,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> ScriptResult<Value> {
    if name == "format" {
        return format_string(interp, s, &args, &kwargs).map(Value::str);
    }
    if matches!(name, "split" | "rsplit") {
        let sep = take_kwarg(&mut kwargs, "sep");
        let maxsplit = take_kwarg(&mut kwargs, "maxsplit");
        no_kwargs(name, &kwargs)?;
        arity(name, &args, 0, 2)?;
        let sep = args.first().cloned().or(sep).unwrap_or(Value::None);
        let maxsplit = match args.get(1).or(maxsplit.as_ref()) {
            Some(v) => int_arg(name, v)?,
            None => -1,
        };
        return split(s, name == "rsplit", &sep, maxsplit);
    }
    no_kwargs(name, &kwargs)?;

    let text: &str = s;
    let bool_of = |f: fn(char) -> bool| Value::Bool(!text.is_empty() && text.chars().all(f));
    let cased = |upper: bool| {
        let mut any_cased = false;
        for c in text.chars() {
            if c.is_lowercase() || c.is_uppercase() {
                any_cased = true;
                if c.is_uppercase() != upper {
                    return Value::Bool(false);
                }
            }
        }
        Value::Bool(any_cased)
    };

    match name {
        "upper" => Ok(Value::str(text.to_uppercase())),
        "lower" => Ok(Value::str(text.to_lowercase())),
        "swapcase" => Ok(Value::str(
            text.chars()
                .flat_map(|c| -> Vec<char> {
                    if c.is_uppercase() {
                        c.to_lowercase().collect()
                    } else {
                        c.to_uppercase().collect()
                    }
                })
                .collect::<String>(),
        )),
        "title" => Ok(Value::str(title_case(text))),
        "capitalize" => {
            let mut chars = text.chars();
            let out: String = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                None => String::new(),
            };
            Ok(Value::str(out))
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(name, &args, 0, 1)?;
            let chars = strip_chars(&args, name)?;
            let matcher = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let out = match name {
                "strip" => text.trim_matches(matcher),
                "lstrip" => text.trim_start_matches(matcher),
                _ => text.trim_end_matches(matcher),
            };
            Ok(Value::str(out))
        }
        "splitlines" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(text.lines().map(Value::str).collect()))
        }
        "join" => {
            arity(name, &args, 1, 1)?;
            let items = interp.collect(&args[0])?;
            let mut parts = Vec::with_capacity(items.len());
            let mut total = 0usize;
            for (i, item) in items.iter().enumerate() {
                let part = item.as_str().ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "sequence item {i}: expected str instance, {} found",
                        item.type_name()
                    ))
                })?;
                total += part.len() + text.len();
                check_len(total)?;
                parts.push(part);
            }
            Ok(Value::str(parts.join(text)))
        }
        "replace" => {
            arity(name, &args, 2, 3)?;
            let old = str_arg(name, &args[0])?;
            let new = str_arg(name, &args[1])?;
            let count = match args.get(2) {
                Some(v) => int_arg(name, v)?,
                None => -1,
            };
            let occurrences = if old.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(old).count()
            };
            let replaced = if count < 0 {
                occurrences
            } else {
                occurrences.min(count as usize)
            };
            check_len(text.len() + replaced.saturating_mul(new.len()))?;
            Ok(Value::str(text.replacen(old, new, replaced)))
        }
        "startswith" | "endswith" => {
            arity(name, &args, 1, 1)?;
            let starts = name == "startswith";
            affix_matches(
                &args[0],
                |affix| {
                    if starts {
                        text.starts_with(affix)
                    } else {
                        text.ends_with(affix)
                    }
                },
                name,
            )
            .map(Value::Bool)
        }
        "find" | "rfind" | "index" | "rindex" => {
            arity(name, &args, 1, 1)?;
            let sub = str_arg(name, &args[0])?;
            let found = if name.starts_with('r') {
                text.rfind(sub)
            } else {
                text.find(sub)
            };
            match found {
                Some(byte) => Ok(Value::Int(char_index(text, byte))),
                None if name.ends_with("find") => Ok(Value::Int(-1)),
                None => Err(ScriptError::value_error("substring not found")),
            }
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let sub = str_arg(name, &args[0])?;
            let n = if sub.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(sub).count()
            };
            Ok(Value::Int(n as i64))
        }
        "partition" | "rpartition" => {
            arity(name, &args, 1, 1)?;
            let sep = str_arg(name, &args[0])?;
            if sep.is_empty() {
                return Err(ScriptError::value_error("empty separator"));
            }
            let split = if name == "partition" {
                text.split_once(sep)
            } else {
                text.rsplit_once(sep)
            };
            let parts = match split {
                Some((head, tail)) => [head, sep, tail],
                None if name == "partition" => [text, "", ""],
                None => ["", "", text],
            };
            Ok(Value::tuple(parts.into_iter().map(Value::str).collect()))
        }
        "center" | "ljust" | "rjust" => {
            arity(name, &args, 1, 2)?;
            let width = int_arg(name, &args[0])?;
            let fill = fill_arg(&args, name)?;
            let align = match name {
                "ljust" => '<',
                "rjust" => '>',
                _ => '^',
            };
            pad(text, width, fill, align).map(Value::str)
        }
        "zfill" => {
            arity(name, &args, 1, 1)?;
            let width = int_arg(name, &args[0])?.max(0) as usize;
            let len = text.chars().count();
            if width <= len {
                return Ok(Value::str(text));
            }
            check_len(width)?;
            let (sign, digits) = match text.chars().next() {
                Some(c @ ('+' | '-')) => (c.to_string(), &text[1..]),
                _ => (String::new(), text),
            };
            Ok(Value::str(format!("{sign}{}{digits}", "0".repeat(width - len))))
        }
        "isdigit" => Ok(bool_of(|c| c.is_ascii_digit())),
        "isalpha" => Ok(bool_of(char::is_alphabetic)),
        "isalnum" => Ok(bool_of(char::is_alphanumeric)),
        "isspace" => Ok(bool_of(char::is_whitespace)),
        "isupper" => Ok(cased(true)),
        "islower" => Ok(cased(false)),
        _ => Err(ScriptError::raised(
            "AttributeError",
            format!("'str' object has no attribute '{name}'"),
        )),
    }
}

fn split(s: &str, from_right: bool, sep: &Value, maxsplit: i64) -> ScriptResult<Value> {
    let sep = match sep {
        Value::None => {
            if from_right && maxsplit >= 0 {
                let mut parts: Vec<String> = Vec::new();
                let mut rest = s.trim_end();
                while !rest.is_empty() {
                    if parts.len() as i64 >= maxsplit {
                        parts.push(rest.to_string());
                        break;
                    }
                    match rest.rfind(char::is_whitespace) {
                        Some(start) => {
                            let ws_len = rest[start..].chars().next().map_or(1, char::len_utf8);
                            parts.push(rest[start + ws_len..].to_string());
                            rest = rest[..start].trim_end();
                        }
                        None => {
                            parts.push(rest.to_string());
                            break;
                        }
                    }
                }
                parts.reverse();
                return Ok(Value::list(parts.into_iter().map(Value::str).collect()));
            }
            return Ok(Value::list(split_whitespace(s, maxsplit)));
        }
        other => str_arg("split", other)?,
    };
    if sep.is_empty() {
        return Err(ScriptError::value_error("empty separator"));
    }
    let parts: Vec<Value> = match (maxsplit < 0, from_right) {
        (true, _) => s.split(sep).map(Value::str).collect(),
        (false, false) => s.splitn(maxsplit as usize + 1, sep).map(Value::str).collect(),
        (false, true) => {
            let mut parts: Vec<Value> = s.rsplitn(maxsplit as usize + 1, sep).map(Value::str).collect();
            parts.reverse();
            parts
        }
    };
    Ok(Value::list(parts))
}

// ---- sequences ------------------------------------------------------------

fn sequence_method(items: &[Value], name: &str, args: &[Value], type_name: &str) -> ScriptResult<Value> {
    arity(name, args, 1, 1)?;
    match name {
        "count" => Ok(Value::Int(items.iter().filter(|v| v.py_eq(&args[0])).count() as i64)),
        "index" => items
            .iter()
            .position(|v| v.py_eq(&args[0]))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| {
                ScriptError::value_error(format!("{} is not in {type_name}", args[0].repr()))
            }),
        _ => Err(ScriptError::raised(
            "AttributeError",
            format!("'{type_name}' object has no attribute '{name}'"),
        )),
    }
}

fn list_method(
    interp: &mut Interpreter,
    items: &Rc<RefCell<Vec<Value>>>,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> ScriptResult<Value> {
    if name == "sort" {
        let key = take_kwarg(&mut kwargs, "key");
        let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
        no_kwargs(name, &kwargs)?;
        arity(name, &args, 0, 0)?;
        let snapshot = items.borrow().clone();
        let sorted = sort_values(interp, snapshot, key, reverse)?;
        *items.borrow_mut() = sorted;
        return Ok(Value::None);
    }
    no_kwargs(name, &kwargs)?;

    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            let mut items = items.borrow_mut();
            check_len(items.len() + 1)?;
            items.extend(args);
            Ok(Value::None)
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let extra = interp.collect(&args[0])?;
            let mut items = items.borrow_mut();
            check_len(items.len() + extra.len())?;
            items.extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let mut items = items.borrow_mut();
            check_len(items.len() + 1)?;
            let len = items.len() as i64;
            let i = int_arg(name, &args[0])?;
            let at = if i < 0 { (i + len).max(0) } else { i.min(len) };
            items.insert(at as usize, args[1].clone());
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(ScriptError::raised("IndexError", "pop from empty list"));
            }
            let len = items.len() as i64;
            let i = match args.first() {
                Some(v) => int_arg(name, v)?,
                None => -1,
            };
            let at = if i < 0 { i + len } else { i };
            if !(0..len).contains(&at) {
                return Err(ScriptError::raised("IndexError", "pop index out of range"));
            }
            Ok(items.remove(at as usize))
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            let mut items = items.borrow_mut();
            match items.iter().position(|v| v.py_eq(&args[0])) {
                Some(at) => {
                    items.remove(at);
                    Ok(Value::None)
                }
                None => Err(ScriptError::value_error("list.remove(x): x not in list")),
            }
        }
        "reverse" => {
            arity(name, &args, 0, 0)?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(items.borrow().clone()))
        }
        _ => sequence_method(&items.borrow(), name, &args, "list"),
    }
}

// ---- dict -----------------------------------------------------------------

/// Add occurrence counts from `source` into a counter. Mappings contribute
/// their values, other iterables one per element.
pub fn counter_add(interp: &mut Interpreter, target: &Rc<RefCell<Dict>>, source: &Value) -> ScriptResult<()> {
    let increments: Vec<(Value, Value)> = match source {
        Value::Dict(d) => d.borrow().iter().cloned().collect(),
        other => interp
            .collect(other)?
            .into_iter()
            .map(|item| (item, Value::Int(1)))
            .collect(),
    };
    for (key, amount) in increments {
        let current = target.borrow().get(&key)?.unwrap_or(Value::Int(0));
        let updated = interp.binary(crate::ast::BinOp::Add, &current, &amount)?;
        target.borrow_mut().insert(key, updated)?;
    }
    Ok(())
}

fn dict_method(
    interp: &mut Interpreter,
    d: &Rc<RefCell<Dict>>,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> ScriptResult<Value> {
    let is_counter = matches!(d.borrow().kind, DictKind::Counter);
    if name == "update" {
        arity(name, &args, 0, 1)?;
        if is_counter {
            if let Some(source) = args.first() {
                counter_add(interp, d, source)?;
            }
            let extra = Value::dict(kwargs_dict(kwargs)?);
            return counter_add(interp, d, &extra).map(|_| Value::None);
        }
        let mut pairs = match args.first() {
            Some(source) => pairs_of(interp, source)?,
            None => Vec::new(),
        };
        pairs.extend(kwargs.into_iter().map(|(k, v)| (Value::str(k), v)));
        let mut dict = d.borrow_mut();
        for (key, value) in pairs {
            dict.insert(key, value)?;
        }
        return Ok(Value::None);
    }
    no_kwargs(name, &kwargs)?;

    match name {
        "get" => {
            arity(name, &args, 1, 2)?;
            let found = d.borrow().get(&args[0])?;
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => Ok(Value::list(d.borrow().keys())),
        "values" => Ok(Value::list(d.borrow().values())),
        "items" => Ok(Value::list(d.borrow().items())),
        "pop" => {
            arity(name, &args, 1, 2)?;
            let removed = d.borrow_mut().remove(&args[0])?;
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(ScriptError::raised("KeyError", args[0].repr())),
            }
        }
        "popitem" => {
            arity(name, &args, 0, 0)?;
            let last = d.borrow_mut().pop_last();
            last.map(|(k, v)| Value::tuple(vec![k, v]))
                .ok_or_else(|| ScriptError::raised("KeyError", "'popitem(): dictionary is empty'"))
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            let existing = d.borrow().get(&args[0])?;
            match existing {
                Some(value) => Ok(value),
                None => {
                    let value = args.get(1).cloned().unwrap_or(Value::None);
                    d.borrow_mut().insert(args[0].clone(), value.clone())?;
                    Ok(value)
                }
            }
        }
        "clear" => {
            d.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::dict(d.borrow().clone())),
        "most_common" if is_counter => {
            arity(name, &args, 0, 1)?;
            let items: Vec<Value> = d.borrow().items();
            let key = Value::Builtin(Builtin {
                name: "count",
                func: |_, args, _| match args.first() {
                    Some(Value::Tuple(pair)) if pair.len() == 2 => Ok(pair[1].clone()),
                    _ => Ok(Value::None),
                },
            });
            let mut sorted = sort_values(interp, items, Some(key), true)?;
            if let Some(n) = args.first().filter(|v| !v.is_none()) {
                sorted.truncate(int_arg(name, n)?.max(0) as usize);
            }
            Ok(Value::list(sorted))
        }
        "total" if is_counter => {
            let values = d.borrow().values();
            let mut total = Value::Int(0);
            for value in values {
                total = interp.binary(crate::ast::BinOp::Add, &total, &value)?;
            }
            Ok(total)
        }
        "elements" if is_counter => {
            let pairs: Vec<(Value, Value)> = d.borrow().iter().cloned().collect();
            let mut out = Vec::new();
            for (key, count) in pairs {
                let n = count.as_int().unwrap_or(0).max(0) as usize;
                check_len(out.len() + n)?;
                out.extend(std::iter::repeat(key).take(n));
            }
            Ok(Value::list(out))
        }
        _ => Err(ScriptError::raised(
            "AttributeError",
            format!("'dict' object has no attribute '{name}'"),
        )),
    }
}

fn kwargs_dict(kwargs: Kwargs) -> ScriptResult<Dict> {
    let mut dict = Dict::new();
    for (key, value) in kwargs {
        dict.insert(Value::str(key), value)?;
    }
    Ok(dict)
}

// ---- formatting -----------------------------------------------------------

/// `str.format` over `template`.
pub fn format_string(
    interp: &mut Interpreter,
    template: &str,
    args: &[Value],
    kwargs: &Kwargs,
) -> ScriptResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    let mut auto_index = 0usize;

    while let Some((i, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(ScriptError::value_error("Single '}' encountered in format string")),
            '{' => {
                let mut depth = 1;
                let mut end = None;
                for (j, c) in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(j);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let end = end.ok_or_else(|| {
                    ScriptError::value_error("Single '{' encountered in format string")
                })?;
                let field = &template[i + 1..end];
                let rendered = format_field(interp, field, args, kwargs, &mut auto_index)?;
                out.push_str(&rendered);
                check_len(out.len())?;
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn format_field(
    interp: &mut Interpreter,
    field: &str,
    args: &[Value],
    kwargs: &Kwargs,
    auto_index: &mut usize,
) -> ScriptResult<String> {
    let (head, spec) = match field.find(':') {
        Some(at) => (&field[..at], &field[at + 1..]),
        None => (field, ""),
    };
    let (path, conversion) = match head.rfind('!') {
        Some(at) => (&head[..at], Some(&head[at + 1..])),
        None => (head, None),
    };

    let root_end = path.find(['.', '[']).unwrap_or(path.len());
    let root = &path[..root_end];
    let mut value = if root.is_empty() {
        let value = args.get(*auto_index).cloned();
        *auto_index += 1;
        value.ok_or_else(|| {
            ScriptError::raised(
                "IndexError",
                "Replacement index out of range for positional args tuple",
            )
        })?
    } else if let Ok(position) = root.parse::<usize>() {
        args.get(position).cloned().ok_or_else(|| {
            ScriptError::raised(
                "IndexError",
                format!("Replacement index {position} out of range for positional args tuple"),
            )
        })?
    } else {
        kwargs
            .iter()
            .find(|(k, _)| k == root)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| ScriptError::raised("KeyError", str_repr(root)))?
    };

    let mut rest = &path[root_end..];
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            value = interp.get_attribute(&value, &after[..end])?;
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after
                .find(']')
                .ok_or_else(|| ScriptError::value_error("Missing ']' in format string"))?;
            let key = &after[..end];
            let key = match key.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::str(key),
            };
            value = interp.get_item(&value, Index::Item(key))?;
            rest = &after[end + 1..];
        } else {
            return Err(ScriptError::value_error(
                "Only '.' or '[' may follow ']' in format field specifier",
            ));
        }
    }

    let value = match conversion {
        None => value,
        Some("r") => Value::str(value.repr()),
        Some("s") => Value::str(value.to_str()),
        Some(other) => {
            return Err(ScriptError::value_error(format!(
                "Unknown conversion specifier {other}"
            )))
        }
    };

    let spec = if spec.contains('{') {
        format_string(interp, spec, args, kwargs)?
    } else {
        spec.to_string()
    };
    format_value(&value, &spec)
}

#[derive(Debug, Default, Clone, PartialEq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> ScriptResult<FormatSpec> {
    let invalid = || ScriptError::value_error(format!("Invalid format specifier '{spec}'"));
    let chars: Vec<char> = spec.chars().collect();
    let mut out = FormatSpec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        out.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        out.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        let digits: String = chars[start..i].iter().collect();
        out.width = digits.parse().map_err(|_| invalid())?;
        check_len(out.width)?;
    }
    if let Some(&c @ (',' | '_')) = chars.get(i) {
        out.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return Err(ScriptError::value_error("Format specifier missing precision"));
        }
        let digits: String = chars[start..i].iter().collect();
        let precision: usize = digits.parse().map_err(|_| invalid())?;
        check_len(precision)?;
        out.precision = Some(precision);
    }
    if let Some(&c) = chars.get(i) {
        out.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid());
    }
    Ok(out)
}

fn group_digits(digits: &str, separator: char, every: usize) -> String {
    let (int_part, frac_part) = match digits.find('.') {
        Some(at) => (&digits[..at], &digits[at..]),
        None => (digits, ""),
    };
    let mut grouped = String::with_capacity(digits.len() + digits.len() / every);
    let len = int_part.len();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (len - i) % every == 0 {
            grouped.push(separator);
        }
        grouped.push(c);
    }
    grouped.push_str(frac_part);
    grouped
}

fn strip_trailing_zeros(text: &str) -> String {
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            format!("{}e{exponent}", strip_trailing_zeros(mantissa))
        }
        None if text.contains('.') => text.trim_end_matches('0').trim_end_matches('.').to_string(),
        None => text.to_string(),
    }
}

/// Python's general (`g`) float presentation of a non-negative finite value.
fn general_format(x: f64, precision: usize, alternate: bool) -> String {
    let precision = precision.max(1);
    let sci = format!("{:.*e}", precision - 1, x);
    let exponent: i64 = sci
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let text = if -4 <= exponent && exponent < precision as i64 {
        let decimals = (precision as i64 - 1 - exponent).max(0) as usize;
        format!("{x:.decimals$}")
    } else {
        python_exponent(&sci)
    };
    if alternate {
        text
    } else {
        strip_trailing_zeros(&text)
    }
}

fn format_float(x: f64, spec: &FormatSpec) -> ScriptResult<(String, bool)> {
    let negative = x.is_sign_negative();
    let magnitude = x.abs();
    if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        let text = if matches!(spec.kind, Some('F' | 'E' | 'G')) {
            text.to_uppercase()
        } else {
            text.to_string()
        };
        return Ok((text, negative && !x.is_nan()));
    }
    let text = match spec.kind {
        Some('f' | 'F') => format!("{magnitude:.prec$}", prec = spec.precision.unwrap_or(6)),
        Some('e' | 'E') => {
            let text = python_exponent(&format!("{magnitude:.prec$e}", prec = spec.precision.unwrap_or(6)));
            if spec.kind == Some('E') {
                text.to_uppercase()
            } else {
                text
            }
        }
        Some('g' | 'G') => {
            let text = general_format(magnitude, spec.precision.unwrap_or(6), spec.alternate);
            if spec.kind == Some('G') {
                text.to_uppercase()
            } else {
                text
            }
        }
        Some('%') => format!(
            "{:.prec$}%",
            magnitude * 100.0,
            prec = spec.precision.unwrap_or(6)
        ),
        None => match spec.precision {
            Some(p) => {
                let text = general_format(magnitude, p, spec.alternate);
                if text.contains(['.', 'e']) {
                    text
                } else {
                    format!("{text}.0")
                }
            }
            None => float_repr(magnitude),
        },
        Some(other) => {
            return Err(ScriptError::value_error(format!(
                "Unknown format code '{other}' for object of type 'float'"
            )))
        }
    };
    Ok((text, negative))
}

fn format_int(n: i64, spec: &FormatSpec) -> ScriptResult<(String, String, bool)> {
    let magnitude = n.unsigned_abs();
    let negative = n < 0;
    let (prefix, digits) = match spec.kind {
        None | Some('d' | 'n') => ("", magnitude.to_string()),
        Some('x') => ("0x", format!("{magnitude:x}")),
        Some('X') => ("0X", format!("{magnitude:X}")),
        Some('o') => ("0o", format!("{magnitude:o}")),
        Some('b') => ("0b", format!("{magnitude:b}")),
        Some('c') => {
            let c = u32::try_from(n)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| ScriptError::raised("OverflowError", "%c arg not in range(0x110000)"))?;
            return Ok((String::new(), c.to_string(), false));
        }
        Some(other) => {
            return Err(ScriptError::value_error(format!(
                "Unknown format code '{other}' for object of type 'int'"
            )))
        }
    };
    let prefix = if spec.alternate { prefix } else { "" };
    Ok((prefix.to_string(), digits, negative))
}

/// Render `value` per a format specification (the part after `:`).
pub fn format_value(value: &Value, spec: &str) -> ScriptResult<String> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let spec = parse_spec(spec)?;

    let numeric = match value {
        Value::Float(_) => true,
        Value::Int(_) => true,
        Value::Bool(_) => spec.kind.is_some(),
        _ => false,
    };

    if !numeric {
        let text = match value {
            Value::Str(s) => s.to_string(),
            Value::Bool(_) | Value::None => value.to_str(),
            other => {
                return Err(ScriptError::type_error(format!(
                    "unsupported format string passed to {}.__format__",
                    other.type_name()
                )))
            }
        };
        if !matches!(spec.kind, None | Some('s')) {
            return Err(ScriptError::value_error(format!(
                "Unknown format code '{}' for object of type '{}'",
                spec.kind.unwrap_or('s'),
                value.type_name()
            )));
        }
        let text = match spec.precision {
            Some(p) => text.chars().take(p).collect(),
            None => text,
        };
        return pad(&text, spec.width as i64, spec.fill.unwrap_or(' '), spec.align.unwrap_or('<'));
    }

    let float_kinds = matches!(spec.kind, Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%'));
    let (prefix, body, negative) = match value {
        Value::Float(f) => {
            let (body, negative) = format_float(*f, &spec)?;
            (String::new(), body, negative)
        }
        v if float_kinds => {
            let (body, negative) = format_float(v.as_f64().unwrap_or(0.0), &spec)?;
            (String::new(), body, negative)
        }
        v => format_int(v.as_int().unwrap_or(0), &spec)?,
    };

    let body = match spec.grouping {
        Some(separator) => {
            let every = if matches!(spec.kind, Some('x' | 'X' | 'o' | 'b')) { 4 } else { 3 };
            let (digits, suffix) = match body.find(['e', 'E', '%']) {
                Some(at) => (&body[..at], &body[at..]),
                None => (body.as_str(), ""),
            };
            format!("{}{suffix}", group_digits(digits, separator, every))
        }
        None => body,
    };

    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    };
    let head = format!("{sign}{prefix}");
    let len = head.chars().count() + body.chars().count();
    if spec.width <= len {
        return Ok(format!("{head}{body}"));
    }

    let (fill, align) = match (spec.fill, spec.align, spec.zero) {
        (fill, Some(align), _) => (fill.unwrap_or(' '), align),
        (None, None, true) => ('0', '='),
        (fill, None, _) => (fill.unwrap_or(' '), '>'),
    };
    if align == '=' {
        let padding: String = std::iter::repeat(fill).take(spec.width - len).collect();
        return Ok(format!("{head}{padding}{body}"));
    }
    pad(&format!("{head}{body}"), spec.width as i64, fill, align)
}

/// printf-style `template % args`.
pub fn percent_format(template: &str, args: &Value) -> ScriptResult<String> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        other => vec![other.clone()],
    };
    let mapping = match args {
        Value::Dict(d) => Some(d.clone()),
        _ => None,
    };
    let mut next = 0usize;
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut key = None;
        if chars.peek() == Some(&'(') {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == ')' {
                    break;
                }
                name.push(c);
            }
            key = Some(name);
        }

        let mut flags = String::new();
        while let Some(&c @ ('-' | '+' | ' ' | '0' | '#')) = chars.peek() {
            flags.push(c);
            chars.next();
        }
        let mut width = String::new();
        while let Some(&c) = chars.peek().filter(|c| c.is_ascii_digit()) {
            width.push(c);
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(&c) = chars.peek().filter(|c| c.is_ascii_digit()) {
                digits.push(c);
                chars.next();
            }
            precision = Some(if digits.is_empty() { "0".to_string() } else { digits });
        }
        let kind = chars
            .next()
            .ok_or_else(|| ScriptError::value_error("incomplete format"))?;

        let value = match (&key, &mapping) {
            (Some(name), Some(d)) => {
                d.borrow()
                    .get(&Value::str(name.as_str()))?
                    .ok_or_else(|| ScriptError::raised("KeyError", str_repr(name)))?
            }
            (Some(_), None) => {
                return Err(ScriptError::type_error("format requires a mapping"));
            }
            (None, _) => {
                let value = positional.get(next).cloned().ok_or_else(|| {
                    ScriptError::type_error("not enough arguments for format string")
                })?;
                next += 1;
                value
            }
        };

        let numeric = matches!(kind, 'd' | 'i' | 'u' | 'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' | 'c');
        let (value, spec_kind) = match kind {
            's' => (Value::str(value.to_str()), 's'),
            'r' | 'a' => (Value::str(value.repr()), 's'),
            'd' | 'i' | 'u' => {
                let n = match &value {
                    Value::Float(f) => {
                        if !f.is_finite() {
                            return Err(ScriptError::raised(
                                "OverflowError",
                                "cannot convert float infinity to integer",
                            ));
                        }
                        f.trunc() as i64
                    }
                    other => other.as_int().ok_or_else(|| {
                        ScriptError::type_error(format!(
                            "%{kind} format: a real number is required, not {}",
                            other.type_name()
                        ))
                    })?,
                };
                (Value::Int(n), 'd')
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let f = value.as_f64().ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "must be real number, not {}",
                        value.type_name()
                    ))
                })?;
                (Value::Float(f), kind)
            }
            'x' | 'X' | 'o' | 'c' => {
                let n = int_arg("%", &value)?;
                (Value::Int(n), kind)
            }
            other => {
                return Err(ScriptError::value_error(format!(
                    "unsupported format character '{other}'"
                )))
            }
        };

        let align = if flags.contains('-') {
            "<"
        } else if flags.contains('0') && numeric {
            "0"
        } else {
            ">"
        };
        let sign = if flags.contains('+') {
            "+"
        } else if flags.contains(' ') {
            " "
        } else {
            ""
        };
        let alternate = if flags.contains('#') { "#" } else { "" };
        let precision = precision.map(|p| format!(".{p}")).unwrap_or_default();
        let spec = if align == "0" {
            format!("{sign}{alternate}0{width}{precision}{spec_kind}")
        } else if numeric {
            format!("{align}{sign}{alternate}{width}{precision}{spec_kind}")
        } else {
            format!("{align}{width}{precision}{spec_kind}")
        };
        out.push_str(&format_value(&value, &spec)?);
        check_len(out.len())?;
    }

    if mapping.is_none() && next < positional.len() {
        return Err(ScriptError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}
