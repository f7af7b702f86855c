//! Runtime values of the tool language.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::FunctionDef;
use crate::error::{ScriptError, ScriptResult};
use crate::interpreter::{Env, Interpreter};

/// Upper bound on the length of any string or collection a tool may build.
pub const MAX_LEN: usize = 1_000_000;

// Guards recursive printing, comparison, hashing and conversion of deeply
// nested or self-referencing containers.
const MAX_NESTED_REPR: usize = 64;

pub fn check_len(len: usize) -> ScriptResult<()> {
    if len > MAX_LEN {
        return Err(ScriptError::memory_error(format!(
            "collection of {len} elements exceeds the limit of {MAX_LEN}"
        )));
    }
    Ok(())
}

pub type Kwargs = Vec<(String, Value)>;
pub type NativeFn = fn(&mut Interpreter, Vec<Value>, Kwargs) -> ScriptResult<Value>;

#[derive(Clone)]
pub struct Builtin {
    pub name: &'static str,
    pub func: NativeFn,
}

pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: Env,
    pub defaults: Vec<Option<Value>>,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

pub struct ModuleValue {
    pub name: &'static str,
    pub members: HashMap<&'static str, Value>,
}

pub struct ExceptionValue {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let n = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        n.min(usize::MAX as i128) as usize
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let value = self.start as i128 + self.step as i128 * index as i128;
        i64::try_from(value).ok()
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (value as i128 - self.start as i128) % self.step as i128 == 0
    }
}

#[derive(Clone)]
pub enum DictKind {
    Plain,
    /// `collections.Counter`: missing keys read as zero.
    Counter,
    /// `collections.defaultdict`: missing keys are filled from the factory.
    Default(Value),
}

/// Hashable projection of a value. Numerically equal keys collapse, so
/// `True`, `1` and `1.0` address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<Key>),
}

fn float_key(f: f64) -> Key {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Key::Int(f as i64)
    } else {
        Key::Float(f.to_bits())
    }
}

/// Insertion-ordered mapping.
#[derive(Clone)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: HashMap<Key, usize>,
    pub kind: DictKind,
}

impl Default for Dict {
    fn default() -> Self {
        Self::new()
    }
}

impl Dict {
    pub fn new() -> Self {
        Self::with_kind(DictKind::Plain)
    }

    pub fn with_kind(kind: DictKind) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            kind,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> ScriptResult<Option<Value>> {
        let key = key.to_key()?;
        Ok(self.index.get(&key).map(|&i| self.entries[i].1.clone()))
    }

    pub fn contains(&self, key: &Value) -> ScriptResult<bool> {
        Ok(self.index.contains_key(&key.to_key()?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> ScriptResult<()> {
        let hashed = key.to_key()?;
        match self.index.get(&hashed) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                check_len(self.entries.len() + 1)?;
                self.index.insert(hashed, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> ScriptResult<Option<Value>> {
        let hashed = key.to_key()?;
        let Some(position) = self.index.remove(&hashed) else {
            return Ok(None);
        };
        let (_, value) = self.entries.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Ok(Some(value))
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        let (key, value) = self.entries.pop()?;
        if let Ok(hashed) = key.to_key() {
            self.index.remove(&hashed);
        }
        Some((key, value))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    fn detach_into(&mut self, pending: &mut Vec<Value>) {
        self.index.clear();
        for (key, value) in self.entries.drain(..) {
            pending.push(key);
            pending.push(value);
        }
        if let DictKind::Default(factory) = std::mem::replace(&mut self.kind, DictKind::Plain) {
            pending.push(factory);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Range(RangeValue),
    Function(Rc<Closure>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Module(Rc<ModuleValue>),
    Exception(Rc<ExceptionValue>),
}

/// Owned iteration over a value. Containers are snapshotted; ranges are lazy.
pub enum ValueIter {
    Items(std::vec::IntoIter<Value>),
    Range { next: i64, stop: i64, step: i64 },
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Items(items) => items.next(),
            ValueIter::Range { next, stop, step } => {
                let more = if *step > 0 { *next < *stop } else { *next > *stop };
                if !more {
                    return None;
                }
                let current = *next;
                *next = next.checked_add(*step).unwrap_or(*stop);
                Some(Value::Int(current))
            }
        }
    }
}

impl Value {
    pub fn str(text: impl Into<Rc<str>>) -> Self {
        Value::Str(text.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn exception(kind: &'static str, message: impl Into<String>) -> Self {
        Value::Exception(Rc::new(ExceptionValue {
            kind,
            message: message.into(),
        }))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(d) => match d.borrow().kind {
                DictKind::Plain => "dict",
                DictKind::Counter => "Counter",
                DictKind::Default(_) => "defaultdict",
            },
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::Module(_) => "module",
            Value::Exception(e) => e.kind,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Range(r) => r.len() > 0,
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn to_key(&self) -> ScriptResult<Key> {
        self.key_depth(0)
    }

    fn key_depth(&self, depth: usize) -> ScriptResult<Key> {
        if depth > MAX_NESTED_REPR {
            return Err(ScriptError::raised(
                "RecursionError",
                "maximum recursion depth exceeded while hashing",
            ));
        }
        match self {
            Value::None => Ok(Key::None),
            Value::Bool(b) => Ok(Key::Int(*b as i64)),
            Value::Int(i) => Ok(Key::Int(*i)),
            Value::Float(f) => Ok(float_key(*f)),
            Value::Str(s) => Ok(Key::Str(s.clone())),
            Value::Tuple(items) => items
                .iter()
                .map(|item| item.key_depth(depth + 1))
                .collect::<ScriptResult<Vec<_>>>()
                .map(Key::Tuple),
            other => Err(ScriptError::type_error(format!(
                "unhashable type: '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn iter(&self) -> ScriptResult<ValueIter> {
        let items: Vec<Value> = match self {
            Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.as_ref().clone(),
            Value::Dict(d) => d.borrow().keys(),
            Value::Range(r) => {
                return Ok(ValueIter::Range {
                    next: r.start,
                    stop: r.stop,
                    step: r.step,
                })
            }
            other => {
                return Err(ScriptError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        };
        Ok(ValueIter::Items(items.into_iter()))
    }

    pub fn len(&self) -> ScriptResult<usize> {
        match self {
            Value::Str(s) => Ok(s.chars().count()),
            Value::List(items) => Ok(items.borrow().len()),
            Value::Tuple(items) => Ok(items.len()),
            Value::Dict(d) => Ok(d.borrow().len()),
            Value::Range(r) => Ok(r.len()),
            other => Err(ScriptError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    pub fn py_eq(&self, other: &Value) -> bool {
        self.eq_depth(other, 0)
    }

    fn eq_depth(&self, other: &Value, depth: usize) -> bool {
        if depth > MAX_NESTED_REPR {
            return false;
        }
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow(), depth)
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b, depth),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| match b.get(k) {
                        Ok(Some(other)) => v.eq_depth(&other, depth + 1),
                        _ => false,
                    })
            }
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (a, b) => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                },
            },
        }
    }

    pub fn py_cmp(&self, other: &Value) -> ScriptResult<Ordering> {
        self.cmp_depth(other, 0)
    }

    fn cmp_depth(&self, other: &Value, depth: usize) -> ScriptResult<Ordering> {
        if depth > MAX_NESTED_REPR {
            return Err(ScriptError::raised(
                "RecursionError",
                "maximum recursion depth exceeded in comparison",
            ));
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => seq_cmp(&a.borrow(), &b.borrow(), depth),
            (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(a, b, depth),
            (a, b) => {
                if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
                    return Ok(x.cmp(&y));
                }
                if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                    return Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal));
                }
                Err(ScriptError::type_error(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                )))
            }
        }
    }

    /// Identity as observable from tool code.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0);
        out
    }

    /// `str()` conversion.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message.clone(),
            other => other.repr(),
        }
    }

    fn write_repr(&self, out: &mut String, depth: usize) {
        if depth > MAX_NESTED_REPR {
            out.push_str("...");
            return;
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&float_repr(*f)),
            Value::Str(s) => out.push_str(&str_repr(s)),
            Value::List(items) => {
                out.push('[');
                write_items(&items.borrow(), out, depth);
                out.push(']');
            }
            Value::Tuple(items) => {
                out.push('(');
                write_items(items, out, depth);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(d) => {
                let d = d.borrow();
                let prefix = match &d.kind {
                    DictKind::Plain => "",
                    DictKind::Counter => "Counter(",
                    DictKind::Default(_) => "defaultdict(",
                };
                out.push_str(prefix);
                out.push('{');
                for (i, (k, v)) in d.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, depth + 1);
                    out.push_str(": ");
                    v.write_repr(out, depth + 1);
                }
                out.push('}');
                if !prefix.is_empty() {
                    out.push(')');
                }
            }
            Value::Range(r) => {
                if r.step == 1 {
                    out.push_str(&format!("range({}, {})", r.start, r.stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
                }
            }
            Value::Function(c) => out.push_str(&format!("<function {}>", c.def.name)),
            Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name)),
            Value::Method(m) => out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            )),
            Value::Module(m) => out.push_str(&format!("<module '{}'>", m.name)),
            Value::Exception(e) => {
                out.push_str(e.kind);
                out.push('(');
                if !e.message.is_empty() {
                    out.push_str(&str_repr(&e.message));
                }
                out.push(')');
            }
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::str(s.as_str()),
            serde_json::Value::Array(items) => {
                Value::list(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let mut dict = Dict::new();
                for (k, v) in map {
                    // String keys are always hashable and the map is already
                    // bounded by the JSON decoder.
                    let _ = dict.insert(Value::str(k.as_str()), Value::from_json(v));
                }
                Value::dict(dict)
            }
        }
    }

    pub fn to_json(&self) -> ScriptResult<serde_json::Value> {
        self.to_json_depth(0)
    }

    fn to_json_depth(&self, depth: usize) -> ScriptResult<serde_json::Value> {
        if depth > MAX_NESTED_REPR {
            return Err(ScriptError::value_error("Circular reference detected"));
        }
        Ok(match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    ScriptError::value_error("Out of range float values are not JSON compliant")
                })?,
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::List(items) => serde_json::Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.to_json_depth(depth + 1))
                    .collect::<ScriptResult<_>>()?,
            ),
            Value::Tuple(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| v.to_json_depth(depth + 1))
                    .collect::<ScriptResult<_>>()?,
            ),
            Value::Dict(d) => {
                let mut map = serde_json::Map::new();
                for (k, v) in d.borrow().iter() {
                    map.insert(json_key(k)?, v.to_json_depth(depth + 1)?);
                }
                serde_json::Value::Object(map)
            }
            other => {
                return Err(ScriptError::type_error(format!(
                    "Object of type {} is not JSON serializable",
                    other.type_name()
                )))
            }
        })
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

// Nesting is unbounded (`a = [a]` in a loop), so children of a value being
// dropped are moved onto a work list instead of being dropped recursively.
impl Drop for Value {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_children(self, &mut pending);
        while let Some(mut value) = pending.pop() {
            detach_children(&mut value, &mut pending);
        }
    }
}

/// Move the children of a value this is the last owner of onto `pending`.
fn detach_children(value: &mut Value, pending: &mut Vec<Value>) {
    match value {
        Value::List(items) => {
            if let Some(items) = Rc::get_mut(items) {
                pending.append(items.get_mut());
            }
        }
        Value::Tuple(items) => {
            if let Some(items) = Rc::get_mut(items) {
                pending.append(items);
            }
        }
        Value::Dict(dict) => {
            if let Some(dict) = Rc::get_mut(dict) {
                dict.get_mut().detach_into(pending);
            }
        }
        Value::Method(method) => {
            if let Some(method) = Rc::get_mut(method) {
                pending.push(std::mem::replace(&mut method.receiver, Value::None));
            }
        }
        Value::Function(closure) => {
            if let Some(closure) = Rc::get_mut(closure) {
                pending.extend(closure.defaults.drain(..).flatten());
                if let Some(scope) = Rc::get_mut(&mut closure.env) {
                    scope.get_mut().detach_into(pending);
                }
            }
        }
        _ => {}
    }
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_depth(y, depth + 1))
}

fn seq_cmp(a: &[Value], b: &[Value], depth: usize) -> ScriptResult<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if !x.eq_depth(y, depth + 1) {
            return x.cmp_depth(y, depth + 1);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

fn write_items(items: &[Value], out: &mut String, depth: usize) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, depth + 1);
    }
}

/// JSON object key for a dict key, stringified the way `json.dumps` does.
pub fn json_key(key: &Value) -> ScriptResult<String> {
    match key {
        Value::Str(s) => Ok(s.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(float_repr(*f)),
        Value::Bool(true) => Ok("true".to_string()),
        Value::Bool(false) => Ok("false".to_string()),
        Value::None => Ok("null".to_string()),
        other => Err(ScriptError::type_error(format!(
            "keys must be str, int, float, bool or None, not {}",
            other.type_name()
        ))),
    }
}

/// Shortest round-tripping float text, using exponent notation outside
/// `1e-4 <= |f| < 1e16`.
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        return python_exponent(&format!("{f:e}"));
    }
    let text = f.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

/// Rewrite Rust's `1.5e-7` exponent form as `1.5e-07`.
pub fn python_exponent(text: &str) -> String {
    let Some((mantissa, exponent)) = text.split_once('e') else {
        return text.to_string();
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent.trim_start_matches('+')),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}
