//! Tree-walking evaluator.
//!
//! Every run gets a fresh [`Interpreter`]: its capability table, globals and
//! output buffer are built by value and dropped with it, so nothing one tool
//! does can be observed by the next.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use toolsmith_core::Arguments;
use toolsmith_policy::ValidatorPolicy;

use crate::ast::*;
use crate::builtins;
use crate::error::{ScriptError, ScriptResult};
use crate::methods;
use crate::modules;
use crate::output::OutputBuffer;
use crate::value::*;

pub const MAX_CALL_DEPTH: usize = 200;
pub const DEFAULT_OUTPUT_CAP: usize = 4096;
pub const INTERPRETER_STACK: usize = 64 * 1024 * 1024;

// Bound on nested evaluation across all calls; keeps the host stack safe when
// deep expressions meet deep recursion.
const MAX_EVAL_NESTING: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_call_depth: usize,
    pub output_cap: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_call_depth: MAX_CALL_DEPTH,
            output_cap: DEFAULT_OUTPUT_CAP,
        }
    }
}

pub struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

pub type Env = Rc<RefCell<Scope>>;

impl Scope {
    pub(crate) fn detach_into(&mut self, pending: &mut Vec<Value>) {
        pending.extend(self.vars.drain().map(|(_, value)| value));
    }

    pub fn root() -> Env {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: None,
        }))
    }

    pub fn child(parent: &Env) -> Env {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(parent.clone()),
        }))
    }
}

fn lookup(env: &Env, name: &str) -> Option<Value> {
    let mut current = env.clone();
    loop {
        let parent = {
            let scope = current.borrow();
            if let Some(value) = scope.vars.get(name) {
                return Some(value.clone());
            }
            scope.parent.clone()
        };
        current = parent?;
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Evaluated subscript.
#[derive(Clone)]
pub enum Index {
    Item(Value),
    Slice(Option<i64>, Option<i64>, Option<i64>),
}

/// Successful run of a tool's entry function.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub value: serde_json::Value,
    pub output: String,
    pub output_truncated: bool,
}

/// Failed run; output produced before the failure is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub error: ScriptError,
    pub output: String,
    pub output_truncated: bool,
}

/// Parse `source`, execute its top level, then call `entry` with `arguments`
/// bound as keyword arguments.
///
/// The run happens on a dedicated thread with [`INTERPRETER_STACK`] bytes of
/// stack; call depth and nesting limits are sized against it.
pub fn run_tool(
    source: &str,
    entry: &str,
    arguments: &Arguments,
    policy: Arc<ValidatorPolicy>,
    limits: Limits,
    interrupt: Option<Arc<AtomicBool>>,
) -> Result<RunOutcome, RunFailure> {
    let spawned = std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("tool-interpreter".to_string())
            .stack_size(INTERPRETER_STACK)
            .spawn_scoped(scope, || {
                run_tool_inline(source, entry, arguments, policy, limits, interrupt)
            })?;
        Ok::<_, std::io::Error>(handle.join())
    });
    match spawned {
        Ok(Ok(result)) => result,
        Ok(Err(_panic)) => Err(RunFailure {
            error: ScriptError::exhausted("interpreter thread aborted"),
            output: String::new(),
            output_truncated: false,
        }),
        Err(e) => Err(RunFailure {
            error: ScriptError::exhausted(format!("failed to start interpreter thread: {e}")),
            output: String::new(),
            output_truncated: false,
        }),
    }
}

/// [`run_tool`] on the calling thread, which must have at least
/// [`INTERPRETER_STACK`] bytes of stack available. Used by the worker
/// process, where spawning threads is forbidden and the main stack is sized
/// through its rlimit instead.
pub fn run_tool_inline(
    source: &str,
    entry: &str,
    arguments: &Arguments,
    policy: Arc<ValidatorPolicy>,
    limits: Limits,
    interrupt: Option<Arc<AtomicBool>>,
) -> Result<RunOutcome, RunFailure> {
    let mut interp = Interpreter::new(policy, limits);
    if let Some(flag) = interrupt {
        interp = interp.with_interrupt(flag);
    }

    let result = crate::parser::parse(source)
        .map_err(|e| ScriptError::raised("SyntaxError", &e.message).at(e.location))
        .and_then(|module| {
            interp.run_module(&module)?;
            interp.call_entry(entry, arguments)
        });

    let (output, output_truncated) = interp.take_output();
    if let Err(error) = &result {
        tracing::debug!(entry, kind = %error.kind, "tool run failed: {}", error.message);
    }
    match result {
        Ok(value) => Ok(RunOutcome {
            value,
            output,
            output_truncated,
        }),
        Err(error) => Err(RunFailure {
            error,
            output,
            output_truncated,
        }),
    }
}

fn normalize_index(key: &Value, len: usize, what: &str) -> ScriptResult<usize> {
    let i = key.as_int().ok_or_else(|| {
        ScriptError::type_error(format!(
            "{what} indices must be integers or slices, not {}",
            key.type_name()
        ))
    })?;
    let adjusted = if i < 0 { i + len as i64 } else { i };
    if adjusted < 0 || adjusted >= len as i64 {
        return Err(ScriptError::raised(
            "IndexError",
            format!("{what} index out of range"),
        ));
    }
    Ok(adjusted as usize)
}

/// Positions selected by a slice over a sequence of `len` items.
pub fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> ScriptResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ScriptError::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let adjust = |bound: Option<i64>, default: i64, low: i64, high: i64| match bound {
        None => default,
        Some(v) => {
            let v = if v < 0 { v.saturating_add(len) } else { v };
            v.clamp(low, high)
        }
    };

    let mut out = Vec::new();
    if step > 0 {
        let start = adjust(lower, 0, 0, len);
        let stop = adjust(upper, len, 0, len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i = i.saturating_add(step);
        }
    } else {
        let start = adjust(lower, len - 1, -1, len - 1);
        let stop = adjust(upper, -1, -1, len - 1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i = i.saturating_add(step);
        }
    }
    Ok(out)
}

fn overflow() -> ScriptError {
    ScriptError::raised("OverflowError", "integer result too large")
}

fn zero_division(message: &str) -> ScriptError {
    ScriptError::raised("ZeroDivisionError", message)
}

fn int_arith(op: BinOp, a: i64, b: i64) -> ScriptResult<Value> {
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            Some(if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q })
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            Some(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
        }
        BinOp::Pow => {
            if b < 0 {
                return float_arith(op, a as f64, b as f64);
            }
            match a {
                0 | 1 if b > 0 => Some(a),
                -1 => Some(if b % 2 == 0 { 1 } else { -1 }),
                _ => u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp)),
            }
        }
    };
    result.map(Value::Int).ok_or_else(overflow)
}

fn float_arith(op: BinOp, a: f64, b: f64) -> ScriptResult<Value> {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            let r = a.powf(b);
            if r.is_nan() && !a.is_nan() && !b.is_nan() {
                return Err(ScriptError::value_error("math domain error"));
            }
            if r.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(ScriptError::raised(
                    "OverflowError",
                    "(34, 'Numerical result out of range')",
                ));
            }
            r
        }
    };
    Ok(Value::Float(result))
}

fn repeat<T: Clone>(items: &[T], count: i64) -> ScriptResult<Vec<T>> {
    if count <= 0 || items.is_empty() {
        return Ok(Vec::new());
    }
    let total = items
        .len()
        .checked_mul(count as usize)
        .ok_or_else(|| ScriptError::memory_error("repetition result too large"))?;
    check_len(total)?;
    let mut out = Vec::with_capacity(total);
    for _ in 0..count {
        out.extend_from_slice(items);
    }
    Ok(out)
}

pub struct Interpreter {
    policy: Arc<ValidatorPolicy>,
    builtins: HashMap<&'static str, Value>,
    globals: Env,
    output: OutputBuffer,
    interrupt: Option<Arc<AtomicBool>>,
    limits: Limits,
    call_depth: usize,
    nesting: usize,
}

impl Interpreter {
    pub fn new(policy: Arc<ValidatorPolicy>, limits: Limits) -> Self {
        Self {
            policy,
            builtins: builtins::table(),
            globals: Scope::root(),
            output: OutputBuffer::new(limits.output_cap),
            interrupt: None,
            limits,
            call_depth: 0,
            nesting: 0,
        }
    }

    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn policy(&self) -> &ValidatorPolicy {
        &self.policy
    }

    /// Fails once the interrupt flag has been raised.
    pub fn tick(&self) -> ScriptResult<()> {
        match &self.interrupt {
            Some(flag) if flag.load(AtomicOrdering::Relaxed) => Err(ScriptError::interrupted()),
            _ => Ok(()),
        }
    }

    pub fn write_output(&mut self, text: &str) {
        self.output.push(text);
    }

    pub fn take_output(&mut self) -> (String, bool) {
        self.output.take()
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().vars.get(name).cloned()
    }

    pub fn run_module(&mut self, module: &Module) -> ScriptResult<()> {
        let globals = self.globals.clone();
        self.exec_block(&module.body, &globals)?;
        Ok(())
    }

    pub fn call_entry(&mut self, name: &str, arguments: &Arguments) -> ScriptResult<serde_json::Value> {
        let Some(entry @ Value::Function(_)) = self.global(name) else {
            return Err(ScriptError::raised(
                "NameError",
                format!("entry function '{name}' is not defined"),
            ));
        };
        let kwargs = arguments
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect();
        let result = self.call(&entry, Vec::new(), kwargs)?;
        result.to_json()
    }

    /// Iterate `iterable`, polling the interrupt flag as it goes. `f` returns
    /// false to stop early.
    pub fn each(
        &mut self,
        iterable: &Value,
        mut f: impl FnMut(&mut Self, Value) -> ScriptResult<bool>,
    ) -> ScriptResult<()> {
        for (i, item) in iterable.iter()?.enumerate() {
            if i % 1024 == 0 {
                self.tick()?;
            }
            if !f(self, item)? {
                break;
            }
        }
        Ok(())
    }

    pub fn collect(&mut self, iterable: &Value) -> ScriptResult<Vec<Value>> {
        if let Value::Range(r) = iterable {
            check_len(r.len())?;
        }
        let mut out = Vec::new();
        self.each(iterable, |_, item| {
            out.push(item);
            check_len(out.len())?;
            Ok(true)
        })?;
        Ok(out)
    }

    // ---- statements -------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt], env: &Env) -> ScriptResult<Flow> {
        for stmt in body {
            match self.exec(stmt, env).map_err(|e| e.at(stmt.loc))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Env) -> ScriptResult<Flow> {
        self.tick()?;
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                let function = self.make_closure(def, env)?;
                self.bind(env, &def.name, function)?;
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test, env)?.truthy() {
                    body
                } else {
                    orelse
                };
                return self.exec_block(branch, env);
            }
            StmtKind::While { test, body } => {
                while self.eval(test, env)?.truthy() {
                    self.tick()?;
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter, env)?;
                for item in iterable.iter()? {
                    self.tick()?;
                    self.assign(target, item, env)?;
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Raise(value) => return Err(self.raise(value.as_ref(), env)?),
            StmtKind::Assert { test, msg } => {
                if !self.eval(test, env)?.truthy() {
                    let message = match msg {
                        Some(expr) => self.eval(expr, env)?.to_str(),
                        None => String::new(),
                    };
                    return Err(ScriptError::raised("AssertionError", message));
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, env)?;
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = self.import_module(&alias.name)?;
                    self.bind(env, alias.bound_name(), Value::Module(module))?;
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let module = self.import_module(module)?;
                for alias in names {
                    if let Some(cap) = self.policy.denied_attribute(&alias.name) {
                        return Err(ScriptError::violation(format!(
                            "import of '{}' is not permitted ({})",
                            alias.name,
                            cap.describe()
                        )));
                    }
                    let member = module.members.get(alias.name.as_str()).cloned().ok_or_else(|| {
                        ScriptError::raised(
                            "ImportError",
                            format!("cannot import name '{}' from '{}'", alias.name, module.name),
                        )
                    })?;
                    self.bind(env, alias.bound_name(), member)?;
                }
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, env)?;
                for target in targets {
                    self.assign(target, value.clone(), env)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, env)?,
            StmtKind::Expr(expr) => {
                self.eval(expr, env)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn import_module(&self, name: &str) -> ScriptResult<Rc<ModuleValue>> {
        if !self.policy.is_module_allowed(name) {
            return Err(ScriptError::violation(format!(
                "import of module '{name}' is not permitted"
            )));
        }
        modules::load(name).ok_or_else(|| {
            ScriptError::raised("ModuleNotFoundError", format!("No module named '{name}'"))
        })
    }

    fn raise(&mut self, value: Option<&Expr>, env: &Env) -> ScriptResult<ScriptError> {
        let Some(expr) = value else {
            return Ok(ScriptError::raised(
                "RuntimeError",
                "No active exception to reraise",
            ));
        };
        Ok(match &self.eval(expr, env)? {
            Value::Exception(e) => ScriptError::raised(e.kind, &e.message),
            Value::Builtin(b) if builtins::is_exception(b.name) => ScriptError::raised(b.name, ""),
            other => ScriptError::type_error(format!(
                "exceptions must derive from BaseException, not {}",
                other.type_name()
            )),
        })
    }

    fn bind(&self, env: &Env, name: &str, value: Value) -> ScriptResult<()> {
        if self.policy.is_reserved(name) {
            return Err(ScriptError::violation(format!(
                "rebinding reserved name '{name}' is not permitted"
            )));
        }
        env.borrow_mut().vars.insert(name.to_string(), value);
        Ok(())
    }

    fn assign(&mut self, target: &Target, value: Value, env: &Env) -> ScriptResult<()> {
        match target {
            Target::Name(name, _) => self.bind(env, name, value),
            Target::Subscript {
                value: container,
                index,
                ..
            } => {
                let container = self.eval(container, env)?;
                let index = self.eval_index(index, env)?;
                self.set_item(&container, index, value)
            }
            Target::Attribute { value: object, attr, .. } => {
                let object = self.eval(object, env)?;
                Err(self.attribute_store_error(&object, attr))
            }
            Target::Tuple(targets, _) => {
                let items = self.collect(&value)?;
                match items.len().cmp(&targets.len()) {
                    Ordering::Greater => {
                        return Err(ScriptError::value_error(format!(
                            "too many values to unpack (expected {})",
                            targets.len()
                        )))
                    }
                    Ordering::Less => {
                        return Err(ScriptError::value_error(format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )))
                    }
                    Ordering::Equal => {}
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, env)?;
                }
                Ok(())
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr, env: &Env) -> ScriptResult<()> {
        match target {
            Target::Name(name, _) => {
                let current = self.lookup_name(name, env)?;
                let rhs = self.eval(value, env)?;
                let updated = self.augmented(op, current, rhs)?;
                self.bind(env, name, updated)
            }
            Target::Subscript {
                value: container,
                index,
                ..
            } => {
                let container = self.eval(container, env)?;
                let index = self.eval_index(index, env)?;
                let current = self.get_item(&container, index.clone())?;
                let rhs = self.eval(value, env)?;
                let updated = self.augmented(op, current, rhs)?;
                self.set_item(&container, index, updated)
            }
            Target::Attribute { value: object, attr, .. } => {
                let object = self.eval(object, env)?;
                Err(self.attribute_store_error(&object, attr))
            }
            Target::Tuple(..) => Err(ScriptError::raised(
                "SyntaxError",
                "illegal expression for augmented assignment",
            )),
        }
    }

    fn augmented(&mut self, op: BinOp, current: Value, rhs: Value) -> ScriptResult<Value> {
        if let (BinOp::Add, Value::List(items)) = (op, &current) {
            let extra = self.collect(&rhs)?;
            let mut items = items.borrow_mut();
            check_len(items.len() + extra.len())?;
            items.extend(extra);
            drop(items);
            return Ok(current.clone());
        }
        self.binary(op, &current, &rhs)
    }

    fn delete(&mut self, target: &Target, env: &Env) -> ScriptResult<()> {
        match target {
            Target::Name(name, _) => {
                if env.borrow_mut().vars.remove(name.as_str()).is_none() {
                    return Err(ScriptError::raised(
                        "NameError",
                        format!("name '{name}' is not defined"),
                    ));
                }
                Ok(())
            }
            Target::Subscript {
                value: container,
                index,
                ..
            } => {
                let container = self.eval(container, env)?;
                let index = self.eval_index(index, env)?;
                self.del_item(&container, index)
            }
            Target::Attribute { value: object, attr, .. } => {
                let object = self.eval(object, env)?;
                Err(self.attribute_store_error(&object, attr))
            }
            Target::Tuple(targets, _) => {
                for target in targets {
                    self.delete(target, env)?;
                }
                Ok(())
            }
        }
    }

    // ---- expressions ------------------------------------------------------

    fn eval(&mut self, expr: &Expr, env: &Env) -> ScriptResult<Value> {
        self.nesting += 1;
        if self.nesting > MAX_EVAL_NESTING {
            self.nesting -= 1;
            return Err(ScriptError::raised(
                "RecursionError",
                "maximum recursion depth exceeded",
            ));
        }
        let result = self.eval_inner(expr, env);
        self.nesting -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr, env: &Env) -> ScriptResult<Value> {
        match &expr.kind {
            ExprKind::None => Ok(Value::None),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Float(f) => Ok(Value::Float(*f)),
            ExprKind::Str(s) => Ok(Value::str(s.as_str())),
            ExprKind::Name(name) => self.lookup_name(name, env),
            ExprKind::List(items) => Ok(Value::list(self.eval_all(items, env)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_all(items, env)?)),
            ExprKind::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = self.eval(key, env)?;
                    let value = self.eval(value, env)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value, env)?;
                self.get_attribute(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let container = self.eval(value, env)?;
                let index = self.eval_index(index, env)?;
                self.get_item(&container, index)
            }
            ExprKind::Slice { .. } => Err(ScriptError::type_error(
                "slice syntax is only valid inside a subscript",
            )),
            ExprKind::Call { func, args, kwargs } => {
                let func = self.eval(func, env)?;
                let args = self.eval_all(args, env)?;
                let mut evaluated = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    evaluated.push((name.clone(), self.eval(value, env)?));
                }
                self.call(&func, args, evaluated)
            }
            ExprKind::BinOp { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(*op, &left, &right)
            }
            ExprKind::UnaryOp { op, operand } => {
                let operand = self.eval(operand, env)?;
                self.unary(*op, operand)
            }
            ExprKind::And(left, right) => {
                let left = self.eval(left, env)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(right, env)
            }
            ExprKind::Or(left, right) => {
                let left = self.eval(left, env)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(right, env)
            }
            ExprKind::Compare { left, ops } => {
                let mut left = self.eval(left, env)?;
                for (op, right) in ops {
                    let right = self.eval(right, env)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test, env)?.truthy() {
                    self.eval(body, env)
                } else {
                    self.eval(orelse, env)
                }
            }
            ExprKind::Lambda(def) => self.make_closure(def, env),
            ExprKind::ListComp { elt, generators } => {
                let scope = Scope::child(env);
                let mut out = Vec::new();
                self.comprehend(generators, &scope, &mut |interp: &mut Self, scope: &Env| {
                    out.push(interp.eval(elt, scope)?);
                    check_len(out.len())
                })?;
                Ok(Value::list(out))
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let scope = Scope::child(env);
                let mut dict = Dict::new();
                self.comprehend(generators, &scope, &mut |interp: &mut Self, scope: &Env| {
                    let k = interp.eval(key, scope)?;
                    let v = interp.eval(value, scope)?;
                    dict.insert(k, v)
                })?;
                Ok(Value::dict(dict))
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], env: &Env) -> ScriptResult<Vec<Value>> {
        check_len(exprs.len())?;
        exprs.iter().map(|e| self.eval(e, env)).collect()
    }

    fn comprehend(
        &mut self,
        generators: &[Comprehension],
        scope: &Env,
        emit: &mut dyn FnMut(&mut Self, &Env) -> ScriptResult<()>,
    ) -> ScriptResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self, scope);
        };
        let iterable = self.eval(&first.iter, scope)?;
        'items: for item in iterable.iter()? {
            self.tick()?;
            self.assign(&first.target, item, scope)?;
            for cond in &first.ifs {
                if !self.eval(cond, scope)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehend(rest, scope, emit)?;
        }
        Ok(())
    }

    fn slice_bound(&mut self, bound: Option<&Expr>, env: &Env) -> ScriptResult<Option<i64>> {
        let Some(expr) = bound else { return Ok(None) };
        let value = self.eval(expr, env)?;
        if value.is_none() {
            return Ok(None);
        }
        value.as_int().map(Some).ok_or_else(|| {
            ScriptError::type_error("slice indices must be integers or None")
        })
    }

    fn eval_index(&mut self, expr: &Expr, env: &Env) -> ScriptResult<Index> {
        if let ExprKind::Slice { lower, upper, step } = &expr.kind {
            let lower = self.slice_bound(lower.as_deref(), env)?;
            let upper = self.slice_bound(upper.as_deref(), env)?;
            let step = self.slice_bound(step.as_deref(), env)?;
            return Ok(Index::Slice(lower, upper, step));
        }
        Ok(Index::Item(self.eval(expr, env)?))
    }

    fn lookup_name(&self, name: &str, env: &Env) -> ScriptResult<Value> {
        if let Some(value) = lookup(env, name) {
            return Ok(value);
        }
        if let Some(value) = self.builtins.get(name) {
            return Ok(value.clone());
        }
        if let Some(cap) = self.policy.denied_name(name) {
            return Err(ScriptError::violation(format!(
                "use of '{name}' is not permitted ({})",
                cap.describe()
            )));
        }
        Err(ScriptError::raised(
            "NameError",
            format!("name '{name}' is not defined"),
        ))
    }

    fn make_closure(&mut self, def: &Rc<FunctionDef>, env: &Env) -> ScriptResult<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, env)?),
                None => None,
            });
        }
        Ok(Value::Function(Rc::new(Closure {
            def: def.clone(),
            env: env.clone(),
            defaults,
        })))
    }

    // ---- calls ------------------------------------------------------------

    pub fn call(&mut self, func: &Value, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
        self.tick()?;
        match func {
            Value::Function(closure) => self.call_closure(closure, args, kwargs),
            Value::Builtin(builtin) => (builtin.func)(self, args, kwargs),
            Value::Method(method) => {
                methods::call_method(self, &method.receiver, &method.name, args, kwargs)
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
        if self.call_depth >= self.limits.max_call_depth {
            return Err(ScriptError::raised(
                "RecursionError",
                "maximum recursion depth exceeded",
            ));
        }

        let def = &closure.def;
        let params = &def.params;
        if args.len() > params.len() {
            return Err(ScriptError::type_error(format!(
                "{}() takes {} positional argument(s) but {} were given",
                def.name,
                params.len(),
                args.len()
            )));
        }

        let mut slots: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, arg) in slots.iter_mut().zip(args) {
            *slot = Some(arg);
        }
        for (key, value) in kwargs {
            let Some(position) = params.iter().position(|p| p.name == key) else {
                return Err(ScriptError::type_error(format!(
                    "{}() got an unexpected keyword argument '{key}'",
                    def.name
                )));
            };
            if slots[position].is_some() {
                return Err(ScriptError::type_error(format!(
                    "{}() got multiple values for argument '{key}'",
                    def.name
                )));
            }
            slots[position] = Some(value);
        }

        let scope = Scope::child(&closure.env);
        for ((param, slot), default) in params.iter().zip(slots).zip(&closure.defaults) {
            let value = match slot.or_else(|| default.clone()) {
                Some(value) => value,
                None => {
                    return Err(ScriptError::type_error(format!(
                        "{}() missing required argument: '{}'",
                        def.name, param.name
                    )))
                }
            };
            self.bind(&scope, &param.name, value)?;
        }

        self.call_depth += 1;
        let flow = self.exec_block(&def.body, &scope);
        self.call_depth -= 1;
        match flow? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    // ---- operators --------------------------------------------------------

    pub fn binary(&mut self, op: BinOp, left: &Value, right: &Value) -> ScriptResult<Value> {
        match (op, left, right) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                check_len(a.len() + b.len())?;
                Ok(Value::str(format!("{a}{b}")))
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                check_len(items.len())?;
                Ok(Value::list(items))
            }
            (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
                check_len(a.len() + b.len())?;
                Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
            }
            (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s))
                if n.as_int().is_some() =>
            {
                let count = n.as_int().unwrap_or(0);
                let bytes = repeat(s.as_bytes(), count)?;
                Ok(Value::str(String::from_utf8_lossy(&bytes).into_owned()))
            }
            (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
                if n.as_int().is_some() =>
            {
                let items = items.borrow().clone();
                Ok(Value::list(repeat(&items, n.as_int().unwrap_or(0))?))
            }
            (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items))
                if n.as_int().is_some() =>
            {
                Ok(Value::tuple(repeat(items, n.as_int().unwrap_or(0))?))
            }
            (BinOp::Mod, Value::Str(template), _) => {
                methods::percent_format(template, right).map(Value::str)
            }
            _ => {
                if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
                    return int_arith(op, a, b);
                }
                if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
                    return float_arith(op, a, b);
                }
                Err(ScriptError::type_error(format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                )))
            }
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: Value) -> ScriptResult<Value> {
        match (op, &operand) {
            (UnaryOp::Not, _) => Ok(Value::Bool(!operand.truthy())),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Pos, Value::Float(_)) => Ok(operand),
            (UnaryOp::Neg, v) if v.as_int().is_some() => v
                .as_int()
                .and_then(i64::checked_neg)
                .map(Value::Int)
                .ok_or_else(overflow),
            (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
            (op, v) => Err(ScriptError::type_error(format!(
                "bad operand type for unary {}: '{}'",
                if op == UnaryOp::Neg { "-" } else { "+" },
                v.type_name()
            ))),
        }
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> ScriptResult<bool> {
        Ok(match op {
            CmpOp::Eq => left.py_eq(right),
            CmpOp::NotEq => !left.py_eq(right),
            CmpOp::Lt => left.py_cmp(right)? == Ordering::Less,
            CmpOp::LtE => left.py_cmp(right)? != Ordering::Greater,
            CmpOp::Gt => left.py_cmp(right)? == Ordering::Greater,
            CmpOp::GtE => left.py_cmp(right)? != Ordering::Less,
            CmpOp::In => self.contains(right, left)?,
            CmpOp::NotIn => !self.contains(right, left)?,
            CmpOp::Is => left.is_same(right),
            CmpOp::IsNot => !left.is_same(right),
        })
    }

    pub fn contains(&mut self, container: &Value, item: &Value) -> ScriptResult<bool> {
        match container {
            Value::Str(s) => match item {
                Value::Str(sub) => Ok(s.contains(&**sub)),
                other => Err(ScriptError::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::List(items) => Ok(items.borrow().iter().any(|v| v.py_eq(item))),
            Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
            Value::Dict(d) => d.borrow().contains(item),
            Value::Range(r) => Ok(item.as_int().is_some_and(|i| r.contains(i))),
            other => Err(ScriptError::type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    // ---- attributes and items --------------------------------------------

    pub fn get_attribute(&mut self, object: &Value, attr: &str) -> ScriptResult<Value> {
        if let Some(cap) = self.policy.denied_attribute(attr) {
            return Err(ScriptError::violation(format!(
                "access to attribute '{attr}' is not permitted ({})",
                cap.describe()
            )));
        }
        match object {
            Value::Module(module) => module.members.get(attr).cloned().ok_or_else(|| {
                ScriptError::raised(
                    "AttributeError",
                    format!("module '{}' has no attribute '{attr}'", module.name),
                )
            }),
            other if methods::has_method(other, attr) => Ok(Value::Method(Rc::new(BoundMethod {
                receiver: other.clone(),
                name: attr.to_string(),
            }))),
            other => Err(ScriptError::raised(
                "AttributeError",
                format!("'{}' object has no attribute '{attr}'", other.type_name()),
            )),
        }
    }

    fn attribute_store_error(&self, object: &Value, attr: &str) -> ScriptError {
        if let Some(cap) = self.policy.denied_attribute(attr) {
            return ScriptError::violation(format!(
                "modifying attribute '{attr}' is not permitted ({})",
                cap.describe()
            ));
        }
        match object {
            Value::Module(module) => ScriptError::violation(format!(
                "modifying attribute '{attr}' of module '{}' is not permitted",
                module.name
            )),
            other => ScriptError::raised(
                "AttributeError",
                format!("'{}' object attribute '{attr}' is read-only", other.type_name()),
            ),
        }
    }

    pub fn get_item(&mut self, container: &Value, index: Index) -> ScriptResult<Value> {
        match index {
            Index::Item(key) => match container {
                Value::List(items) => {
                    let items = items.borrow();
                    let pos = normalize_index(&key, items.len(), "list")?;
                    Ok(items[pos].clone())
                }
                Value::Tuple(items) => {
                    let pos = normalize_index(&key, items.len(), "tuple")?;
                    Ok(items[pos].clone())
                }
                Value::Str(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let pos = normalize_index(&key, chars.len(), "string")?;
                    Ok(Value::str(chars[pos].to_string()))
                }
                Value::Range(r) => {
                    let pos = normalize_index(&key, r.len(), "range object")?;
                    r.get(pos).map(Value::Int).ok_or_else(overflow)
                }
                Value::Dict(dict) => self.dict_lookup(dict, key),
                other => Err(ScriptError::type_error(format!(
                    "'{}' object is not subscriptable",
                    other.type_name()
                ))),
            },
            Index::Slice(lower, upper, step) => match container {
                Value::List(items) => {
                    let items = items.borrow();
                    let picked = slice_indices(items.len(), lower, upper, step)?;
                    Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
                }
                Value::Tuple(items) => {
                    let picked = slice_indices(items.len(), lower, upper, step)?;
                    Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
                }
                Value::Str(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let picked = slice_indices(chars.len(), lower, upper, step)?;
                    Ok(Value::str(picked.into_iter().map(|i| chars[i]).collect::<String>()))
                }
                Value::Range(r) => {
                    check_len(r.len())?;
                    let picked = slice_indices(r.len(), lower, upper, step)?;
                    Ok(Value::list(
                        picked
                            .into_iter()
                            .filter_map(|i| r.get(i))
                            .map(Value::Int)
                            .collect(),
                    ))
                }
                other => Err(ScriptError::type_error(format!(
                    "'{}' object is not subscriptable",
                    other.type_name()
                ))),
            },
        }
    }

    fn dict_lookup(&mut self, dict: &Rc<RefCell<Dict>>, key: Value) -> ScriptResult<Value> {
        if let Some(found) = dict.borrow().get(&key)? {
            return Ok(found);
        }
        let kind = dict.borrow().kind.clone();
        match kind {
            DictKind::Counter => Ok(Value::Int(0)),
            DictKind::Default(factory) => {
                let value = self.call(&factory, Vec::new(), Vec::new())?;
                dict.borrow_mut().insert(key, value.clone())?;
                Ok(value)
            }
            DictKind::Plain => Err(ScriptError::raised("KeyError", key.repr())),
        }
    }

    pub fn set_item(&mut self, container: &Value, index: Index, value: Value) -> ScriptResult<()> {
        match (container, index) {
            (Value::List(items), Index::Item(key)) => {
                let mut items = items.borrow_mut();
                let pos = normalize_index(&key, items.len(), "list assignment")?;
                items[pos] = value;
                Ok(())
            }
            (Value::List(items), Index::Slice(lower, upper, step)) => {
                if step.is_some_and(|s| s != 1) {
                    return Err(ScriptError::value_error(
                        "extended slice assignment is not supported",
                    ));
                }
                let replacement = self.collect(&value)?;
                let mut items = items.borrow_mut();
                let len = items.len() as i64;
                let clamp = |bound: Option<i64>, default: i64| match bound {
                    None => default,
                    Some(v) if v < 0 => (v + len).max(0),
                    Some(v) => v.min(len),
                };
                let start = clamp(lower, 0) as usize;
                let stop = (clamp(upper, len) as usize).max(start);
                check_len(items.len() - (stop - start) + replacement.len())?;
                items.splice(start..stop, replacement);
                Ok(())
            }
            (Value::Dict(dict), Index::Item(key)) => dict.borrow_mut().insert(key, value),
            (other, _) => Err(ScriptError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn del_item(&mut self, container: &Value, index: Index) -> ScriptResult<()> {
        match (container, index) {
            (Value::List(items), Index::Item(key)) => {
                let mut items = items.borrow_mut();
                let pos = normalize_index(&key, items.len(), "list assignment")?;
                items.remove(pos);
                Ok(())
            }
            (Value::List(items), Index::Slice(lower, upper, step)) => {
                let mut items = items.borrow_mut();
                let mut picked = slice_indices(items.len(), lower, upper, step)?;
                picked.sort_unstable_by(|a, b| b.cmp(a));
                for i in picked {
                    items.remove(i);
                }
                Ok(())
            }
            (Value::Dict(dict), Index::Item(key)) => match dict.borrow_mut().remove(&key)? {
                Some(_) => Ok(()),
                None => Err(ScriptError::raised("KeyError", key.repr())),
            },
            (other, _) => Err(ScriptError::type_error(format!(
                "'{}' object doesn't support item deletion",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn run(source: &str, entry: &str, args: serde_json::Value) -> Result<RunOutcome, RunFailure> {
        let arguments = match args {
            serde_json::Value::Object(map) => map,
            _ => Arguments::new(),
        };
        run_tool(
            source,
            entry,
            &arguments,
            Arc::new(ValidatorPolicy::default()),
            Limits::default(),
            None,
        )
    }

    fn value(source: &str, entry: &str, args: serde_json::Value) -> serde_json::Value {
        run(source, entry, args).unwrap().value
    }

    fn failure(source: &str) -> ScriptError {
        run(source, "f", json!({})).unwrap_err().error
    }

    #[test]
    fn test_entry_receives_keyword_arguments() {
        let src = "def add(a, b):\n    return a + b\n";
        assert_eq!(value(src, "add", json!({"a": 2, "b": 3})), json!(5));
    }

    #[test]
    fn test_python_arithmetic_semantics() {
        let src = "def f():\n    return [7 // -2, -7 % 3, 7 / 2, 2 ** 10, 2 ** -1, 7.5 // 2]\n";
        assert_eq!(value(src, "f", json!({})), json!([-4, 2, 3.5, 1024, 0.5, 3.0]));
    }

    #[test]
    fn test_integer_overflow_raises() {
        let err = failure("def f():\n    return 9223372036854775807 + 1\n");
        assert_eq!(err.kind, ErrorKind::Raised);
        assert!(err.message.starts_with("OverflowError"));
    }

    #[test]
    fn test_closures_and_comprehensions() {
        let src = r#"
def make_adder(n):
    return lambda x: x + n

def f(xs):
    add3 = make_adder(3)
    evens = [add3(x) for x in xs if x % 2 == 0]
    squares = {x: x * x for x in range(3)}
    return evens, squares
"#;
        assert_eq!(
            value(src, "f", json!({"xs": [1, 2, 3, 4]})),
            json!([[5, 7], {"0": 0, "1": 1, "2": 4}])
        );
    }

    #[test]
    fn test_slices_and_negative_indexes() {
        let src = "def f(s):\n    return s[::-1], s[1:3], s[-1], [1, 2, 3, 4][::2]\n";
        assert_eq!(
            value(src, "f", json!({"s": "hello"})),
            json!(["olleh", "el", "o", [1, 3]])
        );
    }

    #[test]
    fn test_tuple_unpacking_and_aug_assign() {
        let src = r#"
def f():
    a, b = 1, 2
    a, b = b, a
    counts = {}
    for word in ["x", "y", "x"]:
        counts[word] = counts.get(word, 0) + 1
    total = 0
    for k, v in counts.items():
        total += v
    items = [1]
    items += [2, 3]
    return a, b, counts, total, items
"#;
        assert_eq!(
            value(src, "f", json!({})),
            json!([2, 1, {"x": 2, "y": 1}, 3, [1, 2, 3]])
        );
    }

    #[test]
    fn test_print_is_captured_and_capped() {
        let src = "def f():\n    for i in range(10000):\n        print('line', i)\n    return 1\n";
        let outcome = run(src, "f", json!({})).unwrap();
        assert!(outcome.output.starts_with("line 0\nline 1\n"));
        assert!(outcome.output_truncated);
        assert!(outcome.output.len() <= DEFAULT_OUTPUT_CAP);
    }

    #[test]
    fn test_raise_and_assert() {
        let err = failure("def f():\n    raise ValueError('bad input')\n");
        assert_eq!(err.message, "ValueError: bad input");
        assert_eq!(err.location.map(|l| l.line), Some(2));

        let err = failure("def f():\n    assert 1 == 2, 'math broke'\n");
        assert_eq!(err.message, "AssertionError: math broke");
    }

    #[test]
    fn test_recursion_limit() {
        let err = failure("def f():\n    return f()\n");
        assert_eq!(err.kind, ErrorKind::Raised);
        assert!(err.message.starts_with("RecursionError"));
    }

    #[test]
    fn test_runtime_refusals_are_violations() {
        for src in [
            "def f():\n    return open('/etc/passwd')\n",
            "def f():\n    import os\n    return 1\n",
            "def f():\n    return ''.__class__\n",
            "def f():\n    __builtins__ = {}\n",
            "import math\ndef f():\n    math.pi = 3\n",
            "def f():\n    return eval('1')\n",
        ] {
            let err = failure(src);
            assert_eq!(err.kind, ErrorKind::Violation, "expected violation for {src:?}: {err}");
        }
    }

    #[test]
    fn test_size_bound_raises_memory_error() {
        let err = failure("def f():\n    return 'x' * 2000000\n");
        assert_eq!(err.kind, ErrorKind::Raised);
        assert!(err.message.starts_with("MemoryError: "), "{err}");
        let err = failure("def f():\n    return list(range(5000000))\n");
        assert_eq!(err.kind, ErrorKind::Raised);
    }

    #[test]
    fn test_interrupt_flag_stops_infinite_loop() {
        let flag = Arc::new(AtomicBool::new(true));
        let err = run_tool(
            "def f():\n    while True:\n        pass\n",
            "f",
            &Arguments::new(),
            Arc::new(ValidatorPolicy::default()),
            Limits::default(),
            Some(flag),
        )
        .unwrap_err()
        .error;
        assert_eq!(err.kind, ErrorKind::Interrupted);
    }

    #[test]
    fn test_missing_entry_and_bad_arguments() {
        let err = run("def g():\n    return 1\n", "f", json!({})).unwrap_err().error;
        assert!(err.message.starts_with("NameError"));

        let err = run("def f(a):\n    return a\n", "f", json!({"b": 1}))
            .unwrap_err()
            .error;
        assert!(err.message.contains("unexpected keyword argument"));
    }

    #[test]
    fn test_defaultdict_and_counter_semantics() {
        let src = r#"
from collections import Counter, defaultdict
def f(words):
    c = Counter(words)
    groups = defaultdict(list)
    for w in words:
        groups[len(w)].append(w)
    return c["a"], c["missing"], c.most_common(1), dict(groups)
"#;
        assert_eq!(
            value(src, "f", json!({"words": ["a", "bb", "a"]})),
            json!([2, 0, [["a", 2]], {"1": ["a", "a"], "2": ["bb"]}])
        );
    }
}
