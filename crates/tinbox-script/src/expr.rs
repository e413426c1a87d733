//! Expression engine for cartridge scripts
//!
//! Expressions are loaded from the cartridge's RON program and evaluated
//! against the VM's globals. Integer arithmetic is checked: overflow and
//! division by zero are script errors, never wrapped or undefined results.
//! Every evaluated node consumes one operation from the call's [`OpMeter`].
//!
//! Temporaries count against VM memory too. Lists, strings and copies of
//! globals built during one evaluation are reserved against the context's
//! scratch allowance before they are allocated, so an expression cannot grow
//! past the hard ceiling and only be refused once it is stored.

use serde::{Deserialize, Serialize};
use tinbox_core::{LogLevel, Result, Status, Value, ValueMap};

/// Longest string an expression may build
pub const MAX_STRING_BYTES: usize = 1 << 20;

/// Bytes reserved per element of a list or argument vector
const VALUE_SLOT: u64 = std::mem::size_of::<Value>() as u64;

/// An expression that can be evaluated to produce a Value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    // === Literals ===
    /// A literal value
    Literal(Value),
    /// A list built from expressions
    List(Vec<Expr>),

    // === Variable Access ===
    /// Read a global
    Global(String),
    /// Read a parameter of the current block (`tick`, `dt`)
    Param(String),

    // === Arithmetic ===
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Abs(Box<Expr>),
    Min(Box<Expr>, Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
    /// Clamp value between min and max
    Clamp(Box<Expr>, Box<Expr>, Box<Expr>),
    Floor(Box<Expr>),
    Ceil(Box<Expr>),
    Round(Box<Expr>),

    // === Comparison ===
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),

    // === Logical ===
    /// Logical AND (all must be true)
    And(Vec<Expr>),
    /// Logical OR (at least one must be true)
    Or(Vec<Expr>),
    Not(Box<Expr>),

    // === Conditionals ===
    /// If-then-else
    If(Box<Expr>, Box<Expr>, Box<Expr>),

    // === Collections ===
    /// Length of a string (in characters), list or map
    Len(Box<Expr>),
    /// List element by index or map entry by key; missing reads as null
    Index(Box<Expr>, Box<Expr>),

    // === String ===
    /// Concatenate values as text
    Concat(Vec<Expr>),
    /// Replace `{0}`, `{1}`, ... in a template
    Format(String, Vec<Expr>),

    // === Host ===
    /// Call a bound native function, e.g. `Call("sys.rand", [])`
    Call(String, Vec<Expr>),
}

/// Entry point into the native-call boundary
pub trait NativeCall {
    /// Call a bound function
    ///
    /// Failures never abort the script: they come back as `Value::Null`
    /// with the error recorded for `sys.last_error()`.
    fn call(&mut self, name: &str, args: &[Value]) -> Value;

    /// Emit a script log message, subject to the log-rate ceiling
    fn log(&mut self, level: LogLevel, message: &str);
}

/// Per-call operation budget
#[derive(Debug, Clone)]
pub struct OpMeter {
    limit: u64,
    used: u64,
}

impl OpMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Consume one operation
    pub fn step(&mut self) -> Result<()> {
        if self.used >= self.limit {
            return Err(Status::resource_exhausted(format!(
                "operation budget of {} exhausted",
                self.limit
            )));
        }
        self.used += 1;
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

/// Context for evaluating expressions
pub struct EvalContext<'a> {
    pub globals: &'a ValueMap,
    pub params: &'a ValueMap,
    pub meter: &'a mut OpMeter,
    pub natives: &'a mut dyn NativeCall,
    scratch_limit: u64,
    scratch_used: u64,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        globals: &'a ValueMap,
        params: &'a ValueMap,
        meter: &'a mut OpMeter,
        natives: &'a mut dyn NativeCall,
    ) -> Self {
        Self {
            globals,
            params,
            meter,
            natives,
            scratch_limit: u64::MAX,
            scratch_used: 0,
        }
    }

    /// Cap the bytes of temporaries this evaluation may build
    pub fn with_scratch_limit(mut self, bytes: u64) -> Self {
        self.scratch_limit = bytes;
        self
    }

    /// Bytes of temporaries reserved so far
    pub fn scratch_used(&self) -> u64 {
        self.scratch_used
    }

    /// Reserve room for a temporary before building it
    fn reserve(&mut self, bytes: u64) -> Result<()> {
        let used = self.scratch_used.saturating_add(bytes);
        if used > self.scratch_limit {
            return Err(Status::resource_exhausted(format!(
                "expression temporaries need {} bytes, {} available",
                used, self.scratch_limit
            )));
        }
        self.scratch_used = used;
        Ok(())
    }

    /// Copy a stored value out, reserving its heap bytes first
    fn copy(&mut self, value: Option<&Value>) -> Result<Value> {
        match value {
            Some(value) => {
                self.reserve(heap_bytes(value))?;
                Ok(value.clone())
            }
            None => Ok(Value::Null),
        }
    }

    /// Evaluate call arguments into one vector
    pub(crate) fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>> {
        self.reserve(args.len() as u64 * VALUE_SLOT)?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(arg.eval(self)?);
        }
        Ok(values)
    }

    /// Append a value's text, refusing before the string grows too long
    fn push_text(&mut self, out: &mut String, value: &Value) -> Result<()> {
        let rendered;
        let text = match value {
            Value::String(s) => s.as_str(),
            other => {
                rendered = other.to_string();
                rendered.as_str()
            }
        };
        check_len(out.len().saturating_add(text.len()))?;
        self.reserve(text.len() as u64)?;
        out.push_str(text);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl Expr {
    /// Evaluate this expression in the given context
    pub fn eval(&self, ctx: &mut EvalContext) -> Result<Value> {
        ctx.meter.step()?;
        match self {
            // Literals
            Expr::Literal(v) => ctx.copy(Some(v)),
            Expr::List(items) => {
                ctx.reserve(items.len() as u64 * VALUE_SLOT)?;
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    list.push(item.eval(ctx)?);
                }
                Ok(Value::List(list))
            }

            // Variable access
            Expr::Global(name) => {
                let globals = ctx.globals;
                ctx.copy(globals.get(name))
            }
            Expr::Param(name) => {
                let params = ctx.params;
                ctx.copy(params.get(name))
            }

            // Arithmetic
            Expr::Add(a, b) => arith(Arith::Add, &a.eval(ctx)?, &b.eval(ctx)?),
            Expr::Sub(a, b) => arith(Arith::Sub, &a.eval(ctx)?, &b.eval(ctx)?),
            Expr::Mul(a, b) => arith(Arith::Mul, &a.eval(ctx)?, &b.eval(ctx)?),
            Expr::Div(a, b) => arith(Arith::Div, &a.eval(ctx)?, &b.eval(ctx)?),
            Expr::Mod(a, b) => arith(Arith::Mod, &a.eval(ctx)?, &b.eval(ctx)?),
            Expr::Neg(a) => match a.eval(ctx)? {
                Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
                other => Ok(Value::Float(-number(&other)?)),
            },
            Expr::Abs(a) => match a.eval(ctx)? {
                Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(overflow),
                other => Ok(Value::Float(number(&other)?.abs())),
            },
            Expr::Min(a, b) => match (a.eval(ctx)?, b.eval(ctx)?) {
                (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.min(y))),
                (x, y) => Ok(Value::Float(number(&x)?.min(number(&y)?))),
            },
            Expr::Max(a, b) => match (a.eval(ctx)?, b.eval(ctx)?) {
                (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.max(y))),
                (x, y) => Ok(Value::Float(number(&x)?.max(number(&y)?))),
            },
            Expr::Clamp(val, min, max) => {
                let v = val.eval(ctx)?;
                let lo = min.eval(ctx)?;
                let hi = max.eval(ctx)?;
                clamp(&v, &lo, &hi)
            }
            Expr::Floor(a) => to_int(number(&a.eval(ctx)?)?.floor()),
            Expr::Ceil(a) => to_int(number(&a.eval(ctx)?)?.ceil()),
            Expr::Round(a) => to_int(number(&a.eval(ctx)?)?.round()),

            // Comparison
            Expr::Eq(a, b) => Ok(Value::Bool(values_equal(&a.eval(ctx)?, &b.eval(ctx)?))),
            Expr::Ne(a, b) => Ok(Value::Bool(!values_equal(&a.eval(ctx)?, &b.eval(ctx)?))),
            Expr::Lt(a, b) => compare(&a.eval(ctx)?, &b.eval(ctx)?, |o| o.is_lt()),
            Expr::Le(a, b) => compare(&a.eval(ctx)?, &b.eval(ctx)?, |o| o.is_le()),
            Expr::Gt(a, b) => compare(&a.eval(ctx)?, &b.eval(ctx)?, |o| o.is_gt()),
            Expr::Ge(a, b) => compare(&a.eval(ctx)?, &b.eval(ctx)?, |o| o.is_ge()),

            // Logical
            Expr::And(exprs) => {
                for expr in exprs {
                    if !expr.eval(ctx)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Or(exprs) => {
                for expr in exprs {
                    if expr.eval(ctx)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Not(a) => Ok(Value::Bool(!a.eval(ctx)?.is_truthy())),

            // Conditionals
            Expr::If(cond, then_expr, else_expr) => {
                if cond.eval(ctx)?.is_truthy() {
                    then_expr.eval(ctx)
                } else {
                    else_expr.eval(ctx)
                }
            }

            // Collections
            Expr::Len(a) => a.inspect(ctx, |value| match value {
                Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(list) => Ok(Value::Int(list.len() as i64)),
                Value::Map(map) => Ok(Value::Int(map.len() as i64)),
                other => Err(type_error("string, list or map", other)),
            }),
            Expr::Index(container, key) => {
                let key = key.eval(ctx)?;
                let element = container.inspect(ctx, |container| match (container, &key) {
                    (Value::List(list), Value::Int(i)) => {
                        Ok(usize::try_from(*i).ok().and_then(|i| list.get(i)).cloned())
                    }
                    (Value::Map(map), Value::String(k)) => Ok(map.get(k).cloned()),
                    (Value::List(_), other) => Err(type_error("int index", other)),
                    (Value::Map(_), other) => Err(type_error("string key", other)),
                    (other, _) => Err(type_error("list or map", other)),
                })?;
                match element {
                    Some(element) => {
                        ctx.reserve(heap_bytes(&element))?;
                        Ok(element)
                    }
                    None => Ok(Value::Null),
                }
            }

            // String
            Expr::Concat(exprs) => {
                let mut result = String::new();
                for expr in exprs {
                    let value = expr.eval(ctx)?;
                    ctx.push_text(&mut result, &value)?;
                }
                Ok(Value::String(result))
            }
            Expr::Format(template, args) => {
                ctx.reserve(template.len() as u64)?;
                let mut result = template.clone();
                for (i, expr) in args.iter().enumerate() {
                    let value = expr.eval(ctx)?;
                    let mut text = String::new();
                    ctx.push_text(&mut text, &value)?;
                    let placeholder = format!("{{{}}}", i);
                    let count = result.matches(placeholder.as_str()).count();
                    if count == 0 {
                        continue;
                    }
                    // Size the expansion before replacing
                    let len = (result.len() - count * placeholder.len())
                        .saturating_add(count.saturating_mul(text.len()));
                    check_len(len)?;
                    ctx.reserve(len as u64)?;
                    result = result.replace(&placeholder, &text);
                }
                Ok(Value::String(result))
            }

            // Host
            Expr::Call(name, args) => {
                let values = ctx.eval_args(args)?;
                let result = ctx.natives.call(name, &values);
                ctx.reserve(heap_bytes(&result))?;
                Ok(result)
            }
        }
    }

    /// Evaluate and pass the result to `f`, borrowing globals and params
    /// instead of copying them
    fn inspect<R>(
        &self,
        ctx: &mut EvalContext,
        f: impl FnOnce(&Value) -> Result<R>,
    ) -> Result<R> {
        let null = Value::Null;
        match self {
            Expr::Global(name) => {
                ctx.meter.step()?;
                f(ctx.globals.get(name).unwrap_or(&null))
            }
            Expr::Param(name) => {
                ctx.meter.step()?;
                f(ctx.params.get(name).unwrap_or(&null))
            }
            other => f(&other.eval(ctx)?),
        }
    }

    /// Create a literal expression
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Create a global access expression
    pub fn global(name: impl Into<String>) -> Self {
        Expr::Global(name.into())
    }

    /// Create a parameter access expression
    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    /// Create a native call expression
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(name.into(), args)
    }
}

fn type_error(expected: &str, got: &Value) -> Status {
    Status::invalid_argument(format!("expected {}, got {}", expected, got.type_name()))
}

fn overflow() -> Status {
    Status::invalid_argument("integer overflow")
}

pub(crate) fn number(v: &Value) -> Result<f64> {
    v.as_float().ok_or_else(|| type_error("number", v))
}

fn to_int(f: f64) -> Result<Value> {
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range
    if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Ok(Value::Int(f as i64))
    } else {
        Err(Status::invalid_argument(format!("{} is out of integer range", f)))
    }
}

/// Apply arithmetic; two ints stay int (checked), anything else is float
pub(crate) fn arith(op: Arith, a: &Value, b: &Value) -> Result<Value> {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        let (x, y) = (*x, *y);
        if matches!(op, Arith::Div | Arith::Mod) && y == 0 {
            return Err(Status::invalid_argument("division by zero"));
        }
        let result = match op {
            Arith::Add => x.checked_add(y),
            Arith::Sub => x.checked_sub(y),
            Arith::Mul => x.checked_mul(y),
            Arith::Div => x.checked_div(y),
            Arith::Mod => x.checked_rem(y),
        };
        return result.map(Value::Int).ok_or_else(overflow);
    }

    let x = number(a)?;
    let y = number(b)?;
    if matches!(op, Arith::Div | Arith::Mod) && y == 0.0 {
        return Err(Status::invalid_argument("division by zero"));
    }
    Ok(Value::Float(match op {
        Arith::Add => x + y,
        Arith::Sub => x - y,
        Arith::Mul => x * y,
        Arith::Div => x / y,
        Arith::Mod => x % y,
    }))
}

fn clamp(v: &Value, lo: &Value, hi: &Value) -> Result<Value> {
    if let (Value::Int(v), Value::Int(lo), Value::Int(hi)) = (v, lo, hi) {
        if lo > hi {
            return Err(Status::invalid_argument("clamp bounds are inverted"));
        }
        return Ok(Value::Int((*v).clamp(*lo, *hi)));
    }
    let (v, lo, hi) = (number(v)?, number(lo)?, number(hi)?);
    // f64::clamp panics on inverted or NaN bounds
    if lo.is_nan() || hi.is_nan() || lo > hi {
        return Err(Status::invalid_argument("clamp bounds are inverted or NaN"));
    }
    Ok(Value::Float(v.clamp(lo, hi)))
}

fn compare(a: &Value, b: &Value, accept: fn(std::cmp::Ordering) -> bool) -> Result<Value> {
    let ordering = match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        _ => number(a)?.partial_cmp(&number(b)?),
    };
    // NaN compares false both ways
    Ok(Value::Bool(ordering.is_some_and(accept)))
}

/// Check if two values are equal; ints and floats compare numerically
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        _ => a == b,
    }
}

/// Heap bytes a value owns; scalars live inline
fn heap_bytes(v: &Value) -> u64 {
    match v {
        Value::String(_) | Value::List(_) | Value::Map(_) => v.footprint(),
        _ => 0,
    }
}

fn check_len(len: usize) -> Result<()> {
    if len > MAX_STRING_BYTES {
        return Err(Status::resource_exhausted(format!(
            "string longer than {} bytes",
            MAX_STRING_BYTES
        )));
    }
    Ok(())
}
