//! Effect types for changing script state
//!
//! Effects are the "write" side of the expression engine. They change the
//! VM's globals and call into the host; nothing else is reachable.

use crate::expr::{arith, number, Arith, EvalContext, Expr, NativeCall, OpMeter};
use crate::memory::{entry_footprint, MemoryMeter};
use serde::{Deserialize, Serialize};
use tinbox_core::{LogLevel, Result, Status, Value, ValueMap};

/// An operation to modify a global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifyOp {
    /// Set to the value
    Set,
    /// Add the value
    Add,
    /// Subtract the value
    Sub,
    /// Multiply by the value
    Mul,
    /// Divide by the value
    Div,
    /// Set to minimum of current and value
    Min,
    /// Set to maximum of current and value
    Max,
}

impl ModifyOp {
    /// Apply this operation to a current value; a missing global counts as 0
    pub fn apply(&self, current: &Value, operand: &Value) -> Result<Value> {
        let zero = Value::Int(0);
        let current = if current.is_null() { &zero } else { current };
        match self {
            ModifyOp::Set => Ok(operand.clone()),
            ModifyOp::Add => arith(Arith::Add, current, operand),
            ModifyOp::Sub => arith(Arith::Sub, current, operand),
            ModifyOp::Mul => arith(Arith::Mul, current, operand),
            ModifyOp::Div => arith(Arith::Div, current, operand),
            ModifyOp::Min | ModifyOp::Max => {
                let pick_operand = match (current, operand) {
                    (Value::Int(a), Value::Int(b)) => (b < a) == (*self == ModifyOp::Min),
                    _ => {
                        let (a, b) = (number(current)?, number(operand)?);
                        (b < a) == (*self == ModifyOp::Min)
                    }
                };
                Ok(if pick_operand {
                    operand.clone()
                } else {
                    current.clone()
                })
            }
        }
    }
}

/// An effect that changes script state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    // === Globals ===
    /// Set a global
    SetGlobal { name: String, value: Expr },
    /// Modify a global in place
    ModifyGlobal {
        name: String,
        op: ModifyOp,
        value: Expr,
    },
    /// Remove a global
    RemoveGlobal(String),

    // === Host ===
    /// Call a bound function and discard its result
    Call(String, Vec<Expr>),
    /// Log a message through `sys.log`'s rate limit
    Log { level: LogLevel, message: Expr },

    // === Control Flow ===
    /// Execute effects conditionally
    If {
        condition: Expr,
        then_effects: Vec<Effect>,
        #[serde(default)]
        else_effects: Vec<Effect>,
    },
    /// Execute multiple effects
    Sequence(Vec<Effect>),
    /// Execute effects `count` times
    Repeat { count: Expr, effects: Vec<Effect> },
    /// Abort the current call with an error
    Raise(Expr),
}

/// Context for executing effects
pub struct ExecContext<'a> {
    pub globals: &'a mut ValueMap,
    pub params: &'a ValueMap,
    pub meter: &'a mut OpMeter,
    pub natives: &'a mut dyn NativeCall,
    pub memory: &'a mut MemoryMeter,
}

impl ExecContext<'_> {
    fn eval_context(&mut self) -> EvalContext<'_> {
        let headroom = self.memory.headroom();
        EvalContext::new(self.globals, self.params, self.meter, self.natives)
            .with_scratch_limit(headroom)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        expr.eval(&mut self.eval_context())
    }

    /// Write a global, charging its growth first
    fn store(&mut self, name: &str, value: Value) -> Result<()> {
        let old = self
            .globals
            .get(name)
            .map_or(0, |current| entry_footprint(name, current));
        self.memory.resize(old, entry_footprint(name, &value))?;
        self.globals.insert(name.to_string(), value);
        Ok(())
    }
}

impl Effect {
    /// Execute this effect
    pub fn execute(&self, ctx: &mut ExecContext) -> Result<()> {
        ctx.meter.step()?;
        match self {
            Effect::SetGlobal { name, value } => {
                let value = ctx.eval(value)?;
                ctx.store(name, value)
            }
            Effect::ModifyGlobal { name, op, value } => {
                let operand = ctx.eval(value)?;
                let current = ctx.globals.get(name).cloned().unwrap_or(Value::Null);
                let value = op.apply(&current, &operand)?;
                ctx.store(name, value)
            }
            Effect::RemoveGlobal(name) => {
                if let Some(old) = ctx.globals.shift_remove(name) {
                    ctx.memory.resize(entry_footprint(name, &old), 0)?;
                }
                Ok(())
            }
            Effect::Call(name, args) => {
                let values = ctx.eval_context().eval_args(args)?;
                ctx.natives.call(name, &values);
                Ok(())
            }
            Effect::Log { level, message } => {
                let message = match ctx.eval(message)? {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                ctx.natives.log(*level, &message);
                Ok(())
            }
            Effect::If {
                condition,
                then_effects,
                else_effects,
            } => {
                let branch = if ctx.eval(condition)?.is_truthy() {
                    then_effects
                } else {
                    else_effects
                };
                execute_all(branch, ctx)
            }
            Effect::Sequence(effects) => execute_all(effects, ctx),
            Effect::Repeat { count, effects } => {
                let count = match ctx.eval(count)? {
                    Value::Int(n) if n >= 0 => n,
                    other => {
                        return Err(Status::invalid_argument(format!(
                            "repeat count must be a non-negative int, got {}",
                            other
                        )))
                    }
                };
                for _ in 0..count {
                    // Keeps `Repeat` with an empty body metered
                    ctx.meter.step()?;
                    execute_all(effects, ctx)?;
                }
                Ok(())
            }
            Effect::Raise(message) => {
                let message = match ctx.eval(message)? {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Err(Status::failed_precondition(format!("script raised: {}", message)))
            }
        }
    }

    /// Create a set global effect
    pub fn set(name: impl Into<String>, value: Expr) -> Self {
        Effect::SetGlobal {
            name: name.into(),
            value,
        }
    }

    /// Create an add effect (adds to a numeric global)
    pub fn add(name: impl Into<String>, value: Expr) -> Self {
        Effect::ModifyGlobal {
            name: name.into(),
            op: ModifyOp::Add,
            value,
        }
    }

    /// Create a native call effect
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Effect::Call(name.into(), args)
    }
}

/// Execute effects in order, stopping at the first error
pub fn execute_all(effects: &[Effect], ctx: &mut ExecContext) -> Result<()> {
    for effect in effects {
        effect.execute(ctx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinbox_core::{
        BudgetLimits, Ceiling, ErrorKind, LogContext, Resource, ResourceBudget, SharedBudget,
    };

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        logs: Vec<(LogLevel, String)>,
    }

    impl NativeCall for Recorder {
        fn call(&mut self, name: &str, _args: &[Value]) -> Value {
            self.calls.push(name.to_string());
            Value::Null
        }

        fn log(&mut self, level: LogLevel, message: &str) {
            self.logs.push((level, message.to_string()));
        }
    }

    struct Fixture {
        budget: SharedBudget,
        globals: ValueMap,
        natives: Recorder,
        memory: MemoryMeter,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_limits(BudgetLimits::default())
        }

        fn with_limits(limits: BudgetLimits) -> Self {
            let budget = ResourceBudget::new(limits).into_shared();
            let memory = MemoryMeter::new(budget.clone(), LogContext::default()).unwrap();
            Self {
                budget,
                globals: ValueMap::new(),
                natives: Recorder::default(),
                memory,
            }
        }

        fn run(&mut self, effects: &[Effect], ops: u64) -> Result<()> {
            let params = ValueMap::new();
            let mut meter = OpMeter::new(ops);
            let mut ctx = ExecContext {
                globals: &mut self.globals,
                params: &params,
                meter: &mut meter,
                natives: &mut self.natives,
                memory: &mut self.memory,
            };
            execute_all(effects, &mut ctx)
        }
    }

    #[test]
    fn test_modify_op() {
        assert_eq!(
            ModifyOp::Add.apply(&Value::Null, &Value::Int(3)).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            ModifyOp::Min.apply(&Value::Int(5), &Value::Int(3)).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            ModifyOp::Max.apply(&Value::Float(5.0), &Value::Int(3)).unwrap(),
            Value::Float(5.0)
        );
        assert!(ModifyOp::Div.apply(&Value::Int(5), &Value::Int(0)).is_err());
    }

    #[test]
    fn test_set_and_modify_globals() {
        let mut fx = Fixture::new();
        let effects = [
            Effect::set("score", Expr::lit(10i64)),
            Effect::add("score", Expr::lit(5i64)),
            Effect::If {
                condition: Expr::Gt(
                    Box::new(Expr::global("score")),
                    Box::new(Expr::lit(12i64)),
                ),
                then_effects: vec![Effect::set("won", Expr::lit(true))],
                else_effects: vec![],
            },
        ];
        fx.run(&effects, 100).unwrap();
        assert_eq!(fx.globals.get("score"), Some(&Value::Int(15)));
        assert_eq!(fx.globals.get("won"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_memory_tracks_globals() {
        let mut fx = Fixture::new();
        let base = fx.budget.borrow().usage(Resource::VmMemory);

        fx.run(&[Effect::set("name", Expr::lit("x".repeat(100).as_str()))], 10)
            .unwrap();
        let grown = fx.budget.borrow().usage(Resource::VmMemory);
        assert_eq!(
            grown - base,
            entry_footprint("name", &Value::String("x".repeat(100)))
        );

        fx.run(&[Effect::RemoveGlobal("name".into())], 10).unwrap();
        assert_eq!(fx.budget.borrow().usage(Resource::VmMemory), base);
    }

    #[test]
    fn test_copies_of_a_global_stop_at_the_hard_cap() {
        let limits = BudgetLimits {
            vm_memory: Ceiling::new(4 << 20, 8 << 20),
            ..BudgetLimits::default()
        };
        let mut fx = Fixture::with_limits(limits);
        let big = Expr::Concat(vec![Expr::lit("x".repeat(1 << 19).as_str()); 2]);
        fx.run(&[Effect::set("s", big)], 100).unwrap();
        let held = fx.budget.borrow().usage(Resource::VmMemory);

        let copies = Expr::List(vec![Expr::global("s"); 300]);
        let err = fx.run(&[Effect::set("l", copies)], 1_000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert!(!fx.globals.contains_key("l"));
        assert_eq!(fx.budget.borrow().usage(Resource::VmMemory), held);

        // Same for arguments handed to a native
        let err = fx
            .run(&[Effect::call("sys.log", vec![Expr::global("s"); 300])], 1_000)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert!(fx.natives.calls.is_empty());
    }

    #[test]
    fn test_repeat_and_calls() {
        let mut fx = Fixture::new();
        let effects = [Effect::Repeat {
            count: Expr::lit(3i64),
            effects: vec![Effect::call("gfx.clear", vec![])],
        }];
        fx.run(&effects, 100).unwrap();
        assert_eq!(fx.natives.calls.len(), 3);

        let bad = [Effect::Repeat {
            count: Expr::lit(-1i64),
            effects: vec![],
        }];
        assert_eq!(fx.run(&bad, 100).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_runaway_loop_hits_op_budget() {
        let mut fx = Fixture::new();
        let effects = [Effect::Repeat {
            count: Expr::lit(i64::MAX),
            effects: vec![],
        }];
        let err = fx.run(&effects, 1_000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn test_log_and_raise() {
        let mut fx = Fixture::new();
        let effects = [
            Effect::Log {
                level: LogLevel::Info,
                message: Expr::lit(7i64),
            },
            Effect::Raise(Expr::lit("boom")),
            Effect::set("unreached", Expr::lit(1i64)),
        ];
        let err = fx.run(&effects, 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        assert!(err.message().contains("boom"));
        assert_eq!(fx.natives.logs, vec![(LogLevel::Info, "7".to_string())]);
        assert!(!fx.globals.contains_key("unreached"));
    }
}
