//! Tree-walking evaluator.
//!
//! Function calls are resolved through a [`Resolver`] so the caller decides
//! how long any registry lock is held: the evaluator only needs the
//! definition, never the registry, while a sensor runs.

use std::sync::Arc;

use crate::parser::{BinaryOp, Expr, UnaryOp};
use crate::registry::{FunctionDef, FunctionRegistry, SensorError};
use crate::value::Value;

/// Errors produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("function {name} expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("cannot apply {op} to {operands}")]
    TypeCoercion { op: &'static str, operands: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("function {name} failed: {source}")]
    Sensor {
        name: String,
        #[source]
        source: SensorError,
    },
}

/// Resolves function names to definitions.
pub trait Resolver {
    fn resolve(&self, name: &str) -> Option<Arc<FunctionDef>>;
}

impl Resolver for FunctionRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<FunctionDef>> {
        self.lookup(name)
    }
}

/// Evaluate `expr`, calling each function node at most once.
pub fn evaluate<R: Resolver + ?Sized>(expr: &Expr, resolver: &R) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Call { name, args, .. } => {
            let def = resolve_checked(resolver, name, args.len())?;
            let values = args
                .iter()
                .map(|arg| evaluate(arg, resolver))
                .collect::<Result<Vec<_>, _>>()?;
            def.call(&values).map_err(|source| EvalError::Sensor {
                name: name.clone(),
                source,
            })
        }
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, resolver)?;
            unary(*op, value)
        }
        Expr::Binary { op, lhs, rhs } => match op {
            BinaryOp::And => {
                if !logical("AND", &evaluate(lhs, resolver)?)? {
                    return Ok(Value::FALSE);
                }
                Ok(logical("AND", &evaluate(rhs, resolver)?)?.into())
            }
            BinaryOp::Or => {
                if logical("OR", &evaluate(lhs, resolver)?)? {
                    return Ok(Value::TRUE);
                }
                Ok(logical("OR", &evaluate(rhs, resolver)?)?.into())
            }
            _ => {
                let l = evaluate(lhs, resolver)?;
                let r = evaluate(rhs, resolver)?;
                binary(*op, &l, &r)
            }
        },
    }
}

/// Check every call node against the resolver without running anything.
pub fn check<R: Resolver + ?Sized>(expr: &Expr, resolver: &R) -> Result<(), EvalError> {
    let mut result = Ok(());
    expr.for_each_call(&mut |name, argc, _| {
        if result.is_ok() {
            result = resolve_checked(resolver, name, argc).map(|_| ());
        }
    });
    result
}

fn resolve_checked<R: Resolver + ?Sized>(
    resolver: &R,
    name: &str,
    argc: usize,
) -> Result<Arc<FunctionDef>, EvalError> {
    let def = resolver
        .resolve(name)
        .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
    if def.arity != argc {
        return Err(EvalError::ArityMismatch {
            name: name.to_string(),
            expected: def.arity,
            actual: argc,
        });
    }
    Ok(def)
}

fn logical(op: &'static str, value: &Value) -> Result<bool, EvalError> {
    value.as_logical().ok_or_else(|| EvalError::TypeCoercion {
        op,
        operands: value.type_name().to_string(),
    })
}

fn mismatch(op: BinaryOp, l: &Value, r: &Value) -> EvalError {
    EvalError::TypeCoercion {
        op: op.symbol(),
        operands: format!("{} and {}", l.type_name(), r.type_name()),
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => Ok((!logical("NOT", &value)?).into()),
        UnaryOp::Neg => {
            if value.is_absent() {
                return Ok(Value::Absent);
            }
            value
                .as_number()
                .map(|n| Value::Number(-n))
                .ok_or_else(|| EvalError::TypeCoercion {
                    op: "-",
                    operands: value.type_name().to_string(),
                })
        }
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq => Ok(l.loosely_equals(r).into()),
        BinaryOp::NotEq => Ok((!l.loosely_equals(r)).into()),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            if l.is_absent() || r.is_absent() {
                return Ok(Value::FALSE);
            }
            let (Some(a), Some(b)) = (l.as_number(), r.as_number()) else {
                return Err(mismatch(op, l, r));
            };
            let holds = match op {
                BinaryOp::Lt => a < b,
                BinaryOp::LtEq => a <= b,
                BinaryOp::Gt => a > b,
                _ => a >= b,
            };
            Ok(holds.into())
        }
        BinaryOp::Add => add(l, r),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, l, r),
        // Short-circuit operators never reach here.
        BinaryOp::And | BinaryOp::Or => Err(mismatch(op, l, r)),
    }
}

fn add(l: &Value, r: &Value) -> Result<Value, EvalError> {
    if let (Some(a), Some(b)) = (l.as_number(), r.as_number()) {
        return Ok(Value::Number(a + b));
    }
    match (l, r) {
        (Value::Bool(_), _) | (_, Value::Bool(_)) => Err(mismatch(BinaryOp::Add, l, r)),
        (Value::Str(_), _) | (_, Value::Str(_)) => {
            Ok(Value::Str(format!("{}{}", l.to_text(), r.to_text())))
        }
        _ => Ok(Value::Absent),
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    let numeric_or_absent = |v: &Value| v.is_absent() || v.as_number().is_some();
    if (l.is_absent() || r.is_absent()) && numeric_or_absent(l) && numeric_or_absent(r) {
        return Ok(Value::Absent);
    }
    let (Some(a), Some(b)) = (l.as_number(), r.as_number()) else {
        return Err(mismatch(op, l, r));
    };
    let n = match op {
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => a / b,
        _ => a % b,
    };
    Ok(Value::Number(n))
}
