//! Arithmetic, comparison and concatenation.

use crate::values::Value;
use crate::vm::VmError;
use std::cmp::Ordering;
use tailrec_core::lir::OpCode;

/// Evaluate a two-operand opcode.
pub fn binary(op: OpCode, lhs: &Value, rhs: &Value) -> Result<Value, VmError> {
    match op {
        OpCode::Add => arith(lhs, rhs, i64::checked_add, |a, b| a + b),
        OpCode::Sub => arith(lhs, rhs, i64::checked_sub, |a, b| a - b),
        OpCode::Mul => arith(lhs, rhs, i64::checked_mul, |a, b| a * b),
        OpCode::Div => divide(lhs, rhs),
        OpCode::Mod => {
            let (a, b) = (as_int(lhs)?, as_int(rhs)?);
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            a.checked_rem(b).map(Value::Int).ok_or(VmError::ArithmeticOverflow)
        }
        OpCode::Concat => Ok(Value::Str(lhs.as_string() + &rhs.as_string())),
        OpCode::IsEqual => Ok(Value::Bool(values_equal(lhs, rhs))),
        OpCode::IsNotEqual => Ok(Value::Bool(!values_equal(lhs, rhs))),
        OpCode::IsSmaller => Ok(Value::Bool(compare(lhs, rhs)? == Ordering::Less)),
        OpCode::IsSmallerOrEqual => Ok(Value::Bool(compare(lhs, rhs)? != Ordering::Greater)),
        other => Err(VmError::Runtime(format!("{} is not a binary operation", other))),
    }
}

fn arith(
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, VmError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
            .map(Value::Int)
            .ok_or(VmError::ArithmeticOverflow),
        _ => Ok(Value::Float(float_op(as_float(lhs)?, as_float(rhs)?))),
    }
}

fn divide(lhs: &Value, rhs: &Value) -> Result<Value, VmError> {
    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        if *b == 0 {
            return Err(VmError::DivisionByZero);
        }
        // Exact integer quotients stay integers.
        if a.checked_rem(*b).ok_or(VmError::ArithmeticOverflow)? == 0 {
            return a.checked_div(*b).map(Value::Int).ok_or(VmError::ArithmeticOverflow);
        }
    }
    let b = as_float(rhs)?;
    if b == 0.0 {
        return Err(VmError::DivisionByZero);
    }
    Ok(Value::Float(as_float(lhs)? / b))
}

fn as_int(v: &Value) -> Result<i64, VmError> {
    match v {
        Value::Int(n) => Ok(*n),
        Value::Bool(b) => Ok(*b as i64),
        Value::Null => Ok(0),
        other => Err(VmError::TypeError(format!("expected int, got {}", other.type_name()))),
    }
}

fn as_float(v: &Value) -> Result<f64, VmError> {
    match v {
        Value::Float(f) => Ok(*f),
        Value::Int(n) => Ok(*n as f64),
        Value::Bool(b) => Ok(*b as i64 as f64),
        Value::Null => Ok(0.0),
        other => Err(VmError::TypeError(format!("expected number, got {}", other.type_name()))),
    }
}

pub fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        (a, b) => a == b,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, VmError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        _ => as_float(lhs)?
            .partial_cmp(&as_float(rhs)?)
            .ok_or_else(|| VmError::TypeError("NaN is not ordered".into())),
    }
}
