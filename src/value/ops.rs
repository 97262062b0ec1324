//! Operator semantics shared by the expression evaluator and builtins.

use crate::Result;
use crate::error::Error;
use crate::value::Value;
use std::cmp::Ordering;
use std::sync::Arc;

fn to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(n) => Some(*n),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn to_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Int(n) => Some(*n),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn unsupported(op: &str, l: &Value, r: &Value) -> Error {
    Error::eval(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        l.type_name(),
        r.type_name()
    ))
}

/// Upper bound on the length of any list or string built by repetition or `range`.
pub(crate) const MAX_SEQUENCE_LEN: usize = 1 << 24;

pub(crate) fn overflow() -> Error {
    Error::eval("integer overflow")
}

pub fn equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equals(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| equals(v, other)))
        }
        (Value::Func(a), Value::Func(b)) => a.name() == b.name() && a.ptr_eq(b),
        (Value::Template(a), Value::Template(b)) => Arc::ptr_eq(a, b),
        (Value::Loader(a), Value::Loader(b)) => a.ptr_eq(b),
        (Value::Int(a), Value::Int(b)) => a == b,
        _ => match (to_f64(l), to_f64(r)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// Ordering for `<`, `<=`, `>`, `>=`, `min`, `max` and `sorted`.
pub fn compare(l: &Value, r: &Value) -> Result<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => match (to_f64(l), to_f64(r)) {
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .ok_or_else(|| Error::eval("cannot order NaN")),
            _ => Err(Error::eval(format!(
                "'<' not supported between instances of '{}' and '{}'",
                l.type_name(),
                r.type_name()
            ))),
        },
    }
}

/// Membership test for `in` / `not in`.
pub fn contains(container: &Value, item: &Value) -> Result<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_str())),
            other => Err(Error::eval(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.iter().any(|v| equals(v, item))),
        Value::Map(m) => Ok(item.as_str().is_some_and(|k| m.contains_key(k))),
        other => Err(Error::eval(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub fn add(l: &Value, r: &Value) -> Result<Value> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (Value::List(a), Value::List(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::List(out))
        }
        _ => numeric(l, r, "+", i64::checked_add, |a, b| a + b),
    }
}

pub fn sub(l: &Value, r: &Value) -> Result<Value> {
    numeric(l, r, "-", i64::checked_sub, |a, b| a - b)
}

pub fn mul(l: &Value, r: &Value) -> Result<Value> {
    match (l, r) {
        (Value::Str(s), n) | (n, Value::Str(s)) if to_i64(n).is_some() => {
            let times = repeat_count(s.len(), n)?;
            Ok(Value::Str(s.repeat(times)))
        }
        (Value::List(items), n) | (n, Value::List(items)) if to_i64(n).is_some() => {
            let times = repeat_count(items.len(), n)?;
            let mut out = Vec::with_capacity(items.len() * times);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            Ok(Value::List(out))
        }
        _ => numeric(l, r, "*", i64::checked_mul, |a, b| a * b),
    }
}

/// How many copies `seq * n` makes, refusing results longer than [`MAX_SEQUENCE_LEN`].
fn repeat_count(len: usize, n: &Value) -> Result<usize> {
    let times = usize::try_from(to_i64(n).unwrap_or(0).max(0)).map_err(|_| overflow())?;
    match len.checked_mul(times) {
        Some(total) if total <= MAX_SEQUENCE_LEN => Ok(times),
        _ => Err(Error::eval("repeated sequence is too long")),
    }
}

/// True division; always produces a float.
pub fn div(l: &Value, r: &Value) -> Result<Value> {
    let (a, b) = floats(l, r, "/")?;
    if b == 0.0 {
        return Err(Error::eval("division by zero"));
    }
    Ok(Value::Float(a / b))
}

pub fn floor_div(l: &Value, r: &Value) -> Result<Value> {
    if let (Some(a), Some(b)) = (to_i64(l), to_i64(r)) {
        if b == 0 {
            return Err(Error::eval("integer division or modulo by zero"));
        }
        let q = a.checked_div(b).ok_or_else(overflow)?;
        // Round toward negative infinity, matching `%` below.
        let q = if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q };
        return Ok(Value::Int(q));
    }
    let (a, b) = floats(l, r, "//")?;
    if b == 0.0 {
        return Err(Error::eval("float floor division by zero"));
    }
    Ok(Value::Float((a / b).floor()))
}

pub fn rem(l: &Value, r: &Value) -> Result<Value> {
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        if *b == 0 {
            return Err(Error::eval("integer division or modulo by zero"));
        }
        let m = a.checked_rem(*b).ok_or_else(overflow)?;
        // Result takes the sign of the divisor.
        let m = if m != 0 && ((m < 0) != (*b < 0)) { m + b } else { m };
        return Ok(Value::Int(m));
    }
    let (a, b) = floats(l, r, "%")?;
    if b == 0.0 {
        return Err(Error::eval("float modulo"));
    }
    let m = a % b;
    Ok(Value::Float(if m != 0.0 && ((m < 0.0) != (b < 0.0)) {
        m + b
    } else {
        m
    }))
}

pub fn pow(l: &Value, r: &Value) -> Result<Value> {
    if let (Value::Int(a), Value::Int(b)) = (l, r)
        && *b >= 0
    {
        let exp = u32::try_from(*b).map_err(|_| overflow())?;
        return a.checked_pow(exp).map(Value::Int).ok_or_else(overflow);
    }
    let (a, b) = floats(l, r, "**")?;
    Ok(Value::Float(a.powf(b)))
}

pub fn neg(v: &Value) -> Result<Value> {
    match v {
        Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
        Value::Float(n) => Ok(Value::Float(-n)),
        Value::Bool(b) => Ok(Value::Int(-(*b as i64))),
        other => Err(Error::eval(format!(
            "bad operand type for unary -: '{}'",
            other.type_name()
        ))),
    }
}

pub fn pos(v: &Value) -> Result<Value> {
    match v {
        Value::Int(_) | Value::Float(_) => Ok(v.clone()),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        other => Err(Error::eval(format!(
            "bad operand type for unary +: '{}'",
            other.type_name()
        ))),
    }
}

fn floats(l: &Value, r: &Value, op: &str) -> Result<(f64, f64)> {
    match (to_f64(l), to_f64(r)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(unsupported(op, l, r)),
    }
}

fn numeric(
    l: &Value,
    r: &Value,
    op: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (l, r) {
        (Value::Float(_), _) | (_, Value::Float(_)) => {
            let (a, b) = floats(l, r, op)?;
            Ok(Value::Float(float_op(a, b)))
        }
        _ => match (to_i64(l), to_i64(r)) {
            (Some(a), Some(b)) => int_op(a, b).map(Value::Int).ok_or_else(overflow),
            _ => Err(unsupported(op, l, r)),
        },
    }
}
