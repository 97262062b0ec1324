use crate::Result;
use crate::error::Error;
use crate::tpl::expr::ast::{Expr, Op, UnaryOp};
use crate::tpl::expr::builtins;
use crate::value::{Scope, Value, ops};
use std::collections::HashMap;

/// Name resolution for expression evaluation.
pub trait Lookup {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl Lookup for Scope {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

pub fn eval(expr: &Expr, env: &dyn Lookup) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => match env.lookup(name) {
            Some(v) => Ok(v.clone()),
            None => builtins::function(name)
                .ok_or_else(|| Error::eval(format!("name '{}' is not defined", name))),
        },
        Expr::Attr(target, name) => {
            let target = eval(target, env)?;
            get_attr(&target, name)
        }
        Expr::Index(target, index) => {
            let target = eval(target, env)?;
            let index = eval(index, env)?;
            get_item(&target, &index)
        }
        Expr::Slice {
            target,
            start,
            stop,
            step,
        } => {
            let target = eval(target, env)?;
            let start = eval_opt(start.as_deref(), env)?;
            let stop = eval_opt(stop.as_deref(), env)?;
            let step = eval_opt(step.as_deref(), env)?;
            slice(&target, start, stop, step)
        }
        Expr::Call(callee, args) => {
            let args = args
                .iter()
                .map(|a| eval(a, env))
                .collect::<Result<Vec<_>>>()?;
            // `obj.method(...)` dispatches to builtin methods unless `obj` is a map
            // holding a callable under that key.
            if let Expr::Attr(target, name) = callee.as_ref() {
                let target = eval(target, env)?;
                if let Value::Map(m) = &target
                    && let Some(member) = m.get(name)
                {
                    return call(member, &args);
                }
                return builtins::call_method(&target, name, &args);
            }
            let callee = eval(callee, env)?;
            call(&callee, &args)
        }
        Expr::Unary(op, operand) => {
            let v = eval(operand, env)?;
            match op {
                UnaryOp::Neg => ops::neg(&v),
                UnaryOp::Pos => ops::pos(&v),
                UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, env)?;
            let r = eval(rhs, env)?;
            binary(*op, &l, &r)
        }
        Expr::Compare(first, rest) => {
            let mut left = eval(first, env)?;
            for (op, rhs) in rest {
                let right = eval(rhs, env)?;
                if !binary(*op, &left, &right)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::And(lhs, rhs) => {
            let l = eval(lhs, env)?;
            if !l.is_truthy() {
                return Ok(l);
            }
            eval(rhs, env)
        }
        Expr::Or(lhs, rhs) => {
            let l = eval(lhs, env)?;
            if l.is_truthy() {
                return Ok(l);
            }
            eval(rhs, env)
        }
        Expr::Cond { test, body, orelse } => {
            if eval(test, env)?.is_truthy() {
                eval(body, env)
            } else {
                eval(orelse, env)
            }
        }
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|e| eval(e, env))
                .collect::<Result<Vec<_>>>()?,
        )),
        Expr::Set(items) => {
            let mut out: Vec<Value> = Vec::with_capacity(items.len());
            for item in items {
                let v = eval(item, env)?;
                if !out.iter().any(|existing| ops::equals(existing, &v)) {
                    out.push(v);
                }
            }
            Ok(Value::List(out))
        }
        Expr::Dict(pairs) => {
            let mut map = HashMap::with_capacity(pairs.len());
            for (k, v) in pairs {
                let key = match eval(k, env)? {
                    Value::Str(s) => s,
                    other => {
                        return Err(Error::eval(format!(
                            "dict keys must be strings, not '{}'",
                            other.type_name()
                        )));
                    }
                };
                map.insert(key, eval(v, env)?);
            }
            Ok(Value::Map(map))
        }
    }
}

fn eval_opt(expr: Option<&Expr>, env: &dyn Lookup) -> Result<Option<Value>> {
    expr.map(|e| eval(e, env)).transpose()
}

pub fn call(callee: &Value, args: &[Value]) -> Result<Value> {
    match callee {
        Value::Func(f) => f.call(args),
        other => Err(Error::eval(format!(
            "'{}' object is not callable",
            other.type_name()
        ))),
    }
}

fn binary(op: Op, l: &Value, r: &Value) -> Result<Value> {
    use std::cmp::Ordering::*;
    Ok(match op {
        Op::Add => return ops::add(l, r),
        Op::Sub => return ops::sub(l, r),
        Op::Mul => return ops::mul(l, r),
        Op::Div => return ops::div(l, r),
        Op::FloorDiv => return ops::floor_div(l, r),
        Op::Mod => return ops::rem(l, r),
        Op::Pow => return ops::pow(l, r),
        Op::Eq => Value::Bool(ops::equals(l, r)),
        Op::Ne => Value::Bool(!ops::equals(l, r)),
        Op::Lt => Value::Bool(ops::compare(l, r)? == Less),
        Op::Le => Value::Bool(ops::compare(l, r)? != Greater),
        Op::Gt => Value::Bool(ops::compare(l, r)? == Greater),
        Op::Ge => Value::Bool(ops::compare(l, r)? != Less),
        Op::In => Value::Bool(ops::contains(r, l)?),
        Op::NotIn => Value::Bool(!ops::contains(r, l)?),
        Op::Is => Value::Bool(identical(l, r)),
        Op::IsNot => Value::Bool(!identical(l, r)),
    })
}

/// `is`: singletons compare by value, everything else by equality of the same type.
fn identical(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => l.type_name() == r.type_name() && ops::equals(l, r),
    }
}

pub fn get_attr(target: &Value, name: &str) -> Result<Value> {
    if let Value::Map(m) = target
        && let Some(v) = m.get(name)
    {
        return Ok(v.clone());
    }
    Err(Error::eval(format!(
        "'{}' object has no attribute '{}'",
        target.type_name(),
        name
    )))
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { index + len } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

pub fn get_item(target: &Value, index: &Value) -> Result<Value> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => normalize_index(*i, items.len())
            .map(|i| items[i].clone())
            .ok_or_else(|| Error::eval("list index out of range")),
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            normalize_index(*i, chars.len())
                .map(|i| Value::Str(chars[i].to_string()))
                .ok_or_else(|| Error::eval("string index out of range"))
        }
        (Value::Map(m), Value::Str(k)) => m
            .get(k)
            .cloned()
            .ok_or_else(|| Error::eval(format!("KeyError: '{}'", k))),
        (Value::List(_) | Value::Str(_), other) => Err(Error::eval(format!(
            "indices must be integers, not '{}'",
            other.type_name()
        ))),
        (other, _) => Err(Error::eval(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn slice_bound(v: Option<Value>, name: &str) -> Result<Option<i64>> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Int(n)) => Ok(Some(n)),
        Some(other) => Err(Error::eval(format!(
            "slice {} must be an integer or None, not '{}'",
            name,
            other.type_name()
        ))),
    }
}

/// Indices selected by `[start:stop:step]` over a sequence of `len` items.
fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
    let resolve = |v: i64| if v < 0 { v + len } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let mut i = start.map_or(0, |s| clamp(resolve(s), 0, len));
        let end = stop.map_or(len, |s| clamp(resolve(s), 0, len));
        while i < end {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let mut i = start.map_or(len - 1, |s| clamp(resolve(s), -1, len - 1));
        let end = stop.map_or(-1, |s| clamp(resolve(s), -1, len - 1));
        while i > end {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    out
}

pub fn slice(
    target: &Value,
    start: Option<Value>,
    stop: Option<Value>,
    step: Option<Value>,
) -> Result<Value> {
    let start = slice_bound(start, "start")?;
    let stop = slice_bound(stop, "stop")?;
    let step = slice_bound(step, "step")?.unwrap_or(1);
    if step == 0 {
        return Err(Error::eval("slice step cannot be zero"));
    }
    match target {
        Value::List(items) => Ok(Value::List(
            slice_indices(items.len(), start, stop, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect(),
        )),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(
                slice_indices(chars.len(), start, stop, step)
                    .into_iter()
                    .map(|i| chars[i])
                    .collect(),
            ))
        }
        other => Err(Error::eval(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}
