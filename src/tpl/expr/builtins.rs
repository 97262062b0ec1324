//! Global functions and per-type methods available to every expression.

use crate::Result;
use crate::error::Error;
use crate::value::ops::{self, MAX_SEQUENCE_LEN};
use crate::value::{Function, Value, sorted_keys};
use std::cmp::Ordering;

const NAMES: [&str; 13] = [
    "range",
    "len",
    "str",
    "int",
    "float",
    "bool",
    "list",
    "abs",
    "min",
    "max",
    "sum",
    "sorted",
    "enumerate",
];

/// The builtin function named `name`, if there is one.
pub fn function(name: &str) -> Option<Value> {
    let name = *NAMES.iter().find(|n| **n == name)?;
    Some(Value::Func(Function::new(name, move |args| {
        call_builtin(name, args)
    })))
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(Error::eval(format!(
            "{}() takes {} argument(s) ({} given)",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn int_arg(name: &str, v: &Value) -> Result<i64> {
    match v {
        Value::Int(n) => Ok(*n),
        Value::Bool(b) => Ok(*b as i64),
        other => Err(Error::eval(format!(
            "{}() expected an integer, got '{}'",
            name,
            other.type_name()
        ))),
    }
}

fn str_arg<'a>(name: &str, v: &'a Value) -> Result<&'a str> {
    v.as_str().ok_or_else(|| {
        Error::eval(format!(
            "{}() expected a string, got '{}'",
            name,
            v.type_name()
        ))
    })
}

/// Iterable arguments; a single argument to `min`/`max` is iterated over.
fn extremum(name: &str, args: &[Value], want: Ordering) -> Result<Value> {
    let items = if args.len() == 1 {
        args[0].iter_values()?
    } else {
        args.to_vec()
    };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| Error::eval(format!("{}() arg is an empty sequence", name)))?;
    for item in iter {
        if ops::compare(&item, &best)? == want {
            best = item;
        }
    }
    Ok(best)
}

fn sort_values(items: &mut [Value]) -> Result<()> {
    let mut failure = None;
    items.sort_by(|a, b| {
        ops::compare(a, b).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn call_builtin(name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "range" => {
            arity(name, args, 1, 3)?;
            let (start, stop) = match args {
                [stop] => (0, int_arg(name, stop)?),
                [start, stop, ..] => (int_arg(name, start)?, int_arg(name, stop)?),
                [] => unreachable!("arity checked"),
            };
            let step = match args.get(2) {
                Some(v) => int_arg(name, v)?,
                None => 1,
            };
            if step == 0 {
                return Err(Error::eval("range() arg 3 must not be zero"));
            }
            let (start, stop, step) = (start as i128, stop as i128, step as i128);
            let len = if step > 0 && start < stop {
                (stop - start - 1) / step + 1
            } else if step < 0 && start > stop {
                (start - stop - 1) / -step + 1
            } else {
                0
            };
            if len > MAX_SEQUENCE_LEN as i128 {
                return Err(Error::eval("range() result is too long"));
            }
            // Every element lies between start and stop, so it fits in an i64.
            Ok(Value::List(
                (0..len).map(|k| Value::Int((start + k * step) as i64)).collect(),
            ))
        }
        "len" => {
            arity(name, args, 1, 1)?;
            let n = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(l) => l.len(),
                Value::Map(m) => m.len(),
                other => {
                    return Err(Error::eval(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(n as i64))
        }
        "str" => {
            arity(name, args, 0, 1)?;
            Ok(Value::Str(args.first().map(|v| v.to_string()).unwrap_or_default()))
        }
        "int" => {
            arity(name, args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Int(n)) => Ok(Value::Int(*n)),
                Some(Value::Bool(b)) => Ok(Value::Int(*b as i64)),
                Some(Value::Float(f)) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
                Some(Value::Str(s)) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    Error::eval(format!("invalid literal for int() with base 10: '{}'", s))
                }),
                Some(other) => Err(Error::eval(format!(
                    "int() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
            }
        }
        "float" => {
            arity(name, args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Int(n)) => Ok(Value::Float(*n as f64)),
                Some(Value::Float(f)) => Ok(Value::Float(*f)),
                Some(Value::Bool(b)) => Ok(Value::Float(*b as i64 as f64)),
                Some(Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                    Error::eval(format!("could not convert string to float: '{}'", s))
                }),
                Some(other) => Err(Error::eval(format!(
                    "float() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
            }
        }
        "bool" => {
            arity(name, args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
        }
        "list" => {
            arity(name, args, 0, 1)?;
            match args.first() {
                None => Ok(Value::List(Vec::new())),
                Some(v) => Ok(Value::List(v.iter_values()?)),
            }
        }
        "abs" => {
            arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Int(n) => n
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(ops::overflow),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(Error::eval(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }
        }
        "min" => {
            arity(name, args, 1, usize::MAX)?;
            extremum(name, args, Ordering::Less)
        }
        "max" => {
            arity(name, args, 1, usize::MAX)?;
            extremum(name, args, Ordering::Greater)
        }
        "sum" => {
            arity(name, args, 1, 2)?;
            let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
            for item in args[0].iter_values()? {
                total = ops::add(&total, &item)?;
            }
            Ok(total)
        }
        "sorted" => {
            arity(name, args, 1, 1)?;
            let mut items = args[0].iter_values()?;
            sort_values(&mut items)?;
            Ok(Value::List(items))
        }
        "enumerate" => {
            arity(name, args, 1, 2)?;
            let start = match args.get(1) {
                Some(v) => int_arg(name, v)?,
                None => 0,
            };
            let items = args[0].iter_values()?;
            let mut out = Vec::with_capacity(items.len());
            let mut index = Some(start);
            for v in items {
                let i = index.ok_or_else(ops::overflow)?;
                out.push(Value::List(vec![Value::Int(i), v]));
                index = i.checked_add(1);
            }
            Ok(Value::List(out))
        }
        other => Err(Error::eval(format!("name '{}' is not defined", other))),
    }
}

/// `target.name(args)` for builtin value types.
pub fn call_method(target: &Value, name: &str, args: &[Value]) -> Result<Value> {
    match target {
        Value::Str(s) => str_method(s, name, args),
        Value::List(items) => list_method(items, name, args),
        Value::Map(m) => map_method(target, m, name, args),
        other => Err(no_attribute(other, name)),
    }
}

fn no_attribute(target: &Value, name: &str) -> Error {
    Error::eval(format!(
        "'{}' object has no attribute '{}'",
        target.type_name(),
        name
    ))
}

fn str_method(s: &str, name: &str, args: &[Value]) -> Result<Value> {
    let text = |v: String| -> Result<Value> { Ok(Value::Str(v)) };
    if matches!(
        name,
        "upper" | "lower" | "strip" | "lstrip" | "rstrip" | "title" | "capitalize"
    ) {
        arity(name, args, 0, 0)?;
    }
    match name {
        "upper" => text(s.to_uppercase()),
        "lower" => text(s.to_lowercase()),
        "strip" => text(s.trim().to_string()),
        "lstrip" => text(s.trim_start().to_string()),
        "rstrip" => text(s.trim_end().to_string()),
        "title" => text(
            s.split(' ')
                .map(capitalize)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        "capitalize" => text(capitalize(s)),
        "startswith" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Bool(s.starts_with(str_arg(name, &args[0])?)))
        }
        "endswith" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Bool(s.ends_with(str_arg(name, &args[0])?)))
        }
        "replace" => {
            arity(name, args, 2, 2)?;
            text(s.replace(str_arg(name, &args[0])?, str_arg(name, &args[1])?))
        }
        "split" => {
            arity(name, args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Null) => s
                    .split_whitespace()
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
                Some(sep) => s
                    .split(str_arg(name, sep)?)
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
            };
            Ok(Value::List(parts))
        }
        "join" => {
            arity(name, args, 1, 1)?;
            let parts = args[0]
                .iter_values()?
                .iter()
                .map(|v| str_arg(name, v).map(str::to_string))
                .collect::<Result<Vec<_>>>()?;
            text(parts.join(s))
        }
        _ => Err(no_attribute(&Value::Str(s.to_string()), name)),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn list_method(items: &[Value], name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "index" => {
            arity(name, args, 1, 1)?;
            items
                .iter()
                .position(|v| ops::equals(v, &args[0]))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| Error::eval(format!("{} is not in list", args[0])))
        }
        "count" => {
            arity(name, args, 1, 1)?;
            let n = items.iter().filter(|v| ops::equals(v, &args[0])).count();
            Ok(Value::Int(n as i64))
        }
        _ => Err(no_attribute(&Value::List(Vec::new()), name)),
    }
}

fn map_method(
    target: &Value,
    m: &std::collections::HashMap<String, Value>,
    name: &str,
    args: &[Value],
) -> Result<Value> {
    if matches!(name, "keys" | "values" | "items") {
        arity(name, args, 0, 0)?;
    }
    match name {
        "get" => {
            arity(name, args, 1, 2)?;
            let key = str_arg(name, &args[0])?;
            Ok(m
                .get(key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::Null)))
        }
        "keys" => Ok(Value::List(
            sorted_keys(m).into_iter().map(Value::Str).collect(),
        )),
        "values" => Ok(Value::List(
            sorted_keys(m).iter().map(|k| m[k].clone()).collect(),
        )),
        "items" => Ok(Value::List(
            sorted_keys(m)
                .into_iter()
                .map(|k| {
                    let v = m[&k].clone();
                    Value::List(vec![Value::Str(k), v])
                })
                .collect(),
        )),
        _ => Err(no_attribute(target, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Result<Value> {
        crate::tpl::expr::eval::call(&function(name).unwrap(), args)
    }

    fn s(v: &str) -> Value {
        Value::Str(v.to_string())
    }

    #[test]
    fn test_range() {
        assert_eq!(call("range", &[Value::Int(3)]).unwrap().to_string(), "[0, 1, 2]");
        assert_eq!(
            call("range", &[Value::Int(0), Value::Int(3)]).unwrap().to_string(),
            "[0, 1, 2]"
        );
        assert_eq!(
            call("range", &[Value::Int(5), Value::Int(0), Value::Int(-2)])
                .unwrap()
                .to_string(),
            "[5, 3, 1]"
        );
        assert!(call("range", &[]).is_err());
        assert!(call("range", &[s("x")]).is_err());
    }

    #[test]
    fn test_range_near_integer_limits() {
        let out = call(
            "range",
            &[Value::Int(i64::MAX - 1), Value::Int(i64::MAX), Value::Int(2)],
        )
        .unwrap();
        assert_eq!(out, Value::List(vec![Value::Int(i64::MAX - 1)]));

        let out = call(
            "range",
            &[Value::Int(i64::MIN + 1), Value::Int(i64::MIN), Value::Int(-2)],
        )
        .unwrap();
        assert_eq!(out, Value::List(vec![Value::Int(i64::MIN + 1)]));

        let err = call("range", &[Value::Int(i64::MAX)]).unwrap_err();
        assert_eq!(err.to_string(), "range() result is too long");
    }

    #[test]
    fn test_enumerate() {
        let items = Value::List(vec![s("a"), s("b")]);
        assert_eq!(
            call("enumerate", &[items.clone(), Value::Int(1)]).unwrap().to_string(),
            "[[1, 'a'], [2, 'b']]"
        );
        assert_eq!(
            call("enumerate", &[Value::List(vec![s("a")]), Value::Int(i64::MAX)])
                .unwrap()
                .to_string(),
            format!("[[{}, 'a']]", i64::MAX)
        );
        let err = call("enumerate", &[items, Value::Int(i64::MAX)]).unwrap_err();
        assert_eq!(err.to_string(), "integer overflow");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("len", &[s("héllo")]).unwrap(), Value::Int(5));
        assert_eq!(call("str", &[Value::Int(3)]).unwrap(), s("3"));
        assert_eq!(call("int", &[s(" 42 ")]).unwrap(), Value::Int(42));
        assert!(call("int", &[s("x")]).is_err());
        assert_eq!(call("float", &[Value::Int(2)]).unwrap(), Value::Float(2.0));
        assert_eq!(call("bool", &[s("")]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_aggregates() {
        let items = Value::List(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert_eq!(call("min", &[items.clone()]).unwrap(), Value::Int(1));
        assert_eq!(call("max", &[Value::Int(1), Value::Int(9)]).unwrap(), Value::Int(9));
        assert_eq!(call("sum", &[items.clone()]).unwrap(), Value::Int(6));
        assert_eq!(call("sorted", &[items.clone()]).unwrap().to_string(), "[1, 2, 3]");
        assert_eq!(
            call("enumerate", &[Value::List(vec![s("a")])]).unwrap().to_string(),
            "[[0, 'a']]"
        );
        assert!(call("min", &[Value::List(vec![])]).is_err());
        assert!(call("sorted", &[Value::List(vec![s("a"), Value::Int(1)])]).is_err());
    }

    #[test]
    fn test_methods() {
        assert_eq!(call_method(&s("foobar"), "startswith", &[s("foo")]).unwrap(), Value::Bool(true));
        assert_eq!(call_method(&s("ab"), "upper", &[]).unwrap(), s("AB"));
        assert_eq!(call_method(&s("hello world"), "title", &[]).unwrap(), s("Hello World"));
        assert_eq!(
            call_method(&s(", "), "join", &[Value::List(vec![s("a"), s("b")])]).unwrap(),
            s("a, b")
        );
        assert_eq!(call_method(&s("a b"), "split", &[]).unwrap().to_string(), "['a', 'b']");
        let m = Value::Map(crate::params! { "a" => 1 });
        assert_eq!(call_method(&m, "get", &[s("b"), Value::Int(7)]).unwrap(), Value::Int(7));
        assert_eq!(call_method(&m, "items", &[]).unwrap().to_string(), "[['a', 1]]");
        assert!(call_method(&Value::Int(1), "upper", &[]).is_err());
        assert!(call_method(&s("x"), "nope", &[]).is_err());
    }

    #[test]
    fn test_methods_without_parameters_reject_arguments() {
        for name in ["upper", "lower", "strip", "lstrip", "rstrip", "title", "capitalize"] {
            let err = call_method(&s("a"), name, &[Value::Int(1)]).unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("{}() takes 0 argument(s) (1 given)", name)
            );
        }
        let m = Value::Map(crate::params! { "a" => 1 });
        for name in ["keys", "values", "items"] {
            assert!(call_method(&m, name, &[Value::Int(1)]).is_err());
            assert!(call_method(&m, name, &[]).is_ok());
        }
    }
}
