pub mod ops;
pub mod serializer;

use crate::Result;
use crate::error::Error;
use crate::loader::LoaderRef;
use crate::tpl::template::Template;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A name → value mapping, as seen by expression evaluation.
pub type Scope = HashMap<String, Value>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Ordered list of values (lists, tuples and sets alike)
    List(Vec<Value>),
    /// Key-value map (dict literals, structs)
    Map(HashMap<String, Value>),
    /// A host function callable from expressions
    Func(Function),
    /// An already-compiled template, usable by `include`/`extends`
    Template(Arc<Template>),
    /// Handle to the loader a template was compiled by
    Loader(LoaderRef),
}

type Callable = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A named host function. Cloning shares the underlying closure.
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    func: Arc<Callable>,
}

impl Function {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

impl Value {
    /// Converts any serde-serializable value, e.g. a `#[derive(Serialize)]` struct.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
        value.serialize(serializer::ValueSerializer)
    }

    pub fn function<F>(name: &str, func: F) -> Value
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Value::Func(Function::new(name, func))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
            Value::Func(_) => "function",
            Value::Template(_) => "template",
            Value::Loader(_) => "loader",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Func(_) | Value::Template(_) | Value::Loader(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Items produced by iterating over this value: list elements, string
    /// characters or map keys (sorted).
    pub fn iter_values(&self) -> Result<Vec<Value>> {
        match self {
            Value::List(l) => Ok(l.clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Map(m) => Ok(sorted_keys(m).into_iter().map(Value::Str).collect()),
            other => Err(Error::eval(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// The quoted form used when this value is nested inside a list or map.
    fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_string(),
        }
    }
}

pub(crate) fn sorted_keys(map: &HashMap<String, Value>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(m) => {
                let parts: Vec<String> = sorted_keys(m)
                    .into_iter()
                    .map(|k| format!("'{}': {}", k, m[&k].repr()))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Func(func) => write!(f, "<function {}>", func.name()),
            Value::Template(t) => write!(f, "<template {}>", t.name()),
            Value::Loader(_) => f.write_str("<loader>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "Str({:?})", s),
            other => write!(f, "{}({})", other.type_name(), other.repr()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        ops::equals(self, other)
    }
}

/// Anything that can be turned into a template `Value`.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

macro_rules! impl_to_value_primitive {
    ($rust_type:ty, $variant:ident, $conv:ty) => {
        impl ToValue for $rust_type {
            fn to_value(&self) -> Value {
                Value::$variant(*self as $conv)
            }
        }
    };
}

impl_to_value_primitive!(i8, Int, i64);
impl_to_value_primitive!(i16, Int, i64);
impl_to_value_primitive!(i32, Int, i64);
impl_to_value_primitive!(i64, Int, i64);
impl_to_value_primitive!(u8, Int, i64);
impl_to_value_primitive!(u16, Int, i64);
impl_to_value_primitive!(u32, Int, i64);
impl_to_value_primitive!(usize, Int, i64);
impl_to_value_primitive!(f32, Float, f64);
impl_to_value_primitive!(f64, Float, f64);

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl ToValue for char {
    fn to_value(&self) -> Value {
        Value::Str(self.to_string())
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::Str(self.to_string())
    }
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl ToValue for Function {
    fn to_value(&self) -> Value {
        Value::Func(self.clone())
    }
}

impl ToValue for Arc<Template> {
    fn to_value(&self) -> Value {
        Value::Template(self.clone())
    }
}

impl ToValue for () {
    fn to_value(&self) -> Value {
        Value::Null
    }
}

impl<T> ToValue for &T
where
    T: ToValue + ?Sized,
{
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(|v| v.to_value()).collect())
    }
}

impl<T: ToValue> ToValue for [T] {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(|v| v.to_value()).collect())
    }
}

impl<T: ToValue> ToValue for HashMap<String, T> {
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
        )
    }
}

/// Converts render parameters into a scope. `Null` (e.g. `()`) means no parameters.
pub(crate) fn into_scope(params: Value) -> Result<Scope> {
    match params {
        Value::Map(m) => Ok(m),
        Value::Null => Ok(Scope::new()),
        other => Err(Error::Value(format!(
            "template parameters must be a map, found '{}'",
            other.type_name()
        ))),
    }
}

/// Builds a parameter map for `Template::render`.
///
/// ```
/// let params = moody::params! { "name" => "Dave", "n" => 3 };
/// assert_eq!(params.len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::value::Scope::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut scope = $crate::value::Scope::new();
        $(
            scope.insert(
                ::std::string::ToString::to_string($key),
                $crate::value::ToValue::to_value(&$value),
            );
        )+
        scope
    }};
}
