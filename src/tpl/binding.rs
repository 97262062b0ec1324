use crate::Result;
use crate::error::Error;
use crate::value::{Scope, Value};
use regex::Regex;
use std::sync::LazyLock;

static RE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid name regex"));

/// The left-hand side of `for`, `set` and `with`: one name, or two or more names
/// to destructure an iterable into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingTarget {
    Name(String),
    Unpack(Vec<String>),
}

impl BindingTarget {
    /// Parses and validates a binding target. A single trailing comma is allowed
    /// (`a, b,`), but destructuring always needs at least two names.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let target = if text.contains(',') {
            let mut names: Vec<String> = text.split(',').map(|n| n.trim().to_string()).collect();
            if names.last().is_some_and(|n| n.is_empty()) {
                names.pop();
            }
            if names.len() < 2 {
                return Err(Error::syntax(format!(
                    "{:?} must name at least two variables to unpack into.",
                    text
                )));
            }
            BindingTarget::Unpack(names)
        } else {
            BindingTarget::Name(text.to_string())
        };
        for name in target.names() {
            if !RE_NAME.is_match(name) {
                return Err(Error::syntax(format!(
                    "{:?} is not a valid variable name. Only letters, numbers and underscores are allowed.",
                    name
                )));
            }
        }
        Ok(target)
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            BindingTarget::Name(name) => vec![name.as_str()],
            BindingTarget::Unpack(names) => names.iter().map(String::as_str).collect(),
        }
    }

    /// Binds `value` into `scope`. Destructuring requires the value to yield exactly
    /// as many items as there are names.
    pub fn apply(&self, scope: &mut Scope, value: Value) -> Result<()> {
        match self {
            BindingTarget::Name(name) => {
                scope.insert(name.clone(), value);
            }
            BindingTarget::Unpack(names) => {
                let items = value.iter_values()?;
                if items.len() < names.len() {
                    return Err(Error::Unpack(format!(
                        "not enough values to unpack (expected {}, got {})",
                        names.len(),
                        items.len()
                    )));
                }
                if items.len() > names.len() {
                    return Err(Error::Unpack(format!(
                        "too many values to unpack (expected {})",
                        names.len()
                    )));
                }
                for (name, item) in names.iter().zip(items) {
                    scope.insert(name.clone(), item);
                }
            }
        }
        Ok(())
    }
}
