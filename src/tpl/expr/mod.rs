pub mod ast;
mod builtins;
pub mod eval;
mod parser;

use crate::Result;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

pub use eval::Lookup;

/// A pre-compiled expression. Evaluating it never re-parses the source text.
#[derive(Clone)]
pub struct Expression {
    source: Arc<str>,
    ast: Arc<ast::Expr>,
}

impl Expression {
    pub fn compile(source: &str) -> Result<Self> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: Arc::from(source),
            ast: Arc::new(ast),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &ast::Expr {
        &self.ast
    }

    pub fn eval(&self, env: &dyn Lookup) -> Result<Value> {
        eval::eval(&self.ast, env)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expression({:?})", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn test_compile_once_eval_many() {
        let expr = Expression::compile("n * 2").unwrap();
        assert_eq!(expr.source(), "n * 2");
        assert_eq!(expr.eval(&params! { "n" => 2 }).unwrap(), Value::Int(4));
        assert_eq!(expr.eval(&params! { "n" => 5 }).unwrap(), Value::Int(10));
    }

    #[test]
    fn test_compile_rejects_bad_syntax() {
        assert!(Expression::compile("1 +").is_err());
        assert!(Expression::compile("(a").is_err());
        assert!(Expression::compile("").is_err());
    }
}
