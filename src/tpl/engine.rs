use crate::Result;
use crate::tpl::parser::{DEFAULT_NAME, DEFAULT_PARSER};
use crate::tpl::template::Template;
use crate::value::ToValue;

/// Compiles `source` with the default parser.
///
/// The template is named `__string__`, so it is never autoescaped, and it has no
/// loader: `include`/`extends` only accept already-compiled templates.
pub fn compile(source: &str) -> Result<Template> {
    DEFAULT_PARSER.compile(source, DEFAULT_NAME)
}

/// Compiles and renders `source` in one step.
pub fn render<T: ToValue + ?Sized>(source: &str, params: &T) -> Result<String> {
    compile(source)?.render(params)
}
