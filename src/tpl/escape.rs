use crate::Result;
use crate::error::Error;
use crate::value::{Function, Value};
use quick_xml::escape::escape;
use std::collections::HashMap;

/// Replaces `&`, `<`, `>`, `"` and `'` with their entities.
pub fn escape_html(value: &str) -> String {
    escape(value).into_owned()
}

/// `escape_html` as an autoescape function.
pub fn html_escaper() -> Function {
    Function::new("escape_html", |args: &[Value]| -> Result<Value> {
        match args {
            [v] => Ok(Value::Str(escape_html(&v.to_string()))),
            _ => Err(Error::eval(format!(
                "escape_html() takes 1 argument(s) ({} given)",
                args.len()
            ))),
        }
    })
}

/// Extension → escaping rules applied by a default parser.
pub(crate) fn default_autoescape() -> HashMap<String, Function> {
    let escaper = html_escaper();
    [".xml", ".xhtml", ".html", ".htm"]
        .into_iter()
        .map(|ext| (ext.to_string(), escaper.clone()))
        .collect()
}

/// The extension of a template name, including the dot: `"page.html"` → `".html"`.
pub(crate) fn extension(name: &str) -> Option<&str> {
    let file = name.rsplit('/').next().unwrap_or(name);
    match file.rfind('.') {
        Some(0) | None => None,
        Some(i) => Some(&file[i..]),
    }
}
