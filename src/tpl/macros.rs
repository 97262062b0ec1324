use crate::Result;
use crate::error::Error;
use crate::tpl::ast::AstNode;
use crate::tpl::binding::BindingTarget;
use crate::tpl::expr::Expression;
use crate::tpl::parser::ParserRun;
use regex::{Captures, Regex};
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Builds a node from a matched tag. May consume a nested body through the run.
pub type MacroFn = dyn Fn(&mut ParserRun<'_>, &Captures<'_>) -> Result<AstNode> + Send + Sync;

/// A grammar extension: a pattern over the text of a `{% %}` tag and the builder
/// invoked when it matches.
///
/// A parser tries its macros in registration order and the first match wins, so a
/// macro whose pattern overlaps another must be registered before it.
#[derive(Clone)]
pub struct Macro {
    name: String,
    pattern: Regex,
    build: Arc<MacroFn>,
}

impl Macro {
    /// `pattern` must match the whole tag text; it is anchored at both ends.
    pub fn new<F>(name: &str, pattern: &str, build: F) -> Result<Self>
    where
        F: Fn(&mut ParserRun<'_>, &Captures<'_>) -> Result<AstNode> + Send + Sync + 'static,
    {
        Ok(Self {
            name: name.to_string(),
            pattern: Regex::new(&format!(r"^(?:{})$", pattern))?,
            build: Arc::new(build),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn captures<'t>(&self, tag: &'t str) -> Option<Captures<'t>> {
        self.pattern.captures(tag)
    }

    pub(crate) fn build(&self, run: &mut ParserRun<'_>, caps: &Captures<'_>) -> Result<AstNode> {
        (self.build)(run, caps)
    }
}

impl fmt::Debug for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Macro")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

/// Capture group `i`, or `""` when it did not participate.
pub fn group<'t>(caps: &Captures<'t>, i: usize) -> &'t str {
    caps.get(i).map_or("", |m| m.as_str())
}

static RE_IF_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(elif)\s+(.+?)$|^(else)$|^(endif)$").expect("valid if clause regex")
});
static RE_ENDFOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^endfor$").expect("valid endfor regex"));
static RE_ENDWITH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^endwith$").expect("valid endwith regex"));

fn builtin<F>(name: &str, pattern: &str, build: F) -> Macro
where
    F: Fn(&mut ParserRun<'_>, &Captures<'_>) -> Result<AstNode> + Send + Sync + 'static,
{
    Macro::new(name, pattern, build).expect("valid builtin macro pattern")
}

fn set_macro(_: &mut ParserRun<'_>, caps: &Captures<'_>) -> Result<AstNode> {
    Ok(AstNode::Set {
        expr: Expression::compile(group(caps, 1))?,
        target: BindingTarget::parse(group(caps, 2))?,
    })
}

fn print_macro(_: &mut ParserRun<'_>, caps: &Captures<'_>) -> Result<AstNode> {
    Ok(AstNode::Print(Expression::compile(group(caps, 1))?))
}

fn if_macro(run: &mut ParserRun<'_>, caps: &Captures<'_>) -> Result<AstNode> {
    let mut test = Expression::compile(group(caps, 1))?;
    let mut clauses = Vec::new();
    let mut else_body = None;
    let mut in_else = false;
    loop {
        let (end, body) = run.parse_block("if", "endif", &RE_IF_CLAUSE)?;
        if in_else {
            else_body = Some(body);
        } else {
            clauses.push((test.clone(), body));
        }
        if end.group(1).is_some() {
            if in_else {
                return Err(Error::syntax("{% elif %} tag cannot come after {% else %}.")
                    .at_compile(run.name(), end.line));
            }
            test = Expression::compile(end.group(2).unwrap_or_default())
                .map_err(|e| e.at_compile(run.name(), end.line))?;
        } else if end.group(3).is_some() {
            if in_else {
                return Err(
                    Error::syntax("Only one {% else %} tag is allowed per {% if %} macro.")
                        .at_compile(run.name(), end.line),
                );
            }
            in_else = true;
        } else {
            break;
        }
    }
    Ok(AstNode::If { clauses, else_body })
}

fn for_macro(run: &mut ParserRun<'_>, caps: &Captures<'_>) -> Result<AstNode> {
    let target = BindingTarget::parse(group(caps, 1))?;
    let expr = Expression::compile(group(caps, 2))?;
    let (_, body) = run.parse_block("for", "endfor", &RE_ENDFOR)?;
    Ok(AstNode::For { target, expr, body })
}

fn with_macro(run: &mut ParserRun<'_>, caps: &Captures<'_>) -> Result<AstNode> {
    let expr = Expression::compile(group(caps, 1))?;
    let target = BindingTarget::parse(group(caps, 2))?;
    let (_, body) = run.parse_block("with", "endwith", &RE_ENDWITH)?;
    Ok(AstNode::With { expr, target, body })
}

fn include_macro(_: &mut ParserRun<'_>, caps: &Captures<'_>) -> Result<AstNode> {
    Ok(AstNode::Include(Expression::compile(group(caps, 1))?))
}

fn block_macro(run: &mut ParserRun<'_>, caps: &Captures<'_>) -> Result<AstNode> {
    let name = group(caps, 1).to_string();
    let end = Regex::new(&format!(r"^endblock(?:\s+{})?$", regex::escape(&name)))?;
    let (_, body) = run.parse_block("block", "endblock", &end)?;
    run.register_block(&name, body.clone())?;
    Ok(AstNode::Block { name, body })
}

fn super_macro(_: &mut ParserRun<'_>, _: &Captures<'_>) -> Result<AstNode> {
    Ok(AstNode::Super)
}

fn extends_macro(run: &mut ParserRun<'_>, caps: &Captures<'_>) -> Result<AstNode> {
    if !run.at_template_start() {
        return Err(Error::syntax(
            "{% extends %} must be the first tag in a template.",
        ));
    }
    let parent = Expression::compile(group(caps, 1))?;
    // The rest of the template only contributes its block declarations.
    run.parse_all()?;
    Ok(AstNode::Extends {
        parent,
        blocks: Arc::new(run.blocks().clone()),
    })
}

/// The built-in tags, in the order they are tried.
pub fn default_macros() -> Vec<Macro> {
    vec![
        builtin("set", r"set\s+(.+?)\s+as\s+(.+?)", set_macro),
        builtin("print", r"print\s+(.+?)", print_macro),
        builtin("if", r"if\s+(.+?)", if_macro),
        builtin("for", r"for\s+(.+?)\s+in\s+(.+?)", for_macro),
        builtin("with", r"with\s+(.+?)\s+as\s+(.+?)", with_macro),
        builtin("include", r"include\s+(.+?)", include_macro),
        builtin("block", r"block\s+([a-zA-Z_][a-zA-Z_\-0-9]*)", block_macro),
        builtin("super", r"super", super_macro),
        builtin("extends", r"extends\s+(.+?)", extends_macro),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let names: Vec<String> = default_macros()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(
            names,
            ["set", "print", "if", "for", "with", "include", "block", "super", "extends"]
        );
    }

    #[test]
    fn test_patterns_are_anchored() {
        let macros = default_macros();
        let super_macro = macros.iter().find(|m| m.name() == "super").unwrap();
        assert!(super_macro.captures("super").is_some());
        assert!(super_macro.captures("superb").is_none());
        assert!(super_macro.captures("no super").is_none());

        let block = macros.iter().find(|m| m.name() == "block").unwrap();
        let caps = block.captures("block side-bar").unwrap();
        assert_eq!(group(&caps, 1), "side-bar");
        assert!(block.captures("block 1st").is_none());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Macro::new("bad", "(", |_, _| Ok(AstNode::Super)).unwrap_err();
        assert!(matches!(err, Error::Pattern(_)));
    }
}
