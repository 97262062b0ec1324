use crate::Result;
use crate::error::Error;
use crate::tpl::ast::{AstNode, Fragment};
use crate::tpl::render_context::Context;
use crate::tpl::template::Template;
use crate::value::Value;
use std::sync::Arc;

/// The output of one top-level render. Nested templates and bodies all append here.
#[derive(Default)]
pub struct RenderBuffer {
    pub text: String,
}

impl RenderBuffer {
    pub fn push_str(&mut self, s: &str) {
        self.text.push_str(s);
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Renders every node of `fragment`. A failing node is attributed to the
/// fragment's template and the node's line, unless it already is.
pub(crate) fn render(fragment: &Fragment, ctx: &mut Context, buf: &mut RenderBuffer) -> Result<()> {
    for (line, node) in fragment.nodes() {
        render_node(node, ctx, buf).map_err(|e| e.at_render(fragment.name(), *line))?;
    }
    Ok(())
}

fn render_node(node: &AstNode, ctx: &mut Context, buf: &mut RenderBuffer) -> Result<()> {
    match node {
        AstNode::Text(text) => buf.push_str(text),
        AstNode::Expr(expr) => {
            let value = expr.eval(ctx)?.to_string();
            match ctx.autoescape() {
                Some(escape) => {
                    let escaped = escape.call(&[Value::Str(value)])?;
                    buf.push_str(&escaped.to_string());
                }
                None => buf.push_str(&value),
            }
        }
        AstNode::Print(expr) => buf.push_str(&expr.eval(ctx)?.to_string()),
        AstNode::Set { expr, target } => {
            let value = expr.eval(ctx)?;
            target.apply(ctx.scope_mut(), value)?;
        }
        AstNode::If { clauses, else_body } => {
            for (test, body) in clauses {
                if test.eval(ctx)?.is_truthy() {
                    return render(body, ctx, buf);
                }
            }
            if let Some(body) = else_body {
                render(body, ctx, buf)?;
            }
        }
        AstNode::For { target, expr, body } => {
            for item in expr.eval(ctx)?.iter_values()? {
                let mut sub = ctx.sub_context();
                target.apply(sub.scope_mut(), item)?;
                render(body, &mut sub, buf)?;
            }
        }
        AstNode::With { expr, target, body } => {
            let value = expr.eval(ctx)?;
            let mut sub = ctx.sub_context();
            target.apply(sub.scope_mut(), value)?;
            render(body, &mut sub, buf)?;
        }
        AstNode::Include(expr) => {
            let template = resolve_template(ctx, expr.eval(ctx)?)?;
            let mut sub = template.sub_context(ctx)?;
            render(template.fragment(), &mut sub, buf)?;
        }
        AstNode::Block { name, body } => render_block(name, body, ctx, buf)?,
        AstNode::Extends { parent, blocks } => {
            let template = resolve_template(ctx, parent.eval(ctx)?)?;
            let mut child = ctx.clone();
            child.meta.blocks = Some(blocks.clone());
            let child = Arc::new(child);
            let mut sub = template.sub_context(&child)?;
            sub.meta.child = Some(child);
            render(template.fragment(), &mut sub, buf)?;
        }
        AstNode::Super => {
            let mut stack = ctx.meta.parent_blocks.clone();
            if let Some((block_ctx, block)) = stack.pop() {
                let mut sub = block_ctx.sub_context();
                sub.meta.parent_blocks = stack;
                render(&block, &mut sub, buf)?;
            }
        }
    }
    Ok(())
}

/// Renders the most-derived override of block `name` found along the chain of
/// extending templates, leaving the less-derived bodies for `super`.
fn render_block(name: &str, body: &Fragment, ctx: &Context, buf: &mut RenderBuffer) -> Result<()> {
    let mut overrides = Vec::new();
    let mut cursor = ctx.meta.child.clone();
    while let Some(child) = cursor {
        if let Some(block) = child.meta.blocks.as_ref().and_then(|b| b.get(name)) {
            overrides.push((child.clone(), block.clone()));
        }
        cursor = child.meta.child.clone();
    }

    let Some((block_ctx, block)) = overrides.pop() else {
        let mut sub = ctx.sub_context();
        sub.meta.parent_blocks.clear();
        return render(body, &mut sub, buf);
    };
    let mut stack = Vec::with_capacity(overrides.len() + 1);
    stack.push((Arc::new(ctx.clone()), body.clone()));
    stack.extend(overrides);

    let mut sub = block_ctx.sub_context();
    sub.meta.parent_blocks = stack;
    render(&block, &mut sub, buf)
}

/// An `include`/`extends` target: a compiled template, or a name for the loader
/// that compiled the current one.
fn resolve_template(ctx: &Context, target: Value) -> Result<Arc<Template>> {
    match target {
        Value::Template(template) => Ok(template),
        Value::Str(name) => match ctx.loader() {
            Some(loader) => loader.load(&name),
            None => Err(Error::eval(format!(
                "Cannot load {:?} by name, as this template was not compiled using a template loader.",
                name
            ))),
        },
        other => Err(Error::eval(format!(
            "Expected a template or a template name, found '{}'.",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use crate::params;
    use crate::tpl::parser::DEFAULT_PARSER;
    use crate::value::{ToValue, Value};

    fn render(source: &str, params: crate::value::Scope) -> crate::Result<String> {
        DEFAULT_PARSER.compile(source, "test.txt")?.render(&params)
    }

    #[test]
    fn test_literal_round_trip() {
        let source = "no tags here,\njust { braces } and % signs\n";
        assert_eq!(render(source, params! {}).unwrap(), source);
    }

    #[test]
    fn test_if_elif_else() {
        let source = "{% if a=='x' %}X{% elif a=='y' %}Y{% else %}Z{% endif %}";
        assert_eq!(render(source, params! { "a" => "x" }).unwrap(), "X");
        assert_eq!(render(source, params! { "a" => "y" }).unwrap(), "Y");
        assert_eq!(render(source, params! { "a" => "q" }).unwrap(), "Z");
        assert_eq!(render("{% if a %}A{% endif %}", params! { "a" => 0 }).unwrap(), "");
    }

    #[test]
    fn test_for_scoping() {
        assert_eq!(
            render("{% for n in range(0, 3) %}{{ n }}{% endfor %}", params! {}).unwrap(),
            "012"
        );
        let leaked = render("{% for n in range(3) %}{% endfor %}{{ n }}", params! {});
        assert!(leaked.unwrap_err().to_string().contains("name 'n' is not defined"));
        assert_eq!(
            render(
                "{% for n in range(3) %}{% endfor %}{{ n }}",
                params! { "n" => "outer" }
            )
            .unwrap(),
            "outer"
        );
    }

    #[test]
    fn test_set_and_with() {
        assert_eq!(
            render("{% set 1 + 1 as two %}{{ two }}", params! {}).unwrap(),
            "2"
        );
        assert_eq!(
            render(
                "{% with 'in' as v %}{{ v }}{% endwith %}{{ v }}",
                params! { "v" => "out" }
            )
            .unwrap(),
            "inout"
        );
        assert_eq!(
            render("{% set [1, 2] as a, b %}{{ a }}{{ b }}", params! {}).unwrap(),
            "12"
        );
    }

    #[test]
    fn test_render_error_attribution() {
        let err = render("ok\n{{ 1 // 0 }}", params! {}).unwrap_err();
        assert!(err.is_render());
        assert_eq!(err.location(), Some(("test.txt", 2)));

        let err = render("{% if True %}\n\n{{ missing }}{% endif %}", params! {}).unwrap_err();
        assert_eq!(err.location(), Some(("test.txt", 3)));
    }

    #[test]
    fn test_autoescape_and_print() {
        let mut params = params! { "v" => "<b>" };
        params.insert(
            "__autoescape__".to_string(),
            Value::function("bar", |_| Ok("bar".to_value())),
        );
        assert_eq!(render("{{ v }}", params.clone()).unwrap(), "bar");
        assert_eq!(render("{% print v %}", params).unwrap(), "<b>");
    }

    #[test]
    fn test_include_compiled_template() {
        let inner = DEFAULT_PARSER.compile("[{{ x }}]", "inner.txt").unwrap();
        let mut params = params! { "x" => 1 };
        params.insert("inner".to_string(), std::sync::Arc::new(inner).to_value());
        assert_eq!(
            render("{% include inner %}{% include inner %}", params).unwrap(),
            "[1][1]"
        );
    }

    #[test]
    fn test_include_by_name_needs_loader() {
        let err = render("{% include 'x.txt' %}", params! {}).unwrap_err();
        assert!(err.is_render());
        assert!(err.to_string().contains("not compiled using a template loader"));
    }

    #[test]
    fn test_include_cycle_is_bounded() {
        let mut params = params! {};
        let looping = DEFAULT_PARSER
            .compile("{% include me %}", "loop.txt")
            .unwrap();
        params.insert("me".to_string(), std::sync::Arc::new(looping).to_value());
        let err = render("{% include me %}", params).unwrap_err();
        assert!(err.is_render());
        assert!(err.to_string().contains("maximum template nesting depth"));
    }

    #[test]
    fn test_super_without_parent_is_empty() {
        assert_eq!(
            render("{% block a %}x{% super %}y{% endblock %}", params! {}).unwrap(),
            "xy"
        );
    }
}
