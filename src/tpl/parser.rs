use crate::Result;
use crate::error::Error;
use crate::tpl::ast::{AstNode, BlockMap, Fragment};
use crate::tpl::escape;
use crate::tpl::expr::Expression;
use crate::tpl::lexer::{TokenKind, Tokens, tokenize};
use crate::tpl::macros::{Macro, default_macros};
use crate::tpl::render_context::{AUTOESCAPE_KEY, NAME_KEY};
use crate::tpl::template::Template;
use crate::value::{Function, Scope, Value};
use log::debug;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Name given to templates compiled without one.
pub const DEFAULT_NAME: &str = "__string__";

/// The parser used by `moody::compile` and `moody::render`.
pub static DEFAULT_PARSER: LazyLock<Parser> = LazyLock::new(Parser::default);

/// Nodes parsed up to the first tag no macro recognised.
#[derive(Debug)]
pub struct Chunk {
    /// Line of the unrecognised tag, or of the last line read.
    pub line: usize,
    /// The unrecognised tag, or `None` when the input ran out.
    pub tag: Option<String>,
    pub nodes: Vec<(usize, AstNode)>,
}

/// The closing tag matched by [`ParserRun::parse_block`].
#[derive(Debug)]
pub struct Terminator {
    pub line: usize,
    groups: Vec<Option<String>>,
}

impl Terminator {
    /// Capture group `i` of the terminator pattern; `0` is the whole tag.
    pub fn group(&self, i: usize) -> Option<&str> {
        self.groups.get(i).and_then(|g| g.as_deref())
    }
}

/// The state of one compilation: a token stream, the macros to dispatch tags to,
/// and the blocks declared so far.
pub struct ParserRun<'a> {
    tokens: Tokens<'a>,
    name: Arc<str>,
    macros: &'a [Macro],
    blocks: BlockMap,
    /// Any non-whitespace output or tag parsed yet.
    seen_content: bool,
    /// Nesting of `parse_block` calls.
    depth: usize,
}

impl<'a> ParserRun<'a> {
    pub fn new(source: &'a str, name: &str, macros: &'a [Macro]) -> Self {
        Self {
            tokens: tokenize(source),
            name: Arc::from(name),
            macros,
            blocks: BlockMap::new(),
            seen_content: false,
            depth: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parses nodes until the input ends or a tag matches none of the macros.
    ///
    /// Failures inside a macro or expression are attributed to the line of the
    /// token that caused them.
    pub fn parse_chunk(&mut self) -> Result<Chunk> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.next() {
            let line = token.line;
            let node = match token.kind {
                TokenKind::Literal => {
                    if token.text.is_empty() {
                        continue;
                    }
                    if !token.text.trim().is_empty() {
                        self.seen_content = true;
                    }
                    AstNode::Text(token.text)
                }
                TokenKind::Expression => {
                    self.seen_content = true;
                    let expr = Expression::compile(&token.text)
                        .map_err(|e| e.at_compile(&self.name, line))?;
                    AstNode::Expr(expr)
                }
                TokenKind::Tag => match self
                    .dispatch(&token.text)
                    .map_err(|e| e.at_compile(&self.name, line))?
                {
                    Some(node) => {
                        self.seen_content = true;
                        node
                    }
                    None => {
                        return Ok(Chunk {
                            line,
                            tag: Some(token.text),
                            nodes,
                        });
                    }
                },
            };
            nodes.push((line, node));
        }
        Ok(Chunk {
            line: self.tokens.line(),
            tag: None,
            nodes,
        })
    }

    fn dispatch(&mut self, tag: &str) -> Result<Option<AstNode>> {
        let macros = self.macros;
        for m in macros {
            if let Some(caps) = m.captures(tag) {
                return m.build(self, &caps).map(Some);
            }
        }
        Ok(None)
    }

    /// Parses everything that is left. Any unrecognised tag is a compile error.
    pub fn parse_all(&mut self) -> Result<Fragment> {
        let chunk = self.parse_chunk()?;
        if let Some(tag) = chunk.tag {
            return Err(unrecognized(&tag).at_compile(&self.name, chunk.line));
        }
        Ok(self.fragment(chunk.nodes))
    }

    /// Parses a nested body up to a closing tag matching `terminator`.
    ///
    /// Running out of input fails with a syntax error naming `start_tag` and `end_tag`;
    /// the calling macro's tag line is attached on the way out. A closing tag that
    /// does not match `terminator` fails at its own line.
    pub fn parse_block(
        &mut self,
        start_tag: &str,
        end_tag: &str,
        terminator: &Regex,
    ) -> Result<(Terminator, Fragment)> {
        self.depth += 1;
        let chunk = self.parse_chunk();
        self.depth -= 1;
        let chunk = chunk?;
        let Some(tag) = chunk.tag else {
            return Err(Error::syntax(format!(
                "{{% {} %}} tag could not find a corresponding {{% {} %}}.",
                start_tag, end_tag
            )));
        };
        let Some(caps) = terminator.captures(&tag) else {
            return Err(unrecognized(&tag).at_compile(&self.name, chunk.line));
        };
        let groups = caps
            .iter()
            .map(|m| m.map(|m| m.as_str().to_string()))
            .collect();
        let end = Terminator {
            line: chunk.line,
            groups,
        };
        Ok((end, self.fragment(chunk.nodes)))
    }

    pub fn fragment(&self, nodes: Vec<(usize, AstNode)>) -> Fragment {
        Fragment::new(self.name.clone(), nodes)
    }

    /// Records a block declaration. Names must be unique within a template.
    pub fn register_block(&mut self, name: &str, body: Fragment) -> Result<()> {
        if self.blocks.contains_key(name) {
            return Err(Error::syntax(format!(
                "Multiple blocks named {:?} are not allowed in a child template.",
                name
            )));
        }
        self.blocks.insert(name.to_string(), body);
        Ok(())
    }

    pub fn blocks(&self) -> &BlockMap {
        &self.blocks
    }

    /// True until the first significant content at the top level.
    pub fn at_template_start(&self) -> bool {
        self.depth == 0 && !self.seen_content
    }
}

fn unrecognized(tag: &str) -> Error {
    Error::syntax(format!("{{% {} %}} is not a recognized tag.", tag))
}

/// Compiles template source using a fixed, ordered set of macros.
///
/// ```
/// use moody::Parser;
///
/// let parser = Parser::default().without_autoescape();
/// let template = parser.compile("<b>{{ name }}</b>", "page.html").unwrap();
/// assert_eq!(template.render(&moody::params! { "name" => "<i>" }).unwrap(), "<b><i></b>");
/// ```
#[derive(Clone, Debug)]
pub struct Parser {
    macros: Arc<[Macro]>,
    autoescape: HashMap<String, Function>,
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new(default_macros())
    }
}

impl Parser {
    /// A parser trying `macros` in order, escaping HTML and XML templates by default.
    pub fn new(macros: Vec<Macro>) -> Self {
        Self {
            macros: macros.into(),
            autoescape: escape::default_autoescape(),
        }
    }

    /// Escapes `{{ }}` output of templates whose name ends in `ext` (e.g. `".html"`).
    pub fn autoescape(mut self, ext: &str, func: Function) -> Self {
        self.autoescape.insert(ext.to_string(), func);
        self
    }

    pub fn without_autoescape(mut self) -> Self {
        self.autoescape.clear();
        self
    }

    pub fn macros(&self) -> &[Macro] {
        &self.macros
    }

    pub(crate) fn autoescape_for(&self, name: &str) -> Option<&Function> {
        escape::extension(name).and_then(|ext| self.autoescape.get(ext))
    }

    pub fn compile(&self, source: &str, name: &str) -> Result<Template> {
        self.compile_with(source, name, Scope::new(), Scope::new())
    }

    /// Compiles with default parameters, applied under the caller's on every render,
    /// and extra framework entries that override `__name__` and `__autoescape__`.
    pub fn compile_with(
        &self,
        source: &str,
        name: &str,
        params: Scope,
        meta: Scope,
    ) -> Result<Template> {
        let mut globals = Scope::new();
        globals.insert(NAME_KEY.to_string(), Value::Str(name.to_string()));
        globals.insert(
            AUTOESCAPE_KEY.to_string(),
            self.autoescape_for(name)
                .map_or(Value::Null, |f| Value::Func(f.clone())),
        );
        globals.extend(meta);

        let fragment = ParserRun::new(source, name, &self.macros).parse_all()?;
        debug!(
            "compiled template {:?} ({} top-level nodes)",
            name,
            fragment.nodes().len()
        );
        Ok(Template::new(fragment, params, Arc::new(globals)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::binding::BindingTarget;

    fn parse(source: &str) -> Result<Fragment> {
        let macros = default_macros();
        ParserRun::new(source, "test.txt", &macros).parse_all()
    }

    #[test]
    fn test_parse_text_and_expressions() {
        let fragment = parse("Hello {{ name }}!").unwrap();
        let nodes = fragment.nodes();
        assert_eq!(nodes.len(), 3);
        assert!(matches!(&nodes[0], (1, AstNode::Text(t)) if t == "Hello "));
        assert!(matches!(&nodes[1], (1, AstNode::Expr(e)) if e.source() == "name"));
        assert!(matches!(&nodes[2], (1, AstNode::Text(t)) if t == "!"));
    }

    #[test]
    fn test_parse_if_chain() {
        let fragment =
            parse("{% if a %}A{% elif b %}B{% elif c %}C{% else %}D{% endif %}").unwrap();
        match &fragment.nodes()[0].1 {
            AstNode::If { clauses, else_body } => {
                assert_eq!(clauses.len(), 3);
                assert_eq!(clauses[2].0.source(), "c");
                assert!(else_body.is_some());
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_parse_for_with_unpacking() {
        let fragment = parse("{% for k, v in items %}{{ k }}{% endfor %}").unwrap();
        match &fragment.nodes()[0].1 {
            AstNode::For { target, expr, body } => {
                assert_eq!(
                    target,
                    &BindingTarget::Unpack(vec!["k".to_string(), "v".to_string()])
                );
                assert_eq!(expr.source(), "items");
                assert_eq!(body.nodes().len(), 1);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_tag() {
        let err = parse("line one\n{% frobnicate %}").unwrap_err();
        assert!(err.is_compile());
        assert_eq!(err.location(), Some(("test.txt", 2)));
        assert!(err.to_string().starts_with("{% frobnicate %} is not a recognized tag."));
    }

    #[test]
    fn test_missing_terminator_names_opening_tag() {
        let err = parse("\n\n{% if a %}never closed").unwrap_err();
        assert_eq!(err.location(), Some(("test.txt", 3)));
        assert!(
            err.to_string()
                .starts_with("{% if %} tag could not find a corresponding {% endif %}.")
        );
    }

    #[test]
    fn test_mismatched_terminator() {
        let err = parse("{% for x in y %}\n{% endif %}").unwrap_err();
        assert_eq!(err.location(), Some(("test.txt", 2)));
        assert!(err.to_string().starts_with("{% endif %} is not a recognized tag."));
    }

    #[test]
    fn test_else_ordering() {
        let err = parse("{% if a %}{% else %}{% elif b %}{% endif %}").unwrap_err();
        assert!(err.to_string().contains("cannot come after"));
        let err = parse("{% if a %}{% else %}{% else %}{% endif %}").unwrap_err();
        assert!(err.to_string().contains("Only one {% else %}"));
    }

    #[test]
    fn test_duplicate_blocks() {
        let err = parse("{% block a %}{% endblock %}{% block a %}{% endblock %}").unwrap_err();
        assert!(err.is_compile());
        assert!(err.to_string().contains("Multiple blocks named \"a\""));
    }

    #[test]
    fn test_endblock_name_must_match() {
        assert!(parse("{% block a %}x{% endblock a %}").is_ok());
        assert!(parse("{% block a %}x{% endblock b %}").is_err());
    }

    #[test]
    fn test_extends_collects_blocks() {
        let fragment =
            parse("{% extends 'base.txt' %}ignored{% block a %}{% block b %}{% endblock %}{% endblock %}")
                .unwrap();
        assert_eq!(fragment.nodes().len(), 1);
        match &fragment.nodes()[0].1 {
            AstNode::Extends { parent, blocks } => {
                assert_eq!(parent.source(), "'base.txt'");
                let mut names: Vec<&String> = blocks.keys().collect();
                names.sort();
                assert_eq!(names, ["a", "b"]);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_extends_must_come_first() {
        assert!(parse("  \n{% extends 'base.txt' %}").is_ok());
        assert!(parse("text{% extends 'base.txt' %}").is_err());
        assert!(parse("{% if a %}{% extends 'base.txt' %}{% endif %}").is_err());
    }

    #[test]
    fn test_bad_expression_is_compile_error() {
        let err = parse("a\nb {{ 1 + }}").unwrap_err();
        assert!(err.is_compile());
        assert_eq!(err.location(), Some(("test.txt", 2)));
    }

    #[test]
    fn test_bad_binding_is_compile_error() {
        let err = parse("{% for 1x in y %}{% endfor %}").unwrap_err();
        assert!(err.is_compile());
        assert!(err.to_string().contains("not a valid variable name"));
    }

    #[test]
    fn test_first_matching_macro_wins() {
        let shout = Macro::new("shout", r"if\s+loud", |_, _| {
            Ok(AstNode::Text("LOUD".to_string()))
        })
        .unwrap();
        let mut macros = vec![shout];
        macros.extend(default_macros());
        let parser = Parser::new(macros);
        let template = parser.compile("{% if loud %}", "t.txt").unwrap();
        assert_eq!(template.render(&()).unwrap(), "LOUD");
    }

    #[test]
    fn test_autoescape_selection() {
        let parser = Parser::default();
        assert!(parser.autoescape_for("page.html").is_some());
        assert!(parser.autoescape_for("page.txt").is_none());
        let parser = parser.without_autoescape();
        assert!(parser.autoescape_for("page.html").is_none());
        let parser = parser.autoescape(".txt", escape::html_escaper());
        assert!(parser.autoescape_for("notes.txt").is_some());
    }
}
