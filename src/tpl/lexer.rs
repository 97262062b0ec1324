use regex::Regex;
use std::collections::VecDeque;
use std::str::SplitInclusive;
use std::sync::LazyLock;

/// `{# comment #}`, `{{ expression }}` or `{% tag %}`, never spanning a newline.
static RE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{#.*?#\}|\{\{\s*(.*?)\s*\}\}|\{%\s*(.*?)\s*%\}").expect("valid token regex")
});

/// A whole line holding a `%% tag` or a `## comment`, newline included.
static RE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t]*(%%|##)[ \t]*(\S[^\n]*?)[ \t]*\r?\n?$").expect("valid line token regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Literal,
    Expression,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// 1-based line the token starts on.
    pub line: usize,
    pub kind: TokenKind,
    pub text: String,
}

/// A lazy, single-pass token stream over template source.
///
/// Source is scanned one line at a time. Each line yields the literal text before every
/// match (when non-empty), the match itself (comments yield nothing), and the literal
/// text after the last match, which may be empty. A line starting with `%%` is a tag and
/// one starting with `##` a comment; either way the line's newline is consumed.
pub struct Tokens<'a> {
    lines: SplitInclusive<'a, char>,
    line: usize,
    pending: VecDeque<Token>,
}

impl<'a> Tokens<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            lines: source.split_inclusive('\n'),
            line: 0,
            pending: VecDeque::new(),
        }
    }

    fn scan_line(&mut self, text: &str) {
        self.line += 1;
        let line = self.line;
        if let Some(caps) = RE_LINE.captures(text) {
            if caps.get(1).is_some_and(|m| m.as_str() == "%%")
                && let Some(tag) = caps.get(2)
            {
                self.push(line, TokenKind::Tag, tag.as_str());
            }
            return;
        }
        let mut index = 0;
        for caps in RE_TOKEN.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > index {
                self.push(line, TokenKind::Literal, &text[index..whole.start()]);
            }
            if let Some(expr) = caps.get(1) {
                self.push(line, TokenKind::Expression, expr.as_str());
            } else if let Some(tag) = caps.get(2) {
                self.push(line, TokenKind::Tag, tag.as_str());
            }
            index = whole.end();
        }
        self.push(line, TokenKind::Literal, &text[index..]);
    }

    fn push(&mut self, line: usize, kind: TokenKind, text: &str) {
        self.pending.push_back(Token {
            line,
            kind,
            text: text.to_string(),
        });
    }

    /// Line number of the most recently scanned line.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl Iterator for Tokens<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(token);
            }
            let text = self.lines.next()?;
            self.scan_line(text);
        }
    }
}

pub fn tokenize(source: &str) -> Tokens<'_> {
    Tokens::new(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<(usize, TokenKind, String)> {
        tokenize(source)
            .map(|t| (t.line, t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(
            kinds("hello world"),
            vec![(1, TokenKind::Literal, "hello world".to_string())]
        );
    }

    #[test]
    fn test_expression_and_tag() {
        let tokens = kinds("a{{ x }}b{%  if y  %}c");
        assert_eq!(
            tokens,
            vec![
                (1, TokenKind::Literal, "a".to_string()),
                (1, TokenKind::Expression, "x".to_string()),
                (1, TokenKind::Literal, "b".to_string()),
                (1, TokenKind::Tag, "if y".to_string()),
                (1, TokenKind::Literal, "c".to_string()),
            ]
        );
    }

    #[test]
    fn test_comment_dropped_and_trailing_literal_emitted() {
        let tokens = kinds("{# note #}{{x}}");
        assert_eq!(
            tokens,
            vec![
                (1, TokenKind::Expression, "x".to_string()),
                (1, TokenKind::Literal, String::new()),
            ]
        );
    }

    #[test]
    fn test_line_numbers() {
        let tokens = kinds("one\n{% tag %}\nthree {{ v }}");
        assert_eq!(tokens[0], (1, TokenKind::Literal, "one\n".to_string()));
        assert_eq!(tokens[1], (2, TokenKind::Tag, "tag".to_string()));
        assert_eq!(tokens[2], (2, TokenKind::Literal, "\n".to_string()));
        assert_eq!(tokens[3], (3, TokenKind::Literal, "three ".to_string()));
        assert_eq!(tokens[4], (3, TokenKind::Expression, "v".to_string()));
    }

    #[test]
    fn test_unclosed_delimiter_is_literal() {
        let tokens = kinds("{{ x\n}}");
        assert_eq!(
            tokens,
            vec![
                (1, TokenKind::Literal, "{{ x\n".to_string()),
                (2, TokenKind::Literal, "}}".to_string()),
            ]
        );
    }

    #[test]
    fn test_line_tags_and_comments() {
        let tokens = kinds("<ul>\n  %% for x in xs  \n<li>\n## dropped\n%%endfor\n</ul>");
        assert_eq!(
            tokens,
            vec![
                (1, TokenKind::Literal, "<ul>\n".to_string()),
                (2, TokenKind::Tag, "for x in xs".to_string()),
                (3, TokenKind::Literal, "<li>\n".to_string()),
                (5, TokenKind::Tag, "endfor".to_string()),
                (6, TokenKind::Literal, "</ul>".to_string()),
            ]
        );
    }

    #[test]
    fn test_line_markers_only_at_line_start() {
        let tokens = kinds("50%% off ## today\n%%\n");
        assert_eq!(
            tokens,
            vec![
                (1, TokenKind::Literal, "50%% off ## today\n".to_string()),
                (2, TokenKind::Literal, "%%\n".to_string()),
            ]
        );
    }

    #[test]
    fn test_non_greedy() {
        let tokens = kinds("{{a}}{{b}}");
        assert_eq!(tokens[0].2, "a");
        assert_eq!(tokens[1].2, "b");
    }
}
