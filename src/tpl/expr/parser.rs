use crate::Result;
use crate::error::Error;
use crate::tpl::expr::ast::{Expr, Op, UnaryOp};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    /// Punctuation and operators, longest match first.
    Punct(&'static str),
}

const PUNCTS: [&str; 27] = [
    "**", "//", "==", "!=", "<=", ">=", "+", "-", "*", "/", "%", "<", ">", "(", ")", "[", "]",
    "{", "}", ",", ":", ".", "=", "!", "&", "|", "^",
];

/// Splits expression source into tokens.
fn lex(src: &str) -> Result<Vec<Tok>> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            let mut is_float = false;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
                i += 1;
            }
            if i < chars.len() && chars[i] == '.' && !chars.get(i + 1).is_some_and(|d| d.is_alphabetic() || *d == '_') {
                is_float = true;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
                    i += 1;
                }
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    is_float = true;
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
            if is_float {
                let n = text
                    .parse::<f64>()
                    .map_err(|_| Error::syntax(format!("invalid number literal {:?}", text)))?;
                toks.push(Tok::Float(n));
            } else {
                let n = text
                    .parse::<i64>()
                    .map_err(|_| Error::syntax(format!("integer literal {} is too large", text)))?;
                toks.push(Tok::Int(n));
            }
        } else if c == '\'' || c == '"' {
            let quote = c;
            i += 1;
            let mut out = String::new();
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(Error::syntax("unterminated string literal"));
                };
                i += 1;
                if ch == quote {
                    break;
                }
                if ch == '\\' {
                    let Some(&esc) = chars.get(i) else {
                        return Err(Error::syntax("unterminated string literal"));
                    };
                    i += 1;
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        '\\' | '\'' | '"' => out.push(esc),
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                } else {
                    out.push(ch);
                }
            }
            toks.push(Tok::Str(out));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            toks.push(Tok::Name(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let Some(p) = PUNCTS.iter().find(|p| rest.starts_with(**p)) else {
                return Err(Error::syntax(format!("invalid character {:?} in expression", c)));
            };
            toks.push(Tok::Punct(*p));
            i += p.len();
        }
    }
    Ok(toks)
}

/// A recursive-descent parser for the expression language.
///
/// Precedence, lowest first: conditional, `or`, `and`, `not`, comparisons,
/// `+ -`, `* / // %`, unary `- +`, `**`, then postfix access and calls.
/// Deepest expression tree the parser will build.
const MAX_NESTING: usize = 100;

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// Goes one level deeper into the tree; callers restore `depth` on success.
    fn nest(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(Error::syntax("expression is too deeply nested"));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.toks.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn at_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Some(Tok::Punct(q)) if *q == p)
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Name(n)) if n == kw)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", p)))
        }
    }

    fn unexpected(&self, wanted: &str) -> Error {
        match self.peek() {
            Some(tok) => Error::syntax(format!("expected {}, found {}", wanted, describe(tok))),
            None => Error::syntax(format!("expected {}, found end of expression", wanted)),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.nest()?;
        let expr = self.parse_cond();
        self.depth -= 1;
        expr
    }

    fn parse_cond(&mut self) -> Result<Expr> {
        let body = self.parse_or()?;
        if self.eat_keyword("if") {
            let test = self.parse_or()?;
            if !self.eat_keyword("else") {
                return Err(self.unexpected("'else'"));
            }
            let orelse = self.parse_expr()?;
            return Ok(Expr::Cond {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut expr = self.parse_and()?;
        let outer = self.depth;
        while self.eat_keyword("or") {
            self.nest()?;
            let rhs = self.parse_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(rhs));
        }
        self.depth = outer;
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut expr = self.parse_not()?;
        let outer = self.depth;
        while self.eat_keyword("and") {
            self.nest()?;
            let rhs = self.parse_not()?;
            expr = Expr::And(Box::new(expr), Box::new(rhs));
        }
        self.depth = outer;
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") {
            self.nest()?;
            let operand = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<Op> {
        let op = match self.peek()? {
            Tok::Punct("==") => Op::Eq,
            Tok::Punct("!=") => Op::Ne,
            Tok::Punct("<") => Op::Lt,
            Tok::Punct("<=") => Op::Le,
            Tok::Punct(">") => Op::Gt,
            Tok::Punct(">=") => Op::Ge,
            Tok::Name(n) if n == "in" => Op::In,
            Tok::Name(n) if n == "not" => {
                if !matches!(self.peek_at(1), Some(Tok::Name(m)) if m == "in") {
                    return None;
                }
                self.pos += 1;
                Op::NotIn
            }
            Tok::Name(n) if n == "is" => {
                if matches!(self.peek_at(1), Some(Tok::Name(m)) if m == "not") {
                    self.pos += 1;
                    Op::IsNot
                } else {
                    Op::Is
                }
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.parse_additive()?));
        }
        if rest.is_empty() {
            return Ok(first);
        }
        if rest.len() == 1
            && let Some((op, rhs)) = rest.pop()
        {
            return Ok(Expr::Binary(op, Box::new(first), Box::new(rhs)));
        }
        Ok(Expr::Compare(Box::new(first), rest))
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut expr = self.parse_term()?;
        let outer = self.depth;
        loop {
            let op = if self.eat_punct("+") {
                Op::Add
            } else if self.eat_punct("-") {
                Op::Sub
            } else {
                break;
            };
            self.nest()?;
            let rhs = self.parse_term()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
        self.depth = outer;
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut expr = self.parse_unary()?;
        let outer = self.depth;
        loop {
            let op = if self.eat_punct("*") {
                Op::Mul
            } else if self.eat_punct("//") {
                Op::FloorDiv
            } else if self.eat_punct("/") {
                Op::Div
            } else if self.eat_punct("%") {
                Op::Mod
            } else {
                break;
            };
            self.nest()?;
            let rhs = self.parse_unary()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
        self.depth = outer;
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Pos
        } else {
            return self.parse_power();
        };
        self.nest()?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_postfix()?;
        if self.eat_punct("**") {
            // Right-associative, and binds tighter than a unary minus on its left.
            self.nest()?;
            let exp = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary(Op::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;
        let outer = self.depth;
        loop {
            if self.at_punct(".") || self.at_punct("(") || self.at_punct("[") {
                self.nest()?;
            }
            if self.eat_punct(".") {
                match self.advance() {
                    Some(Tok::Name(name)) => expr = Expr::Attr(Box::new(expr), name),
                    _ => {
                        self.pos -= 1;
                        return Err(self.unexpected("attribute name"));
                    }
                }
            } else if self.eat_punct("(") {
                let args = self.parse_items(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat_punct("[") {
                expr = self.parse_subscript(expr)?;
            } else {
                break;
            }
        }
        self.depth = outer;
        Ok(expr)
    }

    fn parse_subscript(&mut self, target: Expr) -> Result<Expr> {
        let start = if self.at_punct(":") {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        if self.eat_punct("]") {
            return match start {
                Some(index) => Ok(Expr::Index(Box::new(target), index)),
                None => Err(Error::syntax("empty subscript")),
            };
        }
        self.expect_punct(":")?;
        let stop = if self.at_punct(":") || self.at_punct("]") {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let step = if self.eat_punct(":") && !self.at_punct("]") {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect_punct("]")?;
        Ok(Expr::Slice {
            target: Box::new(target),
            start,
            stop,
            step,
        })
    }

    /// Comma-separated expressions up to `close`, allowing a trailing comma.
    fn parse_items(&mut self, close: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.eat_punct(close) {
            items.push(self.parse_expr()?);
            if !self.eat_punct(",") {
                self.expect_punct(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let Some(tok) = self.advance() else {
            return Err(Error::syntax("unexpected end of expression"));
        };
        match tok {
            Tok::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Tok::Float(n) => Ok(Expr::Literal(Value::Float(n))),
            Tok::Str(s) => {
                // Adjacent string literals concatenate.
                let mut s = s;
                while let Some(Tok::Str(next)) = self.peek() {
                    s.push_str(next);
                    self.pos += 1;
                }
                Ok(Expr::Literal(Value::Str(s)))
            }
            Tok::Name(name) => Ok(match name.as_str() {
                "True" | "true" => Expr::Literal(Value::Bool(true)),
                "False" | "false" => Expr::Literal(Value::Bool(false)),
                "None" | "null" => Expr::Literal(Value::Null),
                "and" | "or" | "not" | "if" | "else" | "in" | "is" => {
                    self.pos -= 1;
                    return Err(self.unexpected("an expression"));
                }
                _ => Expr::Var(name),
            }),
            Tok::Punct("(") => {
                if self.eat_punct(")") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.eat_punct(")") {
                    return Ok(first);
                }
                self.expect_punct(",")?;
                let mut items = vec![first];
                items.extend(self.parse_items(")")?);
                Ok(Expr::List(items))
            }
            Tok::Punct("[") => Ok(Expr::List(self.parse_items("]")?)),
            Tok::Punct("{") => self.parse_braces(),
            other => {
                self.pos -= 1;
                Err(Error::syntax(format!("unexpected {}", describe(&other))))
            }
        }
    }

    /// `{}` is an empty dict; `{k: v, ...}` a dict; `{a, b}` a set.
    fn parse_braces(&mut self) -> Result<Expr> {
        if self.eat_punct("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        let first = self.parse_expr()?;
        if self.eat_punct(":") {
            let value = self.parse_expr()?;
            let mut pairs = vec![(first, value)];
            while self.eat_punct(",") {
                if self.at_punct("}") {
                    break;
                }
                let key = self.parse_expr()?;
                self.expect_punct(":")?;
                pairs.push((key, self.parse_expr()?));
            }
            self.expect_punct("}")?;
            return Ok(Expr::Dict(pairs));
        }
        let mut items = vec![first];
        if self.eat_punct(",") {
            items.extend(self.parse_items("}")?);
        } else {
            self.expect_punct("}")?;
        }
        Ok(Expr::Set(items))
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Int(n) => format!("number {}", n),
        Tok::Float(n) => format!("number {}", n),
        Tok::Str(s) => format!("string {:?}", s),
        Tok::Name(n) => format!("name '{}'", n),
        Tok::Punct(p) => format!("'{}'", p),
    }
}

/// Parses a complete expression; trailing input is a syntax error.
pub fn parse(src: &str) -> Result<Expr> {
    let toks = lex(src)?;
    if toks.is_empty() {
        return Err(Error::syntax("empty expression"));
    }
    let mut parser = Parser {
        toks,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expr()?;
    // A bare tuple at the top level, e.g. `1, 2`.
    if parser.at_punct(",") {
        let mut items = vec![expr];
        while parser.eat_punct(",") {
            if parser.peek().is_none() {
                break;
            }
            items.push(parser.parse_expr()?);
        }
        if parser.peek().is_some() {
            return Err(parser.unexpected("end of expression"));
        }
        return Ok(Expr::List(items));
    }
    if parser.peek().is_some() {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Var(name.to_string()))
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a + b * 2").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                Op::Add,
                var("a"),
                Box::new(Expr::Binary(
                    Op::Mul,
                    var("b"),
                    Box::new(Expr::Literal(Value::Int(2)))
                ))
            )
        );
    }

    #[test]
    fn test_comparison_and_logic() {
        let expr = parse("a == 'x' or not b").unwrap();
        match expr {
            Expr::Or(lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Binary(Op::Eq, _, _)));
                assert!(matches!(*rhs, Expr::Unary(UnaryOp::Not, _)));
            }
            other => panic!("Expected Or, got {:?}", other),
        }
        assert!(matches!(parse("x not in y").unwrap(), Expr::Binary(Op::NotIn, _, _)));
        assert!(matches!(parse("x is not None").unwrap(), Expr::Binary(Op::IsNot, _, _)));
        assert!(matches!(parse("1 < x < 3").unwrap(), Expr::Compare(_, ref rest) if rest.len() == 2));
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse("user.name.upper()").unwrap();
        match expr {
            Expr::Call(callee, args) => {
                assert!(args.is_empty());
                assert!(matches!(*callee, Expr::Attr(_, ref m) if m == "upper"));
            }
            other => panic!("Expected Call, got {:?}", other),
        }
        assert!(matches!(parse("items[1:-1]").unwrap(), Expr::Slice { .. }));
        assert!(matches!(parse("items[::2]").unwrap(), Expr::Slice { start: None, stop: None, step: Some(_), .. }));
        assert!(matches!(parse("m['k']").unwrap(), Expr::Index(..)));
    }

    #[test]
    fn test_collections() {
        assert!(matches!(parse("[1, 2,]").unwrap(), Expr::List(ref v) if v.len() == 2));
        assert!(matches!(parse("(1, 2)").unwrap(), Expr::List(ref v) if v.len() == 2));
        assert!(matches!(parse("(1)").unwrap(), Expr::Literal(Value::Int(1))));
        assert!(matches!(parse("{'a': 1}").unwrap(), Expr::Dict(ref v) if v.len() == 1));
        assert!(matches!(parse("{1, 2}").unwrap(), Expr::Set(ref v) if v.len() == 2));
        assert!(matches!(parse("{}").unwrap(), Expr::Dict(ref v) if v.is_empty()));
    }

    #[test]
    fn test_ternary() {
        assert!(matches!(parse("'a' if x else 'b'").unwrap(), Expr::Cond { .. }));
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("1.5").unwrap(), Expr::Literal(Value::Float(1.5)));
        assert_eq!(parse("1e3").unwrap(), Expr::Literal(Value::Float(1000.0)));
        assert_eq!(parse("None").unwrap(), Expr::Literal(Value::Null));
        assert_eq!(
            parse(r#""it\'s" 'x'"#).unwrap(),
            Expr::Literal(Value::Str("it'sx".to_string()))
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("a +").is_err());
        assert!(parse("(a").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("x if y").is_err());
        assert!(parse("a $ b").is_err());
        assert!(parse("99999999999999999999").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |n: usize| format!("{}1{}", "(".repeat(n), ")".repeat(n));
        assert_eq!(parse(&nested(50)).unwrap(), Expr::Literal(Value::Int(1)));
        let err = parse(&nested(20_000)).unwrap_err();
        assert_eq!(err.to_string(), "expression is too deeply nested");

        assert!(parse(&format!("1{}", " + 1".repeat(50))).is_ok());
        for src in [
            format!("{}x", "not ".repeat(20_000)),
            format!("{}1", "-".repeat(20_000)),
            format!("1{}", " + 1".repeat(20_000)),
            format!("a{}", " or a".repeat(20_000)),
            format!("x{}", ".a".repeat(20_000)),
            format!("2{}", " ** 2".repeat(20_000)),
            format!("{}1{}", "[".repeat(20_000), "]".repeat(20_000)),
        ] {
            assert!(parse(&src).is_err());
        }
    }
}
