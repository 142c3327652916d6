//! Content expressions: which sequences of children a node type accepts.
//!
//! The grammar is the usual one for structured editors:
//!
//! ```text
//! expr     = seq ("|" seq)*
//! seq      = postfix+
//! postfix  = atom ("*" | "+" | "?" | "{" n "}" | "{" n "," "}" | "{" n "," m "}")*
//! atom     = name | "(" expr ")"
//! ```
//!
//! A name refers to a node type or to a group of node types. The empty
//! expression only accepts empty content. Range bounds are at most
//! [`MAX_REPEAT`].

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::schema::{Error, Result};

/// Largest bound accepted in a braced range.
pub const MAX_REPEAT: usize = 1024;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+|[^\s\w]").expect("valid token regex"));

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Choice(Vec<Expr>),
    Seq(Vec<Expr>),
    Star(Box<Expr>),
    Plus(Box<Expr>),
    Opt(Box<Expr>),
    Range { expr: Box<Expr>, min: usize, max: Option<usize> },
    Types(Vec<usize>),
}

/// A parsed content expression over node type indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentExpr {
    source: String,
    expr: Expr,
}

impl ContentExpr {
    /// Parses `source`, resolving names through `resolve`.
    pub(crate) fn parse(source: &str, resolve: &dyn Fn(&str) -> Option<Vec<usize>>) -> Result<Self> {
        let tokens = TOKEN.find_iter(source).map(|m| m.as_str()).collect::<Vec<_>>();
        if tokens.is_empty() {
            return Ok(ContentExpr { source: source.to_string(), expr: Expr::Seq(Vec::new()) });
        }
        let mut parser = Parser { source, tokens, pos: 0, resolve };
        let expr = parser.parse_expr()?;
        if let Some(token) = parser.peek() {
            return Err(parser.error(format!("unexpected token '{}'", token)));
        }
        Ok(ContentExpr { source: source.to_string(), expr })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Tells whether the sequence of node types is valid content.
    pub fn matches(&self, types: &[usize]) -> bool {
        ends(&self.expr, types, 0).contains(&types.len())
    }

    /// Tells whether a node with no children is valid.
    pub fn accepts_empty(&self) -> bool {
        self.matches(&[])
    }

    /// Every node type the expression mentions.
    pub(crate) fn referenced_types(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        collect_types(&self.expr, &mut out);
        out
    }
}

fn collect_types(expr: &Expr, out: &mut BTreeSet<usize>) {
    match expr {
        Expr::Choice(items) | Expr::Seq(items) => items.iter().for_each(|e| collect_types(e, out)),
        Expr::Star(e) | Expr::Plus(e) | Expr::Opt(e) => collect_types(e, out),
        Expr::Range { expr, .. } => collect_types(expr, out),
        Expr::Types(types) => out.extend(types.iter().copied()),
    }
}

/// Positions reachable in `types` after matching `expr` from `start`.
fn ends(expr: &Expr, types: &[usize], start: usize) -> BTreeSet<usize> {
    match expr {
        Expr::Types(allowed) => match types.get(start) {
            Some(t) if allowed.contains(t) => BTreeSet::from([start + 1]),
            _ => BTreeSet::new(),
        },
        Expr::Seq(items) => items.iter().fold(BTreeSet::from([start]), |set, item| step(item, types, &set)),
        Expr::Choice(items) => items.iter().flat_map(|item| ends(item, types, start)).collect(),
        Expr::Opt(inner) => {
            let mut set = ends(inner, types, start);
            set.insert(start);
            set
        }
        Expr::Star(inner) => repeat(inner, types, BTreeSet::from([start])),
        Expr::Plus(inner) => repeat(inner, types, ends(inner, types, start)),
        Expr::Range { expr: inner, min, max } => {
            let mut set = BTreeSet::from([start]);
            for _ in 0..*min {
                if set.is_empty() {
                    return set;
                }
                set = step(inner, types, &set);
            }
            match max {
                None => repeat(inner, types, set),
                Some(max) => {
                    let mut all = set.clone();
                    for _ in *min..*max {
                        set = step(inner, types, &set)
                            .into_iter()
                            .filter(|p| !all.contains(p))
                            .collect();
                        if set.is_empty() {
                            break;
                        }
                        all.extend(set.iter().copied());
                    }
                    all
                }
            }
        }
    }
}

fn step(expr: &Expr, types: &[usize], from: &BTreeSet<usize>) -> BTreeSet<usize> {
    from.iter().flat_map(|&p| ends(expr, types, p)).collect()
}

/// Closure of `from` under any number of repetitions of `expr`.
fn repeat(expr: &Expr, types: &[usize], from: BTreeSet<usize>) -> BTreeSet<usize> {
    let mut all = from.clone();
    let mut frontier = from;
    while !frontier.is_empty() {
        frontier = step(expr, types, &frontier)
            .into_iter()
            .filter(|p| !all.contains(p))
            .collect();
        all.extend(frontier.iter().copied());
    }
    all
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<&'a str>,
    pos: usize,
    resolve: &'a dyn Fn(&str) -> Option<Vec<usize>>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).copied()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, reason: String) -> Error {
        Error::InvalidContentExpression {
            expr: self.source.to_string(),
            reason,
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let mut choices = vec![self.parse_seq()?];
        while self.eat("|") {
            choices.push(self.parse_seq()?);
        }
        Ok(if choices.len() == 1 { choices.remove(0) } else { Expr::Choice(choices) })
    }

    fn parse_seq(&mut self) -> Result<Expr> {
        let mut items = vec![self.parse_postfix()?];
        while let Some(token) = self.peek() {
            if token == ")" || token == "|" {
                break;
            }
            items.push(self.parse_postfix()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Expr::Seq(items) })
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat("*") {
                expr = Expr::Star(Box::new(expr));
            } else if self.eat("+") {
                expr = Expr::Plus(Box::new(expr));
            } else if self.eat("?") {
                expr = Expr::Opt(Box::new(expr));
            } else if self.eat("{") {
                expr = self.parse_range(expr)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_range(&mut self, expr: Expr) -> Result<Expr> {
        let min = self.parse_number()?;
        let max = if self.eat(",") {
            if self.peek() == Some("}") { None } else { Some(self.parse_number()?) }
        } else {
            Some(min)
        };
        if !self.eat("}") {
            return Err(self.error("unclosed braced range".to_string()));
        }
        if max.is_some_and(|max| max < min) {
            return Err(self.error(format!("range upper bound below {}", min)));
        }
        Ok(Expr::Range { expr: Box::new(expr), min, max })
    }

    fn parse_number(&mut self) -> Result<usize> {
        let token = self.peek().unwrap_or_default();
        let n = token
            .parse::<usize>()
            .map_err(|_| self.error(format!("expected number, got '{}'", token)))?;
        if n > MAX_REPEAT {
            return Err(self.error(format!("repetition bound {} exceeds {}", n, MAX_REPEAT)));
        }
        self.pos += 1;
        Ok(n)
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        if self.eat("(") {
            let expr = self.parse_expr()?;
            if !self.eat(")") {
                return Err(self.error("missing closing paren".to_string()));
            }
            return Ok(expr);
        }
        match self.peek() {
            Some(name) if name.chars().all(|c| c.is_alphanumeric() || c == '_') => {
                let types = (self.resolve)(name).ok_or_else(|| Error::UnresolvedName {
                    name: name.to_string(),
                    expr: self.source.to_string(),
                })?;
                self.pos += 1;
                Ok(Expr::Types(types))
            }
            Some(token) => Err(self.error(format!("unexpected token '{}'", token))),
            None => Err(self.error("unexpected end of expression".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAGRAPH: usize = 0;
    const HEADING: usize = 1;
    const TEXT: usize = 2;
    const IMAGE: usize = 3;

    fn resolve(name: &str) -> Option<Vec<usize>> {
        match name {
            "paragraph" => Some(vec![PARAGRAPH]),
            "heading" => Some(vec![HEADING]),
            "text" => Some(vec![TEXT]),
            "image" => Some(vec![IMAGE]),
            "block" => Some(vec![PARAGRAPH, HEADING]),
            "inline" => Some(vec![TEXT, IMAGE]),
            _ => None,
        }
    }

    fn parse(source: &str) -> ContentExpr {
        ContentExpr::parse(source, &resolve).unwrap()
    }

    #[test]
    fn test_empty_expression_only_accepts_empty() {
        let expr = parse("");
        assert!(expr.accepts_empty());
        assert!(!expr.matches(&[TEXT]));
    }

    #[test]
    fn test_star_and_plus() {
        assert!(parse("text*").accepts_empty());
        assert!(parse("text*").matches(&[TEXT, TEXT]));
        assert!(!parse("block+").accepts_empty());
        assert!(parse("block+").matches(&[HEADING, PARAGRAPH]));
        assert!(!parse("block+").matches(&[TEXT]));
    }

    #[test]
    fn test_sequence_and_choice() {
        let expr = parse("heading paragraph?");
        assert!(expr.matches(&[HEADING]));
        assert!(expr.matches(&[HEADING, PARAGRAPH]));
        assert!(!expr.matches(&[PARAGRAPH]));

        let expr = parse("(text | image)*");
        assert!(expr.matches(&[IMAGE, TEXT, IMAGE]));
        assert!(!expr.matches(&[PARAGRAPH]));
    }

    #[test]
    fn test_ranges() {
        let exact = parse("paragraph{2}");
        assert!(!exact.matches(&[PARAGRAPH]));
        assert!(exact.matches(&[PARAGRAPH, PARAGRAPH]));
        assert!(!exact.matches(&[PARAGRAPH, PARAGRAPH, PARAGRAPH]));

        let bounded = parse("paragraph{1,2}");
        assert!(!bounded.accepts_empty());
        assert!(bounded.matches(&[PARAGRAPH, PARAGRAPH]));
        assert!(!bounded.matches(&[PARAGRAPH, PARAGRAPH, PARAGRAPH]));

        let open = parse("paragraph{0,}");
        assert!(open.accepts_empty());
        assert!(open.matches(&[PARAGRAPH; 4]));
    }

    #[test]
    fn test_range_bounds_are_capped() {
        let res = ContentExpr::parse("text{0,4000000000}", &resolve);
        assert!(matches!(res, Err(Error::InvalidContentExpression { .. })), "{res:?}");
        let res = ContentExpr::parse("text{1025}", &resolve);
        assert!(matches!(res, Err(Error::InvalidContentExpression { .. })), "{res:?}");
    }

    #[test]
    fn test_largest_range_on_short_content() {
        let expr = parse("text{0,1024}");
        assert!(expr.accepts_empty());
        assert!(expr.matches(&[TEXT, TEXT]));
        assert!(!expr.matches(&[IMAGE]));

        let expr = parse("text{1024,}");
        assert!(!expr.accepts_empty());
        assert!(expr.matches(&[TEXT; 1024]));
        assert!(!expr.matches(&[TEXT; 1023]));
    }

    #[test]
    fn test_nested_nullable_repetition_terminates() {
        let expr = parse("(text*)*");
        assert!(expr.accepts_empty());
        assert!(expr.matches(&[TEXT, TEXT]));
    }

    #[test]
    fn test_unknown_name() {
        let res = ContentExpr::parse("paragraph table", &resolve);
        assert!(matches!(res, Err(Error::UnresolvedName { name, .. }) if name == "table"));
    }

    #[test]
    fn test_syntax_errors() {
        for source in ["(text", "text{", "text{x}", "text{3,1}", "| text", "text )"] {
            let res = ContentExpr::parse(source, &resolve);
            assert!(
                matches!(res, Err(Error::InvalidContentExpression { .. })),
                "{source:?} should not parse: {res:?}"
            );
        }
    }

    #[test]
    fn test_referenced_types() {
        let expr = parse("heading block*");
        assert_eq!(expr.referenced_types().into_iter().collect::<Vec<_>>(), vec![PARAGRAPH, HEADING]);
    }
}
