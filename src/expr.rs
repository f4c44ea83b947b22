//! The expression language used for parameter values and signal widths:
//! integers over `+ - * /`, a unary ceiling-log2 `%`, parentheses, integer
//! literals, and parameter names.

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};

/// A parsed integer expression, owned (no borrows into source text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Lit(i64),
    Param(String),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    /// Unary `%x`: ceiling of log2(x), i.e. the number of bits needed to
    /// enumerate `x` distinct values. `%0 == %1 == 0`.
    CeilLog2(Box<Expr>),
}

impl Expr {
    pub fn lit(v: i64) -> Self {
        Expr::Lit(v)
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    /// Parse a textual expression such as `"a + %(b*2)"`.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens: &tokens, pos: 0 };
        let e = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(CompileError::spec(format!(
                "trailing tokens in expression `{source}`"
            )));
        }
        Ok(e)
    }

    /// Evaluate against a resolver that maps parameter names to their
    /// defining expression in the enclosing scope. Resolution is
    /// recursive; a cycle raises [`CompileError::ParamCycle`].
    pub fn eval(&self, resolver: &dyn ParamResolver) -> Result<i64> {
        let mut stack = Vec::new();
        self.eval_inner(resolver, &mut stack)
    }

    fn eval_inner(&self, resolver: &dyn ParamResolver, stack: &mut Vec<String>) -> Result<i64> {
        match self {
            Expr::Lit(v) => Ok(*v),
            Expr::Param(name) => {
                let canonical = canonical_param_name(name);
                if stack.iter().any(|p| *p == canonical) {
                    let mut path = stack.clone();
                    path.push(canonical);
                    return Err(CompileError::ParamCycle { path });
                }
                let def = resolver.resolve(&canonical).ok_or_else(|| {
                    CompileError::spec(format!("unknown parameter `{name}`"))
                })?;
                stack.push(canonical);
                let v = def.eval_inner(resolver, stack)?;
                stack.pop();
                Ok(v)
            }
            Expr::Add(a, b) => Ok(a.eval_inner(resolver, stack)? + b.eval_inner(resolver, stack)?),
            Expr::Sub(a, b) => Ok(a.eval_inner(resolver, stack)? - b.eval_inner(resolver, stack)?),
            Expr::Mul(a, b) => Ok(a.eval_inner(resolver, stack)? * b.eval_inner(resolver, stack)?),
            Expr::Div(a, b) => {
                let divisor = b.eval_inner(resolver, stack)?;
                if divisor == 0 {
                    return Err(CompileError::spec("division by zero in width/parameter expression"));
                }
                Ok(a.eval_inner(resolver, stack)? / divisor)
            }
            Expr::CeilLog2(a) => {
                let v = a.eval_inner(resolver, stack)?;
                Ok(ceil_log2(v))
            }
        }
    }
}

/// Smallest `n` such that `2^n >= v`. `ceil_log2(0) == ceil_log2(1) == 0`.
pub fn ceil_log2(v: i64) -> i64 {
    if v <= 1 {
        return 0;
    }
    let mut n = 0i64;
    let mut p = 1i64;
    while p < v {
        p <<= 1;
        n += 1;
    }
    n
}

/// Parameter names are folded to a canonical (lowercase) case on insertion
/// and lookup; all other identifiers in the IR are case-sensitive.
pub fn canonical_param_name(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Maps a parameter name to its defining expression in the enclosing scope.
pub trait ParamResolver {
    fn resolve(&self, name: &str) -> Option<Expr>;
}

/// A resolver with no bindings; useful for evaluating expressions that are
/// already fully literal.
pub struct EmptyResolver;
impl ParamResolver for EmptyResolver {
    fn resolve(&self, _name: &str) -> Option<Expr> {
        None
    }
}

// --- tokenizer + recursive-descent parser -----------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => { tokens.push(Token::Plus); i += 1; }
            '-' => { tokens.push(Token::Minus); i += 1; }
            '*' => { tokens.push(Token::Star); i += 1; }
            '/' => { tokens.push(Token::Slash); i += 1; }
            '%' => { tokens.push(Token::Percent); i += 1; }
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value: i64 = text
                    .parse()
                    .map_err(|_| CompileError::spec(format!("bad integer literal `{text}`")))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            other => {
                return Err(CompileError::spec(format!(
                    "unexpected character `{other}` in expression `{source}`"
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    // expr := term (('+'|'-') term)*
    fn parse_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.bump();
                    let rhs = self.parse_term()?;
                    lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Minus) => {
                    self.bump();
                    let rhs = self.parse_term()?;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    // term := unary (('*'|'/') unary)*
    fn parse_term(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.bump();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Mul(Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Slash) => {
                    self.bump();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Div(Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    // unary := '%' unary | '-' unary | atom
    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Percent) => {
                self.bump();
                let inner = self.parse_unary()?;
                Ok(Expr::CeilLog2(Box::new(inner)))
            }
            Some(Token::Minus) => {
                self.bump();
                let inner = self.parse_unary()?;
                Ok(Expr::Sub(Box::new(Expr::Lit(0)), Box::new(inner)))
            }
            _ => self.parse_atom(),
        }
    }

    // atom := INT | IDENT | '(' expr ')'
    fn parse_atom(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Int(v)) => Ok(Expr::Lit(*v)),
            Some(Token::Ident(name)) => Ok(Expr::Param(name.clone())),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(CompileError::spec("expected closing `)`")),
                }
            }
            _ => Err(CompileError::spec("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct MapResolver(BTreeMap<String, Expr>);
    impl ParamResolver for MapResolver {
        fn resolve(&self, name: &str) -> Option<Expr> {
            self.0.get(name).cloned()
        }
    }

    #[test]
    fn literal_arithmetic() {
        let e = Expr::parse("2 + 3 * 4").unwrap();
        assert_eq!(e.eval(&EmptyResolver).unwrap(), 14);
    }

    #[test]
    fn parens_and_ceil_log2() {
        let e = Expr::parse("%(3)").unwrap();
        assert_eq!(e.eval(&EmptyResolver).unwrap(), 2);
        let e = Expr::parse("%((2+2)*2)").unwrap();
        assert_eq!(e.eval(&EmptyResolver).unwrap(), 3);
    }

    #[test]
    fn ceil_log2_edge_cases() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(5), 3);
    }

    #[test]
    fn parameter_resolution() {
        let mut map = BTreeMap::new();
        map.insert("width".to_string(), Expr::Lit(8));
        let resolver = MapResolver(map);
        let e = Expr::parse("width * 2").unwrap();
        assert_eq!(e.eval(&resolver).unwrap(), 16);
    }

    #[test]
    fn parameter_names_fold_case() {
        let mut map = BTreeMap::new();
        map.insert("width".to_string(), Expr::Lit(8));
        let resolver = MapResolver(map);
        let e = Expr::parse("WIDTH").unwrap();
        assert_eq!(e.eval(&resolver).unwrap(), 8);
    }

    #[test]
    fn cycle_detection() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Expr::Param("b".to_string()));
        map.insert("b".to_string(), Expr::Param("a".to_string()));
        let resolver = MapResolver(map);
        let e = Expr::parse("a").unwrap();
        let err = e.eval(&resolver).unwrap_err();
        assert!(matches!(err, CompileError::ParamCycle { .. }));
    }

    #[test]
    fn division_by_zero() {
        let e = Expr::parse("4 / 0").unwrap();
        assert!(e.eval(&EmptyResolver).is_err());
    }
}
