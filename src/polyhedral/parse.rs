//! Reader for isl-style set and relation text.
//!
//! Accepted forms:
//!
//! ```text
//! [N, M] -> { S[i, j] : 0 <= i < N and 0 <= j < M }
//! { S[i, j] -> A[i + 1, 2j] }
//! [N] -> { S[i] -> [floor(i / 4), i % 4] : 0 <= i < N or i = 100 }
//! { S[i] : 0 <= i < 10; T[i] : 0 <= i < 5 }
//! ```
//!
//! Tuple elements that introduce a fresh name become dimensions; any other
//! element is an affine expression and produces a dimension tied to it by an
//! equality. `floor(e / c)`, `ceil(e / c)` and `e % c` introduce local
//! variables. `or` splits a piece into disjuncts.

use std::collections::BTreeMap;
use unicode_xid::UnicodeXID;

use super::basic::BasicMap;
use super::constraint::{Constraint, ConstraintKind};
use super::expr::AffineExpr;
use super::space::{Space, Tuple};
use super::union::{UnionMap, UnionSet};
use crate::utils::errors::{ParseError, ParseErrorKind};
use crate::utils::location::{SourceLocation, Span};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Colon,
    Semi,
    Arrow,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(s) => format!("identifier `{}`", s),
            Tok::Int(v) => format!("integer {}", v),
            Tok::Eof => "end of input".to_string(),
            other => format!("{:?}", other),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    span: Span,
}

/// Converts source text into tokens.
struct Lexer<'a> {
    source: &'a str,
    offset: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, offset: 0, line: 1, column: 1 }
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column, self.offset)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.offset..].chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            while self.peek().map_or(false, char::is_whitespace) {
                self.advance();
            }
            let start = self.location();
            let Some(c) = self.advance() else {
                tokens.push(Token { tok: Tok::Eof, span: Span::new(start, start) });
                return Ok(tokens);
            };
            let tok = match c {
                '[' => Tok::LBracket,
                ']' => Tok::RBracket,
                '{' => Tok::LBrace,
                '}' => Tok::RBrace,
                '(' => Tok::LParen,
                ')' => Tok::RParen,
                ',' => Tok::Comma,
                ':' => Tok::Colon,
                ';' => Tok::Semi,
                '+' => Tok::Plus,
                '*' => Tok::Star,
                '/' => Tok::Slash,
                '%' => Tok::Percent,
                '-' if self.peek() == Some('>') => {
                    self.advance();
                    Tok::Arrow
                }
                '-' => Tok::Minus,
                '<' if self.peek() == Some('=') => {
                    self.advance();
                    Tok::Le
                }
                '<' => Tok::Lt,
                '>' if self.peek() == Some('=') => {
                    self.advance();
                    Tok::Ge
                }
                '>' => Tok::Gt,
                '=' => {
                    if self.peek() == Some('=') {
                        self.advance();
                    }
                    Tok::Eq
                }
                '&' if self.peek() == Some('&') => {
                    self.advance();
                    Tok::Ident("and".to_string())
                }
                '|' if self.peek() == Some('|') => {
                    self.advance();
                    Tok::Ident("or".to_string())
                }
                c if c.is_ascii_digit() => {
                    let begin = start.offset;
                    while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                        self.advance();
                    }
                    let text = &self.source[begin..self.offset];
                    let value = text.parse::<i64>().map_err(|_| ParseError {
                        message: format!("integer literal `{}` out of range", text),
                        span: Span::new(start, self.location()),
                        kind: ParseErrorKind::InvalidNumber,
                        expected: vec![],
                        found: Some(text.to_string()),
                    })?;
                    Tok::Int(value)
                }
                c if c.is_xid_start() || c == '_' => {
                    let begin = start.offset;
                    while self.peek().map_or(false, |c| c.is_xid_continue() || c == '\'') {
                        self.advance();
                    }
                    Tok::Ident(self.source[begin..self.offset].to_string())
                }
                other => {
                    return Err(ParseError {
                        message: format!("unexpected character `{}`", other),
                        span: Span::new(start, self.location()),
                        kind: ParseErrorKind::UnexpectedChar,
                        expected: vec![],
                        found: Some(other.to_string()),
                    })
                }
            };
            tokens.push(Token { tok, span: Span::new(start, self.location()) });
        }
    }
}

/// Variable of a linear form while the column layout is still growing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Var {
    Dim(usize),
    Local(usize),
    Param(usize),
}

/// Linear form over [`Var`]s.
#[derive(Debug, Clone, Default)]
struct Lin {
    terms: BTreeMap<Var, i64>,
    constant: i64,
}

impl Lin {
    fn constant(v: i64) -> Self {
        Self { terms: BTreeMap::new(), constant: v }
    }

    fn var(v: Var) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(v, 1);
        Self { terms, constant: 0 }
    }

    fn as_constant(&self) -> Option<i64> {
        self.terms.values().all(|&c| c == 0).then_some(self.constant)
    }

    fn scale(&self, f: i64) -> Self {
        Self {
            terms: self.terms.iter().map(|(v, c)| (v.clone(), c * f)).collect(),
            constant: self.constant * f,
        }
    }

    fn add(&self, other: &Lin) -> Self {
        let mut out = self.clone();
        for (v, c) in &other.terms {
            *out.terms.entry(v.clone()).or_insert(0) += c;
        }
        out.constant += other.constant;
        out
    }

    fn sub(&self, other: &Lin) -> Self {
        self.add(&other.scale(-1))
    }
}

/// Constraints collected for one piece before the layout is final.
#[derive(Debug, Default)]
struct PieceBuilder {
    input: Option<Tuple>,
    output: Tuple,
    n_in: usize,
    dims: Vec<String>,
    n_local: usize,
    shared: Vec<(Lin, ConstraintKind)>,
}

impl PieceBuilder {
    fn build(&self, params: &[String], extra: &[(Lin, ConstraintKind)]) -> BasicMap {
        let space = match &self.input {
            Some(input) => Space::map(input.clone(), self.output.clone(), params.to_vec()),
            None => Space::set(self.output.clone(), params.to_vec()),
        };
        let n_dims = self.dims.len();
        let n_cols = n_dims + self.n_local;
        let mut m = BasicMap::universe(space);
        m.n_local = self.n_local;
        for (lin, kind) in self.shared.iter().chain(extra.iter()) {
            let mut e = AffineExpr::zero(n_cols, params.len());
            e.constant = lin.constant;
            for (v, &c) in &lin.terms {
                match v {
                    Var::Dim(d) => e.coeffs[*d] += c,
                    Var::Local(l) => e.coeffs[n_dims + l] += c,
                    Var::Param(p) => e.param_coeffs[*p] += c,
                }
            }
            m.add_constraint(Constraint::new(e, *kind));
        }
        m
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    params: Vec<String>,
}

impl Parser {
    fn new(text: &str) -> Result<Self, ParseError> {
        Ok(Self { tokens: Lexer::new(text).tokenize()?, pos: 0, params: Vec::new() })
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, n: usize) -> &Tok {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].tok
    }

    fn span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn bump(&mut self) -> Tok {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn error(&self, kind: ParseErrorKind, message: impl Into<String>, expected: &[&str]) -> ParseError {
        let found = self.peek().describe();
        ParseError {
            message: message.into(),
            span: self.span(),
            kind: if matches!(self.peek(), Tok::Eof) && kind == ParseErrorKind::UnexpectedToken {
                ParseErrorKind::UnexpectedEof
            } else {
                kind
            },
            expected: expected.iter().map(|s| s.to_string()).collect(),
            found: Some(found),
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), ParseError> {
        if *self.peek() == tok {
            self.bump();
            Ok(())
        } else {
            Err(self.error(ParseErrorKind::UnexpectedToken, format!("expected {}", what), &[what]))
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Ident(s) if s == kw)
    }

    fn parse_union(&mut self) -> Result<Vec<BasicMap>, ParseError> {
        if *self.peek() == Tok::LBracket {
            self.bump();
            while *self.peek() != Tok::RBracket {
                match self.bump() {
                    Tok::Ident(name) => self.params.push(name),
                    _ => return Err(self.error(ParseErrorKind::UnexpectedToken, "expected parameter name", &["identifier"])),
                }
                if *self.peek() == Tok::Comma {
                    self.bump();
                }
            }
            self.bump();
            self.expect(Tok::Arrow, "`->`")?;
        }
        self.expect(Tok::LBrace, "`{`")?;
        let mut pieces = Vec::new();
        while *self.peek() != Tok::RBrace {
            pieces.extend(self.parse_piece()?);
            if *self.peek() == Tok::Semi {
                self.bump();
            } else if *self.peek() != Tok::RBrace {
                return Err(self.error(ParseErrorKind::UnexpectedToken, "expected `;` or `}`", &["`;`", "`}`"]));
            }
        }
        self.bump();
        if *self.peek() != Tok::Eof {
            return Err(self.error(ParseErrorKind::UnexpectedToken, "trailing input", &["end of input"]));
        }
        Ok(pieces)
    }

    fn parse_piece(&mut self) -> Result<Vec<BasicMap>, ParseError> {
        let mut b = PieceBuilder::default();
        let first = self.parse_tuple(&mut b)?;
        if *self.peek() == Tok::Arrow {
            self.bump();
            b.n_in = b.dims.len();
            b.input = Some(first);
            b.output = self.parse_tuple(&mut b)?;
        } else {
            b.output = first;
        }
        let params = self.params.clone();
        if *self.peek() != Tok::Colon {
            return Ok(vec![b.build(&params, &[])]);
        }
        self.bump();
        let mut disjuncts = Vec::new();
        loop {
            disjuncts.push(self.parse_conjunction(&mut b)?);
            if self.is_keyword("or") {
                self.bump();
            } else {
                break;
            }
        }
        Ok(disjuncts.iter().map(|d| b.build(&params, d)).collect())
    }

    fn parse_tuple(&mut self, b: &mut PieceBuilder) -> Result<Tuple, ParseError> {
        let name = match self.peek().clone() {
            Tok::Ident(n) => {
                self.bump();
                Some(n)
            }
            _ => None,
        };
        self.expect(Tok::LBracket, "`[`")?;
        let first_dim = b.dims.len();
        let mut names = Vec::new();
        while *self.peek() != Tok::RBracket {
            let fresh = match (self.peek(), self.peek_at(1)) {
                (Tok::Ident(n), Tok::Comma | Tok::RBracket) => {
                    let known = b.dims.contains(n) || self.params.contains(n);
                    (!known).then(|| n.clone())
                }
                _ => None,
            };
            if let Some(n) = fresh {
                self.bump();
                b.dims.push(n.clone());
                names.push(n);
            } else {
                let value = self.parse_affine(b)?;
                let k = b.dims.len();
                let dim_name = format!("o{}", k - first_dim);
                b.dims.push(dim_name.clone());
                names.push(dim_name);
                b.shared.push((Lin::var(Var::Dim(k)).sub(&value), ConstraintKind::Equality));
            }
            if *self.peek() == Tok::Comma {
                self.bump();
            } else if *self.peek() != Tok::RBracket {
                return Err(self.error(ParseErrorKind::UnexpectedToken, "expected `,` or `]`", &["`,`", "`]`"]));
            }
        }
        self.bump();
        Ok(Tuple { name, dims: names })
    }

    fn parse_conjunction(&mut self, b: &mut PieceBuilder) -> Result<Vec<(Lin, ConstraintKind)>, ParseError> {
        let mut out = Vec::new();
        loop {
            let mut lhs = self.parse_affine(b)?;
            let mut any = false;
            loop {
                let op = self.peek().clone();
                if !matches!(op, Tok::Lt | Tok::Le | Tok::Gt | Tok::Ge | Tok::Eq) {
                    break;
                }
                self.bump();
                let rhs = self.parse_affine(b)?;
                let c = match op {
                    Tok::Lt => (rhs.sub(&lhs).add(&Lin::constant(-1)), ConstraintKind::Inequality),
                    Tok::Le => (rhs.sub(&lhs), ConstraintKind::Inequality),
                    Tok::Gt => (lhs.sub(&rhs).add(&Lin::constant(-1)), ConstraintKind::Inequality),
                    Tok::Ge => (lhs.sub(&rhs), ConstraintKind::Inequality),
                    _ => (lhs.sub(&rhs), ConstraintKind::Equality),
                };
                out.push(c);
                lhs = rhs;
                any = true;
            }
            if !any {
                return Err(self.error(ParseErrorKind::UnexpectedToken, "expected a comparison", &["<", "<=", ">", ">=", "="]));
            }
            if self.is_keyword("and") {
                self.bump();
            } else {
                return Ok(out);
            }
        }
    }

    fn parse_affine(&mut self, b: &mut PieceBuilder) -> Result<Lin, ParseError> {
        let mut acc = match self.peek() {
            Tok::Minus => {
                self.bump();
                self.parse_term(b)?.scale(-1)
            }
            Tok::Plus => {
                self.bump();
                self.parse_term(b)?
            }
            _ => self.parse_term(b)?,
        };
        loop {
            match self.peek() {
                Tok::Plus => {
                    self.bump();
                    acc = acc.add(&self.parse_term(b)?);
                }
                Tok::Minus => {
                    self.bump();
                    acc = acc.sub(&self.parse_term(b)?);
                }
                _ => return Ok(acc),
            }
        }
    }

    fn parse_term(&mut self, b: &mut PieceBuilder) -> Result<Lin, ParseError> {
        let mut acc = self.parse_factor(b)?;
        loop {
            match self.peek() {
                Tok::Star => {
                    self.bump();
                    let rhs = self.parse_factor(b)?;
                    acc = self.multiply(&acc, &rhs)?;
                }
                // juxtaposition: `2i`, `3(i + 1)`
                Tok::Ident(n) if acc.as_constant().is_some() && !matches!(n.as_str(), "and" | "or") => {
                    let rhs = self.parse_factor(b)?;
                    acc = self.multiply(&acc, &rhs)?;
                }
                Tok::LParen if acc.as_constant().is_some() => {
                    let rhs = self.parse_factor(b)?;
                    acc = self.multiply(&acc, &rhs)?;
                }
                Tok::Percent => {
                    self.bump();
                    let c = self.parse_divisor()?;
                    let q = self.floor_local(b, &acc, c);
                    acc = acc.sub(&q.scale(c));
                }
                _ => return Ok(acc),
            }
        }
    }

    fn multiply(&self, a: &Lin, b: &Lin) -> Result<Lin, ParseError> {
        match (a.as_constant(), b.as_constant()) {
            (Some(c), _) => Ok(b.scale(c)),
            (_, Some(c)) => Ok(a.scale(c)),
            _ => Err(self.error(ParseErrorKind::NonAffine, "product of two non-constant terms", &[])),
        }
    }

    fn parse_divisor(&mut self) -> Result<i64, ParseError> {
        match self.bump() {
            Tok::Int(c) if c > 0 => Ok(c),
            _ => Err(self.error(ParseErrorKind::NonAffine, "divisor must be a positive integer", &["integer"])),
        }
    }

    /// New local `q = floor(e / c)`.
    fn floor_local(&self, b: &mut PieceBuilder, e: &Lin, c: i64) -> Lin {
        let q = Lin::var(Var::Local(b.n_local));
        b.n_local += 1;
        // e - c*q >= 0 and c*q + c - 1 - e >= 0
        b.shared.push((e.sub(&q.scale(c)), ConstraintKind::Inequality));
        b.shared.push((q.scale(c).add(&Lin::constant(c - 1)).sub(e), ConstraintKind::Inequality));
        q
    }

    fn parse_factor(&mut self, b: &mut PieceBuilder) -> Result<Lin, ParseError> {
        match self.peek().clone() {
            Tok::Int(v) => {
                self.bump();
                Ok(Lin::constant(v))
            }
            Tok::Minus => {
                self.bump();
                Ok(self.parse_factor(b)?.scale(-1))
            }
            Tok::LParen => {
                self.bump();
                let e = self.parse_affine(b)?;
                self.expect(Tok::RParen, "`)`")?;
                Ok(e)
            }
            Tok::Ident(name) if (name == "floor" || name == "ceil") && *self.peek_at(1) == Tok::LParen => {
                self.bump();
                self.bump();
                let e = self.parse_affine(b)?;
                self.expect(Tok::Slash, "`/`")?;
                let c = self.parse_divisor()?;
                self.expect(Tok::RParen, "`)`")?;
                if name == "floor" {
                    Ok(self.floor_local(b, &e, c))
                } else {
                    Ok(self.floor_local(b, &e.scale(-1), c).scale(-1))
                }
            }
            Tok::Ident(name) => {
                // last definition wins so output names shadow input ones
                if let Some(d) = b.dims.iter().position(|d| *d == name) {
                    self.bump();
                    Ok(Lin::var(Var::Dim(d)))
                } else if let Some(p) = self.params.iter().position(|p| *p == name) {
                    self.bump();
                    Ok(Lin::var(Var::Param(p)))
                } else {
                    Err(self.error(ParseErrorKind::UnknownIdentifier, format!("unknown identifier `{}`", name), &[]))
                }
            }
            _ => Err(self.error(ParseErrorKind::UnexpectedToken, "expected an affine expression", &["integer", "identifier", "`(`"])),
        }
    }
}

fn check_kind(pieces: Vec<BasicMap>, want_set: bool, text: &str) -> Result<Vec<BasicMap>, ParseError> {
    if let Some(bad) = pieces.iter().find(|p| p.space.is_set() != want_set) {
        return Err(ParseError {
            message: format!(
                "expected a {} but found `{}`",
                if want_set { "set" } else { "relation" },
                bad.space
            ),
            span: Span::default(),
            kind: ParseErrorKind::UnexpectedToken,
            expected: vec![],
            found: Some(text.to_string()),
        });
    }
    Ok(pieces)
}

fn single(mut pieces: Vec<BasicMap>, text: &str) -> Result<BasicMap, ParseError> {
    if pieces.len() != 1 {
        return Err(ParseError {
            message: format!("expected a single conjunction, found {} pieces", pieces.len()),
            span: Span::default(),
            kind: ParseErrorKind::NotBasic,
            expected: vec![],
            found: Some(text.to_string()),
        });
    }
    Ok(pieces.remove(0).simplify())
}

/// Parse a union of relations.
pub fn parse_union_map(text: &str) -> Result<UnionMap, ParseError> {
    let pieces = Parser::new(text)?.parse_union()?;
    Ok(UnionMap::from_pieces(check_kind(pieces, false, text)?).simplify())
}

/// Parse a union of sets.
pub fn parse_union_set(text: &str) -> Result<UnionSet, ParseError> {
    let pieces = Parser::new(text)?.parse_union()?;
    Ok(UnionSet::from_pieces(check_kind(pieces, true, text)?).simplify())
}

/// Parse a single basic relation.
pub fn parse_map(text: &str) -> Result<BasicMap, ParseError> {
    let pieces = Parser::new(text)?.parse_union()?;
    single(check_kind(pieces, false, text)?, text)
}

/// Parse a single basic set.
pub fn parse_set(text: &str) -> Result<BasicMap, ParseError> {
    let pieces = Parser::new(text)?.parse_union()?;
    single(check_kind(pieces, true, text)?, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parametric_set() {
        let s = parse_set("[N] -> { S[i, j] : 0 <= i < N and 0 <= j <= i }").unwrap();
        assert_eq!(s.space.output.name_str(), "S");
        assert_eq!(s.space.output.dims, vec!["i", "j"]);
        assert_eq!(s.space.params, vec!["N"]);
        assert!(s.contains_point(&[3, 2], &[10]));
        assert!(!s.contains_point(&[3, 4], &[10]));
        assert!(!s.contains_point(&[10, 0], &[10]));
    }

    #[test]
    fn test_parse_access_map() {
        let m = parse_map("{ S[i, j] -> A[i + 1, 2j - 1] }").unwrap();
        assert_eq!(m.space.output.name_str(), "A");
        assert_eq!(m.n_out(), 2);
        assert!(m.contains_point(&[1, 3, 2, 5], &[]));
        assert!(!m.contains_point(&[1, 3, 1, 5], &[]));
    }

    #[test]
    fn test_parse_floor_and_mod() {
        let m = parse_map("{ S[i] -> [floor(i / 4), i % 4] }").unwrap();
        assert!(m.contains_point(&[9, 2, 1], &[]));
        assert!(m.contains_point(&[-1, -1, 3], &[]));
        assert!(!m.contains_point(&[9, 2, 2], &[]));
    }

    #[test]
    fn test_parse_disjunction_and_union() {
        let s = parse_union_set("{ S[i] : 0 <= i < 3 or i = 10; T[k] : k = 1 }").unwrap();
        assert_eq!(s.pieces.len(), 3);
        assert!(s.contains_point("S", &[10], &[]));
        assert!(!s.contains_point("S", &[5], &[]));
        assert!(s.contains_point("T", &[1], &[]));
    }

    #[test]
    fn test_fixed_dimension_in_tuple() {
        let s = parse_set("{ S[0, i] : 0 <= i < 4 }").unwrap();
        assert_eq!(s.n_out(), 2);
        assert_eq!(s.fixed_out_value(0), Some(0));
    }

    #[test]
    fn test_errors() {
        let err = parse_set("{ S[i] : 0 <= i < N }").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownIdentifier);
        let err = parse_set("{ S[i, j] : i * j >= 0 }").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::NonAffine);
        let err = parse_map("{ S[i] : i >= 0 }").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
        let err = parse_set("{ S[i] : i >= 0 ").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEof);
    }
}
