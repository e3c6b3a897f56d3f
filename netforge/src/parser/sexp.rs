//! Nested-bracket tree parser
//!
//! Builds a read-only tree from symbol, footprint, schematic and board text.
//! Rewriting never goes through this tree (it would lose formatting); see
//! [`crate::parser::blocks`] and [`crate::codec`] for byte-preserving edits.
//! The tree is used for queries such as symbol pin offsets and the DRC pass
//! over emitted board text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("Parse error at position {0}: {1}")]
    ParseError(usize, String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SExp {
    Atom(String),
    List(Vec<SExp>),
}

impl SExp {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            SExp::Atom(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExp]> {
        match self {
            SExp::List(items) => Some(items),
            _ => None,
        }
    }

    /// Keyword of a list node, e.g. `pad` for `(pad "1" smd ...)`.
    pub fn head(&self) -> Option<&str> {
        self.as_list()
            .and_then(|items| items.first())
            .and_then(|first| first.as_atom())
    }

    /// Atom at position `index` of a list node (0 is the head).
    pub fn atom(&self, index: usize) -> Option<&str> {
        self.as_list()
            .and_then(|items| items.get(index))
            .and_then(|item| item.as_atom())
    }

    pub fn number(&self, index: usize) -> Option<f64> {
        self.atom(index).and_then(|s| s.parse().ok())
    }

    /// First direct child list whose head is `key`.
    pub fn child(&self, key: &str) -> Option<&SExp> {
        self.as_list()?
            .iter()
            .find(|item| item.head() == Some(key))
    }

    /// All direct child lists whose head is `key`.
    pub fn children<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a SExp> + 'a {
        self.as_list()
            .unwrap_or(&[])
            .iter()
            .filter(move |item| item.head() == Some(key))
    }

    /// Every list at any depth whose head is `key`, in document order.
    pub fn find_all(&self, key: &str) -> Vec<&SExp> {
        let mut found = Vec::new();
        self.collect_recursive(key, &mut found);
        found
    }

    fn collect_recursive<'a>(&'a self, key: &str, found: &mut Vec<&'a SExp>) {
        if let SExp::List(items) = self {
            if self.head() == Some(key) {
                found.push(self);
            }
            for item in items {
                item.collect_recursive(key, found);
            }
        }
    }

    /// `(at x y ...)` child as a coordinate pair.
    pub fn position(&self) -> Option<(f64, f64)> {
        let at = self.child("at")?;
        Some((at.number(1)?, at.number(2)?))
    }
}

/// Parse a complete document; trailing non-whitespace is rejected.
pub fn parse_str(input: &str) -> Result<SExp, ParseError> {
    let mut parser = SExpParser::new(input);
    let root = parser.parse()?;
    parser.skip_whitespace();
    if !parser.is_eof() {
        return Err(ParseError::ParseError(
            parser.pos,
            "trailing content after root expression".to_string(),
        ));
    }
    Ok(root)
}

pub struct SExpParser {
    input: Vec<char>,
    pos: usize,
}

impl SExpParser {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    pub fn parse(&mut self) -> Result<SExp, ParseError> {
        self.skip_whitespace();
        if self.is_eof() {
            return Err(ParseError::UnexpectedEof);
        }
        self.parse_sexp()
    }

    fn parse_sexp(&mut self) -> Result<SExp, ParseError> {
        self.skip_whitespace();

        if self.is_eof() {
            return Err(ParseError::UnexpectedEof);
        }

        match self.peek() {
            '(' => self.parse_list(),
            ')' => Err(ParseError::ParseError(
                self.pos,
                "unbalanced closing bracket".to_string(),
            )),
            _ => self.parse_atom(),
        }
    }

    fn parse_list(&mut self) -> Result<SExp, ParseError> {
        self.expect_char('(')?;
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();

            if self.is_eof() {
                return Err(ParseError::UnexpectedEof);
            }

            if self.peek() == ')' {
                self.advance();
                break;
            }

            items.push(self.parse_sexp()?);
        }

        Ok(SExp::List(items))
    }

    fn parse_atom(&mut self) -> Result<SExp, ParseError> {
        if self.peek() == '"' {
            self.parse_string()
        } else {
            self.parse_symbol()
        }
    }

    fn parse_string(&mut self) -> Result<SExp, ParseError> {
        let start = self.pos;
        self.expect_char('"')?;
        let mut s = String::new();
        let mut escaped = false;

        while !self.is_eof() {
            let ch = self.peek();
            self.advance();

            if escaped {
                match ch {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    _ => s.push(ch),
                }
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                return Ok(SExp::Atom(s));
            } else {
                s.push(ch);
            }
        }

        Err(ParseError::ParseError(start, "unterminated string".to_string()))
    }

    fn parse_symbol(&mut self) -> Result<SExp, ParseError> {
        let mut s = String::new();

        while !self.is_eof() {
            let ch = self.peek();
            if ch.is_whitespace() || ch == '(' || ch == ')' {
                break;
            }
            s.push(ch);
            self.advance();
        }

        if s.is_empty() {
            Err(ParseError::UnexpectedToken("empty symbol".to_string()))
        } else {
            Ok(SExp::Atom(s))
        }
    }

    fn skip_whitespace(&mut self) {
        while !self.is_eof() && self.peek().is_whitespace() {
            self.advance();
        }
    }

    fn peek(&self) -> char {
        self.input.get(self.pos).copied().unwrap_or('\0')
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            self.pos += 1;
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        if self.is_eof() {
            return Err(ParseError::UnexpectedEof);
        }

        let ch = self.peek();
        if ch == expected {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken(format!(
                "Expected '{}', found '{}'",
                expected, ch
            )))
        }
    }
}
