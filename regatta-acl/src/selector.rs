//! Boolean expressions over claim sets and listing records.
//!
//! One small language serves two callers: binding-rule selectors evaluated
//! against mapped identity claims (`engineering in list.policies`) and
//! list-endpoint filters evaluated against returned records
//! (`Type == "client" and Global != true`).
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expression := and ("or" and)*
//! and        := unary ("and" unary)*
//! unary      := "not" unary | "(" expression ")" | comparison
//! comparison := operand ("==" | "!=" | "in" | "not in") operand
//! operand    := string | number | bool | word | path
//! ```
//!
//! A `path` is a dotted field reference and must resolve in the datum. A
//! bare `word` resolves as a field when the datum has one; in selector mode
//! an unresolved word falls back to its literal spelling, which is what
//! makes `engineering in list.policies` read naturally.

use core::fmt;

use serde_json::Value;
use smol_str::SmolStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{detail}")]
pub struct ParseError {
    detail: String,
}

impl ParseError {
    fn new(detail: impl Into<String>) -> Self {
        ParseError { detail: detail.into() }
    }
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("error finding value in datum: {path}")]
    UnknownField { path: String },
}

/// How unresolved bare words and missing paths behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// List filters: a reference to an unknown field is an error.
    Filter,
    /// Binding selectors: unresolved words read as literals, missing
    /// mapped-claim paths simply fail the comparison.
    Selector,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Or(Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Dotted field reference; must resolve.
    Path(Vec<SmolStr>),
    /// Bare identifier; field if present, literal otherwise (selector mode).
    Word(SmolStr),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    In,
    NotIn,
}

impl Expression {
    pub fn parse(text: &str) -> Result<Expression, ParseError> {
        let tokens = lex(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expression = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(ParseError::new(format!("unexpected trailing input at {:?}", parser.peek_text())));
        }
        Ok(expression)
    }

    pub fn evaluate(&self, datum: &Value, mode: EvalMode) -> Result<bool, EvalError> {
        match self {
            Expression::Or(left, right) => Ok(left.evaluate(datum, mode)? || right.evaluate(datum, mode)?),
            Expression::And(left, right) => Ok(left.evaluate(datum, mode)? && right.evaluate(datum, mode)?),
            Expression::Not(inner) => Ok(!inner.evaluate(datum, mode)?),
            Expression::Compare { left, op, right } => {
                let left = left.resolve(datum, mode)?;
                let right = right.resolve(datum, mode)?;
                let (left, right) = match (left, right) {
                    (Some(left), Some(right)) => (left, right),
                    // A missing side in selector mode fails the comparison
                    // without failing the whole evaluation.
                    _ => return Ok(false),
                };
                Ok(match op {
                    CompareOp::Eq => left == right,
                    CompareOp::Ne => left != right,
                    CompareOp::In => contains(&right, &left),
                    CompareOp::NotIn => !contains(&right, &left),
                })
            }
        }
    }
}

impl Operand {
    fn resolve(&self, datum: &Value, mode: EvalMode) -> Result<Option<Value>, EvalError> {
        match self {
            Operand::Literal(value) => Ok(Some(value.clone())),
            Operand::Path(segments) => match lookup(datum, segments) {
                Some(value) => Ok(Some(value.clone())),
                None => match mode {
                    EvalMode::Filter => Err(EvalError::UnknownField {
                        path: segments.join("."),
                    }),
                    EvalMode::Selector => Ok(None),
                },
            },
            Operand::Word(word) => match lookup(datum, std::slice::from_ref(word)) {
                Some(value) => Ok(Some(value.clone())),
                None => match mode {
                    EvalMode::Filter => Err(EvalError::UnknownField { path: word.to_string() }),
                    EvalMode::Selector => Ok(Some(Value::String(word.to_string()))),
                },
            },
        }
    }
}

fn lookup<'a>(datum: &'a Value, segments: &[SmolStr]) -> Option<&'a Value> {
    let mut current = datum;
    for segment in segments {
        current = current.as_object()?.get(segment.as_str())?;
    }
    Some(current)
}

/// `needle in haystack`: list membership, or substring when both are
/// strings.
fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| item == needle),
        Value::String(text) => needle.as_str().is_some_and(|needle| text.contains(needle)),
        _ => false,
    }
}

// ----- lexing ----- //

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(SmolStr),
    Str(String),
    Number(serde_json::Number),
    Bool(bool),
    EqOp,
    NeOp,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(ident) => write!(f, "{ident}"),
            Token::Str(text) => write!(f, "{text:?}"),
            Token::Number(number) => write!(f, "{number}"),
            Token::Bool(value) => write!(f, "{value}"),
            Token::EqOp => write!(f, "=="),
            Token::NeOp => write!(f, "!="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

fn lex(text: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(ParseError::new("expected \"==\""));
                }
                tokens.push(Token::EqOp);
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(ParseError::new("expected \"!=\""));
                }
                tokens.push(Token::NeOp);
            }
            '"' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => literal.push(escaped),
                            Some(other) => return Err(ParseError::new(format!("invalid escape \\{other}"))),
                            None => return Err(ParseError::new("unterminated string literal")),
                        },
                        Some(other) => literal.push(other),
                        None => return Err(ParseError::new("unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_ascii_digit() => {
                let mut number = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        number.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number: serde_json::Number = number
                    .parse::<i64>()
                    .map(serde_json::Number::from)
                    .map_err(|_| ParseError::new(format!("invalid number {number:?}")))?;
                tokens.push(Token::Number(number));
            }
            c if is_ident_char(c) => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if is_ident_char(d) || d == '.' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    _ => tokens.push(Token::Ident(SmolStr::new(ident))),
                }
            }
            other => return Err(ParseError::new(format!("unexpected character {other:?}"))),
        }
    }

    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

// ----- parsing ----- //

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_text(&self) -> String {
        self.peek().map(|token| token.to_string()).unwrap_or_else(|| "end of input".to_owned())
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(ident)) if ident == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expression(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.and()?;
        while self.eat_keyword("or") {
            let right = self.and()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.unary()?;
        while self.eat_keyword("and") {
            let right = self.unary()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expression, ParseError> {
        if self.eat_keyword("not") {
            return Ok(Expression::Not(Box::new(self.unary()?)));
        }
        if matches!(self.peek(), Some(Token::LParen)) {
            self.pos += 1;
            let inner = self.expression()?;
            match self.next() {
                Some(Token::RParen) => return Ok(inner),
                _ => return Err(ParseError::new("expected \")\"")),
            }
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expression, ParseError> {
        let left = self.operand()?;
        let op = match self.next() {
            Some(Token::EqOp) => CompareOp::Eq,
            Some(Token::NeOp) => CompareOp::Ne,
            Some(Token::Ident(ident)) if ident == "in" => CompareOp::In,
            Some(Token::Ident(ident)) if ident == "not" => {
                if !self.eat_keyword("in") {
                    return Err(ParseError::new("expected \"in\" after \"not\""));
                }
                CompareOp::NotIn
            }
            other => {
                let text = other.map(|token| token.to_string()).unwrap_or_else(|| "end of input".to_owned());
                return Err(ParseError::new(format!("expected comparison operator, found {text}")));
            }
        };
        let right = self.operand()?;
        Ok(Expression::Compare { left, op, right })
    }

    fn operand(&mut self) -> Result<Operand, ParseError> {
        match self.next() {
            Some(Token::Str(text)) => Ok(Operand::Literal(Value::String(text))),
            Some(Token::Number(number)) => Ok(Operand::Literal(Value::Number(number))),
            Some(Token::Bool(value)) => Ok(Operand::Literal(Value::Bool(value))),
            Some(Token::Ident(ident)) => {
                if ident.contains('.') {
                    Ok(Operand::Path(ident.split('.').map(SmolStr::new).collect()))
                } else {
                    Ok(Operand::Word(ident))
                }
            }
            other => {
                let text = other.map(|token| token.to_string()).unwrap_or_else(|| "end of input".to_owned());
                Err(ParseError::new(format!("expected operand, found {text}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn eval(text: &str, datum: &Value, mode: EvalMode) -> Result<bool, EvalError> {
        Expression::parse(text).expect("expression parses").evaluate(datum, mode)
    }

    #[test]
    fn selector_bare_word_membership() {
        let datum = json!({ "list": { "policies": ["engineering", "support"] } });
        assert!(eval("engineering in list.policies", &datum, EvalMode::Selector).expect("evaluates"));
        assert!(!eval("finance in list.policies", &datum, EvalMode::Selector).expect("evaluates"));
    }

    #[test]
    fn selector_missing_path_fails_comparison_quietly() {
        let datum = json!({ "value": { "role": "admin" } });
        assert!(!eval("engineering in list.policies", &datum, EvalMode::Selector).expect("evaluates"));
        assert!(eval("value.role == \"admin\"", &datum, EvalMode::Selector).expect("evaluates"));
    }

    #[test]
    fn filter_unknown_field_is_an_error() {
        let datum = json!({ "Type": "client" });
        let err = eval("Typo == \"client\"", &datum, EvalMode::Filter).expect_err("unknown field");
        assert!(err.to_string().contains("error finding value in datum"));
    }

    #[test]
    fn filter_comparisons() {
        let datum = json!({ "Type": "client", "Global": true, "Policies": ["dev"] });
        assert!(eval("Type == \"client\" and Global == true", &datum, EvalMode::Filter).expect("evaluates"));
        assert!(eval("\"dev\" in Policies", &datum, EvalMode::Filter).expect("evaluates"));
        assert!(eval("Type != \"management\"", &datum, EvalMode::Filter).expect("evaluates"));
        assert!(!eval("not Global == true", &datum, EvalMode::Filter).expect("evaluates"));
    }

    #[test]
    fn precedence_and_parentheses() {
        let datum = json!({ "a": 1, "b": 2 });
        // `or` binds loosest.
        assert!(eval("a == 1 and b == 9 or b == 2", &datum, EvalMode::Filter).expect("evaluates"));
        assert!(!eval("a == 1 and (b == 9 or b == 3)", &datum, EvalMode::Filter).expect("evaluates"));
    }

    #[test]
    fn not_in_operator() {
        let datum = json!({ "list": { "teams": ["ops"] } });
        assert!(eval("dev not in list.teams", &datum, EvalMode::Selector).expect("evaluates"));
        assert!(!eval("ops not in list.teams", &datum, EvalMode::Selector).expect("evaluates"));
    }

    #[test]
    fn substring_containment() {
        let datum = json!({ "value": { "email": "dev@example.com" } });
        assert!(eval("\"@example.com\" in value.email", &datum, EvalMode::Selector).expect("evaluates"));
    }

    #[test]
    fn parse_errors() {
        assert!(Expression::parse("a ==").is_err());
        assert!(Expression::parse("a = b").is_err());
        assert!(Expression::parse("(a == b").is_err());
        assert!(Expression::parse("a == b extra").is_err());
        assert!(Expression::parse("\"unterminated").is_err());
    }
}
