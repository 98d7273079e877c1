//! Recursive-descent parser for the condition expression grammar
//!
//! The grammar is deliberately small: variable paths (bare dotted
//! identifiers or `${path}`), string/number/boolean/null literals,
//! comparisons, boolean connectives, negation, parentheses, and an
//! existence check. There is no function application beyond `exists(..)`
//! and no way to evaluate injected code.

use super::value::Value;
use anyhow::{anyhow, bail, Result};

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Variable path into the run's variable store (e.g. `audienceSize`,
    /// `fetch.size`, `${check.result}`)
    Variable(String),
    /// Literal value
    Literal(Value),
    /// Comparison operation
    Comparison {
        left: Box<Expression>,
        op: ComparisonOp,
        right: Box<Expression>,
    },
    /// Short-circuiting logical operation
    Logical {
        left: Box<Expression>,
        op: LogicalOp,
        right: Box<Expression>,
    },
    /// Negation
    Not(Box<Expression>),
    /// True iff the path resolves to a present value
    Exists(String),
}

/// Comparison operators
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

/// Logical operators
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    Comparison(ComparisonOp),
    Logical(LogicalOp),
    Not,
    LeftParen,
    RightParen,
}

/// Parse an expression string into a tree
pub fn parse_expression(input: &str) -> Result<Expression> {
    let tokens = tokenize(input)?;
    let mut cursor = Cursor { tokens, pos: 0 };
    let expr = parse_logical_or(&mut cursor)?;
    if let Some(tok) = cursor.peek() {
        bail!("Unexpected trailing token in expression: {:?}", tok);
    }
    Ok(expr)
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '$' => {
                chars.next();
                if chars.next() != Some('{') {
                    bail!("Expected '{{' after '$'");
                }
                let path = consume_until(&mut chars, '}')?;
                tokens.push(Token::Path(path.trim().to_string()));
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                tokens.push(Token::String(consume_until(&mut chars, quote)?));
            }
            '(' => {
                chars.next();
                tokens.push(Token::LeftParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RightParen);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Comparison(ComparisonOp::NotEqual));
                } else {
                    tokens.push(Token::Not);
                }
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    bail!("Expected '==' for equality comparison");
                }
                tokens.push(Token::Comparison(ComparisonOp::Equal));
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Comparison(ComparisonOp::GreaterThanOrEqual));
                } else {
                    tokens.push(Token::Comparison(ComparisonOp::GreaterThan));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Comparison(ComparisonOp::LessThanOrEqual));
                } else {
                    tokens.push(Token::Comparison(ComparisonOp::LessThan));
                }
            }
            '&' => {
                chars.next();
                if chars.next() != Some('&') {
                    bail!("Expected '&&' for logical AND");
                }
                tokens.push(Token::Logical(LogicalOp::And));
            }
            '|' => {
                chars.next();
                if chars.next() != Some('|') {
                    bail!("Expected '||' for logical OR");
                }
                tokens.push(Token::Logical(LogicalOp::Or));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let text = consume_number(&mut chars)?;
                let num = text
                    .parse::<f64>()
                    .map_err(|_| anyhow!("Invalid number: {}", text))?;
                tokens.push(Token::Number(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let word = consume_path(&mut chars);
                match word.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    "null" => tokens.push(Token::Null),
                    _ => tokens.push(Token::Path(word)),
                }
            }
            _ => bail!("Unexpected character in expression: '{}'", ch),
        }
    }

    Ok(tokens)
}

fn consume_until(chars: &mut std::iter::Peekable<std::str::Chars>, delimiter: char) -> Result<String> {
    let mut result = String::new();
    for ch in chars.by_ref() {
        if ch == delimiter {
            return Ok(result);
        }
        result.push(ch);
    }
    bail!("Expected '{}' but reached end of input", delimiter)
}

fn consume_number(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<String> {
    let mut result = String::new();
    if chars.peek() == Some(&'-') {
        result.push(chars.next().unwrap());
    }
    let mut has_dot = false;
    while let Some(&ch) = chars.peek() {
        if ch.is_ascii_digit() {
            result.push(chars.next().unwrap());
        } else if ch == '.' && !has_dot {
            has_dot = true;
            result.push(chars.next().unwrap());
        } else {
            break;
        }
    }
    if result.is_empty() || result == "-" {
        bail!("Invalid number in expression");
    }
    Ok(result)
}

/// Consume a dotted variable path (array indexing included)
fn consume_path(chars: &mut std::iter::Peekable<std::str::Chars>) -> String {
    let mut result = String::new();
    while let Some(&ch) = chars.peek() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '[' | ']') {
            result.push(chars.next().unwrap());
        } else {
            break;
        }
    }
    result
}

struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }
}

fn parse_logical_or(cursor: &mut Cursor) -> Result<Expression> {
    let mut left = parse_logical_and(cursor)?;
    while matches!(cursor.peek(), Some(Token::Logical(LogicalOp::Or))) {
        cursor.advance();
        let right = parse_logical_and(cursor)?;
        left = Expression::Logical {
            left: Box::new(left),
            op: LogicalOp::Or,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_logical_and(cursor: &mut Cursor) -> Result<Expression> {
    let mut left = parse_comparison(cursor)?;
    while matches!(cursor.peek(), Some(Token::Logical(LogicalOp::And))) {
        cursor.advance();
        let right = parse_comparison(cursor)?;
        left = Expression::Logical {
            left: Box::new(left),
            op: LogicalOp::And,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_comparison(cursor: &mut Cursor) -> Result<Expression> {
    let left = parse_unary(cursor)?;
    if let Some(Token::Comparison(op)) = cursor.peek() {
        let op = op.clone();
        cursor.advance();
        let right = parse_unary(cursor)?;
        return Ok(Expression::Comparison {
            left: Box::new(left),
            op,
            right: Box::new(right),
        });
    }
    Ok(left)
}

fn parse_unary(cursor: &mut Cursor) -> Result<Expression> {
    match cursor.advance() {
        Some(Token::Not) => Ok(Expression::Not(Box::new(parse_unary(cursor)?))),
        Some(Token::LeftParen) => {
            let inner = parse_logical_or(cursor)?;
            match cursor.advance() {
                Some(Token::RightParen) => Ok(inner),
                _ => bail!("Expected closing parenthesis"),
            }
        }
        Some(Token::Path(name)) => {
            // exists(path) function form
            if name == "exists" && matches!(cursor.peek(), Some(Token::LeftParen)) {
                cursor.advance();
                let inner = match cursor.advance() {
                    Some(Token::Path(path)) => path,
                    _ => bail!("exists() takes a variable path"),
                };
                match cursor.advance() {
                    Some(Token::RightParen) => {}
                    _ => bail!("Expected ')' after exists(..)"),
                }
                return Ok(Expression::Exists(inner));
            }
            // path.exists suffix form
            if let Some(base) = name.strip_suffix(".exists") {
                return Ok(Expression::Exists(base.to_string()));
            }
            Ok(Expression::Variable(name))
        }
        Some(Token::String(s)) => Ok(Expression::Literal(Value::String(s))),
        Some(Token::Number(n)) => Ok(Expression::Literal(Value::Number(n))),
        Some(Token::Bool(b)) => Ok(Expression::Literal(Value::Bool(b))),
        Some(Token::Null) => Ok(Expression::Literal(Value::Null)),
        Some(tok) => bail!("Unexpected token in expression: {:?}", tok),
        None => bail!("Unexpected end of expression"),
    }
}
