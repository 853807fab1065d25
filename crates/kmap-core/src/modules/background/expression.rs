//! Arithmetic background expressions over the momentum coordinates.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! sum     := product (('+' | '-') product)*
//! product := unary (('*' | '/') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary (('^' | '**') unary)?
//! primary := number | name | name '(' sum ')' | '(' sum ')'
//! ```
//!
//! Names resolve to the fixed variables `kx`, `ky`, `k` (radial momentum),
//! `axis` (value of the slicing axis), the constant `pi`, or one of the
//! declared parameters. Anything else is rejected at parse time.

use std::fmt::{Display, Formatter};

pub const RESERVED_NAMES: [&str; 11] = [
    "kx", "ky", "k", "axis", "pi", "exp", "log", "sqrt", "abs", "sin", "cos",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,
    #[error("unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { position: usize, character: char },
    #[error("invalid number '{text}' at position {position}")]
    InvalidNumber { position: usize, text: String },
    #[error("expected {expected} at position {position}, found {found}")]
    UnexpectedToken {
        position: usize,
        expected: &'static str,
        found: String,
    },
    #[error("unknown name '{name}' at position {position}")]
    UnknownName { position: usize, name: String },
    #[error("unknown function '{name}' at position {position}")]
    UnknownFunction { position: usize, name: String },
    #[error("parameter name '{name}' is reserved or not an identifier")]
    InvalidParameterName { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Exp,
    Log,
    Sqrt,
    Abs,
    Sin,
    Cos,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "exp" => Some(Self::Exp),
            "log" => Some(Self::Log),
            "sqrt" => Some(Self::Sqrt),
            "abs" => Some(Self::Abs),
            "sin" => Some(Self::Sin),
            "cos" => Some(Self::Cos),
            _ => None,
        }
    }

    fn apply(self, value: f64) -> f64 {
        match self {
            Self::Exp => value.exp(),
            Self::Log => value.ln(),
            Self::Sqrt => value.sqrt(),
            Self::Abs => value.abs(),
            Self::Sin => value.sin(),
            Self::Cos => value.cos(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variable {
    Kx,
    Ky,
    K,
    Axis,
    Parameter(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Variable(Variable),
    Negate(Box<Node>),
    Binary(Operator, Box<Node>, Box<Node>),
    Call(Function, Box<Node>),
}

/// Where the expression is evaluated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationPoint {
    pub kx: f64,
    pub ky: f64,
    pub axis: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    parameters: Vec<String>,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str, parameters: &[String]) -> Result<Self, ExpressionError> {
        for name in parameters {
            if !is_identifier(name) || RESERVED_NAMES.contains(&name.as_str()) {
                return Err(ExpressionError::InvalidParameterName { name: name.clone() });
            }
        }

        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }

        let mut parser = Parser {
            tokens: &tokens,
            cursor: 0,
            parameters,
            end: source.len(),
        };
        let root = parser.sum()?;
        if let Some(token) = parser.peek() {
            return Err(ExpressionError::UnexpectedToken {
                position: token.position,
                expected: "operator or end of expression",
                found: token.kind.to_string(),
            });
        }

        Ok(Self {
            source: source.to_string(),
            parameters: parameters.to_vec(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// `params` follows the order of [`Expression::parameters`].
    pub fn evaluate(&self, point: &EvaluationPoint, params: &[f64]) -> f64 {
        evaluate(&self.root, point, params)
    }

    pub fn uses_parameter(&self, index: usize) -> bool {
        references(&self.root, Variable::Parameter(index))
    }
}

fn evaluate(node: &Node, point: &EvaluationPoint, params: &[f64]) -> f64 {
    match node {
        Node::Number(value) => *value,
        Node::Variable(variable) => match variable {
            Variable::Kx => point.kx,
            Variable::Ky => point.ky,
            Variable::K => point.kx.hypot(point.ky),
            Variable::Axis => point.axis,
            Variable::Parameter(index) => params.get(*index).copied().unwrap_or(f64::NAN),
        },
        Node::Negate(inner) => -evaluate(inner, point, params),
        Node::Binary(operator, lhs, rhs) => {
            let lhs = evaluate(lhs, point, params);
            let rhs = evaluate(rhs, point, params);
            match operator {
                Operator::Add => lhs + rhs,
                Operator::Subtract => lhs - rhs,
                Operator::Multiply => lhs * rhs,
                Operator::Divide => lhs / rhs,
                Operator::Power => lhs.powf(rhs),
            }
        }
        Node::Call(function, argument) => function.apply(evaluate(argument, point, params)),
    }
}

fn references(node: &Node, target: Variable) -> bool {
    match node {
        Node::Number(_) => false,
        Node::Variable(variable) => *variable == target,
        Node::Negate(inner) | Node::Call(_, inner) => references(inner, target),
        Node::Binary(_, lhs, rhs) => references(lhs, target) || references(rhs, target),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Name(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LeftParen,
    RightParen,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(value) => write!(f, "number {value}"),
            Self::Name(name) => write!(f, "name '{name}'"),
            Self::Plus => f.write_str("'+'"),
            Self::Minus => f.write_str("'-'"),
            Self::Star => f.write_str("'*'"),
            Self::Slash => f.write_str("'/'"),
            Self::Caret => f.write_str("'^'"),
            Self::LeftParen => f.write_str("'('"),
            Self::RightParen => f.write_str("')'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut position = 0;

    while position < bytes.len() {
        let byte = bytes[position];
        let start = position;
        let kind = match byte {
            b' ' | b'\t' | b'\n' | b'\r' => {
                position += 1;
                continue;
            }
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' if bytes.get(position + 1) == Some(&b'*') => {
                position += 1;
                TokenKind::Caret
            }
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'^' => TokenKind::Caret,
            b'(' => TokenKind::LeftParen,
            b')' => TokenKind::RightParen,
            b'0'..=b'9' | b'.' => {
                position = scan_number(bytes, position);
                let text = &source[start..position];
                let value = text.parse::<f64>().map_err(|_| ExpressionError::InvalidNumber {
                    position: start,
                    text: text.to_string(),
                })?;
                tokens.push(Token {
                    kind: TokenKind::Number(value),
                    position: start,
                });
                continue;
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                while position < bytes.len()
                    && (bytes[position].is_ascii_alphanumeric() || bytes[position] == b'_')
                {
                    position += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Name(source[start..position].to_string()),
                    position: start,
                });
                continue;
            }
            _ => {
                let character = source[start..].chars().next().unwrap_or('?');
                return Err(ExpressionError::UnexpectedCharacter {
                    position: start,
                    character,
                });
            }
        };
        position += 1;
        tokens.push(Token {
            kind,
            position: start,
        });
    }

    Ok(tokens)
}

fn scan_number(bytes: &[u8], mut position: usize) -> usize {
    while position < bytes.len() && (bytes[position].is_ascii_digit() || bytes[position] == b'.') {
        position += 1;
    }
    if position < bytes.len() && matches!(bytes[position], b'e' | b'E') {
        let mut exponent = position + 1;
        if exponent < bytes.len() && matches!(bytes[exponent], b'+' | b'-') {
            exponent += 1;
        }
        if exponent < bytes.len() && bytes[exponent].is_ascii_digit() {
            position = exponent;
            while position < bytes.len() && bytes[position].is_ascii_digit() {
                position += 1;
            }
        }
    }
    position
}

struct Parser<'a> {
    tokens: &'a [Token],
    cursor: usize,
    parameters: &'a [String],
    end: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn next_if(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|token| &token.kind == kind) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &'static str) -> ExpressionError {
        match self.peek() {
            Some(token) => ExpressionError::UnexpectedToken {
                position: token.position,
                expected,
                found: token.kind.to_string(),
            },
            None => ExpressionError::UnexpectedToken {
                position: self.end,
                expected,
                found: "end of expression".to_string(),
            },
        }
    }

    fn sum(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.product()?;
        loop {
            let operator = if self.next_if(&TokenKind::Plus) {
                Operator::Add
            } else if self.next_if(&TokenKind::Minus) {
                Operator::Subtract
            } else {
                return Ok(node);
            };
            let rhs = self.product()?;
            node = Node::Binary(operator, Box::new(node), Box::new(rhs));
        }
    }

    fn product(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.unary()?;
        loop {
            let operator = if self.next_if(&TokenKind::Star) {
                Operator::Multiply
            } else if self.next_if(&TokenKind::Slash) {
                Operator::Divide
            } else {
                return Ok(node);
            };
            let rhs = self.unary()?;
            node = Node::Binary(operator, Box::new(node), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        if self.next_if(&TokenKind::Minus) {
            return Ok(Node::Negate(Box::new(self.unary()?)));
        }
        if self.next_if(&TokenKind::Plus) {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<Node, ExpressionError> {
        let base = self.primary()?;
        if self.next_if(&TokenKind::Caret) {
            let exponent = self.unary()?;
            return Ok(Node::Binary(
                Operator::Power,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("number, name or '('"));
        };

        match token.kind {
            TokenKind::Number(value) => {
                self.cursor += 1;
                Ok(Node::Number(value))
            }
            TokenKind::LeftParen => {
                self.cursor += 1;
                let inner = self.sum()?;
                if !self.next_if(&TokenKind::RightParen) {
                    return Err(self.unexpected("')'"));
                }
                Ok(inner)
            }
            TokenKind::Name(name) => {
                self.cursor += 1;
                if self.next_if(&TokenKind::LeftParen) {
                    let function = Function::from_name(&name).ok_or_else(|| {
                        ExpressionError::UnknownFunction {
                            position: token.position,
                            name: name.clone(),
                        }
                    })?;
                    let argument = self.sum()?;
                    if !self.next_if(&TokenKind::RightParen) {
                        return Err(self.unexpected("')'"));
                    }
                    return Ok(Node::Call(function, Box::new(argument)));
                }
                self.resolve(&name, token.position)
            }
            _ => Err(self.unexpected("number, name or '('")),
        }
    }

    fn resolve(&self, name: &str, position: usize) -> Result<Node, ExpressionError> {
        let variable = match name {
            "kx" => Variable::Kx,
            "ky" => Variable::Ky,
            "k" => Variable::K,
            "axis" => Variable::Axis,
            "pi" => return Ok(Node::Number(std::f64::consts::PI)),
            _ => match self.parameters.iter().position(|parameter| parameter == name) {
                Some(index) => Variable::Parameter(index),
                None => {
                    return Err(ExpressionError::UnknownName {
                        position,
                        name: name.to_string(),
                    });
                }
            },
        };
        Ok(Node::Variable(variable))
    }
}
