use crate::value::Value;
use std::fmt;
use strum_macros::Display;

#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq, Display)]
#[strum(serialize_all = "shouty_snake_case")]
pub enum TokenType {
    // Single-character tokens.
    LeftParen, RightParen, LeftBrace, RightBrace,
    Comma, Dot, Minus, Plus, Semicolon, Slash, Star, Percent,

    // One or two character tokens.
    Bang, BangEqual,
    Equal, EqualEqual,
    Greater, GreaterEqual,
    Less, LessEqual,

    // Literals.
    Identifier(String), String(String), Number(f64),

    // Keywords.
    And, Break, Else, False, Fun, For, If, Nil, Or,
    Return, True, Var, While,

    EOF
}

impl TokenType {
    /// Same category, ignoring any literal payload.
    pub fn same_kind(&self, other: &TokenType) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tokentype: TokenType,
    pub lexeme: String,
    pub line: usize,
}

impl Token {
    pub fn new(tokentype: TokenType, lexeme: &str, line: usize) -> Token {
        Token {
            tokentype,
            lexeme: lexeme.to_string(),
            line,
        }
    }

    /// The value scanned out of a number or string literal.
    pub fn literal(&self) -> Option<Value> {
        match &self.tokentype {
            TokenType::Number(x) => Some(Value::Number(*x)),
            TokenType::String(x) => Some(Value::String(x.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.literal() {
            Some(literal) => write!(f, "{} {} {}", self.tokentype, self.lexeme, literal),
            None => write!(f, "{} {} null", self.tokentype, self.lexeme),
        }
    }
}
