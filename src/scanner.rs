use crate::token::{Token, TokenType};
use phf::phf_map;
use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("[line {line}] Error: {message}")]
pub struct ScanError {
    pub line: usize,
    pub message: String,
}

struct Scanner<'a> {
    source: &'a str,
    iter: Peekable<CharIndices<'a>>,
    start: usize,
    line: usize,
    errors: Vec<ScanError>,
}

/// Scans the whole source eagerly. The token list always ends with EOF,
/// even when errors were recorded.
#[tracing::instrument(level = "debug", skip_all, fields(len = source.len()))]
pub fn scan_tokens(source: &str) -> (Vec<Token>, Vec<ScanError>) {
    let mut scanner = Scanner {
        source,
        iter: source.char_indices().peekable(),
        start: 0,
        line: 1,
        errors: Vec::new(),
    };
    let mut tokens: Vec<Token> = Vec::new();

    while let Some((idx, _)) = scanner.iter.peek() {
        scanner.start = *idx;
        if let Some(token) = scanner.scan_token() {
            trace!(%token, "scanned");
            tokens.push(token);
        }
    }
    tokens.push(Token::new(TokenType::EOF, "", scanner.line));
    debug!(
        tokens = tokens.len(),
        errors = scanner.errors.len(),
        "scan finished"
    );
    (tokens, scanner.errors)
}

impl<'a> Scanner<'a> {
    fn scan_token(&mut self) -> Option<Token> {
        let (_, c) = self.iter.next()?;
        match c {
            '(' => Some(self.token(TokenType::LeftParen)),
            ')' => Some(self.token(TokenType::RightParen)),
            '{' => Some(self.token(TokenType::LeftBrace)),
            '}' => Some(self.token(TokenType::RightBrace)),
            ',' => Some(self.token(TokenType::Comma)),
            '.' => Some(self.token(TokenType::Dot)),
            '-' => Some(self.token(TokenType::Minus)),
            '+' => Some(self.token(TokenType::Plus)),
            ';' => Some(self.token(TokenType::Semicolon)),
            '*' => Some(self.token(TokenType::Star)),
            '%' => Some(self.token(TokenType::Percent)),
            '!' => Some(self.either('=', TokenType::BangEqual, TokenType::Bang)),
            '=' => Some(self.either('=', TokenType::EqualEqual, TokenType::Equal)),
            '<' => Some(self.either('=', TokenType::LessEqual, TokenType::Less)),
            '>' => Some(self.either('=', TokenType::GreaterEqual, TokenType::Greater)),
            '/' => {
                if self.next_if('/') {
                    while let Some((_, c)) = self.iter.peek() {
                        if *c == '\n' {
                            break;
                        }
                        self.iter.next();
                    }
                    None
                } else {
                    Some(self.token(TokenType::Slash))
                }
            }
            ' ' | '\r' | '\t' => None,
            '\n' => {
                self.line += 1;
                None
            }
            '"' => self.string(),
            '0'..='9' => self.number(),
            'a'..='z' | 'A'..='Z' | '_' => Some(self.identifier()),
            _ => {
                self.error("Unexpected character.");
                None
            }
        }
    }
    fn current(&mut self) -> usize {
        match self.iter.peek() {
            None => self.source.len(),
            Some((idx, _)) => *idx,
        }
    }
    fn token(&mut self, token_type: TokenType) -> Token {
        let current = self.current();
        Token::new(token_type, &self.source[self.start..current], self.line)
    }
    fn either(&mut self, expected: char, matched: TokenType, otherwise: TokenType) -> Token {
        if self.next_if(expected) {
            self.token(matched)
        } else {
            self.token(otherwise)
        }
    }
    fn next_if(&mut self, expected: char) -> bool {
        self.iter.next_if(|(_, c)| *c == expected).is_some()
    }
    fn error(&mut self, message: &str) {
        debug!(line = self.line, reason = message, "scan error");
        self.errors.push(ScanError {
            line: self.line,
            message: message.to_string(),
        });
    }
    fn string(&mut self) -> Option<Token> {
        while let Some((_, c)) = self.iter.peek() {
            match c {
                '"' => {
                    break;
                }
                '\n' => {
                    self.line += 1;
                    self.iter.next();
                }
                _ => {
                    self.iter.next();
                }
            }
        }
        if self.iter.next().is_none() {
            self.error("Unterminated string.");
            return None;
        }
        let current = self.current();
        let contents = self.source[self.start + 1..current - 1].to_string();
        Some(self.token(TokenType::String(contents)))
    }
    fn digits(&mut self) {
        while self.iter.next_if(|(_, c)| c.is_ascii_digit()).is_some() {}
    }
    fn number(&mut self) -> Option<Token> {
        self.digits();

        // A '.' only belongs to the number when a digit follows it.
        if let Some((_, '.')) = self.iter.peek() {
            let mut lookahead = self.iter.clone();
            lookahead.next();
            if let Some((_, c)) = lookahead.peek() {
                if c.is_ascii_digit() {
                    self.iter.next();
                    self.digits();
                }
            }
        }

        let current = self.current();
        match self.source[self.start..current].parse() {
            Ok(x) => Some(self.token(TokenType::Number(x))),
            Err(_) => {
                self.error("Invalid number literal.");
                None
            }
        }
    }
    fn identifier(&mut self) -> Token {
        while self
            .iter
            .next_if(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
            .is_some()
        {}
        let current = self.current();
        let source = self.source;
        let text = &source[self.start..current];
        match KEYWORDS.get(text) {
            None => self.token(TokenType::Identifier(text.to_string())),
            Some(x) => self.token(x.clone()),
        }
    }
}

static KEYWORDS: phf::Map<&'static str, TokenType> = phf_map! {
    "and" => TokenType::And,
    "break" => TokenType::Break,
    "else" => TokenType::Else,
    "false" => TokenType::False,
    "for" => TokenType::For,
    "fun" => TokenType::Fun,
    "if" => TokenType::If,
    "nil" => TokenType::Nil,
    "or" => TokenType::Or,
    "return" => TokenType::Return,
    "true" => TokenType::True,
    "var" => TokenType::Var,
    "while" => TokenType::While,
};

#[cfg(test)]
mod scanner_tests {
    use crate::scanner;
    use crate::token::TokenType;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenType> {
        let (tokens, errors) = scanner::scan_tokens(source);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        tokens.into_iter().map(|t| t.tokentype).collect()
    }

    #[test]
    fn basic_scanner_test() {
        let (tokens, errors) = scanner::scan_tokens("x = 2");
        assert!(errors.is_empty());
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0].tokentype, TokenType::Identifier("x".to_string()));
        assert_eq!(tokens[1].tokentype, TokenType::Equal);
        assert_eq!(tokens[2].tokentype, TokenType::Number(2.0));
        assert_eq!(tokens[3].tokentype, TokenType::EOF);
    }

    #[test]
    fn number_parsing() {
        assert_eq!(
            kinds("1+2.5"),
            vec![
                TokenType::Number(1.0),
                TokenType::Plus,
                TokenType::Number(2.5),
                TokenType::EOF
            ]
        );
    }

    #[test]
    fn trailing_and_leading_dots_are_not_part_of_numbers() {
        assert_eq!(
            kinds("1. .5"),
            vec![
                TokenType::Number(1.0),
                TokenType::Dot,
                TokenType::Dot,
                TokenType::Number(5.0),
                TokenType::EOF
            ]
        );
    }

    #[test]
    fn two_character_operators() {
        assert_eq!(
            kinds("! != = == < <= > >= %"),
            vec![
                TokenType::Bang,
                TokenType::BangEqual,
                TokenType::Equal,
                TokenType::EqualEqual,
                TokenType::Less,
                TokenType::LessEqual,
                TokenType::Greater,
                TokenType::GreaterEqual,
                TokenType::Percent,
                TokenType::EOF
            ]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("var breaker break fun_ print"),
            vec![
                TokenType::Var,
                TokenType::Identifier("breaker".to_string()),
                TokenType::Break,
                TokenType::Identifier("fun_".to_string()),
                TokenType::Identifier("print".to_string()),
                TokenType::EOF
            ]
        );
    }

    #[test]
    fn comments_and_lines() {
        let (tokens, errors) = scanner::scan_tokens("a // comment\n\"two\nlines\" b\n");
        assert!(errors.is_empty());
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].tokentype, TokenType::String("two\nlines".to_string()));
        assert_eq!(tokens[1].line, 3);
        assert_eq!(tokens[2].line, 3);
        assert_eq!(tokens[3].tokentype, TokenType::EOF);
        assert_eq!(tokens[3].line, 4);
    }

    #[test]
    fn errors_accumulate() {
        let (tokens, errors) = scanner::scan_tokens("a @ b\n# c \"open");
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].line, 1);
        assert_eq!(errors[0].message, "Unexpected character.");
        assert_eq!(errors[1].line, 2);
        assert_eq!(errors[2].message, "Unterminated string.");
        assert_eq!(errors[2].to_string(), "[line 2] Error: Unterminated string.");
        let names: Vec<&str> = tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", ""]);
    }

    #[test]
    fn lexemes_round_trip() {
        let source = "fun add(a, b) { return a + b * 2.5; } // done\nprint add(1, \"x\") >= !nil;";
        let (tokens, errors) = scanner::scan_tokens(source);
        assert!(errors.is_empty());
        let joined = tokens
            .iter()
            .map(|t| t.lexeme.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let (again, errors) = scanner::scan_tokens(&joined);
        assert!(errors.is_empty());
        let view = |ts: &Vec<crate::token::Token>| {
            ts.iter()
                .map(|t| (t.tokentype.clone(), t.lexeme.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(view(&tokens), view(&again));
    }
}
