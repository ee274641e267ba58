pub mod ast;
pub mod callable;
pub mod environment;
pub mod interpreter;
pub mod parser;
pub mod scanner;
pub mod token;
pub mod value;

use crate::interpreter::{Interpreter, RuntimeError};
use crate::parser::ParseError;
use crate::scanner::ScanError;
use std::fmt;
use thiserror::Error;

/// A problem found before evaluation started.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyntaxError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl SyntaxError {
    pub fn line(&self) -> usize {
        match self {
            SyntaxError::Scan(e) => e.line,
            SyntaxError::Parse(e) => e.line(),
        }
    }
    pub fn message(&self) -> &str {
        match self {
            SyntaxError::Scan(e) => &e.message,
            SyntaxError::Parse(e) => &e.message,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoxError {
    #[error("{}", Lines(.0))]
    Syntax(Vec<SyntaxError>),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

struct Lines<'a>(&'a [SyntaxError]);

impl<'a> fmt::Display for Lines<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

/// Scans, parses and evaluates `source` against `interpreter`'s globals.
/// Nothing is evaluated if scanning or parsing recorded any error.
pub fn run(source: &str, interpreter: &mut Interpreter) -> Result<(), LoxError> {
    let (tokens, scan_errors) = scanner::scan_tokens(source);
    let parsed = parser::parse(&tokens);

    let mut errors: Vec<SyntaxError> = scan_errors.into_iter().map(SyntaxError::from).collect();
    let statements = match parsed {
        Ok(statements) => statements,
        Err(parse_errors) => {
            errors.extend(parse_errors.into_iter().map(SyntaxError::from));
            Vec::new()
        }
    };
    if !errors.is_empty() {
        errors.sort_by_key(SyntaxError::line);
        return Err(LoxError::Syntax(errors));
    }

    interpreter.interpret(&statements)?;
    Ok(())
}
