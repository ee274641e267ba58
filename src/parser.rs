use crate::ast::{Expression, FunctionDecl, Statement};
use crate::token::{Token, TokenType};
use crate::value::Value;
use std::rc::Rc;
use thiserror::Error;
use tracing::debug;

const MAX_ARGUMENTS: usize = 255;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("[line {}] Error{}: {}", .token.line, location(.token), .message)]
pub struct ParseError {
    pub token: Token,
    pub message: String,
}

impl ParseError {
    pub fn line(&self) -> usize {
        self.token.line
    }
}

fn location(token: &Token) -> String {
    match token.tokentype {
        TokenType::EOF => " at end".to_string(),
        _ => format!(" at '{}'", token.lexeme),
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// Parses a whole program, collecting every syntax error it can find.
#[tracing::instrument(level = "debug", skip_all, fields(tokens = tokens.len()))]
pub fn parse(tokens: &[Token]) -> Result<Vec<Statement>, Vec<ParseError>> {
    Parser::new(tokens).parse()
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    current: usize,
    loop_depth: usize,
    function_depth: usize,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Parser<'a> {
        Parser {
            tokens,
            current: 0,
            loop_depth: 0,
            function_depth: 0,
            errors: Vec::new(),
        }
    }
    pub fn parse(mut self) -> Result<Vec<Statement>, Vec<ParseError>> {
        let mut statements: Vec<Statement> = Vec::new();
        while !self.is_at_end() {
            match self.declaration() {
                Ok(statement) => statements.push(statement),
                Err(e) => {
                    self.report(e);
                    self.synchronize();
                }
            }
        }
        if self.errors.is_empty() {
            Ok(statements)
        } else {
            // Reported out of order when a non-fatal error was recorded
            // while the enclosing rule was still being parsed.
            self.errors.sort_by_key(|e| e.token.line);
            Err(self.errors)
        }
    }
    fn declaration(&mut self) -> ParseResult<Statement> {
        match self.peek().tokentype {
            TokenType::Var => {
                self.advance();
                self.var_declaration()
            }
            TokenType::Fun => {
                self.advance();
                self.function()
            }
            _ => self.statement(),
        }
    }
    fn var_declaration(&mut self) -> ParseResult<Statement> {
        let name = self.consume_identifier("Expect variable name.")?;
        let initializer = match self.peek().tokentype {
            TokenType::Equal => {
                self.advance();
                Some(self.expression()?)
            }
            _ => None,
        };
        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.")?;
        Ok(Statement::Var {
            name: name.clone(),
            initializer,
        })
    }
    fn function(&mut self) -> ParseResult<Statement> {
        let name = self.consume_identifier("Expect function name.")?;
        self.consume(TokenType::LeftParen, "Expect '(' after function name.")?;
        let mut params: Vec<Token> = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                if params.len() >= MAX_ARGUMENTS {
                    let e = self.error(self.peek(), "Can't have more than 255 parameters.");
                    self.report(e);
                }
                params.push(self.consume_identifier("Expect parameter name.")?.clone());
                if !self.next_if(&TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.")?;
        self.consume(TokenType::LeftBrace, "Expect '{' before function body.")?;

        // A function body starts outside of any loop.
        let enclosing_loops = self.loop_depth;
        self.loop_depth = 0;
        self.function_depth += 1;
        let body = self.block_statements();
        self.function_depth -= 1;
        self.loop_depth = enclosing_loops;

        Ok(Statement::Function(Rc::new(FunctionDecl {
            name: name.clone(),
            params,
            body: body?,
        })))
    }
    fn statement(&mut self) -> ParseResult<Statement> {
        match &self.peek().tokentype {
            TokenType::If => {
                self.advance();
                self.if_statement()
            }
            TokenType::Identifier(name) if name == "print" && self.starts_print_statement() => {
                self.advance();
                self.print_statement()
            }
            TokenType::LeftBrace => {
                self.advance();
                Ok(Statement::Block(self.block_statements()?))
            }
            TokenType::While => {
                self.advance();
                self.while_statement()
            }
            TokenType::For => {
                self.advance();
                self.for_statement()
            }
            TokenType::Break => {
                self.advance();
                self.break_statement()
            }
            TokenType::Return => {
                self.advance();
                self.return_statement()
            }
            _ => self.expression_statement(),
        }
    }
    /// `print` is an ordinary name bound to the native function, except at
    /// the start of a statement where it is directly followed by an operand.
    /// `print(...)` is a call only when the statement ends right after the
    /// closing paren.
    fn starts_print_statement(&self) -> bool {
        match self.tokens.get(self.current + 1).map(|t| &t.tokentype) {
            Some(TokenType::Number(_))
            | Some(TokenType::String(_))
            | Some(TokenType::Identifier(_))
            | Some(TokenType::True)
            | Some(TokenType::False)
            | Some(TokenType::Nil)
            | Some(TokenType::Minus)
            | Some(TokenType::Bang) => true,
            Some(TokenType::LeftParen) => match self.matching_paren(self.current + 1) {
                Some(close) => !matches!(
                    self.tokens.get(close + 1).map(|t| &t.tokentype),
                    Some(TokenType::Semicolon)
                ),
                None => false,
            },
            _ => false,
        }
    }
    fn matching_paren(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (idx, token) in self.tokens.iter().enumerate().skip(open) {
            match token.tokentype {
                TokenType::LeftParen => depth += 1,
                TokenType::RightParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(idx);
                    }
                }
                TokenType::Semicolon | TokenType::EOF => return None,
                _ => (),
            }
        }
        None
    }
    fn for_statement(&mut self) -> ParseResult<Statement> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.")?;
        let initializer: Option<Statement> = match self.peek().tokentype {
            TokenType::Semicolon => {
                self.advance();
                None
            }
            TokenType::Var => {
                self.advance();
                Some(self.var_declaration()?)
            }
            _ => Some(self.expression_statement()?),
        };

        let condition = match self.peek().tokentype {
            TokenType::Semicolon => Expression::Literal(Value::Boolean(true)),
            _ => self.expression()?,
        };
        self.consume(TokenType::Semicolon, "Expect ';' after loop condition.")?;

        let increment: Option<Expression> = match self.peek().tokentype {
            TokenType::RightParen => None,
            _ => Some(self.expression()?),
        };
        self.consume(TokenType::RightParen, "Expect ')' after for clauses.")?;

        let mut body = self.loop_body()?;

        if let Some(x) = increment {
            body = Statement::Block(vec![body, Statement::Expression(x)])
        }
        body = Statement::While {
            condition,
            body: Box::new(body),
        };
        match initializer {
            None => Ok(body),
            Some(x) => Ok(Statement::Block(vec![x, body])),
        }
    }
    fn while_statement(&mut self) -> ParseResult<Statement> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after condition.")?;
        let body = self.loop_body()?;
        Ok(Statement::While {
            condition,
            body: Box::new(body),
        })
    }
    fn loop_body(&mut self) -> ParseResult<Statement> {
        self.loop_depth += 1;
        let body = self.statement();
        self.loop_depth -= 1;
        body
    }
    fn if_statement(&mut self) -> ParseResult<Statement> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after if condition.")?;
        let then_branch = self.statement()?;
        let else_branch = if self.next_if(&TokenType::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Statement::If {
            condition,
            then_branch: Box::new(then_branch),
            else_branch,
        })
    }
    fn break_statement(&mut self) -> ParseResult<Statement> {
        let keyword = self.previous();
        if self.loop_depth == 0 {
            let e = self.error(keyword, "Can't use 'break' outside of a loop.");
            self.report(e);
        }
        self.consume(TokenType::Semicolon, "Expect ';' after 'break'.")?;
        Ok(Statement::Break(keyword.clone()))
    }
    fn return_statement(&mut self) -> ParseResult<Statement> {
        let keyword = self.previous();
        if self.function_depth == 0 {
            let e = self.error(keyword, "Can't return from top-level code.");
            self.report(e);
        }
        let value = match self.peek().tokentype {
            TokenType::Semicolon => None,
            _ => Some(self.expression()?),
        };
        self.consume(TokenType::Semicolon, "Expect ';' after return value.")?;
        Ok(Statement::Return {
            keyword: keyword.clone(),
            value,
        })
    }
    fn block_statements(&mut self) -> ParseResult<Vec<Statement>> {
        let mut statements: Vec<Statement> = Vec::new();
        while !self.is_at_end() && !self.check(&TokenType::RightBrace) {
            statements.push(self.declaration()?);
        }
        self.consume(TokenType::RightBrace, "Expect '}' after block.")?;
        Ok(statements)
    }
    fn print_statement(&mut self) -> ParseResult<Statement> {
        let keyword = self.previous();
        let value = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after value.")?;
        Ok(Statement::Print {
            keyword: keyword.clone(),
            value,
        })
    }
    fn expression_statement(&mut self) -> ParseResult<Statement> {
        let expr = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after expression.")?;
        Ok(Statement::Expression(expr))
    }
    fn expression(&mut self) -> ParseResult<Expression> {
        self.assignment()
    }
    fn assignment(&mut self) -> ParseResult<Expression> {
        let expr = self.or()?;
        match self.peek().tokentype {
            TokenType::Equal => {
                let equals = self.advance();
                let value = self.assignment()?;
                match expr {
                    Expression::Variable(name) => Ok(Expression::Assign {
                        name,
                        value: Box::new(value),
                    }),
                    _ => {
                        // Nothing to resynchronize: the tokens were well formed.
                        let e = self.error(equals, "Invalid assignment target.");
                        self.report(e);
                        Ok(expr)
                    }
                }
            }
            _ => Ok(expr),
        }
    }
    fn or(&mut self) -> ParseResult<Expression> {
        let mut expr = self.and()?;
        while let Some(operator) = self.match_any(&[TokenType::Or]) {
            let right = self.and()?;
            expr = Expression::Logical {
                left: Box::new(expr),
                operator: operator.clone(),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }
    fn and(&mut self) -> ParseResult<Expression> {
        let mut expr = self.equality()?;
        while let Some(operator) = self.match_any(&[TokenType::And]) {
            let right = self.equality()?;
            expr = Expression::Logical {
                left: Box::new(expr),
                operator: operator.clone(),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }
    fn equality(&mut self) -> ParseResult<Expression> {
        self.binary(
            &[TokenType::BangEqual, TokenType::EqualEqual],
            Parser::comparison,
        )
    }
    fn comparison(&mut self) -> ParseResult<Expression> {
        self.binary(
            &[
                TokenType::Greater,
                TokenType::GreaterEqual,
                TokenType::Less,
                TokenType::LessEqual,
            ],
            Parser::addition,
        )
    }
    fn addition(&mut self) -> ParseResult<Expression> {
        self.binary(&[TokenType::Minus, TokenType::Plus], Parser::multiplication)
    }
    fn multiplication(&mut self) -> ParseResult<Expression> {
        self.binary(
            &[TokenType::Slash, TokenType::Star, TokenType::Percent],
            Parser::unary,
        )
    }
    /// One left-associative precedence level.
    fn binary(
        &mut self,
        operators: &[TokenType],
        operand: fn(&mut Parser<'a>) -> ParseResult<Expression>,
    ) -> ParseResult<Expression> {
        let mut expr = operand(self)?;
        while let Some(operator) = self.match_any(operators) {
            let right = operand(self)?;
            expr = Expression::Binary {
                left: Box::new(expr),
                operator: operator.clone(),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }
    fn unary(&mut self) -> ParseResult<Expression> {
        match self.match_any(&[TokenType::Bang, TokenType::Minus]) {
            Some(operator) => {
                let right = self.unary()?;
                Ok(Expression::Unary {
                    operator: operator.clone(),
                    right: Box::new(right),
                })
            }
            None => self.call(),
        }
    }
    fn call(&mut self) -> ParseResult<Expression> {
        let mut expr = self.primary()?;
        while self.next_if(&TokenType::LeftParen) {
            expr = self.finish_call(expr)?;
        }
        Ok(expr)
    }
    fn finish_call(&mut self, callee: Expression) -> ParseResult<Expression> {
        let mut arguments: Vec<Expression> = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                if arguments.len() >= MAX_ARGUMENTS {
                    let e = self.error(self.peek(), "Can't have more than 255 arguments.");
                    self.report(e);
                }
                arguments.push(self.expression()?);
                if !self.next_if(&TokenType::Comma) {
                    break;
                }
            }
        }
        let paren = self.consume(TokenType::RightParen, "Expect ')' after arguments.")?;
        Ok(Expression::Call {
            callee: Box::new(callee),
            paren: paren.clone(),
            arguments,
        })
    }
    fn primary(&mut self) -> ParseResult<Expression> {
        let token = self.peek();
        let expr = match &token.tokentype {
            TokenType::False => Expression::Literal(Value::Boolean(false)),
            TokenType::True => Expression::Literal(Value::Boolean(true)),
            TokenType::Nil => Expression::Literal(Value::Nil),
            TokenType::Number(_) | TokenType::String(_) => {
                Expression::Literal(token.literal().unwrap_or(Value::Nil))
            }
            TokenType::Identifier(_) => Expression::Variable(token.clone()),
            TokenType::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.consume(TokenType::RightParen, "Expect ')' after expression.")?;
                return Ok(Expression::Grouping(Box::new(expr)));
            }
            _ => return Err(self.error(token, "Expect expression.")),
        };
        self.advance();
        Ok(expr)
    }
    fn synchronize(&mut self) {
        self.advance();
        while !self.is_at_end() {
            if let TokenType::Semicolon = self.previous().tokentype {
                return;
            }
            match &self.peek().tokentype {
                TokenType::Fun
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Break
                | TokenType::Return => return,
                TokenType::Identifier(name) if name == "print" => return,
                _ => (),
            }
            self.advance();
        }
        debug!(line = self.peek().line, "synchronized");
    }
    fn match_any(&mut self, types: &[TokenType]) -> Option<&'a Token> {
        if types.iter().any(|t| self.check(t)) {
            Some(self.advance())
        } else {
            None
        }
    }
    fn next_if(&mut self, tokentype: &TokenType) -> bool {
        self.match_any(std::slice::from_ref(tokentype)).is_some()
    }
    fn check(&self, tokentype: &TokenType) -> bool {
        !self.is_at_end() && self.peek().tokentype.same_kind(tokentype)
    }
    fn consume(&mut self, tokentype: TokenType, msg: &str) -> ParseResult<&'a Token> {
        if self.check(&tokentype) {
            Ok(self.advance())
        } else {
            Err(self.error(self.peek(), msg))
        }
    }
    fn consume_identifier(&mut self, msg: &str) -> ParseResult<&'a Token> {
        self.consume(TokenType::Identifier(String::new()), msg)
    }
    fn advance(&mut self) -> &'a Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }
    fn is_at_end(&self) -> bool {
        matches!(self.peek().tokentype, TokenType::EOF)
    }
    fn peek(&self) -> &'a Token {
        // The scanner always terminates the stream with EOF.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.current.min(last)]
    }
    fn previous(&self) -> &'a Token {
        &self.tokens[self.current.saturating_sub(1)]
    }
    fn error(&self, token: &Token, msg: &str) -> ParseError {
        ParseError {
            token: token.clone(),
            message: msg.to_string(),
        }
    }
    fn report(&mut self, error: ParseError) {
        debug!(%error, "parse error");
        self.errors.push(error);
    }
}
