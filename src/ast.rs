use crate::token::Token;
use crate::value::Value;
use std::fmt;
use std::fmt::Formatter;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum Expression {
    Binary {
        left: Box<Expression>,
        operator: Token,
        right: Box<Expression>,
    },
    Grouping(Box<Expression>),
    Literal(Value),
    Logical {
        left: Box<Expression>,
        operator: Token,
        right: Box<Expression>,
    },
    Unary {
        operator: Token,
        right: Box<Expression>,
    },
    Variable(Token),
    Assign {
        name: Token,
        value: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        paren: Token,
        arguments: Vec<Expression>,
    },
}

/// A function declaration. Shared between the statement tree and every
/// closure created from it.
#[derive(Debug)]
pub struct FunctionDecl {
    pub name: Token,
    pub params: Vec<Token>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Print {
        keyword: Token,
        value: Expression,
    },
    Expression(Expression),
    Var {
        name: Token,
        initializer: Option<Expression>,
    },
    Block(Vec<Statement>),
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    Break(Token),
    Function(Rc<FunctionDecl>),
    Return {
        keyword: Token,
        value: Option<Expression>,
    },
}

fn parenthesize(f: &mut Formatter<'_>, name: &str, args: &[&Expression]) -> fmt::Result {
    write!(f, "({}", name)?;
    for arg in args {
        write!(f, " {}", arg)?;
    }
    write!(f, ")")
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Binary {
                left,
                operator,
                right,
            }
            | Expression::Logical {
                left,
                operator,
                right,
            } => parenthesize(f, &operator.lexeme, &[&**left, &**right]),
            Expression::Grouping(x) => parenthesize(f, "group", &[&**x]),
            Expression::Literal(Value::String(x)) => write!(f, "\"{}\"", x),
            Expression::Literal(x) => write!(f, "{}", x),
            Expression::Unary { operator, right } => parenthesize(f, &operator.lexeme, &[&**right]),
            Expression::Variable(x) => write!(f, "{}", x.lexeme),
            Expression::Assign { name, value } => write!(f, "(assign {} {})", name.lexeme, value),
            Expression::Call {
                callee, arguments, ..
            } => {
                write!(f, "(call {}", callee)?;
                for arg in arguments {
                    write!(f, " {}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}
