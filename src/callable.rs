use crate::ast::FunctionDecl;
use crate::environment::Environment;
use crate::interpreter::{Flow, Interpreter, RuntimeError};
use crate::token::Token;
use crate::value::Value;
use std::fmt;
use std::fmt::Debug;
use std::rc::Rc;
use tracing::trace;

/// A user-defined function: the declaration plus the scope it closed over.
#[derive(Clone)]
pub struct LoxFunction {
    declaration: Rc<FunctionDecl>,
    closure: Environment,
}

impl fmt::Display for LoxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.name().lexeme)
    }
}

impl Debug for LoxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl LoxFunction {
    pub fn new(declaration: Rc<FunctionDecl>, closure: Environment) -> LoxFunction {
        LoxFunction {
            declaration,
            closure,
        }
    }
    pub fn call(
        &self,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let environment = self.closure.new_child();
        for (param, value) in self.declaration.params.iter().zip(arguments) {
            environment.define(&param.lexeme, value);
        }
        match interpreter.execute_block(&self.declaration.body, environment)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal | Flow::Break => Ok(Value::Nil),
        }
    }
    pub fn arity(&self) -> usize {
        self.declaration.params.len()
    }
    pub fn name(&self) -> &Token {
        &self.declaration.name
    }
    /// Identity, not structure: two closures over the same declaration are
    /// still different functions.
    pub fn equals(&self, other: &LoxFunction) -> bool {
        Rc::ptr_eq(&self.declaration, &other.declaration) && self.closure.equals(&other.closure)
    }
}

pub type NativeFn = fn(&mut Interpreter, &[Value]) -> Result<Value, String>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub call: NativeFn,
}

impl Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

impl fmt::Display for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn>")
    }
}

#[derive(Clone, Debug)]
pub enum Callable {
    Function(LoxFunction),
    Native(NativeFunction),
}

impl Callable {
    pub fn arity(&self) -> usize {
        match self {
            Callable::Function(x) => x.arity(),
            Callable::Native(x) => x.arity,
        }
    }
    /// Invokes the callable. `paren` locates any error raised by a native.
    pub fn call(
        &self,
        interpreter: &mut Interpreter,
        paren: &Token,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        trace!(callee = %self, args = arguments.len(), "call");
        match self {
            Callable::Function(x) => x.call(interpreter, arguments),
            Callable::Native(x) => {
                (x.call)(interpreter, &arguments).map_err(|e| RuntimeError::new(paren, &e))
            }
        }
    }
    pub fn equals(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Function(l), Callable::Function(r)) => l.equals(r),
            (Callable::Native(l), Callable::Native(r)) => l.name == r.name,
            _ => false,
        }
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Function(x) => write!(f, "{}", x),
            Callable::Native(x) => write!(f, "{}", x),
        }
    }
}
