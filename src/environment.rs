use crate::interpreter::RuntimeError;
use crate::token::Token;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A handle to one scope in the chain. Cloning the handle shares the scope;
/// it lives as long as any closure or call frame still holds it.
#[derive(Clone)]
pub struct Environment {
    scope: Rc<Scope>,
}

struct Scope {
    // `None` marks a variable declared without an initializer.
    values: RefCell<BTreeMap<String, Option<Value>>>,
    enclosing: Option<Environment>,
}

impl fmt::Debug for Environment {
    // Closures make the chain cyclic, so only the local names are shown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("names", &self.scope.values.borrow().keys().collect::<Vec<_>>())
            .field("depth", &self.depth())
            .finish()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

impl Environment {
    pub fn new() -> Environment {
        Environment {
            scope: Rc::new(Scope {
                values: RefCell::new(BTreeMap::new()),
                enclosing: None,
            }),
        }
    }
    pub fn new_child(&self) -> Environment {
        Environment {
            scope: Rc::new(Scope {
                values: RefCell::new(BTreeMap::new()),
                enclosing: Some(self.clone()),
            }),
        }
    }
    pub fn enclosing(&self) -> Option<Environment> {
        self.scope.enclosing.clone()
    }
    /// Binds `name` in this scope only, shadowing any outer binding.
    pub fn define(&self, name: &str, value: Value) {
        self.scope
            .values
            .borrow_mut()
            .insert(name.to_string(), Some(value));
    }
    /// Binds `name` in this scope without a value. Reading it before an
    /// assignment is an error.
    pub fn declare(&self, name: &str) {
        self.scope.values.borrow_mut().insert(name.to_string(), None);
    }
    pub fn get(&self, token: &Token) -> Result<Value, RuntimeError> {
        let mut cur = Some(self);
        while let Some(env) = cur {
            if let Some(slot) = env.scope.values.borrow().get(&token.lexeme) {
                return slot.clone().ok_or_else(|| {
                    RuntimeError::new(
                        token,
                        &format!(
                            "Variable '{}' has not been properly initialized.",
                            token.lexeme
                        ),
                    )
                });
            }
            cur = env.scope.enclosing.as_ref();
        }
        Err(undefined(token))
    }
    pub fn assign(&self, token: &Token, value: Value) -> Result<(), RuntimeError> {
        let mut cur = Some(self);
        while let Some(env) = cur {
            if let Some(slot) = env.scope.values.borrow_mut().get_mut(&token.lexeme) {
                *slot = Some(value);
                return Ok(());
            }
            cur = env.scope.enclosing.as_ref();
        }
        Err(undefined(token))
    }
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cur = self.scope.enclosing.as_ref();
        while let Some(env) = cur {
            depth += 1;
            cur = env.scope.enclosing.as_ref();
        }
        depth
    }
    pub fn equals(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.scope, &other.scope)
    }
}

fn undefined(token: &Token) -> RuntimeError {
    RuntimeError::new(token, &format!("Undefined variable '{}'.", token.lexeme))
}
