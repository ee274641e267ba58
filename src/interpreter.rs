use crate::ast::{Expression, Statement};
use crate::callable::{Callable, LoxFunction, NativeFunction};
use crate::environment::Environment;
use crate::token::{Token, TokenType};
use crate::value::Value;
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, trace};

/// Deepest chain of calls a program may build before it is stopped.
const MAX_FRAMES: usize = 4096;

/// Grow the native stack when less than this remains.
const RED_ZONE: usize = 128 * 1024;

/// Size of each extra stack segment.
const STACK_GROWTH: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}\n[line {}]", .token.line)]
pub struct RuntimeError {
    pub token: Token,
    pub message: String,
}

impl RuntimeError {
    pub fn new(token: &Token, message: &str) -> RuntimeError {
        RuntimeError {
            token: token.clone(),
            message: message.to_string(),
        }
    }
}

/// How a statement finished. Anything other than `Normal` unwinds through
/// enclosing blocks until a loop or a call consumes it.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Break,
    Return(Value),
}

pub struct Interpreter {
    globals: Environment,
    environment: Environment,
    output: Box<dyn Write>,
    frames: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter::with_output(Box::new(io::stdout()))
    }
    /// An interpreter whose `print` output goes to `output`.
    pub fn with_output(output: Box<dyn Write>) -> Interpreter {
        let globals = Environment::new();
        for native in NATIVES {
            globals.define(native.name, Value::Callable(Callable::Native(native.clone())));
        }
        Interpreter {
            environment: globals.clone(),
            globals,
            output,
            frames: 0,
        }
    }
    pub fn globals(&self) -> &Environment {
        &self.globals
    }

    /// Runs a program. Stops at the first runtime error; bindings made before
    /// it stay in the global scope.
    #[tracing::instrument(level = "debug", skip_all, fields(statements = statements.len()))]
    pub fn interpret(&mut self, statements: &[Statement]) -> Result<(), RuntimeError> {
        for stmt in statements {
            // A stray top-level break or return has nothing to unwind to.
            if let Err(e) = self.execute(stmt) {
                debug!(error = %e, "runtime error");
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn execute(&mut self, stmt: &Statement) -> Result<Flow, RuntimeError> {
        match stmt {
            Statement::Print { keyword, value } => {
                let val = self.evaluate(value)?;
                self.write_line(&val)
                    .map_err(|e| RuntimeError::new(keyword, &e))?;
            }
            Statement::Expression(e) => {
                self.evaluate(e)?;
            }
            Statement::Var { name, initializer } => match initializer {
                Some(initializer) => {
                    let val = self.evaluate(initializer)?;
                    self.environment.define(&name.lexeme, val);
                }
                None => self.environment.declare(&name.lexeme),
            },
            Statement::Block(stmts) => {
                let child = self.environment.new_child();
                return self.execute_block(stmts, child);
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    return self.execute(then_branch);
                } else if let Some(else_branch) = else_branch {
                    return self.execute(else_branch);
                }
            }
            Statement::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute(body)? {
                        Flow::Normal => (),
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            Statement::Break(_) => return Ok(Flow::Break),
            Statement::Function(declaration) => {
                // Bound after capture, so the body can see its own name.
                let function = LoxFunction::new(declaration.clone(), self.environment.clone());
                self.environment.define(
                    &declaration.name.lexeme,
                    Value::Callable(Callable::Function(function)),
                );
            }
            Statement::Return { value, .. } => {
                let val = match value {
                    Some(value) => self.evaluate(value)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(val));
            }
        }
        Ok(Flow::Normal)
    }

    /// Runs `statements` with `environment` as the current scope, restoring
    /// the previous scope however the block exits.
    pub fn execute_block(
        &mut self,
        statements: &[Statement],
        environment: Environment,
    ) -> Result<Flow, RuntimeError> {
        trace!(depth = environment.depth(), "enter block");
        let previous = std::mem::replace(&mut self.environment, environment);
        let mut result = Ok(Flow::Normal);
        for stmt in statements {
            result = self.execute(stmt);
            match result {
                Ok(Flow::Normal) => (),
                _ => break,
            }
        }
        self.environment = previous;
        result
    }

    pub fn evaluate(&mut self, expr: &Expression) -> Result<Value, RuntimeError> {
        stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || self.evaluate_expr(expr))
    }

    fn evaluate_expr(&mut self, expr: &Expression) -> Result<Value, RuntimeError> {
        match expr {
            Expression::Literal(x) => Ok(x.clone()),
            Expression::Grouping(x) => self.evaluate(x),
            Expression::Unary { operator, right } => {
                let rv = self.evaluate(right)?;
                match operator.tokentype {
                    TokenType::Minus => match rv {
                        Value::Number(r) => Ok(Value::Number(-r)),
                        _ => Err(RuntimeError::new(operator, "Operand must be a number.")),
                    },
                    TokenType::Bang => Ok(Value::Boolean(!rv.is_truthy())),
                    _ => Err(unknown_operator(operator)),
                }
            }
            Expression::Binary {
                left,
                operator,
                right,
            } => {
                let lv = self.evaluate(left)?;
                let rv = self.evaluate(right)?;
                binary(operator, lv, rv)
            }
            Expression::Variable(token) => self.environment.get(token),
            Expression::Assign { name, value } => {
                let value = self.evaluate(value)?;
                self.environment.assign(name, value.clone())?;
                Ok(value)
            }
            Expression::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                match operator.tokentype {
                    TokenType::Or if left.is_truthy() => Ok(left),
                    TokenType::And if !left.is_truthy() => Ok(left),
                    TokenType::Or | TokenType::And => self.evaluate(right),
                    _ => Err(unknown_operator(operator)),
                }
            }
            Expression::Call {
                callee,
                paren,
                arguments,
            } => {
                let evaluated_callee = self.evaluate(callee)?;
                let mut evaluated_arguments: Vec<Value> = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    evaluated_arguments.push(self.evaluate(argument)?);
                }
                match evaluated_callee {
                    Value::Callable(function) => {
                        if function.arity() != evaluated_arguments.len() {
                            return Err(RuntimeError::new(
                                paren,
                                &format!(
                                    "Expected {} arguments but got {}.",
                                    function.arity(),
                                    evaluated_arguments.len()
                                ),
                            ));
                        }
                        if self.frames >= MAX_FRAMES {
                            return Err(RuntimeError::new(paren, "Stack overflow."));
                        }
                        self.frames += 1;
                        let result = function.call(self, paren, evaluated_arguments);
                        self.frames -= 1;
                        result
                    }
                    _ => Err(RuntimeError::new(
                        paren,
                        "Can only call functions and classes.",
                    )),
                }
            }
        }
    }

    fn write_line(&mut self, value: &Value) -> Result<(), String> {
        writeln!(self.output, "{}", value).map_err(|e| format!("Could not write output: {}.", e))
    }
}

fn binary(operator: &Token, lv: Value, rv: Value) -> Result<Value, RuntimeError> {
    match operator.tokentype {
        TokenType::EqualEqual => return Ok(Value::Boolean(lv == rv)),
        TokenType::BangEqual => return Ok(Value::Boolean(lv != rv)),
        TokenType::Plus => {
            return match (lv, rv) {
                (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l + r)),
                (Value::String(l), r) => Ok(Value::String(format!("{}{}", l, r))),
                (l, Value::String(r)) => Ok(Value::String(format!("{}{}", l, r))),
                _ => Err(RuntimeError::new(
                    operator,
                    "Operands must be two numbers or two strings.",
                )),
            }
        }
        _ => (),
    }
    let (l, r) = match (lv, rv) {
        (Value::Number(l), Value::Number(r)) => (l, r),
        _ => return Err(RuntimeError::new(operator, "Operands must be numbers.")),
    };
    match operator.tokentype {
        TokenType::Minus => Ok(Value::Number(l - r)),
        TokenType::Star => Ok(Value::Number(l * r)),
        TokenType::Slash | TokenType::Percent if r == 0.0 => {
            Err(RuntimeError::new(operator, "Can't divide by zero."))
        }
        TokenType::Slash => Ok(Value::Number(l / r)),
        TokenType::Percent => Ok(Value::Number(l % r)),
        TokenType::Greater => Ok(Value::Boolean(l > r)),
        TokenType::GreaterEqual => Ok(Value::Boolean(l >= r)),
        TokenType::Less => Ok(Value::Boolean(l < r)),
        TokenType::LessEqual => Ok(Value::Boolean(l <= r)),
        _ => Err(unknown_operator(operator)),
    }
}

fn unknown_operator(operator: &Token) -> RuntimeError {
    RuntimeError::new(
        operator,
        &format!("Unknown operator '{}'.", operator.lexeme),
    )
}

const NATIVES: &[NativeFunction] = &[
    NativeFunction {
        name: "clock",
        arity: 0,
        call: clock,
    },
    NativeFunction {
        name: "print",
        arity: 1,
        call: print,
    },
];

fn clock(_: &mut Interpreter, _: &[Value]) -> Result<Value, String> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| Value::Number(d.as_secs_f64()))
        .map_err(|e| format!("Clock error: {}.", e))
}

fn print(interpreter: &mut Interpreter, arguments: &[Value]) -> Result<Value, String> {
    for argument in arguments {
        interpreter.write_line(argument)?;
    }
    Ok(Value::Nil)
}

#[cfg(test)]
mod interpreter_tests {
    use crate::interpreter::{Flow, Interpreter};
    use crate::run;
    use crate::value::Value;
    use crate::LoxError;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Output(Rc<RefCell<Vec<u8>>>);

    impl Write for Output {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Output {
        fn text(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    /// Runs `source` and returns what it printed plus the error message, if any.
    fn exec(source: &str) -> (String, Option<String>) {
        let output = Output::default();
        let mut interpreter = Interpreter::with_output(Box::new(output.clone()));
        let error = run(source, &mut interpreter).err().map(|e| match e {
            LoxError::Runtime(e) => e.message,
            LoxError::Syntax(errors) => panic!("syntax errors: {:?}", errors),
        });
        (output.text(), error)
    }

    fn printed(source: &str) -> String {
        let (out, error) = exec(source);
        assert_eq!(error, None);
        out
    }

    fn fails_with(source: &str) -> String {
        let (_, error) = exec(source);
        error.expect("expected a runtime error")
    }

    #[test]
    fn print_statement_takes_any_operand() {
        assert_eq!(
            printed("print -1; print !true; print (1 + 2) * 3; print(4) - 1; print(5);"),
            "-1\nfalse\n9\n3\n5\n"
        );
    }

    #[test]
    fn precedence() {
        assert_eq!(printed("print(1 + 2 * 3); print((1 + 2) * 3);"), "7\n9\n");
        assert_eq!(printed("print 10 - 4 - 3; print(-2 * -3 % 4);"), "3\n2\n");
    }

    #[test]
    fn string_coercion() {
        assert_eq!(
            printed("print(\"a\" + 1); print(1 + \"a\"); print(\"x\" + nil + true);"),
            "a1\n1a\nxniltrue\n"
        );
        assert_eq!(printed("print(\"a\" + 1.5);"), "a1.5\n");
        assert_eq!(
            fails_with("print(1 + nil);"),
            "Operands must be two numbers or two strings."
        );
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(fails_with("print(1 / 0);"), "Can't divide by zero.");
        assert_eq!(fails_with("print(1 % 0);"), "Can't divide by zero.");
        assert_eq!(fails_with("print(1 / 0.0);"), "Can't divide by zero.");
        assert_eq!(printed("print(7 % 3); print(1 / 4);"), "1\n0.25\n");
    }

    #[test]
    fn operand_types() {
        assert_eq!(fails_with("print(1 - \"a\");"), "Operands must be numbers.");
        assert_eq!(fails_with("print(1 < \"a\");"), "Operands must be numbers.");
        assert_eq!(fails_with("print(-\"a\");"), "Operand must be a number.");
        assert_eq!(printed("print(2 >= 2); print(1 > 2);"), "true\nfalse\n");
    }

    #[test]
    fn truthiness() {
        assert_eq!(
            printed("print(!nil); print(!0); print(!\"\"); print(!!false);"),
            "true\nfalse\nfalse\nfalse\n"
        );
        assert_eq!(printed("if (0) print \"zero\"; else print \"no\";"), "zero\n");
    }

    #[test]
    fn equality() {
        assert_eq!(
            printed("print(nil == nil); print(nil == false); print(\"1\" == 1); print(1 != 2);"),
            "true\nfalse\nfalse\ntrue\n"
        );
        assert_eq!(printed("print(\"ab\" == \"a\" + \"b\");"), "true\n");
        assert_eq!(printed("fun f() {} var g = f; print(f == g);"), "true\n");
    }

    #[test]
    fn logical_operators_return_operands() {
        assert_eq!(
            printed("print(nil or \"x\"); print(1 and 2); print(false and boom); print(1 or boom);"),
            "x\n2\nfalse\n1\n"
        );
    }

    #[test]
    fn shadowing() {
        assert_eq!(
            printed("var x = \"outer\"; { var x = \"inner\"; print x; } print x;"),
            "inner\nouter\n"
        );
        assert_eq!(printed("var x = 1; { x = 2; } print x;"), "2\n");
    }

    #[test]
    fn closures_keep_independent_state() {
        let source = "
            fun makeCounter() {
                var i = 0;
                fun count() {
                    i = i + 1;
                    return i;
                }
                return count;
            }
            var a = makeCounter();
            var b = makeCounter();
            print a();
            print a();
            print a();
            print b();
            print a;
        ";
        assert_eq!(printed(source), "1\n2\n3\n1\n<fn count>\n");
    }

    #[test]
    fn closures_are_lexical() {
        let source = "
            var x = \"global\";
            fun show() { print x; }
            fun shadow() { var x = \"local\"; show(); }
            shadow();
        ";
        assert_eq!(printed(source), "global\n");
    }

    #[test]
    fn recursion() {
        let source = "
            fun fib(n) {
                if (n < 2) return n;
                return fib(n - 1) + fib(n - 2);
            }
            print fib(15);
        ";
        assert_eq!(printed(source), "610\n");
    }

    #[test]
    fn deep_recursion() {
        let source = "
            fun depth(n) {
                if (n == 0) return 0;
                return depth(n - 1) + 1;
            }
            print depth(3000);
        ";
        assert_eq!(printed(source), "3000\n");
    }

    #[test]
    fn runaway_recursion_is_a_runtime_error() {
        let output = Output::default();
        let mut interpreter = Interpreter::with_output(Box::new(output.clone()));
        match run("fun forever(n) { return forever(n + 1); }\nforever(0);", &mut interpreter) {
            Err(LoxError::Runtime(e)) => {
                assert_eq!(e.message, "Stack overflow.");
                assert_eq!(e.token.line, 1);
            }
            _ => panic!("expected a runtime error"),
        }
        run("print \"still alive\";", &mut interpreter).unwrap();
        assert_eq!(output.text(), "still alive\n");
    }

    #[test]
    fn break_only_leaves_innermost_loop() {
        let source = "
            for (var i = 0; i < 3; i = i + 1) {
                var j = 0;
                while (true) {
                    if (j == 1) break;
                    print i + \":\" + j;
                    j = j + 1;
                }
            }
            print \"done\";
        ";
        assert_eq!(printed(source), "0:0\n1:0\n2:0\ndone\n");
    }

    #[test]
    fn return_unwinds_through_loops_and_blocks() {
        let source = "
            fun find() {
                var i = 0;
                while (true) {
                    { if (i == 3) return i; }
                    i = i + 1;
                }
            }
            print find();
            fun nothing() { return; }
            print nothing();
            fun noReturn() {}
            print noReturn();
        ";
        assert_eq!(printed(source), "3\nnil\nnil\n");
    }

    #[test]
    fn uninitialized_read() {
        assert_eq!(
            fails_with("var x; print(x);"),
            "Variable 'x' has not been properly initialized."
        );
        assert_eq!(printed("var x; x = 1; print(x);"), "1\n");
        assert_eq!(printed("var x = nil; print(x);"), "nil\n");
    }

    #[test]
    fn undefined_variables() {
        assert_eq!(fails_with("print(y);"), "Undefined variable 'y'.");
        assert_eq!(fails_with("y = 1;"), "Undefined variable 'y'.");
    }

    #[test]
    fn arity_mismatch() {
        assert_eq!(
            fails_with("fun f(a) {} f();"),
            "Expected 1 arguments but got 0."
        );
        assert_eq!(
            fails_with("fun f(a) {} f(1, 2);"),
            "Expected 1 arguments but got 2."
        );
        assert_eq!(fails_with("print(1, 2);"), "Expected 1 arguments but got 2.");
    }

    #[test]
    fn calling_non_callables() {
        assert_eq!(
            fails_with("\"text\"();"),
            "Can only call functions and classes."
        );
    }

    #[test]
    fn natives() {
        assert_eq!(printed("print(print);"), "<native fn>\n");
        assert_eq!(printed("print(clock() > 0);"), "true\n");
        assert_eq!(printed("print(print(\"x\"));"), "x\nnil\n");
    }

    #[test]
    fn runtime_error_stops_the_run() {
        let (out, error) = exec("print 1; print(-nil); print 2;");
        assert_eq!(out, "1\n");
        assert_eq!(error.as_deref(), Some("Operand must be a number."));
    }

    #[test]
    fn runtime_error_inside_block_restores_globals() {
        let output = Output::default();
        let mut interpreter = Interpreter::with_output(Box::new(output.clone()));
        assert!(run("var a = 1; { var a = 2; nil(); }", &mut interpreter).is_err());
        run("print a;", &mut interpreter).unwrap();
        assert_eq!(output.text(), "1\n");
    }

    #[test]
    fn syntax_errors_skip_evaluation() {
        let output = Output::default();
        let mut interpreter = Interpreter::with_output(Box::new(output.clone()));
        match run("print \"before\";\nvar 1;\n@", &mut interpreter) {
            Err(LoxError::Syntax(errors)) => assert_eq!(errors.len(), 2),
            _ => panic!("expected syntax errors"),
        }
        assert_eq!(output.text(), "");
    }

    #[test]
    fn stray_signals_are_dropped_at_top_level() {
        use crate::ast::Statement;
        use crate::token::{Token, TokenType};
        let mut interpreter = Interpreter::with_output(Box::new(Output::default()));
        let stray = Statement::Break(Token::new(TokenType::Break, "break", 1));
        assert_eq!(interpreter.execute(&stray).unwrap(), Flow::Break);
        assert!(interpreter.interpret(&[stray]).is_ok());
        let value = interpreter
            .globals()
            .get(&Token::new(
                TokenType::Identifier("clock".to_string()),
                "clock",
                1,
            ))
            .unwrap();
        assert!(matches!(value, Value::Callable(_)));
    }
}
