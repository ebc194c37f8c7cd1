//! Mini evaluator

use std::sync::Arc;

use super::parser::{Expr, Statement};
use crate::Value;
use crate::error::{ExecutionError, ExecutionResult};
use crate::executable::Executable;
use crate::executable::context::ExecutionContext;
use crate::executable::global::GlobalScope;

/// Prefix of the context services holding entry points
pub const ROUTINE_SERVICE_PREFIX: &str = "mini.routine.";

const MAX_CALL_DEPTH: usize = 64;

/// An entry point defined with `def`
#[derive(Debug)]
pub struct Routine {
    /// Entry point name
    pub name: String,
    /// Statements run on each call
    pub body: Arc<Vec<Statement>>,
}

/// Service name an entry point is stored under
pub fn routine_service(name: &str) -> String {
    format!("{}{}", ROUTINE_SERVICE_PREFIX, name)
}

/// Whether a block ran to completion or returned
pub(crate) enum Flow {
    Next,
    Return(Value),
}

pub(crate) struct Interpreter<'a> {
    executable: &'a Executable,
    context: &'a Arc<ExecutionContext>,
    arguments: &'a [Value],
    depth: usize,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(
        executable: &'a Executable,
        context: &'a Arc<ExecutionContext>,
        arguments: &'a [Value],
    ) -> Self {
        Self {
            executable,
            context,
            arguments,
            depth: 0,
        }
    }

    pub(crate) fn run(&self, statements: &[Statement]) -> ExecutionResult<Flow> {
        for statement in statements {
            if let Flow::Return(value) = self.step(statement)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }

    fn step(&self, statement: &Statement) -> ExecutionResult<Flow> {
        match statement {
            Statement::Print(expr) => {
                let value = self.eval(expr)?;
                self.context.write_output(&display(&value))?;
            }
            Statement::Eprint(expr) => {
                let value = self.eval(expr)?;
                self.context.write_error(&display(&value))?;
            }
            Statement::Set(name, expr) => {
                let value = self.eval(expr)?;
                self.context.set_attribute(name.as_str(), value)?;
            }
            Statement::Global(name, expr) => {
                let value = self.eval(expr)?;
                GlobalScope::global().set(name.as_str(), value);
            }
            Statement::Include(expr) => {
                let name = display(&self.eval(expr)?);
                self.executable.include(&name, self.context)?;
            }
            Statement::Def(name, body) => {
                let routine = Routine {
                    name: name.clone(),
                    body: body.clone(),
                };
                self.context
                    .set_service(routine_service(name), Arc::new(routine))?;
            }
            Statement::Call(name, arguments) => {
                let arguments = arguments
                    .iter()
                    .map(|argument| self.eval(argument))
                    .collect::<ExecutionResult<Vec<_>>>()?;
                self.call(name, &arguments)?;
            }
            Statement::Return(expr) => return Ok(Flow::Return(self.eval(expr)?)),
        }
        Ok(Flow::Next)
    }

    /// Run an entry point with fresh arguments, returning its value
    pub(crate) fn call(&self, name: &str, arguments: &[Value]) -> ExecutionResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ExecutionError::new(format!(
                "call depth exceeded while calling '{}'",
                name
            )));
        }
        let routine = self
            .context
            .service_as::<Routine>(&routine_service(name))?
            .ok_or_else(|| ExecutionError::new(format!("no entry point '{}'", name)))?;

        let nested = Interpreter {
            executable: self.executable,
            context: self.context,
            arguments,
            depth: self.depth + 1,
        };
        match nested.run(&routine.body)? {
            Flow::Return(value) => Ok(value),
            Flow::Next => Ok(Value::Null),
        }
    }

    fn eval(&self, expr: &Expr) -> ExecutionResult<Value> {
        match expr {
            Expr::Text(text) => Ok(Value::String(text.clone())),
            Expr::Integer(value) => Ok(Value::from(*value)),
            Expr::Argument(index) => Ok(self.arguments.get(*index).cloned().unwrap_or(Value::Null)),
            Expr::Variable(name) => match self.context.attribute(name)? {
                Some(value) => Ok(value),
                None => GlobalScope::global()
                    .get(name)
                    .ok_or_else(|| ExecutionError::new(format!("undefined variable '{}'", name))),
            },
            Expr::Add(lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                match (lhs.as_i64(), rhs.as_i64()) {
                    (Some(a), Some(b)) => a
                        .checked_add(b)
                        .map(Value::from)
                        .ok_or_else(|| ExecutionError::new("integer overflow")),
                    _ => Ok(Value::String(display(&lhs) + &display(&rhs))),
                }
            }
        }
    }
}

/// Text form of a value as printed by Mini
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
