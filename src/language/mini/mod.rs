//! Mini, the built-in reference language
//!
//! A deliberately small language that exercises every adapter capability
//! without an external runtime. See [`parser`] for the grammar.

use once_cell::sync::OnceCell;
use std::sync::Arc;

use super::{AdapterCore, AdapterInfo, LanguageAdapter, Program};
use crate::Value;
use crate::error::{ExecutionResult, ParsingResult, PreparationError, PreparationResult};
use crate::executable::Executable;
use crate::executable::context::ExecutionContext;
use crate::executable::segment::SourcePosition;

pub mod interpreter;
pub mod parser;

use interpreter::Interpreter;
use parser::Statement;

/// Tag and extension Mini answers to
pub const MINI_TAG: &str = "mini";

/// Adapter for the Mini language
#[derive(Debug)]
pub struct MiniAdapter {
    info: AdapterInfo,
    core: AdapterCore,
}

impl Default for MiniAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MiniAdapter {
    /// The standard adapter: tag and extension `mini`, safe for concurrent use
    pub fn new() -> Self {
        Self::with_info(
            AdapterInfo::new("Mini", MINI_TAG)
                .with_extension(MINI_TAG)
                .with_thread_safe(true),
        )
    }

    /// Mini semantics under a custom description
    pub fn with_info(info: AdapterInfo) -> Self {
        Self {
            info,
            core: AdapterCore::new(),
        }
    }
}

impl LanguageAdapter for MiniAdapter {
    fn info(&self) -> &AdapterInfo {
        &self.info
    }

    fn core(&self) -> &AdapterCore {
        &self.core
    }

    fn source_code_for_literal_output(&self, literal: &str) -> Option<String> {
        Some(format!("print \"{}\";", escape(literal)))
    }

    fn source_code_for_expression_output(&self, expression: &str) -> Option<String> {
        Some(format!("print ({});", expression))
    }

    fn source_code_for_expression_include(&self, expression: &str) -> Option<String> {
        Some(format!("include ({});", expression))
    }

    fn source_code_for_entry_point_invocation(&self, entry_point: &str) -> Option<String> {
        Some(format!("call {};", entry_point))
    }

    fn create_program(
        &self,
        source_code: &str,
        _is_scriptlet: bool,
        position: SourcePosition,
        document_name: &str,
    ) -> ParsingResult<Box<dyn Program>> {
        Ok(Box::new(MiniProgram {
            source_code: source_code.to_string(),
            position,
            document_name: document_name.to_string(),
            statements: OnceCell::new(),
        }))
    }

    fn enter(
        &self,
        entry_point: &str,
        executable: &Executable,
        context: &Arc<ExecutionContext>,
        arguments: &[Value],
    ) -> ExecutionResult<Value> {
        Interpreter::new(executable, context, arguments).call(entry_point, arguments)
    }
}

fn escape(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for ch in literal.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// A Mini fragment, parsed on first use
struct MiniProgram {
    source_code: String,
    position: SourcePosition,
    document_name: String,
    statements: OnceCell<Vec<Statement>>,
}

impl MiniProgram {
    fn statements(&self) -> PreparationResult<&[Statement]> {
        self.statements
            .get_or_try_init(|| {
                parser::parse(&self.source_code).map_err(|err| PreparationError {
                    document: self.document_name.clone(),
                    line: self.position.line + err.line - 1,
                    column: if err.line == 1 {
                        self.position.column + err.column - 1
                    } else {
                        err.column
                    },
                    message: err.message.clone(),
                    cause: Some(Box::new(err)),
                })
            })
            .map(Vec::as_slice)
    }
}

impl Program for MiniProgram {
    fn prepare(&self) -> PreparationResult<()> {
        self.statements().map(drop)
    }

    fn execute(&self, executable: &Executable, context: &Arc<ExecutionContext>) -> ExecutionResult<()> {
        let statements = self.statements()?;
        Interpreter::new(executable, context, &[]).run(statements)?;
        Ok(())
    }
}
