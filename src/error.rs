//! Error types for the document host
//!
//! Each concern gets its own thiserror enum plus a result alias; the
//! top-level [`Error`] aggregates them for callers that drive the whole
//! pipeline.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level host error
#[derive(Debug, Error)]
pub enum Error {
    /// Parsing or compilation of a document failed
    #[error("Parsing error: {0}")]
    Parsing(#[from] ParsingError),

    /// Eager preparation of a program failed
    #[error("Preparation error: {0}")]
    Preparation(#[from] PreparationError),

    /// A program segment failed while running
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Document store failures
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    /// Execution context misuse
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    /// Language adapter registry failures
    #[error("Language error: {0}")]
    Language(#[from] LanguageError),
}

/// Result type using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while turning source text into segments and programs
#[derive(Debug, Error)]
pub enum ParsingError {
    /// Malformed scriptlet syntax
    #[error("{document}:{line}:{column}: {message}")]
    Syntax {
        /// Document name
        document: String,
        /// 1-based line
        line: usize,
        /// 1-based column
        column: usize,
        /// Description of the problem
        message: String,
    },

    /// No adapter is registered for the language tag
    #[error("{document}:{line}:{column}: no language adapter for tag '{tag}'")]
    AdapterNotFound {
        /// Document name
        document: String,
        /// 1-based line
        line: usize,
        /// 1-based column
        column: usize,
        /// The offending tag
        tag: String,
    },

    /// The adapter cannot generate the source code a scriptlet needs
    #[error("{document}:{line}:{column}: adapter '{adapter}' cannot generate {what}")]
    Unsupported {
        /// Document name
        document: String,
        /// 1-based line
        line: usize,
        /// 1-based column
        column: usize,
        /// Adapter name
        adapter: String,
        /// Kind of code that was requested
        what: &'static str,
    },

    /// Parser manager has no parser under this name
    #[error("Parser '{0}' not found")]
    ParserNotFound(String),

    /// The operation needs a document source but the parsing context has none
    #[error("Document '{document}' requires a document source")]
    MissingDocumentSource {
        /// Document name
        document: String,
    },

    /// Eager preparation failed during construction
    #[error(transparent)]
    Preparation(#[from] PreparationError),

    /// The document store failed while parsing
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl ParsingError {
    /// Line and column of the failure, when known
    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            ParsingError::Syntax { line, column, .. }
            | ParsingError::AdapterNotFound { line, column, .. }
            | ParsingError::Unsupported { line, column, .. } => Some((*line, *column)),
            ParsingError::Preparation(err) => Some((err.line, err.column)),
            _ => None,
        }
    }
}

/// Convenience result alias for parsing operations
pub type ParsingResult<T> = std::result::Result<T, ParsingError>;

/// A language runtime rejected a program during eager compilation
#[derive(Debug, Error)]
#[error("{document}:{line}:{column}: {message}")]
pub struct PreparationError {
    /// Document name
    pub document: String,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
    /// Description of the failure
    pub message: String,
    /// Error reported by the language runtime, if any
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Convenience result alias for preparation
pub type PreparationResult<T> = std::result::Result<T, PreparationError>;

/// One level of the document stack an execution error passed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFrame {
    /// Document name
    pub document: String,
    /// 1-based line of the segment
    pub line: usize,
    /// 1-based column of the segment
    pub column: usize,
}

impl fmt::Display for ErrorFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}:{}:{}", self.document, self.line, self.column)
    }
}

/// A program segment raised an error while running
#[derive(Debug, Error)]
#[error("{}{}", .message, display_frames(.frames))]
pub struct ExecutionError {
    /// Description of the failure
    pub message: String,
    /// Frames, innermost first
    pub frames: Vec<ErrorFrame>,
    /// Underlying cause, if any
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

fn display_frames(frames: &[ErrorFrame]) -> String {
    frames.iter().map(|frame| format!("\n  {}", frame)).collect()
}

impl ExecutionError {
    /// Create an error with a message and no frames
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            frames: Vec::new(),
            cause: None,
        }
    }

    /// Create an error wrapping an underlying cause
    pub fn with_cause<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            frames: Vec::new(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Record the executable and segment the error propagated through
    pub fn with_frame(mut self, document: impl Into<String>, line: usize, column: usize) -> Self {
        self.frames.push(ErrorFrame {
            document: document.into(),
            line,
            column,
        });
        self
    }
}

impl From<ContextError> for ExecutionError {
    fn from(err: ContextError) -> Self {
        ExecutionError::with_cause(err.to_string(), err)
    }
}

impl From<ParsingError> for ExecutionError {
    fn from(err: ParsingError) -> Self {
        ExecutionError::with_cause(err.to_string(), err)
    }
}

impl From<PreparationError> for ExecutionError {
    fn from(err: PreparationError) -> Self {
        ExecutionError::with_cause(err.to_string(), err)
    }
}

impl From<DocumentError> for ExecutionError {
    fn from(err: DocumentError) -> Self {
        ExecutionError::with_cause(err.to_string(), err)
    }
}

/// Convenience result alias for execution
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Document store errors
#[derive(Debug, Error)]
pub enum DocumentError {
    /// No document exists under this name
    #[error("Document '{0}' not found")]
    NotFound(String),

    /// The dependency graph could not be proven acyclic within the depth bound
    #[error("Dependency loop detected at document '{0}'")]
    DependencyLoop(String),

    /// Backing storage failure
    #[error("IO error for {path:?}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

/// Convenience result alias for document operations
pub type DocumentResult<T> = std::result::Result<T, DocumentError>;

/// Execution context misuse; these indicate caller bugs
#[derive(Debug, Error)]
pub enum ContextError {
    /// Any access after release
    #[error("Execution context has been released")]
    Released,

    /// Mutation of an immutable context
    #[error("Execution context is immutable")]
    Immutable,

    /// `release` called twice
    #[error("Execution context was already released")]
    AlreadyReleased,

    /// The context is already bound to an executable for entering
    #[error("Execution context is already enterable")]
    AlreadyEnterable,

    /// No context was made enterable under this key
    #[error("No enterable execution context for key '{0}'")]
    NotEnterable(String),

    /// The enterable context belongs to a different executable
    #[error("Execution context for key '{0}' is bound to another executable")]
    ForeignExecutable(String),

    /// Entering requires a language adapter that has run in the context
    #[error("Execution context has no language adapter to enter")]
    NoAdapter,

    /// Writing to an output sink failed
    #[error("Output error: {0}")]
    Output(#[from] io::Error),
}

/// Convenience result alias for context operations
pub type ContextResult<T> = std::result::Result<T, ContextError>;

/// Language adapter registry errors
#[derive(Debug, Error)]
pub enum LanguageError {
    /// The adapter instance was already registered with a manager
    #[error("Language adapter '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Convenience result alias for registry operations
pub type LanguageResult<T> = std::result::Result<T, LanguageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_lists_frames_innermost_first() {
        let err = ExecutionError::new("boom")
            .with_frame("inner.mini", 3, 1)
            .with_frame("outer.page", 10, 4);
        let text = err.to_string();
        assert_eq!(text, "boom\n  at inner.mini:3:1\n  at outer.page:10:4");
    }

    #[test]
    fn parsing_error_reports_position() {
        let err = ParsingError::AdapterNotFound {
            document: "doc".into(),
            line: 2,
            column: 5,
            tag: "ruby".into(),
        };
        assert_eq!(err.position(), Some((2, 5)));
        assert!(ParsingError::ParserNotFound("x".into()).position().is_none());
    }
}
