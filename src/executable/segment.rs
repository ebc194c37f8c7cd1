//! Segments of a compiled document

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::language::{LanguageAdapter, Program};

/// 1-based line and column of a segment's start in its document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
}

impl SourcePosition {
    /// Position of a document's first character
    pub fn start() -> Self {
        Self { line: 1, column: 1 }
    }

    /// Create a position
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl Default for SourcePosition {
    fn default() -> Self {
        Self::start()
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Text written verbatim to the output sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralSegment {
    /// The text
    pub text: String,
    /// Where the segment starts
    pub position: SourcePosition,
    /// 0-based index within the executable
    pub index: usize,
}

/// Source code compiled by a language adapter
pub struct ProgramSegment {
    /// Source code handed to the adapter
    pub source_code: String,
    /// Language tag the segment resolved to
    pub language_tag: String,
    /// Where the segment starts
    pub position: SourcePosition,
    /// 0-based index within the executable
    pub index: usize,
    pub(crate) adapter: Arc<dyn LanguageAdapter>,
    pub(crate) program: Box<dyn Program>,
}

impl ProgramSegment {
    /// The adapter that compiled this segment
    pub fn adapter(&self) -> &Arc<dyn LanguageAdapter> {
        &self.adapter
    }

    /// The compiled program
    pub fn program(&self) -> &dyn Program {
        self.program.as_ref()
    }
}

impl fmt::Debug for ProgramSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramSegment")
            .field("source_code", &self.source_code)
            .field("language_tag", &self.language_tag)
            .field("position", &self.position)
            .field("index", &self.index)
            .field("adapter", &self.adapter.info().name)
            .finish()
    }
}

/// One span of an executable
#[derive(Debug)]
pub enum Segment {
    /// Literal text
    Literal(LiteralSegment),
    /// Compiled program
    Program(ProgramSegment),
}

impl Segment {
    /// Whether this is a literal segment
    pub fn is_literal(&self) -> bool {
        matches!(self, Segment::Literal(_))
    }

    /// Where the segment starts
    pub fn position(&self) -> SourcePosition {
        match self {
            Segment::Literal(literal) => literal.position,
            Segment::Program(program) => program.position,
        }
    }

    /// 0-based index within the executable
    pub fn index(&self) -> usize {
        match self {
            Segment::Literal(literal) => literal.index,
            Segment::Program(program) => program.index,
        }
    }

    /// Literal text or program source code
    pub fn text(&self) -> &str {
        match self {
            Segment::Literal(literal) => &literal.text,
            Segment::Program(program) => &program.source_code,
        }
    }

    /// Language tag of a program segment
    pub fn language_tag(&self) -> Option<&str> {
        match self {
            Segment::Literal(_) => None,
            Segment::Program(program) => Some(&program.language_tag),
        }
    }
}
