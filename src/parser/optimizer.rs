//! Segment optimizer
//!
//! Parsers emit [`RawSegment`]s in document order. The optimizer reduces
//! them to a minimal list and compiles the survivors:
//!
//! 1. adjacent literals merge, and adjacent programs in the same language merge
//! 2. a literal following a program in its language becomes an output
//!    statement of that program, then step 1 runs again
//! 3. survivors get their final index and program segments are compiled
//!
//! A merged segment reports the position of the *last* piece merged into it.

use super::{ParsingContext, SourceDocument};
use crate::error::{ParsingError, ParsingResult};
use crate::executable::segment::{LiteralSegment, ProgramSegment, Segment, SourcePosition};

/// Whether a raw segment is literal text or program source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Written verbatim to output
    Literal,
    /// Compiled by an adapter
    Program,
}

/// A segment before optimisation and compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSegment {
    /// Literal or program
    pub kind: SegmentKind,
    /// Literal text or program source
    pub text: String,
    /// Language in effect where the segment starts
    pub language_tag: Option<String>,
    /// Where the segment starts
    pub position: SourcePosition,
}

impl RawSegment {
    /// A literal span
    pub fn literal(text: impl Into<String>, language_tag: Option<String>, position: SourcePosition) -> Self {
        Self {
            kind: SegmentKind::Literal,
            text: text.into(),
            language_tag,
            position,
        }
    }

    /// A program span
    pub fn program(text: impl Into<String>, language_tag: Option<String>, position: SourcePosition) -> Self {
        Self {
            kind: SegmentKind::Program,
            text: text.into(),
            language_tag,
            position,
        }
    }

    /// Whether this is a literal span
    pub fn is_literal(&self) -> bool {
        self.kind == SegmentKind::Literal
    }

    fn merges_with(&self, next: &RawSegment) -> bool {
        self.kind == next.kind && (self.is_literal() || self.language_tag == next.language_tag)
    }
}

/// Merge adjacent literals and adjacent same-language programs
pub fn collapse(segments: Vec<RawSegment>) -> Vec<RawSegment> {
    let mut collapsed: Vec<RawSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match collapsed.last_mut() {
            Some(previous) if previous.merges_with(&segment) => {
                previous.text.push_str(&segment.text);
                previous.position = segment.position;
                previous.language_tag = segment.language_tag;
            }
            _ => collapsed.push(segment),
        }
    }
    collapsed
}

/// Turn literals that follow a program in their language into output
/// statements of that language
pub fn inline_literals(mut segments: Vec<RawSegment>, context: &ParsingContext) -> Vec<RawSegment> {
    for i in 1..segments.len() {
        let (before, after) = segments.split_at_mut(i);
        let previous = &before[i - 1];
        let segment = &mut after[0];

        if !segment.is_literal()
            || previous.is_literal()
            || segment.language_tag.is_none()
            || previous.language_tag != segment.language_tag
        {
            continue;
        }

        let Some(tag) = segment.language_tag.as_deref() else {
            continue;
        };
        let code = context
            .language_manager
            .adapter_by_tag(tag)
            .and_then(|adapter| adapter.source_code_for_literal_output(&segment.text));
        if let Some(code) = code {
            segment.kind = SegmentKind::Program;
            segment.text = code;
        }
    }
    segments
}

/// Run both merging passes
pub fn optimize(segments: Vec<RawSegment>, context: &ParsingContext) -> Vec<RawSegment> {
    collapse(inline_literals(collapse(segments), context))
}

/// Assign final indices and compile program segments
pub fn compile(
    segments: Vec<RawSegment>,
    document: &SourceDocument<'_>,
    is_scriptlet: bool,
    context: &ParsingContext,
) -> ParsingResult<Vec<Segment>> {
    segments
        .into_iter()
        .enumerate()
        .map(|(index, raw)| match raw.kind {
            SegmentKind::Literal => Ok(Segment::Literal(LiteralSegment {
                text: raw.text,
                position: raw.position,
                index,
            })),
            SegmentKind::Program => {
                let tag = raw.language_tag.ok_or_else(|| ParsingError::AdapterNotFound {
                    document: document.name.to_string(),
                    line: raw.position.line,
                    column: raw.position.column,
                    tag: String::new(),
                })?;
                let adapter = context.adapter_for(&tag, document.name, raw.position)?;
                let program =
                    adapter.create_program(&raw.text, is_scriptlet, raw.position, document.name)?;
                Ok(Segment::Program(ProgramSegment {
                    source_code: raw.text,
                    language_tag: tag,
                    position: raw.position,
                    index,
                    adapter,
                    program,
                }))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::LanguageManager;
    use std::sync::Arc;

    fn at(line: usize, column: usize) -> SourcePosition {
        SourcePosition::new(line, column)
    }

    fn tag(tag: &str) -> Option<String> {
        Some(tag.to_string())
    }

    #[test]
    fn adjacent_literals_merge_keeping_the_later_position() {
        let collapsed = collapse(vec![
            RawSegment::literal("A", None, at(1, 1)),
            RawSegment::literal("B", tag("mini"), at(2, 3)),
        ]);

        assert_eq!(collapsed, vec![RawSegment::literal("AB", tag("mini"), at(2, 3))]);
    }

    #[test]
    fn programs_merge_only_within_a_language() {
        let collapsed = collapse(vec![
            RawSegment::program("a", tag("mini"), at(1, 1)),
            RawSegment::program("b", tag("mini"), at(1, 9)),
            RawSegment::program("c", tag("other"), at(1, 20)),
        ]);

        assert_eq!(
            collapsed,
            vec![
                RawSegment::program("ab", tag("mini"), at(1, 9)),
                RawSegment::program("c", tag("other"), at(1, 20)),
            ]
        );
    }

    #[test]
    fn trailing_literals_become_output_statements() {
        let context = ParsingContext::new(Arc::new(LanguageManager::with_builtins()));
        let optimized = optimize(
            vec![
                RawSegment::literal("head", tag("mini"), at(1, 1)),
                RawSegment::program("print 1", tag("mini"), at(1, 5)),
                RawSegment::literal("tail", tag("mini"), at(1, 18)),
                RawSegment::program("print 2", tag("mini"), at(1, 22)),
            ],
            &context,
        );

        assert_eq!(
            optimized,
            vec![
                RawSegment::literal("head", tag("mini"), at(1, 1)),
                RawSegment::program("print 1print \"tail\";print 2", tag("mini"), at(1, 22)),
            ]
        );
    }

    #[test]
    fn literals_in_another_language_stay_literal() {
        let context = ParsingContext::new(Arc::new(LanguageManager::with_builtins()));
        let optimized = optimize(
            vec![
                RawSegment::program("print 1", tag("mini"), at(1, 1)),
                RawSegment::literal("tail", tag("other"), at(1, 12)),
            ],
            &context,
        );
        assert_eq!(optimized.len(), 2);
        assert!(optimized[1].is_literal());
    }
}
