//! Single-segment parsers

use super::optimizer::{RawSegment, compile};
use super::{DocumentParser, PROGRAM_PARSER, ParsingContext, SourceDocument, TEXT_PARSER};
use crate::error::ParsingResult;
use crate::executable::segment::{Segment, SourcePosition};

/// Treats the whole document as one program
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgramParser;

impl DocumentParser for ProgramParser {
    fn name(&self) -> &str {
        PROGRAM_PARSER
    }

    fn parse(&self, document: &SourceDocument<'_>, context: &ParsingContext) -> ParsingResult<Vec<Segment>> {
        let segment = RawSegment::program(
            document.source_code,
            context.initial_language_tag(document),
            SourcePosition::start(),
        );
        compile(vec![segment], document, false, context)
    }
}

/// Treats the whole document as literal text
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl DocumentParser for TextParser {
    fn name(&self) -> &str {
        TEXT_PARSER
    }

    fn parse(&self, document: &SourceDocument<'_>, context: &ParsingContext) -> ParsingResult<Vec<Segment>> {
        let segment = RawSegment::literal(document.source_code, None, SourcePosition::start());
        compile(vec![segment], document, false, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParsingError;
    use crate::language::LanguageManager;
    use std::sync::Arc;

    fn context() -> ParsingContext {
        ParsingContext::new(Arc::new(LanguageManager::with_builtins()))
    }

    #[test]
    fn program_language_comes_from_the_extension() {
        let document = SourceDocument::detached("hello.mini", "print 1");
        let segments = ProgramParser.parse(&document, &context()).unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].language_tag(), Some("mini"));
        assert_eq!(segments[0].text(), "print 1");
    }

    #[test]
    fn program_without_a_language_fails() {
        let document = SourceDocument::detached("hello.txt", "print 1");
        assert!(matches!(
            ProgramParser.parse(&document, &context()),
            Err(ParsingError::AdapterNotFound { line: 1, column: 1, .. })
        ));
    }

    #[test]
    fn text_is_one_literal() {
        let document = SourceDocument::detached("notes.txt", "<% not code %>");
        let segments = TextParser.parse(&document, &context()).unwrap();

        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_literal());
        assert_eq!(segments[0].text(), "<% not code %>");
    }
}
