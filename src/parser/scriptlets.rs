//! Mixed literal/scriptlet parser
//!
//! A document is literal text with embedded scriptlets such as
//! `Hello <%mini print name %>!`. The first start delimiter found fixes the
//! delimiter pair for the whole document.
//!
//! A scriptlet body may begin with a marker (checked in this order):
//!
//! | marker | default | effect |
//! |---|---|---|
//! | comment | `--` | scriptlet is dropped |
//! | expression | `=` | value is written to output |
//! | include | `&` | document named by the expression is included |
//! | in-flow | `:` | body is compiled as its own document and included |
//!
//! After the marker, a token immediately followed by whitespace is a
//! language tag (`<%mini ...`, `<%=mini ...`). A body that starts with
//! whitespace, or contains none, is untagged. A tag set by a non-ephemeral,
//! non-in-flow scriptlet stays in effect for what follows until another
//! tag overrides it.

use std::sync::Arc;

use super::optimizer::{RawSegment, compile, optimize};
use super::{
    DelimiterPair, DocumentParser, PROGRAM_PARSER, ParsingContext, ParsingOptions, SCRIPTLETS_PARSER,
    SourceDocument,
};
use crate::error::{ParsingError, ParsingResult};
use crate::executable::Executable;
use crate::executable::segment::{Segment, SourcePosition};
use crate::language::LanguageAdapter;

/// Parser for documents mixing literal text and scriptlets
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptletsParser;

impl ScriptletsParser {
    /// Split a document into raw segments, before optimisation.
    ///
    /// A document without any start delimiter yields exactly one literal
    /// segment.
    pub fn split(&self, document: &SourceDocument<'_>, context: &ParsingContext) -> ParsingResult<Vec<RawSegment>> {
        let language_tag = context.initial_language_tag(document);
        match first_delimiters(document.source_code, &context.options.delimiters) {
            None => Ok(vec![RawSegment::literal(
                document.source_code,
                language_tag,
                SourcePosition::start(),
            )]),
            Some(delimiters) => Scanner::new(document, context, delimiters, language_tag).run(),
        }
    }
}

impl DocumentParser for ScriptletsParser {
    fn name(&self) -> &str {
        SCRIPTLETS_PARSER
    }

    fn parse(&self, document: &SourceDocument<'_>, context: &ParsingContext) -> ParsingResult<Vec<Segment>> {
        let raw = self.split(document, context)?;
        let pure_literal = raw.len() == 1 && raw[0].is_literal();
        let optimized = if pure_literal {
            raw
        } else {
            optimize(raw, context)
        };
        tracing::trace!(
            document = document.name,
            segments = optimized.len(),
            pure_literal,
            "parsed scriptlets"
        );
        compile(optimized, document, true, context)
    }
}

/// The delimiter pair whose start appears first; ties go to the earlier pair
fn first_delimiters<'a>(source: &str, pairs: &'a [DelimiterPair]) -> Option<&'a DelimiterPair> {
    pairs
        .iter()
        .filter(|pair| !pair.start.is_empty() && !pair.end.is_empty())
        .filter_map(|pair| source.find(&pair.start).map(|offset| (offset, pair)))
        .min_by_key(|(offset, _)| *offset)
        .map(|(_, pair)| pair)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    None,
    Comment,
    Expression,
    Include,
    InFlow,
}

struct Scanner<'a> {
    document: &'a SourceDocument<'a>,
    context: &'a ParsingContext,
    delimiters: &'a DelimiterPair,
    src: &'a str,
    index: usize,
    tracked_index: usize,
    tracked: SourcePosition,
    language_tag: Option<String>,
    segments: Vec<RawSegment>,
}

impl<'a> Scanner<'a> {
    fn new(
        document: &'a SourceDocument<'a>,
        context: &'a ParsingContext,
        delimiters: &'a DelimiterPair,
        language_tag: Option<String>,
    ) -> Self {
        Self {
            document,
            context,
            delimiters,
            src: document.source_code,
            index: 0,
            tracked_index: 0,
            tracked: SourcePosition::start(),
            language_tag,
            segments: Vec::new(),
        }
    }

    fn run(mut self) -> ParsingResult<Vec<RawSegment>> {
        let src = self.src;
        while let Some(offset) = src[self.index..].find(&self.delimiters.start) {
            let start = self.index + offset;
            self.push_literal(self.index, start);

            let position = self.position_at(start);
            let body_start = start + self.delimiters.start.len();
            let Some(length) = src[body_start..].find(&self.delimiters.end) else {
                return Err(self.syntax_error(
                    position,
                    format!("unterminated scriptlet, expected '{}'", self.delimiters.end),
                ));
            };

            self.scriptlet(&src[body_start..body_start + length], position)?;
            self.index = body_start + length + self.delimiters.end.len();
        }
        self.push_literal(self.index, src.len());
        Ok(self.segments)
    }

    /// Position of a byte offset; offsets must be requested in increasing order
    fn position_at(&mut self, offset: usize) -> SourcePosition {
        for ch in self.src[self.tracked_index..offset].chars() {
            if ch == '\n' {
                self.tracked.line += 1;
                self.tracked.column = 1;
            } else {
                self.tracked.column += 1;
            }
        }
        self.tracked_index = offset;
        self.tracked
    }

    fn push_literal(&mut self, from: usize, to: usize) {
        if from >= to {
            return;
        }
        let position = self.position_at(from);
        let text = &self.src[from..to];
        self.segments
            .push(RawSegment::literal(text, self.language_tag.clone(), position));
    }

    fn scriptlet(&mut self, body: &str, position: SourcePosition) -> ParsingResult<()> {
        let (marker, rest) = detect_marker(body, &self.context.options);
        if marker == Marker::Comment {
            return Ok(());
        }

        let (explicit_tag, code) = split_tag(rest);
        let active_tag = self.language_tag.clone();
        let tag = explicit_tag
            .or(active_tag.as_deref())
            .ok_or_else(|| self.adapter_not_found(position, ""))?
            .to_string();
        let adapter = self.context.adapter_for(&tag, self.document.name, position)?;

        let in_flow = marker == Marker::InFlow;
        if explicit_tag.is_some() && !in_flow && !adapter.info().ephemeral {
            self.language_tag = Some(tag.clone());
        }

        let code = match marker {
            Marker::Expression => self.generated(
                adapter.source_code_for_expression_output(code),
                adapter.as_ref(),
                "expression output",
                position,
            )?,
            Marker::Include => self.generated(
                adapter.source_code_for_expression_include(code),
                adapter.as_ref(),
                "include",
                position,
            )?,
            Marker::InFlow if active_tag.as_deref() != Some(tag.as_str()) => {
                return self.in_flow(code, &tag, active_tag, position);
            }
            _ => code.to_string(),
        };

        self.segments.push(RawSegment::program(code, Some(tag), position));
        Ok(())
    }

    /// Compile the body as a separate document in its own language and
    /// include it from the surrounding language by name.
    fn in_flow(
        &mut self,
        code: &str,
        tag: &str,
        active_tag: Option<String>,
        position: SourcePosition,
    ) -> ParsingResult<()> {
        let source = self.context.document_source.clone().ok_or_else(|| {
            ParsingError::MissingDocumentSource {
                document: self.document.name.to_string(),
            }
        })?;
        let active_tag = active_tag.ok_or_else(|| self.adapter_not_found(position, ""))?;
        let active = self
            .context
            .adapter_for(&active_tag, self.document.name, position)?;

        let name = in_flow_name(self.document, self.segments.len());
        let in_flow_context = ParsingContext {
            options: ParsingOptions {
                parser: PROGRAM_PARSER.to_string(),
                default_language_tag: Some(tag.to_string()),
                ..self.context.options.clone()
            },
            ..self.context.clone()
        };
        let in_flow_document = SourceDocument {
            name: &name,
            partition: self.document.partition,
            tag: None,
            source_code: code,
            timestamp: self.document.timestamp,
        };
        let executable = Executable::new(&in_flow_document, &in_flow_context)?;

        // Seeded under the key the generated include compiles with
        let include_options = ParsingOptions {
            parser: self.context.options.include_parser.clone(),
            ..self.context.options.clone()
        };
        let key = include_options.compile_key();
        let descriptor =
            source.set_document_if_absent(&name, code, tag, Some((key.as_str(), Arc::new(executable))))?;

        // In-flow documents go stale with the document that embeds them
        if self.document.partition == source.identifier() {
            if let Ok(parent) = source.get_document(self.document.name) {
                parent.add_dependent(&descriptor);
            }
        }
        tracing::debug!(document = self.document.name, in_flow = %name, "registered in-flow document");

        let include = self.generated(
            active.source_code_for_expression_include(&format!("\"{}\"", name)),
            active.as_ref(),
            "include",
            position,
        )?;
        self.segments
            .push(RawSegment::program(include, Some(active_tag), position));
        Ok(())
    }

    fn generated(
        &self,
        code: Option<String>,
        adapter: &dyn LanguageAdapter,
        what: &'static str,
        position: SourcePosition,
    ) -> ParsingResult<String> {
        code.ok_or_else(|| ParsingError::Unsupported {
            document: self.document.name.to_string(),
            line: position.line,
            column: position.column,
            adapter: adapter.info().name.clone(),
            what,
        })
    }

    fn adapter_not_found(&self, position: SourcePosition, tag: &str) -> ParsingError {
        ParsingError::AdapterNotFound {
            document: self.document.name.to_string(),
            line: position.line,
            column: position.column,
            tag: tag.to_string(),
        }
    }

    fn syntax_error(&self, position: SourcePosition, message: String) -> ParsingError {
        ParsingError::Syntax {
            document: self.document.name.to_string(),
            line: position.line,
            column: position.column,
            message,
        }
    }
}

fn detect_marker<'b>(body: &'b str, options: &ParsingOptions) -> (Marker, &'b str) {
    let markers = &options.markers;
    let candidates = [
        (Marker::Comment, markers.comment.as_str()),
        (Marker::Expression, markers.expression.as_str()),
        (Marker::Include, markers.include.as_str()),
        (Marker::InFlow, markers.in_flow.as_str()),
    ];
    for (marker, prefix) in candidates {
        if !prefix.is_empty() {
            if let Some(rest) = body.strip_prefix(prefix) {
                return (marker, rest);
            }
        }
    }
    (Marker::None, body)
}

/// Split a leading language tag from the code. The tag ends at the first
/// whitespace character, which is consumed.
fn split_tag(rest: &str) -> (Option<&str>, &str) {
    if rest.chars().next().is_none_or(char::is_whitespace) {
        return (None, rest);
    }
    match rest.char_indices().find(|(_, ch)| ch.is_whitespace()) {
        Some((end, ws)) => (Some(&rest[..end]), &rest[end + ws.len_utf8()..]),
        None => (None, rest),
    }
}

/// Synthetic name of an in-flow document. The source timestamp is part of
/// the hash so a re-read document never reuses stale in-flow code.
fn in_flow_name(document: &SourceDocument<'_>, index: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(document.partition.as_bytes());
    hasher.update(b"|");
    hasher.update(document.name.as_bytes());
    hasher.update(b"|");
    hasher.update(document.timestamp.to_rfc3339().as_bytes());
    let digest = hasher.finalize().to_hex();
    format!("_IN_FLOW_{}_{}", &digest[..16], index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentSource, InMemoryDocumentSource};
    use crate::language::{AdapterInfo, LanguageManager, MiniAdapter};
    use crate::parser::SegmentKind;

    fn context() -> ParsingContext {
        let manager = LanguageManager::with_builtins();
        manager
            .register(Arc::new(MiniAdapter::with_info(AdapterInfo::new("JS", "js"))))
            .unwrap();
        ParsingContext::new(Arc::new(manager))
    }

    fn split(source: &str, context: &ParsingContext) -> ParsingResult<Vec<RawSegment>> {
        ScriptletsParser.split(&SourceDocument::detached("doc", source), context)
    }

    fn parse(source: &str, context: &ParsingContext) -> ParsingResult<Vec<Segment>> {
        ScriptletsParser.parse(&SourceDocument::detached("doc", source), context)
    }

    #[test]
    fn pure_literal_is_one_segment() {
        let segments = parse("just text\nno code", &context()).unwrap();
        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_literal());
        assert_eq!(segments[0].text(), "just text\nno code");
    }

    #[test]
    fn splits_literal_program_literal() {
        let raw = split("A<%js x%>B", &context()).unwrap();

        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0], RawSegment::literal("A", None, SourcePosition::new(1, 1)));
        assert_eq!(
            raw[1],
            RawSegment::program("x", Some("js".into()), SourcePosition::new(1, 2))
        );
        assert_eq!(
            raw[2],
            RawSegment::literal("B", Some("js".into()), SourcePosition::new(1, 10))
        );
    }

    #[test]
    fn tags_are_sticky() {
        let raw = split("<%js a%><% b%>", &context()).unwrap();

        assert_eq!(raw.len(), 2);
        assert_eq!(raw[1].kind, SegmentKind::Program);
        assert_eq!(raw[1].language_tag.as_deref(), Some("js"));
        assert_eq!(raw[1].text, " b");
    }

    #[test]
    fn untagged_scriptlet_without_language_fails() {
        assert!(matches!(
            split("x <% a %>", &context()),
            Err(ParsingError::AdapterNotFound { line: 1, column: 3, .. })
        ));
    }

    #[test]
    fn unknown_tag_fails_with_position() {
        let err = split("line\n  <%ruby puts%>", &context()).unwrap_err();
        match err {
            ParsingError::AdapterNotFound { line, column, tag, .. } => {
                assert_eq!((line, column), (2, 3));
                assert_eq!(tag, "ruby");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unterminated_scriptlet_fails_with_position() {
        let err = split("one\ntwo <%js print", &context()).unwrap_err();
        assert!(matches!(
            err,
            ParsingError::Syntax { line: 2, column: 5, .. }
        ));
    }

    #[test]
    fn comments_are_dropped_and_literals_merge() {
        let segments = parse("A<%-- hidden %>B", &context()).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text(), "AB");
    }

    #[test]
    fn expression_and_include_markers_generate_code() {
        let raw = split("<%=mini 1 + 2%><%&mini \"page\"%>", &context()).unwrap();
        assert_eq!(raw[0].text, "print (1 + 2);");
        assert_eq!(raw[1].text, "include (\"page\");");
    }

    #[test]
    fn trailing_literal_is_folded_into_the_program() {
        let segments = parse("A<%mini print 1;%>B", &context()).unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text(), "A");
        assert_eq!(segments[1].text(), "print 1;print \"B\";");
        assert_eq!(segments[1].index(), 1);
        // Merged segments report the later piece's position
        assert_eq!(segments[1].position(), SourcePosition::new(1, 19));
    }

    #[test]
    fn first_delimiter_pair_wins() {
        let mut context = context();
        context.options.default_language_tag = Some("mini".into());
        let raw = split("<? print 1 ?><% print 2 %>", &context).unwrap();

        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].text, " print 1 ");
        assert!(raw[1].is_literal());
        assert_eq!(raw[1].text, "<% print 2 %>");
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let raw = split("a\nbc<%js x%>\n\n  <%js y%>", &context()).unwrap();
        let positions: Vec<_> = raw.iter().map(|segment| segment.position).collect();
        assert_eq!(
            positions,
            vec![
                SourcePosition::new(1, 1),
                SourcePosition::new(2, 3),
                SourcePosition::new(2, 11),
                SourcePosition::new(4, 3),
            ]
        );
    }

    #[test]
    fn in_flow_scriptlets_become_included_documents() {
        let source: Arc<InMemoryDocumentSource<Executable>> =
            Arc::new(InMemoryDocumentSource::new("memory"));
        let context = context().with_document_source(source.clone());

        let raw = split("<%mini print 1;%><%:js print 2;%>", &context).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[1].language_tag.as_deref(), Some("mini"));
        assert!(raw[1].text.starts_with("include (\"_IN_FLOW_"));

        let documents = source.documents().unwrap();
        assert_eq!(documents.len(), 1);
        let include_options = ParsingOptions {
            parser: SCRIPTLETS_PARSER.into(),
            ..ParsingOptions::default()
        };
        let in_flow = documents[0].document(&include_options.compile_key()).unwrap();
        assert_eq!(in_flow.segments().len(), 1);
        assert_eq!(in_flow.segments()[0].language_tag(), Some("js"));
        assert_eq!(in_flow.segments()[0].text(), "print 2;");
    }

    #[test]
    fn in_flow_documents_are_invalidated_with_their_document() {
        let source: Arc<InMemoryDocumentSource<Executable>> =
            Arc::new(InMemoryDocumentSource::new("memory"));
        let page = source.set_document("page", "<%mini print 1;%><%:js print 2;%>", "");
        let context = context().with_document_source(source.clone());
        let document = SourceDocument {
            name: page.name(),
            partition: page.partition(),
            tag: None,
            source_code: page.source_code(),
            timestamp: page.timestamp(),
        };

        ScriptletsParser.split(&document, &context).unwrap();
        let in_flow = source
            .documents()
            .unwrap()
            .into_iter()
            .find(|descriptor| descriptor.name().starts_with("_IN_FLOW_"))
            .unwrap();

        page.invalidate();
        assert!(in_flow.is_invalidated());
    }

    #[test]
    fn in_flow_in_the_active_language_is_inline() {
        let raw = split("<%mini print 1;%><%:mini print 2;%>", &context()).unwrap();
        assert_eq!(raw[1].text, "print 2;");
        assert_eq!(raw[1].language_tag.as_deref(), Some("mini"));
    }

    #[test]
    fn in_flow_without_a_source_fails() {
        assert!(matches!(
            split("<%mini print 1;%><%:js print 2;%>", &context()),
            Err(ParsingError::MissingDocumentSource { .. })
        ));
    }

    #[test]
    fn ephemeral_tags_do_not_stick() {
        let manager = LanguageManager::with_builtins();
        manager
            .register(Arc::new(MiniAdapter::with_info(
                AdapterInfo::new("Once", "once").with_ephemeral(true),
            )))
            .unwrap();
        let context = ParsingContext::new(Arc::new(manager));

        let raw = split("<%mini a%><%once b%><% c%>", &context).unwrap();
        let tags: Vec<_> = raw
            .iter()
            .map(|segment| segment.language_tag.as_deref())
            .collect();
        assert_eq!(tags, vec![Some("mini"), Some("once"), Some("mini")]);
    }
}
