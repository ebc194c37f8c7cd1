//! Document parsers
//!
//! A parser turns a document's source text into an ordered, optimised list
//! of [`Segment`]s. Three parsers ship by default:
//!
//! - `program`: the whole document is one program (the default)
//! - `text`: the whole document is one literal
//! - `scriptlets`: literal text mixed with delimited scriptlets

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::document::DocumentSource;
use crate::error::{ParsingError, ParsingResult};
use crate::executable::Executable;
use crate::executable::segment::Segment;
use crate::language::{LanguageAdapter, LanguageManager};

pub mod optimizer;
pub mod program;
pub mod scriptlets;

pub use optimizer::{RawSegment, SegmentKind};
pub use program::{ProgramParser, TextParser};
pub use scriptlets::ScriptletsParser;

/// Name of the whole-document-as-program parser
pub const PROGRAM_PARSER: &str = "program";
/// Name of the pure literal parser
pub const TEXT_PARSER: &str = "text";
/// Name of the mixed literal/scriptlet parser
pub const SCRIPTLETS_PARSER: &str = "scriptlets";

/// A start/end delimiter pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelimiterPair {
    /// Opens a scriptlet
    pub start: String,
    /// Closes a scriptlet
    pub end: String,
}

impl DelimiterPair {
    /// Create a delimiter pair
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Leading markers that change how a scriptlet is treated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptletMarkers {
    /// Scriptlet is dropped
    pub comment: String,
    /// Scriptlet is an expression whose value is written to output
    pub expression: String,
    /// Scriptlet is an expression naming a document to include
    pub include: String,
    /// Scriptlet is compiled as a separate document and included
    pub in_flow: String,
}

impl Default for ScriptletMarkers {
    fn default() -> Self {
        Self {
            comment: "--".to_string(),
            expression: "=".to_string(),
            include: "&".to_string(),
            in_flow: ":".to_string(),
        }
    }
}

/// Options controlling how documents are parsed and compiled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingOptions {
    /// Parser used for top-level documents
    pub parser: String,

    /// Parser used for documents included by name
    pub include_parser: String,

    /// Language for untagged program text; falls back to the document's
    /// extension when unset
    pub default_language_tag: Option<String>,

    /// Eagerly prepare every program when an executable is created
    pub prepare: bool,

    /// Delimiter pairs; a document uses whichever pair it opens first
    pub delimiters: Vec<DelimiterPair>,

    /// Scriptlet markers
    pub markers: ScriptletMarkers,

    /// Service name the caller's container is installed under
    pub container_service_name: String,
}

impl Default for ParsingOptions {
    fn default() -> Self {
        Self {
            parser: PROGRAM_PARSER.to_string(),
            include_parser: SCRIPTLETS_PARSER.to_string(),
            default_language_tag: None,
            prepare: false,
            delimiters: vec![DelimiterPair::new("<%", "%>"), DelimiterPair::new("<?", "?>")],
            markers: ScriptletMarkers::default(),
            container_service_name: "container".to_string(),
        }
    }
}

impl ParsingOptions {
    /// Key under which a document's compiled form is cached.
    ///
    /// Two option sets share a key only if they compile every document the
    /// same way, so a descriptor keeps one executable per parser and
    /// option combination.
    pub fn compile_key(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        let mut field = |value: &str| {
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        };
        field(&self.parser);
        field(&self.include_parser);
        field(self.default_language_tag.as_deref().unwrap_or(""));
        field(if self.default_language_tag.is_some() { "tagged" } else { "untagged" });
        field(if self.prepare { "prepare" } else { "lazy" });
        for pair in &self.delimiters {
            field(&pair.start);
            field(&pair.end);
        }
        field(&self.markers.comment);
        field(&self.markers.expression);
        field(&self.markers.include);
        field(&self.markers.in_flow);
        field(&self.container_service_name);
        format!("{}:{}", self.parser, &hasher.finalize().to_hex()[..16])
    }
}

/// Everything a parser needs besides the document itself
#[derive(Clone)]
pub struct ParsingContext {
    /// Adapter registry
    pub language_manager: Arc<LanguageManager>,
    /// Parser registry
    pub parser_manager: Arc<ParserManager>,
    /// Source for includes and in-flow documents
    pub document_source: Option<Arc<dyn DocumentSource<Executable>>>,
    /// Parsing options
    pub options: ParsingOptions,
}

impl ParsingContext {
    /// Create a context with default options and no document source
    pub fn new(language_manager: Arc<LanguageManager>) -> Self {
        Self {
            language_manager,
            parser_manager: Arc::new(ParserManager::default()),
            document_source: None,
            options: ParsingOptions::default(),
        }
    }

    /// Use a document source
    pub fn with_document_source(mut self, source: Arc<dyn DocumentSource<Executable>>) -> Self {
        self.document_source = Some(source);
        self
    }

    /// Use parsing options
    pub fn with_options(mut self, options: ParsingOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a named parser for top-level documents
    pub fn with_parser(mut self, parser: impl Into<String>) -> Self {
        self.options.parser = parser.into();
        self
    }

    /// Resolve an adapter by tag, reporting a positioned error if missing
    pub(crate) fn adapter_for(
        &self,
        tag: &str,
        document: &str,
        position: crate::executable::segment::SourcePosition,
    ) -> ParsingResult<Arc<dyn LanguageAdapter>> {
        self.language_manager
            .adapter_by_tag(tag)
            .ok_or_else(|| ParsingError::AdapterNotFound {
                document: document.to_string(),
                line: position.line,
                column: position.column,
                tag: tag.to_string(),
            })
    }

    /// The tag untagged program text starts out in: the configured default,
    /// else the default tag of the adapter owning the document's extension
    pub(crate) fn initial_language_tag(&self, document: &SourceDocument<'_>) -> Option<String> {
        if let Some(tag) = &self.options.default_language_tag {
            return Some(tag.clone());
        }
        self.language_manager
            .adapter_by_extension(document.name, document.tag)
            .map(|adapter| adapter.info().default_tag().to_string())
    }
}

/// A document handed to a parser
#[derive(Debug, Clone, Copy)]
pub struct SourceDocument<'a> {
    /// Document name
    pub name: &'a str,
    /// Identifier of the source the document came from
    pub partition: &'a str,
    /// Document tag, usually the filename extension
    pub tag: Option<&'a str>,
    /// Source text
    pub source_code: &'a str,
    /// Last modification time of the source text
    pub timestamp: DateTime<Utc>,
}

impl<'a> SourceDocument<'a> {
    /// A document that did not come from a source
    pub fn detached(name: &'a str, source_code: &'a str) -> Self {
        Self {
            name,
            partition: "",
            tag: None,
            source_code,
            timestamp: Utc::now(),
        }
    }
}

/// Turns source text into segments
pub trait DocumentParser: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Parse, optimise and compile a document
    fn parse(&self, document: &SourceDocument<'_>, context: &ParsingContext) -> ParsingResult<Vec<Segment>>;
}

/// Registry of named parsers
pub struct ParserManager {
    parsers: RwLock<HashMap<String, Arc<dyn DocumentParser>>>,
}

impl Default for ParserManager {
    fn default() -> Self {
        let manager = Self::empty();
        manager.register(Arc::new(ProgramParser));
        manager.register(Arc::new(TextParser));
        manager.register(Arc::new(ScriptletsParser));
        manager
    }
}

impl ParserManager {
    /// Create a registry with no parsers
    pub fn empty() -> Self {
        Self {
            parsers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a parser, replacing any parser with the same name
    pub fn register(&self, parser: Arc<dyn DocumentParser>) {
        self.parsers.write().insert(parser.name().to_string(), parser);
    }

    /// Look up a parser by name
    pub fn parser(&self, name: &str) -> ParsingResult<Arc<dyn DocumentParser>> {
        self.parsers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ParsingError::ParserNotFound(name.to_string()))
    }

    /// Names of all registered parsers
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.parsers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parsers_are_registered() {
        let manager = ParserManager::default();
        assert_eq!(manager.names(), vec!["program", "scriptlets", "text"]);
        assert!(matches!(
            manager.parser("jsp"),
            Err(ParsingError::ParserNotFound(name)) if name == "jsp"
        ));
    }

    #[test]
    fn options_round_trip_through_json() {
        let options = ParsingOptions {
            default_language_tag: Some("mini".into()),
            ..ParsingOptions::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        let parsed: ParsingOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, options);

        let partial: ParsingOptions = serde_json::from_str(r#"{"parser":"scriptlets"}"#).unwrap();
        assert_eq!(partial.parser, "scriptlets");
        assert_eq!(partial.delimiters.len(), 2);
    }

    #[test]
    fn compile_keys_follow_the_options() {
        let base = ParsingOptions::default();
        assert_eq!(base.compile_key(), ParsingOptions::default().compile_key());
        assert!(base.compile_key().starts_with("program:"));

        let scriptlets = ParsingOptions {
            parser: SCRIPTLETS_PARSER.into(),
            ..ParsingOptions::default()
        };
        let tagged = ParsingOptions {
            default_language_tag: Some("mini".into()),
            ..ParsingOptions::default()
        };
        let delimited = ParsingOptions {
            delimiters: vec![DelimiterPair::new("{{", "}}")],
            ..ParsingOptions::default()
        };
        let keys = [
            base.compile_key(),
            scriptlets.compile_key(),
            tagged.compile_key(),
            delimited.compile_key(),
        ];
        for (i, key) in keys.iter().enumerate() {
            assert!(keys[i + 1..].iter().all(|other| other != key), "{key}");
        }
    }
}
