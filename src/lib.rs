//! Tessera – a host for multi-language executable documents
//!
//! A document mixes literal text with program fragments written in
//! pluggable languages. Tessera provides:
//! - A registry of language adapters resolved by tag or filename extension
//! - A document store with file-backed caching and dependency invalidation
//! - A scriptlet parser and a segment optimizer
//! - Executables run once per request or bound to an enterable context
//! - Execution contexts with a mutable/immutable/released state machine

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Host configuration and persistence
pub mod config;
/// Document sources and cached descriptors
pub mod document;
/// Error types
pub mod error;
/// Executables, segments and execution contexts
pub mod executable;
/// Language adapters and their registry
pub mod language;
/// Document parsers and the segment optimizer
pub mod parser;

/// Values exchanged with executing code
pub type Value = serde_json::Value;

// Re-export key types for convenience
pub use config::HostConfig;
pub use document::{DocumentDescriptor, DocumentSource, FileDocumentSource, InMemoryDocumentSource};
pub use error::{Error, Result};
pub use executable::context::ExecutionContext;
pub use executable::global::GlobalScope;
pub use executable::{Executable, ExecutionController};
pub use language::{AdapterInfo, LanguageAdapter, LanguageManager, MiniAdapter, Program};
pub use parser::{ParserManager, ParsingContext, ParsingOptions};

/// Current version of Tessera
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
