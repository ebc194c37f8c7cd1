//! Executables and their lifecycle
//!
//! An [`Executable`] is the compiled form of one document: its optimised
//! segment list plus the metadata needed to run it and to resolve further
//! documents it includes. Two protocols drive it:
//!
//! - `execute` runs the segments in order against a context, any number of
//!   times, from any number of threads with separate contexts.
//! - `make_enterable` runs it once against a context and binds that context
//!   under a key; `enter` then invokes named entry points in it repeatedly.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

pub mod context;
pub mod global;
pub mod segment;

use crate::Value;
use crate::document::DocumentSource;
use crate::error::{
    ContextError, DocumentError, ExecutionError, ExecutionResult, ParsingError, ParsingResult,
    PreparationResult,
};
use crate::language::{LanguageManager, lock_unless_thread_safe};
use crate::parser::{ParserManager, ParsingContext, ParsingOptions, SourceDocument};
use context::{CurrentGuard, ExecutionContext, Service};
use segment::Segment;

/// Includes nested deeper than this on one thread fail instead of recursing
pub const MAX_INCLUDE_DEPTH: usize = 64;

thread_local! {
    static INCLUDE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts one level of include nesting on this thread while alive
struct IncludeGuard;

impl IncludeGuard {
    fn enter(name: &str) -> ExecutionResult<Self> {
        let entered = INCLUDE_DEPTH.with(|depth| {
            let next = depth.get() + 1;
            if next > MAX_INCLUDE_DEPTH {
                return false;
            }
            depth.set(next);
            true
        });
        if entered {
            Ok(Self)
        } else {
            tracing::warn!(document = name, "include depth exceeded");
            Err(DocumentError::DependencyLoop(name.to_string()).into())
        }
    }
}

impl Drop for IncludeGuard {
    fn drop(&mut self) {
        INCLUDE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Unique identity of an executable instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutableId(Uuid);

impl ExecutableId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller hooks around one execution of a mutable context
pub trait ExecutionController: Send + Sync {
    /// Called before the first segment runs
    fn initialize(&self, context: &ExecutionContext) -> ExecutionResult<()>;

    /// Called after the last segment, also when a segment failed
    fn release(&self, context: &ExecutionContext);
}

/// A compiled document
pub struct Executable {
    id: ExecutableId,
    document_name: String,
    partition: String,
    document_timestamp: DateTime<Utc>,
    language_manager: Arc<LanguageManager>,
    parser_manager: Arc<ParserManager>,
    document_source: Option<Weak<dyn DocumentSource<Executable>>>,
    options: ParsingOptions,
    segments: Vec<Segment>,
    attributes: RwLock<HashMap<String, Value>>,
    last_used: AtomicI64,
    enterable_contexts: RwLock<HashMap<String, Arc<ExecutionContext>>>,
}

impl Executable {
    /// Parse and compile a document with the parser named in the options
    pub fn new(document: &SourceDocument<'_>, context: &ParsingContext) -> ParsingResult<Self> {
        let parser = context.parser_manager.parser(&context.options.parser)?;
        let segments = parser.parse(document, context)?;

        let executable = Self {
            id: ExecutableId::new(),
            document_name: document.name.to_string(),
            partition: document.partition.to_string(),
            document_timestamp: document.timestamp,
            language_manager: context.language_manager.clone(),
            parser_manager: context.parser_manager.clone(),
            document_source: context.document_source.as_ref().map(Arc::downgrade),
            options: context.options.clone(),
            segments,
            attributes: RwLock::new(HashMap::new()),
            last_used: AtomicI64::new(Utc::now().timestamp_millis()),
            enterable_contexts: RwLock::new(HashMap::new()),
        };
        if context.options.prepare {
            executable.prepare()?;
        }

        tracing::debug!(
            document = %executable.document_name,
            parser = %context.options.parser,
            segments = executable.segments.len(),
            "created executable"
        );
        Ok(executable)
    }

    /// Compile source text that did not come from a document source
    pub fn from_source(name: &str, source_code: &str, context: &ParsingContext) -> ParsingResult<Self> {
        Self::new(&SourceDocument::detached(name, source_code), context)
    }

    /// Fetch a document from the context's source and compile it, at most
    /// once per descriptor and compile key (see
    /// [`ParsingOptions::compile_key`]). Concurrent callers share the single
    /// winner.
    pub fn create_once(name: &str, context: &ParsingContext) -> ParsingResult<Arc<Executable>> {
        let source = context
            .document_source
            .as_ref()
            .ok_or_else(|| ParsingError::MissingDocumentSource {
                document: name.to_string(),
            })?;
        let descriptor = source.get_document(name)?;
        let key = context.options.compile_key();
        descriptor.document_or_try_init(&key, || {
            let tag = Some(descriptor.tag()).filter(|tag| !tag.is_empty());
            let document = SourceDocument {
                name: descriptor.name(),
                partition: descriptor.partition(),
                tag,
                source_code: descriptor.source_code(),
                timestamp: descriptor.timestamp(),
            };
            Executable::new(&document, context).map(Arc::new)
        })
    }

    /// Identity of this instance
    pub fn id(&self) -> ExecutableId {
        self.id
    }

    /// Name of the source document
    pub fn document_name(&self) -> &str {
        &self.document_name
    }

    /// Identifier of the source the document came from
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Modification time of the source document
    pub fn document_timestamp(&self) -> DateTime<Utc> {
        self.document_timestamp
    }

    /// The optimised segments, in execution order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the document is a single literal and needs no execution
    pub fn is_pure_literal(&self) -> bool {
        matches!(self.segments.as_slice(), [segment] if segment.is_literal())
    }

    /// The text of a pure literal document
    pub fn literal_text(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [Segment::Literal(literal)] => Some(&literal.text),
            _ => None,
        }
    }

    /// Adapter registry programs were compiled against
    pub fn language_manager(&self) -> &Arc<LanguageManager> {
        &self.language_manager
    }

    /// Rebuild the parsing context this executable was created with
    pub fn parsing_context(&self) -> ParsingContext {
        ParsingContext {
            language_manager: self.language_manager.clone(),
            parser_manager: self.parser_manager.clone(),
            document_source: self.document_source.as_ref().and_then(Weak::upgrade),
            options: self.options.clone(),
        }
    }

    /// When this executable last ran or was entered successfully
    pub fn last_used(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_used.load(Ordering::Relaxed))
            .single()
            .unwrap_or(self.document_timestamp)
    }

    fn touch(&self) {
        self.last_used
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Read an executable-level attribute
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.read().get(name).cloned()
    }

    /// Set an executable-level attribute, returning the previous value
    pub fn set_attribute(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.attributes.write().insert(name.into(), value.into())
    }

    /// Compile every program segment eagerly
    pub fn prepare(&self) -> PreparationResult<()> {
        for segment in &self.segments {
            if let Segment::Program(program) = segment {
                program.program.prepare()?;
            }
        }
        Ok(())
    }

    /// Run every segment in order against `context`.
    ///
    /// The context is current on this thread for the duration. On a mutable
    /// context the container is installed under the configured service name
    /// and restored afterwards, and the controller brackets the run. Both are
    /// skipped on an immutable context.
    pub fn execute(
        &self,
        context: &Arc<ExecutionContext>,
        container: Option<Service>,
        controller: Option<&dyn ExecutionController>,
    ) -> ExecutionResult<()> {
        if context.is_released() {
            return Err(ContextError::Released.into());
        }
        let _current = CurrentGuard::install(context);
        let mutable = !context.is_immutable();

        let service_name = self.options.container_service_name.as_str();
        let previous_container = match container {
            Some(container) if mutable => Some(context.set_service(service_name, container)?),
            _ => None,
        };

        let result = self.run_controlled(context, controller.filter(|_| mutable));

        if let Some(previous) = previous_container {
            let restored = match previous {
                Some(previous) => context.set_service(service_name, previous).map(drop),
                None => context.remove_service(service_name).map(drop),
            };
            if let Err(err) = restored {
                tracing::warn!(document = %self.document_name, "restoring container failed: {}", err);
            }
        }

        if result.is_ok() {
            self.touch();
        }
        result
    }

    fn run_controlled(
        &self,
        context: &Arc<ExecutionContext>,
        controller: Option<&dyn ExecutionController>,
    ) -> ExecutionResult<()> {
        if let Some(controller) = controller {
            controller.initialize(context)?;
        }
        let result = self.run_segments(context);
        if let Some(controller) = controller {
            controller.release(context);
        }
        result
    }

    fn run_segments(&self, context: &Arc<ExecutionContext>) -> ExecutionResult<()> {
        for segment in &self.segments {
            let position = segment.position();
            let result = match segment {
                Segment::Literal(literal) => context
                    .write_output(&literal.text)
                    .map_err(ExecutionError::from),
                Segment::Program(program) => {
                    context.add_adapter(program.adapter.clone())?;
                    let _lock = lock_unless_thread_safe(program.adapter.as_ref());
                    program.program.execute(self, context)
                }
            };
            result.map_err(|err| err.with_frame(&self.document_name, position.line, position.column))?;
        }
        Ok(())
    }

    /// Run against `context` once and bind it under `key` for entering.
    ///
    /// Returns `Ok(false)` without consuming the context if `key` is
    /// already bound. On success the context is permanently immutable.
    pub fn make_enterable(
        &self,
        key: &str,
        context: Arc<ExecutionContext>,
        container: Option<Service>,
        controller: Option<&dyn ExecutionController>,
    ) -> ExecutionResult<bool> {
        if self.enterable_contexts.read().contains_key(key) {
            return Ok(false);
        }
        if context.is_enterable() {
            return Err(ContextError::AlreadyEnterable.into());
        }

        self.execute(&context, container, controller)?;

        let mut contexts = self.enterable_contexts.write();
        if contexts.contains_key(key) {
            return Ok(false);
        }
        context.make_enterable(self.id)?;
        contexts.insert(key.to_string(), context);
        tracing::debug!(document = %self.document_name, key, "bound enterable context");
        Ok(true)
    }

    /// The context bound under `key`, if any
    pub fn enterable_context(&self, key: &str) -> Option<Arc<ExecutionContext>> {
        self.enterable_contexts.read().get(key).cloned()
    }

    /// Invoke a named entry point in the context bound under `key`
    pub fn enter(&self, key: &str, entry_point: &str, arguments: &[Value]) -> ExecutionResult<Value> {
        let context = self
            .enterable_context(key)
            .ok_or_else(|| ContextError::NotEnterable(key.to_string()))?;
        if context.enterable_executable() != Some(self.id) {
            return Err(ContextError::ForeignExecutable(key.to_string()).into());
        }

        let value = context.enter(self, entry_point, arguments)?;
        self.touch();
        Ok(value)
    }

    /// Unbind and release the context bound under `key`
    pub fn release_enterable(&self, key: &str) -> ExecutionResult<bool> {
        let Some(context) = self.enterable_contexts.write().remove(key) else {
            return Ok(false);
        };
        context.release()?;
        Ok(true)
    }

    /// Include another document by name and run it against `context`.
    ///
    /// The included document is compiled with the include parser and cached
    /// on its descriptor. When this executable's own document comes from the
    /// same source, it records the included document as a dependency.
    ///
    /// Fails with a dependency loop error once includes nest deeper than
    /// [`MAX_INCLUDE_DEPTH`] on this thread.
    pub fn include(&self, name: &str, context: &Arc<ExecutionContext>) -> ExecutionResult<()> {
        let _depth = IncludeGuard::enter(name)?;
        let mut parsing_context = self.parsing_context();
        parsing_context.options.parser = self.options.include_parser.clone();
        let source = parsing_context
            .document_source
            .clone()
            .ok_or_else(|| ParsingError::MissingDocumentSource {
                document: name.to_string(),
            })?;

        let included = Executable::create_once(name, &parsing_context)?;

        if self.partition == source.identifier() {
            if let (Ok(includer), Ok(dependency)) = (
                source.get_document(&self.document_name),
                source.get_document(name),
            ) {
                includer.add_dependency(&dependency);
            }
        }

        tracing::trace!(document = %self.document_name, included = name, "including document");
        included.execute(context, None, None)
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("id", &self.id)
            .field("document_name", &self.document_name)
            .field("partition", &self.partition)
            .field("segments", &self.segments)
            .finish()
    }
}
