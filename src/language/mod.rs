//! Pluggable language adapters
//!
//! An adapter bridges one language runtime into the pipeline. Besides
//! compiling fragments into [`Program`]s it generates host-language source
//! for the four shapes the scriptlet parser needs: printing a literal,
//! printing an expression, including a document by name and invoking an
//! entry point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::Value;
use crate::error::{ExecutionResult, ParsingResult, PreparationResult};
use crate::executable::context::ExecutionContext;
use crate::executable::segment::SourcePosition;
use crate::executable::Executable;

pub mod manager;
pub mod mini;

pub use manager::LanguageManager;
pub use mini::MiniAdapter;

/// Static description of an adapter and the language it serves
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterInfo {
    /// Adapter name
    pub name: String,
    /// Adapter version
    pub version: String,
    /// Human-readable language name
    pub language_name: String,
    /// Tags this adapter answers to; the first is the default
    pub tags: Vec<String>,
    /// Filename extensions this adapter answers to; the first is the default
    pub extensions: Vec<String>,
    /// Tie-break priority when several adapters share a tag or extension
    pub priority: i32,
    /// Programs may run concurrently without the adapter lock
    pub thread_safe: bool,
    /// Tags resolving to this adapter never become sticky
    pub ephemeral: bool,
}

impl AdapterInfo {
    /// Describe an adapter answering to a single tag
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            language_name: name.clone(),
            name,
            version: env!("CARGO_PKG_VERSION").to_string(),
            tags: vec![tag.into()],
            extensions: Vec::new(),
            priority: 0,
            thread_safe: false,
            ephemeral: false,
        }
    }

    /// Add another tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add a filename extension
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extensions.push(extension.into());
        self
    }

    /// Set the tie-break priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Declare whether programs may run concurrently
    pub fn with_thread_safe(mut self, thread_safe: bool) -> Self {
        self.thread_safe = thread_safe;
        self
    }

    /// Declare whether tags for this adapter stay sticky
    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    /// The tag used when none is given explicitly
    pub fn default_tag(&self) -> &str {
        self.tags.first().map(String::as_str).unwrap_or_default()
    }

    /// The extension used when none is given explicitly
    pub fn default_extension(&self) -> Option<&str> {
        self.extensions.first().map(String::as_str)
    }
}

/// Per-instance state every adapter embeds: its lock and registration claim
#[derive(Debug, Default)]
pub struct AdapterCore {
    lock: ReentrantMutex<()>,
    registered: AtomicBool,
}

impl AdapterCore {
    /// Create unregistered adapter state
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the adapter lock.
    ///
    /// The lock is reentrant: a program that includes another document in
    /// the same language re-acquires it on the same thread.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Claim the adapter for a manager; false if another manager owns it
    pub(crate) fn claim(&self) -> bool {
        self.registered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Compiled form of one program segment
pub trait Program: Send + Sync {
    /// Compile eagerly. Calling this more than once has no further effect.
    fn prepare(&self) -> PreparationResult<()>;

    /// Run the program against a context
    fn execute(&self, executable: &Executable, context: &Arc<ExecutionContext>)
    -> ExecutionResult<()>;
}

/// Capability object bridging one language runtime into the pipeline
pub trait LanguageAdapter: Send + Sync {
    /// Static description
    fn info(&self) -> &AdapterInfo;

    /// Lock and registration state
    fn core(&self) -> &AdapterCore;

    /// Source code that writes `literal` verbatim to the output sink
    fn source_code_for_literal_output(&self, literal: &str) -> Option<String>;

    /// Source code that writes the value of `expression` to the output sink
    fn source_code_for_expression_output(&self, expression: &str) -> Option<String>;

    /// Source code that includes the document named by `expression`
    fn source_code_for_expression_include(&self, expression: &str) -> Option<String>;

    /// Source code that invokes a named entry point
    fn source_code_for_entry_point_invocation(&self, _entry_point: &str) -> Option<String> {
        None
    }

    /// Compile a source fragment
    fn create_program(
        &self,
        source_code: &str,
        is_scriptlet: bool,
        position: SourcePosition,
        document_name: &str,
    ) -> ParsingResult<Box<dyn Program>>;

    /// Invoke a named entry point in an enterable context
    fn enter(
        &self,
        entry_point: &str,
        executable: &Executable,
        context: &Arc<ExecutionContext>,
        arguments: &[Value],
    ) -> ExecutionResult<Value>;

    /// Reclaim per-context resources; called once when the context is released
    fn release_context(&self, _context: &ExecutionContext) {}
}

/// Identity comparison for shared adapters
pub(crate) fn same_adapter(a: &Arc<dyn LanguageAdapter>, b: &Arc<dyn LanguageAdapter>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Acquire the adapter lock unless the adapter declares itself thread safe
pub(crate) fn lock_unless_thread_safe(
    adapter: &dyn LanguageAdapter,
) -> Option<ReentrantMutexGuard<'_, ()>> {
    if adapter.info().thread_safe {
        None
    } else {
        Some(adapter.core().lock())
    }
}
