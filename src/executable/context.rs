//! Execution contexts
//!
//! A context carries the output sinks, attributes and services a program
//! runs against. It is a small state machine with three monotonic flags:
//!
//! - `immutable`: only reads are permitted from then on
//! - `enterable`: bound once to one executable for repeated entry
//! - `released`: terminal, every accessor fails
//!
//! Contexts are not safe for concurrent mutation. Making a context immutable
//! is the sanctioned way to share it between threads.
//!
//! Each thread has a "current context" slot ([`ExecutionContext::current`]).
//! The slot is thread-local: threads spawned from inside executing code do
//! not inherit it.

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{Executable, ExecutableId};
use crate::Value;
use crate::error::{ContextError, ContextResult, ExecutionResult};
use crate::language::{LanguageAdapter, lock_unless_thread_safe, same_adapter};

/// An arbitrary object exposed to executing code by name
pub type Service = Arc<dyn Any + Send + Sync>;

/// A destination for program output
pub type OutputSink = Box<dyn Write + Send>;

thread_local! {
    static CURRENT: RefCell<Option<Arc<ExecutionContext>>> = const { RefCell::new(None) };
}

#[derive(Default)]
struct ContextState {
    attributes: HashMap<String, Value>,
    services: HashMap<String, Service>,
    adapters: Vec<Arc<dyn LanguageAdapter>>,
    last_adapter: Option<Arc<dyn LanguageAdapter>>,
}

/// Per-invocation state passed through execution
pub struct ExecutionContext {
    state: RwLock<ContextState>,
    writer: Mutex<OutputSink>,
    error_writer: Mutex<OutputSink>,
    immutable: AtomicBool,
    released: AtomicBool,
    releasing: AtomicBool,
    enterable: OnceCell<ExecutableId>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Create a context writing to stdout and stderr
    pub fn new() -> Self {
        Self::with_sinks(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// Create a context with explicit output and error sinks
    pub fn with_sinks(writer: OutputSink, error_writer: OutputSink) -> Self {
        Self {
            state: RwLock::new(ContextState::default()),
            writer: Mutex::new(writer),
            error_writer: Mutex::new(error_writer),
            immutable: AtomicBool::new(false),
            released: AtomicBool::new(false),
            releasing: AtomicBool::new(false),
            enterable: OnceCell::new(),
        }
    }

    /// Create a context with an explicit output sink and stderr for errors
    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self::with_sinks(Box::new(writer), Box::new(io::stderr()))
    }

    fn check_readable(&self) -> ContextResult<()> {
        if self.released.load(Ordering::Acquire) {
            Err(ContextError::Released)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self) -> ContextResult<()> {
        self.check_readable()?;
        if self.immutable.load(Ordering::Acquire) {
            Err(ContextError::Immutable)
        } else {
            Ok(())
        }
    }

    /// Whether the context only permits reads
    pub fn is_immutable(&self) -> bool {
        self.immutable.load(Ordering::Acquire)
    }

    /// Whether the context has been released
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Whether the context has been bound to an executable for entering
    pub fn is_enterable(&self) -> bool {
        self.enterable.get().is_some()
    }

    /// The executable this context was made enterable for
    pub fn enterable_executable(&self) -> Option<ExecutableId> {
        self.enterable.get().copied()
    }

    /// Forbid further mutation. Calling this again has no effect.
    pub fn make_immutable(&self) -> ContextResult<()> {
        self.check_readable()?;
        self.immutable.store(true, Ordering::Release);
        Ok(())
    }

    /// Bind to an executable for entering and make immutable
    pub(crate) fn make_enterable(&self, executable: ExecutableId) -> ContextResult<()> {
        self.check_readable()?;
        self.enterable
            .set(executable)
            .map_err(|_| ContextError::AlreadyEnterable)?;
        self.make_immutable()
    }

    /// Read an attribute
    pub fn attribute(&self, name: &str) -> ContextResult<Option<Value>> {
        self.check_readable()?;
        Ok(self.state.read().attributes.get(name).cloned())
    }

    /// Snapshot of all attributes
    pub fn attributes(&self) -> ContextResult<HashMap<String, Value>> {
        self.check_readable()?;
        Ok(self.state.read().attributes.clone())
    }

    /// Set an attribute, returning the previous value
    pub fn set_attribute(
        &self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> ContextResult<Option<Value>> {
        self.check_writable()?;
        Ok(self
            .state
            .write()
            .attributes
            .insert(name.into(), value.into()))
    }

    /// Remove an attribute, returning its value
    pub fn remove_attribute(&self, name: &str) -> ContextResult<Option<Value>> {
        self.check_writable()?;
        Ok(self.state.write().attributes.remove(name))
    }

    /// Look up a service
    pub fn service(&self, name: &str) -> ContextResult<Option<Service>> {
        self.check_readable()?;
        Ok(self.state.read().services.get(name).cloned())
    }

    /// Look up a service of a concrete type
    pub fn service_as<T: Any + Send + Sync>(&self, name: &str) -> ContextResult<Option<Arc<T>>> {
        Ok(self
            .service(name)?
            .and_then(|service| service.downcast::<T>().ok()))
    }

    /// Install a service, returning the previous one
    pub fn set_service(&self, name: impl Into<String>, service: Service) -> ContextResult<Option<Service>> {
        self.check_writable()?;
        Ok(self.state.write().services.insert(name.into(), service))
    }

    /// Remove a service, returning it
    pub fn remove_service(&self, name: &str) -> ContextResult<Option<Service>> {
        self.check_writable()?;
        Ok(self.state.write().services.remove(name))
    }

    /// Replace the output sink
    pub fn set_writer(&self, writer: OutputSink) -> ContextResult<()> {
        self.check_writable()?;
        *self.writer.lock() = writer;
        Ok(())
    }

    /// Replace the error sink
    pub fn set_error_writer(&self, writer: OutputSink) -> ContextResult<()> {
        self.check_writable()?;
        *self.error_writer.lock() = writer;
        Ok(())
    }

    /// Write text to the output sink
    pub fn write_output(&self, text: &str) -> ContextResult<()> {
        self.check_readable()?;
        self.writer.lock().write_all(text.as_bytes())?;
        Ok(())
    }

    /// Write text to the error sink
    pub fn write_error(&self, text: &str) -> ContextResult<()> {
        self.check_readable()?;
        self.error_writer.lock().write_all(text.as_bytes())?;
        Ok(())
    }

    /// Flush both sinks
    pub fn flush(&self) -> ContextResult<()> {
        self.check_readable()?;
        self.writer.lock().flush()?;
        self.error_writer.lock().flush()?;
        Ok(())
    }

    /// The adapter that most recently ran in this context
    pub fn adapter(&self) -> ContextResult<Option<Arc<dyn LanguageAdapter>>> {
        self.check_readable()?;
        Ok(self.state.read().last_adapter.clone())
    }

    /// Every distinct adapter that has run in this context
    pub fn adapters(&self) -> ContextResult<Vec<Arc<dyn LanguageAdapter>>> {
        self.check_readable()?;
        Ok(self.state.read().adapters.clone())
    }

    /// Record that an adapter is about to run in this context.
    ///
    /// This is bookkeeping for release, so it is allowed on immutable contexts.
    pub fn add_adapter(&self, adapter: Arc<dyn LanguageAdapter>) -> ContextResult<()> {
        self.check_readable()?;
        let mut state = self.state.write();
        if !state
            .adapters
            .iter()
            .any(|known| same_adapter(known, &adapter))
        {
            state.adapters.push(adapter.clone());
        }
        state.last_adapter = Some(adapter);
        Ok(())
    }

    /// Invoke a named entry point through the last-used adapter
    pub fn enter(
        self: &Arc<Self>,
        executable: &Executable,
        entry_point: &str,
        arguments: &[Value],
    ) -> ExecutionResult<Value> {
        let adapter = self.adapter()?.ok_or(ContextError::NoAdapter)?;
        let _lock = lock_unless_thread_safe(adapter.as_ref());
        let _current = CurrentGuard::install(self);
        adapter.enter(entry_point, executable, self, arguments)
    }

    /// Release per-context resources held by every adapter that ran here.
    ///
    /// Fails if the context was already released.
    pub fn release(&self) -> ContextResult<()> {
        if self
            .releasing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ContextError::AlreadyReleased);
        }

        let adapters = std::mem::take(&mut self.state.write().adapters);
        for adapter in &adapters {
            adapter.release_context(self);
        }
        self.released.store(true, Ordering::Release);
        tracing::trace!(adapters = adapters.len(), "released execution context");
        Ok(())
    }

    /// The context that is current on this thread
    pub fn current() -> Option<Arc<ExecutionContext>> {
        CURRENT.with(|slot| slot.borrow().clone())
    }

    /// Replace this thread's current context, returning the previous one
    pub fn set_current(context: Option<Arc<ExecutionContext>>) -> Option<Arc<ExecutionContext>> {
        CURRENT.with(|slot| slot.replace(context))
    }

    /// Clear this thread's current context, returning it
    pub fn clear_current() -> Option<Arc<ExecutionContext>> {
        Self::set_current(None)
    }

    /// Make this the current context on this thread, returning the previous
    /// one. Callers are expected to restore it.
    pub fn make_current(self: &Arc<Self>) -> Option<Arc<ExecutionContext>> {
        Self::set_current(Some(self.clone()))
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if !self.releasing.load(Ordering::Acquire) {
            if let Err(err) = self.release() {
                tracing::debug!("releasing dropped execution context failed: {}", err);
            }
        }
    }
}

/// Makes a context current and restores the previous one when dropped
pub(crate) struct CurrentGuard {
    previous: Option<Arc<ExecutionContext>>,
}

impl CurrentGuard {
    pub(crate) fn install(context: &Arc<ExecutionContext>) -> Self {
        Self {
            previous: context.make_current(),
        }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        ExecutionContext::set_current(self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn released_context_rejects_everything() {
        let context = ExecutionContext::new();
        context.set_attribute("a", 1).unwrap();
        context.release().unwrap();

        assert!(matches!(context.attribute("a"), Err(ContextError::Released)));
        assert!(matches!(context.attributes(), Err(ContextError::Released)));
        assert!(matches!(context.set_attribute("a", 2), Err(ContextError::Released)));
        assert!(matches!(context.service("s"), Err(ContextError::Released)));
        assert!(matches!(context.write_output("x"), Err(ContextError::Released)));
        assert!(matches!(context.adapter(), Err(ContextError::Released)));
        assert!(matches!(context.make_immutable(), Err(ContextError::Released)));
        assert!(matches!(context.release(), Err(ContextError::AlreadyReleased)));
    }

    #[test]
    fn immutable_context_allows_reads_only() {
        let context = ExecutionContext::new();
        context.set_attribute("name", "tessera").unwrap();
        context.make_immutable().unwrap();
        context.make_immutable().unwrap();

        assert_eq!(context.attribute("name").unwrap(), Some(json!("tessera")));
        assert!(matches!(context.set_attribute("name", "x"), Err(ContextError::Immutable)));
        assert!(matches!(context.remove_attribute("name"), Err(ContextError::Immutable)));
        assert!(matches!(
            context.set_service("s", Arc::new(1u8)),
            Err(ContextError::Immutable)
        ));
        assert!(context.is_immutable());
    }

    #[test]
    fn services_downcast_to_their_type() {
        let context = ExecutionContext::new();
        context.set_service("count", Arc::new(42u32)).unwrap();

        assert_eq!(*context.service_as::<u32>("count").unwrap().unwrap(), 42);
        assert!(context.service_as::<String>("count").unwrap().is_none());
    }

    #[test]
    fn current_slot_is_restored() {
        let outer = Arc::new(ExecutionContext::new());
        let inner = Arc::new(ExecutionContext::new());

        let before = outer.make_current();
        {
            let _guard = CurrentGuard::install(&inner);
            assert!(Arc::ptr_eq(&ExecutionContext::current().unwrap(), &inner));
        }
        assert!(Arc::ptr_eq(&ExecutionContext::current().unwrap(), &outer));
        ExecutionContext::set_current(before);
    }

    #[test]
    fn enterable_binding_happens_once() {
        let context = ExecutionContext::new();
        let id = ExecutableId::new();
        context.make_enterable(id).unwrap();

        assert!(context.is_enterable());
        assert!(context.is_immutable());
        assert_eq!(context.enterable_executable(), Some(id));
        assert!(matches!(
            context.make_enterable(ExecutableId::new()),
            Err(ContextError::AlreadyEnterable)
        ));
    }
}
