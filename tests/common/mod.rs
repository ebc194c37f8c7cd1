//! Shared test fixtures: an in-memory output sink and a counting language
//! whose programs record how they were compiled, run and released.

#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tessera::error::{ExecutionError, ExecutionResult, ParsingResult, PreparationResult};
use tessera::executable::segment::SourcePosition;
use tessera::language::AdapterCore;
use tessera::{
    AdapterInfo, Executable, ExecutionContext, LanguageAdapter, LanguageManager, MiniAdapter,
    ParsingContext, Program, Value,
};

/// Clonable sink collecting everything written to it
#[derive(Clone, Default)]
pub struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Buffer {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A context writing into a fresh buffer
pub fn buffered_context() -> (Arc<ExecutionContext>, Buffer) {
    let output = Buffer::default();
    (Arc::new(ExecutionContext::with_writer(output.clone())), output)
}

/// Counters shared by a counting adapter and its programs
#[derive(Default)]
pub struct AdapterStats {
    pub compiled: AtomicUsize,
    pub executed: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub released: AtomicUsize,
}

impl AdapterStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn enter_body(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(5));
    }

    fn leave_body(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Language whose programs print their own source text. Source text
/// `fail` raises an execution error instead.
pub struct CountingAdapter {
    info: AdapterInfo,
    core: AdapterCore,
    pub stats: Arc<AdapterStats>,
}

impl CountingAdapter {
    pub fn new(tag: &str, thread_safe: bool) -> Self {
        Self {
            info: AdapterInfo::new(format!("Counting-{tag}"), tag)
                .with_extension(tag)
                .with_thread_safe(thread_safe),
            core: AdapterCore::new(),
            stats: Arc::new(AdapterStats::default()),
        }
    }
}

struct CountingProgram {
    text: String,
    stats: Arc<AdapterStats>,
}

impl Program for CountingProgram {
    fn prepare(&self) -> PreparationResult<()> {
        Ok(())
    }

    fn execute(&self, _executable: &Executable, context: &Arc<ExecutionContext>) -> ExecutionResult<()> {
        self.stats.executed.fetch_add(1, Ordering::SeqCst);
        if self.text.trim() == "fail" {
            return Err(ExecutionError::new("counting adapter failure"));
        }
        self.stats.enter_body();
        let written = context.write_output(&self.text);
        self.stats.leave_body();
        written?;
        Ok(())
    }
}

impl LanguageAdapter for CountingAdapter {
    fn info(&self) -> &AdapterInfo {
        &self.info
    }

    fn core(&self) -> &AdapterCore {
        &self.core
    }

    fn source_code_for_literal_output(&self, literal: &str) -> Option<String> {
        Some(literal.to_string())
    }

    fn source_code_for_expression_output(&self, expression: &str) -> Option<String> {
        Some(expression.to_string())
    }

    fn source_code_for_expression_include(&self, _expression: &str) -> Option<String> {
        None
    }

    fn create_program(
        &self,
        source_code: &str,
        _is_scriptlet: bool,
        _position: SourcePosition,
        _document_name: &str,
    ) -> ParsingResult<Box<dyn Program>> {
        self.stats.compiled.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingProgram {
            text: source_code.to_string(),
            stats: self.stats.clone(),
        }))
    }

    fn enter(
        &self,
        entry_point: &str,
        _executable: &Executable,
        _context: &Arc<ExecutionContext>,
        arguments: &[Value],
    ) -> ExecutionResult<Value> {
        self.stats.enter_body();
        self.stats.leave_body();
        Ok(Value::String(format!("{}/{}", entry_point, arguments.len())))
    }

    fn release_context(&self, _context: &ExecutionContext) {
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A manager with Mini plus a registered counting adapter
pub fn manager_with_counter(tag: &str, thread_safe: bool) -> (Arc<LanguageManager>, Arc<AdapterStats>) {
    let manager = LanguageManager::with_builtins();
    let counting = CountingAdapter::new(tag, thread_safe);
    let stats = counting.stats.clone();
    manager.register(Arc::new(counting)).unwrap();
    (Arc::new(manager), stats)
}

/// Parsing context using the scriptlets parser
pub fn scriptlets(manager: Arc<LanguageManager>) -> ParsingContext {
    ParsingContext::new(manager).with_parser(tessera::parser::SCRIPTLETS_PARSER)
}

/// Parsing context with only the built-in languages
pub fn mini_scriptlets() -> ParsingContext {
    scriptlets(Arc::new(LanguageManager::with_builtins()))
}

/// A Mini adapter under another tag, used to give documents two languages
pub fn mini_alias(tag: &str) -> Arc<dyn LanguageAdapter> {
    Arc::new(MiniAdapter::with_info(AdapterInfo::new(tag, tag).with_thread_safe(true)))
}
