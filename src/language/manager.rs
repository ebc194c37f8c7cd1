//! Language adapter registry
//!
//! Adapters are indexed by every tag and extension they declare. The
//! registry is append-only; lookups may run concurrently with registration.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{LanguageAdapter, same_adapter};
use crate::error::{LanguageError, LanguageResult};
use crate::executable::context::ExecutionContext;

type Candidates = Vec<Arc<dyn LanguageAdapter>>;

#[derive(Default)]
struct Index {
    adapters: Candidates,
    by_tag: HashMap<String, Candidates>,
    by_extension: HashMap<String, Candidates>,
}

/// Registry of available language adapters
#[derive(Default)]
pub struct LanguageManager {
    index: RwLock<Index>,
}

impl LanguageManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in Mini language registered
    pub fn with_builtins() -> Self {
        let manager = Self::new();
        // A fresh adapter cannot have been claimed yet
        let _ = manager.register(Arc::new(super::MiniAdapter::new()));
        manager
    }

    /// Register an adapter under all its tags and extensions.
    ///
    /// Fails if this adapter instance was already registered with any manager.
    pub fn register(&self, adapter: Arc<dyn LanguageAdapter>) -> LanguageResult<()> {
        if !adapter.core().claim() {
            return Err(LanguageError::AlreadyRegistered(adapter.info().name.clone()));
        }

        let info = adapter.info();
        let mut index = self.index.write();
        for tag in &info.tags {
            index
                .by_tag
                .entry(tag.clone())
                .or_default()
                .push(adapter.clone());
        }
        for extension in &info.extensions {
            index
                .by_extension
                .entry(extension.clone())
                .or_default()
                .push(adapter.clone());
        }
        tracing::debug!(
            adapter = %info.name,
            tags = ?info.tags,
            extensions = ?info.extensions,
            "registered language adapter"
        );
        index.adapters.push(adapter);
        Ok(())
    }

    /// All registered adapters, in registration order
    pub fn adapters(&self) -> Vec<Arc<dyn LanguageAdapter>> {
        self.index.read().adapters.clone()
    }

    /// Resolve an adapter by language tag
    pub fn adapter_by_tag(&self, tag: &str) -> Option<Arc<dyn LanguageAdapter>> {
        let index = self.index.read();
        select(index.by_tag.get(tag)?)
    }

    /// Resolve an adapter by the extension of `name`, falling back to
    /// `default_extension` when the name has none
    pub fn adapter_by_extension(
        &self,
        name: &str,
        default_extension: Option<&str>,
    ) -> Option<Arc<dyn LanguageAdapter>> {
        let extension = extension_of(name).or(default_extension)?;
        let index = self.index.read();
        select(index.by_extension.get(extension)?)
    }
}

/// The text after the last '.' of the final path component
pub(crate) fn extension_of(name: &str) -> Option<&str> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    match file_name.rfind('.') {
        Some(0) | None => None,
        Some(dot) => Some(&file_name[dot + 1..]).filter(|ext| !ext.is_empty()),
    }
}

/// Pick one adapter among several sharing a key.
///
/// The adapter last used by the thread's current context wins, so execution
/// does not switch runtimes needlessly. Otherwise the highest priority wins,
/// earliest registration breaking ties.
fn select(candidates: &Candidates) -> Option<Arc<dyn LanguageAdapter>> {
    if candidates.len() > 1 {
        let last_used = ExecutionContext::current().and_then(|context| context.adapter().ok().flatten());
        if let Some(last_used) = last_used {
            if candidates.iter().any(|candidate| same_adapter(candidate, &last_used)) {
                return Some(last_used);
            }
        }
    }

    let mut best: Option<&Arc<dyn LanguageAdapter>> = None;
    for candidate in candidates {
        match best {
            Some(current) if current.info().priority >= candidate.info().priority => {}
            _ => best = Some(candidate),
        }
    }
    best.cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{AdapterInfo, MiniAdapter};

    fn mini(name: &str, tag: &str, priority: i32) -> Arc<dyn LanguageAdapter> {
        Arc::new(MiniAdapter::with_info(
            AdapterInfo::new(name, tag)
                .with_extension("mini")
                .with_priority(priority),
        ))
    }

    #[test]
    fn resolves_by_tag_and_extension() {
        let manager = LanguageManager::new();
        manager.register(mini("A", "a", 0)).unwrap();

        assert_eq!(manager.adapter_by_tag("a").unwrap().info().name, "A");
        assert!(manager.adapter_by_tag("b").is_none());
        assert_eq!(
            manager
                .adapter_by_extension("dir/page.mini", None)
                .unwrap()
                .info()
                .name,
            "A"
        );
        assert_eq!(
            manager
                .adapter_by_extension("page", Some("mini"))
                .unwrap()
                .info()
                .name,
            "A"
        );
        assert!(manager.adapter_by_extension("page", None).is_none());
    }

    #[test]
    fn highest_priority_wins_and_ties_keep_registration_order() {
        let manager = LanguageManager::new();
        manager.register(mini("low", "x", 1)).unwrap();
        manager.register(mini("high", "x", 5)).unwrap();
        manager.register(mini("also-high", "x", 5)).unwrap();

        assert_eq!(manager.adapter_by_tag("x").unwrap().info().name, "high");
    }

    #[test]
    fn registering_twice_fails() {
        let first = LanguageManager::new();
        let second = LanguageManager::new();
        let adapter = mini("A", "a", 0);

        first.register(adapter.clone()).unwrap();
        assert!(matches!(
            second.register(adapter),
            Err(LanguageError::AlreadyRegistered(name)) if name == "A"
        ));
    }

    #[test]
    fn current_context_adapter_is_sticky() {
        let manager = LanguageManager::new();
        let low = mini("low", "x", 0);
        manager.register(low.clone()).unwrap();
        manager.register(mini("high", "x", 9)).unwrap();

        let context = Arc::new(ExecutionContext::new());
        context.add_adapter(low).unwrap();
        let previous = context.make_current();

        assert_eq!(manager.adapter_by_tag("x").unwrap().info().name, "low");

        ExecutionContext::set_current(previous);
        assert_eq!(manager.adapter_by_tag("x").unwrap().info().name, "high");
    }

    #[test]
    fn extension_parsing() {
        assert_eq!(extension_of("a/b.c.mini"), Some("mini"));
        assert_eq!(extension_of("a.b/c"), None);
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("trailing."), None);
    }
}
