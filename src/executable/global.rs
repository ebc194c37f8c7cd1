//! Process-wide key/value scope for user code
//!
//! Everything else in the crate is owned by whoever constructs it. The
//! global scope is the one deliberate exception: a single map shared by
//! every executable in the process, created on first use and emptied only
//! by an explicit [`GlobalScope::clear`].

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::Value;

static GLOBAL_SCOPE: Lazy<GlobalScope> = Lazy::new(GlobalScope::new);

/// Shared named values visible to all executing code
#[derive(Debug, Default)]
pub struct GlobalScope {
    values: RwLock<HashMap<String, Value>>,
}

impl GlobalScope {
    /// Create a standalone scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Access the process-wide scope
    pub fn global() -> &'static Self {
        &GLOBAL_SCOPE
    }

    /// Read a value
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.read().get(name).cloned()
    }

    /// Set a value, returning the previous one
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.write().insert(name.into(), value.into())
    }

    /// Remove a value, returning it
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.values.write().remove(name)
    }

    /// Names of all values, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.values.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remove every value
    pub fn clear(&self) {
        self.values.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn standalone_scope_round_trip() {
        let scope = GlobalScope::new();
        assert_eq!(scope.set("b", 2), None);
        assert_eq!(scope.set("a", "x"), None);
        assert_eq!(scope.set("b", 3), Some(json!(2)));

        assert_eq!(scope.keys(), vec!["a", "b"]);
        assert_eq!(scope.remove("a"), Some(json!("x")));
        scope.clear();
        assert!(scope.keys().is_empty());
    }

    #[test]
    fn global_is_a_single_instance() {
        assert!(std::ptr::eq(GlobalScope::global(), GlobalScope::global()));
    }
}
