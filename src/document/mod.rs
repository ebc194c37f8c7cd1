//! Document store
//!
//! A [`DocumentSource`] hands out [`DocumentDescriptor`]s: a document's
//! source text plus its compiled forms, the descriptors it depends on, and
//! a monotonic validity flag.
//!
//! A document compiled with different parsers or parsing options yields
//! different compiled forms, so each compiled form lives in its own slot
//! under a caller-chosen compile key.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};

use crate::error::{DocumentError, DocumentResult};

pub mod file;
pub mod memory;

pub use file::{FileDocumentSource, FileSourceConfig};
pub use memory::InMemoryDocumentSource;

/// Dependency chains deeper than this are reported as loops
pub const MAX_DEPENDENCY_DEPTH: usize = 128;

/// Retrieves and caches documents by name
pub trait DocumentSource<D>: Send + Sync {
    /// Identifies this source; used as the partition of its documents
    fn identifier(&self) -> &str;

    /// Fetch a document, reading it if absent or invalid
    fn get_document(&self, name: &str) -> DocumentResult<Arc<DocumentDescriptor<D>>>;

    /// Seed a document unless a valid one already exists under `name`.
    ///
    /// A compiled form, if given, is installed under its compile key unless
    /// that slot is already filled.
    fn set_document_if_absent(
        &self,
        name: &str,
        source_code: &str,
        tag: &str,
        document: Option<(&str, Arc<D>)>,
    ) -> DocumentResult<Arc<DocumentDescriptor<D>>>;

    /// Enumerate every document this source knows about
    fn documents(&self) -> DocumentResult<Vec<Arc<DocumentDescriptor<D>>>>;
}

/// When a file-backed descriptor re-checks its file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityPolicy {
    /// Compare modification times at all
    pub enabled: bool,
    /// Minimum time between two checks
    pub min_interval: Duration,
}

#[derive(Debug)]
struct FileBacking {
    path: PathBuf,
    modified: SystemTime,
    policy: ValidityPolicy,
    last_checked: Mutex<Option<Instant>>,
}

impl FileBacking {
    fn is_current(&self) -> bool {
        if !self.policy.enabled {
            return true;
        }

        let now = Instant::now();
        {
            let mut last_checked = self.last_checked.lock();
            if let Some(checked) = *last_checked {
                if now.duration_since(checked) < self.policy.min_interval {
                    return true;
                }
            }
            *last_checked = Some(now);
        }

        match std::fs::metadata(&self.path).and_then(|metadata| metadata.modified()) {
            Ok(modified) => modified <= self.modified,
            Err(_) => false,
        }
    }
}

/// A named document plus its compiled form and dependencies
#[derive(Debug)]
pub struct DocumentDescriptor<D> {
    name: String,
    partition: String,
    tag: String,
    source_code: String,
    timestamp: DateTime<Utc>,
    compiled: Mutex<HashMap<String, Arc<OnceCell<Arc<D>>>>>,
    dependencies: RwLock<Vec<Weak<DocumentDescriptor<D>>>>,
    dependents: Mutex<Vec<Weak<DocumentDescriptor<D>>>>,
    invalid: AtomicBool,
    backing: Option<FileBacking>,
}

impl<D> DocumentDescriptor<D> {
    /// Create a descriptor for in-memory source text
    pub fn new(
        name: impl Into<String>,
        partition: impl Into<String>,
        tag: impl Into<String>,
        source_code: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            partition: partition.into(),
            tag: tag.into(),
            source_code: source_code.into(),
            timestamp: Utc::now(),
            compiled: Mutex::new(HashMap::new()),
            dependencies: RwLock::new(Vec::new()),
            dependents: Mutex::new(Vec::new()),
            invalid: AtomicBool::new(false),
            backing: None,
        }
    }

    /// Create a descriptor backed by a file read at `modified`
    pub(crate) fn file_backed(
        name: impl Into<String>,
        partition: impl Into<String>,
        tag: impl Into<String>,
        source_code: impl Into<String>,
        path: PathBuf,
        modified: SystemTime,
        policy: ValidityPolicy,
    ) -> Self {
        let mut descriptor = Self::new(name, partition, tag, source_code);
        descriptor.timestamp = DateTime::<Utc>::from(modified);
        descriptor.backing = Some(FileBacking {
            path,
            modified,
            policy,
            last_checked: Mutex::new(Some(Instant::now())),
        });
        descriptor
    }

    /// Document name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the owning source
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Tag, usually the filename extension
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Source text
    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    /// When the source text was last modified
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.backing.as_ref().map(|backing| backing.path.as_path())
    }

    fn slot(&self, key: &str) -> Arc<OnceCell<Arc<D>>> {
        self.compiled
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// The document compiled under `key`, if set
    pub fn document(&self, key: &str) -> Option<Arc<D>> {
        self.compiled
            .lock()
            .get(key)
            .and_then(|slot| slot.get().cloned())
    }

    /// Keys of every filled compile slot, sorted
    pub fn compile_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .compiled
            .lock()
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Install a compiled document under `key` unless one is already set;
    /// returns the winner either way
    pub fn set_document_if_absent(&self, key: &str, document: Arc<D>) -> Arc<D> {
        match self.slot(key).try_insert(document) {
            Ok(winner) => winner.clone(),
            Err((existing, _)) => existing.clone(),
        }
    }

    /// Return the document compiled under `key`, building it at most once.
    ///
    /// Concurrent callers with the same key block until the first builder
    /// finishes and then all observe the same instance. Different keys
    /// build independently.
    pub fn document_or_try_init<E>(
        &self,
        key: &str,
        build: impl FnOnce() -> Result<Arc<D>, E>,
    ) -> Result<Arc<D>, E> {
        self.slot(key).get_or_try_init(build).cloned()
    }

    /// Record that this document depends on another
    pub fn add_dependency(&self, dependency: &Arc<DocumentDescriptor<D>>) {
        let mut dependencies = self.dependencies.write();
        let target = Arc::as_ptr(dependency);
        if dependencies.iter().any(|known| known.as_ptr() == target) {
            return;
        }
        dependencies.push(Arc::downgrade(dependency));
    }

    /// Invalidate `dependent` whenever this descriptor is invalidated
    pub fn add_dependent(&self, dependent: &Arc<DocumentDescriptor<D>>) {
        self.dependents.lock().push(Arc::downgrade(dependent));
        // Covers an invalidation that drained the list before the push
        if self.is_invalidated() {
            dependent.invalidate();
        }
    }

    /// Documents this one depends on that are still alive
    pub fn dependencies(&self) -> Vec<Arc<DocumentDescriptor<D>>> {
        self.dependencies
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Permanently mark this descriptor and its dependents invalid
    pub fn invalidate(&self) {
        if self.invalid.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(document = %self.name, "document invalidated");
        let dependents = std::mem::take(&mut *self.dependents.lock());
        for dependent in dependents.iter().filter_map(Weak::upgrade) {
            dependent.invalidate();
        }
    }

    /// Whether the descriptor has been marked invalid, without checking
    /// files or dependencies
    pub fn is_invalidated(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    /// Check validity: never invalidated, all dependencies valid, and the
    /// backing file (if checked) not modified since it was read.
    ///
    /// Invalidity is permanent. Fails with [`DocumentError::DependencyLoop`]
    /// if the dependency graph is deeper than [`MAX_DEPENDENCY_DEPTH`].
    pub fn is_valid(&self) -> DocumentResult<bool> {
        let mut visited = HashSet::new();
        self.check_validity(&mut visited, 0)
    }

    fn check_validity(&self, visited: &mut HashSet<usize>, depth: usize) -> DocumentResult<bool> {
        if depth > MAX_DEPENDENCY_DEPTH {
            return Err(DocumentError::DependencyLoop(self.name.clone()));
        }
        if self.is_invalidated() {
            return Ok(false);
        }
        if !visited.insert(self as *const Self as usize) {
            return Ok(true);
        }

        let dependencies: Vec<_> = self.dependencies.read().clone();
        for dependency in dependencies {
            let valid = match dependency.upgrade() {
                Some(dependency) => dependency.check_validity(visited, depth + 1)?,
                None => false,
            };
            if !valid {
                self.invalidate();
                return Ok(false);
            }
        }

        if let Some(backing) = &self.backing {
            if !backing.is_current() {
                self.invalidate();
                return Ok(false);
            }
        }

        Ok(true)
    }
}
