//! File-backed document source
//!
//! Document names are paths relative to a base directory. A name that points
//! at a directory resolves to the directory's default file; a name without
//! an exact match resolves to a sibling file sharing its base name.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{DocumentDescriptor, DocumentSource, ValidityPolicy};
use crate::error::{DocumentError, DocumentResult};

/// Configuration for [`FileDocumentSource`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSourceConfig {
    /// Directory document names are resolved against
    pub base_path: PathBuf,

    /// Base name substituted when a name resolves to a directory
    pub default_name: String,

    /// Required second-to-last extension for default files (e.g. "page" in
    /// `default.page.html`)
    pub pre_extension: Option<String>,

    /// Extension preferred when several files share a base name
    pub preferred_extension: Option<String>,

    /// Re-check modification times on lookup
    pub check_validity: bool,

    /// Minimum time between two checks of the same document
    pub min_check_interval_ms: u64,
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            default_name: "default".to_string(),
            pre_extension: None,
            preferred_extension: None,
            check_validity: true,
            min_check_interval_ms: 1000,
        }
    }
}

impl FileSourceConfig {
    /// Configuration rooted at `base_path` with default settings
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    fn policy(&self) -> ValidityPolicy {
        ValidityPolicy {
            enabled: self.check_validity,
            min_interval: Duration::from_millis(self.min_check_interval_ms),
        }
    }
}

/// Document source reading from a directory tree
pub struct FileDocumentSource<D> {
    config: FileSourceConfig,
    identifier: String,
    descriptors: RwLock<HashMap<String, Arc<DocumentDescriptor<D>>>>,
}

impl<D> FileDocumentSource<D> {
    /// Create a source for the configured directory
    pub fn new(config: FileSourceConfig) -> Self {
        let identifier = config.base_path.display().to_string();
        Self {
            config,
            identifier,
            descriptors: RwLock::new(HashMap::new()),
        }
    }

    /// The configuration in use
    pub fn config(&self) -> &FileSourceConfig {
        &self.config
    }

    /// Resolve a document name to an existing file
    pub fn resolve(&self, name: &str) -> DocumentResult<PathBuf> {
        let relative = Path::new(name.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(DocumentError::NotFound(name.to_string()));
        }

        let path = self.config.base_path.join(relative);
        if path.is_dir() {
            return self
                .find_candidate(
                    &path,
                    &self.config.default_name,
                    self.config.pre_extension.as_deref(),
                )
                .ok_or_else(|| DocumentError::NotFound(name.to_string()));
        }
        if path.is_file() {
            return Ok(path);
        }

        let base_name = path.file_name().and_then(|base| base.to_str());
        match (path.parent(), base_name) {
            (Some(parent), Some(base_name)) => self.find_candidate(parent, base_name, None),
            _ => None,
        }
        .ok_or_else(|| DocumentError::NotFound(name.to_string()))
    }

    fn find_candidate(&self, dir: &Path, base_name: &str, pre_extension: Option<&str>) -> Option<PathBuf> {
        let prefix = match pre_extension {
            Some(pre_extension) => format!("{}.{}.", base_name, pre_extension),
            None => format!("{}.", base_name),
        };

        let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|file_name| file_name.to_str())
                        .is_some_and(|file_name| file_name.starts_with(&prefix))
            })
            .collect();
        candidates.sort();

        if let Some(preferred) = &self.config.preferred_extension {
            let preferred_match = candidates
                .iter()
                .find(|path| path.extension().and_then(|ext| ext.to_str()) == Some(preferred));
            if let Some(found) = preferred_match {
                return Some(found.clone());
            }
        }
        candidates.into_iter().next()
    }

    fn read(&self, name: &str) -> DocumentResult<DocumentDescriptor<D>> {
        let path = self.resolve(name)?;
        let io_error = |source| DocumentError::Io {
            path: path.clone(),
            source,
        };
        // Modification time first: a write racing the read then shows up
        // as a newer mtime on the next check
        let modified = fs::metadata(&path)
            .and_then(|metadata| metadata.modified())
            .map_err(io_error)?;
        let source_code = fs::read_to_string(&path).map_err(io_error)?;
        let tag = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_string();

        tracing::debug!(document = name, path = ?path, "read document");
        Ok(DocumentDescriptor::file_backed(
            name,
            self.identifier.as_str(),
            tag,
            source_code,
            path,
            modified,
            self.config.policy(),
        ))
    }

    fn collect_names(&self, dir: &Path, names: &mut Vec<String>) -> DocumentResult<()> {
        let entries = fs::read_dir(dir).map_err(|source| DocumentError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let path = entry
                .map_err(|source| DocumentError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?
                .path();
            if path.is_dir() {
                self.collect_names(&path, names)?;
            } else if let Ok(relative) = path.strip_prefix(&self.config.base_path) {
                let name: Vec<_> = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect();
                names.push(name.join("/"));
            }
        }
        Ok(())
    }
}

impl<D: Send + Sync> DocumentSource<D> for FileDocumentSource<D> {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn get_document(&self, name: &str) -> DocumentResult<Arc<DocumentDescriptor<D>>> {
        let cached = self.descriptors.read().get(name).cloned();
        if let Some(descriptor) = cached {
            if descriptor.is_valid()? {
                return Ok(descriptor);
            }
            tracing::debug!(document = name, "reloading invalidated document");
        }

        let fresh = Arc::new(self.read(name)?);
        let mut descriptors = self.descriptors.write();
        if let Some(existing) = descriptors.get(name) {
            if !existing.is_invalidated() {
                return Ok(existing.clone());
            }
        }
        descriptors.retain(|_, descriptor| !descriptor.is_invalidated());
        descriptors.insert(name.to_string(), fresh.clone());
        Ok(fresh)
    }

    fn set_document_if_absent(
        &self,
        name: &str,
        source_code: &str,
        tag: &str,
        document: Option<(&str, Arc<D>)>,
    ) -> DocumentResult<Arc<DocumentDescriptor<D>>> {
        let mut descriptors = self.descriptors.write();
        if let Some(existing) = descriptors.get(name) {
            if !existing.is_invalidated() {
                if let Some((key, document)) = document {
                    existing.set_document_if_absent(key, document);
                }
                return Ok(existing.clone());
            }
        }
        descriptors.retain(|_, descriptor| !descriptor.is_invalidated());

        let descriptor = Arc::new(DocumentDescriptor::new(
            name,
            self.identifier.as_str(),
            tag,
            source_code,
        ));
        if let Some((key, document)) = document {
            descriptor.set_document_if_absent(key, document);
        }
        descriptors.insert(name.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    fn documents(&self) -> DocumentResult<Vec<Arc<DocumentDescriptor<D>>>> {
        let mut names = Vec::new();
        self.collect_names(&self.config.base_path, &mut names)?;

        let mut documents = names
            .iter()
            .map(|name| self.get_document(name))
            .collect::<DocumentResult<Vec<_>>>()?;
        documents.extend(
            self.descriptors
                .read()
                .values()
                .filter(|descriptor| descriptor.path().is_none() && !descriptor.is_invalidated())
                .cloned(),
        );
        documents.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source(temp: &TempDir) -> FileDocumentSource<String> {
        FileDocumentSource::new(FileSourceConfig {
            min_check_interval_ms: 0,
            ..FileSourceConfig::new(temp.path())
        })
    }

    #[test]
    fn reads_exact_names() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("page.mini"), "print 1").unwrap();
        let source = source(&temp);

        let descriptor = source.get_document("page.mini").unwrap();
        assert_eq!(descriptor.source_code(), "print 1");
        assert_eq!(descriptor.tag(), "mini");
        assert!(Arc::ptr_eq(&descriptor, &source.get_document("page.mini").unwrap()));
    }

    #[test]
    fn directories_resolve_to_the_default_file() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("site")).unwrap();
        fs::write(temp.path().join("site/default.txt"), "t").unwrap();
        fs::write(temp.path().join("site/default.mini"), "m").unwrap();

        let mut config = FileSourceConfig::new(temp.path());
        config.preferred_extension = Some("mini".into());
        let source = FileDocumentSource::<String>::new(config);

        assert_eq!(
            source.resolve("site").unwrap(),
            temp.path().join("site/default.mini")
        );
    }

    #[test]
    fn pre_extension_filters_default_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("default.mini"), "plain").unwrap();
        fs::write(temp.path().join("default.page.mini"), "page").unwrap();

        let mut config = FileSourceConfig::new(temp.path());
        config.pre_extension = Some("page".into());
        let source = FileDocumentSource::<String>::new(config);

        assert_eq!(source.get_document("").unwrap().source_code(), "page");
    }

    #[test]
    fn missing_names_match_siblings_by_base_name() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("about.txt"), "t").unwrap();
        fs::write(temp.path().join("about.mini"), "m").unwrap();

        let mut config = FileSourceConfig::new(temp.path());
        config.preferred_extension = Some("mini".into());
        let source = FileDocumentSource::<String>::new(config);

        assert_eq!(source.get_document("about").unwrap().source_code(), "m");
        assert!(matches!(
            source.get_document("contact"),
            Err(DocumentError::NotFound(_))
        ));
    }

    #[test]
    fn parent_components_are_rejected() {
        let temp = TempDir::new().unwrap();
        let source = source(&temp);
        assert!(matches!(
            source.resolve("../etc/passwd"),
            Err(DocumentError::NotFound(_))
        ));
    }

    #[test]
    fn enumerates_nested_documents() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("lib")).unwrap();
        fs::write(temp.path().join("index.mini"), "").unwrap();
        fs::write(temp.path().join("lib/util.mini"), "").unwrap();
        let source = source(&temp);
        source
            .set_document_if_absent("_generated", "", "mini", None)
            .unwrap();

        let names: Vec<_> = source
            .documents()
            .unwrap()
            .iter()
            .map(|descriptor| descriptor.name().to_string())
            .collect();
        assert_eq!(names, vec!["_generated", "index.mini", "lib/util.mini"]);
    }
}
