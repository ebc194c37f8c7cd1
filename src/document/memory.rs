//! In-memory document source

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{DocumentDescriptor, DocumentSource};
use crate::error::{DocumentError, DocumentResult};

/// Document source holding only seeded documents
pub struct InMemoryDocumentSource<D> {
    identifier: String,
    descriptors: RwLock<HashMap<String, Arc<DocumentDescriptor<D>>>>,
}

impl<D> InMemoryDocumentSource<D> {
    /// Create an empty source
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            descriptors: RwLock::new(HashMap::new()),
        }
    }

    /// Replace a document unconditionally; the old descriptor is invalidated
    pub fn set_document(
        &self,
        name: &str,
        source_code: &str,
        tag: &str,
    ) -> Arc<DocumentDescriptor<D>> {
        let descriptor = Arc::new(DocumentDescriptor::new(
            name,
            self.identifier.as_str(),
            tag,
            source_code,
        ));
        if let Some(old) = self
            .descriptors
            .write()
            .insert(name.to_string(), descriptor.clone())
        {
            old.invalidate();
        }
        descriptor
    }
}

impl<D: Send + Sync> DocumentSource<D> for InMemoryDocumentSource<D> {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn get_document(&self, name: &str) -> DocumentResult<Arc<DocumentDescriptor<D>>> {
        let descriptor = self
            .descriptors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DocumentError::NotFound(name.to_string()))?;

        if descriptor.is_valid()? {
            return Ok(descriptor);
        }

        let mut descriptors = self.descriptors.write();
        if let Some(current) = descriptors.get(name) {
            if Arc::ptr_eq(current, &descriptor) {
                descriptors.remove(name);
            }
        }
        Err(DocumentError::NotFound(name.to_string()))
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
        let mut documents: Vec<_> = self
            .descriptors
            .read()
            .values()
            .filter(|descriptor| !descriptor.is_invalidated())
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(documents)
    }
}
