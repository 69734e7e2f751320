//! Holds the documents loaded during one resolution, keyed by absolute URI.
//!
//! Two imports of the same source load it once; each import still works on
//! its own deep copy so passes never share mutable state.

use crate::catalog::model::Document;
use crate::error::Result;
use crate::loader::DocumentLoader;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

#[derive(Default)]
/// In-memory store for loaded documents keyed by URI.
pub struct DocumentRepository {
    documents: BTreeMap<Url, Document>,
}

impl DocumentRepository {
    /// Return a private copy of the document, loading it on first use.
    pub fn load_copy(&mut self, uri: &Url, loader: &dyn DocumentLoader) -> Result<Document> {
        if let Some(document) = self.documents.get(uri) {
            debug!(uri = %uri, "reusing loaded document");
            return Ok(document.clone());
        }
        let document = loader.load(uri)?;
        self.documents.insert(uri.clone(), document.clone());
        Ok(document)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
