//! Document loading capability.
//!
//! The resolver never reads files itself; it asks a `DocumentLoader` for the
//! parsed document behind an absolute URI. `FsLoader` serves `file:` URIs,
//! checks the root shape against a small JSON Schema before typed
//! deserialization, and reports failures with the file they concern.

use crate::catalog::Document;
use crate::error::{ResolutionError, Result};
use anyhow::{Context, anyhow, bail};
use jsonschema::JSONSchema;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;
use url::Url;

/// Loads the document behind an absolute URI.
pub trait DocumentLoader {
    fn load(&self, uri: &Url) -> Result<Document>;
}

/// Root shape every loadable document must have.
fn document_schema() -> Value {
    let metadata = json!({
        "type": "object",
        "required": ["title"],
        "properties": {"title": {"type": "string"}}
    });
    json!({
        "type": "object",
        "oneOf": [{"required": ["catalog"]}, {"required": ["profile"]}],
        "properties": {
            "$schema": {"type": "string"},
            "catalog": {
                "type": "object",
                "required": ["uuid", "metadata"],
                "properties": {
                    "uuid": {"type": "string"},
                    "metadata": metadata.clone(),
                    "controls": {"type": "array"},
                    "groups": {"type": "array"},
                    "params": {"type": "array"}
                }
            },
            "profile": {
                "type": "object",
                "required": ["uuid", "metadata"],
                "properties": {
                    "uuid": {"type": "string"},
                    "metadata": metadata,
                    "imports": {"type": "array"}
                }
            }
        },
        "additionalProperties": false
    })
}

/// Validate a raw document value against the root schema.
pub fn check_document_shape(value: &Value) -> anyhow::Result<()> {
    let schema = document_schema();
    let compiled =
        JSONSchema::compile(&schema).map_err(|err| anyhow!("compiling document schema: {err}"))?;
    if let Err(errors) = compiled.validate(value) {
        let details = errors
            .map(|err| err.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        bail!("document failed shape validation:\n{details}");
    }
    Ok(())
}

/// Parse a JSON document value into the typed model.
pub fn parse_document(mut value: Value) -> anyhow::Result<Document> {
    check_document_shape(&value)?;
    if let Some(root) = value.as_object_mut() {
        root.remove("$schema");
    }
    serde_json::from_value(value).context("deserializing document")
}

/// Absolute `file:` URI for a filesystem path.
pub fn path_to_url(path: &Path) -> anyhow::Result<Url> {
    let absolute = fs::canonicalize(path)
        .with_context(|| format!("resolving path {}", path.display()))?;
    Url::from_file_path(&absolute)
        .map_err(|()| anyhow!("path {} cannot be expressed as a URI", absolute.display()))
}

/// Loads JSON documents from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsLoader;

impl FsLoader {
    fn read(&self, uri: &Url) -> anyhow::Result<Document> {
        if uri.scheme() != "file" {
            bail!("unsupported URI scheme '{}'", uri.scheme());
        }
        let path = uri
            .to_file_path()
            .map_err(|()| anyhow!("URI does not name a local file"))?;
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        parse_document(value).with_context(|| format!("loading {}", path.display()))
    }
}

impl DocumentLoader for FsLoader {
    fn load(&self, uri: &Url) -> Result<Document> {
        debug!(uri = %uri, "loading document");
        self.read(uri).map_err(|err| ResolutionError::Load {
            uri: uri.clone(),
            source: err.into(),
        })
    }
}

/// Serves documents registered up front; useful when documents are produced
/// in memory rather than read from disk.
#[derive(Clone, Debug, Default)]
pub struct MemoryLoader {
    documents: BTreeMap<Url, Value>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the raw JSON for a URI, replacing any earlier value.
    pub fn insert(&mut self, uri: Url, document: Value) {
        self.documents.insert(uri, document);
    }

    pub fn with(mut self, uri: Url, document: Value) -> Self {
        self.insert(uri, document);
        self
    }
}

impl DocumentLoader for MemoryLoader {
    fn load(&self, uri: &Url) -> Result<Document> {
        let loaded = self
            .documents
            .get(uri)
            .cloned()
            .ok_or_else(|| anyhow!("no document registered"))
            .and_then(parse_document);
        loaded.map_err(|err| ResolutionError::Load {
            uri: uri.clone(),
            source: err.into(),
        })
    }
}
