//! Import orchestration.
//!
//! Each profile import is loaded (resolving nested profiles first), given a
//! private copy, run through selection, reference counting, reference
//! rewriting and pruning, and then merged into the accumulating catalog in
//! import order. When a later import provides a control or parameter an
//! earlier one already contributed, the later copy wins and the earlier one
//! is dropped. A stack of in-flight profile URIs detects import cycles.

use crate::catalog::{
    Catalog, Document, DocumentRepository, EntityIndex, EntityItem, EntityKind, Import,
    NodeIdAllocator, Profile, remove_control, remove_parameter,
};
use crate::error::{ResolutionError, Result};
use crate::filter::ControlFilter;
use crate::loader::DocumentLoader;
use crate::mapper::IdentifierMapper;
use crate::merge::{MergeStrategy, merge_into};
use crate::prune::prune;
use crate::reference::{count_references, rewrite_references};
use crate::resolver::complete_resolution;
use crate::selection::ControlSelectionVisitor;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// State for one top-level `resolve` call, shared by nested profiles.
pub struct ImportOrchestrator<'r> {
    loader: &'r dyn DocumentLoader,
    mapper: Arc<dyn IdentifierMapper>,
    resolution_tool: &'r str,
    repository: DocumentRepository,
    allocator: NodeIdAllocator,
    stack: Vec<Url>,
}

impl<'r> ImportOrchestrator<'r> {
    pub fn new(
        loader: &'r dyn DocumentLoader,
        mapper: Arc<dyn IdentifierMapper>,
        resolution_tool: &'r str,
    ) -> Self {
        Self {
            loader,
            mapper,
            resolution_tool,
            repository: DocumentRepository::default(),
            allocator: NodeIdAllocator::default(),
            stack: Vec::new(),
        }
    }

    /// Resolve a profile into a catalog.
    ///
    /// The profile's URI stays on the cycle stack for the duration of the call
    /// and is popped on every exit path.
    pub fn resolve_profile(&mut self, profile: &Profile, uri: &Url) -> Result<Catalog> {
        if self.stack.contains(uri) {
            let chain = self
                .stack
                .iter()
                .chain(std::iter::once(uri))
                .map(Url::as_str)
                .collect::<Vec<_>>()
                .join(" → ");
            return Err(ResolutionError::ImportCycle { chain });
        }

        self.stack.push(uri.clone());
        let resolved = self.resolve_pushed(profile, uri);
        self.stack.pop();
        resolved
    }

    fn resolve_pushed(&mut self, profile: &Profile, uri: &Url) -> Result<Catalog> {
        debug!(uri = %uri, depth = self.stack.len(), "resolving profile");
        // Reject an unsupported merge directive before doing any work.
        MergeStrategy::from_directive(profile.merge.as_ref())?;
        let catalog = self.resolve_imports(profile, uri)?;
        complete_resolution(
            catalog,
            profile,
            uri,
            self.mapper.as_ref(),
            self.resolution_tool,
        )
    }

    /// Resolve every import and merge the survivors in import order.
    pub fn resolve_imports(&mut self, profile: &Profile, uri: &Url) -> Result<Catalog> {
        if profile.imports.is_empty() {
            return Err(ResolutionError::configuration(
                format!("profile {uri}"),
                "a profile must declare at least one import",
            ));
        }

        let mut accumulator = Catalog::default();
        let mut accumulated = EntityIndex::new(uri.clone(), Arc::clone(&self.mapper));
        for import in &profile.imports {
            let source = import_uri(profile, uri, &import.href)?;
            let catalog = self.load_catalog(&source)?;
            let (catalog, index) = self.resolve_import(catalog, import, &source)?;
            let displaced = accumulated.append(index);
            drop_displaced(&mut accumulator, &displaced);
            merge_into(&mut accumulator, catalog);
        }
        Ok(accumulator)
    }

    /// Load an import target, resolving it first when it is a profile.
    fn load_catalog(&mut self, source: &Url) -> Result<Catalog> {
        match self.repository.load_copy(source, self.loader)? {
            Document::Catalog(catalog) => Ok(catalog),
            Document::Profile(nested) => {
                self.resolve_profile(&nested, source)
                    .map_err(|err| ResolutionError::Nested {
                        uri: source.clone(),
                        source: Box::new(err),
                    })
            }
        }
    }

    /// Run selection, reference counting, rewriting and pruning for one import.
    pub fn resolve_import(
        &mut self,
        mut catalog: Catalog,
        import: &Import,
        source: &Url,
    ) -> Result<(Catalog, EntityIndex)> {
        self.allocator.assign(&mut catalog);
        let filter = ControlFilter::from_import(import)?;
        if filter.selects_nothing() {
            warn!(href = %import.href, "import has no inclusion directive and selects nothing");
        }

        let mut index = EntityIndex::new(source.clone(), Arc::clone(&self.mapper));
        let selection = ControlSelectionVisitor::new(&filter).visit_catalog(&catalog, &mut index);
        let references = count_references(&catalog, &mut index);
        rewrite_references(&mut catalog, &mut index);
        let pruned = prune(&mut catalog, &mut index);

        debug!(
            source = %source,
            selected = selection.selected_controls,
            references = references.references,
            removed_controls = pruned.removed_controls,
            removed_params = pruned.removed_params,
            "import resolved"
        );
        Ok((catalog, index))
    }
}

/// Remove earlier copies of controls and parameters a later import replaced.
///
/// Metadata and back-matter collisions are settled by the key-based merge.
fn drop_displaced(accumulator: &mut Catalog, displaced: &[EntityItem]) {
    for item in displaced {
        let removed = match item.kind() {
            EntityKind::Control => remove_control(accumulator, item.node()).is_some(),
            EntityKind::Parameter => remove_parameter(accumulator, item.node()).is_some(),
            _ => false,
        };
        if removed {
            debug!(
                kind = %item.kind(),
                id = %item.identifier(),
                source = %item.source(),
                "dropped entity replaced by a later import"
            );
        }
    }
}

/// Absolute URI of an import target.
///
/// `#<uuid>` names a back-matter resource of the importing profile whose
/// first rlink points at the document; anything else is resolved against the
/// profile URI.
pub fn import_uri(profile: &Profile, profile_uri: &Url, href: &str) -> Result<Url> {
    let unresolvable = |reason: String| ResolutionError::UnresolvableImport {
        href: href.to_string(),
        profile: profile_uri.clone(),
        reason,
    };

    let target = match href.strip_prefix('#') {
        Some(uuid) => {
            let resource = profile
                .resource(uuid)
                .ok_or_else(|| unresolvable("no back-matter resource has this uuid".into()))?;
            let rlink = resource
                .rlinks
                .first()
                .ok_or_else(|| unresolvable("the back-matter resource has no rlink".into()))?;
            rlink.href.as_str()
        }
        None => href,
    };
    profile_uri
        .join(target)
        .map_err(|err| unresolvable(format!("invalid href '{target}': {err}")))
}
