//! Top-level profile resolution.
//!
//! `ProfileResolver` owns the configuration for resolutions; each `resolve`
//! call builds fresh per-call state (document cache, node ids, cycle stack),
//! so a resolver can be reused and shared.

use crate::catalog::{
    Catalog, Document, EntityIndex, Link, NodeIdAllocator, Profile, Property,
};
use crate::error::{ResolutionError, Result};
use crate::filter::ControlFilter;
use crate::import::ImportOrchestrator;
use crate::loader::{DocumentLoader, FsLoader, path_to_url};
use crate::mapper::{IdentifierMapper, IdentityMapper};
use crate::merge::{MergeStrategy, merge_back_matter, merge_metadata};
use crate::modify;
use crate::prune::sweep_metadata;
use crate::reference::count_references_with_roots;
use crate::selection::ControlSelectionVisitor;
use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use url::Url;
use uuid::Uuid;

pub const RESOLUTION_TOOL_PROPERTY: &str = "resolution-tool";
pub const SOURCE_PROFILE_REL: &str = "source-profile";

/// Explicit configuration for a `ProfileResolver`.
pub struct ResolverConfig {
    /// Maps original identifiers to output identifiers.
    pub mapper: Arc<dyn IdentifierMapper>,
    /// Loads import targets.
    pub loader: Box<dyn DocumentLoader>,
    /// Value of the `resolution-tool` property stamped into the output.
    pub resolution_tool: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mapper: Arc::new(IdentityMapper),
            loader: Box::new(FsLoader),
            resolution_tool: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ResolverConfig {
    pub fn with_mapper(mut self, mapper: impl IdentifierMapper + 'static) -> Self {
        self.mapper = Arc::new(mapper);
        self
    }

    pub fn with_loader(mut self, loader: impl DocumentLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }
}

pub struct ProfileResolver {
    config: ResolverConfig,
}

impl ProfileResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Resolve an already-parsed profile located at `uri`.
    pub fn resolve(&self, profile: &Profile, uri: &Url) -> Result<Catalog> {
        let mut orchestrator = ImportOrchestrator::new(
            self.config.loader.as_ref(),
            Arc::clone(&self.config.mapper),
            &self.config.resolution_tool,
        );
        orchestrator.resolve_profile(profile, uri)
    }

    /// Load the profile behind `uri` through the configured loader and
    /// resolve it.
    pub fn resolve_uri(&self, uri: &Url) -> Result<Catalog> {
        match self.config.loader.load(uri)? {
            Document::Profile(profile) => self.resolve(&profile, uri),
            Document::Catalog(_) => Err(ResolutionError::configuration(
                uri.as_str(),
                "expected a profile but found a catalog",
            )),
        }
    }

    /// Resolve the profile stored at a filesystem path.
    pub fn resolve_path(&self, path: &Path) -> anyhow::Result<Catalog> {
        let uri = path_to_url(path)?;
        self.resolve_uri(&uri)
            .with_context(|| format!("resolving profile {}", path.display()))
    }
}

/// Finish a profile whose imports are merged into `catalog`.
///
/// Merges the profile's own metadata and back-matter, runs the whole-document
/// reference pass and metadata sweep, applies the structuring directive, then
/// the modify directive, and finally stamps the resolution metadata.
pub fn complete_resolution(
    mut catalog: Catalog,
    profile: &Profile,
    uri: &Url,
    mapper: &dyn IdentifierMapper,
    resolution_tool: &str,
) -> Result<Catalog> {
    let strategy = MergeStrategy::from_directive(profile.merge.as_ref())?;

    merge_metadata(&mut catalog.metadata, profile.metadata.clone());
    merge_back_matter(&mut catalog.back_matter, profile.back_matter.clone());

    NodeIdAllocator::default().assign(&mut catalog);
    let mut index = EntityIndex::unmapped(uri.clone());
    ControlSelectionVisitor::new(&ControlFilter::include_all()).visit_catalog(&catalog, &mut index);
    count_references_with_roots(&catalog, profile.modify.as_ref(), &mut index);
    let swept = sweep_metadata(&mut catalog, &mut index);
    debug!(uri = %uri, swept, "whole-document reference pass complete");

    strategy.apply(&mut catalog);
    if let Some(directive) = &profile.modify {
        modify::apply(&mut catalog, directive, uri, mapper)?;
    }
    stamp_metadata(&mut catalog, profile, uri, resolution_tool);
    Ok(catalog)
}

/// Identify the output as the resolution of `profile`.
fn stamp_metadata(catalog: &mut Catalog, profile: &Profile, uri: &Url, resolution_tool: &str) {
    catalog.uuid = Uuid::new_v4().to_string();
    let metadata = &mut catalog.metadata;
    metadata.title = profile.metadata.title.clone();
    metadata.version = profile.metadata.version.clone();
    metadata.published = profile.metadata.published.clone();
    metadata.last_modified = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    // Imported catalogs decide the version; the profile's is only a fallback.
    if metadata.oscal_version.is_empty() {
        metadata.oscal_version = profile.metadata.oscal_version.clone();
    }

    metadata
        .props
        .retain(|prop| prop.name != RESOLUTION_TOOL_PROPERTY);
    metadata
        .props
        .push(Property::new(RESOLUTION_TOOL_PROPERTY, resolution_tool));
    metadata
        .links
        .retain(|link| link.rel.as_deref() != Some(SOURCE_PROFILE_REL));
    metadata
        .links
        .push(Link::new(uri.as_str(), Some(SOURCE_PROFILE_REL)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use serde_json::json;

    fn url(path: &str) -> Url {
        Url::parse(&format!("file:///mem/{path}")).unwrap()
    }

    fn resolver(loader: MemoryLoader) -> ProfileResolver {
        ProfileResolver::new(ResolverConfig {
            resolution_tool: "resolver-test".into(),
            ..ResolverConfig::default().with_loader(loader)
        })
    }

    #[test]
    fn output_carries_resolution_metadata() -> anyhow::Result<()> {
        let loader = MemoryLoader::new()
            .with(
                url("catalog.json"),
                json!({"catalog": {
                    "uuid": "c",
                    "metadata": {"title": "Cat", "oscal-version": "1.0.4"},
                    "controls": [{"id": "ac-1", "title": "Policy"}]
                }}),
            )
            .with(
                url("profile.json"),
                json!({"profile": {
                    "uuid": "p",
                    "metadata": {"title": "Baseline", "version": "2.0", "oscal-version": "1.1.2"},
                    "imports": [{"href": "catalog.json", "include-all": {}}]
                }}),
            );
        let catalog = resolver(loader).resolve_uri(&url("profile.json"))?;

        let metadata = &catalog.metadata;
        assert_eq!(metadata.title, "Baseline");
        assert_eq!(metadata.version, "2.0");
        assert_eq!(metadata.oscal_version, "1.0.4");
        assert!(Uuid::parse_str(&catalog.uuid).is_ok());
        assert!(chrono::DateTime::parse_from_rfc3339(&metadata.last_modified).is_ok());
        assert_eq!(metadata.props[0].name, RESOLUTION_TOOL_PROPERTY);
        assert_eq!(metadata.props[0].value, "resolver-test");
        assert_eq!(metadata.links[0].href, "file:///mem/profile.json");
        assert_eq!(catalog.controls[0].id, "ac-1");
        Ok(())
    }

    #[test]
    fn catalogs_are_not_profiles() {
        let loader = MemoryLoader::new().with(
            url("catalog.json"),
            json!({"catalog": {"uuid": "c", "metadata": {"title": "Cat"}}}),
        );
        let err = resolver(loader).resolve_uri(&url("catalog.json")).unwrap_err();
        assert!(matches!(err, ResolutionError::Configuration { .. }));
    }
}
