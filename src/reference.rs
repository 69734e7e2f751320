//! Reference counting (liveness) and reference rewriting.
//!
//! Counting walks the selection-annotated tree top-down through the bodies of
//! selected groups, controls and parts, plus the metadata. Parameters owned by
//! the catalog or by a selected container are walked in place without counting
//! as referenced themselves. Every reference found increments the target's
//! count. The first time a parameter, role, location, party or resource is
//! referenced its own body is queued and walked too, so transitive references
//! are counted; the resolved flag on the index entry keeps cyclic reference
//! graphs from looping and bodies from being walked twice. Entities carrying
//! `keep=always` are walked as roots.
//!
//! Rewriting runs afterwards and updates reference text to the mapped
//! identifiers. A reference to a control, group or part that exists but was
//! not selected is rewritten to an absolute URI into its source document.
//!
//! Unresolvable identifiers are logged and skipped. Text that is not a
//! fragment reference at all (`https://...`) is ignored silently.

use crate::catalog::{
    Catalog, Control, EntityIndex, EntityItem, EntityKind, Group, Link, Location, Metadata,
    Modify, NodeId, NodeRef, NodeTable, OSCAL_NAMESPACE, Parameter, Part, Party, Property,
    Resource, Role,
};
use crate::markup::{self, Anchor};
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, error, warn};

/// Kinds a prose cross-reference may point at, in lookup priority order.
const CROSS_REFERENCE_KINDS: &[EntityKind] = &[
    EntityKind::Resource,
    EntityKind::Control,
    EntityKind::Group,
    EntityKind::Part,
];

/// OSCAL properties known to carry no references.
const PLAIN_PROPERTIES: &[&str] = &[
    "label",
    "sort-id",
    "status",
    "keep",
    "alt-identifier",
    "alt-label",
    "method",
    "marking",
    "version",
    "type",
    "published",
    "resolution-tool",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LinkPolicy {
    Reference(&'static [EntityKind]),
    Ignored,
    Unknown,
}

fn link_policy(rel: Option<&str>) -> LinkPolicy {
    match rel {
        None => LinkPolicy::Reference(CROSS_REFERENCE_KINDS),
        Some("reference" | "citation") => LinkPolicy::Reference(&[EntityKind::Resource]),
        Some("related" | "required" | "incorporated-into" | "moved-to") => {
            LinkPolicy::Reference(&[EntityKind::Control])
        }
        Some("corresp") => LinkPolicy::Reference(&[EntityKind::Part]),
        Some(
            "source-profile" | "latest-version" | "predecessor-version" | "successor-version"
            | "alternate" | "canonical" | "withdrawn",
        ) => LinkPolicy::Ignored,
        Some(_) => LinkPolicy::Unknown,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PropertyPolicy {
    Reference(EntityKind),
    Plain,
    Unsupported,
}

fn property_policy(prop: &Property) -> PropertyPolicy {
    if prop.namespace() != OSCAL_NAMESPACE {
        return PropertyPolicy::Unsupported;
    }
    match prop.name.as_str() {
        "aggregates" => PropertyPolicy::Reference(EntityKind::Parameter),
        name if PLAIN_PROPERTIES.contains(&name) => PropertyPolicy::Plain,
        _ => PropertyPolicy::Unsupported,
    }
}

fn lookup<'x>(index: &'x EntityIndex, kinds: &[EntityKind], id: &str) -> Option<&'x EntityItem> {
    kinds
        .iter()
        .find_map(|kind| index.get_by_original(*kind, id))
}

/// Counts reported after a reference pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReferenceSummary {
    pub references: usize,
    pub unresolved: usize,
    pub resolved_bodies: usize,
}

/// Count references in a selection-annotated catalog.
pub fn count_references(catalog: &Catalog, index: &mut EntityIndex) -> ReferenceSummary {
    count_references_with_roots(catalog, None, index)
}

/// Count references, additionally treating a profile's modify payloads as
/// roots so entities they mention stay live.
pub fn count_references_with_roots(
    catalog: &Catalog,
    modify: Option<&Modify>,
    index: &mut EntityIndex,
) -> ReferenceSummary {
    let mut counter = ReferenceCounter {
        table: NodeTable::build(catalog),
        index,
        worklist: VecDeque::new(),
        warned: BTreeSet::new(),
        summary: ReferenceSummary::default(),
    };
    counter.visit_catalog(catalog);
    if let Some(modify) = modify {
        counter.visit_modify(modify);
    }
    counter.queue_kept_entities();
    counter.drain();
    debug!(
        source = %counter.index.source(),
        references = counter.summary.references,
        unresolved = counter.summary.unresolved,
        "reference counting complete"
    );
    counter.summary
}

struct ReferenceCounter<'a, 'i> {
    table: NodeTable<'a>,
    index: &'i mut EntityIndex,
    worklist: VecDeque<NodeId>,
    warned: BTreeSet<String>,
    summary: ReferenceSummary,
}

impl<'a> ReferenceCounter<'a, '_> {
    fn visit_catalog(&mut self, catalog: &'a Catalog) {
        self.visit_metadata(&catalog.metadata);
        self.visit_contained_params(&catalog.params);
        for control in &catalog.controls {
            self.visit_control(control);
        }
        for group in &catalog.groups {
            self.visit_group(group);
        }
    }

    fn visit_metadata(&mut self, metadata: &Metadata) {
        self.visit_props(&metadata.props);
        self.visit_links(&metadata.links);
        for responsible in &metadata.responsible_parties {
            self.reference(&[EntityKind::Role], &responsible.role_id, "responsible-party");
            for party in &responsible.party_uuids {
                self.reference(&[EntityKind::Party], party, "responsible-party");
            }
            self.visit_props(&responsible.props);
            self.visit_links(&responsible.links);
        }
    }

    fn visit_group(&mut self, group: &Group) {
        if self.index.selection(group.node).is_selected() {
            self.visit_markup(&group.title);
            self.visit_props(&group.props);
            self.visit_links(&group.links);
            self.visit_contained_params(&group.params);
            for part in &group.parts {
                self.visit_part(part);
            }
        }
        for control in &group.controls {
            self.visit_control(control);
        }
        for child in &group.groups {
            self.visit_group(child);
        }
    }

    fn visit_control(&mut self, control: &Control) {
        if self.index.selection(control.node).is_selected() {
            self.visit_markup(&control.title);
            self.visit_props(&control.props);
            self.visit_links(&control.links);
            self.visit_contained_params(&control.params);
            for part in &control.parts {
                self.visit_part(part);
            }
        }
        for child in &control.controls {
            self.visit_control(child);
        }
    }

    /// Walk the bodies of a live container's parameters. A body already
    /// reached through a reference is skipped.
    fn visit_contained_params(&mut self, params: &[Parameter]) {
        for param in params {
            let identifier = self
                .index
                .get_by_original(EntityKind::Parameter, &param.id)
                .filter(|item| item.node() == param.node)
                .map(|item| item.identifier().to_string());
            let walk = match identifier {
                Some(identifier) => self.index.mark_resolved(EntityKind::Parameter, &identifier),
                None => true,
            };
            if walk {
                self.summary.resolved_bodies += 1;
                self.visit_parameter(param);
            }
        }
    }

    fn visit_part(&mut self, part: &Part) {
        if let Some(title) = &part.title {
            self.visit_markup(title);
        }
        self.visit_props(&part.props);
        self.visit_links(&part.links);
        if let Some(prose) = &part.prose {
            self.visit_markup(prose);
        }
        for child in &part.parts {
            self.visit_part(child);
        }
    }

    fn visit_parameter(&mut self, param: &Parameter) {
        self.visit_props(&param.props);
        self.visit_links(&param.links);
        if let Some(label) = &param.label {
            self.visit_markup(label);
        }
        if let Some(usage) = &param.usage {
            self.visit_markup(usage);
        }
        for guideline in &param.guidelines {
            self.visit_markup(&guideline.prose);
        }
        for constraint in &param.constraints {
            if let Some(description) = &constraint.description {
                self.visit_markup(description);
            }
        }
        if let Some(select) = &param.select {
            for choice in &select.choice {
                self.visit_markup(choice);
            }
        }
    }

    fn visit_role(&mut self, role: &Role) {
        self.visit_props(&role.props);
        self.visit_links(&role.links);
    }

    fn visit_location(&mut self, location: &Location) {
        self.visit_props(&location.props);
        self.visit_links(&location.links);
    }

    fn visit_party(&mut self, party: &Party) {
        self.visit_props(&party.props);
        self.visit_links(&party.links);
        for location in &party.location_uuids {
            self.reference(&[EntityKind::Location], location, "party location");
        }
        for org in &party.member_of_organizations {
            self.reference(&[EntityKind::Party], org, "party membership");
        }
    }

    fn visit_resource(&mut self, resource: &Resource) {
        self.visit_props(&resource.props);
        if let Some(description) = &resource.description {
            self.visit_markup(description);
        }
        if let Some(citation) = &resource.citation {
            self.visit_props(&citation.props);
            self.visit_links(&citation.links);
        }
    }

    fn visit_modify(&mut self, modify: &Modify) {
        for set in &modify.set_parameters {
            self.visit_props(&set.props);
            self.visit_links(&set.links);
            for text in set.label.iter().chain(set.usage.iter()) {
                self.visit_markup(text);
            }
            for guideline in &set.guidelines {
                self.visit_markup(&guideline.prose);
            }
        }
        for alter in &modify.alters {
            for add in &alter.adds {
                if let Some(title) = &add.title {
                    self.visit_markup(title);
                }
                for param in &add.params {
                    self.visit_parameter(param);
                }
                self.visit_props(&add.props);
                self.visit_links(&add.links);
                for part in &add.parts {
                    self.visit_part(part);
                }
            }
        }
    }

    fn visit_props(&mut self, props: &[Property]) {
        for prop in props {
            match property_policy(prop) {
                PropertyPolicy::Reference(kind) => {
                    self.reference(&[kind], &prop.value, "property");
                }
                PropertyPolicy::Plain => {}
                PropertyPolicy::Unsupported => {
                    let qname = format!("{{{}}}{}", prop.namespace(), prop.name);
                    if self.warned.insert(qname.clone()) {
                        warn!(property = %qname, "unsupported property; any reference it carries is ignored");
                    }
                }
            }
        }
    }

    fn visit_links(&mut self, links: &[Link]) {
        for link in links {
            match link_policy(link.rel.as_deref()) {
                LinkPolicy::Reference(kinds) => {
                    if let Some(id) = markup::parse_fragment(&link.href) {
                        self.reference(kinds, id, "link");
                    }
                }
                LinkPolicy::Ignored => {}
                LinkPolicy::Unknown => {
                    let rel = link.rel.as_deref().unwrap_or_default();
                    if self.warned.insert(format!("rel:{rel}")) {
                        warn!(rel = %rel, href = %link.href, "unknown link relation; reference ignored");
                    }
                }
            }
        }
    }

    fn visit_markup(&mut self, text: &str) {
        for anchor in markup::anchors(text) {
            match anchor {
                Anchor::Insert { kind: "param", id } => {
                    self.reference(&[EntityKind::Parameter], id, "insert");
                }
                Anchor::Insert { kind, id } => {
                    debug!(kind = %kind, id = %id, "ignoring insert anchor of unsupported type");
                }
                Anchor::Link { href } => {
                    if let Some(id) = markup::parse_fragment(href) {
                        self.reference(CROSS_REFERENCE_KINDS, id, "cross-reference");
                    }
                }
            }
        }
    }

    fn reference(&mut self, kinds: &[EntityKind], id: &str, context: &str) {
        let Some(item) = lookup(self.index, kinds, id) else {
            self.summary.unresolved += 1;
            error!(id = %id, context = %context, source = %self.index.source(), "reference target not found");
            return;
        };
        let kind = item.kind();
        let identifier = item.identifier().to_string();
        let node = item.node();

        self.summary.references += 1;
        self.index.increment_reference_count(kind, &identifier);
        if !kind.is_structural() && self.index.mark_resolved(kind, &identifier) {
            self.worklist.push_back(node);
        }
    }

    fn queue_kept_entities(&mut self) {
        let index: &EntityIndex = self.index;
        let kept: Vec<(EntityKind, String, NodeId)> = [
            EntityKind::Parameter,
            EntityKind::Role,
            EntityKind::Location,
            EntityKind::Party,
            EntityKind::Resource,
        ]
        .into_iter()
        .flat_map(|kind| index.entities(kind))
        .filter(|item| item.is_kept())
        .map(|item| (item.kind(), item.identifier().to_string(), item.node()))
        .collect();
        for (kind, identifier, node) in kept {
            if self.index.mark_resolved(kind, &identifier) {
                self.worklist.push_back(node);
            }
        }
    }

    fn drain(&mut self) {
        while let Some(node) = self.worklist.pop_front() {
            let Some(node_ref) = self.table.get(node) else {
                continue;
            };
            self.summary.resolved_bodies += 1;
            match node_ref {
                NodeRef::Parameter(param) => self.visit_parameter(param),
                NodeRef::Role(role) => self.visit_role(role),
                NodeRef::Location(location) => self.visit_location(location),
                NodeRef::Party(party) => self.visit_party(party),
                NodeRef::Resource(resource) => self.visit_resource(resource),
                NodeRef::Catalog(_) | NodeRef::Group(_) | NodeRef::Control(_) | NodeRef::Part(_) => {}
            }
        }
    }
}

/// Rewrite reference text to mapped identifiers.
///
/// References to unselected controls, groups and parts become absolute URIs
/// into the document they came from.
pub fn rewrite_references(catalog: &mut Catalog, index: &mut EntityIndex) {
    let mut rewriter = ReferenceRewriter { index };
    rewriter.rewrite_catalog(catalog);
}

struct ReferenceRewriter<'i> {
    index: &'i mut EntityIndex,
}

impl ReferenceRewriter<'_> {
    fn rewrite_catalog(&mut self, catalog: &mut Catalog) {
        self.rewrite_metadata(&mut catalog.metadata);
        self.rewrite_params(&mut catalog.params);
        for control in &mut catalog.controls {
            self.rewrite_control(control);
        }
        for group in &mut catalog.groups {
            self.rewrite_group(group);
        }
        if let Some(back_matter) = catalog.back_matter.as_mut() {
            for resource in &mut back_matter.resources {
                self.rewrite_props(&mut resource.props);
                if let Some(citation) = resource.citation.as_mut() {
                    self.rewrite_props(&mut citation.props);
                    self.rewrite_links(&mut citation.links);
                }
                self.rewrite_markup(&mut resource.description);
            }
        }
    }

    fn rewrite_metadata(&mut self, metadata: &mut Metadata) {
        self.rewrite_props(&mut metadata.props);
        self.rewrite_links(&mut metadata.links);
        for responsible in &mut metadata.responsible_parties {
            if let Some(id) = self.mapped_id(EntityKind::Role, &responsible.role_id) {
                responsible.role_id = id;
            }
            for party in &mut responsible.party_uuids {
                if let Some(id) = self.mapped_id(EntityKind::Party, party) {
                    *party = id;
                }
            }
        }
        for role in &mut metadata.roles {
            self.rewrite_props(&mut role.props);
            self.rewrite_links(&mut role.links);
        }
        for location in &mut metadata.locations {
            self.rewrite_props(&mut location.props);
            self.rewrite_links(&mut location.links);
        }
        for party in &mut metadata.parties {
            self.rewrite_props(&mut party.props);
            self.rewrite_links(&mut party.links);
            for location in &mut party.location_uuids {
                if let Some(id) = self.mapped_id(EntityKind::Location, location) {
                    *location = id;
                }
            }
            for org in &mut party.member_of_organizations {
                if let Some(id) = self.mapped_id(EntityKind::Party, org) {
                    *org = id;
                }
            }
        }
    }

    fn rewrite_group(&mut self, group: &mut Group) {
        self.rewrite_text(&mut group.title);
        self.rewrite_props(&mut group.props);
        self.rewrite_links(&mut group.links);
        self.rewrite_params(&mut group.params);
        for part in &mut group.parts {
            self.rewrite_part(part);
        }
        for control in &mut group.controls {
            self.rewrite_control(control);
        }
        for child in &mut group.groups {
            self.rewrite_group(child);
        }
    }

    fn rewrite_control(&mut self, control: &mut Control) {
        self.rewrite_text(&mut control.title);
        self.rewrite_props(&mut control.props);
        self.rewrite_links(&mut control.links);
        self.rewrite_params(&mut control.params);
        for part in &mut control.parts {
            self.rewrite_part(part);
        }
        for child in &mut control.controls {
            self.rewrite_control(child);
        }
    }

    fn rewrite_part(&mut self, part: &mut Part) {
        self.rewrite_markup(&mut part.title);
        self.rewrite_props(&mut part.props);
        self.rewrite_links(&mut part.links);
        self.rewrite_markup(&mut part.prose);
        for child in &mut part.parts {
            self.rewrite_part(child);
        }
    }

    fn rewrite_params(&mut self, params: &mut [Parameter]) {
        for param in params {
            self.rewrite_props(&mut param.props);
            self.rewrite_links(&mut param.links);
            self.rewrite_markup(&mut param.label);
            self.rewrite_markup(&mut param.usage);
            for guideline in &mut param.guidelines {
                self.rewrite_text(&mut guideline.prose);
            }
            for constraint in &mut param.constraints {
                self.rewrite_markup(&mut constraint.description);
            }
            if let Some(select) = param.select.as_mut() {
                for choice in &mut select.choice {
                    self.rewrite_text(choice);
                }
            }
        }
    }

    fn rewrite_props(&mut self, props: &mut [Property]) {
        for prop in props {
            if let PropertyPolicy::Reference(kind) = property_policy(prop) {
                if let Some(id) = self.mapped_id(kind, &prop.value) {
                    prop.value = id;
                }
            }
        }
    }

    fn rewrite_links(&mut self, links: &mut [Link]) {
        for link in links {
            if let LinkPolicy::Reference(kinds) = link_policy(link.rel.as_deref()) {
                if let Some(href) = self.fragment_target(kinds, &link.href) {
                    link.href = href;
                }
            }
        }
    }

    fn rewrite_markup(&mut self, field: &mut Option<String>) {
        markup::rewrite_in_place(field, |anchor| self.replacement(anchor));
    }

    fn rewrite_text(&mut self, text: &mut String) {
        markup::rewrite_string(text, |anchor| self.replacement(anchor));
    }

    fn replacement(&mut self, anchor: &Anchor<'_>) -> Option<String> {
        match *anchor {
            Anchor::Insert { kind: "param", id } => self.mapped_id(EntityKind::Parameter, id),
            Anchor::Insert { .. } => None,
            Anchor::Link { href } => self.fragment_target(CROSS_REFERENCE_KINDS, href),
        }
    }

    /// Mapped identifier, when it differs from the original.
    fn mapped_id(&self, kind: EntityKind, original: &str) -> Option<String> {
        let item = self.index.get_by_original(kind, original)?;
        item.is_identifier_changed()
            .then(|| item.identifier().to_string())
    }

    /// New href for a fragment reference, or `None` to leave it unchanged.
    fn fragment_target(&mut self, kinds: &[EntityKind], href: &str) -> Option<String> {
        let id = markup::parse_fragment(href)?;
        let item = lookup(self.index, kinds, id)?.clone();
        if item.kind().is_structural() && !self.index.is_selected(&item) {
            let mut absolute = item.source().clone();
            absolute.set_fragment(Some(item.original_identifier()));
            return Some(absolute.to_string());
        }
        item.is_identifier_changed()
            .then(|| format!("#{}", item.identifier()))
    }
}
