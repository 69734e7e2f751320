//! Prune-and-promote pass.
//!
//! Walks the tree post-order and physically removes what the selection and
//! reference passes decided against. Unselected groups and controls are
//! deleted; parameters survive when referenced or marked `keep=always`.
//! Anything kept below a deleted container moves up to the nearest surviving
//! ancestor (or the catalog root) and is appended after that ancestor's own
//! children, in document order. Surviving nodes take their mapped
//! identifiers.

use crate::catalog::{
    Catalog, Control, EntityIndex, EntityKind, Group, NodeId, Parameter, Part, SelectionStatus,
};
use tracing::debug;

/// Counts reported after a prune pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PruneSummary {
    pub removed_controls: usize,
    pub removed_groups: usize,
    pub removed_params: usize,
    pub promoted_controls: usize,
    pub promoted_params: usize,
}

/// Children lifted out of a deleted container.
#[derive(Debug, Default)]
struct Promoted {
    controls: Vec<Control>,
    params: Vec<Parameter>,
}

impl Promoted {
    fn absorb(&mut self, other: Promoted) {
        self.controls.extend(other.controls);
        self.params.extend(other.params);
    }
}

enum Outcome<T> {
    Kept(T),
    Removed(Promoted),
}

/// Prune the catalog against the index and apply mapped identifiers.
pub fn prune(catalog: &mut Catalog, index: &mut EntityIndex) -> PruneSummary {
    let mut pruner = Pruner {
        index,
        summary: PruneSummary::default(),
    };

    let mut adopted = Promoted::default();
    pruner.prune_params(&mut catalog.params);
    let controls = std::mem::take(&mut catalog.controls);
    catalog.controls = pruner.prune_controls(controls, &mut adopted);
    let groups = std::mem::take(&mut catalog.groups);
    for group in groups {
        match pruner.prune_group(group) {
            Outcome::Kept(group) => catalog.groups.push(group),
            Outcome::Removed(promoted) => adopted.absorb(promoted),
        }
    }
    pruner.adopt(&mut catalog.controls, &mut catalog.params, adopted);
    remap_metadata(catalog, pruner.index);

    debug!(
        source = %pruner.index.source(),
        removed_controls = pruner.summary.removed_controls,
        removed_groups = pruner.summary.removed_groups,
        removed_params = pruner.summary.removed_params,
        promoted_controls = pruner.summary.promoted_controls,
        "prune complete"
    );
    pruner.summary
}

struct Pruner<'i> {
    index: &'i mut EntityIndex,
    summary: PruneSummary,
}

impl Pruner<'_> {
    fn is_selected(&self, node: NodeId) -> bool {
        self.index.selection(node) == SelectionStatus::Selected
    }

    fn prune_group(&mut self, mut group: Group) -> Outcome<Group> {
        let mut adopted = Promoted::default();
        self.prune_params(&mut group.params);
        let controls = std::mem::take(&mut group.controls);
        group.controls = self.prune_controls(controls, &mut adopted);

        let mut kept_groups = Vec::new();
        for child in std::mem::take(&mut group.groups) {
            match self.prune_group(child) {
                Outcome::Kept(child) => kept_groups.push(child),
                Outcome::Removed(promoted) => adopted.absorb(promoted),
            }
        }
        group.groups = kept_groups;

        if self.is_selected(group.node) {
            if let Some(id) = group.id.as_mut() {
                *id = self.index.map_identifier(EntityKind::Group, id);
            }
            self.remap_parts(&mut group.parts);
            self.adopt(&mut group.controls, &mut group.params, adopted);
            return Outcome::Kept(group);
        }

        self.summary.removed_groups += 1;
        if let Some(id) = group.id.as_deref() {
            self.forget(EntityKind::Group, id, group.node);
        }
        self.forget_parts(&group.parts);
        let mut promoted = Promoted {
            controls: group.controls,
            params: group.params,
        };
        promoted.absorb(adopted);
        Outcome::Removed(promoted)
    }

    /// Prune sibling controls, returning the kept ones in order. Whatever the
    /// removed siblings promote lands in `adopted`.
    fn prune_controls(&mut self, controls: Vec<Control>, adopted: &mut Promoted) -> Vec<Control> {
        let mut kept = Vec::with_capacity(controls.len());
        for control in controls {
            match self.prune_control(control) {
                Outcome::Kept(control) => kept.push(control),
                Outcome::Removed(promoted) => adopted.absorb(promoted),
            }
        }
        kept
    }

    fn prune_control(&mut self, mut control: Control) -> Outcome<Control> {
        self.prune_params(&mut control.params);
        let children: Vec<Outcome<Control>> = std::mem::take(&mut control.controls)
            .into_iter()
            .map(|child| self.prune_control(child))
            .collect();

        if self.is_selected(control.node) {
            control.id = self.index.map_identifier(EntityKind::Control, &control.id);
            self.remap_parts(&mut control.parts);
            let mut adopted = Promoted::default();
            for child in children {
                match child {
                    Outcome::Kept(child) => control.controls.push(child),
                    Outcome::Removed(promoted) => adopted.absorb(promoted),
                }
            }
            self.adopt(&mut control.controls, &mut control.params, adopted);
            return Outcome::Kept(control);
        }

        self.summary.removed_controls += 1;
        self.forget(EntityKind::Control, &control.id, control.node);
        self.forget_parts(&control.parts);
        // Everything kept below a deleted control moves up in document order.
        let mut promoted = Promoted {
            controls: Vec::new(),
            params: control.params,
        };
        for child in children {
            match child {
                Outcome::Kept(child) => promoted.controls.push(child),
                Outcome::Removed(inner) => promoted.absorb(inner),
            }
        }
        Outcome::Removed(promoted)
    }

    fn prune_params(&mut self, params: &mut Vec<Parameter>) {
        let before = params.len();
        params.retain(|param| {
            let mapped = self.index.map_identifier(EntityKind::Parameter, &param.id);
            let live = self
                .index
                .get_entity(EntityKind::Parameter, &mapped, true)
                .is_none_or(|item| item.reference_count() > 0 || item.is_kept());
            if !live {
                self.forget(EntityKind::Parameter, &param.id, param.node);
            }
            live
        });
        self.summary.removed_params += before - params.len();
        for param in params.iter_mut() {
            param.id = self.index.map_identifier(EntityKind::Parameter, &param.id);
        }
    }

    fn adopt(&mut self, controls: &mut Vec<Control>, params: &mut Vec<Parameter>, adopted: Promoted) {
        self.summary.promoted_controls += adopted.controls.len();
        self.summary.promoted_params += adopted.params.len();
        controls.extend(adopted.controls);
        params.extend(adopted.params);
    }

    fn remap_parts(&mut self, parts: &mut [Part]) {
        for part in parts {
            if let Some(id) = part.id.as_mut() {
                *id = self.index.map_identifier(EntityKind::Part, id);
            }
            self.remap_parts(&mut part.parts);
        }
    }

    fn forget_parts(&mut self, parts: &[Part]) {
        for part in parts {
            if let Some(id) = part.id.as_deref() {
                self.forget(EntityKind::Part, id, part.node);
            }
            self.forget_parts(&part.parts);
        }
    }

    /// Drop the index entry for `original`, unless a duplicate elsewhere owns it.
    fn forget(&mut self, kind: EntityKind, original: &str, node: NodeId) {
        let mapped = self.index.map_identifier(kind, original);
        let owned = self
            .index
            .get_entity(kind, &mapped, true)
            .is_some_and(|item| item.node() == node);
        if owned {
            self.index.remove_item(kind, &mapped);
        }
    }
}

fn remap_metadata(catalog: &mut Catalog, index: &EntityIndex) {
    for role in &mut catalog.metadata.roles {
        role.id = index.map_identifier(EntityKind::Role, &role.id);
    }
    for location in &mut catalog.metadata.locations {
        location.uuid = index.map_identifier(EntityKind::Location, &location.uuid);
    }
    for party in &mut catalog.metadata.parties {
        party.uuid = index.map_identifier(EntityKind::Party, &party.uuid);
    }
    if let Some(back_matter) = catalog.back_matter.as_mut() {
        for resource in &mut back_matter.resources {
            resource.uuid = index.map_identifier(EntityKind::Resource, &resource.uuid);
        }
    }
}

/// Remove unreferenced roles, locations, parties and resources.
///
/// Entities with a zero reference count and no `keep=always` marker are
/// dropped from the catalog and from the index. Returns how many went.
pub fn sweep_metadata(catalog: &mut Catalog, index: &mut EntityIndex) -> usize {
    let mut removed = 0;
    let mut sweep = |kind: EntityKind, id: &str| {
        let live = index
            .get_entity(kind, id, true)
            .is_none_or(|item| item.reference_count() > 0 || item.is_kept());
        if !live {
            debug!(kind = %kind, id = %id, "dropping unreferenced entity");
            index.remove_item(kind, id);
            removed += 1;
        }
        live
    };

    catalog
        .metadata
        .roles
        .retain(|role| sweep(EntityKind::Role, &role.id));
    catalog
        .metadata
        .locations
        .retain(|location| sweep(EntityKind::Location, &location.uuid));
    catalog
        .metadata
        .parties
        .retain(|party| sweep(EntityKind::Party, &party.uuid));
    if let Some(back_matter) = catalog.back_matter.as_mut() {
        back_matter
            .resources
            .retain(|resource| sweep(EntityKind::Resource, &resource.uuid));
        if back_matter.resources.is_empty() {
            catalog.back_matter = None;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        Import, Metadata, NodeIdAllocator, Property, Role, SelectControl, WithChildControls,
    };
    use crate::filter::ControlFilter;
    use crate::mapper::PrefixMapper;
    use crate::selection::{ControlSelectionVisitor, register_metadata};
    use std::sync::Arc;
    use url::Url;

    fn source() -> Url {
        Url::parse("file:///catalog.json").unwrap()
    }

    fn select(catalog: &Catalog, index: &mut EntityIndex, ids: &[&str]) {
        let import = Import {
            href: "catalog.json".into(),
            include_controls: vec![SelectControl {
                with_child_controls: Some(WithChildControls::No),
                with_ids: ids.iter().map(|s| s.to_string()).collect(),
                matching: Vec::new(),
            }],
            ..Default::default()
        };
        let filter = ControlFilter::from_import(&import).unwrap();
        ControlSelectionVisitor::new(&filter).visit_catalog(catalog, index);
    }

    fn ids(controls: &[Control]) -> Vec<&str> {
        controls.iter().map(|c| c.id.as_str()).collect()
    }

    fn catalog() -> Catalog {
        // group ac { ac-1, ac-2 { ac-2.1 }, ac-3 }, x-1 { x-1.1 }
        let mut ac2 = Control::new("ac-2", "Accounts");
        ac2.controls.push(Control::new("ac-2.1", "Automated"));
        let mut ac = Group::new("ac", "Access Control");
        ac.controls = vec![Control::new("ac-1", "Policy"), ac2, Control::new("ac-3", "Enforcement")];
        let mut x1 = Control::new("x-1", "Top");
        x1.controls.push(Control::new("x-1.1", "Nested"));
        let mut catalog = Catalog::new("c", "Cat");
        catalog.groups.push(ac);
        catalog.controls.push(x1);
        NodeIdAllocator::default().assign(&mut catalog);
        catalog
    }

    #[test]
    fn selected_descendants_are_promoted_after_native_children() {
        let mut catalog = catalog();
        let mut index = EntityIndex::unmapped(source());
        select(&catalog, &mut index, &["ac-2.1", "ac-3"]);
        let summary = prune(&mut catalog, &mut index);

        assert_eq!(catalog.groups.len(), 1);
        assert_eq!(ids(&catalog.groups[0].controls), vec!["ac-3", "ac-2.1"]);
        assert!(catalog.controls.is_empty());
        assert_eq!(summary.removed_controls, 4);
        assert!(index.get_entity(EntityKind::Control, "ac-2", true).is_none());
        assert!(index.get_entity(EntityKind::Control, "ac-2.1", true).is_some());
    }

    #[test]
    fn promotion_reaches_catalog_root() {
        let mut catalog = catalog();
        let mut index = EntityIndex::unmapped(source());
        select(&catalog, &mut index, &["x-1.1"]);
        prune(&mut catalog, &mut index);
        assert!(catalog.groups.is_empty());
        assert_eq!(ids(&catalog.controls), vec!["x-1.1"]);
    }

    #[test]
    fn parameters_follow_reference_counts_and_keep_markers() {
        let mut catalog = catalog();
        let ac2 = &mut catalog.groups[0].controls[1];
        ac2.params.push(Parameter::new("used"));
        ac2.params.push(Parameter::new("unused"));
        let mut kept = Parameter::new("kept");
        kept.props.push(Property::new("keep", "always"));
        ac2.params.push(kept);
        NodeIdAllocator::default().assign(&mut catalog);

        let mut index = EntityIndex::unmapped(source());
        select(&catalog, &mut index, &["ac-1"]);
        index.increment_reference_count(EntityKind::Parameter, "used");
        prune(&mut catalog, &mut index);

        let group = &catalog.groups[0];
        assert_eq!(ids(&group.controls), vec!["ac-1"]);
        let params: Vec<&str> = group.params.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(params, vec!["used", "kept"]);
        assert!(index.get_entity(EntityKind::Parameter, "unused", true).is_none());
    }

    #[test]
    fn surviving_nodes_take_mapped_identifiers() {
        let mut catalog = catalog();
        catalog.groups[0].controls[2]
            .parts
            .push(crate::catalog::Part::new("ac-3_smt", "statement"));
        NodeIdAllocator::default().assign(&mut catalog);
        let mut index = EntityIndex::new(source(), Arc::new(PrefixMapper::new("x-")));
        select(&catalog, &mut index, &["ac-3"]);
        prune(&mut catalog, &mut index);

        let group = &catalog.groups[0];
        assert_eq!(group.id.as_deref(), Some("x-ac"));
        assert_eq!(group.controls[0].id, "x-ac-3");
        assert_eq!(group.controls[0].parts[0].id.as_deref(), Some("x-ac-3_smt"));
    }

    #[test]
    fn sweep_drops_unreferenced_metadata() {
        let role = |id: &str| Role {
            id: id.into(),
            title: id.into(),
            ..Default::default()
        };
        let mut kept = role("r3");
        kept.props.push(Property::new("keep", "always"));
        let mut catalog = Catalog {
            metadata: Metadata {
                roles: vec![role("r1"), role("r2"), kept],
                ..Default::default()
            },
            ..Catalog::new("c", "Cat")
        };
        NodeIdAllocator::default().assign(&mut catalog);
        let mut index = EntityIndex::unmapped(source());
        register_metadata(&catalog, &mut index);
        index.increment_reference_count(EntityKind::Role, "r1");

        assert_eq!(sweep_metadata(&mut catalog, &mut index), 1);
        let roles: Vec<&str> = catalog.metadata.roles.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(roles, vec!["r1", "r3"]);
        assert!(index.get_entity(EntityKind::Role, "r2", true).is_none());
    }
}
