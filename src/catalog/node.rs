//! Node identity for loaded document trees.
//!
//! Every group, control, part, parameter and metadata entity receives a
//! `NodeId` from a per-resolution allocator before any pass runs. The entity
//! index stores those ids instead of references into the tree; `NodeTable`
//! maps them back to borrowed nodes when a pass needs to read a body, and the
//! `*_mut` finders locate a node for in-place edits.

use crate::catalog::identity::NodeId;
use crate::catalog::model::{
    Catalog, Control, Group, Location, Parameter, Part, Party, Resource, Role,
};
use std::collections::HashMap;

/// Borrowed view over one node of a document tree.
#[derive(Clone, Copy, Debug)]
pub enum NodeRef<'a> {
    Catalog(&'a Catalog),
    Group(&'a Group),
    Control(&'a Control),
    Part(&'a Part),
    Parameter(&'a Parameter),
    Role(&'a Role),
    Location(&'a Location),
    Party(&'a Party),
    Resource(&'a Resource),
}

impl NodeRef<'_> {
    pub fn node_id(&self) -> NodeId {
        match self {
            NodeRef::Catalog(n) => n.node,
            NodeRef::Group(n) => n.node,
            NodeRef::Control(n) => n.node,
            NodeRef::Part(n) => n.node,
            NodeRef::Parameter(n) => n.node,
            NodeRef::Role(n) => n.node,
            NodeRef::Location(n) => n.node,
            NodeRef::Party(n) => n.node,
            NodeRef::Resource(n) => n.node,
        }
    }
}

/// Hands out node ids that are unique for one resolution.
#[derive(Debug, Default)]
pub struct NodeIdAllocator {
    next: u64,
}

impl NodeIdAllocator {
    pub fn next_id(&mut self) -> NodeId {
        self.next += 1;
        NodeId(self.next)
    }

    /// Assign fresh ids to every node in the catalog, replacing any prior ids.
    pub fn assign(&mut self, catalog: &mut Catalog) {
        catalog.node = self.next_id();
        for role in &mut catalog.metadata.roles {
            role.node = self.next_id();
        }
        for location in &mut catalog.metadata.locations {
            location.node = self.next_id();
        }
        for party in &mut catalog.metadata.parties {
            party.node = self.next_id();
        }
        if let Some(back_matter) = catalog.back_matter.as_mut() {
            for resource in &mut back_matter.resources {
                resource.node = self.next_id();
            }
        }
        self.assign_params(&mut catalog.params);
        for control in &mut catalog.controls {
            self.assign_control(control);
        }
        for group in &mut catalog.groups {
            self.assign_group(group);
        }
    }

    fn assign_group(&mut self, group: &mut Group) {
        group.node = self.next_id();
        self.assign_params(&mut group.params);
        self.assign_parts(&mut group.parts);
        for control in &mut group.controls {
            self.assign_control(control);
        }
        for child in &mut group.groups {
            self.assign_group(child);
        }
    }

    fn assign_control(&mut self, control: &mut Control) {
        control.node = self.next_id();
        self.assign_params(&mut control.params);
        self.assign_parts(&mut control.parts);
        for child in &mut control.controls {
            self.assign_control(child);
        }
    }

    fn assign_params(&mut self, params: &mut [Parameter]) {
        for param in params {
            param.node = self.next_id();
        }
    }

    fn assign_parts(&mut self, parts: &mut [Part]) {
        for part in parts {
            part.node = self.next_id();
            self.assign_parts(&mut part.parts);
        }
    }
}

/// Lookup from node id to the borrowed node.
#[derive(Debug, Default)]
pub struct NodeTable<'a> {
    nodes: HashMap<NodeId, NodeRef<'a>>,
}

impl<'a> NodeTable<'a> {
    pub fn build(catalog: &'a Catalog) -> Self {
        let mut table = Self::default();
        table.insert(NodeRef::Catalog(catalog));
        for role in &catalog.metadata.roles {
            table.insert(NodeRef::Role(role));
        }
        for location in &catalog.metadata.locations {
            table.insert(NodeRef::Location(location));
        }
        for party in &catalog.metadata.parties {
            table.insert(NodeRef::Party(party));
        }
        for resource in catalog.resources() {
            table.insert(NodeRef::Resource(resource));
        }
        table.insert_params(&catalog.params);
        for control in &catalog.controls {
            table.insert_control(control);
        }
        for group in &catalog.groups {
            table.insert_group(group);
        }
        table
    }

    pub fn get(&self, node: NodeId) -> Option<NodeRef<'a>> {
        self.nodes.get(&node).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn insert(&mut self, node: NodeRef<'a>) {
        let id = node.node_id();
        if !id.is_unset() {
            self.nodes.insert(id, node);
        }
    }

    fn insert_group(&mut self, group: &'a Group) {
        self.insert(NodeRef::Group(group));
        self.insert_params(&group.params);
        self.insert_parts(&group.parts);
        for control in &group.controls {
            self.insert_control(control);
        }
        for child in &group.groups {
            self.insert_group(child);
        }
    }

    fn insert_control(&mut self, control: &'a Control) {
        self.insert(NodeRef::Control(control));
        self.insert_params(&control.params);
        self.insert_parts(&control.parts);
        for child in &control.controls {
            self.insert_control(child);
        }
    }

    fn insert_params(&mut self, params: &'a [Parameter]) {
        for param in params {
            self.insert(NodeRef::Parameter(param));
        }
    }

    fn insert_parts(&mut self, parts: &'a [Part]) {
        for part in parts {
            self.insert(NodeRef::Part(part));
            self.insert_parts(&part.parts);
        }
    }
}

/// Locate a control anywhere in the catalog by node id.
pub fn find_control_mut(catalog: &mut Catalog, node: NodeId) -> Option<&mut Control> {
    fn in_controls(controls: &mut [Control], node: NodeId) -> Option<&mut Control> {
        for control in controls {
            if control.node == node {
                return Some(control);
            }
            if let Some(found) = in_controls(&mut control.controls, node) {
                return Some(found);
            }
        }
        None
    }

    fn in_groups(groups: &mut [Group], node: NodeId) -> Option<&mut Control> {
        for group in groups {
            if let Some(found) = in_controls(&mut group.controls, node) {
                return Some(found);
            }
            if let Some(found) = in_groups(&mut group.groups, node) {
                return Some(found);
            }
        }
        None
    }

    if let Some(found) = in_controls(&mut catalog.controls, node) {
        return Some(found);
    }
    in_groups(&mut catalog.groups, node)
}

/// Locate a parameter anywhere in the catalog by node id.
pub fn find_parameter_mut(catalog: &mut Catalog, node: NodeId) -> Option<&mut Parameter> {
    fn in_params(params: &mut [Parameter], node: NodeId) -> Option<&mut Parameter> {
        params.iter_mut().find(|param| param.node == node)
    }

    fn in_controls(controls: &mut [Control], node: NodeId) -> Option<&mut Parameter> {
        for control in controls {
            if let Some(found) = in_params(&mut control.params, node) {
                return Some(found);
            }
            if let Some(found) = in_controls(&mut control.controls, node) {
                return Some(found);
            }
        }
        None
    }

    fn in_groups(groups: &mut [Group], node: NodeId) -> Option<&mut Parameter> {
        for group in groups {
            if let Some(found) = in_params(&mut group.params, node) {
                return Some(found);
            }
            if let Some(found) = in_controls(&mut group.controls, node) {
                return Some(found);
            }
            if let Some(found) = in_groups(&mut group.groups, node) {
                return Some(found);
            }
        }
        None
    }

    if let Some(found) = in_params(&mut catalog.params, node) {
        return Some(found);
    }
    if let Some(found) = in_controls(&mut catalog.controls, node) {
        return Some(found);
    }
    in_groups(&mut catalog.groups, node)
}

/// Detach a control, with its subtree, from wherever it sits in the catalog.
pub fn remove_control(catalog: &mut Catalog, node: NodeId) -> Option<Control> {
    fn from_controls(controls: &mut Vec<Control>, node: NodeId) -> Option<Control> {
        if let Some(slot) = controls.iter().position(|control| control.node == node) {
            return Some(controls.remove(slot));
        }
        controls
            .iter_mut()
            .find_map(|control| from_controls(&mut control.controls, node))
    }

    fn from_groups(groups: &mut [Group], node: NodeId) -> Option<Control> {
        groups.iter_mut().find_map(|group| {
            from_controls(&mut group.controls, node).or_else(|| from_groups(&mut group.groups, node))
        })
    }

    from_controls(&mut catalog.controls, node).or_else(|| from_groups(&mut catalog.groups, node))
}

/// Detach a parameter from whichever container holds it.
pub fn remove_parameter(catalog: &mut Catalog, node: NodeId) -> Option<Parameter> {
    fn from_params(params: &mut Vec<Parameter>, node: NodeId) -> Option<Parameter> {
        let slot = params.iter().position(|param| param.node == node)?;
        Some(params.remove(slot))
    }

    fn from_controls(controls: &mut [Control], node: NodeId) -> Option<Parameter> {
        controls.iter_mut().find_map(|control| {
            from_params(&mut control.params, node)
                .or_else(|| from_controls(&mut control.controls, node))
        })
    }

    fn from_groups(groups: &mut [Group], node: NodeId) -> Option<Parameter> {
        groups.iter_mut().find_map(|group| {
            from_params(&mut group.params, node)
                .or_else(|| from_controls(&mut group.controls, node))
                .or_else(|| from_groups(&mut group.groups, node))
        })
    }

    from_params(&mut catalog.params, node)
        .or_else(|| from_controls(&mut catalog.controls, node))
        .or_else(|| from_groups(&mut catalog.groups, node))
}
