//! Entity index spanning one resolution pass.
//!
//! The index registers every identifiable entity of a document under its
//! mapped identifier, tracks how often each entity is referenced, and keeps a
//! side table of selection status keyed by node id. Lookups return `None`
//! instead of erroring; callers that require an entity to exist turn a miss
//! into a resolution error with the offending identifier.

use crate::catalog::identity::{EntityKind, NodeId, SelectionStatus};
use crate::catalog::model::{
    Control, Group, Location, Parameter, Part, Party, Resource, Role, has_keep_marker,
};
use crate::mapper::{IdentifierMapper, IdentityMapper};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;
use url::Url;

#[derive(Clone, Debug)]
/// One registered entity.
pub struct EntityItem {
    kind: EntityKind,
    identifier: String,
    original_identifier: String,
    node: NodeId,
    container: Option<NodeId>,
    source: Url,
    reference_count: usize,
    resolved: bool,
    keep: bool,
}

impl EntityItem {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Identifier after mapping; this is what the output document carries.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn original_identifier(&self) -> &str {
        &self.original_identifier
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Nearest enclosing control or group, when the entity lives in the tree.
    pub fn container(&self) -> Option<NodeId> {
        self.container
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn reference_count(&self) -> usize {
        self.reference_count
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Carries the `keep=always` marker.
    pub fn is_kept(&self) -> bool {
        self.keep
    }

    pub fn is_identifier_changed(&self) -> bool {
        self.identifier != self.original_identifier
    }
}

type EntityKey = (EntityKind, String);

/// Registry of entities keyed by `(kind, mapped identifier)`.
pub struct EntityIndex {
    source: Url,
    mapper: Arc<dyn IdentifierMapper>,
    entities: BTreeMap<EntityKey, EntityItem>,
    selection: HashMap<NodeId, SelectionStatus>,
}

impl std::fmt::Debug for EntityIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityIndex")
            .field("source", &self.source.as_str())
            .field("entities", &self.entities.len())
            .field("selection", &self.selection.len())
            .finish()
    }
}

impl EntityIndex {
    pub fn new(source: Url, mapper: Arc<dyn IdentifierMapper>) -> Self {
        Self {
            source,
            mapper,
            entities: BTreeMap::new(),
            selection: HashMap::new(),
        }
    }

    /// Index that registers identifiers unchanged.
    pub fn unmapped(source: Url) -> Self {
        Self::new(source, Arc::new(IdentityMapper))
    }

    /// Document the entities registered through this index came from.
    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn add_group(&mut self, group: &Group) -> Option<EntityItem> {
        let id = group.id.as_deref()?;
        self.add_item(EntityKind::Group, id, group.node, None, false)
    }

    pub fn add_control(&mut self, control: &Control) -> Option<EntityItem> {
        self.add_item(EntityKind::Control, &control.id, control.node, None, false)
    }

    /// Parts are registered with their nearest control or group so their
    /// selection can be inherited.
    pub fn add_part(&mut self, part: &Part, container: NodeId) -> Option<EntityItem> {
        let id = part.id.as_deref()?;
        self.add_item(EntityKind::Part, id, part.node, Some(container), false)
    }

    pub fn add_parameter(
        &mut self,
        param: &Parameter,
        container: Option<NodeId>,
    ) -> Option<EntityItem> {
        let keep = has_keep_marker(&param.props);
        self.add_item(EntityKind::Parameter, &param.id, param.node, container, keep)
    }

    pub fn add_role(&mut self, role: &Role) -> Option<EntityItem> {
        let keep = has_keep_marker(&role.props);
        self.add_item(EntityKind::Role, &role.id, role.node, None, keep)
    }

    pub fn add_location(&mut self, location: &Location) -> Option<EntityItem> {
        let keep = has_keep_marker(&location.props);
        self.add_item(EntityKind::Location, &location.uuid, location.node, None, keep)
    }

    pub fn add_party(&mut self, party: &Party) -> Option<EntityItem> {
        let keep = has_keep_marker(&party.props);
        self.add_item(EntityKind::Party, &party.uuid, party.node, None, keep)
    }

    pub fn add_resource(&mut self, resource: &Resource) -> Option<EntityItem> {
        let keep = has_keep_marker(&resource.props);
        self.add_item(EntityKind::Resource, &resource.uuid, resource.node, None, keep)
    }

    /// Register an entity, returning the entry it displaced on collision.
    ///
    /// The newer registration wins; a collision is reported but is not an
    /// error at this layer.
    fn add_item(
        &mut self,
        kind: EntityKind,
        original: &str,
        node: NodeId,
        container: Option<NodeId>,
        keep: bool,
    ) -> Option<EntityItem> {
        let identifier = self.mapper.map(kind, original);
        let item = EntityItem {
            kind,
            identifier: identifier.clone(),
            original_identifier: original.to_string(),
            node,
            container,
            source: self.source.clone(),
            reference_count: 0,
            resolved: false,
            keep,
        };
        let prior = self.entities.insert(key(kind, &identifier), item);
        if let Some(prior) = &prior {
            warn!(
                kind = %kind,
                id = %identifier,
                source = %self.source,
                "identifier registered more than once; keeping the later entry"
            );
            if prior.node != node {
                self.selection.remove(&prior.node);
            }
        }
        prior
    }

    /// Look up an entity by its (mapped) identifier.
    ///
    /// With `normalize`, UUID-keyed kinds are matched case-insensitively.
    pub fn get_entity(
        &self,
        kind: EntityKind,
        identifier: &str,
        normalize: bool,
    ) -> Option<&EntityItem> {
        let item = self.entities.get(&key(kind, identifier))?;
        if normalize || item.identifier == identifier {
            Some(item)
        } else {
            None
        }
    }

    /// Look up an entity by the identifier used in the source document.
    pub fn get_by_original(&self, kind: EntityKind, original: &str) -> Option<&EntityItem> {
        let mapped = self.mapper.map(kind, original);
        self.get_entity(kind, &mapped, true)
    }

    /// Identifier the mapper assigns to `original`, registered or not.
    pub fn map_identifier(&self, kind: EntityKind, original: &str) -> String {
        self.mapper.map(kind, original)
    }

    /// Entities of one kind in identifier order.
    pub fn entities(&self, kind: EntityKind) -> impl Iterator<Item = &EntityItem> {
        self.entities
            .range((kind, String::new())..)
            .take_while(move |((k, _), _)| *k == kind)
            .map(|(_, item)| item)
    }

    /// Drop a registration and any cached selection state for its node.
    pub fn remove_item(&mut self, kind: EntityKind, identifier: &str) -> Option<EntityItem> {
        let removed = self.entities.remove(&key(kind, identifier))?;
        self.selection.remove(&removed.node);
        Some(removed)
    }

    /// Increment the reference count; returns the new count.
    pub fn increment_reference_count(&mut self, kind: EntityKind, identifier: &str) -> usize {
        match self.entities.get_mut(&key(kind, identifier)) {
            Some(item) => {
                item.reference_count += 1;
                item.reference_count
            }
            None => 0,
        }
    }

    pub fn reset_reference_count(&mut self, kind: EntityKind, identifier: &str) {
        if let Some(item) = self.entities.get_mut(&key(kind, identifier)) {
            item.reference_count = 0;
        }
    }

    /// Mark an entity's body as visited. Returns true only the first time.
    pub fn mark_resolved(&mut self, kind: EntityKind, identifier: &str) -> bool {
        match self.entities.get_mut(&key(kind, identifier)) {
            Some(item) if !item.resolved => {
                item.resolved = true;
                true
            }
            _ => false,
        }
    }

    /// Record the selection outcome for a node.
    ///
    /// A decided status is never downgraded back to `Unknown`.
    pub fn set_selection(&mut self, node: NodeId, status: SelectionStatus) {
        if status == SelectionStatus::Unknown && self.selection.contains_key(&node) {
            return;
        }
        self.selection.insert(node, status);
    }

    pub fn selection(&self, node: NodeId) -> SelectionStatus {
        self.selection.get(&node).copied().unwrap_or_default()
    }

    /// Whether an entity survives tree selection.
    ///
    /// Groups and controls report their cached status. Parts resolve lazily to
    /// their container's status, which is then cached. Every other kind is
    /// always selected here; reference counts decide their survival.
    pub fn is_selected(&mut self, item: &EntityItem) -> bool {
        match item.kind {
            EntityKind::Group | EntityKind::Control => self.selection(item.node).is_selected(),
            EntityKind::Part => {
                if let Some(status) = self.selection.get(&item.node) {
                    if *status != SelectionStatus::Unknown {
                        return status.is_selected();
                    }
                }
                let status = item
                    .container
                    .map(|container| self.selection(container))
                    .unwrap_or_default();
                self.set_selection(item.node, status);
                status.is_selected()
            }
            EntityKind::Parameter
            | EntityKind::Role
            | EntityKind::Location
            | EntityKind::Party
            | EntityKind::Resource => true,
        }
    }

    /// Merge another index into this one; later entries win on collision.
    ///
    /// Returns the entries that were displaced.
    pub fn append(&mut self, other: EntityIndex) -> Vec<EntityItem> {
        let mut displaced = Vec::new();
        for (entity_key, item) in other.entities {
            if let Some(prior) = self.entities.insert(entity_key, item) {
                warn!(
                    kind = %prior.kind,
                    id = %prior.identifier,
                    source = %prior.source,
                    "identifier provided by more than one import; keeping the later one"
                );
                displaced.push(prior);
            }
        }
        self.selection.extend(other.selection);
        displaced
    }
}

fn key(kind: EntityKind, identifier: &str) -> EntityKey {
    if kind.is_uuid() {
        (kind, identifier.to_ascii_lowercase())
    } else {
        (kind, identifier.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::PrefixMapper;

    fn source() -> Url {
        Url::parse("file:///catalog.json").unwrap()
    }

    fn control(id: &str, node: u64) -> Control {
        Control {
            node: NodeId(node),
            ..Control::new(id, id)
        }
    }

    #[test]
    fn collision_returns_prior_entry_and_newer_wins() {
        let mut index = EntityIndex::unmapped(source());
        assert!(index.add_control(&control("ac-1", 1)).is_none());
        let prior = index.add_control(&control("ac-1", 2)).expect("collision");
        assert_eq!(prior.node(), NodeId(1));
        let current = index.get_entity(EntityKind::Control, "ac-1", true).unwrap();
        assert_eq!(current.node(), NodeId(2));
    }

    #[test]
    fn uuid_lookup_is_case_insensitive() {
        let mut index = EntityIndex::unmapped(source());
        index.add_resource(&Resource {
            uuid: "ABCDEF".into(),
            node: NodeId(3),
            ..Default::default()
        });
        assert!(index.get_entity(EntityKind::Resource, "abcdef", true).is_some());
        assert!(index.get_entity(EntityKind::Resource, "ABCDEF", false).is_some());
        assert!(index.get_entity(EntityKind::Resource, "abcdef", false).is_none());
    }

    #[test]
    fn mapper_applies_on_registration() {
        let mut index = EntityIndex::new(source(), Arc::new(PrefixMapper::new("x-")));
        index.add_control(&control("ac-1", 1));
        let item = index.get_by_original(EntityKind::Control, "ac-1").unwrap();
        assert_eq!(item.identifier(), "x-ac-1");
        assert_eq!(item.original_identifier(), "ac-1");
        assert!(item.is_identifier_changed());
        assert!(index.get_entity(EntityKind::Control, "ac-1", true).is_none());
    }

    #[test]
    fn part_selection_inherits_from_container_and_is_cached() {
        let mut index = EntityIndex::unmapped(source());
        index.set_selection(NodeId(1), SelectionStatus::Selected);
        let part = Part {
            node: NodeId(2),
            ..Part::new("ac-1_smt", "statement")
        };
        index.add_part(&part, NodeId(1));
        let item = index.get_entity(EntityKind::Part, "ac-1_smt", true).cloned().unwrap();
        assert!(index.is_selected(&item));
        assert_eq!(index.selection(NodeId(2)), SelectionStatus::Selected);
    }

    #[test]
    fn selection_is_never_downgraded_to_unknown() {
        let mut index = EntityIndex::unmapped(source());
        index.set_selection(NodeId(1), SelectionStatus::Unselected);
        index.set_selection(NodeId(1), SelectionStatus::Unknown);
        assert_eq!(index.selection(NodeId(1)), SelectionStatus::Unselected);
    }

    #[test]
    fn reference_counts_and_resolution_flags() {
        let mut index = EntityIndex::unmapped(source());
        index.add_parameter(
            &Parameter {
                node: NodeId(4),
                ..Parameter::new("p1")
            },
            None,
        );
        assert_eq!(index.increment_reference_count(EntityKind::Parameter, "p1"), 1);
        assert_eq!(index.increment_reference_count(EntityKind::Parameter, "p1"), 2);
        assert!(index.mark_resolved(EntityKind::Parameter, "p1"));
        assert!(!index.mark_resolved(EntityKind::Parameter, "p1"));
        index.reset_reference_count(EntityKind::Parameter, "p1");
        let item = index.get_entity(EntityKind::Parameter, "p1", true).unwrap();
        assert_eq!(item.reference_count(), 0);
        assert_eq!(index.increment_reference_count(EntityKind::Parameter, "missing"), 0);
    }

    #[test]
    fn remove_item_clears_selection_cache() {
        let mut index = EntityIndex::unmapped(source());
        index.add_control(&control("ac-1", 7));
        index.set_selection(NodeId(7), SelectionStatus::Selected);
        assert!(index.remove_item(EntityKind::Control, "ac-1").is_some());
        assert_eq!(index.selection(NodeId(7)), SelectionStatus::Unknown);
        assert!(index.get_entity(EntityKind::Control, "ac-1", true).is_none());
    }

    #[test]
    fn append_merges_entities_and_selection() {
        let mut first = EntityIndex::unmapped(source());
        first.add_control(&control("ac-1", 1));
        let mut second = EntityIndex::unmapped(Url::parse("file:///other.json").unwrap());
        second.add_control(&control("ac-1", 2));
        second.add_control(&control("ac-2", 3));
        second.set_selection(NodeId(3), SelectionStatus::Selected);

        let displaced = first.append(second);
        assert_eq!(displaced.len(), 1);
        assert_eq!(first.entities(EntityKind::Control).count(), 2);
        assert_eq!(first.selection(NodeId(3)), SelectionStatus::Selected);
        let winner = first.get_entity(EntityKind::Control, "ac-1", true).unwrap();
        assert_eq!(winner.source().as_str(), "file:///other.json");
    }

    #[test]
    fn non_tree_kinds_are_always_selected() {
        let mut index = EntityIndex::unmapped(source());
        index.add_role(&Role {
            id: "admin".into(),
            title: "Admin".into(),
            node: NodeId(5),
            ..Default::default()
        });
        let item = index.get_entity(EntityKind::Role, "admin", true).cloned().unwrap();
        assert!(index.is_selected(&item));
    }
}
