//! Control selection for one imported catalog.
//!
//! The visitor walks the catalog once, decides SELECTED/UNSELECTED for every
//! control and group, and registers every identifiable node with the entity
//! index whether or not it was selected; later passes still need unselected
//! identifiers for remapping and diagnostics.
//!
//! Controls are evaluated post-order. A control matches when the inclusion
//! predicate hits and the exclusion predicate does not; without an explicit
//! hit it falls back to the default inherited from its parent, which is only
//! true when the parent matched with `with-child-controls: yes`. Exclusion
//! always wins, including exclusions inherited from an excluded ancestor.
//! A group is selected when anything below it is selected. Parts inherit the
//! status of their nearest control or group through the index.

use crate::catalog::{Catalog, Control, EntityIndex, Group, NodeId, Part, SelectionStatus};
use crate::filter::ControlFilter;
use tracing::debug;

/// Defaults a control inherits from its parent.
#[derive(Clone, Copy, Debug, Default)]
struct Inherited {
    include: bool,
    exclude: bool,
}

/// Counts reported after a selection pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SelectionSummary {
    pub selected_controls: usize,
    pub unselected_controls: usize,
    pub selected_groups: usize,
    pub unselected_groups: usize,
}

pub struct ControlSelectionVisitor<'f> {
    filter: &'f ControlFilter,
}

impl<'f> ControlSelectionVisitor<'f> {
    pub fn new(filter: &'f ControlFilter) -> Self {
        Self { filter }
    }

    /// Annotate the catalog and register its entities.
    pub fn visit_catalog(&self, catalog: &Catalog, index: &mut EntityIndex) -> SelectionSummary {
        let mut summary = SelectionSummary::default();
        index.set_selection(catalog.node, SelectionStatus::Selected);

        for param in &catalog.params {
            index.add_parameter(param, None);
        }
        for control in &catalog.controls {
            self.visit_control(control, Inherited::default(), index, &mut summary);
        }
        for group in &catalog.groups {
            self.visit_group(group, index, &mut summary);
        }
        register_metadata(catalog, index);

        debug!(
            source = %index.source(),
            selected = summary.selected_controls,
            unselected = summary.unselected_controls,
            "control selection complete"
        );
        summary
    }

    fn visit_group(
        &self,
        group: &Group,
        index: &mut EntityIndex,
        summary: &mut SelectionSummary,
    ) -> bool {
        index.add_group(group);
        for param in &group.params {
            index.add_parameter(param, Some(group.node));
        }

        // No early exit: every descendant must still be registered.
        let mut selected = false;
        for control in &group.controls {
            selected |= self.visit_control(control, Inherited::default(), index, summary);
        }
        for child in &group.groups {
            selected |= self.visit_group(child, index, summary);
        }

        index.set_selection(group.node, SelectionStatus::from_match(selected));
        register_parts(&group.parts, group.node, index);
        if selected {
            summary.selected_groups += 1;
        } else {
            summary.unselected_groups += 1;
        }
        selected
    }

    /// Returns true when the control or any descendant control is selected.
    fn visit_control(
        &self,
        control: &Control,
        inherited: Inherited,
        index: &mut EntityIndex,
        summary: &mut SelectionSummary,
    ) -> bool {
        let inclusion = self.filter.inclusion(&control.id);
        let exclusion = self.filter.exclusion(&control.id);

        let excluded = exclusion.is_match || inherited.exclude;
        let is_match = if excluded {
            false
        } else if inclusion.is_match {
            true
        } else {
            inherited.include
        };
        let applies_to_children =
            (inclusion.is_match && inclusion.applies_to_children) || inherited.include;
        let child_defaults = Inherited {
            include: is_match && applies_to_children,
            exclude: excluded && (exclusion.applies_to_children || inherited.exclude),
        };

        let mut any_child = false;
        for child in &control.controls {
            any_child |= self.visit_control(child, child_defaults, index, summary);
        }

        index.add_control(control);
        index.set_selection(control.node, SelectionStatus::from_match(is_match));
        for param in &control.params {
            index.add_parameter(param, Some(control.node));
        }
        register_parts(&control.parts, control.node, index);

        if is_match {
            summary.selected_controls += 1;
        } else {
            summary.unselected_controls += 1;
        }
        is_match || any_child
    }
}

fn register_parts(parts: &[Part], container: NodeId, index: &mut EntityIndex) {
    for part in parts {
        index.add_part(part, container);
        let status = index.selection(container);
        index.set_selection(part.node, status);
        register_parts(&part.parts, container, index);
    }
}

/// Register roles, locations, parties and back-matter resources.
pub fn register_metadata(catalog: &Catalog, index: &mut EntityIndex) {
    for role in &catalog.metadata.roles {
        index.add_role(role);
    }
    for location in &catalog.metadata.locations {
        index.add_location(location);
    }
    for party in &catalog.metadata.parties {
        index.add_party(party);
    }
    for resource in catalog.resources() {
        index.add_resource(resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        EntityKind, Import, Matching, NodeIdAllocator, SelectControl, WithChildControls,
    };
    use url::Url;

    fn catalog() -> Catalog {
        // group ac { ac-1 { ac-1.1 }, ac-2 { ac-2.1 { ac-2.1.a } } }, group au { au-1 }
        let mut ac1 = Control::new("ac-1", "Policy");
        ac1.controls.push(Control::new("ac-1.1", "Enhancement"));
        ac1.parts.push(Part::new("ac-1_smt", "statement"));
        let mut ac21 = Control::new("ac-2.1", "Automated");
        ac21.controls.push(Control::new("ac-2.1.a", "Deep"));
        let mut ac2 = Control::new("ac-2", "Accounts");
        ac2.controls.push(ac21);
        let mut ac = Group::new("ac", "Access Control");
        ac.controls = vec![ac1, ac2];
        let mut au = Group::new("au", "Audit");
        au.controls.push(Control::new("au-1", "Audit Policy"));
        let mut catalog = Catalog::new("c", "Cat");
        catalog.groups = vec![ac, au];
        NodeIdAllocator::default().assign(&mut catalog);
        catalog
    }

    fn select(ids: &[&str], children: bool) -> SelectControl {
        SelectControl {
            with_child_controls: Some(if children {
                WithChildControls::Yes
            } else {
                WithChildControls::No
            }),
            with_ids: ids.iter().map(|s| s.to_string()).collect(),
            matching: Vec::new(),
        }
    }

    fn run(include: Vec<SelectControl>, exclude: Vec<SelectControl>) -> EntityIndex {
        let import = Import {
            href: "catalog.json".into(),
            include_controls: include,
            exclude_controls: exclude,
            ..Default::default()
        };
        let filter = ControlFilter::from_import(&import).unwrap();
        let mut index = EntityIndex::unmapped(Url::parse("file:///catalog.json").unwrap());
        ControlSelectionVisitor::new(&filter).visit_catalog(&catalog(), &mut index);
        index
    }

    fn selected(index: &mut EntityIndex, kind: EntityKind, id: &str) -> bool {
        let item = index.get_entity(kind, id, true).cloned().expect("registered");
        index.is_selected(&item)
    }

    #[test]
    fn children_inherit_only_with_child_controls() {
        let mut index = run(vec![select(&["ac-2"], true), select(&["ac-1"], false)], vec![]);
        assert!(selected(&mut index, EntityKind::Control, "ac-2"));
        assert!(selected(&mut index, EntityKind::Control, "ac-2.1"));
        assert!(selected(&mut index, EntityKind::Control, "ac-2.1.a"));
        assert!(selected(&mut index, EntityKind::Control, "ac-1"));
        assert!(!selected(&mut index, EntityKind::Control, "ac-1.1"));
    }

    #[test]
    fn exclusion_beats_inclusion() {
        let mut index = run(
            vec![select(&["ac-1", "ac-2"], false)],
            vec![select(&["ac-1"], false)],
        );
        assert!(!selected(&mut index, EntityKind::Control, "ac-1"));
        assert!(selected(&mut index, EntityKind::Control, "ac-2"));
    }

    #[test]
    fn inherited_default_yields_to_explicit_exclusion() {
        let mut index = run(vec![select(&["ac-2"], true)], vec![select(&["ac-2.1"], false)]);
        assert!(!selected(&mut index, EntityKind::Control, "ac-2.1"));
        // ac-2.1 did not match, so nothing flows further down
        assert!(!selected(&mut index, EntityKind::Control, "ac-2.1.a"));
    }

    #[test]
    fn exclusion_with_children_covers_subtree() {
        let import = Import {
            href: "catalog.json".into(),
            include_all: Some(Default::default()),
            exclude_controls: vec![select(&["ac-2"], true)],
            ..Default::default()
        };
        let filter = ControlFilter::from_import(&import).unwrap();
        let mut index = EntityIndex::unmapped(Url::parse("file:///catalog.json").unwrap());
        ControlSelectionVisitor::new(&filter).visit_catalog(&catalog(), &mut index);
        assert!(!selected(&mut index, EntityKind::Control, "ac-2"));
        assert!(!selected(&mut index, EntityKind::Control, "ac-2.1.a"));
        assert!(selected(&mut index, EntityKind::Control, "ac-1.1"));
    }

    #[test]
    fn groups_follow_descendants_and_unselected_nodes_are_registered() {
        let pattern = SelectControl {
            matching: vec![Matching {
                pattern: "ac-2.1.*".into(),
            }],
            ..Default::default()
        };
        let mut index = run(vec![pattern], vec![]);
        assert!(selected(&mut index, EntityKind::Group, "ac"));
        assert!(!selected(&mut index, EntityKind::Group, "au"));
        assert!(!selected(&mut index, EntityKind::Control, "ac-2"));
        assert!(selected(&mut index, EntityKind::Control, "ac-2.1.a"));
        assert!(index.get_entity(EntityKind::Control, "au-1", true).is_some());
    }

    #[test]
    fn parts_inherit_their_control_status() {
        let mut index = run(vec![select(&["ac-1"], false)], vec![]);
        assert!(selected(&mut index, EntityKind::Part, "ac-1_smt"));
        let mut index = run(vec![select(&["ac-2"], false)], vec![]);
        assert!(!selected(&mut index, EntityKind::Part, "ac-1_smt"));
    }
}
