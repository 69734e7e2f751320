//! `alter` directives: targeted removal and insertion inside one control.

use crate::catalog::{
    Add, Control, EntityKind, ItemName, Link, OSCAL_NAMESPACE, Parameter, Part, Position,
    Property, Remove,
};
use crate::error::{ResolutionError, Result};
use crate::mapper::IdentifierMapper;
use tracing::warn;

/// Compiled `remove` criteria.
///
/// Every supplied criterion must hold for an item to match, and only item
/// kinds able to satisfy all of them are searched.
#[derive(Clone, Debug)]
pub struct RemoveCriteria<'a> {
    name: Option<&'a str>,
    class: Option<&'a str>,
    id: Option<&'a str>,
    ns: Option<&'a str>,
    kinds: Vec<ItemName>,
}

impl<'a> RemoveCriteria<'a> {
    pub fn compile(remove: &'a Remove, location: &str) -> Result<Self> {
        let mut kinds: Vec<ItemName> = ItemName::ALL.to_vec();
        let mut narrow = |allowed: &[ItemName]| kinds.retain(|kind| allowed.contains(kind));

        let mut supplied = false;
        if remove.by_name.is_some() {
            narrow(&[ItemName::Prop, ItemName::Part]);
            supplied = true;
        }
        if remove.by_class.is_some() {
            narrow(&[ItemName::Param, ItemName::Prop, ItemName::Part]);
            supplied = true;
        }
        if remove.by_id.is_some() {
            narrow(&[ItemName::Param, ItemName::Part]);
            supplied = true;
        }
        if remove.by_ns.is_some() {
            narrow(&[ItemName::Prop, ItemName::Part]);
            supplied = true;
        }
        if let Some(item_name) = remove.by_item_name {
            narrow(&[item_name]);
            supplied = true;
        }

        if !supplied {
            return Err(ResolutionError::configuration(
                location,
                "remove requires at least one criterion",
            ));
        }
        if kinds.is_empty() {
            return Err(ResolutionError::configuration(
                location,
                "remove criteria cannot apply to any single item kind",
            ));
        }
        Ok(Self {
            name: remove.by_name.as_deref(),
            class: remove.by_class.as_deref(),
            id: remove.by_id.as_deref(),
            ns: remove.by_ns.as_deref(),
            kinds,
        })
    }

    fn applies_to(&self, kind: ItemName) -> bool {
        self.kinds.contains(&kind)
    }

    fn matches(
        &self,
        kind: ItemName,
        name: Option<&str>,
        class: Option<&str>,
        id: Option<&str>,
        ns: Option<&str>,
    ) -> bool {
        fn holds(wanted: Option<&str>, actual: Option<&str>) -> bool {
            wanted.is_none_or(|wanted| actual == Some(wanted))
        }
        self.applies_to(kind)
            && holds(self.name, name)
            && holds(self.class, class)
            && holds(self.id, id)
            && holds(self.ns, ns)
    }

    fn matches_param(&self, param: &Parameter) -> bool {
        self.matches(
            ItemName::Param,
            None,
            param.class.as_deref(),
            Some(&param.id),
            None,
        )
    }

    fn matches_prop(&self, prop: &Property) -> bool {
        self.matches(
            ItemName::Prop,
            Some(&prop.name),
            prop.class.as_deref(),
            None,
            Some(prop.namespace()),
        )
    }

    fn matches_link(&self, _link: &Link) -> bool {
        self.matches(ItemName::Link, None, None, None, None)
    }

    fn matches_part(&self, part: &Part) -> bool {
        self.matches(
            ItemName::Part,
            Some(&part.name),
            part.class.as_deref(),
            part.id.as_deref(),
            Some(part.ns.as_deref().unwrap_or(OSCAL_NAMESPACE)),
        )
    }

    /// Remove matches from the control; child controls are left alone.
    fn remove_from_control(&self, control: &mut Control) -> usize {
        let mut removed = self.remove_from_params(&mut control.params);
        removed += self.remove_from_props_and_links(&mut control.props, &mut control.links);
        removed + self.remove_from_parts(&mut control.parts)
    }

    fn remove_from_params(&self, params: &mut Vec<Parameter>) -> usize {
        let before = params.len();
        params.retain(|param| !self.matches_param(param));
        let mut removed = before - params.len();
        for param in params.iter_mut() {
            removed += self.remove_from_props_and_links(&mut param.props, &mut param.links);
        }
        removed
    }

    fn remove_from_parts(&self, parts: &mut Vec<Part>) -> usize {
        let before = parts.len();
        parts.retain(|part| !self.matches_part(part));
        let mut removed = before - parts.len();
        for part in parts.iter_mut() {
            removed += self.remove_from_props_and_links(&mut part.props, &mut part.links);
            removed += self.remove_from_parts(&mut part.parts);
        }
        removed
    }

    fn remove_from_props_and_links(&self, props: &mut Vec<Property>, links: &mut Vec<Link>) -> usize {
        let before = props.len() + links.len();
        props.retain(|prop| !self.matches_prop(prop));
        links.retain(|link| !self.matches_link(link));
        before - props.len() - links.len()
    }
}

/// Apply one `remove`; returns how many items were deleted.
pub fn apply_remove(control: &mut Control, remove: &Remove, location: &str) -> Result<usize> {
    let criteria = RemoveCriteria::compile(remove, location)?;
    let removed = criteria.remove_from_control(control);
    if removed == 0 {
        warn!(control = %control.id, location = %location, "remove matched nothing");
    }
    Ok(removed)
}

/// Object an `add` is anchored on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddTarget {
    Control,
    Parameter,
    Part,
}

impl AddTarget {
    fn as_str(self) -> &'static str {
        match self {
            AddTarget::Control => "control",
            AddTarget::Parameter => "param",
            AddTarget::Part => "part",
        }
    }
}

/// Payload kinds carried by an `add`.
#[derive(Clone, Copy, Debug, Default)]
struct Payload {
    title: bool,
    params: bool,
    props: bool,
    links: bool,
    parts: bool,
}

impl Payload {
    fn of(add: &Add) -> Self {
        Self {
            title: add.title.is_some(),
            params: !add.params.is_empty(),
            props: !add.props.is_empty(),
            links: !add.links.is_empty(),
            parts: !add.parts.is_empty(),
        }
    }

    fn sequences(&self) -> usize {
        [self.params, self.props, self.links, self.parts]
            .into_iter()
            .filter(|present| *present)
            .count()
    }

    fn is_empty(&self) -> bool {
        !self.title && self.sequences() == 0
    }

    /// Whether every payload kind can be inserted into `target`.
    fn fits(&self, target: AddTarget) -> bool {
        let title = !self.title || matches!(target, AddTarget::Control | AddTarget::Part);
        let params = !self.params || target == AddTarget::Control;
        let parts = !self.parts || matches!(target, AddTarget::Control | AddTarget::Part);
        title && params && parts
    }
}

/// Apply one `add` to the control.
pub fn apply_add(
    control: &mut Control,
    add: &Add,
    location: &str,
    mapper: &dyn IdentifierMapper,
) -> Result<()> {
    let payload = Payload::of(add);
    if payload.is_empty() {
        warn!(control = %control.id, location = %location, "add carries no content");
        return Ok(());
    }
    if payload.title && payload.sequences() >= 2 {
        return Err(ResolutionError::configuration(
            location,
            "a title cannot be added together with more than one other kind of content",
        ));
    }

    let position = add.position.unwrap_or_default();
    if position.is_sibling() {
        return add_beside(control, add, payload, position, location, mapper);
    }

    let by_id = add.by_id.as_deref().filter(|id| {
        *id != control.id && mapper.map(EntityKind::Control, id) != control.id
    });
    let Some(by_id) = by_id else {
        return add_into_control(control, add, payload, position, location);
    };

    let param_id = mapper.map(EntityKind::Parameter, by_id);
    if let Some(param) = control
        .params
        .iter_mut()
        .find(|param| param.id == by_id || param.id == param_id)
    {
        check_fits(payload, AddTarget::Parameter, location)?;
        insert(&mut param.props, add.props.clone(), position);
        insert(&mut param.links, add.links.clone(), position);
        return Ok(());
    }

    let part_id = part_identifier(&control.parts, by_id, mapper);
    if !contains_part(&control.parts, &part_id) {
        reject_child_control(control, by_id, location, mapper)?;
    }
    let part = find_part_mut(&mut control.parts, &part_id)
        .ok_or_else(|| ResolutionError::missing_target(EntityKind::Part, by_id, location))?;
    check_fits(payload, AddTarget::Part, location)?;
    if let Some(title) = &add.title {
        part.title = Some(title.clone());
    }
    insert(&mut part.props, add.props.clone(), position);
    insert(&mut part.links, add.links.clone(), position);
    insert(&mut part.parts, add.parts.clone(), position);
    Ok(())
}

fn add_into_control(
    control: &mut Control,
    add: &Add,
    payload: Payload,
    position: Position,
    location: &str,
) -> Result<()> {
    check_fits(payload, AddTarget::Control, location)?;
    if let Some(title) = &add.title {
        control.title = title.clone();
    }
    insert(&mut control.params, add.params.clone(), position);
    insert(&mut control.props, add.props.clone(), position);
    insert(&mut control.links, add.links.clone(), position);
    insert(&mut control.parts, add.parts.clone(), position);
    Ok(())
}

/// `before`/`after`: splice one homogeneous sequence next to a sibling.
fn add_beside(
    control: &mut Control,
    add: &Add,
    payload: Payload,
    position: Position,
    location: &str,
    mapper: &dyn IdentifierMapper,
) -> Result<()> {
    let Some(by_id) = add.by_id.as_deref() else {
        return Err(ResolutionError::configuration(
            location,
            format!("position '{}' requires by-id", position.as_str()),
        ));
    };
    if payload.title || payload.props || payload.links || payload.sequences() != 1 {
        return Err(ResolutionError::configuration(
            location,
            format!(
                "position '{}' requires exactly one sequence of params or parts",
                position.as_str()
            ),
        ));
    }
    let offset = usize::from(position == Position::After);

    if payload.params {
        let mapped = mapper.map(EntityKind::Parameter, by_id);
        let slot = control
            .params
            .iter()
            .position(|param| param.id == by_id || param.id == mapped)
            .ok_or_else(|| ResolutionError::missing_target(EntityKind::Parameter, by_id, location))?;
        splice(&mut control.params, slot + offset, add.params.clone());
        return Ok(());
    }

    let part_id = part_identifier(&control.parts, by_id, mapper);
    if !contains_part(&control.parts, &part_id) {
        reject_child_control(control, by_id, location, mapper)?;
    }
    let (siblings, slot) = sibling_slot(&mut control.parts, &part_id)
        .ok_or_else(|| ResolutionError::missing_target(EntityKind::Part, by_id, location))?;
    splice(siblings, slot + offset, add.parts.clone());
    Ok(())
}

/// Child controls are altered through their own `alter`, never through an
/// add on their parent.
fn reject_child_control(
    control: &Control,
    by_id: &str,
    location: &str,
    mapper: &dyn IdentifierMapper,
) -> Result<()> {
    let mapped = mapper.map(EntityKind::Control, by_id);
    if contains_control(&control.controls, by_id) || contains_control(&control.controls, &mapped) {
        return Err(ResolutionError::configuration(
            location,
            format!("by-id '{by_id}' names a child control; alter it directly"),
        ));
    }
    Ok(())
}

fn contains_control(controls: &[Control], id: &str) -> bool {
    controls
        .iter()
        .any(|control| control.id == id || contains_control(&control.controls, id))
}

fn check_fits(payload: Payload, target: AddTarget, location: &str) -> Result<()> {
    if payload.fits(target) {
        Ok(())
    } else {
        Err(ResolutionError::configuration(
            location,
            format!("content cannot be added to a {}", target.as_str()),
        ))
    }
}

fn insert<T>(items: &mut Vec<T>, additions: Vec<T>, position: Position) {
    match position {
        Position::Starting => splice(items, 0, additions),
        _ => items.extend(additions),
    }
}

fn splice<T>(items: &mut Vec<T>, at: usize, additions: Vec<T>) {
    let at = at.min(items.len());
    items.splice(at..at, additions);
}

fn contains_part(parts: &[Part], id: &str) -> bool {
    parts
        .iter()
        .any(|part| part.id.as_deref() == Some(id) || contains_part(&part.parts, id))
}

/// `id` as written when the control has such a part, otherwise its mapped form.
fn part_identifier(parts: &[Part], id: &str, mapper: &dyn IdentifierMapper) -> String {
    if contains_part(parts, id) {
        id.to_string()
    } else {
        mapper.map(EntityKind::Part, id)
    }
}

fn find_part_mut<'a>(parts: &'a mut [Part], id: &str) -> Option<&'a mut Part> {
    for part in parts {
        if part.id.as_deref() == Some(id) {
            return Some(part);
        }
        if let Some(found) = find_part_mut(&mut part.parts, id) {
            return Some(found);
        }
    }
    None
}

/// Sibling list holding the part with `id`, and its index in that list.
fn sibling_slot<'a>(parts: &'a mut Vec<Part>, id: &str) -> Option<(&'a mut Vec<Part>, usize)> {
    if let Some(slot) = parts.iter().position(|part| part.id.as_deref() == Some(id)) {
        return Some((parts, slot));
    }
    for part in parts.iter_mut() {
        if let Some(found) = sibling_slot(&mut part.parts, id) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::IdentityMapper;

    fn part_ids(parts: &[Part]) -> Vec<&str> {
        parts.iter().filter_map(|p| p.id.as_deref()).collect()
    }

    fn control_with_parts() -> Control {
        let mut control = Control::new("ac-1", "Policy");
        control.parts = vec![Part::new("p1", "statement"), Part::new("p3", "guidance")];
        control
    }

    fn add_parts(position: Position, by_id: Option<&str>, id: &str) -> Add {
        Add {
            position: Some(position),
            by_id: by_id.map(str::to_string),
            parts: vec![Part::new(id, "item")],
            ..Default::default()
        }
    }

    #[test]
    fn add_before_splices_ahead_of_sibling() -> anyhow::Result<()> {
        let mut control = control_with_parts();
        apply_add(
            &mut control,
            &add_parts(Position::Before, Some("p1"), "p2"),
            "alter[ac-1].add[0]",
            &IdentityMapper,
        )?;
        assert_eq!(part_ids(&control.parts), vec!["p2", "p1", "p3"]);
        Ok(())
    }

    #[test]
    fn add_after_reaches_nested_parts() -> anyhow::Result<()> {
        let mut control = control_with_parts();
        control.parts[0].parts = vec![Part::new("p1.a", "item"), Part::new("p1.c", "item")];
        apply_add(
            &mut control,
            &add_parts(Position::After, Some("p1.a"), "p1.b"),
            "alter[ac-1].add[0]",
            &IdentityMapper,
        )?;
        assert_eq!(part_ids(&control.parts[0].parts), vec!["p1.a", "p1.b", "p1.c"]);
        Ok(())
    }

    #[test]
    fn starting_and_ending_target_the_container() -> anyhow::Result<()> {
        let mut control = control_with_parts();
        apply_add(
            &mut control,
            &add_parts(Position::Starting, None, "p0"),
            "a",
            &IdentityMapper,
        )?;
        apply_add(
            &mut control,
            &add_parts(Position::Ending, Some("p1"), "p1.z"),
            "b",
            &IdentityMapper,
        )?;
        assert_eq!(part_ids(&control.parts), vec!["p0", "p1", "p3"]);
        assert_eq!(part_ids(&control.parts[1].parts), vec!["p1.z"]);
        Ok(())
    }

    #[test]
    fn sibling_positions_require_by_id_and_one_sequence() {
        let mut control = control_with_parts();
        let err = apply_add(
            &mut control,
            &add_parts(Position::Before, None, "p2"),
            "alter[ac-1].add[0]",
            &IdentityMapper,
        )
        .unwrap_err();
        assert!(err.to_string().contains("requires by-id"));

        let mut mixed = add_parts(Position::After, Some("p1"), "p2");
        mixed.props.push(Property::new("label", "x"));
        let err = apply_add(&mut control, &mixed, "alter[ac-1].add[1]", &IdentityMapper)
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Configuration { .. }));
    }

    #[test]
    fn missing_anchor_is_fatal() {
        let mut control = control_with_parts();
        let err = apply_add(
            &mut control,
            &add_parts(Position::After, Some("p9"), "p2"),
            "alter[ac-1].add[0]",
            &IdentityMapper,
        )
        .unwrap_err();
        assert!(matches!(err, ResolutionError::MissingTarget { .. }));
    }

    #[test]
    fn child_controls_are_not_add_targets() {
        let mut control = control_with_parts();
        control.controls.push(Control::new("ac-1.1", "Enhancement"));
        let add = Add {
            by_id: Some("ac-1.1".into()),
            props: vec![Property::new("label", "x")],
            ..Default::default()
        };
        let err = apply_add(&mut control, &add, "alter[ac-1].add[0]", &IdentityMapper).unwrap_err();
        let ResolutionError::Configuration { location, message } = &err else {
            panic!("expected configuration error, got {err}");
        };
        assert_eq!(location, "alter[ac-1].add[0]");
        assert!(message.contains("child control"), "unexpected message: {message}");

        let beside = add_parts(Position::After, Some("ac-1.1"), "p2");
        let err = apply_add(&mut control, &beside, "alter[ac-1].add[1]", &IdentityMapper).unwrap_err();
        assert!(matches!(err, ResolutionError::Configuration { .. }));
        assert!(control.controls[0].props.is_empty());
    }

    #[test]
    fn title_with_mixed_payload_is_rejected() {
        let mut control = control_with_parts();
        let add = Add {
            title: Some("New".into()),
            props: vec![Property::new("label", "x")],
            parts: vec![Part::new("p9", "item")],
            ..Default::default()
        };
        assert!(apply_add(&mut control, &add, "a", &IdentityMapper).is_err());
    }

    #[test]
    fn params_cannot_be_added_to_parts() {
        let mut control = control_with_parts();
        let add = Add {
            by_id: Some("p1".into()),
            params: vec![Parameter::new("x")],
            ..Default::default()
        };
        let err = apply_add(&mut control, &add, "a", &IdentityMapper).unwrap_err();
        assert!(err.to_string().contains("part"));
    }

    #[test]
    fn remove_by_id_deletes_matching_param() -> anyhow::Result<()> {
        let mut control = Control::new("ac-1", "Policy");
        control.params = vec![Parameter::new("param3"), Parameter::new("param4")];
        let remove = Remove {
            by_id: Some("param3".into()),
            by_item_name: Some(ItemName::Param),
            ..Default::default()
        };
        assert_eq!(apply_remove(&mut control, &remove, "r")?, 1);
        let ids: Vec<&str> = control.params.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["param4"]);
        Ok(())
    }

    #[test]
    fn remove_descends_into_unmatched_parts_but_not_child_controls() -> anyhow::Result<()> {
        let mut control = control_with_parts();
        control.parts[0].props.push(Property::new("label", "AC-1a"));
        control.props.push(Property::new("label", "AC-1"));
        control.props.push(Property::new("sort-id", "ac-01"));
        let mut child = Control::new("ac-1.1", "Child");
        child.props.push(Property::new("label", "AC-1(1)"));
        control.controls.push(child);

        let remove = Remove {
            by_name: Some("label".into()),
            by_item_name: Some(ItemName::Prop),
            ..Default::default()
        };
        assert_eq!(apply_remove(&mut control, &remove, "r")?, 2);
        assert_eq!(control.props.len(), 1);
        assert!(control.parts[0].props.is_empty());
        assert_eq!(control.controls[0].props.len(), 1);
        Ok(())
    }

    #[test]
    fn incompatible_criteria_are_fatal() {
        let mut control = control_with_parts();
        let remove = Remove {
            by_id: Some("x".into()),
            by_item_name: Some(ItemName::Prop),
            ..Default::default()
        };
        let err = apply_remove(&mut control, &remove, "alter[ac-1].remove[0]").unwrap_err();
        assert!(err.to_string().contains("alter[ac-1].remove[0]"));
        assert!(apply_remove(&mut control, &Remove::default(), "r").is_err());
    }

    #[test]
    fn matched_parts_take_their_subtree() -> anyhow::Result<()> {
        let mut control = control_with_parts();
        control.parts[0].parts.push(Part::new("p1.a", "item"));
        let remove = Remove {
            by_name: Some("statement".into()),
            ..Default::default()
        };
        assert_eq!(apply_remove(&mut control, &remove, "r")?, 1);
        assert_eq!(part_ids(&control.parts), vec!["p3"]);
        Ok(())
    }
}
