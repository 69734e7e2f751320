//! Modify phase: parameter overrides and control alterations.
//!
//! Runs against the fully merged and structured catalog. Targets are located
//! through a fresh index built over that catalog; a directive whose target
//! does not exist fails the resolution. All set-parameter directives apply
//! first, then every alter in document order.

mod alter;

pub use alter::{AddTarget, RemoveCriteria, apply_add, apply_remove};

use crate::catalog::{
    Catalog, EntityIndex, EntityKind, Modify, NodeId, NodeIdAllocator, Parameter, SetParameter,
    node::{find_control_mut, find_parameter_mut},
};
use crate::error::{ResolutionError, Result};
use crate::filter::ControlFilter;
use crate::mapper::IdentifierMapper;
use crate::merge::{merge_by_key, structural_key};
use crate::selection::ControlSelectionVisitor;
use tracing::debug;
use url::Url;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ModifySummary {
    pub parameters_set: usize,
    pub items_removed: usize,
    pub additions: usize,
}

/// Apply a profile's modify directive to the resolved catalog.
///
/// Target identifiers are matched through `mapper` first, so directives may
/// name either the original or the mapped identifier.
pub fn apply(
    catalog: &mut Catalog,
    modify: &Modify,
    source: &Url,
    mapper: &dyn IdentifierMapper,
) -> Result<ModifySummary> {
    NodeIdAllocator::default().assign(catalog);
    let mut index = EntityIndex::unmapped(source.clone());
    ControlSelectionVisitor::new(&ControlFilter::include_all()).visit_catalog(catalog, &mut index);

    let mut summary = ModifySummary::default();
    for set in &modify.set_parameters {
        let node = locate(&index, mapper, EntityKind::Parameter, &set.param_id)
            .ok_or_else(|| {
                ResolutionError::missing_target(EntityKind::Parameter, &set.param_id, "set-parameter")
            })?;
        let param = find_parameter_mut(catalog, node).ok_or_else(|| {
            ResolutionError::missing_target(EntityKind::Parameter, &set.param_id, "set-parameter")
        })?;
        set_parameter(param, set);
        summary.parameters_set += 1;
    }

    for alter in &modify.alters {
        let directive = format!("alter[{}]", alter.control_id);
        let control = locate(&index, mapper, EntityKind::Control, &alter.control_id)
            .and_then(|node| find_control_mut(catalog, node))
            .ok_or_else(|| {
                ResolutionError::missing_target(EntityKind::Control, &alter.control_id, "alter")
            })?;
        for (position, remove) in alter.removes.iter().enumerate() {
            let location = format!("{directive}.remove[{position}]");
            summary.items_removed += apply_remove(control, remove, &location)?;
        }
        for (position, add) in alter.adds.iter().enumerate() {
            let location = format!("{directive}.add[{position}]");
            apply_add(control, add, &location, mapper)?;
            summary.additions += 1;
        }
    }

    debug!(
        parameters_set = summary.parameters_set,
        items_removed = summary.items_removed,
        additions = summary.additions,
        "modify phase complete"
    );
    Ok(summary)
}

fn locate(
    index: &EntityIndex,
    mapper: &dyn IdentifierMapper,
    kind: EntityKind,
    id: &str,
) -> Option<NodeId> {
    index
        .get_entity(kind, &mapper.map(kind, id), true)
        .or_else(|| index.get_entity(kind, id, true))
        .map(|item| item.node())
}

/// Overlay a set-parameter directive onto a parameter.
///
/// Scalars are replaced only when supplied. List fields merge with the
/// later entry winning; `values` and `select` replace wholesale.
pub fn set_parameter(param: &mut Parameter, set: &SetParameter) {
    if let Some(class) = &set.class {
        param.class = Some(class.clone());
    }
    if let Some(label) = &set.label {
        param.label = Some(label.clone());
    }
    if let Some(usage) = &set.usage {
        param.usage = Some(usage.clone());
    }
    param.props = merge_by_key(
        std::mem::take(&mut param.props),
        set.props.clone(),
        structural_key,
    );
    param.links = merge_by_key(
        std::mem::take(&mut param.links),
        set.links.clone(),
        structural_key,
    );
    param.constraints = merge_by_key(
        std::mem::take(&mut param.constraints),
        set.constraints.clone(),
        structural_key,
    );
    param.guidelines = merge_by_key(
        std::mem::take(&mut param.guidelines),
        set.guidelines.clone(),
        structural_key,
    );
    if let Some(values) = &set.values {
        param.values = values.clone();
    }
    if let Some(select) = &set.select {
        param.select = Some(select.clone());
    }
}
