//! Merging resolved imports and structuring the result.
//!
//! `merge_by_key` is the single list-merge rule used everywhere: concatenate,
//! then keep the last occurrence of every key while preserving the order in
//! which surviving keys were first seen from the back. Metadata and
//! back-matter are merged with it; control trees are appended.

use crate::catalog::{BackMatter, Catalog, Control, Group, Merge, Metadata, Parameter};
use crate::error::{ResolutionError, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;
use tracing::debug;

/// Merge two lists so that the later occurrence of a key wins.
pub fn merge_by_key<T, K, F>(original: Vec<T>, additional: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    let mut merged: Vec<T> = original
        .into_iter()
        .chain(additional)
        .rev()
        .filter(|item| seen.insert(key(item)))
        .collect();
    merged.reverse();
    merged
}

/// Key for items without an identifier: their serialized form.
pub fn structural_key<T: Serialize>(item: &T) -> String {
    serde_json::to_string(item).unwrap_or_default()
}

/// Merge roles, locations, parties and responsible parties of `additional`
/// into `target`.
pub fn merge_metadata(target: &mut Metadata, additional: Metadata) {
    target.roles = merge_by_key(
        std::mem::take(&mut target.roles),
        additional.roles,
        |role| role.id.clone(),
    );
    target.locations = merge_by_key(
        std::mem::take(&mut target.locations),
        additional.locations,
        |location| location.uuid.to_ascii_lowercase(),
    );
    target.parties = merge_by_key(
        std::mem::take(&mut target.parties),
        additional.parties,
        |party| party.uuid.to_ascii_lowercase(),
    );
    target.responsible_parties = merge_by_key(
        std::mem::take(&mut target.responsible_parties),
        additional.responsible_parties,
        |responsible| responsible.role_id.clone(),
    );
}

pub fn merge_back_matter(target: &mut Option<BackMatter>, additional: Option<BackMatter>) {
    let Some(additional) = additional else {
        return;
    };
    let existing = target.take().unwrap_or_default();
    let resources = merge_by_key(existing.resources, additional.resources, |resource| {
        resource.uuid.to_ascii_lowercase()
    });
    *target = (!resources.is_empty()).then_some(BackMatter { resources });
}

/// Fold one resolved import into the accumulating catalog.
pub fn merge_into(accumulator: &mut Catalog, imported: Catalog) {
    debug!(
        controls = imported.controls.len(),
        groups = imported.groups.len(),
        params = imported.params.len(),
        "merging import"
    );
    accumulator.params.extend(imported.params);
    accumulator.controls.extend(imported.controls);
    accumulator.groups.extend(imported.groups);
    if compare_versions(&imported.metadata.oscal_version, &accumulator.metadata.oscal_version)
        == Ordering::Greater
    {
        accumulator.metadata.oscal_version = imported.metadata.oscal_version.clone();
    }
    merge_metadata(&mut accumulator.metadata, imported.metadata);
    merge_back_matter(&mut accumulator.back_matter, imported.back_matter);
}

/// Compare dotted version strings component-wise.
///
/// Numeric prefixes compare as numbers; anything after them compares
/// lexically. A version with extra components is greater.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let mut left = left.split('.');
    let mut right = right.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(a), Some(b)) => match compare_component(a, b) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

fn compare_component(left: &str, right: &str) -> Ordering {
    let (left_num, left_rest) = split_numeric(left);
    let (right_num, right_rest) = split_numeric(right);
    match (left_num, right_num) {
        (Some(a), Some(b)) => a.cmp(&b).then_with(|| left_rest.cmp(right_rest)),
        _ => left.cmp(right),
    }
}

fn split_numeric(component: &str) -> (Option<u64>, &str) {
    let end = component
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(component.len());
    (component[..end].parse().ok(), &component[end..])
}

/// How the merged control tree is shaped in the output.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MergeStrategy {
    /// Keep the group hierarchy of the imports.
    AsIs,
    /// Drop all groups and lift their controls and parameters to the root.
    #[default]
    Flat,
}

impl MergeStrategy {
    /// Read the profile's merge directive.
    ///
    /// `custom` structuring is not supported and is rejected outright.
    pub fn from_directive(merge: Option<&Merge>) -> Result<Self> {
        let Some(merge) = merge else {
            return Ok(MergeStrategy::Flat);
        };
        if merge.custom.is_some() {
            return Err(ResolutionError::configuration(
                "merge",
                "custom structuring is not supported",
            ));
        }
        if merge.as_is == Some(true) {
            Ok(MergeStrategy::AsIs)
        } else {
            Ok(MergeStrategy::Flat)
        }
    }

    pub fn apply(self, catalog: &mut Catalog) {
        match self {
            MergeStrategy::AsIs => {}
            MergeStrategy::Flat => flatten(catalog),
        }
    }
}

/// Remove every group, lifting its parameters and controls to the catalog
/// root in document order. Child controls of controls stay nested.
pub fn flatten(catalog: &mut Catalog) {
    fn lift(groups: Vec<Group>, params: &mut Vec<Parameter>, controls: &mut Vec<Control>) {
        for group in groups {
            params.extend(group.params);
            controls.extend(group.controls);
            lift(group.groups, params, controls);
        }
    }

    let groups = std::mem::take(&mut catalog.groups);
    lift(groups, &mut catalog.params, &mut catalog.controls);
}
