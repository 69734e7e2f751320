//! Inclusion/exclusion predicates compiled from an import directive.
//!
//! Each predicate answers two questions for a control identifier: did it
//! match explicitly, and should the match carry over to child controls.
//! `matching` patterns use glob syntax (`*`, `?`) and are anchored to the
//! whole identifier.

use crate::catalog::{Import, SelectControl, WithChildControls};
use crate::error::{ResolutionError, Result};
use regex::Regex;
use std::collections::BTreeSet;

/// Outcome of evaluating one predicate against a control id.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Match {
    pub is_match: bool,
    pub applies_to_children: bool,
}

impl Match {
    pub const NONE: Match = Match {
        is_match: false,
        applies_to_children: false,
    };

    pub const ALL: Match = Match {
        is_match: true,
        applies_to_children: true,
    };
}

#[derive(Clone, Debug)]
/// One compiled `include-controls` / `exclude-controls` entry.
struct ControlMatcher {
    ids: BTreeSet<String>,
    patterns: Vec<Regex>,
    with_child_controls: bool,
}

impl ControlMatcher {
    fn compile(select: &SelectControl, location: &str) -> Result<Self> {
        let patterns = select
            .matching
            .iter()
            .map(|m| glob_to_regex(&m.pattern, location))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            ids: select.with_ids.iter().cloned().collect(),
            patterns,
            with_child_controls: select.with_child_controls == Some(WithChildControls::Yes),
        })
    }

    fn is_match(&self, id: &str) -> bool {
        self.ids.contains(id) || self.patterns.iter().any(|re| re.is_match(id))
    }
}

#[derive(Clone, Debug)]
enum Predicate {
    All,
    Matchers(Vec<ControlMatcher>),
}

impl Predicate {
    fn evaluate(&self, id: &str) -> Match {
        match self {
            Predicate::All => Match::ALL,
            Predicate::Matchers(matchers) => {
                let mut result = Match::NONE;
                for matcher in matchers.iter().filter(|m| m.is_match(id)) {
                    result.is_match = true;
                    result.applies_to_children |= matcher.with_child_controls;
                }
                result
            }
        }
    }
}

/// Inclusion and exclusion predicates for one import.
#[derive(Clone, Debug)]
pub struct ControlFilter {
    inclusion: Predicate,
    exclusion: Predicate,
}

impl ControlFilter {
    /// Filter that selects every control and excludes nothing.
    pub fn include_all() -> Self {
        Self {
            inclusion: Predicate::All,
            exclusion: Predicate::Matchers(Vec::new()),
        }
    }

    /// Compile the filter declared by an import.
    ///
    /// `include-all` wins over `include-controls` when both are present. An
    /// import without any inclusion directive selects nothing.
    pub fn from_import(import: &Import) -> Result<Self> {
        let location = format!("import '{}'", import.href);
        let inclusion = if import.include_all.is_some() {
            Predicate::All
        } else {
            Predicate::Matchers(
                import
                    .include_controls
                    .iter()
                    .map(|select| ControlMatcher::compile(select, &location))
                    .collect::<Result<Vec<_>>>()?,
            )
        };
        let exclusion = Predicate::Matchers(
            import
                .exclude_controls
                .iter()
                .map(|select| ControlMatcher::compile(select, &location))
                .collect::<Result<Vec<_>>>()?,
        );
        Ok(Self {
            inclusion,
            exclusion,
        })
    }

    pub fn inclusion(&self, id: &str) -> Match {
        self.inclusion.evaluate(id)
    }

    pub fn exclusion(&self, id: &str) -> Match {
        self.exclusion.evaluate(id)
    }

    /// True when the import can never select anything.
    pub fn selects_nothing(&self) -> bool {
        matches!(&self.inclusion, Predicate::Matchers(m) if m.is_empty())
    }
}

fn glob_to_regex(pattern: &str, location: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|err| {
        ResolutionError::configuration(location, format!("invalid pattern '{pattern}': {err}"))
    })
}
