//! Identifier mapping policies.
//!
//! The entity index asks the mapper for the output identifier of every entity
//! it registers. Mappers are pure: the same `(kind, id)` always maps to the
//! same output, and no mapper holds process-wide state.

use crate::catalog::EntityKind;

/// Maps an original identifier to the identifier used in the resolved output.
pub trait IdentifierMapper: Send + Sync {
    fn map(&self, kind: EntityKind, original: &str) -> String;
}

/// Leaves every identifier untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityMapper;

impl IdentifierMapper for IdentityMapper {
    fn map(&self, _kind: EntityKind, original: &str) -> String {
        original.to_string()
    }
}

/// Prepends a fixed prefix to token identifiers.
///
/// UUID-keyed kinds keep their identifiers; prefixing would break the uuid
/// syntax.
#[derive(Clone, Debug)]
pub struct PrefixMapper {
    prefix: String,
}

impl PrefixMapper {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl IdentifierMapper for PrefixMapper {
    fn map(&self, kind: EntityKind, original: &str) -> String {
        if kind.is_uuid() || original.starts_with(&self.prefix) {
            original.to_string()
        } else {
            format!("{}{original}", self.prefix)
        }
    }
}
