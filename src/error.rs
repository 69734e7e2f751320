//! Failure surface of a profile resolution.
//!
//! Configuration and resolution errors abort the whole `resolve` call; there
//! is no partial output. Reference problems are not errors and are reported
//! through `tracing` instead.

use crate::catalog::EntityKind;
use thiserror::Error;
use url::Url;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Malformed or self-contradictory directive.
    #[error("invalid profile configuration in {location}: {message}")]
    Configuration { location: String, message: String },

    #[error("import cycle detected: {chain}")]
    ImportCycle { chain: String },

    #[error("unable to resolve import '{href}' of {profile}: {reason}")]
    UnresolvableImport {
        href: String,
        profile: Url,
        reason: String,
    },

    #[error("unable to load {uri}")]
    Load {
        uri: Url,
        #[source]
        source: BoxError,
    },

    #[error("{kind} '{id}' targeted by {directive} does not exist in the resolved catalog")]
    MissingTarget {
        kind: EntityKind,
        id: String,
        directive: String,
    },

    /// Failure while resolving an imported profile.
    #[error("while resolving imported profile {uri}")]
    Nested {
        uri: Url,
        #[source]
        source: Box<ResolutionError>,
    },
}

impl ResolutionError {
    pub fn configuration(location: impl Into<String>, message: impl Into<String>) -> Self {
        ResolutionError::Configuration {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn missing_target(kind: EntityKind, id: impl Into<String>, directive: &str) -> Self {
        ResolutionError::MissingTarget {
            kind,
            id: id.into(),
            directive: directive.to_string(),
        }
    }

    /// Innermost error of a nested chain.
    pub fn root_cause(&self) -> &ResolutionError {
        match self {
            ResolutionError::Nested { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ResolutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_directive() {
        let err = ResolutionError::configuration("alter[ac-1].add[0]", "before requires by-id");
        assert_eq!(
            err.to_string(),
            "invalid profile configuration in alter[ac-1].add[0]: before requires by-id"
        );

        let err = ResolutionError::missing_target(EntityKind::Parameter, "p9", "set-parameter");
        assert_eq!(
            err.to_string(),
            "parameter 'p9' targeted by set-parameter does not exist in the resolved catalog"
        );
    }

    #[test]
    fn root_cause_unwraps_nested_profiles() {
        let inner = ResolutionError::ImportCycle {
            chain: "a → b → a".into(),
        };
        let outer = ResolutionError::Nested {
            uri: Url::parse("file:///b.json").unwrap(),
            source: Box::new(inner),
        };
        assert!(matches!(outer.root_cause(), ResolutionError::ImportCycle { .. }));
        assert!(std::error::Error::source(&outer).is_some());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ResolutionError>();
    }
}
