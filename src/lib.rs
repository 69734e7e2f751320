//! Profile resolution for layered control catalogs.
//!
//! A profile imports controls from catalogs (or from other profiles), selects
//! and excludes controls, merges the survivors, optionally restructures them,
//! and then modifies parameters and control contents. `ProfileResolver` runs
//! that pipeline and produces a standalone catalog that keeps every entity
//! the selected controls reference and nothing else.
//!
//! The public surface is intentionally small: build a `ResolverConfig`, hand
//! it to `ProfileResolver::new`, and call one of the `resolve*` methods. The
//! individual passes are public as well so tooling can run them in isolation.

pub mod catalog;
pub mod error;
pub mod filter;
pub mod import;
pub mod loader;
pub mod mapper;
pub mod markup;
pub mod merge;
pub mod modify;
pub mod prune;
pub mod reference;
pub mod resolver;
pub mod selection;

pub use catalog::{Catalog, Document, EntityIndex, EntityKind, Profile};
pub use error::{ResolutionError, Result};
pub use loader::{DocumentLoader, FsLoader, MemoryLoader, parse_document, path_to_url};
pub use mapper::{IdentifierMapper, IdentityMapper, PrefixMapper};
pub use merge::MergeStrategy;
pub use resolver::{ProfileResolver, ResolverConfig};
