//! Document model wiring.
//!
//! This module holds the catalog/profile records, the identity types shared by
//! every resolution pass, the entity index, and the per-resolution document
//! repository. Passes navigate the tree through the plain records and use
//! `EntityIndex` for identity, selection and reference-count state.

pub mod identity;
pub mod index;
pub mod model;
pub mod node;
pub mod repository;

pub use identity::{
    EntityKind, ItemName, NodeId, OSCAL_NAMESPACE, Position, SelectionStatus, WithChildControls,
};
pub use index::{EntityIndex, EntityItem};
pub use model::{
    Add, Alter, BackMatter, Base64, Catalog, Citation, Constraint, ConstraintTest, Control,
    Document, Flat, Group, Guideline, Import, IncludeAll, Link, Location, Matching, Merge,
    Metadata, Modify, Parameter, ParameterSelection, Part, Party, Profile, Property, Remove,
    Resource, ResourceLink, ResponsibleParty, Role, SelectControl, SetParameter, has_keep_marker,
};
pub use node::{NodeIdAllocator, NodeRef, NodeTable, remove_control, remove_parameter};
pub use repository::DocumentRepository;
