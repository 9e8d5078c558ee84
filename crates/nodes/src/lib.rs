//! `nodes` crate — the node-kind catalog shared by the validation engine.
//!
//! The catalog is a read-only lookup table keyed by node `type_tag`: roles,
//! capability channels, branch descriptors, and versioned parameter schemas.
//! It is built once and shared across concurrent validations without locking.

pub mod builtin;
pub mod catalog;
pub mod channel;
pub mod error;
pub mod schema;

pub use catalog::{
    BranchSpec, CapabilityRequirement, CatalogDocument, NodeCatalog, NodeKind, RepairKinds, Role,
};
pub use channel::Channel;
pub use error::CatalogError;
pub use schema::{FieldRename, FieldSpec, ParameterSchema, SchemaVersion, ShapeViolation, ValueKind};
