//! Catalog-level error type.

use thiserror::Error;

/// Errors produced while building or loading a node catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Two catalog entries share a type tag.
    #[error("duplicate node kind: '{0}'")]
    DuplicateKind(String),

    /// A capability provider has no channel, or uses the primary channel.
    #[error("capability provider '{0}' must designate a non-primary channel")]
    ProviderChannel(String),

    /// A capability requirement names the primary channel.
    #[error("node kind '{0}' requires a capability on the primary channel")]
    PrimaryRequirement(String),

    #[error("node kind '{0}' declares no parameter schema")]
    MissingSchema(String),

    #[error("node kind '{type_tag}' declares schema version {version} twice")]
    DuplicateSchemaVersion { type_tag: String, version: String },

    #[error("node kind '{type_tag}' has an invalid branch descriptor: {reason}")]
    InvalidBranching { type_tag: String, reason: &'static str },

    /// A repair kind is missing from the catalog or has the wrong role.
    #[error("repair kind '{type_tag}' must be a catalog entry with role {role}")]
    RepairKind { type_tag: String, role: &'static str },

    #[error("invalid schema version: '{0}'")]
    InvalidVersion(String),

    #[error("invalid catalog document: {0}")]
    Json(#[from] serde_json::Error),
}
