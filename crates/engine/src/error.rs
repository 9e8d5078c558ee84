//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the validation engine.
///
/// Input errors stop `validate()` before any analysis runs; semantic
/// problems are never errors, they are collected as report issues.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Input errors ------

    /// The document is not valid JSON or does not have the workflow shape.
    #[error("malformed workflow graph: {0}")]
    MalformedGraph(String),

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// Two or more nodes share the same display name.
    #[error("duplicate node name: '{0}'")]
    DuplicateNodeName(String),

    /// A connection references a node name that doesn't exist in the workflow.
    #[error("connection references unknown node '{node}' ({side} side)")]
    DanglingConnectionReference {
        node: String,
        side: &'static str,
    },

    // ------ Repair errors ------

    /// The report handed to `repair()` does not describe the graph.
    #[error("report cannot be applied to this graph: {0}")]
    UnrepairableReport(String),
}

impl EngineError {
    /// Whether this error rejects the input graph itself.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Self::UnrepairableReport(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedGraph(e.to_string())
    }
}
