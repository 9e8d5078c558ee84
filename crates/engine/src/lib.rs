//! `engine` crate — workflow graph models, validation, and repair.

mod classify;
mod conformance;
mod connectivity;
pub mod error;
pub mod graph;
pub mod models;
pub mod repair;
pub mod report;
pub mod validator;

pub use error::EngineError;
pub use graph::WorkflowGraph;
pub use models::{Connection, Node, Workflow};
pub use repair::RepairedGraph;
pub use report::{Issue, IssueKind, Severity, ValidationReport};
pub use validator::{RepairOutcome, ValidatorConfig, WorkflowValidator};

/// Validate `workflow` against the built-in node catalog.
///
/// # Errors
/// Input errors only; see [`WorkflowValidator::validate`].
pub fn validate(workflow: &Workflow) -> Result<ValidationReport, EngineError> {
    WorkflowValidator::default().validate(workflow)
}

/// Repair `workflow` from `report` using the built-in node catalog.
///
/// # Errors
/// See [`WorkflowValidator::repair`].
pub fn repair(workflow: &Workflow, report: &ValidationReport) -> Result<RepairedGraph, EngineError> {
    WorkflowValidator::default().repair(workflow, report)
}

/// Validate and repair in one call using the built-in node catalog.
///
/// # Errors
/// Input errors only.
pub fn validate_and_repair(workflow: &Workflow) -> Result<RepairOutcome, EngineError> {
    WorkflowValidator::default().validate_and_repair(workflow)
}
