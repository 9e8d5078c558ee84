//! Workflow validation engine.
//!
//! `WorkflowValidator` is the central entry point:
//! 1. Indexes the graph; duplicate or dangling references stop here as
//!    input errors.
//! 2. Classifies every node against the node catalog.
//! 3. Checks parameter shapes and channel usage.
//! 4. Runs the connectivity analysis over the primary channel.
//! 5. Returns one immutable [`ValidationReport`], which `repair` consumes.
//!
//! The validator holds no per-run state, so one instance can be shared
//! across threads.

use std::sync::Arc;

use nodes::NodeCatalog;
use tracing::{debug, info, instrument};

use crate::classify::classify;
use crate::graph::WorkflowGraph;
use crate::models::Workflow;
use crate::repair::{self, RepairedGraph};
use crate::report::{ReportBuilder, Severity, ValidationReport};
use crate::{conformance, connectivity, EngineError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Optional checks.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Report nodes left over by a topological sort of the primary channel.
    pub detect_cycles: bool,
    /// Report nodes no source reaches over the primary channel.
    pub report_unreachable: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            detect_cycles: false,
            report_unreachable: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Output of validate-and-repair
// ---------------------------------------------------------------------------

/// Result of [`WorkflowValidator::validate_and_repair`].
#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    /// The report the repair was driven by.
    pub report_before: ValidationReport,
    pub repaired: RepairedGraph,
}

// ---------------------------------------------------------------------------
// WorkflowValidator
// ---------------------------------------------------------------------------

/// Validates workflows against a node catalog and repairs them.
#[derive(Debug, Clone)]
pub struct WorkflowValidator {
    catalog: Arc<NodeCatalog>,
    config: ValidatorConfig,
}

impl WorkflowValidator {
    pub fn new(catalog: Arc<NodeCatalog>, config: ValidatorConfig) -> Self {
        Self { catalog, config }
    }

    /// Validator over the built-in catalog with the given configuration.
    pub fn with_config(config: ValidatorConfig) -> Self {
        Self::new(nodes::builtin::catalog(), config)
    }

    pub fn catalog(&self) -> &NodeCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate `workflow` and return every issue found.
    ///
    /// Never fails on semantic defects; those are issues in the report.
    ///
    /// # Errors
    /// Input errors only: duplicate node ids or names, and connections
    /// naming nodes that do not exist.
    #[instrument(
        skip_all,
        fields(nodes = workflow.nodes.len(), connections = workflow.connections.len())
    )]
    pub fn validate(&self, workflow: &Workflow) -> Result<ValidationReport, EngineError> {
        let graph = WorkflowGraph::new(workflow)?;
        let mut builder = ReportBuilder::default();

        let classes = classify(&graph, &self.catalog, &mut builder);
        conformance::check_parameters(&classes, &mut builder);
        conformance::check_channels(&graph, &classes, &mut builder);
        connectivity::analyze(&graph, &classes, &self.config, &mut builder);

        let report = builder.finish();
        info!(
            issues = report.issues().len(),
            blocking = report.count(Severity::Blocking),
            errors = report.count(Severity::Error),
            warnings = report.count(Severity::Warning),
            "validation finished"
        );
        Ok(report)
    }

    /// Apply `report` to a copy of `workflow`. The input is never modified.
    ///
    /// # Errors
    /// - Input errors if `workflow` is not a well-formed graph.
    /// - [`EngineError::UnrepairableReport`] if the report does not describe
    ///   `workflow` (wrong node names, issues already fixed, bad severities).
    #[instrument(skip_all, fields(issues = report.issues().len()))]
    pub fn repair(
        &self,
        workflow: &Workflow,
        report: &ValidationReport,
    ) -> Result<RepairedGraph, EngineError> {
        if report.is_empty() {
            debug!("nothing to repair");
            WorkflowGraph::new(workflow)?;
            return Ok(RepairedGraph { workflow: workflow.clone(), change_log: Vec::new() });
        }
        let repaired = repair::repair(workflow, report, &self.catalog)?;
        info!(changes = repaired.change_log.len(), "repair finished");
        Ok(repaired)
    }

    /// Validate, then repair using the report just produced.
    ///
    /// # Errors
    /// Input errors only, as for [`WorkflowValidator::validate`].
    pub fn validate_and_repair(&self, workflow: &Workflow) -> Result<RepairOutcome, EngineError> {
        let report_before = self.validate(workflow)?;
        let repaired = self.repair(workflow, &report_before)?;
        Ok(RepairOutcome { report_before, repaired })
    }
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::with_config(ValidatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WorkflowValidator>();
        assert_send_sync::<ValidationReport>();
    }

    #[test]
    fn default_config_reports_unreachable_but_not_cycles() {
        let config = ValidatorConfig::default();
        assert!(config.report_unreachable);
        assert!(!config.detect_cycles);
    }

    #[test]
    fn default_validator_uses_builtin_catalog() {
        let validator = WorkflowValidator::default();
        assert!(validator.catalog().get("manual-start").is_some());
    }
}
