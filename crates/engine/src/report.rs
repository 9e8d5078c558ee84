//! Validation report.
//!
//! A report is built fresh by one validation run and is immutable once
//! returned. Every semantic problem found in that run is an [`Issue`]; none
//! of them stops the run.

use std::fmt;

use nodes::{Channel, SchemaVersion};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// How serious an issue is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Suspicious but usable as-is.
    Warning,
    /// Must be fixed before the graph is considered executable.
    Error,
    /// No meaningful execution is possible.
    Blocking,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Blocking => write!(f, "blocking"),
        }
    }
}

// ---------------------------------------------------------------------------
// IssueKind
// ---------------------------------------------------------------------------

/// What is wrong, with the data repair needs to fix it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IssueKind {
    /// No node has the source role.
    MissingSource,
    /// A node expected to forward data has no primary output.
    DeadEnd,
    /// A branching node fans out into several terminal nodes that never
    /// reconverge.
    UnmergedBranches { terminals: Vec<String> },
    /// A declared branch has no connection.
    UnconnectedBranch { branch: usize },
    /// Parameters do not match the declared schema version's shape.
    SchemaVersionMismatch { expected: SchemaVersion, shape: String },
    /// A capability provider is attached through the wrong channel.
    WrongChannel { target: String, found: Channel, expected: Channel },
    /// An orchestrator needs a capability nothing provides.
    MissingCapability { channel: Channel },
    UnknownNodeType { type_tag: String },
    /// Not reachable from any source over the primary channel.
    Unreachable,
    /// A branching node uses a slot past its declared branches.
    UndeclaredBranchSlot { slot: usize },
    /// The declared schema version is not in the catalog for this kind.
    UnknownSchemaVersion { version: SchemaVersion },
    /// Source and target side of a connection name different channels.
    ChannelMismatch { target: String, source_channel: Channel, target_channel: Channel },
    /// A capability provider receives ordinary data.
    ProviderAsDataTarget { source: String },
    /// Nodes that lie on or behind a cycle.
    Cycle { nodes: Vec<String> },
}

impl IssueKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingSource => Severity::Blocking,
            Self::DeadEnd
            | Self::UnconnectedBranch { .. }
            | Self::SchemaVersionMismatch { .. }
            | Self::WrongChannel { .. }
            | Self::MissingCapability { .. }
            | Self::ChannelMismatch { .. } => Severity::Error,
            Self::UnmergedBranches { .. }
            | Self::UnknownNodeType { .. }
            | Self::Unreachable
            | Self::UndeclaredBranchSlot { .. }
            | Self::UnknownSchemaVersion { .. }
            | Self::ProviderAsDataTarget { .. }
            | Self::Cycle { .. } => Severity::Warning,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MissingSource => "MissingSource",
            Self::DeadEnd => "DeadEnd",
            Self::UnmergedBranches { .. } => "UnmergedBranches",
            Self::UnconnectedBranch { .. } => "UnconnectedBranch",
            Self::SchemaVersionMismatch { .. } => "SchemaVersionMismatch",
            Self::WrongChannel { .. } => "WrongChannel",
            Self::MissingCapability { .. } => "MissingCapability",
            Self::UnknownNodeType { .. } => "UnknownNodeType",
            Self::Unreachable => "Unreachable",
            Self::UndeclaredBranchSlot { .. } => "UndeclaredBranchSlot",
            Self::UnknownSchemaVersion { .. } => "UnknownSchemaVersion",
            Self::ChannelMismatch { .. } => "ChannelMismatch",
            Self::ProviderAsDataTarget { .. } => "ProviderAsDataTarget",
            Self::Cycle { .. } => "Cycle",
        }
    }

    /// Whether an issue of this kind is about one specific node.
    pub fn needs_node(&self) -> bool {
        !matches!(self, Self::MissingSource | Self::Cycle { .. })
    }
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// One defect found by validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Name of the node the issue is about; `None` for graph-level issues.
    pub node_ref: Option<String>,
    pub kind: IssueKind,
    pub severity: Severity,
    pub detail: String,
}

impl Issue {
    /// Issue with the kind's canonical severity.
    pub fn new(node_ref: Option<&str>, kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            node_ref: node_ref.map(str::to_owned),
            severity: kind.severity(),
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.kind.name())?;
        if let Some(node) = &self.node_ref {
            write!(f, " at '{node}'")?;
        }
        write!(f, ": {}", self.detail)
    }
}

// ---------------------------------------------------------------------------
// ValidationReport
// ---------------------------------------------------------------------------

/// Every issue found by one validation run, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    issues: Vec<Issue>,
}

impl ValidationReport {
    /// Wrap externally-constructed issues. `repair()` checks such a report
    /// against the graph before applying it.
    pub fn from_issues(issues: Vec<Issue>) -> Self {
        Self { issues }
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    /// No error or blocking issue: the graph may be executed as-is.
    pub fn is_executable(&self) -> bool {
        self.max_severity().is_none_or(|s| s < Severity::Error)
    }

    /// Issues of the given kind name, e.g. `"DeadEnd"`.
    pub fn of_kind<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'s Issue> + 's {
        self.issues.iter().filter(move |i| i.kind.name() == name)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return write!(f, "no issues");
        }
        writeln!(
            f,
            "{} blocking, {} error(s), {} warning(s)",
            self.count(Severity::Blocking),
            self.count(Severity::Error),
            self.count(Severity::Warning),
        )?;
        for issue in &self.issues {
            writeln!(f, "  {issue}")?;
        }
        Ok(())
    }
}

/// Accumulates issues during a validation run.
#[derive(Debug, Default)]
pub(crate) struct ReportBuilder {
    issues: Vec<Issue>,
}

impl ReportBuilder {
    pub(crate) fn push(&mut self, node_ref: Option<&str>, kind: IssueKind, detail: String) {
        tracing::debug!(kind = kind.name(), node = node_ref.unwrap_or("-"), "{detail}");
        self.issues.push(Issue::new(node_ref, kind, detail));
    }

    pub(crate) fn finish(self) -> ValidationReport {
        ValidationReport { issues: self.issues }
    }
}
