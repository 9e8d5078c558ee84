//! Node classification.
//!
//! Assigns every node exactly one [`Role`] by looking its `type_tag` up in
//! the node catalog. Unknown type tags degrade to `pass-through` with an
//! `UnknownNodeType` warning: node catalogs are extensible, so an unfamiliar
//! kind is not a reason to refuse the graph.

use nodes::{NodeCatalog, NodeKind, Role};
use tracing::warn;

use crate::graph::WorkflowGraph;
use crate::models::Node;
use crate::report::{IssueKind, ReportBuilder};

/// A node together with its catalog entry and role.
#[derive(Debug, Clone, Copy)]
pub struct ClassifiedNode<'a> {
    pub node: &'a Node,
    pub role: Role,
    /// `None` when the type tag is not in the catalog.
    pub kind: Option<&'a NodeKind>,
}

impl ClassifiedNode<'_> {
    /// Declared branch count of a branching node.
    pub fn declared_branches(&self) -> Option<usize> {
        self.kind?.declared_branches(&self.node.parameters)
    }

    pub fn is_branching(&self) -> bool {
        self.role == Role::Orchestrator && self.kind.is_some_and(|k| k.branching.is_some())
    }
}

/// Classification of every node, indexed like `Workflow::nodes`.
#[derive(Debug)]
pub struct Classification<'a> {
    entries: Vec<ClassifiedNode<'a>>,
}

impl<'a> Classification<'a> {
    pub fn get(&self, index: usize) -> &ClassifiedNode<'a> {
        &self.entries[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassifiedNode<'a>> {
        self.entries.iter()
    }

    pub fn role(&self, index: usize) -> Role {
        self.entries[index].role
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.entries.iter().any(|e| e.role == role)
    }
}

/// Classify every node of `graph`.
pub(crate) fn classify<'a>(
    graph: &WorkflowGraph<'a>,
    catalog: &'a NodeCatalog,
    report: &mut ReportBuilder,
) -> Classification<'a> {
    let entries = graph
        .nodes()
        .iter()
        .map(|node| match catalog.get(&node.type_tag) {
            Some(kind) => ClassifiedNode { node, role: kind.role, kind: Some(kind) },
            None => {
                warn!("node '{}' has unknown type '{}'", node.name, node.type_tag);
                report.push(
                    Some(&node.name),
                    IssueKind::UnknownNodeType { type_tag: node.type_tag.clone() },
                    format!(
                        "type '{}' is not in the node catalog; treated as {}",
                        node.type_tag,
                        Role::PassThrough
                    ),
                );
                ClassifiedNode { node, role: Role::PassThrough, kind: None }
            }
        })
        .collect();

    Classification { entries }
}
