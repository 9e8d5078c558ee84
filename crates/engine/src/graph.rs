//! Indexed, read-only view over a [`Workflow`].
//!
//! Construction enforces the input invariants, checked before any analysis:
//! 1. Node IDs must be unique within the workflow.
//! 2. Node display names must be unique (connections reference names).
//! 3. Every connection must reference existing nodes on both ends.

use std::collections::{BTreeMap, HashMap, HashSet};

use nodes::Channel;

use crate::models::{Connection, Node, Workflow};
use crate::EngineError;

/// Traversal queries over a validated workflow.
#[derive(Debug)]
pub struct WorkflowGraph<'a> {
    workflow: &'a Workflow,
    by_name: HashMap<&'a str, usize>,
    /// Node index → indices into `workflow.connections`.
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl<'a> WorkflowGraph<'a> {
    /// Index the workflow.
    ///
    /// # Errors
    /// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
    /// - [`EngineError::DuplicateNodeName`] if two nodes share a name.
    /// - [`EngineError::DanglingConnectionReference`] if a connection
    ///   references a missing node.
    pub fn new(workflow: &'a Workflow) -> Result<Self, EngineError> {
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut by_name: HashMap<&str, usize> = HashMap::with_capacity(workflow.nodes.len());
        for (i, node) in workflow.nodes.iter().enumerate() {
            if !seen_ids.insert(node.id.as_str()) {
                return Err(EngineError::DuplicateNodeId(node.id.clone()));
            }
            if by_name.insert(node.name.as_str(), i).is_some() {
                return Err(EngineError::DuplicateNodeName(node.name.clone()));
            }
        }

        let mut outgoing = vec![Vec::new(); workflow.nodes.len()];
        let mut incoming = vec![Vec::new(); workflow.nodes.len()];
        for (ci, conn) in workflow.connections.iter().enumerate() {
            let Some(&from) = by_name.get(conn.source.as_str()) else {
                return Err(EngineError::DanglingConnectionReference {
                    node: conn.source.clone(),
                    side: "source",
                });
            };
            let Some(&to) = by_name.get(conn.target.as_str()) else {
                return Err(EngineError::DanglingConnectionReference {
                    node: conn.target.clone(),
                    side: "target",
                });
            };
            outgoing[from].push(ci);
            incoming[to].push(ci);
        }

        Ok(Self { workflow, by_name, outgoing, incoming })
    }

    pub fn workflow(&self) -> &'a Workflow {
        self.workflow
    }

    pub fn nodes(&self) -> &'a [Node] {
        &self.workflow.nodes
    }

    pub fn connections(&self) -> &'a [Connection] {
        &self.workflow.connections
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn node(&self, name: &str) -> Option<&'a Node> {
        self.index_of(name).map(|i| &self.workflow.nodes[i])
    }

    /// Every connection leaving `name`, on any channel.
    pub fn outgoing_all(&self, name: &str) -> impl Iterator<Item = &'a Connection> + '_ {
        self.edges(&self.outgoing, name)
    }

    /// Every connection entering `name`, on any channel.
    pub fn incoming_all(&self, name: &str) -> impl Iterator<Item = &'a Connection> + '_ {
        self.edges(&self.incoming, name)
    }

    /// Connections leaving `name` on `channel`, grouped by output slot.
    pub fn outgoing(&self, name: &str, channel: &Channel) -> BTreeMap<usize, Vec<&'a Connection>> {
        let mut slots: BTreeMap<usize, Vec<&'a Connection>> = BTreeMap::new();
        for conn in self.outgoing_all(name).filter(|c| &c.source_channel == channel) {
            slots.entry(conn.source_slot).or_default().push(conn);
        }
        slots
    }

    /// Connections entering `name` on `channel`.
    pub fn incoming(&self, name: &str, channel: &Channel) -> Vec<&'a Connection> {
        self.incoming_all(name)
            .filter(|c| &c.target_channel == channel)
            .collect()
    }

    pub fn nodes_by_type(&self, type_tag: &str) -> Vec<&'a Node> {
        self.workflow
            .nodes
            .iter()
            .filter(|n| n.type_tag == type_tag)
            .collect()
    }

    /// Distinct primary-channel successors of the node at `index`, as node
    /// indices in connection order.
    pub(crate) fn primary_successors(&self, index: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        self.outgoing[index]
            .iter()
            .map(|&ci| &self.workflow.connections[ci])
            .filter(|c| c.source_channel.is_primary())
            .filter_map(|c| self.index_of(&c.target))
            .filter(|&t| seen.insert(t))
            .collect()
    }

    fn edges<'s>(
        &'s self,
        table: &'s [Vec<usize>],
        name: &str,
    ) -> impl Iterator<Item = &'a Connection> + 's {
        let ids: &'s [usize] = match self.index_of(name) {
            Some(i) => &table[i],
            None => &[],
        };
        ids.iter().map(move |&ci| &self.workflow.connections[ci])
    }
}
