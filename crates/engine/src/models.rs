//! Core domain models for the validation engine.
//!
//! These types are the in-memory form of a workflow document. They
//! serialize to and from the wire shape used by graph generators and the
//! template store: a `nodes` array plus a `connections` object keyed by
//! source node name, then by channel, holding one array of target
//! descriptors per output slot.
//!
//! Fields the engine does not interpret (credentials, settings, pin data, …)
//! are carried in `extra` so a document survives validation and repair intact.

use std::collections::BTreeMap;

use nodes::{Channel, SchemaVersion};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::EngineError;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A single processing step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identifier, unique within the workflow.
    pub id: String,
    /// Display name, unique within the workflow (referenced by connections).
    #[serde(rename = "name", alias = "display_name")]
    pub name: String,
    /// Node kind, looked up in the node catalog.
    #[serde(rename = "type", alias = "type_tag")]
    pub type_tag: String,
    /// Parameter-shape revision the node was authored against.
    #[serde(rename = "typeVersion", alias = "schema_version", default)]
    pub schema_version: SchemaVersion,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Presentational only; preserved verbatim.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub position: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    /// Convenience constructor.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        type_tag: impl Into<String>,
        schema_version: SchemaVersion,
        parameters: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            type_tag: type_tag.into(),
            schema_version,
            parameters,
            position: Value::Null,
            extra: Map::new(),
        }
    }

    /// `[x, y]` when the position is a numeric pair.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match self.position.as_array()?.as_slice() {
            [x, y] => Some((x.as_f64()?, y.as_f64()?)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Directed edge `(source, channel, slot) → (target, channel, slot)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub source: String,
    pub source_channel: Channel,
    pub source_slot: usize,
    pub target: String,
    pub target_channel: Channel,
    pub target_slot: usize,
}

impl Connection {
    /// Primary-channel connection from `slot` of `source` to input 0 of `target`.
    pub fn primary(source: &str, slot: usize, target: &str) -> Self {
        Self::on(Channel::primary(), source, slot, target)
    }

    /// Connection on `channel` from `slot` of `source` to input 0 of `target`.
    pub fn on(channel: Channel, source: &str, slot: usize, target: &str) -> Self {
        Self {
            source: source.to_owned(),
            source_channel: channel.clone(),
            source_slot: slot,
            target: target.to_owned(),
            target_channel: channel,
            target_slot: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireWorkflow", into = "WireWorkflow")]
pub struct Workflow {
    pub name: Option<String>,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    /// Top-level document fields the engine does not interpret.
    pub extra: Map<String, Value>,
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(nodes: Vec<Node>, connections: Vec<Connection>) -> Self {
        Self { name: None, nodes, connections, extra: Map::new() }
    }

    /// Parse a wire document.
    ///
    /// # Errors
    /// [`EngineError::MalformedGraph`] on invalid JSON or a document that
    /// does not have the workflow shape.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct WireTarget {
    node: String,
    /// Falls back to the channel the descriptor is listed under.
    #[serde(rename = "type", alias = "channel", default, skip_serializing_if = "Option::is_none")]
    channel: Option<Channel>,
    #[serde(default)]
    index: usize,
}

/// One entry per output slot; `null` and `[]` both mean "unused".
type WireSlots = Vec<Option<Vec<WireTarget>>>;

#[derive(Serialize, Deserialize)]
struct WireWorkflow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    nodes: Vec<Node>,
    #[serde(default)]
    connections: BTreeMap<String, BTreeMap<Channel, WireSlots>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<WireWorkflow> for Workflow {
    fn from(wire: WireWorkflow) -> Self {
        let mut connections = Vec::new();
        for (source, channels) in wire.connections {
            for (channel, slots) in channels {
                for (slot, targets) in slots.into_iter().enumerate() {
                    for target in targets.into_iter().flatten() {
                        connections.push(Connection {
                            source: source.clone(),
                            source_channel: channel.clone(),
                            source_slot: slot,
                            target: target.node,
                            target_channel: target.channel.unwrap_or_else(|| channel.clone()),
                            target_slot: target.index,
                        });
                    }
                }
            }
        }
        Self {
            name: wire.name,
            nodes: wire.nodes,
            connections,
            extra: wire.extra,
        }
    }
}

impl From<Workflow> for WireWorkflow {
    fn from(workflow: Workflow) -> Self {
        let mut connections: BTreeMap<String, BTreeMap<Channel, WireSlots>> = BTreeMap::new();
        for conn in workflow.connections {
            let slots = connections
                .entry(conn.source)
                .or_default()
                .entry(conn.source_channel)
                .or_default();
            if slots.len() <= conn.source_slot {
                slots.resize_with(conn.source_slot + 1, || Some(Vec::new()));
            }
            slots[conn.source_slot].get_or_insert_with(Vec::new).push(WireTarget {
                node: conn.target,
                channel: Some(conn.target_channel),
                index: conn.target_slot,
            });
        }
        Self {
            name: workflow.name,
            nodes: workflow.nodes,
            connections,
            extra: workflow.extra,
        }
    }
}
