//! Repair synthesis.
//!
//! Turns a validation report into structural edits on a *copy* of the
//! workflow. Rules run in a fixed order and each fires only for the issues
//! that trigger it:
//! 1. `UnconnectedBranch`     → connect the branch slot to a new placeholder sink.
//! 2. `WrongChannel`          → relabel the provider connection to its designated
//!    channel (`ChannelMismatch` → relabel the target side to the source channel).
//! 3. `SchemaVersionMismatch` → migrate parameters to the declared version's shape.
//! 4. `DeadEnd`               → join dead ends into one convergence node when
//!    branches are unmerged, otherwise give each its own completion node.
//! 5. `MissingCapability`     → attach a placeholder provider on the right channel.
//! 6. `MissingSource`         → insert a source and feed every entry node.
//!
//! Repair never deletes a node and never changes a node's type tag: it only
//! adds nodes and connections and rewrites parameters or channel labels.

use nodes::{Channel, NodeCatalog, NodeKind, ParameterSchema, Role};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::graph::WorkflowGraph;
use crate::models::{Connection, Node, Workflow};
use crate::report::{IssueKind, ValidationReport};
use crate::EngineError;

/// A repaired copy of a workflow and what was done to it.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairedGraph {
    pub workflow: Workflow,
    /// One human-readable line per edit, in the order applied.
    pub change_log: Vec<String>,
}

/// Apply `report` to a copy of `workflow`.
///
/// # Errors
/// - Input errors if `workflow` is not a well-formed graph.
/// - [`EngineError::UnrepairableReport`] if the report does not describe
///   this graph.
pub(crate) fn repair(
    workflow: &Workflow,
    report: &ValidationReport,
    catalog: &NodeCatalog,
) -> Result<RepairedGraph, EngineError> {
    let graph = WorkflowGraph::new(workflow)?;
    check_report(&graph, report, catalog)?;

    let mut session = Session::new(workflow, catalog);
    session.connect_unconnected_branches(report)?;
    session.fix_channels(report);
    session.migrate_parameters(report)?;
    session.close_dead_ends(report)?;
    session.attach_missing_capabilities(report)?;
    session.insert_missing_source(report)?;

    Ok(RepairedGraph { workflow: session.workflow, change_log: session.log })
}

// ---------------------------------------------------------------------------
// Report consistency
// ---------------------------------------------------------------------------

fn check_report(
    graph: &WorkflowGraph<'_>,
    report: &ValidationReport,
    catalog: &NodeCatalog,
) -> Result<(), EngineError> {
    let role_of = |node: &Node| catalog.get(&node.type_tag).map_or(Role::PassThrough, |k| k.role);

    for issue in report.issues() {
        let kind_name = issue.kind.name();
        let fail = |why: String| EngineError::UnrepairableReport(format!("{kind_name}: {why}"));

        if issue.severity != issue.kind.severity() {
            return Err(fail(format!(
                "severity {} does not match the issue kind ({})",
                issue.severity,
                issue.kind.severity()
            )));
        }

        let node = match &issue.node_ref {
            Some(name) => Some(
                graph
                    .node(name)
                    .ok_or_else(|| fail(format!("node '{name}' is not in the graph")))?,
            ),
            None if issue.kind.needs_node() => return Err(fail("no node named".to_owned())),
            None => None,
        };

        match (&issue.kind, node) {
            (IssueKind::MissingSource, _) => {
                if graph.nodes().iter().any(|n| role_of(n) == Role::Source) {
                    return Err(fail("the graph has a source node".to_owned()));
                }
            }
            (IssueKind::DeadEnd, Some(node)) => {
                if !role_of(node).forwards_data() {
                    return Err(fail(format!("'{}' is not expected to forward data", node.name)));
                }
                if !graph.outgoing(&node.name, &Channel::primary()).is_empty() {
                    return Err(fail(format!("'{}' has primary outputs", node.name)));
                }
            }
            (IssueKind::UnconnectedBranch { branch }, Some(node)) => {
                let declared = catalog
                    .get(&node.type_tag)
                    .and_then(|k| k.declared_branches(&node.parameters));
                if declared.is_none_or(|n| *branch >= n) {
                    return Err(fail(format!("'{}' declares no branch {branch}", node.name)));
                }
                if graph.outgoing(&node.name, &Channel::primary()).contains_key(branch) {
                    return Err(fail(format!("branch {branch} of '{}' is connected", node.name)));
                }
            }
            (IssueKind::SchemaVersionMismatch { expected, .. }, Some(node)) => {
                let kind = catalog.get(&node.type_tag);
                let Some((kind, target)) = kind.and_then(|k| k.schema(*expected).map(|s| (k, s)))
                else {
                    return Err(fail(format!("'{}' has no schema version {expected}", node.name)));
                };
                if *expected != node.schema_version {
                    return Err(fail(format!("'{}' does not declare version {expected}", node.name)));
                }
                if kind.check_parameters(target, &node.parameters).is_empty() {
                    return Err(fail(format!("parameters of '{}' already match v{expected}", node.name)));
                }
            }
            (IssueKind::WrongChannel { target, found, expected }, Some(node)) => {
                let designated = catalog.get(&node.type_tag).and_then(|k| k.channel.as_ref());
                let exists = graph.outgoing_all(&node.name).any(|c| {
                    &c.target == target && (&c.source_channel == found || &c.target_channel == found)
                });
                if designated != Some(expected) || !exists {
                    return Err(fail(format!(
                        "no '{found}' connection from provider '{}' to '{target}'",
                        node.name
                    )));
                }
            }
            (IssueKind::ChannelMismatch { target, source_channel, target_channel }, Some(node)) => {
                let exists = graph.outgoing_all(&node.name).any(|c| {
                    &c.target == target
                        && &c.source_channel == source_channel
                        && &c.target_channel == target_channel
                });
                if !exists {
                    return Err(fail(format!("no such connection from '{}' to '{target}'", node.name)));
                }
            }
            (IssueKind::MissingCapability { channel }, Some(node)) => {
                let required = catalog
                    .get(&node.type_tag)
                    .is_some_and(|k| k.required_channels(&node.parameters).any(|c| c == channel));
                if !required {
                    return Err(fail(format!("'{}' does not require '{channel}'", node.name)));
                }
                if graph.incoming_all(&node.name).any(|c| attaches(c, channel)) {
                    return Err(fail(format!("'{}' already has '{channel}' attached", node.name)));
                }
            }
            (IssueKind::UnmergedBranches { terminals }, Some(node)) => {
                let branching = catalog
                    .get(&node.type_tag)
                    .is_some_and(|k| k.branching.is_some());
                if !branching || terminals.len() < 2 {
                    return Err(fail(format!("'{}' has no unmerged branches", node.name)));
                }
                for terminal in terminals {
                    if graph.node(terminal).is_none() {
                        return Err(fail(format!("terminal '{terminal}' is not in the graph")));
                    }
                    if !graph.outgoing(terminal, &Channel::primary()).is_empty() {
                        return Err(fail(format!("terminal '{terminal}' has primary outputs")));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Repair session
// ---------------------------------------------------------------------------

/// Canvas offsets between an anchor node and the nodes inserted next to it.
const STEP_X: f64 = 220.0;
const STEP_Y: f64 = 120.0;

struct Session<'c> {
    workflow: Workflow,
    catalog: &'c NodeCatalog,
    /// Seed for the ids of inserted nodes, derived from the original ids.
    namespace: Uuid,
    log: Vec<String>,
}

impl<'c> Session<'c> {
    fn new(workflow: &Workflow, catalog: &'c NodeCatalog) -> Self {
        let ids: Vec<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
        let namespace = Uuid::new_v5(&Uuid::NAMESPACE_OID, ids.join("\n").as_bytes());
        Self { workflow: workflow.clone(), catalog, namespace, log: Vec::new() }
    }

    fn record(&mut self, entry: String) {
        info!("repair: {entry}");
        self.log.push(entry);
    }

    fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.workflow.nodes.iter_mut().find(|n| n.name == name)
    }

    fn has_primary_output(&self, name: &str) -> bool {
        self.workflow
            .connections
            .iter()
            .any(|c| c.source == name && c.source_channel.is_primary())
    }

    fn slot_connected(&self, name: &str, slot: usize) -> bool {
        self.workflow
            .connections
            .iter()
            .any(|c| c.source == name && c.source_channel.is_primary() && c.source_slot == slot)
    }

    fn role_of(&self, node: &Node) -> Role {
        self.catalog
            .get(&node.type_tag)
            .map_or(Role::PassThrough, |k| k.role)
    }

    fn kind(&self, type_tag: &str) -> Result<&'c NodeKind, EngineError> {
        self.catalog.get(type_tag).ok_or_else(|| {
            EngineError::UnrepairableReport(format!("catalog has no '{type_tag}' kind to insert"))
        })
    }

    fn unique_name(&self, base: &str) -> String {
        let taken = |name: &str| self.workflow.nodes.iter().any(|n| n.name == name);
        if !taken(base) {
            return base.to_owned();
        }
        (1..)
            .map(|i| format!("{base} {i}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| base.to_owned())
    }

    /// Insert a node of `kind` near `anchor`, with every required parameter
    /// set to a configure placeholder. Returns the new node's name.
    fn insert_node(
        &mut self,
        kind: &NodeKind,
        base_name: &str,
        anchor: Option<&str>,
        offset: (f64, f64),
    ) -> String {
        let name = self.unique_name(base_name);
        let (version, parameters) = kind
            .latest_schema()
            .map(|s: &ParameterSchema| (s.version, s.placeholder_parameters()))
            .unwrap_or_default();

        let mut node = Node::new(
            Uuid::new_v5(&self.namespace, name.as_bytes()).to_string(),
            name.clone(),
            kind.type_tag.clone(),
            version,
            parameters,
        );
        if let Some((x, y)) = anchor.and_then(|a| self.workflow.node(a)).and_then(Node::coordinates) {
            node.position = serde_json::json!([x + offset.0, y + offset.1]);
        }
        self.workflow.nodes.push(node);
        name
    }

    // -----------------------------------------------------------------------
    // Rule 1: unconnected branches
    // -----------------------------------------------------------------------

    fn connect_unconnected_branches(&mut self, report: &ValidationReport) -> Result<(), EngineError> {
        for issue in report.issues() {
            let (IssueKind::UnconnectedBranch { branch }, Some(node)) = (&issue.kind, &issue.node_ref)
            else {
                continue;
            };
            if self.slot_connected(node, *branch) {
                continue;
            }
            let kind = self.kind(&self.catalog.repair_kinds().placeholder_sink)?;
            let offset = (STEP_X, STEP_Y * *branch as f64);
            let base = format!("{node} branch {branch}");
            let sink = self.insert_node(kind, &base, Some(node.as_str()), offset);
            self.workflow.connections.push(Connection::primary(node, *branch, &sink));
            self.record(format!(
                "connected branch {branch} of '{node}' to new placeholder sink '{sink}'"
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rule 2: channel labels
    // -----------------------------------------------------------------------

    fn fix_channels(&mut self, report: &ValidationReport) {
        for issue in report.issues() {
            let Some(source) = &issue.node_ref else {
                continue;
            };
            match &issue.kind {
                IssueKind::WrongChannel { target, expected, .. } => {
                    let mut moved = Vec::new();
                    for conn in self.workflow.connections.iter_mut().filter(|c| {
                        &c.source == source
                            && &c.target == target
                            && (&c.source_channel != expected || &c.target_channel != expected)
                    }) {
                        moved.push(conn.source_channel.clone());
                        conn.source_channel = expected.clone();
                        conn.target_channel = expected.clone();
                    }
                    for from in moved {
                        self.record(format!(
                            "moved connection '{source}' → '{target}' from '{from}' to '{expected}'"
                        ));
                    }
                }
                IssueKind::ChannelMismatch { target, source_channel, target_channel } => {
                    let mut relabelled = 0usize;
                    for conn in self.workflow.connections.iter_mut().filter(|c| {
                        &c.source == source
                            && &c.target == target
                            && &c.source_channel == source_channel
                            && &c.target_channel == target_channel
                    }) {
                        conn.target_channel = source_channel.clone();
                        relabelled += 1;
                    }
                    if relabelled > 0 {
                        self.record(format!(
                            "relabelled connection '{source}' → '{target}' to arrive on '{source_channel}' instead of '{target_channel}'"
                        ));
                    }
                }
                _ => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Rule 3: parameter migration
    // -----------------------------------------------------------------------

    fn migrate_parameters(&mut self, report: &ValidationReport) -> Result<(), EngineError> {
        for issue in report.issues() {
            let (IssueKind::SchemaVersionMismatch { expected, .. }, Some(name)) = (&issue.kind, &issue.node_ref)
            else {
                continue;
            };
            let Some(node) = self.workflow.node(name) else {
                continue;
            };
            let kind = self.kind(&node.type_tag)?;
            let Some(target) = kind.schema(*expected) else {
                continue;
            };

            let (parameters, notes) = migrate(kind, target, &node.parameters);
            if let Some(node) = self.node_mut(name) {
                node.parameters = parameters;
            }
            for note in notes {
                self.record(format!("'{name}' (v{expected}): {note}"));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rule 4: dead ends
    // -----------------------------------------------------------------------

    fn close_dead_ends(&mut self, report: &ValidationReport) -> Result<(), EngineError> {
        let mut dead_ends: Vec<String> = Vec::new();
        for issue in report.issues() {
            if let (IssueKind::DeadEnd, Some(name)) = (&issue.kind, &issue.node_ref) {
                // Rule 1 may already have given a branching node its outputs.
                if !self.has_primary_output(name) && !dead_ends.contains(name) {
                    dead_ends.push(name.clone());
                }
            }
        }
        if dead_ends.is_empty() {
            return Ok(());
        }

        let kind = self.kind(&self.catalog.repair_kinds().convergence)?;
        let unmerged = report
            .issues()
            .iter()
            .any(|i| matches!(i.kind, IssueKind::UnmergedBranches { .. }));

        if unmerged {
            let anchor = dead_ends.first().map(String::as_str);
            let sink = self.insert_node(kind, "Completion", anchor, (STEP_X, 0.0));
            for name in &dead_ends {
                self.workflow.connections.push(Connection::primary(name, 0, &sink));
            }
            self.record(format!(
                "inserted convergence node '{sink}' joining {} dead end(s): {}",
                dead_ends.len(),
                dead_ends.join(", ")
            ));
        } else {
            for name in &dead_ends {
                let sink = self.insert_node(kind, "Completion", Some(name.as_str()), (STEP_X, 0.0));
                self.workflow.connections.push(Connection::primary(name, 0, &sink));
                self.record(format!("connected dead end '{name}' to new completion node '{sink}'"));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rule 5: missing capabilities
    // -----------------------------------------------------------------------

    fn attach_missing_capabilities(&mut self, report: &ValidationReport) -> Result<(), EngineError> {
        for issue in report.issues() {
            let (IssueKind::MissingCapability { channel }, Some(name)) = (&issue.kind, &issue.node_ref)
            else {
                continue;
            };
            let attached = self
                .workflow
                .connections
                .iter()
                .any(|c| &c.target == name && attaches(c, channel));
            if attached {
                continue;
            }
            let catalog = self.catalog;
            let Some(kind) = catalog.provider_for(channel) else {
                self.record(format!(
                    "no provider kind is designated for '{channel}'; '{name}' still needs one"
                ));
                continue;
            };

            let capability = channel.capability_name().unwrap_or(channel.as_str());
            let provider = self.insert_node(
                kind,
                &format!("{capability} for {name}"),
                Some(name.as_str()),
                (0.0, STEP_Y * 2.0),
            );
            self.workflow
                .connections
                .push(Connection::on(channel.clone(), &provider, 0, name));
            self.record(format!(
                "attached placeholder provider '{provider}' ({}) to '{name}' on '{channel}'; requires user configuration",
                kind.type_tag
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rule 6: missing source
    // -----------------------------------------------------------------------

    fn insert_missing_source(&mut self, report: &ValidationReport) -> Result<(), EngineError> {
        if !report.issues().iter().any(|i| i.kind == IssueKind::MissingSource) {
            return Ok(());
        }
        if self.workflow.nodes.iter().any(|n| self.role_of(n) == Role::Source) {
            return Ok(());
        }

        let candidates: Vec<String> = self
            .workflow
            .nodes
            .iter()
            .filter(|n| self.role_of(n) != Role::CapabilityProvider)
            .map(|n| n.name.clone())
            .collect();
        let mut entries: Vec<String> = candidates
            .iter()
            .filter(|name| {
                !self
                    .workflow
                    .connections
                    .iter()
                    .any(|c| &c.target == *name && c.target_channel.is_primary())
            })
            .cloned()
            .collect();
        if entries.is_empty() {
            entries.extend(candidates.first().cloned());
        }

        let kind = self.kind(&self.catalog.repair_kinds().source)?;
        let anchor = entries.first().cloned();
        let source = self.insert_node(kind, "Start", anchor.as_deref(), (-STEP_X, 0.0));
        for entry in &entries {
            self.workflow.connections.push(Connection::primary(&source, 0, entry));
        }
        if entries.is_empty() {
            self.record(format!("inserted source node '{source}'"));
        } else {
            self.record(format!(
                "inserted source node '{source}' feeding {}",
                entries.join(", ")
            ));
        }
        Ok(())
    }
}

/// Whether `conn` supplies `channel`: it must leave and arrive on it.
pub(crate) fn attaches(conn: &Connection, channel: &Channel) -> bool {
    &conn.source_channel == channel && &conn.target_channel == channel
}

/// Upgrade `parameters` to the `target` shape: apply the kind's field
/// renames, drop stale fields, fill missing or ill-typed required fields with
/// configure placeholders, and drop ill-typed optional fields.
fn migrate(
    kind: &NodeKind,
    target: &ParameterSchema,
    parameters: &Map<String, Value>,
) -> (Map<String, Value>, Vec<String>) {
    let mut params = parameters.clone();
    let mut notes = Vec::new();

    for rename in &kind.renames {
        if target.field(&rename.to).is_none() || target.field(&rename.from).is_some() {
            continue;
        }
        let Some(value) = params.remove(&rename.from) else {
            continue;
        };
        if params.get(&rename.to).is_none_or(Value::is_null) {
            params.insert(rename.to.clone(), value);
            notes.push(format!("renamed '{}' to '{}'", rename.from, rename.to));
        } else {
            notes.push(format!("dropped '{}' (superseded by '{}')", rename.from, rename.to));
        }
    }

    let stale: Vec<String> = params
        .keys()
        .filter(|k| kind.is_stale_field(target, k))
        .cloned()
        .collect();
    for field in stale {
        params.remove(&field);
        notes.push(format!("dropped stale field '{field}'"));
    }

    for field in &target.fields {
        match params.get(&field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    params.insert(field.name.clone(), nodes::schema::configure_placeholder(&field.name));
                    notes.push(format!("filled required field '{}' with a placeholder", field.name));
                }
            }
            Some(value) if !field.kind.accepts(value) => {
                let was = value.to_string();
                if field.required {
                    params.insert(field.name.clone(), nodes::schema::configure_placeholder(&field.name));
                    notes.push(format!(
                        "replaced '{}' (was {was}, expected {}) with a placeholder",
                        field.name, field.kind
                    ));
                } else {
                    params.remove(&field.name);
                    notes.push(format!(
                        "dropped optional field '{}' (was {was}, expected {})",
                        field.name, field.kind
                    ));
                }
            }
            Some(_) => {}
        }
    }

    (params, notes)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Issue;
    use nodes::SchemaVersion;
    use serde_json::json;

    fn node(name: &str, type_tag: &str, version: u32, params: Value) -> Node {
        let params = params.as_object().cloned().unwrap_or_default();
        Node::new(name, name, type_tag, SchemaVersion::major(version), params)
    }

    fn report(issues: Vec<Issue>) -> ValidationReport {
        ValidationReport::from_issues(issues)
    }

    #[test]
    fn migration_renames_and_fills_fields() {
        let catalog = nodes::builtin::catalog();
        let kind = catalog.get("http-call").unwrap();
        let target = kind.schema(SchemaVersion::major(2)).unwrap();
        let params = json!({ "endpoint": "https://x", "headers": "nope" });

        let (migrated, notes) = migrate(kind, target, params.as_object().unwrap());
        assert_eq!(
            Value::Object(migrated.clone()),
            json!({ "url": "https://x", "method": "{{ configure: method }}" })
        );
        assert!(kind.check_parameters(target, &migrated).is_empty());
        assert_eq!(notes.len(), 3);
        assert!(notes[0].contains("renamed 'endpoint' to 'url'"));
    }

    #[test]
    fn migration_prefers_existing_new_field() {
        let catalog = nodes::builtin::catalog();
        let kind = catalog.get("code").unwrap();
        let target = kind.schema(SchemaVersion::major(2)).unwrap();
        let params = json!({ "jsCode": "old()", "code": "new()", "language": "js" });

        let (migrated, notes) = migrate(kind, target, params.as_object().unwrap());
        assert_eq!(Value::Object(migrated), json!({ "code": "new()", "language": "js" }));
        assert_eq!(notes, vec!["dropped 'jsCode' (superseded by 'code')".to_owned()]);
    }

    #[test]
    fn report_with_wrong_severity_is_rejected() {
        let wf = Workflow::new(vec![node("Start", "manual-start", 1, json!({}))], vec![]);
        let mut issue = Issue::new(Some("Start"), IssueKind::UnknownNodeType { type_tag: "x".into() }, "");
        issue.severity = crate::report::Severity::Blocking;
        let err = repair(&wf, &report(vec![issue]), &nodes::builtin::catalog()).unwrap_err();
        assert!(matches!(err, EngineError::UnrepairableReport(_)));
    }

    #[test]
    fn report_naming_missing_node_is_rejected() {
        let wf = Workflow::new(vec![node("Start", "manual-start", 1, json!({}))], vec![]);
        let issue = Issue::new(Some("Ghost"), IssueKind::DeadEnd, "");
        assert!(matches!(
            repair(&wf, &report(vec![issue]), &nodes::builtin::catalog()),
            Err(EngineError::UnrepairableReport(msg)) if msg.contains("Ghost")
        ));
    }

    #[test]
    fn stale_report_is_rejected() {
        // The branch the report names is already connected.
        let wf = Workflow::new(
            vec![
                node("Start", "manual-start", 1, json!({})),
                node("Check", "conditional-branch", 1, json!({ "conditions": {} })),
                node("Done", "respond", 1, json!({})),
            ],
            vec![
                Connection::primary("Start", 0, "Check"),
                Connection::primary("Check", 0, "Done"),
                Connection::primary("Check", 1, "Done"),
            ],
        );
        let issue = Issue::new(Some("Check"), IssueKind::UnconnectedBranch { branch: 1 }, "");
        assert!(repair(&wf, &report(vec![issue]), &nodes::builtin::catalog()).is_err());

        let issue = Issue::new(None, IssueKind::MissingSource, "");
        assert!(repair(&wf, &report(vec![issue]), &nodes::builtin::catalog()).is_err());
    }

    #[test]
    fn invented_capability_requirement_is_rejected() {
        let wf = Workflow::new(
            vec![
                node("Start", "manual-start", 1, json!({})),
                node("Check", "conditional-branch", 1, json!({ "conditions": {} })),
                node("Yes", "respond", 1, json!({})),
                node("No", "respond", 1, json!({})),
            ],
            vec![
                Connection::primary("Start", 0, "Check"),
                Connection::primary("Check", 0, "Yes"),
                Connection::primary("Check", 1, "No"),
            ],
        );
        let issue = Issue::new(
            Some("Check"),
            IssueKind::MissingCapability { channel: Channel::capability("tool") },
            "",
        );
        assert!(matches!(
            repair(&wf, &report(vec![issue]), &nodes::builtin::catalog()),
            Err(EngineError::UnrepairableReport(msg)) if msg.contains("does not require")
        ));
    }

    #[test]
    fn capability_already_attached_is_rejected() {
        let wf = Workflow::new(
            vec![
                node("Agent", "capability-orchestrator", 1, json!({ "prompt": "hi" })),
                node("Model", "capability-provider:model", 1, json!({ "model": "m" })),
            ],
            vec![Connection::on(Channel::capability("model"), "Model", 0, "Agent")],
        );
        let issue = Issue::new(
            Some("Agent"),
            IssueKind::MissingCapability { channel: Channel::capability("model") },
            "",
        );
        assert!(repair(&wf, &report(vec![issue]), &nodes::builtin::catalog()).is_err());
    }

    #[test]
    fn schema_mismatch_on_matching_parameters_is_rejected() {
        let wf = Workflow::new(
            vec![node("Fetch", "http-call", 2, json!({ "url": "u", "method": "GET" }))],
            vec![],
        );
        let issue = Issue::new(
            Some("Fetch"),
            IssueKind::SchemaVersionMismatch {
                expected: SchemaVersion::major(2),
                shape: "{url: string, method: string, headers?: object}".into(),
            },
            "",
        );
        assert!(matches!(
            repair(&wf, &report(vec![issue]), &nodes::builtin::catalog()),
            Err(EngineError::UnrepairableReport(msg)) if msg.contains("already match")
        ));
    }

    #[test]
    fn unmerged_branches_must_name_real_terminals() {
        let wf = Workflow::new(
            vec![
                node("Start", "manual-start", 1, json!({})),
                node("Check", "conditional-branch", 1, json!({ "conditions": {} })),
                node("Yes", "respond", 1, json!({})),
                node("No", "no-op", 1, json!({})),
                node("Done", "respond", 1, json!({})),
            ],
            vec![
                Connection::primary("Start", 0, "Check"),
                Connection::primary("Check", 0, "Yes"),
                Connection::primary("Check", 1, "No"),
                Connection::primary("No", 0, "Done"),
            ],
        );
        let catalog = nodes::builtin::catalog();
        let unmerged = |at: &str, terminals: &[&str]| {
            let terminals = terminals.iter().map(|t| (*t).to_owned()).collect();
            report(vec![Issue::new(Some(at), IssueKind::UnmergedBranches { terminals }, "")])
        };

        // "No" forwards to "Done", so it is not a terminal.
        assert!(repair(&wf, &unmerged("Check", &["Yes", "No"]), &catalog).is_err());
        // "Start" does not branch.
        assert!(repair(&wf, &unmerged("Start", &["Yes", "Done"]), &catalog).is_err());
        // One terminal is not a fan-out.
        assert!(repair(&wf, &unmerged("Check", &["Yes"]), &catalog).is_err());

        assert!(repair(&wf, &unmerged("Check", &["Yes", "Done"]), &catalog).is_ok());
    }

    #[test]
    fn relabelled_data_connection_does_not_supply_a_capability() {
        let mut conn = Connection::primary("Fetch", 0, "Agent");
        conn.target_channel = Channel::capability("model");
        let wf = Workflow::new(
            vec![
                node("Fetch", "http-call", 2, json!({ "url": "u", "method": "GET" })),
                node("Agent", "capability-orchestrator", 1, json!({ "prompt": "hi" })),
            ],
            vec![conn],
        );
        let issue = Issue::new(
            Some("Agent"),
            IssueKind::MissingCapability { channel: Channel::capability("model") },
            "",
        );
        let repaired = repair(&wf, &report(vec![issue]), &nodes::builtin::catalog()).unwrap();
        let provider = repaired.workflow.node("model for Agent").expect("provider inserted");
        assert_eq!(provider.type_tag, "capability-provider:model");
    }

    #[test]
    fn missing_source_inserts_a_start_feeding_entry_nodes() {
        let wf = Workflow::new(
            vec![
                node("Fetch", "http-call", 2, json!({ "url": "u", "method": "GET" })),
                node("Done", "respond", 1, json!({})),
                node("Model", "capability-provider:model", 1, json!({ "model": "m" })),
            ],
            vec![Connection::primary("Fetch", 0, "Done")],
        );
        let issue = Issue::new(None, IssueKind::MissingSource, "");
        let repaired = repair(&wf, &report(vec![issue]), &nodes::builtin::catalog()).unwrap();

        let start = repaired.workflow.node("Start").expect("source inserted");
        assert_eq!(start.type_tag, "manual-start");
        let fed: Vec<&str> = repaired
            .workflow
            .connections
            .iter()
            .filter(|c| c.source == "Start")
            .map(|c| c.target.as_str())
            .collect();
        assert_eq!(fed, vec!["Fetch"]);
        assert_eq!(repaired.change_log, vec!["inserted source node 'Start' feeding Fetch".to_owned()]);
    }

    #[test]
    fn inserted_names_never_collide() {
        let wf = Workflow::new(
            vec![
                node("Start", "manual-start", 1, json!({})),
                node("Fetch", "http-call", 2, json!({ "url": "u", "method": "GET" })),
                node("Completion", "respond", 1, json!({})),
            ],
            vec![Connection::primary("Start", 0, "Fetch")],
        );
        let issue = Issue::new(Some("Fetch"), IssueKind::DeadEnd, "");
        let repaired = repair(&wf, &report(vec![issue]), &nodes::builtin::catalog()).unwrap();
        let added = repaired.workflow.node("Completion 1").expect("suffixed name");
        assert_eq!(added.type_tag, "completion");
        assert_ne!(added.id, "Completion");
    }

    #[test]
    fn inserted_nodes_are_placed_next_to_their_anchor() {
        let mut fetch = node("Fetch", "http-call", 2, json!({ "url": "u", "method": "GET" }));
        fetch.position = json!([100, 40]);
        let wf = Workflow::new(
            vec![node("Start", "manual-start", 1, json!({})), fetch],
            vec![Connection::primary("Start", 0, "Fetch")],
        );
        let issue = Issue::new(Some("Fetch"), IssueKind::DeadEnd, "");
        let repaired = repair(&wf, &report(vec![issue]), &nodes::builtin::catalog()).unwrap();
        assert_eq!(repaired.workflow.node("Completion").unwrap().position, json!([320.0, 40.0]));
    }
}
