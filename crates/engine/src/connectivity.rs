//! Connectivity analysis over the primary channel.
//!
//! Checks run once per validation:
//! 1. At least one node must have the source role (`MissingSource`).
//! 2. Orchestrator and pass-through nodes must have a primary output (`DeadEnd`).
//! 3. A branching node whose reachable terminal nodes number more than one
//!    fans out without reconverging (`UnmergedBranches`).
//! 4. Every declared branch of a branching node must be connected
//!    (`UnconnectedBranch`); slots past the declared branches and the
//!    optional fallback slot are flagged (`UndeclaredBranchSlot`).
//! 5. Optionally, nodes unreachable from every source (`Unreachable`) and
//!    nodes left over by a topological sort (`Cycle`).
//!
//! Capability channels are checked separately by the conformance module.
//! Cycles are tolerated by every traversal here (visited sets, no recursion).

use std::collections::{BTreeSet, VecDeque};

use nodes::{Channel, Role};

use crate::classify::Classification;
use crate::graph::WorkflowGraph;
use crate::report::{IssueKind, ReportBuilder};
use crate::validator::ValidatorConfig;

/// Run every connectivity check and record the issues found.
pub(crate) fn analyze(
    graph: &WorkflowGraph<'_>,
    classes: &Classification<'_>,
    config: &ValidatorConfig,
    report: &mut ReportBuilder,
) {
    let nodes = graph.nodes();

    // -----------------------------------------------------------------------
    // 1. Primary-channel degree counts (single pass over connections)
    // -----------------------------------------------------------------------
    let mut outgoing_count = vec![0usize; nodes.len()];
    let mut incoming_count = vec![0usize; nodes.len()];
    for conn in graph.connections() {
        if conn.source_channel.is_primary() {
            if let Some(i) = graph.index_of(&conn.source) {
                outgoing_count[i] += 1;
            }
        }
        if conn.target_channel.is_primary() {
            if let Some(i) = graph.index_of(&conn.target) {
                incoming_count[i] += 1;
            }
        }
    }

    // -----------------------------------------------------------------------
    // 2. No-source check
    // -----------------------------------------------------------------------
    let has_source = classes.has_role(Role::Source);
    if !has_source {
        report.push(
            None,
            IssueKind::MissingSource,
            "no node can start the workflow (no node has the source role)".to_owned(),
        );
    }

    // -----------------------------------------------------------------------
    // 3. Dead-end check
    // -----------------------------------------------------------------------
    for (i, class) in classes.iter().enumerate() {
        if class.role.forwards_data() && outgoing_count[i] == 0 {
            report.push(
                Some(&class.node.name),
                IssueKind::DeadEnd,
                format!(
                    "{} node has no outgoing connection on the primary channel",
                    class.role
                ),
            );
        }
    }

    // -----------------------------------------------------------------------
    // 4. Unmerged-branch and branch-completeness checks
    // -----------------------------------------------------------------------
    for (i, class) in classes.iter().enumerate() {
        if !class.is_branching() {
            continue;
        }
        let name = &class.node.name;

        let terminals = terminal_descendants(graph, classes, &outgoing_count, i);
        if terminals.len() > 1 {
            let names: Vec<String> = terminals.iter().map(|&t| nodes[t].name.clone()).collect();
            let detail = format!(
                "{} branches end in separate terminal nodes ({}) without reconverging",
                names.len(),
                names.join(", ")
            );
            report.push(Some(name), IssueKind::UnmergedBranches { terminals: names }, detail);
        }

        let Some(declared) = class.declared_branches() else {
            continue;
        };
        let used: BTreeSet<usize> = graph
            .outgoing(name, &Channel::primary())
            .into_keys()
            .collect();
        for branch in (0..declared).filter(|b| !used.contains(b)) {
            report.push(
                Some(name),
                IssueKind::UnconnectedBranch { branch },
                format!("declared branch {branch} of {declared} has no connection"),
            );
        }

        let fallback = class
            .kind
            .is_some_and(|k| k.has_fallback(&class.node.parameters));
        let limit = declared + usize::from(fallback);
        for &slot in used.range(limit..) {
            report.push(
                Some(name),
                IssueKind::UndeclaredBranchSlot { slot },
                format!(
                    "output slot {slot} is used but only {declared} branch(es){} are declared",
                    if fallback { " plus a fallback" } else { "" }
                ),
            );
        }
    }

    // -----------------------------------------------------------------------
    // 5. Reachability and cycles
    // -----------------------------------------------------------------------
    if config.report_unreachable && has_source {
        let starts = (0..nodes.len()).filter(|&i| classes.role(i) == Role::Source);
        let reached = reachable_from(graph, starts);
        for (i, class) in classes.iter().enumerate() {
            if reached[i] || matches!(class.role, Role::Source | Role::CapabilityProvider) {
                continue;
            }
            let detail = if incoming_count[i] == 0 {
                "node has no incoming primary connection and is not a source".to_owned()
            } else {
                "no primary-channel path leads here from a source node".to_owned()
            };
            report.push(Some(&class.node.name), IssueKind::Unreachable, detail);
        }
    }

    if config.detect_cycles {
        let cyclic = unsorted_nodes(graph);
        if !cyclic.is_empty() {
            let names: Vec<String> = cyclic.iter().map(|&i| nodes[i].name.clone()).collect();
            let detail = format!(
                "{} node(s) lie on or behind a primary-channel cycle: {}",
                names.len(),
                names.join(", ")
            );
            report.push(None, IssueKind::Cycle { nodes: names }, detail);
        }
    }
}

/// Nodes reachable from `start` (excluding it) that have no primary output,
/// in node order. Capability providers are never terminals.
fn terminal_descendants(
    graph: &WorkflowGraph<'_>,
    classes: &Classification<'_>,
    outgoing_count: &[usize],
    start: usize,
) -> Vec<usize> {
    let reached = reachable_from(graph, std::iter::once(start));
    (0..reached.len())
        .filter(|&i| i != start && reached[i])
        .filter(|&i| outgoing_count[i] == 0 && classes.role(i) != Role::CapabilityProvider)
        .collect()
}

/// Breadth-first search over primary successors from every start node.
fn reachable_from(graph: &WorkflowGraph<'_>, starts: impl IntoIterator<Item = usize>) -> Vec<bool> {
    let mut seen = vec![false; graph.nodes().len()];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for s in starts {
        if !seen[s] {
            seen[s] = true;
            queue.push_back(s);
        }
    }
    while let Some(i) = queue.pop_front() {
        for next in graph.primary_successors(i) {
            if !seen[next] {
                seen[next] = true;
                queue.push_back(next);
            }
        }
    }
    seen
}

/// Kahn's algorithm over the primary channel; returns the nodes it could not
/// sort, in node order. Empty for an acyclic graph.
fn unsorted_nodes(graph: &WorkflowGraph<'_>) -> Vec<usize> {
    let n = graph.nodes().len();
    let successors: Vec<Vec<usize>> = (0..n).map(|i| graph.primary_successors(i)).collect();

    let mut in_degree = vec![0usize; n];
    for targets in &successors {
        for &t in targets {
            in_degree[t] += 1;
        }
    }

    // Seed the queue with nodes that have no incoming edges.
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = vec![false; n];

    while let Some(i) = queue.pop_front() {
        sorted[i] = true;
        for &t in &successors[i] {
            in_degree[t] -= 1;
            if in_degree[t] == 0 {
                queue.push_back(t);
            }
        }
    }

    (0..n).filter(|&i| !sorted[i]).collect()
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::models::{Connection, Node, Workflow};
    use crate::report::{Severity, ValidationReport};
    use nodes::SchemaVersion;
    use serde_json::{json, Value};

    fn node(name: &str, type_tag: &str, params: Value) -> Node {
        let params = params.as_object().cloned().unwrap_or_default();
        Node::new(name, name, type_tag, SchemaVersion::major(1), params)
    }

    fn run(wf: &Workflow, config: &ValidatorConfig) -> ValidationReport {
        let catalog = nodes::builtin::catalog();
        let graph = WorkflowGraph::new(wf).expect("valid graph");
        let mut report = ReportBuilder::default();
        let classes = classify(&graph, &catalog, &mut report);
        analyze(&graph, &classes, config, &mut report);
        report.finish()
    }

    fn kinds(report: &ValidationReport) -> Vec<&'static str> {
        report.issues().iter().map(|i| i.kind.name()).collect()
    }

    #[test]
    fn linear_workflow_is_clean() {
        // Start → Fetch → Done
        let wf = Workflow::new(
            vec![
                node("Start", "manual-start", json!({})),
                node("Fetch", "http-call", json!({})),
                node("Done", "respond", json!({})),
            ],
            vec![Connection::primary("Start", 0, "Fetch"), Connection::primary("Fetch", 0, "Done")],
        );
        assert!(run(&wf, &ValidatorConfig::default()).is_empty());
    }

    #[test]
    fn missing_source_is_blocking() {
        let wf = Workflow::new(vec![node("Done", "respond", json!({}))], vec![]);
        let report = run(&wf, &ValidatorConfig::default());
        assert_eq!(kinds(&report), vec!["MissingSource"]);
        assert_eq!(report.issues()[0].severity, Severity::Blocking);
        assert_eq!(report.issues()[0].node_ref, None);
    }

    #[test]
    fn forwarding_node_without_output_is_a_dead_end() {
        let wf = Workflow::new(
            vec![node("Start", "manual-start", json!({})), node("Fetch", "http-call", json!({}))],
            vec![Connection::primary("Start", 0, "Fetch")],
        );
        let report = run(&wf, &ValidatorConfig::default());
        assert_eq!(kinds(&report), vec!["DeadEnd"]);
        assert_eq!(report.issues()[0].node_ref.as_deref(), Some("Fetch"));
    }

    #[test]
    fn terminal_sink_is_not_a_dead_end() {
        let wf = Workflow::new(
            vec![node("Start", "manual-start", json!({})), node("Done", "no-op", json!({}))],
            vec![Connection::primary("Start", 0, "Done")],
        );
        assert!(run(&wf, &ValidatorConfig::default()).is_empty());
    }

    #[test]
    fn branches_that_reconverge_are_not_flagged() {
        //        Check
        //       /     \
        //    Yes       No
        //       \     /
        //        Done
        let wf = Workflow::new(
            vec![
                node("Start", "manual-start", json!({})),
                node("Check", "conditional-branch", json!({ "conditions": {} })),
                node("Yes", "http-call", json!({})),
                node("No", "http-call", json!({})),
                node("Done", "respond", json!({})),
            ],
            vec![
                Connection::primary("Start", 0, "Check"),
                Connection::primary("Check", 0, "Yes"),
                Connection::primary("Check", 1, "No"),
                Connection::primary("Yes", 0, "Done"),
                Connection::primary("No", 0, "Done"),
            ],
        );
        assert!(run(&wf, &ValidatorConfig::default()).is_empty());
    }

    #[test]
    fn branches_ending_in_separate_sinks_are_unmerged() {
        let wf = Workflow::new(
            vec![
                node("Start", "manual-start", json!({})),
                node("Check", "conditional-branch", json!({ "conditions": {} })),
                node("Yes", "respond", json!({})),
                node("No", "no-op", json!({})),
            ],
            vec![
                Connection::primary("Start", 0, "Check"),
                Connection::primary("Check", 0, "Yes"),
                Connection::primary("Check", 1, "No"),
            ],
        );
        let report = run(&wf, &ValidatorConfig::default());
        assert_eq!(kinds(&report), vec!["UnmergedBranches"]);
        assert_eq!(
            report.issues()[0].kind,
            IssueKind::UnmergedBranches { terminals: vec!["Yes".into(), "No".into()] }
        );
        assert!(report.is_executable());
    }

    #[test]
    fn unconnected_declared_branch_is_reported_by_index() {
        let wf = Workflow::new(
            vec![
                node("Start", "manual-start", json!({})),
                node("Route", "n-way-router", json!({ "rules": [{}, {}, {}] })),
                node("A", "http-call", json!({})),
                node("B", "http-call", json!({})),
                node("Done", "respond", json!({})),
            ],
            vec![
                Connection::primary("Start", 0, "Route"),
                Connection::primary("Route", 0, "A"),
                Connection::primary("Route", 1, "B"),
                Connection::primary("A", 0, "Done"),
                Connection::primary("B", 0, "Done"),
            ],
        );
        let report = run(&wf, &ValidatorConfig::default());
        assert_eq!(kinds(&report), vec!["UnconnectedBranch"]);
        assert_eq!(report.issues()[0].kind, IssueKind::UnconnectedBranch { branch: 2 });
    }

    #[test]
    fn fallback_slot_is_optional_but_reserved() {
        let base = |fallback: Value| {
            Workflow::new(
                vec![
                    node("Start", "manual-start", json!({})),
                    node("Route", "n-way-router", json!({ "rules": [{}], "fallbackOutput": fallback })),
                    node("Done", "respond", json!({})),
                ],
                vec![
                    Connection::primary("Start", 0, "Route"),
                    Connection::primary("Route", 0, "Done"),
                    Connection::primary("Route", 1, "Done"),
                ],
            )
        };
        // Slot 1 is the fallback: allowed.
        assert!(run(&base(json!("extra")), &ValidatorConfig::default()).is_empty());
        // Without a fallback, slot 1 is undeclared.
        let report = run(&base(json!("none")), &ValidatorConfig::default());
        assert_eq!(report.issues()[0].kind, IssueKind::UndeclaredBranchSlot { slot: 1 });
    }

    #[test]
    fn unreachable_nodes_are_warned_about() {
        let wf = Workflow::new(
            vec![
                node("Start", "manual-start", json!({})),
                node("Done", "respond", json!({})),
                node("Orphan", "no-op", json!({})),
                node("Model", "capability-provider:model", json!({})),
            ],
            vec![Connection::primary("Start", 0, "Done")],
        );
        let report = run(&wf, &ValidatorConfig::default());
        assert_eq!(kinds(&report), vec!["Unreachable"]);
        assert_eq!(report.issues()[0].node_ref.as_deref(), Some("Orphan"));

        let quiet = ValidatorConfig { report_unreachable: false, ..ValidatorConfig::default() };
        assert!(run(&wf, &quiet).is_empty());
    }

    #[test]
    fn cycles_are_tolerated_unless_detection_is_enabled() {
        // Start → A → B → A
        let wf = Workflow::new(
            vec![
                node("Start", "manual-start", json!({})),
                node("A", "http-call", json!({})),
                node("B", "http-call", json!({})),
            ],
            vec![
                Connection::primary("Start", 0, "A"),
                Connection::primary("A", 0, "B"),
                Connection::primary("B", 0, "A"), // back-edge
            ],
        );
        assert!(run(&wf, &ValidatorConfig::default()).is_empty());

        let strict = ValidatorConfig { detect_cycles: true, ..ValidatorConfig::default() };
        let report = run(&wf, &strict);
        assert_eq!(
            report.issues()[0].kind,
            IssueKind::Cycle { nodes: vec!["A".into(), "B".into()] }
        );
        assert_eq!(report.issues()[0].severity, Severity::Warning);
    }

    #[test]
    fn capability_edges_do_not_count_as_outputs() {
        let wf = Workflow::new(
            vec![
                node("Start", "manual-start", json!({})),
                node("Fetch", "http-call", json!({})),
                node("Model", "capability-provider:model", json!({})),
            ],
            vec![
                Connection::primary("Start", 0, "Fetch"),
                Connection::on(nodes::Channel::capability("model"), "Fetch", 0, "Model"),
            ],
        );
        assert_eq!(kinds(&run(&wf, &ValidatorConfig::default())), vec!["DeadEnd"]);
    }
}
