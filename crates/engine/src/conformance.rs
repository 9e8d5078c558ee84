//! Schema and channel conformance.
//!
//! Two independent checks, both driven by the node catalog:
//! - **Parameter shape**: a node's `parameters` must match the schema of its
//!   *declared* version. Parameters that only match an older version are the
//!   classic stale-format defect and are reported as such.
//! - **Channel conformance**: capability providers attach only through their
//!   designated channel, connections never change channel mid-flight, and
//!   orchestrators receive every capability they require.

use itertools::Itertools;
use nodes::Role;

use crate::classify::Classification;
use crate::graph::WorkflowGraph;
use crate::repair::attaches;
use crate::report::{IssueKind, ReportBuilder};

/// Check every known node's parameters against its declared schema version.
pub(crate) fn check_parameters(classes: &Classification<'_>, report: &mut ReportBuilder) {
    for class in classes.iter() {
        let Some(kind) = class.kind else {
            continue;
        };
        let node = class.node;
        let version = node.schema_version;

        let Some(target) = kind.schema(version) else {
            let known = kind.schemas.iter().map(|s| s.version).sorted().join(", ");
            report.push(
                Some(&node.name),
                IssueKind::UnknownSchemaVersion { version },
                format!(
                    "'{}' has no schema version {version} (known: {known}); parameters not checked",
                    kind.type_tag
                ),
            );
            continue;
        };

        let violations = kind.check_parameters(target, &node.parameters);
        if violations.is_empty() {
            continue;
        }

        let mut detail = format!(
            "parameters do not match '{}' v{version} shape {}: {}",
            kind.type_tag,
            target.describe(),
            violations.iter().join("; ")
        );
        if let Some(older) = kind.matching_older_version(version, &node.parameters) {
            detail.push_str(&format!(" (parameters match v{older})"));
        }
        report.push(
            Some(&node.name),
            IssueKind::SchemaVersionMismatch { expected: version, shape: target.describe() },
            detail,
        );
    }
}

/// Check channel usage on every connection and capability requirements on
/// every orchestrator.
pub(crate) fn check_channels(
    graph: &WorkflowGraph<'_>,
    classes: &Classification<'_>,
    report: &mut ReportBuilder,
) {
    for conn in graph.connections() {
        let (Some(from), Some(to)) = (graph.index_of(&conn.source), graph.index_of(&conn.target))
        else {
            continue;
        };
        let source = classes.get(from);

        if let Some(designated) = source.kind.and_then(|k| k.channel.as_ref()) {
            let found = if &conn.source_channel != designated {
                &conn.source_channel
            } else {
                &conn.target_channel
            };
            if found != designated {
                report.push(
                    Some(&conn.source),
                    IssueKind::WrongChannel {
                        target: conn.target.clone(),
                        found: found.clone(),
                        expected: designated.clone(),
                    },
                    format!(
                        "provider is attached to '{}' via '{found}' instead of '{designated}'",
                        conn.target
                    ),
                );
            }
            continue;
        }

        if conn.source_channel != conn.target_channel {
            report.push(
                Some(&conn.source),
                IssueKind::ChannelMismatch {
                    target: conn.target.clone(),
                    source_channel: conn.source_channel.clone(),
                    target_channel: conn.target_channel.clone(),
                },
                format!(
                    "connection to '{}' leaves on '{}' but arrives on '{}'",
                    conn.target, conn.source_channel, conn.target_channel
                ),
            );
        }

        if conn.target_channel.is_primary() && classes.role(to) == Role::CapabilityProvider {
            report.push(
                Some(&conn.target),
                IssueKind::ProviderAsDataTarget { source: conn.source.clone() },
                format!(
                    "capability provider receives primary-channel data from '{}'",
                    conn.source
                ),
            );
        }
    }

    for class in classes.iter().filter(|c| c.role == Role::Orchestrator) {
        let Some(kind) = class.kind else {
            continue;
        };
        let name = &class.node.name;
        for channel in kind.required_channels(&class.node.parameters) {
            // A data connection relabelled onto the channel does not count.
            if graph.incoming_all(name).any(|c| attaches(c, channel)) {
                continue;
            }
            // A provider of this capability attached through the wrong
            // channel is already reported as `WrongChannel`.
            let misrouted = graph.incoming_all(name).any(|c| {
                graph
                    .index_of(&c.source)
                    .and_then(|i| classes.get(i).kind)
                    .and_then(|k| k.channel.as_ref())
                    == Some(channel)
            });
            if misrouted {
                continue;
            }
            report.push(
                Some(name),
                IssueKind::MissingCapability { channel: channel.clone() },
                format!("requires a capability on '{channel}' but nothing is attached"),
            );
        }
    }
}
