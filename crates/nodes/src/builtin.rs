//! Built-in node catalog.
//!
//! Built once per process and shared read-only through an `Arc`; callers that
//! manage their own node kinds load a [`NodeCatalog`] document instead.

use std::sync::{Arc, OnceLock};

use crate::catalog::{BranchSpec, CapabilityRequirement, NodeKind, RepairKinds, Role};
use crate::schema::{FieldSpec, ParameterSchema, SchemaVersion, ValueKind};
use crate::{Channel, NodeCatalog};

static BUILTIN: OnceLock<Arc<NodeCatalog>> = OnceLock::new();

/// The shared built-in catalog.
pub fn catalog() -> Arc<NodeCatalog> {
    BUILTIN
        .get_or_init(|| Arc::new(NodeCatalog::from_trusted(kinds(), RepairKinds::default())))
        .clone()
}

fn v(major: u32) -> SchemaVersion {
    SchemaVersion::major(major)
}

fn req(name: &str, kind: ValueKind) -> FieldSpec {
    FieldSpec::required(name, kind)
}

fn opt(name: &str, kind: ValueKind) -> FieldSpec {
    FieldSpec::optional(name, kind)
}

fn schema(version: u32, fields: Vec<FieldSpec>) -> ParameterSchema {
    ParameterSchema::new(v(version), fields)
}

fn provider(capability: &str, fields: Vec<FieldSpec>) -> NodeKind {
    NodeKind::new(&format!("capability-provider:{capability}"), Role::CapabilityProvider)
        .with_channel(Channel::capability(capability))
        .with_schema(schema(1, fields))
}

/// Every built-in kind, in catalog order.
pub fn kinds() -> Vec<NodeKind> {
    use ValueKind::*;

    vec![
        // ------ Sources ------
        NodeKind::new("manual-start", Role::Source).with_schema(schema(1, vec![])),
        NodeKind::new("webhook-trigger", Role::Source)
            .with_schema(schema(1, vec![req("path", String), opt("httpMethod", String)]))
            .with_schema(schema(2, vec![req("path", String), req("method", String)]))
            .with_rename("httpMethod", "method"),
        NodeKind::new("schedule-trigger", Role::Source)
            .with_schema(schema(1, vec![req("rule", Object)])),
        // ------ Pass-through ------
        NodeKind::new("http-call", Role::PassThrough)
            .with_schema(schema(1, vec![req("endpoint", String), opt("requestMethod", String)]))
            .with_schema(schema(
                2,
                vec![req("url", String), req("method", String), opt("headers", Object)],
            ))
            .with_rename("endpoint", "url")
            .with_rename("requestMethod", "method"),
        NodeKind::new("set-fields", Role::PassThrough)
            .with_schema(schema(1, vec![req("values", Object)]))
            .with_schema(schema(2, vec![req("assignments", Array), opt("options", Object)])),
        NodeKind::new("code", Role::PassThrough)
            .with_schema(schema(1, vec![req("jsCode", String)]))
            .with_schema(schema(2, vec![req("language", String), req("code", String)]))
            .with_rename("jsCode", "code"),
        NodeKind::new("merge", Role::PassThrough)
            .with_schema(schema(1, vec![opt("mode", String)]))
            .with_schema(schema(2, vec![req("mode", String)])),
        // ------ Orchestrators ------
        NodeKind::new("conditional-branch", Role::Orchestrator)
            .with_branching(BranchSpec::fixed(2))
            .with_schema(schema(1, vec![req("conditions", Object)])),
        NodeKind::new("n-way-router", Role::Orchestrator)
            .with_branching(BranchSpec::from_parameter("rules", Some("fallbackOutput")))
            .with_schema(schema(1, vec![req("routes", Array), opt("fallback", Any)]))
            .with_schema(schema(2, vec![req("rules", Array), opt("fallbackOutput", Any)]))
            .with_rename("routes", "rules")
            .with_rename("fallback", "fallbackOutput"),
        NodeKind::new("capability-orchestrator", Role::Orchestrator)
            .with_requirement(CapabilityRequirement::always(Channel::capability("model")))
            .with_requirement(CapabilityRequirement::when(
                Channel::capability("output-parser"),
                "hasOutputParser",
            ))
            .with_schema(schema(1, vec![req("prompt", String), opt("hasOutputParser", Boolean)]))
            .with_schema(schema(
                2,
                vec![req("text", String), opt("hasOutputParser", Boolean), opt("options", Object)],
            ))
            .with_rename("prompt", "text"),
        // ------ Sinks ------
        NodeKind::new("respond", Role::Sink)
            .with_schema(schema(1, vec![opt("respondWith", String)])),
        NodeKind::new("completion", Role::Sink).with_schema(schema(1, vec![opt("note", String)])),
        NodeKind::new("no-op", Role::Sink).with_schema(schema(1, vec![])),
        // ------ Capability providers ------
        provider("model", vec![req("model", String), opt("options", Object)]),
        provider("memory", vec![opt("sessionKey", String), opt("windowSize", Number)]),
        provider("tool", vec![req("name", String), opt("description", String)]),
        provider("output-parser", vec![req("jsonSchema", String)]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_consistent() {
        assert!(NodeCatalog::new(kinds(), RepairKinds::default()).is_ok());
    }

    #[test]
    fn every_capability_channel_has_a_provider() {
        let catalog = catalog();
        for name in ["model", "memory", "tool", "output-parser"] {
            let provider = catalog.provider_for(&Channel::capability(name)).unwrap();
            assert_eq!(provider.type_tag, format!("capability-provider:{name}"));
        }
    }

    #[test]
    fn catalog_is_shared_not_rebuilt() {
        assert!(Arc::ptr_eq(&catalog(), &catalog()));
    }

    #[test]
    fn orchestrator_requires_a_model() {
        let catalog = catalog();
        let kind = catalog.get("capability-orchestrator").unwrap();
        let params = serde_json::Map::new();
        let channels: Vec<&Channel> = kind.required_channels(&params).collect();
        assert_eq!(channels, vec![&Channel::capability("model")]);
    }
}
