//! The node-kind catalog.
//!
//! A lookup table keyed by `type_tag` and the single source of truth for:
//! - which role a kind plays (source, pass-through, sink, orchestrator,
//!   capability provider), and therefore whether it must forward data and
//!   whether it may appear as a data-flow target;
//! - which channel a capability provider attaches through;
//! - which capabilities an orchestrator needs;
//! - how many output branches a branching kind declares;
//! - the parameter schema for every schema version, and the field renames
//!   used to migrate stale parameters forward.
//!
//! New node kinds are added by data (a catalog document), not code.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::schema::{is_enabled, FieldRename, ParameterSchema, SchemaVersion, ShapeViolation};
use crate::{CatalogError, Channel};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Structural role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Starts a run; needs no incoming data.
    Source,
    /// Receives data and is expected to forward it.
    PassThrough,
    /// Allowed to be terminal.
    Sink,
    /// Receives and forwards data; may branch and may require capabilities.
    Orchestrator,
    /// Sub-node that attaches to an orchestrator through a capability channel.
    CapabilityProvider,
}

impl Role {
    /// Roles that are expected to have primary-channel outputs.
    pub fn forwards_data(self) -> bool {
        matches!(self, Self::PassThrough | Self::Orchestrator)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::PassThrough => "pass-through",
            Self::Sink => "sink",
            Self::Orchestrator => "orchestrator",
            Self::CapabilityProvider => "capability-provider",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Branching and capability requirements
// ---------------------------------------------------------------------------

/// How a branching kind declares its number of output branches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BranchSpec {
    /// Fixed branch count (e.g. true/false for a conditional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed: Option<usize>,
    /// Parameter holding an array with one entry per branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_from: Option<String>,
    /// Parameter that, when enabled, reserves one extra fallback slot after
    /// the declared branches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_flag: Option<String>,
}

impl BranchSpec {
    pub fn fixed(count: usize) -> Self {
        Self { fixed: Some(count), ..Self::default() }
    }

    pub fn from_parameter(field: &str, fallback_flag: Option<&str>) -> Self {
        Self {
            fixed: None,
            count_from: Some(field.to_owned()),
            fallback_flag: fallback_flag.map(str::to_owned),
        }
    }
}

/// A capability an orchestrator needs attached on a given channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRequirement {
    pub channel: Channel,
    /// Parameter flag that makes the requirement conditional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl CapabilityRequirement {
    pub fn always(channel: Channel) -> Self {
        Self { channel, when: None }
    }

    pub fn when(channel: Channel, flag: &str) -> Self {
        Self { channel, when: Some(flag.to_owned()) }
    }

    pub fn applies_to(&self, parameters: &Map<String, Value>) -> bool {
        match &self.when {
            None => true,
            Some(flag) => is_enabled(parameters.get(flag)),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeKind {
    pub type_tag: String,
    pub role: Role,
    /// Designated channel of a capability provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<CapabilityRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branching: Option<BranchSpec>,
    pub schemas: Vec<ParameterSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub renames: Vec<FieldRename>,
}

impl NodeKind {
    pub fn new(type_tag: &str, role: Role) -> Self {
        Self {
            type_tag: type_tag.to_owned(),
            role,
            channel: None,
            requires: Vec::new(),
            branching: None,
            schemas: Vec::new(),
            renames: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_requirement(mut self, requirement: CapabilityRequirement) -> Self {
        self.requires.push(requirement);
        self
    }

    pub fn with_branching(mut self, spec: BranchSpec) -> Self {
        self.branching = Some(spec);
        self
    }

    pub fn with_schema(mut self, schema: ParameterSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn with_rename(mut self, from: &str, to: &str) -> Self {
        self.renames.push(FieldRename::new(from, to));
        self
    }

    pub fn schema(&self, version: SchemaVersion) -> Option<&ParameterSchema> {
        self.schemas.iter().find(|s| s.version == version)
    }

    pub fn latest_schema(&self) -> Option<&ParameterSchema> {
        self.schemas.iter().max_by_key(|s| s.version)
    }

    /// Capability channels this orchestrator needs, given its parameters.
    pub fn required_channels<'a>(
        &'a self,
        parameters: &'a Map<String, Value>,
    ) -> impl Iterator<Item = &'a Channel> + 'a {
        self.requires
            .iter()
            .filter(move |r| r.applies_to(parameters))
            .map(|r| &r.channel)
    }

    /// Number of declared logical branches, or `None` when this kind does
    /// not branch or the count cannot be read from the parameters.
    ///
    /// A count parameter written under its pre-migration name is honoured.
    pub fn declared_branches(&self, parameters: &Map<String, Value>) -> Option<usize> {
        let spec = self.branching.as_ref()?;
        if let Some(n) = spec.fixed {
            return Some(n);
        }
        let field = spec.count_from.as_deref()?;
        let value = self.parameter_or_renamed(parameters, field)?;
        value.as_array().map(Vec::len)
    }

    /// Whether the fallback slot after the declared branches is enabled.
    pub fn has_fallback(&self, parameters: &Map<String, Value>) -> bool {
        let Some(flag) = self.branching.as_ref().and_then(|b| b.fallback_flag.as_deref()) else {
            return false;
        };
        is_enabled(self.parameter_or_renamed(parameters, flag))
    }

    /// `field`, or its pre-rename name when `field` is absent. `null` counts
    /// as absent on both sides.
    fn parameter_or_renamed<'p>(
        &self,
        parameters: &'p Map<String, Value>,
        field: &str,
    ) -> Option<&'p Value> {
        let present = |name: &str| parameters.get(name).filter(|v| !v.is_null());
        present(field).or_else(|| {
            self.renames
                .iter()
                .filter(|r| r.to == field)
                .find_map(|r| present(&r.from))
        })
    }

    /// Whether `field` is a stale name relative to `target`: it is absent
    /// from the target schema but belongs to an older schema version or is
    /// the old side of a rename.
    pub fn is_stale_field(&self, target: &ParameterSchema, field: &str) -> bool {
        if target.field(field).is_some() {
            return false;
        }
        self.renames.iter().any(|r| r.from == field)
            || self
                .schemas
                .iter()
                .filter(|s| s.version < target.version)
                .any(|s| s.field(field).is_some())
    }

    /// Every way `parameters` fails to match `target`, stale fields included.
    pub fn check_parameters(
        &self,
        target: &ParameterSchema,
        parameters: &Map<String, Value>,
    ) -> Vec<ShapeViolation> {
        let mut violations = target.violations(parameters);
        violations.extend(
            parameters
                .keys()
                .filter(|k| self.is_stale_field(target, k))
                .map(|k| ShapeViolation::StaleField { field: k.clone() }),
        );
        violations
    }

    /// Newest schema older than `version` that `parameters` fully match.
    pub fn matching_older_version(
        &self,
        version: SchemaVersion,
        parameters: &Map<String, Value>,
    ) -> Option<SchemaVersion> {
        self.schemas
            .iter()
            .filter(|s| s.version < version)
            .filter(|s| s.violations(parameters).is_empty())
            .map(|s| s.version)
            .max()
    }
}

// ---------------------------------------------------------------------------
// Repair kinds
// ---------------------------------------------------------------------------

/// Kinds the repair synthesizer inserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairKinds {
    /// Sink attached to a declared branch with no connections.
    pub placeholder_sink: String,
    /// Sink that dead ends are joined into.
    pub convergence: String,
    /// Source inserted into a graph without one.
    pub source: String,
}

impl Default for RepairKinds {
    fn default() -> Self {
        Self {
            placeholder_sink: "no-op".to_owned(),
            convergence: "completion".to_owned(),
            source: "manual-start".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeCatalog
// ---------------------------------------------------------------------------

/// Serialized form of a catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub kinds: Vec<NodeKind>,
    #[serde(default)]
    pub repair: RepairKinds,
}

/// Immutable, indexed node-kind table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CatalogDocument", into = "CatalogDocument")]
pub struct NodeCatalog {
    kinds: Vec<NodeKind>,
    repair: RepairKinds,
    index: HashMap<String, usize>,
}

impl NodeCatalog {
    /// Build a catalog, rejecting inconsistent entries.
    ///
    /// # Errors
    /// Any [`CatalogError`] describing the first inconsistent entry.
    pub fn new(kinds: Vec<NodeKind>, repair: RepairKinds) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(kinds.len());
        for (i, kind) in kinds.iter().enumerate() {
            if index.insert(kind.type_tag.clone(), i).is_some() {
                return Err(CatalogError::DuplicateKind(kind.type_tag.clone()));
            }
            check_kind(kind)?;
        }

        let catalog = Self { kinds, repair, index };
        catalog.check_repair_kind(&catalog.repair.placeholder_sink, Role::Sink)?;
        catalog.check_repair_kind(&catalog.repair.convergence, Role::Sink)?;
        catalog.check_repair_kind(&catalog.repair.source, Role::Source)?;

        debug!("node catalog built with {} kinds", catalog.kinds.len());
        Ok(catalog)
    }

    /// Index entries already known to be consistent (the built-in table,
    /// whose consistency is covered by its tests).
    pub(crate) fn from_trusted(kinds: Vec<NodeKind>, repair: RepairKinds) -> Self {
        let index = kinds
            .iter()
            .enumerate()
            .map(|(i, k)| (k.type_tag.clone(), i))
            .collect();
        Self { kinds, repair, index }
    }

    /// Parse a catalog document.
    ///
    /// # Errors
    /// [`CatalogError::Json`] on malformed JSON or an inconsistent catalog.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, CatalogError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn get(&self, type_tag: &str) -> Option<&NodeKind> {
        self.index.get(type_tag).map(|&i| &self.kinds[i])
    }

    pub fn kinds(&self) -> &[NodeKind] {
        &self.kinds
    }

    pub fn repair_kinds(&self) -> &RepairKinds {
        &self.repair
    }

    /// First provider kind (in catalog order) designated for `channel`.
    pub fn provider_for(&self, channel: &Channel) -> Option<&NodeKind> {
        self.kinds
            .iter()
            .find(|k| k.role == Role::CapabilityProvider && k.channel.as_ref() == Some(channel))
    }

    fn check_repair_kind(&self, type_tag: &str, role: Role) -> Result<(), CatalogError> {
        match self.get(type_tag) {
            Some(kind) if kind.role == role => Ok(()),
            _ => Err(CatalogError::RepairKind {
                type_tag: type_tag.to_owned(),
                role: role.as_str(),
            }),
        }
    }
}

fn check_kind(kind: &NodeKind) -> Result<(), CatalogError> {
    let tag = || kind.type_tag.clone();

    if kind.role == Role::CapabilityProvider
        && kind.channel.as_ref().is_none_or(Channel::is_primary)
    {
        return Err(CatalogError::ProviderChannel(tag()));
    }
    if kind.requires.iter().any(|r| r.channel.is_primary()) {
        return Err(CatalogError::PrimaryRequirement(tag()));
    }
    if kind.schemas.is_empty() {
        return Err(CatalogError::MissingSchema(tag()));
    }
    for (i, schema) in kind.schemas.iter().enumerate() {
        if kind.schemas[..i].iter().any(|s| s.version == schema.version) {
            return Err(CatalogError::DuplicateSchemaVersion {
                type_tag: tag(),
                version: schema.version.to_string(),
            });
        }
    }
    if let Some(spec) = &kind.branching {
        if kind.role != Role::Orchestrator {
            return Err(CatalogError::InvalidBranching {
                type_tag: tag(),
                reason: "only orchestrators may branch",
            });
        }
        if spec.fixed.is_some() == spec.count_from.is_some() {
            return Err(CatalogError::InvalidBranching {
                type_tag: tag(),
                reason: "exactly one of `fixed` and `count_from` must be set",
            });
        }
    }
    Ok(())
}

impl TryFrom<CatalogDocument> for NodeCatalog {
    type Error = CatalogError;

    fn try_from(doc: CatalogDocument) -> Result<Self, Self::Error> {
        Self::new(doc.kinds, doc.repair)
    }
}

impl From<NodeCatalog> for CatalogDocument {
    fn from(catalog: NodeCatalog) -> Self {
        Self { kinds: catalog.kinds, repair: catalog.repair }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, ValueKind};
    use serde_json::json;

    fn v(major: u32) -> SchemaVersion {
        SchemaVersion::major(major)
    }

    fn sink(tag: &str) -> NodeKind {
        NodeKind::new(tag, Role::Sink).with_schema(ParameterSchema::new(v(1), vec![]))
    }

    fn minimal_kinds() -> Vec<NodeKind> {
        vec![
            NodeKind::new("manual-start", Role::Source)
                .with_schema(ParameterSchema::new(v(1), vec![])),
            sink("no-op"),
            sink("completion"),
        ]
    }

    fn router() -> NodeKind {
        NodeKind::new("router", Role::Orchestrator)
            .with_branching(BranchSpec::from_parameter("rules", Some("fallbackOutput")))
            .with_schema(ParameterSchema::new(
                v(1),
                vec![FieldSpec::required("routes", ValueKind::Array)],
            ))
            .with_schema(ParameterSchema::new(
                v(2),
                vec![
                    FieldSpec::required("rules", ValueKind::Array),
                    FieldSpec::optional("fallbackOutput", ValueKind::Any),
                ],
            ))
            .with_rename("routes", "rules")
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn duplicate_type_tag_is_rejected() {
        let mut kinds = minimal_kinds();
        kinds.push(sink("no-op"));
        assert!(matches!(
            NodeCatalog::new(kinds, RepairKinds::default()),
            Err(CatalogError::DuplicateKind(tag)) if tag == "no-op"
        ));
    }

    #[test]
    fn provider_on_primary_channel_is_rejected() {
        let mut kinds = minimal_kinds();
        kinds.push(
            NodeKind::new("model", Role::CapabilityProvider)
                .with_channel(Channel::primary())
                .with_schema(ParameterSchema::new(v(1), vec![])),
        );
        assert!(matches!(
            NodeCatalog::new(kinds, RepairKinds::default()),
            Err(CatalogError::ProviderChannel(_))
        ));
    }

    #[test]
    fn repair_kinds_must_exist_with_the_right_role() {
        let kinds = vec![sink("no-op"), sink("completion")];
        assert!(matches!(
            NodeCatalog::new(kinds, RepairKinds::default()),
            Err(CatalogError::RepairKind { type_tag, .. }) if type_tag == "manual-start"
        ));
    }

    #[test]
    fn branching_on_a_sink_is_rejected() {
        let mut kinds = minimal_kinds();
        kinds.push(sink("fan").with_branching(BranchSpec::fixed(2)));
        assert!(matches!(
            NodeCatalog::new(kinds, RepairKinds::default()),
            Err(CatalogError::InvalidBranching { .. })
        ));
    }

    #[test]
    fn declared_branches_read_the_count_parameter() {
        let kind = router();
        assert_eq!(kind.declared_branches(&params(json!({ "rules": [1, 2, 3] }))), Some(3));
        // Pre-migration field name still declares the branches.
        assert_eq!(kind.declared_branches(&params(json!({ "routes": [1, 2] }))), Some(2));
        assert_eq!(kind.declared_branches(&params(json!({}))), None);
    }

    #[test]
    fn null_count_parameter_falls_back_to_the_old_name() {
        let kind = router();
        let both = params(json!({ "rules": null, "routes": [1, 2, 3] }));
        assert_eq!(kind.declared_branches(&both), Some(3));
        assert_eq!(kind.declared_branches(&params(json!({ "rules": null }))), None);
        assert!(!kind.has_fallback(&params(json!({ "fallbackOutput": null }))));
    }

    #[test]
    fn fallback_flag_accepts_bool_and_named_outputs() {
        let kind = router();
        assert!(kind.has_fallback(&params(json!({ "fallbackOutput": "extra" }))));
        assert!(kind.has_fallback(&params(json!({ "fallbackOutput": true }))));
        assert!(!kind.has_fallback(&params(json!({ "fallbackOutput": "none" }))));
        assert!(!kind.has_fallback(&params(json!({}))));
    }

    #[test]
    fn stale_fields_are_flagged_against_the_declared_version() {
        let kind = router();
        let target = kind.schema(v(2)).unwrap();
        let found = kind.check_parameters(target, &params(json!({ "routes": [] })));
        assert!(found.contains(&ShapeViolation::MissingField { field: "rules".into() }));
        assert!(found.contains(&ShapeViolation::StaleField { field: "routes".into() }));
        assert_eq!(
            kind.matching_older_version(v(2), &params(json!({ "routes": [] }))),
            Some(v(1))
        );
    }

    #[test]
    fn conditional_requirement_follows_its_flag() {
        let req = CapabilityRequirement::when(Channel::capability("output-parser"), "hasOutputParser");
        assert!(req.applies_to(&params(json!({ "hasOutputParser": true }))));
        assert!(!req.applies_to(&params(json!({ "hasOutputParser": false }))));
        assert!(CapabilityRequirement::always(Channel::capability("model")).applies_to(&Map::new()));
    }

    #[test]
    fn catalog_document_round_trips() {
        let mut kinds = minimal_kinds();
        kinds.push(router());
        let catalog = NodeCatalog::new(kinds, RepairKinds::default()).unwrap();
        let json = catalog.to_json_pretty().unwrap();
        let back = NodeCatalog::from_json(&json).unwrap();
        assert_eq!(back.kinds(), catalog.kinds());
        assert_eq!(back.get("router").unwrap().role, Role::Orchestrator);
    }

    #[test]
    fn inconsistent_document_fails_to_load() {
        let doc = json!({ "kinds": [ { "type_tag": "x", "role": "sink", "schemas": [] } ] });
        assert!(NodeCatalog::from_json(&doc.to_string()).is_err());
    }
}
