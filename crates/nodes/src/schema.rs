//! Parameter schemas.
//!
//! Every `(type_tag, schema_version)` pair in the catalog maps to a
//! [`ParameterSchema`]: the field names a node's `parameters` object must
//! (or may) carry, and the kind of JSON value each field holds.
//!
//! Two kinds of string value are *deferred* and satisfy any value kind:
//! sanitizer placeholders (`{{ … }}`) and runtime expressions (leading `=`).
//! Their real value is only known once the workflow runs or is configured.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::CatalogError;

// ---------------------------------------------------------------------------
// SchemaVersion
// ---------------------------------------------------------------------------

/// Parameter-shape revision a node was authored against.
///
/// Accepts integers (`2`), decimal numbers (`2.1`) and semver strings
/// (`"2.1.0"`) on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub const fn major(major: u32) -> Self {
        Self::new(major, 0, 0)
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::major(1)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.minor, self.patch) {
            (0, 0) => write!(f, "{}", self.major),
            (minor, 0) => write!(f, "{}.{minor}", self.major),
            (minor, patch) => write!(f, "{}.{minor}.{patch}", self.major),
        }
    }
}

impl FromStr for SchemaVersion {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CatalogError::InvalidVersion(s.to_owned());
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u32, CatalogError> {
            match parts.next() {
                Some(p) => p.parse::<u32>().map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        let version = Self::new(next(true)?, next(false)?, next(false)?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl Serialize for SchemaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match (self.minor, self.patch) {
            (0, 0) => serializer.serialize_u32(self.major),
            // Only when the number prints back as the same version:
            // 2.10 would come back as 2.1.
            (_, 0) => {
                let text = self.to_string();
                match text.parse::<f64>() {
                    Ok(n) if n.to_string() == text => serializer.serialize_f64(n),
                    _ => serializer.collect_str(self),
                }
            }
            _ => serializer.collect_str(self),
        }
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(serde_json::Number),
            Text(String),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Number(n) => n.to_string(),
            Raw::Text(s) => s,
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Value kinds and deferred values
// ---------------------------------------------------------------------------

/// The JSON value kind a parameter field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ValueKind {
    /// Whether `value` satisfies this kind. Deferred values satisfy every kind.
    pub fn accepts(self, value: &Value) -> bool {
        if is_deferred(value) {
            return true;
        }
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// `{{ … }}` as written by the template sanitizer and by repair.
pub fn is_placeholder(s: &str) -> bool {
    let t = s.trim();
    t.len() >= 4 && t.starts_with("{{") && t.ends_with("}}")
}

/// A placeholder or a runtime expression.
pub fn is_deferred(value: &Value) -> bool {
    match value.as_str() {
        Some(s) => is_placeholder(s) || s.starts_with('='),
        None => false,
    }
}

/// The value repair writes into a required field it cannot derive.
pub fn configure_placeholder(field: &str) -> Value {
    Value::String(format!("{{{{ configure: {field} }}}}"))
}

/// Flag-style parameter check: `true`, or any non-empty string except `"none"`.
pub(crate) fn is_enabled(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty() && s != "none",
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

/// One field of a parameter schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: ValueKind,
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: &str, kind: ValueKind) -> Self {
        Self { name: name.to_owned(), kind, required: true }
    }

    pub fn optional(name: &str, kind: ValueKind) -> Self {
        Self { name: name.to_owned(), kind, required: false }
    }
}

/// Required parameter shape for one schema version of a node kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub version: SchemaVersion,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl ParameterSchema {
    pub fn new(version: SchemaVersion, fields: Vec<FieldSpec>) -> Self {
        Self { version, fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Missing required fields and ill-typed fields, in schema order.
    ///
    /// `null` counts as absent.
    pub fn violations(&self, parameters: &Map<String, Value>) -> Vec<ShapeViolation> {
        let mut out = Vec::new();
        for field in &self.fields {
            match parameters.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        out.push(ShapeViolation::MissingField { field: field.name.clone() });
                    }
                }
                Some(value) if !field.kind.accepts(value) => {
                    out.push(ShapeViolation::WrongKind {
                        field: field.name.clone(),
                        expected: field.kind,
                    });
                }
                Some(_) => {}
            }
        }
        out
    }

    /// Human-readable shape, e.g. `{url: string, headers?: object}`.
    pub fn describe(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|f| {
                let marker = if f.required { "" } else { "?" };
                format!("{}{marker}: {}", f.name, f.kind)
            })
            .collect();
        format!("{{{}}}", fields.join(", "))
    }

    /// A parameters object with every required field set to a
    /// configure placeholder.
    pub fn placeholder_parameters(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| (f.name.clone(), configure_placeholder(&f.name)))
            .collect()
    }
}

/// Field rename applied when upgrading parameters to a newer schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRename {
    pub from: String,
    pub to: String,
}

impl FieldRename {
    pub fn new(from: &str, to: &str) -> Self {
        Self { from: from.to_owned(), to: to.to_owned() }
    }
}

/// One way a parameters object fails to match its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeViolation {
    MissingField { field: String },
    WrongKind { field: String, expected: ValueKind },
    /// Field belongs to an older schema version of the same kind.
    StaleField { field: String },
}

impl fmt::Display for ShapeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "missing required field '{field}'"),
            Self::WrongKind { field, expected } => {
                write!(f, "field '{field}' should be {expected}")
            }
            Self::StaleField { field } => write!(f, "stale field '{field}' from an older version"),
        }
    }
}
