//! Edge channels.
//!
//! The primary channel (`main`) carries ordinary data flow and is the only
//! channel with more than one output slot per node. Every other channel
//! carries a capability attachment (`capability:model`, `capability:tool`, …)
//! from a provider node to an orchestrator node.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire name of the primary data-flow channel.
pub const PRIMARY: &str = "main";

/// Prefix shared by every capability channel name.
pub const CAPABILITY_PREFIX: &str = "capability:";

/// A named edge category.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The primary data-flow channel.
    pub fn primary() -> Self {
        Self(PRIMARY.to_owned())
    }

    /// A capability channel, e.g. `Channel::capability("model")`.
    pub fn capability(kind: &str) -> Self {
        Self(format!("{CAPABILITY_PREFIX}{kind}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_primary(&self) -> bool {
        self.0 == PRIMARY
    }

    /// The capability name without the channel prefix (`"model"` for
    /// `capability:model`). `None` for the primary channel.
    pub fn capability_name(&self) -> Option<&str> {
        if self.is_primary() {
            return None;
        }
        Some(self.0.strip_prefix(CAPABILITY_PREFIX).unwrap_or(&self.0))
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::primary()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Channel {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_channel_has_no_capability_name() {
        assert!(Channel::primary().is_primary());
        assert_eq!(Channel::primary().capability_name(), None);
    }

    #[test]
    fn capability_channel_strips_prefix() {
        let ch = Channel::capability("memory");
        assert_eq!(ch.as_str(), "capability:memory");
        assert_eq!(ch.capability_name(), Some("memory"));
        assert!(!ch.is_primary());
    }

    #[test]
    fn serializes_as_bare_string() {
        let json = serde_json::to_string(&Channel::capability("tool")).unwrap();
        assert_eq!(json, "\"capability:tool\"");
        let back: Channel = serde_json::from_str("\"main\"").unwrap();
        assert!(back.is_primary());
    }
}
