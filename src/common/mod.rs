//! Shared types used across the consensus engine and its collaborators.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable opaque identifier for a cluster member.
///
/// Total order is lexicographic on the inner string. Sort order is never
/// renegotiated mid-run, so this is sufficient for the topology manager's
/// "always sorted by NodeId ascending" contract.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}
