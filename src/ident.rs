//! Node identifiers and paths

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical, filesystem-safe node identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap an id that is already canonical (e.g. read back from disk)
    pub fn from_canonical(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Map a free-form name to a node id
///
/// Lower-cases, replaces anything outside `[a-z0-9_]` with `_`, then prepends
/// `prefix`. The prefix is added on every call, so canonicalize a logical name
/// exactly once and keep the result.
pub fn canonicalize(name: &str, prefix: &str) -> NodeId {
    let safe: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    NodeId(format!("{prefix}{safe}"))
}

/// Chain of ids from the root to a node; the root's path is empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(Vec<NodeId>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, id: NodeId) -> Self {
        let mut segments = self.0.clone();
        segments.push(id);
        Self(segments)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[NodeId] {
        &self.0
    }

    pub fn last(&self) -> Option<&NodeId> {
        self.0.last()
    }

    /// Whether `self` equals `other` or lies below it
    pub fn starts_with(&self, other: &NodePath) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for id in &self.0 {
            write!(f, "/{id}")?;
        }
        Ok(())
    }
}
