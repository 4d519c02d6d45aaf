//! Burrow error types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that surface from tree and workspace operations
///
/// Worker and validation failures never show up here; they are absorbed into
/// attempt records and execution outcomes (see [`FailureKind`]).
#[derive(Debug, Error)]
pub enum BurrowError {
    /// Refused to create a node below the configured depth limit
    #[error("Depth exceeded: child at depth {depth} would exceed max depth {max_depth}")]
    DepthExceeded { depth: u32, max_depth: u32 },

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Workspace storage error
    #[error("Workspace error at {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BurrowError {
    pub(crate) fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }
}

/// Failures absorbed by the retry loop and recorded on attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The worker returned an error
    WorkerInvocation,
    /// The worker finished without writing an artifact
    MissingArtifact,
    /// Validation exceeded its wall-clock budget
    ValidationTimeout,
    /// Validation could not be run (spawn or I/O fault)
    ValidationFault,
    /// Validation ran and the tests failed
    TestsFailed,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::WorkerInvocation => "worker error",
            Self::MissingArtifact => "missing artifact",
            Self::ValidationTimeout => "validation timeout",
            Self::ValidationFault => "validation fault",
            Self::TestsFailed => "tests failed",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_exceeded_message() {
        let err = BurrowError::DepthExceeded { depth: 6, max_depth: 5 };
        assert_eq!(
            err.to_string(),
            "Depth exceeded: child at depth 6 would exceed max depth 5"
        );
    }

    #[test]
    fn test_failure_kind_serde() {
        let json = serde_json::to_string(&FailureKind::MissingArtifact).unwrap();
        assert_eq!(json, "\"missing_artifact\"");
        let back: FailureKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FailureKind::MissingArtifact);
    }
}
