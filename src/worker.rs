//! Worker capability - the collaborator that actually produces artifacts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::node::NodeHandle;

/// Current version of the worker report schema
pub const WORKER_REPORT_VERSION: u32 = 1;

/// What a worker says it did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Whether an artifact was submitted during the invocation
    pub wrote_artifact: bool,
    /// Free-form result, kept for diagnostics only
    #[serde(default)]
    pub raw_result: serde_json::Value,
}

fn default_version() -> u32 {
    WORKER_REPORT_VERSION
}

impl WorkerReport {
    pub fn written(raw_result: serde_json::Value) -> Self {
        Self {
            version: WORKER_REPORT_VERSION,
            wrote_artifact: true,
            raw_result,
        }
    }

    pub fn nothing_written() -> Self {
        Self {
            version: WORKER_REPORT_VERSION,
            wrote_artifact: false,
            raw_result: serde_json::Value::Null,
        }
    }

    /// Parse a report, treating anything malformed as "nothing written"
    ///
    /// Unknown fields are ignored.
    pub fn from_value(value: serde_json::Value) -> Self {
        match serde_json::from_value::<WorkerReport>(value.clone()) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Malformed worker report");
                Self {
                    raw_result: value,
                    ..Self::nothing_written()
                }
            }
        }
    }
}

/// Produces an artifact (and usually a test) for a node
#[async_trait]
pub trait Worker: Send + Sync {
    /// Work on `task` for `node` within `step_budget` steps
    ///
    /// Errors are absorbed by the caller and recorded as failed attempts.
    async fn invoke(
        &self,
        node: &NodeHandle,
        task: &str,
        step_budget: u32,
    ) -> anyhow::Result<WorkerReport>;
}
