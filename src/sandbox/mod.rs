//! Sandboxed validation of node artifacts
//!
//! ```text
//!   node workspace ──materialize──▶ real dir
//!                                      │
//!                    ValidationCommand │ cwd = dir, TMPDIR = dir,
//!                                      │ own process group
//!                                      ▼
//!                              run_with_timeout ──▶ ExecutionOutcome
//!                                                        │
//!                                    test_results.json ◀─┘
//! ```

mod group;

pub use group::{run_with_timeout, ProcessGroup, RunOutput};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::BurrowConfig;
use crate::error::FailureKind;
use crate::events::{EventSink, TreeEvent};
use crate::node::{Node, NodeHandle};
use crate::tree::TaskTree;
use crate::workspace::{NodeLog, WorkspaceKey, WorkspaceStore};

/// Result of one validation or snippet run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Whether a test file existed
    pub tests_found: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub return_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
    /// The command could not be run at all
    #[serde(default)]
    pub runner_fault: bool,
}

impl ExecutionOutcome {
    /// Nothing to run; counts as success
    pub fn no_tests() -> Self {
        Self {
            success: true,
            tests_found: false,
            stdout: String::new(),
            stderr: String::new(),
            return_code: None,
            timed_out: false,
            runner_fault: false,
        }
    }

    pub fn timed_out(secs: u64) -> Self {
        Self {
            success: false,
            tests_found: true,
            stdout: String::new(),
            stderr: format!("timed out after {secs}s"),
            return_code: None,
            timed_out: true,
            runner_fault: false,
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            success: false,
            tests_found: true,
            stdout: String::new(),
            stderr: message.into(),
            return_code: None,
            timed_out: false,
            runner_fault: true,
        }
    }

    fn finished(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            tests_found: true,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            return_code: output.status.code(),
            timed_out: false,
            runner_fault: false,
        }
    }

    /// Combined stdout and stderr
    pub fn test_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }

    /// How a failed run should be recorded
    pub fn failure_kind(&self) -> Option<FailureKind> {
        if self.success {
            None
        } else if self.runner_fault {
            Some(FailureKind::ValidationFault)
        } else if self.timed_out {
            Some(FailureKind::ValidationTimeout)
        } else {
            Some(FailureKind::TestsFailed)
        }
    }
}

/// Validates a node's artifact
#[async_trait]
pub trait Validator: Send + Sync {
    /// Run the node's tests; never fails, faults are reported in the outcome
    async fn validate(&self, node: &NodeHandle) -> ExecutionOutcome;
}

/// Runs validation commands as child processes
///
/// Each run gets the node workspace as its working directory and `TMPDIR`,
/// and its own process group, which is killed once the run ends. There is no
/// filesystem or network isolation: the command runs with the caller's
/// permissions and can write anywhere they allow.
pub struct SandboxRunner {
    store: Arc<dyn WorkspaceStore>,
    config: Arc<BurrowConfig>,
    events: EventSink,
}

impl SandboxRunner {
    pub fn new(store: Arc<dyn WorkspaceStore>, config: Arc<BurrowConfig>) -> Self {
        Self {
            store,
            config,
            events: EventSink::disconnected(),
        }
    }

    /// Runner sharing the tree's store, configuration and event sink
    pub fn for_tree(tree: &TaskTree) -> Self {
        Self::new(tree.store().clone(), Arc::new(tree.config().clone()))
            .with_events(tree.events().clone())
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Run the node's test file with the configured command
    #[instrument(skip(self, node), fields(node = %node.path))]
    pub async fn run_validation(&self, node: &Node) -> ExecutionOutcome {
        let log = NodeLog::new(self.store.as_ref(), &node.workspace, &node.path);
        let layout = self.store.layout();

        let outcome = if !self.store.contains(&node.workspace, WorkspaceKey::Test) {
            log.warn(&format!("No {} found, skipping tests", layout.test));
            ExecutionOutcome::no_tests()
        } else {
            let limit = self.config.validation_timeout(node.timeout_secs);
            log.info(&format!("Running tests on {} (timeout: {limit}s)", layout.test));
            let outcome = self.execute_tests(node, limit).await;
            if outcome.success {
                log.info("All tests passed");
            } else if outcome.timed_out {
                log.error(&format!("Testing timed out after {limit}s"));
            } else if outcome.runner_fault {
                log.error(&format!("Error running tests: {}", outcome.stderr));
            } else {
                log.error(&format!(
                    "Tests failed with return code {}",
                    outcome.return_code.map_or_else(|| "none".to_string(), |c| c.to_string())
                ));
                log.error(&format!("Test output:\n{}", outcome.test_output()));
            }
            outcome
        };

        self.persist(node, &outcome);
        self.events.emit(TreeEvent::ValidationFinished {
            path: node.path.clone(),
            success: outcome.success,
            tests_found: outcome.tests_found,
            timed_out: outcome.timed_out,
        });
        outcome
    }

    async fn execute_tests(&self, node: &Node, limit: u64) -> ExecutionOutcome {
        let dir = match self.store.materialize(&node.workspace) {
            Ok(dir) => dir,
            Err(e) => return ExecutionOutcome::fault(e.to_string()),
        };
        let layout = self.store.layout();
        let command = &self.config.validation.command;
        let args = command.render_args(&dir.join(&layout.test), &dir.join(&layout.artifact), &dir);

        let mut cmd = Command::new(&command.program);
        cmd.args(&args).current_dir(&dir).env("TMPDIR", &dir);
        debug!(program = %command.program, ?args, "Spawning validation");

        run_bounded(cmd, &command.program, limit).await
    }

    /// Run an ad-hoc piece of code in the node's workspace
    ///
    /// The code is written to a temporary file, executed with the configured
    /// interpreter under the node's timeout and removed afterwards.
    #[instrument(skip(self, node, code), fields(node = %node.path))]
    pub async fn run_snippet(&self, node: &Node, code: &str) -> ExecutionOutcome {
        let log = NodeLog::new(self.store.as_ref(), &node.workspace, &node.path);
        let dir = match self.store.materialize(&node.workspace) {
            Ok(dir) => dir,
            Err(e) => return ExecutionOutcome::fault(e.to_string()),
        };

        let validation = &self.config.validation;
        let script = dir.join(format!(
            "_snippet_{}.{}",
            Uuid::new_v4().simple(),
            validation.snippet_extension
        ));
        if let Err(e) = tokio::fs::write(&script, code).await {
            log.error(&format!("Error executing code: {e}"));
            return ExecutionOutcome::fault(e.to_string());
        }

        log.debug(&format!("Executing code with {}s timeout", node.timeout_secs));
        let mut cmd = Command::new(&validation.interpreter);
        cmd.arg(&script).current_dir(&dir).env("TMPDIR", &dir);
        let mut outcome = run_bounded(cmd, &validation.interpreter, node.timeout_secs).await;
        outcome.tests_found = false;

        remove_quietly(&script).await;
        if outcome.timed_out {
            log.error(&format!("Code execution timed out after {}s", node.timeout_secs));
        } else if outcome.runner_fault {
            log.error(&format!("Error executing code: {}", outcome.stderr));
        }
        outcome
    }

    fn persist(&self, node: &Node, outcome: &ExecutionOutcome) {
        let written = serde_json::to_string_pretty(outcome)
            .map_err(crate::error::BurrowError::from)
            .and_then(|json| self.store.write(&node.workspace, WorkspaceKey::TestResult, &json));
        if let Err(e) = written {
            warn!(node = %node.path, error = %e, "Failed to persist validation result");
        }
    }
}

#[async_trait]
impl Validator for SandboxRunner {
    async fn validate(&self, node: &NodeHandle) -> ExecutionOutcome {
        self.run_validation(node).await
    }
}

async fn run_bounded(cmd: Command, program: &str, limit: u64) -> ExecutionOutcome {
    match run_with_timeout(cmd, Duration::from_secs(limit)).await {
        Ok(RunOutput::Finished(output)) => ExecutionOutcome::finished(output),
        Ok(RunOutput::TimedOut) => ExecutionOutcome::timed_out(limit),
        Err(e) => ExecutionOutcome::fault(format!("failed to run {program}: {e}")),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "Could not remove snippet file");
    }
}
