//! Retry orchestrator - re-invokes a failing node with accumulated feedback
//!
//! ```text
//!  ┌──────────▶ Diagnosing ──▶ Composing ──▶ Invoking ──▶ Recording
//!  │                                                        │
//!  └────────────── Retrying ◀────────── failed, budget left ┤
//!                                                           ├──▶ Succeeded
//!                                                           └──▶ Exhausted
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::diagnostics::{self, DiagnosticsBundle};
use crate::error::{BurrowError, FailureKind};
use crate::events::TreeEvent;
use crate::history::{truncate, AttemptDraft, AttemptRecord};
use crate::node::{NodeHandle, NodeStatus};
use crate::sandbox::{ExecutionOutcome, SandboxRunner, Validator};
use crate::tree::TaskTree;
use crate::worker::Worker;
use crate::workspace::WorkspaceKey;

const ARTIFACT_SNIPPET_CHARS: usize = 2000;
const OUTPUT_SNIPPET_CHARS: usize = 2000;
const ERROR_SNIPPET_CHARS: usize = 1000;

const SUBMIT_DIRECTIVE: &str = "Produce a corrected artifact and a matching test file, \
then submit both. Address every failure listed above before submitting.";

/// Phase of a retry session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Diagnosing,
    Composing,
    Invoking,
    Recording,
    Retrying,
    Succeeded,
    Exhausted,
}

/// How a retry session ended
#[derive(Debug, Clone)]
pub enum RetryOutcome {
    Succeeded {
        attempts_used: u32,
        outcome: ExecutionOutcome,
    },
    Exhausted {
        attempts_used: u32,
        diagnostics: Box<DiagnosticsBundle>,
    },
}

impl RetryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded { .. })
    }

    pub fn attempts_used(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts_used, .. }
            | RetryOutcome::Exhausted { attempts_used, .. } => *attempts_used,
        }
    }
}

/// Drives bounded retries of nodes in a tree
pub struct RetryOrchestrator {
    tree: Arc<TaskTree>,
    worker: Arc<dyn Worker>,
    validator: Arc<dyn Validator>,
}

impl RetryOrchestrator {
    pub fn new(
        tree: Arc<TaskTree>,
        worker: Arc<dyn Worker>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        Self { tree, worker, validator }
    }

    /// Orchestrator validating through a [`SandboxRunner`] on the tree's store
    pub fn with_sandbox(tree: Arc<TaskTree>, worker: Arc<dyn Worker>) -> Self {
        let validator = Arc::new(SandboxRunner::for_tree(&tree));
        Self::new(tree, worker, validator)
    }

    pub fn tree(&self) -> &Arc<TaskTree> {
        &self.tree
    }

    /// Retry the child of `parent` called `name`
    pub async fn retry_child(
        &self,
        parent: &NodeHandle,
        name: &str,
        revised_instructions: &str,
    ) -> Result<RetryOutcome, BurrowError> {
        let child = self
            .tree
            .resolve(parent, name)
            .ok_or_else(|| BurrowError::NodeNotFound(format!("{}/{name}", parent.path)))?;
        self.retry(&child, revised_instructions).await
    }

    /// Run up to `max_retries` feedback-augmented invocations of `node`
    #[instrument(
        skip(self, node, revised_instructions),
        fields(node = %node.path, max_retries = node.max_retries)
    )]
    pub async fn retry(
        &self,
        node: &NodeHandle,
        revised_instructions: &str,
    ) -> Result<RetryOutcome, BurrowError> {
        if node.status() == NodeStatus::Destroyed {
            return Err(BurrowError::NodeNotFound(node.path.to_string()));
        }

        let config = self.tree.config();
        let store = self.tree.store();
        let registry = self.tree.registry();
        let log = self.tree.logger(node);

        for attempt in 1..=node.max_retries {
            transition(node, attempt, RetryState::Diagnosing);
            let history = registry.recent_attempts(&node.path, config.history_window);
            let original = self.tree.task(node).unwrap_or_default();

            transition(node, attempt, RetryState::Composing);
            let task = compose_retry_task(&original, &history, revised_instructions);

            if let Err(e) = store.clear(&node.workspace, WorkspaceKey::Errors) {
                log.warn(&format!("Could not clear previous errors: {e}"));
            }
            node.set_status(NodeStatus::Running);
            log.info(&format!("Retry attempt {attempt} of {}", node.max_retries));

            transition(node, attempt, RetryState::Invoking);
            let invoked = self.worker.invoke(node, &task, config.step_budget).await;
            let (draft, outcome) = match invoked {
                Err(e) => {
                    let message = format!("{e:#}");
                    log.error(&format!("Worker error: {message}"));
                    (AttemptDraft::failed(task, FailureKind::WorkerInvocation, message), None)
                }
                Ok(report) if !report.wrote_artifact => {
                    log.error("Worker finished without writing an artifact");
                    let message = "worker finished without writing an artifact";
                    (AttemptDraft::failed(task, FailureKind::MissingArtifact, message), None)
                }
                Ok(_) => {
                    let outcome = self.validator.validate(node).await;
                    let error_excerpt = if outcome.success {
                        String::new()
                    } else {
                        store
                            .read(&node.workspace, WorkspaceKey::Errors)
                            .filter(|e| !e.trim().is_empty())
                            .unwrap_or_else(|| outcome.stderr.clone())
                    };
                    let draft = AttemptDraft {
                        prompt: task,
                        artifact: store.read(&node.workspace, WorkspaceKey::Artifact),
                        test_output: outcome.tests_found.then(|| outcome.test_output()),
                        test_succeeded: outcome.success,
                        error_excerpt,
                        failure: outcome.failure_kind(),
                    };
                    (draft, Some(outcome))
                }
            };

            transition(node, attempt, RetryState::Recording);
            let record = registry.record_attempt(&node.path, draft);
            self.tree.events().emit(TreeEvent::AttemptRecorded {
                path: node.path.clone(),
                attempt_number: record.attempt_number,
                succeeded: record.test_succeeded,
            });

            if let Some(outcome) = outcome.filter(|o| o.success) {
                transition(node, attempt, RetryState::Succeeded);
                node.set_status(NodeStatus::Succeeded);
                log.info(&format!("Attempt {} succeeded", record.attempt_number));
                self.finish(node, true, attempt);
                return Ok(RetryOutcome::Succeeded {
                    attempts_used: attempt,
                    outcome,
                });
            }

            log.warn(&format!(
                "Attempt {} failed: {}",
                record.attempt_number,
                record.summary_line()
            ));
            if attempt < node.max_retries {
                transition(node, attempt, RetryState::Retrying);
            }
        }

        transition(node, node.max_retries, RetryState::Exhausted);
        node.set_status(NodeStatus::Failed);
        log.critical(&format!("Retries exhausted after {} attempts", node.max_retries));
        let bundle = diagnostics::collect(&self.tree, self.validator.as_ref(), node).await;
        self.finish(node, false, node.max_retries);

        Ok(RetryOutcome::Exhausted {
            attempts_used: node.max_retries,
            diagnostics: Box::new(bundle),
        })
    }

    /// Fresh diagnostics for `node`
    pub async fn diagnostics(&self, node: &NodeHandle) -> DiagnosticsBundle {
        diagnostics::collect(&self.tree, self.validator.as_ref(), node).await
    }

    /// Every retained attempt of `node`, oldest first
    pub fn history(&self, node: &NodeHandle) -> Vec<AttemptRecord> {
        self.tree.registry().attempts(&node.path)
    }

    fn finish(&self, node: &NodeHandle, succeeded: bool, attempts_used: u32) {
        if succeeded {
            info!(node = %node.path, attempts_used, "Retry session succeeded");
        } else {
            warn!(node = %node.path, attempts_used, "Retry session exhausted");
        }
        self.tree.events().emit(TreeEvent::RetryFinished {
            path: node.path.clone(),
            succeeded,
            attempts_used,
        });
    }
}

fn transition(node: &NodeHandle, attempt: u32, state: RetryState) {
    debug!(node = %node.path, attempt, ?state, "Retry state");
}

/// Build the task handed to the worker on a retry
///
/// Sections, in order: the original task, the most recent attempt in
/// detail, a one-line summary of each earlier attempt when there is more
/// than one, the revised instructions and the submission directive.
pub fn compose_retry_task(
    original: &str,
    history: &[AttemptRecord],
    revised_instructions: &str,
) -> String {
    let mut out = String::from(original.trim_end());
    out.push_str("\n\n");

    if let Some(last) = history.last() {
        let _ = writeln!(
            out,
            "## Previous attempt #{} ({})",
            last.attempt_number,
            last.status_tag()
        );
        if let Some(artifact) = last.artifact_produced.as_deref().filter(|a| !a.trim().is_empty()) {
            let _ = writeln!(
                out,
                "### Artifact\n```\n{}\n```",
                truncate(artifact, ARTIFACT_SNIPPET_CHARS)
            );
        }
        if !last.test_succeeded {
            if let Some(output) = last.test_output.as_deref().filter(|o| !o.trim().is_empty()) {
                let _ = writeln!(
                    out,
                    "### Test output\n```\n{}\n```",
                    truncate(output, OUTPUT_SNIPPET_CHARS)
                );
            }
        }
        let error = match (&last.failure, last.error_excerpt.trim()) {
            (_, e) if !e.is_empty() => Some(e.to_string()),
            (Some(kind), _) => Some(kind.label().to_string()),
            _ => None,
        };
        if let Some(error) = error {
            let _ = writeln!(out, "### Errors\n{}", truncate(&error, ERROR_SNIPPET_CHARS));
        }
        out.push('\n');
    }

    if history.len() > 1 {
        out.push_str("## Attempt history\n");
        for record in history {
            let _ = writeln!(out, "- {}", record.summary_line());
        }
        out.push('\n');
    }

    if !revised_instructions.trim().is_empty() {
        let _ = writeln!(out, "## Revised instructions\n{}\n", revised_instructions.trim());
    }
    out.push_str(SUBMIT_DIRECTIVE);
    out.push('\n');
    out
}
