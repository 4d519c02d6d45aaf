//! Failure diagnostics and progress reports for a node

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::history::{truncate, AttemptRecord};
use crate::ident::NodePath;
use crate::node::{NodeHandle, NodeStatus};
use crate::sandbox::{ExecutionOutcome, Validator};
use crate::tree::TaskTree;
use crate::workspace::WorkspaceKey;

const SUMMARY_CHARS: usize = 500;

/// Everything a parent needs to decide how to retry a child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsBundle {
    pub path: NodePath,
    pub status: NodeStatus,
    pub task: Option<String>,
    pub artifact: Option<String>,
    pub test: Option<String>,
    pub dependencies: Option<String>,
    pub errors: Option<String>,
    /// Fresh validation run
    pub validation: ExecutionOutcome,
    /// Most recent attempts, oldest first
    pub recent_attempts: Vec<AttemptRecord>,
    pub total_attempts: u32,
}

/// Gather diagnostics, re-running validation
#[instrument(skip(tree, validator, node), fields(node = %node.path))]
pub async fn collect(
    tree: &TaskTree,
    validator: &dyn Validator,
    node: &NodeHandle,
) -> DiagnosticsBundle {
    let validation = validator.validate(node).await;
    let store = tree.store();
    let dir = &node.workspace;
    let registry = tree.registry();

    DiagnosticsBundle {
        path: node.path.clone(),
        status: node.status(),
        task: store.read(dir, WorkspaceKey::Task),
        artifact: store.read(dir, WorkspaceKey::Artifact),
        test: store.read(dir, WorkspaceKey::Test),
        dependencies: store.read(dir, WorkspaceKey::Dependencies),
        errors: store.read(dir, WorkspaceKey::Errors),
        validation,
        recent_attempts: registry.recent_attempts(&node.path, tree.config().history_window),
        total_attempts: registry.attempt_total(&node.path),
    }
}

/// Lightweight view of a node's workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub path: NodePath,
    pub workspace: PathBuf,
    pub status: NodeStatus,
    pub artifact_exists: bool,
    pub tests_exist: bool,
    pub has_errors: bool,
    /// Start of the error stream
    pub error_summary: String,
    /// End of the log stream
    pub log_summary: String,
}

/// Summarize a node without running anything
pub fn progress(tree: &TaskTree, node: &NodeHandle) -> ProgressReport {
    let store = tree.store();
    let dir = &node.workspace;
    let errors = store.read(dir, WorkspaceKey::Errors).unwrap_or_default();
    let log = store.read(dir, WorkspaceKey::Log).unwrap_or_default();

    ProgressReport {
        path: node.path.clone(),
        workspace: dir.clone(),
        status: node.status(),
        artifact_exists: store.contains(dir, WorkspaceKey::Artifact),
        tests_exist: store.contains(dir, WorkspaceKey::Test),
        has_errors: !errors.trim().is_empty(),
        error_summary: truncate(&errors, SUMMARY_CHARS),
        log_summary: tail(&log, SUMMARY_CHARS),
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let skip = text.chars().count().saturating_sub(max_chars);
    text.chars().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BurrowConfig;
    use crate::history::AttemptDraft;
    use crate::tree::ChildSpec;
    use crate::workspace::{MemoryWorkspace, WorkspaceStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingValidator(AtomicUsize);

    #[async_trait]
    impl Validator for CountingValidator {
        async fn validate(&self, _node: &NodeHandle) -> ExecutionOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            ExecutionOutcome::no_tests()
        }
    }

    fn tree() -> TaskTree {
        let store: Arc<dyn WorkspaceStore> = Arc::new(MemoryWorkspace::default());
        let config = BurrowConfig {
            history_window: 2,
            ..Default::default()
        };
        TaskTree::create(config, store, "/r", Some("root task")).unwrap()
    }

    #[tokio::test]
    async fn test_collect_gathers_workspace_and_history() {
        let tree = tree();
        let child = tree.create_child(tree.root(), ChildSpec::new("a", "do a")).unwrap();
        tree.submit(&child, "def a(): pass", None).unwrap();
        tree.logger(&child).error("kaboom");
        for _ in 0..3 {
            tree.registry().record_attempt(&child.path, AttemptDraft::default());
        }
        let validator = CountingValidator(AtomicUsize::new(0));

        let bundle = collect(&tree, &validator, &child).await;

        assert_eq!(validator.0.load(Ordering::SeqCst), 1);
        assert_eq!(bundle.artifact.as_deref(), Some("def a(): pass"));
        assert!(bundle.test.is_none());
        assert!(bundle.task.unwrap().starts_with("Task: do a"));
        assert!(bundle.errors.unwrap().contains("kaboom"));
        assert_eq!(bundle.total_attempts, 3);
        let numbers: Vec<u32> = bundle.recent_attempts.iter().map(|r| r.attempt_number).collect();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[test]
    fn test_progress_summaries() {
        let tree = tree();
        let child = tree.create_child(tree.root(), ChildSpec::new("a", "x")).unwrap();

        let fresh = progress(&tree, &child);
        assert!(!fresh.artifact_exists);
        assert!(!fresh.has_errors);

        let log = tree.logger(&child);
        for i in 0..100 {
            log.info(&format!("step {i}"));
        }
        log.error("first failure");
        tree.submit(&child, "x", Some("t")).unwrap();

        let report = progress(&tree, &child);
        assert!(report.artifact_exists);
        assert!(report.tests_exist);
        assert!(report.has_errors);
        assert!(report.error_summary.contains("first failure"));
        assert_eq!(report.log_summary.chars().count(), 500);
        assert!(report.log_summary.trim_end().ends_with("Saved test"));
    }

    #[test]
    fn test_tail_is_char_safe() {
        assert_eq!(tail("héllo", 3), "llo");
        assert_eq!(tail("hi", 10), "hi");
    }
}
