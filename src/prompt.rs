//! Prompt templates handed to workers

use std::path::Path;

use crate::config::WorkspaceLayout;
use crate::node::Node;

/// Task text stored for a freshly created child
pub fn child_brief(
    task: &str,
    parent_dir: &Path,
    layout: &WorkspaceLayout,
    prefix: &str,
) -> String {
    format!(
        "Task: {task}

## Instructions:
- This is a subtask of a larger decomposition
- Your artifact will be called by the parent node
- Document every public function, its parameters and its return type
- Write tests in {test}
- List non-standard dependencies in {deps} (one per line)
- Log activity to {log} and errors to {errors}
- If this task needs further decomposition, create child nodes in {prefix}<name>/ folders

## Parent Context:
- Parent task is at: {parent}
- Your artifact should integrate with the parent's artifact
- Return types must be explicitly documented
",
        test = layout.test,
        deps = layout.dependencies,
        log = layout.log,
        errors = layout.errors,
        parent = parent_dir.display(),
    )
}

/// Operating brief for the worker acting on `node`
pub fn system_prompt(node: &Node, layout: &WorkspaceLayout, prefix: &str) -> String {
    format!(
        "You are a recursive task node that decomposes tasks into subtasks and produces artifacts.

## Core principles:
1. Task decomposition: break the task into logically distinct subtasks
2. Artifact: write the artifact for the current level in {artifact}
3. Testing: write tests for it in {test} and make them pass
4. Error reporting: record errors in {errors} for the parent to review
5. Child nodes: delegate subtasks that are too complex to children named {prefix}<name>
6. Dependencies: list non-standard dependencies in {deps}, one per line

## Retry protocol:
When a child fails, read its diagnostics (artifact, test output, errors and attempt
history), find the root cause, then retry it with revised instructions. The retry
feeds the child its previous artifact, test output and error history. When retries
are exhausted, reset the child with a new task (history is kept), absorb the subtask
into this level, or decompose differently. Never accept a failing child silently.

## Execution:
- Timeout: {timeout} seconds
- Max retries: {retries}
- Recursion depth: {depth} of {max_depth}

Do not ask for clarification; proceed with decomposition and implementation.",
        artifact = layout.artifact,
        test = layout.test,
        errors = layout.errors,
        deps = layout.dependencies,
        timeout = node.timeout_secs,
        retries = node.max_retries,
        depth = node.depth,
        max_depth = node.max_depth,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{NodeId, NodePath};
    use crate::node::NodeMeta;
    use std::path::PathBuf;

    #[test]
    fn test_child_brief_wraps_task() {
        let brief = child_brief(
            "parse the csv",
            Path::new("/agents/root"),
            &WorkspaceLayout::default(),
            "task_",
        );
        assert!(brief.starts_with("Task: parse the csv\n"));
        assert!(brief.contains("Parent task is at: /agents/root"));
        assert!(brief.contains("task_<name>/"));
        assert!(brief.contains("requirements.txt"));
    }

    #[test]
    fn test_system_prompt_carries_limits() {
        let meta = NodeMeta {
            id: NodeId::from_canonical("root"),
            depth: 1,
            timeout_secs: 150,
            max_retries: 4,
            max_depth: 5,
            created_at: None,
        };
        let node = Node::new(&meta, NodePath::root(), PathBuf::from("/w"), None);
        let prompt = system_prompt(&node, &WorkspaceLayout::default(), "task_");

        assert!(prompt.contains("Timeout: 150 seconds"));
        assert!(prompt.contains("Max retries: 4"));
        assert!(prompt.contains("Recursion depth: 1 of 5"));
        assert!(prompt.contains("children named task_<name>"));
    }
}
