//! Dependency list aggregation across a subtree

use std::collections::HashSet;

use crate::error::BurrowError;
use crate::hierarchy;
use crate::node::NodeHandle;
use crate::tree::TaskTree;
use crate::workspace::WorkspaceKey;

/// Entries of a dependency list; blank and `#` lines are skipped
pub fn parse_dependencies(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Dependencies declared by the descendants of `node`
///
/// Depth-first pre-order, children in creation order, first occurrence wins.
pub fn collect_subtree(tree: &TaskTree, node: &NodeHandle) -> Vec<String> {
    let mut seen = HashSet::new();
    hierarchy::descendants(node)
        .iter()
        .flat_map(|n| read_list(tree, n))
        .filter(|dep| seen.insert(dep.clone()))
        .collect()
}

/// Merge the subtree's dependencies into `node`'s own list
///
/// With `include_self` the node's existing entries come first. The list is
/// only written back when the merge is non-empty.
pub fn merge_subtree(
    tree: &TaskTree,
    node: &NodeHandle,
    include_self: bool,
) -> Result<Vec<String>, BurrowError> {
    let own = if include_self { read_list(tree, node) } else { Vec::new() };

    let mut seen = HashSet::new();
    let merged: Vec<String> = own
        .into_iter()
        .chain(collect_subtree(tree, node))
        .filter(|dep| seen.insert(dep.clone()))
        .collect();

    let log = tree.logger(node);
    if merged.is_empty() {
        log.info("No child dependencies found to merge");
    } else {
        let text = merged.join("\n") + "\n";
        tree.store().write(&node.workspace, WorkspaceKey::Dependencies, &text)?;
        log.info(&format!(
            "Merged {} dependencies into {}",
            merged.len(),
            tree.store().layout().dependencies
        ));
    }
    Ok(merged)
}

fn read_list(tree: &TaskTree, node: &NodeHandle) -> Vec<String> {
    tree.store()
        .read(&node.workspace, WorkspaceKey::Dependencies)
        .map(|text| parse_dependencies(&text))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BurrowConfig;
    use crate::tree::ChildSpec;
    use crate::workspace::{MemoryWorkspace, WorkspaceStore};
    use std::sync::Arc;

    fn tree() -> TaskTree {
        let store: Arc<dyn WorkspaceStore> = Arc::new(MemoryWorkspace::default());
        TaskTree::create(BurrowConfig::default(), store, "/r", None).unwrap()
    }

    fn declare(tree: &TaskTree, node: &NodeHandle, text: &str) {
        tree.store().write(&node.workspace, WorkspaceKey::Dependencies, text).unwrap();
    }

    #[test]
    fn test_parse_skips_blank_and_comments() {
        let deps = parse_dependencies("numpy\n\n  # pinned below\n pandas==2.0 \n#x\n");
        assert_eq!(deps, vec!["numpy", "pandas==2.0"]);
    }

    #[test]
    fn test_collect_is_preorder_and_deduplicated() {
        let tree = tree();
        let a = tree.create_child(tree.root(), ChildSpec::new("a", "x")).unwrap();
        let a1 = tree.create_child(&a, ChildSpec::new("a1", "x")).unwrap();
        let b = tree.create_child(tree.root(), ChildSpec::new("b", "x")).unwrap();
        declare(&tree, &a, "requests\n");
        declare(&tree, &a1, "numpy\nrequests\n");
        declare(&tree, &b, "pandas\nnumpy\n");

        assert_eq!(
            collect_subtree(&tree, tree.root()),
            vec!["requests", "numpy", "pandas"]
        );
    }

    #[test]
    fn test_merge_puts_own_first_and_is_idempotent() {
        let tree = tree();
        let a = tree.create_child(tree.root(), ChildSpec::new("a", "x")).unwrap();
        declare(&tree, tree.root(), "# mine\nflask\n");
        declare(&tree, &a, "numpy\nflask\n");

        let first = merge_subtree(&tree, tree.root(), true).unwrap();
        assert_eq!(first, vec!["flask", "numpy"]);
        let written = tree.store().read(&tree.root().workspace, WorkspaceKey::Dependencies);
        assert_eq!(written.as_deref(), Some("flask\nnumpy\n"));

        let second = merge_subtree(&tree, tree.root(), true).unwrap();
        assert_eq!(second, first);
        assert_eq!(
            tree.store().read(&tree.root().workspace, WorkspaceKey::Dependencies),
            written
        );
    }

    #[test]
    fn test_merge_without_self_drops_own_entries() {
        let tree = tree();
        let a = tree.create_child(tree.root(), ChildSpec::new("a", "x")).unwrap();
        declare(&tree, tree.root(), "flask\n");
        declare(&tree, &a, "numpy\n");

        assert_eq!(merge_subtree(&tree, tree.root(), false).unwrap(), vec!["numpy"]);
    }

    #[test]
    fn test_empty_merge_leaves_file_untouched() {
        let tree = tree();
        tree.create_child(tree.root(), ChildSpec::new("a", "x")).unwrap();
        declare(&tree, tree.root(), "# only comments\n");

        assert!(merge_subtree(&tree, tree.root(), true).unwrap().is_empty());
        assert_eq!(
            tree.store()
                .read(&tree.root().workspace, WorkspaceKey::Dependencies)
                .as_deref(),
            Some("# only comments\n")
        );
    }
}
