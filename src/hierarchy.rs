//! Node hierarchy traversal and snapshots

use serde::{Deserialize, Serialize};

use crate::ident::{NodeId, NodePath};
use crate::node::{NodeHandle, NodeStatus};

/// Serializable view of a subtree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub id: NodeId,
    pub path: NodePath,
    pub depth: u32,
    pub timeout_secs: u64,
    pub status: NodeStatus,
    pub children: Vec<TreeSnapshot>,
}

impl TreeSnapshot {
    /// Nodes in this snapshot, including itself
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(TreeSnapshot::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Snapshot the subtree rooted at `node`
pub fn snapshot(node: &NodeHandle) -> TreeSnapshot {
    TreeSnapshot {
        id: node.id.clone(),
        path: node.path.clone(),
        depth: node.depth,
        timeout_secs: node.timeout_secs,
        status: node.status(),
        children: node.children().iter().map(snapshot).collect(),
    }
}

/// All descendants of `node`, depth-first pre-order, children in creation order
pub fn descendants(node: &NodeHandle) -> Vec<NodeHandle> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeHandle> = node.children().into_iter().rev().collect();

    while let Some(current) = stack.pop() {
        stack.extend(current.children().into_iter().rev());
        out.push(current);
    }

    out
}

/// Nodes of the subtree (including `root`) at an absolute depth
pub fn nodes_at_depth(root: &NodeHandle, depth: u32) -> Vec<NodeHandle> {
    std::iter::once(root.clone())
        .chain(descendants(root))
        .filter(|n| n.depth == depth)
        .collect()
}

/// Size of the subtree including `root`
pub fn count(root: &NodeHandle) -> usize {
    1 + descendants(root).len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeMeta};
    use std::path::PathBuf;

    fn add(parent: Option<&NodeHandle>, name: &str) -> NodeHandle {
        let id = NodeId::from_canonical(name);
        let (path, depth) = match parent {
            Some(p) => (p.path.child(id.clone()), p.depth + 1),
            None => (NodePath::root(), 0),
        };
        let meta = NodeMeta {
            id,
            depth,
            timeout_secs: 300 >> depth,
            max_retries: 3,
            max_depth: 5,
            created_at: None,
        };
        let handle = NodeHandle::new(Node::new(&meta, path, PathBuf::from("/w"), parent));
        if let Some(p) = parent {
            p.add_child(handle.clone());
        }
        handle
    }

    // root
    // ├── lead1
    // │   ├── worker1
    // │   └── worker2
    // └── lead2
    //     └── worker3
    fn build() -> (NodeHandle, Vec<NodeHandle>) {
        let root = add(None, "root");
        let lead1 = add(Some(&root), "lead1");
        let worker1 = add(Some(&lead1), "worker1");
        let worker2 = add(Some(&lead1), "worker2");
        let lead2 = add(Some(&root), "lead2");
        let worker3 = add(Some(&lead2), "worker3");
        (root, vec![lead1, worker1, worker2, lead2, worker3])
    }

    #[test]
    fn test_descendants_preorder() {
        let (root, expected) = build();
        let names: Vec<String> = descendants(&root).iter().map(|n| n.id.to_string()).collect();
        let want: Vec<String> = expected.iter().map(|n| n.id.to_string()).collect();
        assert_eq!(names, want);
    }

    #[test]
    fn test_descendants_of_leaf() {
        let (_root, nodes) = build();
        assert!(descendants(&nodes[1]).is_empty());
    }

    #[test]
    fn test_nodes_at_depth() {
        let (root, _) = build();
        assert_eq!(nodes_at_depth(&root, 0).len(), 1);
        assert_eq!(nodes_at_depth(&root, 1).len(), 2);
        assert_eq!(nodes_at_depth(&root, 2).len(), 3);
        assert!(nodes_at_depth(&root, 5).is_empty());
    }

    #[test]
    fn test_snapshot_mirrors_tree() {
        let (root, _) = build();
        let snap = snapshot(&root);

        assert_eq!(snap.len(), 6);
        assert_eq!(count(&root), 6);
        assert_eq!(snap.children.len(), 2);
        assert_eq!(snap.children[0].children.len(), 2);
        assert_eq!(snap.children[0].children[1].path.to_string(), "/lead1/worker2");
        assert_eq!(snap.children[1].timeout_secs, 150);
    }
}
