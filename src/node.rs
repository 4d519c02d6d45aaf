//! Node implementation - a single unit of the task tree

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ident::{NodeId, NodePath};

/// Lifecycle status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Created, never invoked
    #[default]
    Created,
    /// A retry session is working on it
    Running,
    /// Validated successfully (terminal)
    Succeeded,
    /// Last retry session exhausted its budget
    Failed,
    /// Removed from the tree; the handle is stale
    Destroyed,
}

/// Persisted node metadata, enough to rebuild the tree after a restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub id: NodeId,
    pub depth: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_depth: u32,
    /// Creation time, used to restore sibling order
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A single node of the task tree
pub struct Node {
    /// Identifier, unique among siblings
    pub id: NodeId,
    /// Location in the tree
    pub path: NodePath,
    /// Root is 0
    pub depth: u32,
    /// Wall-clock budget in seconds
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_depth: u32,
    /// Directory this node exclusively owns
    pub workspace: PathBuf,
    /// Distinguishes successive incarnations of the same path
    pub instance: Uuid,
    pub created_at: DateTime<Utc>,
    parent: Option<Weak<Node>>,
    children: RwLock<Vec<NodeHandle>>,
    status: RwLock<NodeStatus>,
}

impl Node {
    pub(crate) fn new(
        meta: &NodeMeta,
        path: NodePath,
        workspace: PathBuf,
        parent: Option<&NodeHandle>,
    ) -> Self {
        Self {
            id: meta.id.clone(),
            path,
            depth: meta.depth,
            timeout_secs: meta.timeout_secs,
            max_retries: meta.max_retries,
            max_depth: meta.max_depth,
            workspace,
            instance: Uuid::new_v4(),
            created_at: meta.created_at.unwrap_or_else(Utc::now),
            parent: parent.map(|p| Arc::downgrade(&p.inner)),
            children: RwLock::new(Vec::new()),
            status: RwLock::new(NodeStatus::Created),
        }
    }

    /// Get current status
    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    /// Set status
    pub fn set_status(&self, status: NodeStatus) {
        *self.status.write() = status;
    }

    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    /// Whether this node may create children
    pub fn can_spawn(&self) -> bool {
        self.depth < self.max_depth && self.status() != NodeStatus::Destroyed
    }

    /// Parent node, if it is still alive
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| NodeHandle { inner })
    }

    /// Children in creation order
    pub fn children(&self) -> Vec<NodeHandle> {
        self.children.read().clone()
    }

    /// Look up a direct child by id
    pub fn child(&self, id: &NodeId) -> Option<NodeHandle> {
        self.children.read().iter().find(|c| &c.id == id).cloned()
    }

    pub(crate) fn add_child(&self, child: NodeHandle) {
        self.children.write().push(child);
    }

    pub(crate) fn remove_child(&self, id: &NodeId) -> Option<NodeHandle> {
        let mut guard = self.children.write();
        let pos = guard.iter().position(|c| &c.id == id)?;
        Some(guard.remove(pos))
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn meta(&self) -> NodeMeta {
        NodeMeta {
            id: self.id.clone(),
            depth: self.depth,
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
            max_depth: self.max_depth,
            created_at: Some(self.created_at),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("depth", &self.depth)
            .field("timeout_secs", &self.timeout_secs)
            .field("status", &self.status())
            .field("children", &self.children.read().len())
            .finish()
    }
}

/// Shared handle to a node
#[derive(Clone, Debug)]
pub struct NodeHandle {
    inner: Arc<Node>,
}

impl NodeHandle {
    pub fn new(node: Node) -> Self {
        Self {
            inner: Arc::new(node),
        }
    }

    pub fn inner(&self) -> &Node {
        &self.inner
    }

    /// Whether both handles point at the same incarnation
    pub fn same_node(&self, other: &NodeHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::ops::Deref for NodeHandle {
    type Target = Node;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, depth: u32) -> NodeMeta {
        NodeMeta {
            id: NodeId::from_canonical(id),
            depth,
            timeout_secs: 300,
            max_retries: 3,
            max_depth: 2,
            created_at: None,
        }
    }

    fn create_test_node() -> NodeHandle {
        NodeHandle::new(Node::new(&meta("root", 0), NodePath::root(), PathBuf::from("/w"), None))
    }

    #[test]
    fn test_node_creation() {
        let node = create_test_node();
        assert_eq!(node.status(), NodeStatus::Created);
        assert!(node.parent().is_none());
        assert!(node.is_root());
        assert!(node.can_spawn());
    }

    #[test]
    fn test_node_children() {
        let root = create_test_node();
        let child_meta = meta("task_a", 1);
        let child = NodeHandle::new(Node::new(
            &child_meta,
            root.path.child(child_meta.id.clone()),
            PathBuf::from("/w/task_a"),
            Some(&root),
        ));

        root.add_child(child.clone());
        assert_eq!(root.children().len(), 1);
        assert!(child.parent().unwrap().same_node(&root));
        assert!(root.child(&child_meta.id).is_some());

        assert!(root.remove_child(&child_meta.id).is_some());
        assert!(root.children().is_empty());
        assert!(root.remove_child(&child_meta.id).is_none());
    }

    #[test]
    fn test_parent_is_weak() {
        let root = create_test_node();
        let child_meta = meta("task_a", 1);
        let child = NodeHandle::new(Node::new(
            &child_meta,
            root.path.child(child_meta.id.clone()),
            PathBuf::from("/w/task_a"),
            Some(&root),
        ));
        drop(root);
        assert!(child.parent().is_none());
    }

    #[test]
    fn test_can_spawn_respects_depth() {
        let node = NodeHandle::new(Node::new(
            &meta("task_x", 2),
            NodePath::root(),
            PathBuf::from("/w"),
            None,
        ));
        assert!(!node.can_spawn());
    }
}
