//! Managed registry - process-local index of live node handles
//!
//! The registry is a cache keyed by [`NodePath`]; the workspace tree stays the
//! source of truth. Attempt history lives next to each handle so that a node
//! can be reset (handle invalidated) while its history survives under the
//! same path for the next incarnation.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::hierarchy;
use crate::history::{AttemptDraft, AttemptLog, AttemptRecord};
use crate::ident::NodePath;
use crate::node::NodeHandle;

/// Registry entry for one path
#[derive(Debug, Clone)]
pub struct ManagedEntry {
    /// Live handle, absent after a reset or before a rebuild
    pub handle: Option<NodeHandle>,
    pub attempts: AttemptLog,
}

/// Index of live handles and their attempt history
pub struct ManagedRegistry {
    entries: RwLock<HashMap<NodePath, ManagedEntry>>,
    history_capacity: usize,
}

impl ManagedRegistry {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            history_capacity,
        }
    }

    /// Register a live handle, keeping any history already stored for its path
    pub fn register(&self, handle: &NodeHandle) {
        let capacity = self.history_capacity;
        self.entries
            .write()
            .entry(handle.path.clone())
            .or_insert_with(|| ManagedEntry {
                handle: None,
                attempts: AttemptLog::new(capacity),
            })
            .handle = Some(handle.clone());
    }

    /// Live handle for a path
    pub fn handle(&self, path: &NodePath) -> Option<NodeHandle> {
        self.entries.read().get(path).and_then(|e| e.handle.clone())
    }

    pub fn is_live(&self, path: &NodePath) -> bool {
        self.handle(path).is_some()
    }

    /// Drop the handle at `path` and every entry below it
    ///
    /// With `preserve_history` the attempt log at `path` itself is kept.
    pub fn invalidate(&self, path: &NodePath, preserve_history: bool) {
        let mut entries = self.entries.write();
        entries.retain(|p, _| p == path || !p.starts_with(path));

        if preserve_history {
            if let Some(entry) = entries.get_mut(path) {
                entry.handle = None;
            }
        } else {
            entries.remove(path);
        }
        debug!(node = %path, preserve_history, "Invalidated managed entry");
    }

    /// Append an attempt for `path`
    pub fn record_attempt(&self, path: &NodePath, draft: AttemptDraft) -> AttemptRecord {
        let capacity = self.history_capacity;
        self.entries
            .write()
            .entry(path.clone())
            .or_insert_with(|| ManagedEntry {
                handle: None,
                attempts: AttemptLog::new(capacity),
            })
            .attempts
            .record(draft)
    }

    /// All retained attempts, oldest first
    pub fn attempts(&self, path: &NodePath) -> Vec<AttemptRecord> {
        self.entries
            .read()
            .get(path)
            .map(|e| e.attempts.records())
            .unwrap_or_default()
    }

    /// The last `n` attempts, oldest first
    pub fn recent_attempts(&self, path: &NodePath, n: usize) -> Vec<AttemptRecord> {
        self.entries
            .read()
            .get(path)
            .map(|e| e.attempts.recent(n))
            .unwrap_or_default()
    }

    /// Attempts ever recorded for `path`
    pub fn attempt_total(&self, path: &NodePath) -> u32 {
        self.entries.read().get(path).map_or(0, |e| e.attempts.total())
    }

    /// Paths with a live handle, in tree order of their string form
    pub fn live_paths(&self) -> Vec<NodePath> {
        let mut paths: Vec<NodePath> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.handle.is_some())
            .map(|(p, _)| p.clone())
            .collect();
        paths.sort_by_key(|p| p.to_string());
        paths
    }

    /// Re-register every node reachable from `root`
    ///
    /// Stale handles are dropped first; history is kept.
    pub fn rebuild(&self, root: &NodeHandle) {
        for entry in self.entries.write().values_mut() {
            entry.handle = None;
        }
        self.register(root);
        for node in hierarchy::descendants(root) {
            self.register(&node);
        }
        debug!(live = self.live_paths().len(), "Rebuilt managed registry");
    }

    /// Number of entries, live or not
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for ManagedRegistry {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::NodeId;
    use crate::node::{Node, NodeMeta};
    use std::path::PathBuf;

    fn node(path: NodePath, parent: Option<&NodeHandle>) -> NodeHandle {
        let id = path.last().cloned().unwrap_or_else(|| NodeId::from_canonical("root"));
        let meta = NodeMeta {
            id,
            depth: path.segments().len() as u32,
            timeout_secs: 60,
            max_retries: 3,
            max_depth: 5,
            created_at: None,
        };
        NodeHandle::new(Node::new(&meta, path, PathBuf::from("/w"), parent))
    }

    fn failed() -> AttemptDraft {
        AttemptDraft {
            prompt: "p".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ManagedRegistry::default();
        let root = node(NodePath::root(), None);
        registry.register(&root);

        assert!(registry.is_live(&NodePath::root()));
        assert!(registry.handle(&NodePath::root()).unwrap().same_node(&root));
    }

    #[test]
    fn test_invalidate_preserves_history_on_request() {
        let registry = ManagedRegistry::default();
        let path = NodePath::root().child(NodeId::from_canonical("task_a"));
        registry.register(&node(path.clone(), None));
        registry.record_attempt(&path, failed());
        registry.record_attempt(&path, failed());

        registry.invalidate(&path, true);
        assert!(!registry.is_live(&path));
        assert_eq!(registry.attempts(&path).len(), 2);

        registry.register(&node(path.clone(), None));
        assert_eq!(registry.record_attempt(&path, failed()).attempt_number, 3);

        registry.invalidate(&path, false);
        assert!(registry.attempts(&path).is_empty());
        assert_eq!(registry.attempt_total(&path), 0);
    }

    #[test]
    fn test_invalidate_drops_descendants() {
        let registry = ManagedRegistry::default();
        let a = NodePath::root().child(NodeId::from_canonical("task_a"));
        let b = a.child(NodeId::from_canonical("task_b"));
        let sibling = NodePath::root().child(NodeId::from_canonical("task_ab"));
        for p in [&a, &b, &sibling] {
            registry.register(&node(p.clone(), None));
            registry.record_attempt(p, failed());
        }

        registry.invalidate(&a, true);

        assert!(registry.attempts(&b).is_empty());
        assert_eq!(registry.attempts(&a).len(), 1);
        assert!(registry.is_live(&sibling));
        assert_eq!(registry.live_paths(), vec![sibling]);
    }
}
