//! Task tree management

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{BurrowConfig, ConfigLoader};
use crate::error::BurrowError;
use crate::events::{EventSink, TreeEvent};
use crate::hierarchy::{self, TreeSnapshot};
use crate::ident::{canonicalize, NodeId, NodePath};
use crate::node::{Node, NodeHandle, NodeMeta, NodeStatus};
use crate::prompt;
use crate::registry::ManagedRegistry;
use crate::sandbox::{ExecutionOutcome, Validator};
use crate::workspace::{NodeLog, WorkspaceKey, WorkspaceStore};

const ROOT_ID: &str = "root";

/// Request to create a child node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSpec {
    /// Human-readable name, canonicalized into the child id
    pub name: String,
    /// Task description
    pub task: String,
    /// Timeout override in seconds
    pub timeout_secs: Option<u64>,
    /// Retry budget override
    pub max_retries: Option<u32>,
}

impl ChildSpec {
    pub fn new(name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task: task.into(),
            timeout_secs: None,
            max_retries: None,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// Whether a node should split its task, and what its children would get
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompositionPlan {
    pub depth: u32,
    pub should_decompose: bool,
    pub timeout_for_children: u64,
}

/// Owner of a tree of nodes and their workspaces
pub struct TaskTree {
    config: Arc<BurrowConfig>,
    store: Arc<dyn WorkspaceStore>,
    root: NodeHandle,
    registry: Arc<ManagedRegistry>,
    events: EventSink,
}

impl TaskTree {
    /// Create a tree with a fresh root node at `root_dir`
    ///
    /// An existing task file is kept when `task` is `None`.
    pub fn create(
        config: BurrowConfig,
        store: Arc<dyn WorkspaceStore>,
        root_dir: impl Into<PathBuf>,
        task: Option<&str>,
    ) -> Result<Self, BurrowError> {
        ConfigLoader::validate(&config)?;
        let root_dir = root_dir.into();

        let meta = NodeMeta {
            id: NodeId::from_canonical(ROOT_ID),
            depth: 0,
            timeout_secs: config.clamp_timeout(config.default_timeout_secs),
            max_retries: config.max_retries,
            max_depth: config.max_depth,
            created_at: Some(Utc::now()),
        };

        store.create(&root_dir)?;
        store.write(&root_dir, WorkspaceKey::Meta, &serde_json::to_string_pretty(&meta)?)?;
        if let Some(task) = task {
            store.write(&root_dir, WorkspaceKey::Task, task)?;
        }

        let root = NodeHandle::new(Node::new(&meta, NodePath::root(), root_dir, None));
        let registry = Arc::new(ManagedRegistry::new(config.history_capacity));
        registry.register(&root);

        let tree = Self {
            config: Arc::new(config),
            store,
            root,
            registry,
            events: EventSink::disconnected(),
        };
        tree.logger(&tree.root).info(&format!(
            "Initialized root at {} (timeout: {}s)",
            tree.root.workspace.display(),
            tree.root.timeout_secs
        ));
        Ok(tree)
    }

    /// Rebuild a tree from an existing workspace
    pub fn open(
        config: BurrowConfig,
        store: Arc<dyn WorkspaceStore>,
        root_dir: impl Into<PathBuf>,
    ) -> Result<Self, BurrowError> {
        ConfigLoader::validate(&config)?;
        let root_dir = root_dir.into();
        if !store.exists(&root_dir) {
            return Err(BurrowError::NodeNotFound(root_dir.display().to_string()));
        }

        let meta = read_meta(store.as_ref(), &root_dir)
            .map(|mut meta| {
                meta.depth = 0;
                meta.timeout_secs = config.clamp_timeout(meta.timeout_secs);
                meta
            })
            .unwrap_or_else(|| NodeMeta {
                id: NodeId::from_canonical(ROOT_ID),
                depth: 0,
                timeout_secs: config.clamp_timeout(config.default_timeout_secs),
                max_retries: config.max_retries,
                max_depth: config.max_depth,
                created_at: None,
            });

        let root = NodeHandle::new(Node::new(&meta, NodePath::root(), root_dir, None));
        let tree = Self {
            registry: Arc::new(ManagedRegistry::new(config.history_capacity)),
            config: Arc::new(config),
            store,
            root,
            events: EventSink::disconnected(),
        };

        tree.load_children(&tree.root);
        tree.registry.rebuild(&tree.root);
        info!(nodes = hierarchy::count(&tree.root), "Reopened task tree");
        Ok(tree)
    }

    /// Attach an event sink
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn root(&self) -> &NodeHandle {
        &self.root
    }

    pub fn config(&self) -> &BurrowConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn WorkspaceStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ManagedRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Log stream of a node
    pub fn logger<'a>(&'a self, node: &'a Node) -> NodeLog<'a> {
        NodeLog::new(self.store.as_ref(), &node.workspace, &node.path)
    }

    /// Create a child below `parent`
    ///
    /// Fails with [`BurrowError::DepthExceeded`] when the child would sit
    /// below the depth limit. Creating an id that already exists rewrites its
    /// task and returns the existing node; workspace content is never lost.
    #[instrument(skip(self, parent, spec), fields(parent = %parent.path, name = %spec.name))]
    pub fn create_child(
        &self,
        parent: &NodeHandle,
        spec: ChildSpec,
    ) -> Result<NodeHandle, BurrowError> {
        if parent.status() == NodeStatus::Destroyed {
            return Err(BurrowError::NodeNotFound(parent.path.to_string()));
        }

        let depth = parent.depth + 1;
        if depth > parent.max_depth {
            warn!(depth, max_depth = parent.max_depth, "Refusing to create child");
            return Err(BurrowError::DepthExceeded {
                depth,
                max_depth: parent.max_depth,
            });
        }

        let id = canonicalize(&spec.name, &self.config.child_prefix);
        let dir = parent.workspace.join(id.as_str());
        let brief = prompt::child_brief(
            &spec.task,
            &parent.workspace,
            self.store.layout(),
            &self.config.child_prefix,
        );

        if let Some(existing) = parent.child(&id) {
            self.store.create(&dir)?;
            self.store.write(&dir, WorkspaceKey::Task, &brief)?;
            debug!(node = %existing.path, "Child exists, task rewritten");
            return Ok(existing);
        }

        let meta = NodeMeta {
            id: id.clone(),
            depth,
            timeout_secs: self.config.child_timeout(parent.timeout_secs, spec.timeout_secs),
            max_retries: spec.max_retries.unwrap_or(parent.max_retries),
            max_depth: parent.max_depth,
            created_at: Some(Utc::now()),
        };

        self.store.create(&dir)?;
        self.store.write(&dir, WorkspaceKey::Meta, &serde_json::to_string_pretty(&meta)?)?;
        self.store.write(&dir, WorkspaceKey::Task, &brief)?;

        let child = NodeHandle::new(Node::new(&meta, parent.path.child(id), dir, Some(parent)));
        parent.add_child(child.clone());
        self.registry.register(&child);

        self.events.emit(TreeEvent::NodeCreated {
            path: child.path.clone(),
            depth: child.depth,
            timeout_secs: child.timeout_secs,
        });
        self.logger(parent).info(&format!(
            "Created child node: {} (timeout: {}s, depth: {})",
            child.id, child.timeout_secs, child.depth
        ));

        Ok(child)
    }

    /// Remove a node, its descendants and their workspaces
    ///
    /// Destroying an already destroyed node is a no-op.
    pub fn destroy(&self, node: &NodeHandle) -> Result<(), BurrowError> {
        self.remove(node, false)
    }

    /// Destroy a node, optionally keeping its attempt history for the next
    /// node created at the same path
    pub fn reset(&self, node: &NodeHandle, preserve_history: bool) -> Result<(), BurrowError> {
        self.remove(node, preserve_history)
    }

    /// Reset the child called `name` and recreate it with a new task
    ///
    /// The new child keeps the previous timeout. A missing child is simply
    /// created.
    pub fn reset_child(
        &self,
        parent: &NodeHandle,
        name: &str,
        new_task: &str,
        preserve_history: bool,
    ) -> Result<NodeHandle, BurrowError> {
        let mut spec = ChildSpec::new(name, new_task);
        if let Some(existing) = self.resolve(parent, name) {
            spec.timeout_secs = Some(existing.timeout_secs);
            spec.max_retries = Some(existing.max_retries);
            self.reset(&existing, preserve_history)?;
        }
        self.create_child(parent, spec)
    }

    #[instrument(skip(self, node), fields(node = %node.path))]
    fn remove(&self, node: &NodeHandle, preserve_history: bool) -> Result<(), BurrowError> {
        if node.status() == NodeStatus::Destroyed {
            return Ok(());
        }

        self.store.remove(&node.workspace)?;

        for descendant in hierarchy::descendants(node) {
            descendant.set_status(NodeStatus::Destroyed);
        }
        node.set_status(NodeStatus::Destroyed);

        if let Some(parent) = node.parent() {
            if parent.child(&node.id).is_some_and(|c| c.same_node(node)) {
                parent.remove_child(&node.id);
            }
            self.logger(&parent).info(&format!("Removed child node: {}", node.id));
        }
        self.registry.invalidate(&node.path, preserve_history);

        self.events.emit(TreeEvent::NodeDestroyed {
            path: node.path.clone(),
        });
        info!(preserve_history, "Destroyed node");
        Ok(())
    }

    /// Look up a child of `parent` by its human-readable name
    pub fn resolve(&self, parent: &NodeHandle, name: &str) -> Option<NodeHandle> {
        parent.child(&canonicalize(name, &self.config.child_prefix))
    }

    /// Look up a node by path
    pub fn find(&self, path: &NodePath) -> Option<NodeHandle> {
        path.segments()
            .iter()
            .try_fold(self.root.clone(), |node, id| node.child(id))
    }

    /// Store an artifact and, optionally, its test
    pub fn submit(
        &self,
        node: &Node,
        artifact: &str,
        test: Option<&str>,
    ) -> Result<(), BurrowError> {
        self.store.write(&node.workspace, WorkspaceKey::Artifact, artifact)?;
        let log = self.logger(node);
        log.info("Saved artifact");
        if let Some(test) = test {
            self.store.write(&node.workspace, WorkspaceKey::Test, test)?;
            log.info("Saved test");
        }
        Ok(())
    }

    /// Store an artifact and its test, then validate them
    ///
    /// Storage errors are returned; a failing validation is reported in the
    /// outcome.
    pub async fn submit_and_validate(
        &self,
        validator: &dyn Validator,
        node: &NodeHandle,
        artifact: &str,
        test: Option<&str>,
    ) -> Result<ExecutionOutcome, BurrowError> {
        self.submit(node, artifact, test)?;
        let outcome = validator.validate(node).await;
        let log = self.logger(node);
        if outcome.success {
            log.info("Solution validated successfully");
        } else {
            log.warn("Solution validation failed");
        }
        Ok(outcome)
    }

    /// Current task text of a node
    pub fn task(&self, node: &Node) -> Option<String> {
        self.store.read(&node.workspace, WorkspaceKey::Task)
    }

    /// Decomposition guidance for a node
    pub fn decomposition_plan(&self, node: &Node) -> DecompositionPlan {
        DecompositionPlan {
            depth: node.depth,
            should_decompose: node.depth < node.max_depth,
            timeout_for_children: self.config.child_timeout(node.timeout_secs, None),
        }
    }

    /// Operating brief for the worker acting on `node`
    pub fn system_prompt(&self, node: &Node) -> String {
        prompt::system_prompt(node, self.store.layout(), &self.config.child_prefix)
    }

    /// Serializable view of the whole tree
    pub fn snapshot(&self) -> TreeSnapshot {
        hierarchy::snapshot(&self.root)
    }

    fn load_children(&self, parent: &NodeHandle) {
        let mut found: Vec<NodeMeta> = self
            .store
            .list_children(&parent.workspace)
            .into_iter()
            .filter(|name| name.starts_with(&self.config.child_prefix))
            .map(|name| {
                let id = NodeId::from_canonical(name);
                let dir = parent.workspace.join(id.as_str());
                let mut meta = read_meta(self.store.as_ref(), &dir)
                    .filter(|meta| meta.id == id)
                    .unwrap_or_else(|| NodeMeta {
                        id,
                        depth: 0,
                        timeout_secs: self.config.child_timeout(parent.timeout_secs, None),
                        max_retries: parent.max_retries,
                        max_depth: parent.max_depth,
                        created_at: None,
                    });
                meta.depth = parent.depth + 1;
                meta.timeout_secs = self.config.clamp_timeout(meta.timeout_secs);
                meta
            })
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        for meta in found {
            if meta.depth > parent.max_depth {
                warn!(node = %parent.path, child = %meta.id, "Skipping child below depth limit");
                continue;
            }
            let dir = parent.workspace.join(meta.id.as_str());
            let path = parent.path.child(meta.id.clone());
            let child = NodeHandle::new(Node::new(&meta, path, dir, Some(parent)));
            parent.add_child(child.clone());
            self.load_children(&child);
        }
    }
}

fn read_meta(store: &dyn WorkspaceStore, dir: &std::path::Path) -> Option<NodeMeta> {
    let raw = store.read(dir, WorkspaceKey::Meta)?;
    match serde_json::from_str(&raw) {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Ignoring unreadable node metadata");
            None
        }
    }
}
