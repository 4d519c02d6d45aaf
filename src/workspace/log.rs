//! Per-node log streams
//!
//! Activity goes to the node's log stream and failures to its error stream,
//! one timestamped line each. Every line is mirrored as a tracing event.

use std::path::Path;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{WorkspaceKey, WorkspaceStore};
use crate::ident::NodePath;

/// Writer for one node's log and error streams
pub struct NodeLog<'a> {
    store: &'a dyn WorkspaceStore,
    dir: &'a Path,
    node: &'a NodePath,
}

impl<'a> NodeLog<'a> {
    pub fn new(store: &'a dyn WorkspaceStore, dir: &'a Path, node: &'a NodePath) -> Self {
        Self { store, dir, node }
    }

    pub fn info(&self, message: &str) {
        info!(node = %self.node, "{message}");
        self.write(WorkspaceKey::Log, "INFO", message);
    }

    pub fn warn(&self, message: &str) {
        warn!(node = %self.node, "{message}");
        self.write(WorkspaceKey::Log, "WARNING", message);
    }

    pub fn debug(&self, message: &str) {
        debug!(node = %self.node, "{message}");
        self.write(WorkspaceKey::Log, "DEBUG", message);
    }

    pub fn error(&self, message: &str) {
        error!(node = %self.node, "{message}");
        self.write(WorkspaceKey::Errors, "ERROR", message);
    }

    pub fn critical(&self, message: &str) {
        error!(node = %self.node, critical = true, "{message}");
        self.write(WorkspaceKey::Errors, "CRITICAL", message);
    }

    fn write(&self, key: WorkspaceKey, level: &str, message: &str) {
        let line = format!("[{}] [{level:<8}] {message}\n", Utc::now().to_rfc3339());
        // log failures never fail the caller
        if let Err(e) = self.store.append(self.dir, key, &line) {
            warn!(node = %self.node, error = %e, "Failed to append to node log");
        }
    }
}
