//! Per-node persisted state
//!
//! Every node owns one workspace directory. The [`WorkspaceStore`] trait hides
//! whether that directory is real ([`FsWorkspace`]) or simulated
//! ([`MemoryWorkspace`]) so tree and retry logic can be exercised without I/O.
//!
//! Reads never fail: a missing key, or one that cannot be read, comes back as
//! `None`. Writes replace the whole value except for the log and error
//! streams, which only grow until explicitly cleared. Callers serialize access
//! to any single node.

mod fs;
mod log;
mod memory;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::WorkspaceLayout;
use crate::error::BurrowError;

pub use fs::FsWorkspace;
pub use log::NodeLog;
pub use memory::MemoryWorkspace;

/// A named value inside a node workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceKey {
    /// Task text handed to the worker
    Task,
    /// Produced artifact
    Artifact,
    /// Produced test
    Test,
    /// Dependency list, one requirement per line
    Dependencies,
    /// Append-only activity log
    Log,
    /// Append-only error log
    Errors,
    /// Last validation snapshot (JSON)
    TestResult,
    /// Node metadata (JSON)
    Meta,
}

impl WorkspaceKey {
    /// File name of this key under `layout`
    pub fn file_name<'a>(&self, layout: &'a WorkspaceLayout) -> &'a str {
        match self {
            Self::Task => &layout.task,
            Self::Artifact => &layout.artifact,
            Self::Test => &layout.test,
            Self::Dependencies => &layout.dependencies,
            Self::Log => &layout.log,
            Self::Errors => &layout.errors,
            Self::TestResult => &layout.test_result,
            Self::Meta => &layout.meta,
        }
    }
}

/// Key/value storage for node workspaces
pub trait WorkspaceStore: Send + Sync {
    /// File names used for each key
    fn layout(&self) -> &WorkspaceLayout;

    /// Create the workspace; existing content is left alone
    fn create(&self, dir: &Path) -> Result<(), BurrowError>;

    /// Recursively remove the workspace and everything below it
    ///
    /// Removing an absent workspace succeeds.
    fn remove(&self, dir: &Path) -> Result<(), BurrowError>;

    /// Whether the workspace exists
    fn exists(&self, dir: &Path) -> bool;

    /// Read a value, `None` when absent
    fn read(&self, dir: &Path, key: WorkspaceKey) -> Option<String>;

    /// Replace a value
    fn write(&self, dir: &Path, key: WorkspaceKey, value: &str) -> Result<(), BurrowError>;

    /// Append to a value, creating it when absent
    fn append(&self, dir: &Path, key: WorkspaceKey, value: &str) -> Result<(), BurrowError>;

    /// Drop a value; clearing an absent value succeeds
    fn clear(&self, dir: &Path, key: WorkspaceKey) -> Result<(), BurrowError>;

    /// Names of the workspaces directly below `dir`, sorted
    fn list_children(&self, dir: &Path) -> Vec<String>;

    /// Ensure artifact and test exist as real files under `dir` so they can be
    /// executed, returning the directory to run in
    fn materialize(&self, dir: &Path) -> Result<PathBuf, BurrowError>;

    /// Whether a value is present
    fn contains(&self, dir: &Path, key: WorkspaceKey) -> bool {
        self.read(dir, key).is_some()
    }
}
