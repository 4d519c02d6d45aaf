//! Directory-backed workspace store

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{WorkspaceKey, WorkspaceStore};
use crate::config::WorkspaceLayout;
use crate::error::BurrowError;

/// One file per key inside each node directory
#[derive(Debug, Clone, Default)]
pub struct FsWorkspace {
    layout: WorkspaceLayout,
}

impl FsWorkspace {
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self { layout }
    }

    fn path(&self, dir: &Path, key: WorkspaceKey) -> PathBuf {
        dir.join(key.file_name(&self.layout))
    }
}

impl WorkspaceStore for FsWorkspace {
    fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    fn create(&self, dir: &Path) -> Result<(), BurrowError> {
        fs::create_dir_all(dir).map_err(|e| BurrowError::workspace(dir, e))
    }

    fn remove(&self, dir: &Path) -> Result<(), BurrowError> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BurrowError::workspace(dir, e)),
        }
    }

    fn exists(&self, dir: &Path) -> bool {
        dir.is_dir()
    }

    fn read(&self, dir: &Path, key: WorkspaceKey) -> Option<String> {
        let path = self.path(dir, key);
        match fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Unreadable workspace file treated as absent"
                );
                None
            }
        }
    }

    fn write(&self, dir: &Path, key: WorkspaceKey, value: &str) -> Result<(), BurrowError> {
        self.create(dir)?;
        let path = self.path(dir, key);
        fs::write(&path, value).map_err(|e| BurrowError::workspace(path, e))
    }

    fn append(&self, dir: &Path, key: WorkspaceKey, value: &str) -> Result<(), BurrowError> {
        self.create(dir)?;
        let path = self.path(dir, key);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| BurrowError::workspace(&path, e))?;
        file.write_all(value.as_bytes())
            .map_err(|e| BurrowError::workspace(&path, e))
    }

    fn clear(&self, dir: &Path, key: WorkspaceKey) -> Result<(), BurrowError> {
        let path = self.path(dir, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BurrowError::workspace(path, e)),
        }
    }

    fn list_children(&self, dir: &Path) -> Vec<String> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    fn materialize(&self, dir: &Path) -> Result<PathBuf, BurrowError> {
        self.create(dir)?;
        Ok(dir.to_path_buf())
    }
}
