//! In-memory workspace store

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::{WorkspaceKey, WorkspaceStore};
use crate::config::WorkspaceLayout;
use crate::error::BurrowError;

/// Workspaces kept in a map, for exercising tree logic without disk access
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    layout: WorkspaceLayout,
    dirs: RwLock<HashMap<PathBuf, HashMap<WorkspaceKey, String>>>,
}

impl MemoryWorkspace {
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self {
            layout,
            dirs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of workspaces currently held
    pub fn len(&self) -> usize {
        self.dirs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.read().is_empty()
    }
}

impl WorkspaceStore for MemoryWorkspace {
    fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    fn create(&self, dir: &Path) -> Result<(), BurrowError> {
        self.dirs.write().entry(dir.to_path_buf()).or_default();
        Ok(())
    }

    fn remove(&self, dir: &Path) -> Result<(), BurrowError> {
        self.dirs.write().retain(|path, _| !path.starts_with(dir));
        Ok(())
    }

    fn exists(&self, dir: &Path) -> bool {
        self.dirs.read().contains_key(dir)
    }

    fn read(&self, dir: &Path, key: WorkspaceKey) -> Option<String> {
        self.dirs.read().get(dir).and_then(|values| values.get(&key).cloned())
    }

    fn write(&self, dir: &Path, key: WorkspaceKey, value: &str) -> Result<(), BurrowError> {
        self.dirs
            .write()
            .entry(dir.to_path_buf())
            .or_default()
            .insert(key, value.to_string());
        Ok(())
    }

    fn append(&self, dir: &Path, key: WorkspaceKey, value: &str) -> Result<(), BurrowError> {
        self.dirs
            .write()
            .entry(dir.to_path_buf())
            .or_default()
            .entry(key)
            .or_default()
            .push_str(value);
        Ok(())
    }

    fn clear(&self, dir: &Path, key: WorkspaceKey) -> Result<(), BurrowError> {
        if let Some(values) = self.dirs.write().get_mut(dir) {
            values.remove(&key);
        }
        Ok(())
    }

    fn list_children(&self, dir: &Path) -> Vec<String> {
        let names: BTreeSet<String> = self
            .dirs
            .read()
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        names.into_iter().collect()
    }

    fn materialize(&self, dir: &Path) -> Result<PathBuf, BurrowError> {
        std::fs::create_dir_all(dir).map_err(|e| BurrowError::workspace(dir, e))?;
        for key in [WorkspaceKey::Artifact, WorkspaceKey::Test] {
            if let Some(contents) = self.read(dir, key) {
                let path = dir.join(key.file_name(&self.layout));
                std::fs::write(&path, contents).map_err(|e| BurrowError::workspace(path, e))?;
            }
        }
        Ok(dir.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_values_are_absent() {
        let store = MemoryWorkspace::default();
        let dir = Path::new("/virtual/root");
        assert!(store.read(dir, WorkspaceKey::Task).is_none());
        assert!(!store.exists(dir));
    }

    #[test]
    fn test_remove_drops_descendants() {
        let store = MemoryWorkspace::default();
        let root = Path::new("/virtual/root");

        store.create(root).unwrap();
        store.write(&root.join("task_a"), WorkspaceKey::Task, "a").unwrap();
        store.write(&root.join("task_a/task_b"), WorkspaceKey::Task, "b").unwrap();
        store.write(&root.join("task_c"), WorkspaceKey::Task, "c").unwrap();

        assert_eq!(store.list_children(root), vec!["task_a", "task_c"]);

        store.remove(&root.join("task_a")).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.read(&root.join("task_a/task_b"), WorkspaceKey::Task).is_none());
        assert_eq!(store.read(&root.join("task_c"), WorkspaceKey::Task).as_deref(), Some("c"));
    }

    #[test]
    fn test_append_builds_stream() {
        let store = MemoryWorkspace::default();
        let dir = Path::new("/virtual/node");
        store.append(dir, WorkspaceKey::Log, "a\n").unwrap();
        store.append(dir, WorkspaceKey::Log, "b\n").unwrap();
        assert_eq!(store.read(dir, WorkspaceKey::Log).as_deref(), Some("a\nb\n"));
    }

    #[test]
    fn test_materialize_writes_real_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryWorkspace::default();
        let dir = tmp.path().join("node");

        store.write(&dir, WorkspaceKey::Artifact, "x = 1").unwrap();
        store.write(&dir, WorkspaceKey::Test, "assert True").unwrap();
        let run_dir = store.materialize(&dir).unwrap();

        assert_eq!(std::fs::read_to_string(run_dir.join("solution.py")).unwrap(), "x = 1");
        let test = std::fs::read_to_string(run_dir.join("test_solution.py")).unwrap();
        assert_eq!(test, "assert True");
    }
}
