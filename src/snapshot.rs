//! Numbered snapshot directories under one root

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;

/// File holding the schema DDL inside a snapshot directory
pub const SCHEMA_FILE: &str = "schema.sql";

/// Root holding `<root>/<N>/` version directories.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one version
    pub fn version_dir(&self, version: u64) -> PathBuf {
        self.root.join(version.to_string())
    }

    /// Every version present, ascending. A missing root has none.
    pub fn versions(&self) -> Result<Vec<u64>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(version) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<u64>().ok())
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn latest(&self) -> Result<Option<u64>> {
        Ok(self.versions()?.last().copied())
    }

    /// Create the directory after the latest version and return it.
    pub fn create_next(&self) -> Result<(u64, PathBuf)> {
        let version = self.latest()?.map_or(1, |v| v + 1);
        let dir = self.version_dir(version);
        fs::create_dir_all(&dir)?;
        info!(version, path = ?dir, "created snapshot directory");
        Ok((version, dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("absent"));
        assert!(store.versions().unwrap().is_empty());
        assert_eq!(store.latest().unwrap(), None);
    }

    #[test]
    fn test_versions_are_numeric_dirs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["2", "10", "work", "1"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("7"), "not a dir").unwrap();

        let store = SnapshotStore::new(dir.path());
        assert_eq!(store.versions().unwrap(), vec![1, 2, 10]);
        assert_eq!(store.latest().unwrap(), Some(10));
    }

    #[test]
    fn test_create_next_increments() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let (first, path) = store.create_next().unwrap();
        assert_eq!(first, 1);
        assert!(path.is_dir());
        let (second, _) = store.create_next().unwrap();
        assert_eq!(second, 2);
    }
}
