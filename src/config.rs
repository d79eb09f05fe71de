use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// What to do when a reference pool has no row left for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReference {
    /// Leave the foreign-key column empty.
    #[default]
    Null,
    /// Drop the whole row.
    SkipRow,
    /// Abort the unit.
    Fail,
}

/// Options for a generation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Rows per insert transaction (or per appended CSV chunk).
    pub batch_size: usize,
    /// Rows per insert transaction while restoring a snapshot.
    pub load_batch_size: usize,
    /// Rows fetched from a dependency per pool refill.
    pub pull_size: usize,
    /// Attempts to find an unused primary key before giving up.
    pub max_key_retries: u32,
    pub missing_reference: MissingReference,
    /// Fixed RNG seed; random when absent.
    pub seed: Option<u64>,
    /// Directory holding numbered snapshot versions.
    pub snapshot_root: Option<PathBuf>,
    /// Directory for working sheet files.
    pub work_dir: Option<PathBuf>,
    /// SQLite database file; in-memory when absent.
    pub database: Option<PathBuf>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            batch_size: 2000,
            load_batch_size: 5000,
            pull_size: 5000,
            max_key_retries: 10_000,
            missing_reference: MissingReference::Null,
            seed: None,
            snapshot_root: None,
            work_dir: None,
            database: None,
        }
    }
}

impl GenerationSettings {
    /// Snapshot root, falling back to the platform data directory.
    pub fn snapshot_root(&self) -> PathBuf {
        match &self.snapshot_root {
            Some(dir) => dir.clone(),
            None => ProjectDirs::from("", "", "seedgraph")
                .map(|dirs| dirs.data_dir().join("snapshots"))
                .unwrap_or_else(|| PathBuf::from("snapshots")),
        }
    }

    /// Working directory for sheets, next to the snapshots by default.
    pub fn work_dir(&self) -> PathBuf {
        match &self.work_dir {
            Some(dir) => dir.clone(),
            None => self.snapshot_root().join("work"),
        }
    }
}
