//! Persisted tree snapshots
//!
//! A snapshot is a version tag line followed by a bincode payload. Writes go
//! to a temp file under an exclusive `fs2` lock and are renamed into place.
//! Anything unreadable is discarded whole so the next start re-reads
//! everything.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{ExplicitProfiles, Timestamp};
use crate::tree::ProjectState;

/// Bumped whenever any serialized type changes shape
pub const SNAPSHOT_VERSION: &str = "buildtree-snapshot-v1";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode snapshot: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub state: ProjectState,
    pub timestamp: Timestamp,
    pub modules: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub managed_files: Vec<PathBuf>,
    pub ignored_paths: Vec<PathBuf>,
    pub ignored_patterns: Vec<String>,
    pub explicit_profiles: ExplicitProfiles,
    pub roots: Vec<NodeSnapshot>,
}

impl TreeSnapshot {
    /// Number of nodes, counting modules
    pub fn node_count(&self) -> usize {
        fn count(node: &NodeSnapshot) -> usize {
            1 + node.modules.iter().map(count).sum::<usize>()
        }
        self.roots.iter().map(count).sum()
    }
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, snapshot: &TreeSnapshot) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        let payload = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())
            .map_err(|e| SnapshotError::Encode(e.to_string()))?;

        let temp_path = self.path.with_extension("bin.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(io_error(&temp_path))?;

            file.lock_exclusive().map_err(io_error(&temp_path))?;
            file.write_all(SNAPSHOT_VERSION.as_bytes()).map_err(io_error(&temp_path))?;
            file.write_all(b"\n").map_err(io_error(&temp_path))?;
            file.write_all(&payload).map_err(io_error(&temp_path))?;
            file.flush().map_err(io_error(&temp_path))?;
        }

        fs::rename(&temp_path, &self.path).map_err(io_error(&self.path))?;
        debug!(path = %self.path.display(), nodes = snapshot.node_count(), "Saved snapshot");
        Ok(())
    }

    /// Loads the snapshot; None when absent or unusable
    pub fn load(&self) -> Result<Option<TreeSnapshot>, SnapshotError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut bytes = Vec::new();
        {
            let mut file = File::open(&self.path).map_err(io_error(&self.path))?;
            file.lock_shared().map_err(io_error(&self.path))?;
            file.read_to_end(&mut bytes).map_err(io_error(&self.path))?;
        }

        match decode(&bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(reason) => {
                warn!(path = %self.path.display(), %reason, "Discarding snapshot");
                self.discard()?;
                Ok(None)
            }
        }
    }

    pub fn discard(&self) -> Result<(), SnapshotError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SnapshotError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SnapshotError {
    let path = path.to_path_buf();
    move |source| SnapshotError::Io { path, source }
}

fn decode(bytes: &[u8]) -> Result<TreeSnapshot, String> {
    let split = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| "missing version tag".to_string())?;
    let (tag, payload) = (&bytes[..split], &bytes[split + 1..]);

    if tag != SNAPSHOT_VERSION.as_bytes() {
        return Err(format!("version {} is not supported", String::from_utf8_lossy(tag)));
    }

    bincode::serde::decode_from_slice(payload, bincode::config::standard())
        .map(|(snapshot, _)| snapshot)
        .map_err(|e| e.to_string())
}
