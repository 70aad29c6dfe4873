//! Background processing pipeline
//!
//! Reading and the four resolution stages each run on their own
//! [`TaskProcessor`]. The [`ProjectsManager`] chains them together by
//! listening to tree events.

mod cancel;
mod manager;
mod processor;
pub mod stages;

pub use cancel::{Cancellation, Cancelled};
pub use manager::ProjectsManager;
pub use processor::{TaskHandle, TaskProcessor};

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::tree::TreeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Read,
    ResolveDependencies,
    ResolvePlugins,
    ResolveFolders,
    DownloadArtifacts,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Read => "read",
            Stage::ResolveDependencies => "resolve-dependencies",
            Stage::ResolvePlugins => "resolve-plugins",
            Stage::ResolveFolders => "resolve-folders",
            Stage::DownloadArtifacts => "download-artifacts",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Tree(TreeError),

    #[error("{0}")]
    Failed(String),
}

impl From<TreeError> for StageError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::Cancelled => StageError::Cancelled,
            other => StageError::Tree(other),
        }
    }
}

impl From<Cancelled> for StageError {
    fn from(_: Cancelled) -> Self {
        StageError::Cancelled
    }
}

/// Work for the read processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadTask {
    Update { files: Vec<PathBuf>, force: bool },
    UpdateAll { force: bool },
    Delete { files: Vec<PathBuf> },
}

/// Work for a per-project stage, keyed by descriptor file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeTask {
    pub file: PathBuf,
}

impl NodeTask {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }
}
