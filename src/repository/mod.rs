//! Artifact repositories
//!
//! The resolution stages fetch dependency and plugin files through an
//! [`ArtifactRepository`]. Calls may block and must observe the
//! [`Cancellation`] they are given.

mod local;

pub use local::LocalRepository;

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::{Artifact, Coordinate, Plugin, RemoteRepository, DEFAULT_KIND};
use crate::pipeline::Cancellation;
use crate::storage::GeneralSettings;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0} not found in any repository")]
    NotFound(String),

    #[error("{0} is not available offline")]
    Offline(String),

    #[error("Resolution cancelled")]
    Cancelled,

    #[error("Failed to copy {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How eagerly remote repositories are consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Only what is already in the local repository
    Offline,
    /// Remote lookups for anything missing locally
    Default,
    /// Like `Default`, but snapshots are refreshed even when present
    AlwaysUpdateSnapshots,
}

impl UpdatePolicy {
    pub fn from_settings(settings: &GeneralSettings) -> Self {
        if settings.work_offline {
            UpdatePolicy::Offline
        } else if settings.always_update_snapshots {
            UpdatePolicy::AlwaysUpdateSnapshots
        } else {
            UpdatePolicy::Default
        }
    }
}

/// One file to fetch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactRequest {
    pub coordinate: Coordinate,
    pub classifier: Option<String>,
    pub extension: String,
}

impl ArtifactRequest {
    pub fn for_artifact(artifact: &Artifact) -> Self {
        Self {
            coordinate: artifact.coordinate.clone(),
            classifier: artifact.classifier.clone(),
            extension: extension_for(&artifact.kind).to_string(),
        }
    }

    pub fn for_plugin(plugin: &Plugin) -> Self {
        Self {
            coordinate: plugin.coordinate.clone(),
            classifier: None,
            extension: DEFAULT_KIND.to_string(),
        }
    }

    pub fn with_classifier(mut self, classifier: &str) -> Self {
        self.classifier = Some(classifier.to_string());
        self
    }

    /// File name inside the version directory
    pub fn file_name(&self) -> String {
        let c = &self.coordinate;
        match &self.classifier {
            Some(classifier) => format!("{}-{}-{}.{}", c.artifact_id(), c.version(), classifier, self.extension),
            None => format!("{}-{}.{}", c.artifact_id(), c.version(), self.extension),
        }
    }

    /// Path relative to a repository root
    pub fn relative_path(&self) -> PathBuf {
        let c = &self.coordinate;
        let mut path: PathBuf = c.group_id().split('.').collect();
        path.push(c.artifact_id());
        path.push(c.version());
        path.push(self.file_name());
        path
    }
}

impl fmt::Display for ArtifactRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coordinate)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        write!(f, "@{}", self.extension)
    }
}

/// Packaging types whose files use another extension
fn extension_for(kind: &str) -> &str {
    match kind {
        "test-jar" | "bundle" | "maven-plugin" | "ejb" => "jar",
        other => other,
    }
}

pub trait ArtifactRepository: Send + Sync {
    /// Returns the local path of the requested file
    fn resolve(
        &self,
        request: &ArtifactRequest,
        repositories: &[RemoteRepository],
        policy: UpdatePolicy,
        cancel: &Cancellation,
    ) -> Result<PathBuf, RepositoryError>;
}
