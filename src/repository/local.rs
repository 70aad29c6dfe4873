//! Filesystem-backed repository
//!
//! Looks artifacts up under a local root. Missing files are copied in from
//! `file://` remote repositories unless working offline; other remote
//! schemes are not fetched.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ArtifactRepository, ArtifactRequest, RepositoryError, UpdatePolicy};
use crate::domain::RemoteRepository;
use crate::pipeline::Cancellation;

#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, request: &ArtifactRequest) -> PathBuf {
        self.root.join(request.relative_path())
    }

    fn fetch(&self, request: &ArtifactRequest, remote: &RemoteRepository, target: &Path) -> Result<bool, RepositoryError> {
        let Some(base) = remote.url.strip_prefix("file://") else {
            return Ok(false);
        };
        let source = Path::new(base).join(request.relative_path());
        if !source.is_file() {
            return Ok(false);
        }

        let io = |source| RepositoryError::Io {
            path: target.to_path_buf(),
            source,
        };
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).map_err(io)?;
        }
        fs::copy(&source, target).map_err(io)?;
        debug!(artifact = %request, repository = %remote.id, "Fetched artifact");
        Ok(true)
    }
}

impl ArtifactRepository for LocalRepository {
    fn resolve(
        &self,
        request: &ArtifactRequest,
        repositories: &[RemoteRepository],
        policy: UpdatePolicy,
        cancel: &Cancellation,
    ) -> Result<PathBuf, RepositoryError> {
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }

        let target = self.path_for(request);
        let present = target.is_file();
        let refresh = policy == UpdatePolicy::AlwaysUpdateSnapshots && request.coordinate.is_snapshot();

        if present && !refresh {
            return Ok(target);
        }
        if policy == UpdatePolicy::Offline {
            return if present {
                Ok(target)
            } else {
                Err(RepositoryError::Offline(request.to_string()))
            };
        }

        for remote in repositories {
            if cancel.is_cancelled() {
                return Err(RepositoryError::Cancelled);
            }
            if self.fetch(request, remote, &target)? {
                return Ok(target);
            }
        }

        if present {
            Ok(target)
        } else {
            Err(RepositoryError::NotFound(request.to_string()))
        }
    }
}
