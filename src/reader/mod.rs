//! Descriptor reading
//!
//! The tree only talks to a [`DescriptorReader`]. Reading is pure: it never
//! touches the tree except through the [`ProjectLocator`] it is handed, and
//! never fails; malformed input produces a best-effort model plus problems.

mod file_reader;
mod interpolate;
mod manifest;
mod model;

pub use file_reader::{TomlDescriptorReader, DEFAULT_DESCRIPTOR_NAME, PROFILES_FILE_NAME};
pub use interpolate::interpolate;
pub use model::{ProjectModel, DEFAULT_PACKAGING};

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::domain::{Coordinate, ExplicitProfiles, Problem};
use crate::tree::ProjectState;

/// Outcome of reading one descriptor
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub model: ProjectModel,
    pub problems: Vec<Problem>,
}

/// Gives the reader access to already-read projects, for parent lookup
pub trait ProjectLocator {
    fn find_state(&self, coordinate: &Coordinate) -> Option<Arc<ProjectState>>;
}

/// Locator that knows no projects; parents are read from disk
pub struct NoLocator;

impl ProjectLocator for NoLocator {
    fn find_state(&self, _coordinate: &Coordinate) -> Option<Arc<ProjectState>> {
        None
    }
}

/// Parses descriptors into effective project models
pub trait DescriptorReader: Send + Sync {
    fn read(&self, file: &Path, profiles: &ExplicitProfiles, locator: &dyn ProjectLocator) -> ReadResult;

    /// Extra profile file that contributes to `descriptor`, if any
    fn profiles_file(&self, _descriptor: &Path) -> Option<PathBuf> {
        None
    }

    /// Whether `path` names a descriptor this reader understands
    fn is_descriptor(&self, path: &Path) -> bool;
}

/// Lexically normalizes a path, resolving `.` and `..` components
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match result.components().next_back() {
                Some(Component::Normal(_)) => {
                    result.pop();
                }
                // `..` at the root stays at the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => result.push(".."),
            },
            other => result.push(other.as_os_str()),
        }
    }
    result
}
