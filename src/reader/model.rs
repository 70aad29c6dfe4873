//! Effective project model produced by a descriptor reader

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain::{Artifact, Coordinate, Plugin, RemoteRepository};

/// Default packaging when a descriptor names none
pub const DEFAULT_PACKAGING: &str = "jar";

/// Everything a read yields about one descriptor, after inheritance and
/// interpolation. Paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectModel {
    pub coordinate: Coordinate,
    pub parent: Option<Coordinate>,
    pub packaging: String,
    /// Module paths as written in the descriptor
    pub module_paths: Vec<String>,
    /// Descriptor files the module paths point at, existing or not
    pub module_files: Vec<PathBuf>,
    pub properties: BTreeMap<String, String>,
    pub build_directory: PathBuf,
    pub source_roots: Vec<PathBuf>,
    pub test_source_roots: Vec<PathBuf>,
    pub resources: Vec<PathBuf>,
    pub test_resources: Vec<PathBuf>,
    pub output_directory: PathBuf,
    pub test_output_directory: PathBuf,
    pub dependencies: Vec<Artifact>,
    /// Versions offered to children that omit them
    pub managed_dependencies: Vec<Artifact>,
    pub plugins: Vec<Plugin>,
    /// Profile ids declared by the descriptor or its profiles file
    pub profiles: Vec<String>,
    pub active_profiles: Vec<String>,
    pub repositories: Vec<RemoteRepository>,
    /// Command run by the folder stage, empty for none
    pub generate_sources: Vec<String>,
}

impl ProjectModel {
    /// Best-effort model for a descriptor that could not be read
    pub fn unknown(file: &Path) -> Self {
        let dir = file.parent().unwrap_or_else(|| Path::new("."));
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        let build_directory = dir.join("target");

        Self {
            coordinate: Coordinate::unknown(name),
            parent: None,
            packaging: DEFAULT_PACKAGING.to_string(),
            module_paths: Vec::new(),
            module_files: Vec::new(),
            properties: BTreeMap::new(),
            output_directory: build_directory.join("classes"),
            test_output_directory: build_directory.join("test-classes"),
            build_directory,
            source_roots: Vec::new(),
            test_source_roots: Vec::new(),
            resources: Vec::new(),
            test_resources: Vec::new(),
            dependencies: Vec::new(),
            managed_dependencies: Vec::new(),
            plugins: Vec::new(),
            profiles: Vec::new(),
            active_profiles: Vec::new(),
            repositories: Vec::new(),
            generate_sources: Vec::new(),
        }
    }

    pub fn is_aggregator(&self) -> bool {
        !self.module_files.is_empty()
    }
}
