//! On-disk descriptor schema (`project.toml` / `project.yaml`)

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::Scope;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct Manifest {
    pub project: ProjectSection,
    pub parent: Option<ParentSection>,
    pub properties: BTreeMap<String, String>,
    pub build: BuildSection,
    pub dependencies: Vec<DependencySection>,
    pub dependency_management: Vec<DependencySection>,
    pub plugins: Vec<PluginSection>,
    pub profiles: Vec<ProfileSection>,
    pub repositories: Vec<RepositorySection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub(crate) struct ProjectSection {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
    pub packaging: Option<String>,
    pub modules: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ParentSection {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub relative_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub(crate) struct BuildSection {
    pub directory: Option<String>,
    pub source_dirs: Option<Vec<String>>,
    pub test_source_dirs: Option<Vec<String>>,
    pub resources: Option<Vec<String>>,
    pub test_resources: Option<Vec<String>>,
    pub output_dir: Option<String>,
    pub test_output_dir: Option<String>,
    pub generate_sources: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub(crate) struct DependencySection {
    pub coordinate: Option<String>,
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
    pub scope: Option<Scope>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub classifier: Option<String>,
    pub optional: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct PluginSection {
    pub coordinate: String,
    #[serde(default)]
    pub extensions: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub(crate) struct ProfileSection {
    pub id: String,
    pub active_by_default: bool,
    pub properties: BTreeMap<String, String>,
    pub modules: Vec<String>,
    pub dependencies: Vec<DependencySection>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RepositorySection {
    pub id: String,
    pub url: String,
}

/// Profiles contributed by a `profiles.toml` next to the descriptor
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ProfilesFile {
    pub profiles: Vec<ProfileSection>,
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Parses a descriptor, choosing TOML or YAML by extension
pub(crate) fn load_manifest(path: &Path) -> Result<Manifest, String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("Failed to read descriptor: {}", e))?;
    if is_yaml(path) {
        serde_yaml::from_str(&content).map_err(|e| format!("Invalid descriptor: {}", e))
    } else {
        toml::from_str(&content).map_err(|e| format!("Invalid descriptor: {}", e))
    }
}

pub(crate) fn load_profiles_file(path: &Path) -> Result<ProfilesFile, String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("Failed to read profiles file: {}", e))?;
    toml::from_str(&content).map_err(|e| format!("Invalid profiles file: {}", e))
}
