//! Workspace management
//!
//! Handles workspace initialization and wires the configuration into a
//! tree, a reader and a repository.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info};

use super::config::STATE_DIR;
use super::{Config, GeneralSettings, PipelineSettings, SnapshotStore};
use crate::domain::ExplicitProfiles;
use crate::pipeline::ProjectsManager;
use crate::reader::{normalize_path, TomlDescriptorReader};
use crate::repository::LocalRepository;
use crate::tree::{EventDispatcher, ProjectTree};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Not in a buildtree workspace. Run 'buildtree init' first.")]
    NotInWorkspace,

    #[error("{0} is outside the workspace")]
    OutsideWorkspace(PathBuf),
}

/// A buildtree workspace
pub struct Workspace {
    root: PathBuf,
    config: Config,
}

impl Workspace {
    /// Opens an existing workspace at the given path
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = absolutize(&root.into())?;

        if !root.join(STATE_DIR).is_dir() {
            return Err(WorkspaceError::NotInWorkspace.into());
        }

        let config = Config::for_workspace(&root)?;

        Ok(Self { root, config })
    }

    /// Opens the workspace at the current directory or a parent
    pub fn open_current() -> Result<Self> {
        let current = std::env::current_dir().context("Failed to determine current directory")?;
        let root = Config::find_workspace_root_from(&current).ok_or(WorkspaceError::NotInWorkspace)?;

        Self::open(root)
    }

    /// Initializes a new workspace at the given path
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = absolutize(&root.into())?;
        let state_dir = root.join(STATE_DIR);

        fs::create_dir_all(&state_dir).with_context(|| {
            format!("Failed to create {} directory: {}", STATE_DIR, state_dir.display())
        })?;

        let config_path = state_dir.join("config.toml");
        if !config_path.exists() {
            let default_config = r#"# buildtree workspace configuration

[general]
descriptor_name = "project.toml"
work_offline = false
plugin_cache = true

[pipeline]
resolve_on_read = true
download_sources = false
download_docs = false
generate_sources = true

[watch]
debounce_ms = 500
"#;
            fs::write(&config_path, default_config)
                .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        }

        let gitignore_path = state_dir.join(".gitignore");
        if !gitignore_path.exists() {
            let gitignore = r#"# Tree snapshot (regenerated from descriptors)
tree.bin
tree.bin.tmp

# Local artifact repository
repository/

# Watch logs
watch.log*
"#;
            fs::write(&gitignore_path, gitignore).with_context(|| {
                format!("Failed to write .gitignore: {}", gitignore_path.display())
            })?;
        }

        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the .buildtree directory path
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn snapshot_store(&self) -> SnapshotStore {
        SnapshotStore::new(self.state_dir().join("tree.bin"))
    }

    pub fn log_path(&self) -> PathBuf {
        self.state_dir().join("watch.log")
    }

    /// Effective general settings with paths made absolute
    pub fn general(&self) -> GeneralSettings {
        let mut general = self.config.effective_general();
        general.user_settings_file = general.user_settings_file.map(|p| self.absolute(&p));
        general.global_settings_file = general.global_settings_file.map(|p| self.absolute(&p));
        general.environment_files = general.environment_files.iter().map(|p| self.absolute(p)).collect();
        general.local_repository = Some(
            general
                .local_repository
                .as_deref()
                .map(|p| self.absolute(p))
                .unwrap_or_else(|| self.state_dir().join("repository")),
        );
        general
    }

    pub fn reader(&self) -> Arc<TomlDescriptorReader> {
        Arc::new(TomlDescriptorReader::new(
            self.config.workspace.general.descriptor_name.clone(),
        ))
    }

    pub fn repository(&self) -> Arc<LocalRepository> {
        let general = self.general();
        Arc::new(LocalRepository::new(
            general.effective_local_repository(&self.state_dir().join("repository")),
        ))
    }

    // ==========================================================================
    // Persisted state
    // ==========================================================================

    pub fn managed_files(&self) -> Vec<PathBuf> {
        self.config.workspace.state.managed.iter().map(|p| self.absolute(p)).collect()
    }

    pub fn explicit_profiles(&self) -> ExplicitProfiles {
        let state = &self.config.workspace.state;
        ExplicitProfiles::new(state.enabled_profiles.iter().cloned(), state.disabled_profiles.iter().cloned())
    }

    /// Copies managed files, profiles and ignore rules from the tree into the
    /// workspace config and saves it
    pub fn record_state(&mut self, tree: &ProjectTree) -> Result<()> {
        let profiles = tree.requested_profiles();
        let managed = tree.managed_files().iter().map(|p| self.relative(p)).collect();
        let ignored = tree.ignored_paths().iter().map(|p| self.relative(p)).collect();

        let state = &mut self.config.workspace.state;
        state.managed = managed;
        state.ignored = ignored;
        state.ignored_patterns = tree.ignored_patterns();
        state.enabled_profiles = profiles.enabled.into_iter().collect();
        state.disabled_profiles = profiles.disabled.into_iter().collect();

        self.config.save_workspace()
    }

    // ==========================================================================
    // Tree
    // ==========================================================================

    /// Restores the tree from the snapshot, or starts empty, then applies
    /// the configured managed files, profiles and ignore rules
    pub fn load_tree(&self, events: Arc<EventDispatcher>) -> Result<ProjectTree> {
        let reader = self.reader();
        let tree = match self.snapshot_store().load()? {
            Some(snapshot) => {
                debug!(nodes = snapshot.node_count(), "Restoring tree from snapshot");
                ProjectTree::restore(snapshot, reader, events)?
            }
            None => ProjectTree::new(reader, events),
        };

        let state = &self.config.workspace.state;
        tree.reset_managed_files(&self.managed_files(), self.explicit_profiles());
        tree.set_ignored_paths(state.ignored.iter().map(|p| self.absolute(p)).collect());
        tree.set_ignored_patterns(state.ignored_patterns.clone())?;
        Ok(tree)
    }

    /// Loads the tree and starts the stage processors over it
    pub fn open_manager(&self) -> Result<ProjectsManager> {
        self.open_manager_with(self.config.workspace.pipeline.clone())
    }

    /// Like [`Workspace::open_manager`] with pipeline settings that are not persisted
    pub fn open_manager_with(&self, pipeline: PipelineSettings) -> Result<ProjectsManager> {
        let tree = Arc::new(self.load_tree(EventDispatcher::new())?);
        let manager = ProjectsManager::new(tree, self.repository(), self.general(), pipeline)
        .context("Failed to start processing threads")?;
        Ok(manager)
    }

    pub fn save_tree(&self, tree: &ProjectTree) -> Result<()> {
        let store = self.snapshot_store();
        store
            .save(&tree.snapshot())
            .with_context(|| format!("Failed to save snapshot: {}", store.path().display()))?;
        info!(projects = tree.len(), "Saved tree snapshot");
        Ok(())
    }

    // ==========================================================================
    // Paths
    // ==========================================================================

    /// Checks if a path is inside this workspace
    pub fn contains(&self, path: &Path) -> bool {
        self.absolute(path).starts_with(&self.root)
    }

    /// Returns a relative path from the workspace root, or the path itself
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Resolves a path against the workspace root
    pub fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.root.join(path))
        }
    }

    /// Resolves a user-supplied path against the current directory
    pub fn resolve_argument(&self, path: &Path) -> Result<PathBuf> {
        let resolved = absolutize(path)?;
        if !resolved.starts_with(&self.root) {
            return Err(WorkspaceError::OutsideWorkspace(resolved).into());
        }
        Ok(resolved)
    }

    /// A descriptor path for `path`, appending the descriptor name to directories
    pub fn descriptor_for(&self, path: &Path) -> Result<PathBuf> {
        let resolved = self.resolve_argument(path)?;
        if resolved.is_dir() {
            Ok(resolved.join(&self.config.workspace.general.descriptor_name))
        } else {
            Ok(resolved)
        }
    }
}

/// Makes `path` absolute against the current directory and normalizes it
fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize_path(path));
    }
    let current = std::env::current_dir().context("Failed to determine current directory")?;
    Ok(normalize_path(&current.join(path)))
}
