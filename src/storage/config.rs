//! Configuration handling for buildtree
//!
//! Configuration is stored in `.buildtree/config.toml` (workspace) and
//! `~/.config/buildtree/config.toml` (global). The workspace file also
//! persists the managed files, profile selection and ignore rules.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reader::DEFAULT_DESCRIPTOR_NAME;

/// Name of the per-workspace state directory
pub const STATE_DIR: &str = ".buildtree";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Settings that affect reading and resolution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneralSettings {
    /// User-level settings file tracked by timestamps
    pub user_settings_file: Option<PathBuf>,

    /// Installation-wide settings file tracked by timestamps
    pub global_settings_file: Option<PathBuf>,

    /// Further files whose modification forces a re-read
    pub environment_files: Vec<PathBuf>,

    /// Local artifact repository (defaults to `.buildtree/repository`)
    pub local_repository: Option<PathBuf>,

    pub work_offline: bool,

    pub always_update_snapshots: bool,

    /// Resolve each plugin coordinate once per session
    pub plugin_cache: bool,

    /// Descriptor file name looked up in module directories
    pub descriptor_name: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            user_settings_file: None,
            global_settings_file: None,
            environment_files: Vec::new(),
            local_repository: None,
            work_offline: false,
            always_update_snapshots: false,
            plugin_cache: true,
            descriptor_name: DEFAULT_DESCRIPTOR_NAME.to_string(),
        }
    }
}

impl GeneralSettings {
    /// Configured user settings file, or `settings.toml` in the global config dir
    pub fn user_settings_path(&self) -> Option<PathBuf> {
        self.user_settings_file
            .clone()
            .or_else(|| Config::global_config_dir().map(|dir| dir.join("settings.toml")))
    }

    pub fn global_settings_path(&self) -> Option<PathBuf> {
        self.global_settings_file.clone()
    }

    pub fn effective_local_repository(&self, fallback: &Path) -> PathBuf {
        self.local_repository
            .clone()
            .unwrap_or_else(|| fallback.to_path_buf())
    }
}

/// Which stages run after a read
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Schedule dependency resolution for every re-read project
    pub resolve_on_read: bool,

    pub download_sources: bool,

    pub download_docs: bool,

    /// Run the descriptors' generate-sources commands
    pub generate_sources: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            resolve_on_read: true,
            download_sources: false,
            download_docs: false,
            generate_sources: true,
        }
    }
}

impl PipelineSettings {
    pub fn downloads_enabled(&self) -> bool {
        self.download_sources || self.download_docs
    }
}

/// Configuration for `buildtree watch`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchSettings {
    /// Debounce delay in milliseconds
    pub debounce_ms: u64,

    /// Size at which watch.log is rotated
    pub log_max_bytes: u64,

    /// Rotated logs to keep
    pub log_rotation_count: usize,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            log_max_bytes: 1024 * 1024,
            log_rotation_count: 7,
        }
    }
}

/// Managed files, profiles and ignore rules, relative to the workspace root
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceState {
    pub managed: Vec<PathBuf>,
    pub enabled_profiles: Vec<String>,
    pub disabled_profiles: Vec<String>,
    pub ignored: Vec<PathBuf>,
    pub ignored_patterns: Vec<String>,
}

/// Workspace-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub general: GeneralSettings,
    pub pipeline: PipelineSettings,
    pub watch: WatchSettings,
    pub state: WorkspaceState,
}

/// Global user configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GlobalConfig {
    /// Default output format (text or json)
    pub default_format: OutputFormat,

    /// Local repository used when a workspace sets none
    pub local_repository: Option<PathBuf>,

    /// Force offline mode in every workspace
    pub work_offline: bool,
}

/// Output format for commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Combined configuration (global + workspace)
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: WorkspaceConfig,
    pub global: GlobalConfig,
    pub root: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from default locations
    pub fn load() -> Result<Self> {
        let global = Self::load_global()?;
        let root = std::env::current_dir()
            .ok()
            .and_then(|dir| Self::find_workspace_root_from(&dir));
        let workspace = match &root {
            Some(root) => Self::load_workspace_config(root)?,
            None => WorkspaceConfig::default(),
        };

        Ok(Self { workspace, global, root })
    }

    /// Loads configuration for a specific workspace
    pub fn for_workspace(root: &Path) -> Result<Self> {
        let global = Self::load_global()?;
        let workspace = Self::load_workspace_config(root)?;

        Ok(Self {
            workspace,
            global,
            root: Some(root.to_path_buf()),
        })
    }

    /// Returns the global config directory
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "buildtree", "buildtree").map(|dirs| dirs.config_dir().to_path_buf())
    }

    fn load_global() -> Result<GlobalConfig> {
        let config_dir = match Self::global_config_dir() {
            Some(dir) => dir,
            None => return Ok(GlobalConfig::default()),
        };

        let config_path = config_dir.join("config.toml");
        if !config_path.exists() {
            return Ok(GlobalConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read global config: {}", config_path.display()))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse global config")
    }

    fn load_workspace_config(root: &Path) -> Result<WorkspaceConfig> {
        let config_path = root.join(STATE_DIR).join("config.toml");

        if !config_path.exists() {
            return Ok(WorkspaceConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read workspace config: {}", config_path.display()))?;

        let config: WorkspaceConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse workspace config")?;

        if config.general.descriptor_name.trim().is_empty() {
            return Err(ConfigError::Invalid("descriptor_name must not be empty".to_string()).into());
        }
        Ok(config)
    }

    /// Finds the workspace root by looking for a `.buildtree/` directory
    pub fn find_workspace_root_from(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();

        loop {
            if current.join(STATE_DIR).is_dir() {
                return Some(current);
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Returns true if we're in a buildtree workspace
    pub fn is_in_workspace(&self) -> bool {
        self.root.is_some()
    }

    /// Returns the workspace root, or an error if not in a workspace
    pub fn require_root(&self) -> Result<&Path> {
        self.root
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Not in a buildtree workspace. Run 'buildtree init' first."))
    }

    /// General settings with global overrides applied
    pub fn effective_general(&self) -> GeneralSettings {
        let mut general = self.workspace.general.clone();
        if general.local_repository.is_none() {
            general.local_repository = self.global.local_repository.clone();
        }
        general.work_offline |= self.global.work_offline;
        general
    }

    /// Saves the workspace configuration
    pub fn save_workspace(&self) -> Result<()> {
        let root = self.require_root()?;
        let config_path = root.join(STATE_DIR).join("config.toml");

        let content =
            toml::to_string_pretty(&self.workspace).context("Failed to serialize workspace config")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write workspace config: {}", config_path.display()))
    }
}
