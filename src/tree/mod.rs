//! The project tree
//!
//! Holds every known project, the aggregator/module structure and the
//! managed-file, ignore and profile settings that drive updates. Structural
//! indexes sit behind a single `RwLock`; node state is copy-on-write so
//! readers never wait on the descriptor reader or the repository.
//!
//! The update and delete algorithms live in `update.rs`.

mod events;
mod index;
mod node;
mod update;

pub use events::{EventDispatcher, ListenerId, NodeUpdate, TreeListener};
pub use node::{ProjectNode, ProjectState};
pub use update::UpdateSummary;

use globset::{Glob, GlobSet, GlobSetBuilder};
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::domain::{ArtifactIndex, Coordinate, ExplicitProfiles, Problem, ProfileState, ProjectGraph, Timestamp};
use crate::pipeline::Cancelled;
use crate::reader::{normalize_path, DescriptorReader, ProjectLocator};
use crate::storage::{NodeSnapshot, TreeSnapshot};
use index::Structure;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Update cancelled")]
    Cancelled,

    #[error("Invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl From<Cancelled> for TreeError {
    fn from(_: Cancelled) -> Self {
        TreeError::Cancelled
    }
}

/// Managed files, ignore rules and profile selection
#[derive(Default)]
struct Settings {
    managed: IndexSet<PathBuf>,
    ignored_paths: Vec<PathBuf>,
    ignored_patterns: Vec<String>,
    matcher: Option<GlobSet>,
    explicit: ExplicitProfiles,
    /// Explicit profiles no project currently offers
    parked: ExplicitProfiles,
}

impl Settings {
    fn is_ignored(&self, file: &Path) -> bool {
        self.ignored_paths.iter().any(|p| p == file)
            || self.matcher.as_ref().is_some_and(|m| m.is_match(file))
    }
}

fn build_matcher(patterns: &[String]) -> Result<Option<GlobSet>, TreeError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| TreeError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map(Some).map_err(|e| TreeError::InvalidPattern {
        pattern: patterns.join(","),
        message: e.to_string(),
    })
}

pub struct ProjectTree {
    structure: RwLock<Structure>,
    settings: Mutex<Settings>,
    artifact_index: RwLock<Arc<ArtifactIndex>>,
    events: Arc<EventDispatcher>,
    reader: Arc<dyn DescriptorReader>,
    read_stamps: AtomicU64,
}

impl ProjectTree {
    pub fn new(reader: Arc<dyn DescriptorReader>, events: Arc<EventDispatcher>) -> Self {
        Self {
            structure: RwLock::new(Structure::default()),
            settings: Mutex::new(Settings::default()),
            artifact_index: RwLock::new(Arc::new(ArtifactIndex::new())),
            events,
            reader,
            read_stamps: AtomicU64::new(0),
        }
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    pub fn reader(&self) -> &Arc<dyn DescriptorReader> {
        &self.reader
    }

    pub(crate) fn next_read_stamp(&self) -> u64 {
        self.read_stamps.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ==========================================================================
    // Managed files
    // ==========================================================================

    pub fn managed_files(&self) -> Vec<PathBuf> {
        self.settings.lock().managed.iter().cloned().collect()
    }

    /// Managed files that currently exist on disk
    pub fn existing_managed_files(&self) -> Vec<PathBuf> {
        self.managed_files().into_iter().filter(|f| f.is_file()).collect()
    }

    pub fn is_managed_file(&self, file: &Path) -> bool {
        self.settings.lock().managed.contains(file)
    }

    /// Adds managed files and merges the given profiles into the explicit set
    pub fn add_managed_files(&self, files: &[PathBuf], profiles: &ExplicitProfiles) {
        let mut settings = self.settings.lock();
        for file in files {
            settings.managed.insert(normalize_path(file));
        }
        settings.explicit = settings.explicit.merged_with(profiles);
    }

    /// Replaces the managed set and the explicit profiles
    pub fn reset_managed_files(&self, files: &[PathBuf], profiles: ExplicitProfiles) {
        let mut settings = self.settings.lock();
        settings.managed = files.iter().map(|f| normalize_path(f)).collect();
        settings.explicit = profiles;
        settings.parked = ExplicitProfiles::none();
    }

    pub fn remove_managed_files(&self, files: &[PathBuf]) {
        let mut settings = self.settings.lock();
        for file in files {
            settings.managed.shift_remove(&normalize_path(file));
        }
    }

    /// Whether `file` is managed, known, or declared as some project's module
    pub fn is_potential_project(&self, file: &Path) -> bool {
        let file = normalize_path(file);
        if self.is_managed_file(&file) {
            return true;
        }
        self.projects().iter().any(|p| {
            p.file() == file || p.state().model.module_files.iter().any(|m| *m == file)
        })
    }

    // ==========================================================================
    // Profiles
    // ==========================================================================

    pub fn explicit_profiles(&self) -> ExplicitProfiles {
        self.settings.lock().explicit.clone()
    }

    /// Explicit profiles including those parked while no project offers them
    pub fn requested_profiles(&self) -> ExplicitProfiles {
        let settings = self.settings.lock();
        settings.explicit.merged_with(&settings.parked)
    }

    pub fn set_explicit_profiles(&self, profiles: ExplicitProfiles) {
        {
            let mut settings = self.settings.lock();
            settings.explicit = profiles;
            settings.parked = ExplicitProfiles::none();
        }
        self.update_explicit_profiles();
        self.events.fire_profiles_changed();
    }

    /// Profile ids offered by any project
    pub fn available_profiles(&self) -> BTreeSet<String> {
        self.projects()
            .iter()
            .flat_map(|p| p.state().model.profiles.clone())
            .collect()
    }

    pub fn profiles_with_states(&self) -> Vec<(String, ProfileState)> {
        let explicit = self.explicit_profiles();
        let active: HashSet<String> = self
            .projects()
            .iter()
            .flat_map(|p| p.state().model.active_profiles.clone())
            .collect();

        self.available_profiles()
            .into_iter()
            .map(|id| {
                let state = if explicit.enabled.contains(&id) {
                    ProfileState::Explicit
                } else if explicit.disabled.contains(&id) {
                    ProfileState::Disabled
                } else if active.contains(&id) {
                    ProfileState::Implicit
                } else {
                    ProfileState::Inactive
                };
                (id, state)
            })
            .collect()
    }

    pub(crate) fn update_explicit_profiles(&self) {
        let available = self.available_profiles();
        let mut settings = self.settings.lock();
        let Settings { explicit, parked, .. } = &mut *settings;
        if explicit.retain_available(parked, &available) {
            debug!(profiles = %explicit, "Explicit profiles adjusted to available ones");
        }
    }

    // ==========================================================================
    // Ignoring
    // ==========================================================================

    pub fn ignored_paths(&self) -> Vec<PathBuf> {
        self.settings.lock().ignored_paths.clone()
    }

    pub fn ignored_patterns(&self) -> Vec<String> {
        self.settings.lock().ignored_patterns.clone()
    }

    pub fn set_ignored_paths(&self, paths: Vec<PathBuf>) {
        let paths: Vec<PathBuf> = paths.iter().map(|p| normalize_path(p)).collect();
        // cannot fail: patterns are untouched
        let _ = self.change_ignore_status(|settings| {
            settings.ignored_paths = paths;
            Ok(())
        });
    }

    pub fn set_ignored_patterns(&self, patterns: Vec<String>) -> Result<(), TreeError> {
        let matcher = build_matcher(&patterns)?;
        self.change_ignore_status(|settings| {
            settings.ignored_patterns = patterns;
            settings.matcher = matcher;
            Ok(())
        })
    }

    /// Adds or removes nodes from the ignored paths
    pub fn set_ignored(&self, nodes: &[Arc<ProjectNode>], ignored: bool) {
        let _ = self.change_ignore_status(|settings| {
            for node in nodes {
                let file = node.file().to_path_buf();
                settings.ignored_paths.retain(|p| *p != file);
                if ignored {
                    settings.ignored_paths.push(file);
                }
            }
            Ok(())
        });
    }

    pub fn is_ignored(&self, node: &ProjectNode) -> bool {
        self.settings.lock().is_ignored(node.file())
    }

    fn change_ignore_status(
        &self,
        change: impl FnOnce(&mut Settings) -> Result<(), TreeError>,
    ) -> Result<(), TreeError> {
        let projects = self.projects();
        let (ignored, unignored) = {
            let mut settings = self.settings.lock();
            let before: Vec<bool> = projects.iter().map(|p| settings.is_ignored(p.file())).collect();
            change(&mut settings)?;

            let mut ignored = Vec::new();
            let mut unignored = Vec::new();
            for (project, was) in projects.iter().zip(before) {
                match (was, settings.is_ignored(project.file())) {
                    (false, true) => ignored.push(Arc::clone(project)),
                    (true, false) => unignored.push(Arc::clone(project)),
                    _ => {}
                }
            }
            (ignored, unignored)
        };
        self.events.fire_ignored_state_changed(&ignored, &unignored);
        Ok(())
    }

    // ==========================================================================
    // Queries
    // ==========================================================================

    pub fn has_projects(&self) -> bool {
        !self.structure.read().by_file.is_empty()
    }

    pub fn len(&self) -> usize {
        self.structure.read().by_file.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_projects()
    }

    pub fn root_projects(&self) -> Vec<Arc<ProjectNode>> {
        self.structure.read().roots.clone()
    }

    /// Every project, ordered by file
    pub fn projects(&self) -> Vec<Arc<ProjectNode>> {
        let mut projects: Vec<_> = self.structure.read().by_file.values().cloned().collect();
        projects.sort_by(|a, b| a.file().cmp(b.file()));
        projects
    }

    pub fn non_ignored_projects(&self) -> Vec<Arc<ProjectNode>> {
        let projects = self.projects();
        let settings = self.settings.lock();
        projects.into_iter().filter(|p| !settings.is_ignored(p.file())).collect()
    }

    pub fn contains(&self, node: &ProjectNode) -> bool {
        self.structure.read().by_file.contains_key(node.file())
    }

    pub fn find_by_file(&self, file: &Path) -> Option<Arc<ProjectNode>> {
        self.structure.read().by_file.get(file).cloned()
    }

    pub fn find_by_coordinate(&self, coordinate: &Coordinate) -> Option<Arc<ProjectNode>> {
        self.structure.read().by_coordinate.get(coordinate).cloned()
    }

    pub fn find_aggregator(&self, node: &ProjectNode) -> Option<Arc<ProjectNode>> {
        self.structure.read().aggregator_of(node.file()).cloned()
    }

    /// Topmost aggregator of `node`, or `node` itself when it is a root
    pub fn find_root(&self, node: &Arc<ProjectNode>) -> Arc<ProjectNode> {
        let structure = self.structure.read();
        let mut current = Arc::clone(node);
        let mut hops = 0;
        while let Some(aggregator) = structure.aggregator_of(current.file()) {
            hops += 1;
            if hops > structure.by_file.len() {
                break;
            }
            current = Arc::clone(aggregator);
        }
        current
    }

    pub fn is_root(&self, node: &ProjectNode) -> bool {
        self.structure.read().roots.iter().any(|r| r.file() == node.file())
    }

    pub fn modules(&self, node: &ProjectNode) -> Vec<Arc<ProjectNode>> {
        self.structure.read().modules_of(node.file())
    }

    /// Projects whose parent coordinate is this node's coordinate
    pub fn find_inheritors(&self, node: &ProjectNode) -> Vec<Arc<ProjectNode>> {
        let coordinate = node.coordinate();
        let mut inheritors: Vec<_> = self
            .structure
            .read()
            .by_file
            .values()
            .filter(|p| p.file() != node.file() && p.parent_coordinate().as_ref() == Some(&coordinate))
            .cloned()
            .collect();
        inheritors.sort_by(|a, b| a.file().cmp(b.file()));
        inheritors
    }

    /// The project this node inherits from, if it is in the tree
    pub fn find_parent(&self, node: &ProjectNode) -> Option<Arc<ProjectNode>> {
        let parent = node.parent_coordinate()?;
        self.find_by_coordinate(&parent).filter(|p| p.file() != node.file())
    }

    /// Projects that aggregate or depend on any of `nodes`
    pub fn dependent_projects(&self, nodes: &[Arc<ProjectNode>]) -> Vec<Arc<ProjectNode>> {
        let files: HashSet<&Path> = nodes.iter().map(|n| n.file()).collect();
        let coordinates: HashSet<Coordinate> = nodes.iter().map(|n| n.coordinate()).collect();

        self.projects()
            .into_iter()
            .filter(|p| !files.contains(p.file()))
            .filter(|p| {
                let state = p.state();
                state.model.module_files.iter().any(|m| files.contains(m.as_path()))
                    || state.model.dependencies.iter().any(|d| coordinates.contains(&d.coordinate))
            })
            .collect()
    }

    /// Depth-first traversal from the roots: `(depth, node)` pairs
    pub fn walk(&self) -> Vec<(usize, Arc<ProjectNode>)> {
        let structure = self.structure.read();
        let mut result = Vec::new();
        let mut stack: Vec<(usize, Arc<ProjectNode>)> =
            structure.roots.iter().rev().map(|r| (0, Arc::clone(r))).collect();
        let mut visited = HashSet::new();

        while let Some((depth, node)) = stack.pop() {
            if !visited.insert(node.file().to_path_buf()) {
                continue;
            }
            for module in structure.modules_of(node.file()).into_iter().rev() {
                stack.push((depth + 1, module));
            }
            result.push((depth, node));
        }
        result
    }

    pub fn artifact_index(&self) -> Arc<ArtifactIndex> {
        Arc::clone(&self.artifact_index.read())
    }

    pub(crate) fn rebuild_artifact_index(&self) {
        let states: Vec<Arc<ProjectState>> = self.projects().iter().map(|p| p.state()).collect();
        let index = ArtifactIndex::build(states.iter().flat_map(|s| s.dependencies.iter()));
        debug!(artifacts = index.len(), "Rebuilt artifact index");
        *self.artifact_index.write() = Arc::new(index);
    }

    /// Dependency graph between the projects of this tree
    pub fn project_graph(&self) -> ProjectGraph {
        ProjectGraph::build(self.projects().iter().map(|p| {
            let state = p.state();
            let dependencies = state.model.dependencies.iter().map(|d| d.coordinate.clone()).collect();
            (state.coordinate().clone(), dependencies)
        }))
    }

    pub fn timestamp_of(&self, node: &ProjectNode) -> Option<Timestamp> {
        self.structure.read().timestamps.get(node.file()).cloned()
    }

    // ==========================================================================
    // Stage results
    // ==========================================================================

    /// Installs a stage result computed from the state read at `basis_stamp`.
    ///
    /// Dropped when the node left the tree or was re-read in the meantime.
    pub(crate) fn install_stage_result(
        &self,
        node: &Arc<ProjectNode>,
        basis_stamp: u64,
        f: impl FnOnce(&ProjectState) -> ProjectState,
    ) -> Option<(Arc<ProjectState>, Arc<ProjectState>)> {
        let structure = self.structure.write();
        if !structure.by_file.get(node.file()).is_some_and(|n| Arc::ptr_eq(n, node)) {
            debug!(file = %node.file().display(), "Dropping stage result for removed project");
            return None;
        }
        let installed = node.update_state(|current| {
            (current.last_read_stamp == basis_stamp).then(|| f(current))
        });
        if installed.is_none() {
            debug!(file = %node.file().display(), "Dropping stage result for re-read project");
        }
        installed
    }

    /// Records a problem on the project owning `file`
    pub fn record_problem(&self, file: &Path, problem: Problem) -> bool {
        let structure = self.structure.write();
        match structure.by_file.get(file) {
            Some(node) => node.update_state(|s| s.with_problem(problem)).is_some(),
            None => false,
        }
    }

    // ==========================================================================
    // Snapshots
    // ==========================================================================

    pub fn snapshot(&self) -> TreeSnapshot {
        let (managed_files, ignored_paths, ignored_patterns, explicit_profiles) = {
            let settings = self.settings.lock();
            (
                settings.managed.iter().cloned().collect(),
                settings.ignored_paths.clone(),
                settings.ignored_patterns.clone(),
                settings.explicit.clone(),
            )
        };

        let structure = self.structure.read();
        let roots = structure.roots.iter().map(|r| node_snapshot(&structure, r)).collect();

        TreeSnapshot {
            managed_files,
            ignored_paths,
            ignored_patterns,
            explicit_profiles,
            roots,
        }
    }

    /// Rebuilds a tree from a snapshot without reading any descriptor
    pub fn restore(
        snapshot: TreeSnapshot,
        reader: Arc<dyn DescriptorReader>,
        events: Arc<EventDispatcher>,
    ) -> Result<Self, TreeError> {
        let tree = Self::new(reader, events);
        let matcher = build_matcher(&snapshot.ignored_patterns)?;
        {
            let mut settings = tree.settings.lock();
            settings.managed = snapshot.managed_files.into_iter().collect();
            settings.ignored_paths = snapshot.ignored_paths;
            settings.ignored_patterns = snapshot.ignored_patterns;
            settings.matcher = matcher;
            settings.explicit = snapshot.explicit_profiles;
        }

        let mut max_stamp = 0;
        {
            let mut structure = tree.structure.write();
            for root in snapshot.roots {
                restore_node(&mut structure, None, root, &mut max_stamp);
            }
        }
        tree.read_stamps.store(max_stamp, Ordering::SeqCst);
        tree.rebuild_artifact_index();
        Ok(tree)
    }
}

fn node_snapshot(structure: &Structure, node: &Arc<ProjectNode>) -> NodeSnapshot {
    NodeSnapshot {
        state: (*node.state()).clone(),
        timestamp: structure
            .timestamps
            .get(node.file())
            .cloned()
            .unwrap_or_else(Timestamp::missing),
        modules: structure
            .modules_of(node.file())
            .iter()
            .map(|m| node_snapshot(structure, m))
            .collect(),
    }
}

fn restore_node(structure: &mut Structure, aggregator: Option<&Arc<ProjectNode>>, snapshot: NodeSnapshot, max_stamp: &mut u64) {
    let node = ProjectNode::with_state(snapshot.state);
    *max_stamp = (*max_stamp).max(node.last_read_stamp());
    structure.register(&node);
    structure.attach(aggregator, &node);
    structure
        .timestamps
        .insert(node.file().to_path_buf(), snapshot.timestamp);
    for module in snapshot.modules {
        restore_node(structure, Some(&node), module, max_stamp);
    }
}

impl ProjectLocator for ProjectTree {
    fn find_state(&self, coordinate: &Coordinate) -> Option<Arc<ProjectState>> {
        self.find_by_coordinate(coordinate).map(|n| n.state())
    }
}
