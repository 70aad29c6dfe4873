//! Project nodes and their immutable state snapshots
//!
//! A node owns its descriptor file for life. Everything else lives in a
//! [`ProjectState`] that is replaced wholesale, never edited in place, so a
//! reader holding an `Arc<ProjectState>` always sees a consistent project.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::{Artifact, Coordinate, Problem, ProblemKind, ProjectChanges};
use crate::reader::ProjectModel;

/// Immutable snapshot of everything known about one project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    pub file: PathBuf,
    pub model: ProjectModel,
    /// Tree-wide read counter value at the time of the last read, 0 if never read
    pub last_read_stamp: u64,
    pub problems: Vec<Problem>,
    /// Dependency artifacts, declared until the resolve stage fills in files
    pub dependencies: Vec<Artifact>,
    pub dependencies_resolved: bool,
    pub plugin_artifacts: Vec<Artifact>,
    pub generated_sources: Vec<PathBuf>,
    pub downloaded: Vec<Artifact>,
    valid: bool,
    unresolved_plugins: bool,
}

impl ProjectState {
    /// State of a node that has not been read yet
    pub fn unread(file: &Path) -> Self {
        Self::from_read(file, ProjectModel::unknown(file), Vec::new(), 0)
    }

    /// Fresh state after a read; resolution results start empty
    pub fn from_read(file: &Path, model: ProjectModel, problems: Vec<Problem>, stamp: u64) -> Self {
        Self {
            file: file.to_path_buf(),
            dependencies: model.dependencies.clone(),
            model,
            last_read_stamp: stamp,
            problems,
            dependencies_resolved: false,
            plugin_artifacts: Vec::new(),
            generated_sources: Vec::new(),
            downloaded: Vec::new(),
            valid: false,
            unresolved_plugins: false,
        }
        .finish()
    }

    fn finish(mut self) -> Self {
        self.valid = self.last_read_stamp > 0 && !self.problems.iter().any(|p| p.kind == ProblemKind::Parse);
        self.unresolved_plugins = self.model.plugins.iter().any(|plugin| {
            !self
                .plugin_artifacts
                .iter()
                .any(|a| a.resolved && a.coordinate == plugin.coordinate)
        });
        self
    }

    pub fn coordinate(&self) -> &Coordinate {
        &self.model.coordinate
    }

    pub fn parent(&self) -> Option<&Coordinate> {
        self.model.parent.as_ref()
    }

    /// Read at least once and parsed without errors
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn has_unresolved_plugins(&self) -> bool {
        self.unresolved_plugins
    }

    pub fn has_problems(&self) -> bool {
        !self.problems.is_empty()
    }

    pub fn directory(&self) -> &Path {
        self.file.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn display_name(&self) -> &str {
        self.model.coordinate.artifact_id()
    }

    pub fn with_resolved_dependencies(&self, artifacts: Vec<Artifact>, problems: Vec<Problem>) -> Self {
        let mut state = self.clone();
        state.dependencies = artifacts;
        state.dependencies_resolved = true;
        state.problems = Problem::replace_kinds(&self.problems, &[ProblemKind::UnresolvedDependency], problems);
        state.finish()
    }

    pub fn with_resolved_plugins(&self, artifacts: Vec<Artifact>, problems: Vec<Problem>) -> Self {
        let mut state = self.clone();
        state.plugin_artifacts = artifacts;
        state.problems = Problem::replace_kinds(
            &self.problems,
            &[ProblemKind::UnresolvedPlugin, ProblemKind::UnresolvedExtension],
            problems,
        );
        state.finish()
    }

    pub fn with_generated_sources(&self, directories: Vec<PathBuf>, problems: Vec<Problem>) -> Self {
        let mut state = self.clone();
        state.generated_sources = directories;
        state.problems = Problem::replace_kinds(&self.problems, &[ProblemKind::Generation], problems);
        state.finish()
    }

    pub fn with_downloaded(&self, artifacts: Vec<Artifact>) -> Self {
        let mut state = self.clone();
        state.downloaded = artifacts;
        state.finish()
    }

    /// Adds a problem, or returns None if it is already recorded
    pub fn with_problem(&self, problem: Problem) -> Option<Self> {
        if self.problems.contains(&problem) {
            return None;
        }
        let mut state = self.clone();
        state.problems.push(problem);
        Some(state.finish())
    }

    /// What differs between the descriptor models of `previous` and this state
    pub fn model_changes_since(&self, previous: &ProjectState) -> ProjectChanges {
        let (m, p) = (&self.model, &previous.model);
        ProjectChanges::NONE
            .with_if(ProjectChanges::PACKAGING, m.packaging != p.packaging)
            .with_if(
                ProjectChanges::OUTPUT,
                m.build_directory != p.build_directory
                    || m.output_directory != p.output_directory
                    || m.test_output_directory != p.test_output_directory,
            )
            .with_if(
                ProjectChanges::SOURCES,
                m.source_roots != p.source_roots
                    || m.test_source_roots != p.test_source_roots
                    || m.resources != p.resources
                    || m.test_resources != p.test_resources,
            )
            .with_if(ProjectChanges::DEPENDENCIES, m.dependencies != p.dependencies)
            .with_if(ProjectChanges::PLUGINS, m.plugins != p.plugins)
            .with_if(ProjectChanges::PROPERTIES, m.properties != p.properties)
    }

    /// Model changes plus differences in resolution results
    pub fn changes_since(&self, previous: &ProjectState) -> ProjectChanges {
        self.model_changes_since(previous)
            .with_if(ProjectChanges::SOURCES, self.generated_sources != previous.generated_sources)
            .with_if(ProjectChanges::DEPENDENCIES, self.dependencies != previous.dependencies)
            .with_if(ProjectChanges::PLUGINS, self.plugin_artifacts != previous.plugin_artifacts)
    }
}

/// A project in the tree
pub struct ProjectNode {
    file: PathBuf,
    state: Mutex<Arc<ProjectState>>,
}

impl ProjectNode {
    pub(crate) fn new(file: &Path) -> Arc<Self> {
        Self::with_state(ProjectState::unread(file))
    }

    pub(crate) fn with_state(state: ProjectState) -> Arc<Self> {
        Arc::new(Self {
            file: state.file.clone(),
            state: Mutex::new(Arc::new(state)),
        })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn directory(&self) -> &Path {
        self.file.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Current state; holding it does not block writers
    pub fn state(&self) -> Arc<ProjectState> {
        Arc::clone(&self.state.lock())
    }

    pub fn coordinate(&self) -> Coordinate {
        self.state.lock().model.coordinate.clone()
    }

    pub fn parent_coordinate(&self) -> Option<Coordinate> {
        self.state.lock().model.parent.clone()
    }

    pub fn last_read_stamp(&self) -> u64 {
        self.state.lock().last_read_stamp
    }

    pub fn problems(&self) -> Vec<Problem> {
        self.state.lock().problems.clone()
    }

    pub fn display_name(&self) -> String {
        self.state.lock().display_name().to_string()
    }

    /// Installs a new state, returning the previous one
    pub(crate) fn install(&self, state: ProjectState) -> Arc<ProjectState> {
        let mut guard = self.state.lock();
        debug_assert!(state.last_read_stamp >= guard.last_read_stamp);
        std::mem::replace(&mut *guard, Arc::new(state))
    }

    /// Derives and installs a new state from the current one atomically.
    ///
    /// Returns the previous and the installed state, or None when `f`
    /// declined to produce one.
    pub(crate) fn update_state(
        &self,
        f: impl FnOnce(&ProjectState) -> Option<ProjectState>,
    ) -> Option<(Arc<ProjectState>, Arc<ProjectState>)> {
        let mut guard = self.state.lock();
        let next = Arc::new(f(&guard)?);
        let previous = std::mem::replace(&mut *guard, Arc::clone(&next));
        Some((previous, next))
    }
}

impl PartialEq for ProjectNode {
    fn eq(&self, other: &Self) -> bool {
        self.file == other.file
    }
}

impl Eq for ProjectNode {}

impl Hash for ProjectNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file.hash(state);
    }
}

impl fmt::Debug for ProjectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectNode")
            .field("file", &self.file)
            .field("coordinate", &self.coordinate())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Plugin, Scope};

    fn model(file: &Path) -> ProjectModel {
        let mut model = ProjectModel::unknown(file);
        model.coordinate = Coordinate::new("g", "a", "1.0");
        model
    }

    #[test]
    fn unread_state_is_invalid() {
        let state = ProjectState::unread(Path::new("/p/project.toml"));
        assert!(!state.is_valid());
        assert_eq!(state.last_read_stamp, 0);
    }

    #[test]
    fn parse_problem_invalidates_state() {
        let file = Path::new("/p/project.toml");
        let ok = ProjectState::from_read(file, model(file), vec![], 1);
        assert!(ok.is_valid());

        let broken = ProjectState::from_read(file, model(file), vec![Problem::parse(file, "bad")], 2);
        assert!(!broken.is_valid());
    }

    #[test]
    fn unresolved_plugins_are_computed_eagerly() {
        let file = Path::new("/p/project.toml");
        let mut m = model(file);
        let plugin = Plugin::new(Coordinate::new("g", "plugin", "1"), false);
        m.plugins.push(plugin.clone());

        let state = ProjectState::from_read(file, m, vec![], 1);
        assert!(state.has_unresolved_plugins());

        let resolved = Artifact::new(plugin.coordinate.clone(), Scope::Compile).resolved_to("/repo/p.jar");
        let state = state.with_resolved_plugins(vec![resolved], vec![]);
        assert!(!state.has_unresolved_plugins());
    }

    #[test]
    fn changes_detect_dependency_and_property_edits() {
        let file = Path::new("/p/project.toml");
        let before = ProjectState::from_read(file, model(file), vec![], 1);

        let mut m = model(file);
        m.properties.insert("k".into(), "v".into());
        m.dependencies.push(Artifact::new(Coordinate::new("g", "x", "1"), Scope::Compile));
        let after = ProjectState::from_read(file, m, vec![], 2);

        let changes = after.changes_since(&before);
        assert!(changes.contains(ProjectChanges::PROPERTIES | ProjectChanges::DEPENDENCIES));
        assert!(!changes.contains(ProjectChanges::PACKAGING));
        assert!(!before.changes_since(&before).has_changes());
    }

    #[test]
    fn model_changes_ignore_resolution_results() {
        let file = Path::new("/p/project.toml");
        let mut m = model(file);
        m.dependencies.push(Artifact::new(Coordinate::new("g", "x", "1"), Scope::Compile));
        let declared = ProjectState::from_read(file, m.clone(), vec![], 1);

        let resolved_deps = vec![declared.dependencies[0].resolved_to("/repo/x-1.jar")];
        let resolved = declared.with_resolved_dependencies(resolved_deps, vec![]);
        let reread = ProjectState::from_read(file, m, vec![], 2);

        assert!(!reread.model_changes_since(&resolved).has_changes());
        assert!(reread.changes_since(&resolved).contains(ProjectChanges::DEPENDENCIES));
    }

    #[test]
    fn with_problem_deduplicates() {
        let file = Path::new("/p/project.toml");
        let state = ProjectState::from_read(file, model(file), vec![], 1);
        let problem = Problem::cycle(file, "loop");

        let state = state.with_problem(problem.clone()).unwrap();
        assert!(state.with_problem(problem).is_none());
    }

    #[test]
    fn node_update_state_installs_atomically() {
        let file = Path::new("/p/project.toml");
        let node = ProjectNode::with_state(ProjectState::from_read(file, model(file), vec![], 1));
        let held = node.state();

        let result = node.update_state(|s| Some(s.with_downloaded(vec![])));
        assert!(result.is_some());
        assert!(node.update_state(|_| None).is_none());

        // the held snapshot is untouched
        assert_eq!(held.last_read_stamp, 1);
        assert_eq!(node.coordinate(), Coordinate::new("g", "a", "1.0"));
    }
}
