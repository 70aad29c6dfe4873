//! Per-project resolution stages
//!
//! Every stage takes the node's current state, does its I/O without any
//! tree lock, then installs the result through
//! [`ProjectTree::install_stage_result`], which drops it if the node was
//! re-read or removed meanwhile. Failures end up as problems on the node.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use super::{Cancellation, StageError};
use crate::domain::{dedup_artifacts, Artifact, Coordinate, Problem, ProblemKind, Scope};
use crate::repository::{ArtifactRepository, ArtifactRequest, RepositoryError, UpdatePolicy};
use crate::storage::{GeneralSettings, PipelineSettings};
use crate::tree::{ProjectNode, ProjectTree};

/// Directories under the build directory scanned for generated sources
pub const GENERATED_SOURCE_DIRS: [&str; 2] = ["generated-sources", "generated-test-sources"];

const SOURCES_CLASSIFIER: &str = "sources";
const DOCS_CLASSIFIER: &str = "javadoc";

/// Everything a stage needs besides the node
pub struct StageContext {
    pub tree: Arc<ProjectTree>,
    pub repository: Arc<dyn ArtifactRepository>,
    pub general: GeneralSettings,
    pub pipeline: PipelineSettings,
    /// Plugin coordinate -> resolved file. Failures are not kept so the
    /// next resolve retries them.
    plugin_cache: Mutex<HashMap<Coordinate, PathBuf>>,
}

impl StageContext {
    pub fn new(
        tree: Arc<ProjectTree>,
        repository: Arc<dyn ArtifactRepository>,
        general: GeneralSettings,
        pipeline: PipelineSettings,
    ) -> Self {
        Self {
            tree,
            repository,
            general,
            pipeline,
            plugin_cache: Mutex::new(HashMap::new()),
        }
    }

    fn policy(&self) -> UpdatePolicy {
        UpdatePolicy::from_settings(&self.general)
    }
}

fn repository_error(e: RepositoryError) -> Result<String, StageError> {
    match e {
        RepositoryError::Cancelled => Err(StageError::Cancelled),
        other => Ok(other.to_string()),
    }
}

// ==========================================================================
// Dependencies
// ==========================================================================

pub fn resolve_dependencies(ctx: &StageContext, node: &Arc<ProjectNode>, cancel: &Cancellation) -> Result<(), StageError> {
    let state = node.state();
    let index = ctx.tree.artifact_index();
    let policy = ctx.policy();

    let mut artifacts = Vec::new();
    let mut problems = Vec::new();
    for dependency in dedup_artifacts(state.model.dependencies.iter().cloned()) {
        cancel.check()?;

        if let Some(project) = ctx.tree.find_by_coordinate(&dependency.coordinate) {
            let output = project.state().model.output_directory.clone();
            artifacts.push(dependency.resolved_to(output));
            continue;
        }
        if let Some(known) = index.find_resolved(&dependency).and_then(|a| a.file()) {
            artifacts.push(dependency.resolved_to(known));
            continue;
        }
        if dependency.scope == Scope::System {
            problems.push(Problem::unresolved_dependency(node.file(), &dependency, "system scope needs a file"));
            artifacts.push(dependency.unresolved());
            continue;
        }

        let request = ArtifactRequest::for_artifact(&dependency);
        match ctx.repository.resolve(&request, &state.model.repositories, policy, cancel) {
            Ok(path) => artifacts.push(dependency.resolved_to(path)),
            Err(e) => {
                let reason = repository_error(e)?;
                debug!(file = %node.file().display(), artifact = %dependency, %reason, "Unresolved dependency");
                problems.push(Problem::unresolved_dependency(node.file(), &dependency, reason));
                artifacts.push(dependency.unresolved());
            }
        }
    }

    let unresolved = problems.len();
    let Some((previous, next)) = ctx.tree.install_stage_result(node, state.last_read_stamp, |s| {
        s.with_resolved_dependencies(artifacts, problems)
    }) else {
        return Ok(());
    };

    let changes = next.changes_since(&previous);
    if changes.has_changes() {
        ctx.tree.rebuild_artifact_index();
    }
    info!(
        file = %node.file().display(),
        resolved = next.dependencies.len() - unresolved,
        unresolved,
        "Dependencies resolved"
    );
    ctx.tree.events().fire_dependencies_resolved(node, changes);
    Ok(())
}

// ==========================================================================
// Plugins
// ==========================================================================

pub fn resolve_plugins(ctx: &StageContext, node: &Arc<ProjectNode>, cancel: &Cancellation) -> Result<(), StageError> {
    let state = node.state();
    let policy = ctx.policy();

    let mut artifacts = Vec::new();
    let mut problems = Vec::new();
    for plugin in &state.model.plugins {
        cancel.check()?;

        let cached = if ctx.general.plugin_cache {
            ctx.plugin_cache.lock().get(&plugin.coordinate).cloned()
        } else {
            None
        };
        let outcome = match cached {
            Some(path) => Ok(path),
            None => {
                let request = ArtifactRequest::for_plugin(plugin);
                match ctx.repository.resolve(&request, &state.model.repositories, policy, cancel) {
                    Ok(path) => {
                        if ctx.general.plugin_cache {
                            ctx.plugin_cache.lock().insert(plugin.coordinate.clone(), path.clone());
                        }
                        Ok(path)
                    }
                    Err(e) => Err(repository_error(e)?),
                }
            }
        };

        let artifact = Artifact::new(plugin.coordinate.clone(), Scope::Compile);
        match outcome {
            Ok(path) => artifacts.push(artifact.resolved_to(path)),
            Err(reason) => {
                problems.push(Problem::unresolved_plugin(node.file(), plugin, reason));
                artifacts.push(artifact);
            }
        }
    }

    if ctx
        .tree
        .install_stage_result(node, state.last_read_stamp, |s| s.with_resolved_plugins(artifacts, problems))
        .is_some()
    {
        debug!(file = %node.file().display(), "Plugins resolved");
        ctx.tree.events().fire_plugins_resolved(node);
    }
    Ok(())
}

// ==========================================================================
// Folders
// ==========================================================================

pub fn resolve_folders(ctx: &StageContext, node: &Arc<ProjectNode>, cancel: &Cancellation) -> Result<(), StageError> {
    let state = node.state();
    let mut problems = Vec::new();

    if ctx.pipeline.generate_sources && !state.model.generate_sources.is_empty() {
        if let Err(message) = run_generator(&state.model.generate_sources, state.directory(), cancel)? {
            problems.push(Problem::new(ProblemKind::Generation, node.file(), message));
        }
    }

    let mut directories = Vec::new();
    for name in GENERATED_SOURCE_DIRS {
        let base = state.model.build_directory.join(name);
        let Ok(entries) = fs::read_dir(&base) else {
            continue;
        };
        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        found.sort();
        directories.extend(found);
    }

    let Some((previous, next)) = ctx
        .tree
        .install_stage_result(node, state.last_read_stamp, |s| s.with_generated_sources(directories, problems))
    else {
        return Ok(());
    };

    let changes = next.changes_since(&previous);
    debug!(file = %node.file().display(), folders = next.generated_sources.len(), "Folders resolved");
    ctx.tree.events().fire_folders_resolved(node, changes);
    Ok(())
}

/// Runs a generator command in `dir`; the inner error is a problem message
fn run_generator(
    command: &[String],
    dir: &std::path::Path,
    cancel: &Cancellation,
) -> Result<Result<(), String>, StageError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(Ok(()));
    };

    let mut child = match Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return Ok(Err(format!("Failed to run '{}': {}", program, e))),
    };

    loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(StageError::Cancelled);
        }
        match child.try_wait() {
            Ok(Some(status)) if status.success() => return Ok(Ok(())),
            Ok(Some(status)) => return Ok(Err(format!("'{}' exited with {}", command.join(" "), status))),
            Ok(None) => thread::sleep(Duration::from_millis(20)),
            Err(e) => return Ok(Err(format!("Failed to wait for '{}': {}", program, e))),
        }
    }
}

// ==========================================================================
// Downloads
// ==========================================================================

pub fn download_artifacts(ctx: &StageContext, node: &Arc<ProjectNode>, cancel: &Cancellation) -> Result<(), StageError> {
    let state = node.state();
    let policy = ctx.policy();

    let mut classifiers = Vec::new();
    if ctx.pipeline.download_sources {
        classifiers.push(SOURCES_CLASSIFIER);
    }
    if ctx.pipeline.download_docs {
        classifiers.push(DOCS_CLASSIFIER);
    }

    let mut downloaded = Vec::new();
    let targets = state
        .dependencies
        .iter()
        .chain(state.plugin_artifacts.iter())
        .filter(|a| a.resolved && ctx.tree.find_by_coordinate(&a.coordinate).is_none());
    for artifact in targets {
        for classifier in &classifiers {
            cancel.check()?;
            let request = ArtifactRequest::for_artifact(artifact).with_classifier(classifier);
            match ctx.repository.resolve(&request, &state.model.repositories, policy, cancel) {
                Ok(path) => downloaded.push(
                    artifact
                        .clone()
                        .with_classifier(Some(classifier.to_string()))
                        .resolved_to(path),
                ),
                Err(e) => {
                    let reason = repository_error(e)?;
                    debug!(artifact = %request, %reason, "Attachment not available");
                }
            }
        }
    }

    let downloaded = dedup_artifacts(downloaded);
    if ctx
        .tree
        .install_stage_result(node, state.last_read_stamp, |s| s.with_downloaded(downloaded))
        .is_some()
    {
        ctx.tree.events().fire_artifacts_downloaded(node);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::TomlDescriptorReader;
    use crate::repository::LocalRepository;
    use crate::tree::EventDispatcher;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        ctx: StageContext,
    }

    impl Fixture {
        fn new(pipeline: PipelineSettings) -> Self {
            let dir = TempDir::new().unwrap();
            let tree = Arc::new(ProjectTree::new(
                Arc::new(TomlDescriptorReader::default()),
                EventDispatcher::new(),
            ));
            let repository = Arc::new(LocalRepository::new(dir.path().join("repo")));
            let ctx = StageContext::new(tree, repository, GeneralSettings::default(), pipeline);
            Self { dir, ctx }
        }

        fn write(&self, relative: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            path
        }

        fn read(&self, file: &PathBuf) -> Arc<ProjectNode> {
            self.ctx
                .tree
                .update(&[file.clone()], false, &self.ctx.general, &Cancellation::new())
                .unwrap();
            self.ctx.tree.find_by_file(file).unwrap()
        }
    }

    const WITH_DEPS: &str = r#"
[project]
group-id = "g"
artifact-id = "app"
version = "1"

[[dependencies]]
coordinate = "g:lib:1.0"

[[dependencies]]
coordinate = "g:missing:1.0"
"#;

    #[test]
    fn dependencies_resolve_from_repository() {
        let f = Fixture::new(PipelineSettings::default());
        f.write("repo/g/lib/1.0/lib-1.0.jar", "jar");
        let file = f.write("app/project.toml", WITH_DEPS);
        let node = f.read(&file);

        resolve_dependencies(&f.ctx, &node, &Cancellation::new()).unwrap();

        let state = node.state();
        assert!(state.dependencies_resolved);
        assert!(state.dependencies[0].resolved);
        assert!(!state.dependencies[1].resolved);
        let unresolved: Vec<_> = state
            .problems
            .iter()
            .filter(|p| p.kind == ProblemKind::UnresolvedDependency)
            .collect();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(f.ctx.tree.artifact_index().find("g", "lib").len(), 1);
    }

    #[test]
    fn resolving_twice_does_not_duplicate_problems() {
        let f = Fixture::new(PipelineSettings::default());
        let file = f.write("app/project.toml", WITH_DEPS);
        let node = f.read(&file);

        resolve_dependencies(&f.ctx, &node, &Cancellation::new()).unwrap();
        resolve_dependencies(&f.ctx, &node, &Cancellation::new()).unwrap();

        let count = node
            .problems()
            .iter()
            .filter(|p| p.kind == ProblemKind::UnresolvedDependency)
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn workspace_projects_resolve_to_output_directory() {
        let f = Fixture::new(PipelineSettings::default());
        let lib = f.write("lib/project.toml", "[project]\ngroup-id = \"g\"\nartifact-id = \"lib\"\nversion = \"1.0\"\n");
        f.read(&lib);
        let app = f.write(
            "app/project.toml",
            "[project]\ngroup-id = \"g\"\nartifact-id = \"app\"\nversion = \"1\"\n\n[[dependencies]]\ncoordinate = \"g:lib:1.0\"\n",
        );
        let node = f.read(&app);

        resolve_dependencies(&f.ctx, &node, &Cancellation::new()).unwrap();
        let state = node.state();
        assert_eq!(state.dependencies[0].file(), Some(f.dir.path().join("lib/target/classes").as_path()));
        assert!(!state.has_problems());
    }

    #[test]
    fn stale_results_are_dropped() {
        let f = Fixture::new(PipelineSettings::default());
        let file = f.write("app/project.toml", WITH_DEPS);
        let node = f.read(&file);
        let cancel = Cancellation::new();

        f.ctx.tree.update(&[file.clone()], true, &f.ctx.general, &cancel).unwrap();
        let stale = node.state().last_read_stamp;
        f.ctx.tree.update(&[file], true, &f.ctx.general, &cancel).unwrap();
        assert!(node.last_read_stamp() > stale);

        let applied = f.ctx.tree.install_stage_result(&node, stale, |s| s.with_downloaded(vec![]));
        assert!(applied.is_none());
    }

    #[test]
    fn cancelled_resolution_installs_nothing() {
        let f = Fixture::new(PipelineSettings::default());
        let file = f.write("app/project.toml", WITH_DEPS);
        let node = f.read(&file);
        let cancel = Cancellation::new();
        cancel.cancel();

        let result = resolve_dependencies(&f.ctx, &node, &cancel);
        assert!(matches!(result, Err(StageError::Cancelled)));
        assert!(!node.state().dependencies_resolved);
    }

    #[test]
    fn plugins_record_problems_and_retry_failures() {
        let f = Fixture::new(PipelineSettings::default());
        let file = f.write(
            "app/project.toml",
            r#"
[project]
group-id = "g"
artifact-id = "app"
version = "1"

[[plugins]]
coordinate = "g:ext:1"
extensions = true
"#,
        );
        let node = f.read(&file);

        resolve_plugins(&f.ctx, &node, &Cancellation::new()).unwrap();
        assert!(node.state().has_unresolved_plugins());
        assert!(node
            .problems()
            .iter()
            .any(|p| p.kind == ProblemKind::UnresolvedExtension));

        // a failure is retried once the file appears
        f.write("repo/g/ext/1/ext-1.jar", "jar");
        resolve_plugins(&f.ctx, &node, &Cancellation::new()).unwrap();
        assert!(!node.state().has_unresolved_plugins());
        assert!(node.problems().is_empty());

        // the resolved file is served from the cache afterwards
        fs::remove_file(f.dir.path().join("repo/g/ext/1/ext-1.jar")).unwrap();
        resolve_plugins(&f.ctx, &node, &Cancellation::new()).unwrap();
        assert!(!node.state().has_unresolved_plugins());
    }

    #[test]
    fn folders_collect_generated_directories() {
        let f = Fixture::new(PipelineSettings::default());
        let file = f.write(
            "app/project.toml",
            "[project]\ngroup-id = \"g\"\nartifact-id = \"app\"\nversion = \"1\"\n",
        );
        fs::create_dir_all(f.dir.path().join("app/target/generated-sources/annotations")).unwrap();
        fs::create_dir_all(f.dir.path().join("app/target/generated-test-sources/stubs")).unwrap();
        let node = f.read(&file);

        resolve_folders(&f.ctx, &node, &Cancellation::new()).unwrap();
        let state = node.state();
        assert_eq!(
            state.generated_sources,
            vec![
                f.dir.path().join("app/target/generated-sources/annotations"),
                f.dir.path().join("app/target/generated-test-sources/stubs"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn failing_generator_becomes_problem() {
        let f = Fixture::new(PipelineSettings::default());
        let file = f.write(
            "app/project.toml",
            "[project]\ngroup-id = \"g\"\nartifact-id = \"app\"\nversion = \"1\"\n\n[build]\ngenerate-sources = [\"sh\", \"-c\", \"exit 3\"]\n",
        );
        let node = f.read(&file);

        resolve_folders(&f.ctx, &node, &Cancellation::new()).unwrap();
        assert!(node.problems().iter().any(|p| p.kind == ProblemKind::Generation));
    }

    #[test]
    fn downloads_fetch_sources_when_enabled() {
        let f = Fixture::new(PipelineSettings {
            download_sources: true,
            ..PipelineSettings::default()
        });
        f.write("repo/g/lib/1.0/lib-1.0.jar", "jar");
        f.write("repo/g/lib/1.0/lib-1.0-sources.jar", "src");
        let file = f.write(
            "app/project.toml",
            "[project]\ngroup-id = \"g\"\nartifact-id = \"app\"\nversion = \"1\"\n\n[[dependencies]]\ncoordinate = \"g:lib:1.0\"\n",
        );
        let node = f.read(&file);
        let cancel = Cancellation::new();

        resolve_dependencies(&f.ctx, &node, &cancel).unwrap();
        download_artifacts(&f.ctx, &node, &cancel).unwrap();

        let downloaded = node.state().downloaded.clone();
        assert_eq!(downloaded.len(), 1);
        assert_eq!(downloaded[0].classifier.as_deref(), Some("sources"));
    }
}
