//! End-to-end scenarios for the project tree and the resolution pipeline
//!
//! These run against real descriptor files in a temp directory, a reader
//! that counts reads per file, and an in-memory artifact repository.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use buildtree::domain::{Coordinate, ExplicitProfiles, ProblemKind, RemoteRepository};
use buildtree::pipeline::{Cancellation, ProjectsManager};
use buildtree::reader::{DescriptorReader, ProjectLocator, ReadResult, TomlDescriptorReader};
use buildtree::repository::{ArtifactRepository, ArtifactRequest, RepositoryError, UpdatePolicy};
use buildtree::storage::{GeneralSettings, PipelineSettings, SnapshotStore};
use buildtree::tree::{EventDispatcher, ProjectTree};
use filetime::FileTime;
use tempfile::TempDir;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct CountingReader {
    inner: TomlDescriptorReader,
    reads: Mutex<HashMap<PathBuf, usize>>,
}

impl CountingReader {
    fn reads_of(&self, file: &Path) -> usize {
        self.reads.lock().unwrap().get(file).copied().unwrap_or(0)
    }

    fn total(&self) -> usize {
        self.reads.lock().unwrap().values().sum()
    }
}

impl DescriptorReader for CountingReader {
    fn read(&self, file: &Path, profiles: &ExplicitProfiles, locator: &dyn ProjectLocator) -> ReadResult {
        *self.reads.lock().unwrap().entry(file.to_path_buf()).or_default() += 1;
        self.inner.read(file, profiles, locator)
    }

    fn profiles_file(&self, descriptor: &Path) -> Option<PathBuf> {
        self.inner.profiles_file(descriptor)
    }

    fn is_descriptor(&self, path: &Path) -> bool {
        self.inner.is_descriptor(path)
    }
}

/// Repository that knows a fixed set of coordinates and never touches disk
struct MemoryRepository {
    root: PathBuf,
    available: HashSet<String>,
    /// Also serve classified attachments (sources, docs)
    attachments: bool,
    requests: Mutex<Vec<String>>,
}

impl MemoryRepository {
    fn new(root: &Path, available: &[&str]) -> Self {
        Self {
            root: root.to_path_buf(),
            available: available.iter().map(|c| c.to_string()).collect(),
            attachments: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_attachments(mut self) -> Self {
        self.attachments = true;
        self
    }
}

impl ArtifactRepository for MemoryRepository {
    fn resolve(
        &self,
        request: &ArtifactRequest,
        _repositories: &[RemoteRepository],
        _policy: UpdatePolicy,
        _cancel: &Cancellation,
    ) -> Result<PathBuf, RepositoryError> {
        self.requests.lock().unwrap().push(request.to_string());
        if (request.classifier.is_none() || self.attachments) && self.available.contains(&request.coordinate.to_string()) {
            Ok(self.root.join(request.relative_path()))
        } else {
            Err(RepositoryError::NotFound(request.to_string()))
        }
    }
}

struct Fixture {
    dir: TempDir,
    reader: Arc<CountingReader>,
    tree: Arc<ProjectTree>,
    settings: GeneralSettings,
}

impl Fixture {
    fn new() -> Self {
        let reader = Arc::new(CountingReader::default());
        let tree = Arc::new(ProjectTree::new(
            Arc::clone(&reader) as Arc<dyn DescriptorReader>,
            EventDispatcher::new(),
        ));
        Self {
            dir: TempDir::new().unwrap(),
            reader,
            tree,
            settings: GeneralSettings::default(),
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    /// Rewrites a descriptor and moves its mtime forward so the change is seen
    fn rewrite(&self, relative: &str, content: &str, mtime: i64) -> PathBuf {
        let path = self.write(relative, content);
        filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
        path
    }

    fn aggregator(&self, relative: &str, artifact: &str, modules: &[&str]) -> PathBuf {
        let modules: Vec<String> = modules.iter().map(|m| format!("\"{}\"", m)).collect();
        self.write(
            relative,
            &format!(
                "[project]\ngroup-id = \"g\"\nartifact-id = \"{}\"\nversion = \"1.0\"\nmodules = [{}]\n",
                artifact,
                modules.join(", ")
            ),
        )
    }

    fn manage(&self, files: &[PathBuf]) {
        self.tree.add_managed_files(files, &ExplicitProfiles::none());
    }

    fn update(&self, files: &[PathBuf]) -> buildtree::tree::UpdateSummary {
        self.tree.update(files, false, &self.settings, &Cancellation::new()).unwrap()
    }

    fn coordinates(&self, relative_files: &[&str]) -> Vec<Coordinate> {
        relative_files
            .iter()
            .map(|f| self.tree.find_by_file(&self.path(f)).unwrap().coordinate())
            .collect()
    }
}

fn root_descriptor(x_version: &str) -> String {
    format!(
        r#"
[project]
group-id = "g"
artifact-id = "root"
version = "1.0"
modules = ["a", "b"]

[properties]
"x.version" = "{}"
"#,
        x_version
    )
}

const MODULE_A: &str = r#"
[project]
artifact-id = "a"

[parent]
group-id = "g"
artifact-id = "root"
version = "1.0"

[[dependencies]]
coordinate = "g:x:1.0"

[[plugins]]
coordinate = "org.example:compiler-plugin:3.1"
"#;

const MODULE_B: &str = r#"
[project]
artifact-id = "b"

[parent]
group-id = "g"
artifact-id = "root"
version = "1.0"

[[dependencies]]
coordinate = "g:x:${x.version}"

[[dependencies]]
coordinate = "g:a:1.0"

[[dependencies]]
coordinate = "g:missing:1.0"
"#;

fn shared_dependency_fixture() -> (Fixture, PathBuf) {
    let f = Fixture::new();
    let root = f.write("project.toml", &root_descriptor("1.0"));
    f.write("a/project.toml", MODULE_A);
    f.write("b/project.toml", MODULE_B);
    f.manage(&[root.clone()]);
    (f, root)
}

// =============================================================================
// Tree scenarios
// =============================================================================

#[test]
fn root_with_shared_dependency_and_inheritor_cascade() {
    let (f, root) = shared_dependency_fixture();

    let summary = f.update(&[root.clone()]);
    assert_eq!(summary.reads, 3);
    assert_eq!(
        f.coordinates(&["project.toml", "a/project.toml", "b/project.toml"]),
        vec![
            Coordinate::new("g", "root", "1.0"),
            Coordinate::new("g", "a", "1.0"),
            Coordinate::new("g", "b", "1.0"),
        ]
    );

    let b = f.tree.find_by_file(&f.path("b/project.toml")).unwrap();
    assert_eq!(b.state().model.dependencies[0].coordinate, Coordinate::new("g", "x", "1.0"));
    assert_eq!(f.tree.find_parent(&b).unwrap().file(), root);

    // the parent's property change re-reads both inheritors
    f.rewrite("project.toml", &root_descriptor("2.0"), 1_900_000_000);
    f.update(&[root.clone()]);

    assert_eq!(f.reader.reads_of(&root), 2);
    assert_eq!(f.reader.reads_of(&f.path("a/project.toml")), 2);
    assert_eq!(f.reader.reads_of(&f.path("b/project.toml")), 2);
    assert_eq!(b.state().model.dependencies[0].coordinate, Coordinate::new("g", "x", "2.0"));
}

#[test]
fn unchanged_files_are_read_once() {
    let (f, root) = shared_dependency_fixture();

    f.update(&[root.clone()]);
    let reads = f.reader.total();

    let summary = f.update(&[root.clone()]);
    assert_eq!(summary.reads, 0);
    assert_eq!(f.reader.total(), reads);

    let summary = f.tree.update_all(false, &f.settings, &Cancellation::new()).unwrap();
    assert_eq!(summary.reads, 0);
    assert_eq!(f.reader.total(), reads);
}

#[test]
fn module_moves_between_aggregators() {
    let f = Fixture::new();
    let one = f.aggregator("one/project.toml", "one", &["../m"]);
    let two = f.aggregator("two/project.toml", "two", &[]);
    f.aggregator("m/project.toml", "m", &[]);
    f.manage(&[one.clone(), two.clone()]);
    f.update(&[one.clone(), two.clone()]);

    let m = f.tree.find_by_file(&f.path("m/project.toml")).unwrap();
    assert_eq!(f.tree.find_aggregator(&m).unwrap().file(), one);

    f.rewrite(
        "one/project.toml",
        "[project]\ngroup-id = \"g\"\nartifact-id = \"one\"\nversion = \"1.0\"\n",
        1_900_000_000,
    );
    f.rewrite(
        "two/project.toml",
        "[project]\ngroup-id = \"g\"\nartifact-id = \"two\"\nversion = \"1.0\"\nmodules = [\"../m\"]\n",
        1_900_000_000,
    );
    f.update(&[one.clone(), two.clone()]);

    let m = f.tree.find_by_file(&f.path("m/project.toml")).unwrap();
    assert_eq!(f.tree.find_aggregator(&m).unwrap().file(), two);
    assert!(!f.tree.is_root(&m));

    let holders: Vec<PathBuf> = f
        .tree
        .projects()
        .iter()
        .filter(|p| f.tree.modules(p).iter().any(|module| module.file() == m.file()))
        .map(|p| p.file().to_path_buf())
        .collect();
    assert_eq!(holders, vec![two]);
}

#[test]
fn deleting_aggregator_promotes_managed_modules() {
    let f = Fixture::new();
    let root = f.aggregator("project.toml", "root", &["kept", "dropped"]);
    let kept = f.aggregator("kept/project.toml", "kept", &[]);
    let dropped = f.aggregator("dropped/project.toml", "dropped", &["inner"]);
    let inner = f.aggregator("dropped/inner/project.toml", "inner", &[]);
    f.manage(&[root.clone(), kept.clone()]);
    f.update(&[root.clone()]);
    assert_eq!(f.tree.len(), 4);

    let removed = Arc::new(Mutex::new(Vec::new()));
    struct Removed(Arc<Mutex<Vec<PathBuf>>>);
    impl buildtree::tree::TreeListener for Removed {
        fn project_removed(&self, node: &Arc<buildtree::ProjectNode>) {
            self.0.lock().unwrap().push(node.file().to_path_buf());
        }
    }
    f.tree.events().subscribe(Arc::new(Removed(Arc::clone(&removed))));

    f.tree.remove_managed_files(&[root.clone()]);
    f.tree.delete(&[root.clone()], &f.settings, &Cancellation::new()).unwrap();

    assert!(f.tree.find_by_file(&root).is_none());
    assert!(f.tree.find_by_file(&dropped).is_none());
    assert!(f.tree.find_by_file(&inner).is_none());

    let kept_node = f.tree.find_by_file(&kept).unwrap();
    assert!(f.tree.is_root(&kept_node));
    assert_eq!(f.tree.len(), 1);

    let removed = removed.lock().unwrap();
    assert!(removed.contains(&root));
    assert!(removed.contains(&dropped));
    assert!(removed.contains(&inner));
    assert!(!removed.contains(&kept));
}

#[test]
fn aggregation_cycle_terminates_with_problem() {
    let f = Fixture::new();
    let a = f.aggregator("a/project.toml", "a", &["../b"]);
    f.aggregator("b/project.toml", "b", &["../a"]);
    f.manage(&[a.clone()]);

    f.update(&[a.clone()]);

    assert_eq!(f.tree.len(), 2);
    let cycles: Vec<_> = f
        .tree
        .projects()
        .iter()
        .flat_map(|p| p.problems())
        .filter(|p| p.kind == ProblemKind::CycleDetected)
        .collect();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].path, f.path("b/project.toml"));
}

#[test]
fn snapshot_restores_without_rereading() {
    let (f, root) = shared_dependency_fixture();
    f.update(&[root.clone()]);

    let store = SnapshotStore::new(f.path(".buildtree/tree.bin"));
    store.save(&f.tree.snapshot()).unwrap();
    let snapshot = store.load().unwrap().unwrap();
    assert_eq!(snapshot.node_count(), 3);

    let reader = Arc::new(CountingReader::default());
    let restored = ProjectTree::restore(
        snapshot,
        Arc::clone(&reader) as Arc<dyn DescriptorReader>,
        EventDispatcher::new(),
    )
    .unwrap();

    assert_eq!(restored.len(), 3);
    assert_eq!(restored.managed_files(), vec![root.clone()]);
    let b = restored.find_by_file(&f.path("b/project.toml")).unwrap();
    assert_eq!(restored.find_aggregator(&b).unwrap().file(), root);

    let summary = restored.update_all(false, &f.settings, &Cancellation::new()).unwrap();
    assert_eq!(summary.reads, 0);
    assert_eq!(reader.total(), 0);
}

// =============================================================================
// Pipeline scenarios
// =============================================================================

#[test]
fn manager_chains_stages_after_read() {
    let (f, root) = shared_dependency_fixture();
    let repository = Arc::new(MemoryRepository::new(
        &f.path("repo"),
        &["g:x:1.0", "org.example:compiler-plugin:3.1"],
    ));

    let manager = ProjectsManager::new(
        Arc::clone(&f.tree),
        Arc::clone(&repository) as Arc<dyn ArtifactRepository>,
        f.settings.clone(),
        PipelineSettings::default(),
    )
    .unwrap();

    manager.schedule_update(&[root]);
    manager.wait_for_all();

    let a = f.tree.find_by_file(&f.path("a/project.toml")).unwrap().state();
    assert!(a.dependencies_resolved);
    assert!(a.dependencies[0].resolved);
    assert_eq!(a.dependencies[0].file(), Some(f.path("repo/g/x/1.0/x-1.0.jar").as_path()));
    assert!(!a.has_unresolved_plugins());
    assert!(a.plugin_artifacts.iter().all(|p| p.resolved));

    let b = f.tree.find_by_file(&f.path("b/project.toml")).unwrap().state();
    assert!(b.dependencies_resolved);
    // a workspace project resolves to its output directory
    let on_a = b.dependencies.iter().find(|d| d.coordinate.artifact_id() == "a").unwrap();
    assert_eq!(on_a.file(), Some(a.model.output_directory.as_path()));
    let problems: Vec<_> = b
        .problems
        .iter()
        .filter(|p| p.kind == ProblemKind::UnresolvedDependency)
        .collect();
    assert_eq!(problems.len(), 1);
    assert!(problems[0].message.contains("g:missing:1.0"));

    // the shared dependency is indexed once
    let index = f.tree.artifact_index();
    assert_eq!(index.find("g", "x").len(), 1);
    assert!(index.find_resolved(&a.dependencies[0]).is_some());

    manager.shutdown();
}

#[test]
fn manager_rereads_and_resolves_after_change() {
    let (f, root) = shared_dependency_fixture();
    let repository = Arc::new(MemoryRepository::new(&f.path("repo"), &["g:x:1.0", "g:x:2.0"]));
    let manager = ProjectsManager::new(
        Arc::clone(&f.tree),
        Arc::clone(&repository) as Arc<dyn ArtifactRepository>,
        f.settings.clone(),
        PipelineSettings::default(),
    )
    .unwrap();

    manager.schedule_update(&[root.clone()]);
    manager.wait_for_all();

    f.rewrite("project.toml", &root_descriptor("2.0"), 1_900_000_000);
    manager.schedule_update(&[root]);
    manager.wait_for_all();

    let b = f.tree.find_by_file(&f.path("b/project.toml")).unwrap().state();
    assert!(b.dependencies_resolved);
    assert_eq!(b.dependencies[0].coordinate, Coordinate::new("g", "x", "2.0"));
    assert!(b.dependencies[0].resolved);

    let versions: HashSet<String> = f
        .tree
        .artifact_index()
        .find("g", "x")
        .iter()
        .map(|a| a.coordinate.version().to_string())
        .collect();
    assert_eq!(versions, HashSet::from(["1.0".to_string(), "2.0".to_string()]));

    let requests = repository.requests.lock().unwrap();
    assert!(requests.iter().any(|r| r.starts_with("g:x:2.0")));
    drop(requests);

    manager.shutdown();
}

#[test]
fn ignored_projects_are_not_resolved() {
    let (f, root) = shared_dependency_fixture();
    f.tree.set_ignored_paths(vec![f.path("b/project.toml")]);

    let repository = Arc::new(MemoryRepository::new(&f.path("repo"), &["g:x:1.0"]));
    let manager = ProjectsManager::new(
        Arc::clone(&f.tree),
        Arc::clone(&repository) as Arc<dyn ArtifactRepository>,
        f.settings.clone(),
        PipelineSettings::default(),
    )
    .unwrap();

    manager.schedule_update(&[root]);
    manager.wait_for_all();

    let b = f.tree.find_by_file(&f.path("b/project.toml")).unwrap();
    assert!(f.tree.is_ignored(&b));
    assert!(!b.state().dependencies_resolved);
    assert!(!f.tree.non_ignored_projects().iter().any(|p| p.file() == b.file()));

    manager.shutdown();
}

#[test]
fn explicit_resolve_and_download_then_snapshot() {
    let (f, root) = shared_dependency_fixture();
    let repository = Arc::new(MemoryRepository::new(&f.path("repo"), &["g:x:1.0"]).with_attachments());
    let pipeline = PipelineSettings {
        resolve_on_read: false,
        download_sources: true,
        ..PipelineSettings::default()
    };
    let manager = ProjectsManager::new(
        Arc::clone(&f.tree),
        Arc::clone(&repository) as Arc<dyn ArtifactRepository>,
        f.settings.clone(),
        pipeline,
    )
    .unwrap();

    manager.schedule_update(&[root]);
    manager.wait_for_read_completion();
    let a = f.tree.find_by_file(&f.path("a/project.toml")).unwrap();
    assert!(!a.state().dependencies_resolved);

    manager.schedule_resolve(&f.tree.non_ignored_projects());
    manager.wait_for_resolve_completion();
    manager.wait_for_plugins_completion();
    manager.wait_for_folders_completion();
    manager.wait_for_download_completion();

    let state = a.state();
    assert!(state.dependencies_resolved);
    assert_eq!(state.downloaded.len(), 1);
    assert_eq!(state.downloaded[0].classifier.as_deref(), Some("sources"));
    assert!(state.downloaded[0].file().unwrap().ends_with("x-1.0-sources.jar"));

    // an explicit download request repeats the stage for one project
    let before = repository.requests.lock().unwrap().len();
    manager.schedule_download(&[Arc::clone(&a)]);
    manager.wait_for_download_completion();
    assert!(repository.requests.lock().unwrap().len() > before);
    assert_eq!(a.state().downloaded.len(), 1);

    let store = SnapshotStore::new(f.path(".buildtree/tree.bin"));
    manager.save_snapshot(&store).unwrap();
    manager.shutdown();

    let snapshot = store.load().unwrap().unwrap();
    assert_eq!(snapshot.node_count(), 3);
    let restored = ProjectTree::restore(
        snapshot,
        Arc::new(TomlDescriptorReader::default()),
        EventDispatcher::new(),
    )
    .unwrap();
    let a = restored.find_by_file(&f.path("a/project.toml")).unwrap().state();
    assert!(a.dependencies_resolved);
    assert_eq!(a.downloaded.len(), 1);
}

/// Reader that blocks inside one armed read until released
#[derive(Default)]
struct GatedReader {
    inner: TomlDescriptorReader,
    armed: Mutex<Option<PathBuf>>,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
}

impl DescriptorReader for GatedReader {
    fn read(&self, file: &Path, profiles: &ExplicitProfiles, locator: &dyn ProjectLocator) -> ReadResult {
        let hit = {
            let mut armed = self.armed.lock().unwrap();
            if armed.as_deref() == Some(file) {
                *armed = None;
                true
            } else {
                false
            }
        };
        if hit {
            if let Some(entered) = self.entered.lock().unwrap().take() {
                let _ = entered.send(());
            }
            if let Some(release) = self.release.lock().unwrap().take() {
                let _ = release.recv();
            }
        }
        self.inner.read(file, profiles, locator)
    }

    fn profiles_file(&self, descriptor: &Path) -> Option<PathBuf> {
        self.inner.profiles_file(descriptor)
    }

    fn is_descriptor(&self, path: &Path) -> bool {
        self.inner.is_descriptor(path)
    }
}

#[test]
fn project_stays_resolvable_while_it_is_reread() {
    let f = Fixture::new();
    let root = f.aggregator("project.toml", "root", &["lib", "app"]);
    let lib = f.write("lib/project.toml", "[project]\ngroup-id = \"g\"\nartifact-id = \"lib\"\nversion = \"1\"\n");
    f.write(
        "app/project.toml",
        "[project]\ngroup-id = \"g\"\nartifact-id = \"app\"\nversion = \"1\"\n\n[[dependencies]]\ncoordinate = \"g:lib:1\"\n",
    );

    let reader = Arc::new(GatedReader::default());
    let tree = Arc::new(ProjectTree::new(
        Arc::clone(&reader) as Arc<dyn DescriptorReader>,
        EventDispatcher::new(),
    ));
    tree.add_managed_files(&[root.clone()], &ExplicitProfiles::none());
    let repository = Arc::new(MemoryRepository::new(&f.path("repo"), &[]));
    let manager = ProjectsManager::new(
        Arc::clone(&tree),
        repository as Arc<dyn ArtifactRepository>,
        f.settings.clone(),
        PipelineSettings::default(),
    )
    .unwrap();

    manager.schedule_update(&[root]);
    manager.wait_for_all();
    let app = tree.find_by_file(&f.path("app/project.toml")).unwrap();
    assert!(app.problems().is_empty());

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    *reader.entered.lock().unwrap() = Some(entered_tx);
    *reader.release.lock().unwrap() = Some(release_rx);
    *reader.armed.lock().unwrap() = Some(lib.clone());

    manager.force_update(&[lib]);
    entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    // lib is mid-read on the read worker
    assert!(tree.find_by_coordinate(&Coordinate::new("g", "lib", "1")).is_some());
    manager.schedule_resolve(&[Arc::clone(&app)]);
    manager.wait_for_resolve_completion();
    let unresolved: Vec<_> = app
        .problems()
        .into_iter()
        .filter(|p| p.kind == ProblemKind::UnresolvedDependency)
        .collect();
    assert!(unresolved.is_empty(), "{:?}", unresolved);

    release_tx.send(()).unwrap();
    manager.wait_for_all();
    assert!(app.problems().is_empty());
    manager.shutdown();
}
