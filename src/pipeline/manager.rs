//! Command surface over the tree and the stage processors

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::stages::{self, StageContext};
use super::{Cancellation, NodeTask, ReadTask, Stage, StageError, TaskHandle, TaskProcessor};
use crate::domain::{ExplicitProfiles, Problem, ProjectChanges};
use crate::repository::ArtifactRepository;
use crate::storage::{GeneralSettings, PipelineSettings, SnapshotError, SnapshotStore, TreeSnapshot};
use crate::tree::{ListenerId, NodeUpdate, ProjectNode, ProjectTree, TreeListener};

type StageFn = fn(&StageContext, &Arc<ProjectNode>, &Cancellation) -> Result<(), StageError>;

/// Schedules the next stage when the previous one reports back
struct StageChainer {
    tree: Weak<ProjectTree>,
    resolve_on_read: bool,
    downloads: bool,
    dependencies: TaskHandle<NodeTask>,
    plugins: TaskHandle<NodeTask>,
    folders: TaskHandle<NodeTask>,
    download: TaskHandle<NodeTask>,
}

impl TreeListener for StageChainer {
    fn projects_read(&self, updated: &[NodeUpdate]) {
        if !self.resolve_on_read {
            return;
        }
        let Some(tree) = self.tree.upgrade() else {
            return;
        };

        let mut nodes: Vec<Arc<ProjectNode>> = updated
            .iter()
            .filter(|u| u.changes.has_changes() || !u.node.state().dependencies_resolved)
            .map(|u| Arc::clone(&u.node))
            .collect();

        // dependencies before their dependents
        let order: HashMap<_, usize> = tree
            .project_graph()
            .resolve_order()
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, c)| (c, i))
            .collect();
        nodes.sort_by_key(|n| order.get(&n.coordinate()).copied().unwrap_or(usize::MAX));

        for node in nodes {
            self.dependencies.schedule(NodeTask::new(node.file()));
        }
    }

    fn project_removed(&self, node: &Arc<ProjectNode>) {
        for handle in [&self.dependencies, &self.plugins, &self.folders, &self.download] {
            handle.retain(|task| task.file != node.file());
        }
    }

    fn dependencies_resolved(&self, node: &Arc<ProjectNode>, _changes: ProjectChanges) {
        if node.state().has_unresolved_plugins() {
            self.plugins.schedule(NodeTask::new(node.file()));
        }
        self.folders.schedule(NodeTask::new(node.file()));
    }

    fn folders_resolved(&self, node: &Arc<ProjectNode>, _changes: ProjectChanges) {
        if self.downloads {
            self.download.schedule(NodeTask::new(node.file()));
        }
    }

    fn ignored_state_changed(&self, ignored: &[Arc<ProjectNode>], unignored: &[Arc<ProjectNode>]) {
        for node in ignored {
            self.project_removed(node);
        }
        if !self.resolve_on_read {
            return;
        }
        for node in unignored {
            if !node.state().dependencies_resolved {
                self.dependencies.schedule(NodeTask::new(node.file()));
            }
        }
    }
}

/// Owns the tree and one processor per stage
pub struct ProjectsManager {
    tree: Arc<ProjectTree>,
    read: TaskProcessor<ReadTask>,
    dependencies: TaskProcessor<NodeTask>,
    plugins: TaskProcessor<NodeTask>,
    folders: TaskProcessor<NodeTask>,
    download: TaskProcessor<NodeTask>,
    listener: ListenerId,
}

impl ProjectsManager {
    pub fn new(
        tree: Arc<ProjectTree>,
        repository: Arc<dyn ArtifactRepository>,
        general: GeneralSettings,
        pipeline: PipelineSettings,
    ) -> std::io::Result<Self> {
        let ctx = Arc::new(StageContext::new(
            Arc::clone(&tree),
            repository,
            general.clone(),
            pipeline.clone(),
        ));

        let read = {
            let tree = Arc::clone(&tree);
            TaskProcessor::spawn(
                Stage::Read,
                move |task: &ReadTask, cancel: &Cancellation| {
                    let summary = match task {
                        ReadTask::Update { files, force } => tree.update(files, *force, &general, cancel)?,
                        ReadTask::UpdateAll { force } => tree.update_all(*force, &general, cancel)?,
                        ReadTask::Delete { files } => tree.delete(files, &general, cancel)?,
                    };
                    debug!(reads = summary.reads, updated = summary.updated.len(), "Read task done");
                    Ok(())
                },
                |task: &ReadTask, message: &str| warn!(?task, %message, "Read failed"),
            )?
        };

        let dependencies = node_processor(Stage::ResolveDependencies, &ctx, stages::resolve_dependencies)?;
        let plugins = node_processor(Stage::ResolvePlugins, &ctx, stages::resolve_plugins)?;
        let folders = node_processor(Stage::ResolveFolders, &ctx, stages::resolve_folders)?;
        let download = node_processor(Stage::DownloadArtifacts, &ctx, stages::download_artifacts)?;

        let listener = tree.events().subscribe(Arc::new(StageChainer {
            tree: Arc::downgrade(&tree),
            resolve_on_read: pipeline.resolve_on_read,
            downloads: pipeline.downloads_enabled(),
            dependencies: dependencies.handle(),
            plugins: plugins.handle(),
            folders: folders.handle(),
            download: download.handle(),
        }));

        Ok(Self {
            tree,
            read,
            dependencies,
            plugins,
            folders,
            download,
            listener,
        })
    }

    pub fn tree(&self) -> &Arc<ProjectTree> {
        &self.tree
    }

    // ==========================================================================
    // Commands
    // ==========================================================================

    pub fn add_managed_files(&self, files: &[PathBuf], profiles: &ExplicitProfiles) {
        self.tree.add_managed_files(files, profiles);
        self.read.schedule(ReadTask::Update {
            files: files.to_vec(),
            force: false,
        });
    }

    /// Unmanages files; roots no longer managed are dropped by the full update
    pub fn remove_managed_files(&self, files: &[PathBuf]) {
        self.tree.remove_managed_files(files);
        self.read.schedule(ReadTask::UpdateAll { force: false });
    }

    pub fn set_explicit_profiles(&self, profiles: ExplicitProfiles) {
        self.tree.set_explicit_profiles(profiles);
        self.read.schedule(ReadTask::UpdateAll { force: false });
    }

    pub fn force_update(&self, files: &[PathBuf]) {
        self.read.schedule(ReadTask::Update {
            files: files.to_vec(),
            force: true,
        });
    }

    pub fn force_update_all(&self) {
        self.read.schedule(ReadTask::UpdateAll { force: true });
    }

    pub fn schedule_update(&self, files: &[PathBuf]) {
        self.read.schedule(ReadTask::Update {
            files: files.to_vec(),
            force: false,
        });
    }

    pub fn schedule_update_all(&self) {
        self.read.schedule(ReadTask::UpdateAll { force: false });
    }

    pub fn schedule_delete(&self, files: &[PathBuf]) {
        self.read.schedule(ReadTask::Delete { files: files.to_vec() });
    }

    pub fn schedule_resolve(&self, nodes: &[Arc<ProjectNode>]) {
        self.dependencies
            .schedule_all(nodes.iter().map(|n| NodeTask::new(n.file())));
    }

    pub fn schedule_download(&self, nodes: &[Arc<ProjectNode>]) {
        self.download
            .schedule_all(nodes.iter().map(|n| NodeTask::new(n.file())));
    }

    // ==========================================================================
    // Waiting
    // ==========================================================================

    pub fn wait_for_read_completion(&self) {
        self.read.wait_for_completion();
    }

    pub fn wait_for_resolve_completion(&self) {
        self.dependencies.wait_for_completion();
    }

    pub fn wait_for_plugins_completion(&self) {
        self.plugins.wait_for_completion();
    }

    pub fn wait_for_folders_completion(&self) {
        self.folders.wait_for_completion();
    }

    pub fn wait_for_download_completion(&self) {
        self.download.wait_for_completion();
    }

    /// Waits until every stage is idle at the same time
    pub fn wait_for_all(&self) {
        loop {
            self.read.wait_for_completion();
            self.dependencies.wait_for_completion();
            self.plugins.wait_for_completion();
            self.folders.wait_for_completion();
            self.download.wait_for_completion();

            if self.read.is_idle()
                && self.dependencies.is_idle()
                && self.plugins.is_idle()
                && self.folders.is_idle()
                && self.download.is_idle()
            {
                return;
            }
        }
    }

    // ==========================================================================
    // Lifecycle
    // ==========================================================================

    pub fn snapshot(&self) -> TreeSnapshot {
        self.tree.snapshot()
    }

    pub fn save_snapshot(&self, store: &SnapshotStore) -> Result<(), SnapshotError> {
        store.save(&self.tree.snapshot())
    }

    /// Cancels all work and joins every worker
    pub fn shutdown(&self) {
        self.tree.events().unsubscribe(self.listener);
        self.read.stop();
        self.dependencies.stop();
        self.plugins.stop();
        self.folders.stop();
        self.download.stop();
    }
}

impl Drop for ProjectsManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn node_processor(stage: Stage, ctx: &Arc<StageContext>, run: StageFn) -> std::io::Result<TaskProcessor<NodeTask>> {
    let handler_ctx = Arc::clone(ctx);
    let tree = Arc::clone(&ctx.tree);
    TaskProcessor::spawn(
        stage,
        move |task: &NodeTask, cancel: &Cancellation| {
            let Some(node) = handler_ctx.tree.find_by_file(&task.file) else {
                debug!(%stage, file = %task.file.display(), "Project gone, skipping");
                return Ok(());
            };
            if handler_ctx.tree.is_ignored(&node) {
                debug!(%stage, file = %task.file.display(), "Project ignored, skipping");
                return Ok(());
            }
            run(&handler_ctx, &node, cancel)
        },
        move |task: &NodeTask, message: &str| {
            let problem = Problem::internal(&task.file, format!("{} failed: {}", stage, message));
            tree.record_problem(&task.file, problem);
        },
    )
}
