//! Foreground watch loop
//!
//! Watches the workspace for descriptor changes and feeds them to the
//! manager as updates or deletes. A change to a settings file triggers a
//! full update. Activity goes to `.buildtree/watch.log`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use tracing::{info, warn};

use super::output::Output;
use crate::pipeline::ProjectsManager;
use crate::reader::{normalize_path, DescriptorReader};
use crate::storage::{WatchSettings, Workspace, STATE_DIR};
use crate::tree::ProjectTree;

/// Directories whose contents never hold descriptors worth watching
const SKIPPED_DIRS: &[&str] = &[STATE_DIR, ".git", "target", "node_modules"];

// =============================================================================
// Log
// =============================================================================

/// Append-only log with size-based rotation
struct WatchLog {
    path: PathBuf,
    max_bytes: u64,
    rotation_count: usize,
}

impl WatchLog {
    fn new(path: PathBuf, settings: &WatchSettings) -> Self {
        Self {
            path,
            max_bytes: settings.log_max_bytes,
            rotation_count: settings.log_rotation_count,
        }
    }

    fn write(&self, message: &str) -> Result<()> {
        self.rotate_if_needed()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open watch log")?;

        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "[{}] {}", timestamp, message)?;

        Ok(())
    }

    /// Shifts `watch.log.N` up by one and moves the current log to `.1`
    fn rotate_if_needed(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let metadata = fs::metadata(&self.path)?;
        if metadata.len() < self.max_bytes {
            return Ok(());
        }

        for i in (1..self.rotation_count).rev() {
            let old_path = self.path.with_extension(format!("log.{}", i));
            let new_path = self.path.with_extension(format!("log.{}", i + 1));
            if old_path.exists() {
                if i + 1 >= self.rotation_count {
                    fs::remove_file(&old_path)?;
                } else {
                    fs::rename(&old_path, &new_path)?;
                }
            }
        }

        fs::rename(&self.path, self.path.with_extension("log.1"))?;
        Ok(())
    }
}

// =============================================================================
// Change classification
// =============================================================================

/// What one debounced batch of file events means for the tree
#[derive(Debug, Default, PartialEq, Eq)]
struct ChangeBatch {
    updated: Vec<PathBuf>,
    deleted: Vec<PathBuf>,
    settings_changed: bool,
}

impl ChangeBatch {
    fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty() && !self.settings_changed
    }

    fn push(list: &mut Vec<PathBuf>, path: PathBuf) {
        if !list.contains(&path) {
            list.push(path);
        }
    }
}

struct ChangeFilter {
    root: PathBuf,
    settings_files: Vec<PathBuf>,
    reader: Arc<dyn DescriptorReader>,
}

impl ChangeFilter {
    fn classify(&self, paths: impl IntoIterator<Item = PathBuf>, tree: &ProjectTree) -> ChangeBatch {
        let mut batch = ChangeBatch::default();

        for path in paths.into_iter().map(|p| normalize_path(&p)) {
            if self.settings_files.contains(&path) {
                batch.settings_changed = true;
                continue;
            }
            if should_ignore_path(&self.root, &path) {
                continue;
            }

            if self.reader.is_descriptor(&path) {
                if path.exists() {
                    if tree.is_potential_project(&path) {
                        ChangeBatch::push(&mut batch.updated, path);
                    }
                } else if tree.find_by_file(&path).is_some() {
                    ChangeBatch::push(&mut batch.deleted, path);
                }
                continue;
            }

            // a profiles file re-reads the descriptor next to it
            for project in tree.projects() {
                if self.reader.profiles_file(project.file()).as_deref() == Some(path.as_path()) {
                    ChangeBatch::push(&mut batch.updated, project.file().to_path_buf());
                }
            }
        }

        batch
    }
}

/// Checks if a path lies in a directory the watcher skips
fn should_ignore_path(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        SKIPPED_DIRS.contains(&name.as_ref())
    })
}

fn apply(manager: &ProjectsManager, batch: &ChangeBatch) {
    if batch.settings_changed {
        manager.schedule_update_all();
    }
    if !batch.deleted.is_empty() {
        manager.schedule_delete(&batch.deleted);
    }
    if !batch.updated.is_empty() {
        manager.schedule_update(&batch.updated);
    }
}

// =============================================================================
// Loop
// =============================================================================

pub fn run(output: &Output) -> Result<()> {
    let workspace = Workspace::open_current()?;
    let settings = workspace.config().workspace.watch.clone();
    let log = WatchLog::new(workspace.log_path(), &settings);
    let general = workspace.general();

    let settings_files: Vec<PathBuf> = general
        .user_settings_path()
        .into_iter()
        .chain(general.global_settings_path())
        .chain(general.environment_files.iter().cloned())
        .map(|p| normalize_path(&p))
        .collect();
    let filter = ChangeFilter {
        root: workspace.root().to_path_buf(),
        settings_files,
        reader: workspace.reader(),
    };

    let manager = workspace.open_manager()?;
    manager.schedule_update_all();
    manager.wait_for_all();
    workspace.save_tree(manager.tree())?;

    let (tx, rx) = mpsc::channel();
    let mut debouncer = new_debouncer(Duration::from_millis(settings.debounce_ms), tx)?;
    debouncer
        .watcher()
        .watch(workspace.root(), RecursiveMode::Recursive)?;

    for file in filter.settings_files.iter().filter(|f| !workspace.contains(f)) {
        let Some(dir) = file.parent().filter(|d| d.is_dir()) else {
            continue;
        };
        if let Err(error) = debouncer.watcher().watch(dir, RecursiveMode::NonRecursive) {
            warn!(dir = %dir.display(), %error, "Cannot watch settings directory");
        }
    }

    log.write(&format!(
        "Watching {} (debounce: {}ms, projects: {})",
        workspace.root().display(),
        settings.debounce_ms,
        manager.tree().len()
    ))?;
    output.success(&format!("Watching {} for descriptor changes", workspace.root().display()));

    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let batch = filter.classify(events.into_iter().map(|e| e.path), manager.tree());
                if batch.is_empty() {
                    continue;
                }

                let message = format!(
                    "Detected {} updated, {} deleted descriptor(s){}",
                    batch.updated.len(),
                    batch.deleted.len(),
                    if batch.settings_changed { ", settings changed" } else { "" }
                );
                info!("{}", message);
                output.verbose_ctx("watch", &message);
                log.write(&message)?;

                apply(&manager, &batch);
                manager.wait_for_all();

                if let Err(e) = workspace.save_tree(manager.tree()) {
                    log.write(&format!("Snapshot failed: {:#}", e))?;
                }
                let problems: usize = manager.tree().projects().iter().map(|p| p.problems().len()).sum();
                log.write(&format!(
                    "Tree has {} project(s), {} problem(s)",
                    manager.tree().len(),
                    problems
                ))?;
            }
            Ok(Err(error)) => {
                log.write(&format!("Watch error: {:?}", error))?;
            }
            Err(e) => {
                log.write(&format!("Channel error: {}", e))?;
                break;
            }
        }
    }

    manager.shutdown();
    Ok(())
}
