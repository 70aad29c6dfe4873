//! Commands that change the tree: managed files, profiles, ignores, updates
//!
//! Each command opens the workspace, starts a [`ProjectsManager`], schedules
//! its work and waits for every stage to go idle before persisting the
//! workspace state and the tree snapshot.

use anyhow::Result;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use super::output::Output;
use crate::domain::ExplicitProfiles;
use crate::pipeline::ProjectsManager;
use crate::storage::{PipelineSettings, Workspace};
use crate::tree::ProjectTree;

/// Runs `schedule` against a started manager, then waits and persists
fn drive<T>(
    mut workspace: Workspace,
    pipeline: PipelineSettings,
    schedule: impl FnOnce(&Workspace, &ProjectsManager) -> Result<T>,
) -> Result<(T, Workspace, Arc<ProjectTree>)> {
    let manager = workspace.open_manager_with(pipeline)?;
    let result = schedule(&workspace, &manager);

    manager.wait_for_all();
    let tree = Arc::clone(manager.tree());
    manager.shutdown();
    let value = result?;

    workspace.record_state(&tree)?;
    workspace.save_tree(&tree)?;
    Ok((value, workspace, tree))
}

fn with_manager<T>(
    schedule: impl FnOnce(&Workspace, &ProjectsManager) -> Result<T>,
) -> Result<(T, Workspace, Arc<ProjectTree>)> {
    let workspace = Workspace::open_current()?;
    let pipeline = workspace.config().workspace.pipeline.clone();
    drive(workspace, pipeline, schedule)
}

fn descriptors(workspace: &Workspace, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    paths.iter().map(|p| workspace.descriptor_for(p)).collect()
}

fn display_paths(workspace: &Workspace, paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| workspace.relative(p).display().to_string())
        .collect()
}

/// Prints project and problem totals after a command
fn report(output: &Output, message: &str, tree: &ProjectTree, extra: serde_json::Value) {
    let projects = tree.len();
    let problems: usize = tree.projects().iter().map(|p| p.problems().len()).sum();

    if output.is_json() {
        output.data(&json!({
            "success": true,
            "message": message,
            "projects": projects,
            "problems": problems,
            "details": extra,
        }));
        return;
    }

    output.success(message);
    println!("{} project(s) in tree", projects);
    if problems > 0 {
        println!("{} problem(s), run 'buildtree problems' for details", problems);
    }
}

// =============================================================================
// Managed files
// =============================================================================

pub fn add(output: &Output, files: &[PathBuf], enable: Vec<String>, disable: Vec<String>) -> Result<()> {
    let profiles = ExplicitProfiles::new(enable, disable);

    let (added, workspace, tree) = with_manager(|workspace, manager| {
        let files = descriptors(workspace, files)?;
        for file in files.iter().filter(|f| !f.is_file()) {
            output.warn(&format!("{} does not exist yet", workspace.relative(file).display()));
        }
        output.verbose_ctx("add", &format!("Managing {} file(s), profiles: {}", files.len(), profiles));
        manager.add_managed_files(&files, &profiles);
        Ok(files)
    })?;

    report(
        output,
        &format!("Added {} project file(s)", added.len()),
        &tree,
        json!({ "added": display_paths(&workspace, &added) }),
    );
    Ok(())
}

pub fn remove(output: &Output, files: &[PathBuf]) -> Result<()> {
    let (removed, workspace, tree) = with_manager(|workspace, manager| {
        let files = descriptors(workspace, files)?;
        let (managed, unknown): (Vec<_>, Vec<_>) =
            files.into_iter().partition(|f| manager.tree().is_managed_file(f));
        for file in &unknown {
            output.warn(&format!("{} is not managed", workspace.relative(file).display()));
        }
        manager.remove_managed_files(&managed);
        Ok(managed)
    })?;

    report(
        output,
        &format!("Removed {} project file(s)", removed.len()),
        &tree,
        json!({ "removed": display_paths(&workspace, &removed) }),
    );
    Ok(())
}

// =============================================================================
// Profiles
// =============================================================================

pub fn profiles(output: &Output, enable: Vec<String>, disable: Vec<String>, clear: bool) -> Result<()> {
    let changing = clear || !enable.is_empty() || !disable.is_empty();

    let ((), _, tree) = with_manager(|_, manager| {
        if changing {
            let base = if clear {
                ExplicitProfiles::none()
            } else {
                manager.tree().requested_profiles()
            };
            let selection = base.merged_with(&ExplicitProfiles::new(enable, disable));
            output.verbose_ctx("profiles", &format!("New selection: {}", selection));
            manager.set_explicit_profiles(selection);
        } else {
            manager.schedule_update_all();
        }
        Ok(())
    })?;

    let requested = tree.requested_profiles();
    let states = tree.profiles_with_states();

    if output.is_json() {
        let profiles: Vec<_> = states
            .iter()
            .map(|(id, state)| json!({ "id": id, "state": state }))
            .collect();
        output.data(&json!({
            "enabled": requested.enabled,
            "disabled": requested.disabled,
            "profiles": profiles,
        }));
        return Ok(());
    }

    if states.is_empty() {
        println!("No profiles declared by any project");
    } else {
        println!("{:<30} STATE", "PROFILE");
        println!("{}", "-".repeat(60));
        for (id, state) in &states {
            println!("{:<30} {}", id, state.as_str());
        }
    }
    if !requested.is_empty() {
        output.blank();
        println!("Selection: {}", requested);
    }
    Ok(())
}

// =============================================================================
// Ignoring
// =============================================================================

pub fn ignore(output: &Output, paths: &[PathBuf], patterns: Vec<String>, unignore: bool) -> Result<()> {
    let ((), workspace, tree) = with_manager(|workspace, manager| {
        let files = descriptors(workspace, paths)?;
        let tree = manager.tree();
        let mut ignored = tree.ignored_paths();
        let mut ignored_patterns = tree.ignored_patterns();

        if unignore {
            ignored.retain(|p| !files.contains(p));
            ignored_patterns.retain(|p| !patterns.contains(p));
        } else {
            for file in files {
                if !ignored.contains(&file) {
                    ignored.push(file);
                }
            }
            for pattern in patterns {
                if !ignored_patterns.contains(&pattern) {
                    ignored_patterns.push(pattern);
                }
            }
        }

        tree.set_ignored_paths(ignored);
        tree.set_ignored_patterns(ignored_patterns)?;
        Ok(())
    })?;

    let ignored: Vec<PathBuf> = tree
        .projects()
        .iter()
        .filter(|p| tree.is_ignored(p))
        .map(|p| p.file().to_path_buf())
        .collect();

    if output.is_json() {
        output.data(&json!({
            "ignored_projects": display_paths(&workspace, &ignored),
            "paths": display_paths(&workspace, &tree.ignored_paths()),
            "patterns": tree.ignored_patterns(),
        }));
        return Ok(());
    }

    if ignored.is_empty() {
        println!("No projects are ignored");
    } else {
        println!("Ignored projects:");
        for path in display_paths(&workspace, &ignored) {
            println!("  {}", path);
        }
    }
    for pattern in tree.ignored_patterns() {
        println!("Pattern: {}", pattern);
    }
    Ok(())
}

// =============================================================================
// Pipeline
// =============================================================================

pub fn update(output: &Output, files: &[PathBuf], force: bool) -> Result<()> {
    let (count, _, tree) = with_manager(|workspace, manager| {
        if files.is_empty() {
            if force {
                manager.force_update_all();
            } else {
                manager.schedule_update_all();
            }
            return Ok(manager.tree().managed_files().len());
        }

        let files = descriptors(workspace, files)?;
        if force {
            manager.force_update(&files);
        } else {
            manager.schedule_update(&files);
        }
        Ok(files.len())
    })?;

    let target = if files.is_empty() { "managed" } else { "requested" };
    report(
        output,
        &format!("Updated {} {} file(s)", count, target),
        &tree,
        json!({ "force": force }),
    );
    Ok(())
}

pub fn resolve(output: &Output, download: bool) -> Result<()> {
    let workspace = Workspace::open_current()?;
    let mut pipeline = workspace.config().workspace.pipeline.clone();
    if download {
        pipeline.download_sources = true;
        pipeline.download_docs = true;
    }

    let (count, _, tree) = drive(workspace, pipeline, |_, manager| {
        manager.schedule_update_all();
        manager.wait_for_read_completion();

        let nodes = manager.tree().non_ignored_projects();
        output.verbose_ctx("resolve", &format!("Resolving {} project(s)", nodes.len()));
        manager.schedule_resolve(&nodes);
        Ok(nodes.len())
    })?;

    let mut resolved = 0;
    let mut unresolved = 0;
    let mut downloaded = 0;
    for node in tree.non_ignored_projects() {
        let state = node.state();
        resolved += state.dependencies.iter().filter(|a| a.resolved).count();
        unresolved += state.dependencies.iter().filter(|a| !a.resolved).count();
        downloaded += state.downloaded.len();
    }

    report(
        output,
        &format!("Resolved {} project(s)", count),
        &tree,
        json!({
            "resolved_dependencies": resolved,
            "unresolved_dependencies": unresolved,
            "downloaded": downloaded,
        }),
    );
    if !output.is_json() {
        println!("{} dependencies resolved, {} unresolved", resolved, unresolved);
        if download {
            println!("{} attached artifact(s) downloaded", downloaded);
        }
    }
    Ok(())
}
