//! Read-only queries over the project tree

use anyhow::{bail, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use super::output::Output;
use crate::domain::{Artifact, Coordinate};
use crate::pipeline::Cancellation;
use crate::storage::Workspace;
use crate::tree::{EventDispatcher, ProjectNode, ProjectTree};

/// Loads the tree and re-reads whatever changed on disk since the snapshot
fn open_tree(output: &Output) -> Result<(Workspace, ProjectTree)> {
    let workspace = Workspace::open_current()?;
    let tree = workspace.load_tree(EventDispatcher::new())?;

    let summary = tree.update_all(false, &workspace.general(), &Cancellation::new())?;
    output.verbose_ctx("tree", &format!("{} descriptor(s) re-read", summary.reads));
    if !summary.is_empty() {
        workspace.save_tree(&tree)?;
    }
    Ok((workspace, tree))
}

fn relative(workspace: &Workspace, path: &Path) -> String {
    workspace.relative(path).display().to_string()
}

pub fn tree(output: &Output) -> Result<()> {
    let (workspace, tree) = open_tree(output)?;
    let walk = tree.walk();

    if output.is_json() {
        let items: Vec<_> = walk
            .iter()
            .map(|(depth, node)| {
                let state = node.state();
                json!({
                    "depth": depth,
                    "coordinate": state.coordinate().to_string(),
                    "file": relative(&workspace, node.file()),
                    "packaging": state.model.packaging,
                    "ignored": tree.is_ignored(node),
                    "problems": state.problems.len(),
                })
            })
            .collect();
        output.data(&items);
        return Ok(());
    }

    if walk.is_empty() {
        println!("No projects. Add one with 'buildtree add <file>'.");
        return Ok(());
    }

    for (depth, node) in &walk {
        let state = node.state();
        let mut markers = String::new();
        if tree.is_ignored(node) {
            markers.push_str(" [ignored]");
        }
        if !state.problems.is_empty() {
            markers.push_str(&format!(" [{} problem(s)]", state.problems.len()));
        }
        println!(
            "{}{} ({}){}",
            "  ".repeat(*depth),
            state.coordinate(),
            relative(&workspace, node.file()),
            markers
        );
    }
    Ok(())
}

/// Finds a project by descriptor path or by `group:artifact[:version]`
fn find_target(workspace: &Workspace, tree: &ProjectTree, target: &str) -> Result<Arc<ProjectNode>> {
    let parts: Vec<&str> = target.split(':').collect();
    if parts.len() == 2 || parts.len() == 3 {
        let (group, artifact) = (parts[0], parts[1]);
        let version = parts.get(2).copied();
        let found = tree.projects().into_iter().find(|p| {
            let c = p.coordinate();
            c.matches(group, artifact) && version.map_or(true, |v| c.version() == v)
        });
        return match found {
            Some(node) => Ok(node),
            None => bail!("No project with coordinate {}", target),
        };
    }

    let file = workspace.descriptor_for(Path::new(target))?;
    match tree.find_by_file(&file) {
        Some(node) => Ok(node),
        None => bail!("{} is not part of the project tree", relative(workspace, &file)),
    }
}

fn artifact_json(workspace: &Workspace, artifact: &Artifact) -> serde_json::Value {
    json!({
        "coordinate": artifact.coordinate.to_string(),
        "classifier": artifact.classifier,
        "kind": artifact.kind,
        "scope": artifact.scope.as_str(),
        "resolved": artifact.resolved,
        "file": artifact.file().map(|f| relative(workspace, f)),
    })
}

pub fn show(output: &Output, target: &str) -> Result<()> {
    let (workspace, tree) = open_tree(output)?;
    let node = find_target(&workspace, &tree, target)?;
    let state = node.state();
    let model = &state.model;

    let aggregator = tree.find_aggregator(&node).map(|a| relative(&workspace, a.file()));
    let parent = tree.find_parent(&node).map(|p| relative(&workspace, p.file()));
    let modules: Vec<String> = tree
        .modules(&node)
        .iter()
        .map(|m| relative(&workspace, m.file()))
        .collect();
    let generated: Vec<String> = state
        .generated_sources
        .iter()
        .map(|p| relative(&workspace, p))
        .collect();

    if output.is_json() {
        output.data(&json!({
            "file": relative(&workspace, node.file()),
            "coordinate": model.coordinate.to_string(),
            "parent": model.parent.as_ref().map(Coordinate::to_string),
            "parent_file": parent,
            "packaging": model.packaging,
            "aggregator": aggregator,
            "modules": modules,
            "ignored": tree.is_ignored(&node),
            "active_profiles": model.active_profiles,
            "dependencies": state.dependencies.iter().map(|a| artifact_json(&workspace, a)).collect::<Vec<_>>(),
            "dependencies_resolved": state.dependencies_resolved,
            "plugins": state.plugin_artifacts.iter().map(|a| artifact_json(&workspace, a)).collect::<Vec<_>>(),
            "generated_sources": generated,
            "downloaded": state.downloaded.iter().map(|a| artifact_json(&workspace, a)).collect::<Vec<_>>(),
            "problems": state.problems,
        }));
        return Ok(());
    }

    println!("{}", model.coordinate);
    println!("{}", "-".repeat(60));
    println!("{:<16} {}", "File:", relative(&workspace, node.file()));
    println!("{:<16} {}", "Packaging:", model.packaging);
    if let Some(parent_coordinate) = &model.parent {
        let location = parent.map(|p| format!(" ({})", p)).unwrap_or_default();
        println!("{:<16} {}{}", "Parent:", parent_coordinate, location);
    }
    if let Some(aggregator) = aggregator {
        println!("{:<16} {}", "Aggregator:", aggregator);
    }
    if tree.is_ignored(&node) {
        println!("{:<16} yes", "Ignored:");
    }
    if !model.active_profiles.is_empty() {
        println!("{:<16} {}", "Profiles:", model.active_profiles.join(", "));
    }

    if !modules.is_empty() {
        output.blank();
        println!("Modules:");
        for module in &modules {
            println!("  {}", module);
        }
    }

    if !state.dependencies.is_empty() {
        output.blank();
        let status = if state.dependencies_resolved { "" } else { " (not resolved yet)" };
        println!("Dependencies{}:", status);
        for artifact in &state.dependencies {
            let file = artifact
                .file()
                .map(|f| relative(&workspace, f))
                .unwrap_or_else(|| "-".to_string());
            println!("  {:<40} {:<10} {}", artifact.to_string(), artifact.scope.as_str(), file);
        }
    }

    if !state.plugin_artifacts.is_empty() {
        output.blank();
        println!("Plugins:");
        for artifact in &state.plugin_artifacts {
            let mark = if artifact.resolved { "ok" } else { "missing" };
            println!("  {:<40} {}", artifact.coordinate.to_string(), mark);
        }
    }

    if !generated.is_empty() {
        output.blank();
        println!("Generated sources:");
        for dir in &generated {
            println!("  {}", dir);
        }
    }

    if !state.problems.is_empty() {
        output.blank();
        println!("Problems:");
        for problem in &state.problems {
            println!("  [{}] {}", problem.kind, problem.message);
        }
    }
    Ok(())
}

pub fn find(output: &Output, group: &str, artifact: Option<&str>, version: Option<&str>) -> Result<()> {
    let (workspace, tree) = open_tree(output)?;
    let index = tree.artifact_index();

    let found: Vec<&Artifact> = match (artifact, version) {
        (Some(artifact), Some(version)) => index.find_version(group, artifact, version).iter().collect(),
        (Some(artifact), None) => index.find(group, artifact),
        (None, _) => index.find_group(group),
    };
    output.verbose_ctx("find", &format!("{} of {} indexed artifact(s) match", found.len(), index.len()));

    let projects = tree.projects();
    let users = |artifact: &Artifact| -> Vec<String> {
        projects
            .iter()
            .filter(|p| p.state().dependencies.iter().any(|d| d.key() == artifact.key()))
            .map(|p| p.coordinate().to_string())
            .collect()
    };

    if output.is_json() {
        let items: Vec<_> = found
            .iter()
            .map(|a| {
                let mut value = artifact_json(&workspace, a);
                value["used_by"] = json!(users(a));
                value
            })
            .collect();
        output.data(&items);
        return Ok(());
    }

    if found.is_empty() {
        println!("No artifacts match");
        return Ok(());
    }

    println!("{:<40} {:<10} {:<9} USED BY", "ARTIFACT", "SCOPE", "RESOLVED");
    println!("{}", "-".repeat(70));
    for artifact in &found {
        println!(
            "{:<40} {:<10} {:<9} {}",
            artifact.to_string(),
            artifact.scope.as_str(),
            if artifact.resolved { "yes" } else { "no" },
            users(artifact).join(", ")
        );
    }
    output.blank();
    println!("Found {} artifact(s)", found.len());
    Ok(())
}

pub fn problems(output: &Output) -> Result<()> {
    let (workspace, tree) = open_tree(output)?;

    let mut rows = Vec::new();
    for (_, node) in tree.walk() {
        for problem in node.problems() {
            rows.push((node.coordinate(), relative(&workspace, &problem.path), problem));
        }
    }

    if output.is_json() {
        let items: Vec<_> = rows
            .iter()
            .map(|(coordinate, path, problem)| {
                json!({
                    "project": coordinate.to_string(),
                    "path": path,
                    "kind": problem.kind.as_str(),
                    "message": problem.message,
                })
            })
            .collect();
        output.data(&items);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No problems");
        return Ok(());
    }

    println!("{:<24} {:<32} MESSAGE", "KIND", "PATH");
    println!("{}", "-".repeat(60));
    for (_, path, problem) in &rows {
        println!("{:<24} {:<32} {}", problem.kind.as_str(), path, problem.message);
    }
    output.blank();
    println!("{} problem(s)", rows.len());
    Ok(())
}
