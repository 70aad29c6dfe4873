//! Incremental update and delete
//!
//! An update walks from the requested files through their modules and
//! inheritors, re-reading only nodes whose [`Timestamp`] changed. All nodes
//! touched by one request are reported in a single `projects_read` batch.

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::events::NodeUpdate;
use super::node::{ProjectNode, ProjectState};
use super::{ProjectTree, TreeError};
use crate::domain::{file_stamp, ExplicitProfiles, Problem, ProjectChanges, Timestamp, MISSING};
use crate::pipeline::Cancellation;
use crate::reader::normalize_path;
use crate::storage::GeneralSettings;

/// What one update or delete request did
#[derive(Debug, Default)]
pub struct UpdateSummary {
    /// Number of descriptor reads performed
    pub reads: usize,
    pub updated: Vec<NodeUpdate>,
    pub deleted: Vec<Arc<ProjectNode>>,
}

impl UpdateSummary {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }

    fn absorb(&mut self, other: UpdateSummary) {
        self.reads += other.reads;
        self.updated.extend(other.updated);
        self.deleted.extend(other.deleted);
    }
}

/// How a node was reached during an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Via {
    Request,
    Module,
    Inheritor,
}

struct Pass<'a> {
    profiles: &'a ExplicitProfiles,
    settings: &'a GeneralSettings,
    cancel: &'a Cancellation,
}

#[derive(Default)]
struct UpdateContext {
    updated: IndexMap<PathBuf, NodeUpdate>,
    deleted: IndexMap<PathBuf, Arc<ProjectNode>>,
    stack: Vec<PathBuf>,
    reads: usize,
}

impl UpdateContext {
    fn updated(&mut self, node: &Arc<ProjectNode>, changes: ProjectChanges) {
        self.deleted.shift_remove(node.file());
        self.updated
            .entry(node.file().to_path_buf())
            .and_modify(|u| {
                u.changes |= changes;
                u.node = Arc::clone(node);
            })
            .or_insert_with(|| NodeUpdate {
                node: Arc::clone(node),
                changes,
            });
    }

    fn deleted(&mut self, node: &Arc<ProjectNode>) {
        self.updated.shift_remove(node.file());
        self.deleted.insert(node.file().to_path_buf(), Arc::clone(node));
    }

    fn is_deleted(&self, file: &Path) -> bool {
        self.deleted.contains_key(file)
    }
}

/// Declared module descriptors that exist on disk
fn existing_module_files(state: &ProjectState) -> Vec<PathBuf> {
    state
        .model
        .module_files
        .iter()
        .filter(|f| f.is_file())
        .cloned()
        .collect()
}

impl ProjectTree {
    /// Refreshes the given descriptors, adding unknown ones to the tree
    pub fn update(
        &self,
        files: &[PathBuf],
        force: bool,
        settings: &GeneralSettings,
        cancel: &Cancellation,
    ) -> Result<UpdateSummary, TreeError> {
        let profiles = self.explicit_profiles();
        self.run_update(files, false, force, &profiles, settings, cancel)
    }

    /// Recursively refreshes every managed file, then drops roots that are
    /// no longer managed
    pub fn update_all(
        &self,
        force: bool,
        settings: &GeneralSettings,
        cancel: &Cancellation,
    ) -> Result<UpdateSummary, TreeError> {
        let managed = self.existing_managed_files();
        let profiles = self.explicit_profiles();
        let mut summary = self.run_update(&managed, true, force, &profiles, settings, cancel)?;

        let obsolete: Vec<PathBuf> = self
            .root_projects()
            .iter()
            .map(|r| r.file().to_path_buf())
            .filter(|f| !managed.contains(f))
            .collect();
        if !obsolete.is_empty() {
            summary.absorb(self.delete(&obsolete, settings, cancel)?);
        }

        Ok(summary)
    }

    /// Removes the given descriptors and re-reads whatever inherited from them
    pub fn delete(
        &self,
        files: &[PathBuf],
        settings: &GeneralSettings,
        cancel: &Cancellation,
    ) -> Result<UpdateSummary, TreeError> {
        let profiles = self.explicit_profiles();
        let pass = Pass {
            profiles: &profiles,
            settings,
            cancel,
        };
        let mut ctx = UpdateContext::default();

        let mut inheritors: IndexMap<PathBuf, Arc<ProjectNode>> = IndexMap::new();
        for file in files {
            let Some(node) = self.find_by_file(&normalize_path(file)) else {
                debug!(file = %file.display(), "Nothing to delete");
                continue;
            };
            for inheritor in self.find_inheritors(&node) {
                inheritors.entry(inheritor.file().to_path_buf()).or_insert(inheritor);
            }
            self.do_delete(&node, &mut ctx);
        }

        let mut outcome = Ok(());
        for (file, inheritor) in inheritors {
            if ctx.is_deleted(&file) {
                continue;
            }
            let aggregator = self.find_aggregator(&inheritor);
            if let Err(e) = self.do_update(inheritor, aggregator, false, false, false, Via::Inheritor, &pass, &mut ctx) {
                outcome = Err(e);
                break;
            }
        }

        self.update_explicit_profiles();
        let summary = self.finish(ctx);
        outcome.map(|()| summary)
    }

    fn run_update(
        &self,
        files: &[PathBuf],
        recursive: bool,
        force: bool,
        profiles: &ExplicitProfiles,
        settings: &GeneralSettings,
        cancel: &Cancellation,
    ) -> Result<UpdateSummary, TreeError> {
        let pass = Pass {
            profiles,
            settings,
            cancel,
        };
        let mut ctx = UpdateContext::default();

        let mut outcome = Ok(());
        for file in files {
            let file = normalize_path(file);
            let result = match self.find_by_file(&file) {
                Some(node) => {
                    let aggregator = self.find_aggregator(&node);
                    self.do_update(node, aggregator, false, recursive, force, Via::Request, &pass, &mut ctx)
                }
                None if file.is_file() => self.do_add(&file, recursive, &pass, &mut ctx),
                None => {
                    debug!(file = %file.display(), "Skipping missing descriptor");
                    Ok(())
                }
            };
            if let Err(e) = result {
                outcome = Err(e);
                break;
            }
        }

        self.update_explicit_profiles();
        let summary = self.finish(ctx);
        outcome.map(|()| summary)
    }

    fn do_add(&self, file: &Path, recursive: bool, pass: &Pass<'_>, ctx: &mut UpdateContext) -> Result<(), TreeError> {
        let aggregator = self
            .projects()
            .into_iter()
            .find(|p| p.file() != file && existing_module_files(&p.state()).iter().any(|m| m == file));
        let node = ProjectNode::new(file);
        self.do_update(node, aggregator, true, recursive, false, Via::Request, pass, ctx)
    }

    #[allow(clippy::too_many_arguments)]
    fn do_update(
        &self,
        node: Arc<ProjectNode>,
        aggregator: Option<Arc<ProjectNode>>,
        is_new: bool,
        recursive: bool,
        force: bool,
        via: Via,
        pass: &Pass<'_>,
        ctx: &mut UpdateContext,
    ) -> Result<(), TreeError> {
        pass.cancel.check()?;

        if ctx.stack.iter().any(|f| f.as_path() == node.file()) {
            match (via, &aggregator) {
                (Via::Module, Some(aggregator)) => self.record_cycle(aggregator, &node, ctx),
                _ => debug!(file = %node.file().display(), "Recursion detected, skipping"),
            }
            return Ok(());
        }
        if !is_new && !self.contains(&node) {
            return Ok(());
        }

        ctx.stack.push(node.file().to_path_buf());
        let result = self.refresh(&node, aggregator.as_ref(), is_new, recursive, force, pass, ctx);
        ctx.stack.pop();
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn refresh(
        &self,
        node: &Arc<ProjectNode>,
        aggregator: Option<&Arc<ProjectNode>>,
        is_new: bool,
        recursive: bool,
        force: bool,
        pass: &Pass<'_>,
        ctx: &mut UpdateContext,
    ) -> Result<(), TreeError> {
        let previous_modules = if is_new { Vec::new() } else { self.modules(node) };
        let mut inheritors: IndexMap<PathBuf, Arc<ProjectNode>> = IndexMap::new();
        if !is_new {
            for inheritor in self.find_inheritors(node) {
                inheritors.insert(inheritor.file().to_path_buf(), inheritor);
            }
        }

        let mut timestamp = self.calculate_timestamp(node, pass);
        let stored = self.timestamp_of(node);
        let changed = force || stored.as_ref() != Some(&timestamp);
        let mut changes = ProjectChanges::NONE;

        if changed {
            let previous = node.state();
            let result = self.reader.read(node.file(), pass.profiles, self);
            ctx.reads += 1;

            let state = ProjectState::from_read(node.file(), result.model, result.problems, self.next_read_stamp());
            changes = if is_new || force {
                ProjectChanges::ALL
            } else {
                state.model_changes_since(&previous)
            };
            let parent_changed = state.parent() != previous.parent();

            {
                // the node stays indexed under its old coordinate until the new one is in place
                let mut structure = self.structure.write();
                structure.clear_coordinate(node);
                node.install(state);
                structure.register(node);
            }

            if parent_changed {
                timestamp = self.calculate_timestamp(node, pass);
            }
            debug!(file = %node.file().display(), %timestamp, %changes, "Read project");
            self.structure
                .write()
                .timestamps
                .insert(node.file().to_path_buf(), timestamp);
        }

        let reconnected = {
            let mut structure = self.structure.write();
            if is_new {
                structure.attach(aggregator, node);
                true
            } else {
                structure.reattach(aggregator, node)
            }
        };
        if changed || reconnected {
            ctx.updated(node, changes);
        }

        let existing = existing_module_files(&node.state());

        for module in previous_modules {
            if existing.iter().any(|f| f.as_path() == module.file()) {
                continue;
            }
            if self.is_managed_file(module.file()) {
                if self.structure.write().reattach(None, &module) {
                    ctx.updated(&module, ProjectChanges::NONE);
                }
            } else if let Some(claimant) = self.find_claimant(&module, node, ctx) {
                if self.structure.write().reattach(Some(&claimant), &module) {
                    ctx.updated(&module, ProjectChanges::NONE);
                }
            } else {
                self.do_delete(&module, ctx);
                inheritors.retain(|f, _| !ctx.is_deleted(f));
            }
        }

        for file in existing {
            let known = self.find_by_file(&file);
            let is_new_module = known.is_none();
            let module = known.unwrap_or_else(|| ProjectNode::new(&file));

            if !is_new_module {
                if self.structure.read().is_aggregation_ancestor(module.file(), node.file()) {
                    self.record_cycle(node, &module, ctx);
                    continue;
                }
                if let Some(owner) = self.find_aggregator(&module).filter(|o| o.file() != node.file()) {
                    info!(
                        module = %module.file().display(),
                        owner = %owner.file().display(),
                        "Module is already included into another aggregator"
                    );
                    continue;
                }
            }

            if changed || is_new_module || recursive {
                self.do_update(
                    module,
                    Some(Arc::clone(node)),
                    is_new_module,
                    recursive,
                    recursive && force,
                    Via::Module,
                    pass,
                    ctx,
                )?;
            } else if self.structure.write().reattach(Some(node), &module) {
                ctx.updated(&module, ProjectChanges::NONE);
            }
        }

        for inheritor in self.find_inheritors(node) {
            inheritors.entry(inheritor.file().to_path_buf()).or_insert(inheritor);
        }
        for (file, inheritor) in inheritors {
            if ctx.is_deleted(&file) {
                continue;
            }
            let aggregator = self.find_aggregator(&inheritor);
            self.do_update(inheritor, aggregator, false, false, false, Via::Inheritor, pass, ctx)?;
        }

        Ok(())
    }

    /// Another known aggregator that still declares `module`
    fn find_claimant(
        &self,
        module: &Arc<ProjectNode>,
        previous: &Arc<ProjectNode>,
        ctx: &UpdateContext,
    ) -> Option<Arc<ProjectNode>> {
        self.projects().into_iter().find(|p| {
            p.file() != previous.file()
                && p.file() != module.file()
                && !ctx.is_deleted(p.file())
                && existing_module_files(&p.state()).iter().any(|m| m.as_path() == module.file())
                && !self.structure.read().is_aggregation_ancestor(module.file(), p.file())
        })
    }

    fn do_delete(&self, node: &Arc<ProjectNode>, ctx: &mut UpdateContext) {
        for module in self.modules(node) {
            if self.is_managed_file(module.file()) {
                if self.structure.write().reattach(None, &module) {
                    ctx.updated(&module, ProjectChanges::NONE);
                }
            } else {
                self.do_delete(&module, ctx);
            }
        }

        self.structure.write().forget(node);
        debug!(file = %node.file().display(), "Removed project");
        ctx.deleted(node);
    }

    fn record_cycle(&self, aggregator: &Arc<ProjectNode>, module: &Arc<ProjectNode>, ctx: &mut UpdateContext) {
        warn!(
            aggregator = %aggregator.file().display(),
            module = %module.file().display(),
            "Aggregation cycle detected"
        );
        let problem = Problem::cycle(
            aggregator.file(),
            format!("Module {} closes an aggregation cycle", module.file().display()),
        );
        let installed = {
            let _structure = self.structure.write();
            aggregator.update_state(|s| s.with_problem(problem)).is_some()
        };
        if installed {
            ctx.updated(aggregator, ProjectChanges::NONE);
        }
    }

    fn calculate_timestamp(&self, node: &Arc<ProjectNode>, pass: &Pass<'_>) -> Timestamp {
        let parent_read_stamp = self
            .find_parent(node)
            .map(|p| p.last_read_stamp() as i64)
            .unwrap_or(MISSING);
        let profiles_file = self.reader.profiles_file(node.file());

        Timestamp {
            descriptor: file_stamp(Some(node.file())),
            parent_read_stamp,
            profiles_file: file_stamp(profiles_file.as_deref()),
            user_settings: file_stamp(pass.settings.user_settings_path().as_deref()),
            global_settings: file_stamp(pass.settings.global_settings_path().as_deref()),
            profiles_hash: pass.profiles.fingerprint(),
            environment: pass
                .settings
                .environment_files
                .iter()
                .map(|f| file_stamp(Some(f)))
                .collect(),
        }
    }

    fn finish(&self, ctx: UpdateContext) -> UpdateSummary {
        let updated: Vec<NodeUpdate> = ctx.updated.into_values().collect();
        let deleted: Vec<Arc<ProjectNode>> = ctx.deleted.into_values().collect();

        if !deleted.is_empty() || updated.iter().any(|u| u.changes.intersects(ProjectChanges::DEPENDENCIES)) {
            self.rebuild_artifact_index();
        }

        if !updated.is_empty() || !deleted.is_empty() {
            info!(
                reads = ctx.reads,
                updated = updated.len(),
                deleted = deleted.len(),
                "Project tree updated"
            );
        }

        self.events.fire_projects_read(&updated);
        for node in &deleted {
            self.events.fire_project_removed(node);
        }

        UpdateSummary {
            reads: ctx.reads,
            updated,
            deleted,
        }
    }
}
