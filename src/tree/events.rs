//! Change notifications
//!
//! Listeners register on an [`EventDispatcher`] owned by whoever builds the
//! tree. Events are delivered synchronously on the thread that produced
//! them, after the tree lock has been released.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::node::ProjectNode;
use crate::domain::ProjectChanges;

/// A node touched by an update, with what changed
#[derive(Debug, Clone)]
pub struct NodeUpdate {
    pub node: Arc<ProjectNode>,
    pub changes: ProjectChanges,
}

/// Receives tree and pipeline events. Every method defaults to a no-op.
pub trait TreeListener: Send + Sync {
    /// One batched call per update request
    fn projects_read(&self, _updated: &[NodeUpdate]) {}

    fn project_removed(&self, _node: &Arc<ProjectNode>) {}

    fn dependencies_resolved(&self, _node: &Arc<ProjectNode>, _changes: ProjectChanges) {}

    fn plugins_resolved(&self, _node: &Arc<ProjectNode>) {}

    fn folders_resolved(&self, _node: &Arc<ProjectNode>, _changes: ProjectChanges) {}

    fn artifacts_downloaded(&self, _node: &Arc<ProjectNode>) {}

    fn profiles_changed(&self) {}

    fn ignored_state_changed(&self, _ignored: &[Arc<ProjectNode>], _unignored: &[Arc<ProjectNode>]) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn TreeListener>)>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, listener: Arc<dyn TreeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    // Listeners may subscribe or schedule work from inside a callback, so
    // delivery iterates over a copy.
    fn each(&self, f: impl Fn(&dyn TreeListener)) {
        let listeners: Vec<Arc<dyn TreeListener>> =
            self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            f(listener.as_ref());
        }
    }

    pub fn fire_projects_read(&self, updated: &[NodeUpdate]) {
        if updated.is_empty() {
            return;
        }
        self.each(|l| l.projects_read(updated));
    }

    pub fn fire_project_removed(&self, node: &Arc<ProjectNode>) {
        self.each(|l| l.project_removed(node));
    }

    pub fn fire_dependencies_resolved(&self, node: &Arc<ProjectNode>, changes: ProjectChanges) {
        self.each(|l| l.dependencies_resolved(node, changes));
    }

    pub fn fire_plugins_resolved(&self, node: &Arc<ProjectNode>) {
        self.each(|l| l.plugins_resolved(node));
    }

    pub fn fire_folders_resolved(&self, node: &Arc<ProjectNode>, changes: ProjectChanges) {
        self.each(|l| l.folders_resolved(node, changes));
    }

    pub fn fire_artifacts_downloaded(&self, node: &Arc<ProjectNode>) {
        self.each(|l| l.artifacts_downloaded(node));
    }

    pub fn fire_profiles_changed(&self) {
        self.each(|l| l.profiles_changed());
    }

    pub fn fire_ignored_state_changed(&self, ignored: &[Arc<ProjectNode>], unignored: &[Arc<ProjectNode>]) {
        if ignored.is_empty() && unignored.is_empty() {
            return;
        }
        self.each(|l| l.ignored_state_changed(ignored, unignored));
    }
}
