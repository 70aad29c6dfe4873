//! Structural indexes of the tree
//!
//! All indexes live in one struct behind the tree's `RwLock`, so every
//! mutation below keeps them consistent with each other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::node::ProjectNode;
use crate::domain::{Coordinate, Timestamp};

#[derive(Default)]
pub(crate) struct Structure {
    pub roots: Vec<Arc<ProjectNode>>,
    pub by_file: HashMap<PathBuf, Arc<ProjectNode>>,
    pub by_coordinate: HashMap<Coordinate, Arc<ProjectNode>>,
    /// aggregator file -> ordered modules
    pub modules: HashMap<PathBuf, Vec<Arc<ProjectNode>>>,
    /// module file -> aggregator
    pub aggregators: HashMap<PathBuf, Arc<ProjectNode>>,
    pub timestamps: HashMap<PathBuf, Timestamp>,
}

impl Structure {
    pub fn aggregator_of(&self, file: &Path) -> Option<&Arc<ProjectNode>> {
        self.aggregators.get(file)
    }

    pub fn modules_of(&self, file: &Path) -> Vec<Arc<ProjectNode>> {
        self.modules.get(file).cloned().unwrap_or_default()
    }

    /// Indexes a node under its file and current coordinate
    pub fn register(&mut self, node: &Arc<ProjectNode>) {
        self.by_file.insert(node.file().to_path_buf(), Arc::clone(node));
        self.by_coordinate.insert(node.coordinate(), Arc::clone(node));
    }

    /// Drops the coordinate mapping if it still points at `node`
    pub fn clear_coordinate(&mut self, node: &Arc<ProjectNode>) {
        let coordinate = node.coordinate();
        if self
            .by_coordinate
            .get(&coordinate)
            .is_some_and(|existing| existing.file() == node.file())
        {
            self.by_coordinate.remove(&coordinate);
        }
    }

    /// Places `node` under `aggregator`, or among the roots for None
    pub fn attach(&mut self, aggregator: Option<&Arc<ProjectNode>>, node: &Arc<ProjectNode>) {
        match aggregator {
            Some(aggregator) => {
                let modules = self.modules.entry(aggregator.file().to_path_buf()).or_default();
                if !modules.iter().any(|m| m.file() == node.file()) {
                    modules.push(Arc::clone(node));
                }
                self.aggregators
                    .insert(node.file().to_path_buf(), Arc::clone(aggregator));
            }
            None => {
                if !self.roots.iter().any(|r| r.file() == node.file()) {
                    self.roots.push(Arc::clone(node));
                }
            }
        }
    }

    /// Removes `node` from its aggregator's module list or from the roots
    pub fn detach(&mut self, node: &Arc<ProjectNode>) {
        match self.aggregators.remove(node.file()) {
            Some(aggregator) => {
                if let Some(modules) = self.modules.get_mut(aggregator.file()) {
                    modules.retain(|m| m.file() != node.file());
                    if modules.is_empty() {
                        self.modules.remove(aggregator.file());
                    }
                }
            }
            None => self.roots.retain(|r| r.file() != node.file()),
        }
    }

    /// Moves `node` under a new aggregator; false if it was already there
    pub fn reattach(&mut self, aggregator: Option<&Arc<ProjectNode>>, node: &Arc<ProjectNode>) -> bool {
        let current = self.aggregators.get(node.file()).map(|a| a.file().to_path_buf());
        let target = aggregator.map(|a| a.file().to_path_buf());
        if current == target && (target.is_some() || self.roots.iter().any(|r| r.file() == node.file())) {
            return false;
        }
        self.detach(node);
        self.attach(aggregator, node);
        true
    }

    /// Removes every trace of `node`
    pub fn forget(&mut self, node: &Arc<ProjectNode>) {
        self.detach(node);
        self.clear_coordinate(node);
        self.by_file.remove(node.file());
        self.modules.remove(node.file());
        self.timestamps.remove(node.file());
    }

    /// Whether `ancestor` is `node` or one of its aggregators
    pub fn is_aggregation_ancestor(&self, ancestor: &Path, node: &Path) -> bool {
        let mut current = Some(node.to_path_buf());
        let mut hops = 0;
        while let Some(file) = current {
            if file == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.by_file.len() + 1 {
                return false;
            }
            current = self.aggregators.get(&file).map(|a| a.file().to_path_buf());
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> Arc<ProjectNode> {
        ProjectNode::new(Path::new(&format!("/w/{}/project.toml", name)))
    }

    #[test]
    fn attach_and_detach_roots() {
        let mut s = Structure::default();
        let root = node("root");
        s.attach(None, &root);
        s.attach(None, &root);
        assert_eq!(s.roots.len(), 1);

        s.detach(&root);
        assert!(s.roots.is_empty());
    }

    #[test]
    fn reattach_moves_between_aggregators() {
        let mut s = Structure::default();
        let (a, b, m) = (node("a"), node("b"), node("m"));
        s.attach(None, &a);
        s.attach(None, &b);
        s.attach(None, &m);

        assert!(s.reattach(Some(&a), &m));
        assert!(!s.reattach(Some(&a), &m));
        assert_eq!(s.modules_of(a.file()).len(), 1);
        assert_eq!(s.roots.len(), 2);

        assert!(s.reattach(Some(&b), &m));
        assert!(s.modules_of(a.file()).is_empty());
        assert_eq!(s.modules_of(b.file()).len(), 1);
        assert_eq!(s.aggregator_of(m.file()).unwrap().file(), b.file());

        assert!(s.reattach(None, &m));
        assert_eq!(s.roots.len(), 3);
        assert!(s.aggregator_of(m.file()).is_none());
    }

    #[test]
    fn forget_clears_every_index() {
        let mut s = Structure::default();
        let (a, m) = (node("a"), node("m"));
        s.register(&a);
        s.register(&m);
        s.attach(None, &a);
        s.attach(Some(&a), &m);

        s.forget(&m);
        assert!(!s.by_file.contains_key(m.file()));
        assert!(s.aggregator_of(m.file()).is_none());
        assert!(s.modules_of(a.file()).is_empty());
    }

    #[test]
    fn ancestor_walks_aggregator_chain() {
        let mut s = Structure::default();
        let (a, b, c) = (node("a"), node("b"), node("c"));
        for n in [&a, &b, &c] {
            s.register(n);
        }
        s.attach(None, &a);
        s.attach(Some(&a), &b);
        s.attach(Some(&b), &c);

        assert!(s.is_aggregation_ancestor(a.file(), c.file()));
        assert!(s.is_aggregation_ancestor(c.file(), c.file()));
        assert!(!s.is_aggregation_ancestor(c.file(), a.file()));
    }
}
