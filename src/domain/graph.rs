//! Dependency graph between projects of one tree
//!
//! An edge `dependency -> dependent` exists for every declared dependency
//! that is itself a project. Uses petgraph for graph operations.

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::HashMap;
use thiserror::Error;

use super::coordinate::Coordinate;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("Adding dependency would create a cycle: {0} -> {1}")]
    CycleDetected(Coordinate, Coordinate),

    #[error("Project not found: {0}")]
    ProjectNotFound(Coordinate),

    #[error("Self-dependency not allowed: {0}")]
    SelfDependency(Coordinate),
}

/// A dependency graph for projects
#[derive(Debug, Default)]
pub struct ProjectGraph {
    graph: DiGraph<Coordinate, ()>,
    node_map: HashMap<Coordinate, NodeIndex>,
    /// Edges dropped because they would have closed a cycle
    rejected: Vec<(Coordinate, Coordinate)>,
}

impl ProjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from `(project, declared dependencies)` pairs
    ///
    /// Dependencies that are not projects are ignored. Edges that would close
    /// a cycle are skipped and reported by [`ProjectGraph::rejected_edges`].
    pub fn build(projects: impl IntoIterator<Item = (Coordinate, Vec<Coordinate>)>) -> Self {
        let mut graph = Self::new();

        let projects: Vec<_> = projects.into_iter().collect();
        for (project, _) in &projects {
            graph.add_project(project.clone());
        }

        for (project, dependencies) in &projects {
            for dependency in dependencies {
                if !graph.contains(dependency) {
                    continue;
                }
                match graph.add_dependency(project, dependency) {
                    Ok(()) => {}
                    Err(GraphError::CycleDetected(a, b)) => graph.rejected.push((a, b)),
                    Err(_) => {}
                }
            }
        }

        graph
    }

    pub fn add_project(&mut self, coordinate: Coordinate) {
        if !self.node_map.contains_key(&coordinate) {
            let idx = self.graph.add_node(coordinate.clone());
            self.node_map.insert(coordinate, idx);
        }
    }

    /// Removes a project and all its edges
    pub fn remove_project(&mut self, coordinate: &Coordinate) -> bool {
        if let Some(idx) = self.node_map.remove(coordinate) {
            self.graph.remove_node(idx);
            // petgraph swaps the last index into the removed slot
            self.rebuild_node_map();
            true
        } else {
            false
        }
    }

    fn rebuild_node_map(&mut self) {
        self.node_map.clear();
        for idx in self.graph.node_indices() {
            if let Some(coordinate) = self.graph.node_weight(idx) {
                self.node_map.insert(coordinate.clone(), idx);
            }
        }
    }

    /// Adds an edge: `project` depends on `dependency`
    pub fn add_dependency(&mut self, project: &Coordinate, dependency: &Coordinate) -> Result<(), GraphError> {
        if project == dependency {
            return Err(GraphError::SelfDependency(project.clone()));
        }

        let project_idx = *self
            .node_map
            .get(project)
            .ok_or_else(|| GraphError::ProjectNotFound(project.clone()))?;
        let dep_idx = *self
            .node_map
            .get(dependency)
            .ok_or_else(|| GraphError::ProjectNotFound(dependency.clone()))?;

        if self.graph.find_edge(dep_idx, project_idx).is_some() {
            return Ok(());
        }

        if has_path_connecting(&self.graph, project_idx, dep_idx, None) {
            return Err(GraphError::CycleDetected(project.clone(), dependency.clone()));
        }

        self.graph.add_edge(dep_idx, project_idx, ());
        Ok(())
    }

    /// Direct dependencies of a project
    pub fn dependencies(&self, coordinate: &Coordinate) -> Vec<Coordinate> {
        self.neighbors(coordinate, petgraph::Direction::Incoming)
    }

    /// Direct dependents of a project
    pub fn dependents(&self, coordinate: &Coordinate) -> Vec<Coordinate> {
        self.neighbors(coordinate, petgraph::Direction::Outgoing)
    }

    fn neighbors(&self, coordinate: &Coordinate, direction: petgraph::Direction) -> Vec<Coordinate> {
        let Some(idx) = self.node_map.get(coordinate) else {
            return vec![];
        };

        self.graph
            .neighbors_directed(*idx, direction)
            .filter_map(|idx| self.graph.node_weight(idx).cloned())
            .collect()
    }

    /// Every project that depends on `coordinate`, directly or not
    pub fn transitive_dependents(&self, coordinate: &Coordinate) -> Vec<Coordinate> {
        let Some(start) = self.node_map.get(coordinate) else {
            return vec![];
        };

        let mut dfs = Dfs::new(&self.graph, *start);
        let mut result = Vec::new();
        while let Some(idx) = dfs.next(&self.graph) {
            if idx == *start {
                continue;
            }
            if let Some(c) = self.graph.node_weight(idx) {
                result.push(c.clone());
            }
        }
        result
    }

    /// Projects ordered so that dependencies come before dependents
    pub fn resolve_order(&self) -> Result<Vec<Coordinate>, GraphError> {
        toposort(&self.graph, None)
            .map(|order| {
                order
                    .into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx).cloned())
                    .collect()
            })
            .map_err(|cycle| {
                let c = self.graph[cycle.node_id()].clone();
                GraphError::CycleDetected(c.clone(), c)
            })
    }

    pub fn rejected_edges(&self) -> &[(Coordinate, Coordinate)] {
        &self.rejected
    }

    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        self.node_map.contains_key(coordinate)
    }

    pub fn len(&self) -> usize {
        self.node_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_map.is_empty()
    }

    pub fn projects(&self) -> impl Iterator<Item = &Coordinate> {
        self.node_map.keys()
    }
}
