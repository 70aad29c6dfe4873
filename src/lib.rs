//! buildtree - an incremental model of multi-module build projects
//!
//! Reads project descriptors into a tree of aggregators and modules, keeps
//! it current as files change, and resolves each project's dependencies,
//! plugins and generated source folders on background stage workers.

pub mod cli;
pub mod domain;
pub mod pipeline;
pub mod reader;
pub mod repository;
pub mod storage;
pub mod tree;

pub use domain::{Artifact, Coordinate, ExplicitProfiles, Problem, ProblemKind};
pub use pipeline::ProjectsManager;
pub use tree::{ProjectNode, ProjectState, ProjectTree};
