//! Domain models for buildtree
//!
//! Coordinates, artifacts, problems and the other value types the tree and
//! the pipeline exchange. Apart from reading file modification times for
//! timestamps, nothing here performs I/O.

mod artifact;
mod artifact_index;
mod changes;
mod coordinate;
mod graph;
mod problem;
mod profiles;
mod timestamp;

pub use artifact::{dedup_artifacts, Artifact, ArtifactKey, Plugin, RemoteRepository, Scope, DEFAULT_KIND};
pub use artifact_index::ArtifactIndex;
pub use changes::ProjectChanges;
pub use coordinate::{Coordinate, CoordinateError, UNKNOWN};
pub use graph::{GraphError, ProjectGraph};
pub use problem::{Problem, ProblemKind};
pub use profiles::{ExplicitProfiles, ProfileState};
pub use timestamp::{file_stamp, Timestamp, MISSING};
