//! Problems attached to project state
//!
//! Problems never abort an update. They are recorded on the node that
//! caused them and replaced when the stage that produced them runs again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::artifact::{Artifact, Plugin};

/// Problem taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    /// The descriptor could not be parsed
    Parse,
    /// A declared module path has no descriptor
    MissingModule,
    UnresolvedDependency,
    UnresolvedPlugin,
    UnresolvedExtension,
    /// Aggregation or inheritance loops back on itself
    CycleDetected,
    /// The generate-sources command failed
    Generation,
    /// A pipeline task panicked or failed unexpectedly
    Internal,
}

impl ProblemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemKind::Parse => "parse",
            ProblemKind::MissingModule => "missing_module",
            ProblemKind::UnresolvedDependency => "unresolved_dependency",
            ProblemKind::UnresolvedPlugin => "unresolved_plugin",
            ProblemKind::UnresolvedExtension => "unresolved_extension",
            ProblemKind::CycleDetected => "cycle_detected",
            ProblemKind::Generation => "generation",
            ProblemKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A problem recorded against a descriptor file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Problem {
    pub kind: ProblemKind,
    pub path: PathBuf,
    pub message: String,
}

impl Problem {
    pub fn new(kind: ProblemKind, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn parse(path: &Path, message: impl Into<String>) -> Self {
        Self::new(ProblemKind::Parse, path, message)
    }

    pub fn missing_module(path: &Path, module: &Path) -> Self {
        Self::new(
            ProblemKind::MissingModule,
            path,
            format!("Module descriptor not found: {}", module.display()),
        )
    }

    pub fn cycle(path: &Path, message: impl Into<String>) -> Self {
        Self::new(ProblemKind::CycleDetected, path, message)
    }

    pub fn unresolved_dependency(path: &Path, artifact: &Artifact, reason: impl fmt::Display) -> Self {
        Self::new(
            ProblemKind::UnresolvedDependency,
            path,
            format!("Unresolved dependency {}: {}", artifact, reason),
        )
    }

    pub fn unresolved_plugin(path: &Path, plugin: &Plugin, reason: impl fmt::Display) -> Self {
        let kind = if plugin.extensions {
            ProblemKind::UnresolvedExtension
        } else {
            ProblemKind::UnresolvedPlugin
        };
        Self::new(
            kind,
            path,
            format!("Unresolved plugin {}: {}", plugin.coordinate, reason),
        )
    }

    pub fn internal(path: &Path, message: impl Into<String>) -> Self {
        Self::new(ProblemKind::Internal, path, message)
    }

    /// Drops every problem of the given kinds and appends the new ones,
    /// skipping duplicates.
    pub fn replace_kinds(existing: &[Problem], kinds: &[ProblemKind], new: Vec<Problem>) -> Vec<Problem> {
        let mut result: Vec<Problem> = existing
            .iter()
            .filter(|p| !kinds.contains(&p.kind))
            .cloned()
            .collect();
        for problem in new {
            if !result.contains(&problem) {
                result.push(problem);
            }
        }
        result
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.path.display(), self.message)
    }
}
