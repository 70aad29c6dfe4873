//! Artifacts: dependencies, plugins and the files they resolve to

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use super::coordinate::Coordinate;

/// Default packaging type of a dependency
pub const DEFAULT_KIND: &str = "jar";

/// Dependency scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Compile,
    Provided,
    Runtime,
    Test,
    System,
    Import,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Compile => "compile",
            Scope::Provided => "provided",
            Scope::Runtime => "runtime",
            Scope::Test => "test",
            Scope::System => "system",
            Scope::Import => "import",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplication key: coordinate, classifier and kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub coordinate: Coordinate,
    pub classifier: Option<String>,
    pub kind: String,
}

/// A declared or resolved artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub coordinate: Coordinate,
    pub classifier: Option<String>,
    pub kind: String,
    pub scope: Scope,
    pub optional: bool,
    /// Local file once resolved
    pub file: Option<PathBuf>,
    pub resolved: bool,
}

impl Artifact {
    /// Creates an unresolved artifact with the default kind
    pub fn new(coordinate: Coordinate, scope: Scope) -> Self {
        Self {
            coordinate,
            classifier: None,
            kind: DEFAULT_KIND.to_string(),
            scope,
            optional: false,
            file: None,
            resolved: false,
        }
    }

    pub fn with_classifier(mut self, classifier: Option<String>) -> Self {
        self.classifier = classifier.filter(|c| !c.is_empty());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Returns a copy pointing at a local file
    pub fn resolved_to(&self, file: impl Into<PathBuf>) -> Self {
        let mut artifact = self.clone();
        artifact.file = Some(file.into());
        artifact.resolved = true;
        artifact
    }

    /// Returns a copy with resolution cleared
    pub fn unresolved(&self) -> Self {
        let mut artifact = self.clone();
        artifact.file = None;
        artifact.resolved = false;
        artifact
    }

    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            coordinate: self.coordinate.clone(),
            classifier: self.classifier.clone(),
            kind: self.kind.clone(),
        }
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// File name in repository layout: `{artifact}-{version}[-{classifier}].{ext}`
    pub fn file_name(&self, extension: &str) -> String {
        match &self.classifier {
            Some(classifier) => format!(
                "{}-{}-{}.{}",
                self.coordinate.artifact_id(),
                self.coordinate.version(),
                classifier,
                extension
            ),
            None => format!(
                "{}-{}.{}",
                self.coordinate.artifact_id(),
                self.coordinate.version(),
                extension
            ),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coordinate)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        if self.kind != DEFAULT_KIND {
            write!(f, "@{}", self.kind)?;
        }
        Ok(())
    }
}

/// Removes duplicate artifacts by key, keeping the first occurrence
pub fn dedup_artifacts(artifacts: impl IntoIterator<Item = Artifact>) -> Vec<Artifact> {
    let mut seen = HashSet::new();
    artifacts
        .into_iter()
        .filter(|artifact| seen.insert(artifact.key()))
        .collect()
}

/// A build plugin declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Plugin {
    pub coordinate: Coordinate,
    /// Extension plugins contribute to descriptor processing itself
    pub extensions: bool,
}

impl Plugin {
    pub fn new(coordinate: Coordinate, extensions: bool) -> Self {
        Self {
            coordinate,
            extensions,
        }
    }
}

/// A remote repository declared by a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub id: String,
    pub url: String,
}
