//! Build coordinates
//!
//! Format: `{group}:{artifact}:{version}` (e.g., `org.example:core:1.0`).
//! A coordinate is immutable; equality and hashing cover all three fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Group and version used for descriptors that could not be read
pub const UNKNOWN: &str = "unknown";

const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

#[derive(Debug, Error, PartialEq)]
pub enum CoordinateError {
    #[error("Invalid coordinate format: expected 'group:artifact:version', got '{0}'")]
    InvalidFormat(String),

    #[error("Empty {field} in coordinate '{input}'")]
    EmptyField { field: &'static str, input: String },
}

/// Identity of a project or artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Coordinate {
    group_id: String,
    artifact_id: String,
    version: String,
}

impl Coordinate {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
        }
    }

    /// Placeholder coordinate for a descriptor that failed to parse
    pub fn unknown(artifact_id: impl Into<String>) -> Self {
        Self::new(UNKNOWN, artifact_id, UNKNOWN)
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns true for `-SNAPSHOT` versions
    pub fn is_snapshot(&self) -> bool {
        self.version.ends_with(SNAPSHOT_SUFFIX)
    }

    /// Returns true if group and artifact match, ignoring the version
    pub fn matches(&self, group_id: &str, artifact_id: &str) -> bool {
        self.group_id == group_id && self.artifact_id == artifact_id
    }

    /// Same group and artifact, different version
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self::new(self.group_id.clone(), self.artifact_id.clone(), version)
    }

    /// `group:artifact` without the version
    pub fn key(&self) -> String {
        format!("{}:{}", self.group_id, self.artifact_id)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)
    }
}

impl FromStr for Coordinate {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(CoordinateError::InvalidFormat(s.to_string()));
        }

        for (field, value) in ["group", "artifact", "version"].into_iter().zip(&parts) {
            if value.trim().is_empty() {
                return Err(CoordinateError::EmptyField {
                    field,
                    input: s.to_string(),
                });
            }
        }

        Ok(Self::new(parts[0].trim(), parts[1].trim(), parts[2].trim()))
    }
}

impl TryFrom<String> for Coordinate {
    type Error = CoordinateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Coordinate> for String {
    fn from(coordinate: Coordinate) -> Self {
        coordinate.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_display_format() {
        let c = Coordinate::new("org.example", "core", "1.0");
        assert_eq!(c.to_string(), "org.example:core:1.0");
        assert_eq!(c.key(), "org.example:core");
    }

    #[test]
    fn coordinate_parses_correctly() {
        let c: Coordinate = "org.example:core:1.0".parse().unwrap();
        assert_eq!(c.group_id(), "org.example");
        assert_eq!(c.artifact_id(), "core");
        assert_eq!(c.version(), "1.0");
    }

    #[test]
    fn coordinate_parse_trims_whitespace() {
        let c: Coordinate = "  g : a : 1 ".parse().unwrap();
        assert_eq!(c, Coordinate::new("g", "a", "1"));
    }

    #[test]
    fn coordinate_rejects_invalid_format() {
        assert!(matches!(
            "g:a".parse::<Coordinate>(),
            Err(CoordinateError::InvalidFormat(_))
        ));
        assert!(matches!(
            "g:a:1:extra".parse::<Coordinate>(),
            Err(CoordinateError::InvalidFormat(_))
        ));
        assert!(matches!(
            "g::1".parse::<Coordinate>(),
            Err(CoordinateError::EmptyField { field: "artifact", .. })
        ));
    }

    #[test]
    fn snapshot_detection() {
        assert!(Coordinate::new("g", "a", "1.0-SNAPSHOT").is_snapshot());
        assert!(!Coordinate::new("g", "a", "1.0").is_snapshot());
    }

    #[test]
    fn unknown_coordinate() {
        let c = Coordinate::unknown("broken");
        assert_eq!(c.to_string(), "unknown:broken:unknown");
    }

    #[test]
    fn coordinate_serializes_as_string() {
        let c = Coordinate::new("g", "a", "1");
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"g:a:1\"");

        let parsed: Coordinate = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn equality_covers_version() {
        let a = Coordinate::new("g", "a", "1");
        assert_ne!(a, a.with_version("2"));
        assert!(a.matches("g", "a"));
    }
}
