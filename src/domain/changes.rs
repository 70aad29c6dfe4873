//! Change sets reported by updates and resolution stages

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bit set describing which parts of a project changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ProjectChanges(u8);

impl ProjectChanges {
    pub const NONE: Self = Self(0);
    pub const PACKAGING: Self = Self(1);
    pub const OUTPUT: Self = Self(1 << 1);
    pub const SOURCES: Self = Self(1 << 2);
    pub const DEPENDENCIES: Self = Self(1 << 3);
    pub const PLUGINS: Self = Self(1 << 4);
    pub const PROPERTIES: Self = Self(1 << 5);
    pub const ALL: Self = Self(0b11_1111);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::PACKAGING, "packaging"),
        (Self::OUTPUT, "output"),
        (Self::SOURCES, "sources"),
        (Self::DEPENDENCIES, "dependencies"),
        (Self::PLUGINS, "plugins"),
        (Self::PROPERTIES, "properties"),
    ];

    /// Returns true if every flag of `other` is set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any flag of `other` is set
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn has_changes(self) -> bool {
        self.0 != 0
    }

    /// Sets `flag` when `changed` is true
    pub fn with_if(self, flag: Self, changed: bool) -> Self {
        if changed {
            self | flag
        } else {
            self
        }
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for ProjectChanges {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ProjectChanges {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ProjectChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_changes() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_merges_flags() {
        let changes = ProjectChanges::SOURCES | ProjectChanges::DEPENDENCIES;
        assert!(changes.contains(ProjectChanges::SOURCES));
        assert!(changes.contains(ProjectChanges::DEPENDENCIES));
        assert!(!changes.contains(ProjectChanges::PLUGINS));
        assert!(changes.intersects(ProjectChanges::ALL));
    }

    #[test]
    fn none_has_no_changes() {
        assert!(!ProjectChanges::NONE.has_changes());
        assert!(ProjectChanges::ALL.has_changes());
        assert_eq!(ProjectChanges::default(), ProjectChanges::NONE);
    }

    #[test]
    fn all_contains_every_flag() {
        for (flag, _) in ProjectChanges::NAMES {
            assert!(ProjectChanges::ALL.contains(flag));
        }
        assert_eq!(ProjectChanges::ALL.names().len(), 6);
    }

    #[test]
    fn display_lists_names() {
        let mut changes = ProjectChanges::NONE;
        assert_eq!(changes.to_string(), "none");

        changes |= ProjectChanges::PACKAGING;
        changes = changes.with_if(ProjectChanges::PROPERTIES, true);
        changes = changes.with_if(ProjectChanges::OUTPUT, false);
        assert_eq!(changes.to_string(), "packaging,properties");
    }
}
