//! Explicit profile selection

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Profiles the user explicitly enabled or disabled
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplicitProfiles {
    pub enabled: BTreeSet<String>,
    pub disabled: BTreeSet<String>,
}

impl ExplicitProfiles {
    pub fn new(
        enabled: impl IntoIterator<Item = impl Into<String>>,
        disabled: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            enabled: enabled.into_iter().map(Into::into).collect(),
            disabled: disabled.into_iter().map(Into::into).collect(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty() && self.disabled.is_empty()
    }

    /// Union of both selections; `other` wins when a profile is in both lists
    pub fn merged_with(&self, other: &ExplicitProfiles) -> Self {
        let mut merged = self.clone();
        for id in &other.enabled {
            merged.disabled.remove(id);
            merged.enabled.insert(id.clone());
        }
        for id in &other.disabled {
            merged.enabled.remove(id);
            merged.disabled.insert(id.clone());
        }
        merged
    }

    /// Whether a profile is active given its default activation
    pub fn is_active(&self, id: &str, active_by_default: bool) -> bool {
        if self.disabled.contains(id) {
            return false;
        }
        self.enabled.contains(id) || active_by_default
    }

    /// Moves selected profiles that no project offers into `parked` and
    /// brings parked profiles back once they are offered again.
    ///
    /// Returns true if the selection changed.
    pub fn retain_available(&mut self, parked: &mut ExplicitProfiles, available: &BTreeSet<String>) -> bool {
        let enabled = park(&mut self.enabled, &mut parked.enabled, available);
        let disabled = park(&mut self.disabled, &mut parked.disabled, available);
        enabled || disabled
    }

    /// Stable hash of the selection, part of every project timestamp
    pub fn fingerprint(&self) -> i64 {
        let mut hasher = blake3::Hasher::new();
        for id in &self.enabled {
            hasher.update(b"+");
            hasher.update(id.as_bytes());
        }
        for id in &self.disabled {
            hasher.update(b"-");
            hasher.update(id.as_bytes());
        }
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        i64::from_le_bytes(bytes)
    }
}

fn park(selected: &mut BTreeSet<String>, parked: &mut BTreeSet<String>, available: &BTreeSet<String>) -> bool {
    let removed: Vec<String> = selected.difference(available).cloned().collect();
    parked.extend(removed.iter().cloned());

    let restored: Vec<String> = parked.intersection(available).cloned().collect();
    for id in &restored {
        parked.remove(id);
    }

    for id in &removed {
        selected.remove(id);
    }
    let mut changed = !removed.is_empty();
    for id in restored {
        changed |= selected.insert(id);
    }
    changed
}

impl fmt::Display for ExplicitProfiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let enabled: Vec<&str> = self.enabled.iter().map(String::as_str).collect();
        let disabled: Vec<String> = self.disabled.iter().map(|id| format!("!{}", id)).collect();
        let mut all: Vec<String> = enabled.into_iter().map(String::from).collect();
        all.extend(disabled);
        f.write_str(&all.join(","))
    }
}

/// How a profile came to be active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileState {
    /// Enabled by the user
    Explicit,
    /// Disabled by the user
    Disabled,
    /// Activated by a descriptor (e.g. active by default)
    Implicit,
    Inactive,
}

impl ProfileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileState::Explicit => "explicit",
            ProfileState::Disabled => "disabled",
            ProfileState::Implicit => "implicit",
            ProfileState::Inactive => "inactive",
        }
    }
}
