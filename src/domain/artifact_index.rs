//! Lookup index over every resolved dependency in the tree
//!
//! Built in a single pass and never mutated afterwards. The tree swaps in a
//! fresh index whenever a project's dependency set changes.

use indexmap::IndexMap;
use std::collections::HashMap;

use super::artifact::{Artifact, ArtifactKey};
use super::coordinate::Coordinate;

type VersionMap = IndexMap<String, Vec<Artifact>>;

#[derive(Debug, Default, Clone)]
pub struct ArtifactIndex {
    groups: HashMap<String, HashMap<String, VersionMap>>,
    len: usize,
}

impl ArtifactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the index, dropping duplicates by artifact key.
    ///
    /// A resolved record wins over an unresolved one with the same key.
    pub fn build<'a>(artifacts: impl IntoIterator<Item = &'a Artifact>) -> Self {
        let mut index = Self::new();
        // key -> position in its version list
        let mut seen: HashMap<ArtifactKey, usize> = HashMap::new();

        for artifact in artifacts {
            let c = &artifact.coordinate;
            let entries = index
                .groups
                .entry(c.group_id().to_string())
                .or_default()
                .entry(c.artifact_id().to_string())
                .or_default()
                .entry(c.version().to_string())
                .or_default();

            match seen.get(&artifact.key()) {
                Some(&position) => {
                    if artifact.resolved && !entries[position].resolved {
                        entries[position] = artifact.clone();
                    }
                }
                None => {
                    seen.insert(artifact.key(), entries.len());
                    entries.push(artifact.clone());
                    index.len += 1;
                }
            }
        }

        index
    }

    /// Every indexed artifact with the given group and artifact id
    pub fn find(&self, group_id: &str, artifact_id: &str) -> Vec<&Artifact> {
        self.groups
            .get(group_id)
            .and_then(|artifacts| artifacts.get(artifact_id))
            .map(|versions| versions.values().flatten().collect())
            .unwrap_or_default()
    }

    /// Every indexed artifact in a group
    pub fn find_group(&self, group_id: &str) -> Vec<&Artifact> {
        let Some(artifacts) = self.groups.get(group_id) else {
            return Vec::new();
        };
        let mut ids: Vec<&String> = artifacts.keys().collect();
        ids.sort();
        ids.into_iter()
            .flat_map(|id| artifacts[id].values().flatten())
            .collect()
    }

    /// Indexed artifacts for one exact version
    pub fn find_version(&self, group_id: &str, artifact_id: &str, version: &str) -> &[Artifact] {
        self.groups
            .get(group_id)
            .and_then(|artifacts| artifacts.get(artifact_id))
            .and_then(|versions| versions.get(version))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// A resolved artifact matching the coordinate, classifier and kind
    pub fn find_resolved(&self, artifact: &Artifact) -> Option<&Artifact> {
        let c = &artifact.coordinate;
        self.find_version(c.group_id(), c.artifact_id(), c.version())
            .iter()
            .find(|candidate| candidate.resolved && candidate.key() == artifact.key())
    }

    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        !self
            .find_version(coordinate.group_id(), coordinate.artifact_id(), coordinate.version())
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Group ids present in the index
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{dedup_artifacts, Scope};
    use proptest::prelude::*;

    fn artifact(g: &str, a: &str, v: &str) -> Artifact {
        Artifact::new(Coordinate::new(g, a, v), Scope::Compile)
    }

    #[test]
    fn empty_index_lookups_never_fail() {
        let index = ArtifactIndex::new();
        assert!(index.is_empty());
        assert!(index.find("g", "a").is_empty());
        assert!(index.find_version("g", "a", "1").is_empty());
    }

    #[test]
    fn find_returns_every_version() {
        let deps = vec![artifact("g", "x", "1.0"), artifact("g", "x", "2.0"), artifact("g", "y", "1.0")];
        let index = ArtifactIndex::build(&deps);

        assert_eq!(index.len(), 3);
        assert_eq!(index.find("g", "x").len(), 2);
        assert_eq!(index.find_version("g", "x", "2.0"), &[deps[1].clone()]);
        assert!(index.contains(&Coordinate::new("g", "y", "1.0")));
        assert!(!index.contains(&Coordinate::new("g", "y", "2.0")));
    }

    #[test]
    fn duplicates_are_counted_once() {
        let deps = vec![artifact("g", "x", "1.0"), artifact("g", "x", "1.0")];
        let index = ArtifactIndex::build(&deps);
        assert_eq!(index.len(), 1);
        assert_eq!(index.find("g", "x").len(), 1);
    }

    #[test]
    fn classifier_distinguishes_entries() {
        let deps = vec![
            artifact("g", "x", "1.0"),
            artifact("g", "x", "1.0").with_classifier(Some("tests".into())),
        ];
        let index = ArtifactIndex::build(&deps);
        assert_eq!(index.find("g", "x").len(), 2);
    }

    #[test]
    fn find_resolved_ignores_unresolved_entries() {
        let unresolved = artifact("g", "x", "1.0");
        let index = ArtifactIndex::build(&[unresolved.clone()]);
        assert!(index.find_resolved(&unresolved).is_none());

        let resolved = unresolved.resolved_to("/repo/x.jar");
        let index = ArtifactIndex::build(&[resolved.clone()]);
        assert_eq!(index.find_resolved(&unresolved), Some(&resolved));
    }

    #[test]
    fn resolved_record_wins_over_declared_duplicate() {
        let declared = artifact("g", "x", "1.0");
        let resolved = declared.clone().resolved_to("/repo/x.jar");
        let index = ArtifactIndex::build(&[declared.clone(), resolved.clone(), declared.clone()]);

        assert_eq!(index.len(), 1);
        assert_eq!(index.find_resolved(&declared), Some(&resolved));
    }

    fn arb_artifact() -> impl Strategy<Value = Artifact> {
        (0..3u8, 0..3u8, 0..3u8, proptest::option::of(0..2u8)).prop_map(|(g, a, v, c)| {
            artifact(&format!("g{}", g), &format!("a{}", a), &format!("{}.0", v))
                .with_classifier(c.map(|c| format!("c{}", c)))
        })
    }

    proptest! {
        #[test]
        fn find_matches_deduplicated_scan(artifacts in proptest::collection::vec(arb_artifact(), 0..40)) {
            let index = ArtifactIndex::build(&artifacts);
            let deduped = dedup_artifacts(artifacts.clone());

            for g in 0..3 {
                for a in 0..3 {
                    let (g, a) = (format!("g{}", g), format!("a{}", a));
                    let mut expected: Vec<_> = deduped
                        .iter()
                        .filter(|x| x.coordinate.matches(&g, &a))
                        .map(|x| x.key())
                        .collect();
                    let mut found: Vec<_> = index.find(&g, &a).into_iter().map(|x| x.key()).collect();
                    expected.sort_by_key(|k| format!("{}{:?}", k.coordinate, k.classifier));
                    found.sort_by_key(|k| format!("{}{:?}", k.coordinate, k.classifier));
                    prop_assert_eq!(found, expected);
                }
            }
            prop_assert_eq!(index.len(), deduped.len());
        }
    }
}
