//! Reader for `project.toml` / `project.yaml` descriptors
//!
//! Builds the effective model of one descriptor: parent inheritance,
//! profile activation, dependency management and `${..}` interpolation.
//! Parents come from the locator when the tree already knows them and from
//! the parent's relative path on disk otherwise.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::interpolate::interpolate;
use super::manifest::{load_manifest, load_profiles_file, DependencySection, Manifest, ParentSection, ProfileSection};
use super::model::{ProjectModel, DEFAULT_PACKAGING};
use super::{normalize_path, DescriptorReader, ProjectLocator, ReadResult};
use crate::domain::{
    dedup_artifacts, Artifact, Coordinate, ExplicitProfiles, Plugin, Problem, RemoteRepository, Scope, DEFAULT_KIND,
};

pub const DEFAULT_DESCRIPTOR_NAME: &str = "project.toml";
pub const PROFILES_FILE_NAME: &str = "profiles.toml";
const DEFAULT_BUILD_DIR: &str = "target";
const AGGREGATOR_PACKAGING: &str = "pom";

/// Values a child inherits from its parent
struct Inherited {
    group_id: String,
    version: String,
    properties: BTreeMap<String, String>,
    managed: Vec<Artifact>,
    repositories: Vec<RemoteRepository>,
}

impl From<&ProjectModel> for Inherited {
    fn from(model: &ProjectModel) -> Self {
        Self {
            group_id: model.coordinate.group_id().to_string(),
            version: model.coordinate.version().to_string(),
            properties: model.properties.clone(),
            managed: model.managed_dependencies.clone(),
            repositories: model.repositories.clone(),
        }
    }
}

struct Expander<'a> {
    properties: &'a BTreeMap<String, String>,
    dir: &'a Path,
}

impl Expander<'_> {
    fn expand(&self, value: &str) -> String {
        interpolate(value, self.properties)
    }

    fn path(&self, value: &str) -> PathBuf {
        normalize_path(&self.dir.join(self.expand(value)))
    }

    fn paths(&self, values: Option<&Vec<String>>, default: &str) -> Vec<PathBuf> {
        match values {
            Some(values) => values.iter().map(|v| self.path(v)).collect(),
            None => vec![self.path(default)],
        }
    }
}

#[derive(Debug, Clone)]
pub struct TomlDescriptorReader {
    descriptor_name: String,
}

impl Default for TomlDescriptorReader {
    fn default() -> Self {
        Self::new(DEFAULT_DESCRIPTOR_NAME)
    }
}

impl TomlDescriptorReader {
    pub fn new(descriptor_name: impl Into<String>) -> Self {
        Self {
            descriptor_name: descriptor_name.into(),
        }
    }

    pub fn descriptor_name(&self) -> &str {
        &self.descriptor_name
    }

    /// Descriptor file a module path refers to
    pub fn module_file(&self, dir: &Path, module: &str) -> PathBuf {
        let path = dir.join(module);
        let names_file = path.is_file()
            || matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("toml") | Some("yaml") | Some("yml")
            );
        if names_file {
            normalize_path(&path)
        } else {
            normalize_path(&path.join(&self.descriptor_name))
        }
    }

    fn read_chain(
        &self,
        file: &Path,
        profiles: &ExplicitProfiles,
        locator: &dyn ProjectLocator,
        chain: &mut Vec<PathBuf>,
    ) -> ReadResult {
        chain.push(file.to_path_buf());
        let result = self.read_descriptor(file, profiles, locator, chain);
        chain.pop();
        result
    }

    fn read_descriptor(
        &self,
        file: &Path,
        profiles: &ExplicitProfiles,
        locator: &dyn ProjectLocator,
        chain: &mut Vec<PathBuf>,
    ) -> ReadResult {
        debug!(file = %file.display(), "Reading descriptor");
        let mut problems = Vec::new();

        let manifest = match load_manifest(file) {
            Ok(manifest) => manifest,
            Err(message) => {
                warn!(file = %file.display(), "{}", message);
                problems.push(Problem::parse(file, message));
                return ReadResult {
                    model: ProjectModel::unknown(file),
                    problems,
                };
            }
        };

        let dir = file.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let declared_profiles = self.declared_profiles(file, &manifest, &mut problems);
        let active: Vec<&ProfileSection> = declared_profiles
            .iter()
            .filter(|p| profiles.is_active(&p.id, p.active_by_default))
            .collect();

        let parent = manifest
            .parent
            .as_ref()
            .map(|p| (p, Coordinate::new(&p.group_id, &p.artifact_id, &p.version)));

        let raw_artifact = match &manifest.project.artifact_id {
            Some(artifact) => artifact.clone(),
            None => {
                problems.push(Problem::parse(file, "Missing project artifact-id"));
                ProjectModel::unknown(file).coordinate.artifact_id().to_string()
            }
        };
        let raw_group = manifest
            .project
            .group_id
            .clone()
            .or_else(|| parent.as_ref().map(|(_, c)| c.group_id().to_string()));

        let inherited = match &parent {
            Some((section, coordinate)) => {
                let is_self = raw_group.as_deref() == Some(coordinate.group_id())
                    && raw_artifact == coordinate.artifact_id();
                if is_self {
                    problems.push(Problem::cycle(file, format!("Project {} inherits from itself", coordinate)));
                    None
                } else {
                    self.locate_parent(file, &dir, section, coordinate, profiles, locator, chain, &mut problems)
                }
            }
            None => None,
        };

        let group = raw_group
            .or_else(|| inherited.as_ref().map(|i| i.group_id.clone()))
            .unwrap_or_else(|| crate::domain::UNKNOWN.to_string());
        let version = manifest
            .project
            .version
            .clone()
            .or_else(|| inherited.as_ref().map(|i| i.version.clone()))
            .or_else(|| parent.as_ref().map(|(_, c)| c.version().to_string()))
            .unwrap_or_else(|| crate::domain::UNKNOWN.to_string());

        // effective properties: parent, own, then active profiles
        let mut properties = inherited.as_ref().map(|i| i.properties.clone()).unwrap_or_default();
        properties.extend(manifest.properties.clone());
        for profile in &active {
            properties.extend(profile.properties.clone());
        }

        let mut scope = properties.clone();
        scope.insert("project.group-id".into(), group.clone());
        scope.insert("project.artifact-id".into(), raw_artifact.clone());
        scope.insert("project.version".into(), version.clone());
        scope.insert("project.basedir".into(), dir.display().to_string());
        if let Some((_, coordinate)) = &parent {
            scope.insert("parent.version".into(), coordinate.version().to_string());
        }

        let x = Expander {
            properties: &scope,
            dir: &dir,
        };
        let properties: BTreeMap<String, String> =
            properties.iter().map(|(k, v)| (k.clone(), x.expand(v))).collect();
        let coordinate = Coordinate::new(x.expand(&group), x.expand(&raw_artifact), x.expand(&version));

        let mut module_paths: Vec<String> = Vec::new();
        for module in manifest
            .project
            .modules
            .iter()
            .chain(active.iter().flat_map(|p| p.modules.iter()))
        {
            let module = x.expand(module);
            if !module_paths.contains(&module) {
                module_paths.push(module);
            }
        }
        let mut module_files: Vec<PathBuf> = Vec::new();
        for module in &module_paths {
            let module_file = self.module_file(&dir, module);
            if !module_file.is_file() {
                problems.push(Problem::missing_module(file, &module_file));
            }
            if !module_files.contains(&module_file) {
                module_files.push(module_file);
            }
        }

        let mut managed = inherited.as_ref().map(|i| i.managed.clone()).unwrap_or_default();
        for section in &manifest.dependency_management {
            if let Some(artifact) = to_artifact(file, section, &x, &[], &mut problems) {
                managed.retain(|m| !m.coordinate.matches(artifact.coordinate.group_id(), artifact.coordinate.artifact_id()));
                managed.push(artifact);
            }
        }

        let dependencies = dedup_artifacts(
            manifest
                .dependencies
                .iter()
                .chain(active.iter().flat_map(|p| p.dependencies.iter()))
                .filter_map(|section| to_artifact(file, section, &x, &managed, &mut problems))
                .collect::<Vec<_>>(),
        );

        let mut plugins = Vec::new();
        for section in &manifest.plugins {
            match x.expand(&section.coordinate).parse::<Coordinate>() {
                Ok(coordinate) => {
                    let plugin = Plugin::new(coordinate, section.extensions);
                    if !plugins.contains(&plugin) {
                        plugins.push(plugin);
                    }
                }
                Err(e) => problems.push(Problem::parse(file, format!("Invalid plugin: {}", e))),
            }
        }

        let mut repositories = inherited.as_ref().map(|i| i.repositories.clone()).unwrap_or_default();
        for section in &manifest.repositories {
            repositories.retain(|r| r.id != section.id);
            repositories.push(RemoteRepository {
                id: section.id.clone(),
                url: x.expand(&section.url),
            });
        }

        let build = &manifest.build;
        let build_directory = x.path(build.directory.as_deref().unwrap_or(DEFAULT_BUILD_DIR));
        let output_directory = match &build.output_dir {
            Some(dir) => x.path(dir),
            None => build_directory.join("classes"),
        };
        let test_output_directory = match &build.test_output_dir {
            Some(dir) => x.path(dir),
            None => build_directory.join("test-classes"),
        };

        let packaging = match &manifest.project.packaging {
            Some(packaging) => x.expand(packaging),
            None if !module_paths.is_empty() => AGGREGATOR_PACKAGING.to_string(),
            None => DEFAULT_PACKAGING.to_string(),
        };

        let model = ProjectModel {
            coordinate,
            parent: parent.map(|(_, c)| c),
            packaging,
            module_paths,
            module_files,
            properties,
            source_roots: x.paths(build.source_dirs.as_ref(), "src/main"),
            test_source_roots: x.paths(build.test_source_dirs.as_ref(), "src/test"),
            resources: x.paths(build.resources.as_ref(), "src/main/resources"),
            test_resources: x.paths(build.test_resources.as_ref(), "src/test/resources"),
            build_directory,
            output_directory,
            test_output_directory,
            dependencies,
            managed_dependencies: managed,
            plugins,
            profiles: declared_profiles.iter().map(|p| p.id.clone()).collect(),
            active_profiles: active.iter().map(|p| p.id.clone()).collect(),
            repositories,
            generate_sources: build.generate_sources.iter().map(|s| x.expand(s)).collect(),
        };

        ReadResult { model, problems }
    }

    fn declared_profiles(&self, file: &Path, manifest: &Manifest, problems: &mut Vec<Problem>) -> Vec<ProfileSection> {
        let mut declared = manifest.profiles.clone();
        if let Some(profiles_file) = self.profiles_file(file).filter(|p| p.is_file()) {
            match load_profiles_file(&profiles_file) {
                Ok(extra) => {
                    for profile in extra.profiles {
                        if !declared.iter().any(|p| p.id == profile.id) {
                            declared.push(profile);
                        }
                    }
                }
                Err(message) => problems.push(Problem::parse(file, message)),
            }
        }
        declared
    }

    #[allow(clippy::too_many_arguments)]
    fn locate_parent(
        &self,
        file: &Path,
        dir: &Path,
        section: &ParentSection,
        coordinate: &Coordinate,
        profiles: &ExplicitProfiles,
        locator: &dyn ProjectLocator,
        chain: &mut Vec<PathBuf>,
        problems: &mut Vec<Problem>,
    ) -> Option<Inherited> {
        if let Some(state) = locator.find_state(coordinate) {
            if state.file != file {
                return Some(Inherited::from(&state.model));
            }
        }

        let default_path = format!("../{}", self.descriptor_name);
        let relative = section.relative_path.as_deref().unwrap_or(&default_path);
        let mut candidate = dir.join(relative);
        if candidate.is_dir() {
            candidate = candidate.join(&self.descriptor_name);
        }
        let candidate = normalize_path(&candidate);

        if !candidate.is_file() {
            debug!(file = %file.display(), parent = %coordinate, "Parent descriptor not found");
            return None;
        }
        if chain.contains(&candidate) {
            problems.push(Problem::cycle(
                file,
                format!("Inheritance cycle through {}", candidate.display()),
            ));
            return None;
        }

        let result = self.read_chain(&candidate, profiles, locator, chain);
        if result.model.coordinate.matches(coordinate.group_id(), coordinate.artifact_id()) {
            Some(Inherited::from(&result.model))
        } else {
            debug!(
                file = %file.display(),
                found = %result.model.coordinate,
                expected = %coordinate,
                "Descriptor at parent path is not the declared parent"
            );
            None
        }
    }
}

fn to_artifact(
    file: &Path,
    section: &DependencySection,
    x: &Expander<'_>,
    managed: &[Artifact],
    problems: &mut Vec<Problem>,
) -> Option<Artifact> {
    let (group, artifact, version) = match &section.coordinate {
        Some(coordinate) => {
            let coordinate = x.expand(coordinate);
            let parts: Vec<&str> = coordinate.split(':').map(str::trim).collect();
            match parts.as_slice() {
                [g, a] if !g.is_empty() && !a.is_empty() => (g.to_string(), a.to_string(), None),
                [g, a, v] if !g.is_empty() && !a.is_empty() && !v.is_empty() => {
                    (g.to_string(), a.to_string(), Some(v.to_string()))
                }
                _ => {
                    problems.push(Problem::parse(file, format!("Invalid dependency coordinate '{}'", coordinate)));
                    return None;
                }
            }
        }
        None => match (&section.group_id, &section.artifact_id) {
            (Some(g), Some(a)) => (x.expand(g), x.expand(a), section.version.as_deref().map(|v| x.expand(v))),
            _ => {
                problems.push(Problem::parse(file, "Dependency needs a coordinate or group-id and artifact-id"));
                return None;
            }
        },
    };

    let managed_entry = managed.iter().find(|m| m.coordinate.matches(&group, &artifact));
    let version = match version.or_else(|| managed_entry.map(|m| m.coordinate.version().to_string())) {
        Some(version) => version,
        None => {
            problems.push(Problem::parse(file, format!("No version for dependency {}:{}", group, artifact)));
            return None;
        }
    };

    let scope = section
        .scope
        .or_else(|| managed_entry.map(|m| m.scope))
        .unwrap_or(Scope::Compile);
    let mut result = Artifact::new(Coordinate::new(group, artifact, version), scope)
        .with_classifier(section.classifier.as_deref().map(|c| x.expand(c)))
        .with_kind(section.kind.as_deref().map(|k| x.expand(k)).unwrap_or_else(|| DEFAULT_KIND.to_string()));
    result.optional = section.optional;
    Some(result)
}

impl DescriptorReader for TomlDescriptorReader {
    fn read(&self, file: &Path, profiles: &ExplicitProfiles, locator: &dyn ProjectLocator) -> ReadResult {
        let mut chain = Vec::new();
        self.read_chain(&normalize_path(file), profiles, locator, &mut chain)
    }

    fn profiles_file(&self, descriptor: &Path) -> Option<PathBuf> {
        descriptor.parent().map(|dir| dir.join(PROFILES_FILE_NAME))
    }

    fn is_descriptor(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name == self.descriptor_name {
            return true;
        }
        let stem = Path::new(&self.descriptor_name).file_stem();
        path.file_stem() == stem
            && matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProblemKind;
    use crate::reader::NoLocator;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) -> PathBuf {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn read(file: &Path) -> ReadResult {
        TomlDescriptorReader::default().read(file, &ExplicitProfiles::none(), &NoLocator)
    }

    #[test]
    fn reads_coordinate_and_defaults() {
        let dir = TempDir::new().unwrap();
        let file = write(
            dir.path(),
            "project.toml",
            "[project]\ngroup-id = \"g\"\nartifact-id = \"a\"\nversion = \"1.0\"\n",
        );

        let result = read(&file);
        assert!(result.problems.is_empty());
        assert_eq!(result.model.coordinate, Coordinate::new("g", "a", "1.0"));
        assert_eq!(result.model.packaging, "jar");
        assert_eq!(result.model.output_directory, dir.path().join("target/classes"));
        assert_eq!(result.model.source_roots, vec![dir.path().join("src/main")]);
    }

    #[test]
    fn malformed_descriptor_yields_unknown_model() {
        let dir = TempDir::new().unwrap();
        let file = write(dir.path(), "broken/project.toml", "[project\n");

        let result = read(&file);
        assert_eq!(result.model.coordinate.to_string(), "unknown:broken:unknown");
        assert_eq!(result.problems.len(), 1);
        assert_eq!(result.problems[0].kind, ProblemKind::Parse);
    }

    #[test]
    fn inherits_group_version_and_properties_from_disk_parent() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "project.toml",
            r#"
[project]
group-id = "g"
artifact-id = "root"
version = "2.0"
modules = ["child"]

[properties]
childName = "child"
shared = "from-parent"
"#,
        );
        let child = write(
            dir.path(),
            "child/project.toml",
            r#"
[project]
artifact-id = "${childName}"

[parent]
group-id = "g"
artifact-id = "root"
version = "2.0"

[properties]
shared = "from-child"
"#,
        );

        let result = read(&child);
        assert!(result.problems.is_empty(), "{:?}", result.problems);
        assert_eq!(result.model.coordinate, Coordinate::new("g", "child", "2.0"));
        assert_eq!(result.model.properties["shared"], "from-child");
        assert_eq!(result.model.parent, Some(Coordinate::new("g", "root", "2.0")));
    }

    #[test]
    fn missing_parent_leaves_references_literal() {
        let dir = TempDir::new().unwrap();
        let child = write(
            dir.path(),
            "child/project.toml",
            "[project]\nartifact-id = \"${childName}\"\n[parent]\ngroup-id = \"g\"\nartifact-id = \"root\"\nversion = \"1\"\n",
        );

        let result = read(&child);
        assert_eq!(result.model.coordinate.artifact_id(), "${childName}");
        assert_eq!(result.model.coordinate.group_id(), "g");
    }

    #[test]
    fn self_inheritance_is_a_cycle() {
        let dir = TempDir::new().unwrap();
        let file = write(
            dir.path(),
            "project.toml",
            "[project]\ngroup-id = \"g\"\nartifact-id = \"a\"\nversion = \"1\"\n[parent]\ngroup-id = \"g\"\nartifact-id = \"a\"\nversion = \"1\"\nrelative-path = \"project.toml\"\n",
        );

        let result = read(&file);
        assert!(result.problems.iter().any(|p| p.kind == ProblemKind::CycleDetected));
    }

    #[test]
    fn recursive_inheritance_terminates() {
        let dir = TempDir::new().unwrap();
        let a = write(
            dir.path(),
            "a/project.toml",
            "[project]\ngroup-id = \"g\"\nartifact-id = \"a\"\nversion = \"1\"\n[parent]\ngroup-id = \"g\"\nartifact-id = \"b\"\nversion = \"1\"\nrelative-path = \"../b\"\n",
        );
        write(
            dir.path(),
            "b/project.toml",
            "[project]\ngroup-id = \"g\"\nartifact-id = \"b\"\nversion = \"1\"\n[parent]\ngroup-id = \"g\"\nartifact-id = \"a\"\nversion = \"1\"\nrelative-path = \"../a\"\n",
        );

        let result = read(&a);
        assert_eq!(result.model.coordinate, Coordinate::new("g", "a", "1"));
    }

    #[test]
    fn modules_resolve_to_descriptor_files() {
        let dir = TempDir::new().unwrap();
        let root = write(
            dir.path(),
            "project.toml",
            "[project]\ngroup-id = \"g\"\nartifact-id = \"root\"\nversion = \"1\"\nmodules = [\"core\", \"missing\", \"alt/project.yaml\"]\n",
        );
        write(dir.path(), "core/project.toml", "[project]\nartifact-id = \"core\"\n");
        write(dir.path(), "alt/project.yaml", "project:\n  artifact-id: alt\n");

        let result = read(&root);
        assert_eq!(result.model.packaging, "pom");
        assert_eq!(
            result.model.module_files,
            vec![
                dir.path().join("core/project.toml"),
                dir.path().join("missing/project.toml"),
                dir.path().join("alt/project.yaml"),
            ]
        );
        let missing: Vec<_> = result
            .problems
            .iter()
            .filter(|p| p.kind == ProblemKind::MissingModule)
            .collect();
        assert_eq!(missing.len(), 1);
    }

    #[test]
    fn dependency_versions_come_from_management() {
        let dir = TempDir::new().unwrap();
        let file = write(
            dir.path(),
            "project.toml",
            r#"
[project]
group-id = "g"
artifact-id = "a"
version = "1"

[properties]
"x.version" = "3.0"

[[dependency-management]]
coordinate = "g:x:${x.version}"
scope = "test"

[[dependencies]]
coordinate = "g:x"

[[dependencies]]
group-id = "g"
artifact-id = "x"
"#,
        );

        let result = read(&file);
        assert!(result.problems.is_empty(), "{:?}", result.problems);
        assert_eq!(result.model.dependencies.len(), 1);
        assert_eq!(result.model.dependencies[0].coordinate, Coordinate::new("g", "x", "3.0"));
        assert_eq!(result.model.dependencies[0].scope, Scope::Test);
    }

    #[test]
    fn unversioned_dependency_is_a_problem() {
        let dir = TempDir::new().unwrap();
        let file = write(
            dir.path(),
            "project.toml",
            "[project]\ngroup-id = \"g\"\nartifact-id = \"a\"\nversion = \"1\"\n[[dependencies]]\ncoordinate = \"g:x\"\n",
        );

        let result = read(&file);
        assert!(result.model.dependencies.is_empty());
        assert_eq!(result.problems[0].kind, ProblemKind::Parse);
    }

    #[test]
    fn profiles_activate_by_default_and_explicitly() {
        let dir = TempDir::new().unwrap();
        let file = write(
            dir.path(),
            "project.toml",
            r#"
[project]
group-id = "g"
artifact-id = "a"
version = "1"

[[profiles]]
id = "default"
active-by-default = true
[profiles.properties]
mode = "default"

[[profiles]]
id = "dev"
[[profiles.dependencies]]
coordinate = "g:devtools:1"
"#,
        );
        write(dir.path(), "profiles.toml", "[[profiles]]\nid = \"extra\"\n");

        let reader = TomlDescriptorReader::default();
        let result = reader.read(&file, &ExplicitProfiles::none(), &NoLocator);
        assert_eq!(result.model.profiles, vec!["default", "dev", "extra"]);
        assert_eq!(result.model.active_profiles, vec!["default"]);
        assert_eq!(result.model.properties["mode"], "default");
        assert!(result.model.dependencies.is_empty());

        let profiles = ExplicitProfiles::new(["dev"], ["default"]);
        let result = reader.read(&file, &profiles, &NoLocator);
        assert_eq!(result.model.active_profiles, vec!["dev"]);
        assert!(!result.model.properties.contains_key("mode"));
        assert_eq!(result.model.dependencies.len(), 1);
    }

    #[test]
    fn recognizes_descriptor_names() {
        let reader = TomlDescriptorReader::default();
        assert!(reader.is_descriptor(Path::new("/w/project.toml")));
        assert!(reader.is_descriptor(Path::new("/w/project.yaml")));
        assert!(!reader.is_descriptor(Path::new("/w/Cargo.toml")));
        assert!(!reader.is_descriptor(Path::new("/w/project.json")));
    }
}
