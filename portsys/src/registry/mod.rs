//! Registries: keyed sources of ports with baselines and version
//! databases.
//!
//! A [`RegistrySet`] holds an optional default registry plus an ordered
//! list of pattern-qualified registries. For any port name the *selected*
//! registry is the one with the most specific matching pattern: an exact
//! name beats `prefix*` beats `*`, with declaration order breaking ties.
//! The backing kinds form a closed set (builtin ports tree, git,
//! filesystem); overlays sit above registries in the port file provider.

pub mod builtin;
pub mod config;
pub mod filesystem;
pub mod git;
pub mod versiondb;

use crate::core::{SchemedVersion, Version};
use anyhow::Result;
use std::path::PathBuf;

pub use config::{DefaultRegistry, RegistryConfig};
pub use versiondb::{DbLocation, VersionDbEntry, VersionDbKind};

/// A resolved port tree location plus a human-readable origin for
/// messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathAndLocation {
    pub path: PathBuf,
    pub location: String,
}

/// One port's published versions within one registry, able to materialize
/// any of them.
#[derive(Debug)]
pub struct RegistryEntry {
    port_name: String,
    /// Newest first, as the version database file records them.
    versions: Vec<VersionDbEntry>,
    backend: EntryBackend,
}

#[derive(Debug)]
enum EntryBackend {
    Builtin {
        port_directory: PathBuf,
    },
    Filesystem {
        registry_root: PathBuf,
    },
    Git {
        repo: crate::git::GitRepo,
        work_dir: PathBuf,
        origin: String,
    },
}

impl RegistryEntry {
    /// Published versions, newest first.
    pub fn port_versions(&self) -> impl Iterator<Item = &SchemedVersion> {
        self.versions.iter().map(|entry| &entry.version)
    }

    pub fn entries(&self) -> &[VersionDbEntry] {
        &self.versions
    }

    /// Locate (and for git registries, materialize) the port tree for
    /// `version`.
    pub fn get_version(&self, version: &Version) -> Result<PathAndLocation> {
        let entry = self
            .versions
            .iter()
            .find(|entry| &entry.version.version == version)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no version database entry for {}@{}",
                    self.port_name,
                    version
                )
            })?;
        match (&self.backend, &entry.location) {
            (EntryBackend::Builtin { port_directory }, _) => Ok(PathAndLocation {
                path: port_directory.clone(),
                location: port_directory.display().to_string(),
            }),
            (EntryBackend::Filesystem { registry_root }, DbLocation::Path(relative)) => {
                Ok(PathAndLocation {
                    path: registry_root.join(relative),
                    location: format!("{}/$/{relative}", registry_root.display()),
                })
            }
            (EntryBackend::Git { repo, work_dir, origin }, DbLocation::GitTree(tree)) => {
                let destination = work_dir.join(tree);
                if !destination.is_dir() {
                    // Extract next to the target and rename, so a partial
                    // extraction never looks like a cached tree.
                    let staging = work_dir.join(format!(".incoming-{tree}"));
                    if staging.exists() {
                        crate::common::fs::remove_dir_all(&staging)?;
                    }
                    repo.extract_tree(tree, &staging)?;
                    crate::common::fs::rename(&staging, &destination)?;
                }
                Ok(PathAndLocation {
                    path: destination,
                    location: format!("{origin}@{tree}"),
                })
            }
            (EntryBackend::Filesystem { .. }, DbLocation::GitTree(_))
            | (EntryBackend::Git { .. }, DbLocation::Path(_)) => unreachable!(
                "version database parsing enforces the location kind per registry kind"
            ),
        }
    }
}

/// The closed set of registry backings.
#[derive(Debug)]
pub enum RegistryImpl {
    Builtin(builtin::BuiltinFilesRegistry),
    Filesystem(filesystem::FilesystemRegistry),
    Git(git::GitRegistry),
}

impl RegistryImpl {
    /// The baseline pin for `name`, if this registry has one.
    pub fn get_baseline_version(&self, name: &str) -> Result<Option<Version>> {
        match self {
            RegistryImpl::Builtin(r) => r.get_baseline_version(name),
            RegistryImpl::Filesystem(r) => r.get_baseline_version(name),
            RegistryImpl::Git(r) => r.get_baseline_version(name),
        }
    }

    /// This registry's published versions of `name`.
    pub fn get_port_entry(&self, name: &str) -> Result<Option<RegistryEntry>> {
        match self {
            RegistryImpl::Builtin(r) => r.get_port_entry(name),
            RegistryImpl::Filesystem(r) => r.get_port_entry(name),
            RegistryImpl::Git(r) => r.get_port_entry(name),
        }
    }

    /// Append every port name this registry can provide. May hit the
    /// network for git registries.
    pub fn append_all_port_names(&self, out: &mut Vec<String>) -> Result<()> {
        match self {
            RegistryImpl::Builtin(r) => r.append_all_port_names(out),
            RegistryImpl::Filesystem(r) => r.append_all_port_names(out),
            RegistryImpl::Git(r) => r.append_all_port_names(out),
        }
    }

    /// Like [`Self::append_all_port_names`] but never touches the network;
    /// returns whether the answer is complete.
    pub fn try_append_all_port_names_no_network(&self, out: &mut Vec<String>) -> Result<bool> {
        match self {
            RegistryImpl::Builtin(r) => r.append_all_port_names(out).map(|()| true),
            RegistryImpl::Filesystem(r) => r.append_all_port_names(out).map(|()| true),
            RegistryImpl::Git(r) => r.try_append_all_port_names_no_network(out),
        }
    }
}

/// A backing implementation plus the package patterns that route names to
/// it.
#[derive(Debug)]
pub struct Registry {
    patterns: Vec<String>,
    implementation: RegistryImpl,
}

impl Registry {
    pub fn new(patterns: Vec<String>, implementation: RegistryImpl) -> Registry {
        Registry {
            patterns,
            implementation,
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn implementation(&self) -> &RegistryImpl {
        &self.implementation
    }

    /// The priority of this registry for `name`: the best match among its
    /// patterns.
    fn priority_for(&self, name: &str) -> usize {
        self.patterns
            .iter()
            .map(|pattern| package_pattern_match(name, pattern))
            .max()
            .unwrap_or(0)
    }
}

/// How specifically `pattern` matches `name`: `usize::MAX` for an exact
/// match, prefix length + 1 for `prefix*`, 1 for `*`, 0 for no match.
pub fn package_pattern_match(name: &str, pattern: &str) -> usize {
    match pattern.strip_suffix('*') {
        Some(prefix) => {
            if name.starts_with(prefix) {
                prefix.len() + 1
            } else {
                0
            }
        }
        None => {
            if name == pattern {
                usize::MAX
            } else {
                0
            }
        }
    }
}

/// Whether `pattern` is a legal package pattern: an exact identifier, or
/// an identifier prefix (possibly ending in `-`) followed by one `*`, or
/// `*` alone.
pub fn is_package_pattern(pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        None => crate::core::validate_port_name(pattern).is_ok(),
        Some("") => pattern == "*",
        Some(prefix) => {
            if prefix.contains('*') || prefix.starts_with('-') || prefix.contains("--") {
                return false;
            }
            prefix
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
        }
    }
}

/// The full registry configuration: an optional default registry plus
/// pattern-qualified registries in declaration order.
#[derive(Debug, Default)]
pub struct RegistrySet {
    default_registry: Option<Registry>,
    registries: Vec<Registry>,
}

impl RegistrySet {
    pub fn new(default_registry: Option<Registry>, registries: Vec<Registry>) -> RegistrySet {
        RegistrySet {
            default_registry,
            registries,
        }
    }

    pub fn default_registry(&self) -> Option<&Registry> {
        self.default_registry.as_ref()
    }

    pub fn registries(&self) -> &[Registry] {
        &self.registries
    }

    /// Every registry whose patterns match `name`, most specific first;
    /// declaration order breaks priority ties. The default registry is not
    /// included.
    pub fn registries_for_port(&self, name: &str) -> Vec<&Registry> {
        let mut candidates: Vec<(usize, usize, &Registry)> = self
            .registries
            .iter()
            .enumerate()
            .filter_map(|(index, registry)| {
                let priority = registry.priority_for(name);
                (priority > 0).then_some((priority, index, registry))
            })
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        candidates.into_iter().map(|(_, _, r)| r).collect()
    }

    /// The selected registry for `name`: the best pattern match, falling
    /// back to the default registry.
    pub fn registry_for_port(&self, name: &str) -> Option<&Registry> {
        self.registries_for_port(name)
            .first()
            .copied()
            .or(self.default_registry.as_ref())
    }

    /// The baseline pin for `name` from its selected registry.
    pub fn baseline_for_port(&self, name: &str) -> Result<Option<Version>> {
        match self.registry_for_port(name) {
            Some(registry) => registry.implementation().get_baseline_version(name),
            None => Ok(None),
        }
    }

    /// All port names reachable through this set, deduplicated and sorted.
    pub fn all_port_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for registry in &self.registries {
            registry.implementation().append_all_port_names(&mut names)?;
        }
        if let Some(default) = &self.default_registry {
            default.implementation().append_all_port_names(&mut names)?;
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;

    fn fake_registry(patterns: &[&str]) -> Registry {
        Registry::new(
            patterns.iter().map(|p| p.to_string()).collect(),
            RegistryImpl::Builtin(builtin::BuiltinFilesRegistry::new(Path::new("/nonexistent"))),
        )
    }

    #[test]
    fn pattern_match_priorities() {
        assert_eq!(package_pattern_match("boost", "*"), 1);
        assert_eq!(package_pattern_match("boost", "b*"), 2);
        assert_eq!(package_pattern_match("boost", "boost*"), 6);
        assert_eq!(package_pattern_match("boost", "boost"), usize::MAX);
        assert_eq!(package_pattern_match("boost", "c*"), 0);
        assert_eq!(package_pattern_match("boost", ""), 0);
        assert_eq!(package_pattern_match("", "*"), 1);
    }

    #[test]
    fn pattern_validity() {
        for good in ["*", "b*", "boost*", "boost-*", "boost-multi-*", "boost"] {
            assert!(is_package_pattern(good), "{good} should be accepted");
        }
        for bad in ["", " ", "*a", "a*a", "a**", "a-**", "a--*", "a-*-*", "a+", "a?"] {
            assert!(!is_package_pattern(bad), "{bad} should be rejected");
        }
    }

    #[test]
    fn candidates_are_ordered_by_specificity() {
        // Patterns {"bo*"} {"b*"} {"boost*"} {"boost"} for query "boost"
        // rank exact > boost* > bo* > b*.
        let set = RegistrySet::new(
            None,
            vec![
                fake_registry(&["bo*"]),
                fake_registry(&["b*"]),
                fake_registry(&["boost*"]),
                fake_registry(&["boost"]),
            ],
        );
        let candidates = set.registries_for_port("boost");
        let patterns: Vec<&str> = candidates
            .iter()
            .map(|r| r.patterns()[0].as_str())
            .collect();
        assert_eq!(patterns, ["boost", "boost*", "bo*", "b*"]);
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let set = RegistrySet::new(
            None,
            vec![fake_registry(&["b*"]), fake_registry(&["b*", "zlib"])],
        );
        let candidates = set.registries_for_port("bzip2");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].patterns().len(), 1);
    }

    #[test]
    fn default_registry_is_the_fallback() {
        let set = RegistrySet::new(Some(fake_registry(&[])), vec![fake_registry(&["boost*"])]);
        assert!(set.registry_for_port("zlib").is_some());
        assert_eq!(set.registry_for_port("boost-asio").unwrap().patterns().len(), 1);

        let no_default = RegistrySet::new(None, vec![fake_registry(&["boost*"])]);
        assert!(no_default.registry_for_port("zlib").is_none());
    }
}
