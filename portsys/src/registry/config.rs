//! `vcpkg-configuration.json` parsing: the default registry, the
//! pattern-qualified registry list, and overlay directories.
//!
//! Parsing validates shape and patterns only; whether a baseline commit
//! actually exists is diagnosed later, when a registry is first used.

use crate::diagnostic::Diagnostics;
use crate::paths::Paths;
use crate::registry::{
    builtin::BuiltinFilesRegistry, filesystem::FilesystemRegistry, git::GitRegistry,
    is_package_pattern, Registry, RegistryImpl, RegistrySet,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One registry as configured, before instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryKindConfig {
    /// The builtin ports tree pinned to a commit of the root repository.
    Builtin { baseline: String },
    Git {
        repository: String,
        reference: Option<String>,
        baseline: String,
    },
    Filesystem {
        path: PathBuf,
        baseline: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntryConfig {
    pub kind: RegistryKindConfig,
    pub packages: Vec<String>,
}

/// How the configuration handles names no pattern matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DefaultRegistry {
    /// No `default-registry` key: classic mode, the bundled ports tree.
    #[default]
    Unconfigured,
    /// An explicit `null`: unmatched names fail to resolve.
    Disabled,
    Configured(RegistryKindConfig),
}

/// A parsed, validated registry configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    pub default_registry: DefaultRegistry,
    pub registries: Vec<RegistryEntryConfig>,
    pub overlay_ports: Vec<PathBuf>,
    pub overlay_triplets: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    kind: Option<String>,
    baseline: Option<String>,
    repository: Option<String>,
    reference: Option<String>,
    path: Option<String>,
    packages: Option<Vec<String>>,
    /// Artifact registries carry a name; recognized only to be skipped.
    name: Option<String>,
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawConfiguration {
    #[serde(rename = "default-registry")]
    default_registry: Option<Value>,
    #[serde(default)]
    registries: Vec<Value>,
    #[serde(rename = "overlay-ports", default)]
    overlay_ports: Vec<String>,
    #[serde(rename = "overlay-triplets", default)]
    overlay_triplets: Vec<String>,
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

/// Parse configuration text. `base_dir` anchors relative filesystem and
/// overlay paths (the directory containing the configuration file).
pub fn parse_configuration(
    text: &str,
    origin: &str,
    base_dir: &Path,
    diagnostics: &mut Diagnostics,
) -> Option<RegistryConfig> {
    let raw: RawConfiguration = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            diagnostics.error((origin, e.line(), e.column()), e.to_string());
            return None;
        }
    };
    parse_configuration_value(raw, origin, base_dir, diagnostics)
}

fn parse_configuration_value(
    raw: RawConfiguration,
    origin: &str,
    base_dir: &Path,
    diagnostics: &mut Diagnostics,
) -> Option<RegistryConfig> {
    let before = diagnostics.records().len();

    for key in raw.unknown.keys() {
        if !key.starts_with('$') {
            diagnostics.warning(origin, format!("unknown field `{key}` in configuration"));
        }
    }

    let default_registry = match raw.default_registry {
        None => DefaultRegistry::Unconfigured,
        Some(Value::Null) => DefaultRegistry::Disabled,
        Some(value) => {
            match parse_registry_kind(value, origin, base_dir, "$.default-registry", true, diagnostics)
            {
                Some((kind, _)) => DefaultRegistry::Configured(kind),
                None => DefaultRegistry::Unconfigured,
            }
        }
    };

    let mut registries = Vec::new();
    for (index, value) in raw.registries.into_iter().enumerate() {
        let location = format!("$.registries[{index}]");
        if let Some((kind, packages)) =
            parse_registry_kind(value, origin, base_dir, &location, false, diagnostics)
        {
            let mut valid_packages = Vec::new();
            for (package_index, pattern) in packages.into_iter().enumerate() {
                if is_package_pattern(&pattern) {
                    valid_packages.push(pattern);
                } else {
                    diagnostics.error(
                        origin,
                        format!(
                            "{location}.packages[{package_index}]: \"{pattern}\" is not a valid \
                             package pattern; patterns use at most one wildcard `*`, and only as \
                             the final character"
                        ),
                    );
                }
            }
            registries.push(RegistryEntryConfig {
                kind,
                packages: valid_packages,
            });
        }
    }

    warn_duplicate_patterns(&registries, origin, diagnostics);

    if diagnostics.records().len() != before
        && diagnostics.records()[before..]
            .iter()
            .any(|r| r.severity == crate::diagnostic::Severity::Error)
    {
        return None;
    }

    Some(RegistryConfig {
        default_registry,
        registries,
        overlay_ports: raw.overlay_ports.iter().map(|p| base_dir.join(p)).collect(),
        overlay_triplets: raw
            .overlay_triplets
            .iter()
            .map(|p| base_dir.join(p))
            .collect(),
    })
}

/// Parse one registry object. Returns the kind plus its `packages` list
/// (always empty for the default registry, which must not carry one).
fn parse_registry_kind(
    value: Value,
    origin: &str,
    base_dir: &Path,
    location: &str,
    is_default: bool,
    diagnostics: &mut Diagnostics,
) -> Option<(RegistryKindConfig, Vec<String>)> {
    let raw: RawRegistry = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(e) => {
            diagnostics.error(origin, format!("{location}: {e}"));
            return None;
        }
    };
    for key in raw.unknown.keys() {
        if !key.starts_with('$') {
            diagnostics.warning(origin, format!("{location}: unknown field `{key}`"));
        }
    }

    let kind_name = match raw.kind.as_deref() {
        Some(kind) => kind,
        None => {
            diagnostics.error(origin, format!("{location}: missing required field `kind`"));
            return None;
        }
    };

    if is_default && raw.packages.is_some() {
        diagnostics.error(
            origin,
            format!("{location}: the default registry must not have a `packages` list"),
        );
        return None;
    }
    if !is_default && raw.packages.is_none() && kind_name != "artifact" {
        diagnostics.error(
            origin,
            format!("{location}: a non-default registry requires a `packages` list"),
        );
        return None;
    }

    let kind = match kind_name {
        "builtin" => {
            if raw.path.is_some() || raw.repository.is_some() {
                diagnostics.error(
                    origin,
                    format!("{location}: `path` and `repository` are not allowed on a builtin registry"),
                );
                return None;
            }
            let Some(baseline) = raw.baseline else {
                diagnostics.error(
                    origin,
                    format!("{location}: a builtin registry requires a `baseline` commit"),
                );
                return None;
            };
            RegistryKindConfig::Builtin { baseline }
        }
        "git" => {
            let (Some(repository), Some(baseline)) = (raw.repository, raw.baseline) else {
                diagnostics.error(
                    origin,
                    format!("{location}: a git registry requires `repository` and `baseline`"),
                );
                return None;
            };
            RegistryKindConfig::Git {
                repository,
                reference: raw.reference,
                baseline,
            }
        }
        "filesystem" => {
            let Some(path) = raw.path else {
                diagnostics.error(
                    origin,
                    format!("{location}: a filesystem registry requires a `path`"),
                );
                return None;
            };
            RegistryKindConfig::Filesystem {
                path: base_dir.join(path),
                baseline: raw.baseline,
            }
        }
        "artifact" => {
            // Artifact registries belong to the artifacts feature, which
            // this engine does not implement.
            diagnostics.warning(
                origin,
                format!(
                    "{location}: ignoring artifact registry `{}`",
                    raw.name.as_deref().unwrap_or("<unnamed>")
                ),
            );
            return None;
        }
        other => {
            diagnostics.error(
                origin,
                format!("{location}: unknown registry kind `{other}`"),
            );
            return None;
        }
    };

    Some((kind, raw.packages.unwrap_or_default()))
}

/// The same pattern declared by more than one registry: the first
/// declaration wins and the rest are ignored with a warning naming every
/// declaration site.
fn warn_duplicate_patterns(
    registries: &[RegistryEntryConfig],
    origin: &str,
    diagnostics: &mut Diagnostics,
) {
    let mut first_seen: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (registry_index, registry) in registries.iter().enumerate() {
        for (package_index, pattern) in registry.packages.iter().enumerate() {
            let location = format!("$.registries[{registry_index}].packages[{package_index}]");
            match first_seen.entry(pattern) {
                Entry::Vacant(slot) => {
                    slot.insert(vec![location]);
                }
                Entry::Occupied(mut slot) => slot.get_mut().push(location),
            }
        }
    }
    for (pattern, locations) in first_seen {
        if locations.len() > 1 {
            diagnostics.warning(
                origin,
                format!(
                    "package pattern \"{pattern}\" is duplicated; the first declaration wins \
                     (declared at {})",
                    locations.join(", ")
                ),
            );
        }
    }
}

/// Build a usable [`RegistrySet`] out of a parsed configuration.
pub fn instantiate(config: &RegistryConfig, paths: &Paths) -> RegistrySet {
    let work_dir = paths.registries_work_dir();
    let make = |kind: &RegistryKindConfig| -> RegistryImpl {
        match kind {
            RegistryKindConfig::Builtin { baseline } => RegistryImpl::Git(GitRegistry::builtin(
                paths.root(),
                baseline.clone(),
                work_dir.clone(),
            )),
            RegistryKindConfig::Git {
                repository,
                reference,
                baseline,
            } => RegistryImpl::Git(GitRegistry::remote(
                paths.registries_cache().join(cache_dir_name(repository)),
                repository.clone(),
                reference.clone(),
                baseline.clone(),
                work_dir.clone(),
            )),
            RegistryKindConfig::Filesystem { path, baseline } => {
                RegistryImpl::Filesystem(FilesystemRegistry::new(path.clone(), baseline.clone()))
            }
        }
    };

    let default_registry = match &config.default_registry {
        DefaultRegistry::Configured(kind) => Some(Registry::new(Vec::new(), make(kind))),
        // With no configuration at all, classic mode serves the bundled
        // ports tree as the default registry.
        DefaultRegistry::Unconfigured => Some(Registry::new(
            Vec::new(),
            RegistryImpl::Builtin(BuiltinFilesRegistry::new(paths.builtin_ports())),
        )),
        DefaultRegistry::Disabled => None,
    };

    // First declaration of a pattern wins: later duplicates are dropped
    // here so selection never sees them.
    let mut claimed: BTreeMap<String, ()> = BTreeMap::new();
    let registries = config
        .registries
        .iter()
        .map(|entry| {
            let patterns = entry
                .packages
                .iter()
                .filter(|pattern| claimed.insert((*pattern).clone(), ()).is_none())
                .cloned()
                .collect();
            Registry::new(patterns, make(&entry.kind))
        })
        .collect();

    RegistrySet::new(default_registry, registries)
}

/// A stable directory name for a remote registry cache.
fn cache_dir_name(repository: &str) -> String {
    repository
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect()
}
