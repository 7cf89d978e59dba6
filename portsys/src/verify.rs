//! Cross-validation of a local ports tree against its version database,
//! baseline, and (optionally) historical git trees.
//!
//! Every check problem is collected; the report covers the whole tree in
//! one run rather than stopping at the first inconsistency.

use crate::core::{SchemedVersion, Version};
use crate::diagnostic::Diagnostics;
use crate::git::GitRepo;
use crate::manifest;
use crate::paths::Paths;
use crate::registry::versiondb::{self, DbLocation, VersionDbEntry, VersionDbKind};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    /// Also open every historical `git-tree` in the database and check
    /// the metadata inside matches the recorded version.
    pub verify_git_trees: bool,
}

/// Validate `port_names` (or the whole tree when empty) and return the
/// collected findings. The caller turns errors into the exit code.
pub fn verify_versions(
    paths: &Paths,
    port_names: &[String],
    options: VerifyOptions,
) -> Result<Diagnostics> {
    let repo = GitRepo::at(paths.root());
    let mut diagnostics = Diagnostics::new();

    let baseline = load_builtin_baseline(paths, &mut diagnostics)?;

    let names: Vec<String> = if port_names.is_empty() {
        let mut all = Vec::new();
        crate::registry::builtin::append_port_directory_names(&paths.builtin_ports(), &mut all)?;
        all.sort();
        all
    } else {
        port_names.to_vec()
    };

    for name in &names {
        verify_one_port(paths, &repo, name, baseline.as_ref(), options, &mut diagnostics);
    }
    Ok(diagnostics)
}

fn load_builtin_baseline(
    paths: &Paths,
    diagnostics: &mut Diagnostics,
) -> Result<Option<BTreeMap<String, Version>>> {
    let path = paths.builtin_versions().join("baseline.json");
    if !path.is_file() {
        diagnostics.error(
            &*path,
            "the baseline file is missing; run `portsys x-add-version --all` to create it",
        );
        return Ok(None);
    }
    let text = crate::common::fs::read_to_string(&path)?;
    Ok(versiondb::parse_baseline(
        &text,
        &path.display().to_string(),
        "default",
        diagnostics,
    ))
}

fn load_version_db(
    paths: &Paths,
    name: &str,
    diagnostics: &mut Diagnostics,
) -> Option<Vec<VersionDbEntry>> {
    let path = paths.root().join(versiondb::version_db_relative_path(name));
    if !path.is_file() {
        diagnostics.error(
            path.display().to_string(),
            format!("the port `{name}` has no version database file; run `portsys x-add-version {name}`"),
        );
        return None;
    }
    let text = match crate::common::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            diagnostics.error(path.display().to_string(), format!("{e:#}"));
            return None;
        }
    };
    versiondb::parse_version_db(
        &text,
        &path.display().to_string(),
        VersionDbKind::Git,
        diagnostics,
    )
}

fn verify_one_port(
    paths: &Paths,
    repo: &GitRepo,
    name: &str,
    baseline: Option<&BTreeMap<String, Version>>,
    options: VerifyOptions,
    diagnostics: &mut Diagnostics,
) {
    let port_dir = paths.builtin_ports().join(name);
    let origin = port_dir.display().to_string();

    let Some(scf) = manifest::load_port_directory(&port_dir, diagnostics) else {
        return;
    };
    let local = scf.core.version.clone();

    let local_tree = match repo.port_tree_id("HEAD", &format!("ports/{name}")) {
        Ok(Some(tree)) => Some(tree),
        Ok(None) => {
            diagnostics.error(
                origin.clone(),
                format!("`ports/{name}` is not committed, so its git tree cannot be verified"),
            );
            None
        }
        Err(e) => {
            diagnostics.error(origin.clone(), format!("{e:#}"));
            None
        }
    };

    let Some(entries) = load_version_db(paths, name, diagnostics) else {
        return;
    };

    // The local version must appear in the database with the local tree.
    match entries
        .iter()
        .find(|entry| entry.version.version == local.version)
    {
        None => {
            diagnostics.error(
                origin.clone(),
                format!(
                    "version {} is not in the version database; run `portsys x-add-version {name}`",
                    local.version
                ),
            );
        }
        Some(entry) => {
            if entry.version.scheme != local.scheme {
                diagnostics.error(
                    origin.clone(),
                    format!(
                        "version {} is declared as `{}` locally but `{}` in the version database",
                        local.version, local.scheme, entry.version.scheme
                    ),
                );
            }
            if let (Some(local_tree), DbLocation::GitTree(recorded)) =
                (&local_tree, &entry.location)
            {
                if recorded != local_tree {
                    diagnostics.error(
                        origin.clone(),
                        format!(
                            "the git tree of {name}@{} is {local_tree}, but the version database \
                             records {recorded}; run `portsys x-add-version {name} \
                             --overwrite-version` if the change is intentional",
                            local.version
                        ),
                    );
                }
            }
        }
    }

    match baseline.and_then(|b| b.get(name)) {
        Some(pinned) if pinned == &local.version => {}
        Some(pinned) => {
            diagnostics.error(
                origin.clone(),
                format!(
                    "the baseline pins {name}@{pinned}, but the local port is {}",
                    local.version
                ),
            );
        }
        None => {
            diagnostics.error(
                origin.clone(),
                format!("the baseline has no entry for `{name}`"),
            );
        }
    }

    // Every dependency and override must itself be versioned, and pinned
    // versions must exist in the target's database.
    let dependencies = scf
        .core
        .dependencies
        .iter()
        .chain(scf.features.iter().flat_map(|f| f.dependencies.iter()));
    for dependency in dependencies {
        if dependency.name == name {
            continue;
        }
        let Some(dep_entries) = load_version_db(paths, &dependency.name, diagnostics) else {
            continue;
        };
        if let Some(minimum) = &dependency.constraint {
            if !dep_entries
                .iter()
                .any(|entry| &entry.version.version == minimum)
            {
                diagnostics.error(
                    origin.clone(),
                    format!(
                        "`{name}` requires {}>={minimum}, but that version is not in the \
                         dependency's version database",
                        dependency.name
                    ),
                );
            }
        }
    }
    for override_ in &scf.core.overrides {
        let Some(dep_entries) = load_version_db(paths, &override_.name, diagnostics) else {
            continue;
        };
        if !dep_entries
            .iter()
            .any(|entry| entry.version.version == override_.version)
        {
            diagnostics.error(
                origin.clone(),
                format!(
                    "`{name}` overrides {} to {}, but that version is not in the dependency's \
                     version database",
                    override_.name, override_.version
                ),
            );
        }
    }

    if options.verify_git_trees {
        for entry in &entries {
            verify_historical_entry(repo, name, entry, diagnostics);
        }
    }
}

/// Open the recorded tree and check the metadata inside declares the
/// version the database claims.
fn verify_historical_entry(
    repo: &GitRepo,
    name: &str,
    entry: &VersionDbEntry,
    diagnostics: &mut Diagnostics,
) {
    let DbLocation::GitTree(tree) = &entry.location else {
        return;
    };
    let origin = format!("versions database entry for {name}@{}", entry.version);

    let historical = read_historical_version(repo, tree);
    match historical {
        Err(e) => {
            diagnostics.error(origin, format!("unable to read the recorded git tree: {e:#}"));
        }
        Ok(historical) => {
            if historical.version != entry.version.version {
                diagnostics.error(
                    origin,
                    format!(
                        "the recorded tree {tree} declares version {}, not {}",
                        historical.version, entry.version
                    ),
                );
            } else if historical.scheme != entry.version.scheme {
                diagnostics.error(
                    origin,
                    format!(
                        "the recorded tree {tree} declares scheme `{}`, not `{}`",
                        historical.scheme, entry.version.scheme
                    ),
                );
            }
        }
    }
}

fn read_historical_version(repo: &GitRepo, tree: &str) -> Result<SchemedVersion> {
    let mut diagnostics = Diagnostics::new();
    let scf = if let Ok(text) = repo.show(&format!("{tree}:vcpkg.json")) {
        manifest::json::parse_manifest(&text, "vcpkg.json", &mut diagnostics)
    } else {
        let text = repo
            .show(&format!("{tree}:CONTROL"))
            .context("the tree has neither vcpkg.json nor CONTROL")?;
        manifest::control::parse_control(&text, "CONTROL", &mut diagnostics)
    };
    let scf = diagnostics
        .into_result(scf)?
        .context("the historical metadata did not parse")?;
    Ok(scf.core.version)
}
