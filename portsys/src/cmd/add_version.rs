//! `portsys x-add-version`: record a port's current version in its
//! version database and move the baseline pin to it.

use crate::cmd::TreeArgs;
use crate::core::{SchemedVersion, Version};
use crate::diagnostic::Diagnostics;
use crate::git::GitRepo;
use crate::manifest;
use crate::paths::Paths;
use crate::registry::versiondb::{self, DbLocation, VersionDbEntry, VersionDbKind};
use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{json, Map, Value};

#[derive(Debug, Parser)]
pub struct AddVersion {
    #[clap(flatten)]
    pub tree: TreeArgs,

    /// The port to record. Mutually exclusive with --all.
    pub package: Option<String>,

    /// Record every port in the tree.
    #[clap(long)]
    pub all: bool,

    /// Replace the recorded git tree when the version already exists
    /// with a different one.
    #[clap(long = "overwrite-version")]
    pub overwrite_version: bool,

    /// Skip the version-format sanity check on the recorded version.
    #[clap(long = "skip-formatting-check")]
    pub skip_formatting_check: bool,

    #[clap(long)]
    pub verbose: bool,
}

impl AddVersion {
    pub fn run(&self) -> Result<()> {
        let paths = self.tree.paths()?;
        let repo = GitRepo::at(paths.root());

        let names: Vec<String> = match (&self.package, self.all) {
            (Some(_), true) => bail!("--all cannot be combined with a port name"),
            (Some(name), false) => vec![name.clone()],
            (None, true) => {
                let mut all = Vec::new();
                crate::registry::builtin::append_port_directory_names(
                    &paths.builtin_ports(),
                    &mut all,
                )?;
                all.sort();
                all
            }
            (None, false) => bail!("name a port or pass --all"),
        };

        for name in &names {
            self.add_one(&paths, &repo, name)?;
        }
        Ok(())
    }

    fn add_one(&self, paths: &Paths, repo: &GitRepo, name: &str) -> Result<()> {
        let port_dir = paths.builtin_ports().join(name);
        let mut diagnostics = Diagnostics::new();
        let scf = manifest::load_port_directory(&port_dir, &mut diagnostics);
        let scf = diagnostics
            .into_result(scf)?
            .with_context(|| format!("while loading the port `{name}`"))?;
        let version = scf.core.version.clone();

        if !self.skip_formatting_check && !version.scheme.is_valid_text(version.version.text()) {
            bail!(
                "`{}` is not a valid `{}` version; fix the port or pass --skip-formatting-check",
                version.version.text(),
                version.scheme
            );
        }

        // The database records committed trees, so uncommitted port edits
        // would silently pin the wrong content.
        if repo.is_dirty(&format!("ports/{name}"))? {
            bail!(
                "`ports/{name}` has uncommitted changes; commit them before recording the version"
            );
        }
        let tree = repo
            .port_tree_id("HEAD", &format!("ports/{name}"))?
            .with_context(|| format!("`ports/{name}` is not committed"))?;

        let db_path = paths.root().join(versiondb::version_db_relative_path(name));
        let mut entries = if db_path.is_file() {
            let text = crate::common::fs::read_to_string(&db_path)?;
            let mut diagnostics = Diagnostics::new();
            let parsed = versiondb::parse_version_db(
                &text,
                &db_path.display().to_string(),
                VersionDbKind::Git,
                &mut diagnostics,
            );
            diagnostics
                .into_result(parsed)?
                .context("version database did not parse")?
        } else {
            Vec::new()
        };

        match entries
            .iter_mut()
            .find(|entry| entry.version.version == version.version)
        {
            Some(existing) => match &existing.location {
                DbLocation::GitTree(recorded) if recorded == &tree => {
                    if self.verbose {
                        println!("{name}@{} is already recorded", version.version);
                    }
                    return Ok(());
                }
                _ if self.overwrite_version => {
                    existing.location = DbLocation::GitTree(tree.clone());
                    existing.version = version.clone();
                }
                DbLocation::GitTree(recorded) => bail!(
                    "{name}@{} is already recorded with git tree {recorded}; bump the port \
                     version, or pass --overwrite-version if the republish is intentional",
                    version.version
                ),
                DbLocation::Path(_) => bail!(
                    "{name}@{} is recorded with a filesystem path; this tree uses git trees",
                    version.version
                ),
            },
            None => {
                // Newest first.
                entries.insert(
                    0,
                    VersionDbEntry {
                        version: version.clone(),
                        location: DbLocation::GitTree(tree.clone()),
                    },
                );
            }
        }

        if let Some(parent) = db_path.parent() {
            crate::common::fs::create_dir_all(parent)?;
        }
        crate::common::fs::write(&db_path, serialize_version_db(&entries))?;
        update_baseline(paths, name, &version.version)?;

        if self.verbose {
            println!("recorded {name}@{} as {tree}", version.version);
        }
        Ok(())
    }
}

fn serialize_version_db(entries: &[VersionDbEntry]) -> String {
    let versions: Vec<Value> = entries
        .iter()
        .map(|entry| {
            let mut body = Map::new();
            match &entry.location {
                DbLocation::GitTree(tree) => body.insert("git-tree".into(), json!(tree)),
                DbLocation::Path(path) => body.insert("path".into(), json!(format!("$/{path}"))),
            };
            let SchemedVersion { scheme, version } = &entry.version;
            body.insert(scheme.field_name().into(), json!(version.text()));
            body.insert("port-version".into(), json!(version.port_version()));
            Value::Object(body)
        })
        .collect();
    let mut text =
        serde_json::to_string_pretty(&json!({ "versions": versions })).expect("valid json values");
    text.push('\n');
    text
}

fn update_baseline(paths: &Paths, name: &str, version: &Version) -> Result<()> {
    let path = paths.builtin_versions().join("baseline.json");
    let mut root: Map<String, Value> = if path.is_file() {
        serde_json::from_str(&crate::common::fs::read_to_string(&path)?)
            .context("baseline.json did not parse")?
    } else {
        Map::new()
    };
    let defaults = root
        .entry("default".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(defaults) = defaults else {
        bail!("baseline.json's `default` member is not an object");
    };
    defaults.insert(
        name.to_string(),
        json!({ "baseline": version.text(), "port-version": version.port_version() }),
    );
    if let Some(parent) = path.parent() {
        crate::common::fs::create_dir_all(parent)?;
    }
    let mut text = serde_json::to_string_pretty(&Value::Object(root)).expect("valid json values");
    text.push('\n');
    crate::common::fs::write(&path, text)
}
