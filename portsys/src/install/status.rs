//! The installed-package database: a paragraph log at
//! `installed/vcpkg/status`.
//!
//! The file is a sequence of status paragraphs; the latest paragraph for a
//! `(package, feature, architecture)` triple wins, and the database is
//! compacted to that view when loaded. Every mutation rewrites the file
//! atomically (temp file, fsync, rename), so the on-disk state is always
//! the last consistent one.

use crate::core::{PackageSpec, Triplet, Version};
use crate::diagnostic::Diagnostics;
use crate::manifest::fields::{parse_paragraphs, RawParagraph};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Want {
    Install,
    Purge,
    Unknown,
}

impl Display for Want {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Want::Install => write!(f, "install"),
            Want::Purge => write!(f, "purge"),
            Want::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Installed,
    NotInstalled,
    HalfInstalled,
}

impl Display for InstallState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InstallState::Installed => write!(f, "installed"),
            InstallState::NotInstalled => write!(f, "not-installed"),
            InstallState::HalfInstalled => write!(f, "half-installed"),
        }
    }
}

/// The `Status:` triple, e.g. `install ok installed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLine {
    pub want: Want,
    pub state: InstallState,
}

impl StatusLine {
    pub fn installed() -> StatusLine {
        StatusLine {
            want: Want::Install,
            state: InstallState::Installed,
        }
    }

    pub fn purged() -> StatusLine {
        StatusLine {
            want: Want::Purge,
            state: InstallState::NotInstalled,
        }
    }

    fn parse(text: &str) -> Result<StatusLine> {
        let mut words = text.split_whitespace();
        let want = match words.next() {
            Some("install") => Want::Install,
            Some("purge") => Want::Purge,
            Some("hold") | Some("deinstall") | Some("unknown") => Want::Unknown,
            other => anyhow::bail!("unknown status want `{}`", other.unwrap_or("")),
        };
        // The middle word is historically always `ok`.
        let _flag = words
            .next()
            .context("status line is missing its flag word")?;
        let state = match words.next() {
            Some("installed") => InstallState::Installed,
            Some("not-installed") => InstallState::NotInstalled,
            Some("half-installed") => InstallState::HalfInstalled,
            other => anyhow::bail!("unknown install state `{}`", other.unwrap_or("")),
        };
        Ok(StatusLine { want, state })
    }
}

impl Display for StatusLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ok {}", self.want, self.state)
    }
}

/// One record of the log. The core paragraph of a package omits
/// `Feature:`; feature paragraphs carry it and lean on the core paragraph
/// for the version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusParagraph {
    pub package: String,
    pub feature: Option<String>,
    pub version: Version,
    pub triplet: Triplet,
    /// Dependency names; entries may carry `:triplet` qualifiers for
    /// cross-triplet (host) edges.
    pub depends: Vec<String>,
    pub default_features: Vec<String>,
    pub abi: Option<String>,
    pub status: StatusLine,
}

impl StatusParagraph {
    pub fn spec(&self) -> PackageSpec {
        PackageSpec::new(self.package.clone(), self.triplet.clone())
    }

    pub fn is_core(&self) -> bool {
        self.feature.is_none()
    }

    fn from_raw(raw: &mut RawParagraph, origin: &str, diagnostics: &mut Diagnostics) -> Option<StatusParagraph> {
        let line = raw.start_line;
        let mut required = |name: &str| match raw.take(name) {
            Some(field) => Some(field.value),
            None => {
                diagnostics.error(
                    (origin, line, 1usize),
                    format!("status paragraph is missing the `{name}` field"),
                );
                None
            }
        };
        let package = required("Package")?;
        let triplet = Triplet::from_canonical_name(required("Architecture")?);
        let status_text = required("Status")?;
        let status = match StatusLine::parse(&status_text) {
            Ok(status) => status,
            Err(e) => {
                diagnostics.error((origin, line, 1usize), e.to_string());
                return None;
            }
        };

        let feature = raw
            .take("Feature")
            .map(|f| f.value)
            .filter(|f| f != "core");
        let version_text = raw.take("Version").map(|f| f.value).unwrap_or_default();
        let port_version = raw
            .take("Port-Version")
            .and_then(|f| f.value.parse::<u32>().ok())
            .unwrap_or(0);
        let depends = raw
            .take("Depends")
            .map(|f| {
                f.value
                    .split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let default_features = raw
            .take("Default-Features")
            .map(|f| {
                f.value
                    .split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let abi = raw.take("Abi").map(|f| f.value);
        // Multi-Arch and description fields are tolerated silently.
        let _ = raw.take("Multi-Arch");
        let _ = raw.take("Description");
        let _ = raw.take("Maintainer");

        Some(StatusParagraph {
            package,
            feature,
            version: Version::new(version_text, port_version),
            triplet,
            depends,
            default_features,
            abi,
            status,
        })
    }
}

impl Display for StatusParagraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Package: {}", self.package)?;
        if let Some(feature) = &self.feature {
            writeln!(f, "Feature: {feature}")?;
        }
        if !self.version.text().is_empty() {
            writeln!(f, "Version: {}", self.version.text())?;
            if self.version.port_version() != 0 {
                writeln!(f, "Port-Version: {}", self.version.port_version())?;
            }
        }
        if !self.depends.is_empty() {
            writeln!(f, "Depends: {}", self.depends.join(", "))?;
        }
        if !self.default_features.is_empty() {
            writeln!(f, "Default-Features: {}", self.default_features.join(", "))?;
        }
        writeln!(f, "Architecture: {}", self.triplet)?;
        writeln!(f, "Multi-Arch: same")?;
        if let Some(abi) = &self.abi {
            writeln!(f, "Abi: {abi}")?;
        }
        writeln!(f, "Status: {}", self.status)
    }
}

/// The installed view of one package spec, assembled from its core and
/// feature paragraphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackageView {
    pub spec: PackageSpec,
    pub version: Version,
    /// Always contains `core`.
    pub features: BTreeSet<String>,
    pub abi: Option<String>,
    /// Dependency edges as recorded, parsed against this spec's triplet.
    pub depends: Vec<PackageSpec>,
}

/// The compacted database.
#[derive(Debug, Default)]
pub struct StatusDb {
    /// Keyed by `(package, triplet, feature-slot)`; the feature slot is
    /// empty for the core paragraph.
    entries: BTreeMap<(String, Triplet, String), StatusParagraph>,
}

impl StatusDb {
    pub fn parse(text: &str, origin: &str, diagnostics: &mut Diagnostics) -> StatusDb {
        let mut db = StatusDb::default();
        for mut raw in parse_paragraphs(text, origin, diagnostics) {
            if let Some(paragraph) = StatusParagraph::from_raw(&mut raw, origin, diagnostics) {
                db.insert(paragraph);
            }
        }
        // A feature paragraph without its core paragraph cannot describe
        // an installed state; drop it with a warning.
        let orphans: Vec<_> = db
            .entries
            .iter()
            .filter(|((package, triplet, feature), _)| {
                !feature.is_empty()
                    && !db
                        .entries
                        .contains_key(&(package.clone(), triplet.clone(), String::new()))
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in orphans {
            diagnostics.warning(
                origin,
                format!(
                    "feature paragraph for {}[{}]:{} has no core paragraph; ignoring it",
                    key.0, key.2, key.1
                ),
            );
            db.entries.remove(&key);
        }
        db
    }

    /// Load the database, treating a missing file as empty.
    pub fn load(path: &Path) -> Result<StatusDb> {
        if !path.exists() {
            return Ok(StatusDb::default());
        }
        let text = crate::common::fs::read_to_string(path)?;
        let mut diagnostics = Diagnostics::new();
        let db = Self::parse(&text, &path.display().to_string(), &mut diagnostics);
        diagnostics.into_result(db)
    }

    /// Record a paragraph; the newest state for its triple wins.
    pub fn insert(&mut self, paragraph: StatusParagraph) {
        let key = (
            paragraph.package.clone(),
            paragraph.triplet.clone(),
            paragraph.feature.clone().unwrap_or_default(),
        );
        self.entries.insert(key, paragraph);
    }

    /// Drop every paragraph of `spec` (used once a purge is complete).
    pub fn remove_spec(&mut self, spec: &PackageSpec) {
        self.entries.retain(|(package, triplet, _), _| {
            !(package == spec.name() && triplet == spec.triplet())
        });
    }

    pub fn get(&self, spec: &PackageSpec, feature: Option<&str>) -> Option<&StatusParagraph> {
        self.entries.get(&(
            spec.name().to_string(),
            spec.triplet().clone(),
            feature.unwrap_or_default().to_string(),
        ))
    }

    /// The installed view of `spec`, when its core paragraph says
    /// installed.
    pub fn installed(&self, spec: &PackageSpec) -> Option<InstalledPackageView> {
        let core = self.get(spec, None)?;
        if core.status.state != InstallState::Installed {
            return None;
        }
        let mut features = BTreeSet::from(["core".to_string()]);
        for ((package, triplet, feature), paragraph) in &self.entries {
            if package == spec.name()
                && triplet == spec.triplet()
                && !feature.is_empty()
                && paragraph.status.state == InstallState::Installed
            {
                features.insert(feature.clone());
            }
        }
        let depends = core
            .depends
            .iter()
            .map(|entry| parse_depend_entry(entry, spec.triplet()))
            .collect();
        Some(InstalledPackageView {
            spec: spec.clone(),
            version: core.version.clone(),
            features,
            abi: core.abi.clone(),
            depends,
        })
    }

    /// Every spec with an installed core paragraph.
    pub fn installed_packages(&self) -> Vec<InstalledPackageView> {
        let mut specs: Vec<PackageSpec> = self
            .entries
            .values()
            .filter(|p| p.is_core() && p.status.state == InstallState::Installed)
            .map(StatusParagraph::spec)
            .collect();
        specs.sort();
        specs
            .into_iter()
            .filter_map(|spec| self.installed(&spec))
            .collect()
    }

    /// Reverse dependency edges: for each installed spec, the installed
    /// specs that depend on it. Recomputed from `Depends` at load time.
    pub fn back_edges(&self) -> BTreeMap<PackageSpec, Vec<PackageSpec>> {
        let mut edges: BTreeMap<PackageSpec, Vec<PackageSpec>> = BTreeMap::new();
        for view in self.installed_packages() {
            for dep in &view.depends {
                let dependents = edges.entry(dep.clone()).or_default();
                if !dependents.contains(&view.spec) {
                    dependents.push(view.spec.clone());
                }
            }
        }
        edges
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for paragraph in self.entries.values() {
            out.push_str(&paragraph.to_string());
            out.push('\n');
        }
        out
    }

    /// Persist atomically; readers never observe a partial database.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            crate::common::fs::create_dir_all(parent)?;
        }
        crate::common::fs::write_atomic(path, self.serialize())
    }
}

/// `zlib` means "same triplet"; `tool:x64-linux` pins one explicitly.
fn parse_depend_entry(entry: &str, default_triplet: &Triplet) -> PackageSpec {
    match entry.split_once(':') {
        Some((name, triplet)) => PackageSpec::new(name, Triplet::from_canonical_name(triplet)),
        None => PackageSpec::new(entry, default_triplet.clone()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn x64() -> Triplet {
        Triplet::from_canonical_name("x64-linux")
    }

    fn parse_db(text: &str) -> StatusDb {
        let mut diagnostics = Diagnostics::new();
        let db = StatusDb::parse(text, "status", &mut diagnostics);
        assert!(!diagnostics.has_errors(), "{diagnostics}");
        db
    }

    const SAMPLE: &str = "\
Package: zlib
Version: 1.2.13
Depends: bzip2
Architecture: x64-linux
Multi-Arch: same
Abi: abc123
Status: install ok installed

Package: zlib
Feature: extra
Architecture: x64-linux
Multi-Arch: same
Status: install ok installed

Package: bzip2
Version: 1.0.8
Architecture: x64-linux
Multi-Arch: same
Status: install ok installed
";

    #[test]
    fn parses_and_compacts() {
        let db = parse_db(SAMPLE);
        let spec = PackageSpec::new("zlib", x64());
        let view = db.installed(&spec).unwrap();
        assert_eq!(view.version, Version::new("1.2.13", 0));
        assert_eq!(
            view.features,
            BTreeSet::from(["core".to_string(), "extra".to_string()])
        );
        assert_eq!(view.abi.as_deref(), Some("abc123"));
        assert_eq!(view.depends, [PackageSpec::new("bzip2", x64())]);
    }

    #[test]
    fn latest_paragraph_wins() {
        let text = format!(
            "{SAMPLE}\nPackage: zlib\nVersion: 1.2.13\nArchitecture: x64-linux\n\
             Multi-Arch: same\nStatus: purge ok not-installed\n"
        );
        let db = parse_db(&text);
        assert!(db.installed(&PackageSpec::new("zlib", x64())).is_none());
        // bzip2 is untouched.
        assert!(db.installed(&PackageSpec::new("bzip2", x64())).is_some());
    }

    #[test]
    fn orphan_feature_paragraphs_are_dropped() {
        let mut diagnostics = Diagnostics::new();
        let db = StatusDb::parse(
            "Package: lonely\nFeature: x\nArchitecture: x64-linux\nStatus: install ok installed\n",
            "status",
            &mut diagnostics,
        );
        assert!(db.entries.is_empty());
        assert!(diagnostics.to_string().contains("no core paragraph"));
    }

    #[test]
    fn back_edges_follow_depends() {
        let db = parse_db(SAMPLE);
        let edges = db.back_edges();
        assert_eq!(
            edges[&PackageSpec::new("bzip2", x64())],
            [PackageSpec::new("zlib", x64())]
        );
    }

    #[test]
    fn round_trips_through_serialize() {
        let db = parse_db(SAMPLE);
        let reparsed = parse_db(&db.serialize());
        assert_eq!(
            db.installed_packages(),
            reparsed.installed_packages()
        );
    }

    #[test]
    fn write_is_atomic_and_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");
        let mut db = parse_db(SAMPLE);
        db.remove_spec(&PackageSpec::new("zlib", x64()));
        db.write(&path).unwrap();

        let loaded = StatusDb::load(&path).unwrap();
        assert!(loaded.installed(&PackageSpec::new("zlib", x64())).is_none());
        assert!(loaded.installed(&PackageSpec::new("bzip2", x64())).is_some());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = StatusDb::load(&dir.path().join("status")).unwrap();
        assert!(db.installed_packages().is_empty());
    }
}
