//! Version database and baseline files.
//!
//! Each port in a registry has `versions/<first-letter>-/<name>.json`
//! listing every published version, newest first, with the git tree id or
//! registry-relative path that holds it. `versions/baseline.json` pins a
//! single version per port.

use crate::core::{SchemedVersion, Version, VersionScheme};
use crate::diagnostic::Diagnostics;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Where a recorded version's port tree lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// A 40-hex git tree id within the registry repository.
    GitTree(String),
    /// A path under the registry root, stored without the `$/` prefix.
    Path(String),
}

/// One row of a port's version database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDbEntry {
    pub version: SchemedVersion,
    pub location: DbLocation,
}

/// Which location field a registry kind requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionDbKind {
    Git,
    Filesystem,
}

/// Relative path of a port's version database file within a registry,
/// e.g. `versions/z-/zlib.json`.
pub fn version_db_relative_path(port_name: &str) -> String {
    let first = port_name.chars().next().unwrap_or('-');
    format!("versions/{first}-/{port_name}.json")
}

#[derive(Debug, Deserialize)]
struct RawVersionDb {
    versions: Vec<RawVersionEntry>,
}

#[derive(Debug, Deserialize)]
struct RawVersionEntry {
    #[serde(rename = "git-tree")]
    git_tree: Option<String>,
    path: Option<String>,
    version: Option<String>,
    #[serde(rename = "version-string")]
    version_string: Option<String>,
    #[serde(rename = "version-semver")]
    version_semver: Option<String>,
    #[serde(rename = "version-date")]
    version_date: Option<String>,
    #[serde(rename = "port-version", default)]
    port_version: u32,
}

fn is_git_tree_sha(text: &str) -> bool {
    text.len() == 40 && text.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Validate a filesystem location: it must start with `$/` and may not use
/// backslashes, doubled slashes, or `.`/`..` segments. Returns the path
/// relative to the registry root.
fn validate_registry_path(text: &str) -> Result<String, String> {
    let relative = text
        .strip_prefix("$/")
        .ok_or_else(|| format!("`{text}` must start with `$/` (the registry root)"))?;
    if text.contains('\\') {
        return Err(format!("`{text}` must use forward slashes"));
    }
    if text.contains("//") {
        return Err(format!("`{text}` must not contain doubled slashes"));
    }
    if relative.is_empty() {
        return Err(format!("`{text}` names the registry root, not a port tree"));
    }
    if relative.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(format!("`{text}` must not contain `.` or `..` segments"));
    }
    Ok(relative.to_string())
}

fn entry_version(raw: &RawVersionEntry, origin: &str, diagnostics: &mut Diagnostics) -> Option<SchemedVersion> {
    let present: Vec<(VersionScheme, &String)> = [
        (VersionScheme::Relaxed, &raw.version),
        (VersionScheme::String, &raw.version_string),
        (VersionScheme::Semver, &raw.version_semver),
        (VersionScheme::Date, &raw.version_date),
    ]
    .into_iter()
    .filter_map(|(scheme, text)| text.as_ref().map(|t| (scheme, t)))
    .collect();
    match present.as_slice() {
        [(scheme, text)] => {
            let version = SchemedVersion::new(*scheme, Version::new((*text).clone(), raw.port_version));
            if !scheme.is_valid_text(text) {
                diagnostics.error(
                    origin,
                    format!("`{text}` is not a valid `{scheme}` version"),
                );
                return None;
            }
            Some(version)
        }
        [] => {
            diagnostics.error(origin, "version database entry is missing a version field");
            None
        }
        _ => {
            diagnostics.error(
                origin,
                "version database entry has more than one version field",
            );
            None
        }
    }
}

/// Parse one port's version database. Entries remain in file order, which
/// is newest first by convention.
pub fn parse_version_db(
    text: &str,
    origin: &str,
    kind: VersionDbKind,
    diagnostics: &mut Diagnostics,
) -> Option<Vec<VersionDbEntry>> {
    let raw: RawVersionDb = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            diagnostics.error((origin, e.line(), e.column()), e.to_string());
            return None;
        }
    };
    if raw.versions.is_empty() {
        diagnostics.error(origin, "version database has no entries");
        return None;
    }

    let before = diagnostics.records().len();
    let mut entries = Vec::new();
    for raw_entry in &raw.versions {
        let Some(version) = entry_version(raw_entry, origin, diagnostics) else {
            continue;
        };
        let location = match (kind, &raw_entry.git_tree, &raw_entry.path) {
            (VersionDbKind::Git, Some(tree), _) => {
                if !is_git_tree_sha(tree) {
                    diagnostics.error(
                        origin,
                        format!("`{tree}` is not a 40-hex git tree id"),
                    );
                    continue;
                }
                DbLocation::GitTree(tree.clone())
            }
            (VersionDbKind::Filesystem, _, Some(path)) => match validate_registry_path(path) {
                Ok(relative) => DbLocation::Path(relative),
                Err(problem) => {
                    diagnostics.error(origin, problem);
                    continue;
                }
            },
            (VersionDbKind::Git, None, _) => {
                diagnostics.error(
                    origin,
                    format!("entry for {version} is missing the `git-tree` field"),
                );
                continue;
            }
            (VersionDbKind::Filesystem, _, None) => {
                diagnostics.error(
                    origin,
                    format!("entry for {version} is missing the `path` field"),
                );
                continue;
            }
        };
        entries.push(VersionDbEntry { version, location });
    }

    if diagnostics.records().len() != before {
        None
    } else {
        Some(entries)
    }
}

#[derive(Debug, Deserialize)]
struct RawBaselineEntry {
    baseline: String,
    #[serde(rename = "port-version", default)]
    port_version: u32,
}

/// Parse `versions/baseline.json` and return the named baseline's pins.
/// `identifier` is almost always `default`.
pub fn parse_baseline(
    text: &str,
    origin: &str,
    identifier: &str,
    diagnostics: &mut Diagnostics,
) -> Option<BTreeMap<String, Version>> {
    let raw: BTreeMap<String, BTreeMap<String, RawBaselineEntry>> = match serde_json::from_str(text)
    {
        Ok(raw) => raw,
        Err(e) => {
            diagnostics.error((origin, e.line(), e.column()), e.to_string());
            return None;
        }
    };
    let Some(named) = raw.get(identifier) else {
        diagnostics.error(
            origin,
            format!("baseline file has no `{identifier}` baseline"),
        );
        return None;
    };
    Some(
        named
            .iter()
            .map(|(port, entry)| {
                (
                    port.clone(),
                    Version::new(entry.baseline.clone(), entry.port_version),
                )
            })
            .collect(),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_git(text: &str) -> (Option<Vec<VersionDbEntry>>, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let entries = parse_version_db(text, "test.json", VersionDbKind::Git, &mut diagnostics);
        (entries, diagnostics)
    }

    fn parse_fs(text: &str) -> (Option<Vec<VersionDbEntry>>, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let entries =
            parse_version_db(text, "test.json", VersionDbKind::Filesystem, &mut diagnostics);
        (entries, diagnostics)
    }

    #[test]
    fn db_file_paths_use_first_letter_buckets() {
        assert_eq!(version_db_relative_path("zlib"), "versions/z-/zlib.json");
        assert_eq!(version_db_relative_path("7zip"), "versions/7-/7zip.json");
    }

    #[test]
    fn git_entries_require_tree_shas() {
        let (entries, _) = parse_git(
            r#"{ "versions": [
                { "git-tree": "9b07f8a38bbc4d13f8411921e6734753e15f8d50", "version": "1.2.13", "port-version": 1 },
                { "git-tree": "12b84a31469a78dd4b42dcf58a27d4600f6b2d48", "version": "1.2.12" }
            ] }"#,
        );
        let entries = entries.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].version.version.port_version(), 1);

        let (entries, diagnostics) = parse_git(r#"{ "versions": [ { "git-tree": "123", "version": "1" } ] }"#);
        assert!(entries.is_none());
        assert!(diagnostics.to_string().contains("40-hex"));
    }

    #[test]
    fn filesystem_paths_must_be_registry_relative() {
        let (entries, _) = parse_fs(r#"{ "versions": [ { "path": "$/c/d", "version": "1" } ] }"#);
        assert_eq!(entries.unwrap()[0].location, DbLocation::Path("c/d".into()));

        for bad in [
            r#"{ "versions": [ { "path": "c/d", "version": "1" } ] }"#,
            r#"{ "versions": [ { "path": "$\\c\\d", "version": "1" } ] }"#,
            r#"{ "versions": [ { "path": "$/c//d", "version": "1" } ] }"#,
            r#"{ "versions": [ { "path": "$/./d", "version": "1" } ] }"#,
            r#"{ "versions": [ { "path": "$/c/../d", "version": "1" } ] }"#,
            r#"{ "versions": [ { "path": "$/c/d/..", "version": "1" } ] }"#,
        ] {
            let (entries, _) = parse_fs(bad);
            assert!(entries.is_none(), "{bad} should be rejected");
        }
    }

    #[test]
    fn empty_db_is_an_error() {
        let (entries, diagnostics) = parse_git(r#"{ "versions": [] }"#);
        assert!(entries.is_none());
        assert!(diagnostics.to_string().contains("no entries"));
    }

    #[test]
    fn conflicting_version_fields_are_rejected() {
        let (entries, _) = parse_git(
            r#"{ "versions": [ { "git-tree": "9b07f8a38bbc4d13f8411921e6734753e15f8d50",
                 "version": "1", "version-string": "1" } ] }"#,
        );
        assert!(entries.is_none());
    }

    #[test]
    fn baseline_lookup() {
        let mut diagnostics = Diagnostics::new();
        let baseline = parse_baseline(
            r#"{ "default": { "zlib": { "baseline": "1.2.13", "port-version": 2 } } }"#,
            "baseline.json",
            "default",
            &mut diagnostics,
        )
        .unwrap();
        assert_eq!(baseline["zlib"], Version::new("1.2.13", 2));

        assert!(parse_baseline(r#"{}"#, "baseline.json", "default", &mut diagnostics).is_none());
    }
}
