//! A registry rooted in a local directory tree: `versions/` holds the
//! baseline and per-port databases, and database entries point back into
//! the tree with `$/`-relative paths.

use super::versiondb::{self, VersionDbKind};
use super::{EntryBackend, RegistryEntry};
use crate::core::Version;
use crate::diagnostic::Diagnostics;
use anyhow::{Context, Result};
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug)]
pub struct FilesystemRegistry {
    root: PathBuf,
    baseline_identifier: String,
    baseline: OnceCell<BTreeMap<String, Version>>,
}

impl FilesystemRegistry {
    pub fn new(root: impl Into<PathBuf>, baseline_identifier: Option<String>) -> FilesystemRegistry {
        FilesystemRegistry {
            root: root.into(),
            baseline_identifier: baseline_identifier.unwrap_or_else(|| "default".to_string()),
            baseline: OnceCell::new(),
        }
    }

    fn baseline(&self) -> Result<&BTreeMap<String, Version>> {
        if self.baseline.get().is_none() {
            let path = self.root.join("versions").join("baseline.json");
            let text = crate::common::fs::read_to_string(&path)?;
            let mut diagnostics = Diagnostics::new();
            let parsed = versiondb::parse_baseline(
                &text,
                &path.display().to_string(),
                &self.baseline_identifier,
                &mut diagnostics,
            );
            let parsed = diagnostics
                .into_result(parsed)?
                .context("baseline file did not parse")?;
            let _ = self.baseline.set(parsed);
        }
        Ok(self.baseline.get().expect("just initialized"))
    }

    pub fn get_baseline_version(&self, name: &str) -> Result<Option<Version>> {
        Ok(self.baseline()?.get(name).cloned())
    }

    pub fn get_port_entry(&self, name: &str) -> Result<Option<RegistryEntry>> {
        let db_path = self.root.join(versiondb::version_db_relative_path(name));
        if !db_path.is_file() {
            return Ok(None);
        }
        let text = crate::common::fs::read_to_string(&db_path)?;
        let mut diagnostics = Diagnostics::new();
        let entries = versiondb::parse_version_db(
            &text,
            &db_path.display().to_string(),
            VersionDbKind::Filesystem,
            &mut diagnostics,
        );
        let entries = diagnostics
            .into_result(entries)?
            .context("version database did not parse")?;
        Ok(Some(RegistryEntry {
            port_name: name.to_string(),
            versions: entries,
            backend: EntryBackend::Filesystem {
                registry_root: self.root.clone(),
            },
        }))
    }

    pub fn append_all_port_names(&self, out: &mut Vec<String>) -> Result<()> {
        let versions_dir = self.root.join("versions");
        let buckets = std::fs::read_dir(&versions_dir).context(format!(
            "unable to list version databases in '{}'",
            versions_dir.display()
        ))?;
        for bucket in buckets {
            let bucket = bucket?;
            if !bucket.file_type()?.is_dir() {
                continue;
            }
            for file in std::fs::read_dir(bucket.path())? {
                let file = file?;
                let name = file.file_name();
                let name = name.to_string_lossy();
                if let Some(port) = name.strip_suffix(".json") {
                    out.push(port.to_string());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::fs::{create_dir_all, write};
    use std::path::Path;

    fn write_registry(root: &Path) {
        create_dir_all(root.join("versions/z-")).unwrap();
        create_dir_all(root.join("ports/zlib")).unwrap();
        write(
            root.join("versions/baseline.json"),
            r#"{ "default": { "zlib": { "baseline": "1.2.13", "port-version": 0 } } }"#,
        )
        .unwrap();
        write(
            root.join("versions/z-/zlib.json"),
            r#"{ "versions": [
                { "path": "$/ports/zlib", "version": "1.2.13" },
                { "path": "$/old/zlib", "version": "1.2.12" }
            ] }"#,
        )
        .unwrap();
    }

    #[test]
    fn lookups_resolve_into_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        write_registry(dir.path());
        let registry = FilesystemRegistry::new(dir.path(), None);

        assert_eq!(
            registry.get_baseline_version("zlib").unwrap(),
            Some(Version::new("1.2.13", 0))
        );
        assert_eq!(registry.get_baseline_version("other").unwrap(), None);

        let entry = registry.get_port_entry("zlib").unwrap().unwrap();
        assert_eq!(entry.port_versions().count(), 2);
        let found = entry.get_version(&Version::new("1.2.13", 0)).unwrap();
        assert_eq!(found.path, dir.path().join("ports/zlib"));

        assert!(registry.get_port_entry("missing").unwrap().is_none());

        let mut names = Vec::new();
        registry.append_all_port_names(&mut names).unwrap();
        assert_eq!(names, ["zlib"]);
    }
}
