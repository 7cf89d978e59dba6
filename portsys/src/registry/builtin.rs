//! The classic-mode builtin registry: a bundled ports tree with one
//! directory per port and no version database. Each port's single
//! available version is whatever its metadata declares.

use super::{EntryBackend, RegistryEntry, VersionDbEntry};
use crate::core::Version;
use crate::diagnostic::Diagnostics;
use crate::manifest;
use crate::registry::DbLocation;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct BuiltinFilesRegistry {
    ports_dir: PathBuf,
}

impl BuiltinFilesRegistry {
    pub fn new(ports_dir: impl Into<PathBuf>) -> BuiltinFilesRegistry {
        BuiltinFilesRegistry {
            ports_dir: ports_dir.into(),
        }
    }

    fn load_port_version(&self, name: &str) -> Result<Option<crate::core::SchemedVersion>> {
        let port_dir = self.ports_dir.join(name);
        if !port_dir.is_dir() {
            return Ok(None);
        }
        let mut diagnostics = Diagnostics::new();
        let scf = manifest::load_port_directory(&port_dir, &mut diagnostics);
        let scf = diagnostics
            .into_result(scf)
            .context(format!("while loading the builtin port `{name}`"))?;
        Ok(scf.map(|scf| scf.core.version))
    }

    pub fn get_baseline_version(&self, name: &str) -> Result<Option<Version>> {
        Ok(self.load_port_version(name)?.map(|sv| sv.version))
    }

    pub fn get_port_entry(&self, name: &str) -> Result<Option<RegistryEntry>> {
        let Some(version) = self.load_port_version(name)? else {
            return Ok(None);
        };
        Ok(Some(RegistryEntry {
            port_name: name.to_string(),
            versions: vec![VersionDbEntry {
                version,
                location: DbLocation::Path(name.to_string()),
            }],
            backend: EntryBackend::Builtin {
                port_directory: self.ports_dir.join(name),
            },
        }))
    }

    pub fn append_all_port_names(&self, out: &mut Vec<String>) -> Result<()> {
        append_port_directory_names(&self.ports_dir, out)
    }
}

/// Subdirectory names of `dir`, skipping dotfiles (`.DS_Store` and
/// friends appear on shared checkouts).
pub(crate) fn append_port_directory_names(dir: &Path, out: &mut Vec<String>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).context(format!("unable to list ports in '{}'", dir.display()))?;
    for entry in entries {
        let entry = entry.context(format!("unable to list ports in '{}'", dir.display()))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            out.push(name.into_owned());
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::fs::{create_dir_all, write};

    fn write_port(root: &Path, name: &str, version: &str) {
        let dir = root.join(name);
        create_dir_all(&dir).unwrap();
        write(
            dir.join("vcpkg.json"),
            format!(r#"{{ "name": "{name}", "version": "{version}" }}"#),
        )
        .unwrap();
    }

    #[test]
    fn baseline_is_the_tree_version() {
        let dir = tempfile::tempdir().unwrap();
        write_port(dir.path(), "zlib", "1.2.13");
        let registry = BuiltinFilesRegistry::new(dir.path());

        let baseline = registry.get_baseline_version("zlib").unwrap().unwrap();
        assert_eq!(baseline, Version::new("1.2.13", 0));
        assert!(registry.get_baseline_version("missing").unwrap().is_none());

        let entry = registry.get_port_entry("zlib").unwrap().unwrap();
        let found = entry.get_version(&baseline).unwrap();
        assert_eq!(found.path, dir.path().join("zlib"));
        assert!(entry.get_version(&Version::new("0.9", 0)).is_err());
    }

    #[test]
    fn enumeration_skips_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        write_port(dir.path(), "zlib", "1");
        write_port(dir.path(), "bzip2", "1");
        create_dir_all(dir.path().join(".git")).unwrap();
        write(dir.path().join(".DS_Store"), "").unwrap();

        let registry = BuiltinFilesRegistry::new(dir.path());
        let mut names = Vec::new();
        registry.append_all_port_names(&mut names).unwrap();
        names.sort();
        assert_eq!(names, ["bzip2", "zlib"]);
    }
}
