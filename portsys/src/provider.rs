//! The unified view over overlays and registries that hands the resolver
//! a port's metadata for a `(name, version)`.
//!
//! Overlay directories are consulted first, in registration order, and a
//! hit shadows every registry regardless of the version asked for. Ports
//! loaded from a registry are cross-checked against the version the
//! registry claims to be providing. All loads are memoized; repeated
//! lookups share one allocation.

use crate::core::Version;
use crate::diagnostic::Diagnostics;
use crate::manifest::{self, SourceControlFileAndLocation};
use crate::registry::RegistrySet;
use anyhow::{bail, Context, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::rc::Rc;

/// User-supplied directories that shadow registries for matching ports.
/// A directory that is itself a port (carries metadata at top level)
/// shadows exactly the port it names; otherwise each subdirectory is a
/// candidate port.
#[derive(Debug, Default)]
pub struct OverlayProvider {
    directories: Vec<PathBuf>,
    cache: RefCell<HashMap<String, Option<Rc<SourceControlFileAndLocation>>>>,
}

impl OverlayProvider {
    pub fn new(directories: Vec<PathBuf>) -> OverlayProvider {
        OverlayProvider {
            directories,
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn is_port_directory(dir: &PathBuf) -> bool {
        dir.join(manifest::MANIFEST_FILENAME).exists()
            || dir.join(manifest::CONTROL_FILENAME).exists()
    }

    /// The overlay port for `name`, if any overlay directory provides it.
    pub fn get(&self, name: &str) -> Result<Option<Rc<SourceControlFileAndLocation>>> {
        if let Some(found) = self.cache.borrow().get(name) {
            return Ok(found.clone());
        }
        let mut found = None;
        for directory in &self.directories {
            let candidate = if Self::is_port_directory(directory) {
                directory.clone()
            } else {
                let nested = directory.join(name);
                if !Self::is_port_directory(&nested) {
                    continue;
                }
                nested
            };
            let mut diagnostics = Diagnostics::new();
            let scf = manifest::load_port_directory(&candidate, &mut diagnostics);
            let scf = diagnostics
                .into_result(scf)?
                .context(format!("while loading overlay '{}'", candidate.display()))?;
            if scf.name() == name {
                found = Some(Rc::new(SourceControlFileAndLocation {
                    scf,
                    port_directory: candidate,
                    registry_origin: None,
                }));
                break;
            }
        }
        self.cache
            .borrow_mut()
            .insert(name.to_string(), found.clone());
        Ok(found)
    }

    /// Add every overlay port to `out`, earliest-registered directory
    /// winning name clashes. Existing entries in `out` are not replaced.
    pub fn load_all(
        &self,
        out: &mut BTreeMap<String, Rc<SourceControlFileAndLocation>>,
    ) -> Result<()> {
        for directory in &self.directories {
            let mut names = Vec::new();
            if Self::is_port_directory(directory) {
                let mut diagnostics = Diagnostics::new();
                let scf = manifest::load_port_directory(directory, &mut diagnostics);
                if let Some(scf) = diagnostics.into_result(scf)? {
                    names.push(scf.core.name.clone());
                }
            } else if directory.is_dir() {
                crate::registry::builtin::append_port_directory_names(directory, &mut names)?;
            }
            for name in names {
                if out.contains_key(&name) {
                    continue;
                }
                if let Some(scfl) = self.get(&name)? {
                    out.insert(name, scfl);
                }
            }
        }
        Ok(())
    }
}

/// The provider the planner reads through: overlays, then the selected
/// registry per name.
pub struct PortFileProvider<'a> {
    overlays: &'a OverlayProvider,
    registries: &'a RegistrySet,
    baseline_cache: RefCell<HashMap<String, Rc<SourceControlFileAndLocation>>>,
    versioned_cache: RefCell<HashMap<(String, Version), Rc<SourceControlFileAndLocation>>>,
}

impl<'a> PortFileProvider<'a> {
    pub fn new(overlays: &'a OverlayProvider, registries: &'a RegistrySet) -> PortFileProvider<'a> {
        PortFileProvider {
            overlays,
            registries,
            baseline_cache: RefCell::new(HashMap::new()),
            versioned_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn registries(&self) -> &RegistrySet {
        self.registries
    }

    /// The baseline version the selected registry pins `name` to; `None`
    /// when no registry provides the port (or no baseline records it).
    pub fn baseline_version(&self, name: &str) -> Result<Option<Version>> {
        if let Some(overlay) = self.overlays.get(name)? {
            return Ok(Some(overlay.version().version.clone()));
        }
        self.registries.baseline_for_port(name)
    }

    /// Load `name` at its baseline version.
    pub fn get_control_file(&self, name: &str) -> Result<Rc<SourceControlFileAndLocation>> {
        if let Some(cached) = self.baseline_cache.borrow().get(name) {
            return Ok(cached.clone());
        }
        if let Some(overlay) = self.overlays.get(name)? {
            self.baseline_cache
                .borrow_mut()
                .insert(name.to_string(), overlay.clone());
            return Ok(overlay);
        }
        let baseline = self
            .registries
            .baseline_for_port(name)?
            .with_context(|| format!("no registry baseline provides the port `{name}`"))?;
        let loaded = self.load_from_registry(name, &baseline)?;
        self.baseline_cache
            .borrow_mut()
            .insert(name.to_string(), loaded.clone());
        Ok(loaded)
    }

    /// Load `name` at a specific version. Overlays still win, whatever
    /// their version.
    pub fn get_versioned_control_file(
        &self,
        name: &str,
        version: &Version,
    ) -> Result<Rc<SourceControlFileAndLocation>> {
        if let Some(overlay) = self.overlays.get(name)? {
            return Ok(overlay);
        }
        let key = (name.to_string(), version.clone());
        if let Some(cached) = self.versioned_cache.borrow().get(&key) {
            return Ok(cached.clone());
        }
        let loaded = self.load_from_registry(name, version)?;
        self.versioned_cache.borrow_mut().insert(key, loaded.clone());
        Ok(loaded)
    }

    fn load_from_registry(
        &self,
        name: &str,
        version: &Version,
    ) -> Result<Rc<SourceControlFileAndLocation>> {
        let registry = self
            .registries
            .registry_for_port(name)
            .with_context(|| format!("no registry is configured to provide the port `{name}`"))?;
        let entry = registry
            .implementation()
            .get_port_entry(name)?
            .with_context(|| format!("the selected registry has no versions of `{name}`"))?;
        let found = entry
            .get_version(version)
            .with_context(|| format!("while locating {name}@{version}"))?;

        let mut diagnostics = Diagnostics::new();
        let scf = manifest::load_port_directory(&found.path, &mut diagnostics);
        let scf = diagnostics
            .into_result(scf)?
            .context(format!("while loading '{}'", found.path.display()))?;

        if scf.core.name != name {
            bail!(
                "{} declares port `{}`, but the registry lists it as `{name}`",
                found.location,
                scf.core.name
            );
        }
        let actual = &scf.core.version.version;
        if actual != version {
            bail!(
                "version mismatch: {} declares {name}@{actual}, but the registry entry is for \
                 {name}@{version}",
                found.location
            );
        }

        Ok(Rc::new(SourceControlFileAndLocation {
            scf,
            port_directory: found.path,
            registry_origin: Some(found.location),
        }))
    }

    /// Every reachable port at its baseline version: overlays first (they
    /// shadow), then each registry's port list.
    pub fn load_all_control_files(
        &self,
        out: &mut BTreeMap<String, Rc<SourceControlFileAndLocation>>,
    ) -> Result<()> {
        self.overlays.load_all(out)?;
        for name in self.registries.all_port_names()? {
            if out.contains_key(&name) {
                continue;
            }
            match self.get_control_file(&name) {
                Ok(scfl) => {
                    out.insert(name, scfl);
                }
                Err(e) => log::warn!("skipping port `{name}`: {e:#}"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::fs::{create_dir_all, write};
    use crate::registry::builtin::BuiltinFilesRegistry;
    use crate::registry::{Registry, RegistryImpl, RegistrySet};
    use std::path::Path;

    fn write_port(root: &Path, name: &str, version: &str) {
        let dir = root.join(name);
        create_dir_all(&dir).unwrap();
        write(
            dir.join("vcpkg.json"),
            format!(r#"{{ "name": "{name}", "version": "{version}" }}"#),
        )
        .unwrap();
    }

    fn builtin_set(ports: &Path) -> RegistrySet {
        RegistrySet::new(
            Some(Registry::new(
                Vec::new(),
                RegistryImpl::Builtin(BuiltinFilesRegistry::new(ports)),
            )),
            Vec::new(),
        )
    }

    #[test]
    fn overlay_shadows_registry() {
        let ports = tempfile::tempdir().unwrap();
        write_port(ports.path(), "zlib", "1.2.13");
        let overlay = tempfile::tempdir().unwrap();
        write_port(overlay.path(), "zlib", "9.9.9");

        let registries = builtin_set(ports.path());
        let overlays = OverlayProvider::new(vec![overlay.path().to_path_buf()]);
        let provider = PortFileProvider::new(&overlays, &registries);

        let scfl = provider.get_control_file("zlib").unwrap();
        assert_eq!(scfl.version().version, Version::new("9.9.9", 0));
        // Overlays win even for explicit version requests.
        let pinned = provider
            .get_versioned_control_file("zlib", &Version::new("1.2.13", 0))
            .unwrap();
        assert_eq!(pinned.version().version, Version::new("9.9.9", 0));
    }

    #[test]
    fn overlay_directory_that_is_a_port_shadows_only_itself() {
        let ports = tempfile::tempdir().unwrap();
        write_port(ports.path(), "zlib", "1.0");
        write_port(ports.path(), "bzip2", "1.0");

        // The overlay directory itself is the port `zlib`.
        let overlay = tempfile::tempdir().unwrap();
        write(
            overlay.path().join("vcpkg.json"),
            r#"{ "name": "zlib", "version": "2.0" }"#,
        )
        .unwrap();

        let registries = builtin_set(ports.path());
        let overlays = OverlayProvider::new(vec![overlay.path().to_path_buf()]);
        let provider = PortFileProvider::new(&overlays, &registries);

        assert_eq!(
            provider.get_control_file("zlib").unwrap().version().version,
            Version::new("2.0", 0)
        );
        assert_eq!(
            provider.get_control_file("bzip2").unwrap().version().version,
            Version::new("1.0", 0)
        );
    }

    #[test]
    fn repeated_lookups_share_one_load() {
        let ports = tempfile::tempdir().unwrap();
        write_port(ports.path(), "zlib", "1.2.13");
        let registries = builtin_set(ports.path());
        let overlays = OverlayProvider::default();
        let provider = PortFileProvider::new(&overlays, &registries);

        let first = provider.get_control_file("zlib").unwrap();
        let second = provider.get_control_file("zlib").unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn version_mismatch_is_detected() {
        let root = tempfile::tempdir().unwrap();
        // A filesystem registry whose db entry claims 1.1 but whose tree
        // declares 1.0.
        create_dir_all(root.path().join("versions/z-")).unwrap();
        write_port(&root.path().join("ports"), "zlib", "1.0");
        write(
            root.path().join("versions/baseline.json"),
            r#"{ "default": { "zlib": { "baseline": "1.1", "port-version": 0 } } }"#,
        )
        .unwrap();
        write(
            root.path().join("versions/z-/zlib.json"),
            r#"{ "versions": [ { "path": "$/ports/zlib", "version": "1.1" } ] }"#,
        )
        .unwrap();

        let registries = RegistrySet::new(
            Some(Registry::new(
                Vec::new(),
                RegistryImpl::Filesystem(crate::registry::filesystem::FilesystemRegistry::new(
                    root.path(),
                    None,
                )),
            )),
            Vec::new(),
        );
        let overlays = OverlayProvider::default();
        let provider = PortFileProvider::new(&overlays, &registries);
        let err = provider.get_control_file("zlib").unwrap_err();
        assert!(err.to_string().contains("version mismatch"), "{err:#}");
    }

    #[test]
    fn load_all_prefers_overlays() {
        let ports = tempfile::tempdir().unwrap();
        write_port(ports.path(), "zlib", "1.0");
        write_port(ports.path(), "bzip2", "1.0");
        let overlay = tempfile::tempdir().unwrap();
        write_port(overlay.path(), "zlib", "2.0");

        let registries = builtin_set(ports.path());
        let overlays = OverlayProvider::new(vec![overlay.path().to_path_buf()]);
        let provider = PortFileProvider::new(&overlays, &registries);

        let mut all = BTreeMap::new();
        provider.load_all_control_files(&mut all).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["zlib"].version().version, Version::new("2.0", 0));
        assert_eq!(all["bzip2"].version().version, Version::new("1.0", 0));
    }
}
