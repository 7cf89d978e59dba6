//! The on-disk layout of a portsys root directory.
//!
//! Every command resolves one [`Paths`] up front and passes it down; no
//! module consults the environment or a global on its own.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Directory layout rooted at `$VCPKG_ROOT`.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn from_root(root: impl Into<PathBuf>) -> Paths {
        Paths { root: root.into() }
    }

    /// Resolve the root from (in order) an explicit argument, the
    /// `VCPKG_ROOT` environment variable, or the current directory if it
    /// holds a ports tree.
    pub fn discover(explicit: Option<PathBuf>) -> Result<Paths> {
        if let Some(root) = explicit {
            return Ok(Paths::from_root(root));
        }
        if let Some(root) = std::env::var_os("VCPKG_ROOT") {
            return Ok(Paths::from_root(PathBuf::from(root)));
        }
        let cwd = std::env::current_dir().context("unable to determine the current directory")?;
        if cwd.join("ports").is_dir() {
            return Ok(Paths::from_root(cwd));
        }
        anyhow::bail!(
            "unable to locate a root; pass --vcpkg-root or set the VCPKG_ROOT environment variable"
        );
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The built-in ports tree.
    pub fn builtin_ports(&self) -> PathBuf {
        self.root.join("ports")
    }

    /// The built-in registry's version database directory.
    pub fn builtin_versions(&self) -> PathBuf {
        self.root.join("versions")
    }

    pub fn installed(&self) -> PathBuf {
        self.root.join("installed")
    }

    /// Metadata directory of the installed tree.
    pub fn installed_vcpkg(&self) -> PathBuf {
        self.installed().join("vcpkg")
    }

    pub fn status_file(&self) -> PathBuf {
        self.installed_vcpkg().join("status")
    }

    /// Per-package list files recording installed-file ownership.
    pub fn listfile_dir(&self) -> PathBuf {
        self.installed_vcpkg().join("info")
    }

    /// Staging area for built-but-not-yet-installed packages.
    pub fn packages(&self) -> PathBuf {
        self.root.join("packages")
    }

    pub fn buildtrees(&self) -> PathBuf {
        self.root.join("buildtrees")
    }

    pub fn scripts(&self) -> PathBuf {
        self.root.join("scripts")
    }

    /// The central helper script folded into every ABI.
    pub fn ports_cmake(&self) -> PathBuf {
        self.scripts().join("ports.cmake")
    }

    /// Helper scripts referenced from portfiles by name.
    pub fn helper_scripts(&self) -> PathBuf {
        self.scripts().join("cmake")
    }

    pub fn triplets(&self) -> PathBuf {
        self.root.join("triplets")
    }

    pub fn community_triplets(&self) -> PathBuf {
        self.triplets().join("community")
    }

    /// The triplet file for `name`, searching overlay directories first,
    /// then the built-in and community trees.
    pub fn find_triplet_file(&self, name: &str, overlays: &[PathBuf]) -> Option<PathBuf> {
        let file = format!("{name}.cmake");
        overlays
            .iter()
            .map(|dir| dir.join(&file))
            .chain([self.triplets().join(&file), self.community_triplets().join(&file)])
            .find(|candidate| candidate.is_file())
    }

    /// Cache of fetched external registries.
    pub fn registries_cache(&self) -> PathBuf {
        self.root.join("downloads").join("registries")
    }

    /// Where extracted registry port trees are materialized.
    pub fn registries_work_dir(&self) -> PathBuf {
        self.registries_cache().join("git-trees")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout_is_rooted() {
        let paths = Paths::from_root("/opt/ports");
        assert_eq!(paths.builtin_ports(), PathBuf::from("/opt/ports/ports"));
        assert_eq!(
            paths.status_file(),
            PathBuf::from("/opt/ports/installed/vcpkg/status")
        );
        assert_eq!(
            paths.ports_cmake(),
            PathBuf::from("/opt/ports/scripts/ports.cmake")
        );
    }

    #[test]
    fn triplet_lookup_prefers_overlays() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        let overlay = dir.path().join("overlay");
        std::fs::create_dir_all(root.join("triplets")).unwrap();
        std::fs::create_dir_all(&overlay).unwrap();
        std::fs::write(root.join("triplets/x64-linux.cmake"), "").unwrap();
        std::fs::write(overlay.join("x64-linux.cmake"), "").unwrap();

        let paths = Paths::from_root(&root);
        let found = paths
            .find_triplet_file("x64-linux", &[overlay.clone()])
            .unwrap();
        assert_eq!(found, overlay.join("x64-linux.cmake"));
        let fallback = paths.find_triplet_file("x64-linux", &[]).unwrap();
        assert_eq!(fallback, root.join("triplets/x64-linux.cmake"));
    }
}
