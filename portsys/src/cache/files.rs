//! The local-directory cache provider.
//!
//! Entries live at `<root>/<first-two-hex>/<abi>/` as plain directory
//! trees. Stores write into a staging sibling and rename, so a torn
//! store never looks like a cache hit.

use super::{BinaryCacheProvider, CacheAvailability};
use crate::common::fs;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct FilesCacheProvider {
    root: PathBuf,
    readonly: bool,
}

impl FilesCacheProvider {
    pub fn new(root: impl Into<PathBuf>) -> FilesCacheProvider {
        FilesCacheProvider {
            root: root.into(),
            readonly: false,
        }
    }

    pub fn readonly(root: impl Into<PathBuf>) -> FilesCacheProvider {
        FilesCacheProvider {
            root: root.into(),
            readonly: true,
        }
    }

    fn entry_path(&self, abi: &str) -> PathBuf {
        let bucket = abi.get(..2).unwrap_or("xx");
        self.root.join(bucket).join(abi)
    }
}

impl BinaryCacheProvider for FilesCacheProvider {
    fn name(&self) -> &str {
        "files"
    }

    fn can_push(&self) -> bool {
        !self.readonly
    }

    fn precheck(&self, abis: &[&str]) -> Vec<CacheAvailability> {
        abis.iter()
            .map(|abi| {
                if self.entry_path(abi).is_dir() {
                    CacheAvailability::Available
                } else {
                    CacheAvailability::Unavailable
                }
            })
            .collect()
    }

    fn try_restore(&self, abi: &str, destination: &Path) -> Result<()> {
        let entry = self.entry_path(abi);
        if !entry.is_dir() {
            bail!("no cache entry for {abi}");
        }
        if destination.exists() {
            fs::remove_dir_all(destination)?;
        }
        fs::copy_dir_recursive(&entry, destination)
            .context(format!("while restoring {abi} from the files cache"))?;
        Ok(())
    }

    fn push(&self, abi: &str, package_dir: &Path) -> Result<()> {
        if self.readonly {
            bail!("this files cache is configured read-only");
        }
        let entry = self.entry_path(abi);
        if entry.is_dir() {
            return Ok(());
        }
        let parent = entry.parent().expect("entry paths have a bucket parent");
        fs::create_dir_all(parent)?;
        let staging = parent.join(format!(".incoming-{abi}"));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::copy_dir_recursive(package_dir, &staging)
            .context(format!("while storing {abi} into the files cache"))?;
        fs::rename(&staging, &entry)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::fs::{read_to_string, write};

    #[test]
    fn push_then_restore_round_trips() {
        let cache_dir = tempfile::tempdir().unwrap();
        let provider = FilesCacheProvider::new(cache_dir.path());

        let abi = "aabbccddee";
        assert_eq!(provider.precheck(&[abi]), [CacheAvailability::Unavailable]);

        let package = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(package.path().join("include")).unwrap();
        write(package.path().join("include/zlib.h"), "// header\n").unwrap();
        provider.push(abi, package.path()).unwrap();

        assert_eq!(provider.precheck(&[abi]), [CacheAvailability::Available]);

        let restored = tempfile::tempdir().unwrap();
        let destination = restored.path().join("zlib_x64-linux");
        provider.try_restore(abi, &destination).unwrap();
        assert_eq!(
            read_to_string(destination.join("include/zlib.h")).unwrap(),
            "// header\n"
        );
    }

    #[test]
    fn readonly_provider_rejects_push() {
        let cache_dir = tempfile::tempdir().unwrap();
        let provider = FilesCacheProvider::readonly(cache_dir.path());
        assert!(!provider.can_push());
        let package = tempfile::tempdir().unwrap();
        assert!(provider.push("abi", package.path()).is_err());
    }
}
