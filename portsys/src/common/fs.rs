//! Thin wrappers over `std::fs` that attach the path to every error, plus
//! the atomic-write primitive the status database depends on.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).context(format!("unable to read '{}'", path.display()))
}

pub fn write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, contents).context(format!("unable to write '{}'", path.display()))
}

pub fn create_dir_all<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    std::fs::create_dir_all(path)
        .context(format!("unable to create directory '{}'", path.display()))
}

pub fn remove_dir_all<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    std::fs::remove_dir_all(path)
        .context(format!("unable to remove directory '{}'", path.display()))
}

pub fn remove_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    std::fs::remove_file(path).context(format!("unable to remove '{}'", path.display()))
}

pub fn rename<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> Result<()> {
    let (from, to) = (from.as_ref(), to.as_ref());
    std::fs::rename(from, to).context(format!(
        "unable to rename '{}' to '{}'",
        from.display(),
        to.display()
    ))
}

/// Write `contents` to a sibling temp file, fsync it, then rename over
/// `path`. Readers observe either the old or the new contents, never a
/// partial write.
pub fn write_atomic<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
    let path = path.as_ref();
    let parent = path
        .parent()
        .context(format!("'{}' has no parent directory", path.display()))?;
    let temp = parent.join(format!(
        ".{}.tmp",
        path.file_name()
            .context(format!("'{}' has no file name", path.display()))?
            .to_string_lossy()
    ));
    {
        let mut file =
            File::create(&temp).context(format!("unable to create '{}'", temp.display()))?;
        file.write_all(contents.as_ref())
            .context(format!("unable to write '{}'", temp.display()))?;
        file.sync_all()
            .context(format!("unable to sync '{}'", temp.display()))?;
    }
    rename(&temp, path)
}

/// Copy `src` into `dest` recursively, creating `dest`. Returns the list
/// of files created, relative to `dest`.
pub fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    create_dir_all(dest)?;
    for entry in walkdir::WalkDir::new(src).sort_by_file_name() {
        let entry = entry.context(format!("unable to walk '{}'", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields children of its root");
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target).context(format!(
                "unable to copy '{}' to '{}'",
                entry.path().display(),
                target.display()
            ))?;
            created.push(relative.to_path_buf());
        }
    }
    Ok(created)
}
