//! Git plumbing used by git-backed registries and the CI verifier.
//!
//! Everything shells out to the `git` binary with captured output; no
//! libgit2 binding is needed for the handful of plumbing commands the
//! registries use (`rev-parse`, `ls-tree`, `show`, `fetch`, `init`).

use anyhow::{bail, Context, Result};
use duct::cmd;
use std::path::{Path, PathBuf};

/// A local repository (or detached cache) commands run against.
#[derive(Debug, Clone)]
pub struct GitRepo {
    work_dir: PathBuf,
}

fn is_sha_hex(text: &str) -> bool {
    text.len() == 40 && text.bytes().all(|b| b.is_ascii_hexdigit())
}

impl GitRepo {
    pub fn at(work_dir: impl Into<PathBuf>) -> GitRepo {
        GitRepo {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        self.run_bytes(args)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    fn run_bytes(&self, args: &[&str]) -> Result<Vec<u8>> {
        let mut full = vec!["-C", self.work_dir.to_str().context("non-UTF-8 repo path")?];
        full.extend_from_slice(args);
        let output = cmd("git", &full)
            .stderr_capture()
            .stdout_capture()
            .unchecked()
            .run()
            .context("unable to run git; is it installed and on PATH?")?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }

    /// `git init` a bare-ish cache directory used to fetch remote
    /// registries into. Idempotent.
    pub fn init(&self) -> Result<()> {
        crate::common::fs::create_dir_all(&self.work_dir)?;
        if !self.work_dir.join(".git").exists() {
            self.run(&["init", "--quiet"])?;
        }
        Ok(())
    }

    /// Fetch `reference` (or everything, when `None`) from `url` into this
    /// repository; the fetched tip is available as `FETCH_HEAD`.
    pub fn fetch(&self, url: &str, reference: Option<&str>) -> Result<()> {
        match reference {
            Some(reference) => self.run(&["fetch", "--quiet", "--", url, reference])?,
            None => self.run(&["fetch", "--quiet", "--", url])?,
        };
        Ok(())
    }

    /// Resolve a revision (`HEAD`, a commit, `FETCH_HEAD`, ...) to a
    /// 40-hex object id.
    pub fn rev_parse(&self, revision: &str) -> Result<String> {
        let id = self.run(&["rev-parse", revision])?.trim().to_string();
        if !is_sha_hex(&id) {
            bail!("`git rev-parse {revision}` produced `{id}`, not an object id");
        }
        Ok(id)
    }

    /// Whether `object` (a commit or tree id) exists locally.
    pub fn has_object(&self, object: &str) -> bool {
        self.run(&["cat-file", "-e", object]).is_ok()
    }

    /// The tree object id of `path` within `revision`, if present.
    pub fn tree_id(&self, revision: &str, path: &str) -> Result<Option<String>> {
        let listing = self.run(&["ls-tree", "-d", revision, "--", path])?;
        // Format: <mode> tree <sha>\t<path>
        for line in listing.lines() {
            let mut parts = line.split_whitespace();
            let _mode = parts.next();
            if parts.next() != Some("tree") {
                continue;
            }
            if let Some(sha) = parts.next() {
                if is_sha_hex(sha) {
                    return Ok(Some(sha.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// Read one blob, addressed as `<revision>:<path>` or a raw object id.
    pub fn show(&self, object: &str) -> Result<String> {
        self.run(&["show", object])
    }

    /// Whether `path` has uncommitted changes (staged or not).
    pub fn is_dirty(&self, path: &str) -> Result<bool> {
        let status = self.run(&["status", "--porcelain", "--", path])?;
        Ok(!status.trim().is_empty())
    }

    /// Relative paths of every file under `path` at `revision`.
    pub fn list_files(&self, revision: &str, path: &str) -> Result<Vec<String>> {
        let listing = self.run(&["ls-tree", "-r", "--name-only", revision, "--", path])?;
        Ok(listing.lines().map(str::to_string).collect())
    }

    /// Materialize the tree `tree_id` into `destination` by listing it and
    /// writing each blob. Works from bare caches; no worktree required.
    pub fn extract_tree(&self, tree_id: &str, destination: &Path) -> Result<()> {
        if !is_sha_hex(tree_id) {
            bail!("`{tree_id}` is not a git tree id");
        }
        let listing = self.run(&["ls-tree", "-r", tree_id])?;
        crate::common::fs::create_dir_all(destination)?;
        for line in listing.lines() {
            // Format: <mode> blob <sha>\t<relative-path>
            let (meta, relative) = line
                .split_once('\t')
                .context(format!("unexpected ls-tree output line `{line}`"))?;
            let mut parts = meta.split_whitespace();
            let _mode = parts.next();
            let kind = parts.next().unwrap_or_default();
            let sha = parts.next().unwrap_or_default();
            if kind != "blob" {
                continue;
            }
            let contents = self.run_bytes(&["cat-file", "blob", sha])?;
            let target = destination.join(relative);
            if let Some(parent) = target.parent() {
                crate::common::fs::create_dir_all(parent)?;
            }
            crate::common::fs::write(&target, contents)?;
        }
        Ok(())
    }

    /// The tree id of `ports/<name>` (or any directory) at `revision`,
    /// as the version database records it.
    pub fn port_tree_id(&self, revision: &str, port_directory: &str) -> Result<Option<String>> {
        self.tree_id(revision, port_directory)
    }
}
