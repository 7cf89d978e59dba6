//! Git-backed registries: the builtin registry pinned to a commit of the
//! root repository, and external registries fetched from a remote URL
//! into a local cache. Both read the baseline, version databases, and
//! port trees out of git objects at the pinned baseline commit.

use super::versiondb::{self, VersionDbKind};
use super::{EntryBackend, RegistryEntry};
use crate::core::Version;
use crate::diagnostic::Diagnostics;
use crate::git::GitRepo;
use anyhow::{Context, Result};
use std::cell::{Cell, OnceCell};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug)]
pub struct GitRegistry {
    repo: GitRepo,
    /// `None` for the builtin registry; its objects are already local.
    url: Option<String>,
    reference: Option<String>,
    baseline_commit: String,
    /// Where extracted port trees are materialized, shared per root.
    work_dir: PathBuf,
    fetched: Cell<bool>,
    baseline: OnceCell<BTreeMap<String, Version>>,
}

impl GitRegistry {
    /// An external registry fetched from `url` into the cache repository
    /// at `cache_dir`.
    pub fn remote(
        cache_dir: impl Into<PathBuf>,
        url: impl Into<String>,
        reference: Option<String>,
        baseline_commit: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> GitRegistry {
        GitRegistry {
            repo: GitRepo::at(cache_dir),
            url: Some(url.into()),
            reference,
            baseline_commit: baseline_commit.into(),
            work_dir: work_dir.into(),
            fetched: Cell::new(false),
            baseline: OnceCell::new(),
        }
    }

    /// The builtin registry: the root checkout itself at a pinned commit.
    pub fn builtin(
        root_repo: impl Into<PathBuf>,
        baseline_commit: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> GitRegistry {
        GitRegistry {
            repo: GitRepo::at(root_repo),
            url: None,
            reference: None,
            baseline_commit: baseline_commit.into(),
            work_dir: work_dir.into(),
            fetched: Cell::new(false),
            baseline: OnceCell::new(),
        }
    }

    fn origin(&self) -> &str {
        self.url.as_deref().unwrap_or("builtin registry")
    }

    /// Make sure the baseline commit is present locally, fetching from the
    /// remote when necessary. A stale cache that knows the reference but
    /// not the commit triggers one full refetch.
    fn ensure_commit(&self) -> Result<()> {
        if self.fetched.get() {
            return Ok(());
        }
        if !self.repo.has_object(&self.baseline_commit) {
            let url = self.url.as_deref().with_context(|| {
                format!(
                    "baseline commit {} is not present in the local repository",
                    self.baseline_commit
                )
            })?;
            self.repo.init()?;
            self.repo.fetch(url, self.reference.as_deref())?;
            if !self.repo.has_object(&self.baseline_commit) {
                // The pinned commit may predate the current reference tip.
                self.repo.fetch(url, None)?;
            }
            if !self.repo.has_object(&self.baseline_commit) {
                anyhow::bail!(
                    "baseline commit {} was not found in {url}",
                    self.baseline_commit
                );
            }
        }
        self.fetched.set(true);
        Ok(())
    }

    fn read_file(&self, relative: &str) -> Result<Option<String>> {
        match self.repo.show(&format!("{}:{relative}", self.baseline_commit)) {
            Ok(text) => Ok(Some(text)),
            Err(_) => Ok(None),
        }
    }

    fn baseline(&self) -> Result<&BTreeMap<String, Version>> {
        if self.baseline.get().is_none() {
            self.ensure_commit()?;
            let origin = format!("{}:versions/baseline.json", self.origin());
            let text = self
                .read_file("versions/baseline.json")?
                .with_context(|| format!("{origin} does not exist at the baseline commit"))?;
            let mut diagnostics = Diagnostics::new();
            let parsed = versiondb::parse_baseline(&text, &origin, "default", &mut diagnostics);
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
        self.ensure_commit()?;
        let relative = versiondb::version_db_relative_path(name);
        let Some(text) = self.read_file(&relative)? else {
            return Ok(None);
        };
        let origin = format!("{}:{relative}", self.origin());
        let mut diagnostics = Diagnostics::new();
        let entries =
            versiondb::parse_version_db(&text, &origin, VersionDbKind::Git, &mut diagnostics);
        let entries = diagnostics
            .into_result(entries)?
            .context("version database did not parse")?;
        Ok(Some(RegistryEntry {
            port_name: name.to_string(),
            versions: entries,
            backend: EntryBackend::Git {
                repo: self.repo.clone(),
                work_dir: self.work_dir.clone(),
                origin: self.origin().to_string(),
            },
        }))
    }

    fn enumerate(&self, out: &mut Vec<String>) -> Result<()> {
        for file in self.repo.list_files(&self.baseline_commit, "versions")? {
            if let Some(name) = file
                .rsplit('/')
                .next()
                .and_then(|base| base.strip_suffix(".json"))
            {
                if name != "baseline" {
                    out.push(name.to_string());
                }
            }
        }
        Ok(())
    }

    pub fn append_all_port_names(&self, out: &mut Vec<String>) -> Result<()> {
        self.ensure_commit()?;
        self.enumerate(out)
    }

    /// Enumerate without fetching; false when the baseline commit is not
    /// yet local, meaning the answer would need the network.
    pub fn try_append_all_port_names_no_network(&self, out: &mut Vec<String>) -> Result<bool> {
        if !self.fetched.get() && !self.repo.has_object(&self.baseline_commit) {
            return Ok(false);
        }
        self.enumerate(out)?;
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::fs::{create_dir_all, write};
    use duct::cmd;
    use std::path::Path;

    fn git_available() -> bool {
        cmd("git", ["--version"])
            .stdout_capture()
            .stderr_capture()
            .run()
            .is_ok()
    }

    fn run_git(dir: &Path, args: &[&str]) {
        let mut full = vec![
            "-C",
            dir.to_str().unwrap(),
            "-c",
            "user.email=test@example.com",
            "-c",
            "user.name=test",
        ];
        full.extend_from_slice(args);
        cmd("git", full).stdout_capture().stderr_capture().run().unwrap();
    }

    /// A one-port registry repository with a real version database whose
    /// git-tree points at the committed port directory.
    fn build_registry_repo(dir: &Path) -> String {
        run_git(dir, &["init", "--quiet"]);
        create_dir_all(dir.join("ports/zlib")).unwrap();
        write(
            dir.join("ports/zlib/vcpkg.json"),
            r#"{ "name": "zlib", "version": "1.2.13" }"#,
        )
        .unwrap();
        run_git(dir, &["add", "-A"]);
        run_git(dir, &["commit", "--quiet", "-m", "add zlib"]);

        let repo = GitRepo::at(dir);
        let head = repo.rev_parse("HEAD").unwrap();
        let tree = repo.tree_id(&head, "ports/zlib").unwrap().unwrap();

        create_dir_all(dir.join("versions/z-")).unwrap();
        write(
            dir.join("versions/baseline.json"),
            r#"{ "default": { "zlib": { "baseline": "1.2.13", "port-version": 0 } } }"#,
        )
        .unwrap();
        write(
            dir.join("versions/z-/zlib.json"),
            format!(r#"{{ "versions": [ {{ "git-tree": "{tree}", "version": "1.2.13" }} ] }}"#),
        )
        .unwrap();
        run_git(dir, &["add", "-A"]);
        run_git(dir, &["commit", "--quiet", "-m", "version db"]);
        repo.rev_parse("HEAD").unwrap()
    }

    #[test]
    fn builtin_git_registry_reads_at_the_pinned_commit() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let baseline_commit = build_registry_repo(dir.path());
        let work = tempfile::tempdir().unwrap();
        let registry = GitRegistry::builtin(dir.path(), baseline_commit, work.path());

        assert_eq!(
            registry.get_baseline_version("zlib").unwrap(),
            Some(Version::new("1.2.13", 0))
        );
        let entry = registry.get_port_entry("zlib").unwrap().unwrap();
        let found = entry.get_version(&Version::new("1.2.13", 0)).unwrap();
        assert!(found.path.join("vcpkg.json").is_file());

        let mut names = Vec::new();
        assert!(registry
            .try_append_all_port_names_no_network(&mut names)
            .unwrap());
        assert_eq!(names, ["zlib"]);
    }

    #[test]
    fn remote_registry_fetches_into_its_cache() {
        if !git_available() {
            return;
        }
        let upstream = tempfile::tempdir().unwrap();
        let baseline_commit = build_registry_repo(upstream.path());

        let cache = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let registry = GitRegistry::remote(
            cache.path().join("reg"),
            upstream.path().to_str().unwrap(),
            None,
            baseline_commit,
            work.path(),
        );

        let mut names = Vec::new();
        // Nothing fetched yet, so the no-network answer is unknown.
        assert!(!registry
            .try_append_all_port_names_no_network(&mut names)
            .unwrap());

        assert_eq!(
            registry.get_baseline_version("zlib").unwrap(),
            Some(Version::new("1.2.13", 0))
        );
        let entry = registry.get_port_entry("zlib").unwrap().unwrap();
        let found = entry.get_version(&Version::new("1.2.13", 0)).unwrap();
        assert!(found.path.join("vcpkg.json").is_file());
    }
}
