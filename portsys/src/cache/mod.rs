//! The binary cache: content-addressed storage of built packages keyed by
//! package ABI.
//!
//! Providers are the one user-pluggable seam in the engine, so they sit
//! behind a trait. The cache tracks a [`CacheStatus`] state machine per
//! `(action, provider)` pair:
//!
//! ```text
//!             +------ mark_unavailable -------+
//!             |                               v
//! Start --> Unknown --precheck-> Available --restore-> Restored
//!             |         ^           |
//!             |         +--unavail--+
//!             v
//!         Unavailable (terminal)
//! ```

pub mod feedref;
pub mod files;

use crate::plan::InstallPlanAction;
use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub use feedref::{format_version_for_feedref, make_feedref, FeedReference};
pub use files::FilesCacheProvider;

/// A provider's answer to "do you have this ABI?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAvailability {
    Unknown,
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ProviderState {
    #[default]
    Unknown,
    Available,
    /// Terminal; the provider will not be asked again.
    Unavailable,
}

/// Per-action view over every provider's state plus whether a restore
/// has succeeded.
#[derive(Debug, Clone, Default)]
pub struct CacheStatus {
    providers: Vec<ProviderState>,
    restored_from: Option<usize>,
}

impl CacheStatus {
    fn ensure(&mut self, provider: usize) -> &mut ProviderState {
        if self.providers.len() <= provider {
            self.providers.resize(provider + 1, ProviderState::Unknown);
        }
        &mut self.providers[provider]
    }

    fn state(&self, provider: usize) -> ProviderState {
        self.providers
            .get(provider)
            .copied()
            .unwrap_or(ProviderState::Unknown)
    }

    pub fn should_attempt_precheck(&self, provider: usize) -> bool {
        self.state(provider) == ProviderState::Unknown && !self.is_restored()
    }

    pub fn should_attempt_restore(&self, provider: usize) -> bool {
        !self.is_restored()
            && matches!(
                self.state(provider),
                ProviderState::Unknown | ProviderState::Available
            )
    }

    pub fn is_unavailable(&self, provider: usize) -> bool {
        self.state(provider) == ProviderState::Unavailable
    }

    pub fn is_restored(&self) -> bool {
        self.restored_from.is_some()
    }

    /// The first provider known to hold the artifact.
    pub fn get_available_provider(&self) -> Option<usize> {
        self.providers
            .iter()
            .position(|state| *state == ProviderState::Available)
    }

    pub fn mark_available(&mut self, provider: usize) {
        let state = self.ensure(provider);
        if *state == ProviderState::Unknown {
            *state = ProviderState::Available;
        }
    }

    pub fn mark_unavailable(&mut self, provider: usize) {
        *self.ensure(provider) = ProviderState::Unavailable;
    }

    pub fn mark_restored(&mut self, provider: usize) {
        self.mark_available(provider);
        self.restored_from = Some(provider);
    }
}

/// A backend that can hold built packages. Transports (HTTP, NuGet
/// feeds, blob stores) live outside the core; the in-tree `files`
/// provider covers the local-directory case.
pub trait BinaryCacheProvider {
    fn name(&self) -> &str;

    /// Whether this provider accepts uploads.
    fn can_push(&self) -> bool {
        true
    }

    /// Answer availability for a batch of ABIs. Must return one answer
    /// per input, in order, and must not touch the installed tree.
    fn precheck(&self, abis: &[&str]) -> Vec<CacheAvailability>;

    /// Materialize the package for `abi` into `destination`.
    fn try_restore(&self, abi: &str, destination: &Path) -> Result<()>;

    /// Offer a built package for upload.
    fn push(&self, abi: &str, package_dir: &Path) -> Result<()>;
}

/// The orchestrator the install executor talks to.
#[derive(Default)]
pub struct BinaryCache {
    providers: Vec<Box<dyn BinaryCacheProvider>>,
    statuses: HashMap<String, CacheStatus>,
}

impl BinaryCache {
    pub fn new(providers: Vec<Box<dyn BinaryCacheProvider>>) -> BinaryCache {
        BinaryCache {
            providers,
            statuses: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.providers.is_empty()
    }

    pub fn status(&self, abi: &str) -> Option<&CacheStatus> {
        self.statuses.get(abi)
    }

    fn status_mut(&mut self, abi: &str) -> &mut CacheStatus {
        self.statuses.entry(abi.to_string()).or_default()
    }

    /// Query availability for every action that has an ABI. Returns one
    /// aggregate answer per input action. Providers only see the ABIs
    /// they have not already answered for.
    pub fn precheck(&mut self, actions: &[&InstallPlanAction]) -> Vec<CacheAvailability> {
        for provider_index in 0..self.providers.len() {
            let wanted: Vec<String> = actions
                .iter()
                .filter_map(|action| action.package_abi())
                .filter(|abi| self.status_mut(abi).should_attempt_precheck(provider_index))
                .map(str::to_string)
                .collect();
            if wanted.is_empty() {
                continue;
            }
            let refs: Vec<&str> = wanted.iter().map(String::as_str).collect();
            let answers = self.providers[provider_index].precheck(&refs);
            debug_assert_eq!(answers.len(), refs.len());
            for (abi, answer) in wanted.iter().zip(answers) {
                match answer {
                    CacheAvailability::Available => {
                        self.status_mut(abi).mark_available(provider_index)
                    }
                    CacheAvailability::Unavailable => {
                        self.status_mut(abi).mark_unavailable(provider_index)
                    }
                    CacheAvailability::Unknown => {}
                }
            }
        }

        actions
            .iter()
            .map(|action| match action.package_abi() {
                None => CacheAvailability::Unavailable,
                Some(abi) => match self.statuses.get(abi) {
                    Some(status) if status.get_available_provider().is_some() => {
                        CacheAvailability::Available
                    }
                    Some(status)
                        if (0..self.providers.len()).all(|p| status.is_unavailable(p)) =>
                    {
                        CacheAvailability::Unavailable
                    }
                    _ => CacheAvailability::Unknown,
                },
            })
            .collect()
    }

    /// Attempt to restore every action into its staging directory under
    /// `packages_dir`. Failures demote the provider for that ABI and fall
    /// through to the next one; a fully failed restore just means the
    /// package gets built.
    pub fn fetch(&mut self, actions: &[&InstallPlanAction], packages_dir: &Path) {
        let abis: Vec<(String, std::path::PathBuf)> = actions
            .iter()
            .filter_map(|action| {
                action
                    .package_abi()
                    .map(|abi| (abi.to_string(), packages_dir.join(action.spec.dir())))
            })
            .collect();
        for (abi, destination) in abis {
            for provider_index in 0..self.providers.len() {
                if !self.status_mut(&abi).should_attempt_restore(provider_index) {
                    continue;
                }
                match self.providers[provider_index].try_restore(&abi, &destination) {
                    Ok(()) => {
                        log::debug!(
                            "restored {abi} from {}",
                            self.providers[provider_index].name()
                        );
                        self.status_mut(&abi).mark_restored(provider_index);
                        break;
                    }
                    Err(e) => {
                        log::debug!(
                            "provider {} could not restore {abi}: {e:#}",
                            self.providers[provider_index].name()
                        );
                        self.status_mut(&abi).mark_unavailable(provider_index);
                    }
                }
            }
        }
    }

    pub fn is_restored(&self, action: &InstallPlanAction) -> bool {
        action
            .package_abi()
            .and_then(|abi| self.statuses.get(abi))
            .map(CacheStatus::is_restored)
            .unwrap_or(false)
    }

    /// Offer a freshly built package to every upload-capable provider.
    /// Upload failures are non-fatal.
    pub fn push(&mut self, action: &InstallPlanAction, package_dir: &Path) {
        let Some(abi) = action.package_abi() else {
            return;
        };
        for provider in &self.providers {
            if !provider.can_push() {
                continue;
            }
            if let Err(e) = provider.push(abi, package_dir) {
                log::warn!(
                    "provider {} failed to store {abi}: {e:#}",
                    provider.name()
                );
            }
        }
    }
}

/// Parse the `VCPKG_BINARY_SOURCES` configuration string: `;`-separated
/// segments, each `clear`, `default[,<rw>]`, or `files,<path>[,<rw>]`
/// where `<rw>` is `read`, `write`, or `readwrite` (read is the
/// default). Transports beyond `files` are external and are skipped with
/// a warning.
pub fn parse_binary_sources(config: &str) -> Result<BinaryCache> {
    let mut providers: Vec<Box<dyn BinaryCacheProvider>> = Vec::new();
    for segment in config.split(';').filter(|s| !s.is_empty()) {
        let mut fields = segment.split(',');
        let kind = fields.next().unwrap_or_default();
        match kind {
            "clear" => providers.clear(),
            "default" => {
                let rw = fields.next().unwrap_or("readwrite");
                providers.push(files_provider(default_archives_dir()?, rw)?);
            }
            "files" => {
                let path = fields
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("`files` requires a path argument"))?;
                let rw = fields.next().unwrap_or("read");
                providers.push(files_provider(path.into(), rw)?);
            }
            other => {
                log::warn!("binary source `{other}` requires an external transport; skipping it");
            }
        }
    }
    Ok(BinaryCache::new(providers))
}

fn files_provider(
    root: std::path::PathBuf,
    rw: &str,
) -> Result<Box<dyn BinaryCacheProvider>> {
    match rw {
        "read" => Ok(Box::new(files::FilesCacheProvider::readonly(root))),
        "write" | "readwrite" => Ok(Box::new(files::FilesCacheProvider::new(root))),
        other => anyhow::bail!("`{other}` is not a cache mode; expected read, write, or readwrite"),
    }
}

fn default_archives_dir() -> Result<std::path::PathBuf> {
    if let Ok(dir) = std::env::var("VCPKG_DEFAULT_BINARY_CACHE") {
        return Ok(dir.into());
    }
    let base = if cfg!(windows) {
        std::env::var_os("LOCALAPPDATA").map(std::path::PathBuf::from)
    } else {
        std::env::var_os("XDG_CACHE_HOME")
            .map(std::path::PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|home| std::path::PathBuf::from(home).join(".cache"))
            })
    };
    base.map(|dir| dir.join("vcpkg").join("archives"))
        .ok_or_else(|| anyhow::anyhow!("unable to determine the default binary cache location"))
}

/// Coordination between the executor and asynchronous cache uploads:
/// plain atomic counters, no locks.
#[derive(Debug, Default)]
pub struct BinaryCacheSynchronizer {
    jobs_submitted: AtomicUsize,
    jobs_completed: AtomicUsize,
    submission_complete: AtomicBool,
}

impl BinaryCacheSynchronizer {
    pub fn add_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn submission_complete(&self) -> bool {
        self.submission_complete.load(Ordering::SeqCst)
    }

    /// Mark that no further jobs will be submitted and return how many
    /// submitted jobs have not completed yet; the executor waits for that
    /// many completions before finishing.
    pub fn fetch_incomplete_mark_submission_complete(&self) -> usize {
        self.submission_complete.store(true, Ordering::SeqCst);
        self.jobs_submitted
            .load(Ordering::SeqCst)
            .saturating_sub(self.jobs_completed.load(Ordering::SeqCst))
    }
}
