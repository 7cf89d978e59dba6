//! The artifact-identity (ABI) engine.
//!
//! Every install action gets a SHA-256 digest over everything that could
//! change its build output: the port's files, the activated features, the
//! triplet and compiler, the helper scripts the portfile uses, tracked
//! environment variables, and the ABIs of every dependency. Equal digests
//! under equal external inputs produce byte-equivalent binaries, which is
//! what makes the binary cache content-addressed.

use crate::core::{PackageSpec, Triplet, CORE_FEATURE, DEFAULT_FEATURE};
use crate::install::status::StatusDb;
use crate::paths::Paths;
use crate::plan::ActionPlan;
use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Bumped whenever the post-build lint changes behavior, so cached
/// binaries from older lint rules are not reused.
const POST_BUILD_CHECKS_VERSION: &str = "2";

/// Port directories beyond this size suggest vendored sources; hashing
/// them all is correct but worth a warning.
const HASH_MANY_FILES_THRESHOLD: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiEntry {
    pub key: String,
    pub value: String,
}

impl AbiEntry {
    fn new(key: impl Into<String>, value: impl Into<String>) -> AbiEntry {
        AbiEntry {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The computed identity of one install action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiInfo {
    /// SHA-256 over the sorted entry list; the binary cache key.
    pub package_abi: String,
    pub triplet_abi: String,
    /// Every input folded into `package_abi`, for forensic diffing.
    pub abi_entries: Vec<AbiEntry>,
}

/// Per-triplet inputs that come from outside the core: the toolchain
/// probe's compiler hash and the settings read out of the triplet file.
#[derive(Debug, Clone, Default)]
pub struct PreBuildInfo {
    pub public_abi_override: Option<String>,
    pub passthrough_env_vars_tracked: Vec<String>,
    pub target_is_xbox: bool,
    /// Location of `grdk.h` when targeting xbox.
    pub grdk_header: Option<PathBuf>,
}

/// External inputs shared by every action in a plan.
#[derive(Debug, Default)]
pub struct AbiContext {
    pub cmake_version: String,
    /// Present only on Windows hosts.
    pub powershell_version: Option<String>,
    /// Extra triplet directories (overlays), searched before the builtin
    /// trees.
    pub triplet_overlay_dirs: Vec<PathBuf>,
    /// Compiler hash per triplet, from the external toolchain probe.
    pub compiler_hashes: BTreeMap<String, String>,
    /// Triplet-file-derived settings per triplet.
    pub pre_build_infos: BTreeMap<String, PreBuildInfo>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stream a file into the hasher; large archives never land in memory.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).context(format!("unable to open '{}' for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .context(format!("unable to read '{}' for hashing", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compute and attach an [`AbiInfo`] to every install action, in plan
/// order (earlier ABIs feed later dependency entries). Actions built with
/// `--head`, `--editable`, or only-downloads are skipped and left without
/// ABI, which also disables binary caching for them.
pub fn compute_abis(
    plan: &mut ActionPlan,
    context: &AbiContext,
    paths: &Paths,
    status_db: &StatusDb,
) -> Result<()> {
    let common = common_entries(context, paths)?;
    let helper_hashes = cmake_script_hashes(&paths.helper_scripts())?;
    let mut triplet_abis: BTreeMap<String, String> = BTreeMap::new();

    for index in 0..plan.install_actions.len() {
        let action = &plan.install_actions[index];
        if action.build_options.only_downloads
            || action.build_options.use_head_version
            || action.build_options.editable
        {
            log::debug!(
                "skipping ABI for {}: not eligible for binary caching",
                action.spec
            );
            continue;
        }

        let dependency_abis =
            dependency_abis(&plan.install_actions[..index], &plan.install_actions[index], status_db)?;

        let action = &plan.install_actions[index];
        let triplet_abi =
            triplet_abi(&mut triplet_abis, context, paths, action.spec.triplet())?;

        let mut entries = common.clone();
        entries.push(AbiEntry::new("triplet_abi", triplet_abi.clone()));
        entries.extend(dependency_abis);

        let pre_build = context
            .pre_build_infos
            .get(action.spec.triplet().canonical_name());
        if let Some(pre_build) = pre_build {
            entries.extend(pre_build_entries(pre_build)?);
        }

        let (file_entries, portfile_cmake_contents) =
            port_file_entries(&action.scfl.port_directory, action.spec.name())?;
        entries.extend(file_entries);

        // A helper script participates when its stem appears anywhere in
        // the portfile's cmake text, case-insensitively.
        let cmake_contents_lower = portfile_cmake_contents.to_ascii_lowercase();
        for (stem, hash) in &helper_hashes {
            if cmake_contents_lower.contains(&stem.to_ascii_lowercase()) {
                entries.push(AbiEntry::new(stem.clone(), hash.clone()));
            }
        }

        entries.push(features_entry(action)?);

        entries.sort_by(|a, b| a.key.cmp(&b.key).then(a.value.cmp(&b.value)));

        let mut tag_text = String::new();
        for entry in &entries {
            tag_text.push_str(&entry.key);
            tag_text.push(' ');
            tag_text.push_str(&entry.value);
            tag_text.push('\n');
        }
        let package_abi = sha256_hex(tag_text.as_bytes());

        write_forensic_file(paths, &plan.install_actions[index].spec, &tag_text)?;

        plan.install_actions[index].abi_info = Some(AbiInfo {
            package_abi,
            triplet_abi,
            abi_entries: entries,
        });
    }
    Ok(())
}

fn common_entries(context: &AbiContext, paths: &Paths) -> Result<Vec<AbiEntry>> {
    let mut entries = vec![
        AbiEntry::new("cmake", context.cmake_version.clone()),
        AbiEntry::new("post_build_checks", POST_BUILD_CHECKS_VERSION),
    ];
    let ports_cmake = paths.ports_cmake();
    if ports_cmake.is_file() {
        entries.push(AbiEntry::new("ports.cmake", file_sha256(&ports_cmake)?));
    }
    if let Some(powershell) = &context.powershell_version {
        entries.push(AbiEntry::new("powershell", powershell.clone()));
    }
    Ok(entries)
}

/// `(stem, digest)` for every helper under `scripts/cmake`.
fn cmake_script_hashes(dir: &Path) -> Result<Vec<(String, String)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut helpers = Vec::new();
    for entry in std::fs::read_dir(dir)
        .context(format!("unable to list helper scripts in '{}'", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        helpers.push((stem.to_string(), file_sha256(&path)?));
    }
    helpers.sort();
    Ok(helpers)
}

/// The triplet's contribution: a digest over the resolved triplet file
/// plus the compiler hash the toolchain probe reported for it.
fn triplet_abi(
    cache: &mut BTreeMap<String, String>,
    context: &AbiContext,
    paths: &Paths,
    triplet: &Triplet,
) -> Result<String> {
    if let Some(existing) = cache.get(triplet.canonical_name()) {
        return Ok(existing.clone());
    }
    let triplet_file = paths
        .find_triplet_file(triplet.canonical_name(), &context.triplet_overlay_dirs)
        .with_context(|| format!("no triplet file found for `{triplet}`"))?;
    let mut hasher = Sha256::new();
    hasher.update(file_sha256(&triplet_file)?.as_bytes());
    if let Some(compiler_hash) = context.compiler_hashes.get(triplet.canonical_name()) {
        hasher.update(compiler_hash.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    cache.insert(triplet.canonical_name().to_string(), digest.clone());
    Ok(digest)
}

fn pre_build_entries(pre_build: &PreBuildInfo) -> Result<Vec<AbiEntry>> {
    let mut entries = Vec::new();
    if let Some(override_text) = &pre_build.public_abi_override {
        entries.push(AbiEntry::new(
            "public_abi_override",
            sha256_hex(override_text.as_bytes()),
        ));
    }
    for env_var in &pre_build.passthrough_env_vars_tracked {
        if let Ok(value) = std::env::var(env_var) {
            entries.push(AbiEntry::new(
                format!("ENV:{env_var}"),
                sha256_hex(value.as_bytes()),
            ));
        }
    }
    if pre_build.target_is_xbox {
        let header = pre_build
            .grdk_header
            .as_ref()
            .context("targeting xbox requires a grdk.h location")?;
        entries.push(AbiEntry::new("grdk.h", file_sha256(header)?));
    }
    Ok(entries)
}

/// Hash every file in the port directory (in parallel), returning the
/// entries plus the concatenated text of the `.cmake` files for helper
/// detection.
fn port_file_entries(port_directory: &Path, port_name: &str) -> Result<(Vec<AbiEntry>, String)> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in walkdir::WalkDir::new(port_directory).sort_by_file_name() {
        let entry =
            entry.context(format!("unable to walk '{}'", port_directory.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name() == ".DS_Store" {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(port_directory)
            .expect("walkdir yields children of its root")
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, entry.path().to_path_buf()));
    }

    if files.len() > HASH_MANY_FILES_THRESHOLD {
        log::warn!(
            "hashing {} files for {port_name}; consider moving large assets out of the port \
             directory",
            files.len()
        );
    }

    let digests = hash_files_parallel(&files)?;

    let mut entries = Vec::with_capacity(files.len());
    let mut cmake_contents = String::new();
    for ((relative, path), digest) in files.iter().zip(digests) {
        if relative.ends_with(".cmake") {
            cmake_contents.push_str(&crate::common::fs::read_to_string(path)?);
        }
        entries.push(AbiEntry::new(relative.clone(), digest));
    }
    Ok((entries, cmake_contents))
}

/// Bounded worker threads over the materialized file list; order of
/// results matches the input order.
fn hash_files_parallel(files: &[(String, PathBuf)]) -> Result<Vec<String>> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(files.len().max(1))
        .min(8);
    if workers <= 1 {
        return files.iter().map(|(_, path)| file_sha256(path)).collect();
    }

    let next = std::sync::atomic::AtomicUsize::new(0);
    let results: Vec<std::sync::Mutex<Option<Result<String>>>> =
        files.iter().map(|_| std::sync::Mutex::new(None)).collect();
    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                let Some((_, path)) = files.get(index) else {
                    break;
                };
                *results[index].lock().expect("hash worker poisoned") =
                    Some(file_sha256(path));
            });
        }
    });
    results
        .into_iter()
        .map(|slot| {
            slot.into_inner()
                .expect("hash worker poisoned")
                .expect("every index was visited")
        })
        .collect()
}

/// The `features` entry: the sorted activated set, which must contain
/// `core` and must never contain the pseudo-feature `default` (feature
/// normalization happens before planning).
fn features_entry(action: &crate::plan::InstallPlanAction) -> Result<AbiEntry> {
    if action.features.contains(DEFAULT_FEATURE) {
        bail!(
            "internal error: unexpanded `default` feature reached ABI computation for {}",
            action.spec
        );
    }
    if !action.features.contains(CORE_FEATURE) {
        bail!(
            "internal error: feature set of {} lost its `core` member",
            action.spec
        );
    }
    let features: Vec<&str> = action.features.iter().map(String::as_str).collect();
    Ok(AbiEntry::new("features", features.join(";")))
}

/// A dependency's ABI comes from the earlier plan action that provides it
/// or, when the dependency stays installed, from the status database. A
/// dependency with no discoverable ABI poisons the cache key and is
/// fatal.
fn dependency_abis(
    earlier_actions: &[crate::plan::InstallPlanAction],
    action: &crate::plan::InstallPlanAction,
    status_db: &StatusDb,
) -> Result<Vec<AbiEntry>> {
    let mut entries = Vec::new();
    for dep in &action.package_dependencies {
        if dep == &action.spec {
            continue;
        }
        let from_plan = earlier_actions
            .iter()
            .find(|earlier| &earlier.spec == dep)
            .map(|earlier| earlier.package_abi());
        let abi = match from_plan {
            Some(Some(abi)) => abi.to_string(),
            Some(None) => bail!(
                "dependency {dep} of {} has no computed ABI (head or editable builds poison \
                 dependent cache keys)",
                action.spec
            ),
            None => match status_db.installed(dep).and_then(|view| view.abi) {
                Some(abi) => abi,
                None => bail!(
                    "unable to find the dependency ABI for {} -> {dep}",
                    action.spec
                ),
            },
        };
        entries.push(AbiEntry::new(dep.name().to_string(), abi));
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

/// Persist the entry list next to the build tree for forensic diffing of
/// two ABIs.
fn write_forensic_file(paths: &Paths, spec: &PackageSpec, tag_text: &str) -> Result<()> {
    let dir = paths.buildtrees().join(spec.name());
    crate::common::fs::create_dir_all(&dir)?;
    crate::common::fs::write(
        dir.join(format!("{}.vcpkg_abi_info.txt", spec.triplet())),
        tag_text,
    )
}
