//! The install executor: drives an action plan against the installed
//! tree, restoring from the binary cache where possible and building
//! through the external build driver otherwise.
//!
//! Execution is sequential by design; every action mutates the shared
//! installed tree. Partial failure is the norm: with `KeepGoing::Yes` a
//! failed build marks its dependents cascaded and the plan continues,
//! and the per-action results are reported together at the end.

pub mod status;

use crate::cache::BinaryCache;
use crate::core::{PackageSpec, Version};
use crate::paths::Paths;
use crate::plan::{ActionPlan, InstallPlanAction};
use anyhow::{Context, Result};
use status::{StatusDb, StatusLine, StatusParagraph};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepGoing {
    Yes,
    No,
}

/// Outcome of one plan action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallResult {
    Succeeded,
    BuildFailed,
    PostBuildChecksFailed,
    FileConflicts,
    CascadedDueToMissingDependencies,
    Excluded,
    Downloaded,
    Removed,
}

impl InstallResult {
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            InstallResult::BuildFailed
                | InstallResult::PostBuildChecksFailed
                | InstallResult::FileConflicts
                | InstallResult::CascadedDueToMissingDependencies
        )
    }
}

impl Display for InstallResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = match self {
            InstallResult::Succeeded => "SUCCEEDED",
            InstallResult::BuildFailed => "BUILD_FAILED",
            InstallResult::PostBuildChecksFailed => "POST_BUILD_CHECKS_FAILED",
            InstallResult::FileConflicts => "FILE_CONFLICTS",
            InstallResult::CascadedDueToMissingDependencies => "CASCADED_DUE_TO_MISSING_DEPENDENCIES",
            InstallResult::Excluded => "EXCLUDED",
            InstallResult::Downloaded => "DOWNLOADED",
            InstallResult::Removed => "REMOVED",
        };
        write!(f, "{text}")
    }
}

/// What the external build driver reports back for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The package was staged into `packages/<spec>`.
    Succeeded,
    BuildFailed,
    PostBuildChecksFailed,
    /// Only-downloads mode: sources fetched, nothing built.
    Downloaded,
}

/// Captures build output per action, teeing it into `buildtrees`.
#[derive(Debug, Default)]
pub struct BuildLogsRecorder {
    lines: BTreeMap<PackageSpec, Vec<String>>,
}

impl BuildLogsRecorder {
    pub fn record(&mut self, spec: &PackageSpec, line: impl Into<String>) {
        self.lines.entry(spec.clone()).or_default().push(line.into());
    }

    pub fn lines_for(&self, spec: &PackageSpec) -> &[String] {
        self.lines.get(spec).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Persist the captured log under `buildtrees/<port>/`.
    pub fn flush(&self, paths: &Paths, spec: &PackageSpec) -> Result<()> {
        let Some(lines) = self.lines.get(spec) else {
            return Ok(());
        };
        let dir = paths.buildtrees().join(spec.name());
        crate::common::fs::create_dir_all(&dir)?;
        crate::common::fs::write(
            dir.join(format!("build-{}.log", spec.triplet())),
            lines.join("\n"),
        )
    }
}

/// The "run a build for this action" contract. The real driver invokes
/// CMake through the scripts tree; tests substitute their own.
pub trait BuildDriver {
    fn build(
        &mut self,
        action: &InstallPlanAction,
        paths: &Paths,
        recorder: &mut BuildLogsRecorder,
    ) -> Result<BuildOutcome>;
}

#[derive(Debug, Clone)]
pub struct SpecResult {
    pub spec: PackageSpec,
    pub result: InstallResult,
    pub elapsed: std::time::Duration,
}

/// Per-action results for the whole plan; the command layer decides the
/// exit code.
#[derive(Debug, Default)]
pub struct InstallSummary {
    pub results: Vec<SpecResult>,
}

impl InstallSummary {
    pub fn any_failure(&self) -> bool {
        self.results.iter().any(|r| r.result.is_failure())
    }

    pub fn count(&self, result: InstallResult) -> usize {
        self.results.iter().filter(|r| r.result == result).count()
    }
}

impl Display for InstallSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "RESULTS")?;
        for entry in &self.results {
            writeln!(
                f,
                "    {}: {} in {:.1}s",
                entry.spec,
                entry.result,
                entry.elapsed.as_secs_f64()
            )?;
        }
        Ok(())
    }
}

pub struct ExecuteOptions<'a> {
    pub keep_going: KeepGoing,
    /// Polled between actions; an in-flight build is never interrupted.
    pub cancel: Option<&'a AtomicBool>,
}

impl Default for ExecuteOptions<'_> {
    fn default() -> Self {
        ExecuteOptions {
            keep_going: KeepGoing::No,
            cancel: None,
        }
    }
}

/// Execute `plan`: removals first (dependents before dependencies), then
/// installs in plan order with restore-or-build per action. The status
/// database is rewritten atomically after every action, so a crash leaves
/// the last consistent state.
pub fn execute_plan(
    paths: &Paths,
    plan: &ActionPlan,
    cache: &mut BinaryCache,
    driver: &mut dyn BuildDriver,
    status_db: &mut StatusDb,
    options: &ExecuteOptions,
) -> Result<InstallSummary> {
    let mut summary = InstallSummary::default();
    let mut recorder = BuildLogsRecorder::default();

    for removal in &plan.remove_actions {
        let started = Instant::now();
        remove_package(paths, &removal.spec, status_db)
            .with_context(|| format!("while removing {}", removal.spec))?;
        summary.results.push(SpecResult {
            spec: removal.spec.clone(),
            result: InstallResult::Removed,
            elapsed: started.elapsed(),
        });
    }

    // Stale staging directories would make restores and builds ambiguous.
    for action in &plan.install_actions {
        let staging = paths.packages().join(action.spec.dir());
        if staging.exists() {
            crate::common::fs::remove_dir_all(&staging)?;
        }
    }

    let actions: Vec<&InstallPlanAction> = plan.install_actions.iter().collect();
    cache.fetch(&actions, &paths.packages());

    let mut failed_specs: BTreeSet<PackageSpec> = BTreeSet::new();
    for action in &plan.install_actions {
        if let Some(cancel) = options.cancel {
            if cancel.load(Ordering::SeqCst) {
                log::warn!("cancellation requested; stopping before {}", action.spec);
                break;
            }
        }

        let started = Instant::now();
        let result = execute_one(
            paths,
            action,
            cache,
            driver,
            status_db,
            &mut recorder,
            &failed_specs,
        )?;
        if result.is_failure() {
            failed_specs.insert(action.spec.clone());
        }
        summary.results.push(SpecResult {
            spec: action.spec.clone(),
            result,
            elapsed: started.elapsed(),
        });

        if result.is_failure() && options.keep_going == KeepGoing::No {
            break;
        }
    }
    Ok(summary)
}

fn execute_one(
    paths: &Paths,
    action: &InstallPlanAction,
    cache: &mut BinaryCache,
    driver: &mut dyn BuildDriver,
    status_db: &mut StatusDb,
    recorder: &mut BuildLogsRecorder,
    failed_specs: &BTreeSet<PackageSpec>,
) -> Result<InstallResult> {
    if action
        .package_dependencies
        .iter()
        .any(|dep| failed_specs.contains(dep))
    {
        return Ok(InstallResult::CascadedDueToMissingDependencies);
    }

    let restored = cache.is_restored(action);
    if !restored {
        log::info!("building {}", action.display_line());
        let outcome = driver
            .build(action, paths, recorder)
            .with_context(|| format!("while building {}", action.spec))?;
        recorder.flush(paths, &action.spec)?;
        match outcome {
            BuildOutcome::Succeeded => {}
            BuildOutcome::BuildFailed => return Ok(InstallResult::BuildFailed),
            BuildOutcome::PostBuildChecksFailed => {
                return Ok(InstallResult::PostBuildChecksFailed)
            }
            BuildOutcome::Downloaded => return Ok(InstallResult::Downloaded),
        }
    } else {
        log::info!("restored {} from the binary cache", action.display_line());
    }

    let package_dir = paths.packages().join(action.spec.dir());
    match install_package_files(paths, action, &package_dir, status_db)? {
        InstallResult::Succeeded => {}
        other => return Ok(other),
    }

    if !restored {
        cache.push(action, &package_dir);
    }

    record_installed(action, status_db);
    status_db.write(&paths.status_file())?;
    Ok(InstallResult::Succeeded)
}

/// Copy the staged package into the installed tree, honoring listfile
/// ownership: if any file is already owned by another spec the install
/// fails before a single file is copied.
fn install_package_files(
    paths: &Paths,
    action: &InstallPlanAction,
    package_dir: &Path,
    status_db: &StatusDb,
) -> Result<InstallResult> {
    let staged = collect_staged_files(package_dir)?;
    let owners = read_listfile_ownership(paths)?;
    let triplet_prefix = action.spec.triplet().canonical_name();

    for file in &staged {
        let installed_relative = format!("{triplet_prefix}/{file}");
        if let Some(owner) = owners.get(&installed_relative) {
            if owner != &action.spec && status_db.installed(owner).is_some() {
                log::error!(
                    "{} would overwrite '{}' owned by {owner}",
                    action.spec,
                    installed_relative
                );
                return Ok(InstallResult::FileConflicts);
            }
        }
    }

    let destination = paths.installed().join(triplet_prefix);
    crate::common::fs::copy_dir_recursive(package_dir, &destination)?;

    let listfile_lines: Vec<String> = staged
        .iter()
        .map(|file| format!("{triplet_prefix}/{file}"))
        .collect();
    crate::common::fs::create_dir_all(paths.listfile_dir())?;
    crate::common::fs::write(
        paths.listfile_dir().join(listfile_name(action)),
        listfile_lines.join("\n") + "\n",
    )?;
    Ok(InstallResult::Succeeded)
}

fn listfile_name(action: &InstallPlanAction) -> String {
    format!(
        "{}_{}_{}.list",
        action.spec.name(),
        action.scfl.version().version,
        action.spec.triplet()
    )
}

fn collect_staged_files(package_dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    if !package_dir.is_dir() {
        anyhow::bail!(
            "the build driver reported success but '{}' does not exist",
            package_dir.display()
        );
    }
    for entry in walkdir::WalkDir::new(package_dir).sort_by_file_name() {
        let entry = entry.context(format!("unable to walk '{}'", package_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(package_dir)
            .expect("walkdir yields children of its root")
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(relative);
    }
    Ok(files)
}

/// `installed-relative-path -> owning spec` over every list file.
fn read_listfile_ownership(paths: &Paths) -> Result<BTreeMap<String, PackageSpec>> {
    let mut owners = BTreeMap::new();
    let dir = paths.listfile_dir();
    if !dir.is_dir() {
        return Ok(owners);
    }
    for entry in std::fs::read_dir(&dir)
        .context(format!("unable to list '{}'", dir.display()))?
    {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let Some(stem) = file_name.strip_suffix(".list") else {
            continue;
        };
        // <name>_<version>_<triplet>.list
        let mut parts = stem.splitn(3, '_');
        let (Some(name), Some(_version), Some(triplet)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let spec = PackageSpec::new(name, crate::core::Triplet::from_canonical_name(triplet));
        let text = crate::common::fs::read_to_string(entry.path())?;
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            owners.insert(line.trim().to_string(), spec.clone());
        }
    }
    Ok(owners)
}

/// Delete an installed package's files (via its list file) and drop it
/// from the status database.
pub fn remove_package(paths: &Paths, spec: &PackageSpec, status_db: &mut StatusDb) -> Result<()> {
    let installed = status_db.installed(spec);
    if let Some(view) = installed {
        let listfile = paths.listfile_dir().join(format!(
            "{}_{}_{}.list",
            spec.name(),
            view.version,
            spec.triplet()
        ));
        if listfile.is_file() {
            let text = crate::common::fs::read_to_string(&listfile)?;
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                let target = paths.installed().join(line.trim());
                if target.is_file() {
                    crate::common::fs::remove_file(&target)?;
                }
            }
            crate::common::fs::remove_file(&listfile)?;
        }
    }
    status_db.remove_spec(spec);
    status_db.write(&paths.status_file())
}

/// Append the install to the status database: one core paragraph plus one
/// per activated feature.
fn record_installed(action: &InstallPlanAction, status_db: &mut StatusDb) {
    let depends: Vec<String> = action
        .package_dependencies
        .iter()
        .map(|dep| {
            if dep.triplet() == action.spec.triplet() {
                dep.name().to_string()
            } else {
                dep.to_string()
            }
        })
        .collect();
    status_db.insert(StatusParagraph {
        package: action.spec.name().to_string(),
        feature: None,
        version: action.scfl.version().version.clone(),
        triplet: action.spec.triplet().clone(),
        depends,
        default_features: action.scfl.scf.core.default_features.clone(),
        abi: action.package_abi().map(str::to_string),
        status: StatusLine::installed(),
    });
    for feature in &action.features {
        if feature == crate::core::CORE_FEATURE {
            continue;
        }
        status_db.insert(StatusParagraph {
            package: action.spec.name().to_string(),
            feature: Some(feature.clone()),
            version: Version::new("", 0),
            triplet: action.spec.triplet().clone(),
            depends: Vec::new(),
            default_features: Vec::new(),
            abi: None,
            status: StatusLine::installed(),
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::fs::{create_dir_all, write};
    use crate::plan::{BuildOptions, RequestType};
    use std::collections::BTreeSet as FeatureSet;
    use std::rc::Rc;

    struct ScriptedDriver {
        outcomes: BTreeMap<String, BuildOutcome>,
        built: Vec<String>,
    }

    impl ScriptedDriver {
        fn succeed_all() -> ScriptedDriver {
            ScriptedDriver {
                outcomes: BTreeMap::new(),
                built: Vec::new(),
            }
        }

        fn failing(name: &str) -> ScriptedDriver {
            ScriptedDriver {
                outcomes: BTreeMap::from([(name.to_string(), BuildOutcome::BuildFailed)]),
                built: Vec::new(),
            }
        }
    }

    impl BuildDriver for ScriptedDriver {
        fn build(
            &mut self,
            action: &InstallPlanAction,
            paths: &Paths,
            recorder: &mut BuildLogsRecorder,
        ) -> Result<BuildOutcome> {
            self.built.push(action.spec.name().to_string());
            recorder.record(&action.spec, format!("building {}", action.spec));
            let outcome = self
                .outcomes
                .get(action.spec.name())
                .copied()
                .unwrap_or(BuildOutcome::Succeeded);
            if outcome == BuildOutcome::Succeeded {
                let staging = paths.packages().join(action.spec.dir());
                create_dir_all(staging.join("include"))?;
                write(
                    staging.join("include").join(format!("{}.h", action.spec.name())),
                    "// built\n",
                )?;
            }
            Ok(outcome)
        }
    }

    fn make_action(dir: &Path, name: &str, deps: &[&str]) -> InstallPlanAction {
        let port_dir = dir.join("ports").join(name);
        create_dir_all(&port_dir).unwrap();
        write(
            port_dir.join("vcpkg.json"),
            format!(r#"{{ "name": "{name}", "version": "1.0" }}"#),
        )
        .unwrap();
        let mut diagnostics = crate::diagnostic::Diagnostics::new();
        let scf = crate::manifest::load_port_directory(&port_dir, &mut diagnostics).unwrap();
        let triplet = crate::core::Triplet::from_canonical_name("x64-linux");
        InstallPlanAction {
            spec: PackageSpec::new(name, triplet.clone()),
            scfl: Rc::new(crate::manifest::SourceControlFileAndLocation {
                scf,
                port_directory: port_dir,
                registry_origin: None,
            }),
            features: FeatureSet::from(["core".to_string()]),
            request_type: RequestType::UserRequested,
            build_options: BuildOptions::default(),
            feature_dependencies: Default::default(),
            package_dependencies: deps
                .iter()
                .map(|d| PackageSpec::new(*d, triplet.clone()))
                .collect(),
            abi_info: None,
        }
    }

    fn run(
        dir: &Path,
        plan: &ActionPlan,
        driver: &mut ScriptedDriver,
        keep_going: KeepGoing,
    ) -> (InstallSummary, StatusDb) {
        let paths = Paths::from_root(dir.join("root"));
        let mut cache = BinaryCache::default();
        let mut status_db = StatusDb::load(&paths.status_file()).unwrap();
        let summary = execute_plan(
            &paths,
            plan,
            &mut cache,
            driver,
            &mut status_db,
            &ExecuteOptions {
                keep_going,
                cancel: None,
            },
        )
        .unwrap();
        (summary, status_db)
    }

    #[test]
    fn successful_plan_installs_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let plan = ActionPlan {
            install_actions: vec![
                make_action(dir.path(), "bzip2", &[]),
                make_action(dir.path(), "zlib", &["bzip2"]),
            ],
            ..ActionPlan::default()
        };
        let mut driver = ScriptedDriver::succeed_all();
        let (summary, status_db) = run(dir.path(), &plan, &mut driver, KeepGoing::No);

        assert!(!summary.any_failure());
        assert_eq!(summary.count(InstallResult::Succeeded), 2);
        assert_eq!(driver.built, ["bzip2", "zlib"]);

        let triplet = crate::core::Triplet::from_canonical_name("x64-linux");
        let installed = status_db
            .installed(&PackageSpec::new("zlib", triplet.clone()))
            .unwrap();
        assert_eq!(installed.depends, [PackageSpec::new("bzip2", triplet)]);

        // The installed tree holds the staged files.
        let root = dir.path().join("root");
        assert!(root.join("installed/x64-linux/include/zlib.h").is_file());
        assert!(root
            .join("installed/vcpkg/info/zlib_1.0_x64-linux.list")
            .is_file());
    }

    #[test]
    fn failure_cascades_to_dependents_under_keep_going() {
        let dir = tempfile::tempdir().unwrap();
        let plan = ActionPlan {
            install_actions: vec![
                make_action(dir.path(), "bzip2", &[]),
                make_action(dir.path(), "zlib", &["bzip2"]),
                make_action(dir.path(), "curl", &[]),
            ],
            ..ActionPlan::default()
        };
        let mut driver = ScriptedDriver::failing("bzip2");
        let (summary, _) = run(dir.path(), &plan, &mut driver, KeepGoing::Yes);

        assert_eq!(summary.count(InstallResult::BuildFailed), 1);
        assert_eq!(summary.count(InstallResult::CascadedDueToMissingDependencies), 1);
        // Independent work continues under keep-going.
        assert_eq!(summary.count(InstallResult::Succeeded), 1);
        assert!(driver.built.contains(&"curl".to_string()));
        // The cascaded action never reached the driver.
        assert!(!driver.built.contains(&"zlib".to_string()));
    }

    #[test]
    fn failure_stops_the_plan_without_keep_going() {
        let dir = tempfile::tempdir().unwrap();
        let plan = ActionPlan {
            install_actions: vec![
                make_action(dir.path(), "bzip2", &[]),
                make_action(dir.path(), "curl", &[]),
            ],
            ..ActionPlan::default()
        };
        let mut driver = ScriptedDriver::failing("bzip2");
        let (summary, _) = run(dir.path(), &plan, &mut driver, KeepGoing::No);
        assert_eq!(summary.results.len(), 1);
        assert!(summary.any_failure());
    }

    #[test]
    fn remove_then_reinstall_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let plan = ActionPlan {
            install_actions: vec![make_action(dir.path(), "zlib", &[])],
            ..ActionPlan::default()
        };
        let mut driver = ScriptedDriver::succeed_all();
        let (_, _) = run(dir.path(), &plan, &mut driver, KeepGoing::No);

        let paths = Paths::from_root(dir.path().join("root"));
        let mut status_db = StatusDb::load(&paths.status_file()).unwrap();
        let spec = PackageSpec::new("zlib", crate::core::Triplet::from_canonical_name("x64-linux"));
        assert!(status_db.installed(&spec).is_some());

        remove_package(&paths, &spec, &mut status_db).unwrap();
        assert!(status_db.installed(&spec).is_none());
        assert!(!paths.root().join("installed/x64-linux/include/zlib.h").exists());

        let reloaded = StatusDb::load(&paths.status_file()).unwrap();
        assert!(reloaded.installed(&spec).is_none());
    }

    #[test]
    fn restored_actions_skip_the_driver() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::from_root(dir.path().join("root"));

        // Prime a files cache with the artifact for this action's ABI.
        let mut action = make_action(dir.path(), "zlib", &[]);
        action.abi_info = Some(crate::abi::AbiInfo {
            package_abi: "feedfacefeedface".to_string(),
            triplet_abi: String::new(),
            abi_entries: Vec::new(),
        });
        let cache_root = dir.path().join("cache");
        let provider = crate::cache::FilesCacheProvider::new(&cache_root);
        let artifact = tempfile::tempdir().unwrap();
        create_dir_all(artifact.path().join("include")).unwrap();
        write(artifact.path().join("include/zlib.h"), "// cached\n").unwrap();
        crate::cache::BinaryCacheProvider::push(&provider, "feedfacefeedface", artifact.path())
            .unwrap();

        let plan = ActionPlan {
            install_actions: vec![action],
            ..ActionPlan::default()
        };
        let mut cache = BinaryCache::new(vec![Box::new(provider)]);
        let mut driver = ScriptedDriver::succeed_all();
        let mut status_db = StatusDb::default();
        let summary = execute_plan(
            &paths,
            &plan,
            &mut cache,
            &mut driver,
            &mut status_db,
            &ExecuteOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.count(InstallResult::Succeeded), 1);
        assert!(driver.built.is_empty());
        assert_eq!(
            crate::common::fs::read_to_string(
                paths.root().join("installed/x64-linux/include/zlib.h")
            )
            .unwrap(),
            "// cached\n"
        );
    }
}
