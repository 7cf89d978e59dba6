//! `portsys install`: resolve, restore-or-build, and record packages.

use crate::abi::{self, AbiContext};
use crate::cache::{self, BinaryCache};
use crate::cmd::TreeArgs;
use crate::common::lock::WorkspaceLock;
use crate::core::{FullPackageSpec, PackageSpec, Triplet, CORE_FEATURE, DEFAULT_FEATURE};
use crate::diagnostic::Diagnostics;
use crate::install::{
    execute_plan, BuildDriver, BuildLogsRecorder, BuildOutcome, ExecuteOptions, KeepGoing,
};
use crate::install::status::StatusDb;
use crate::manifest::{self, DependencyOverride};
use crate::paths::Paths;
use crate::plan::{
    create_feature_install_plan, ActionPlan, BuildOptions, ElisionMode, InstallPlanAction,
    PlanOptions, SimpleTripletVarProvider, TripletVarProvider, UnsupportedPortAction,
};
use crate::provider::PortFileProvider;
use anyhow::{bail, Context, Result};
use clap::Parser;
use duct::cmd as duct_cmd;
use std::path::PathBuf;

#[derive(Debug, Parser)]
pub struct Install {
    #[clap(flatten)]
    pub tree: TreeArgs,

    /// Packages to install, as `name[features]:triplet`. With no
    /// packages, the manifest in the current directory drives the set.
    pub packages: Vec<String>,

    /// Print the plan without executing it.
    #[clap(long = "dry-run")]
    pub dry_run: bool,

    /// Continue past build failures and report everything at the end.
    #[clap(long = "keep-going")]
    pub keep_going: bool,

    /// Warn (instead of failing) for ports that do not support the
    /// target, and drop them from the plan.
    #[clap(long = "allow-unsupported")]
    pub allow_unsupported: bool,

    /// Install sources without building (disables binary caching).
    #[clap(long = "only-downloads")]
    pub only_downloads: bool,

    /// Build from HEAD instead of the pinned version (disables caching).
    #[clap(long = "head")]
    pub head: bool,

    /// Keep build trees editable (disables caching).
    #[clap(long)]
    pub editable: bool,

    /// The external build driver invoked per action as
    /// `<driver> <port> <triplet> <port-dir> <staging-dir>`.
    #[clap(long = "x-builder", env = "PORTSYS_BUILD_DRIVER")]
    pub builder: Option<String>,
}

impl Install {
    pub fn run(&self) -> Result<()> {
        let paths = self.tree.paths()?;
        let target = self.tree.target_triplet();
        let host = self.tree.host_triplet();
        let (registry_config, registries, overlays) = super::provider_stack(&self.tree, &paths)?;
        let provider = PortFileProvider::new(&overlays, &registries);
        let mut var_provider =
            SimpleTripletVarProvider::new(self.tree.triplet_dirs(&paths, &registry_config));

        let (roots, overrides) = resolve_roots(
            &self.packages,
            &target,
            &host,
            &mut var_provider,
        )?;
        if roots.is_empty() {
            bail!("nothing to install; name packages or run from a manifest directory");
        }

        let options = PlanOptions {
            host_triplet: host.clone(),
            unsupported_port_action: if self.allow_unsupported {
                UnsupportedPortAction::Warn
            } else {
                UnsupportedPortAction::Error
            },
            build_options: BuildOptions {
                only_downloads: self.only_downloads,
                use_head_version: self.head,
                editable: self.editable,
            },
            randomizer: None,
        };
        let mut plan =
            create_feature_install_plan(&provider, &mut var_provider, &roots, &overrides, &options)?;

        let mut status_db = StatusDb::load(&paths.status_file())?;
        let abi_context = default_abi_context(&self.tree, &paths, &registry_config);
        match abi::compute_abis(&mut plan, &abi_context, &paths, &status_db) {
            Ok(()) => plan.elide_already_installed(&status_db, ElisionMode::RequireAbiMatch),
            Err(e) => {
                log::warn!("ABI computation unavailable ({e:#}); falling back to version checks");
                plan.elide_already_installed(&status_db, ElisionMode::VersionAndFeatures);
            }
        }

        print_plan(&plan);
        if plan.is_empty() {
            log::info!("everything requested is already installed");
            return Ok(());
        }
        if self.dry_run {
            return Ok(());
        }

        let _lock = WorkspaceLock::acquire(&paths.installed_vcpkg())?;
        let mut cache = binary_cache_from_env()?;
        let mut driver = ExternalBuildDriver::new(self.builder.clone());
        let summary = execute_plan(
            &paths,
            &plan,
            &mut cache,
            &mut driver,
            &mut status_db,
            &ExecuteOptions {
                keep_going: if self.keep_going {
                    KeepGoing::Yes
                } else {
                    KeepGoing::No
                },
                cancel: None,
            },
        )?;
        print!("{summary}");
        if summary.any_failure() {
            bail!("one or more packages failed to install");
        }
        Ok(())
    }
}

/// Classic mode parses the positional specs; manifest mode turns the
/// current directory's manifest dependencies into roots and picks up its
/// overrides.
pub(crate) fn resolve_roots(
    packages: &[String],
    target: &Triplet,
    host: &Triplet,
    var_provider: &mut dyn TripletVarProvider,
) -> Result<(Vec<FullPackageSpec>, Vec<DependencyOverride>)> {
    if !packages.is_empty() {
        let roots = packages
            .iter()
            .map(|text| FullPackageSpec::parse(text, target).map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>>>()?;
        return Ok((roots, Vec::new()));
    }

    let manifest_dir = std::env::current_dir().context("unable to read the current directory")?;
    let manifest_path = manifest_dir.join(manifest::MANIFEST_FILENAME);
    if !manifest_path.is_file() {
        return Ok((Vec::new(), Vec::new()));
    }
    let text = crate::common::fs::read_to_string(&manifest_path)?;
    let mut diagnostics = Diagnostics::new();
    let scf = manifest::json::parse_manifest(
        &text,
        &manifest_path.display().to_string(),
        &mut diagnostics,
    );
    let scf = diagnostics
        .into_result(scf)?
        .context("the manifest did not parse")?;

    // The manifest behaves like a root port: platform-gated dependencies
    // are filtered against the target triplet before planning.
    let probe = PackageSpec::new(scf.core.name.clone(), target.clone());
    var_provider.load_dep_info_vars(std::slice::from_ref(&probe), host)?;
    let vars = var_provider
        .dep_info_vars(&probe)
        .context("no dep-info variables for the target triplet")?;

    let mut roots = Vec::new();
    for dependency in &scf.core.dependencies {
        if !dependency.platform.is_empty() && !dependency.platform.evaluate(&vars) {
            continue;
        }
        let triplet = if dependency.host { host } else { target };
        let mut features: Vec<String> = dependency
            .features
            .iter()
            .filter(|f| *f != CORE_FEATURE)
            .cloned()
            .collect();
        features.push(if dependency.wants_default_features() {
            DEFAULT_FEATURE.to_string()
        } else {
            CORE_FEATURE.to_string()
        });
        roots.push(FullPackageSpec::new(
            PackageSpec::new(dependency.name.clone(), triplet.clone()),
            features,
        ));
    }
    Ok((roots, scf.core.overrides.clone()))
}

pub(crate) fn binary_cache_from_env() -> Result<BinaryCache> {
    match std::env::var("VCPKG_BINARY_SOURCES") {
        Ok(config) => cache::parse_binary_sources(&config),
        Err(_) => Ok(BinaryCache::default()),
    }
}

/// ABI inputs that come from outside the resolver: the build driver's
/// version and the triplet overlay list.
pub(crate) fn default_abi_context(
    tree: &TreeArgs,
    paths: &Paths,
    registry_config: &crate::registry::RegistryConfig,
) -> AbiContext {
    AbiContext {
        cmake_version: probe_cmake_version(),
        powershell_version: None,
        triplet_overlay_dirs: tree.triplet_dirs(paths, registry_config),
        compiler_hashes: Default::default(),
        pre_build_infos: Default::default(),
    }
}

fn probe_cmake_version() -> String {
    duct_cmd("cmake", ["--version"])
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .ok()
        .and_then(|output| {
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(str::to_string)
        })
        .unwrap_or_else(|| "cmake-unavailable".to_string())
}

fn print_plan(plan: &ActionPlan) {
    for removal in &plan.remove_actions {
        println!("  remove  {} ({})", removal.spec, removal.reason);
    }
    for action in &plan.install_actions {
        let marker = match action.request_type {
            crate::plan::RequestType::UserRequested => "*",
            crate::plan::RequestType::AutoSelected => " ",
        };
        println!("  install {marker}{}", action.display_line());
    }
    for view in &plan.already_installed {
        println!("  ok      {} @ {}", view.spec, view.version);
    }
}

/// The out-of-process build driver contract: stage the package under
/// `packages/<spec>` and exit zero.
pub(crate) struct ExternalBuildDriver {
    command: Option<String>,
}

impl ExternalBuildDriver {
    pub(crate) fn new(command: Option<String>) -> ExternalBuildDriver {
        ExternalBuildDriver { command }
    }
}

impl BuildDriver for ExternalBuildDriver {
    fn build(
        &mut self,
        action: &InstallPlanAction,
        paths: &Paths,
        recorder: &mut BuildLogsRecorder,
    ) -> Result<BuildOutcome> {
        let Some(command) = &self.command else {
            bail!(
                "no build driver is configured; pass --x-builder or set PORTSYS_BUILD_DRIVER"
            );
        };
        let staging: PathBuf = paths.packages().join(action.spec.dir());
        crate::common::fs::create_dir_all(&staging)?;
        let port_dir = action.scfl.port_directory.display().to_string();
        let staging_dir = staging.display().to_string();
        let output = duct_cmd(
            command,
            [
                action.spec.name(),
                action.spec.triplet().canonical_name(),
                port_dir.as_str(),
                staging_dir.as_str(),
            ],
        )
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .with_context(|| format!("unable to launch the build driver `{command}`"))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            recorder.record(&action.spec, line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            recorder.record(&action.spec, line);
        }

        if output.status.success() {
            if action.build_options.only_downloads {
                Ok(BuildOutcome::Downloaded)
            } else {
                Ok(BuildOutcome::Succeeded)
            }
        } else {
            Ok(BuildOutcome::BuildFailed)
        }
    }
}
