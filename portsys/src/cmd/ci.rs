//! `portsys ci`: build every port for a triplet, honoring the CI
//! baseline, and report regressions against it.

use crate::abi;
use crate::cache::CacheAvailability;
use crate::ci_baseline::{
    apply_ci_baseline, format_ci_result, parse_ci_baseline, CiBaselineState, SkipFailures,
};
use crate::cmd::install::{binary_cache_from_env, default_abi_context, ExternalBuildDriver};
use crate::cmd::TreeArgs;
use crate::common::lock::WorkspaceLock;
use crate::core::{FullPackageSpec, PackageSpec, Triplet};
use crate::diagnostic::Diagnostics;
use crate::install::status::StatusDb;
use crate::install::{execute_plan, ExecuteOptions, InstallResult, KeepGoing};
use crate::plan::{
    create_feature_install_plan, ElisionMode, PlanOptions, SimpleTripletVarProvider,
    UnsupportedPortAction,
};
use crate::provider::PortFileProvider;
use anyhow::{bail, Result};
use clap::Parser;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Debug, Parser)]
pub struct Ci {
    #[clap(flatten)]
    pub tree: TreeArgs,

    /// The CI baseline file declaring expected failures and skips.
    #[clap(long = "ci-baseline")]
    pub baseline: Option<PathBuf>,

    /// Triplets excluded from this run; baseline entries for them are
    /// ignored.
    #[clap(long = "exclude")]
    pub exclude: Vec<String>,

    /// Skip ports the baseline marks as failing instead of building them.
    #[clap(long = "skip-failures")]
    pub skip_failures: bool,

    /// Only report what the binary cache already holds; build nothing.
    #[clap(long = "dry-run")]
    pub dry_run: bool,

    /// The external build driver.
    #[clap(long = "x-builder", env = "PORTSYS_BUILD_DRIVER")]
    pub builder: Option<String>,
}

impl Ci {
    pub fn run(&self) -> Result<()> {
        let paths = self.tree.paths()?;
        let target = self.tree.target_triplet();
        let host = self.tree.host_triplet();
        let (registry_config, registries, overlays) = super::provider_stack(&self.tree, &paths)?;
        let provider = PortFileProvider::new(&overlays, &registries);
        let mut var_provider =
            SimpleTripletVarProvider::new(self.tree.triplet_dirs(&paths, &registry_config));

        let baseline_states = self.load_baseline(&target)?;

        // Roots: every known port for the target triplet, minus skips.
        let mut all_ports = registries.all_port_names()?;
        all_ports.retain(|name| {
            !baseline_states
                .skipped
                .contains(&PackageSpec::new(name.clone(), target.clone()))
        });
        let roots: Vec<FullPackageSpec> = all_ports
            .iter()
            .map(|name| {
                FullPackageSpec::new(PackageSpec::new(name.clone(), target.clone()), Vec::new())
            })
            .collect();

        let options = PlanOptions {
            unsupported_port_action: UnsupportedPortAction::Warn,
            ..PlanOptions::new(host)
        };
        let mut plan =
            create_feature_install_plan(&provider, &mut var_provider, &roots, &[], &options)?;

        let mut status_db = StatusDb::load(&paths.status_file())?;
        let abi_context = default_abi_context(&self.tree, &paths, &registry_config);
        abi::compute_abis(&mut plan, &abi_context, &paths, &status_db)?;
        plan.elide_already_installed(&status_db, ElisionMode::RequireAbiMatch);

        let mut cache = binary_cache_from_env()?;
        let actions: Vec<&crate::plan::InstallPlanAction> = plan.install_actions.iter().collect();
        let availability = cache.precheck(&actions);
        let prebuilt = availability
            .iter()
            .filter(|a| **a == CacheAvailability::Available)
            .count();
        log::info!(
            "{} of {} planned packages are already in the binary cache",
            prebuilt,
            plan.install_actions.len()
        );
        if self.dry_run {
            for (action, availability) in plan.install_actions.iter().zip(&availability) {
                println!("  {:<12} {}", format!("{availability:?}"), action.display_line());
            }
            return Ok(());
        }

        let _lock = WorkspaceLock::acquire(&paths.installed_vcpkg())?;
        let mut driver = ExternalBuildDriver::new(self.builder.clone());
        let summary = execute_plan(
            &paths,
            &plan,
            &mut cache,
            &mut driver,
            &mut status_db,
            &ExecuteOptions {
                keep_going: KeepGoing::Yes,
                cancel: None,
            },
        )?;
        print!("{summary}");

        // Compare every outcome against the baseline's expectations.
        let mut findings = Vec::new();
        for entry in &summary.results {
            if entry.result == InstallResult::Removed {
                continue;
            }
            let expected = baseline_states.states.get(&entry.spec).copied();
            if let Some(finding) = format_ci_result(&entry.spec, expected, entry.result) {
                findings.push(finding);
            }
        }
        for finding in &findings {
            println!("{finding}");
        }
        if findings.iter().any(|f| f.starts_with("REGRESSION")) {
            bail!("the CI run regressed against the baseline");
        }
        Ok(())
    }

    fn load_baseline(&self, target: &Triplet) -> Result<LoadedBaseline> {
        let Some(path) = &self.baseline else {
            return Ok(LoadedBaseline::default());
        };
        let text = crate::common::fs::read_to_string(path)?;
        let mut diagnostics = Diagnostics::new();
        let lines = parse_ci_baseline(&text, &path.display().to_string(), &mut diagnostics);
        let lines = diagnostics.into_result(lines)?;

        let excluded: BTreeSet<Triplet> = self
            .exclude
            .iter()
            .map(|name| Triplet::from_canonical_name(name))
            .collect();
        let applied = apply_ci_baseline(
            &lines,
            &excluded,
            if self.skip_failures {
                SkipFailures::Yes
            } else {
                SkipFailures::No
            },
        );

        let mut states = BTreeMap::new();
        for line in &lines {
            if line.triplet == *target {
                states.insert(
                    PackageSpec::new(line.port.clone(), line.triplet.clone()),
                    line.state,
                );
            }
        }
        Ok(LoadedBaseline {
            skipped: applied.skipped,
            states,
        })
    }
}

#[derive(Debug, Default)]
struct LoadedBaseline {
    skipped: BTreeSet<PackageSpec>,
    states: BTreeMap<PackageSpec, CiBaselineState>,
}
