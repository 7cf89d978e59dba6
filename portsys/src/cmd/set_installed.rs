//! `portsys set-installed`: make the installed tree exactly the closure
//! of the named packages, removing everything else.

use crate::abi;
use crate::cmd::install::{
    binary_cache_from_env, default_abi_context, ExternalBuildDriver,
};
use crate::cmd::TreeArgs;
use crate::common::lock::WorkspaceLock;
use crate::core::{FullPackageSpec, PackageSpec};
use crate::install::status::StatusDb;
use crate::install::{execute_plan, ExecuteOptions, KeepGoing};
use crate::plan::resolve::remove_plan_for_unreferenced;
use crate::plan::{
    create_feature_install_plan, ElisionMode, PlanOptions, SimpleTripletVarProvider,
    UnsupportedPortAction,
};
use crate::provider::PortFileProvider;
use anyhow::{bail, Result};
use clap::Parser;
use std::collections::BTreeSet;

#[derive(Debug, Parser)]
pub struct SetInstalled {
    #[clap(flatten)]
    pub tree: TreeArgs,

    /// The packages (and their closures) that should remain installed.
    #[clap(required = true)]
    pub packages: Vec<String>,

    #[clap(long = "dry-run")]
    pub dry_run: bool,

    #[clap(long = "keep-going")]
    pub keep_going: bool,

    #[clap(long = "allow-unsupported")]
    pub allow_unsupported: bool,

    /// The external build driver.
    #[clap(long = "x-builder", env = "PORTSYS_BUILD_DRIVER")]
    pub builder: Option<String>,
}

impl SetInstalled {
    pub fn run(&self) -> Result<()> {
        let paths = self.tree.paths()?;
        let target = self.tree.target_triplet();
        let host = self.tree.host_triplet();
        let (registry_config, registries, overlays) = super::provider_stack(&self.tree, &paths)?;
        let provider = PortFileProvider::new(&overlays, &registries);
        let mut var_provider =
            SimpleTripletVarProvider::new(self.tree.triplet_dirs(&paths, &registry_config));

        let roots = self
            .packages
            .iter()
            .map(|text| FullPackageSpec::parse(text, &target).map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>>>()?;

        let options = PlanOptions {
            unsupported_port_action: if self.allow_unsupported {
                UnsupportedPortAction::Warn
            } else {
                UnsupportedPortAction::Error
            },
            ..PlanOptions::new(host)
        };
        let mut plan =
            create_feature_install_plan(&provider, &mut var_provider, &roots, &[], &options)?;

        let mut status_db = StatusDb::load(&paths.status_file())?;

        // Everything installed but outside the desired closure goes.
        let desired: BTreeSet<PackageSpec> = plan
            .install_actions
            .iter()
            .map(|action| action.spec.clone())
            .collect();
        plan.remove_actions = remove_plan_for_unreferenced(&status_db, &desired);

        let abi_context = default_abi_context(&self.tree, &paths, &registry_config);
        match abi::compute_abis(&mut plan, &abi_context, &paths, &status_db) {
            Ok(()) => plan.elide_already_installed(&status_db, ElisionMode::RequireAbiMatch),
            Err(e) => {
                log::warn!("ABI computation unavailable ({e:#}); falling back to version checks");
                plan.elide_already_installed(&status_db, ElisionMode::VersionAndFeatures);
            }
        }

        for removal in &plan.remove_actions {
            println!("  remove  {} ({})", removal.spec, removal.reason);
        }
        for action in &plan.install_actions {
            println!("  install {}", action.display_line());
        }
        if self.dry_run {
            return Ok(());
        }
        if plan.is_empty() {
            log::info!("the installed tree already matches");
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
