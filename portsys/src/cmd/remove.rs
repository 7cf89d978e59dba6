//! `portsys remove`: take installed packages (and, with `--recurse`,
//! their dependents) out of the installed tree.

use crate::cmd::TreeArgs;
use crate::common::lock::WorkspaceLock;
use crate::core::{FullPackageSpec, PackageSpec};
use crate::install::status::StatusDb;
use crate::plan::{order_removals, RemovePlanAction, RemoveReason};
use anyhow::{bail, Result};
use clap::Parser;
use std::collections::BTreeSet;

#[derive(Debug, Parser)]
pub struct Remove {
    #[clap(flatten)]
    pub tree: TreeArgs,

    /// Packages to remove, as `name:triplet`.
    #[clap(required = true)]
    pub packages: Vec<String>,

    /// Also remove installed packages that depend on the named ones.
    #[clap(long)]
    pub recurse: bool,

    /// Print the removals without executing them.
    #[clap(long = "dry-run")]
    pub dry_run: bool,
}

impl Remove {
    pub fn run(&self) -> Result<()> {
        let paths = self.tree.paths()?;
        let target = self.tree.target_triplet();
        let mut status_db = StatusDb::load(&paths.status_file())?;

        let mut requested: BTreeSet<PackageSpec> = BTreeSet::new();
        for text in &self.packages {
            let parsed = FullPackageSpec::parse(text, &target).map_err(anyhow::Error::msg)?;
            if !parsed.features.is_empty() {
                bail!("feature lists are not allowed when removing ({text})");
            }
            if status_db.installed(&parsed.spec).is_none() {
                bail!("{} is not installed", parsed.spec);
            }
            requested.insert(parsed.spec);
        }

        // Dependents must leave too; without --recurse their existence is
        // an error rather than a surprise removal.
        let back_edges = status_db.back_edges();
        let mut closure = requested.clone();
        let mut queue: Vec<PackageSpec> = requested.iter().cloned().collect();
        while let Some(spec) = queue.pop() {
            for dependent in back_edges.get(&spec).into_iter().flatten() {
                if closure.insert(dependent.clone()) {
                    queue.push(dependent.clone());
                }
            }
        }
        let dependents: Vec<&PackageSpec> = closure.difference(&requested).collect();
        if !dependents.is_empty() && !self.recurse {
            bail!(
                "the following installed packages depend on what you are removing; \
                 re-run with --recurse to remove them too: {}",
                dependents
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let mut removals: Vec<RemovePlanAction> = closure
            .iter()
            .map(|spec| RemovePlanAction {
                spec: spec.clone(),
                reason: if requested.contains(spec) {
                    RemoveReason::UserRequested
                } else {
                    RemoveReason::NotDesired
                },
            })
            .collect();
        order_removals(&mut removals, &status_db);

        for removal in &removals {
            println!("  remove {} ({})", removal.spec, removal.reason);
        }
        if self.dry_run {
            return Ok(());
        }

        let _lock = WorkspaceLock::acquire(&paths.installed_vcpkg())?;
        for removal in &removals {
            crate::install::remove_package(&paths, &removal.spec, &mut status_db)?;
            log::info!("removed {}", removal.spec);
        }
        Ok(())
    }
}
