//! `portsys x-ci-verify-versions`: validate version databases, baselines,
//! and (optionally) historical git trees against the local ports tree.

use crate::cmd::TreeArgs;
use crate::verify::{verify_versions, VerifyOptions};
use anyhow::Result;
use clap::Parser;

#[derive(Debug, Parser)]
pub struct CiVerifyVersions {
    #[clap(flatten)]
    pub tree: TreeArgs,

    /// Ports to verify; all of them when omitted.
    pub packages: Vec<String>,

    /// Also open every historical database entry and verify the metadata
    /// inside the recorded git tree.
    #[clap(long = "verify-git-trees")]
    pub verify_git_trees: bool,
}

impl CiVerifyVersions {
    pub fn run(&self) -> Result<()> {
        let paths = self.tree.paths()?;
        let report = verify_versions(
            &paths,
            &self.packages,
            VerifyOptions {
                verify_git_trees: self.verify_git_trees,
            },
        )?;
        // Everything is reported together; the exit code reflects whether
        // any check failed.
        report.into_result(())?;
        log::info!("version database checks passed");
        Ok(())
    }
}
