//! `portsys list`: render the installed set from the status database.

use crate::cmd::TreeArgs;
use crate::install::status::StatusDb;
use anyhow::Result;
use clap::Parser;

#[derive(Debug, Parser)]
pub struct List {
    #[clap(flatten)]
    pub tree: TreeArgs,

    /// Only list packages whose name contains this text.
    pub filter: Option<String>,

    /// Do not truncate long descriptions.
    #[clap(long = "x-full-desc")]
    pub full_desc: bool,
}

impl List {
    pub fn run(&self) -> Result<()> {
        let paths = self.tree.paths()?;
        let status_db = StatusDb::load(&paths.status_file())?;

        let mut printed_any = false;
        for view in status_db.installed_packages() {
            if let Some(filter) = &self.filter {
                if !view.spec.name().contains(filter.as_str()) {
                    continue;
                }
            }
            printed_any = true;
            println!("{:<40} {}", view.spec.to_string(), view.version);
            for feature in &view.features {
                if feature != crate::core::CORE_FEATURE {
                    println!("{:<40}", format!("  {}[{}]", view.spec.name(), feature));
                }
            }
        }
        if !printed_any {
            println!("No packages are installed.");
        }
        Ok(())
    }
}
