//! `portsys x-lint`: check port metadata beyond what loading enforces,
//! and optionally rewrite what can be fixed mechanically.
//!
//! Loading validates syntax; the lint pass additionally flags deprecated
//! SPDX license identifiers and, with `--fix`, rewrites the manifest with
//! the normalized expression.

use crate::cmd::TreeArgs;
use crate::diagnostic::Diagnostics;
use crate::manifest::{self, json, license};
use anyhow::{bail, Result};
use clap::Parser;
use std::path::Path;

#[derive(Debug, Parser)]
pub struct Lint {
    #[clap(flatten)]
    pub tree: TreeArgs,

    /// Ports to lint; all of them when omitted.
    pub packages: Vec<String>,

    /// Rewrite manifests whose problems have a mechanical fix.
    #[clap(long)]
    pub fix: bool,
}

impl Lint {
    pub fn run(&self) -> Result<()> {
        let paths = self.tree.paths()?;

        let names: Vec<String> = if self.packages.is_empty() {
            let mut all = Vec::new();
            crate::registry::builtin::append_port_directory_names(
                &paths.builtin_ports(),
                &mut all,
            )?;
            all.sort();
            all
        } else {
            self.packages.clone()
        };

        let mut diagnostics = Diagnostics::new();
        let mut fixed = 0usize;
        for name in &names {
            if lint_port_directory(&paths.builtin_ports().join(name), self.fix, &mut diagnostics)? {
                fixed += 1;
            }
        }

        let findings = diagnostics.records().len();
        for record in diagnostics.records() {
            println!("{record}");
        }
        if fixed != 0 {
            log::info!("rewrote {fixed} manifest(s)");
        }
        if findings == 0 {
            log::info!("no lint findings in {} port(s)", names.len());
        } else if !self.fix {
            bail!("{findings} lint finding(s); re-run with --fix to apply the mechanical fixes");
        }
        Ok(())
    }
}

/// Lint one port directory, appending findings to `diagnostics`. Returns
/// whether the manifest was rewritten.
pub(crate) fn lint_port_directory(
    port_directory: &Path,
    fix: bool,
    diagnostics: &mut Diagnostics,
) -> Result<bool> {
    let origin = port_directory.display().to_string();
    let Some(mut scf) = manifest::load_port_directory(port_directory, diagnostics) else {
        return Ok(false);
    };

    let Some(license_text) = scf.core.license.clone() else {
        return Ok(false);
    };
    let (normalized, rewrites) = license::normalize(&license_text);
    if rewrites.is_empty() {
        return Ok(false);
    }
    for (deprecated, replacement) in &rewrites {
        diagnostics.warning(
            origin.clone(),
            format!(
                "license of `{}` uses the deprecated SPDX identifier `{deprecated}`; \
                 use `{replacement}`",
                scf.core.name
            ),
        );
    }

    let manifest_path = port_directory.join(manifest::MANIFEST_FILENAME);
    if !fix {
        return Ok(false);
    }
    if !manifest_path.is_file() {
        // CONTROL ports have no license field to rewrite.
        diagnostics.warning(
            origin,
            format!("`{}` is a CONTROL port; fix its metadata by hand", scf.core.name),
        );
        return Ok(false);
    }

    scf.core.license = Some(normalized);
    let mut text = serde_json::to_string_pretty(&json::serialize_manifest(&scf))
        .expect("a source control file serializes to valid json");
    text.push('\n');
    crate::common::fs::write(&manifest_path, text)?;
    Ok(true)
}
