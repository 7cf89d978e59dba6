//! The command line surface. Each subcommand lives in its own module and
//! carries its own clap derive struct; shared plumbing for resolving the
//! root, triplets, registries and overlays lives here.

mod add_version;
mod ci;
mod depend_info;
mod install;
mod lint;
mod list;
mod remove;
mod set_installed;
mod verify_versions;

use crate::diagnostic::Diagnostics;
use crate::paths::Paths;
use crate::provider::OverlayProvider;
use crate::registry::{config, RegistryConfig, RegistrySet};
use anyhow::Result;
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;
use std::path::PathBuf;

const DEFAULT_LEVEL_FILTER: LevelFilter = LevelFilter::Info;

/// A source-based C/C++ port package manager engine.
#[derive(Debug, Parser)]
#[clap(about, long_about = None, version)]
pub struct Args {
    /// Set the logging level. One of [off|error|warn|info|debug|trace].
    /// You can also leave this unset and use the RUST_LOG env variable.
    #[clap(long = "log-level")]
    pub log_level: Option<LevelFilter>,

    #[clap(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Debug, Parser)]
pub enum Subcommand {
    Install(install::Install),

    Remove(remove::Remove),

    List(list::List),

    /// Show the dependency closure of the given ports.
    DependInfo(depend_info::DependInfo),

    /// Make the installed tree exactly match a set of packages.
    SetInstalled(set_installed::SetInstalled),

    /// Build every port for a triplet and compare against the CI baseline.
    Ci(ci::Ci),

    /// Validate the version database against the local ports tree.
    #[clap(name = "x-ci-verify-versions")]
    CiVerifyVersions(verify_versions::CiVerifyVersions),

    /// Check port metadata for problems loading does not reject, such as
    /// deprecated SPDX license identifiers.
    #[clap(name = "x-lint")]
    Lint(lint::Lint),

    /// Record the current version of a port in the version database.
    #[clap(name = "x-add-version")]
    AddVersion(add_version::AddVersion),
}

/// Entrypoint for the `portsys` command line program.
pub fn run(args: Args) -> Result<()> {
    match args.subcommand {
        Subcommand::Install(cmd) => cmd.run(),
        Subcommand::Remove(cmd) => cmd.run(),
        Subcommand::List(cmd) => cmd.run(),
        Subcommand::DependInfo(cmd) => cmd.run(),
        Subcommand::SetInstalled(cmd) => cmd.run(),
        Subcommand::Ci(cmd) => cmd.run(),
        Subcommand::CiVerifyVersions(cmd) => cmd.run(),
        Subcommand::Lint(cmd) => cmd.run(),
        Subcommand::AddVersion(cmd) => cmd.run(),
    }
}

/// Use `level` if present, or else use `RUST_LOG` if present, or else use
/// a default.
pub fn init_logger(level: Option<LevelFilter>) {
    match (std::env::var(env_logger::DEFAULT_FILTER_ENV).ok(), level) {
        (Some(_), None) => {
            // RUST_LOG exists and level does not; use the environment variable.
            Builder::from_default_env().init();
        }
        _ => {
            // Use provided log level or default for this crate only.
            Builder::new()
                .filter(
                    Some(env!("CARGO_CRATE_NAME")),
                    level.unwrap_or(DEFAULT_LEVEL_FILTER),
                )
                .init();
        }
    }
}

/// Arguments shared by every command that touches a ports tree.
#[derive(Debug, Clone, Parser)]
pub struct TreeArgs {
    /// The root directory of the ports tree.
    #[clap(long = "vcpkg-root", env = "VCPKG_ROOT")]
    pub vcpkg_root: Option<PathBuf>,

    /// The target triplet.
    #[clap(long, env = "VCPKG_DEFAULT_TRIPLET")]
    pub triplet: Option<String>,

    /// The host triplet.
    #[clap(long = "host-triplet", env = "VCPKG_DEFAULT_HOST_TRIPLET")]
    pub host_triplet: Option<String>,

    /// Additional directories searched for ports before any registry.
    #[clap(long = "overlay-ports")]
    pub overlay_ports: Vec<PathBuf>,

    /// Additional directories searched for triplet files.
    #[clap(long = "overlay-triplets")]
    pub overlay_triplets: Vec<PathBuf>,
}

impl TreeArgs {
    pub fn paths(&self) -> Result<Paths> {
        Paths::discover(self.vcpkg_root.clone())
    }

    /// The triplet native to the machine the tool runs on.
    fn native_triplet() -> &'static str {
        if cfg!(windows) {
            "x64-windows"
        } else if cfg!(target_os = "macos") {
            if cfg!(target_arch = "aarch64") {
                "arm64-osx"
            } else {
                "x64-osx"
            }
        } else if cfg!(target_arch = "aarch64") {
            "arm64-linux"
        } else {
            "x64-linux"
        }
    }

    pub fn target_triplet(&self) -> crate::core::Triplet {
        crate::core::Triplet::from_canonical_name(
            self.triplet.as_deref().unwrap_or_else(|| Self::native_triplet()),
        )
    }

    pub fn host_triplet(&self) -> crate::core::Triplet {
        crate::core::Triplet::from_canonical_name(
            self.host_triplet
                .as_deref()
                .unwrap_or_else(|| Self::native_triplet()),
        )
    }

    /// Overlay port directories: command line first, then the
    /// `VCPKG_OVERLAY_PORTS` list, then the configuration file's.
    pub fn overlay_dirs(&self, config: &RegistryConfig) -> Vec<PathBuf> {
        let mut dirs = self.overlay_ports.clone();
        if let Ok(env_list) = std::env::var("VCPKG_OVERLAY_PORTS") {
            dirs.extend(split_path_list(&env_list));
        }
        dirs.extend(config.overlay_ports.iter().cloned());
        dirs
    }

    /// Triplet overlay directories, same precedence as ports.
    pub fn triplet_dirs(&self, paths: &Paths, config: &RegistryConfig) -> Vec<PathBuf> {
        let mut dirs = self.overlay_triplets.clone();
        if let Ok(env_list) = std::env::var("VCPKG_OVERLAY_TRIPLETS") {
            dirs.extend(split_path_list(&env_list));
        }
        dirs.extend(config.overlay_triplets.iter().cloned());
        dirs.push(paths.triplets());
        dirs.push(paths.community_triplets());
        dirs
    }
}

fn split_path_list(list: &str) -> Vec<PathBuf> {
    let separator = if cfg!(windows) { ';' } else { ':' };
    list.split(separator)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Load `vcpkg-configuration.json` from the root, or fall back to the
/// implicit classic-mode configuration.
pub fn load_registry_config(paths: &Paths) -> Result<RegistryConfig> {
    let path = paths.root().join("vcpkg-configuration.json");
    if !path.is_file() {
        return Ok(RegistryConfig::default());
    }
    let text = crate::common::fs::read_to_string(&path)?;
    let mut diagnostics = Diagnostics::new();
    let parsed = config::parse_configuration(
        &text,
        &path.display().to_string(),
        paths.root(),
        &mut diagnostics,
    );
    diagnostics
        .into_result(parsed)
        .map(Option::unwrap_or_default)
}

/// Build the registry set plus the overlay provider for a command.
pub fn provider_stack(
    tree: &TreeArgs,
    paths: &Paths,
) -> Result<(RegistryConfig, RegistrySet, OverlayProvider)> {
    let registry_config = load_registry_config(paths)?;
    let registries = config::instantiate(&registry_config, paths);
    let overlays = OverlayProvider::new(tree.overlay_dirs(&registry_config));
    Ok((registry_config, registries, overlays))
}
