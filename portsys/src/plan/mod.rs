//! Action plans: the ordered install and remove operations the executor
//! performs, and the resolver that computes them.

pub mod resolve;
pub mod vars;

use crate::abi::AbiInfo;
use crate::core::{FeatureSpec, PackageSpec};
use crate::install::status::{InstalledPackageView, StatusDb};
use crate::manifest::SourceControlFileAndLocation;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

pub use resolve::{create_feature_install_plan, PlanOptions};
pub use vars::{SimpleTripletVarProvider, StaticVarProvider, TripletVarProvider};

/// Whether an action exists because the user named it or because the
/// closure pulled it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    UserRequested,
    AutoSelected,
}

/// What to do with a port whose `supports` expression rejects the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedPortAction {
    /// Drop the port (and what only it required) with a warning.
    Warn,
    Error,
}

/// Per-action build options that feed the ABI skip conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub only_downloads: bool,
    pub use_head_version: bool,
    pub editable: bool,
}

/// One planned installation.
#[derive(Debug, Clone)]
pub struct InstallPlanAction {
    pub spec: PackageSpec,
    pub scfl: Rc<SourceControlFileAndLocation>,
    /// The activated feature set; always contains `core`, never `default`.
    pub features: BTreeSet<String>,
    pub request_type: RequestType,
    pub build_options: BuildOptions,
    /// Feature-level edges: for each activated feature, the feature specs
    /// it requires.
    pub feature_dependencies: BTreeMap<String, Vec<FeatureSpec>>,
    /// Spec-level edges, deduplicated, without self-edges.
    pub package_dependencies: Vec<PackageSpec>,
    /// Filled in by the ABI engine after planning.
    pub abi_info: Option<AbiInfo>,
}

impl InstallPlanAction {
    pub fn package_abi(&self) -> Option<&str> {
        self.abi_info.as_ref().map(|abi| abi.package_abi.as_str())
    }

    /// `zlib[core,extra]:x64-linux @ 1.2.13`
    pub fn display_line(&self) -> String {
        format!(
            "{}[{}]:{} @ {}",
            self.spec.name(),
            self.features.iter().cloned().collect::<Vec<_>>().join(","),
            self.spec.triplet(),
            self.scfl.version().version
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    /// No longer part of the desired install set.
    NotDesired,
    /// Will be reinstalled because its version, features, or ABI changed.
    Outdated,
    /// The user asked for its removal.
    UserRequested,
}

impl Display for RemoveReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RemoveReason::NotDesired => write!(f, "no longer requested"),
            RemoveReason::Outdated => write!(f, "outdated"),
            RemoveReason::UserRequested => write!(f, "requested"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovePlanAction {
    pub spec: PackageSpec,
    pub reason: RemoveReason,
}

/// The resolver's product: removals in reverse-topological order (so
/// dependents leave first), installs in topological order, and the
/// installed packages the plan leaves untouched.
#[derive(Debug, Default)]
pub struct ActionPlan {
    pub remove_actions: Vec<RemovePlanAction>,
    pub install_actions: Vec<InstallPlanAction>,
    pub already_installed: Vec<InstalledPackageView>,
}

/// How [`ActionPlan::elide_already_installed`] decides an installed
/// package still satisfies a planned action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElisionMode {
    /// Version and feature equality is enough (no ABIs computed).
    VersionAndFeatures,
    /// Additionally require the recorded ABI to match the planned one.
    RequireAbiMatch,
}

impl ActionPlan {
    pub fn is_empty(&self) -> bool {
        self.remove_actions.is_empty() && self.install_actions.is_empty()
    }

    fn installed_satisfies(
        installed: &InstalledPackageView,
        action: &InstallPlanAction,
        mode: ElisionMode,
    ) -> bool {
        if installed.version != action.scfl.version().version || installed.features != action.features
        {
            return false;
        }
        match mode {
            ElisionMode::VersionAndFeatures => true,
            ElisionMode::RequireAbiMatch => match (&installed.abi, action.package_abi()) {
                (Some(recorded), Some(planned)) => recorded == planned,
                // An unknown ABI on either side forces a reinstall.
                _ => false,
            },
        }
    }

    /// Move install actions that the installed state already satisfies
    /// into `already_installed`; schedule a removal for installed specs
    /// the plan will replace. Install order is preserved.
    pub fn elide_already_installed(&mut self, status_db: &StatusDb, mode: ElisionMode) {
        let mut kept = Vec::new();
        for action in std::mem::take(&mut self.install_actions) {
            match status_db.installed(&action.spec) {
                Some(installed) if Self::installed_satisfies(&installed, &action, mode) => {
                    self.already_installed.push(installed);
                }
                Some(_) => {
                    if !self.remove_actions.iter().any(|r| r.spec == action.spec) {
                        self.remove_actions.push(RemovePlanAction {
                            spec: action.spec.clone(),
                            reason: RemoveReason::Outdated,
                        });
                    }
                    kept.push(action);
                }
                None => kept.push(action),
            }
        }
        self.install_actions = kept;
        order_removals(&mut self.remove_actions, status_db);
    }
}

/// Order removals reverse-topologically over the installed tree's
/// back-edges: a package leaves before anything it depends on.
pub(crate) fn order_removals(removals: &mut Vec<RemovePlanAction>, status_db: &StatusDb) {
    let back_edges = status_db.back_edges();

    // Depth of a spec = longest chain of installed dependents above it;
    // removing deepest-dependent-first is a reverse topological order.
    fn dependent_depth(
        spec: &PackageSpec,
        back_edges: &BTreeMap<PackageSpec, Vec<PackageSpec>>,
        seen: &mut BTreeSet<PackageSpec>,
    ) -> usize {
        if !seen.insert(spec.clone()) {
            return 0;
        }
        let depth = back_edges
            .get(spec)
            .map(|dependents| {
                dependents
                    .iter()
                    .map(|d| 1 + dependent_depth(d, back_edges, seen))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        seen.remove(spec);
        depth
    }

    removals.sort_by_cached_key(|removal| {
        let mut seen = BTreeSet::new();
        let depth = dependent_depth(&removal.spec, &back_edges, &mut seen);
        (std::cmp::Reverse(depth), removal.spec.clone())
    });
}

/// Deterministically shuffles equal-rank scheduling decisions so tests can
/// probe order-sensitivity without real randomness.
#[derive(Debug, Clone)]
pub struct GraphRandomizer {
    state: u64,
}

impl GraphRandomizer {
    pub fn new(seed: u64) -> GraphRandomizer {
        GraphRandomizer {
            state: seed | 1,
        }
    }

    fn next(&mut self) -> u64 {
        // Plain LCG; quality does not matter, reproducibility does.
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    pub(crate) fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = (self.next() % (i as u64 + 1)) as usize;
            items.swap(i, j);
        }
    }
}
