//! The version resolver and action planner.
//!
//! Planning runs in rounds. A round expands the dependency closure from
//! the roots using the versions currently selected per port (baseline,
//! raised by any `version>=` constraints seen so far, overridden by the
//! root manifest's pins). When a round discovers a constraint above a
//! port's current selection, the selection is raised and the expansion
//! restarts; selections only ever move up, so this reaches a fixpoint
//! without backtracking. The final round's graph is then ordered
//! topologically.

use crate::core::{
    compare_under, FeatureSpec, FullPackageSpec, PackageSpec, Triplet, Version, CORE_FEATURE,
    DEFAULT_FEATURE,
};
use crate::manifest::{Dependency, DependencyOverride, SourceControlFileAndLocation};
use crate::plan::vars::TripletVarProvider;
use crate::plan::{
    ActionPlan, BuildOptions, GraphRandomizer, InstallPlanAction, RemovePlanAction, RemoveReason,
    RequestType, UnsupportedPortAction,
};
use crate::provider::PortFileProvider;
use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

pub struct PlanOptions {
    pub host_triplet: Triplet,
    pub unsupported_port_action: UnsupportedPortAction,
    pub build_options: BuildOptions,
    pub randomizer: Option<GraphRandomizer>,
}

impl PlanOptions {
    pub fn new(host_triplet: Triplet) -> PlanOptions {
        PlanOptions {
            host_triplet,
            unsupported_port_action: UnsupportedPortAction::Error,
            build_options: BuildOptions::default(),
            randomizer: None,
        }
    }
}

/// Compute the install plan for `roots`. Overrides come from the root
/// manifest. The returned plan has no removals and an empty
/// `already_installed` list; callers run
/// [`ActionPlan::elide_already_installed`] (before or after ABI
/// computation) to reconcile with the installed tree.
pub fn create_feature_install_plan(
    provider: &PortFileProvider,
    var_provider: &mut dyn TripletVarProvider,
    roots: &[FullPackageSpec],
    overrides: &[DependencyOverride],
    options: &PlanOptions,
) -> Result<ActionPlan> {
    let override_map: BTreeMap<&str, &Version> = overrides
        .iter()
        .map(|o| (o.name.as_str(), &o.version))
        .collect();

    let mut raised: BTreeMap<String, Version> = BTreeMap::new();
    // Selections only move up, so the loop terminates; the guard catches
    // a raise cycle that would indicate a comparison bug.
    for _round in 0..1000 {
        let mut expansion = Expansion {
            provider,
            var_provider: &mut *var_provider,
            override_map: &override_map,
            raised: &raised,
            options,
            nodes: Vec::new(),
            node_index: HashMap::new(),
            pending_raises: BTreeMap::new(),
            dropped_unsupported: BTreeSet::new(),
        };
        expansion.run(roots)?;

        if expansion.pending_raises.is_empty() {
            return finish(expansion.nodes, options);
        }
        for (name, version) in std::mem::take(&mut expansion.pending_raises) {
            raised.insert(name, version);
        }
    }
    bail!("version selection failed to converge; this is a bug in constraint comparison");
}

struct Node {
    spec: PackageSpec,
    scfl: Rc<SourceControlFileAndLocation>,
    features: BTreeSet<String>,
    request_type: RequestType,
    feature_dependencies: BTreeMap<String, Vec<FeatureSpec>>,
    package_dependencies: BTreeSet<PackageSpec>,
}

struct Expansion<'a, 'p> {
    provider: &'a PortFileProvider<'p>,
    var_provider: &'a mut dyn TripletVarProvider,
    override_map: &'a BTreeMap<&'a str, &'a Version>,
    raised: &'a BTreeMap<String, Version>,
    options: &'a PlanOptions,
    nodes: Vec<Node>,
    node_index: HashMap<PackageSpec, usize>,
    pending_raises: BTreeMap<String, Version>,
    dropped_unsupported: BTreeSet<PackageSpec>,
}

impl Expansion<'_, '_> {
    fn run(&mut self, roots: &[FullPackageSpec]) -> Result<()> {
        let mut queue: VecDeque<(PackageSpec, Vec<String>, RequestType)> = VecDeque::new();
        for root in roots {
            // `default` expands against the port's default features; the
            // resolver's working set never contains it.
            let mut features = root.features.clone();
            if features.is_empty() {
                features.push(DEFAULT_FEATURE.to_string());
            }
            queue.push_back((root.spec.clone(), features, RequestType::UserRequested));
        }

        while let Some((spec, features, request_type)) = queue.pop_front() {
            if self.dropped_unsupported.contains(&spec) {
                continue;
            }
            self.process(&spec, features, request_type, &mut queue)?;
        }
        Ok(())
    }

    /// The version the current round selects for `name`.
    fn selected_version(&mut self, name: &str) -> Result<Version> {
        if let Some(version) = self.override_map.get(name) {
            return Ok((*version).clone());
        }
        if let Some(version) = self.raised.get(name) {
            return Ok(version.clone());
        }
        self.provider
            .baseline_version(name)?
            .with_context(|| format!("no baseline version is known for the port `{name}`"))
    }

    /// Record that a dependency requires at least `minimum` of `name`.
    /// An override pins the version no matter what, but an override below
    /// a constraint is a conflict the user has to resolve; there is no
    /// backtracking to paper over it.
    fn apply_constraint(
        &mut self,
        dependent: &PackageSpec,
        name: &str,
        minimum: &Version,
        current: &Version,
        scfl: &SourceControlFileAndLocation,
    ) -> Result<()> {
        if let Some(pinned) = self.override_map.get(name) {
            let scheme = scfl.version().scheme;
            let ordering = compare_under(scheme, minimum, pinned).with_context(|| {
                format!(
                    "scheme mismatch: `{dependent}` requires {name}>={minimum}, which does not \
                     parse under the `{scheme}` scheme of the override {name}@{pinned}"
                )
            })?;
            if ordering == std::cmp::Ordering::Greater {
                bail!(
                    "version conflict: `{dependent}` requires {name}>={minimum}, but the root \
                     manifest overrides {name} to {pinned}; raise the override or drop it"
                );
            }
            return Ok(());
        }
        let scheme = scfl.version().scheme;
        let ordering = compare_under(scheme, minimum, current).with_context(|| {
            format!(
                "scheme mismatch: `{dependent}` requires {name}>={minimum}, which does not \
                 parse under the `{scheme}` scheme of {name}@{current}"
            )
        })?;
        if ordering == std::cmp::Ordering::Greater {
            let entry = self
                .pending_raises
                .entry(name.to_string())
                .or_insert_with(|| minimum.clone());
            // Keep the highest raise seen this round.
            if compare_under(scheme, minimum, entry) == Some(std::cmp::Ordering::Greater) {
                *entry = minimum.clone();
            }
        }
        Ok(())
    }

    fn vars_for(&mut self, spec: &PackageSpec) -> Result<platform_expr::Context> {
        if let Some(context) = self.var_provider.dep_info_vars(spec) {
            return Ok(context);
        }
        // The batch for this spec was not requested yet; request it now.
        self.var_provider
            .load_dep_info_vars(std::slice::from_ref(spec), &self.options.host_triplet)?;
        self.var_provider
            .dep_info_vars(spec)
            .with_context(|| format!("no dep-info variables are available for `{spec}`"))
    }

    fn process(
        &mut self,
        spec: &PackageSpec,
        features: Vec<String>,
        request_type: RequestType,
        queue: &mut VecDeque<(PackageSpec, Vec<String>, RequestType)>,
    ) -> Result<()> {
        let node_index = match self.node_index.get(spec) {
            Some(&index) => {
                if request_type == RequestType::UserRequested {
                    self.nodes[index].request_type = RequestType::UserRequested;
                }
                index
            }
            None => self.create_node(spec, request_type)?,
        };
        let Some(node_index) = node_index_or_dropped(node_index) else {
            return Ok(());
        };

        let scfl = self.nodes[node_index].scfl.clone();

        // Ports with qualified dependencies need their triplet variables;
        // batch the request before touching any platform expression.
        if scfl.scf.has_qualified_dependencies() {
            self.var_provider.load_dep_info_vars(
                std::slice::from_ref(spec),
                &self.options.host_triplet,
            )?;
        }

        // Normalize the requested feature list: `default` expands to the
        // port's default features, `*` to all of them, and `core` is
        // always present.
        let mut requested: BTreeSet<String> = BTreeSet::from([CORE_FEATURE.to_string()]);
        for feature in features {
            match feature.as_str() {
                CORE_FEATURE => {}
                DEFAULT_FEATURE => {
                    requested.extend(scfl.scf.core.default_features.iter().cloned());
                }
                "*" => {
                    requested.extend(scfl.scf.features.iter().map(|f| f.name.clone()));
                }
                _ => {
                    requested.insert(feature);
                }
            }
        }

        for feature in requested {
            let newly_added = self.nodes[node_index].features.insert(feature.clone());
            if !newly_added {
                continue;
            }
            let dependencies: Vec<Dependency> = if feature == CORE_FEATURE {
                scfl.scf.core.dependencies.clone()
            } else {
                let paragraph = scfl.scf.find_feature(&feature).with_context(|| {
                    format!(
                        "`{}` has no feature named `{feature}`",
                        scfl.scf.core.name
                    )
                })?;
                if !paragraph.supports.is_empty() {
                    let vars = self.vars_for(spec)?;
                    if !paragraph.supports.evaluate(&vars) {
                        match self.options.unsupported_port_action {
                            UnsupportedPortAction::Error => bail!(
                                "feature {}[{feature}] does not support triplet {} \
                                 (supports: \"{}\")",
                                scfl.scf.core.name,
                                spec.triplet(),
                                paragraph.supports
                            ),
                            UnsupportedPortAction::Warn => {
                                log::warn!(
                                    "dropping feature {}[{feature}]: unsupported on {}",
                                    scfl.scf.core.name,
                                    spec.triplet()
                                );
                                self.nodes[node_index].features.remove(&feature);
                                continue;
                            }
                        }
                    }
                }
                paragraph.dependencies.clone()
            };
            self.expand_dependencies(node_index, &feature, &dependencies, queue)?;
        }
        Ok(())
    }

    /// Load the port, gate it on `supports`, and allocate its node.
    /// Returns `usize::MAX` when the port was dropped as unsupported in
    /// warn mode.
    fn create_node(&mut self, spec: &PackageSpec, request_type: RequestType) -> Result<usize> {
        let version = self.selected_version(spec.name())?;
        let scfl = self
            .provider
            .get_versioned_control_file(spec.name(), &version)
            .with_context(|| format!("while resolving `{spec}`"))?;

        if !scfl.scf.core.supports.is_empty() {
            let vars = self.vars_for(spec)?;
            let mut unknown = Vec::new();
            if !scfl
                .scf
                .core
                .supports
                .evaluate_collect_unknown(&vars, &mut unknown)
            {
                match self.options.unsupported_port_action {
                    UnsupportedPortAction::Error => bail!(
                        "{} does not support triplet {} (supports: \"{}\")",
                        spec.name(),
                        spec.triplet(),
                        scfl.scf.core.supports
                    ),
                    UnsupportedPortAction::Warn => {
                        log::warn!(
                            "dropping {}: unsupported on {} (supports: \"{}\")",
                            spec.name(),
                            spec.triplet(),
                            scfl.scf.core.supports
                        );
                        self.dropped_unsupported.insert(spec.clone());
                        return Ok(usize::MAX);
                    }
                }
            }
            for identifier in unknown {
                log::warn!(
                    "unknown identifier `{identifier}` in the supports expression of {}",
                    spec.name()
                );
            }
        }

        let index = self.nodes.len();
        self.nodes.push(Node {
            spec: spec.clone(),
            scfl,
            features: BTreeSet::new(),
            request_type,
            feature_dependencies: BTreeMap::new(),
            package_dependencies: BTreeSet::new(),
        });
        self.node_index.insert(spec.clone(), index);
        Ok(index)
    }

    fn expand_dependencies(
        &mut self,
        node_index: usize,
        feature: &str,
        dependencies: &[Dependency],
        queue: &mut VecDeque<(PackageSpec, Vec<String>, RequestType)>,
    ) -> Result<()> {
        let spec = self.nodes[node_index].spec.clone();
        for dependency in dependencies {
            if !dependency.platform.is_empty() {
                let vars = self.vars_for(&spec)?;
                if !dependency.platform.evaluate(&vars) {
                    continue;
                }
            }

            let target_triplet = if dependency.host {
                self.options.host_triplet.clone()
            } else {
                spec.triplet().clone()
            };
            let dep_spec = PackageSpec::new(dependency.name.clone(), target_triplet);

            // Apply any minimum-version constraint against the version the
            // round currently selects for the target.
            if let Some(minimum) = &dependency.constraint {
                if !self.dropped_unsupported.contains(&dep_spec) {
                    let current = self.selected_version(&dependency.name)?;
                    let target_scfl = self
                        .provider
                        .get_versioned_control_file(&dependency.name, &current)
                        .with_context(|| format!("while resolving `{dep_spec}`"))?;
                    self.apply_constraint(&spec, &dependency.name, minimum, &current, &target_scfl)?;
                }
            }

            let mut dep_features: Vec<String> = dependency
                .features
                .iter()
                .filter(|f| *f != CORE_FEATURE)
                .cloned()
                .collect();
            if dependency.wants_default_features() {
                dep_features.push(DEFAULT_FEATURE.to_string());
            }

            // Feature-level edges record the exact activation this edge
            // causes; `core` stands in for "the port itself".
            let is_self_edge = dep_spec == spec;
            let edges = self.nodes[node_index]
                .feature_dependencies
                .entry(feature.to_string())
                .or_default();
            edges.push(FeatureSpec::new(dep_spec.clone(), CORE_FEATURE));
            for dep_feature in dependency.features.iter().filter(|f| *f != CORE_FEATURE) {
                edges.push(FeatureSpec::new(dep_spec.clone(), dep_feature.clone()));
            }
            if !is_self_edge {
                self.nodes[node_index]
                    .package_dependencies
                    .insert(dep_spec.clone());
            }

            queue.push_back((dep_spec, dep_features, RequestType::AutoSelected));
        }
        Ok(())
    }
}

fn node_index_or_dropped(index: usize) -> Option<usize> {
    (index != usize::MAX).then_some(index)
}

/// Topologically order the final round's nodes and package the plan.
fn finish(nodes: Vec<Node>, options: &PlanOptions) -> Result<ActionPlan> {
    let index_of: HashMap<PackageSpec, usize> = nodes
        .iter()
        .enumerate()
        .map(|(index, node)| (node.spec.clone(), index))
        .collect();

    // Kahn's algorithm, dependencies before dependents. The ready set is
    // kept sorted by spec so sibling order is stable; the randomizer hook
    // deterministically shuffles it to let tests probe order-sensitivity.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree: Vec<usize> = vec![0; nodes.len()];
    for (index, node) in nodes.iter().enumerate() {
        for dep in &node.package_dependencies {
            // Dependencies dropped as unsupported have no node; their
            // absence was already warned about.
            if let Some(&dep_index) = index_of.get(dep) {
                dependents[dep_index].push(index);
                in_degree[index] += 1;
            }
        }
    }

    let mut randomizer = options.randomizer.clone();
    let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    // `ready` behaves as a stack: sort descending so the
    // lexicographically-first spec pops first.
    ready.sort_by(|&a, &b| nodes[b].spec.cmp(&nodes[a].spec));
    if let Some(randomizer) = randomizer.as_mut() {
        randomizer.shuffle(&mut ready);
    }

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(index) = ready.pop() {
        order.push(index);
        let mut unlocked = Vec::new();
        for &dependent in &dependents[index] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                unlocked.push(dependent);
            }
        }
        unlocked.sort_by(|&a, &b| nodes[b].spec.cmp(&nodes[a].spec));
        if let Some(randomizer) = randomizer.as_mut() {
            randomizer.shuffle(&mut unlocked);
        }
        ready.extend(unlocked);
    }

    if order.len() != nodes.len() {
        let stuck: Vec<&Node> = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| !order.contains(i))
            .map(|(_, node)| node)
            .collect();
        bail!(
            "the dependency graph contains a cycle among: {}",
            describe_cycle(&stuck)
        );
    }

    let install_actions = order
        .into_iter()
        .map(|index| &nodes[index])
        .map(|node| InstallPlanAction {
            spec: node.spec.clone(),
            scfl: node.scfl.clone(),
            features: node.features.clone(),
            request_type: node.request_type,
            build_options: options.build_options,
            feature_dependencies: node
                .feature_dependencies
                .iter()
                .map(|(feature, edges)| {
                    let mut edges = edges.clone();
                    edges.sort();
                    edges.dedup();
                    (feature.clone(), edges)
                })
                .collect(),
            package_dependencies: node.package_dependencies.iter().cloned().collect(),
            abi_info: None,
        })
        .collect();

    Ok(ActionPlan {
        remove_actions: Vec::new(),
        install_actions,
        already_installed: Vec::new(),
    })
}

/// Walk the stuck subgraph to print one concrete cycle.
fn describe_cycle(stuck: &[&Node]) -> String {
    let in_stuck: BTreeMap<&PackageSpec, &Node> =
        stuck.iter().map(|node| (&node.spec, *node)).collect();
    let Some(start) = stuck.first() else {
        return "<empty>".to_string();
    };

    let mut path: Vec<&PackageSpec> = Vec::new();
    let mut seen: BTreeMap<&PackageSpec, usize> = BTreeMap::new();
    let mut current = &start.spec;
    loop {
        if let Some(&position) = seen.get(current) {
            let mut cycle: Vec<String> = path[position..].iter().map(|s| s.to_string()).collect();
            cycle.push(current.to_string());
            return cycle.join(" -> ");
        }
        seen.insert(current, path.len());
        path.push(current);
        let node = in_stuck[current];
        current = node
            .package_dependencies
            .iter()
            .find(|dep| in_stuck.contains_key(dep))
            .expect("a stuck node keeps at least one stuck dependency");
    }
}

/// Derive removals for installed packages that are not part of the
/// desired set (`set-installed` semantics).
pub fn remove_plan_for_unreferenced(
    status_db: &crate::install::status::StatusDb,
    desired: &BTreeSet<PackageSpec>,
) -> Vec<RemovePlanAction> {
    let mut removals: Vec<RemovePlanAction> = status_db
        .installed_packages()
        .into_iter()
        .filter(|view| !desired.contains(&view.spec))
        .map(|view| RemovePlanAction {
            spec: view.spec,
            reason: RemoveReason::NotDesired,
        })
        .collect();
    crate::plan::order_removals(&mut removals, status_db);
    removals
}
