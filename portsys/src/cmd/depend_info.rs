//! `portsys depend-info`: print the dependency closure of the given
//! ports as a flat list, a tree, or a graph description.

use crate::cmd::TreeArgs;
use crate::core::{FullPackageSpec, PackageSpec};
use crate::plan::{
    create_feature_install_plan, ActionPlan, PlanOptions, SimpleTripletVarProvider,
    UnsupportedPortAction,
};
use crate::provider::PortFileProvider;
use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    List,
    Tree,
    Dot,
    Mermaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortOrder {
    Lexicographical,
    Topological,
    ReverseTopological,
}

#[derive(Debug, Parser)]
pub struct DependInfo {
    #[clap(flatten)]
    pub tree: TreeArgs,

    /// Ports to analyze, as `name[features]:triplet`.
    #[clap(required = true)]
    pub packages: Vec<String>,

    #[clap(long, value_enum, default_value = "list")]
    pub format: OutputFormat,

    #[clap(long, value_enum, default_value = "topological")]
    pub sort: SortOrder,

    /// Maximum dependency depth shown in tree output; negative means
    /// unlimited.
    #[clap(long = "max-recurse", default_value = "-1")]
    pub max_recurse: i32,
}

impl DependInfo {
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
            unsupported_port_action: UnsupportedPortAction::Warn,
            ..PlanOptions::new(host)
        };
        let plan =
            create_feature_install_plan(&provider, &mut var_provider, &roots, &[], &options)?;

        match self.format {
            OutputFormat::List => self.print_list(&plan),
            OutputFormat::Tree => self.print_tree(&plan, &roots),
            OutputFormat::Dot => print_graph(&plan, "digraph G {", "}", |a, b| {
                format!("    \"{a}\" -> \"{b}\";")
            }),
            OutputFormat::Mermaid => {
                print_graph(&plan, "flowchart TD", "", |a, b| format!("    {a} --> {b}"))
            }
        }
        Ok(())
    }

    fn print_list(&self, plan: &ActionPlan) {
        let mut lines: Vec<(PackageSpec, String)> = plan
            .install_actions
            .iter()
            .map(|action| {
                let mut deps: Vec<&str> = action
                    .package_dependencies
                    .iter()
                    .map(|d| d.name())
                    .collect();
                deps.sort();
                (
                    action.spec.clone(),
                    format!("{}: {}", action.spec.name(), deps.join(", ")),
                )
            })
            .collect();
        match self.sort {
            SortOrder::Lexicographical => lines.sort_by(|a, b| a.0.cmp(&b.0)),
            SortOrder::Topological => {}
            SortOrder::ReverseTopological => lines.reverse(),
        }
        for (_, line) in lines {
            println!("{line}");
        }
    }

    fn print_tree(&self, plan: &ActionPlan, roots: &[FullPackageSpec]) {
        let by_spec: BTreeMap<&PackageSpec, &crate::plan::InstallPlanAction> = plan
            .install_actions
            .iter()
            .map(|action| (&action.spec, action))
            .collect();
        for root in roots {
            self.print_subtree(&root.spec, &by_spec, 0, &mut Vec::new());
        }
    }

    fn print_subtree(
        &self,
        spec: &PackageSpec,
        by_spec: &BTreeMap<&PackageSpec, &crate::plan::InstallPlanAction>,
        depth: usize,
        ancestry: &mut Vec<PackageSpec>,
    ) {
        println!("{}{}", "  ".repeat(depth), spec.name());
        if self.max_recurse >= 0 && depth >= self.max_recurse as usize {
            return;
        }
        // A spec already on the path would loop through a host edge.
        if ancestry.contains(spec) {
            return;
        }
        ancestry.push(spec.clone());
        if let Some(action) = by_spec.get(spec) {
            for dep in &action.package_dependencies {
                self.print_subtree(dep, by_spec, depth + 1, ancestry);
            }
        }
        ancestry.pop();
    }
}

fn print_graph(
    plan: &ActionPlan,
    header: &str,
    footer: &str,
    edge: impl Fn(&str, &str) -> String,
) {
    println!("{header}");
    for action in &plan.install_actions {
        for dep in &action.package_dependencies {
            println!("{}", edge(action.spec.name(), dep.name()));
        }
    }
    if !footer.is_empty() {
        println!("{footer}");
    }
}
