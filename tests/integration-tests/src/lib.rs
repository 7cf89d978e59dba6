#![cfg(test)]

//! End-to-end tests over the checked-in fixture registry in
//! `tests/fixtures`: a filesystem registry with multiple published
//! versions, feature and host dependencies, a qualified dependency, a
//! cycle, and an unsupported port.

use portsys::abi::{self, AbiContext};
use portsys::cache::{BinaryCache, FilesCacheProvider};
use portsys::core::{FullPackageSpec, PackageSpec, Triplet, Version};
use portsys::install::status::StatusDb;
use portsys::install::{
    execute_plan, BuildDriver, BuildLogsRecorder, BuildOutcome, ExecuteOptions, InstallResult,
    KeepGoing,
};
use portsys::manifest::DependencyOverride;
use portsys::paths::Paths;
use portsys::plan::{
    create_feature_install_plan, ActionPlan, ElisionMode, InstallPlanAction, PlanOptions,
    SimpleTripletVarProvider, UnsupportedPortAction,
};
use portsys::provider::{OverlayProvider, PortFileProvider};
use portsys::registry::filesystem::FilesystemRegistry;
use portsys::registry::{Registry, RegistryImpl, RegistrySet};
use std::path::{Path, PathBuf};

fn fixtures_dir() -> PathBuf {
    let mut dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    dir.pop();
    dir.join("fixtures")
}

fn fixture_registries() -> RegistrySet {
    RegistrySet::new(
        Some(Registry::new(
            Vec::new(),
            RegistryImpl::Filesystem(FilesystemRegistry::new(
                fixtures_dir().join("registry"),
                None,
            )),
        )),
        Vec::new(),
    )
}

fn var_provider() -> SimpleTripletVarProvider {
    SimpleTripletVarProvider::new(vec![fixtures_dir().join("triplets")])
}

fn x64_linux() -> Triplet {
    Triplet::from_canonical_name("x64-linux")
}

fn arm64_linux() -> Triplet {
    Triplet::from_canonical_name("arm64-linux")
}

fn x64_uwp() -> Triplet {
    Triplet::from_canonical_name("x64-uwp")
}

fn plan_options(host: Triplet) -> PlanOptions {
    PlanOptions::new(host)
}

fn plan(
    roots: &[FullPackageSpec],
    overrides: &[DependencyOverride],
    options: &PlanOptions,
) -> anyhow::Result<ActionPlan> {
    let registries = fixture_registries();
    let overlays = OverlayProvider::default();
    let provider = PortFileProvider::new(&overlays, &registries);
    let mut vars = var_provider();
    create_feature_install_plan(&provider, &mut vars, roots, overrides, options)
}

fn root(name: &str, features: &[&str], triplet: Triplet) -> FullPackageSpec {
    FullPackageSpec::new(
        PackageSpec::new(name, triplet),
        features.iter().map(|f| f.to_string()).collect(),
    )
}

fn names_in_order(plan: &ActionPlan) -> Vec<String> {
    plan.install_actions
        .iter()
        .map(|a| a.spec.name().to_string())
        .collect()
}

fn position(plan: &ActionPlan, name: &str) -> usize {
    plan.install_actions
        .iter()
        .position(|a| a.spec.name() == name)
        .unwrap_or_else(|| panic!("{name} missing from plan"))
}

mod resolver {
    use super::*;

    #[test]
    fn closure_is_topological_and_honors_constraints() {
        // zlib2's default feature pulls pcre2, which host-depends on
        // tool; the openssl constraint raises 3.0.0 -> 3.1.0.
        let plan = plan(
            &[root("zlib2", &[], x64_linux())],
            &[],
            &plan_options(arm64_linux()),
        )
        .unwrap();

        let names = names_in_order(&plan);
        assert_eq!(names.len(), 5, "{names:?}");
        assert!(position(&plan, "bzip") < position(&plan, "openssl"));
        assert!(position(&plan, "openssl") < position(&plan, "zlib2"));
        assert!(position(&plan, "pcre2") < position(&plan, "zlib2"));
        assert!(position(&plan, "tool") < position(&plan, "pcre2"));

        let openssl = &plan.install_actions[position(&plan, "openssl")];
        assert_eq!(openssl.scfl.version().version, Version::new("3.1.0", 0));

        // The host dependency crosses to the host triplet.
        let tool = &plan.install_actions[position(&plan, "tool")];
        assert_eq!(tool.spec.triplet(), &arm64_linux());
        let pcre2 = &plan.install_actions[position(&plan, "pcre2")];
        assert_eq!(pcre2.spec.triplet(), &x64_linux());
    }

    #[test]
    fn core_suppresses_default_features() {
        let plan = plan(
            &[root("zlib2", &["core"], x64_linux())],
            &[],
            &plan_options(x64_linux()),
        )
        .unwrap();
        let names = names_in_order(&plan);
        assert!(!names.contains(&"pcre2".to_string()), "{names:?}");
        assert!(!names.contains(&"tool".to_string()), "{names:?}");
    }

    #[test]
    fn qualified_dependency_is_dropped_on_matching_platform() {
        // openssl is gated with `!uwp`.
        let plan = plan(
            &[root("zlib2", &["core"], x64_uwp())],
            &[],
            &plan_options(x64_linux()),
        )
        .unwrap();
        let names = names_in_order(&plan);
        assert!(!names.contains(&"openssl".to_string()), "{names:?}");
        assert!(names.contains(&"bzip".to_string()));
    }

    #[test]
    fn override_pins_the_version_over_baseline_and_constraint() {
        // Baseline says 3.0.0 and the constraint would raise to 3.1.0;
        // the override takes 3.2.0 regardless of either.
        let plan = plan(
            &[root("zlib2", &["core"], x64_linux())],
            &[DependencyOverride {
                name: "openssl".to_string(),
                version: Version::new("3.2.0", 0),
            }],
            &plan_options(x64_linux()),
        )
        .unwrap();
        let openssl = &plan.install_actions[position(&plan, "openssl")];
        assert_eq!(openssl.scfl.version().version, Version::new("3.2.0", 0));
    }

    #[test]
    fn override_below_a_constraint_is_a_conflict() {
        // zlib2 requires openssl>=3.1.0; pinning it to 3.0.0 cannot be
        // satisfied without backtracking, so planning stops.
        let err = plan(
            &[root("zlib2", &["core"], x64_linux())],
            &[DependencyOverride {
                name: "openssl".to_string(),
                version: Version::new("3.0.0", 0),
            }],
            &plan_options(x64_linux()),
        )
        .unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("overrides openssl to 3.0.0"), "{text}");
        assert!(text.contains("version conflict"), "{text}");
    }

    #[test]
    fn cycles_are_reported() {
        let err = plan(
            &[root("cyclea", &[], x64_linux())],
            &[],
            &plan_options(x64_linux()),
        )
        .unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("cycle"), "{text}");
        assert!(text.contains("cyclea") && text.contains("cycleb"), "{text}");
    }

    #[test]
    fn unsupported_port_errors_or_warns() {
        let roots = [root("unsupported", &[], x64_linux())];
        let err = plan(&roots, &[], &plan_options(x64_linux())).unwrap_err();
        assert!(format!("{err:#}").contains("does not support"), "{err:#}");

        let options = PlanOptions {
            unsupported_port_action: UnsupportedPortAction::Warn,
            ..plan_options(x64_linux())
        };
        let plan = plan(&roots, &[], &options).unwrap();
        assert!(plan.install_actions.is_empty());
    }

    #[test]
    fn feature_edges_are_recorded() {
        let plan = plan(
            &[root("zlib2", &[], x64_linux())],
            &[],
            &plan_options(x64_linux()),
        )
        .unwrap();
        let zlib2 = &plan.install_actions[position(&plan, "zlib2")];
        assert!(zlib2.features.contains("core") && zlib2.features.contains("extra"));
        let extra_edges = &zlib2.feature_dependencies["extra"];
        assert!(extra_edges.iter().any(|edge| edge.spec().name() == "pcre2"));
    }
}

mod executor {
    use super::*;

    /// Stages a recognizable file per package.
    struct FixtureDriver;

    impl BuildDriver for FixtureDriver {
        fn build(
            &mut self,
            action: &InstallPlanAction,
            paths: &Paths,
            recorder: &mut BuildLogsRecorder,
        ) -> anyhow::Result<BuildOutcome> {
            recorder.record(&action.spec, format!("building {}", action.spec));
            let staging = paths.packages().join(action.spec.dir());
            std::fs::create_dir_all(staging.join("share"))?;
            std::fs::write(
                staging.join("share").join(format!("{}.txt", action.spec.name())),
                action.spec.name(),
            )?;
            Ok(BuildOutcome::Succeeded)
        }
    }

    fn test_root(dir: &Path) -> Paths {
        let root = dir.join("root");
        std::fs::create_dir_all(root.join("scripts/cmake")).unwrap();
        std::fs::write(root.join("scripts/ports.cmake"), "# driver\n").unwrap();
        std::fs::create_dir_all(root.join("triplets")).unwrap();
        for triplet in ["x64-linux", "arm64-linux"] {
            std::fs::copy(
                fixtures_dir().join("triplets").join(format!("{triplet}.cmake")),
                root.join("triplets").join(format!("{triplet}.cmake")),
            )
            .unwrap();
        }
        Paths::from_root(root)
    }

    fn abi_context() -> AbiContext {
        AbiContext {
            cmake_version: "cmake version 3.29.1".to_string(),
            ..AbiContext::default()
        }
    }

    fn planned(host: Triplet) -> ActionPlan {
        plan(&[root("zlib2", &[], x64_linux())], &[], &plan_options(host)).unwrap()
    }

    #[test]
    fn build_record_restore_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let paths = test_root(dir.path());
        let cache_root = dir.path().join("archives");

        // First run: everything builds, results land in the cache.
        let mut plan = planned(x64_linux());
        let mut status_db = StatusDb::load(&paths.status_file()).unwrap();
        abi::compute_abis(&mut plan, &abi_context(), &paths, &status_db).unwrap();
        plan.elide_already_installed(&status_db, ElisionMode::RequireAbiMatch);
        assert_eq!(plan.install_actions.len(), 5);

        let mut cache = BinaryCache::new(vec![Box::new(FilesCacheProvider::new(&cache_root))]);
        let summary = execute_plan(
            &paths,
            &plan,
            &mut cache,
            &mut FixtureDriver,
            &mut status_db,
            &ExecuteOptions {
                keep_going: KeepGoing::No,
                cancel: None,
            },
        )
        .unwrap();
        assert!(!summary.any_failure());
        assert_eq!(summary.count(InstallResult::Succeeded), 5);
        assert!(paths
            .root()
            .join("installed/x64-linux/share/zlib2.txt")
            .is_file());

        // Planning again against the same installed state is a no-op.
        let mut replanned = planned(x64_linux());
        abi::compute_abis(&mut replanned, &abi_context(), &paths, &status_db).unwrap();
        replanned.elide_already_installed(&status_db, ElisionMode::RequireAbiMatch);
        assert!(
            replanned.install_actions.is_empty(),
            "{:?}",
            names_in_order(&replanned)
        );
        assert_eq!(replanned.already_installed.len(), 5);

        // Second machine: empty installed tree, same cache. Everything
        // restores; the driver is never invoked.
        let dir2 = tempfile::tempdir().unwrap();
        let paths2 = test_root(dir2.path());
        let mut plan2 = planned(x64_linux());
        let mut status_db2 = StatusDb::load(&paths2.status_file()).unwrap();
        abi::compute_abis(&mut plan2, &abi_context(), &paths2, &status_db2).unwrap();
        plan2.elide_already_installed(&status_db2, ElisionMode::RequireAbiMatch);

        struct PanicDriver;
        impl BuildDriver for PanicDriver {
            fn build(
                &mut self,
                action: &InstallPlanAction,
                _paths: &Paths,
                _recorder: &mut BuildLogsRecorder,
            ) -> anyhow::Result<BuildOutcome> {
                panic!("{} should have been restored from the cache", action.spec);
            }
        }
        let mut cache2 = BinaryCache::new(vec![Box::new(FilesCacheProvider::new(&cache_root))]);
        let summary2 = execute_plan(
            &paths2,
            &plan2,
            &mut cache2,
            &mut PanicDriver,
            &mut status_db2,
            &ExecuteOptions {
                keep_going: KeepGoing::No,
                cancel: None,
            },
        )
        .unwrap();
        assert_eq!(summary2.count(InstallResult::Succeeded), 5);
        assert!(paths2
            .root()
            .join("installed/x64-linux/share/pcre2.txt")
            .is_file());
    }

    #[test]
    fn abi_change_triggers_reinstall() {
        let dir = tempfile::tempdir().unwrap();
        let paths = test_root(dir.path());

        let mut plan = planned(x64_linux());
        let mut status_db = StatusDb::load(&paths.status_file()).unwrap();
        abi::compute_abis(&mut plan, &abi_context(), &paths, &status_db).unwrap();
        plan.elide_already_installed(&status_db, ElisionMode::RequireAbiMatch);
        execute_plan(
            &paths,
            &plan,
            &mut BinaryCache::default(),
            &mut FixtureDriver,
            &mut status_db,
            &ExecuteOptions::default(),
        )
        .unwrap();

        // A changed central helper script shifts every ABI.
        std::fs::write(paths.root().join("scripts/ports.cmake"), "# driver v2\n").unwrap();
        let mut replanned = planned(x64_linux());
        abi::compute_abis(&mut replanned, &abi_context(), &paths, &status_db).unwrap();
        replanned.elide_already_installed(&status_db, ElisionMode::RequireAbiMatch);
        assert_eq!(replanned.install_actions.len(), 5);
        // Everything is both removed and reinstalled.
        assert_eq!(replanned.remove_actions.len(), 5);
    }
}
