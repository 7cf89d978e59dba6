//! Port metadata: the source control file model and its two input
//! formats, the `vcpkg.json` manifest and the legacy CONTROL paragraph
//! file.

pub mod control;
pub mod fields;
pub mod json;
pub mod license;

use crate::core::{
    validate_feature_name, validate_port_name, SchemedVersion, Version, CORE_FEATURE,
    DEFAULT_FEATURE,
};
use crate::diagnostic::Diagnostics;
use platform_expr::Expr;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILENAME: &str = "vcpkg.json";
pub const CONTROL_FILENAME: &str = "CONTROL";

/// One dependency edge as declared in port metadata.
///
/// `features` may contain the pseudo-feature `core`, which suppresses the
/// target's default features for this edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub features: Vec<String>,
    /// Gates the edge; an empty expression is unconditional.
    pub platform: Expr,
    /// Pins the dependency to the host triplet instead of the target.
    pub host: bool,
    /// A `version>=` minimum; the scheme is supplied by the target port.
    pub constraint: Option<Version>,
}

impl Dependency {
    pub fn simple(name: impl Into<String>) -> Dependency {
        Dependency {
            name: name.into(),
            ..Dependency::default()
        }
    }

    /// Whether this edge pulls in the target's default features.
    pub fn wants_default_features(&self) -> bool {
        !self.features.iter().any(|f| f == CORE_FEATURE)
    }
}

/// A manifest-level pin that trumps baselines and constraints for one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyOverride {
    pub name: String,
    pub version: Version,
}

/// A named subset of a port's build with its own dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureParagraph {
    pub name: String,
    pub description: Vec<String>,
    pub dependencies: Vec<Dependency>,
    pub supports: Expr,
}

/// The port-wide paragraph of a source control file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreParagraph {
    pub name: String,
    pub version: SchemedVersion,
    pub description: Vec<String>,
    pub maintainers: Vec<String>,
    pub homepage: Option<String>,
    pub documentation: Option<String>,
    /// An SPDX license expression, already syntax-checked.
    pub license: Option<String>,
    pub supports: Expr,
    pub dependencies: Vec<Dependency>,
    pub default_features: Vec<String>,
    pub overrides: Vec<DependencyOverride>,
    pub builtin_baseline: Option<String>,
}

/// A port's parsed metadata: the core paragraph plus feature paragraphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceControlFile {
    pub core: CoreParagraph,
    pub features: Vec<FeatureParagraph>,
}

impl SourceControlFile {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn version(&self) -> &SchemedVersion {
        &self.core.version
    }

    pub fn find_feature(&self, name: &str) -> Option<&FeatureParagraph> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Whether any dependency is platform-gated or a supports clause is
    /// present; such ports need dep-info variables before planning.
    pub fn has_qualified_dependencies(&self) -> bool {
        !self.core.supports.is_empty()
            || self
                .features
                .iter()
                .any(|f| !f.supports.is_empty())
            || self
                .core
                .dependencies
                .iter()
                .chain(self.features.iter().flat_map(|f| f.dependencies.iter()))
                .any(|d| !d.platform.is_empty())
    }

    /// Structural checks shared by both input formats.
    fn validate(&self, origin: &str, diagnostics: &mut Diagnostics) {
        if let Err(problem) = validate_port_name(&self.core.name) {
            diagnostics.error(origin, problem);
        }
        if !self
            .core
            .version
            .scheme
            .is_valid_text(self.core.version.version.text())
        {
            diagnostics.error(
                origin,
                format!(
                    "`{}` is not a valid `{}` version",
                    self.core.version.version.text(),
                    self.core.version.scheme
                ),
            );
        }

        let mut seen_features = std::collections::BTreeSet::new();
        for feature in &self.features {
            if let Err(problem) = validate_feature_name(&feature.name) {
                diagnostics.error(origin, problem);
            }
            if !seen_features.insert(feature.name.as_str()) {
                diagnostics.error(
                    origin,
                    format!("feature `{}` is declared more than once", feature.name),
                );
            }
        }

        let all_dependencies = self
            .core
            .dependencies
            .iter()
            .chain(self.features.iter().flat_map(|f| f.dependencies.iter()));
        for dependency in all_dependencies {
            if let Err(problem) = validate_port_name(&dependency.name) {
                diagnostics.error(origin, format!("in a dependency: {problem}"));
            }
            for feature in &dependency.features {
                if feature == DEFAULT_FEATURE {
                    diagnostics.error(
                        origin,
                        format!(
                            "dependency `{}` names the pseudo-feature `default`; \
                             omit it or disable defaults with `core`",
                            dependency.name
                        ),
                    );
                } else if feature != CORE_FEATURE && feature != "*" {
                    if let Err(problem) = validate_feature_name(feature) {
                        diagnostics.error(origin, format!("in a dependency: {problem}"));
                    }
                }
            }
        }

        for feature in &self.core.default_features {
            if let Err(problem) = validate_feature_name(feature) {
                diagnostics.error(origin, format!("in default-features: {problem}"));
            }
        }

        for override_ in &self.core.overrides {
            if let Err(problem) = validate_port_name(&override_.name) {
                diagnostics.error(origin, format!("in an override: {problem}"));
            }
        }
    }
}

/// A source control file plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceControlFileAndLocation {
    pub scf: SourceControlFile,
    /// The port directory the metadata was loaded from.
    pub port_directory: PathBuf,
    /// Human-readable registry origin, when the port came from one.
    pub registry_origin: Option<String>,
}

impl SourceControlFileAndLocation {
    pub fn name(&self) -> &str {
        self.scf.name()
    }

    pub fn version(&self) -> &SchemedVersion {
        self.scf.version()
    }
}

/// Load the metadata in `port_directory`, whichever format it uses. The
/// same directory carrying both formats is an error.
pub fn load_port_directory(
    port_directory: &Path,
    diagnostics: &mut Diagnostics,
) -> Option<SourceControlFile> {
    let mut local = Diagnostics::new();
    let scf = load_port_directory_inner(port_directory, &mut local);
    let failed = local.has_errors();
    diagnostics.absorb(local);
    if failed {
        None
    } else {
        scf
    }
}

fn load_port_directory_inner(
    port_directory: &Path,
    diagnostics: &mut Diagnostics,
) -> Option<SourceControlFile> {
    let manifest_path = port_directory.join(MANIFEST_FILENAME);
    let control_path = port_directory.join(CONTROL_FILENAME);
    let has_manifest = manifest_path.exists();
    let has_control = control_path.exists();

    if has_manifest && has_control {
        diagnostics.error(
            port_directory,
            "port directory contains both vcpkg.json and CONTROL; remove one",
        );
        return None;
    }

    let (path, text) = if has_manifest {
        (manifest_path.clone(), std::fs::read_to_string(&manifest_path))
    } else if has_control {
        (control_path.clone(), std::fs::read_to_string(&control_path))
    } else {
        diagnostics.error(
            port_directory,
            "port directory contains neither vcpkg.json nor CONTROL",
        );
        return None;
    };

    let text = match text {
        Ok(text) => text,
        Err(e) => {
            diagnostics.error(&*path, format!("unable to read port metadata: {e}"));
            return None;
        }
    };
    let origin = path.display().to_string();
    let scf = if has_manifest {
        json::parse_manifest(&text, &origin, diagnostics)
    } else {
        control::parse_control(&text, &origin, diagnostics)
    }?;
    scf.validate(&origin, diagnostics);
    Some(scf)
}
