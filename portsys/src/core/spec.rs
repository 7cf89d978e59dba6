use crate::core::Triplet;
use std::fmt::{self, Display, Formatter};

/// The pseudo-feature meaning "the port itself, without default features".
pub const CORE_FEATURE: &str = "core";

/// The pseudo-feature that expands to a port's default feature list before
/// planning. It never appears in the resolver's working set.
pub const DEFAULT_FEATURE: &str = "default";

/// Names reserved by the metadata format or by Windows device naming;
/// neither ports nor features may use them.
const RESERVED_NAMES: &[&str] = &[
    "prn", "aux", "nul", "con", "core", "default", "lpt0", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5",
    "lpt6", "lpt7", "lpt8", "lpt9", "com0", "com1", "com2", "com3", "com4", "com5", "com6", "com7",
    "com8", "com9",
];

fn is_valid_identifier(name: &str) -> bool {
    // Lowercase letters, digits and single interior dashes.
    if name.is_empty() || name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return false;
    }
    name.chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
}

/// Checks a port name against the identifier rules. Returns a description
/// of the problem when the name is invalid.
pub fn validate_port_name(name: &str) -> Result<(), String> {
    // One legacy port predates the underscore ban and is grandfathered.
    if name == "all_modules" {
        return Ok(());
    }
    if !is_valid_identifier(name) {
        return Err(format!(
            "`{name}` is not a valid port name; names are lowercase letters, digits and dashes"
        ));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(format!("`{name}` is a reserved name"));
    }
    Ok(())
}

/// Feature names follow the port name rules; `core` and `default` are
/// additionally rejected by the reserved list.
pub fn validate_feature_name(name: &str) -> Result<(), String> {
    validate_port_name(name).map_err(|e| e.replace("port name", "feature name"))
}

/// A port pinned to a triplet; the unit the planner and the installed tree
/// operate on. Ordered lexicographically by `(name, triplet)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageSpec {
    name: String,
    triplet: Triplet,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>, triplet: Triplet) -> PackageSpec {
        PackageSpec {
            name: name.into(),
            triplet,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn triplet(&self) -> &Triplet {
        &self.triplet
    }

    /// The directory name used under `packages/` and in list files,
    /// e.g. `zlib_x64-linux`.
    pub fn dir(&self) -> String {
        format!("{}_{}", self.name, self.triplet)
    }
}

impl Display for PackageSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.triplet)
    }
}

/// One feature of one package spec.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureSpec {
    spec: PackageSpec,
    feature: String,
}

impl FeatureSpec {
    pub fn new(spec: PackageSpec, feature: impl Into<String>) -> FeatureSpec {
        FeatureSpec {
            spec,
            feature: feature.into(),
        }
    }

    pub fn spec(&self) -> &PackageSpec {
        &self.spec
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }
}

impl Display for FeatureSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.feature == CORE_FEATURE {
            write!(f, "{}", self.spec)
        } else {
            write!(f, "{}[{}]:{}", self.spec.name(), self.feature, self.spec.triplet())
        }
    }
}

/// A user-requested package with an explicit feature selection, before
/// `default` expansion. Parsed from arguments like `zlib[extra]:x64-linux`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FullPackageSpec {
    pub spec: PackageSpec,
    pub features: Vec<String>,
}

impl FullPackageSpec {
    pub fn new(spec: PackageSpec, features: Vec<String>) -> FullPackageSpec {
        FullPackageSpec { spec, features }
    }

    /// Parse `name[feat1,feat2]:triplet`, with the feature list and the
    /// triplet both optional. The default triplet fills the gap.
    pub fn parse(text: &str, default_triplet: &Triplet) -> Result<FullPackageSpec, String> {
        let (rest, triplet) = match text.split_once(':') {
            Some((rest, triplet_name)) if !triplet_name.is_empty() => {
                (rest, Triplet::from_canonical_name(triplet_name))
            }
            Some(_) => return Err(format!("expected a triplet after `:` in `{text}`")),
            None => (text, default_triplet.clone()),
        };

        let (name, features) = match rest.split_once('[') {
            Some((name, feature_list)) => {
                let feature_list = feature_list
                    .strip_suffix(']')
                    .ok_or_else(|| format!("missing closing ] in `{text}`"))?;
                let features = feature_list
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect();
                (name, features)
            }
            None => (rest, Vec::new()),
        };

        validate_port_name(name)?;
        for feature in &features {
            if feature != CORE_FEATURE && feature != DEFAULT_FEATURE && feature != "*" {
                validate_feature_name(feature)?;
            }
        }

        Ok(FullPackageSpec {
            spec: PackageSpec::new(name, triplet),
            features,
        })
    }
}

impl Display for FullPackageSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.features.is_empty() {
            write!(f, "{}", self.spec)
        } else {
            write!(
                f,
                "{}[{}]:{}",
                self.spec.name(),
                self.features.join(","),
                self.spec.triplet()
            )
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn triplet() -> Triplet {
        Triplet::from_canonical_name("x64-linux")
    }

    #[test]
    fn spec_ordering_is_name_then_triplet() {
        let a = PackageSpec::new("abc", Triplet::from_canonical_name("x64-windows"));
        let b = PackageSpec::new("abd", Triplet::from_canonical_name("arm64-linux"));
        let c = PackageSpec::new("abc", Triplet::from_canonical_name("x86-windows"));
        assert!(a < b);
        assert!(a < c);
    }

    #[test]
    fn parse_plain_name() {
        let parsed = FullPackageSpec::parse("zlib", &triplet()).unwrap();
        assert_eq!(parsed.spec.name(), "zlib");
        assert_eq!(parsed.spec.triplet(), &triplet());
        assert!(parsed.features.is_empty());
    }

    #[test]
    fn parse_features_and_triplet() {
        let parsed = FullPackageSpec::parse("pcl[core,tools]:arm-uwp", &triplet()).unwrap();
        assert_eq!(parsed.spec.name(), "pcl");
        assert_eq!(parsed.spec.triplet().canonical_name(), "arm-uwp");
        assert_eq!(parsed.features, ["core", "tools"]);
    }

    #[test]
    fn parse_rejects_unclosed_feature_list() {
        assert!(FullPackageSpec::parse("pcl[core:x64-linux", &triplet()).is_err());
    }

    #[test]
    fn reserved_and_malformed_names_are_rejected() {
        for bad in ["con", "core", "default", "lpt1", "Zlib", "", "-x", "x-", "a--b"] {
            assert!(validate_port_name(bad).is_err(), "{bad} should be invalid");
        }
        for good in ["zlib", "libpng16", "boost-asio", "7zip"] {
            assert!(validate_port_name(good).is_ok(), "{good} should be valid");
        }
    }
}
