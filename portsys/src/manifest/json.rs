//! `vcpkg.json` manifest parsing and canonical serialization.
//!
//! Deserialization happens in two steps, a raw serde model followed by
//! cross-field validation, so that one pass can report several problems.

use crate::core::{SchemedVersion, Version, VersionScheme, CORE_FEATURE};
use crate::diagnostic::Diagnostics;
use crate::manifest::{
    license, CoreParagraph, Dependency, DependencyOverride, FeatureParagraph, SourceControlFile,
};
use platform_expr::{Expr, MultipleBinaryOperators};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    fn into_lines(self) -> Vec<String> {
        match self {
            StringOrList::One(text) => vec![text],
            StringOrList::Many(lines) => lines,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        features: Vec<RawDependencyFeature>,
        #[serde(rename = "default-features")]
        default_features: Option<bool>,
        platform: Option<String>,
        #[serde(default)]
        host: bool,
        #[serde(rename = "version>=")]
        minimum_version: Option<String>,
        #[serde(flatten)]
        unknown: BTreeMap<String, Value>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependencyFeature {
    Name(String),
    Detailed {
        name: String,
        #[serde(flatten)]
        unknown: BTreeMap<String, Value>,
    },
}

#[derive(Debug, Default, Deserialize)]
struct RawFeature {
    description: Option<StringOrList>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    supports: Option<String>,
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawNamedFeature {
    name: String,
    #[serde(flatten)]
    feature: RawFeature,
}

/// The map form is current; the array form appears in older manifests.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFeatures {
    Map(BTreeMap<String, RawFeature>),
    List(Vec<RawNamedFeature>),
}

#[derive(Debug, Deserialize)]
struct RawOverride {
    name: String,
    version: Option<String>,
    #[serde(rename = "version-string")]
    version_string: Option<String>,
    #[serde(rename = "version-semver")]
    version_semver: Option<String>,
    #[serde(rename = "version-date")]
    version_date: Option<String>,
    #[serde(rename = "port-version", default)]
    port_version: u32,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    #[serde(rename = "version-string")]
    version_string: Option<String>,
    #[serde(rename = "version-semver")]
    version_semver: Option<String>,
    #[serde(rename = "version-date")]
    version_date: Option<String>,
    #[serde(rename = "port-version", default)]
    port_version: u32,
    maintainers: Option<StringOrList>,
    description: Option<StringOrList>,
    homepage: Option<String>,
    documentation: Option<String>,
    license: Option<Value>,
    supports: Option<String>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    #[serde(rename = "default-features", default)]
    default_features: Vec<String>,
    features: Option<RawFeatures>,
    #[serde(default)]
    overrides: Vec<RawOverride>,
    #[serde(rename = "builtin-baseline")]
    builtin_baseline: Option<String>,
    /// Parsed separately by the registry configuration loader.
    #[serde(rename = "vcpkg-configuration")]
    #[allow(dead_code)]
    vcpkg_configuration: Option<Value>,
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

/// Parse manifest text into a source control file, accumulating problems
/// in `diagnostics`. Unknown fields warn; structural problems error.
pub fn parse_manifest(
    text: &str,
    origin: &str,
    diagnostics: &mut Diagnostics,
) -> Option<SourceControlFile> {
    let raw: RawManifest = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            diagnostics.error((origin, e.line(), e.column()), e.to_string());
            return None;
        }
    };

    warn_unknown_fields(&raw.unknown, "manifest", origin, diagnostics);

    let name = match &raw.name {
        Some(name) => name.clone(),
        None => {
            diagnostics.error(origin, "missing required field `name`");
            return None;
        }
    };

    let version = parse_version_fields(
        &raw.version,
        &raw.version_string,
        &raw.version_semver,
        &raw.version_date,
        raw.port_version,
        origin,
        diagnostics,
    )?;

    let license = match &raw.license {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => {
            license::check_expression(text, origin, diagnostics);
            Some(text.clone())
        }
        Some(_) => {
            diagnostics.error(origin, "field `license` must be a string or null");
            None
        }
    };

    let supports = parse_platform_field(raw.supports.as_deref(), "supports", origin, diagnostics);

    let dependencies = raw
        .dependencies
        .into_iter()
        .filter_map(|raw| convert_dependency(raw, origin, diagnostics))
        .collect();

    let features = match raw.features {
        None => Vec::new(),
        Some(RawFeatures::Map(map)) => map
            .into_iter()
            .map(|(name, feature)| convert_feature(name, feature, origin, diagnostics))
            .collect(),
        Some(RawFeatures::List(list)) => list
            .into_iter()
            .map(|named| convert_feature(named.name, named.feature, origin, diagnostics))
            .collect(),
    };

    let overrides = raw
        .overrides
        .into_iter()
        .filter_map(|raw| convert_override(raw, origin, diagnostics))
        .collect();

    Some(SourceControlFile {
        core: CoreParagraph {
            name,
            version,
            description: raw.description.map(StringOrList::into_lines).unwrap_or_default(),
            maintainers: raw.maintainers.map(StringOrList::into_lines).unwrap_or_default(),
            homepage: raw.homepage,
            documentation: raw.documentation,
            license,
            supports,
            dependencies,
            default_features: raw.default_features,
            overrides,
            builtin_baseline: raw.builtin_baseline,
        },
        features,
    })
}

fn warn_unknown_fields(
    unknown: &BTreeMap<String, Value>,
    where_: &str,
    origin: &str,
    diagnostics: &mut Diagnostics,
) {
    for key in unknown.keys() {
        // `$schema`-style annotations are intentionally ignored.
        if !key.starts_with('$') {
            diagnostics.warning(origin, format!("unknown field `{key}` in {where_}"));
        }
    }
}

/// Require exactly one of the four version fields; its identity carries
/// the scheme.
#[allow(clippy::too_many_arguments)]
fn parse_version_fields(
    relaxed: &Option<String>,
    string: &Option<String>,
    semver: &Option<String>,
    date: &Option<String>,
    port_version: u32,
    origin: &str,
    diagnostics: &mut Diagnostics,
) -> Option<SchemedVersion> {
    let present: Vec<(VersionScheme, &String)> = [
        (VersionScheme::Relaxed, relaxed),
        (VersionScheme::String, string),
        (VersionScheme::Semver, semver),
        (VersionScheme::Date, date),
    ]
    .into_iter()
    .filter_map(|(scheme, text)| text.as_ref().map(|t| (scheme, t)))
    .collect();

    match present.as_slice() {
        [] => {
            diagnostics.error(
                origin,
                "missing a version field; expected one of `version`, `version-string`, \
                 `version-semver`, or `version-date`",
            );
            None
        }
        [(scheme, text)] => Some(SchemedVersion::new(
            *scheme,
            Version::new((*text).clone(), port_version),
        )),
        _ => {
            diagnostics.error(
                origin,
                "more than one version field; `version`, `version-string`, `version-semver` \
                 and `version-date` are mutually exclusive",
            );
            None
        }
    }
}

fn parse_platform_field(
    text: Option<&str>,
    field: &str,
    origin: &str,
    diagnostics: &mut Diagnostics,
) -> Expr {
    match text {
        None => Expr::default(),
        Some(text) => match Expr::parse(text, MultipleBinaryOperators::Deny) {
            Ok(expr) => expr,
            Err(e) => {
                let (row, col) = e.position();
                diagnostics.error(
                    (origin, row, col),
                    format!("in field `{field}`: {e}"),
                );
                Expr::default()
            }
        },
    }
}

fn convert_dependency(
    raw: RawDependency,
    origin: &str,
    diagnostics: &mut Diagnostics,
) -> Option<Dependency> {
    match raw {
        RawDependency::Name(name) => Some(Dependency::simple(name)),
        RawDependency::Detailed {
            name,
            features,
            default_features,
            platform,
            host,
            minimum_version,
            unknown,
        } => {
            warn_unknown_fields(&unknown, &format!("dependency `{name}`"), origin, diagnostics);
            let mut feature_names: Vec<String> = features
                .into_iter()
                .map(|feature| match feature {
                    RawDependencyFeature::Name(name) => name,
                    RawDependencyFeature::Detailed { name, unknown } => {
                        warn_unknown_fields(
                            &unknown,
                            &format!("feature reference `{name}`"),
                            origin,
                            diagnostics,
                        );
                        name
                    }
                })
                .collect();
            if default_features == Some(false) && !feature_names.iter().any(|f| f == CORE_FEATURE) {
                feature_names.push(CORE_FEATURE.to_string());
            }
            let constraint = match minimum_version {
                None => None,
                Some(text) => match Version::parse(&text) {
                    Ok(version) => Some(version),
                    Err(problem) => {
                        diagnostics.error(origin, format!("in `version>=` of `{name}`: {problem}"));
                        None
                    }
                },
            };
            Some(Dependency {
                platform: parse_platform_field(platform.as_deref(), "platform", origin, diagnostics),
                name,
                features: feature_names,
                host,
                constraint,
            })
        }
    }
}

fn convert_feature(
    name: String,
    raw: RawFeature,
    origin: &str,
    diagnostics: &mut Diagnostics,
) -> FeatureParagraph {
    warn_unknown_fields(&raw.unknown, &format!("feature `{name}`"), origin, diagnostics);
    FeatureParagraph {
        supports: parse_platform_field(raw.supports.as_deref(), "supports", origin, diagnostics),
        description: raw.description.map(StringOrList::into_lines).unwrap_or_default(),
        dependencies: raw
            .dependencies
            .into_iter()
            .filter_map(|raw| convert_dependency(raw, origin, diagnostics))
            .collect(),
        name,
    }
}

fn convert_override(
    raw: RawOverride,
    origin: &str,
    diagnostics: &mut Diagnostics,
) -> Option<DependencyOverride> {
    let texts: Vec<&String> = [
        &raw.version,
        &raw.version_string,
        &raw.version_semver,
        &raw.version_date,
    ]
    .into_iter()
    .flatten()
    .collect();
    match texts.as_slice() {
        [text] => Some(DependencyOverride {
            name: raw.name,
            version: Version::new((*text).clone(), raw.port_version),
        }),
        [] => {
            diagnostics.error(
                origin,
                format!("override of `{}` is missing a version field", raw.name),
            );
            None
        }
        _ => {
            diagnostics.error(
                origin,
                format!("override of `{}` has more than one version field", raw.name),
            );
            None
        }
    }
}

/// Serialize back to canonical manifest JSON. Dependency lists are sorted
/// by name then platform; parsing the output yields a semantically equal
/// source control file.
pub fn serialize_manifest(scf: &SourceControlFile) -> Value {
    let mut root = Map::new();
    root.insert("name".into(), json!(scf.core.name));
    root.insert(
        scf.core.version.scheme.field_name().into(),
        json!(scf.core.version.version.text()),
    );
    if scf.core.version.version.port_version() != 0 {
        root.insert(
            "port-version".into(),
            json!(scf.core.version.version.port_version()),
        );
    }
    if !scf.core.maintainers.is_empty() {
        root.insert("maintainers".into(), one_or_many(&scf.core.maintainers));
    }
    if !scf.core.description.is_empty() {
        root.insert("description".into(), one_or_many(&scf.core.description));
    }
    if let Some(homepage) = &scf.core.homepage {
        root.insert("homepage".into(), json!(homepage));
    }
    if let Some(documentation) = &scf.core.documentation {
        root.insert("documentation".into(), json!(documentation));
    }
    if let Some(license) = &scf.core.license {
        root.insert("license".into(), json!(license));
    }
    if !scf.core.supports.is_empty() {
        root.insert("supports".into(), json!(scf.core.supports.to_string()));
    }
    if let Some(baseline) = &scf.core.builtin_baseline {
        root.insert("builtin-baseline".into(), json!(baseline));
    }
    if !scf.core.dependencies.is_empty() {
        root.insert(
            "dependencies".into(),
            serialize_dependencies(&scf.core.dependencies),
        );
    }
    if !scf.core.default_features.is_empty() {
        let mut defaults = scf.core.default_features.clone();
        defaults.sort();
        root.insert("default-features".into(), json!(defaults));
    }
    if !scf.features.is_empty() {
        let mut features = Map::new();
        let mut sorted: Vec<&FeatureParagraph> = scf.features.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        for feature in sorted {
            let mut body = Map::new();
            body.insert("description".into(), one_or_many(&feature.description));
            if !feature.supports.is_empty() {
                body.insert("supports".into(), json!(feature.supports.to_string()));
            }
            if !feature.dependencies.is_empty() {
                body.insert(
                    "dependencies".into(),
                    serialize_dependencies(&feature.dependencies),
                );
            }
            features.insert(feature.name.clone(), Value::Object(body));
        }
        root.insert("features".into(), Value::Object(features));
    }
    if !scf.core.overrides.is_empty() {
        let overrides: Vec<Value> = scf
            .core
            .overrides
            .iter()
            .map(|o| {
                let mut body = Map::new();
                body.insert("name".into(), json!(o.name));
                body.insert("version".into(), json!(o.version.text()));
                if o.version.port_version() != 0 {
                    body.insert("port-version".into(), json!(o.version.port_version()));
                }
                Value::Object(body)
            })
            .collect();
        root.insert("overrides".into(), Value::Array(overrides));
    }
    Value::Object(root)
}

fn one_or_many(lines: &[String]) -> Value {
    if lines.len() == 1 {
        json!(lines[0])
    } else {
        json!(lines)
    }
}

fn serialize_dependencies(dependencies: &[Dependency]) -> Value {
    let mut sorted: Vec<&Dependency> = dependencies.iter().collect();
    sorted.sort_by_key(|d| (&d.name, d.platform.to_string()));
    Value::Array(sorted.iter().map(|d| serialize_dependency(d)).collect())
}

fn serialize_dependency(dependency: &Dependency) -> Value {
    let plain = dependency.features.is_empty()
        && dependency.platform.is_empty()
        && !dependency.host
        && dependency.constraint.is_none();
    if plain {
        return json!(dependency.name);
    }
    let mut body = Map::new();
    body.insert("name".into(), json!(dependency.name));
    if dependency.host {
        body.insert("host".into(), json!(true));
    }
    let mut features: Vec<&String> = dependency
        .features
        .iter()
        .filter(|f| *f != CORE_FEATURE)
        .collect();
    features.sort();
    if !dependency.wants_default_features() {
        body.insert("default-features".into(), json!(false));
    }
    if !features.is_empty() {
        body.insert("features".into(), json!(features));
    }
    if !dependency.platform.is_empty() {
        body.insert("platform".into(), json!(dependency.platform.to_string()));
    }
    if let Some(constraint) = &dependency.constraint {
        body.insert("version>=".into(), json!(constraint.to_string()));
    }
    Value::Object(body)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::VersionScheme;

    fn parse_ok(text: &str) -> SourceControlFile {
        let mut diagnostics = Diagnostics::new();
        let scf = parse_manifest(text, "vcpkg.json", &mut diagnostics);
        assert!(!diagnostics.has_errors(), "{diagnostics}");
        scf.unwrap()
    }

    #[test]
    fn minimal_manifest() {
        let scf = parse_ok(r#"{ "name": "zlib", "version": "1.2.13" }"#);
        assert_eq!(scf.core.name, "zlib");
        assert_eq!(scf.core.version.scheme, VersionScheme::Relaxed);
        assert_eq!(scf.core.version.version.text(), "1.2.13");
    }

    #[test]
    fn version_field_selects_scheme() {
        for (field, scheme) in [
            ("version", VersionScheme::Relaxed),
            ("version-string", VersionScheme::String),
            ("version-semver", VersionScheme::Semver),
            ("version-date", VersionScheme::Date),
        ] {
            let text = format!(r#"{{ "name": "a", "{field}": "1.0.0" }}"#);
            let scf = parse_ok(&text);
            assert_eq!(scf.core.version.scheme, scheme);
        }
    }

    #[test]
    fn conflicting_version_fields_error() {
        let mut diagnostics = Diagnostics::new();
        let scf = parse_manifest(
            r#"{ "name": "a", "version": "1", "version-string": "1" }"#,
            "vcpkg.json",
            &mut diagnostics,
        );
        assert!(scf.is_none());
        assert!(diagnostics.to_string().contains("more than one version field"));
    }

    #[test]
    fn missing_name_errors() {
        let mut diagnostics = Diagnostics::new();
        assert!(parse_manifest(r#"{ "version": "1" }"#, "vcpkg.json", &mut diagnostics).is_none());
        assert!(diagnostics.to_string().contains("missing required field `name`"));
    }

    #[test]
    fn unknown_fields_warn_but_parse() {
        let mut diagnostics = Diagnostics::new();
        let scf = parse_manifest(
            r#"{ "name": "a", "version": "1", "frobnicate": true, "$comment": "ok" }"#,
            "vcpkg.json",
            &mut diagnostics,
        );
        assert!(scf.is_some());
        assert!(!diagnostics.has_errors());
        assert!(diagnostics.to_string().contains("unknown field `frobnicate`"));
        assert!(!diagnostics.to_string().contains("$comment"));
    }

    #[test]
    fn dependency_forms() {
        let scf = parse_ok(
            r#"{
                "name": "zlib2", "version": "1.5",
                "dependencies": [
                    "bzip",
                    { "name": "openssl", "platform": "!uwp", "version>=": "3.0.0" },
                    { "name": "tool", "host": true, "default-features": false },
                    { "name": "pcl", "features": ["tools", { "name": "cuda" }] }
                ]
            }"#,
        );
        let deps = &scf.core.dependencies;
        assert_eq!(deps[0], Dependency::simple("bzip"));
        assert_eq!(deps[1].constraint, Some(Version::new("3.0.0", 0)));
        assert!(!deps[1].platform.is_empty());
        assert!(deps[2].host);
        assert!(!deps[2].wants_default_features());
        assert_eq!(deps[3].features, ["tools", "cuda"]);
    }

    #[test]
    fn features_map_and_defaults() {
        let scf = parse_ok(
            r#"{
                "name": "zlib2", "version": "1.5",
                "default-features": ["a"],
                "features": {
                    "a": { "description": "feature a" },
                    "b": { "description": "feature b", "dependencies": ["bzip"], "supports": "!windows" }
                }
            }"#,
        );
        assert_eq!(scf.core.default_features, ["a"]);
        assert_eq!(scf.features.len(), 2);
        let b = scf.find_feature("b").unwrap();
        assert_eq!(b.dependencies.len(), 1);
        assert!(!b.supports.is_empty());
    }

    #[test]
    fn overrides_parse() {
        let scf = parse_ok(
            r#"{
                "name": "app", "version": "1",
                "overrides": [ { "name": "fmt", "version": "10.1.0" } ]
            }"#,
        );
        assert_eq!(scf.core.overrides.len(), 1);
        assert_eq!(scf.core.overrides[0].version, Version::new("10.1.0", 0));
    }

    #[test]
    fn bad_platform_expression_is_positioned() {
        let mut diagnostics = Diagnostics::new();
        parse_manifest(
            r#"{ "name": "a", "version": "1", "supports": "windows & linux | osx" }"#,
            "vcpkg.json",
            &mut diagnostics,
        );
        assert!(diagnostics.has_errors());
        assert!(diagnostics.to_string().contains("mixing & and |"));
    }

    #[test]
    fn serialize_round_trip_is_semantically_stable() {
        let scf = parse_ok(
            r#"{
                "name": "zlib2", "version": "1.5", "port-version": 2,
                "description": "compression",
                "license": "Zlib",
                "supports": "!uwp",
                "dependencies": [
                    { "name": "openssl", "platform": "!uwp", "version>=": "3.0.0" },
                    "bzip"
                ],
                "default-features": ["a"],
                "features": { "a": { "description": "..." } },
                "overrides": [ { "name": "fmt", "version": "10.1.0" } ]
            }"#,
        );
        let serialized = serialize_manifest(&scf).to_string();
        let reparsed = parse_ok(&serialized);
        let reserialized = serialize_manifest(&reparsed).to_string();
        assert_eq!(serialized, reserialized);
        assert_eq!(reparsed.core.name, scf.core.name);
        assert_eq!(reparsed.core.dependencies.len(), 2);
        // Dependencies are emitted in sorted order.
        assert!(serialized.find("bzip").unwrap() < serialized.find("openssl").unwrap());
    }

    #[test]
    fn license_null_is_accepted() {
        let scf = parse_ok(r#"{ "name": "a", "version": "1", "license": null }"#);
        assert_eq!(scf.core.license, None);
    }
}
