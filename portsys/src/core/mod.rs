//! The shared data model: triplets, package and feature specs, versions.

mod spec;
mod triplet;
mod version;

pub use spec::{
    validate_feature_name, validate_port_name, FeatureSpec, FullPackageSpec, PackageSpec,
    CORE_FEATURE, DEFAULT_FEATURE,
};
pub use triplet::Triplet;
pub use version::{compare_schemed, compare_under, SchemedVersion, Version, VersionScheme};
