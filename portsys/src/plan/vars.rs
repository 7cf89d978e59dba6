//! Dep-info variable providers.
//!
//! Evaluating platform expressions needs the target triplet's build
//! variables (`VCPKG_TARGET_ARCHITECTURE` and friends). The real values
//! come from the external toolchain probe; the planner only sees this
//! trait and batches its requests so a probe implementation can amortize
//! process launches.

use crate::core::{PackageSpec, Triplet};
use anyhow::{Context as _, Result};
use platform_expr::Context;
use std::collections::HashMap;
use std::path::PathBuf;

pub trait TripletVarProvider {
    /// Make dep-info variables available for every listed spec. Called
    /// once per planning round with the batch of specs that need them.
    fn load_dep_info_vars(&mut self, specs: &[PackageSpec], host_triplet: &Triplet) -> Result<()>;

    /// The loaded variables for `spec`. Only valid after a
    /// [`Self::load_dep_info_vars`] call that covered the spec.
    fn dep_info_vars(&self, spec: &PackageSpec) -> Option<Context>;
}

/// A variable provider that reads `set(VCPKG_... "value")` assignments
/// straight out of triplet files. Triplets that compute variables
/// programmatically need the full toolchain probe instead; for the
/// standard triplet corpus the static read is exact.
#[derive(Debug, Default)]
pub struct SimpleTripletVarProvider {
    triplet_dirs: Vec<PathBuf>,
    cache: HashMap<String, Context>,
    host_triplet: Option<Triplet>,
}

impl SimpleTripletVarProvider {
    /// `triplet_dirs` are searched in order for `<triplet>.cmake`.
    pub fn new(triplet_dirs: Vec<PathBuf>) -> SimpleTripletVarProvider {
        SimpleTripletVarProvider {
            triplet_dirs,
            cache: HashMap::new(),
            host_triplet: None,
        }
    }

    fn load_triplet(&self, triplet: &Triplet) -> Result<Context> {
        let file_name = format!("{triplet}.cmake");
        let path = self
            .triplet_dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
            .with_context(|| format!("no triplet file found for `{triplet}`"))?;
        let text = crate::common::fs::read_to_string(&path)?;
        Ok(parse_triplet_assignments(&text))
    }

}

impl TripletVarProvider for SimpleTripletVarProvider {
    fn load_dep_info_vars(&mut self, specs: &[PackageSpec], host_triplet: &Triplet) -> Result<()> {
        self.host_triplet = Some(host_triplet.clone());
        for spec in specs {
            let key = spec.triplet().canonical_name().to_string();
            if !self.cache.contains_key(&key) {
                let context = self.load_triplet(spec.triplet())?;
                self.cache.insert(key, context);
            }
        }
        Ok(())
    }

    fn dep_info_vars(&self, spec: &PackageSpec) -> Option<Context> {
        // Native-ness is per spec, not per triplet file, so it is applied
        // on the way out.
        let mut context = self.cache.get(spec.triplet().canonical_name())?.clone();
        if context.get("Z_VCPKG_IS_NATIVE").is_none() {
            let is_native = self.host_triplet.as_ref() == Some(spec.triplet());
            context.set("Z_VCPKG_IS_NATIVE", if is_native { "1" } else { "0" });
        }
        Some(context)
    }
}

/// Extract simple `set(NAME value)` assignments. Quoted and bare values
/// are both accepted; anything fancier is left to the real probe.
fn parse_triplet_assignments(text: &str) -> Context {
    let mut context = Context::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line
            .strip_prefix("set(")
            .or_else(|| line.strip_prefix("SET("))
        else {
            continue;
        };
        let Some(body) = rest.strip_suffix(')') else {
            continue;
        };
        let mut parts = body.splitn(2, char::is_whitespace);
        let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        context.set(name.trim(), value);
    }
    context
}

/// A fixed in-memory provider for tests and for drivers that already know
/// their variables.
#[derive(Debug, Default)]
pub struct StaticVarProvider {
    by_triplet: HashMap<String, Context>,
    host_triplet: Option<Triplet>,
}

impl StaticVarProvider {
    pub fn new() -> StaticVarProvider {
        StaticVarProvider::default()
    }

    pub fn set_triplet(&mut self, triplet: &Triplet, context: Context) -> &mut Self {
        self.by_triplet
            .insert(triplet.canonical_name().to_string(), context);
        self
    }
}

impl TripletVarProvider for StaticVarProvider {
    fn load_dep_info_vars(&mut self, _specs: &[PackageSpec], host_triplet: &Triplet) -> Result<()> {
        self.host_triplet = Some(host_triplet.clone());
        Ok(())
    }

    fn dep_info_vars(&self, spec: &PackageSpec) -> Option<Context> {
        let mut context = self
            .by_triplet
            .get(spec.triplet().canonical_name())
            .cloned()?;
        if context.get("Z_VCPKG_IS_NATIVE").is_none() {
            let is_native = self.host_triplet.as_ref() == Some(spec.triplet());
            context.set("Z_VCPKG_IS_NATIVE", if is_native { "1" } else { "0" });
        }
        Some(context)
    }
}
