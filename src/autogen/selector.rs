// src/autogen/selector.rs

//! Version transforms and selection

use crate::error::{Error, Result};
use crate::specs::Transform;
use crate::version::GentooPackage;
use std::collections::BTreeMap;
use tracing::debug;

/// The version picked for an atom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selected {
    /// Version used for the ebuild
    pub version: String,
    /// Upstream spelling of the same version
    pub original_version: String,
}

/// Upstream versions with their transformed spelling
#[derive(Debug, Clone, Default)]
pub struct VersionMap {
    to_raw: BTreeMap<String, String>,
    to_transformed: BTreeMap<String, String>,
}

impl VersionMap {
    /// Apply `transforms` left to right to every raw version
    ///
    /// When two raw versions collapse to the same spelling the first one
    /// wins.
    pub fn build(raw_versions: &[String], transforms: &[Transform]) -> Result<Self> {
        let mut map = Self::default();
        for raw in raw_versions {
            let mut version = raw.clone();
            for transform in transforms {
                version = apply_transform(transform, &version)?;
            }
            if map.to_raw.contains_key(&version) {
                continue;
            }
            map.to_raw.insert(version.clone(), raw.clone());
            map.to_transformed.insert(raw.clone(), version);
        }
        Ok(map)
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.to_raw.keys().map(String::as_str)
    }

    pub fn raw(&self, version: &str) -> Option<&str> {
        self.to_raw.get(version).map(String::as_str)
    }

    pub fn transformed(&self, raw: &str) -> Option<&str> {
        self.to_transformed.get(raw).map(String::as_str)
    }
}

fn apply_transform(transform: &Transform, version: &str) -> Result<String> {
    match transform.kind.as_str() {
        "string" => Ok(version.replace(&transform.pattern, &transform.replace)),
        other => Err(Error::UnsupportedTransform(other.to_string())),
    }
}

/// Turn a bare selector (`<1.20`) into a full constraint on `catpkg`
fn selector_constraint(catpkg: &str, selector: &str) -> String {
    let selector = selector.trim();
    if selector.contains('/') {
        return selector.to_string();
    }
    let split = selector
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '!'))
        .unwrap_or(selector.len());
    let (op, version) = selector.split_at(split);
    format!("{}{}-{}", op, catpkg, version)
}

/// Newest version admitted by every selector, or the newest overall
pub fn select(catpkg: &str, map: &VersionMap, selectors: &[String]) -> Result<Option<Selected>> {
    let constraints = selectors
        .iter()
        .map(|s| GentooPackage::parse(&selector_constraint(catpkg, s)))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut candidates: Vec<(GentooPackage, &str)> = map
        .versions()
        .filter_map(|v| match GentooPackage::parse(&format!("{}-{}", catpkg, v)) {
            Ok(pkg) if pkg.version.is_some() => Some((pkg, v)),
            _ => {
                debug!("{}: ignoring unparsable version '{}'", catpkg, v);
                None
            }
        })
        .collect();
    candidates.sort_by(|a, b| b.0.compare_version(&a.0));

    let found = candidates
        .into_iter()
        .find(|(pkg, _)| constraints.iter().all(|c| c.admit(pkg)));

    Ok(found.and_then(|(_, version)| {
        map.raw(version).map(|raw| Selected {
            version: version.to_string(),
            original_version: raw.to_string(),
        })
    }))
}
