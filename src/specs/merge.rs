// src/specs/merge.rs

//! Merge kit and distfiles specfiles
//!
//! ```yaml
//! sources:
//!   - name: core-kit
//!     url: https://github.com/macaroni-os/core-kit.git
//!     branch: next
//! target:
//!   name: mark-kit
//!   url: https://github.com/macaroni-os/mark-kit.git
//!   branch: mark-v1
//!   eclasses:
//!     include:
//!       core-kit: ["^go-.*"]
//!   atoms:
//!     - pkg: dev-lang/go
//!       max_versions: 2
//! ```

use super::{load_yaml, spec_dir};
use crate::error::{Error, Result};
use crate::version::GentooPackage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Versions kept by the cleaner when nothing else is configured
pub const DEFAULT_MAX_VERSIONS: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeKit {
    #[serde(default)]
    pub sources: Vec<KitSource>,
    pub target: TargetKit,

    /// Directory of the specfile, for relative fixup paths
    #[serde(skip)]
    pub spec_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitSource {
    pub name: String,
    pub url: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha1: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetKit {
    pub name: String,
    #[serde(default)]
    pub url: String,
    pub branch: String,
    #[serde(default)]
    pub eclasses: EclassesSpec,
    #[serde(default)]
    pub metadata: KitMetadata,
    #[serde(default)]
    pub thirdpartymirrors: Vec<ThirdPartyMirror>,
    #[serde(default)]
    pub fixups: FixupsSpec,
    #[serde(default)]
    pub atoms: Vec<TargetAtom>,
    #[serde(default)]
    pub atoms_defaults: AtomDefaults,
}

/// Eclass regexes per source kit name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EclassesSpec {
    #[serde(default)]
    pub include: BTreeMap<String, Vec<String>>,
}

/// `metadata/layout.conf` inputs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KitMetadata {
    #[serde(default)]
    pub masters: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThirdPartyMirror {
    pub name: String,
    #[serde(default)]
    pub uri: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixupsSpec {
    #[serde(default)]
    pub include: Vec<Fixup>,
}

/// Copy of a file or directory from the specfile tree into the kit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    pub to: String,
}

impl Fixup {
    pub fn commit_message(&self) -> String {
        match &self.name {
            Some(name) => format!("Fixup {}", name),
            None => format!("Fixup {}", self.to),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAtom {
    pub pkg: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_versions: Option<usize>,
    /// Pinned versions the cleaner never removes
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cond_ignore_slot: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_versions: Option<usize>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub cond_ignore_slot: bool,
}

impl TargetAtom {
    pub fn new(pkg: &str) -> Self {
        Self {
            pkg: pkg.to_string(),
            ..Default::default()
        }
    }

    pub fn max_versions(&self, defaults: &AtomDefaults) -> usize {
        self.max_versions
            .or(defaults.max_versions)
            .unwrap_or(DEFAULT_MAX_VERSIONS)
    }

    pub fn conditions<'a>(&'a self, defaults: &'a AtomDefaults) -> &'a [String] {
        if self.conditions.is_empty() {
            &defaults.conditions
        } else {
            &self.conditions
        }
    }

    pub fn ignore_slot(&self, defaults: &AtomDefaults) -> bool {
        self.cond_ignore_slot.unwrap_or(defaults.cond_ignore_slot)
    }

    /// `category/package` of the atom, without operator or version
    pub fn catpkg(&self) -> Result<String> {
        Ok(GentooPackage::parse(&self.pkg)?.catpkg())
    }

    /// Whether the atom is selected by a caller-provided filter
    ///
    /// Entries match either the full `category/package` or the bare name.
    pub fn matches_filter(&self, filter: &[String]) -> bool {
        if filter.is_empty() {
            return true;
        }
        match GentooPackage::parse(&self.pkg) {
            Ok(pkg) => filter.iter().any(|f| *f == pkg.catpkg() || *f == pkg.name),
            Err(_) => false,
        }
    }
}

impl MergeKit {
    /// Load and validate a merge kit specfile
    pub fn load(path: &Path) -> Result<Self> {
        let mut spec: MergeKit = load_yaml(path)?;
        spec.spec_dir = spec_dir(path);
        spec.validate()
            .map_err(|message| Error::SpecParse {
                path: path.display().to_string(),
                message,
            })?;
        Ok(spec)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.target.name.is_empty() {
            return Err("target.name is mandatory".to_string());
        }
        if self.target.branch.is_empty() {
            return Err("target.branch is mandatory".to_string());
        }
        for source in &self.sources {
            if source.name.is_empty() || source.url.is_empty() || source.branch.is_empty() {
                return Err(format!(
                    "source '{}' needs name, url and branch",
                    source.name
                ));
            }
        }
        for atom in &self.target.atoms {
            let pkg = GentooPackage::parse(&atom.pkg).map_err(|e| e.to_string())?;
            for cond in atom.conditions.iter().chain(&self.target.atoms_defaults.conditions) {
                GentooPackage::parse(cond).map_err(|e| format!("{}: {}", pkg.catpkg(), e))?;
            }
        }
        for fixup in &self.target.fixups.include {
            if fixup.file.is_none() == fixup.dir.is_none() {
                return Err(format!("fixup to '{}' needs exactly one of file or dir", fixup.to));
            }
        }
        Ok(())
    }

    /// Source kit by name
    pub fn source(&self, name: &str) -> Option<&KitSource> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Mirror aliases of the target kit
    pub fn mirrors(&self) -> BTreeMap<String, Vec<String>> {
        self.target
            .thirdpartymirrors
            .iter()
            .map(|m| (m.name.clone(), m.uri.clone()))
            .collect()
    }
}

/// Fetcher specfile: a merge kit plus mirrors tried after every `SRC_URI`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistfilesSpec {
    #[serde(flatten)]
    pub kit: MergeKit,
    #[serde(default)]
    pub fallback_mirrors: Vec<ThirdPartyMirror>,
}

impl DistfilesSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let mut spec: DistfilesSpec = load_yaml(path)?;
        spec.kit.spec_dir = spec_dir(path);
        spec.kit.validate().map_err(|message| Error::SpecParse {
            path: path.display().to_string(),
            message,
        })?;
        Ok(spec)
    }

    /// Base URIs of every fallback mirror, in declaration order
    pub fn fallback_uris(&self) -> Vec<String> {
        self.fallback_mirrors
            .iter()
            .flat_map(|m| m.uri.iter().cloned())
            .collect()
    }
}
