// src/cache/mod.rs

//! Kit cache records
//!
//! The external scanner writes one JSON object per line, either bare or
//! wrapped as `{"spec": {...}}`:
//!
//! ```json
//! {"cache_data_version": "1.0.6", "atoms": {"dev-lang/foo-1.0": {...}}, "metadata_errors": {}}
//! ```
//!
//! Each atom carries its distfiles, its ebuild metadata (SLOT, KEYWORDS,
//! ...) and the md5 of its ebuild, used to detect recipe changes without a
//! version bump.

mod scanner;

pub use scanner::{CacheGenerator, ReposcanCli, ScanRequest};

use crate::error::{Error, Result};
use crate::version::{GentooPackage, VersionError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One distfile referenced by an atom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoScanFile {
    pub name: String,
    #[serde(deserialize_with = "deserialize_size", default)]
    pub size: u64,
    #[serde(default)]
    pub src_uri: Vec<String>,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
}

impl RepoScanFile {
    pub fn sha512(&self) -> Option<&str> {
        self.hashes.get("sha512").map(String::as_str)
    }

    pub fn blake2b(&self) -> Option<&str> {
        self.hashes.get("blake2b").map(String::as_str)
    }

    pub fn md5(&self) -> Option<&str> {
        self.hashes.get("md5").map(String::as_str)
    }
}

/// Sizes appear both as JSON numbers and as strings
fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(u64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// One ebuild version of one kit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RepoScanAtom {
    #[serde(default)]
    pub atom: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub kit: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub files: Vec<RepoScanFile>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub md5: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl RepoScanAtom {
    /// `category/package`
    pub fn catpkg(&self) -> String {
        format!("{}/{}", self.category, self.package)
    }

    /// Parse the atom into a comparable package, slot and kit included
    pub fn to_gentoo_package(&self) -> std::result::Result<GentooPackage, VersionError> {
        let mut pkg = GentooPackage::parse(&self.atom)?;
        if let Some(slot) = self.metadata.get("SLOT") {
            pkg = pkg.with_raw_slot(slot);
        }
        if !self.kit.is_empty() {
            pkg.repository = Some(self.kit.clone());
        }
        Ok(pkg)
    }

    /// Version with revision (`1.2-r1`)
    pub fn pvr(&self) -> std::result::Result<String, VersionError> {
        Ok(GentooPackage::parse(&self.atom)?.pvr())
    }

    pub fn keywords(&self) -> &str {
        self.metadata.get("KEYWORDS").map(String::as_str).unwrap_or("")
    }

    pub fn slot(&self) -> &str {
        self.metadata.get("SLOT").map(String::as_str).unwrap_or("0")
    }

    /// Ebuild file name (`pkg-1.2-r1.ebuild`)
    pub fn ebuild_name(&self) -> std::result::Result<String, VersionError> {
        Ok(format!("{}-{}.ebuild", self.package, self.pvr()?))
    }

    /// Package directory inside a kit checkout
    pub fn package_dir(&self, kit_dir: &Path) -> PathBuf {
        kit_dir.join(&self.category).join(&self.package)
    }

    /// Ebuild path inside a kit checkout
    pub fn ebuild_path(&self, kit_dir: &Path) -> std::result::Result<PathBuf, VersionError> {
        Ok(self.package_dir(kit_dir).join(self.ebuild_name()?))
    }

    /// Names of the atom's distfiles
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.name.as_str())
    }
}

/// One cache record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoScanSpec {
    #[serde(default)]
    pub cache_data_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub atoms: BTreeMap<String, RepoScanAtom>,
    #[serde(default)]
    pub metadata_errors: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CacheRecord {
    Wrapped { spec: RepoScanSpec },
    Bare(RepoScanSpec),
}

impl CacheRecord {
    fn into_spec(self) -> RepoScanSpec {
        match self {
            CacheRecord::Wrapped { spec } => spec,
            CacheRecord::Bare(spec) => spec,
        }
    }
}

impl RepoScanSpec {
    /// Load every record of a cache file
    ///
    /// Files are read as JSONL; a file holding a single pretty-printed
    /// object is accepted as well.
    pub fn load_file(path: &Path) -> Result<Vec<RepoScanSpec>> {
        let content = fs::read_to_string(path).map_err(|e| Error::CacheRead {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut specs = Vec::new();
        let mut line_error = None;
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CacheRecord>(line) {
                Ok(record) => specs.push(record.into_spec()),
                Err(e) => {
                    line_error = Some(format!("line {}: {}", idx + 1, e));
                    break;
                }
            }
        }

        if let Some(message) = line_error {
            let record: CacheRecord =
                serde_json::from_str(&content).map_err(|_| Error::CacheRead {
                    path: path.display().to_string(),
                    message,
                })?;
            specs = vec![record.into_spec()];
        }

        for spec in &mut specs {
            spec.fill_atom_keys();
            if !spec.metadata_errors.is_empty() {
                debug!(
                    "{}: {} atoms with metadata errors",
                    path.display(),
                    spec.metadata_errors.len()
                );
            }
        }
        Ok(specs)
    }

    /// Records written by older scanners omit the `atom` field
    fn fill_atom_keys(&mut self) {
        for (key, atom) in self.atoms.iter_mut() {
            if atom.atom.is_empty() {
                atom.atom = key.clone();
            }
            if atom.category.is_empty() || atom.package.is_empty() {
                if let Ok(pkg) = GentooPackage::parse(key) {
                    atom.category = pkg.category;
                    atom.package = pkg.name;
                }
            }
        }
    }

    /// Serialize as one JSONL record
    pub fn to_jsonl(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::ParseError(e.to_string()))
    }
}

/// `catpkg → atoms` index built from cache records
#[derive(Debug, Clone, Default)]
pub struct AtomMap {
    atoms: BTreeMap<String, Vec<RepoScanAtom>>,
}

impl AtomMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and index every given cache file
    pub fn load_files(paths: &[PathBuf]) -> Result<Self> {
        let mut map = Self::new();
        for path in paths {
            for spec in RepoScanSpec::load_file(path)? {
                map.add_spec(spec);
            }
        }
        Ok(map)
    }

    /// Index a record; atoms with a non-empty `status` are skipped
    pub fn add_spec(&mut self, spec: RepoScanSpec) {
        for (key, atom) in spec.atoms {
            if let Some(status) = atom.status.as_deref()
                && !status.is_empty()
            {
                warn!("Skipping atom {} with status '{}'", key, status);
                continue;
            }
            self.add_atom(atom);
        }
    }

    /// Append an atom; an atom already present for the same kit is replaced
    pub fn add_atom(&mut self, atom: RepoScanAtom) {
        let list = self.atoms.entry(atom.catpkg()).or_default();
        if let Some(existing) = list
            .iter_mut()
            .find(|a| a.atom == atom.atom && a.kit == atom.kit)
        {
            *existing = atom;
        } else {
            list.push(atom);
        }
    }

    pub fn get(&self, catpkg: &str) -> Option<&[RepoScanAtom]> {
        self.atoms.get(catpkg).map(Vec::as_slice)
    }

    pub fn contains(&self, catpkg: &str) -> bool {
        self.atoms.contains_key(catpkg)
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.atoms.values().map(Vec::len).sum()
    }

    pub fn catpkgs(&self) -> impl Iterator<Item = &str> {
        self.atoms.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RepoScanAtom> {
        self.atoms.values().flatten()
    }

    /// Sorted unique categories
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self
            .atoms
            .values()
            .flatten()
            .map(|a| a.category.clone())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"{"cache_data_version":"1.0.6","atoms":{"dev-lang/foo-1.0":{"category":"dev-lang","package":"foo","revision":"0","kit":"dev-kit","branch":"next","files":[{"name":"foo-1.0.tar.gz","size":"12","src_uri":["https://example.org/foo-1.0.tar.gz"],"hashes":{"sha512":"aa","blake2b":"bb"}}],"metadata":{"SLOT":"0","KEYWORDS":"~amd64"},"md5":"m1"}},"metadata_errors":{}}"#;

    #[test]
    fn test_load_jsonl_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev-kit-next");
        fs::write(&path, format!("{RECORD}\n{{\"spec\":{RECORD}}}\n")).unwrap();

        let specs = RepoScanSpec::load_file(&path).unwrap();
        assert_eq!(specs.len(), 2);
        let atom = &specs[0].atoms["dev-lang/foo-1.0"];
        assert_eq!(atom.atom, "dev-lang/foo-1.0");
        assert_eq!(atom.files[0].size, 12);
        assert_eq!(atom.keywords(), "~amd64");
        assert_eq!(atom.ebuild_name().unwrap(), "foo-1.0.ebuild");
    }

    #[test]
    fn test_load_pretty_single_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");
        let value: serde_json::Value = serde_json::from_str(RECORD).unwrap();
        fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();

        let specs = RepoScanSpec::load_file(&path).unwrap();
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = RepoScanSpec::load_file(&dir.path().join("nope"));
        assert!(matches!(missing, Err(Error::CacheRead { .. })));

        let bad = dir.path().join("bad");
        fs::write(&bad, "{not json").unwrap();
        assert!(matches!(RepoScanSpec::load_file(&bad), Err(Error::CacheRead { .. })));
    }

    #[test]
    fn test_atom_map_skips_status_and_dedups() {
        let mut spec: RepoScanSpec = serde_json::from_str(RECORD).unwrap();
        spec.fill_atom_keys();
        let mut broken = spec.atoms["dev-lang/foo-1.0"].clone();
        broken.atom = "dev-lang/foo-2.0".to_string();
        broken.status = Some("ebuild failed to source".to_string());
        spec.atoms.insert(broken.atom.clone(), broken);

        let mut map = AtomMap::new();
        map.add_spec(spec.clone());
        map.add_spec(spec);
        assert_eq!(map.get("dev-lang/foo").unwrap().len(), 1);
        assert_eq!(map.categories(), vec!["dev-lang".to_string()]);
    }

    #[test]
    fn test_to_gentoo_package_carries_slot_and_kit() {
        let mut atom = RepoScanAtom {
            atom: "dev-lang/python-3.11.4-r1".to_string(),
            category: "dev-lang".to_string(),
            package: "python".to_string(),
            kit: "python-kit".to_string(),
            ..Default::default()
        };
        atom.metadata.insert("SLOT".to_string(), "3.11/3.11".to_string());
        let pkg = atom.to_gentoo_package().unwrap();
        assert_eq!(pkg.slot.as_deref(), Some("3.11"));
        assert_eq!(pkg.subslot.as_deref(), Some("3.11"));
        assert_eq!(pkg.repository.as_deref(), Some("python-kit"));
        assert_eq!(atom.pvr().unwrap(), "3.11.4-r1");
    }
}
