// src/manifest.rs

//! Thin Manifest files
//!
//! A kit Manifest lists the distfiles of one package directory:
//!
//! ```text
//! DIST foo-1.2.tar.gz 1024 BLAKE2B <hex> SHA512 <hex>
//! ```
//!
//! Entries are keyed and sorted by file name. Hash fields are written only
//! when known, BLAKE2B first, then SHA512, then any other digest by tag.

use crate::cache::RepoScanFile;
use crate::hash::HashAlgorithm;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("line {line}: expected 'DIST <name> <size> ...', got '{content}'")]
    MalformedLine { line: usize, content: String },

    #[error("line {line}: invalid size '{size}'")]
    InvalidSize { line: usize, size: String },

    #[error("line {line}: dangling hash tag '{tag}'")]
    DanglingHash { line: usize, tag: String },
}

/// One `DIST` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub size: u64,
    /// Digests keyed by Manifest tag (`BLAKE2B`, `SHA512`, ...)
    pub hashes: BTreeMap<String, String>,
}

impl ManifestEntry {
    /// Build an entry from a kit cache file record
    pub fn from_file(file: &RepoScanFile) -> Self {
        let hashes = file
            .hashes
            .iter()
            .map(|(algo, value)| {
                let tag = algo
                    .parse::<HashAlgorithm>()
                    .map(|a| a.manifest_tag().to_string())
                    .unwrap_or_else(|_| algo.to_uppercase());
                (tag, value.clone())
            })
            .filter(|(tag, _)| tag != "MD5")
            .collect();
        Self {
            name: file.name.clone(),
            size: file.size,
            hashes,
        }
    }

    fn format_line(&self) -> String {
        let mut line = format!("DIST {} {}", self.name, self.size);
        let preferred = ["BLAKE2B", "SHA512"];
        for tag in preferred {
            if let Some(value) = self.hashes.get(tag) {
                line.push_str(&format!(" {} {}", tag, value));
            }
        }
        for (tag, value) in &self.hashes {
            if !preferred.contains(&tag.as_str()) {
                line.push_str(&format!(" {} {}", tag, value));
            }
        }
        line
    }
}

/// An in-memory Manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse Manifest text; non-`DIST` lines (EBUILD, AUX, ...) are ignored
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let mut manifest = Self::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = idx + 1;
            let fields: Vec<&str> = raw.split_whitespace().collect();
            if fields.is_empty() || fields[0] != "DIST" {
                continue;
            }
            if fields.len() < 3 {
                return Err(ManifestError::MalformedLine {
                    line,
                    content: raw.to_string(),
                });
            }
            let size = fields[2].parse::<u64>().map_err(|_| ManifestError::InvalidSize {
                line,
                size: fields[2].to_string(),
            })?;

            let mut hashes = BTreeMap::new();
            for pair in fields[3..].chunks(2) {
                match pair {
                    [tag, value] => {
                        hashes.insert(tag.to_string(), value.to_string());
                    }
                    [tag] => {
                        return Err(ManifestError::DanglingHash {
                            line,
                            tag: tag.to_string(),
                        });
                    }
                    _ => {}
                }
            }

            manifest.insert(ManifestEntry {
                name: fields[1].to_string(),
                size,
                hashes,
            });
        }
        Ok(manifest)
    }

    /// Read a Manifest from disk; a missing file is an empty Manifest
    pub fn load(path: &Path) -> crate::Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(crate::Error::io_at(path, e)),
        }
    }

    /// Build a Manifest holding the union of the given files
    pub fn from_files<'a>(files: impl IntoIterator<Item = &'a RepoScanFile>) -> Self {
        let mut manifest = Self::new();
        for file in files {
            manifest.insert(ManifestEntry::from_file(file));
        }
        manifest
    }

    pub fn insert(&mut self, entry: ManifestEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<ManifestEntry> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Add every entry of `other`, replacing same-name entries
    pub fn merge(&mut self, other: &Manifest) {
        for entry in other.entries.values() {
            self.insert(entry.clone());
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the Manifest, removing the file when it has no entries
    ///
    /// Returns whether the file on disk changed.
    pub fn write(&self, path: &Path) -> crate::Result<bool> {
        if self.is_empty() {
            if path.exists() {
                fs::remove_file(path).map_err(|e| crate::Error::io_at(path, e))?;
                return Ok(true);
            }
            return Ok(false);
        }
        crate::kit::write_if_changed(path, self.to_string().as_bytes())
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.entries.values() {
            writeln!(f, "{}", entry.format_line())?;
        }
        Ok(())
    }
}
