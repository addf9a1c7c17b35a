// src/kit/eclasses.rs

//! Eclass selection and copy between kits

use super::copy_if_changed;
use crate::error::{Error, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Compiled eclass name filters of one source kit
#[derive(Debug, Clone)]
pub struct EclassFilter {
    patterns: Vec<Regex>,
}

impl EclassFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::ParseError(format!("eclass regex '{}': {}", p, e))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Matches the file name with or without the `.eclass` extension
    pub fn matches(&self, file_name: &str) -> bool {
        let stem = file_name.strip_suffix(".eclass").unwrap_or(file_name);
        self.patterns
            .iter()
            .any(|re| re.is_match(stem) || re.is_match(file_name))
    }
}

/// Copy matching eclasses of `source_kit` into `target_kit`
///
/// Returns the changed paths relative to the target kit, sorted.
pub fn copy_eclasses(source_kit: &Path, target_kit: &Path, filter: &EclassFilter) -> Result<Vec<PathBuf>> {
    let src_dir = source_kit.join("eclass");
    let mut changed = Vec::new();
    if !src_dir.is_dir() {
        return Ok(changed);
    }

    let mut names: Vec<String> = fs::read_dir(&src_dir)
        .map_err(|e| Error::io_at(&src_dir, e))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| name.ends_with(".eclass") && filter.matches(name))
        .collect();
    names.sort();

    for name in names {
        let rel = Path::new("eclass").join(&name);
        if copy_if_changed(&src_dir.join(&name), &target_kit.join(&rel))? {
            changed.push(rel);
        }
    }
    Ok(changed)
}
