// src/autogen/staging.rs

//! Staging kit for generated packages
//!
//! Generated ebuilds land in a throwaway kit (`sources/staging`) which the
//! merge engine then treats like any other source kit. Artefacts are
//! downloaded to the shared download directory and hashed there.

use super::template::TemplateEngine;
use super::values::{Artefact, Values, set_artefacts, value_str};
use crate::cache::{RepoScanAtom, RepoScanFile};
use crate::error::{Error, Result};
use crate::hash::{MANIFEST_ALGORITHMS, hash_file, md5_file};
use crate::http::{HttpClient, download_bar};
use crate::kit::copy_tree_changed;
use crate::manifest::Manifest;
use crate::merge::MANIFEST_FILE;
use crate::specs::AutogenAtom;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Kit name of generated atoms
pub const STAGING_KIT: &str = "staging";

/// GitHub source archives carry no `Content-Length` on HEAD
fn is_github_archive(url: &str) -> bool {
    url.contains("codeload.github.com")
        || (url.contains("github.com/") && url.contains("/archive/"))
        || (url.contains("api.github.com/repos/") && url.contains("/tarball/"))
}

pub struct Staging {
    kit_dir: PathBuf,
    download_dir: PathBuf,
    client: HttpClient,
}

impl Staging {
    pub fn new(kit_dir: PathBuf, download_dir: PathBuf, client: HttpClient) -> Result<Self> {
        for dir in [&kit_dir, &download_dir] {
            fs::create_dir_all(dir).map_err(|e| Error::io_at(dir, e))?;
        }
        Ok(Self {
            kit_dir,
            download_dir,
            client,
        })
    }

    pub fn kit_dir(&self) -> &Path {
        &self.kit_dir
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Whether a previously downloaded copy can be used as is
    fn reusable(&self, artefact: &Artefact, local: &Path) -> bool {
        let Ok(meta) = fs::metadata(local) else {
            return false;
        };
        if is_github_archive(&artefact.src_uri) {
            return false;
        }
        match self.client.head_content_length(&artefact.src_uri) {
            Ok(Some(len)) => len == meta.len(),
            Ok(None) => false,
            Err(e) => {
                warn!("HEAD {} failed: {}", artefact.src_uri, e);
                false
            }
        }
    }

    /// Download (or reuse) an artefact and describe it as a distfile
    pub fn fetch_artefact(&self, artefact: &Artefact) -> Result<RepoScanFile> {
        let path = match &artefact.path {
            Some(path) if artefact.local => path.clone(),
            _ => {
                let dest = self.download_dir.join(&artefact.name);
                if self.reusable(artefact, &dest) {
                    debug!("Reusing {}", dest.display());
                } else {
                    let bar = download_bar(&artefact.name);
                    self.client.download_file(&artefact.src_uri, &dest, Some(&bar))?;
                }
                dest
            }
        };

        let digests = hash_file(&path, &MANIFEST_ALGORITHMS).map_err(|e| Error::io_at(&path, e))?;
        Ok(RepoScanFile {
            name: artefact.name.clone(),
            size: digests.size,
            src_uri: vec![artefact.src_uri.clone()],
            hashes: digests.to_named(),
        })
    }

    /// Write the package of `atom` at `version` into the staging kit
    ///
    /// Renders the ebuild, copies `files_dir` and merges the Manifest with
    /// any earlier version generated in the same run.
    pub fn generate(
        &self,
        atom: &AutogenAtom,
        engine: &dyn TemplateEngine,
        spec_dir: &Path,
        values: &Values,
        artefacts: &[Artefact],
    ) -> Result<RepoScanAtom> {
        let version = value_str(values, "version")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::TemplateRender(format!("{}: no version selected", atom.name)))?
            .to_string();
        if atom.category.is_empty() || atom.template.is_empty() {
            return Err(Error::SpecParse {
                path: atom.name.clone(),
                message: "category and template are required".to_string(),
            });
        }

        let files: Vec<RepoScanFile> = if atom.ignore_artefacts() {
            Vec::new()
        } else {
            artefacts
                .iter()
                .map(|a| self.fetch_artefact(a))
                .collect::<Result<_>>()?
        };

        let mut values = values.clone();
        set_artefacts(&mut values, artefacts);

        let pkg_dir = self.kit_dir.join(&atom.category).join(&atom.name);
        let ebuild = pkg_dir.join(format!("{}-{}.ebuild", atom.name, version));
        engine.render(&spec_dir.join(&atom.template), &values, &ebuild)?;

        if !atom.files_dir.is_empty() {
            let src = spec_dir.join(&atom.files_dir);
            if src.is_dir() {
                copy_tree_changed(&src, &pkg_dir.join("files"))?;
            }
        }

        let manifest_path = pkg_dir.join(MANIFEST_FILE);
        let mut manifest = Manifest::load(&manifest_path)?;
        manifest.merge(&Manifest::from_files(&files));
        manifest.write(&manifest_path)?;

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("SLOT".to_string(), scalar(values.get("slot")).unwrap_or_else(|| "0".to_string()));
        if let Some(keywords) = scalar(values.get("keywords")) {
            metadata.insert("KEYWORDS".to_string(), keywords);
        }

        let md5 = md5_file(&ebuild).map_err(|e| Error::io_at(&ebuild, e))?;
        info!("Generated {}/{}-{}", atom.category, atom.name, version);
        Ok(RepoScanAtom {
            atom: format!("{}/{}-{}", atom.category, atom.name, version),
            category: atom.category.clone(),
            package: atom.name.clone(),
            kit: STAGING_KIT.to_string(),
            files,
            metadata,
            md5,
            ..Default::default()
        })
    }
}

/// A value as a single metadata string; lists are space joined
fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let joined: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string).or_else(|| v.is_number().then(|| v.to_string())))
                .collect();
            (!joined.is_empty()).then(|| joined.join(" "))
        }
        _ => None,
    }
}
