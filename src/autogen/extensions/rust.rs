// src/autogen/extensions/rust.rs

//! Cargo dependency vendoring
//!
//! Registry dependencies of `Cargo.lock` are downloaded as `.crate` files
//! and checked against their lock checksum. Git dependencies are cloned,
//! archived as `git/<escaped-url>-<rev>.tar.xz` and redirected through
//! `mark_config.toml`. Local workspace crates and names listed in
//! `crates_skipped` are left out.
//!
//! Options: `crates_url`, `crates_skipped` (space or comma separated),
//! `git_depth`, `mirror`.

use super::{Extension, ExtensionContext, bundle_target, prepare_source, push_bundle, scratch_dir};
use crate::autogen::archive::create_tar_xz;
use crate::autogen::generators::Elaboration;
use crate::error::{Error, Result};
use crate::hash::{HashAlgorithm, hash_file};
use crate::specs::AutogenAtom;
use crate::vcs::CloneOptions;
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const DEFAULT_CRATES_URL: &str = "https://crates.io/api/v1/crates";
const DOWNLOAD_WORKERS: usize = 8;
const VENDOR_PREFIX: &str = "cargo-vendor";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CargoLock {
    #[serde(default, rename = "package")]
    pub packages: Vec<LockPackage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LockPackage {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
}

impl CargoLock {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ParseError(format!("Cargo.lock: {}", e)))
    }
}

/// A `git+<url>[?<query>]#<rev>` lock source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GitSource {
    /// The lock source with the `#<rev>` fragment removed
    pub source: String,
    pub url: String,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub rev: String,
}

impl GitSource {
    pub fn parse(source: &str) -> Option<Self> {
        let rest = source.strip_prefix("git+")?;
        let (location, rev) = rest.split_once('#')?;
        let (url, query) = match location.split_once('?') {
            Some((url, query)) => (url, Some(query)),
            None => (location, None),
        };
        let param = |key: &str| {
            query.and_then(|q| {
                q.split('&')
                    .filter_map(|kv| kv.split_once('='))
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v.to_string())
            })
        };
        Some(Self {
            source: format!("git+{}", location),
            url: url.to_string(),
            branch: param("branch"),
            tag: param("tag"),
            rev: rev.to_string(),
        })
    }

    /// `github.com_foo_bar-<rev>`
    pub fn archive_stem(&self) -> String {
        let bare = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url)
            .trim_end_matches(".git");
        let escaped: String = bare
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        format!("{}-{}", escaped, self.rev)
    }
}

/// `mark_config.toml`: cargo source replacement for the vendored tree
pub fn mark_config(git_sources: &[GitSource]) -> Result<String> {
    let mut sources = toml::Table::new();

    let mut crates_io = toml::Table::new();
    crates_io.insert("replace-with".into(), "vendored-sources".into());
    sources.insert("crates-io".into(), crates_io.into());

    for git in git_sources {
        let mut entry = toml::Table::new();
        entry.insert("git".into(), git.url.clone().into());
        if let Some(branch) = &git.branch {
            entry.insert("branch".into(), branch.clone().into());
        }
        if let Some(tag) = &git.tag {
            entry.insert("tag".into(), tag.clone().into());
        }
        entry.insert("rev".into(), git.rev.clone().into());
        entry.insert("replace-with".into(), "vendored-sources".into());
        sources.insert(git.source.clone(), entry.into());
    }

    let mut vendored = toml::Table::new();
    vendored.insert("directory".into(), "vendor".into());
    sources.insert("vendored-sources".into(), vendored.into());

    let mut root = toml::Table::new();
    root.insert("source".into(), sources.into());
    toml::to_string(&root).map_err(|e| Error::ParseError(e.to_string()))
}

/// Local crates of the source tree: name → version
///
/// Members inheriting `version.workspace = true` get the version of the
/// nearest `[workspace.package]`.
pub fn local_crates(root: &Path) -> Result<BTreeMap<String, String>> {
    let mut manifests: Vec<(PathBuf, toml::Table)> = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != "target" && e.file_name() != ".git")
    {
        let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
        if entry.file_name() != "Cargo.toml" {
            continue;
        }
        let content = fs::read_to_string(entry.path()).map_err(|e| Error::io_at(entry.path(), e))?;
        match toml::from_str::<toml::Table>(&content) {
            Ok(table) => manifests.push((entry.into_path(), table)),
            Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
        }
    }

    let workspace_version = |path: &Path| -> Option<String> {
        manifests
            .iter()
            .filter(|(p, _)| p.parent().is_some_and(|dir| path.starts_with(dir)))
            .filter_map(|(p, t)| {
                let version = t.get("workspace")?.get("package")?.get("version")?.as_str()?;
                Some((p.components().count(), version.to_string()))
            })
            .max_by_key(|(depth, _)| *depth)
            .map(|(_, version)| version)
    };

    let mut crates = BTreeMap::new();
    for (path, table) in &manifests {
        let Some(package) = table.get("package") else {
            continue;
        };
        let Some(name) = package.get("name").and_then(|n| n.as_str()) else {
            continue;
        };
        let version = match package.get("version") {
            Some(toml::Value::String(v)) => v.clone(),
            Some(toml::Value::Table(t)) if t.get("workspace").and_then(|w| w.as_bool()) == Some(true) => {
                workspace_version(path).unwrap_or_default()
            }
            _ => String::new(),
        };
        crates.insert(name.to_string(), version);
    }
    Ok(crates)
}

fn skipped_crates(options: &BTreeMap<String, String>) -> BTreeSet<String> {
    options
        .get("crates_skipped")
        .map(|s| {
            s.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn find_lock(root: &Path) -> Result<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() == "Cargo.lock")
        .min_by_key(|e| e.depth())
        .map(|e| e.into_path())
        .ok_or_else(|| Error::Extension {
            name: "rust".to_string(),
            message: format!("no Cargo.lock under {}", root.display()),
        })
}

pub struct RustExtension;

impl RustExtension {
    fn download_crate(ctx: &ExtensionContext, base: &str, dir: &Path, package: &LockPackage) -> Result<()> {
        let dest = dir.join(format!("{}-{}.crate", package.name, package.version));
        if !dest.exists() {
            let url = format!("{}/{}/{}/download", base.trim_end_matches('/'), package.name, package.version);
            ctx.client.download_file(&url, &dest, None)?;
        }
        if let Some(expected) = &package.checksum {
            let digests = hash_file(&dest, &[HashAlgorithm::Sha256]).map_err(|e| Error::io_at(&dest, e))?;
            let actual = digests.get(HashAlgorithm::Sha256).unwrap_or_default();
            if actual != expected {
                let _ = fs::remove_file(&dest);
                return Err(Error::HashMismatch {
                    name: format!("{}-{}.crate", package.name, package.version),
                    algorithm: "sha256".to_string(),
                    expected: expected.clone(),
                    actual: actual.to_string(),
                });
            }
        }
        Ok(())
    }

    fn vendor_git(ctx: &ExtensionContext, depth: Option<u32>, scratch: &Path, out: &Path, git: &GitSource) -> Result<()> {
        let stem = git.archive_stem();
        let archive = out.join(format!("{}.tar.xz", stem));
        if archive.exists() {
            return Ok(());
        }
        let checkout = scratch.join("git-checkouts").join(&stem);
        let opts = CloneOptions {
            branch: git.branch.clone().or_else(|| git.tag.clone()),
            depth,
            single_branch: git.branch.is_some() || git.tag.is_some(),
            recurse_submodules: true,
        };
        ctx.vcs.clone_repo(&git.url, &checkout, &opts)?;
        ctx.vcs.checkout_commit(&checkout, &git.rev)?;
        let dot_git = checkout.join(".git");
        if dot_git.is_dir() {
            fs::remove_dir_all(&dot_git).map_err(|e| Error::io_at(&dot_git, e))?;
        } else if dot_git.exists() {
            fs::remove_file(&dot_git).map_err(|e| Error::io_at(&dot_git, e))?;
        }
        create_tar_xz(&checkout, &archive, &stem)
    }
}

impl Extension for RustExtension {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn elaborate(
        &self,
        ctx: &ExtensionContext,
        atom: &AutogenAtom,
        options: &BTreeMap<String, String>,
        state: &mut Elaboration,
    ) -> Result<()> {
        let scratch = scratch_dir(ctx, atom, "rust")?;
        let root = prepare_source(ctx, atom, state, &scratch)?;
        let lock_path = find_lock(&root)?;
        let content = fs::read_to_string(&lock_path).map_err(|e| Error::io_at(&lock_path, e))?;
        let lock = CargoLock::parse(&content)?;

        let local = local_crates(&root)?;
        let skipped = skipped_crates(options);
        let mut registry = Vec::new();
        let mut git_sources = BTreeSet::new();
        for package in &lock.packages {
            if skipped.contains(&package.name) || local.contains_key(&package.name) {
                debug!("{}: skipping crate {}", atom.name, package.name);
                continue;
            }
            match package.source.as_deref() {
                None => continue,
                Some(source) if source.starts_with("git+") => {
                    if let Some(git) = GitSource::parse(source) {
                        git_sources.insert(git);
                    }
                }
                Some(_) => registry.push(package.clone()),
            }
        }
        let git_sources: Vec<GitSource> = git_sources.into_iter().collect();
        info!(
            "{}: vendoring {} crates and {} git sources ({} local crates)",
            atom.name,
            registry.len(),
            git_sources.len(),
            local.len()
        );

        let vendor = scratch.join(VENDOR_PREFIX);
        let crates_dir = vendor.join("crates");
        let git_dir = vendor.join("git");
        fs::create_dir_all(&crates_dir).map_err(|e| Error::io_at(&crates_dir, e))?;
        fs::create_dir_all(&git_dir).map_err(|e| Error::io_at(&git_dir, e))?;

        let base = options.get("crates_url").map(String::as_str).unwrap_or(DEFAULT_CRATES_URL);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(DOWNLOAD_WORKERS)
            .build()
            .map_err(|e| Error::InitError(e.to_string()))?;
        pool.install(|| {
            registry
                .par_iter()
                .try_for_each(|p| Self::download_crate(ctx, base, &crates_dir, p))
        })?;

        let depth = options.get("git_depth").and_then(|d| d.parse().ok());
        for git in &git_sources {
            Self::vendor_git(ctx, depth, &scratch, &git_dir, git)?;
        }

        let config = vendor.join("mark_config.toml");
        fs::write(&config, mark_config(&git_sources)?).map_err(|e| Error::io_at(&config, e))?;

        let (name, bundle) = bundle_target(ctx, atom, state, "rust");
        create_tar_xz(&vendor, &bundle, VENDOR_PREFIX)?;
        push_bundle(state, options, &name, bundle);
        fs::remove_dir_all(&scratch).map_err(|e| Error::io_at(&scratch, e))?;
        Ok(())
    }
}
