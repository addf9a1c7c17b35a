// src/merge/workspace.rs

//! Working directory of a merge run
//!
//! Layout under the configured work dir:
//!
//! ```text
//! sources/<kit>            source kit checkouts
//! dest/<kit>               target kit checkout
//! kit-cache/<kit>-<branch> source kit caches
//! kit-cache/target-<kit>-<branch>
//! downloads/               distfile staging
//! ```

use super::MergeOptions;
use crate::cache::{CacheGenerator, RepoScanAtom, ScanRequest};
use crate::error::{Error, Result};
use crate::resolver::RepoScanResolver;
use crate::specs::{KitSource, MergeKit};
use crate::vcs::{CloneOptions, Vcs};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const STAGING_DIRS: [&str; 4] = ["sources", "dest", "downloads", "kit-cache"];

/// Checkouts and resolvers shared by the merge phases
#[derive(Debug)]
pub struct Workspace {
    pub work_dir: PathBuf,
    pub target_dir: PathBuf,
    /// The target branch did not exist on origin before this run
    pub is_new_branch: bool,
    pub sources: RepoScanResolver,
    pub target: RepoScanResolver,
    source_dirs: BTreeMap<String, PathBuf>,
}

impl Workspace {
    pub fn sources_dir(&self) -> PathBuf {
        self.work_dir.join("sources")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.work_dir.join("downloads")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.work_dir.join("kit-cache")
    }

    /// Checkout directory of a source kit
    pub fn source_dir(&self, kit: &str) -> Result<&Path> {
        self.source_dirs
            .get(kit)
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::NotFound(format!("source kit '{}'", kit)))
    }

    /// Register a locally generated kit and its atoms as an extra source
    pub fn add_source_kit(&mut self, kit: &str, dir: &Path, atoms: Vec<RepoScanAtom>) {
        self.source_dirs.insert(kit.to_string(), dir.to_path_buf());
        self.sources.add_atoms(atoms);
    }

    /// Remove the staging directories
    pub fn cleanup(&self) -> Result<()> {
        for name in STAGING_DIRS {
            let dir = self.work_dir.join(name);
            if dir.exists() {
                fs::remove_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;
            }
        }
        debug!("Removed staging directories under {}", self.work_dir.display());
        Ok(())
    }
}

/// Clone every kit, generate caches and load the resolvers
pub fn prepare(
    spec: &MergeKit,
    opts: &MergeOptions,
    vcs: &dyn Vcs,
    scanner: &dyn CacheGenerator,
) -> Result<Workspace> {
    for name in STAGING_DIRS {
        let dir = opts.work_dir.join(name);
        fs::create_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;
    }

    let source_dirs = clone_sources(&spec.sources, opts, vcs)?;
    let (target_dir, is_new_branch) = clone_target(spec, opts, vcs)?;

    let cache_dir = opts.work_dir.join("kit-cache");
    let eclass_dirs: Vec<PathBuf> = source_dirs
        .values()
        .map(|d| d.join("eclass"))
        .filter(|d| d.is_dir())
        .collect();

    let mut source_caches = Vec::new();
    for source in &spec.sources {
        let output = cache_dir.join(format!("{}-{}", source.name, source.branch));
        let mut request = ScanRequest::new(&source.name, &source.branch, &source_dirs[&source.name], &output);
        request.eclass_dirs = eclass_dirs.clone();
        request.concurrency = opts.scanner_concurrency;
        scanner.generate(&request)?;
        source_caches.push(output);
    }

    let mut sources = RepoScanResolver::new()
        .with_disabled_keywords(opts.disabled_keywords.clone())
        .with_allow_empty_keywords(opts.allow_empty_keywords);
    sources.load_files(&source_caches)?;

    let mut target = RepoScanResolver::new().with_allow_empty_keywords(true);
    if is_new_branch {
        info!("Branch {} is new, target cache skipped", spec.target.branch);
    } else {
        let output = cache_dir.join(format!("target-{}-{}", spec.target.name, spec.target.branch));
        let mut request = ScanRequest::new(&spec.target.name, &spec.target.branch, &target_dir, &output);
        request.eclass_dirs = eclass_dirs;
        request.eclass_dirs.push(target_dir.join("eclass"));
        request.eclass_dirs.retain(|d| d.is_dir());
        request.concurrency = opts.scanner_concurrency;
        scanner.generate(&request)?;
        target.load_files(&[output])?;
    }

    info!(
        "Loaded {} source atoms and {} target atoms",
        sources.atoms().len(),
        target.atoms().len()
    );

    Ok(Workspace {
        work_dir: opts.work_dir.clone(),
        target_dir,
        is_new_branch,
        sources,
        target,
        source_dirs,
    })
}

fn clone_sources(
    sources: &[KitSource],
    opts: &MergeOptions,
    vcs: &dyn Vcs,
) -> Result<BTreeMap<String, PathBuf>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.concurrency.max(1))
        .build()
        .map_err(|e| Error::InitError(format!("Failed to create worker pool: {e}")))?;

    let root = opts.work_dir.join("sources");
    let cloned: Vec<(String, PathBuf)> = pool.install(|| {
        sources
            .par_iter()
            .map(|source| {
                let dest = root.join(&source.name);
                reset_dir(&dest)?;
                let clone_opts = CloneOptions {
                    branch: Some(source.branch.clone()),
                    depth: opts.git_depth,
                    single_branch: true,
                    recurse_submodules: false,
                };
                vcs.clone_repo(&source.url, &dest, &clone_opts)?;
                if let Some(sha) = &source.commit_sha1 {
                    info!("Pinning {} to {}", source.name, sha);
                    vcs.checkout_commit(&dest, sha)?;
                }
                Ok((source.name.clone(), dest))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    Ok(cloned.into_iter().collect())
}

fn clone_target(spec: &MergeKit, opts: &MergeOptions, vcs: &dyn Vcs) -> Result<(PathBuf, bool)> {
    let target = &spec.target;
    let dest = opts.work_dir.join("dest").join(&target.name);
    reset_dir(&dest)?;

    let is_new_branch = !vcs.branch_exists(&target.url, &target.branch)?;
    let clone_opts = CloneOptions {
        branch: (!is_new_branch).then(|| target.branch.clone()),
        depth: opts.git_depth,
        single_branch: true,
        recurse_submodules: false,
    };
    vcs.clone_repo(&target.url, &dest, &clone_opts)?;
    if is_new_branch {
        vcs.checkout(&dest, &target.branch, true)?;
    }
    Ok((dest, is_new_branch))
}

/// Leftovers of a previous run would make `git clone` fail
fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| Error::io_at(dir, e))?;
    }
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
    }
    Ok(())
}
