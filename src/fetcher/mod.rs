// src/fetcher/mod.rs

//! Distfile mirroring
//!
//! A fetcher walks the atoms selected by a distfiles specfile and makes
//! sure every distfile they reference exists, verified, in its backend:
//!
//! - `dir`: a local download directory
//! - `s3`: an object store bucket under a prefix, fed from a local staging
//!   directory
//!
//! Atoms are processed concurrently on a rayon pool; a single atom's files
//! are handled in cache order by one worker. Failures are recorded per atom
//! and the run continues.

mod dir;
mod download;
mod locks;
mod s3;
mod stats;

pub use dir::DirFetcher;
pub use download::{Downloader, FetchedFile, verify_local};
pub use locks::DownloadLocks;
pub use s3::{MemoryStore, ObjectInfo, ObjectStore, S3Fetcher, S3Settings, S3Store};
pub use stats::{AtomError, FetchReport, FetcherStats, ReportFormat, StatsRecorder};

use crate::cache::{RepoScanAtom, RepoScanFile};
use crate::error::{Error, Result};
use crate::resolver::{RepoScanResolver, ResolveOptions};
use crate::specs::DistfilesSpec;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Default number of atoms processed concurrently
pub const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub concurrency: usize,
    pub dry_run: bool,
    /// Restrict the run to these catpkgs / package names
    pub atoms_filter: Vec<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
            atoms_filter: Vec::new(),
        }
    }
}

/// Fetcher backend
pub trait Fetcher: Send + Sync {
    /// Backend name as used in configuration
    fn backend(&self) -> &'static str;

    /// One-time setup before the first atom (listing the remote, ...)
    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Make every distfile of `atom` available; returns bytes transferred
    fn sync_atom(&self, atom: &RepoScanAtom, dry_run: bool) -> Result<u64>;

    /// Fetch and verify one distfile into `dst`
    fn sync_file(&self, file: &RepoScanFile, dst: &Path) -> Result<FetchedFile>;

    /// Names of the distfiles held by the backend
    fn files_list(&self) -> Result<Vec<String>>;

    fn recorder(&self) -> &StatsRecorder;

    fn stats(&self) -> FetcherStats {
        self.recorder().stats()
    }

    fn atoms_in_error(&self) -> Vec<AtomError> {
        self.recorder().atoms_in_error()
    }

    /// Process `atoms`, recording failures and continuing
    fn sync_atoms(&self, atoms: &[RepoScanAtom], opts: &FetchOptions) -> Result<FetchReport> {
        self.prepare()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.concurrency.max(1))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create worker pool: {e}")))?;

        let recorder = self.recorder();
        pool.install(|| {
            atoms.par_iter().for_each(|atom| {
                recorder.atom_started();
                match self.sync_atom(atom, opts.dry_run) {
                    Ok(bytes) => recorder.atom_done(bytes),
                    Err(e) => {
                        error!("{}: {}", atom.atom, e);
                        recorder.atom_failed(&atom.atom, &e);
                    }
                }
            });
        });

        let report = recorder.report(self.backend());
        info!(
            "Fetch completed: {} atoms, {} errors, {} bytes",
            report.tot_atoms, report.tot_errors, report.tot_bytes
        );
        Ok(report)
    }

    /// Resolve the specfile's atoms and process them
    fn sync(
        &self,
        spec: &DistfilesSpec,
        resolver: &RepoScanResolver,
        opts: &FetchOptions,
    ) -> Result<FetchReport> {
        let atoms = collect_atoms(spec, resolver, &opts.atoms_filter)?;
        info!("{} atoms to check with the {} backend", atoms.len(), self.backend());
        self.sync_atoms(&atoms, opts)
    }
}

/// Every admitted version of every target atom of the specfile
///
/// Target atoms missing from the caches are skipped with a warning.
pub fn collect_atoms(
    spec: &DistfilesSpec,
    resolver: &RepoScanResolver,
    filter: &[String],
) -> Result<Vec<RepoScanAtom>> {
    let target = &spec.kit.target;
    let mut atoms = Vec::new();
    for entry in target.atoms.iter().filter(|a| a.matches_filter(filter)) {
        let opts = ResolveOptions {
            conditions: entry.conditions(&target.atoms_defaults).to_vec(),
            ignore_slot: entry.ignore_slot(&target.atoms_defaults),
        };
        match resolver.get_valid(&entry.pkg, &opts) {
            Ok(valid) => atoms.extend(valid),
            Err(Error::NotFound(catpkg)) => warn!("{}: not in kit caches", catpkg),
            Err(e) => return Err(e),
        }
    }
    Ok(atoms)
}

/// Backend selection by name
pub fn new_fetcher(
    backend: &str,
    work_dir: &Path,
    downloader: Downloader,
    s3: Option<&S3Settings>,
) -> Result<Box<dyn Fetcher>> {
    match backend {
        "dir" => Ok(Box::new(DirFetcher::new(work_dir.join("download"), downloader))),
        "s3" => {
            let settings = s3.ok_or_else(|| {
                Error::InitError("the s3 backend needs an [s3] configuration section".to_string())
            })?;
            let store = S3Store::new(settings)?;
            Ok(Box::new(S3Fetcher::new(
                Box::new(store),
                &settings.prefix,
                staging_dir(work_dir),
                downloader,
            )))
        }
        other => Err(Error::UnsupportedBackend(other.to_string())),
    }
}

fn staging_dir(work_dir: &Path) -> PathBuf {
    work_dir.join("downloads")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpClient;
    use crate::specs::TargetAtom;

    fn atom(pv: &str) -> RepoScanAtom {
        let mut a = RepoScanAtom {
            atom: format!("dev-lang/foo-{pv}"),
            category: "dev-lang".to_string(),
            package: "foo".to_string(),
            ..Default::default()
        };
        a.metadata.insert("KEYWORDS".to_string(), "amd64".to_string());
        a
    }

    #[test]
    fn test_collect_atoms_filters_and_skips_missing() {
        let mut resolver = RepoScanResolver::new();
        resolver.add_atoms([atom("1.0"), atom("1.1")]);

        let mut spec = DistfilesSpec::default();
        spec.kit.target.atoms = vec![
            TargetAtom::new("dev-lang/foo"),
            TargetAtom::new("dev-lang/missing"),
        ];
        let atoms = collect_atoms(&spec, &resolver, &[]).unwrap();
        assert_eq!(atoms.len(), 2);

        let atoms = collect_atoms(&spec, &resolver, &["bar".to_string()]).unwrap();
        assert!(atoms.is_empty());
    }

    #[test]
    fn test_unknown_backend() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(HttpClient::with_defaults().unwrap());
        assert!(matches!(
            new_fetcher("ftp", dir.path(), downloader, None),
            Err(Error::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn test_s3_backend_requires_settings() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(HttpClient::with_defaults().unwrap());
        assert!(matches!(
            new_fetcher("s3", dir.path(), downloader, None),
            Err(Error::InitError(_))
        ));
    }
}
