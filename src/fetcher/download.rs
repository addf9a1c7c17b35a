// src/fetcher/download.rs

//! Distfile download pipeline
//!
//! For one distfile:
//! 1. Take the per-name lock
//! 2. Reuse the local copy when it already verifies; discard it otherwise
//! 3. Expand `mirror://<alias>/<path>` URIs through the mirror table
//! 4. Try every candidate URL in order, then the fallback mirrors
//! 5. Verify size and digests against the cache; a mismatch deletes the
//!    download and fails the file

use super::locks::DownloadLocks;
use crate::cache::RepoScanFile;
use crate::error::{Error, Result};
use crate::hash::{HashAlgorithm, VerifyError, hash_file, verify_digests};
use crate::http::{HttpClient, download_bar, join_url};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const VERIFY_ALGORITHMS: [HashAlgorithm; 3] =
    [HashAlgorithm::Sha512, HashAlgorithm::Blake2b, HashAlgorithm::Md5];

/// Result of fetching one distfile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: PathBuf,
    /// Bytes transferred; zero when the local copy was reused
    pub downloaded: u64,
    pub reused: bool,
}

pub struct Downloader {
    client: HttpClient,
    mirrors: BTreeMap<String, Vec<String>>,
    fallback: Vec<String>,
    locks: Arc<DownloadLocks>,
    show_progress: bool,
}

impl Downloader {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            mirrors: BTreeMap::new(),
            fallback: Vec::new(),
            locks: Arc::new(DownloadLocks::new()),
            show_progress: false,
        }
    }

    /// Mirror aliases used to expand `mirror://` URIs
    pub fn with_mirrors(mut self, mirrors: BTreeMap<String, Vec<String>>) -> Self {
        self.mirrors = mirrors;
        self
    }

    /// Base URLs tried with the file name after every declared URI
    pub fn with_fallback(mut self, fallback: Vec<String>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_locks(mut self, locks: Arc<DownloadLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Every URL to try for a distfile, in order, without duplicates
    pub fn candidate_urls(&self, name: &str, src_uris: &[String]) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        let mut push = |url: String| {
            if !urls.contains(&url) {
                urls.push(url);
            }
        };

        for uri in src_uris {
            match uri.strip_prefix("mirror://") {
                Some(rest) => {
                    let (alias, path) = rest.split_once('/').unwrap_or((rest, ""));
                    match self.mirrors.get(alias) {
                        Some(bases) => {
                            for base in bases {
                                push(join_url(base, path));
                            }
                        }
                        None => warn!("Unknown mirror alias '{}' for {}", alias, name),
                    }
                }
                None => push(uri.clone()),
            }
        }
        for base in &self.fallback {
            push(join_url(base, name));
        }
        urls
    }

    /// Fetch `file` into `dest_dir`
    pub fn fetch(&self, file: &RepoScanFile, dest_dir: &Path) -> Result<FetchedFile> {
        self.locks
            .with_lock(&file.name, || self.fetch_locked(file, dest_dir))
    }

    fn fetch_locked(&self, file: &RepoScanFile, dest_dir: &Path) -> Result<FetchedFile> {
        if file.sha512().is_none() {
            return Err(Error::DownloadError(format!("{}: no sha512 in kit cache", file.name)));
        }

        let dest = dest_dir.join(&file.name);
        if dest.is_file() {
            match verify_local(file, &dest) {
                Ok(()) => {
                    debug!("{} already present and verified", file.name);
                    return Ok(FetchedFile {
                        path: dest,
                        downloaded: 0,
                        reused: true,
                    });
                }
                Err(e) => {
                    warn!("Discarding local {}: {}", file.name, e);
                    fs::remove_file(&dest).map_err(|e| Error::io_at(&dest, e))?;
                }
            }
        }

        let urls = self.candidate_urls(&file.name, &file.src_uri);
        if urls.is_empty() {
            return Err(Error::DownloadError(format!("{}: no usable URI", file.name)));
        }

        let mut failures = Vec::new();
        for url in &urls {
            let progress = self.show_progress.then(|| download_bar(&file.name));
            match self.client.download_file(url, &dest, progress.as_ref()) {
                Ok(bytes) => {
                    if let Err(e) = verify_local(file, &dest) {
                        warn!("{}: {}", url, e);
                        if let Err(rm) = fs::remove_file(&dest) {
                            warn!("Failed to remove {}: {}", dest.display(), rm);
                        }
                        failures.push(format!("{}: {}", url, e));
                        continue;
                    }
                    info!("Fetched {} from {}", file.name, url);
                    return Ok(FetchedFile {
                        path: dest,
                        downloaded: bytes,
                        reused: false,
                    });
                }
                Err(e) => {
                    warn!("{}: {}", url, e);
                    failures.push(format!("{}: {}", url, e));
                }
            }
        }

        Err(Error::DownloadError(format!(
            "{}: every URI failed ({})",
            file.name,
            failures.join("; ")
        )))
    }
}

/// Check a local file against the cache's size and digests
pub fn verify_local(file: &RepoScanFile, path: &Path) -> Result<()> {
    let digests = hash_file(path, &VERIFY_ALGORITHMS).map_err(|e| Error::io_at(path, e))?;
    let expected_size = (file.size > 0).then_some(file.size);
    verify_digests(&digests, expected_size, &file.hashes).map_err(|e| match e {
        VerifyError::Size { expected, actual } => Error::SizeMismatch {
            name: file.name.clone(),
            expected,
            actual,
        },
        VerifyError::Digest {
            algorithm,
            expected,
            actual,
        } => Error::HashMismatch {
            name: file.name.clone(),
            algorithm: algorithm.to_string(),
            expected,
            actual,
        },
    })
}
