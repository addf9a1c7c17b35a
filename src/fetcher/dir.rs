// src/fetcher/dir.rs

//! Local directory backend

use super::download::{Downloader, FetchedFile};
use super::stats::StatsRecorder;
use super::Fetcher;
use crate::cache::{RepoScanAtom, RepoScanFile};
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct DirFetcher {
    download_dir: PathBuf,
    downloader: Downloader,
    recorder: StatsRecorder,
}

impl DirFetcher {
    pub fn new(download_dir: PathBuf, downloader: Downloader) -> Self {
        Self {
            download_dir,
            downloader,
            recorder: StatsRecorder::new(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }
}

impl Fetcher for DirFetcher {
    fn backend(&self) -> &'static str {
        "dir"
    }

    fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.download_dir).map_err(|e| Error::io_at(&self.download_dir, e))
    }

    fn sync_atom(&self, atom: &RepoScanAtom, dry_run: bool) -> Result<u64> {
        let mut bytes = 0;
        for file in &atom.files {
            if dry_run {
                if !self.download_dir.join(&file.name).is_file() {
                    info!("[dry-run] {}: would download {}", atom.atom, file.name);
                }
                continue;
            }
            bytes += self.sync_file(file, &self.download_dir)?.downloaded;
        }
        Ok(bytes)
    }

    fn sync_file(&self, file: &RepoScanFile, dst: &Path) -> Result<FetchedFile> {
        self.downloader.fetch(file, dst)
    }

    fn files_list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.download_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io_at(&self.download_dir, e)),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|n| !n.ends_with(".part"))
            .collect();
        names.sort();
        Ok(names)
    }

    fn recorder(&self) -> &StatsRecorder {
        &self.recorder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchOptions;
    use crate::hash::{HashAlgorithm, hash_bytes};
    use crate::http::HttpClient;
    use std::collections::BTreeMap;

    fn atom_with(name: &str, content: &[u8]) -> RepoScanAtom {
        let mut hashes = BTreeMap::new();
        hashes.insert("sha512".to_string(), hash_bytes(HashAlgorithm::Sha512, content));
        RepoScanAtom {
            atom: "dev-lang/foo-1.0".to_string(),
            category: "dev-lang".to_string(),
            package: "foo".to_string(),
            files: vec![RepoScanFile {
                name: name.to_string(),
                size: content.len() as u64,
                src_uri: vec!["http://127.0.0.1:1/".to_string() + name],
                hashes,
            }],
            ..Default::default()
        }
    }

    fn fetcher(dir: &Path) -> DirFetcher {
        let client = HttpClient::new(&crate::http::HttpOptions {
            retries: 1,
            ..Default::default()
        })
        .unwrap();
        DirFetcher::new(dir.to_path_buf(), Downloader::new(client))
    }

    #[test]
    fn test_existing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("foo-1.0.tar.gz"), b"payload").unwrap();

        let f = fetcher(dir.path());
        let report = f
            .sync_atoms(&[atom_with("foo-1.0.tar.gz", b"payload")], &FetchOptions::default())
            .unwrap();
        assert_eq!(report.tot_atoms, 1);
        assert_eq!(report.tot_errors, 0);
        assert_eq!(report.tot_bytes, 0);
        assert_eq!(f.files_list().unwrap(), vec!["foo-1.0.tar.gz".to_string()]);
    }

    #[test]
    fn test_unreachable_source_records_error_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.tar.gz"), b"ok").unwrap();

        let f = fetcher(dir.path());
        let atoms = [atom_with("missing.tar.gz", b"x"), atom_with("ok.tar.gz", b"ok")];
        let report = f.sync_atoms(&atoms, &FetchOptions::default()).unwrap();
        assert_eq!(report.tot_atoms, 2);
        assert_eq!(report.tot_errors, 1);
        assert_eq!(report.tot_elaborated, 1);
        assert_eq!(f.atoms_in_error().len(), 1);
    }

    #[test]
    fn test_dry_run_downloads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path());
        let opts = FetchOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = f.sync_atoms(&[atom_with("missing.tar.gz", b"x")], &opts).unwrap();
        assert_eq!(report.tot_errors, 0);
        assert!(f.files_list().unwrap().is_empty());
    }
}
