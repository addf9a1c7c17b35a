// src/fetcher/s3.rs

//! Object store backend
//!
//! The remote is listed once per run. For every file of an atom:
//! - present with matching size and md5 (ETag): skip
//! - present but different: delete the remote object, then re-upload
//! - absent: upload
//!
//! When any file of an atom needs an upload, all of the atom's files are
//! downloaded to the staging directory first and the uploads follow.

use super::download::{Downloader, FetchedFile};
use super::stats::StatsRecorder;
use super::Fetcher;
use crate::cache::{RepoScanAtom, RepoScanFile};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info};

/// One object of the remote listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// Unquoted ETag; the content md5 for single-part uploads
    pub etag: Option<String>,
}

/// Minimal object store used by the backend
pub trait ObjectStore: Send + Sync {
    fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;
    fn put(&self, key: &str, path: &Path) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Settings {
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// S3-compatible store through rust-s3
pub struct S3Store {
    bucket: Box<Bucket>,
    runtime: Runtime,
}

impl S3Store {
    pub fn new(settings: &S3Settings) -> Result<Self> {
        let region = Region::Custom {
            region: if settings.region.is_empty() {
                "us-east-1".to_string()
            } else {
                settings.region.clone()
            },
            endpoint: settings.endpoint.clone(),
        };
        let credentials = Credentials::new(
            settings.access_key.as_deref(),
            settings.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| Error::ObjectStore(format!("Invalid credentials: {e}")))?;

        let bucket = Bucket::new(&settings.bucket, region, credentials)
            .map_err(|e| Error::ObjectStore(format!("Invalid bucket {}: {e}", settings.bucket)))?
            .with_path_style();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| Error::InitError(format!("Failed to start tokio runtime: {e}")))?;

        Ok(Self { bucket, runtime })
    }
}

impl ObjectStore for S3Store {
    fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let pages = self
            .runtime
            .block_on(self.bucket.list(prefix.to_string(), None))
            .map_err(|e| Error::ObjectStore(format!("list {}: {e}", prefix)))?;

        Ok(pages
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|obj| ObjectInfo {
                key: obj.key,
                size: obj.size,
                etag: obj.e_tag.map(|t| t.trim_matches('"').to_string()),
            })
            .collect())
    }

    fn put(&self, key: &str, path: &Path) -> Result<()> {
        self.runtime.block_on(async {
            let mut file = tokio::fs::File::open(path)
                .await
                .map_err(|e| Error::io_at(path, e))?;
            self.bucket
                .put_object_stream(&mut file, key)
                .await
                .map_err(|e| Error::ObjectStore(format!("put {}: {e}", key)))?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.runtime
            .block_on(self.bucket.delete_object(key))
            .map_err(|e| Error::ObjectStore(format!("delete {}: {e}", key)))?;
        Ok(())
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects.lock().insert(key.to_string(), data.to_vec());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).cloned()
    }
}

impl ObjectStore for MemoryStore {
    fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectInfo {
                key: k.clone(),
                size: v.len() as u64,
                etag: Some(crate::hash::md5(v)),
            })
            .collect())
    }

    fn put(&self, key: &str, path: &Path) -> Result<()> {
        let data = fs::read(path).map_err(|e| Error::io_at(path, e))?;
        self.insert(key, &data);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteState {
    Matching,
    Mismatch,
    Absent,
}

pub struct S3Fetcher {
    store: Box<dyn ObjectStore>,
    prefix: String,
    staging_dir: PathBuf,
    downloader: Downloader,
    /// Remote listing keyed by distfile name
    objects: Mutex<BTreeMap<String, ObjectInfo>>,
    recorder: StatsRecorder,
}

impl S3Fetcher {
    pub fn new(
        store: Box<dyn ObjectStore>,
        prefix: &str,
        staging_dir: PathBuf,
        downloader: Downloader,
    ) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
            staging_dir,
            downloader,
            objects: Mutex::new(BTreeMap::new()),
            recorder: StatsRecorder::new(),
        }
    }

    fn key_for(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    fn remote_state(&self, file: &RepoScanFile) -> RemoteState {
        let objects = self.objects.lock();
        let Some(obj) = objects.get(&file.name) else {
            return RemoteState::Absent;
        };
        if obj.size != file.size {
            return RemoteState::Mismatch;
        }
        // Multipart ETags are not content digests
        match (file.md5(), obj.etag.as_deref()) {
            (Some(md5), Some(etag)) if !etag.contains('-') && !etag.eq_ignore_ascii_case(md5) => {
                RemoteState::Mismatch
            }
            _ => RemoteState::Matching,
        }
    }
}

impl Fetcher for S3Fetcher {
    fn backend(&self) -> &'static str {
        "s3"
    }

    fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.staging_dir).map_err(|e| Error::io_at(&self.staging_dir, e))?;

        let list_prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        let listing = self.store.list(&list_prefix)?;
        info!("{} objects under '{}'", listing.len(), list_prefix);

        let mut objects = self.objects.lock();
        objects.clear();
        for obj in listing {
            let Some(name) = obj.key.strip_prefix(&list_prefix).map(str::to_string) else {
                continue;
            };
            if !name.is_empty() && !name.contains('/') {
                objects.insert(name, obj);
            }
        }
        Ok(())
    }

    fn sync_atom(&self, atom: &RepoScanAtom, dry_run: bool) -> Result<u64> {
        let marked: Vec<(&RepoScanFile, RemoteState)> = atom
            .files
            .iter()
            .map(|f| (f, self.remote_state(f)))
            .filter(|(_, state)| *state != RemoteState::Matching)
            .collect();

        if marked.is_empty() {
            debug!("{}: every distfile already uploaded", atom.atom);
            return Ok(0);
        }
        if dry_run {
            for (file, state) in &marked {
                info!("[dry-run] {}: {} is {:?} remotely", atom.atom, file.name, state);
            }
            return Ok(0);
        }

        let mut bytes = 0;
        let mut local = BTreeMap::new();
        for file in &atom.files {
            let fetched = self.sync_file(file, &self.staging_dir)?;
            bytes += fetched.downloaded;
            local.insert(file.name.as_str(), fetched.path);
        }

        for (file, state) in marked {
            let key = self.key_for(&file.name);
            if state == RemoteState::Mismatch {
                info!("{}: replacing remote {}", atom.atom, key);
                self.store.delete(&key)?;
            }
            let path = local
                .get(file.name.as_str())
                .ok_or_else(|| Error::NotFound(file.name.clone()))?;
            self.store.put(&key, path)?;
            self.objects.lock().insert(
                file.name.clone(),
                ObjectInfo {
                    key,
                    size: file.size,
                    etag: file.md5().map(str::to_string),
                },
            );
            bytes += file.size;
        }
        Ok(bytes)
    }

    fn sync_file(&self, file: &RepoScanFile, dst: &Path) -> Result<FetchedFile> {
        self.downloader.fetch(file, dst)
    }

    fn files_list(&self) -> Result<Vec<String>> {
        Ok(self.objects.lock().keys().cloned().collect())
    }

    fn recorder(&self) -> &StatsRecorder {
        &self.recorder
    }
}
