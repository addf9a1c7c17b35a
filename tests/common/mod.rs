// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! - [`LocalVcs`]: "remotes" are plain directories; push copies back
//! - [`TreeScanner`]: kit caches built from the ebuilds on disk
//! - [`TestServer`]: loopback HTTP server with canned responses
//! - kit builders writing ebuilds and Manifests with real digests

#![allow(dead_code)]

use mark_devkit::cache::{CacheGenerator, RepoScanAtom, RepoScanFile, RepoScanSpec, ScanRequest};
use mark_devkit::hash::{MANIFEST_ALGORITHMS, hash_reader, md5_file};
use mark_devkit::manifest::Manifest;
use mark_devkit::merge::MANIFEST_FILE;
use mark_devkit::vcs::{CloneOptions, Signature, Vcs};
use mark_devkit::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Copy a directory tree, replacing `dest`
pub fn copy_dir(src: &Path, dest: &Path) {
    if dest.exists() {
        fs::remove_dir_all(dest).unwrap();
    }
    for entry in WalkDir::new(src) {
        let entry = entry.unwrap();
        let rel = entry.path().strip_prefix(src).unwrap();
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).unwrap();
        } else {
            fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// Git stand-in over local directories
#[derive(Default)]
pub struct LocalVcs {
    /// `(url, branch)` pairs present on "origin"
    branches: Mutex<BTreeSet<(String, String)>>,
    /// Checkout directory → origin directory
    origins: Mutex<BTreeMap<PathBuf, String>>,
    commits: Mutex<Vec<String>>,
    pushed_branches: Mutex<Vec<String>>,
}

impl LocalVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_branch(&self, url: &Path, branch: &str) {
        self.branches
            .lock()
            .insert((url.display().to_string(), branch.to_string()));
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.lock().clone()
    }

    pub fn clear_commits(&self) {
        self.commits.lock().clear();
    }

    pub fn pushed_branches(&self) -> Vec<String> {
        self.pushed_branches.lock().clone()
    }
}

impl Vcs for LocalVcs {
    fn clone_repo(&self, url: &str, dest: &Path, _opts: &CloneOptions) -> Result<()> {
        let src = Path::new(url);
        if !src.is_dir() {
            return Err(Error::GitError(format!("no repository at {}", url)));
        }
        copy_dir(src, dest);
        self.origins.lock().insert(dest.to_path_buf(), url.to_string());
        Ok(())
    }

    fn branch_exists(&self, url: &str, branch: &str) -> Result<bool> {
        Ok(self
            .branches
            .lock()
            .contains(&(url.to_string(), branch.to_string())))
    }

    fn checkout(&self, _repo: &Path, _branch: &str, _create: bool) -> Result<()> {
        Ok(())
    }

    fn checkout_commit(&self, _repo: &Path, _sha: &str) -> Result<()> {
        Ok(())
    }

    fn commit(&self, _repo: &Path, files: &[PathBuf], message: &str, _signature: &Signature) -> Result<bool> {
        if files.is_empty() {
            return Ok(false);
        }
        self.commits.lock().push(message.to_string());
        Ok(true)
    }

    fn push(&self, repo: &Path, branch: &str) -> Result<()> {
        let origin = self
            .origins
            .lock()
            .get(repo)
            .cloned()
            .ok_or_else(|| Error::GitError(format!("{} has no origin", repo.display())))?;
        copy_dir(repo, Path::new(&origin));
        self.branches.lock().insert((origin, branch.to_string()));
        Ok(())
    }

    fn push_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        let origin = self.origins.lock().get(repo).cloned().unwrap_or_default();
        self.branches.lock().insert((origin, branch.to_string()));
        self.pushed_branches.lock().push(branch.to_string());
        Ok(())
    }

    fn head(&self, _repo: &Path) -> Result<String> {
        Ok("0".repeat(40))
    }
}

fn assignment(content: &str, key: &str) -> Option<String> {
    let prefix = format!("{}=", key);
    content
        .lines()
        .find_map(|l| l.trim().strip_prefix(prefix.as_str()))
        .map(|v| v.trim().trim_matches('"').to_string())
}

/// `(uri, distfile name)` pairs of a `SRC_URI` value
fn src_uri_files(value: &str) -> Vec<(String, String)> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    let mut files = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let uri = tokens[i];
        if tokens.get(i + 1) == Some(&"->")
            && let Some(name) = tokens.get(i + 2)
        {
            files.push((uri.to_string(), name.to_string()));
            i += 3;
            continue;
        }
        let name = uri.rsplit('/').next().unwrap_or(uri);
        files.push((uri.to_string(), name.to_string()));
        i += 1;
    }
    files
}

/// Kit cache generator reading `KEYWORDS`, `SLOT` and `SRC_URI` from the
/// ebuilds and the digests from the package Manifests
#[derive(Default)]
pub struct TreeScanner {
    runs: Mutex<usize>,
}

impl TreeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> usize {
        *self.runs.lock()
    }
}

pub fn scan_kit(kit: &str, branch: &str, dir: &Path) -> Vec<RepoScanAtom> {
    let mut atoms = Vec::new();
    for entry in WalkDir::new(dir).min_depth(3).max_depth(3).sort_by_file_name() {
        let entry = entry.unwrap();
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("ebuild") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap();
        let parts: Vec<&str> = rel.iter().filter_map(|p| p.to_str()).collect();
        let (category, package) = (parts[0], parts[1]);
        let pf = parts[2].trim_end_matches(".ebuild");

        let content = fs::read_to_string(path).unwrap();
        let manifest = Manifest::load(&path.with_file_name(MANIFEST_FILE)).unwrap();
        let mut metadata = BTreeMap::new();
        metadata.insert("KEYWORDS".to_string(), assignment(&content, "KEYWORDS").unwrap_or_default());
        metadata.insert("SLOT".to_string(), assignment(&content, "SLOT").unwrap_or_else(|| "0".to_string()));

        let files = assignment(&content, "SRC_URI")
            .map(|v| src_uri_files(&v))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(uri, name)| {
                manifest.get(&name).map(|entry| RepoScanFile {
                    name: name.clone(),
                    size: entry.size,
                    src_uri: vec![uri],
                    hashes: entry.hashes.iter().map(|(k, v)| (k.to_lowercase(), v.clone())).collect(),
                })
            })
            .collect();

        atoms.push(RepoScanAtom {
            atom: format!("{}/{}", category, pf),
            category: category.to_string(),
            package: package.to_string(),
            kit: kit.to_string(),
            branch: branch.to_string(),
            files,
            metadata,
            md5: md5_file(path).unwrap(),
            ..Default::default()
        });
    }
    atoms
}

impl CacheGenerator for TreeScanner {
    fn generate(&self, request: &ScanRequest) -> Result<()> {
        *self.runs.lock() += 1;
        let atoms = scan_kit(&request.kit, &request.branch, &request.source_dir);
        let spec = RepoScanSpec {
            cache_data_version: "1".to_string(),
            atoms: atoms.into_iter().map(|a| (a.atom.clone(), a)).collect(),
            ..Default::default()
        };
        if let Some(parent) = request.output.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        fs::write(&request.output, format!("{}\n", spec.to_jsonl()?)).map_err(|e| Error::io_at(&request.output, e))
    }
}

/// Distfile record with real digests of `content`
pub fn distfile(name: &str, uri: &str, content: &[u8]) -> RepoScanFile {
    let mut reader = content;
    let digests = hash_reader(&MANIFEST_ALGORITHMS, &mut reader).unwrap();
    RepoScanFile {
        name: name.to_string(),
        size: digests.size,
        src_uri: vec![uri.to_string()],
        hashes: digests.to_named(),
    }
}

/// Write `<kit>/<catpkg>/<pkg>-<pv>.ebuild` and merge its distfiles into the
/// package Manifest
pub fn write_ebuild(kit: &Path, catpkg: &str, pv: &str, keywords: &str, files: &[RepoScanFile]) -> PathBuf {
    let pkg = catpkg.rsplit('/').next().unwrap();
    let pkg_dir = kit.join(catpkg);
    fs::create_dir_all(&pkg_dir).unwrap();

    let src_uri: Vec<String> = files
        .iter()
        .map(|f| {
            let uri = &f.src_uri[0];
            if uri.ends_with(&format!("/{}", f.name)) {
                uri.clone()
            } else {
                format!("{} -> {}", uri, f.name)
            }
        })
        .collect();
    let ebuild = pkg_dir.join(format!("{}-{}.ebuild", pkg, pv));
    fs::write(
        &ebuild,
        format!(
            "EAPI=8\nDESCRIPTION=\"{} test package\"\nSRC_URI=\"{}\"\nSLOT=\"0\"\nKEYWORDS=\"{}\"\n",
            pkg,
            src_uri.join(" "),
            keywords
        ),
    )
    .unwrap();

    let manifest_path = pkg_dir.join(MANIFEST_FILE);
    let mut manifest = Manifest::load(&manifest_path).unwrap();
    manifest.merge(&Manifest::from_files(files));
    manifest.write(&manifest_path).unwrap();
    ebuild
}

/// Empty kit skeleton with `profiles/repo_name`
pub fn init_kit(dir: &Path, name: &str) {
    fs::create_dir_all(dir.join("profiles")).unwrap();
    fs::write(dir.join("profiles/repo_name"), format!("{}\n", name)).unwrap();
}

/// `DIST` names of a package Manifest
pub fn manifest_names(pkg_dir: &Path) -> Vec<String> {
    Manifest::load(&pkg_dir.join(MANIFEST_FILE))
        .unwrap()
        .names()
        .map(str::to_string)
        .collect()
}

/// Canned response of [`TestServer`]
#[derive(Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            content_type: "application/octet-stream",
        }
    }

    pub fn json(body: &serde_json::Value) -> Self {
        Self {
            status: 200,
            body: body.to_string().into_bytes(),
            content_type: "application/json",
        }
    }
}

/// Loopback HTTP/1.1 server answering from a fixed route table
///
/// Unknown paths get a 404. Every request line is recorded.
pub struct TestServer {
    pub base: String,
    requests: Arc<Mutex<Vec<String>>>,
    routes: Arc<Mutex<BTreeMap<String, Route>>>,
}

impl TestServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let routes: Arc<Mutex<BTreeMap<String, Route>>> = Arc::new(Mutex::new(BTreeMap::new()));

        let seen = Arc::clone(&requests);
        let table = Arc::clone(&routes);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                loop {
                    let mut header = String::new();
                    match reader.read_line(&mut header) {
                        Ok(0) | Err(_) => break,
                        Ok(_) if header == "\r\n" || header == "\n" => break,
                        Ok(_) => {}
                    }
                }

                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();
                seen.lock().push(format!("{} {}", method, path));

                let route = table.lock().get(&path).cloned().unwrap_or(Route {
                    status: 404,
                    body: b"not found".to_vec(),
                    content_type: "text/plain",
                });
                let head = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    route.status,
                    route.content_type,
                    route.body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                if method != "HEAD" {
                    let _ = stream.write_all(&route.body);
                }
                let _ = stream.flush();
            }
        });

        Self { base, requests, routes }
    }

    pub fn route(&self, path: &str, route: Route) {
        self.routes.lock().insert(path.to_string(), route);
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}
