// src/cache/scanner.rs

//! External kit scanner invocation
//!
//! Kit caches are produced by `reposcan-generate`; this module only knows
//! how to call it and where the result lands.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// One scanner run
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub kit: String,
    pub branch: String,
    pub source_dir: PathBuf,
    pub output: PathBuf,
    pub eclass_dirs: Vec<PathBuf>,
    pub concurrency: usize,
}

impl ScanRequest {
    pub fn new(kit: &str, branch: &str, source_dir: &Path, output: &Path) -> Self {
        Self {
            kit: kit.to_string(),
            branch: branch.to_string(),
            source_dir: source_dir.to_path_buf(),
            output: output.to_path_buf(),
            eclass_dirs: Vec::new(),
            concurrency: 10,
        }
    }

    /// Arguments passed to the scanner binary
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--kit".to_string(),
            self.kit.clone(),
            "--branch".to_string(),
            self.branch.clone(),
            self.source_dir.display().to_string(),
            "--concurrency".to_string(),
            self.concurrency.to_string(),
            "-o".to_string(),
            "file".to_string(),
            "-f".to_string(),
            self.output.display().to_string(),
        ];
        for dir in &self.eclass_dirs {
            args.push("--eclass-dir".to_string());
            args.push(dir.display().to_string());
        }
        args
    }
}

/// Produces a kit cache file for a checked out kit
pub trait CacheGenerator: Send + Sync {
    fn generate(&self, request: &ScanRequest) -> Result<()>;
}

/// `reposcan-generate` subprocess
#[derive(Debug, Clone)]
pub struct ReposcanCli {
    binary: PathBuf,
}

impl ReposcanCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Locate the scanner on `PATH`
    pub fn from_path() -> Result<Self> {
        let binary = which::which("reposcan-generate")
            .map_err(|e| Error::ScannerError(format!("reposcan-generate not found: {}", e)))?;
        Ok(Self::new(binary))
    }
}

impl Default for ReposcanCli {
    fn default() -> Self {
        Self::new("reposcan-generate")
    }
}

impl CacheGenerator for ReposcanCli {
    fn generate(&self, request: &ScanRequest) -> Result<()> {
        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }

        info!("Scanning kit {} ({})", request.kit, request.branch);
        let args = request.args();
        debug!("{} {}", self.binary.display(), args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(|e| {
                Error::ScannerError(format!("Failed to run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            return Err(Error::ScannerError(format!(
                "Scan of {} failed: {}",
                request.kit,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}
