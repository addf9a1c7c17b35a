// src/error.rs

//! Crate-wide error type
//!
//! Module-local errors (version parsing, manifests, hashing) convert into
//! [`Error`] so callers can propagate everything with `?`.

use crate::manifest::ManifestError;
use crate::version::VersionError;
use std::io;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Failed to parse specfile {path}: {message}")]
    SpecParse { path: String, message: String },

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Failed to read kit cache {path}: {message}")]
    CacheRead { path: String, message: String },

    #[error("Package {0} not found")]
    NotFound(String),

    #[error("No candidate available for {0}")]
    NoCandidate(String),

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("{algorithm} mismatch for {name}: expected {expected}, got {actual}")]
    HashMismatch {
        name: String,
        algorithm: String,
        expected: String,
        actual: String,
    },

    #[error("Size mismatch for {name}: expected {expected}, got {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("Branch {0} already exists on origin")]
    VcsBranchExists(String),

    #[error("Git error: {0}")]
    GitError(String),

    #[error("Scanner error: {0}")]
    ScannerError(String),

    #[error("Template render failed: {0}")]
    TemplateRender(String),

    #[error("Extension {name} failed: {message}")]
    Extension { name: String, message: String },

    #[error("Failed to apply patch {patch}: {message}")]
    PatchFailed { patch: String, message: String },

    #[error("External script {script} failed: {message}")]
    ExternalScript { script: String, message: String },

    #[error("Missing push credentials: {0}")]
    PushAuth(String),

    #[error("Unsupported transform kind: {0}")]
    UnsupportedTransform(String),

    #[error("Unsupported generator: {0}")]
    UnsupportedGenerator(String),

    #[error("Unsupported extension: {0}")]
    UnsupportedExtension(String),

    #[error("Unsupported fetcher backend: {0}")]
    UnsupportedBackend(String),

    #[error("Unsupported template engine: {0}")]
    UnsupportedEngine(String),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Pull request error: {0}")]
    PullRequest(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

impl Error {
    /// Wrap an I/O error with the path it happened on
    pub fn io_at(path: &std::path::Path, err: io::Error) -> Self {
        Error::IoError(format!("{}: {}", path.display(), err))
    }

    /// Whether the error is a recoverable integrity failure of a distfile
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::HashMismatch { .. } | Error::SizeMismatch { .. })
    }
}
