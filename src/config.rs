// src/config.rs

//! Configuration file parsing
//!
//! Supports TOML configuration files with the following sections:
//! - [general] - Work directory, concurrency, workdir retention
//! - [http] - Timeouts, retry budget, per-host rate limit
//! - [github] - API endpoint and credentials
//! - [signature] - Commit author
//! - [scanner] - Kit cache generator
//! - [s3] - Object store backend of the fetcher
//!
//! `GITHUB_TOKEN`, `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and
//! `MARK_DEVKIT_WORKDIR` override the file.

use crate::autogen::{AutogenOptions, DEFAULT_AUTOGEN_CONCURRENCY};
use crate::cache::ReposcanCli;
use crate::error::{Error, Result};
use crate::fetcher::{DEFAULT_CONCURRENCY, S3Settings};
use crate::http::{HttpOptions, MAX_RETRIES, RETRY_DELAY_MS};
use crate::merge::{DEFAULT_CLONE_CONCURRENCY, MergeOptions};
use crate::vcs::{GitAuth, Signature};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevkitConfig {
    #[serde(default)]
    pub general: GeneralSection,

    #[serde(default)]
    pub http: HttpSection,

    #[serde(default)]
    pub github: GithubSection,

    #[serde(default)]
    pub signature: Signature,

    #[serde(default)]
    pub scanner: ScannerSection,

    /// Only needed by the `s3` fetcher backend
    #[serde(default)]
    pub s3: Option<S3Settings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralSection {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Concurrent clones of source kits
    #[serde(default = "default_clone_concurrency")]
    pub concurrency: usize,

    /// Concurrent atoms in the fetcher
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Concurrent atoms in the autogen bot
    #[serde(default = "default_autogen_concurrency")]
    pub autogen_concurrency: usize,

    #[serde(default)]
    pub keep_workdir: bool,

    /// Shallow clone depth; 0 clones the full history
    #[serde(default = "default_git_depth")]
    pub git_depth: u32,

    /// Keywords never admitted by the resolver
    #[serde(default)]
    pub disabled_keywords: Vec<String>,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            concurrency: default_clone_concurrency(),
            fetch_concurrency: default_fetch_concurrency(),
            autogen_concurrency: default_autogen_concurrency(),
            keep_workdir: false,
            git_depth: default_git_depth(),
            disabled_keywords: Vec::new(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("workdir")
}

fn default_clone_concurrency() -> usize {
    DEFAULT_CLONE_CONCURRENCY
}

fn default_fetch_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_autogen_concurrency() -> usize {
    DEFAULT_AUTOGEN_CONCURRENCY
}

fn default_git_depth() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSection {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base delay between attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    /// Requests per second per host; unlimited when unset
    #[serde(default)]
    pub rate_limit: Option<u32>,

    #[serde(default)]
    pub rate_burst: Option<u32>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            retries: default_retries(),
            retry_delay: default_retry_delay(),
            rate_limit: None,
            rate_burst: None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    MAX_RETRIES
}

fn default_retry_delay() -> u64 {
    RETRY_DELAY_MS
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubSection {
    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerSection {
    /// `reposcan-generate` binary; looked up on `PATH` when unset
    #[serde(default)]
    pub binary: Option<PathBuf>,

    #[serde(default = "default_scanner_concurrency")]
    pub concurrency: usize,
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            binary: None,
            concurrency: default_scanner_concurrency(),
        }
    }
}

fn default_scanner_concurrency() -> usize {
    10
}

impl DevkitConfig {
    /// Load configuration from a TOML file and apply the environment
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        let mut config = Self::parse(&content)
            .map_err(|e| Error::ParseError(format!("{}: {}", path.display(), e)))?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Configuration file when given, defaults plus environment otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let mut config = Self::default();
                config.apply_env(|key| std::env::var(key).ok());
                Ok(config)
            }
        }
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Override file values with the environment, read through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(token) = var("GITHUB_TOKEN").filter(|t| !t.is_empty()) {
            self.github.token = Some(token);
        }
        if let Some(dir) = var("MARK_DEVKIT_WORKDIR").filter(|d| !d.is_empty()) {
            self.general.work_dir = PathBuf::from(dir);
        }
        if let Some(s3) = self.s3.as_mut() {
            if let Some(key) = var("AWS_ACCESS_KEY_ID") {
                s3.access_key = Some(key);
            }
            if let Some(secret) = var("AWS_SECRET_ACCESS_KEY") {
                s3.secret_key = Some(secret);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.http.retries == 0 {
            return Err(Error::ParseError("http.retries must be at least 1".to_string()));
        }
        if self.http.rate_burst.is_some() && self.http.rate_limit.is_none() {
            return Err(Error::ParseError("http.rate_burst needs http.rate_limit".to_string()));
        }
        if let Some(s3) = &self.s3
            && (s3.endpoint.is_empty() || s3.bucket.is_empty())
        {
            return Err(Error::ParseError("s3.endpoint and s3.bucket are required".to_string()));
        }
        Ok(())
    }

    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            timeout: Duration::from_secs(self.http.timeout),
            retries: self.http.retries,
            retry_delay: Duration::from_millis(self.http.retry_delay),
            rate_limit: self
                .http
                .rate_limit
                .map(|rps| (rps, self.http.rate_burst.unwrap_or(rps))),
            ..HttpOptions::default()
        }
    }

    pub fn github_token(&self) -> Option<&str> {
        self.github.token.as_deref().filter(|t| !t.is_empty())
    }

    /// Credentials embedded in `https://` remotes when pushing
    pub fn git_auth(&self) -> Option<GitAuth> {
        self.github_token().map(|token| GitAuth {
            user: self.github.user.clone(),
            token: token.to_string(),
        })
    }

    pub fn scanner(&self) -> Result<ReposcanCli> {
        match &self.scanner.binary {
            Some(binary) => Ok(ReposcanCli::new(binary.clone())),
            None => ReposcanCli::from_path(),
        }
    }

    /// Merge options seeded from `[general]`, `[signature]` and `[scanner]`
    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            work_dir: self.general.work_dir.clone(),
            git_depth: (self.general.git_depth > 0).then_some(self.general.git_depth),
            signature: self.signature.clone(),
            concurrency: self.general.concurrency,
            scanner_concurrency: self.scanner.concurrency,
            keep_workdir: self.general.keep_workdir,
            disabled_keywords: self.general.disabled_keywords.clone(),
            ..MergeOptions::default()
        }
    }

    pub fn autogen_options(&self) -> AutogenOptions {
        AutogenOptions {
            merge: self.merge_options(),
            concurrency: self.general.autogen_concurrency,
            ..AutogenOptions::default()
        }
    }
}
