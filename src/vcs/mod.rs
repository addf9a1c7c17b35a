// src/vcs/mod.rs

//! Version control operations used by the merge engine
//!
//! The engine only needs a handful of operations: clone, remote branch
//! lookup, checkout, commit of a file set, push. [`GitCli`] implements
//! them on top of the `git` binary; tests plug in recording fakes.

mod git;
mod github;

pub use git::{GitAuth, GitCli, authenticated_url};
pub use github::{GITHUB_API_URL, GithubProvider, PullRequest, ReviewProvider, parse_github_repo};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Commit author and committer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            name: "Macaroni OS Bot".to_string(),
            email: "automation@macaronios.org".to_string(),
        }
    }
}

/// How to clone a repository
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    /// Branch to check out; the remote default branch when `None`
    pub branch: Option<String>,
    /// Shallow clone depth; full history when `None`
    pub depth: Option<u32>,
    pub single_branch: bool,
    pub recurse_submodules: bool,
}

pub trait Vcs: Send + Sync {
    fn clone_repo(&self, url: &str, dest: &Path, opts: &CloneOptions) -> Result<()>;

    /// Whether `branch` exists on the remote at `url`
    fn branch_exists(&self, url: &str, branch: &str) -> Result<bool>;

    /// Switch to `branch`, creating it from the current HEAD when `create`
    fn checkout(&self, repo: &Path, branch: &str, create: bool) -> Result<()>;

    /// Detach to a specific commit
    fn checkout_commit(&self, repo: &Path, sha: &str) -> Result<()>;

    /// Stage `files` (additions, changes and removals) and commit them
    ///
    /// Returns `false` when nothing was staged.
    fn commit(&self, repo: &Path, files: &[PathBuf], message: &str, signature: &Signature) -> Result<bool>;

    /// Push the current state of `branch` to origin
    fn push(&self, repo: &Path, branch: &str) -> Result<()>;

    /// Push a newly created branch to origin
    fn push_branch(&self, repo: &Path, branch: &str) -> Result<()>;

    /// Commit id of HEAD
    fn head(&self, repo: &Path) -> Result<String>;
}
