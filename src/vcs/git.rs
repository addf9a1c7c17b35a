// src/vcs/git.rs

//! `git` subprocess implementation of [`Vcs`]

use super::{CloneOptions, Signature, Vcs};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info};

/// HTTPS credentials for push
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitAuth {
    pub user: String,
    pub token: String,
}

#[derive(Debug, Clone, Default)]
pub struct GitCli {
    auth: Option<GitAuth>,
}

/// Embed credentials into an `https://` URL; other URLs are returned as is
pub fn authenticated_url(url: &str, auth: &GitAuth) -> Result<String> {
    if !url.starts_with("https://") {
        return Ok(url.to_string());
    }
    let mut parsed =
        url::Url::parse(url).map_err(|e| Error::GitError(format!("Invalid remote {}: {}", url, e)))?;
    let user = if auth.user.is_empty() { "x-access-token" } else { auth.user.as_str() };
    parsed
        .set_username(user)
        .map_err(|_| Error::GitError(format!("Cannot set credentials on {}", url)))?;
    parsed
        .set_password(Some(&auth.token))
        .map_err(|_| Error::GitError(format!("Cannot set credentials on {}", url)))?;
    Ok(parsed.to_string())
}

impl GitCli {
    pub fn new(auth: Option<GitAuth>) -> Self {
        Self { auth }
    }

    fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new("git");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd.args(args).env("GIT_TERMINAL_PROMPT", "0");
        debug!("git {}", redact(&args.join(" ")));

        let output = cmd
            .output()
            .map_err(|e| Error::GitError(format!("Failed to run git: {}", e)))?;
        if !output.status.success() {
            return Err(Error::GitError(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                redact(String::from_utf8_lossy(&output.stderr).trim())
            )));
        }
        Ok(output)
    }

    fn remote_url(&self, repo: &Path) -> Result<String> {
        let output = self.run(Some(repo), &["remote", "get-url", "origin"])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn push_url(&self, repo: &Path) -> Result<String> {
        let url = self.remote_url(repo)?;
        if !url.starts_with("https://") {
            return Ok(url);
        }
        match &self.auth {
            Some(auth) if !auth.token.is_empty() => authenticated_url(&url, auth),
            _ => Err(Error::PushAuth(format!("no token configured to push to {}", url))),
        }
    }
}

/// Hide credentials embedded in URLs from logs and errors
fn redact(text: &str) -> String {
    let re = regex::Regex::new(r"https://[^/@\s]+@").map(|re| re.replace_all(text, "https://***@").into_owned());
    re.unwrap_or_else(|_| text.to_string())
}

impl Vcs for GitCli {
    fn clone_repo(&self, url: &str, dest: &Path, opts: &CloneOptions) -> Result<()> {
        info!("Cloning {} into {}", url, dest.display());
        let depth = opts.depth.map(|d| d.to_string());
        let dest_str = dest.display().to_string();

        let mut args: Vec<&str> = vec!["clone", "--quiet"];
        if let Some(branch) = &opts.branch {
            args.extend(["--branch", branch.as_str()]);
        }
        if let Some(depth) = &depth {
            args.extend(["--depth", depth.as_str()]);
        }
        if opts.single_branch {
            args.push("--single-branch");
        }
        if opts.recurse_submodules {
            args.extend(["--recurse-submodules", "--shallow-submodules"]);
        }
        args.extend([url, dest_str.as_str()]);
        self.run(None, &args)?;
        Ok(())
    }

    fn branch_exists(&self, url: &str, branch: &str) -> Result<bool> {
        let refname = format!("refs/heads/{}", branch);
        let output = self.run(None, &["ls-remote", "--heads", url, &refname])?;
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    fn checkout(&self, repo: &Path, branch: &str, create: bool) -> Result<()> {
        if create {
            self.run(Some(repo), &["checkout", "--quiet", "-B", branch])?;
        } else {
            self.run(Some(repo), &["checkout", "--quiet", branch])?;
        }
        Ok(())
    }

    fn checkout_commit(&self, repo: &Path, sha: &str) -> Result<()> {
        if self.run(Some(repo), &["cat-file", "-e", &format!("{}^{{commit}}", sha)]).is_err() {
            self.run(Some(repo), &["fetch", "--quiet", "origin", sha])?;
        }
        self.run(Some(repo), &["checkout", "--quiet", sha])?;
        Ok(())
    }

    fn commit(&self, repo: &Path, files: &[PathBuf], message: &str, signature: &Signature) -> Result<bool> {
        if files.is_empty() {
            return Ok(false);
        }
        let paths: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
        let mut add: Vec<&str> = vec!["add", "-A", "--"];
        add.extend(paths.iter().map(String::as_str));
        self.run(Some(repo), &add)?;

        let staged = Command::new("git")
            .current_dir(repo)
            .args(["diff", "--cached", "--quiet"])
            .status()
            .map_err(|e| Error::GitError(format!("Failed to run git: {}", e)))?;
        if staged.success() {
            debug!("Nothing to commit for '{}'", message.lines().next().unwrap_or_default());
            return Ok(false);
        }

        let name = format!("user.name={}", signature.name);
        let email = format!("user.email={}", signature.email);
        self.run(
            Some(repo),
            &["-c", &name, "-c", &email, "commit", "--quiet", "-m", message],
        )?;
        Ok(true)
    }

    fn push(&self, repo: &Path, branch: &str) -> Result<()> {
        let url = self.push_url(repo)?;
        info!("Pushing {}", branch);
        self.run(Some(repo), &["push", "--quiet", &url, &format!("HEAD:refs/heads/{}", branch)])?;
        Ok(())
    }

    fn push_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        let url = self.push_url(repo)?;
        info!("Pushing new branch {}", branch);
        self.run(
            Some(repo),
            &["push", "--quiet", &url, &format!("refs/heads/{0}:refs/heads/{0}", branch)],
        )?;
        Ok(())
    }

    fn head(&self, repo: &Path) -> Result<String> {
        let output = self.run(Some(repo), &["rev-parse", "HEAD"])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
